//! # Command Parser
//!
//! Translate one protocol line into a store operation.
//!
//! ## Design Principles
//!
//! 1. **Stateless**: Parsing is a pure function of the line; dispatch only
//!    needs the [`KvStore`] read/write contract.
//! 2. **Silent Failures**: Malformed commands never produce a reply. They are
//!    logged at warning level and the connection stays open.
//! 3. **Permissive Arity**: Extra tokens after the argument are reported and
//!    ignored; the first argument is still used.
//! 4. **Borrowed Tokens**: Keys and values borrow from the line until the
//!    store takes ownership on write.

use thiserror::Error;
use tracing::{trace, warn};

use lkv_common::protocol::{
    CMD_GET, CMD_SET, COMMAND_DELIMITERS, COMMAND_PREFIX, KEY_VALUE_DELIMITER,
};
use lkv_common::KvError;
use lkv_engine::KvStore;

/// Recognized command with arguments borrowed from the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `$get <key>`
    Get { key: &'a str },
    /// `$set <key>=<value>`
    Set { key: &'a str, value: &'a str },
    /// Prefixed but unrecognized; dropped without a reply.
    Unknown { name: &'a str },
}

/// Parsed command plus the number of ignored trailing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub command: Command<'a>,
    pub extra_args: usize,
}

/// Reasons a line does not become a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line does not start with the command prefix.
    #[error("line does not start with the command prefix")]
    NotACommand,
    /// The command token has no argument.
    #[error("no argument for a command, command ignored")]
    MissingArgument,
    /// A `$set` argument is not exactly one `key=value` pair.
    #[error("invalid key/value pair, $set is not performed")]
    InvalidKeyValue,
}

impl From<ParseError> for KvError {
    fn from(err: ParseError) -> Self {
        KvError::Protocol(err.to_string())
    }
}

/// Parses a trimmed protocol line.
pub fn parse_command(line: &str) -> Result<Request<'_>, ParseError> {
    if !line.starts_with(COMMAND_PREFIX) {
        return Err(ParseError::NotACommand);
    }

    let mut tokens = line.split(COMMAND_DELIMITERS);
    let name = tokens.next().unwrap_or_default();
    let argument = tokens.next().ok_or(ParseError::MissingArgument)?;
    let extra_args = tokens.count();

    let command = match name {
        CMD_GET => Command::Get { key: argument },
        CMD_SET => {
            let mut parts = argument.split(KEY_VALUE_DELIMITER);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Command::Set { key, value },
                _ => return Err(ParseError::InvalidKeyValue),
            }
        }
        other => Command::Unknown { name: other },
    };

    Ok(Request {
        command,
        extra_args,
    })
}

/// Runs one line against the store and returns the reply, if any.
///
/// `None` and an empty string both mean nothing is written back.
pub fn execute<S>(store: &S, line: &str) -> Option<String>
where
    S: KvStore + ?Sized,
{
    let request = match parse_command(line) {
        Ok(request) => request,
        Err(ParseError::NotACommand) => return None,
        Err(err) => {
            let err = KvError::from(err);
            warn!(line, "{err}");
            return None;
        }
    };

    if request.extra_args > 0 {
        warn!(
            line,
            extra = request.extra_args,
            "too many arguments for a command, extra parameters ignored"
        );
    }

    match request.command {
        Command::Get { key } => {
            trace!(key, "command {CMD_GET}");
            Some(store.read(key))
        }
        Command::Set { key, value } => {
            trace!(key, "command {CMD_SET}");
            store.write(key.to_owned(), value.to_owned());
            None
        }
        Command::Unknown { name } => {
            trace!(command = name, "unrecognized command dropped");
            None
        }
    }
}
