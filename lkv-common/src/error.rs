//! # LineKV Error Types
//!
//! ## Design Principles
//!
//! 1. **Localized Failures**: Errors are handled by the component that detects
//!    them; nothing here is meant to cross a task boundary.
//! 2. **Categorized Kinds**: Each variant maps to a coarse category (client,
//!    server, transient, protocol) so callers pick a log severity uniformly.
//! 3. **Quiet Disconnects**: A peer hanging up is an I/O error, but callers can
//!    ask for it explicitly and avoid reporting it as a failure.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Result type used across LineKV components.
pub type KvResult<T> = core::result::Result<T, KvError>;

/// High-level category for grouping errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum KvErrorCategory {
    /// Invalid input sent by a client.
    Client,
    /// Server-side resource or invariant failures.
    Server,
    /// Retryable conditions such as a read that would block.
    Transient,
    /// Malformed protocol lines.
    Protocol,
}

impl KvErrorCategory {
    /// Returns true if the category is safe to retry.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors raised by storage, persistence and connection handling.
#[derive(Debug, Error)]
pub enum KvError {
    /// Socket or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot file could not be read, parsed or written.
    #[error("snapshot {}: {reason}", .path.display())]
    Persistence { path: PathBuf, reason: String },

    /// A command line could not be interpreted.
    #[error("malformed command: {0}")]
    Protocol(String),

    /// A client sent more than `limit` bytes without a line terminator.
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    /// The peer stopped reading and a reply could not be sent in time.
    #[error("reply not accepted by peer within {waited:?}")]
    ReplyStalled { waited: Duration },

    /// The listening socket could not be set up.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A background task panicked or was cancelled before it could be joined.
    #[error("task {task} failed to join: {reason}")]
    Join { task: &'static str, reason: String },
}

impl KvError {
    /// Builds a persistence error for `path`.
    pub fn persistence(path: &Path, reason: impl ToString) -> Self {
        KvError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Returns the coarse category of the error.
    pub fn category(&self) -> KvErrorCategory {
        match self {
            Self::Io(err) if is_transient(err.kind()) => KvErrorCategory::Transient,
            Self::Io(_) | Self::Persistence { .. } | Self::Bind { .. } | Self::Join { .. } => {
                KvErrorCategory::Server
            }
            Self::Protocol(_) => KvErrorCategory::Protocol,
            Self::LineTooLong { .. } | Self::ReplyStalled { .. } => KvErrorCategory::Client,
        }
    }

    /// Returns true if callers should retry the operation.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Returns true if the error only means the remote side went away.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::{KvError, KvErrorCategory};
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn maps_error_categories() {
        let would_block = KvError::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(would_block.category(), KvErrorCategory::Transient);

        let refused = KvError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(refused.category(), KvErrorCategory::Server);

        assert_eq!(
            KvError::Protocol("$get".into()).category(),
            KvErrorCategory::Protocol
        );
        assert_eq!(
            KvError::LineTooLong { limit: 8 }.category(),
            KvErrorCategory::Client
        );
        assert_eq!(
            KvError::ReplyStalled {
                waited: Duration::from_millis(50)
            }
            .category(),
            KvErrorCategory::Client
        );
    }

    #[test]
    fn retryable_only_for_transient() {
        assert!(KvError::from(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
        assert!(!KvError::persistence(Path::new("x.ini"), "denied").is_retryable());
    }

    #[test]
    fn detects_peer_closed() {
        let reset = KvError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_peer_closed());

        let other = KvError::from(io::Error::other("boom"));
        assert!(!other.is_peer_closed());
        assert!(!KvError::LineTooLong { limit: 1 }.is_peer_closed());
    }

    #[test]
    fn persistence_message_names_path() {
        let err = KvError::persistence(Path::new("data/config.txt"), "line 3: expected key=value");
        assert_eq!(
            err.to_string(),
            "snapshot data/config.txt: line 3: expected key=value"
        );
    }
}
