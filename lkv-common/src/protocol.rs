//! # Line Protocol Constants
//!
//! Purpose: Keep the wire vocabulary in one place so the server parser and the
//! client request builders cannot drift apart.
//!
//! ## Wire Format
//!
//! ```text
//! $get <key>\n          -> <value> (verbatim, no terminator; nothing if absent)
//! $set <key>=<value>\n  -> (no reply)
//! ```

/// First character of every command line. Other lines are ignored.
pub const COMMAND_PREFIX: char = '$';

/// Characters that separate command tokens.
pub const COMMAND_DELIMITERS: &[char] = &[' ', '\t', '\n', '\r'];

/// Separator between key and value in a `$set` argument.
pub const KEY_VALUE_DELIMITER: char = '=';

/// Byte terminating a request line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Read command token.
pub const CMD_GET: &str = "$get";

/// Write command token.
pub const CMD_SET: &str = "$set";

/// Builds a `$get` request line, terminator included.
pub fn get_request(key: &str) -> String {
    format!("{CMD_GET} {key}\n")
}

/// Builds a `$set` request line, terminator included.
pub fn set_request(key: &str, value: &str) -> String {
    format!("{CMD_SET} {key}{KEY_VALUE_DELIMITER}{value}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_lines() {
        assert_eq!(get_request("color"), "$get color\n");
        assert_eq!(set_request("color", "red"), "$set color=red\n");
    }

    #[test]
    fn commands_carry_prefix() {
        assert!(CMD_GET.starts_with(COMMAND_PREFIX));
        assert!(CMD_SET.starts_with(COMMAND_PREFIX));
    }
}
