//! Error types for Cinnabar
//!
//! This module defines all error types used throughout the scripting
//! subsystem. We follow Redis's error conventions where applicable: any
//! error that reaches a client is rendered as a single-line `-ERR ...`
//! (or other error-code) reply.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Main error type for Cinnabar operations
#[derive(Debug)]
pub enum CinnabarError {
    /// Protocol-related errors (RESP framing)
    Protocol(String),

    /// Command execution errors
    Command(CommandError),

    /// Script subsystem errors. The payload is a complete Redis error
    /// message, possibly carrying its own error code (e.g. `NOSCRIPT ...`).
    Script(String),

    /// Network/IO errors
    Io(String),

    /// Configuration errors
    Config(String),

    /// Internal server errors
    Internal(String),
}

/// Command-specific errors that map to Redis error responses
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Unknown command
    UnknownCommand(String),

    /// Wrong number of arguments for command
    WrongNumberOfArgs(String),

    /// Syntax error in command
    SyntaxError(String),

    /// Value is not an integer or out of range
    NotInteger,

    /// Operation against wrong type
    WrongType,

    /// Generic command error with message
    Generic(String),
}

/// Type alias for Results throughout Cinnabar
pub type Result<T> = std::result::Result<T, CinnabarError>;

impl fmt::Display for CinnabarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CinnabarError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CinnabarError::Command(err) => write!(f, "{}", err),
            CinnabarError::Script(msg) => write!(f, "{}", msg),
            CinnabarError::Io(msg) => write!(f, "I/O error: {}", msg),
            CinnabarError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CinnabarError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand(cmd) => {
                write!(f, "ERR unknown command '{}'", cmd)
            }
            CommandError::WrongNumberOfArgs(cmd) => {
                write!(f, "ERR wrong number of arguments for '{}' command", cmd)
            }
            CommandError::SyntaxError(msg) => write!(f, "ERR {}", msg),
            CommandError::NotInteger => {
                write!(f, "ERR value is not an integer or out of range")
            }
            CommandError::WrongType => {
                write!(f, "WRONGTYPE Operation against a key holding the wrong kind of value")
            }
            CommandError::Generic(msg) => {
                write!(f, "ERR {}", msg)
            }
        }
    }
}

impl StdError for CinnabarError {}
impl StdError for CommandError {}

// Conversion implementations
impl From<io::Error> for CinnabarError {
    fn from(err: io::Error) -> Self {
        CinnabarError::Io(err.to_string())
    }
}

impl From<CommandError> for CinnabarError {
    fn from(err: CommandError) -> Self {
        CinnabarError::Command(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::UnknownCommand("FOOBAR".to_string());
        assert_eq!(err.to_string(), "ERR unknown command 'FOOBAR'");

        let err = CommandError::WrongType;
        assert_eq!(
            err.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
    }

    #[test]
    fn test_script_error_passthrough() {
        let err = CinnabarError::Script("NOSCRIPT No matching script. Please use EVAL.".into());
        assert!(err.to_string().starts_with("NOSCRIPT"));
    }
}
