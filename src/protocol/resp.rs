//! RESP data types and frame definitions
//!
//! Supports both RESP2 and RESP3 frame kinds. Inside this crate frames are
//! the currency between command handlers, the script codec and the command
//! surface; the scripting codec only ever produces RESP2 kinds.

use std::sync::Arc;

/// Type alias for byte strings used throughout the protocol
pub type Bytes = Arc<Vec<u8>>;

/// RESP protocol frame types
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),

    /// Error: -Error message\r\n
    Error(Bytes),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
    BulkString(Option<Bytes>),

    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n or *-1\r\n (null)
    Array(Option<Vec<RespFrame>>),

    // RESP3 additions
    /// Null value: _\r\n
    Null,

    /// Boolean: #t\r\n or #f\r\n
    Boolean(bool),

    /// Double: ,1.23\r\n or ,inf\r\n
    Double(f64),
}

impl RespFrame {
    /// Create the +OK status reply
    pub fn ok() -> Self {
        RespFrame::SimpleString(Arc::new(b"OK".to_vec()))
    }

    /// Create a simple string (status) reply
    pub fn simple_string(s: impl Into<Vec<u8>>) -> Self {
        RespFrame::SimpleString(Arc::new(s.into()))
    }

    /// Create an error reply
    pub fn error(msg: impl Into<Vec<u8>>) -> Self {
        RespFrame::Error(Arc::new(msg.into()))
    }

    /// Create a bulk string from bytes
    pub fn bulk_string(bytes: impl AsRef<[u8]>) -> Self {
        RespFrame::BulkString(Some(Arc::new(bytes.as_ref().to_vec())))
    }

    /// Create a null bulk string
    pub fn null_bulk() -> Self {
        RespFrame::BulkString(None)
    }

    /// Create an array of frames
    pub fn array(frames: Vec<RespFrame>) -> Self {
        RespFrame::Array(Some(frames))
    }

    /// Check if this frame is an error
    pub fn is_error(&self) -> bool {
        matches!(self, RespFrame::Error(_))
    }

    /// Check if this frame represents a null/nil value
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            RespFrame::Null | RespFrame::BulkString(None) | RespFrame::Array(None)
        )
    }

    /// Error message text, if this frame is an error
    pub fn error_text(&self) -> Option<String> {
        match self {
            RespFrame::Error(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

impl From<i64> for RespFrame {
    fn from(n: i64) -> Self {
        RespFrame::Integer(n)
    }
}

impl From<&str> for RespFrame {
    fn from(s: &str) -> Self {
        RespFrame::bulk_string(s.as_bytes())
    }
}
