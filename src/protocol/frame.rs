//! RESP Frame types
//!
//! This module defines the Frame enum representing the reply shapes a
//! command can produce: the RESP2 core plus the RESP3 scalars and maps that
//! script results and store replies can carry.

use std::collections::HashMap;

use bytes::Bytes;

/// RESP protocol frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string: +OK\r\n
    Simple(Bytes),

    /// Error: -ERR message\r\n
    Error(Bytes),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk string: $5\r\nhello\r\n or $-1\r\n for null
    Bulk(Option<Bytes>),

    /// Array: *2\r\n... or *-1\r\n for null
    Array(Option<Vec<Frame>>),

    /// Null: _\r\n (RESP3 explicit null)
    Null,

    /// Boolean: #t\r\n or #f\r\n
    Boolean(bool),

    /// Double: ,3.14\r\n
    Double(f64),

    /// Map: %<count>\r\n<key><value>...
    Map(HashMap<Bytes, Frame>),
}

impl Frame {
    /// Create a simple string frame
    #[inline]
    pub fn simple(s: impl Into<Bytes>) -> Self {
        Frame::Simple(s.into())
    }

    /// The canonical `+OK` reply
    #[inline]
    pub fn ok() -> Self {
        Frame::Simple(Bytes::from_static(b"OK"))
    }

    /// Create an error frame
    #[cold]
    #[inline]
    pub fn error(s: impl Into<Bytes>) -> Self {
        Frame::Error(s.into())
    }

    /// Create an integer frame
    #[inline]
    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    /// Create a bulk string frame
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// Create a null bulk string frame
    #[inline]
    pub fn null() -> Self {
        Frame::Bulk(None)
    }

    /// Create an array frame
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Frame::Array(Some(frames))
    }

    /// Check if this frame is null (bulk, array, or RESP3 Null)
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Bulk(None) | Frame::Array(None) | Frame::Null)
    }

    /// Check if this frame is an error
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Get the string value if this is a Simple, Bulk, or Error frame
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(b) | Frame::Error(b) | Frame::Bulk(Some(b)) => {
                std::str::from_utf8(b).ok()
            }
            _ => None,
        }
    }

    /// Get the integer value if this is an Integer frame
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the array if this is an Array frame
    pub fn as_array(&self) -> Option<&Vec<Frame>> {
        match self {
            Frame::Array(Some(arr)) => Some(arr),
            _ => None,
        }
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::bulk(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Frame::integer(n)
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Frame::bulk(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constructors() {
        assert_eq!(Frame::simple("OK"), Frame::Simple(Bytes::from("OK")));
        assert_eq!(Frame::ok(), Frame::simple("OK"));
        assert_eq!(Frame::error("ERR"), Frame::Error(Bytes::from("ERR")));
        assert_eq!(Frame::integer(42), Frame::Integer(42));
        assert_eq!(Frame::bulk("hello"), Frame::Bulk(Some(Bytes::from("hello"))));
        assert_eq!(Frame::null(), Frame::Bulk(None));
    }

    #[test]
    fn test_frame_is_null() {
        assert!(Frame::null().is_null());
        assert!(Frame::Array(None).is_null());
        assert!(Frame::Null.is_null());
        assert!(!Frame::bulk("x").is_null());
        assert!(!Frame::array(vec![]).is_null());
    }

    #[test]
    fn test_frame_accessors() {
        assert_eq!(Frame::bulk("mylib").as_str(), Some("mylib"));
        assert_eq!(Frame::error("ERR nope").as_str(), Some("ERR nope"));
        assert_eq!(Frame::Integer(7).as_integer(), Some(7));
        assert_eq!(Frame::bulk("7").as_integer(), None);
        assert_eq!(Frame::array(vec![Frame::Integer(1)]).as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_frame_from_conversions() {
        assert_eq!(Frame::from("abc"), Frame::bulk("abc"));
        assert_eq!(Frame::from("abc".to_string()), Frame::bulk("abc"));
        assert_eq!(Frame::from(5i64), Frame::Integer(5));
    }
}
