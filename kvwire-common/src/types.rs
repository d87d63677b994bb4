//! # Reply Value Types
//!
//! Untyped reply tree produced by the frame decoder and consumed by the
//! projector, plus the deferred numeric token and the text/bytes hint.
//!
//! ## Design Principles
//!
//! 1. **Ephemeral Trees**: A `Value` lives for exactly one reply; the projector
//!    takes it by value and moves payloads out instead of cloning.
//!
//! 2. **Deferred Numbers**: Integer, big-number and double tokens keep their
//!    wire text plus the originating tag, so one token can be read as `i32`,
//!    `i64`, `u64`, `f64` or `i128` without re-decoding.
//!
//! 3. **Errors In The Value Channel**: Server error replies and unknown tags
//!    are nodes of the tree; `Value::check` turns them into `KvError` at the
//!    point where a caller inspects the node.
//!
//! ## Tree Example
//!
//! ```text
//! %2\r\n$1\r\na\r\n:1\r\n$1\r\nb\r\n,2.5\r\n
//!
//! Map
//!   ├── ("a", Number { raw: "1",   kind: Integer })
//!   └── ("b", Number { raw: "2.5", kind: Double  })
//! ```

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{KvError, KvResult};

/// Selects whether string payloads decode to text or stay raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Decode simple and bulk strings as UTF-8 text (lossy).
    #[default]
    Text,
    /// Keep simple and bulk strings as raw bytes (DUMP payloads, binary values).
    Bytes,
}

/// RESP tag a numeric token originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    /// `:` integer reply.
    Integer,
    /// `(` big number reply.
    BigNumber,
    /// `,` double reply.
    Double,
}

impl NumberKind {
    /// Returns the wire tag byte for this kind.
    pub const fn tag(self) -> u8 {
        match self {
            NumberKind::Integer => b':',
            NumberKind::BigNumber => b'(',
            NumberKind::Double => b',',
        }
    }
}

/// Numeric token whose parsing is deferred until the caller picks a width.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Number {
    raw: String,
    kind: NumberKind,
}

impl Number {
    /// Creates a token from raw wire text.
    pub fn new(raw: impl Into<String>, kind: NumberKind) -> Self {
        Number {
            raw: raw.into(),
            kind,
        }
    }

    /// Shorthand for an integer-tagged token.
    pub fn integer(value: i64) -> Self {
        Number::new(value.to_string(), NumberKind::Integer)
    }

    /// Shorthand for a double-tagged token.
    pub fn double(value: f64) -> Self {
        Number::new(value.to_string(), NumberKind::Double)
    }

    /// Raw decimal text as it appeared on the wire.
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Tag the token originated from.
    #[inline]
    pub fn kind(&self) -> NumberKind {
        self.kind
    }

    pub fn to_i32(&self) -> KvResult<i32> {
        parse_text(&self.raw, "int32")
    }

    pub fn to_i64(&self) -> KvResult<i64> {
        parse_text(&self.raw, "int64")
    }

    pub fn to_u64(&self) -> KvResult<u64> {
        parse_text(&self.raw, "uint64")
    }

    pub fn to_i128(&self) -> KvResult<i128> {
        parse_text(&self.raw, "big number")
    }

    /// Parses as `f64`; accepts `inf`, `-inf` and `nan` as sent by RESP3.
    pub fn to_f64(&self) -> KvResult<f64> {
        parse_text(&self.raw, "double")
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses trimmed text into a numeric type, naming `target` on failure.
pub fn parse_text<T: std::str::FromStr>(text: &str, target: &str) -> KvResult<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| KvError::format(target, format!("text {:?}", text)))
}

/// Untyped reply value produced by the frame decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `_`, `$-1`, or an aggregate with count `<= 0`.
    Null,
    /// `#t` / `#f`.
    Boolean(bool),
    /// `:`, `(` and `,` tokens.
    Number(Number),
    /// Simple or bulk string decoded as text.
    Text(String),
    /// Simple or bulk string kept as raw bytes.
    Bytes(Bytes),
    /// Server error reply (`-` or `!`); the message is never empty.
    Error(String),
    /// Unknown type tag met while decoding.
    Invalid(String),
    /// `*` array or `~` set.
    Array(Vec<Value>),
    /// `%` map, keys normalized to text, insertion order kept.
    Map(Vec<(String, Value)>),
    /// `>` out-of-band push.
    Push(Vec<Value>),
}

impl Value {
    /// Short name of the runtime kind, used in format errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(number) => match number.kind() {
                NumberKind::Integer => "integer",
                NumberKind::BigNumber => "big number",
                NumberKind::Double => "double",
            },
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Error(_) => "error",
            Value::Invalid(_) => "invalid",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Push(_) => "push",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for arrays, sets, pushes and maps.
    #[inline]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Map(_) | Value::Push(_))
    }

    /// Raises error nodes, passing every other value through.
    pub fn check(self) -> KvResult<Value> {
        match self {
            Value::Error(message) => Err(KvError::server(message)),
            Value::Invalid(message) => Err(KvError::Protocol(message)),
            other => Ok(other),
        }
    }

    /// Borrows array or push items.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Push(items) => Some(items),
            _ => None,
        }
    }

    /// Takes array or push items.
    pub fn into_items(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) | Value::Push(items) => Some(items),
            _ => None,
        }
    }

    /// Text view of scalar strings; bytes are decoded lossily.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(text) => Some(text.clone()),
            Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Value::Number(number) => Some(number.raw().to_string()),
            _ => None,
        }
    }

    /// Raw bytes of a string-like node, without lossy decoding.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Text(text) => Some(Bytes::copy_from_slice(text.as_bytes())),
            Value::Bytes(bytes) => Some(bytes.clone()),
            Value::Number(number) => Some(Bytes::copy_from_slice(number.raw().as_bytes())),
            _ => None,
        }
    }

    /// Borrowed text view for text nodes only.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the numeric token when the node is one.
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(number) => Some(number),
            _ => None,
        }
    }

    /// Case-insensitive comparison of a string node against `expected`.
    pub fn eq_ignore_case(&self, expected: &str) -> bool {
        match self {
            Value::Text(text) => text.eq_ignore_ascii_case(expected),
            Value::Bytes(bytes) => bytes.eq_ignore_ascii_case(expected.as_bytes()),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::integer(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_reads_at_any_width() {
        let number = Number::new("42", NumberKind::Integer);
        assert_eq!(number.to_i32().unwrap(), 42);
        assert_eq!(number.to_i64().unwrap(), 42);
        assert_eq!(number.to_u64().unwrap(), 42);
        assert_eq!(number.to_f64().unwrap(), 42.0);
    }

    #[test]
    fn big_number_overflows_i64_but_fits_i128() {
        let number = Number::new(
            "3492890328409238509324850943850943825024385",
            NumberKind::BigNumber,
        );
        assert!(number.to_i64().is_err());
        let small = Number::new("170141183460469231731687303715884105727", NumberKind::BigNumber);
        assert_eq!(small.to_i128().unwrap(), i128::MAX);
    }

    #[test]
    fn double_accepts_infinity() {
        let number = Number::new("-inf", NumberKind::Double);
        assert_eq!(number.to_f64().unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn negative_rejected_for_unsigned() {
        let number = Number::new("-1", NumberKind::Integer);
        let err = number.to_u64().unwrap_err();
        assert!(matches!(err, KvError::Format { .. }));
    }

    #[test]
    fn check_raises_error_nodes() {
        assert!(Value::Error("ERR x".into()).check().unwrap_err().is_server());
        assert!(matches!(
            Value::Invalid("tag".into()).check(),
            Err(KvError::Protocol(_))
        ));
        assert_eq!(Value::Null.check().unwrap(), Value::Null);
    }

    #[test]
    fn kind_names_follow_origin_tag() {
        assert_eq!(Value::Number(Number::double(1.5)).kind_name(), "double");
        assert_eq!(Value::from(7i64).kind_name(), "integer");
        assert_eq!(Value::Map(Vec::new()).kind_name(), "map");
    }
}
