//! # RESP2/RESP3 Frame Decoder
//!
//! Purpose: Turn a byte buffer positioned at a type tag into an untyped
//! `Value` tree, tolerating buffers that end in the middle of a reply.
//!
//! ## Design Principles
//! 1. **Need More Data Is A Value**: Every step returns `Ok(None)` when the
//!    buffer runs out; the outcome bubbles through aggregates untouched.
//! 2. **Cursor Moves On Success Only**: Decoding works on an immutable slice
//!    and reports bytes consumed, so a retry starts from the same position.
//! 3. **Errors Stay In The Tree**: Error replies and unknown tags become
//!    nodes; only malformed framing aborts the decode.
//! 4. **Binary-Safe**: The encoding hint decides text vs raw bytes per call.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use kvwire_common::{Encoding, KvError, KvResult, Number, NumberKind, Value, UNKNOWN_ERROR};

/// Aggregates nested deeper than this are rejected as malformed.
pub const MAX_DEPTH: usize = 32;

/// Unwraps a `KvResult<Option<T>>`, returning `Ok(None)` for need-more-data.
macro_rules! ready {
    ($e:expr) => {
        match $e? {
            Some(value) => value,
            None => return Ok(None),
        }
    };
}

/// Decodes one reply from the start of `buf`.
///
/// **Input**: bytes starting at a RESP type tag; the text/bytes hint.
/// **Output**: `Some((value, consumed))` for a complete reply, `None` when
/// more bytes are needed.
///
/// **Logic**:
/// 1. Dispatch on the tag byte.
/// 2. Read lines, bulk payloads and children through one cursor.
/// 3. Report `None` if any step runs past the end, whatever was parsed so far.
pub fn decode(buf: &[u8], encoding: Encoding) -> KvResult<Option<(Value, usize)>> {
    let mut reader = Reader {
        buf,
        pos: 0,
        encoding,
    };
    match reader.value(0)? {
        Some(value) => Ok(Some((value, reader.pos))),
        None => Ok(None),
    }
}

/// Decodes one reply from `buf`, advancing it only when the reply is complete.
pub fn decode_buf(buf: &mut BytesMut, encoding: Encoding) -> KvResult<Option<Value>> {
    match decode(&buf[..], encoding)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => {
            trace!(buffered = buf.len(), "reply incomplete, waiting for more data");
            Ok(None)
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    encoding: Encoding,
}

impl<'a> Reader<'a> {
    fn value(&mut self, depth: usize) -> KvResult<Option<Value>> {
        if depth > MAX_DEPTH {
            return Err(KvError::Protocol(format!(
                "reply nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        let Some(&tag) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        let start = self.pos;
        self.pos += 1;

        let value = match tag {
            b'_' => {
                ready!(self.line());
                Value::Null
            }
            b'+' => {
                let line = ready!(self.line());
                self.string(line)
            }
            b'-' => {
                let line = ready!(self.line());
                error_value(line)
            }
            b':' => ready!(self.number(NumberKind::Integer)),
            b'(' => ready!(self.number(NumberKind::BigNumber)),
            b',' => ready!(self.number(NumberKind::Double)),
            b'#' => ready!(self.boolean()),
            b'$' => match ready!(self.bulk()) {
                Some(payload) => self.string(payload),
                None => Value::Null,
            },
            b'!' => match ready!(self.bulk()) {
                Some(payload) => error_value(payload),
                None => Value::Error(UNKNOWN_ERROR.to_string()),
            },
            b'=' => match ready!(self.bulk()) {
                Some(payload) => self.string(strip_verbatim_format(payload)),
                None => Value::Null,
            },
            b'*' | b'~' => match ready!(self.items(depth)) {
                Some(items) => Value::Array(items),
                None => Value::Null,
            },
            b'>' => match ready!(self.items(depth)) {
                Some(items) => Value::Push(items),
                None => Value::Null,
            },
            b'%' => ready!(self.map(depth)),
            b'|' => {
                // Attributes annotate the following value; only the value is kept.
                ready!(self.map(depth));
                ready!(self.value(depth))
            }
            other => {
                let line = ready!(self.line());
                warn!(tag = %char::from(other), offset = start, "unsupported reply type");
                Value::Invalid(format!(
                    "unsupported reply type '{}' ({} bytes of payload)",
                    char::from(other),
                    line.len()
                ))
            }
        };
        Ok(Some(value))
    }

    /// Reads up to CRLF, returning the line without the terminator.
    ///
    /// A `\n` without a preceding `\r` is treated like a missing terminator.
    fn line(&mut self) -> KvResult<Option<&'a [u8]>> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        let Some(newline) = memchr::memchr(b'\n', rest) else {
            return Ok(None);
        };
        if newline == 0 || rest[newline - 1] != b'\r' {
            return Ok(None);
        }
        self.pos += newline + 1;
        Ok(Some(&rest[..newline - 1]))
    }

    fn length(&mut self) -> KvResult<Option<i64>> {
        let line = ready!(self.line());
        let text = std::str::from_utf8(line)
            .map_err(|_| KvError::Protocol("length line is not ascii".to_string()))?;
        let len = text
            .parse::<i64>()
            .map_err(|_| KvError::Protocol(format!("invalid length {:?}", text)))?;
        Ok(Some(len))
    }

    /// Reads a length-prefixed payload; `Some(None)` is the `-1` absence marker.
    fn bulk(&mut self) -> KvResult<Option<Option<&'a [u8]>>> {
        let len = ready!(self.length());
        if len < 0 {
            return Ok(Some(None));
        }
        let buf = self.buf;
        let len = len as usize;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .ok_or_else(|| KvError::Protocol("bulk length overflow".to_string()))?;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(KvError::Protocol(
                "bulk payload missing trailing CRLF".to_string(),
            ));
        }
        self.pos = end + 2;
        Ok(Some(Some(&buf[start..end])))
    }

    fn number(&mut self, kind: NumberKind) -> KvResult<Option<Value>> {
        let line = ready!(self.line());
        let raw = String::from_utf8_lossy(line).into_owned();
        Ok(Some(Value::Number(Number::new(raw, kind))))
    }

    fn boolean(&mut self) -> KvResult<Option<Value>> {
        let line = ready!(self.line());
        match line {
            b"t" => Ok(Some(Value::Boolean(true))),
            b"f" => Ok(Some(Value::Boolean(false))),
            other => Err(KvError::Protocol(format!(
                "invalid boolean {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Reads `count` children; counts `<= 0` collapse to absence.
    fn items(&mut self, depth: usize) -> KvResult<Option<Option<Vec<Value>>>> {
        let count = ready!(self.length());
        if count <= 0 {
            return Ok(Some(None));
        }
        let mut items = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            items.push(ready!(self.value(depth + 1)));
        }
        Ok(Some(Some(items)))
    }

    fn map(&mut self, depth: usize) -> KvResult<Option<Value>> {
        let count = ready!(self.length());
        if count <= 0 {
            return Ok(Some(Value::Null));
        }
        let mut entries = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            let key = ready!(self.value(depth + 1)).check()?;
            let key = key.to_text().ok_or_else(|| {
                KvError::Protocol(format!("map key must be a string, got {}", key.kind_name()))
            })?;
            let value = ready!(self.value(depth + 1));
            entries.push((key, value));
        }
        Ok(Some(Value::Map(entries)))
    }

    fn string(&self, payload: &[u8]) -> Value {
        match self.encoding {
            Encoding::Text => Value::Text(String::from_utf8_lossy(payload).into_owned()),
            Encoding::Bytes => Value::Bytes(Bytes::copy_from_slice(payload)),
        }
    }
}

fn error_value(payload: &[u8]) -> Value {
    if payload.is_empty() {
        Value::Error(UNKNOWN_ERROR.to_string())
    } else {
        Value::Error(String::from_utf8_lossy(payload).into_owned())
    }
}

/// Drops the `txt:` style format prefix of a verbatim string.
fn strip_verbatim_format(payload: &[u8]) -> &[u8] {
    if payload.len() >= 4 && payload[3] == b':' {
        &payload[4..]
    } else {
        payload
    }
}
