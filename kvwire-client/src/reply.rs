//! # Projected Replies
//!
//! Purpose: Hold the output of the projection engine as a closed set of
//! typed variants, and convert it into the Rust type a caller asked for.
//!
//! ## Design Principles
//! 1. **Closed Set**: Every shape the projector can build has exactly one
//!    `Reply` variant; no runtime type inspection is needed downstream.
//! 2. **Absence Is Explicit**: `Reply::Nil` reaches `FromReply`, where
//!    `Option<T>` turns it into `None` and plain types into their default.
//! 3. **Mismatch Is Reported**: A variant that does not fit the target type
//!    becomes `KvError::Format` naming both sides.

use std::collections::HashMap;
use std::hash::BuildHasher;

use bytes::Bytes;

use kvwire_common::{KvError, KvResult, Number, NumberKind, Value};

use crate::model::{
    FunctionStats, GeoPosition, GeoRadiusValue, KeyValue, LcsResult, MemberScore, ScanPage,
    ScoreRank, StreamEntry, XAutoClaim, XInfoConsumer, XInfoGroup, XInfoStream, XInfoStreamFull,
};

/// Typed projection of one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The server sent an absence marker.
    Nil,
    String(String),
    Bytes(Bytes),
    Number(Number),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Boolean(bool),
    Object(Value),
    /// Enum discriminant, validated by `ReplyEnum` on extraction.
    Enum(i64),
    Coordinate(GeoPosition),
    Lcs(LcsResult),
    ScoreRank(ScoreRank),
    GeoRadius(GeoRadiusValue),
    XInfoConsumer(XInfoConsumer),
    XInfoGroup(XInfoGroup),
    XInfoStream(Box<XInfoStream>),
    XInfoStreamFull(Box<XInfoStreamFull>),
    FunctionStats(FunctionStats),
    Array(Vec<Reply>),
    /// Ordered key/value entries.
    Dictionary(Vec<(String, Reply)>),
    KeyValue(String, Box<Reply>),
    MemberScore(Box<Reply>, f64),
    Scan(u64, Box<Reply>),
    Stream(StreamEntry<Reply>),
    XAutoClaim(XAutoClaim<Reply>),
}

impl Reply {
    /// Short name of the variant, used in format errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::String(_) => "string",
            Reply::Bytes(_) => "bytes",
            Reply::Number(_) => "number",
            Reply::Int32(_) => "int32",
            Reply::Int64(_) => "int64",
            Reply::UInt64(_) => "uint64",
            Reply::Double(_) => "double",
            Reply::Boolean(_) => "boolean",
            Reply::Object(_) => "object",
            Reply::Enum(_) => "enum",
            Reply::Coordinate(_) => "coordinate",
            Reply::Lcs(_) => "lcs",
            Reply::ScoreRank(_) => "score rank",
            Reply::GeoRadius(_) => "geo radius",
            Reply::XInfoConsumer(_) => "xinfo consumer",
            Reply::XInfoGroup(_) => "xinfo group",
            Reply::XInfoStream(_) => "xinfo stream",
            Reply::XInfoStreamFull(_) => "xinfo stream full",
            Reply::FunctionStats(_) => "function stats",
            Reply::Array(_) => "array",
            Reply::Dictionary(_) => "dictionary",
            Reply::KeyValue(..) => "key/value",
            Reply::MemberScore(..) => "member/score",
            Reply::Scan(..) => "scan",
            Reply::Stream(_) => "stream entry",
            Reply::XAutoClaim(_) => "xautoclaim",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Converts into any `FromReply` type.
    pub fn into<T: FromReply>(self) -> KvResult<T> {
        T::from_reply(self)
    }

    fn mismatch<T>(self, expected: &str) -> KvResult<T> {
        Err(KvError::format(expected, self.kind_name()))
    }
}

/// Conversion from a projected reply into a concrete Rust type.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> KvResult<Self>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        Ok(reply)
    }
}

impl FromReply for () {
    fn from_reply(_reply: Reply) -> KvResult<Self> {
        Ok(())
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Nil => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::String(text) => Ok(text),
            Reply::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Reply::Number(number) => Ok(number.raw().to_string()),
            Reply::Nil => Ok(String::new()),
            other => other.mismatch("string"),
        }
    }
}

impl FromReply for Bytes {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Bytes(bytes) => Ok(bytes),
            Reply::String(text) => Ok(Bytes::from(text)),
            Reply::Nil => Ok(Bytes::new()),
            other => other.mismatch("bytes"),
        }
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        Bytes::from_reply(reply).map(|bytes| bytes.to_vec())
    }
}

impl FromReply for Number {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Number(number) => Ok(number),
            Reply::Int32(value) => Ok(Number::integer(i64::from(value))),
            Reply::Int64(value) => Ok(Number::integer(value)),
            Reply::UInt64(value) => Ok(Number::new(value.to_string(), NumberKind::Integer)),
            Reply::Double(value) => Ok(Number::double(value)),
            Reply::Nil => Ok(Number::integer(0)),
            other => other.mismatch("number"),
        }
    }
}

impl FromReply for Value {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Object(value) => Ok(value),
            Reply::Nil => Ok(Value::Null),
            other => other.mismatch("object"),
        }
    }
}

impl FromReply for bool {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Boolean(value) => Ok(value),
            Reply::Int64(value) => Ok(value != 0),
            Reply::Nil => Ok(false),
            other => other.mismatch("boolean"),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Int64(value) => Ok(value),
            Reply::Int32(value) => Ok(i64::from(value)),
            Reply::UInt64(value) => {
                i64::try_from(value).map_err(|_| KvError::format("int64", value.to_string()))
            }
            Reply::Number(number) => number.to_i64(),
            Reply::Nil => Ok(0),
            other => other.mismatch("int64"),
        }
    }
}

impl FromReply for i32 {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Int32(value) => Ok(value),
            Reply::Number(number) => number.to_i32(),
            Reply::Nil => Ok(0),
            other => {
                let value = i64::from_reply(other)?;
                i32::try_from(value).map_err(|_| KvError::format("int32", value.to_string()))
            }
        }
    }
}

impl FromReply for u64 {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::UInt64(value) => Ok(value),
            Reply::Number(number) => number.to_u64(),
            Reply::Nil => Ok(0),
            other => {
                let value = i64::from_reply(other)?;
                u64::try_from(value).map_err(|_| KvError::format("uint64", value.to_string()))
            }
        }
    }
}

impl FromReply for f64 {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Double(value) => Ok(value),
            Reply::Int64(value) => Ok(value as f64),
            Reply::Int32(value) => Ok(f64::from(value)),
            Reply::UInt64(value) => Ok(value as f64),
            Reply::Number(number) => number.to_f64(),
            Reply::Nil => Ok(0.0),
            other => other.mismatch("double"),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Array(items) => items.into_iter().map(T::from_reply).collect(),
            // Dictionaries read as ordered key/value pairs.
            Reply::Dictionary(entries) => entries
                .into_iter()
                .map(|(key, value)| T::from_reply(Reply::KeyValue(key, Box::new(value))))
                .collect(),
            Reply::Nil => Ok(Vec::new()),
            other => other.mismatch("array"),
        }
    }
}

impl<T: FromReply, S: BuildHasher + Default> FromReply for HashMap<String, T, S> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Dictionary(entries) => entries
                .into_iter()
                .map(|(key, value)| Ok((key, T::from_reply(value)?)))
                .collect(),
            Reply::Nil => Ok(HashMap::default()),
            other => other.mismatch("dictionary"),
        }
    }
}

impl<T: FromReply> FromReply for (String, T) {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::KeyValue(key, value) => Ok((key, T::from_reply(*value)?)),
            other => other.mismatch("key/value"),
        }
    }
}

impl<T: FromReply> FromReply for KeyValue<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::KeyValue(key, value) => Ok(KeyValue {
                key,
                value: T::from_reply(*value)?,
            }),
            other => other.mismatch("key/value"),
        }
    }
}

impl<T: FromReply> FromReply for MemberScore<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::MemberScore(member, score) => Ok(MemberScore {
                member: T::from_reply(*member)?,
                score,
            }),
            other => other.mismatch("member/score"),
        }
    }
}

impl<P: FromReply> FromReply for ScanPage<P> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Scan(cursor, page) => Ok(ScanPage {
                cursor,
                page: P::from_reply(*page)?,
            }),
            Reply::Nil => Ok(ScanPage {
                cursor: 0,
                page: P::from_reply(Reply::Nil)?,
            }),
            other => other.mismatch("scan"),
        }
    }
}

impl<T: FromReply> FromReply for StreamEntry<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::Stream(entry) => entry.try_map(T::from_reply),
            other => other.mismatch("stream entry"),
        }
    }
}

impl<T: FromReply> FromReply for XAutoClaim<T> {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        match reply {
            Reply::XAutoClaim(claim) => Ok(XAutoClaim {
                next_id: claim.next_id,
                entries: claim
                    .entries
                    .into_iter()
                    .map(|entry| entry.try_map(T::from_reply))
                    .collect::<KvResult<_>>()?,
                deleted_ids: claim.deleted_ids,
            }),
            Reply::Nil => Ok(XAutoClaim::default()),
            other => other.mismatch("xautoclaim"),
        }
    }
}

/// Implements `FromReply` for a struct held directly by one `Reply` variant.
macro_rules! from_reply_struct {
    (@take $value:ident) => { $value };
    (@take $value:ident boxed) => { *$value };
    ($($ty:ty => $variant:ident $(($unbox:ident))?),* $(,)?) => {
        $(
            impl FromReply for $ty {
                fn from_reply(reply: Reply) -> KvResult<Self> {
                    match reply {
                        Reply::$variant(value) => Ok(from_reply_struct!(@take value $($unbox)?)),
                        Reply::Nil => Ok(<$ty>::default()),
                        other => other.mismatch(stringify!($variant)),
                    }
                }
            }
        )*
    };
}

from_reply_struct!(
    GeoPosition => Coordinate,
    LcsResult => Lcs,
    ScoreRank => ScoreRank,
    GeoRadiusValue => GeoRadius,
    XInfoConsumer => XInfoConsumer,
    XInfoGroup => XInfoGroup,
    XInfoStream => XInfoStream(boxed),
    XInfoStreamFull => XInfoStreamFull(boxed),
    FunctionStats => FunctionStats,
);

/// Enumerations a numeric reply can be validated against.
pub trait ReplyEnum: Sized {
    /// Maps a discriminant to a variant, `None` when it is out of range.
    fn from_discriminant(value: i64) -> Option<Self>;
}

/// Extracts a `ReplyEnum`, rejecting discriminants outside the enumeration.
pub fn enum_from_reply<E: ReplyEnum>(reply: Reply) -> KvResult<E> {
    let value = match reply {
        Reply::Enum(value) | Reply::Int64(value) => value,
        Reply::Number(number) => number.to_i64()?,
        other => return other.mismatch(std::any::type_name::<E>()),
    };
    E::from_discriminant(value).ok_or_else(|| {
        KvError::format(
            std::any::type_name::<E>(),
            format!("undefined value {}", value),
        )
    })
}
