//! # Projection Engine
//!
//! Purpose: Turn a decoded `Value` tree into the typed `Reply` a `Shape`
//! asks for, accepting both RESP2 and RESP3 renderings of the same reply.
//!
//! ## Design Principles
//! 1. **One Null Rule**: Errors are raised and absence is short-circuited in
//!    `project` before any shape-specific code runs, at every level.
//! 2. **Peek, Then Branch**: Pair-shaped replies are flat on RESP2 and nested
//!    on RESP3; the first element decides which one arrived.
//! 3. **No Silent Coercion**: A value that does not fit becomes
//!    `KvError::Format` naming the observed kind.
//!
//! ## Flow
//!
//! ```text
//! Value ──check()──► Error? raise
//!          │
//!          ├── Null ──► absent(shape)   (empty collection or Nil)
//!          │
//!          └── match shape ──► scalar / container / structured ──► Reply
//! ```

mod structured;

use bytes::Bytes;

use kvwire_common::{parse_text, KvError, KvResult, Number, NumberKind, ResultType, Shape, Value};

use crate::reply::{FromReply, Reply};

/// Projects a decoded reply and converts it into `T`.
///
/// **Input**: the decoded reply and the `ResultType` the command declares.
/// **Output**: `T`, or `NotSupported` when the bits have no shape.
pub fn to<T: FromReply>(value: Value, result_type: ResultType) -> KvResult<T> {
    let shape = Shape::resolve(result_type)?;
    T::from_reply(project(value, &shape)?)
}

/// Projects a decoded reply into the variant tree for `shape`.
pub fn project(value: Value, shape: &Shape) -> KvResult<Reply> {
    let value = value.check()?;
    if value.is_null() {
        return Ok(absent(shape));
    }

    match shape {
        Shape::Object => {
            raise_nested(&value)?;
            Ok(Reply::Object(value))
        }
        Shape::Nullable(inner) => project(value, inner),
        Shape::String => scalar(value, shape, |value| text(value, "string").map(Reply::String)),
        Shape::Bytes => scalar(value, shape, |value| bytes(value).map(Reply::Bytes)),
        Shape::Number => scalar(value, shape, |value| number(value, "number").map(Reply::Number)),
        Shape::Int32 => scalar(value, shape, |value| {
            number(value, "int32")?.to_i32().map(Reply::Int32)
        }),
        Shape::Int64 => scalar(value, shape, |value| {
            number(value, "int64")?.to_i64().map(Reply::Int64)
        }),
        Shape::UInt64 => scalar(value, shape, |value| {
            number(value, "uint64")?.to_u64().map(Reply::UInt64)
        }),
        Shape::Double => scalar(value, shape, |value| {
            number(value, "double")?.to_f64().map(Reply::Double)
        }),
        Shape::Enum => scalar(value, shape, |value| {
            number(value, "enum")?.to_i64().map(Reply::Enum)
        }),
        Shape::Boolean => scalar(value, shape, |value| boolean(value).map(Reply::Boolean)),
        Shape::Array(inner) => array(value, inner),
        Shape::Dictionary(inner) => entries(value, "dictionary")?
            .into_iter()
            .map(|(key, value)| Ok((key, project(value, inner)?)))
            .collect::<KvResult<Vec<_>>>()
            .map(Reply::Dictionary),
        Shape::KeyValuePairArray(inner) => entries(value, "key/value array")?
            .into_iter()
            .map(|(key, value)| Ok(Reply::KeyValue(key, Box::new(project(value, inner)?))))
            .collect::<KvResult<Vec<_>>>()
            .map(Reply::Array),
        Shape::KeyValuePair(inner) => key_value_pair(value, shape, inner),
        Shape::MemberScore(inner) => member_score(value, shape, inner),
        Shape::ScoreRank => {
            let (rank, score) = pair(value, "score rank")?;
            Ok(Reply::ScoreRank(crate::model::ScoreRank {
                rank: number(rank, "rank")?.to_i64()?,
                score: number(score, "score")?.to_f64()?,
            }))
        }
        Shape::Scan(page) => {
            let (cursor, items) = pair(value, "scan page")?;
            let cursor = number(cursor, "cursor")?.to_u64()?;
            Ok(Reply::Scan(cursor, Box::new(project(items, page)?)))
        }
        Shape::Coordinate => structured::coordinate(value).map(Reply::Coordinate),
        Shape::GeoRadius => structured::geo_radius(value).map(Reply::GeoRadius),
        Shape::Lcs => structured::lcs(value).map(Reply::Lcs),
        Shape::Stream(field) => structured::stream_entry(value, field).map(Reply::Stream),
        Shape::XAutoClaim(field) => structured::auto_claim(value, field).map(Reply::XAutoClaim),
        Shape::XInfoConsumers => structured::xinfo_consumer(value).map(Reply::XInfoConsumer),
        Shape::XInfoGroups => structured::xinfo_group(value).map(Reply::XInfoGroup),
        Shape::XInfoStream => {
            structured::xinfo_stream(value).map(|info| Reply::XInfoStream(Box::new(info)))
        }
        Shape::XInfoStreamFull => structured::xinfo_stream_full(value)
            .map(|info| Reply::XInfoStreamFull(Box::new(info))),
        Shape::FunctionStats => structured::function_stats(value).map(Reply::FunctionStats),
    }
}

/// "No value" for a shape: collections become empty, everything else `Nil`.
fn absent(shape: &Shape) -> Reply {
    match shape {
        Shape::Array(_) | Shape::KeyValuePairArray(_) => Reply::Array(Vec::new()),
        Shape::Dictionary(_) => Reply::Dictionary(Vec::new()),
        _ => Reply::Nil,
    }
}

fn raise_nested(value: &Value) -> KvResult<()> {
    match value {
        Value::Error(message) => Err(KvError::server(message.clone())),
        Value::Invalid(message) => Err(KvError::Protocol(message.clone())),
        Value::Array(items) | Value::Push(items) => items.iter().try_for_each(raise_nested),
        Value::Map(entries) => entries.iter().try_for_each(|(_, value)| raise_nested(value)),
        _ => Ok(()),
    }
}

/// Runs a scalar conversion after unwrapping single-element arrays.
fn scalar<F>(value: Value, shape: &Shape, convert: F) -> KvResult<Reply>
where
    F: FnOnce(Value) -> KvResult<Reply>,
{
    let value = unwrap_single(value)?;
    if value.is_null() {
        return Ok(absent(shape));
    }
    convert(value)
}

fn unwrap_single(mut value: Value) -> KvResult<Value> {
    while value.as_items().map_or(false, |items| items.len() == 1) {
        value = match value.into_items().and_then(|mut items| items.pop()) {
            Some(inner) => inner.check()?,
            None => Value::Null,
        };
    }
    Ok(value)
}

pub(crate) fn text(value: Value, expected: &str) -> KvResult<String> {
    match value.check()? {
        Value::Text(text) => Ok(text),
        Value::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Number(number) => Ok(number.raw().to_string()),
        Value::Boolean(flag) => Ok(flag.to_string()),
        other => Err(KvError::format(expected, other.kind_name())),
    }
}

fn bytes(value: Value) -> KvResult<Bytes> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::Text(text) => Ok(Bytes::from(text)),
        Value::Number(number) => Ok(Bytes::copy_from_slice(number.raw().as_bytes())),
        other => Err(KvError::format("bytes", other.kind_name())),
    }
}

/// Reads any scalar as a deferred number; text is parsed when converted.
pub(crate) fn number(value: Value, expected: &str) -> KvResult<Number> {
    match value.check()? {
        Value::Number(number) => Ok(number),
        Value::Text(text) => Ok(number_from_text(text.trim())),
        Value::Bytes(bytes) => Ok(number_from_text(String::from_utf8_lossy(&bytes).trim())),
        Value::Boolean(flag) => Ok(Number::integer(i64::from(flag))),
        other => Err(KvError::format(expected, other.kind_name())),
    }
}

fn number_from_text(text: &str) -> Number {
    let integral = text
        .bytes()
        .enumerate()
        .all(|(idx, b)| b.is_ascii_digit() || (idx == 0 && (b == b'-' || b == b'+')));
    let kind = if integral {
        NumberKind::Integer
    } else {
        NumberKind::Double
    };
    Number::new(text, kind)
}

fn boolean(value: Value) -> KvResult<bool> {
    match value {
        Value::Boolean(flag) => Ok(flag),
        Value::Number(number) => Ok(number.to_i64()? != 0),
        ref other if other.eq_ignore_case("ok") || other.eq_ignore_case("true") => Ok(true),
        ref other if other.eq_ignore_case("false") => Ok(false),
        Value::Text(text) => Ok(parse_text::<i64>(text.trim(), "boolean")? != 0),
        Value::Bytes(bytes) => {
            Ok(parse_text::<i64>(String::from_utf8_lossy(&bytes).trim(), "boolean")? != 0)
        }
        other => Err(KvError::format("boolean", other.kind_name())),
    }
}

/// Items of an array-like value, or a format error naming `expected`.
pub(crate) fn items(value: Value, expected: &str) -> KvResult<Vec<Value>> {
    match value.check()? {
        Value::Array(items) | Value::Push(items) => Ok(items),
        other => Err(KvError::format(expected, other.kind_name())),
    }
}

/// Like `items`, but an empty aggregate collapsed to null reads as empty.
pub(crate) fn list(value: Value, expected: &str) -> KvResult<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        other => items(other, expected),
    }
}

/// Exactly two items.
pub(crate) fn pair(value: Value, expected: &str) -> KvResult<(Value, Value)> {
    let items = items(value, expected)?;
    let len = items.len();
    let mut iter = items.into_iter();
    match (iter.next(), iter.next(), iter.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        _ => Err(KvError::format(expected, format!("array of {}", len))),
    }
}

/// Groups a flat RESP2 list into 2-element arrays; nested lists pass through.
fn pair_up(items: Vec<Value>) -> KvResult<Vec<Value>> {
    if items.first().map_or(true, Value::is_aggregate) {
        return Ok(items);
    }
    if items.len() % 2 != 0 {
        return Err(KvError::format(
            "even number of items",
            format!("array of {}", items.len()),
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(first), Some(second)) = (iter.next(), iter.next()) {
        pairs.push(Value::Array(vec![first, second]));
    }
    Ok(pairs)
}

/// Ordered key/value entries from a RESP3 map or either RESP2 rendering.
pub(crate) fn entries(value: Value, expected: &str) -> KvResult<Vec<(String, Value)>> {
    match value.check()? {
        Value::Map(entries) => Ok(entries),
        Value::Array(items) | Value::Push(items) => pair_up(items)?
            .into_iter()
            .map(|entry| {
                let (key, value) = pair(entry, "key/value pair")?;
                Ok((text(key, "key")?, value))
            })
            .collect(),
        other => Err(KvError::format(expected, other.kind_name())),
    }
}

fn is_pair_shape(shape: &Shape) -> bool {
    match shape {
        Shape::Nullable(inner) => is_pair_shape(inner),
        Shape::MemberScore(_) | Shape::KeyValuePair(_) => true,
        _ => false,
    }
}

fn array(value: Value, inner: &Shape) -> KvResult<Reply> {
    let items = match value {
        Value::Array(items) | Value::Push(items) if is_pair_shape(inner) => pair_up(items)?,
        Value::Array(items) | Value::Push(items) => items,
        Value::Map(entries) if is_pair_shape(inner) => entries
            .into_iter()
            .map(|(key, value)| Value::Array(vec![Value::Text(key), value]))
            .collect(),
        Value::Map(entries) => entries
            .into_iter()
            .flat_map(|(key, value)| [Value::Text(key), value])
            .collect(),
        other => return Err(KvError::format("array", other.kind_name())),
    };
    items
        .into_iter()
        .map(|item| project(item, inner))
        .collect::<KvResult<Vec<_>>>()
        .map(Reply::Array)
}

fn key_value_pair(value: Value, shape: &Shape, inner: &Shape) -> KvResult<Reply> {
    let mut items = match value {
        Value::Map(mut entries) if entries.len() == 1 => {
            return match entries.pop() {
                Some((key, value)) => Ok(Reply::KeyValue(key, Box::new(project(value, inner)?))),
                None => Ok(Reply::Nil),
            };
        }
        other => items(other, "key/value pair")?,
    };
    if items.len() == 1 && items[0].is_aggregate() {
        return match items.pop() {
            Some(nested) => project(nested, shape),
            None => Ok(Reply::Nil),
        };
    }
    if items.len() < 2 {
        return Err(KvError::format(
            "key/value pair",
            format!("array of {}", items.len()),
        ));
    }
    // BZPOPMIN and friends send key, member, score as one flat triple.
    let mut rest = items.split_off(1);
    let key = match items.pop() {
        Some(key) => text(key, "key")?,
        None => return Ok(Reply::Nil),
    };
    let value = match rest.len() {
        1 => rest.pop().unwrap_or(Value::Null),
        _ => Value::Array(rest),
    };
    Ok(Reply::KeyValue(key, Box::new(project(value, inner)?)))
}

fn member_score(value: Value, shape: &Shape, inner: &Shape) -> KvResult<Reply> {
    let mut items = items(value, "member/score pair")?;
    if items.len() == 1 && items[0].is_aggregate() {
        return match items.pop() {
            Some(nested) => project(nested, shape),
            None => Ok(Reply::Nil),
        };
    }
    let (member, score) = pair(Value::Array(items), "member/score pair")?;
    let score = number(score, "score")?.to_f64()?;
    Ok(Reply::MemberScore(Box::new(project(member, inner)?), score))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::{FieldExpireStatus, KeyValue, MemberScore, ScanPage};
    use crate::resp::decode;
    use kvwire_common::Encoding;

    fn value(wire: &[u8]) -> Value {
        let (value, used) = decode(wire, Encoding::Text).unwrap().unwrap();
        assert_eq!(used, wire.len());
        value
    }

    fn convert<T: FromReply>(wire: &[u8], result_type: ResultType) -> KvResult<T> {
        to(value(wire), result_type)
    }

    #[test]
    fn int64_array() {
        let numbers: Vec<i64> =
            convert(b"*3\r\n:1\r\n:2\r\n:3\r\n", ResultType::ARRAY | ResultType::INT64).unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn null_bulk_as_string_is_absent() {
        let text: Option<String> = convert(b"$-1\r\n", ResultType::STRING).unwrap();
        assert_eq!(text, None);
        let text: String = convert(b"$-1\r\n", ResultType::STRING).unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn resp3_map_as_dictionary() {
        let map: HashMap<String, String> = convert(
            b"%2\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n",
            ResultType::DICTIONARY | ResultType::STRING,
        )
        .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "1");
        assert_eq!(map["b"], "2");
    }

    #[test]
    fn scan_with_empty_page() {
        let page: ScanPage<Vec<String>> = convert(
            b"*2\r\n:42\r\n*0\r\n",
            ResultType::SCAN | ResultType::ARRAY | ResultType::STRING,
        )
        .unwrap();
        assert_eq!(page.cursor, 42);
        assert!(page.page.is_empty());
    }

    #[test]
    fn scan_cursor_as_bulk_text() {
        let page: ScanPage<HashMap<String, String>> = convert(
            b"*2\r\n$2\r\n17\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n",
            ResultType::SCAN | ResultType::DICTIONARY | ResultType::STRING,
        )
        .unwrap();
        assert_eq!(page.cursor, 17);
        assert_eq!(page.page["f"], "v");
    }

    #[test]
    fn dictionary_renderings_project_identically() {
        let rt = ResultType::DICTIONARY | ResultType::STRING;
        let map3: Vec<(String, String)> =
            convert(b"%2\r\n+a\r\n+1\r\n+b\r\n+2\r\n", rt).unwrap();
        let flat: Vec<(String, String)> =
            convert(b"*4\r\n+a\r\n+1\r\n+b\r\n+2\r\n", rt).unwrap();
        let nested: Vec<(String, String)> =
            convert(b"*2\r\n*2\r\n+a\r\n+1\r\n*2\r\n+b\r\n+2\r\n", rt).unwrap();
        assert_eq!(map3, flat);
        assert_eq!(map3, nested);
        assert_eq!(map3[0], ("a".to_string(), "1".to_string()));
    }

    #[test]
    fn odd_flat_dictionary_is_format_error() {
        let err = convert::<HashMap<String, String>>(
            b"*3\r\n+a\r\n+1\r\n+b\r\n",
            ResultType::DICTIONARY | ResultType::STRING,
        )
        .unwrap_err();
        assert!(matches!(err, KvError::Format { .. }));
    }

    #[test]
    fn scalar_for_dictionary_is_format_error() {
        let err = convert::<HashMap<String, String>>(
            b"+OK\r\n",
            ResultType::DICTIONARY | ResultType::STRING,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "format error: expected dictionary, got text");
    }

    #[test]
    fn member_score_renderings_project_identically() {
        let rt = ResultType::ARRAY | ResultType::MEMBER_SCORE_VALUE | ResultType::STRING;
        let flat: Vec<MemberScore<String>> =
            convert(b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$3\r\n2.5\r\n", rt).unwrap();
        let paired: Vec<MemberScore<String>> =
            convert(b"*2\r\n*2\r\n$1\r\na\r\n,1\r\n*2\r\n$1\r\nb\r\n,2.5\r\n", rt).unwrap();
        assert_eq!(flat, paired);
        assert_eq!(flat[1].member, "b");
        assert_eq!(flat[1].score, 2.5);
    }

    #[test]
    fn single_member_score_accepts_wrapped_pair() {
        let rt = ResultType::MEMBER_SCORE_VALUE | ResultType::STRING;
        let flat: MemberScore<String> = convert(b"*2\r\n$1\r\nm\r\n,3\r\n", rt).unwrap();
        let wrapped: MemberScore<String> =
            convert(b"*1\r\n*2\r\n$1\r\nm\r\n,3\r\n", rt).unwrap();
        assert_eq!(flat, wrapped);
    }

    #[test]
    fn key_value_with_member_score_triple() {
        let popped: Option<KeyValue<MemberScore<String>>> = convert(
            b"*3\r\n$1\r\nz\r\n$1\r\nm\r\n$1\r\n7\r\n",
            ResultType::NULLABLE
                | ResultType::KEY_VALUE_PAIR
                | ResultType::MEMBER_SCORE_VALUE
                | ResultType::STRING,
        )
        .unwrap();
        let popped = popped.unwrap();
        assert_eq!(popped.key, "z");
        assert_eq!(popped.value.member, "m");
        assert_eq!(popped.value.score, 7.0);
    }

    #[test]
    fn null_aggregates_become_empty_or_missing() {
        let list: Vec<String> =
            convert(b"*-1\r\n", ResultType::ARRAY | ResultType::STRING).unwrap();
        assert!(list.is_empty());
        let map: HashMap<String, String> =
            convert(b"*0\r\n", ResultType::DICTIONARY | ResultType::STRING).unwrap();
        assert!(map.is_empty());
        let page: Option<ScanPage<Vec<String>>> =
            convert(b"_\r\n", ResultType::SCAN | ResultType::STRING).unwrap();
        assert!(page.is_none());
        let pair: Option<MemberScore<String>> =
            convert(b"*-1\r\n", ResultType::MEMBER_SCORE_VALUE | ResultType::STRING).unwrap();
        assert!(pair.is_none());
    }

    #[test]
    fn numerics_accept_text_and_wrapped_values() {
        assert_eq!(convert::<i64>(b"$2\r\n12\r\n", ResultType::INT64).unwrap(), 12);
        assert_eq!(convert::<i32>(b"*1\r\n*1\r\n:5\r\n", ResultType::INT32).unwrap(), 5);
        assert_eq!(convert::<f64>(b",1.5\r\n", ResultType::DOUBLE).unwrap(), 1.5);
        assert_eq!(
            convert::<u64>(b"(18446744073709551615\r\n", ResultType::UINT64).unwrap(),
            u64::MAX
        );
        assert_eq!(
            convert::<Option<i64>>(b"*1\r\n$-1\r\n", ResultType::NULLABLE | ResultType::INT64)
                .unwrap(),
            None
        );
    }

    #[test]
    fn nullable_array_of_nullable_numbers() {
        let values: Vec<Option<i64>> = convert(
            b"*3\r\n:1\r\n$-1\r\n:3\r\n",
            ResultType::NULLABLE | ResultType::ARRAY | ResultType::INT64,
        )
        .unwrap();
        assert_eq!(values, vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn booleans() {
        assert!(convert::<bool>(b"#t\r\n", ResultType::BOOLEAN).unwrap());
        assert!(convert::<bool>(b":1\r\n", ResultType::BOOLEAN).unwrap());
        assert!(convert::<bool>(b"+OK\r\n", ResultType::BOOLEAN).unwrap());
        assert!(!convert::<bool>(b":0\r\n", ResultType::BOOLEAN).unwrap());
    }

    #[test]
    fn enum_values_are_validated() {
        let statuses: Vec<FieldExpireStatus> = convert(
            b"*3\r\n:1\r\n:-2\r\n:2\r\n",
            ResultType::ARRAY | ResultType::ENUM,
        )
        .unwrap();
        assert_eq!(
            statuses,
            vec![
                FieldExpireStatus::Set,
                FieldExpireStatus::NoSuchField,
                FieldExpireStatus::Deleted
            ]
        );

        let err = convert::<FieldExpireStatus>(b":9\r\n", ResultType::ENUM).unwrap_err();
        assert!(matches!(err, KvError::Format { .. }));
        assert!(err.to_string().contains('9'));
    }

    #[test]
    fn server_errors_raise_at_any_depth() {
        let err = convert::<String>(b"-ERR boom\r\n", ResultType::STRING).unwrap_err();
        assert_eq!(err.to_string(), "ERR boom");

        let err = convert::<Vec<i64>>(
            b"*2\r\n:1\r\n-WRONGTYPE nope\r\n",
            ResultType::ARRAY | ResultType::INT64,
        )
        .unwrap_err();
        assert!(err.is_server());

        let err = convert::<Value>(b"*1\r\n*1\r\n!3\r\nbad\r\n", ResultType::OBJECT).unwrap_err();
        assert!(err.is_server());
    }

    #[test]
    fn invalid_nodes_raise_protocol_errors() {
        let err = convert::<Vec<String>>(
            b"*2\r\n+a\r\n^oops\r\n",
            ResultType::ARRAY | ResultType::STRING,
        )
        .unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[test]
    fn unsupported_combination() {
        let err = convert::<Value>(b"+OK\r\n", ResultType::COORDINATE | ResultType::LCS)
            .unwrap_err();
        assert!(matches!(err, KvError::NotSupported(_)));
    }

    #[test]
    fn bytes_and_text_convert_on_demand() {
        let raw: Bytes = convert(b"+hello\r\n", ResultType::BYTES).unwrap();
        assert_eq!(&raw[..], b"hello");
        let text: String = convert(b":7\r\n", ResultType::STRING).unwrap();
        assert_eq!(text, "7");
    }

    #[test]
    fn object_keeps_the_raw_tree() {
        let raw: Value = convert(b"*2\r\n+a\r\n:1\r\n", ResultType::empty()).unwrap();
        assert_eq!(raw, Value::Array(vec![Value::from("a"), Value::from(1i64)]));
    }
}
