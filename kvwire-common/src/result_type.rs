//! # Result Types and Shapes
//!
//! Purpose: Translate the combinable `ResultType` bitset callers use to name a
//! reply shape into an unambiguous `Shape` tree the projector dispatches on.
//!
//! ## Design Principles
//!
//! 1. **Resolve Once**: `Shape::resolve` owns the precedence chain; the
//!    projector never looks at raw bits.
//! 2. **Outermost Facet First**: Each step peels one container facet and
//!    recurses with the remaining bits for the element shape.
//! 3. **Fail Fast**: A bit combination no step claims is `NotSupported`.
//!
//! ## Precedence
//!
//! ```text
//! Scan → Array (no Dictionary/Stream/KeyValuePairArray) → KeyValuePairArray
//!      → Dictionary → MemberScoreValue (no KeyValuePair) → KeyValuePair
//!      → Nullable → XAutoClaimValue → Stream of String/Bytes
//!      → XInfoStreamValue → XInfoStreamFullValue
//!
//! Dictionary | Array | Stream | String
//!   => Dictionary(Array(Stream(String)))
//! ```

use std::fmt;

use bitflags::bitflags;

use crate::error::{KvError, KvResult};

bitflags! {
    /// Desired shape of a projected reply; bits combine to describe nesting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResultType: u32 {
        const STRING = 1 << 0;
        const BYTES = 1 << 1;
        const NUMBER = 1 << 2;
        const INT32 = 1 << 3;
        const INT64 = 1 << 4;
        const UINT64 = 1 << 5;
        const DOUBLE = 1 << 6;
        const BOOLEAN = 1 << 7;
        const COORDINATE = 1 << 8;
        const DICTIONARY = 1 << 9;
        const ARRAY = 1 << 10;
        const LCS = 1 << 11;
        const KEY_VALUE_PAIR = 1 << 12;
        const KEY_VALUE_PAIR_ARRAY = 1 << 13;
        const MEMBER_SCORE_VALUE = 1 << 14;
        const SCORE_RANK_VALUE = 1 << 15;
        const ENUM = 1 << 16;
        const SCAN = 1 << 17;
        const X_AUTO_CLAIM_VALUE = 1 << 18;
        const STREAM = 1 << 19;
        const X_INFO_CONSUMERS_VALUE = 1 << 20;
        const X_INFO_GROUPS_VALUE = 1 << 21;
        const X_INFO_STREAM_VALUE = 1 << 22;
        const X_INFO_STREAM_FULL_VALUE = 1 << 23;
        const FUNCTION_STATS_VALUE = 1 << 24;
        const GEO_RADIUS_VALUE = 1 << 25;
        const NULLABLE = 1 << 26;
        const OBJECT = 1 << 27;
    }
}

/// Resolved request descriptor: outer container facets wrapping an element shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    String,
    Bytes,
    /// Deferred numeric token, parsed by the caller.
    Number,
    Int32,
    Int64,
    UInt64,
    Double,
    Boolean,
    /// The raw reply value, untouched apart from error checks.
    Object,
    /// Numeric discriminant validated by the caller's enumeration.
    Enum,
    Coordinate,
    Lcs,
    ScoreRank,
    GeoRadius,
    XInfoConsumers,
    XInfoGroups,
    XInfoStream,
    XInfoStreamFull,
    FunctionStats,
    /// Absence becomes an explicit missing value instead of a default.
    Nullable(Box<Shape>),
    Array(Box<Shape>),
    /// Text-keyed map; accepts RESP3 maps and both RESP2 encodings.
    Dictionary(Box<Shape>),
    KeyValuePair(Box<Shape>),
    /// Sequence of key/value pairs; flat or nested on the wire.
    KeyValuePairArray(Box<Shape>),
    MemberScore(Box<Shape>),
    /// Cursor plus a page projected with the inner shape.
    Scan(Box<Shape>),
    /// Stream entry whose field values use the inner shape.
    Stream(Box<Shape>),
    XAutoClaim(Box<Shape>),
}

impl Shape {
    pub fn array(element: Shape) -> Self {
        Shape::Array(Box::new(element))
    }

    pub fn dictionary(element: Shape) -> Self {
        Shape::Dictionary(Box::new(element))
    }

    pub fn nullable(element: Shape) -> Self {
        Shape::Nullable(Box::new(element))
    }

    pub fn scan(page: Shape) -> Self {
        Shape::Scan(Box::new(page))
    }

    pub fn member_score(member: Shape) -> Self {
        Shape::MemberScore(Box::new(member))
    }

    pub fn key_value_pair(value: Shape) -> Self {
        Shape::KeyValuePair(Box::new(value))
    }

    pub fn key_value_pair_array(value: Shape) -> Self {
        Shape::KeyValuePairArray(Box::new(value))
    }

    pub fn stream(field: Shape) -> Self {
        Shape::Stream(Box::new(field))
    }

    pub fn auto_claim(field: Shape) -> Self {
        Shape::XAutoClaim(Box::new(field))
    }

    /// Resolves a `ResultType` bitset into a shape.
    ///
    /// **Input**: any combination of `ResultType` bits.
    /// **Output**: the shape those bits denote, or `NotSupported`.
    ///
    /// **Logic**:
    /// 1. Empty sets denote `Object`; single bits map directly.
    /// 2. Otherwise walk the precedence chain, peeling the first facet that
    ///    matches and resolving the remaining bits as the element shape.
    pub fn resolve(result_type: ResultType) -> KvResult<Shape> {
        if result_type.is_empty() {
            return Ok(Shape::Object);
        }
        if result_type.bits().count_ones() == 1 {
            return resolve_single(result_type);
        }
        resolve_combined(result_type)
    }

    /// True for container shapes that absorb a null reply into an empty value.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Shape::Array(_) | Shape::Dictionary(_) | Shape::KeyValuePairArray(_)
        )
    }
}

impl TryFrom<ResultType> for Shape {
    type Error = KvError;

    fn try_from(result_type: ResultType) -> KvResult<Shape> {
        Shape::resolve(result_type)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::String => f.write_str("string"),
            Shape::Bytes => f.write_str("bytes"),
            Shape::Number => f.write_str("number"),
            Shape::Int32 => f.write_str("int32"),
            Shape::Int64 => f.write_str("int64"),
            Shape::UInt64 => f.write_str("uint64"),
            Shape::Double => f.write_str("double"),
            Shape::Boolean => f.write_str("boolean"),
            Shape::Object => f.write_str("object"),
            Shape::Enum => f.write_str("enum"),
            Shape::Coordinate => f.write_str("coordinate"),
            Shape::Lcs => f.write_str("lcs"),
            Shape::ScoreRank => f.write_str("score rank"),
            Shape::GeoRadius => f.write_str("geo radius"),
            Shape::XInfoConsumers => f.write_str("xinfo consumers"),
            Shape::XInfoGroups => f.write_str("xinfo groups"),
            Shape::XInfoStream => f.write_str("xinfo stream"),
            Shape::XInfoStreamFull => f.write_str("xinfo stream full"),
            Shape::FunctionStats => f.write_str("function stats"),
            Shape::Nullable(inner) => write!(f, "nullable {}", inner),
            Shape::Array(inner) => write!(f, "array of {}", inner),
            Shape::Dictionary(inner) => write!(f, "dictionary of {}", inner),
            Shape::KeyValuePair(inner) => write!(f, "key/value of {}", inner),
            Shape::KeyValuePairArray(inner) => write!(f, "key/value array of {}", inner),
            Shape::MemberScore(inner) => write!(f, "member/score of {}", inner),
            Shape::Scan(inner) => write!(f, "scan of {}", inner),
            Shape::Stream(inner) => write!(f, "stream of {}", inner),
            Shape::XAutoClaim(inner) => write!(f, "xautoclaim of {}", inner),
        }
    }
}

/// Shape denoted by each bit on its own.
const SINGLE_SHAPES: &[(ResultType, fn() -> Shape)] = &[
    (ResultType::STRING, || Shape::String),
    (ResultType::BYTES, || Shape::Bytes),
    (ResultType::NUMBER, || Shape::Number),
    (ResultType::INT32, || Shape::Int32),
    (ResultType::INT64, || Shape::Int64),
    (ResultType::UINT64, || Shape::UInt64),
    (ResultType::DOUBLE, || Shape::Double),
    (ResultType::BOOLEAN, || Shape::Boolean),
    (ResultType::OBJECT, || Shape::Object),
    (ResultType::ENUM, || Shape::Enum),
    (ResultType::COORDINATE, || Shape::Coordinate),
    (ResultType::LCS, || Shape::Lcs),
    (ResultType::SCORE_RANK_VALUE, || Shape::ScoreRank),
    (ResultType::GEO_RADIUS_VALUE, || Shape::GeoRadius),
    (ResultType::X_INFO_CONSUMERS_VALUE, || Shape::XInfoConsumers),
    (ResultType::X_INFO_GROUPS_VALUE, || Shape::XInfoGroups),
    (ResultType::X_INFO_STREAM_VALUE, || Shape::XInfoStream),
    (ResultType::X_INFO_STREAM_FULL_VALUE, || Shape::XInfoStreamFull),
    (ResultType::FUNCTION_STATS_VALUE, || Shape::FunctionStats),
    (ResultType::NULLABLE, || Shape::nullable(Shape::Object)),
    (ResultType::ARRAY, || Shape::array(Shape::Object)),
    (ResultType::DICTIONARY, || Shape::dictionary(Shape::Object)),
    (ResultType::KEY_VALUE_PAIR, || Shape::key_value_pair(Shape::String)),
    (ResultType::KEY_VALUE_PAIR_ARRAY, || Shape::key_value_pair_array(Shape::String)),
    (ResultType::MEMBER_SCORE_VALUE, || Shape::member_score(Shape::String)),
    (ResultType::SCAN, || Shape::scan(Shape::array(Shape::String))),
    (ResultType::STREAM, || Shape::stream(Shape::String)),
    (ResultType::X_AUTO_CLAIM_VALUE, || Shape::auto_claim(Shape::String)),
];

fn resolve_single(bit: ResultType) -> KvResult<Shape> {
    SINGLE_SHAPES
        .iter()
        .find(|(candidate, _)| *candidate == bit)
        .map(|(_, make)| make())
        .ok_or_else(|| KvError::NotSupported(format!("result type {:?}", bit)))
}

fn resolve_combined(rt: ResultType) -> KvResult<Shape> {
    if rt.contains(ResultType::SCAN) {
        let page = resolve_or(rt - ResultType::SCAN, Shape::array(Shape::String))?;
        let page = if page.is_collection() {
            page
        } else {
            Shape::array(page)
        };
        return Ok(Shape::scan(page));
    }

    if rt.contains(ResultType::ARRAY)
        && !rt.intersects(
            ResultType::DICTIONARY | ResultType::STREAM | ResultType::KEY_VALUE_PAIR_ARRAY,
        )
    {
        return Ok(Shape::array(resolve_or(rt - ResultType::ARRAY, Shape::Object)?));
    }

    if rt.contains(ResultType::KEY_VALUE_PAIR_ARRAY) {
        let rest = rt - ResultType::KEY_VALUE_PAIR_ARRAY - ResultType::ARRAY;
        return Ok(Shape::key_value_pair_array(resolve_or(rest, Shape::String)?));
    }

    if rt.contains(ResultType::DICTIONARY) {
        return Ok(Shape::dictionary(resolve_or(
            rt - ResultType::DICTIONARY,
            Shape::Object,
        )?));
    }

    if rt.contains(ResultType::MEMBER_SCORE_VALUE) && !rt.contains(ResultType::KEY_VALUE_PAIR) {
        return Ok(Shape::member_score(resolve_or(
            rt - ResultType::MEMBER_SCORE_VALUE,
            Shape::String,
        )?));
    }

    if rt.contains(ResultType::KEY_VALUE_PAIR) {
        return Ok(Shape::key_value_pair(resolve_or(
            rt - ResultType::KEY_VALUE_PAIR,
            Shape::String,
        )?));
    }

    if rt.contains(ResultType::NULLABLE) {
        return Ok(Shape::nullable(Shape::resolve(rt - ResultType::NULLABLE)?));
    }

    if rt.contains(ResultType::X_AUTO_CLAIM_VALUE) {
        return Ok(Shape::auto_claim(string_or_bytes(
            rt - ResultType::X_AUTO_CLAIM_VALUE,
        )?));
    }

    if rt.contains(ResultType::STREAM) && rt.intersects(ResultType::STRING | ResultType::BYTES) {
        let entry = Shape::stream(string_or_bytes(
            rt - ResultType::STREAM - ResultType::ARRAY,
        )?);
        if rt.contains(ResultType::ARRAY) {
            return Ok(Shape::array(entry));
        }
        return Ok(entry);
    }

    if rt.contains(ResultType::X_INFO_STREAM_VALUE) {
        return Ok(Shape::XInfoStream);
    }

    if rt.contains(ResultType::X_INFO_STREAM_FULL_VALUE) {
        return Ok(Shape::XInfoStreamFull);
    }

    Err(KvError::NotSupported(format!("result type {:?}", rt)))
}

fn resolve_or(rest: ResultType, default: Shape) -> KvResult<Shape> {
    if rest.is_empty() {
        Ok(default)
    } else {
        Shape::resolve(rest)
    }
}

fn string_or_bytes(rest: ResultType) -> KvResult<Shape> {
    if rest.is_empty() || rest == ResultType::STRING {
        Ok(Shape::String)
    } else if rest == ResultType::BYTES {
        Ok(Shape::Bytes)
    } else {
        Err(KvError::NotSupported(format!("stream field type {:?}", rest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(rt: ResultType) -> Shape {
        Shape::resolve(rt).unwrap()
    }

    #[test]
    fn single_bits_map_directly() {
        assert_eq!(resolve(ResultType::STRING), Shape::String);
        assert_eq!(resolve(ResultType::LCS), Shape::Lcs);
        assert_eq!(resolve(ResultType::ARRAY), Shape::array(Shape::Object));
        assert_eq!(resolve(ResultType::empty()), Shape::Object);
    }

    #[test]
    fn array_of_strings() {
        assert_eq!(
            resolve(ResultType::ARRAY | ResultType::STRING),
            Shape::array(Shape::String)
        );
    }

    #[test]
    fn dictionary_of_stream_arrays() {
        let rt =
            ResultType::DICTIONARY | ResultType::ARRAY | ResultType::STREAM | ResultType::STRING;
        assert_eq!(
            resolve(rt),
            Shape::dictionary(Shape::array(Shape::stream(Shape::String)))
        );
    }

    #[test]
    fn dictionary_of_arrays() {
        let rt = ResultType::DICTIONARY | ResultType::ARRAY | ResultType::STRING;
        assert_eq!(resolve(rt), Shape::dictionary(Shape::array(Shape::String)));
    }

    #[test]
    fn nullable_array_of_nullable_coordinates() {
        let rt = ResultType::ARRAY | ResultType::NULLABLE | ResultType::COORDINATE;
        assert_eq!(
            resolve(rt),
            Shape::array(Shape::nullable(Shape::Coordinate))
        );
    }

    #[test]
    fn scan_pages() {
        assert_eq!(
            resolve(ResultType::SCAN | ResultType::ARRAY | ResultType::STRING),
            Shape::scan(Shape::array(Shape::String))
        );
        assert_eq!(
            resolve(ResultType::SCAN | ResultType::DICTIONARY | ResultType::STRING),
            Shape::scan(Shape::dictionary(Shape::String))
        );
        assert_eq!(
            resolve(ResultType::SCAN | ResultType::MEMBER_SCORE_VALUE | ResultType::STRING),
            Shape::scan(Shape::array(Shape::member_score(Shape::String)))
        );
    }

    #[test]
    fn key_value_pair_wins_over_member_score() {
        let rt = ResultType::KEY_VALUE_PAIR | ResultType::MEMBER_SCORE_VALUE | ResultType::STRING;
        assert_eq!(
            resolve(rt),
            Shape::key_value_pair(Shape::member_score(Shape::String))
        );
    }

    #[test]
    fn array_of_stream_entries() {
        let rt = ResultType::ARRAY | ResultType::STREAM | ResultType::BYTES;
        assert_eq!(resolve(rt), Shape::array(Shape::stream(Shape::Bytes)));
    }

    #[test]
    fn nullable_scalar() {
        assert_eq!(
            resolve(ResultType::NULLABLE | ResultType::INT64),
            Shape::nullable(Shape::Int64)
        );
    }

    #[test]
    fn unclaimed_combination_is_not_supported() {
        let err = Shape::resolve(ResultType::LCS | ResultType::GEO_RADIUS_VALUE).unwrap_err();
        assert!(matches!(err, KvError::NotSupported(_)));
    }

    #[test]
    fn display_describes_nesting() {
        let shape = resolve(ResultType::DICTIONARY | ResultType::ARRAY | ResultType::STRING);
        assert_eq!(shape.to_string(), "dictionary of array of string");
    }
}
