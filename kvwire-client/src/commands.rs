//! # Command Builders
//!
//! Purpose: Build `CommandPacket`s for the commands the client exposes,
//! with keys marked and mode flags set.
//!
//! Each builder notes the reply shape it is projected with; `KVClient`
//! pairs them in its typed methods.

use std::time::Duration;

use kvwire_common::{Arg, CommandMode, CommandPacket};

const READ: CommandMode = CommandMode::READ;
const WRITE: CommandMode = CommandMode::WRITE;
const CACHED_READ: CommandMode = CommandMode::READ.union(CommandMode::WITH_CLIENT_SIDE_CACHE);

/// Expiration and condition flags for SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expire: Option<Duration>,
    /// Only set when the key does not exist.
    pub nx: bool,
    /// Only set when the key exists.
    pub xx: bool,
    /// Return the previous value.
    pub get: bool,
}

/// Variants of LCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcsMode {
    /// The subsequence itself (`String`).
    Plain,
    /// Its length (`Int64`).
    Len,
    /// Matched ranges (`Lcs`).
    Idx {
        min_match_len: Option<u64>,
        with_match_len: bool,
    },
}

/// Center of a GEOSEARCH.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoFrom {
    Member(String),
    LonLat(f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoUnit {
    M,
    Km,
    Mi,
    Ft,
}

impl GeoUnit {
    fn as_str(self) -> &'static str {
        match self {
            GeoUnit::M => "m",
            GeoUnit::Km => "km",
            GeoUnit::Mi => "mi",
            GeoUnit::Ft => "ft",
        }
    }
}

/// Optional parts of a GEOSEARCH reply and result limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoSearchOptions {
    pub with_coord: bool,
    pub with_dist: bool,
    pub with_hash: bool,
    pub count: Option<u64>,
    pub ascending: bool,
}

/// `GET key` → `Nullable | String`.
pub fn get(key: impl Into<Arg>) -> CommandPacket {
    CommandPacket::new("GET").input_key(key).mode(CACHED_READ)
}

/// `SET key value [NX|XX] [GET] [PX ms]` → `Nullable | String`.
pub fn set(key: impl Into<Arg>, value: impl Into<Arg>, options: SetOptions) -> CommandPacket {
    let mut packet = CommandPacket::new("SET")
        .input_key(key)
        .arg(value)
        .arg_if(options.nx, "NX")
        .arg_if(options.xx, "XX")
        .arg_if(options.get, "GET")
        .mode(WRITE);
    if let Some(expire) = options.expire {
        packet = packet.arg("PX").arg(expire.as_millis() as u64);
    }
    packet
}

/// `MGET key...` → `Array | Nullable | String`.
pub fn mget<I, K>(keys: I) -> CommandPacket
where
    I: IntoIterator<Item = K>,
    K: Into<Arg>,
{
    CommandPacket::new("MGET").input_keys(keys).mode(CACHED_READ)
}

/// `LCS key1 key2 [LEN | IDX [MINMATCHLEN n] [WITHMATCHLEN]]`.
pub fn lcs(key1: impl Into<Arg>, key2: impl Into<Arg>, mode: LcsMode) -> CommandPacket {
    let packet = CommandPacket::new("LCS")
        .input_key(key1)
        .input_key(key2)
        .mode(READ);
    match mode {
        LcsMode::Plain => packet,
        LcsMode::Len => packet.arg("LEN"),
        LcsMode::Idx {
            min_match_len,
            with_match_len,
        } => {
            let mut packet = packet.arg("IDX");
            if let Some(len) = min_match_len {
                packet = packet.arg("MINMATCHLEN").arg(len);
            }
            packet.arg_if(with_match_len, "WITHMATCHLEN")
        }
    }
}

/// `DEL key...` → `Int64`.
pub fn del<I, K>(keys: I) -> CommandPacket
where
    I: IntoIterator<Item = K>,
    K: Into<Arg>,
{
    CommandPacket::new("DEL").input_keys(keys).mode(WRITE)
}

fn scan_args(
    mut packet: CommandPacket,
    pattern: Option<&str>,
    count: Option<u64>,
) -> CommandPacket {
    if let Some(pattern) = pattern {
        packet = packet.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        packet = packet.arg("COUNT").arg(count);
    }
    packet
}

/// `SCAN cursor [MATCH p] [COUNT n] [TYPE t]` → `Scan | Array | String`.
pub fn scan(
    cursor: u64,
    pattern: Option<&str>,
    count: Option<u64>,
    type_name: Option<&str>,
) -> CommandPacket {
    let packet = scan_args(
        CommandPacket::new("SCAN").arg(cursor).mode(READ),
        pattern,
        count,
    );
    match type_name {
        Some(type_name) => packet.arg("TYPE").arg(type_name),
        None => packet,
    }
}

/// `TYPE key` → `String`.
pub fn type_(key: impl Into<Arg>) -> CommandPacket {
    CommandPacket::new("TYPE").input_key(key).mode(READ)
}

/// `HGETALL key` → `Dictionary | String`.
pub fn hgetall(key: impl Into<Arg>) -> CommandPacket {
    CommandPacket::new("HGETALL").input_key(key).mode(CACHED_READ)
}

/// `HSCAN key cursor [MATCH p] [COUNT n]` → `Scan | Dictionary | String`.
pub fn hscan(
    key: impl Into<Arg>,
    cursor: u64,
    pattern: Option<&str>,
    count: Option<u64>,
) -> CommandPacket {
    scan_args(
        CommandPacket::new("HSCAN")
            .input_key(key)
            .arg(cursor)
            .mode(READ),
        pattern,
        count,
    )
}

/// `HEXPIRE key seconds FIELDS n field...` → `Array | Enum`.
pub fn hexpire<I, F>(key: impl Into<Arg>, ttl: Duration, fields: I) -> CommandPacket
where
    I: IntoIterator<Item = F>,
    F: Into<Arg>,
{
    let fields: Vec<Arg> = fields.into_iter().map(Into::into).collect();
    CommandPacket::new("HEXPIRE")
        .input_key(key)
        .arg(ttl.as_secs())
        .arg("FIELDS")
        .arg(fields.len())
        .args(fields)
        .mode(WRITE)
}

/// `ZRANGE key start stop WITHSCORES` → `Array | MemberScoreValue | String`.
pub fn zrange_with_scores(key: impl Into<Arg>, start: i64, stop: i64) -> CommandPacket {
    CommandPacket::new("ZRANGE")
        .input_key(key)
        .arg(start)
        .arg(stop)
        .arg("WITHSCORES")
        .mode(READ)
}

/// `ZSCAN key cursor [MATCH p] [COUNT n]` → `Scan | Array | MemberScoreValue | String`.
pub fn zscan(
    key: impl Into<Arg>,
    cursor: u64,
    pattern: Option<&str>,
    count: Option<u64>,
) -> CommandPacket {
    scan_args(
        CommandPacket::new("ZSCAN")
            .input_key(key)
            .arg(cursor)
            .mode(READ),
        pattern,
        count,
    )
}

/// `ZRANK key member WITHSCORE` → `Nullable | ScoreRankValue`.
pub fn zrank_with_score(key: impl Into<Arg>, member: impl Into<Arg>) -> CommandPacket {
    CommandPacket::new("ZRANK")
        .input_key(key)
        .arg(member)
        .arg("WITHSCORE")
        .mode(READ)
}

fn timeout_secs(timeout: Duration) -> f64 {
    timeout.as_secs_f64()
}

/// `BZPOPMIN key... timeout` → `Nullable | KeyValuePair | MemberScoreValue | String`.
///
/// A zero timeout blocks until an element arrives.
pub fn bzpopmin<I, K>(keys: I, timeout: Duration) -> CommandPacket
where
    I: IntoIterator<Item = K>,
    K: Into<Arg>,
{
    CommandPacket::new("BZPOPMIN")
        .input_keys(keys)
        .arg(timeout_secs(timeout))
        .mode(WRITE | CommandMode::WITH_BLOCK)
}

/// `BLPOP key... timeout` → `Nullable | KeyValuePair | String`.
pub fn blpop<I, K>(keys: I, timeout: Duration) -> CommandPacket
where
    I: IntoIterator<Item = K>,
    K: Into<Arg>,
{
    CommandPacket::new("BLPOP")
        .input_keys(keys)
        .arg(timeout_secs(timeout))
        .mode(WRITE | CommandMode::WITH_BLOCK)
}

/// `XRANGE key start end [COUNT n]` → `Array | Stream | String`.
pub fn xrange(
    key: impl Into<Arg>,
    start: &str,
    end: &str,
    count: Option<u64>,
) -> CommandPacket {
    let packet = CommandPacket::new("XRANGE")
        .input_key(key)
        .arg(start)
        .arg(end)
        .mode(READ);
    match count {
        Some(count) => packet.arg("COUNT").arg(count),
        None => packet,
    }
}

/// `XREAD [COUNT n] [BLOCK ms] STREAMS key... id...`.
///
/// Projected with a key/value array of stream entry arrays.
pub fn xread(
    streams: &[(&str, &str)],
    count: Option<u64>,
    block: Option<Duration>,
) -> CommandPacket {
    let mut packet = CommandPacket::new("XREAD").mode(READ);
    if let Some(count) = count {
        packet = packet.arg("COUNT").arg(count);
    }
    if let Some(block) = block {
        packet = packet
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .mode(CommandMode::WITH_BLOCK);
    }
    packet = packet.arg("STREAMS");
    for (key, _) in streams {
        packet = packet.input_key(*key);
    }
    packet.args(streams.iter().map(|(_, id)| *id))
}

/// `XAUTOCLAIM key group consumer min-idle start [COUNT n]` →
/// `XAutoClaimValue | String`.
pub fn xautoclaim(
    key: impl Into<Arg>,
    group: &str,
    consumer: &str,
    min_idle: Duration,
    start: &str,
    count: Option<u64>,
) -> CommandPacket {
    let packet = CommandPacket::new("XAUTOCLAIM")
        .input_key(key)
        .arg(group)
        .arg(consumer)
        .arg(min_idle.as_millis() as u64)
        .arg(start)
        .mode(WRITE);
    match count {
        Some(count) => packet.arg("COUNT").arg(count),
        None => packet,
    }
}

/// `XINFO STREAM key [FULL]` → `XInfoStreamValue` or `XInfoStreamFullValue`.
pub fn xinfo_stream(key: impl Into<Arg>, full: bool) -> CommandPacket {
    CommandPacket::new("XINFO")
        .sub_command("STREAM")
        .input_key(key)
        .arg_if(full, "FULL")
        .mode(READ)
}

/// `XINFO GROUPS key` → `Array | XInfoGroupsValue`.
pub fn xinfo_groups(key: impl Into<Arg>) -> CommandPacket {
    CommandPacket::new("XINFO")
        .sub_command("GROUPS")
        .input_key(key)
        .mode(READ)
}

/// `XINFO CONSUMERS key group` → `Array | XInfoConsumersValue`.
pub fn xinfo_consumers(key: impl Into<Arg>, group: &str) -> CommandPacket {
    CommandPacket::new("XINFO")
        .sub_command("CONSUMERS")
        .input_key(key)
        .arg(group)
        .mode(READ)
}

/// `GEOPOS key member...` → `Array | Nullable | Coordinate`.
pub fn geopos<I, M>(key: impl Into<Arg>, members: I) -> CommandPacket
where
    I: IntoIterator<Item = M>,
    M: Into<Arg>,
{
    CommandPacket::new("GEOPOS")
        .input_key(key)
        .args(members)
        .mode(READ)
}

/// `GEOSEARCH key FROMMEMBER m|FROMLONLAT lon lat BYRADIUS r unit ...` →
/// `Array | GeoRadiusValue`.
pub fn geosearch(
    key: impl Into<Arg>,
    from: &GeoFrom,
    radius: f64,
    unit: GeoUnit,
    options: GeoSearchOptions,
) -> CommandPacket {
    let packet = CommandPacket::new("GEOSEARCH").input_key(key).mode(READ);
    let packet = match from {
        GeoFrom::Member(member) => packet.arg("FROMMEMBER").arg(member),
        GeoFrom::LonLat(longitude, latitude) => {
            packet.arg("FROMLONLAT").arg(*longitude).arg(*latitude)
        }
    };
    let mut packet = packet
        .arg("BYRADIUS")
        .arg(radius)
        .arg(unit.as_str())
        .arg_if(options.ascending, "ASC");
    if let Some(count) = options.count {
        packet = packet.arg("COUNT").arg(count);
    }
    packet
        .arg_if(options.with_coord, "WITHCOORD")
        .arg_if(options.with_dist, "WITHDIST")
        .arg_if(options.with_hash, "WITHHASH")
}

/// `FUNCTION STATS` → `FunctionStatsValue`.
pub fn function_stats() -> CommandPacket {
    CommandPacket::new("FUNCTION")
        .sub_command("STATS")
        .mode(CommandMode::SCRIPT)
}

/// `CLIENT ID` → `Int64`.
pub fn client_id() -> CommandPacket {
    CommandPacket::new("CLIENT")
        .sub_command("ID")
        .mode(CommandMode::CONNECTION)
}

/// `CLIENT TRACKING ON|OFF`; tracking options are appended by the caller.
pub fn client_tracking(on: bool) -> CommandPacket {
    CommandPacket::new("CLIENT")
        .sub_command("TRACKING")
        .arg(if on { "ON" } else { "OFF" })
        .mode(CommandMode::CONNECTION)
}

/// `CLIENT CACHING YES|NO` → `String`.
pub fn client_caching(yes: bool) -> CommandPacket {
    CommandPacket::new("CLIENT")
        .sub_command("CACHING")
        .arg(if yes { "YES" } else { "NO" })
        .mode(CommandMode::CONNECTION)
}

/// `SUBSCRIBE channel...`; confirmations arrive as pub/sub messages.
pub fn subscribe<I, C>(channels: I) -> CommandPacket
where
    I: IntoIterator<Item = C>,
    C: Into<Arg>,
{
    CommandPacket::new("SUBSCRIBE")
        .args(channels)
        .mode(CommandMode::SUB)
}
