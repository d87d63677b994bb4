//! Domain result types produced by the projector.

use kvwire_common::KvResult;

use crate::reply::{enum_from_reply, FromReply, Reply, ReplyEnum};

/// Longitude/latitude pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoPosition {
    pub longitude: f64,
    pub latitude: f64,
}

/// One element of a GEORADIUS/GEOSEARCH reply.
///
/// Only the parts requested with `WITHDIST`, `WITHHASH` and `WITHCOORD` are
/// populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRadiusValue {
    pub member: String,
    pub distance: Option<f64>,
    pub hash: Option<i64>,
    pub position: Option<GeoPosition>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValue<T> {
    pub key: String,
    pub value: T,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberScore<T> {
    pub member: T,
    pub score: f64,
}

/// Reply of ZRANK/ZREVRANK with `WITHSCORE`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreRank {
    pub rank: i64,
    pub score: f64,
}

/// One page of a cursor-based iteration. A cursor of 0 ends the iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage<P> {
    pub cursor: u64,
    pub page: P,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEntry<T> {
    pub id: String,
    pub fields: Vec<(String, T)>,
}

impl<T> StreamEntry<T> {
    /// Converts every field value, failing on the first error.
    pub fn try_map<U, F>(self, mut f: F) -> KvResult<StreamEntry<U>>
    where
        F: FnMut(T) -> KvResult<U>,
    {
        let fields = self
            .fields
            .into_iter()
            .map(|(name, value)| Ok((name, f(value)?)))
            .collect::<KvResult<_>>()?;
        Ok(StreamEntry {
            id: self.id,
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&T> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Reply of XAUTOCLAIM. `deleted_ids` is empty on servers older than 7.0.
#[derive(Debug, Clone, PartialEq)]
pub struct XAutoClaim<T> {
    pub next_id: String,
    pub entries: Vec<StreamEntry<T>>,
    pub deleted_ids: Vec<String>,
}

impl<T> Default for XAutoClaim<T> {
    fn default() -> Self {
        XAutoClaim {
            next_id: String::new(),
            entries: Vec::new(),
            deleted_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoConsumer {
    pub name: String,
    pub pending: i64,
    pub idle: i64,
    pub inactive: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoGroup {
    pub name: String,
    pub consumers: i64,
    pub pending: i64,
    pub last_delivered_id: String,
    pub entries_read: Option<i64>,
    pub lag: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoStream {
    pub length: i64,
    pub radix_tree_keys: i64,
    pub radix_tree_nodes: i64,
    pub groups: i64,
    pub last_generated_id: String,
    pub max_deleted_entry_id: Option<String>,
    pub entries_added: Option<i64>,
    pub recorded_first_entry_id: Option<String>,
    pub first_entry: Option<StreamEntry<String>>,
    pub last_entry: Option<StreamEntry<String>>,
}

/// Reply of `XINFO STREAM key FULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoStreamFull {
    pub length: i64,
    pub radix_tree_keys: i64,
    pub radix_tree_nodes: i64,
    pub last_generated_id: String,
    pub max_deleted_entry_id: Option<String>,
    pub entries_added: Option<i64>,
    pub recorded_first_entry_id: Option<String>,
    pub entries: Vec<StreamEntry<String>>,
    pub groups: Vec<XInfoStreamFullGroup>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoStreamFullGroup {
    pub name: String,
    pub last_delivered_id: String,
    pub entries_read: Option<i64>,
    pub lag: Option<i64>,
    pub pel_count: i64,
    pub pending: Vec<XInfoPendingEntry>,
    pub consumers: Vec<XInfoStreamFullConsumer>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoStreamFullConsumer {
    pub name: String,
    pub seen_time: i64,
    pub active_time: Option<i64>,
    pub pel_count: i64,
    pub pending: Vec<XInfoPendingEntry>,
}

/// Pending-list entry. `consumer` is only present in a group's list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XInfoPendingEntry {
    pub id: String,
    pub consumer: Option<String>,
    pub delivery_time: i64,
    pub delivery_count: i64,
}

/// Reply of FUNCTION STATS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionStats {
    pub running_script: Option<RunningScript>,
    pub engines: Vec<(String, EngineStats)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningScript {
    pub name: String,
    pub command: Vec<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub libraries_count: i64,
    pub functions_count: i64,
}

/// Reply of `LCS key1 key2 IDX`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LcsResult {
    pub matches: Vec<LcsMatch>,
    pub len: i64,
}

/// Matched ranges, inclusive on both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LcsMatch {
    pub a: (i64, i64),
    pub b: (i64, i64),
    /// Present with `WITHMATCHLEN`.
    pub match_len: Option<i64>,
}

/// Per-field result of HEXPIRE and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum FieldExpireStatus {
    NoSuchField = -2,
    ConditionNotMet = 0,
    Set = 1,
    Deleted = 2,
}

impl ReplyEnum for FieldExpireStatus {
    fn from_discriminant(value: i64) -> Option<Self> {
        match value {
            -2 => Some(FieldExpireStatus::NoSuchField),
            0 => Some(FieldExpireStatus::ConditionNotMet),
            1 => Some(FieldExpireStatus::Set),
            2 => Some(FieldExpireStatus::Deleted),
            _ => None,
        }
    }
}

impl FromReply for FieldExpireStatus {
    fn from_reply(reply: Reply) -> KvResult<Self> {
        enum_from_reply(reply)
    }
}
