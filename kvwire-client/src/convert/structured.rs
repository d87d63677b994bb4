//! Parsers for replies that map onto dedicated domain structs.

use kvwire_common::{KvError, KvResult, NumberKind, Shape, Value};

use super::{entries, items, list, number, pair, project, text};
use crate::model::{
    EngineStats, FunctionStats, GeoPosition, GeoRadiusValue, LcsMatch, LcsResult, RunningScript,
    StreamEntry, XAutoClaim, XInfoConsumer, XInfoGroup, XInfoPendingEntry, XInfoStream,
    XInfoStreamFull, XInfoStreamFullConsumer, XInfoStreamFullGroup,
};
use crate::reply::{FromReply, Reply};

/// Named fields of a map-shaped reply, taken out one at a time.
struct Fields {
    entries: Vec<(String, Value)>,
}

impl Fields {
    fn new(value: Value, expected: &str) -> KvResult<Self> {
        Ok(Fields {
            entries: entries(value, expected)?,
        })
    }

    /// Removes a field; null fields read as missing.
    fn take(&mut self, name: &str) -> KvResult<Option<Value>> {
        let idx = match self.entries.iter().position(|(key, _)| key == name) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let (_, value) = self.entries.remove(idx);
        match value.check()? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    fn opt_i64(&mut self, name: &str) -> KvResult<Option<i64>> {
        self.take(name)?
            .map(|value| number(value, name)?.to_i64())
            .transpose()
    }

    fn i64(&mut self, name: &str) -> KvResult<i64> {
        Ok(self.opt_i64(name)?.unwrap_or_default())
    }

    fn opt_string(&mut self, name: &str) -> KvResult<Option<String>> {
        self.take(name)?.map(|value| text(value, name)).transpose()
    }

    fn string(&mut self, name: &str) -> KvResult<String> {
        Ok(self.opt_string(name)?.unwrap_or_default())
    }

    fn list(&mut self, name: &str) -> KvResult<Vec<Value>> {
        match self.take(name)? {
            Some(value) => list(value, name),
            None => Ok(Vec::new()),
        }
    }
}

pub(super) fn coordinate(value: Value) -> KvResult<GeoPosition> {
    let (longitude, latitude) = pair(value, "coordinate")?;
    Ok(GeoPosition {
        longitude: number(longitude, "longitude")?.to_f64()?,
        latitude: number(latitude, "latitude")?.to_f64()?,
    })
}

/// One GEOSEARCH element; trailing parts are classified by their own type.
///
/// A `:` integer is the geohash, a `,` double or a string is the distance
/// and a nested array is the coordinate.
pub(super) fn geo_radius(value: Value) -> KvResult<GeoRadiusValue> {
    let mut parts = match value {
        Value::Array(items) | Value::Push(items) => items.into_iter(),
        scalar => {
            return Ok(GeoRadiusValue {
                member: text(scalar, "geo member")?,
                ..GeoRadiusValue::default()
            })
        }
    };
    let mut result = GeoRadiusValue {
        member: match parts.next() {
            Some(member) => text(member, "geo member")?,
            None => return Err(KvError::format("geo member", "empty array")),
        },
        ..GeoRadiusValue::default()
    };
    for part in parts {
        match part.check()? {
            Value::Number(number) if number.kind() == NumberKind::Integer => {
                result.hash = Some(number.to_i64()?);
            }
            Value::Number(number) => result.distance = Some(number.to_f64()?),
            part @ (Value::Text(_) | Value::Bytes(_)) => {
                result.distance = Some(number(part, "distance")?.to_f64()?);
            }
            part @ Value::Array(_) => result.position = Some(coordinate(part)?),
            other => return Err(KvError::format("geo radius part", other.kind_name())),
        }
    }
    Ok(result)
}

/// `LCS ... IDX` reply, normalized to a dictionary first.
pub(super) fn lcs(value: Value) -> KvResult<LcsResult> {
    let mut fields = Fields::new(value, "lcs")?;
    let matches = fields
        .list("matches")?
        .into_iter()
        .map(lcs_match)
        .collect::<KvResult<_>>()?;
    Ok(LcsResult {
        matches,
        len: fields.i64("len")?,
    })
}

fn lcs_match(value: Value) -> KvResult<LcsMatch> {
    let mut parts = items(value, "lcs match")?.into_iter();
    let (a, b) = match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => (range(a)?, range(b)?),
        _ => return Err(KvError::format("lcs match", "short array")),
    };
    let match_len = parts
        .next()
        .map(|len| number(len, "match length")?.to_i64())
        .transpose()?;
    Ok(LcsMatch { a, b, match_len })
}

fn range(value: Value) -> KvResult<(i64, i64)> {
    let (start, end) = pair(value, "lcs range")?;
    Ok((
        number(start, "range start")?.to_i64()?,
        number(end, "range end")?.to_i64()?,
    ))
}

/// `[id, [field, value, ...]]`; field values are projected with `field`.
pub(super) fn stream_entry(value: Value, field: &Shape) -> KvResult<StreamEntry<Reply>> {
    let (id, fields) = pair(value, "stream entry")?;
    let fields = match fields.check()? {
        Value::Null => Vec::new(),
        fields => entries(fields, "stream fields")?,
    };
    Ok(StreamEntry {
        id: text(id, "stream id")?,
        fields: fields
            .into_iter()
            .map(|(name, value)| Ok((name, project(value, field)?)))
            .collect::<KvResult<_>>()?,
    })
}

fn text_entry(value: Value) -> KvResult<StreamEntry<String>> {
    stream_entry(value, &Shape::String)?.try_map(String::from_reply)
}

fn text_entries(values: Vec<Value>) -> KvResult<Vec<StreamEntry<String>>> {
    values
        .into_iter()
        .filter(|value| !value.is_null())
        .map(text_entry)
        .collect()
}

/// `[next-id, [entries...], [deleted-ids...]]`; the last part is 7.0+.
pub(super) fn auto_claim(value: Value, field: &Shape) -> KvResult<XAutoClaim<Reply>> {
    let mut parts = items(value, "xautoclaim")?.into_iter();
    let next_id = match parts.next() {
        Some(id) => text(id, "next id")?,
        None => return Err(KvError::format("xautoclaim", "empty array")),
    };
    let entries = match parts.next() {
        Some(claimed) => list(claimed, "claimed entries")?
            .into_iter()
            .filter(|entry| !entry.is_null())
            .map(|entry| stream_entry(entry, field))
            .collect::<KvResult<_>>()?,
        None => Vec::new(),
    };
    let deleted_ids = match parts.next() {
        Some(deleted) => list(deleted, "deleted ids")?
            .into_iter()
            .map(|id| text(id, "deleted id"))
            .collect::<KvResult<_>>()?,
        None => Vec::new(),
    };
    Ok(XAutoClaim {
        next_id,
        entries,
        deleted_ids,
    })
}

pub(super) fn xinfo_consumer(value: Value) -> KvResult<XInfoConsumer> {
    let mut fields = Fields::new(value, "xinfo consumer")?;
    Ok(XInfoConsumer {
        name: fields.string("name")?,
        pending: fields.i64("pending")?,
        idle: fields.i64("idle")?,
        inactive: fields.opt_i64("inactive")?,
    })
}

pub(super) fn xinfo_group(value: Value) -> KvResult<XInfoGroup> {
    let mut fields = Fields::new(value, "xinfo group")?;
    Ok(XInfoGroup {
        name: fields.string("name")?,
        consumers: fields.i64("consumers")?,
        pending: fields.i64("pending")?,
        last_delivered_id: fields.string("last-delivered-id")?,
        entries_read: fields.opt_i64("entries-read")?,
        lag: fields.opt_i64("lag")?,
    })
}

pub(super) fn xinfo_stream(value: Value) -> KvResult<XInfoStream> {
    let mut fields = Fields::new(value, "xinfo stream")?;
    Ok(XInfoStream {
        length: fields.i64("length")?,
        radix_tree_keys: fields.i64("radix-tree-keys")?,
        radix_tree_nodes: fields.i64("radix-tree-nodes")?,
        groups: fields.i64("groups")?,
        last_generated_id: fields.string("last-generated-id")?,
        max_deleted_entry_id: fields.opt_string("max-deleted-entry-id")?,
        entries_added: fields.opt_i64("entries-added")?,
        recorded_first_entry_id: fields.opt_string("recorded-first-entry-id")?,
        first_entry: fields.take("first-entry")?.map(text_entry).transpose()?,
        last_entry: fields.take("last-entry")?.map(text_entry).transpose()?,
    })
}

pub(super) fn xinfo_stream_full(value: Value) -> KvResult<XInfoStreamFull> {
    let mut fields = Fields::new(value, "xinfo stream full")?;
    Ok(XInfoStreamFull {
        length: fields.i64("length")?,
        radix_tree_keys: fields.i64("radix-tree-keys")?,
        radix_tree_nodes: fields.i64("radix-tree-nodes")?,
        last_generated_id: fields.string("last-generated-id")?,
        max_deleted_entry_id: fields.opt_string("max-deleted-entry-id")?,
        entries_added: fields.opt_i64("entries-added")?,
        recorded_first_entry_id: fields.opt_string("recorded-first-entry-id")?,
        entries: text_entries(fields.list("entries")?)?,
        groups: fields
            .list("groups")?
            .into_iter()
            .map(full_group)
            .collect::<KvResult<_>>()?,
    })
}

fn full_group(value: Value) -> KvResult<XInfoStreamFullGroup> {
    let mut fields = Fields::new(value, "stream group")?;
    Ok(XInfoStreamFullGroup {
        name: fields.string("name")?,
        last_delivered_id: fields.string("last-delivered-id")?,
        entries_read: fields.opt_i64("entries-read")?,
        lag: fields.opt_i64("lag")?,
        pel_count: fields.i64("pel-count")?,
        pending: pending_entries(fields.list("pending")?)?,
        consumers: fields
            .list("consumers")?
            .into_iter()
            .map(full_consumer)
            .collect::<KvResult<_>>()?,
    })
}

fn full_consumer(value: Value) -> KvResult<XInfoStreamFullConsumer> {
    let mut fields = Fields::new(value, "stream consumer")?;
    Ok(XInfoStreamFullConsumer {
        name: fields.string("name")?,
        seen_time: fields.i64("seen-time")?,
        active_time: fields.opt_i64("active-time")?,
        pel_count: fields.i64("pel-count")?,
        pending: pending_entries(fields.list("pending")?)?,
    })
}

/// Group lists carry `[id, consumer, time, count]`, consumer lists drop the
/// consumer name.
fn pending_entries(values: Vec<Value>) -> KvResult<Vec<XInfoPendingEntry>> {
    values
        .into_iter()
        .map(|value| {
            let parts = items(value, "pending entry")?;
            let mut parts = match parts.len() {
                3 | 4 => parts.into_iter(),
                len => return Err(KvError::format("pending entry", format!("array of {}", len))),
            };
            let with_consumer = parts.len() == 4;
            let mut next = || parts.next().unwrap_or(Value::Null);
            Ok(XInfoPendingEntry {
                id: text(next(), "pending id")?,
                consumer: if with_consumer {
                    Some(text(next(), "pending consumer")?)
                } else {
                    None
                },
                delivery_time: number(next(), "delivery time")?.to_i64()?,
                delivery_count: number(next(), "delivery count")?.to_i64()?,
            })
        })
        .collect()
}

pub(super) fn function_stats(value: Value) -> KvResult<FunctionStats> {
    let mut fields = Fields::new(value, "function stats")?;
    let running_script = match fields.take("running_script")? {
        Some(script) => {
            let mut script = Fields::new(script, "running script")?;
            Some(RunningScript {
                name: script.string("name")?,
                command: script
                    .list("command")?
                    .into_iter()
                    .map(|arg| text(arg, "command"))
                    .collect::<KvResult<_>>()?,
                duration_ms: script.i64("duration_ms")?,
            })
        }
        None => None,
    };
    let engines = match fields.take("engines")? {
        Some(engines) => entries(engines, "engines")?
            .into_iter()
            .map(|(name, stats)| {
                let mut stats = Fields::new(stats, "engine stats")?;
                Ok((
                    name,
                    EngineStats {
                        libraries_count: stats.i64("libraries_count")?,
                        functions_count: stats.i64("functions_count")?,
                    },
                ))
            })
            .collect::<KvResult<_>>()?,
        None => Vec::new(),
    };
    Ok(FunctionStats {
        running_script,
        engines,
    })
}
