//! # Local Cache Store
//!
//! Holds replies of cacheable reads until the server invalidates one of
//! their keys.
//!
//! ## Design Principles
//!
//! 1. **One Lock**: A single `RwLock` guards entries and the key index so
//!    an invalidation can never leave one without the other.
//! 2. **Wire Identity**: A reply is keyed by the encoded command, and keys
//!    are indexed by their raw bytes. Two commands share an entry only when
//!    they are identical on the wire.
//! 3. **Oldest First**: When full, the entry inserted earliest is dropped.
//! 4. **Fills Are Fenced**: A read registers a pending fill before it is
//!    sent. An invalidation of any of its keys cancels the fill, so a reply
//!    that raced a write is never stored.
//!
//! ```text
//! CacheStore
//!   └── inner: RwLock<StoreInner>
//!         ├── entries: HashMap<wire command, Entry { value, keys, seq }>
//!         ├── by_key:  HashMap<key bytes, Vec<wire command>>
//!         ├── order:   VecDeque<(seq, wire command)>   (oldest at front)
//!         └── fills:   HashMap<ticket, keys>           (reads in flight)
//! ```

use std::collections::VecDeque;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use kvwire_common::{CommandPacket, Value};

/// Default number of cached replies.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Entry {
    value: Value,
    keys: Vec<Bytes>,
    seq: u64,
}

#[derive(Debug)]
struct StoreInner {
    entries: HashMap<Bytes, Entry, RandomState>,
    by_key: HashMap<Bytes, Vec<Bytes>, RandomState>,
    order: VecDeque<(u64, Bytes)>,
    fills: HashMap<u64, Vec<Bytes>, RandomState>,
    next_seq: u64,
}

impl StoreInner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, command: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(command)?;
        for key in &entry.keys {
            if let Some(commands) = self.by_key.get_mut(key) {
                commands.retain(|cached| cached != command);
                if commands.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        Some(entry)
    }

    /// Forgets order records of replaced or invalidated entries.
    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(seq, command)| entries.get(command).map(|entry| entry.seq) == Some(*seq));
    }

    /// Drops oldest entries until there is room for one more.
    fn make_room(&mut self, capacity: usize) {
        while self.entries.len() >= capacity {
            let Some((seq, command)) = self.order.pop_front() else {
                break;
            };
            // Replaced entries leave stale order records behind.
            let current = self.entries.get(&command).map(|entry| entry.seq);
            if current == Some(seq) {
                self.remove(&command);
                debug!(command = ?command, "cache entry evicted");
            }
        }
    }

    fn insert(&mut self, capacity: usize, command: Bytes, keys: Vec<Bytes>, value: Value) {
        self.remove(&command);
        self.make_room(capacity);

        let seq = self.next_seq();
        for key in &keys {
            self.by_key
                .entry(key.clone())
                .or_default()
                .push(command.clone());
        }
        self.order.push_back((seq, command.clone()));
        self.entries.insert(command, Entry { value, keys, seq });
        if self.order.len() > capacity.saturating_mul(2) {
            self.compact_order();
        }
    }
}

/// Bounded reply cache shared by the dispatch path and the invalidation
/// listener.
#[derive(Debug)]
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        let hash_state = RandomState::new();
        CacheStore {
            inner: RwLock::new(StoreInner {
                entries: HashMap::with_hasher(hash_state.clone()),
                by_key: HashMap::with_hasher(hash_state.clone()),
                order: VecDeque::new(),
                fills: HashMap::with_hasher(hash_state),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached reply for `packet`, if any.
    pub fn get(&self, packet: &CommandPacket) -> Option<Value> {
        let command = packet.to_bytes();
        self.inner
            .read()
            .entries
            .get(&command)
            .map(|entry| entry.value.clone())
    }

    /// Stores the reply of `packet`, indexed by the packet's keys.
    pub fn insert(&self, packet: &CommandPacket, value: Value) {
        let keys = packet_keys(packet);
        self.inner
            .write()
            .insert(self.capacity, packet.to_bytes(), keys, value);
    }

    /// Registers a read of `packet` that is about to be sent.
    ///
    /// Call before writing the command; the reply may only be stored through
    /// the returned fill.
    pub fn begin_fill(&self, packet: &CommandPacket) -> PendingFill<'_> {
        let keys = packet_keys(packet);
        let ticket = {
            let mut inner = self.inner.write();
            let ticket = inner.next_seq();
            inner.fills.insert(ticket, keys.clone());
            ticket
        };
        PendingFill {
            store: self,
            ticket,
            command: packet.to_bytes(),
            keys,
        }
    }

    /// Drops every reply that depends on `key` and cancels fills reading
    /// it; returns how many replies went.
    pub fn invalidate(&self, key: impl AsRef<[u8]>) -> usize {
        let key = key.as_ref();
        let mut inner = self.inner.write();
        let commands = inner.by_key.remove(key).unwrap_or_default();
        let mut removed = 0;
        for command in commands {
            if inner.remove(&command).is_some() {
                removed += 1;
            }
        }
        let pending = inner.fills.len();
        inner
            .fills
            .retain(|_, keys| !keys.iter().any(|read| &read[..] == key));
        let cancelled = pending - inner.fills.len();
        if removed > 0 || cancelled > 0 {
            debug!(key = %String::from_utf8_lossy(key), removed, cancelled, "cache invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.by_key.clear();
        inner.order.clear();
        inner.fills.clear();
        debug!(removed, "cache flushed");
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        CacheStore::new(DEFAULT_CAPACITY)
    }
}

fn packet_keys(packet: &CommandPacket) -> Vec<Bytes> {
    packet.key_bytes().map(Bytes::copy_from_slice).collect()
}

/// A cacheable read in flight. Dropping it without `complete` abandons the
/// fill.
#[derive(Debug)]
pub struct PendingFill<'a> {
    store: &'a CacheStore,
    ticket: u64,
    command: Bytes,
    keys: Vec<Bytes>,
}

impl PendingFill<'_> {
    /// Stores `value` unless a key of the read was invalidated since
    /// `begin_fill`. Returns whether the reply was stored.
    pub fn complete(mut self, value: Value) -> bool {
        let mut inner = self.store.inner.write();
        if inner.fills.remove(&self.ticket).is_none() {
            return false;
        }
        let command = std::mem::take(&mut self.command);
        let keys = std::mem::take(&mut self.keys);
        inner.insert(self.store.capacity, command, keys, value);
        true
    }
}

impl Drop for PendingFill<'_> {
    fn drop(&mut self) {
        self.store.inner.write().fills.remove(&self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;

    #[test]
    fn stores_and_invalidates_by_key() {
        let store = CacheStore::new(8);
        let get = commands::get("a");
        store.insert(&get, Value::from("1"));
        assert_eq!(store.get(&get), Some(Value::from("1")));

        assert_eq!(store.invalidate("a"), 1);
        assert_eq!(store.get(&get), None);
        assert_eq!(store.invalidate("a"), 0);
    }

    #[test]
    fn multi_key_entry_dropped_by_any_key() {
        let store = CacheStore::new(8);
        let mget = commands::mget(["a", "b"]);
        let get_b = commands::get("b");
        store.insert(&mget, Value::Array(vec![Value::Null, Value::Null]));
        store.insert(&get_b, Value::Null);

        assert_eq!(store.invalidate("b"), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn commands_that_print_alike_stay_apart() {
        let store = CacheStore::new(8);
        store.insert(
            &commands::mget(["a", "b"]),
            Value::Array(vec![Value::from("1"), Value::from("2")]),
        );
        assert_eq!(store.get(&commands::mget(["a b"])), None);

        store.insert(&commands::get(&b"\xff"[..]), Value::from("ff-value"));
        assert_eq!(store.get(&commands::get(&b"\xfe"[..])), None);
        assert_eq!(
            store.get(&commands::get(&b"\xff"[..])),
            Some(Value::from("ff-value"))
        );
    }

    #[test]
    fn binary_keys_invalidate_exactly() {
        let store = CacheStore::new(8);
        store.insert(&commands::get(&b"\xff"[..]), Value::from("ff"));
        store.insert(&commands::get(&b"\xfe"[..]), Value::from("fe"));

        assert_eq!(store.invalidate(&b"\xfe"[..]), 1);
        assert_eq!(
            store.get(&commands::get(&b"\xff"[..])),
            Some(Value::from("ff"))
        );
    }

    #[test]
    fn fill_completes_when_nothing_changed() {
        let store = CacheStore::new(8);
        let get = commands::get("k");
        let fill = store.begin_fill(&get);
        assert!(fill.complete(Value::from("v")));
        assert_eq!(store.get(&get), Some(Value::from("v")));
        assert!(store.inner.read().fills.is_empty());
    }

    #[test]
    fn invalidation_during_fill_discards_reply() {
        let store = CacheStore::new(8);
        let get = commands::get("k");
        let fill = store.begin_fill(&get);
        // The write lands while the old value is still on its way back.
        assert_eq!(store.invalidate("k"), 0);
        assert!(!fill.complete(Value::from("old")));
        assert_eq!(store.get(&get), None);

        // Other keys do not cancel the fill.
        let fill = store.begin_fill(&get);
        store.invalidate("other");
        assert!(fill.complete(Value::from("new")));
        assert_eq!(store.get(&get), Some(Value::from("new")));
    }

    #[test]
    fn flush_during_fill_discards_reply() {
        let store = CacheStore::new(8);
        let get = commands::get("k");
        let fill = store.begin_fill(&get);
        store.clear();
        assert!(!fill.complete(Value::from("old")));
        assert!(store.is_empty());
    }

    #[test]
    fn abandoned_fill_is_forgotten() {
        let store = CacheStore::new(8);
        drop(store.begin_fill(&commands::get("k")));
        assert!(store.inner.read().fills.is_empty());
    }

    #[test]
    fn evicts_oldest_first() {
        let store = CacheStore::new(2);
        let (a, b, c) = (commands::get("a"), commands::get("b"), commands::get("c"));
        store.insert(&a, Value::from(1i64));
        store.insert(&b, Value::from(2i64));
        // Refreshing `a` makes `b` the oldest.
        store.insert(&a, Value::from(3i64));
        store.insert(&c, Value::from(4i64));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&a), Some(Value::from(3i64)));
        assert_eq!(store.get(&b), None);
        assert_eq!(store.get(&c), Some(Value::from(4i64)));
    }

    #[test]
    fn invalidated_entries_do_not_pin_order_records() {
        let store = CacheStore::new(2);
        let a = commands::get("a");
        for round in 0i64..10 {
            store.insert(&a, Value::from(round));
            store.invalidate("a");
        }
        assert!(store.inner.read().order.len() <= 4);
    }

    #[test]
    fn clear_flushes_everything() {
        let store = CacheStore::default();
        store.insert(&commands::get("a"), Value::from(1i64));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.invalidate("a"), 0);
    }
}
