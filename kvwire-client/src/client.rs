//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API that runs every command through
//! builder, pool, frame decoder and projector, with optional client-side
//! caching.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling, decoding and caching.
//! 2. **Typed Replies**: `call` names the reply shape once and converts
//!    into any `FromReply` type.
//! 3. **Fail Fast**: A caching policy that cannot activate closes the pool.
//!
//! ## Call Path
//!
//! ```text
//! call(packet, ResultType)
//!   ├── caching.before_command ──► local hit? return cached Value
//!   ├── pool.acquire ──► [CLIENT CACHING YES|NO] ──► packet ──► decode_buf
//!   ├── store reply when cacheable
//!   └── convert::project(Value, Shape) ──► T::from_reply
//! ```

use std::fmt;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, trace};

use kvwire_common::{CommandPacket, Encoding, KvError, KvResult, ResultType, Shape, Value};

use crate::caching::{
    CacheDecision, CachingOptions, ClientSideCaching, TrackingTransport, INVALIDATE_CHANNEL,
};
use crate::commands::{self, GeoFrom, GeoSearchOptions, GeoUnit, LcsMode, SetOptions};
use crate::convert;
use crate::model::{
    FieldExpireStatus, FunctionStats, GeoPosition, GeoRadiusValue, KeyValue, LcsResult,
    MemberScore, ScanPage, ScoreRank, StreamEntry, XAutoClaim, XInfoConsumer, XInfoGroup,
    XInfoStream, XInfoStreamFull,
};
use crate::pool::{Connection, ConnectionPool, ErrorHook, PoolConfig};
use crate::reply::FromReply;

/// Configuration for the synchronous client and its pool.
///
/// Timeouts deserialize from milliseconds.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    #[serde(deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    #[serde(deserialize_with = "millis")]
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    #[serde(deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
    /// Text or bytes for string replies.
    pub encoding: Encoding,
    /// Enables client-side caching at construction.
    pub caching: Option<CachingOptions>,
    /// Observability hook for errors that cost a connection.
    #[serde(skip)]
    pub on_error: Option<ErrorHook>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            encoding: Encoding::Text,
            caching: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("addr", &self.addr)
            .field("max_idle", &self.max_idle)
            .field("max_total", &self.max_total)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("encoding", &self.encoding)
            .field("caching", &self.caching)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// Reader thread of the invalidation subscriber.
struct Subscriber {
    stream: TcpStream,
    handle: JoinHandle<()>,
}

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, executes one command, and returns the
/// connection to the pool.
pub struct KVClient {
    pool: ConnectionPool,
    caching: Option<Arc<ClientSideCaching>>,
    subscriber: Mutex<Option<Subscriber>>,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> KvResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> KvResult<Self> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
            encoding: config.encoding,
            on_error: config.on_error,
        })?;
        let mut client = KVClient {
            pool,
            caching: None,
            subscriber: Mutex::new(None),
        };
        if let Some(options) = config.caching {
            client.enable_client_side_caching(options)?;
        }
        Ok(client)
    }

    /// Active caching policy, if any.
    pub fn caching(&self) -> Option<&ClientSideCaching> {
        self.caching.as_deref()
    }

    /// Turns on client-side caching.
    ///
    /// Opens a dedicated subscriber connection, enables tracking with the
    /// subscriber as redirect target and starts a thread that applies
    /// invalidations. On failure the pool is closed and the client is
    /// unusable.
    pub fn enable_client_side_caching(&mut self, options: CachingOptions) -> KvResult<()> {
        if self.caching.is_some() {
            return Err(KvError::Configuration(
                "client-side caching is already enabled".into(),
            ));
        }
        let policy = match ClientSideCaching::new(options) {
            Ok(policy) => Arc::new(policy),
            Err(err) => {
                self.pool.close();
                return Err(err);
            }
        };

        let mut transport = PoolTracking {
            pool: &self.pool,
            subscriber: None,
        };
        policy.activate(&mut transport)?;
        let conn = transport
            .subscriber
            .take()
            .ok_or(KvError::ConnectionClosed)?;

        match spawn_subscriber(conn, policy.clone()) {
            Ok(subscriber) => {
                *self.subscriber.lock() = Some(subscriber);
                self.caching = Some(policy);
                Ok(())
            }
            Err(err) => {
                policy.dispose();
                self.pool.close();
                Err(err)
            }
        }
    }

    /// Runs `packet` and projects its reply with `result_type`.
    pub fn call<T: FromReply>(
        &self,
        packet: CommandPacket,
        result_type: ResultType,
    ) -> KvResult<T> {
        let shape = Shape::resolve(result_type)?;
        self.call_shape(packet, &shape)
    }

    /// Runs `packet` and projects its reply with an explicit shape.
    pub fn call_shape<T: FromReply>(&self, packet: CommandPacket, shape: &Shape) -> KvResult<T> {
        let value = self.execute(&packet)?;
        T::from_reply(convert::project(value, shape)?)
    }

    /// Runs `packet` and returns the decoded reply as is.
    ///
    /// Server errors stay in the returned tree.
    pub fn execute(&self, packet: &CommandPacket) -> KvResult<Value> {
        let decision = match &self.caching {
            Some(caching) => caching.before_command(packet),
            None => CacheDecision {
                cacheable: false,
                prelude: None,
            },
        };
        if decision.cacheable {
            if let Some(value) = self.cached(packet) {
                trace!(command = %packet, "served from local cache");
                return Ok(value);
            }
        }

        // Registered before the read is sent so an invalidation racing the
        // reply cancels the fill.
        let fill = match &self.caching {
            Some(caching) if decision.cacheable => Some(caching.store().begin_fill(packet)),
            _ => None,
        };
        let mut conn = self.pool.acquire()?;
        if let Some(prelude) = &decision.prelude {
            if let Some(reply) = conn.exec(prelude)? {
                reply.check()?;
            }
        }
        let value = conn.exec(packet)?.unwrap_or(Value::Null);
        if let Some(fill) = fill {
            let storable = !matches!(value, Value::Error(_) | Value::Invalid(_));
            if storable && !fill.complete(value.clone()) {
                trace!(command = %packet, "reply invalidated in flight, not cached");
            }
        }
        Ok(value)
    }

    fn cached(&self, packet: &CommandPacket) -> Option<Value> {
        self.caching.as_ref()?.store().get(packet)
    }

    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.call(commands::get(key), ResultType::NULLABLE | ResultType::STRING)
    }

    /// Fetches raw bytes by key.
    pub fn get_bytes(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.call(commands::get(key), ResultType::NULLABLE | ResultType::BYTES)
    }

    /// Sets a value; returns the previous value when `options.get` is set.
    pub fn set(&self, key: &str, value: &[u8], options: SetOptions) -> KvResult<Option<String>> {
        self.call(
            commands::set(key, value, options),
            ResultType::NULLABLE | ResultType::STRING,
        )
    }

    pub fn mget(&self, keys: &[&str]) -> KvResult<Vec<Option<String>>> {
        self.call(
            commands::mget(keys.iter().copied()),
            ResultType::ARRAY | ResultType::NULLABLE | ResultType::STRING,
        )
    }

    /// Deletes keys. Returns how many existed.
    pub fn del(&self, keys: &[&str]) -> KvResult<i64> {
        self.call(commands::del(keys.iter().copied()), ResultType::INT64)
    }

    pub fn type_of(&self, key: &str) -> KvResult<String> {
        self.call(commands::type_(key), ResultType::STRING)
    }

    pub fn scan(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> KvResult<ScanPage<Vec<String>>> {
        self.call(
            commands::scan(cursor, pattern, count, None),
            ResultType::SCAN | ResultType::ARRAY | ResultType::STRING,
        )
    }

    pub fn lcs(&self, key1: &str, key2: &str) -> KvResult<String> {
        self.call(commands::lcs(key1, key2, LcsMode::Plain), ResultType::STRING)
    }

    pub fn lcs_len(&self, key1: &str, key2: &str) -> KvResult<i64> {
        self.call(commands::lcs(key1, key2, LcsMode::Len), ResultType::INT64)
    }

    pub fn lcs_idx(
        &self,
        key1: &str,
        key2: &str,
        min_match_len: Option<u64>,
        with_match_len: bool,
    ) -> KvResult<LcsResult> {
        let mode = LcsMode::Idx {
            min_match_len,
            with_match_len,
        };
        self.call(commands::lcs(key1, key2, mode), ResultType::LCS)
    }

    pub fn hgetall(&self, key: &str) -> KvResult<Vec<(String, String)>> {
        self.call(
            commands::hgetall(key),
            ResultType::DICTIONARY | ResultType::STRING,
        )
    }

    pub fn hscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> KvResult<ScanPage<Vec<(String, String)>>> {
        self.call(
            commands::hscan(key, cursor, pattern, count),
            ResultType::SCAN | ResultType::DICTIONARY | ResultType::STRING,
        )
    }

    pub fn hexpire(
        &self,
        key: &str,
        ttl: Duration,
        fields: &[&str],
    ) -> KvResult<Vec<FieldExpireStatus>> {
        self.call(
            commands::hexpire(key, ttl, fields.iter().copied()),
            ResultType::ARRAY | ResultType::ENUM,
        )
    }

    pub fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> KvResult<Vec<MemberScore<String>>> {
        self.call(
            commands::zrange_with_scores(key, start, stop),
            ResultType::ARRAY | ResultType::MEMBER_SCORE_VALUE | ResultType::STRING,
        )
    }

    pub fn zscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<u64>,
    ) -> KvResult<ScanPage<Vec<MemberScore<String>>>> {
        self.call(
            commands::zscan(key, cursor, pattern, count),
            ResultType::SCAN | ResultType::MEMBER_SCORE_VALUE | ResultType::STRING,
        )
    }

    pub fn zrank_with_score(&self, key: &str, member: &str) -> KvResult<Option<ScoreRank>> {
        self.call(
            commands::zrank_with_score(key, member),
            ResultType::NULLABLE | ResultType::SCORE_RANK_VALUE,
        )
    }

    /// Blocks up to `timeout` (zero = forever) for the lowest member.
    pub fn bzpopmin(
        &self,
        keys: &[&str],
        timeout: Duration,
    ) -> KvResult<Option<KeyValue<MemberScore<String>>>> {
        self.call(
            commands::bzpopmin(keys.iter().copied(), timeout),
            ResultType::NULLABLE
                | ResultType::KEY_VALUE_PAIR
                | ResultType::MEMBER_SCORE_VALUE
                | ResultType::STRING,
        )
    }

    pub fn blpop(&self, keys: &[&str], timeout: Duration) -> KvResult<Option<KeyValue<String>>> {
        self.call(
            commands::blpop(keys.iter().copied(), timeout),
            ResultType::NULLABLE | ResultType::KEY_VALUE_PAIR | ResultType::STRING,
        )
    }

    pub fn xrange(
        &self,
        key: &str,
        start: &str,
        end: &str,
        count: Option<u64>,
    ) -> KvResult<Vec<StreamEntry<String>>> {
        self.call(
            commands::xrange(key, start, end, count),
            ResultType::ARRAY | ResultType::STREAM | ResultType::STRING,
        )
    }

    /// Reads from several streams; one `(stream, entries)` pair per stream
    /// that had data.
    pub fn xread(
        &self,
        streams: &[(&str, &str)],
        count: Option<u64>,
        block: Option<Duration>,
    ) -> KvResult<Vec<(String, Vec<StreamEntry<String>>)>> {
        let shape = Shape::key_value_pair_array(Shape::array(Shape::stream(Shape::String)));
        self.call_shape(commands::xread(streams, count, block), &shape)
    }

    pub fn xautoclaim(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: &str,
        count: Option<u64>,
    ) -> KvResult<XAutoClaim<String>> {
        self.call(
            commands::xautoclaim(key, group, consumer, min_idle, start, count),
            ResultType::X_AUTO_CLAIM_VALUE | ResultType::STRING,
        )
    }

    pub fn xinfo_stream(&self, key: &str) -> KvResult<XInfoStream> {
        self.call(
            commands::xinfo_stream(key, false),
            ResultType::X_INFO_STREAM_VALUE,
        )
    }

    pub fn xinfo_stream_full(&self, key: &str) -> KvResult<XInfoStreamFull> {
        self.call(
            commands::xinfo_stream(key, true),
            ResultType::X_INFO_STREAM_FULL_VALUE,
        )
    }

    pub fn xinfo_groups(&self, key: &str) -> KvResult<Vec<XInfoGroup>> {
        self.call(
            commands::xinfo_groups(key),
            ResultType::ARRAY | ResultType::X_INFO_GROUPS_VALUE,
        )
    }

    pub fn xinfo_consumers(&self, key: &str, group: &str) -> KvResult<Vec<XInfoConsumer>> {
        self.call(
            commands::xinfo_consumers(key, group),
            ResultType::ARRAY | ResultType::X_INFO_CONSUMERS_VALUE,
        )
    }

    pub fn geopos(&self, key: &str, members: &[&str]) -> KvResult<Vec<Option<GeoPosition>>> {
        self.call(
            commands::geopos(key, members.iter().copied()),
            ResultType::ARRAY | ResultType::NULLABLE | ResultType::COORDINATE,
        )
    }

    pub fn geosearch(
        &self,
        key: &str,
        from: &GeoFrom,
        radius: f64,
        unit: GeoUnit,
        options: GeoSearchOptions,
    ) -> KvResult<Vec<GeoRadiusValue>> {
        self.call(
            commands::geosearch(key, from, radius, unit, options),
            ResultType::ARRAY | ResultType::GEO_RADIUS_VALUE,
        )
    }

    pub fn function_stats(&self) -> KvResult<FunctionStats> {
        self.call(commands::function_stats(), ResultType::FUNCTION_STATS_VALUE)
    }

    pub fn client_id(&self) -> KvResult<i64> {
        self.call(commands::client_id(), ResultType::INT64)
    }
}

impl Drop for KVClient {
    fn drop(&mut self) {
        if let Some(caching) = &self.caching {
            caching.dispose();
        }
        if let Some(subscriber) = self.subscriber.lock().take() {
            // Unblocks the reader thread.
            let _ = subscriber.stream.shutdown(Shutdown::Both);
            let _ = subscriber.handle.join();
        }
        self.pool.close();
    }
}

/// Activation steps over the client's pool.
struct PoolTracking<'a> {
    pool: &'a ConnectionPool,
    subscriber: Option<Connection>,
}

impl TrackingTransport for PoolTracking<'_> {
    fn subscribe_invalidations(&mut self) -> KvResult<i64> {
        let mut conn = self.pool.connect_dedicated()?;
        let id = conn.exec(&commands::client_id())?.unwrap_or(Value::Null);
        let id: i64 = convert::to(id, ResultType::INT64)?;

        let confirmation = conn
            .exec(&commands::subscribe([INVALIDATE_CHANNEL]))?
            .unwrap_or(Value::Null)
            .check()?;
        let confirmed = confirmation
            .as_items()
            .and_then(|items| items.first())
            .map_or(false, |kind| kind.eq_ignore_case("subscribe"));
        if !confirmed {
            return Err(KvError::format(
                "subscribe confirmation",
                confirmation.kind_name(),
            ));
        }

        conn.clear_read_timeout()?;
        self.subscriber = Some(conn);
        Ok(id)
    }

    fn enable_tracking(&mut self, packet: &CommandPacket) -> KvResult<bool> {
        let mut conn = self.pool.acquire()?;
        let reply = conn.exec(packet)?.unwrap_or(Value::Null).check()?;
        let accepted = reply.eq_ignore_case("OK");
        if accepted {
            // Tracking is per connection; new pool connections repeat it.
            self.pool.add_init_command(packet.clone());
        }
        Ok(accepted)
    }

    fn teardown(&mut self) {
        self.subscriber = None;
        self.pool.close();
    }
}

fn spawn_subscriber(mut conn: Connection, policy: Arc<ClientSideCaching>) -> KvResult<Subscriber> {
    let stream = conn.try_clone_stream()?;
    let handle = thread::Builder::new()
        .name("kvwire-invalidations".to_string())
        .spawn(move || loop {
            match conn.read_value() {
                Ok(value) => {
                    if !policy.handle_message(&value) {
                        debug!(kind = value.kind_name(), "non-invalidation message ignored");
                    }
                }
                Err(err) => {
                    // Without invalidations the cache could go stale.
                    if policy.state() == crate::caching::CachingState::Active {
                        error!(error = %err, "invalidation connection lost; caching disabled");
                    }
                    policy.dispose();
                    break;
                }
            }
        })?;
    Ok(Subscriber { stream, handle })
}
