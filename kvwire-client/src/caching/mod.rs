//! # Client-Side Caching
//!
//! Purpose: Decide which reads may be cached locally, switch server-side
//! key tracking on, and drop cached replies when the server says a key
//! changed.
//!
//! ## Design Principles
//! 1. **Validate Up Front**: Conflicting options are rejected by
//!    `ClientSideCaching::new`, before anything touches the network.
//! 2. **Fail Fast**: If tracking cannot be enabled the owning transport is
//!    torn down; a cache that is not invalidated serves stale data.
//! 3. **Pure Matchers**: `match_default` and `match_broadcast` only read
//!    immutable configuration, so the dispatch path and the invalidation
//!    listener call them without locks.
//!
//! ## State Machine
//!
//! ```text
//! Unconfigured ──activate()──► Activating ──ok──► Active ──dispose()──► Disposed
//!                                  │
//!                                  └──error / rejected──► Failed
//!                                                        (transport torn down)
//! ```

pub mod glob;
mod invalidation;
mod store;

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use bitflags::bitflags;
use serde::Deserialize;
use tracing::{error, info};

use kvwire_common::{CommandMode, CommandPacket, KvError, KvResult, Value};

use crate::commands;
pub use glob::Glob;
pub use invalidation::{Invalidation, INVALIDATE_CHANNEL};
pub use store::{CacheStore, PendingFill, DEFAULT_CAPACITY};

/// Tracking flavour requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CachingMode {
    /// The server remembers which keys this client read.
    #[default]
    Default,
    /// The server announces every change under the configured prefixes.
    Broadcasting,
}

impl FromStr for CachingMode {
    type Err = KvError;

    fn from_str(mode: &str) -> KvResult<Self> {
        if mode.eq_ignore_ascii_case("default") {
            Ok(CachingMode::Default)
        } else if mode.eq_ignore_ascii_case("broadcasting") {
            Ok(CachingMode::Broadcasting)
        } else {
            Err(KvError::Configuration(format!(
                "unknown caching mode {:?}",
                mode
            )))
        }
    }
}

impl TryFrom<String> for CachingMode {
    type Error = KvError;

    fn try_from(mode: String) -> KvResult<Self> {
        mode.parse()
    }
}

/// Caching policy description, usually read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CachingOptions {
    pub mode: CachingMode,
    /// Allow-list globs; only matching keys are cached (opt-in tracking).
    pub key_patterns: Vec<String>,
    /// Deny-list globs; matching keys are never cached (opt-out tracking).
    pub without_key_patterns: Vec<String>,
    /// Broadcast prefixes; empty means every key.
    pub prefixes: Vec<String>,
    /// Maximum number of cached replies.
    pub capacity: usize,
    /// Skip invalidations caused by this client's own writes.
    pub noloop: bool,
}

impl Default for CachingOptions {
    fn default() -> Self {
        CachingOptions {
            mode: CachingMode::Default,
            key_patterns: Vec::new(),
            without_key_patterns: Vec::new(),
            prefixes: Vec::new(),
            capacity: DEFAULT_CAPACITY,
            noloop: true,
        }
    }
}

bitflags! {
    /// Outcome of `match_default`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MatchResult: u8 {
        const INCLUDE = 1 << 0;
        const EXCLUDE = 1 << 1;
        /// No rule applied to the keys.
        const UNMATCH = 1 << 2;
    }
}

/// Lifecycle of a caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CachingState {
    Unconfigured = 0,
    Activating = 1,
    Active = 2,
    Failed = 3,
    Disposed = 4,
}

impl CachingState {
    fn from_u8(value: u8) -> CachingState {
        match value {
            0 => CachingState::Unconfigured,
            1 => CachingState::Activating,
            2 => CachingState::Active,
            3 => CachingState::Failed,
            _ => CachingState::Disposed,
        }
    }
}

/// The connection-level steps activation needs.
pub trait TrackingTransport {
    /// Subscribes a dedicated connection to the invalidation channel and
    /// returns that connection's client id.
    fn subscribe_invalidations(&mut self) -> KvResult<i64>;

    /// Sends `CLIENT TRACKING ...`; `false` when the server rejected it.
    fn enable_tracking(&mut self, packet: &CommandPacket) -> KvResult<bool>;

    /// Closes every connection owned by the transport.
    fn teardown(&mut self);
}

/// How one command interacts with the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheDecision {
    /// The reply may be served from and stored in the local cache.
    pub cacheable: bool,
    /// Command to send first on the same connection (`CLIENT CACHING ...`).
    pub prelude: Option<CommandPacket>,
}

impl CacheDecision {
    const BYPASS: CacheDecision = CacheDecision {
        cacheable: false,
        prelude: None,
    };
}

const NO_REDIRECT: i64 = -1;

/// Client-side caching policy and its local store.
#[derive(Debug)]
pub struct ClientSideCaching {
    options: CachingOptions,
    allow: Vec<Glob>,
    deny: Vec<Glob>,
    state: AtomicU8,
    redirect_id: AtomicI64,
    store: CacheStore,
}

impl ClientSideCaching {
    /// Validates `options` and builds an unconfigured policy.
    pub fn new(options: CachingOptions) -> KvResult<Self> {
        match options.mode {
            CachingMode::Default => {
                if !options.key_patterns.is_empty() && !options.without_key_patterns.is_empty() {
                    return Err(KvError::Configuration(
                        "key_patterns and without_key_patterns are mutually exclusive".into(),
                    ));
                }
                if !options.prefixes.is_empty() {
                    return Err(KvError::Configuration(
                        "prefixes require broadcasting mode".into(),
                    ));
                }
            }
            CachingMode::Broadcasting => {
                if !options.key_patterns.is_empty() || !options.without_key_patterns.is_empty() {
                    return Err(KvError::Configuration(
                        "key patterns require default mode".into(),
                    ));
                }
                if options.prefixes.iter().any(String::is_empty) {
                    return Err(KvError::Configuration("empty broadcast prefix".into()));
                }
            }
        }

        let compile = |patterns: &[String]| -> KvResult<Vec<Glob>> {
            patterns.iter().map(|pattern| Glob::new(pattern)).collect()
        };
        Ok(ClientSideCaching {
            allow: compile(&options.key_patterns)?,
            deny: compile(&options.without_key_patterns)?,
            store: CacheStore::new(options.capacity),
            state: AtomicU8::new(CachingState::Unconfigured as u8),
            redirect_id: AtomicI64::new(NO_REDIRECT),
            options,
        })
    }

    #[inline]
    pub fn options(&self) -> &CachingOptions {
        &self.options
    }

    #[inline]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn state(&self) -> CachingState {
        CachingState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Client id receiving invalidations, once active.
    pub fn redirect_id(&self) -> Option<i64> {
        match self.redirect_id.load(Ordering::Acquire) {
            NO_REDIRECT => None,
            id => Some(id),
        }
    }

    /// Subscribes to invalidations and enables tracking.
    ///
    /// **Output**: the redirect client id.
    ///
    /// **Logic**:
    /// 1. Move `Unconfigured → Activating`; any other state is an error.
    /// 2. Subscribe, then send the tracking command for the configured mode.
    /// 3. On success publish the redirect id and move to `Active`; on any
    ///    failure move to `Failed` and tear the transport down.
    pub fn activate<T: TrackingTransport + ?Sized>(&self, transport: &mut T) -> KvResult<i64> {
        if self
            .state
            .compare_exchange(
                CachingState::Unconfigured as u8,
                CachingState::Activating as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(KvError::Configuration(format!(
                "caching policy cannot activate from {:?}",
                self.state()
            )));
        }

        let result = transport.subscribe_invalidations().and_then(|id| {
            let packet = build_tracking_command(&self.options, id);
            if transport.enable_tracking(&packet)? {
                Ok(id)
            } else {
                Err(KvError::server(format!("{} was rejected", packet)))
            }
        });

        match result {
            Ok(id) => {
                self.redirect_id.store(id, Ordering::Release);
                self.state
                    .store(CachingState::Active as u8, Ordering::Release);
                info!(redirect = id, mode = ?self.options.mode, "client-side caching active");
                Ok(id)
            }
            Err(err) => {
                self.state
                    .store(CachingState::Failed as u8, Ordering::Release);
                error!(error = %err, "client-side caching activation failed");
                transport.teardown();
                Err(err)
            }
        }
    }

    /// Default-mode eligibility of a key set.
    pub fn match_default<K: AsRef<str>>(&self, keys: &[K]) -> MatchResult {
        if !self.allow.is_empty() {
            let all_allowed = keys
                .iter()
                .all(|key| self.allow.iter().any(|glob| glob.matches(key.as_ref())));
            return if all_allowed {
                MatchResult::INCLUDE
            } else {
                MatchResult::UNMATCH
            };
        }
        if !self.deny.is_empty() {
            let denied = keys
                .iter()
                .any(|key| self.deny.iter().any(|glob| glob.matches(key.as_ref())));
            return if denied {
                MatchResult::EXCLUDE
            } else {
                MatchResult::INCLUDE | MatchResult::UNMATCH
            };
        }
        MatchResult::INCLUDE
    }

    /// Broadcast-mode eligibility: every key must start with some prefix.
    pub fn match_broadcast<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        let prefixes = &self.options.prefixes;
        prefixes.is_empty()
            || keys.iter().all(|key| {
                prefixes
                    .iter()
                    .any(|prefix| key.as_ref().starts_with(prefix.as_str()))
            })
    }

    /// Decides whether `packet` goes through the local cache.
    ///
    /// Only active policies and packets marked `WITH_CLIENT_SIDE_CACHE` that
    /// carry keys are considered. Opt-in tracking needs `CLIENT CACHING YES`
    /// before a cached read; opt-out tracking needs `CLIENT CACHING NO`
    /// before an excluded one.
    pub fn before_command(&self, packet: &CommandPacket) -> CacheDecision {
        if self.state() != CachingState::Active
            || !packet.has_mode(CommandMode::WITH_CLIENT_SIDE_CACHE)
        {
            return CacheDecision::BYPASS;
        }
        let keys: Vec<_> = packet.keys().collect();
        if keys.is_empty() {
            return CacheDecision::BYPASS;
        }

        match self.options.mode {
            CachingMode::Broadcasting => CacheDecision {
                cacheable: self.match_broadcast(&keys),
                prelude: None,
            },
            CachingMode::Default => {
                let matched = self.match_default(&keys);
                if !self.allow.is_empty() {
                    let cacheable = matched == MatchResult::INCLUDE;
                    CacheDecision {
                        cacheable,
                        prelude: cacheable.then(|| commands::client_caching(true)),
                    }
                } else if matched.contains(MatchResult::EXCLUDE) {
                    CacheDecision {
                        cacheable: false,
                        prelude: (!self.deny.is_empty()).then(|| commands::client_caching(false)),
                    }
                } else {
                    CacheDecision {
                        cacheable: true,
                        prelude: None,
                    }
                }
            }
        }
    }

    /// Routes a message from the redirect connection; `true` when it was an
    /// invalidation.
    pub fn handle_message(&self, value: &Value) -> bool {
        match Invalidation::parse(value) {
            Some(invalidation) => {
                invalidation.apply(&self.store);
                true
            }
            None => false,
        }
    }

    /// Stops caching and drops every cached reply.
    pub fn dispose(&self) {
        self.state
            .store(CachingState::Disposed as u8, Ordering::Release);
        self.store.clear();
    }
}

/// `CLIENT TRACKING ON REDIRECT <id> [BCAST [PREFIX p]...] [OPTIN|OPTOUT] [NOLOOP]`
pub fn build_tracking_command(options: &CachingOptions, redirect_id: i64) -> CommandPacket {
    let mut packet = commands::client_tracking(true).arg("REDIRECT").arg(redirect_id);
    match options.mode {
        CachingMode::Broadcasting => {
            packet = packet.arg("BCAST");
            for prefix in &options.prefixes {
                packet = packet.arg("PREFIX").arg(prefix);
            }
        }
        CachingMode::Default => {
            packet = packet
                .arg_if(!options.key_patterns.is_empty(), "OPTIN")
                .arg_if(!options.without_key_patterns.is_empty(), "OPTOUT");
        }
    }
    packet.arg_if(options.noloop, "NOLOOP")
}
