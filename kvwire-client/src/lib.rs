//! # kvwire Sync Client
//!
//! Purpose: Decode RESP2/RESP3 replies incrementally, project them into the
//! shape each command declares, and optionally serve repeated reads from a
//! server-assisted local cache.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Resumable Decoding**: Partial frames report "need more data" and the
//!    caller retries once more bytes arrive.
//! 3. **Declared Shapes**: Every command names its reply shape with a
//!    `ResultType`; RESP2 and RESP3 renderings project to the same value.
//! 4. **Tracked Caching**: Locally cached replies are dropped on server
//!    invalidation pushes.

pub mod caching;
pub mod commands;
pub mod convert;
pub mod model;
pub mod resp;

mod client;
mod pool;
mod reply;

pub use caching::{CachingMode, CachingOptions, CachingState, ClientSideCaching};
pub use client::{ClientConfig, KVClient};
pub use pool::{ConnectionPool, ErrorHook, PoolConfig};
pub use reply::{enum_from_reply, FromReply, Reply, ReplyEnum};
