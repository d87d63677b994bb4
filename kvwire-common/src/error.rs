//! # Error Taxonomy
//!
//! Purpose: Give every layer of the client one error type so a failure can
//! travel from the decoder, through the projector, to the caller unchanged.
//!
//! ## Design Principles
//! 1. **One Server Kind**: Simple (`-`) and bulk (`!`) error replies collapse
//!    into `KvError::Server`, carrying the server text verbatim.
//! 2. **Need-More-Data Is Not Here**: Partial buffers are an `Ok(None)`
//!    outcome of the decoder, never an error variant.
//! 3. **Fatal Configuration**: Policy errors are raised once, at activation,
//!    and the owner tears its connection down.

use thiserror::Error;

/// Fallback text for error replies whose payload is empty.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Result alias used across the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by the decoder, projector, caching layer and transport.
#[derive(Debug, Error)]
pub enum KvError {
    /// Error reply sent by the server.
    #[error("{0}")]
    Server(String),

    /// Malformed wire data or an unknown type tag.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The decoded value does not have the shape the caller asked for.
    #[error("format error: expected {expected}, got {actual}")]
    Format { expected: String, actual: String },

    /// The requested result type has no projection.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Invalid client-side caching or client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,

    /// The peer closed the connection before a full reply arrived.
    #[error("connection closed")]
    ConnectionClosed,
}

impl KvError {
    /// Builds a server error, substituting the fallback for empty payloads.
    pub fn server(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            KvError::Server(UNKNOWN_ERROR.to_string())
        } else {
            KvError::Server(message)
        }
    }

    /// Builds a format error from an expected shape and the observed kind.
    pub fn format(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        KvError::Format {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns true when the server rejected the command.
    pub fn is_server(&self) -> bool {
        matches!(self, KvError::Server(_))
    }

    /// Returns true for errors that leave the connection in an unknown state.
    ///
    /// Pooled connections hitting one of these must not be reused.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            KvError::Io(_) | KvError::Protocol(_) | KvError::ConnectionClosed
        )
    }
}
