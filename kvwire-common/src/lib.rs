// kvwire-common - Shared types and protocol definitions for kvwire
//
// This crate defines the reply value tree, command packets and the result
// type descriptors shared by the decoder, projector and caching layer.

pub mod error;
pub mod protocol;
pub mod result_type;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use result_type::*;
pub use types::*;
