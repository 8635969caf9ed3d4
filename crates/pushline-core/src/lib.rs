//! pushline-core - Protocol types and pure decode logic
//!
//! This crate holds everything about the wire protocol that can be expressed
//! without I/O: the stream vocabulary and message classification, the
//! incremental field codec, subscription modes, and the item-update event
//! model. The HTTP client built on top of it lives in `pushline-client`.

pub mod codec;
pub mod error;
pub mod models;
pub mod protocol;

pub use codec::decode_field;
pub use error::{ProtocolError, ProtocolResult};
pub use models::*;
pub use protocol::{StreamMessage, UpdateLine};
