//! # murmur-shared
//!
//! Wire protocol and identifiers shared by the relay and its clients:
//! envelopes and action types, typed ids, delivery routes and constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientAction, Dispatch, Envelope, ServerAction};
pub use types::{ConnectionId, RoomId, Route, UserId, UserStatus};
