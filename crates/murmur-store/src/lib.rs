//! # murmur-store
//!
//! Session storage for the relay fleet.
//!
//! A session maps a live connection to the user behind it. Records live
//! under two keys written with the same TTL:
//!
//! - `userSockets:<connectionId>` holding the user id
//! - `users:<userId>` holding the JSON session record
//!
//! The same key space carries short-lived throttle markers. Two backends
//! implement [`SessionStore`]: [`MemorySessionStore`] for a single relay and
//! tests, [`RedisSessionStore`] for a fleet sharing one Redis.

pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod session;

mod error;

pub use error::{Result, StoreError};
pub use keys::{StoreKey, ThrottleClass, ThrottleKey};
pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use session::{SessionRecord, SessionStore};
