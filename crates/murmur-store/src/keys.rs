use std::fmt;
use std::time::Duration;

use murmur_shared::constants::{DM_THROTTLE_SECS, REACTION_THROTTLE_SECS};
use murmur_shared::{ConnectionId, UserId};

/// Kind of push notification being rate-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleClass {
    Reaction,
    DirectMessage,
}

impl ThrottleClass {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Reaction => Duration::from_secs(REACTION_THROTTLE_SECS),
            Self::DirectMessage => Duration::from_secs(DM_THROTTLE_SECS),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::Reaction => "reactionNotification",
            Self::DirectMessage => "dmNotification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub class: ThrottleClass,
    pub recipient: UserId,
    pub sender: UserId,
}

impl ThrottleKey {
    pub fn new(class: ThrottleClass, recipient: UserId, sender: UserId) -> Self {
        Self {
            class,
            recipient,
            sender,
        }
    }

    pub fn reaction(recipient: UserId, sender: UserId) -> Self {
        Self::new(ThrottleClass::Reaction, recipient, sender)
    }

    pub fn direct_message(recipient: UserId, sender: UserId) -> Self {
        Self::new(ThrottleClass::DirectMessage, recipient, sender)
    }
}

/// Every key the store writes. Rendered to a string only at the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// `userSockets:<connectionId>` -> user id
    UserSocket(ConnectionId),
    /// `users:<userId>` -> session record
    User(UserId),
    /// `<class>Throttles:<recipient>:<sender>` -> marker
    Throttle(ThrottleKey),
}

impl StoreKey {
    pub fn to_key_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserSocket(connection) => write!(f, "userSockets:{}", connection),
            Self::User(user) => write!(f, "users:{}", user),
            Self::Throttle(key) => write!(
                f,
                "{}Throttles:{}:{}",
                key.class.prefix(),
                key.recipient,
                key.sender
            ),
        }
    }
}

impl From<ThrottleKey> for StoreKey {
    fn from(key: ThrottleKey) -> Self {
        Self::Throttle(key)
    }
}
