/// Fixed transport event name every envelope travels under
pub const ACTION_EVENT: &str = "action";

/// Prefix for forum room channels, keeps them apart from per-connection channels
pub const FORUM_PREFIX: &str = "FORUM:";

/// Sender label used on a connection's own echo of an event
pub const SELF_LABEL: &str = "you";

/// Session lifetime in seconds (30 minutes), refreshed on every login/update
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 30;

/// Minimum gap between two reaction notifications for the same pair
pub const REACTION_THROTTLE_SECS: u64 = 60;

/// Minimum gap between two direct-message notifications for the same pair
pub const DM_THROTTLE_SECS: u64 = 60 * 20;

/// chrono rendering of `MMMM D/YY, h:mma`
pub const MESSAGE_TIME_FORMAT: &str = "%B %-d/%y, %-I:%M%P";

/// Locale assumed when the handshake does not carry one
pub const DEFAULT_LOCALE: &str = "en-us";

/// Default app identifier stored on sessions
pub const DEFAULT_APP_NAME: &str = "murmurChat";

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 7743;
