//! Protocol constants shared by every MoltSpeak component.

/// Current protocol version, carried in every message's `v` field.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Key under which envelopes declare the protocol version.
pub const ENVELOPE_MARKER: &str = "moltspeak";

/// Default maximum accepted message age (5 minutes).
pub const DEFAULT_REPLAY_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Size limits in bytes of serialized UTF-8 JSON.
///
/// Only [`SizeLimits::SINGLE_MESSAGE`] is enforced by validation; the
/// others are declared for transports and session bookkeeping.
pub struct SizeLimits;

impl SizeLimits {
    pub const SINGLE_MESSAGE: usize = 1024 * 1024;
    pub const BATCH_MESSAGE: usize = 10 * 1024 * 1024;
    pub const STREAM_CHUNK: usize = 64 * 1024;
    pub const SESSION_TOTAL: usize = 100 * 1024 * 1024;
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
