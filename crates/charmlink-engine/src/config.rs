use std::time::Duration;

/// Knobs shared by every component of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Channel name carried in every envelope's `application` field.
    pub application: String,
    /// Our display name, sent as `username`.
    pub username: String,
    /// Reconciliation cycle period.
    pub poll_interval: Duration,
    /// How long a presence check waits for a pong.
    pub presence_timeout: Duration,
    /// Pending transfers older than this with no approval-queue entry fail.
    pub pending_timeout: Duration,
    /// How long a claimed transfer notification may stay unfinished before
    /// another cycle takes it over.
    pub notify_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application: "charmlink-chat".into(),
            username: "anonymous".into(),
            poll_interval: Duration::from_secs(10),
            presence_timeout: Duration::from_secs(5),
            pending_timeout: Duration::from_secs(24 * 3600),
            notify_lease: Duration::from_secs(60),
        }
    }
}
