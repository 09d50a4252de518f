pub mod api;
pub mod envelope;
pub mod events;
pub mod models;

/// Milliseconds since the Unix epoch, local clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
