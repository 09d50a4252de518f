use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use charmlink_engine::EngineConfig;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub ledger_url: String,
    pub transport_url: String,
    pub engine: EngineConfig,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let username = std::env::var("CHARMLINK_USERNAME")
            .context("CHARMLINK_USERNAME must be set to this node's display name")?;

        let engine = EngineConfig {
            application: var_or("CHARMLINK_APPLICATION", "charmlink-chat"),
            username,
            poll_interval: Duration::from_secs(parse_var("CHARMLINK_POLL_INTERVAL_SECS", 10)?),
            presence_timeout: Duration::from_secs(parse_var("CHARMLINK_PRESENCE_TIMEOUT_SECS", 5)?),
            pending_timeout: Duration::from_secs(parse_var::<u64>("CHARMLINK_PENDING_TIMEOUT_HOURS", 24)? * 3600),
            notify_lease: Duration::from_secs(parse_var("CHARMLINK_NOTIFY_LEASE_SECS", 60)?),
        };

        Ok(Self {
            db_path: PathBuf::from(var_or("CHARMLINK_DB_PATH", "charmlink.db")),
            host: var_or("CHARMLINK_HOST", "127.0.0.1"),
            port: parse_var("CHARMLINK_PORT", 3300)?,
            ledger_url: trim_url(var_or("CHARMLINK_LEDGER_URL", "http://127.0.0.1:3400")),
            transport_url: trim_url(var_or("CHARMLINK_TRANSPORT_URL", "http://127.0.0.1:3500")),
            engine,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_dropped() {
        assert_eq!(trim_url("http://ledger:3400/".into()), "http://ledger:3400");
        assert_eq!(trim_url("http://ledger:3400".into()), "http://ledger:3400");
    }

    #[test]
    fn missing_numbers_fall_back() {
        let port: u16 = parse_var("CHARMLINK_TEST_UNSET_PORT", 3300).unwrap();
        assert_eq!(port, 3300);
    }
}
