//! Process configuration loaded from environment variables (§6, §9 ambient
//! configuration layering: env-var only, no config file layer).

use crate::errors::PollerError;
use base64::Engine as _;
use std::path::PathBuf;

const ENV_ENCRYPTION_KEY: &str = "POLLER_ENCRYPTION_KEY";
const ENV_DB_PATH: &str = "POLLER_DB_PATH";
const ENV_LOG_LEVEL: &str = "POLLER_LOG_LEVEL";
const ENV_DEFAULT_WEBHOOK_URL: &str = "POLLER_DEFAULT_WEBHOOK_URL";

const DEFAULT_DB_PATH: &str = "data/poller.db";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Process-wide configuration. `encryption_key` is the 32-byte AES-256 key
/// backing the field cipher; it is never logged or displayed.
#[derive(Clone)]
pub struct Config {
    pub encryption_key: [u8; 32],
    pub db_path: PathBuf,
    pub log_level: String,
    pub default_webhook_url: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("encryption_key", &"<redacted>")
            .field("db_path", &self.db_path)
            .field("log_level", &self.log_level)
            .field("default_webhook_url", &self.default_webhook_url)
            .finish()
    }
}

impl Config {
    /// Loads configuration from the process environment. `POLLER_ENCRYPTION_KEY`
    /// is required and must base64-decode to exactly 32 bytes; every other
    /// variable has a default.
    pub fn from_env() -> Result<Self, PollerError> {
        let raw_key = std::env::var(ENV_ENCRYPTION_KEY)
            .map_err(|_| PollerError::config(ENV_ENCRYPTION_KEY, "missing"))?;
        let encryption_key = decode_key(&raw_key)?;

        let db_path = std::env::var(ENV_DB_PATH)
            .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
            .into();

        let log_level =
            std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let default_webhook_url = std::env::var(ENV_DEFAULT_WEBHOOK_URL).ok();

        Ok(Self {
            encryption_key,
            db_path,
            log_level,
            default_webhook_url,
        })
    }
}

fn decode_key(raw: &str) -> Result<[u8; 32], PollerError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| PollerError::config(ENV_ENCRYPTION_KEY, format!("invalid base64: {e}")))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        PollerError::config(
            ENV_ENCRYPTION_KEY,
            format!("expected 32 bytes after base64 decode, got {len}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        std::env::remove_var(ENV_ENCRYPTION_KEY);
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_LOG_LEVEL);
        std::env::remove_var(ENV_DEFAULT_WEBHOOK_URL);
    }

    #[test]
    fn missing_key_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let err = Config::from_env().expect_err("should fail without key");
        assert!(matches!(err, PollerError::Config { .. }));
    }

    #[test]
    fn invalid_length_key_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        std::env::set_var(ENV_ENCRYPTION_KEY, short);
        let err = Config::from_env().expect_err("should fail with wrong length key");
        assert!(matches!(err, PollerError::Config { .. }));
        clear_env();
    }

    #[test]
    fn valid_key_fills_in_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        std::env::set_var(ENV_ENCRYPTION_KEY, key);
        let cfg = Config::from_env().expect("valid key should load");
        assert_eq!(cfg.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(cfg.log_level, DEFAULT_LOG_LEVEL);
        assert!(cfg.default_webhook_url.is_none());
        clear_env();
    }
}
