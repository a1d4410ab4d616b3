//! Runtime configuration loaded from environment variables

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_MAX_USERNAME_LEN: usize = 64;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the HTTP/websocket server listens on
    pub bind_addr: SocketAddr,
    /// Maximum username length in characters
    pub max_username_len: usize,
    /// Upper bound for delivering one frame to one recipient
    pub send_timeout: Duration,
    /// Frames that may queue per connection before delivery waits
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl HubConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let bind_addr = env_parse::<SocketAddr>("CHAT_BIND_ADDR", None)
            .unwrap_or_else(|| HubConfig::default().bind_addr);
        let max_username_len = env_positive("CHAT_MAX_USERNAME_LEN", DEFAULT_MAX_USERNAME_LEN);
        let send_timeout_ms = env_positive("CHAT_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS);
        let outbound_buffer = env_positive("CHAT_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER);

        tracing::info!(
            %bind_addr,
            max_username_len,
            send_timeout_ms,
            outbound_buffer,
            "Hub config loaded"
        );

        Self {
            bind_addr,
            max_username_len,
            send_timeout: Duration::from_millis(send_timeout_ms),
            outbound_buffer,
        }
    }
}

/// Parse an env var, warning and falling back on garbage
fn env_parse<T: std::str::FromStr>(key: &str, default: Option<T>) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Like [`env_parse`] but zero is treated as invalid
fn env_positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default + Copy,
{
    match env_parse(key, Some(default)) {
        Some(v) if v != T::default() => v,
        _ => {
            tracing::warn!(key, "Value must be positive, using default");
            default
        }
    }
}
