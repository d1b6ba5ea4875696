//! Server configuration from environment variables.
//!
//! Every knob has a default; unparsable values fall back to it.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_SETTINGS_PATH: &str = "data/settings.json";
const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_SETTINGS_FLUSH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_TUNNEL_PROGRAM: &str = "cloudflared";
const DEFAULT_TUNNEL_START_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: String,
    /// Durable settings document.
    pub settings_path: PathBuf,
    /// Show document loaded at startup. No show means unbounded positions.
    pub show_path: Option<PathBuf>,
    /// Static frontend served as fallback.
    pub static_dir: Option<PathBuf>,
    /// Outbound frame queue per connection.
    pub client_queue_capacity: usize,
    /// Bound on the final settings write at shutdown.
    pub settings_flush_timeout: Duration,
    pub tunnel_program: String,
    pub tunnel_start_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: DEFAULT_BIND_ADDR.into(),
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            show_path: None,
            static_dir: None,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            settings_flush_timeout: Duration::from_secs(DEFAULT_SETTINGS_FLUSH_TIMEOUT_SECS),
            tunnel_program: DEFAULT_TUNNEL_PROGRAM.into(),
            tunnel_start_timeout: Duration::from_secs(DEFAULT_TUNNEL_START_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            bind_addr: env_string("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            settings_path: env_string("SETTINGS_PATH").map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH), PathBuf::from),
            show_path: env_string("SHOW_PATH").map(PathBuf::from),
            static_dir: env_string("STATIC_DIR").map(PathBuf::from),
            client_queue_capacity: env_parse("CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE_CAPACITY).max(1),
            settings_flush_timeout: Duration::from_secs(env_parse(
                "SETTINGS_FLUSH_TIMEOUT_SECS",
                DEFAULT_SETTINGS_FLUSH_TIMEOUT_SECS,
            )),
            tunnel_program: env_string("TUNNEL_PROGRAM").unwrap_or_else(|| DEFAULT_TUNNEL_PROGRAM.into()),
            tunnel_start_timeout: Duration::from_secs(env_parse(
                "TUNNEL_START_TIMEOUT_SECS",
                DEFAULT_TUNNEL_START_TIMEOUT_SECS,
            )),
        }
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
