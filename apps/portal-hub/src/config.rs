use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub catalog_path: PathBuf,
    pub secrets_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_missed_multiple: u32,
    pub gate_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORTAL_HUB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5080),
            catalog_path: env::var("PORTAL_HUB_SPACES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("portal_spaces.toml")),
            secrets_dir: env::var("PORTAL_HUB_SECRETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("robot_secrets")),
            heartbeat_interval_secs: env::var("PORTAL_HUB_HEARTBEAT_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            heartbeat_missed_multiple: env::var("PORTAL_HUB_HEARTBEAT_MISSES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            gate_timeout_secs: env::var("PORTAL_HUB_GATE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// A session is declared dead once it has been silent for this long.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * self.heartbeat_missed_multiple as u64)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5080,
            catalog_path: PathBuf::from("portal_spaces.toml"),
            secrets_dir: PathBuf::from("robot_secrets"),
            heartbeat_interval_secs: 30,
            heartbeat_missed_multiple: 3,
            gate_timeout_secs: 5,
        }
    }
}
