use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Courier realtime server
///
/// Command-line flags. Only flags that were actually given take part in the
/// layered config; anything left unset falls through to env, TOML or defaults.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "courier-server", version, about = "Courier presence and call relay server")]
pub struct Cli {
    /// Port to listen on (default: 8000)
    #[arg(long, env = "COURIER_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long, env = "COURIER_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./courier.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURIER_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) (default: ./data)
    #[arg(long, env = "COURIER_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Shared HS256 secret for access tokens. When unset, a random key is
    /// generated and stored in the data directory.
    #[arg(long, env = "COURIER_JWT_SECRET")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

/// Effective server configuration after layering.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// WebSocket connection settings ([ws] section in TOML)
    #[serde(default)]
    pub ws: WsConfig,
}

/// Keepalive and session limits for WebSocket connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Close connections that send no data frame for this many seconds.
    /// 0 disables the idle timeout (default).
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Maximum connections per call session. 0 means unbounded (default).
    #[serde(default)]
    pub max_call_participants: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            idle_timeout_secs: 0,
            max_call_participants: 0,
        }
    }
}

impl WsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn call_participant_limit(&self) -> Option<usize> {
        (self.max_call_participants > 0).then_some(self.max_call_participants)
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            ws: WsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("COURIER_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Server Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT,
# COURIER_WS__IDLE_TIMEOUT_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# HS256 secret used to sign access tokens.
# Leave unset to generate a random key in data_dir.
# jwt_secret = ""

# ---- WebSocket connections ----
# [ws]

# Server ping interval and pong deadline, in seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Close connections that send no data frames for this long (0 = never)
# idle_timeout_secs = 0

# Maximum connections per call session (0 = unbounded; calls are 2-party by convention)
# max_call_participants = 0
"#
    .to_string()
}
