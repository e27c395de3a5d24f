use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::ws::Heartbeat;

/// Huddle presence and messaging server
///
/// Only flags given on the command line are serialized, so unset flags
/// leave the file and environment layers alone.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "huddle-server", version, about = "Huddle presence and messaging server")]
pub struct CliArgs {
    /// Port to listen on [default: 3000]
    #[arg(long, env = "HUDDLE_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "HUDDLE_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./huddle.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "HUDDLE_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key) [default: ./data]
    #[arg(long, env = "HUDDLE_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server configuration after layering.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    /// Seconds between WebSocket pings
    pub ping_interval_secs: u64,
    /// Seconds to wait for a pong before closing the connection
    pub pong_timeout_secs: u64,
    /// Engine policies (loaded from [engine] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let heartbeat = Heartbeat::default();
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            ping_interval_secs: heartbeat.interval.as_secs(),
            pong_timeout_secs: heartbeat.timeout.as_secs(),
            engine: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HUDDLE_*) < CLI args
    pub fn load(cli: &CliArgs) -> Result<Self, figment::Error> {
        Self::figment(cli, &cli.config).extract()
    }

    /// Nested keys use a double underscore, e.g. `HUDDLE_ENGINE__NOTIFY_SELF`.
    fn figment(cli: &CliArgs, config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("HUDDLE_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.unwrap_or_default()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Huddle Server Configuration
# Place this file at ./huddle.toml or specify with --config <path>
# All settings can be overridden via environment variables (HUDDLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# WebSocket heartbeat: ping every interval, close if no pong within the timeout
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Engine ----
# [engine]

# Deliver a user's own channel join/leave announcement to their other sessions
# notify_self = false

# Drop all channel memberships when a user's last connection closes
# leave_channels_on_disconnect = false
"#
    .to_string()
}
