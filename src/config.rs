use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::database::PoolConfig;
use crate::logging::{LogConfig, LogFormat, LogLevel};
use crate::realtime::{EngineConfig, HeartbeatConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "eventcast")]
#[command(about = "Real-time event distribution over Server-Sent Events", long_about = None)]
pub struct Config {
    /// Listen host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// PostgreSQL connection URL. Events and memberships are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum pooled database connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "20")]
    pub database_max_connections: usize,

    /// Seconds to wait for a database connection
    #[arg(long, env = "DATABASE_CONNECT_TIMEOUT_SECS", default_value = "2")]
    pub database_connect_timeout_secs: u64,

    /// Validate pooled connections before handing them out
    #[arg(long, env = "DATABASE_TEST_BEFORE_ACQUIRE", default_value = "false")]
    pub database_test_before_acquire: bool,

    /// Seconds between heartbeat sweeps, 0 disables them
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Frames a slow client may have queued before it is dropped
    #[arg(long, env = "SINK_BUFFER_SIZE", default_value = "1024")]
    pub sink_buffer_size: usize,

    /// Live events held per reconnecting client while it catches up
    #[arg(long, env = "REPLAY_BUFFER_LIMIT", default_value = "10000")]
    pub replay_buffer_limit: usize,

    /// Reconnect delay sent to clients as the first frame of a stream
    #[arg(long, env = "SSE_RETRY_MS")]
    pub sse_retry_ms: Option<u64>,

    /// trace, debug, info, warn, error or off
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Config {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", addr, e))
    }

    pub fn pool_config(&self) -> Option<PoolConfig> {
        let url = self.database_url.as_deref().filter(|url| !url.is_empty())?;
        Some(PoolConfig {
            max_size: self.database_max_connections,
            connect_timeout_secs: self.database_connect_timeout_secs,
            test_before_acquire: self.database_test_before_acquire,
            ..PoolConfig::with_url(url)
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sink_buffer_size: self.sink_buffer_size,
            replay_buffer_limit: self.replay_buffer_limit,
            sse_retry_ms: self.sse_retry_ms,
            ..EngineConfig::default()
        }
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(self.heartbeat_interval_secs),
            enabled: self.heartbeat_interval_secs > 0,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            format: self.log_format,
            ..LogConfig::default()
        }
    }
}
