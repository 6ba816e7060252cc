use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use xxhash_rust::xxh3::xxh3_64;

// ---------------------------------------------------------------------------
// Log Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" | "none" | "disabled" => Ok(Self::Off),
            other => Err(format!("unknown log level {:?}", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Log Config
// ---------------------------------------------------------------------------

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: LogLevel,
    pub format: LogFormat,
    /// Enable request logging (incoming request).
    pub log_request: bool,
    /// Enable response logging (outgoing response with status and duration).
    pub log_response: bool,
    /// Paths to skip logging for (e.g., health check endpoints).
    pub skip_paths: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            log_request: true,
            log_response: true,
            skip_paths: vec!["/health".to_string(), "/favicon.ico".to_string()],
        }
    }
}

impl LogConfig {
    pub fn should_skip_path(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p))
    }

    /// Directive used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> String {
        format!("{level},eventcast={level}", level = self.level)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level. Returns `false` if a subscriber was already installed.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.is_ok()
}

// ---------------------------------------------------------------------------
// Request logging
// ---------------------------------------------------------------------------

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Short, unique-enough id to correlate a request with its response line.
pub fn request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut seed = [0u8; 16];
    seed[..8].copy_from_slice(&nanos.to_le_bytes());
    seed[8..].copy_from_slice(&seq.to_le_bytes());
    format!("{:016x}", xxh3_64(&seed))
}

pub fn log_request(config: &LogConfig, method: &str, path: &str, request_id: &str) {
    if !config.log_request || config.should_skip_path(path) {
        return;
    }
    debug!(target: "request", request_id, method, path, "Incoming request");
}

pub fn log_response(
    config: &LogConfig,
    method: &str,
    path: &str,
    status: u16,
    duration_ms: f64,
    request_id: &str,
) {
    if !config.log_response || config.should_skip_path(path) {
        return;
    }
    match status {
        500..=u16::MAX => error!(
            target: "response",
            request_id,
            method,
            path,
            status,
            duration_ms,
            "Request failed"
        ),
        400..=499 => warn!(
            target: "response",
            request_id,
            method,
            path,
            status,
            duration_ms,
            "Request rejected"
        ),
        _ => info!(
            target: "response",
            request_id,
            method,
            path,
            status,
            duration_ms,
            "Request completed"
        ),
    }
}
