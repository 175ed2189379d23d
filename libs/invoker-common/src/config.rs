// Process configuration for the invoker binaries
// Everything comes from the environment, optionally seeded from a .env file

use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REGISTRY_SCHEME: &str = "https";
pub const DEFAULT_CONTENT_PREVIEW_CHARS: usize = 100;
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 10;

/// Where structured logs are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogWriteMode {
    Console,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of DEBUG, INFO, WARN, ERROR (anything else means DEBUG)
    pub level: String,
    pub write_mode: LogWriteMode,
    /// Directory prefix for file mode, e.g. `logs/`
    pub path: String,
}

impl LogConfig {
    /// Level as a tracing filter directive
    pub fn filter_directive(&self) -> &'static str {
        match self.level.to_uppercase().as_str() {
            "ERROR" => "error",
            "WARN" => "warn",
            "INFO" => "info",
            _ => "debug",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Registry host prepended to every image name (may be empty)
    pub registry: String,
    pub registry_scheme: String,
    /// Number of body characters copied into audit events
    pub content_preview_chars: usize,
    pub invocation_timeout: Duration,
    /// Grace period for removing a container after the invocation deadline passed
    pub cleanup_timeout: Duration,
    pub log: LogConfig,
}

impl Config {
    /// Load from the process environment, reading `.env` first if it exists
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let write_mode = match get("LOG_WRITE_MODE", "console").to_lowercase().as_str() {
            "file" => LogWriteMode::File,
            _ => LogWriteMode::Console,
        };

        Self {
            listen_addr: normalize_listen_addr(&get("API_PORT", DEFAULT_LISTEN_ADDR)),
            registry: get("REGISTRY", ""),
            registry_scheme: get("REGISTRY_SCHEME", DEFAULT_REGISTRY_SCHEME),
            content_preview_chars: number(
                "CONTENT_LENGTH",
                DEFAULT_CONTENT_PREVIEW_CHARS as u64,
            ) as usize,
            invocation_timeout: Duration::from_secs(number(
                "INVOCATION_TIMEOUT_SECS",
                DEFAULT_INVOCATION_TIMEOUT_SECS,
            )),
            cleanup_timeout: Duration::from_secs(number(
                "CLEANUP_TIMEOUT_SECS",
                DEFAULT_CLEANUP_TIMEOUT_SECS,
            )),
            log: LogConfig {
                level: get("LOG_LEVEL", "DEBUG"),
                write_mode,
                path: get("LOG_PATH", "logs/"),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Accepts `:8080` style ports as well as full socket addresses
fn normalize_listen_addr(value: &str) -> String {
    let value = value.trim();
    if let Some(port) = value.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        format!("0.0.0.0:{}", value)
    } else {
        value.to_string()
    }
}
