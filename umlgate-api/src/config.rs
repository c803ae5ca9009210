//! API Configuration Module
//!
//! Cache sizing, upload limits, the analysis service location, rate limiting
//! and the admin token. Configuration is loaded from `UMLGATE_*` environment
//! variables with defaults suitable for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::constants::*;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Cache
    // ========================================================================
    pub memory_ttl: Duration,
    pub disk_ttl: Duration,
    pub memory_max_entries: usize,
    pub cache_dir: PathBuf,

    // ========================================================================
    // Uploads
    // ========================================================================
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,

    // ========================================================================
    // Analysis service
    // ========================================================================
    /// Base URL, e.g. "http://localhost:5000".
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub probe_timeout: Duration,
    pub startup_probe_timeout: Duration,
    /// Start the analysis service locally when it is unreachable.
    pub autostart: bool,

    // ========================================================================
    // Rate limiting
    // ========================================================================
    pub rate_limit_enabled: bool,
    pub rate_limit_window: Duration,
    /// Requests allowed per client per window.
    pub rate_limit_max: u32,
    /// Key clients by `x-forwarded-for` / `x-real-ip`. Only enable behind a
    /// proxy that overwrites these headers.
    pub trust_proxy_headers: bool,

    // ========================================================================
    // CORS
    // ========================================================================
    /// Allowed origins. Empty allows any origin.
    pub cors_origins: Vec<String>,

    // ========================================================================
    // Admin
    // ========================================================================
    /// Admin routes are only mounted when this is set.
    pub admin_token: Option<SecretString>,

    // ========================================================================
    // Server
    // ========================================================================
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            memory_ttl: Duration::from_secs(DEFAULT_MEMORY_TTL_SECS),
            disk_ttl: Duration::from_secs(DEFAULT_DISK_TTL_SECS),
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),

            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,

            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            startup_probe_timeout: Duration::from_millis(DEFAULT_STARTUP_PROBE_TIMEOUT_MS),
            autostart: true,

            rate_limit_enabled: true,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            trust_proxy_headers: false,

            cors_origins: Vec::new(),

            admin_token: None,

            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        })
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `UMLGATE_MEMORY_TTL_SECS`, `UMLGATE_DISK_TTL_SECS`, `UMLGATE_MEMORY_MAX_ENTRIES`
    /// - `UMLGATE_CACHE_DIR`, `UMLGATE_UPLOAD_DIR`, `UMLGATE_MAX_UPLOAD_BYTES`
    /// - `UMLGATE_UPSTREAM_URL`, `UMLGATE_UPSTREAM_TIMEOUT_SECS`
    /// - `UMLGATE_PROBE_TIMEOUT_MS`, `UMLGATE_STARTUP_PROBE_TIMEOUT_MS`, `UMLGATE_AUTOSTART`
    /// - `UMLGATE_RATE_LIMIT_ENABLED`, `UMLGATE_RATE_LIMIT_WINDOW_SECS`, `UMLGATE_RATE_LIMIT_MAX`
    /// - `UMLGATE_TRUST_PROXY_HEADERS`: key rate limits by forwarded client IP
    /// - `UMLGATE_CORS_ORIGINS`: comma-separated, empty allows any origin
    /// - `UMLGATE_ADMIN_TOKEN` (blank means unset)
    /// - `UMLGATE_BIND`, `PORT` or `UMLGATE_PORT`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let admin_token = std::env::var("UMLGATE_ADMIN_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| SecretString::from(s.trim().to_string()));

        Self {
            memory_ttl: env_parse("UMLGATE_MEMORY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.memory_ttl),
            disk_ttl: env_parse("UMLGATE_DISK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.disk_ttl),
            memory_max_entries: env_parse("UMLGATE_MEMORY_MAX_ENTRIES")
                .unwrap_or(defaults.memory_max_entries),
            cache_dir: std::env::var("UMLGATE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),

            upload_dir: std::env::var("UMLGATE_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_upload_bytes: env_parse("UMLGATE_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),

            upstream_url: std::env::var("UMLGATE_UPSTREAM_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream_url),
            upstream_timeout: env_parse("UMLGATE_UPSTREAM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            probe_timeout: env_parse("UMLGATE_PROBE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            startup_probe_timeout: env_parse("UMLGATE_STARTUP_PROBE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.startup_probe_timeout),
            autostart: env_flag("UMLGATE_AUTOSTART", defaults.autostart),

            rate_limit_enabled: env_flag("UMLGATE_RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            rate_limit_window: env_parse("UMLGATE_RATE_LIMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env_parse("UMLGATE_RATE_LIMIT_MAX").unwrap_or(defaults.rate_limit_max),
            trust_proxy_headers: env_flag(
                "UMLGATE_TRUST_PROXY_HEADERS",
                defaults.trust_proxy_headers,
            ),

            cors_origins: std::env::var("UMLGATE_CORS_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            admin_token,

            bind: std::env::var("UMLGATE_BIND").unwrap_or(defaults.bind),
            port: env_parse("PORT")
                .or_else(|| env_parse("UMLGATE_PORT"))
                .unwrap_or(defaults.port),
        }
    }

    // ========================================================================
    // Builder-style setters
    // ========================================================================

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit_enabled = true;
        self.rate_limit_max = max;
        self.rate_limit_window = window;
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit_enabled = false;
        self
    }

    pub fn with_trusted_proxy_headers(mut self) -> Self {
        self.trust_proxy_headers = true;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    // ========================================================================
    // Derived values
    // ========================================================================

    pub fn admin_enabled(&self) -> bool {
        self.admin_token
            .as_ref()
            .is_some_and(|token| !token.expose_secret().is_empty())
    }

    /// Socket address the server listens on.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::validation(format!("Invalid bind address {}: {}", addr, e))
        })
    }
}
