//! Constants for umlgate API
//!
//! Defaults for every environment-configurable setting live here.

// ============================================================================
// CACHE
// ============================================================================

/// Memory tier TTL in seconds (1 hour)
pub const DEFAULT_MEMORY_TTL_SECS: u64 = 3600;

/// Disk tier TTL in seconds (24 hours)
pub const DEFAULT_DISK_TTL_SECS: u64 = 86_400;

/// Maximum number of entries held by the memory tier
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 100;

/// Disk tier directory
pub const DEFAULT_CACHE_DIR: &str = ".cache/analysis";

// ============================================================================
// UPLOADS
// ============================================================================

/// Directory for temporary archive uploads
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Upload size limit in bytes (50 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Room for multipart boundaries and form fields on top of the file itself
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

// ============================================================================
// ANALYSIS SERVICE
// ============================================================================

/// Base URL of the analysis service
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:5000";

/// Per-call upstream timeout in seconds
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 120;

/// Reachability probe timeout in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;

/// How long a freshly started service has to start listening, in milliseconds
pub const DEFAULT_STARTUP_PROBE_TIMEOUT_MS: u64 = 15_000;

/// Interval between readiness probes while the service starts
pub const STARTUP_POLL_INTERVAL_MS: u64 = 250;

/// A child that exits within this window counts as a failed start
pub const SPAWN_GRACE_MS: u64 = 300;

/// Interpreters tried in order after `UMLGATE_PYTHON`
pub const INTERPRETER_CANDIDATES: &[&str] = &["python3", "python", "py"];

/// Service scripts tried in order after `UMLGATE_PARSER_SCRIPT`
pub const SCRIPT_CANDIDATES: &[&str] = &[
    "python-parser/app.py",
    "../python-parser/app.py",
    "parser/app.py",
];

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Rate limit window in seconds
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Requests allowed per client per window
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 30;

/// Idle client limiters are swept once every this many limited requests
pub const RATE_LIMIT_PRUNE_EVERY: u64 = 1024;

// ============================================================================
// HEADERS
// ============================================================================

/// Header carrying the admin token
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;
