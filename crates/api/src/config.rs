use gazer_core::env;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on post-shutdown cleanup in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 32 MiB). Input
    /// images arrive base64-encoded, a third larger than the file.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `MAX_BODY_BYTES`        | `33554432`              |
    pub fn from_env() -> Self {
        Self {
            host: env::string_or("HOST", "0.0.0.0"),
            port: env::parse_or("PORT", 3000),
            cors_origins: env::list_or("CORS_ORIGINS", &["http://localhost:5173"]),
            request_timeout_secs: env::parse_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env::parse_or("SHUTDOWN_TIMEOUT_SECS", 30),
            max_body_bytes: env::parse_or("MAX_BODY_BYTES", 32 * 1024 * 1024),
        }
    }
}
