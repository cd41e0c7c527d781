/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running on the NAS itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8888`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Applies to the
    /// response head only, so event streams stay open.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for a running restart session to exit
    /// (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Event stream poll interval in milliseconds; an idle interval produces
    /// a heartbeat (default: `1000`).
    pub stream_poll_millis: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `HOST`                  | `0.0.0.0`                |
    /// | `PORT`                  | `8888`                   |
    /// | `CORS_ORIGINS`          | `http://localhost:8888`  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                     |
    /// | `STREAM_POLL_MILLIS`    | `1000`                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8888".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:8888".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let stream_poll_millis: u64 = std::env::var("STREAM_POLL_MILLIS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("STREAM_POLL_MILLIS must be a valid u64");
        assert!(stream_poll_millis > 0, "STREAM_POLL_MILLIS must be greater than zero");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            stream_poll_millis,
        }
    }
}
