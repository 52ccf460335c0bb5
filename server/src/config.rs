use std::path::PathBuf;

/// Store server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    /// Upper bound on a serialized document; larger writes are rejected
    pub max_document_bytes: usize,
    /// Capacity of the change fan-out channel (per subscriber lag budget)
    pub broadcast_capacity: usize,
    /// Browser origins allowed to open a socket. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Snapshot file loaded at startup and flushed while running
    pub data_file: Option<PathBuf>,
    pub flush_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9002".to_string(),
            max_connections: 256,
            max_document_bytes: 256 * 1024,
            broadcast_capacity: 256,
            allowed_origins: Vec::new(),
            data_file: None,
            flush_interval_ms: 2_000,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `QUIZDUEL_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("QUIZDUEL_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(v) = std::env::var("QUIZDUEL_MAX_CONNECTIONS") {
            config.max_connections = v
                .parse()
                .map_err(|_| format!("QUIZDUEL_MAX_CONNECTIONS is not a number: {v}"))?;
        }
        if let Ok(v) = std::env::var("QUIZDUEL_MAX_DOCUMENT_BYTES") {
            config.max_document_bytes = v
                .parse()
                .map_err(|_| format!("QUIZDUEL_MAX_DOCUMENT_BYTES is not a number: {v}"))?;
        }
        if let Ok(v) = std::env::var("QUIZDUEL_ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&v);
        }
        if let Ok(path) = std::env::var("QUIZDUEL_DATA_FILE") {
            if !path.is_empty() {
                config.data_file = Some(PathBuf::from(path));
            }
        }
        if let Ok(v) = std::env::var("QUIZDUEL_FLUSH_INTERVAL_MS") {
            config.flush_interval_ms = v
                .parse()
                .map_err(|_| format!("QUIZDUEL_FLUSH_INTERVAL_MS is not a number: {v}"))?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("listen_addr is not a socket address: {}", self.listen_addr));
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_document_bytes < 64 {
            return Err("max_document_bytes must be >= 64".to_string());
        }
        if self.broadcast_capacity == 0 {
            return Err("broadcast_capacity must be > 0".to_string());
        }
        if self.data_file.is_some() && self.flush_interval_ms == 0 {
            return Err("flush_interval_ms must be > 0 when data_file is set".to_string());
        }
        Ok(())
    }
}

/// Comma separated list, blanks dropped.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

/// Non-browser clients send no Origin header and are always allowed.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    match origin {
        _ if allowed.is_empty() => true,
        None => true,
        Some(o) => allowed.iter().any(|a| a == o.trim_end_matches('/')),
    }
}
