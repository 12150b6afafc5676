//! The configuration contract the core accepts from its external
//! collaborators (spec §1, §6). This module does not load environment
//! variables or server-profile catalogs -- that is explicitly out of
//! scope -- it only defines and validates the shapes those collaborators
//! must hand the core.

use crate::error::BlackholioError;
use std::time::Duration;

/// One of the four SpacetimeDB server-language dialects the protocol
/// adapter set (spec §4.2) knows how to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerLanguage {
    Rust,
    Python,
    CSharp,
    Go,
}

impl ServerLanguage {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rust" => Some(ServerLanguage::Rust),
            "python" => Some(ServerLanguage::Python),
            "csharp" | "c#" => Some(ServerLanguage::CSharp),
            "go" | "golang" => Some(ServerLanguage::Go),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerLanguage::Rust => "rust",
            ServerLanguage::Python => "python",
            ServerLanguage::CSharp => "csharp",
            ServerLanguage::Go => "go",
        }
    }
}

pub const PROTOCOL_SUBPROTOCOL: &str = "v1.json.spacetimedb";

/// The fixed core table set subscribed to immediately after connecting
/// (spec §4.5 step 5). Per spec §9 Open Question (b), this list is
/// hard-coded rather than caller-supplied.
pub const CORE_TABLES: &[&str] = &["entity", "player", "circle", "food", "config"];

/// Endpoint descriptor (spec §3). Immutable after session construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub language: ServerLanguage,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub use_tls: bool,
}

impl Endpoint {
    pub fn new(language: ServerLanguage, host: impl Into<String>, port: u16, database_name: impl Into<String>) -> Self {
        Endpoint {
            language,
            host: host.into(),
            port,
            database_name: database_name.into(),
            use_tls: false,
        }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Validates `1 <= port <= 65535` (trivially true for `u16`, kept for
    /// symmetry with the source's explicit range check) and that `host`
    /// and `database_name` are non-empty.
    pub fn validate(&self) -> Result<(), BlackholioError> {
        if self.port == 0 {
            return Err(BlackholioError::server_configuration(
                format!("port must be in 1..=65535, got {}", self.port),
                "port",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(BlackholioError::server_configuration("host must not be empty", "host"));
        }
        if self.database_name.trim().is_empty() {
            return Err(BlackholioError::server_configuration(
                "database_name must not be empty",
                "database_name",
            ));
        }
        Ok(())
    }

    /// `ws[s]://<host>[:<port>]/v1/database/<database_name>/subscribe`
    pub fn websocket_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/v1/database/{}/subscribe",
            self.host, self.port, self.database_name
        )
    }

    pub fn credential_key(&self) -> String {
        format!("{}:{}", self.host, self.database_name)
    }
}

/// Protocol version drift the adapter registry is keyed on (spec §4.4,
/// §9 "Adapter registry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    V1_2,
    V2_0,
}

impl ProtocolVersion {
    /// Versions other than 1.2 fall back to the 1.2 adapter (spec §9).
    pub fn adapter_version(self) -> ProtocolVersion {
        ProtocolVersion::V1_2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    Json,
    Binary,
}

/// Data pipeline configuration (spec §4.4).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub server_language: ServerLanguage,
    pub serialization_format: SerializationFormat,
    pub protocol_version: ProtocolVersion,
    pub validation: bool,
    pub adaptation: bool,
    pub compression: bool,
    pub batch_size: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub r#async: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            server_language: ServerLanguage::Rust,
            serialization_format: SerializationFormat::Json,
            protocol_version: ProtocolVersion::V1_2,
            validation: true,
            adaptation: true,
            compression: false,
            batch_size: 100,
            timeout: Duration::from_secs(30),
            retries: 3,
            r#async: true,
        }
    }
}

/// Pool configuration (spec §4.6).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_conns: usize,
    pub max_conns: usize,
    pub max_idle: Duration,
    pub health_check_interval: Duration,
    pub conn_timeout: Duration,
    pub request_timeout: Duration,
    pub retries: u32,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub breaker_threshold: u32,
    pub breaker_timeout: Duration,
    pub health_checks_on: bool,
    pub metrics_on: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_conns: 1,
            max_conns: 10,
            max_idle: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            conn_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            retries: 3,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            health_checks_on: true,
            metrics_on: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), BlackholioError> {
        if self.min_conns > self.max_conns {
            return Err(BlackholioError::server_configuration(
                format!("min_conns ({}) must be <= max_conns ({})", self.min_conns, self.max_conns),
                "min_conns",
            ));
        }
        if self.max_conns < 1 {
            return Err(BlackholioError::server_configuration("max_conns must be >= 1", "max_conns"));
        }
        for (name, d) in [
            ("max_idle", self.max_idle),
            ("health_check_interval", self.health_check_interval),
            ("conn_timeout", self.conn_timeout),
            ("request_timeout", self.request_timeout),
            ("max_delay", self.max_delay),
            ("breaker_timeout", self.breaker_timeout),
        ] {
            if d.is_zero() {
                return Err(BlackholioError::server_configuration(format!("{name} must be > 0"), name));
            }
        }
        Ok(())
    }
}

/// Session-level connection settings, not the pool's: heartbeat cadence
/// and reconnect policy (spec §4.5).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connection_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_matches_spec() {
        let e = Endpoint::new(ServerLanguage::Rust, "localhost", 3000, "blackholio");
        assert_eq!(e.websocket_url(), "ws://localhost:3000/v1/database/blackholio/subscribe");
    }

    #[test]
    fn endpoint_rejects_empty_host() {
        let e = Endpoint::new(ServerLanguage::Rust, "", 3000, "blackholio");
        assert!(e.validate().is_err());
    }

    #[test]
    fn pool_config_rejects_min_over_max() {
        let mut cfg = PoolConfig::default();
        cfg.min_conns = 5;
        cfg.max_conns = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn language_parse_is_case_insensitive() {
        assert_eq!(ServerLanguage::parse("RUST"), Some(ServerLanguage::Rust));
        assert_eq!(ServerLanguage::parse("csharp"), Some(ServerLanguage::CSharp));
        assert_eq!(ServerLanguage::parse("nonsense"), None);
    }
}
