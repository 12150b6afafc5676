//! Connection, protocol, and data-flow core for a SpacetimeDB v1 JSON
//! WebSocket client shared by a training agent and a rendering UI
//! (`Blackholio`).
//!
//! This crate covers the hard, shared part: session lifecycle and
//! reconnection, wire framing, per-server-language field/casing/timestamp
//! adaptation, schema validation, a data pipeline that composes all three,
//! and a connection pool with a circuit breaker and a manager that indexes
//! pools by endpoint. It does not load environment configuration, generate
//! per-language bindings, or implement any game logic -- those are the
//! surrounding application's job; this crate only transports what they
//! send and receive.
//!
//! ```text
//! caller -> PoolManager -> ConnectionPool (acquire) -> Session (correlate)
//!        -> DataPipeline -> ProtocolAdapter -> codec -> socket
//! ```

pub mod adapters;
pub mod breaker;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod schema;
pub mod session;

pub use adapters::{AdapterRegistry, ProtocolAdapter};
pub use breaker::{BreakerState, CircuitBreaker};
pub use codec::{FrameKind, InboundMessage, OutboundMessage};
pub use config::{Endpoint, PipelineConfig, PoolConfig, ProtocolVersion, ServerLanguage, SessionConfig};
pub use credentials::{Credential, CredentialStore};
pub use error::{BlackholioError, ErrorKind, Result};
pub use manager::PoolManager;
pub use models::{Circle, Entity, EntityKind, Player, PlayerState, Vector2};
pub use pipeline::{DataPipeline, Payload};
pub use pool::{ConnectionPool, HealthStatus, PoolMetrics, PoolState, PooledSession};
pub use session::{Session, SessionEvent, SessionState};
