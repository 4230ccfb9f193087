//! Public gRPC frontend
//!
//! The frontend is responsible for:
//! - Serving `Put`/`Get` over the storage backend
//! - Health and reflection services
//! - Per-call panic recovery, logging and instrumentation
//! - Owning the telemetry pipeline

pub mod handler;
pub mod middleware;
pub mod server;
pub mod telemetry;

pub use handler::FrontendHandler;
pub use server::{compose, Frontend, FrontendConfig, SERVICE_NAME};
pub use telemetry::{Telemetry, TelemetryCleanup, TelemetryConfig};
