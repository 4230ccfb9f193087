//! # kvfront
//!
//! A single-node key-value store served over gRPC:
//! - `Put(key, value)` / `Get(key)` on an integer-keyed SQLite table
//! - Versioned schema migrations applied at startup
//! - gRPC health checks and server reflection
//! - Panic recovery, structured per-call logging, OpenTelemetry spans/metrics
//! - Graceful shutdown: drain in-flight calls, flush telemetry, close storage
//!
//! ## Architecture
//!
//! ```text
//! client ──gRPC──► panic recovery ──► logging ──► instrumentation
//!                                                      │
//!                                              FrontendHandler
//!                                                      │
//!                                               Backend (SQLite)
//! ```
//!
//! ## Usage
//!
//! ### Start the server
//! ```bash
//! kvfront-server --port 5051
//! ```
//!
//! ### Use the CLI
//! ```bash
//! kvfront put 1 hello
//! kvfront get 1
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod frontend;
pub mod storage;
pub mod supervisor;

// Re-export commonly used types
pub use client::FrontendClient;
pub use common::{Config, Error, Result};
pub use frontend::{compose, Frontend, FrontendConfig};
pub use storage::{Backend, FailingBackend, SqlBackend};
pub use supervisor::{ProcessState, Supervisor};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("frontend.v1");

    /// Encoded descriptors for server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("frontend_descriptor");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
