//! Common utilities and types shared across kvfront

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
