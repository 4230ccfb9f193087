//! Backend that fails every operation

use crate::common::{Error, Result};
use crate::storage::Backend;

/// Always-failing backend for exercising error propagation.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    put_message: String,
    get_message: String,
}

impl Default for FailingBackend {
    fn default() -> Self {
        Self::new("mock database error on Put", "mock database error on Get")
    }
}

impl FailingBackend {
    pub fn new(put_message: impl Into<String>, get_message: impl Into<String>) -> Self {
        Self {
            put_message: put_message.into(),
            get_message: get_message.into(),
        }
    }
}

#[tonic::async_trait]
impl Backend for FailingBackend {
    async fn put(&self, _key: i64, _value: &str) -> Result<()> {
        Err(Error::Other(self.put_message.clone()))
    }

    async fn get(&self, _key: i64) -> Result<String> {
        Err(Error::Other(self.get_message.clone()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
