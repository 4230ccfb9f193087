//! Typed client for the frontend service

use crate::common::Result;
use crate::proto::frontend_service_client::FrontendServiceClient;
use crate::proto::{GetRequest, PutRequest};
use tonic::transport::Channel;

/// Default server address.
pub const DEFAULT_TARGET: &str = "http://127.0.0.1:5051";

#[derive(Debug, Clone)]
pub struct FrontendClient {
    client: FrontendServiceClient<Channel>,
}

impl FrontendClient {
    /// Connect to a server, e.g. `http://127.0.0.1:5051`.
    pub async fn connect(target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        if target.is_empty() {
            return Err(crate::Error::InvalidConfig("target is required".into()));
        }
        let client = FrontendServiceClient::connect(target).await?;
        Ok(Self { client })
    }

    /// Store `value` under `key`, replacing any previous value.
    pub async fn put(&mut self, key: i64, value: impl Into<String>) -> Result<()> {
        let request = tonic::Request::new(PutRequest {
            key,
            value: value.into(),
        });
        self.client.put(request).await?;
        Ok(())
    }

    /// Fetch the value under `key`. A missing key surfaces as
    /// `Error::Grpc` with `Code::NotFound`.
    pub async fn get(&mut self, key: i64) -> Result<String> {
        let request = tonic::Request::new(GetRequest { key });
        let response = self.client.get(request).await?;
        Ok(response.into_inner().value)
    }
}
