//! Frontend gRPC service
//!
//! Maps `Put`/`Get` calls onto the storage backend and storage outcomes onto
//! gRPC statuses. No caching and no retries; each call is independent.

use crate::proto::frontend_service_server::{FrontendService, FrontendServiceServer};
use crate::proto::*;
use crate::storage::Backend;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// FrontendHandler implements the public key-value API.
#[derive(Clone)]
pub struct FrontendHandler {
    backend: Arc<dyn Backend>,
}

impl FrontendHandler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Converts this handler into a gRPC server instance.
    pub fn into_server(self) -> FrontendServiceServer<Self> {
        FrontendServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl FrontendService for FrontendHandler {
    async fn put(&self, req: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let PutRequest { key, value } = req.into_inner();

        self.backend
            .put(key, &value)
            .await
            .map_err(|e| e.to_grpc_status())?;

        Ok(Response::new(PutResponse {}))
    }

    async fn get(&self, req: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let key = req.into_inner().key;

        let value = self
            .backend
            .get(key)
            .await
            .map_err(|e| e.to_grpc_status())?;

        Ok(Response::new(GetResponse { value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, Result};
    use crate::storage::{FailingBackend, SqlBackend};
    use tonic::Code;

    /// Backend whose `get` returns a fixed outcome.
    struct StubBackend {
        get: fn(i64) -> Result<String>,
    }

    #[tonic::async_trait]
    impl Backend for StubBackend {
        async fn put(&self, _key: i64, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn get(&self, key: i64) -> Result<String> {
            (self.get)(key)
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn handler(backend: impl Backend + 'static) -> FrontendHandler {
        FrontendHandler::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn test_get_success() {
        let h = handler(StubBackend {
            get: |key| {
                assert_eq!(key, 42);
                Ok("hello".to_string())
            },
        });

        let resp = h.get(Request::new(GetRequest { key: 42 })).await.unwrap();
        assert_eq!(resp.into_inner().value, "hello");
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let h = handler(StubBackend {
            get: |key| Err(Error::NotFound(key)),
        });

        let status = h.get(Request::new(GetRequest { key: 1 })).await.unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Error::NotFound(1).to_string());
    }

    #[tokio::test]
    async fn test_get_unexpected_error() {
        let h = handler(StubBackend {
            get: |_| Err(Error::Other("boom".into())),
        });

        let status = h.get(Request::new(GetRequest { key: 1 })).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "boom");
    }

    #[tokio::test]
    async fn test_put_error_is_internal() {
        let h = handler(FailingBackend::default());

        let status = h
            .put(Request::new(PutRequest {
                key: 1,
                value: "x".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("mock database error on Put"));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let h = handler(SqlBackend::open_in_memory().unwrap());

        h.put(Request::new(PutRequest {
            key: 7,
            value: "seven".into(),
        }))
        .await
        .unwrap();

        let resp = h.get(Request::new(GetRequest { key: 7 })).await.unwrap();
        assert_eq!(resp.into_inner().value, "seven");
    }
}
