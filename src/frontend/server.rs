//! Frontend server composition
//!
//! Assembles the key-value service with health, reflection and the
//! middleware chain into one servable [`Frontend`].

use crate::common::Result;
use crate::frontend::handler::FrontendHandler;
use crate::frontend::middleware::{panic_recovery_layer, InstrumentLayer, RpcLogLayer};
use crate::frontend::telemetry::{Telemetry, TelemetryCleanup, TelemetryConfig};
use crate::proto::frontend_service_server::FrontendServiceServer;
use crate::storage::Backend;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::server::NamedService;
use tonic::service::Routes;

/// Fully-qualified name of the key-value service.
pub const SERVICE_NAME: &str = <FrontendServiceServer<FrontendHandler> as NamedService>::NAME;

/// Schemas exposed through reflection.
const DESCRIPTOR_SETS: &[&[u8]] = &[
    crate::proto::FILE_DESCRIPTOR_SET,
    tonic_health::pb::FILE_DESCRIPTOR_SET,
];

/// Settings for [`compose`].
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub telemetry: TelemetryConfig,
    /// Deadline used to tear telemetry down when composition fails midway.
    pub telemetry_flush_timeout: Duration,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            telemetry_flush_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&crate::common::Config> for FrontendConfig {
    fn from(config: &crate::common::Config) -> Self {
        Self {
            telemetry: TelemetryConfig {
                service_name: config.service_name.clone(),
                environment: config.environment.clone(),
            },
            telemetry_flush_timeout: config.telemetry_flush_timeout(),
        }
    }
}

/// Composed gRPC server, ready to serve on a listener.
pub struct Frontend {
    routes: Routes,
    telemetry: Arc<Telemetry>,
}

/// Build the servable unit.
///
/// Telemetry is set up first; if a later step fails it is shut down before
/// the error is returned, so a failed composition never leaves a live
/// pipeline behind. The returned [`TelemetryCleanup`] must be run once at
/// shutdown.
pub async fn compose(
    config: &FrontendConfig,
    backend: Arc<dyn Backend>,
) -> Result<(Frontend, TelemetryCleanup)> {
    let (telemetry, cleanup) = Telemetry::init(&config.telemetry)?;
    assemble(
        telemetry,
        cleanup,
        config.telemetry_flush_timeout,
        backend,
        DESCRIPTOR_SETS,
    )
    .await
}

/// Everything after telemetry setup. Shuts `cleanup` down on failure.
async fn assemble(
    telemetry: Arc<Telemetry>,
    cleanup: TelemetryCleanup,
    flush_timeout: Duration,
    backend: Arc<dyn Backend>,
    descriptor_sets: &[&[u8]],
) -> Result<(Frontend, TelemetryCleanup)> {
    let routes = match build_routes(backend, descriptor_sets).await {
        Ok(routes) => routes,
        Err(e) => {
            if let Err(flush_err) = cleanup.shutdown(flush_timeout).await {
                tracing::warn!(error = %flush_err, "telemetry cleanup after failed composition");
            }
            return Err(e);
        }
    };

    tracing::debug!(service = SERVICE_NAME, "frontend composed");
    Ok((Frontend { routes, telemetry }, cleanup))
}

async fn build_routes(backend: Arc<dyn Backend>, descriptor_sets: &[&[u8]]) -> Result<Routes> {
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    let reflection_v1 = reflection_builder(descriptor_sets).build_v1()?;
    let reflection_v1alpha = reflection_builder(descriptor_sets).build_v1alpha()?;

    let frontend = FrontendHandler::new(backend).into_server();
    health_reporter
        .set_serving::<FrontendServiceServer<FrontendHandler>>()
        .await;

    Ok(Routes::new(frontend)
        .add_service(health_service)
        .add_service(reflection_v1)
        .add_service(reflection_v1alpha))
}

fn reflection_builder<'b>(descriptor_sets: &[&'b [u8]]) -> tonic_reflection::server::Builder<'b> {
    descriptor_sets
        .iter()
        .fold(tonic_reflection::server::Builder::configure(), |builder, &set| {
            builder.register_encoded_file_descriptor_set(set)
        })
}

impl Frontend {
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Serve on `listener` until `signal` resolves.
    ///
    /// Once `signal` fires the server stops accepting connections and waits
    /// for in-flight calls to finish before returning.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let layers = tower::ServiceBuilder::new()
            .layer(panic_recovery_layer())
            .layer(RpcLogLayer)
            .layer(InstrumentLayer::new(self.telemetry))
            .into_inner();

        tonic::transport::Server::builder()
            .layer(layers)
            .add_routes(self.routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::storage::SqlBackend;

    #[test]
    fn test_service_name() {
        assert_eq!(SERVICE_NAME, "frontend.v1.FrontendService");
    }

    #[tokio::test]
    async fn test_compose_returns_cleanup() {
        let backend = Arc::new(SqlBackend::open_in_memory().unwrap());
        let (_frontend, cleanup) = compose(&FrontendConfig::default(), backend).await.unwrap();
        cleanup.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_compose_fails_without_telemetry() {
        let backend = Arc::new(SqlBackend::open_in_memory().unwrap());
        let config = FrontendConfig {
            telemetry: TelemetryConfig {
                service_name: String::new(),
                environment: "test".into(),
            },
            ..Default::default()
        };

        let result = compose(&config, backend).await;
        assert!(matches!(result, Err(Error::Telemetry(_))));
    }

    #[tokio::test]
    async fn test_failed_composition_shuts_telemetry_down() {
        let backend = Arc::new(SqlBackend::open_in_memory().unwrap());
        let (telemetry, cleanup) = Telemetry::init(&TelemetryConfig::default()).unwrap();

        let garbage: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let result = assemble(
            telemetry.clone(),
            cleanup,
            Duration::from_secs(1),
            backend,
            &[garbage],
        )
        .await;

        assert!(matches!(result, Err(Error::Reflection(_))));
        assert!(telemetry.is_shut_down());
    }

    #[tokio::test]
    async fn test_compose_keeps_telemetry_live() {
        let backend = Arc::new(SqlBackend::open_in_memory().unwrap());
        let (frontend, cleanup) = compose(&FrontendConfig::default(), backend).await.unwrap();
        assert!(!frontend.telemetry().is_shut_down());

        cleanup.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(frontend.telemetry().is_shut_down());
    }
}
