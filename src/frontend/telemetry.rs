//! OpenTelemetry pipeline for the frontend
//!
//! The tracer provider, meter provider and propagator are plain values owned
//! by the composed server. Nothing is registered process-wide; the
//! instrumentation middleware receives a [`Telemetry`] handle instead.

use crate::common::{Error, Result};
use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const INSTRUMENTATION_SCOPE: &str = "kvfront";

/// Labels attached to every exported span and metric.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub environment: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "kvfront".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Per-call instruments shared by the middleware.
pub struct Telemetry {
    tracer: Tracer,
    propagator: TextMapCompositePropagator,
    requests: Counter<u64>,
    duration_ms: Histogram<f64>,
    shut_down: Arc<AtomicBool>,
}

impl Telemetry {
    /// Build the pipeline. Returns the instruments and the handle that must
    /// be used to flush and shut the providers down.
    pub fn init(config: &TelemetryConfig) -> Result<(Arc<Telemetry>, TelemetryCleanup)> {
        if config.service_name.trim().is_empty() {
            return Err(Error::Telemetry("service name must not be empty".into()));
        }

        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", crate::VERSION),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ]);

        let tracer_provider = TracerProvider::builder()
            .with_resource(resource.clone())
            .build();
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .build();

        let tracer = tracer_provider.tracer(INSTRUMENTATION_SCOPE);
        let meter = meter_provider.meter(INSTRUMENTATION_SCOPE);
        let requests = meter
            .u64_counter("rpc.server.requests")
            .with_description("Completed RPCs by method and status code")
            .build();
        let duration_ms = meter
            .f64_histogram("rpc.server.duration")
            .with_description("RPC handling time")
            .with_unit("ms")
            .build();

        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);

        tracing::debug!(
            service = %config.service_name,
            environment = %config.environment,
            "telemetry pipeline ready"
        );

        let shut_down = Arc::new(AtomicBool::new(false));
        let telemetry = Arc::new(Telemetry {
            tracer,
            propagator,
            requests,
            duration_ms,
            shut_down: shut_down.clone(),
        });
        let cleanup = TelemetryCleanup {
            tracer_provider,
            meter_provider,
            shut_down,
        };
        Ok((telemetry, cleanup))
    }

    /// Whether the providers have been shut down through the cleanup handle.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn propagator(&self) -> &dyn TextMapPropagator {
        &self.propagator
    }

    /// Record one finished call.
    pub fn record(&self, method: &str, code: tonic::Code, elapsed: Duration) {
        let attrs = [
            KeyValue::new("rpc.system", "grpc"),
            KeyValue::new("rpc.method", method.to_string()),
            KeyValue::new("rpc.grpc.status_code", code as i64),
        ];
        self.requests.add(1, &attrs);
        self.duration_ms
            .record(elapsed.as_secs_f64() * 1000.0, &attrs);
    }
}

/// Owns the providers. Consumed by [`TelemetryCleanup::shutdown`], so the
/// pipeline is flushed at most once.
pub struct TelemetryCleanup {
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    shut_down: Arc<AtomicBool>,
}

impl TelemetryCleanup {
    /// Flush and shut down both providers, giving up after `deadline`.
    pub async fn shutdown(self, deadline: Duration) -> Result<()> {
        let task = tokio::task::spawn_blocking(move || {
            let mut failures = Vec::new();
            if let Err(e) = self.tracer_provider.shutdown() {
                failures.push(format!("trace provider: {}", e));
            }
            if let Err(e) = self.meter_provider.shutdown() {
                failures.push(format!("metric provider: {}", e));
            }
            self.shut_down.store(true, Ordering::Release);
            failures
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(failures)) if failures.is_empty() => {
                tracing::debug!("telemetry flushed");
                Ok(())
            }
            Ok(Ok(failures)) => Err(Error::Telemetry(failures.join("; "))),
            Ok(Err(e)) => Err(Error::Telemetry(format!("shutdown task failed: {}", e))),
            Err(_) => Err(Error::Telemetry(format!(
                "shutdown did not finish within {:?}",
                deadline
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_and_shutdown() {
        let (telemetry, cleanup) = Telemetry::init(&TelemetryConfig::default()).unwrap();
        telemetry.record("/frontend.v1.FrontendService/Get", tonic::Code::Ok, Duration::from_millis(3));
        assert!(!telemetry.is_shut_down());

        cleanup.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(telemetry.is_shut_down());
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let config = TelemetryConfig {
            service_name: "  ".into(),
            environment: "test".into(),
        };
        assert!(matches!(
            Telemetry::init(&config),
            Err(Error::Telemetry(_))
        ));
    }
}
