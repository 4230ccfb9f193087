//! Per-call middleware for the gRPC server
//!
//! The chain, outermost first:
//! - panic recovery: a panicking handler becomes an `INTERNAL` response
//! - structured logging: method, duration and outcome of every call
//! - instrumentation: a server span plus request/latency metrics

use crate::frontend::telemetry::Telemetry;
use futures_util::future::BoxFuture;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::{Span as _, SpanKind, Status as SpanStatus, Tracer as _};
use opentelemetry::KeyValue;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

/// Characters escaped in `grpc-message`: controls, non-ASCII and `%`.
const GRPC_MESSAGE_ESCAPE: &AsciiSet = &CONTROLS.add(b'%');

// === Panic recovery ===

pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> http::Response<tonic::body::BoxBody>;

/// Layer converting handler panics into `INTERNAL` gRPC responses.
pub fn panic_recovery_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_response as PanicHandler)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> http::Response<tonic::body::BoxBody> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "rpc handler panicked");

    let message = format!("handler panicked: {}", detail);
    let mut response = http::Response::new(tonic::body::empty_body());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert(
        GRPC_STATUS,
        HeaderValue::from(tonic::Code::Internal as i32),
    );
    let encoded = utf8_percent_encode(&message, GRPC_MESSAGE_ESCAPE).to_string();
    if let Ok(value) = HeaderValue::from_str(&encoded) {
        headers.insert(GRPC_MESSAGE, value);
    }
    response
}

/// gRPC status code carried in response headers.
///
/// Unary failures are sent trailers-only, so the code lives in the headers.
/// Successful calls put `grpc-status: 0` in the trailers, which the
/// middleware never sees, hence the `Ok` default.
pub fn response_code<B>(response: &http::Response<B>) -> tonic::Code {
    if !response.status().is_success() {
        return tonic::Code::Unknown;
    }
    response
        .headers()
        .get(GRPC_STATUS)
        .map(|v| tonic::Code::from_bytes(v.as_bytes()))
        .unwrap_or(tonic::Code::Ok)
}

fn response_message<B>(response: &http::Response<B>) -> Option<String> {
    let raw = response.headers().get(GRPC_MESSAGE)?.to_str().ok()?;
    Some(
        percent_encoding::percent_decode_str(raw)
            .decode_utf8_lossy()
            .into_owned(),
    )
}

// === Structured logging ===

/// Layer logging every call once the handler returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcLogLayer;

impl<S> Layer<S> for RpcLogLayer {
    type Service = RpcLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcLog { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RpcLog<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for RpcLog<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        // The clone is not ready yet; keep the driven service for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let method = request.uri().path().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(request).await;
            let duration_ms = start.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let code = response_code(response);
                    if code == tonic::Code::Ok {
                        info!(method = %method, duration_ms = %duration_ms, status = "OK", "RPC");
                    } else {
                        warn!(
                            method = %method,
                            duration_ms = %duration_ms,
                            status = "ERROR",
                            code = ?code,
                            detail = response_message(response).as_deref().unwrap_or(""),
                            "RPC"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        method = %method,
                        duration_ms = %duration_ms,
                        status = "ERROR",
                        error = %e,
                        "RPC"
                    );
                }
            }

            result
        })
    }
}

// === Instrumentation ===

/// Layer recording a span and metrics per call.
#[derive(Clone)]
pub struct InstrumentLayer {
    telemetry: Arc<Telemetry>,
}

impl InstrumentLayer {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = Instrument<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Instrument {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Instrument<S> {
    inner: S,
    telemetry: Arc<Telemetry>,
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for Instrument<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let telemetry = self.telemetry.clone();

        let method = request.uri().path().to_string();
        let (service, rpc) = split_method(&method);
        let parent = telemetry
            .propagator()
            .extract(&HeaderExtractor(request.headers()));
        let mut span = telemetry
            .tracer()
            .span_builder(method.clone())
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new("rpc.system", "grpc"),
                KeyValue::new("rpc.service", service.to_string()),
                KeyValue::new("rpc.method", rpc.to_string()),
            ])
            .start_with_context(telemetry.tracer(), &parent);
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(request).await;
            let elapsed: Duration = start.elapsed();

            let code = match &result {
                Ok(response) => response_code(response),
                Err(_) => tonic::Code::Unknown,
            };
            span.set_attribute(KeyValue::new("rpc.grpc.status_code", code as i64));
            match &result {
                Ok(response) if code != tonic::Code::Ok => {
                    let message = response_message(response).unwrap_or_else(|| format!("{:?}", code));
                    span.set_status(SpanStatus::error(message));
                }
                Err(e) => span.set_status(SpanStatus::error(e.to_string())),
                Ok(_) => {}
            }
            span.end();
            telemetry.record(&method, code, elapsed);

            result
        })
    }
}

/// `/pkg.Service/Method` into `("pkg.Service", "Method")`.
fn split_method(path: &str) -> (&str, &str) {
    path.trim_start_matches('/')
        .split_once('/')
        .unwrap_or(("", path))
}
