//! Process lifetime: startup, serving, drain and ordered teardown
//!
//! ```text
//! Starting ──► Serving ──► Draining ──► Stopped
//! ```
//!
//! While serving, the server task and a signal watcher share one
//! cancellation token. Whichever finishes first (signal or server exit)
//! cancels it. Teardown then runs strictly in order: drain in-flight calls,
//! flush telemetry, close the backend.

use crate::common::{Config, Error, Result};
use crate::frontend::{
    compose, Frontend, FrontendConfig, Telemetry, TelemetryCleanup, SERVICE_NAME,
};
use crate::storage::{Backend, SqlBackend};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Serving => write!(f, "serving"),
            ProcessState::Draining => write!(f, "draining"),
            ProcessState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct Supervisor {
    config: Config,
    state: watch::Sender<ProcessState>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let (state, _) = watch::channel(ProcessState::Starting);
        Self { config, state }
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Open the configured SQLite database, then start.
    pub async fn start(self) -> Result<Started> {
        let path = self.config.database_path.clone();
        let backend = tokio::task::spawn_blocking(move || match path {
            Some(path) => SqlBackend::open(path),
            None => SqlBackend::open_in_memory(),
        })
        .await
        .map_err(|e| Error::Internal(format!("backend open task failed: {}", e)))??;

        self.start_with_backend(Arc::new(backend)).await
    }

    /// Compose the server around `backend` and bind the listener.
    ///
    /// On failure everything acquired so far is released in reverse order.
    pub async fn start_with_backend(self, backend: Arc<dyn Backend>) -> Result<Started> {
        let flush_timeout = self.config.telemetry_flush_timeout();

        let (frontend, telemetry) =
            match compose(&FrontendConfig::from(&self.config), backend.clone()).await {
                Ok(parts) => parts,
                Err(e) => {
                    close_backend(backend.as_ref()).await;
                    return Err(e);
                }
            };

        let addr = self.config.bind_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                flush_telemetry(telemetry, flush_timeout).await;
                close_backend(backend.as_ref()).await;
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            service = SERVICE_NAME,
            environment = %self.config.environment,
            "frontend listening"
        );

        Ok(Started {
            frontend,
            telemetry,
            backend,
            listener,
            local_addr,
            state: self.state,
            drain_timeout: self.config.drain_timeout(),
            flush_timeout,
        })
    }
}

/// A started process that has bound its listener but is not serving yet.
pub struct Started {
    frontend: Frontend,
    telemetry: TelemetryCleanup,
    backend: Arc<dyn Backend>,
    listener: TcpListener,
    local_addr: SocketAddr,
    state: watch::Sender<ProcessState>,
    drain_timeout: Duration,
    flush_timeout: Duration,
}

impl Started {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Telemetry instruments of the composed server.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.frontend.telemetry().clone()
    }

    /// Serve until `signal` resolves or the server stops on its own, then
    /// drain and tear down.
    ///
    /// Returns `Ok(())` after a requested shutdown and the server's error if
    /// it failed while serving. Teardown failures are logged, not returned.
    pub async fn serve_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Started {
            frontend,
            telemetry,
            backend,
            listener,
            local_addr: _,
            state,
            drain_timeout,
            flush_timeout,
        } = self;

        let token = CancellationToken::new();
        set_state(&state, ProcessState::Serving);

        let serve_token = token.clone();
        let mut serve = tokio::spawn(async move {
            frontend
                .serve_with_shutdown(listener, async move { serve_token.cancelled().await })
                .await
        });

        let watch_token = token.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = signal => {
                    info!("shutdown signal received, draining");
                    watch_token.cancel();
                }
                _ = watch_token.cancelled() => {}
            }
        });

        let exited_early = tokio::select! {
            res = &mut serve => Some(res),
            _ = token.cancelled() => None,
        };
        // Releases the watcher if the server stopped first.
        token.cancel();
        set_state(&state, ProcessState::Draining);

        let outcome = match exited_early {
            Some(res) => res,
            None => match tokio::time::timeout(drain_timeout, &mut serve).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(
                        timeout = ?drain_timeout,
                        "in-flight calls did not finish in time, aborting server"
                    );
                    serve.abort();
                    Ok(Ok(()))
                }
            },
        };

        if let Err(e) = watcher.await {
            warn!(error = %e, "signal watcher failed");
        }

        flush_telemetry(telemetry, flush_timeout).await;
        close_backend(backend.as_ref()).await;
        set_state(&state, ProcessState::Stopped);

        match outcome {
            Ok(Ok(())) => {
                info!("shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "server terminated");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "server task failed");
                Err(Error::Internal(format!("server task failed: {}", e)))
            }
        }
    }
}

/// Start with the configured database and serve until `signal` resolves.
pub async fn run<F>(config: Config, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    Supervisor::new(config).start().await?.serve_until(signal).await
}

fn set_state(state: &watch::Sender<ProcessState>, next: ProcessState) {
    let previous = state.send_replace(next);
    tracing::debug!(from = %previous, to = %next, "process state");
}

async fn flush_telemetry(telemetry: TelemetryCleanup, deadline: Duration) {
    if let Err(e) = telemetry.shutdown(deadline).await {
        error!(error = %e, "failed to flush telemetry");
    }
}

async fn close_backend(backend: &dyn Backend) {
    if let Err(e) = backend.close().await {
        error!(error = %e, "failed to close storage backend");
    }
}

/// Resolves on Ctrl-C (SIGINT) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
