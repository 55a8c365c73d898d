//! Gateway server lifecycle
//!
//! Owns the shared state, the two background sweeps (session expiry and
//! token-cache expiry), and the HTTP listener. Everything is tied to one
//! `Gateway` instance - no process-global state - so multiple gateways can
//! coexist in tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::handler::{ProtocolHandler, UpstreamHandler};
use crate::metrics::MetricsCollector;
use crate::oauth::TokenVerifier;
use crate::session::SessionManager;
use crate::{Error, Result};

/// The authenticated session gateway
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Create a gateway that forwards to the configured upstream MCP server
    pub fn new(config: Config) -> Result<Self> {
        let handler = Arc::new(UpstreamHandler::new(
            &config.upstream,
            config.server.max_body_size,
        )?);
        Self::with_handler(config, handler)
    }

    /// Create a gateway with an explicit protocol handler (the seam used
    /// by tests and embedders)
    pub fn with_handler(config: Config, handler: Arc<dyn ProtocolHandler>) -> Result<Self> {
        let verifier = Arc::new(TokenVerifier::new(&config.oauth)?);
        let sessions = Arc::new(SessionManager::new(&config.session));
        let metrics = Arc::new(MetricsCollector::new());

        let state = Arc::new(AppState {
            config: config.clone(),
            verifier,
            sessions,
            metrics,
            handler,
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            state,
            shutdown_tx,
        })
    }

    /// Build the router over this gateway's state
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Shared state handle (inspection from tests)
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Trigger a graceful shutdown from outside the signal handler
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the two background sweeps. They stop when the shutdown
    /// channel fires; a failing tick is logged and the sweep continues on
    /// its next interval.
    fn spawn_sweeps(&self) {
        let sessions = Arc::clone(&self.state.sessions);
        let session_interval = self.config.session.sweep_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(session_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sessions.expire_idle();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        let verifier = Arc::clone(&self.state.verifier);
        let cache_interval = self.config.oauth.cache_sweep_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        let removed = verifier.cache().sweep_expired(now);
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired token cache entries");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        self.spawn_sweeps();

        let app = self.router();

        info!("============================================================");
        info!("LOGAN GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, tls = self.config.server.tls.enabled, "Listening");
        if self.config.oauth.enabled {
            info!(
                issuer = %self.config.oauth.issuer_url,
                scopes = ?self.config.oauth.required_scopes,
                cache = self.config.oauth.cache_enabled,
                "AUTHENTICATION enabled (RFC 7662 introspection)"
            );
        } else {
            warn!("AUTHENTICATION disabled - every request is implicitly authenticated");
        }
        info!(
            max_sessions = self.config.session.max_sessions,
            timeout = ?self.config.session.timeout,
            "Session table ready"
        );
        info!(upstream = %self.config.upstream.url, "Forwarding protected requests");
        info!("============================================================");

        if self.config.server.tls.enabled {
            let tls_config = RustlsConfig::from_pem_file(
                &self.config.server.tls.cert_path,
                &self.config.server.tls.key_path,
            )
            .await
            .map_err(|e| Error::Config(format!("Failed to load TLS material: {e}")))?;

            let handle = axum_server::Handle::new();
            let watcher = handle.clone();
            let shutdown_tx = self.shutdown_tx.clone();
            tokio::spawn(async move {
                shutdown_signal(shutdown_tx).await;
                watcher.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
            });

            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        } else {
            let listener = TcpListener::bind(addr).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal(self.shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Wait for ctrl-c / SIGTERM or an explicit shutdown, then notify the
/// background tasks
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let mut explicit = shutdown_tx.subscribe();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        _ = explicit.recv() => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
