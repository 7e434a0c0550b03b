//! Server assembly: shared handler state, listener, and graceful shutdown.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{info, warn};

use tide_settings::TideSettings;
use tide_store::TodoStore;

use crate::mutations::MutationService;
use crate::relay::Relay;
use crate::render::{JsonRenderer, Renderer};
use crate::routes;
use crate::session::{CookieSessionResolver, SessionResolver};
use crate::shutdown::ShutdownCoordinator;
use crate::state::StateStore;
use crate::stream::StreamManager;
use crate::sweeper::SessionSweeper;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Runs SSE update streams.
    pub streams: StreamManager,
    /// Applies mutations and publishes their updates.
    pub mutations: MutationService,
    /// Pub/sub relay shared by streams and mutations.
    pub relay: Relay,
    /// Maps requests to sessions.
    pub resolver: Arc<dyn SessionResolver>,
    /// Cancels streams and background tasks on shutdown.
    pub shutdown: ShutdownCoordinator,
    /// Server start, for uptime.
    pub start_time: Instant,
    /// SSE keep-alive comment interval.
    pub keep_alive: Duration,
    /// Prometheus handle backing `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The assembled server.
pub struct TideServer {
    state: AppState,
    store: StateStore,
    bind_addr: String,
    grace: Duration,
    sweep: Option<(Duration, Duration)>,
}

impl TideServer {
    /// Wire every component from settings and an opened store.
    pub fn new(settings: &TideSettings, store: TodoStore) -> Self {
        let store = StateStore::new(store);
        let relay = Relay::new(settings.relay.subscriber_buffer);
        let renderer: Arc<dyn Renderer> = Arc::new(JsonRenderer);
        let state = AppState {
            streams: StreamManager::new(store.clone(), relay.clone(), renderer),
            mutations: MutationService::new(store.clone(), relay.clone()),
            relay,
            resolver: Arc::new(CookieSessionResolver::from_settings(&settings.session)),
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            keep_alive: Duration::from_secs(settings.server.keep_alive_secs),
            metrics: None,
        };
        Self {
            state,
            store,
            bind_addr: settings.server.bind_addr(),
            grace: settings.server.shutdown_grace(),
            sweep: settings
                .session
                .idle_ttl()
                .map(|ttl| (ttl, settings.session.sweep_interval())),
        }
    }

    /// Replace the fragment renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.state.streams =
            StreamManager::new(self.store.clone(), self.state.relay.clone(), renderer);
        self
    }

    /// Replace the session resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn SessionResolver>) -> Self {
        self.state.resolver = resolver;
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle used to trigger and observe shutdown.
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.state.shutdown.clone()
    }

    /// The application router.
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(&self.bind_addr).await
    }

    /// Serve on `listener` until shutdown is requested, then drain.
    ///
    /// Shutdown cancels every stream, waits up to the grace period for
    /// tracked tasks, closes the relay, and stops the listener.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        let shutdown = self.state.shutdown.clone();
        let relay = self.state.relay.clone();

        if let Some((ttl, interval)) = self.sweep {
            let sweeper = SessionSweeper::new(self.store.clone(), relay.clone(), ttl);
            let _ = shutdown.spawn(sweeper.run(interval, shutdown.child_token()));
        }

        let router = self.router();
        let token = shutdown.token();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });
        info!(%local_addr, "tide server listening");

        let token = shutdown.token();
        let early = tokio::select! {
            res = &mut server => Some(res),
            () = token.cancelled() => None,
        };
        if let Some(res) = early {
            warn!("listener stopped before shutdown was requested");
            let _ = shutdown.graceful_shutdown(self.grace).await;
            relay.close();
            return res.map_err(io::Error::other)?;
        }

        info!("shutdown requested, draining streams");
        let drained = shutdown.graceful_shutdown(self.grace).await;
        relay.close();

        match tokio::time::timeout(self.grace, server).await {
            Ok(res) => res.map_err(io::Error::other)??,
            Err(_) => warn!("listener did not stop within the grace period"),
        }
        info!(drained, "tide server stopped");
        Ok(())
    }
}
