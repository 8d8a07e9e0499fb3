//! Server assembly and lifecycle.

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use herald_core::{
    event_queue, BroadcastDispatcher, ChannelRouter, EventReceiver, EventSink, KeyValueStore,
};
use herald_transport::RoomTransport;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api;
use crate::auth_client::ReqwestAuthClient;
use crate::config::Config;
use crate::handlers;
use crate::metrics;
use crate::storage;
use crate::subscribers::{self, RedisSubscriber};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Channel joins, leaves and client events.
    pub router: ChannelRouter,
    /// Connected sockets and their rooms.
    pub transport: Arc<RoomTransport>,
    /// Ingestion side of the dispatcher queue.
    pub events: EventSink,
    /// Process start, for the status API.
    pub started_at: Instant,
    /// Flips to `true` on shutdown.
    pub shutdown: watch::Receiver<bool>,
}

/// A configured server instance.
pub struct Herald {
    state: Arc<AppState>,
    events: Option<EventReceiver>,
    shutdown_tx: watch::Sender<bool>,
}

impl Herald {
    /// Build a server with the configured presence store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, the auth client or the channel
    /// patterns cannot be set up.
    pub async fn build(config: Config) -> Result<Self> {
        let store = storage::open(&config).await?;
        Self::with_store(config, store)
    }

    /// Build a server around an existing presence store.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth client or the channel patterns cannot
    /// be set up.
    pub fn with_store(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let transport = Arc::new(RoomTransport::new(config.limits.outbound_queue_capacity));
        let auth = Arc::new(ReqwestAuthClient::new().context("Failed to create auth client")?);
        let router = ChannelRouter::new(config.router_config(), transport.clone(), store, auth)
            .context("Invalid channel configuration")?;

        let (sink, events) = event_queue(config.limits.ingest_queue_capacity);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let state = Arc::new(AppState {
            config,
            router,
            transport,
            events: sink,
            started_at: Instant::now(),
            shutdown,
        });

        Ok(Self {
            state,
            events: Some(events),
            shutdown_tx,
        })
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The HTTP and WebSocket routes.
    pub fn app(&self) -> Router {
        let config = &self.state.config;

        let mut app = Router::new()
            .route(&config.transport.websocket_path, get(handlers::ws_handler))
            .merge(api::routes());
        if config.subscribers.http {
            app = app.merge(subscribers::http::routes());
        }

        app = app.layer(middleware::from_fn_with_state(
            self.state.clone(),
            api::extra_headers,
        ));
        if let Some(cors) = api::cors_layer(&config.api_origin_allow) {
            app = app.layer(cors);
        }

        app.with_state(self.state.clone())
    }

    /// Start the broadcast dispatcher. Only the first call starts one.
    pub fn spawn_dispatcher(&mut self) -> Option<JoinHandle<()>> {
        let events = self.events.take()?;
        let dispatcher = BroadcastDispatcher::new(self.state.transport.clone());
        let stopped = self.stopped();
        Some(tokio::spawn(dispatcher.run_until(events, stopped)))
    }

    /// Resolves once shutdown has been requested.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await.map(|_| ());
        }
    }

    /// Stop accepting joins and signal every task to wind down.
    pub fn shutdown(&self) {
        self.state.router.close();
        self.shutdown_tx.send_replace(true);
    }
}

/// Run the server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server cannot be built or a listener cannot be
/// bound.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let mut herald = Herald::build(config.clone()).await?;
    let dispatcher = herald.spawn_dispatcher();

    let subscriber = if config.subscribers.redis {
        let subscriber = RedisSubscriber::new(
            &config.database_config.redis.url,
            config.key_prefix(),
            herald.state().events.clone(),
        )
        .context("Invalid Redis URL")?;
        let shutdown = herald.state().shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = subscriber.run(shutdown).await {
                error!(error = %e, "Redis subscriber failed");
            }
        }))
    } else {
        None
    };

    let app = herald.app();
    let mut servers = Vec::new();
    for addr in config.bind_addrs()? {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        info!("Herald server listening on {}", addr);
        info!(
            "WebSocket endpoint: ws://{}{}",
            addr, config.transport.websocket_path
        );

        let app = app.clone();
        let stopped = herald.stopped();
        servers.push(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
        }));
    }

    shutdown_signal().await;
    info!("Shutting down");
    herald.shutdown();

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Listener failed"),
            Err(e) => error!(error = %e, "Listener task panicked"),
        }
    }
    if let Some(subscriber) = subscriber {
        let _ = subscriber.await;
    }
    if let Some(dispatcher) = dispatcher {
        let _ = dispatcher.await;
    }

    info!("Herald server stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
