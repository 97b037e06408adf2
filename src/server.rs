//! TCP listener spawning one relay per client.
//!
//! Every connection gets a fresh [`Dispatch`] built over the process-wide
//! definitions and module catalog, with all modules loaded before any
//! packet is pumped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::core::crypto::CipherFactory;
use crate::dispatch::{Dispatch, DispatchSettings};
use crate::error::{ProxyError, Result};
use crate::mods::{ModuleLoader, SharedCatalog};
use crate::protocol::ProtocolProvider;
use crate::relay::{ClientEndpoint, ConnectionRelay, RelaySettings};
use crate::utils::metrics::global_metrics;

/// Process-wide collaborators shared by every connection
#[derive(Clone)]
pub struct SharedState {
    pub provider: Arc<dyn ProtocolProvider>,
    pub catalog: SharedCatalog,
    pub loader: Arc<dyn ModuleLoader>,
    pub cipher: Arc<dyn CipherFactory>,
}

impl SharedState {
    /// Build the dispatch for a new connection
    pub fn new_dispatch(&self, config: &ProxyConfig) -> Dispatch {
        let dispatch = Dispatch::new(
            self.provider.clone(),
            self.catalog.clone(),
            self.loader.clone(),
            DispatchSettings::from(&config.protocol),
        );
        if config.mods.autoload {
            dispatch.load_all_mods();
        }
        dispatch
    }
}

/// A bound proxy listener
pub struct ProxyServer {
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    shared: SharedState,
    active: Arc<AtomicUsize>,
}

impl ProxyServer {
    /// Bind the configured listen address
    pub async fn bind(config: ProxyConfig, shared: SharedState) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.listen_address)
            .await
            .map_err(|e| {
                ProxyError::TransportError(format!(
                    "Failed to bind {}: {e}",
                    config.server.listen_address
                ))
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            shared,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connections currently being relayed
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Accept clients until `shutdown_rx` fires, then drain
    #[instrument(skip(self, shutdown_rx), fields(upstream = %self.config.server.upstream_address))]
    pub async fn serve(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(address = %self.local_addr()?, "Proxy listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down proxy. Waiting for connections to close...");
                    self.drain().await;
                    global_metrics().log_metrics();
                    return Ok(());
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
            }
        }
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let max = self.config.server.max_connections;
        if self.active.load(Ordering::Relaxed) >= max {
            warn!(peer = %peer, max_connections = max, "Connection limit reached, rejecting client");
            global_metrics().connection_error();
            return;
        }

        self.active.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %peer, "Client connected");

        let active = self.active.clone();
        let config = self.config.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let dispatch = shared.new_dispatch(&config);
            let mut relay = ConnectionRelay::new(
                dispatch,
                shared.cipher.create(),
                RelaySettings::from(&config.server),
            );
            match relay
                .run(ClientEndpoint::Socket(stream), &config.server.upstream_address)
                .await
            {
                Ok(()) | Err(ProxyError::ConnectionClosed) => {}
                Err(e) => warn!(peer = %peer, error = %e, "Connection ended with error"),
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn drain(&self) {
        let timeout = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            let connections = self.active.load(Ordering::Relaxed);
            if connections == 0 {
                info!("All connections closed, shutting down");
                return;
            }
            tokio::select! {
                _ = &mut timeout => {
                    warn!(connections, "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }
    }
}

/// Run the proxy until Ctrl-C
pub async fn run(config: ProxyConfig, shared: SharedState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    run_with_shutdown(config, shared, shutdown_rx).await
}

/// Run the proxy until `shutdown_rx` fires
pub async fn run_with_shutdown(
    config: ProxyConfig,
    shared: SharedState,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    ProxyServer::bind(config, shared)
        .await?
        .serve(shutdown_rx)
        .await
}
