//! # Connection Relay
//!
//! Pairs one client endpoint with one upstream socket and pumps framed
//! packets between them through the connection's [`Dispatch`].
//!
//! ## Lifecycle
//! `Connecting` → `Relaying` → `Closed`. A relay is never reopened.
//!
//! ## Data path
//! ```text
//! socket → PacketFramer → decrypt → Dispatch::handle → encrypt → PacketFramer → socket
//! ```
//! Packets injected with `Dispatch::write` arrive on the outbound channel
//! and are written by the same task, so each socket has a single writer.

use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::PacketFramer;
use crate::core::crypto::CryptoEngine;
use crate::core::packet::{Direction, LENGTH_SIZE};
use crate::dispatch::{Dispatch, Outbound};
use crate::error::{ProxyError, Result};
use crate::utils::metrics::global_metrics;

pub mod client;

pub use client::{ClientEndpoint, ClientEvent, HeadlessClient};

type FramedStream = Framed<TcpStream, PacketFramer>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Relaying,
    Closed,
}

/// Timeouts applied by a relay
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub connect_timeout: Duration,
    /// Silence in both directions before the connection is dropped
    pub idle_timeout: Duration,
}

impl From<&ServerConfig> for RelaySettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// The client side as seen from inside the pump loop
enum ClientSide {
    Socket(FramedStream),
    Headless,
}

impl ClientSide {
    /// Next frame from a real client; headless clients never send any
    async fn next_frame(&mut self) -> Option<Result<BytesMut>> {
        match self {
            ClientSide::Socket(framed) => framed.next().await,
            ClientSide::Headless => std::future::pending().await,
        }
    }
}

/// One relayed client/server connection
pub struct ConnectionRelay {
    dispatch: Option<Dispatch>,
    cipher: Option<Box<dyn CryptoEngine>>,
    settings: RelaySettings,
    state: RelayState,
    outbound: Option<UnboundedReceiver<Outbound>>,
    headless: Option<HeadlessClient>,
}

impl ConnectionRelay {
    /// Bind `dispatch` to this connection so its writes reach the sockets
    pub fn new(dispatch: Dispatch, cipher: Box<dyn CryptoEngine>, settings: RelaySettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatch.attach_transport(tx);
        Self {
            dispatch: Some(dispatch),
            cipher: Some(cipher),
            settings,
            state: RelayState::Connecting,
            outbound: Some(rx),
            headless: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// The bound dispatch, until the relay closes
    pub fn dispatch(&self) -> Option<&Dispatch> {
        self.dispatch.as_ref()
    }

    /// Connect upstream and relay until either side closes.
    ///
    /// The relay is closed when this returns.
    #[instrument(skip(self, client), fields(upstream = %upstream))]
    pub async fn run(&mut self, client: ClientEndpoint, upstream: &str) -> Result<()> {
        if self.state != RelayState::Connecting {
            return Err(ProxyError::ConnectionClosed);
        }

        let mut client = match client {
            ClientEndpoint::Socket(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY on client");
                }
                ClientSide::Socket(Framed::new(stream, PacketFramer))
            }
            ClientEndpoint::Headless(headless) => {
                self.headless = Some(headless);
                ClientSide::Headless
            }
        };

        let result = match Self::connect(upstream, self.settings.connect_timeout).await {
            Ok(server) => {
                self.state = RelayState::Relaying;
                global_metrics().connection_established();
                self.emit(ClientEvent::Connected);
                info!("Relaying");
                self.pump(Framed::new(server, PacketFramer), &mut client)
                    .await
            }
            Err(e) => {
                global_metrics().connection_error();
                Err(e)
            }
        };

        if let Err(e) = &result {
            self.emit(match e {
                ProxyError::Timeout => ClientEvent::Timeout,
                other => ClientEvent::Error(other.to_string()),
            });
        }
        drop(client);
        self.close();
        result
    }

    fn emit(&self, event: ClientEvent) {
        if let Some(headless) = &self.headless {
            headless.emit(event);
        }
    }

    async fn connect(upstream: &str, connect_timeout: Duration) -> Result<TcpStream> {
        let connecting = tokio::time::timeout(connect_timeout, TcpStream::connect(upstream));
        let stream = match connecting.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "Upstream connect failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Upstream connect timed out"
                );
                return Err(ProxyError::Timeout);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
        }
        Ok(stream)
    }

    async fn pump(&mut self, mut server: FramedStream, client: &mut ClientSide) -> Result<()> {
        let mut outbound = self.outbound.take().ok_or(ProxyError::ConnectionClosed)?;
        let idle = tokio::time::sleep(self.settings.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                frame = server.next() => match frame {
                    Some(Ok(frame)) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + self.settings.idle_timeout);
                        if let Some(data) = self.inbound(frame, Direction::Incoming) {
                            self.deliver(Direction::Incoming, data, &mut server, client).await?;
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        debug!("Server closed the connection");
                        return Ok(());
                    }
                },
                frame = client.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + self.settings.idle_timeout);
                        if let Some(data) = self.inbound(frame, Direction::Outgoing) {
                            self.deliver(Direction::Outgoing, data, &mut server, client).await?;
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        debug!("Client closed the connection");
                        return Ok(());
                    }
                },
                Some(packet) = outbound.recv() => {
                    self.deliver(packet.direction, packet.data, &mut server, client).await?;
                }
                _ = &mut idle => {
                    warn!(
                        idle_ms = self.settings.idle_timeout.as_millis() as u64,
                        "Connection idle timeout"
                    );
                    return Err(ProxyError::Timeout);
                }
            }
        }
    }

    /// Decrypt a frame read from a socket and run it through the hooks
    fn inbound(&mut self, frame: BytesMut, direction: Direction) -> Option<Vec<u8>> {
        let mut data = frame.to_vec();
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt(direction, &mut data[LENGTH_SIZE..]);
        }
        self.dispatch
            .as_ref()?
            .handle(data, direction.is_incoming(), false)
    }

    /// Encrypt and write a packet toward the side `direction` points at
    async fn deliver(
        &mut self,
        direction: Direction,
        mut data: Vec<u8>,
        server: &mut FramedStream,
        client: &mut ClientSide,
    ) -> Result<()> {
        let len = data.len() as u64;
        match (direction, client) {
            (Direction::Incoming, ClientSide::Headless) => {
                self.emit(ClientEvent::Packet(data));
            }
            (Direction::Incoming, ClientSide::Socket(framed)) => {
                self.encrypt(direction, &mut data);
                framed.send(data).await?;
            }
            (Direction::Outgoing, _) => {
                self.encrypt(direction, &mut data);
                server.send(data).await?;
            }
        }
        global_metrics().bytes_relayed(direction.is_incoming(), len);
        Ok(())
    }

    fn encrypt(&mut self, direction: Direction, data: &mut [u8]) {
        if let (Some(cipher), Some(body)) = (self.cipher.as_mut(), data.get_mut(LENGTH_SIZE..)) {
            cipher.encrypt(direction, body);
        }
    }

    /// Tear the connection down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == RelayState::Closed {
            return;
        }
        let was_relaying = self.state == RelayState::Relaying;
        self.state = RelayState::Closed;

        if let Some(dispatch) = self.dispatch.take() {
            dispatch.detach_transport();
            dispatch.reset();
        }
        self.outbound = None;
        self.cipher = None;

        if let Some(headless) = self.headless.take() {
            headless.emit(ClientEvent::Closed);
        }
        if was_relaying {
            global_metrics().connection_closed();
        }
        info!("Connection closed");
    }
}

impl Drop for ConnectionRelay {
    fn drop(&mut self) {
        self.close();
    }
}
