//! Client-side endpoints of a relayed connection.

use rand::RngCore;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{constants, ProxyError, Result};

/// Number of keys a headless client supplies
pub const KEY_COUNT: usize = 2;

/// Length of each headless client key
pub const KEY_LENGTH: usize = 128;

/// Lifecycle notifications from a headless client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Upstream accepted the connection
    Connected,
    /// A packet the proxy delivered toward the client, after the hooks
    Packet(Vec<u8>),
    /// Upstream connect or idle timeout
    Timeout,
    Error(String),
    Closed,
}

/// Client without a socket, driven by modules through `Dispatch::write`
#[derive(Debug)]
pub struct HeadlessClient {
    keys: Vec<Vec<u8>>,
    events: UnboundedSender<ClientEvent>,
}

impl HeadlessClient {
    /// Create a headless client with caller-provided keys (exactly two of
    /// 128 bytes each) or freshly generated random ones.
    ///
    /// Returns the client and the receiving end of its event stream.
    pub fn new(keys: Option<Vec<Vec<u8>>>) -> Result<(Self, UnboundedReceiver<ClientEvent>)> {
        let keys = match keys {
            Some(keys) => {
                if keys.len() != KEY_COUNT {
                    return Err(ProxyError::InvalidArgument(constants::ERR_KEY_COUNT.into()));
                }
                if keys.iter().any(|k| k.len() != KEY_LENGTH) {
                    return Err(ProxyError::InvalidArgument(constants::ERR_KEY_LENGTH.into()));
                }
                keys
            }
            None => {
                let mut rng = rand::rng();
                (0..KEY_COUNT)
                    .map(|_| {
                        let mut key = vec![0u8; KEY_LENGTH];
                        rng.fill_bytes(&mut key);
                        key
                    })
                    .collect()
            }
        };

        let (events, rx) = mpsc::unbounded_channel();
        Ok((Self { keys, events }, rx))
    }

    /// Key material for the cipher handshake
    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }
}

/// The client half of a relay
#[derive(Debug)]
pub enum ClientEndpoint {
    /// A real game client
    Socket(TcpStream),
    Headless(HeadlessClient),
}
