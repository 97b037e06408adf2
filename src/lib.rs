//! # Game Proxy
//!
//! Intercepting proxy for length-prefixed binary game protocols. Each client
//! connection is relayed to the real server through a [`dispatch::Dispatch`]
//! where extension modules register ordered hooks that observe, silence,
//! rewrite or inject packets.
//!
//! ## Layers
//! - [`core`]: packet header, framing codec, cipher seam
//! - [`protocol`]: definitions, opcode maps, version negotiation, system messages
//! - [`dispatch`]: hook registry and the per-packet pipeline
//! - [`mods`]: module catalog and per-connection lifecycle
//! - [`relay`]: one client/server pair and the headless client
//! - [`server`]: the TCP listener
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use game_proxy::config::ProxyConfig;
//! use game_proxy::core::crypto::NullCipher;
//! use game_proxy::mods::{FactoryLoader, ModCatalog};
//! use game_proxy::protocol::DataDirProvider;
//! use game_proxy::server::{self, SharedState};
//!
//! # async fn run() -> game_proxy::error::Result<()> {
//! let config = ProxyConfig::default();
//! let shared = SharedState {
//!     provider: Arc::new(DataDirProvider::new(&config.protocol.data_dir)?),
//!     catalog: ModCatalog::new().shared(),
//!     loader: Arc::new(FactoryLoader::new()),
//!     cipher: Arc::new(NullCipher),
//! };
//! server::run(config, shared).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod mods;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod utils;

pub use dispatch::{Dispatch, HookAction, HookCallback, HookFilter, HookOptions, Hooks};
pub use error::{ProxyError, Result};
pub use mods::{GameModule, ModuleRef, TeardownPass};
pub use protocol::Event;
