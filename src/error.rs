//! # Error Types
//!
//! Error handling for the proxy, from socket failures up to hook registration
//! mistakes made by a module.
//!
//! ## Error Categories
//! - **Registration Errors**: bad hook/write arguments, unknown packets, obsolete
//!   definitions. These propagate synchronously so the registering module fails fast.
//! - **Module Errors**: construction, teardown and reload failures. Contained at
//!   module granularity by the lifecycle manager.
//! - **Hook Errors**: anything raised while decoding, running or re-encoding a hook.
//!   Contained per hook by the dispatch pipeline.
//! - **System Message Errors**: malformed or unmapped `@id` messages.
//! - **Transport Errors**: I/O, framing and connection lifecycle failures.
//!
//! ## Example Usage
//! ```rust
//! use game_proxy::error::{ProxyError, Result};
//! use tracing::error;
//!
//! fn opcode_of(buf: &[u8]) -> Result<u16> {
//!     game_proxy::core::packet::opcode(buf).ok_or(ProxyError::InvalidHeader)
//! }
//!
//! if let Err(e) = opcode_of(&[0x01]) {
//!     error!(error = %e, "Rejected packet");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatch-related error messages
    pub const ERR_HOOK_LOCK: &str = "Failed to acquire hook registry lock";
    pub const ERR_SESSION_LOCK: &str = "Failed to acquire protocol session lock";
    pub const ERR_MODS_LOCK: &str = "Failed to acquire module manager lock";
    pub const ERR_CATALOG_LOCK: &str = "Failed to acquire module catalog lock";
    pub const ERR_DEFINITIONS_LOCK: &str = "Failed to acquire definition catalog lock";

    /// Registration errors
    pub const ERR_WILDCARD_VERSION: &str = "wildcard hooks must request version 'raw' or 'any'";
    pub const ERR_RAW_CALLBACK: &str = "raw hooks require a raw callback";
    pub const ERR_EVENT_CALLBACK: &str = "decoded hooks require an event callback";
    pub const ERR_ZERO_TIMEOUT: &str = "hook timeout must be greater than zero";
    pub const ERR_NO_RUNTIME: &str = "hook timeouts require a running tokio runtime";
    pub const ERR_NOT_NEGOTIATED: &str = "no protocol version negotiated yet";

    /// Framing errors
    pub const ERR_INVALID_HEADER: &str = "Invalid packet header";
    pub const ERR_OVERSIZED_PACKET: &str = "Packet exceeds maximum size";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_CONNECT_TIMEOUT: &str = "Upstream connect timed out";

    /// Headless client errors
    pub const ERR_KEY_COUNT: &str = "client must provide two keys";
    pub const ERR_KEY_LENGTH: &str = "keys must be 128 bytes";
}

/// Primary error type for all proxy operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown packet: {0}")]
    UnknownPacket(String),

    #[error("Obsolete definition {name}.{version} (latest: {latest})")]
    ObsoleteDefinition {
        name: String,
        version: u32,
        latest: u32,
    },

    #[error("Definition not found: {name}.{version}")]
    DefinitionNotFound { name: String, version: u32 },

    #[error("Failed to load module {name}: {reason}")]
    ModuleLoad { name: String, reason: String },

    #[error("Failed to reload module {0}")]
    ReloadFailed(String),

    #[error("Cannot reload unloaded module: {0}")]
    NotLoaded(String),

    #[error("Hook execution failed: {0}")]
    HookExecution(String),

    #[error("Malformed system message: {0}")]
    MalformedMessage(String),

    #[error("Unmapped system message: {0}")]
    UnmappedMessage(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Type alias for Results using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;
