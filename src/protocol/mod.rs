//! # Protocol Layer
//!
//! Everything the pipeline needs to understand packet contents.
//!
//! ## Components
//! - **Schema**: definition-file parser and field layout reader/writer
//! - **Definitions**: process-wide catalog of `(name, version)` schemas
//! - **Codec**: `Event`, opcode tables and the codec/provider traits
//! - **Session**: per-connection negotiated version and bootstrap parsing
//! - **Sysmsg**: the `@id\vkey\vvalue` system message sub-protocol

pub mod codec;
pub mod definitions;
pub mod schema;
pub mod session;
pub mod sysmsg;


pub use codec::{
    CustomDefinition, DataDirProvider, Event, MemoryProvider, NameMap, PacketMap, ProtocolCodec,
    ProtocolInfo, ProtocolProvider, SchemaProtocol, SysmsgMap,
};
pub use definitions::{DefinitionCatalog, SharedDefinitions};
pub use session::ProtocolSession;
pub use sysmsg::SystemMessage;
