//! # Core Packet Components
//!
//! Low-level packet handling shared by the relay and the dispatch pipeline.
//!
//! ## Components
//! - **Packet**: header accessors, transfer direction and per-pass packet flags
//! - **Codec**: Tokio codec splitting a byte stream into complete packets
//! - **Crypto**: the per-direction stream cipher seam
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Opcode(2, LE)] [Payload(N)]
//! ```
//! The length covers the whole packet, prefix included.

pub mod codec;
pub mod crypto;
pub mod packet;
