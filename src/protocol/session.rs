//! Per-connection protocol state and version-check bootstrap.

use std::sync::Arc;

use crate::core::packet;
use crate::error::{ProxyError, Result};
use crate::protocol::codec::ProtocolCodec;

/// Index of the version entry carrying the protocol revision
const PROTOCOL_REVISION_INDEX: u32 = 0;

/// Negotiated protocol of one connection
#[derive(Default, Clone)]
pub struct ProtocolSession {
    codec: Option<Arc<dyn ProtocolCodec>>,
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negotiated protocol version, if any
    pub fn version(&self) -> Option<u32> {
        self.codec.as_ref().map(|c| c.info().protocol)
    }

    pub fn codec(&self) -> Option<Arc<dyn ProtocolCodec>> {
        self.codec.clone()
    }

    pub(crate) fn commit(&mut self, codec: Arc<dyn ProtocolCodec>) {
        self.codec = Some(codec);
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("version", &self.version())
            .finish()
    }
}

/// Extract the protocol revision from a version-check packet.
///
/// Payload layout (little-endian): `u16 count` followed by `count` pairs of
/// `(u32 index, u32 value)`. The revision is the value at index 0.
pub fn parse_version_check(buf: &[u8]) -> Result<u32> {
    let payload = packet::payload(buf);
    let count = payload
        .get(..2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| ProxyError::Codec("version check: missing entry count".into()))?;

    let entries = &payload[2..];
    if entries.len() < count * 8 {
        return Err(ProxyError::Codec(format!(
            "version check: {count} entries declared, {} bytes present",
            entries.len()
        )));
    }

    entries
        .chunks_exact(8)
        .take(count)
        .map(|e| {
            (
                u32::from_le_bytes([e[0], e[1], e[2], e[3]]),
                u32::from_le_bytes([e[4], e[5], e[6], e[7]]),
            )
        })
        .find(|(index, _)| *index == PROTOCOL_REVISION_INDEX)
        .map(|(_, value)| value)
        .ok_or_else(|| ProxyError::Codec("version check: no entry with index 0".into()))
}

/// Build a version-check packet, mainly for headless clients and tests
pub fn build_version_check(opcode: u16, entries: &[(u32, u32)]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(2 + entries.len() * 8);
    payload.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (index, value) in entries {
        payload.extend_from_slice(&index.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
    }
    packet::build(opcode, &payload)
}
