//! Packet envelope helpers.
//!
//! Every packet starts with a 2-byte little-endian length followed by a
//! 2-byte little-endian opcode. These helpers never copy the payload.

use serde::{Deserialize, Serialize};

use crate::config::MAX_PACKET_SIZE;
use crate::error::{ProxyError, Result};

/// Size of the length prefix in bytes
pub const LENGTH_SIZE: usize = 2;

/// Byte offset of the opcode
pub const OPCODE_OFFSET: usize = 2;

/// Size of the full header (length + opcode)
pub const HEADER_SIZE: usize = 4;

/// Which way a packet is travelling through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client to server
    Outgoing,
    /// Server to client
    Incoming,
}

impl Direction {
    /// Build a direction from the pipeline's `incoming` flag
    pub fn from_incoming(incoming: bool) -> Self {
        if incoming {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }

    /// Whether this direction is server to client
    pub fn is_incoming(self) -> bool {
        matches!(self, Direction::Incoming)
    }
}

/// Flags describing a packet during one pass through the pipeline.
///
/// Recomputed by the pipeline as hooks run; hooks only ever see copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFlags {
    /// Constructed by `write()` rather than received from a socket
    pub synthetic: bool,
    /// Server to client
    pub incoming: bool,
    /// Differs from what entered the pipeline
    pub modified: bool,
    /// A hook vetoed delivery
    pub silenced: bool,
}

impl PacketFlags {
    /// Fresh flags for a packet entering the pipeline
    pub fn entering(incoming: bool, synthetic: bool) -> Self {
        Self {
            synthetic,
            incoming,
            modified: false,
            silenced: false,
        }
    }
}

/// Read the opcode from a packet buffer, `None` if the header is incomplete
#[inline]
pub fn opcode(buf: &[u8]) -> Option<u16> {
    buf.get(OPCODE_OFFSET..HEADER_SIZE)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Read the declared length from a packet buffer
#[inline]
pub fn declared_length(buf: &[u8]) -> Option<usize> {
    buf.get(..LENGTH_SIZE)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
}

/// Build a packet buffer from an opcode and payload.
///
/// Fails with `OversizedPacket` when the total does not fit the length prefix.
pub fn build(opcode: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let len = HEADER_SIZE + payload.len();
    check_size(len)?;
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&opcode.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reject packet lengths the length prefix cannot express
#[inline]
pub fn check_size(len: usize) -> Result<()> {
    if len > MAX_PACKET_SIZE {
        return Err(ProxyError::OversizedPacket(len));
    }
    Ok(())
}

/// Payload slice after the header (empty if the header is incomplete)
#[inline]
pub fn payload(buf: &[u8]) -> &[u8] {
    buf.get(HEADER_SIZE..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_opcode_requires_full_header() {
        assert_eq!(opcode(&[4, 0, 0x48]), None);
        assert_eq!(opcode(&[4, 0, 0x48, 0x00]), Some(72));
    }

    #[test]
    fn test_build_sets_total_length() {
        let buf = build(0x1234, &[1, 2, 3]).unwrap();
        assert_eq!(declared_length(&buf), Some(7));
        assert_eq!(opcode(&buf), Some(0x1234));
        assert_eq!(payload(&buf), &[1, 2, 3]);
    }

    #[test]
    fn test_build_rejects_oversized_payload() {
        let largest = build(1, &vec![0; MAX_PACKET_SIZE - HEADER_SIZE]).unwrap();
        assert_eq!(declared_length(&largest), Some(MAX_PACKET_SIZE));

        assert!(matches!(
            build(1, &vec![0; MAX_PACKET_SIZE - HEADER_SIZE + 1]),
            Err(ProxyError::OversizedPacket(len)) if len == MAX_PACKET_SIZE + 1
        ));
    }
}
