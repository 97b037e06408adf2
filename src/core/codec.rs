//! Length-prefix framing over a byte stream.
//!
//! `PacketFramer` turns raw socket bytes into complete packet buffers and
//! writes packet buffers back out, fixing up the length prefix if a hook
//! resized the packet without updating it.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::core::packet::{self, HEADER_SIZE, LENGTH_SIZE};
use crate::error::{ProxyError, Result};

/// Tokio codec for `[len u16 LE][opcode u16 LE][payload]` packets
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketFramer;

impl Decoder for PacketFramer {
    type Item = BytesMut;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let len = u16::from_le_bytes([src[0], src[1]]) as usize;
        if len < HEADER_SIZE {
            return Err(ProxyError::InvalidHeader);
        }

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        // split_to hands out an owned frame; the read buffer is reused for the rest
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<Vec<u8>> for PacketFramer {
    type Error = ProxyError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        if item.len() < HEADER_SIZE {
            return Err(ProxyError::InvalidHeader);
        }
        packet::check_size(item.len())?;

        let declared = u16::from_le_bytes([item[0], item[1]]) as usize;
        if declared != item.len() {
            debug!(
                declared,
                actual = item.len(),
                "Correcting packet length prefix"
            );
        }

        dst.reserve(item.len());
        dst.put_u16_le(item.len() as u16);
        dst.extend_from_slice(&item[LENGTH_SIZE..]);
        Ok(())
    }
}
