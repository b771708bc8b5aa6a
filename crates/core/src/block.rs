//! Sequence-number arithmetic and payload chunk layout.
//!
//! A block is `DATA_PACKETS_PER_BLOCK` data chunks followed by
//! `FEC_PACKETS_PER_BLOCK` parity chunks, all sharing one erasure
//! coding unit. Sequence numbers are assigned contiguously, so the
//! receiver derives block and slot purely from the sequence number —
//! there is no block-id field on the wire.

use crate::CodecError;

pub const DATA_PACKETS_PER_BLOCK: usize = 8;
pub const FEC_PACKETS_PER_BLOCK: usize = 4;
pub const PACKETS_PER_BLOCK: usize = DATA_PACKETS_PER_BLOCK + FEC_PACKETS_PER_BLOCK;

/// Fixed wire size of one chunk: 4-byte length prefix + data + padding.
pub const PACKET_LENGTH: usize = 1024;
/// A data slot closes once it holds at least this many bytes.
pub const MIN_PACKET_LENGTH: usize = 24;
/// Length prefix in front of each chunk's application data.
pub const PAYLOAD_HEADER_LEN: usize = 4;
/// Sequence-number header on every physical frame, outside of FEC.
pub const WIFI_HEADER_LEN: usize = 4;

/// Largest frame payload we accept from a capture.
pub const MAX_MTU: usize = 1500;

#[inline]
pub fn block_index(seq: u32) -> u32 {
    seq / PACKETS_PER_BLOCK as u32
}

#[inline]
pub fn slot_index(seq: u32) -> usize {
    (seq % PACKETS_PER_BLOCK as u32) as usize
}

#[inline]
pub fn is_data_slot(slot: usize) -> bool {
    slot < DATA_PACKETS_PER_BLOCK
}

/// Block/chunk geometry for one stream. The defaults match the only
/// deployed configuration; keeping them in one place lets tests and the
/// simulator shrink blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    pub data_packets: usize,
    pub fec_packets: usize,
    pub packet_length: usize,
    pub min_packet_length: usize,
}

impl Default for BlockGeometry {
    fn default() -> Self {
        Self {
            data_packets: DATA_PACKETS_PER_BLOCK,
            fec_packets: FEC_PACKETS_PER_BLOCK,
            packet_length: PACKET_LENGTH,
            min_packet_length: MIN_PACKET_LENGTH,
        }
    }
}

impl BlockGeometry {
    pub fn packets_per_block(&self) -> usize {
        self.data_packets + self.fec_packets
    }

    /// Application bytes one chunk can carry.
    pub fn chunk_capacity(&self) -> usize {
        self.packet_length - PAYLOAD_HEADER_LEN
    }

    /// Application bytes one whole block can carry.
    pub fn block_capacity(&self) -> usize {
        self.data_packets * self.chunk_capacity()
    }

    pub fn block_of(&self, seq: u32) -> u32 {
        seq / self.packets_per_block() as u32
    }

    pub fn slot_of(&self, seq: u32) -> usize {
        (seq % self.packets_per_block() as u32) as usize
    }
}

pub fn write_sequence(buf: &mut [u8], seq: u32) {
    buf[..WIFI_HEADER_LEN].copy_from_slice(&seq.to_le_bytes());
}

pub fn read_sequence(buf: &[u8]) -> Result<u32, CodecError> {
    if buf.len() < WIFI_HEADER_LEN {
        return Err(CodecError::ShortRecord {
            got: buf.len(),
            need: WIFI_HEADER_LEN,
        });
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

pub fn write_chunk_length(chunk: &mut [u8], len: u32) {
    chunk[..PAYLOAD_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
}

/// Reads a chunk's length prefix, clamped to the chunk capacity. After
/// a failed reconstruction the prefix of an unreceived slot is
/// undefined, and an oversized value must never index out of bounds.
pub fn read_chunk_length(chunk: &[u8], geometry: &BlockGeometry) -> Result<usize, CodecError> {
    if chunk.len() < PAYLOAD_HEADER_LEN {
        return Err(CodecError::ShortRecord {
            got: chunk.len(),
            need: PAYLOAD_HEADER_LEN,
        });
    }
    let len = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
    Ok(len.min(geometry.chunk_capacity()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_to_block_slot_mapping() {
        // fixed mapping table for D=8, F=4
        for (seq, block, slot) in [
            (0u32, 0u32, 0usize),
            (11, 0, 11),
            (12, 1, 0),
            (23, 1, 11),
            (24, 2, 0),
        ] {
            assert_eq!(block_index(seq), block, "seq {seq}");
            assert_eq!(slot_index(seq), slot, "seq {seq}");
        }
    }

    #[test]
    fn parity_slots_follow_data_slots() {
        assert!(is_data_slot(7));
        assert!(!is_data_slot(8));
        assert!(!is_data_slot(11));
    }

    #[test]
    fn chunk_length_is_clamped() {
        let geometry = BlockGeometry::default();
        let mut chunk = vec![0u8; geometry.packet_length];
        write_chunk_length(&mut chunk, 5000);
        assert_eq!(
            read_chunk_length(&chunk, &geometry).unwrap(),
            geometry.chunk_capacity()
        );
        write_chunk_length(&mut chunk, 17);
        assert_eq!(read_chunk_length(&chunk, &geometry).unwrap(), 17);
    }

    #[test]
    fn sequence_round_trip() {
        let mut buf = [0u8; 8];
        write_sequence(&mut buf, 0xdead_beef);
        assert_eq!(read_sequence(&buf).unwrap(), 0xdead_beef);
    }
}
