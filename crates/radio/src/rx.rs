//! Block/FEC receive engine.
//!
//! Keeps a single block window: frames for the current block are
//! slotted in by sequence number, and the block is decoded the moment
//! a newer block shows up. Duplicate copies of a frame (the normal
//! case with several adapters listening) are ignored after the first
//! good one. A block that jumps far backwards means the transmitter
//! rebooted, so all state starts over instead of waiting out the old
//! sequence range.

use std::time::Instant;

use rovercast_core::block::{read_chunk_length, read_sequence, PAYLOAD_HEADER_LEN, WIFI_HEADER_LEN};

use crate::fec::BlockCoder;
use crate::status::StatusAggregator;
use crate::{LinkConfig, RadioError};

/// One captured frame, radio headers already stripped.
#[derive(Debug, Clone)]
pub struct RxFrame {
    /// Sequence header plus chunk.
    pub payload: Vec<u8>,
    /// Antenna signal from radiotap, when the capture carried one.
    pub dbm: Option<i8>,
    /// Index of the adapter that heard it.
    pub adapter: usize,
}

struct Slot {
    data: Vec<u8>,
    received: bool,
}

pub struct RxStream {
    cfg: LinkConfig,
    coder: BlockCoder,
    slots: Vec<Slot>,
    /// Block currently being collected; -1 before the first frame.
    block_num: i64,
    /// Newest block ever seen, for restart detection.
    max_block_num: i64,
    stats: StatusAggregator,
}

impl RxStream {
    pub fn new(cfg: LinkConfig) -> Result<Self, RadioError> {
        cfg.validate()?;
        let coder = BlockCoder::new(cfg.geometry)?;
        let slots = (0..cfg.geometry.packets_per_block())
            .map(|_| Slot {
                data: vec![0u8; cfg.geometry.packet_length],
                received: false,
            })
            .collect();
        let stats = StatusAggregator::new(&cfg);
        Ok(Self {
            cfg,
            coder,
            slots,
            block_num: -1,
            max_block_num: -1,
            stats,
        })
    }

    pub fn stats(&self) -> &StatusAggregator {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut StatusAggregator {
        &mut self.stats
    }

    /// Closes the status debounce windows if they elapsed.
    pub fn tick(&mut self, now: Instant) {
        self.stats.tick(now);
    }

    /// Feeds one captured frame. Decoded application bytes, if a block
    /// completed, are appended to `out`.
    pub fn handle_frame(
        &mut self,
        frame: &RxFrame,
        out: &mut Vec<u8>,
        now: Instant,
    ) -> Result<(), RadioError> {
        self.stats.on_packet(frame.adapter);
        if let Some(dbm) = frame.dbm {
            self.stats.on_signal(frame.adapter, dbm);
        }
        self.stats
            .on_air_bytes(frame.adapter, frame.payload.len(), now);

        let Ok(seq) = read_sequence(&frame.payload) else {
            log::debug!(
                "dropping {}-byte runt frame on adapter {}",
                frame.payload.len(),
                frame.adapter
            );
            return Ok(());
        };
        let chunk = &frame.payload[WIFI_HEADER_LEN..];
        let block = i64::from(self.cfg.geometry.block_of(seq));

        if block + i64::from(self.cfg.restart_threshold) < self.max_block_num {
            log::info!(
                "transmitter restart: block {} after block {}",
                block,
                self.max_block_num
            );
            self.stats.on_restart();
            self.block_num = -1;
            self.max_block_num = -1;
            self.reset_slots();
        }

        if block != self.block_num {
            if block <= self.max_block_num {
                // straggler from a block already decoded
                return Ok(());
            }
            if self.block_num != -1 {
                self.decode_block(out, now)?;
            }
            self.block_num = block;
            self.max_block_num = block;
        }

        let slot = &mut self.slots[self.cfg.geometry.slot_of(seq)];
        if !slot.received {
            let take = chunk.len().min(self.cfg.geometry.packet_length);
            slot.data[..take].copy_from_slice(&chunk[..take]);
            slot.data[take..].fill(0);
            slot.received = true;
        }
        Ok(())
    }

    /// Decodes the pending block without waiting for the next one to
    /// start. For shutdown and for transfers that simply end.
    pub fn flush(&mut self, out: &mut Vec<u8>, now: Instant) -> Result<(), RadioError> {
        if self.block_num == -1 {
            return Ok(());
        }
        self.decode_block(out, now)?;
        self.block_num = -1;
        Ok(())
    }

    fn reset_slots(&mut self) {
        for slot in &mut self.slots {
            slot.received = false;
        }
    }

    fn decode_block(&mut self, out: &mut Vec<u8>, now: Instant) -> Result<(), RadioError> {
        let g = self.cfg.geometry;
        let datas_missing = self.slots[..g.data_packets]
            .iter()
            .filter(|s| !s.received)
            .count();
        let fecs_missing = self.slots[g.data_packets..]
            .iter()
            .filter(|s| !s.received)
            .count();
        let good_fecs = g.fec_packets - fecs_missing;
        let lost = (datas_missing + fecs_missing) as u32;
        self.stats
            .on_block(g.packets_per_block() as u32 - lost, lost);

        let failed = datas_missing > good_fecs;
        let mut rebuilt: Option<Vec<Option<Vec<u8>>>> = None;
        if failed {
            log::debug!(
                "block {}: {} data chunks lost, only {} parity available",
                self.block_num,
                datas_missing,
                good_fecs
            );
            self.stats.on_damaged();
        } else if datas_missing > 0 {
            let mut shards: Vec<Option<Vec<u8>>> = self
                .slots
                .iter()
                .map(|s| s.received.then(|| s.data.clone()))
                .collect();
            self.coder.reconstruct(&mut shards)?;
            rebuilt = Some(shards);
        }

        for i in 0..g.data_packets {
            if failed && !self.slots[i].received {
                continue;
            }
            let chunk: &[u8] = match &rebuilt {
                Some(shards) => shards[i].as_deref().unwrap_or(&self.slots[i].data),
                None => &self.slots[i].data,
            };
            let len = read_chunk_length(chunk, &g)?;
            out.extend_from_slice(&chunk[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + len]);
            self.stats.on_decoded(len, now);
        }

        self.reset_slots();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxStream;
    use rovercast_core::Chipset;

    fn link() -> (TxStream, RxStream) {
        let cfg = LinkConfig::for_port(1);
        let tx = TxStream::new(cfg.clone()).unwrap();
        let mut rx = RxStream::new(cfg).unwrap();
        rx.stats_mut().add_adapter("wlan0", Chipset::Ralink);
        (tx, rx)
    }

    fn frame(payload: &[u8]) -> RxFrame {
        RxFrame {
            payload: payload.to_vec(),
            dbm: Some(-55),
            adapter: 0,
        }
    }

    fn feed(rx: &mut RxStream, frames: &[Vec<u8>], out: &mut Vec<u8>) {
        let now = Instant::now();
        for f in frames {
            rx.handle_frame(&frame(f), out, now).unwrap();
        }
        rx.flush(out, now).unwrap();
    }

    #[test]
    fn clean_block_round_trips() {
        let (mut tx, mut rx) = link();
        let message: Vec<u8> = (0..8 * 1020).map(|i| (i % 251) as u8).collect();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&message, &mut sink).unwrap();

        let mut out = Vec::new();
        feed(&mut rx, &sink, &mut out);
        assert_eq!(out, message);
        assert_eq!(rx.stats().snapshot().received_block_cnt, 1);
        assert_eq!(rx.stats().snapshot().damaged_block_cnt, 0);
    }

    #[test]
    fn short_flushed_payload_round_trips() {
        let (mut tx, mut rx) = link();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(b"x", &mut sink).unwrap();
        tx.flush(&mut sink).unwrap();

        let mut out = Vec::new();
        feed(&mut rx, &sink, &mut out);
        assert_eq!(out, b"x");
    }

    #[test]
    fn survives_maximum_tolerable_loss() {
        let (mut tx, mut rx) = link();
        let message: Vec<u8> = (0..8 * 1020).map(|i| (i % 127) as u8).collect();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&message, &mut sink).unwrap();

        // drop any four of the twelve frames
        let kept: Vec<Vec<u8>> = sink
            .iter()
            .enumerate()
            .filter(|(i, _)| ![0, 3, 7, 9].contains(i))
            .map(|(_, f)| f.clone())
            .collect();
        let mut out = Vec::new();
        feed(&mut rx, &kept, &mut out);
        assert_eq!(out, message);
        assert_eq!(rx.stats().snapshot().damaged_block_cnt, 0);
        assert_eq!(rx.stats().snapshot().lost_packet_cnt, 4);
    }

    #[test]
    fn infeasible_block_emits_only_received_chunks() {
        let (mut tx, mut rx) = link();
        // distinct byte per chunk so surviving ranges are identifiable
        let message: Vec<u8> = (0..8u8).flat_map(|c| vec![c; 1020]).collect();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&message, &mut sink).unwrap();

        // interleave order is d0 f0 d1 f1 d2 f2 d3 f3 d4..d7; drop the
        // frames carrying data chunks 0-4 (five data losses, 4 parity
        // cannot cover them)
        let drop_idx = [0usize, 2, 4, 6, 8];
        let kept: Vec<Vec<u8>> = sink
            .iter()
            .enumerate()
            .filter(|(i, _)| !drop_idx.contains(i))
            .map(|(_, f)| f.clone())
            .collect();
        let mut out = Vec::new();
        feed(&mut rx, &kept, &mut out);

        let expected: Vec<u8> = (5..8u8).flat_map(|c| vec![c; 1020]).collect();
        assert_eq!(out, expected);
        assert_eq!(rx.stats().snapshot().damaged_block_cnt, 1);
    }

    #[test]
    fn duplicate_frames_are_idempotent() {
        let (mut tx, mut rx) = link();
        let message: Vec<u8> = (0..8 * 1020).map(|i| (i % 97) as u8).collect();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&message, &mut sink).unwrap();

        let mut doubled = Vec::new();
        for f in &sink {
            doubled.push(f.clone());
            let mut corrupt = f.clone();
            // later copies must not overwrite the first good one
            corrupt[100] ^= 0xff;
            doubled.push(corrupt);
        }
        let mut out = Vec::new();
        feed(&mut rx, &doubled, &mut out);
        assert_eq!(out, message);
    }

    #[test]
    fn stale_frame_from_decoded_block_is_ignored() {
        let (mut tx, mut rx) = link();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&vec![1u8; 2 * 8 * 1020], &mut sink).unwrap();

        let now = Instant::now();
        let mut out = Vec::new();
        // all of block 0, then block 1 starts and decodes block 0
        for f in &sink[..13] {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        let decoded = out.len();
        assert_eq!(decoded, 8 * 1020);
        // a late duplicate from block 0 must not disturb block 1
        rx.handle_frame(&frame(&sink[5]), &mut out, now).unwrap();
        for f in &sink[13..] {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        rx.flush(&mut out, now).unwrap();
        assert_eq!(out.len(), 2 * 8 * 1020);
    }

    #[test]
    fn far_backward_jump_resets_the_link() {
        let cfg = LinkConfig::for_port(1);
        let mut rx = RxStream::new(cfg.clone()).unwrap();
        rx.stats_mut().add_adapter("wlan0", Chipset::Ralink);

        // transmitter A ran up to block 200
        let mut tx_a = TxStream::new(cfg.clone()).unwrap();
        let mut sink_a: Vec<Vec<u8>> = Vec::new();
        tx_a.write(&vec![1u8; 201 * 8 * 1020], &mut sink_a).unwrap();
        let now = Instant::now();
        let mut out = Vec::new();
        for f in &sink_a {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        assert!(rx.stats().snapshot().received_block_cnt > 0);

        // transmitter reboots and starts at block 0 again
        let mut tx_b = TxStream::new(cfg).unwrap();
        let mut sink_b: Vec<Vec<u8>> = Vec::new();
        tx_b.write(&vec![2u8; 8 * 1020], &mut sink_b).unwrap();
        out.clear();
        for f in &sink_b {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        rx.flush(&mut out, now).unwrap();

        let snap = rx.stats().snapshot();
        assert_eq!(snap.tx_restart_cnt, 1);
        assert_eq!(snap.received_block_cnt, 1);
        assert_eq!(out, vec![2u8; 8 * 1020]);
    }

    #[test]
    fn reboot_after_fifty_blocks_restarts() {
        let cfg = LinkConfig::for_port(1);
        let mut rx = RxStream::new(cfg.clone()).unwrap();
        rx.stats_mut().add_adapter("wlan0", Chipset::Ralink);
        let mut tx = TxStream::new(cfg.clone()).unwrap();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&vec![1u8; 51 * 8 * 1020], &mut sink).unwrap();

        let now = Instant::now();
        let mut out = Vec::new();
        for f in &sink {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        // blocks 0..=50 seen; a rebooted transmitter at block 0 is now
        // outside the 32-block guard
        let mut tx = TxStream::new(cfg).unwrap();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&vec![2u8; 8 * 1020], &mut sink).unwrap();
        out.clear();
        for f in &sink {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        rx.flush(&mut out, now).unwrap();
        let snap = rx.stats().snapshot();
        assert_eq!(snap.tx_restart_cnt, 1);
        assert_eq!(snap.received_block_cnt, 1);
        assert_eq!(out, vec![2u8; 8 * 1020]);
    }

    #[test]
    fn nearby_backward_jump_does_not_reset() {
        let cfg = LinkConfig::for_port(1);
        let mut rx = RxStream::new(cfg.clone()).unwrap();
        rx.stats_mut().add_adapter("wlan0", Chipset::Ralink);
        let mut tx = TxStream::new(cfg).unwrap();
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.write(&vec![1u8; 100 * 8 * 1020], &mut sink).unwrap();

        let now = Instant::now();
        let mut out = Vec::new();
        for f in &sink {
            rx.handle_frame(&frame(f), &mut out, now).unwrap();
        }
        // a reordered frame a few blocks back is a straggler, not a restart
        rx.handle_frame(&frame(&sink[90 * 12]), &mut out, now)
            .unwrap();
        assert_eq!(rx.stats().snapshot().tx_restart_cnt, 0);
    }
}
