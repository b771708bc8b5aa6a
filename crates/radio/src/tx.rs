//! Block/FEC transmit engine.
//!
//! Application bytes are chunked into fixed-size data slots. A slot
//! closes once it holds `min_packet_length` bytes, and a full set of
//! data slots is erasure-coded and handed to the sink as interleaved
//! data and parity frames. Each frame payload is the 4-byte sequence
//! number followed by the chunk; radio headers are the sink's problem.
//!
//! When injecting a whole block takes longer than the air can drain it,
//! the engine sheds load by skipping every second parity frame for a
//! short while instead of letting the send queue back up.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use rovercast_core::block::{write_chunk_length, PAYLOAD_HEADER_LEN, WIFI_HEADER_LEN};
use serde::{Deserialize, Serialize};

use crate::fec::BlockCoder;
use crate::{LinkConfig, RadioError};

/// Number of blocks-worth of interleave steps to shed parity for after
/// a slow injection.
const SKIPFEC_PENALTY: i32 = 4;

/// Where finished frames go. Implemented by the raw-socket injector set
/// and by in-memory sinks in tests and the simulator.
pub trait FrameSink {
    /// Sends one frame payload (sequence header plus chunk).
    fn send_frame(&mut self, payload: &[u8]) -> Result<(), RadioError>;
}

impl FrameSink for Vec<Vec<u8>> {
    fn send_frame(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        self.push(payload.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxStatus {
    pub injected_block_cnt: u32,
    pub skipped_fec_cnt: u32,
    pub injection_fail_cnt: u32,
    /// Worst per-block injection time in the last debounce window, µs.
    pub injection_time_block: u64,
}

pub struct TxStream {
    cfg: LinkConfig,
    coder: BlockCoder,
    slots: Vec<Vec<u8>>,
    curr: usize,
    seq: u32,
    skipfec: i32,
    injection_hold: Duration,
    injection_window: Instant,
    scratch: BytesMut,
    status: TxStatus,
}

impl TxStream {
    pub fn new(cfg: LinkConfig) -> Result<Self, RadioError> {
        cfg.validate()?;
        let coder = BlockCoder::new(cfg.geometry)?;
        let slots = (0..cfg.geometry.data_packets)
            .map(|_| vec![0u8; PAYLOAD_HEADER_LEN])
            .collect();
        Ok(Self {
            scratch: BytesMut::with_capacity(WIFI_HEADER_LEN + cfg.geometry.packet_length),
            cfg,
            coder,
            slots,
            curr: 0,
            seq: 0,
            skipfec: 0,
            injection_hold: Duration::ZERO,
            injection_window: Instant::now(),
            status: TxStatus::default(),
        })
    }

    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    /// Appends application bytes to the stream, transmitting every block
    /// that fills up along the way.
    pub fn write(&mut self, mut data: &[u8], sink: &mut dyn FrameSink) -> Result<(), RadioError> {
        let geometry = self.cfg.geometry;
        while !data.is_empty() {
            let slot = &mut self.slots[self.curr];
            let take = (geometry.packet_length - slot.len()).min(data.len());
            slot.extend_from_slice(&data[..take]);
            data = &data[take..];

            if slot.len() >= geometry.min_packet_length {
                self.close_slot();
                if self.curr == geometry.data_packets {
                    self.transmit_block(sink)?;
                }
            }
        }
        Ok(())
    }

    /// Forces out whatever is buffered. The open slot is closed short
    /// and the remaining data slots of the block carry zero-length
    /// chunks, which the receiver discards.
    pub fn flush(&mut self, sink: &mut dyn FrameSink) -> Result<(), RadioError> {
        if self.curr == 0 && self.slots[0].len() == PAYLOAD_HEADER_LEN {
            return Ok(());
        }
        if self.slots[self.curr].len() > PAYLOAD_HEADER_LEN {
            self.close_slot();
        }
        while self.curr < self.cfg.geometry.data_packets {
            self.close_slot();
        }
        self.transmit_block(sink)
    }

    fn close_slot(&mut self) {
        let slot = &mut self.slots[self.curr];
        let app_len = (slot.len() - PAYLOAD_HEADER_LEN) as u32;
        write_chunk_length(slot, app_len);
        self.curr += 1;
    }

    fn transmit_block(&mut self, sink: &mut dyn FrameSink) -> Result<(), RadioError> {
        let geometry = self.cfg.geometry;
        let started = Instant::now();

        for slot in &mut self.slots {
            slot.resize(geometry.packet_length, 0);
        }
        let parity = self.coder.encode_parity(&self.slots)?;

        let base = self.seq;
        let mut di = 0usize;
        let mut fi = 0usize;
        let mut counterfec = 0u32;
        while di < geometry.data_packets || fi < geometry.fec_packets {
            if di < geometry.data_packets {
                let slot = std::mem::take(&mut self.slots[di]);
                self.transmit_frame(base.wrapping_add(di as u32), &slot, sink)?;
                self.slots[di] = slot;
                di += 1;
            }
            if fi < geometry.fec_packets {
                let seq = base.wrapping_add((geometry.data_packets + fi) as u32);
                if self.skipfec > 0 {
                    if counterfec % 2 == 0 {
                        self.transmit_frame(seq, &parity[fi], sink)?;
                    } else {
                        self.status.skipped_fec_cnt += 1;
                    }
                    counterfec += 1;
                } else {
                    self.transmit_frame(seq, &parity[fi], sink)?;
                }
                fi += 1;
            }
            if self.skipfec > 0 {
                self.skipfec -= 1;
            }
        }

        self.seq = self.seq.wrapping_add(geometry.packets_per_block() as u32);
        for slot in &mut self.slots {
            slot.clear();
            slot.resize(PAYLOAD_HEADER_LEN, 0);
        }
        self.curr = 0;
        self.status.injected_block_cnt = self.status.injected_block_cnt.wrapping_add(1);

        let took = started.elapsed();
        // the air drains roughly 1.5 bytes/µs at the configured rates;
        // a slower block means the driver queue is filling up
        let budget_us = (geometry.packet_length * geometry.packets_per_block()) as u64 * 2 / 3;
        if took.as_micros() as u64 > budget_us {
            self.skipfec = SKIPFEC_PENALTY;
            log::info!(
                "slow injection: block took {}µs (budget {}µs), shedding parity",
                took.as_micros(),
                budget_us
            );
        }
        if took > self.injection_hold {
            self.injection_hold = took;
        }
        let now = Instant::now();
        if now.duration_since(self.injection_window) >= self.cfg.status_interval {
            self.status.injection_time_block = self.injection_hold.as_micros() as u64;
            self.injection_hold = Duration::ZERO;
            self.injection_window = now;
        }
        Ok(())
    }

    fn transmit_frame(
        &mut self,
        seq: u32,
        chunk: &[u8],
        sink: &mut dyn FrameSink,
    ) -> Result<(), RadioError> {
        self.scratch.clear();
        self.scratch.put_u32_le(seq);
        self.scratch.put_slice(chunk);
        if let Err(e) = sink.send_frame(&self.scratch) {
            self.status.injection_fail_cnt = self.status.injection_fail_cnt.wrapping_add(1);
            return Err(e);
        }
        Ok(())
    }
}
