//! Deterministic lossy-channel model for exercising the link engines
//! without radio hardware.
//!
//! The channel drops, duplicates and reorders frames according to a
//! profile; seeding the RNG makes every run reproducible, which is
//! what turns "it survived my desk test" into a regression test.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rovercast_core::Chipset;
use rovercast_radio::{LinkConfig, RxFrame, RxStream, TxStream};
use std::time::Instant;

/// Per-frame probabilities, all independent.
#[derive(Debug, Clone, Copy)]
pub struct ChannelProfile {
    pub name: &'static str,
    pub loss: f64,
    pub duplicate: f64,
    /// Probability of a frame being swapped with its successor.
    pub reorder: f64,
}

/// Open field, antennas aligned.
pub const CLEAR: ChannelProfile = ChannelProfile {
    name: "clear",
    loss: 0.005,
    duplicate: 0.10,
    reorder: 0.001,
};

/// Vehicle behind buildings, multipath everywhere.
pub const URBAN: ChannelProfile = ChannelProfile {
    name: "urban",
    loss: 0.08,
    duplicate: 0.25,
    reorder: 0.01,
};

/// Edge of range; parity will not always be enough.
pub const FRINGE: ChannelProfile = ChannelProfile {
    name: "fringe",
    loss: 0.35,
    duplicate: 0.05,
    reorder: 0.02,
};

pub fn profile_by_name(name: &str) -> Option<ChannelProfile> {
    [CLEAR, URBAN, FRINGE].into_iter().find(|p| p.name == name)
}

pub struct LossyChannel {
    profile: ChannelProfile,
    rng: StdRng,
}

impl LossyChannel {
    pub fn new(profile: ChannelProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Runs a batch of frames through the channel.
    pub fn transmit(&mut self, frames: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = Vec::with_capacity(frames.len());
        for frame in frames {
            if self.rng.random_bool(self.profile.loss) {
                continue;
            }
            if self.rng.random_bool(self.profile.duplicate) {
                out.push(frame.clone());
            }
            out.push(frame);
        }
        let mut i = 0;
        while i + 1 < out.len() {
            if self.rng.random_bool(self.profile.reorder) {
                out.swap(i, i + 1);
            }
            i += 1;
        }
        out
    }
}

#[derive(Debug)]
pub struct TransferReport {
    pub bytes_in: usize,
    pub bytes_out: usize,
    pub frames_sent: usize,
    pub frames_delivered: usize,
    pub blocks_received: u32,
    pub blocks_damaged: u32,
    pub packets_lost: u32,
}

/// Pushes one payload through tx, channel and rx and reports what came
/// out the other side.
pub fn run_transfer(
    profile: ChannelProfile,
    payload: &[u8],
    seed: u64,
) -> anyhow::Result<TransferReport> {
    let cfg = LinkConfig::for_port(1);
    let mut tx = TxStream::new(cfg.clone())?;
    let mut rx = RxStream::new(cfg)?;
    rx.stats_mut().add_adapter("sim0", Chipset::Ralink);

    let mut sink: Vec<Vec<u8>> = Vec::new();
    tx.write(payload, &mut sink)?;
    tx.flush(&mut sink)?;
    let frames_sent = sink.len();

    let mut channel = LossyChannel::new(profile, seed);
    let delivered = channel.transmit(sink);
    let frames_delivered = delivered.len();

    let now = Instant::now();
    let mut out = Vec::new();
    for payload in &delivered {
        rx.handle_frame(
            &RxFrame {
                payload: payload.clone(),
                dbm: Some(-65),
                adapter: 0,
            },
            &mut out,
            now,
        )?;
    }
    rx.flush(&mut out, now)?;

    let snap = rx.stats().snapshot();
    Ok(TransferReport {
        bytes_in: payload.len(),
        bytes_out: out.len(),
        frames_sent,
        frames_delivered,
        blocks_received: snap.received_block_cnt,
        blocks_damaged: snap.damaged_block_cnt,
        packets_lost: snap.lost_packet_cnt,
    })
}
