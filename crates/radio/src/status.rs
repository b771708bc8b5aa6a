//! Link-quality aggregation.
//!
//! Raw per-frame observations are too jittery to show an operator, so
//! everything here is debounced: signal strength holds the worst value
//! seen in a window, per-block loss holds the maximum over the current
//! and previous window, and the decoded bitrate averages over a longer
//! one. An adapter is "good" only while its packet counter keeps
//! advancing between windows.

use std::time::{Duration, Instant};

use rovercast_core::Chipset;
use serde::{Deserialize, Serialize};

use crate::LinkConfig;

/// Sentinel for "no sample this window". Deliberately positive so any
/// real dBm reading compares below it.
const NO_SIGNAL: i16 = 99;

pub fn chipset_code(chipset: Chipset) -> u8 {
    match chipset {
        Chipset::Ralink => 0,
        Chipset::Atheros => 1,
        Chipset::Realtek => 2,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    pub chipset: u8,
    pub received_packet_cnt: u32,
    /// Frames the capture path threw away as unparseable.
    pub wrong_crc_cnt: u32,
    /// Debounced signal, dBm; [`NO_SIGNAL`] (99) when nothing was heard.
    pub current_signal_dbm: i8,
    pub signal_good: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RxStatusSnapshot {
    pub received_block_cnt: u32,
    pub damaged_block_cnt: u32,
    pub received_packet_cnt: u32,
    pub lost_packet_cnt: u32,
    /// Debounced worst per-block loss, for the OSD loss bar.
    pub lost_per_block_cnt: u32,
    pub tx_restart_cnt: u32,
    /// Decoded application bitrate, kbit/s.
    pub kbitrate: u32,
    /// Raw frame bitrate on the best adapter, kbit/s.
    pub current_air_datarate_kbit: u32,
    pub adapters: Vec<AdapterStatus>,
}

impl RxStatusSnapshot {
    /// Best debounced signal across adapters that are currently passing
    /// packets, or `None` when the link is dead.
    pub fn best_signal_dbm(&self) -> Option<i8> {
        self.adapters
            .iter()
            .filter(|a| a.signal_good && i16::from(a.current_signal_dbm) != NO_SIGNAL)
            .map(|a| a.current_signal_dbm)
            .max()
    }
}

/// One-sided signal debounce: a worse reading replaces the held value
/// immediately, a better one only survives if it is still there when
/// the window closes.
#[derive(Debug)]
struct SignalTracker {
    dbm: i16,
    dbm_last: i16,
}

impl SignalTracker {
    fn new() -> Self {
        Self {
            dbm: NO_SIGNAL,
            dbm_last: NO_SIGNAL,
        }
    }

    fn observe(&mut self, dbm: i8) {
        self.dbm_last = self.dbm;
        self.dbm = i16::from(dbm);
        if self.dbm > self.dbm_last {
            self.dbm = self.dbm_last;
        }
    }

    fn publish(&mut self) -> i8 {
        let held = self.dbm;
        self.dbm = NO_SIGNAL;
        self.dbm_last = NO_SIGNAL;
        held as i8
    }
}

pub struct StatusAggregator {
    snapshot: RxStatusSnapshot,
    trackers: Vec<SignalTracker>,
    pktcount_last: Vec<u32>,
    window_missing: u32,
    window_missing_prev: u32,
    bytes_decoded: u64,
    bytes_air: u64,
    window_ts: Instant,
    rate_ts: Instant,
    air_rate_ts: Instant,
    status_interval: Duration,
    bitrate_interval: Duration,
}

impl StatusAggregator {
    pub fn new(cfg: &LinkConfig) -> Self {
        let now = Instant::now();
        Self {
            snapshot: RxStatusSnapshot::default(),
            trackers: Vec::new(),
            pktcount_last: Vec::new(),
            window_missing: 0,
            window_missing_prev: 0,
            bytes_decoded: 0,
            bytes_air: 0,
            window_ts: now,
            rate_ts: now,
            air_rate_ts: now,
            status_interval: cfg.status_interval,
            bitrate_interval: cfg.bitrate_interval,
        }
    }

    pub fn add_adapter(&mut self, name: &str, chipset: Chipset) -> usize {
        self.snapshot.adapters.push(AdapterStatus {
            name: name.to_string(),
            chipset: chipset_code(chipset),
            current_signal_dbm: NO_SIGNAL as i8,
            ..AdapterStatus::default()
        });
        self.trackers.push(SignalTracker::new());
        self.pktcount_last.push(0);
        self.snapshot.adapters.len() - 1
    }

    pub fn snapshot(&self) -> &RxStatusSnapshot {
        &self.snapshot
    }

    pub fn on_packet(&mut self, adapter: usize) {
        if let Some(a) = self.snapshot.adapters.get_mut(adapter) {
            a.received_packet_cnt = a.received_packet_cnt.wrapping_add(1);
        }
    }

    pub fn on_signal(&mut self, adapter: usize, dbm: i8) {
        if let Some(t) = self.trackers.get_mut(adapter) {
            t.observe(dbm);
        }
    }

    /// Mirrors the capture path's drop counter into the snapshot.
    pub fn set_wrong_crc(&mut self, adapter: usize, count: u32) {
        if let Some(a) = self.snapshot.adapters.get_mut(adapter) {
            a.wrong_crc_cnt = count;
        }
    }

    /// The adapter the air-datarate estimate follows: best debounced
    /// signal among those currently passing packets.
    pub fn best_adapter(&self) -> Option<usize> {
        self.snapshot
            .adapters
            .iter()
            .enumerate()
            .filter(|(_, a)| a.signal_good)
            .max_by_key(|(_, a)| a.current_signal_dbm)
            .map(|(i, _)| i)
    }

    /// Raw frame bytes heard on one adapter. Only the best adapter
    /// feeds the estimate, otherwise diversity duplicates would double
    /// the reported rate.
    pub fn on_air_bytes(&mut self, adapter: usize, bytes: usize, now: Instant) {
        if self.best_adapter() == Some(adapter) {
            self.bytes_air += bytes as u64;
        }
        let elapsed = now.saturating_duration_since(self.air_rate_ts);
        if elapsed >= self.bitrate_interval {
            let kbit = self.bytes_air * 8 / 1024;
            let scale = 1000.0 / elapsed.as_millis().max(1) as f64;
            self.snapshot.current_air_datarate_kbit = (kbit as f64 * scale) as u32;
            self.bytes_air = 0;
            self.air_rate_ts = now;
        }
    }

    pub fn on_block(&mut self, received: u32, lost: u32) {
        self.snapshot.received_block_cnt = self.snapshot.received_block_cnt.wrapping_add(1);
        self.snapshot.received_packet_cnt = self.snapshot.received_packet_cnt.wrapping_add(received);
        self.snapshot.lost_packet_cnt = self.snapshot.lost_packet_cnt.wrapping_add(lost);
        self.window_missing = self.window_missing.max(lost);
    }

    pub fn on_damaged(&mut self) {
        self.snapshot.damaged_block_cnt = self.snapshot.damaged_block_cnt.wrapping_add(1);
    }

    pub fn on_decoded(&mut self, bytes: usize, now: Instant) {
        self.bytes_decoded += bytes as u64;
        let elapsed = now.saturating_duration_since(self.rate_ts);
        if elapsed >= self.bitrate_interval {
            let kbit = self.bytes_decoded * 8 / 1024;
            let scale = 1000.0 / elapsed.as_millis().max(1) as f64;
            self.snapshot.kbitrate = (kbit as f64 * scale) as u32;
            self.bytes_decoded = 0;
            self.rate_ts = now;
        }
    }

    /// Transmitter reboot: every cumulative counter starts over.
    pub fn on_restart(&mut self) {
        let restarts = self.snapshot.tx_restart_cnt.wrapping_add(1);
        let adapters = std::mem::take(&mut self.snapshot.adapters);
        self.snapshot = RxStatusSnapshot {
            tx_restart_cnt: restarts,
            adapters,
            ..RxStatusSnapshot::default()
        };
        for a in &mut self.snapshot.adapters {
            a.received_packet_cnt = 0;
            a.wrong_crc_cnt = 0;
            a.signal_good = false;
        }
        for last in &mut self.pktcount_last {
            *last = 0;
        }
        self.window_missing = 0;
        self.window_missing_prev = 0;
        self.bytes_decoded = 0;
        self.bytes_air = 0;
    }

    /// Closes the debounce window if it has elapsed. Call once per
    /// receive-loop iteration.
    pub fn tick(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_ts) < self.status_interval {
            return;
        }
        self.window_ts = now;

        self.snapshot.lost_per_block_cnt = self.window_missing.max(self.window_missing_prev);
        self.window_missing_prev = self.window_missing;
        self.window_missing = 0;

        for (i, a) in self.snapshot.adapters.iter_mut().enumerate() {
            a.current_signal_dbm = self.trackers[i].publish();
            a.signal_good = a.received_packet_cnt != self.pktcount_last[i];
            self.pktcount_last[i] = a.received_packet_cnt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator_with_adapter() -> StatusAggregator {
        let mut s = StatusAggregator::new(&LinkConfig::default());
        s.add_adapter("wlan0", Chipset::Ralink);
        s
    }

    #[test]
    fn worse_signal_applies_immediately() {
        let mut s = aggregator_with_adapter();
        s.on_signal(0, -50);
        s.on_signal(0, -80);
        s.tick(Instant::now() + Duration::from_millis(300));
        assert_eq!(s.snapshot().adapters[0].current_signal_dbm, -80);
    }

    #[test]
    fn improvement_is_held_back_one_sample() {
        let mut s = aggregator_with_adapter();
        s.on_signal(0, -80);
        s.on_signal(0, -50); // single better sample does not stick
        s.tick(Instant::now() + Duration::from_millis(300));
        assert_eq!(s.snapshot().adapters[0].current_signal_dbm, -80);

        s.on_signal(0, -50);
        s.on_signal(0, -50); // sustained improvement does
        s.tick(Instant::now() + Duration::from_millis(600));
        assert_eq!(s.snapshot().adapters[0].current_signal_dbm, -50);
    }

    #[test]
    fn silent_window_publishes_the_sentinel() {
        let mut s = aggregator_with_adapter();
        s.on_signal(0, -60);
        s.tick(Instant::now() + Duration::from_millis(300));
        s.tick(Instant::now() + Duration::from_millis(600));
        assert_eq!(s.snapshot().adapters[0].current_signal_dbm, 99);
    }

    #[test]
    fn signal_good_tracks_packet_counter_advance() {
        let mut s = aggregator_with_adapter();
        s.on_packet(0);
        s.tick(Instant::now() + Duration::from_millis(300));
        assert!(s.snapshot().adapters[0].signal_good);
        // no packets in the next window
        s.tick(Instant::now() + Duration::from_millis(600));
        assert!(!s.snapshot().adapters[0].signal_good);
    }

    #[test]
    fn per_block_loss_holds_the_window_maximum() {
        let mut s = aggregator_with_adapter();
        s.on_block(10, 2);
        s.on_block(8, 4);
        s.on_block(12, 0);
        s.tick(Instant::now() + Duration::from_millis(300));
        assert_eq!(s.snapshot().lost_per_block_cnt, 4);
        // previous window still dominates a clean one
        s.on_block(12, 0);
        s.tick(Instant::now() + Duration::from_millis(600));
        assert_eq!(s.snapshot().lost_per_block_cnt, 4);
        s.on_block(12, 0);
        s.tick(Instant::now() + Duration::from_millis(900));
        assert_eq!(s.snapshot().lost_per_block_cnt, 0);
    }

    #[test]
    fn restart_zeroes_counters_but_keeps_adapters() {
        let mut s = aggregator_with_adapter();
        s.on_block(12, 0);
        s.on_packet(0);
        s.on_restart();
        let snap = s.snapshot();
        assert_eq!(snap.received_block_cnt, 0);
        assert_eq!(snap.tx_restart_cnt, 1);
        assert_eq!(snap.adapters.len(), 1);
        assert_eq!(snap.adapters[0].received_packet_cnt, 0);
    }

    #[test]
    fn air_datarate_follows_the_best_adapter_only() {
        let mut s = StatusAggregator::new(&LinkConfig::default());
        s.add_adapter("wlan0", Chipset::Ralink);
        s.add_adapter("wlan1", Chipset::Realtek);
        let start = Instant::now();

        // both adapters pass packets; wlan1 is stronger
        for a in 0..2 {
            s.on_packet(a);
        }
        s.on_signal(0, -80);
        s.on_signal(0, -80);
        s.on_signal(1, -50);
        s.on_signal(1, -50);
        s.tick(start + Duration::from_millis(300));
        assert_eq!(s.best_adapter(), Some(1));

        s.on_air_bytes(0, 500_000, start + Duration::from_millis(400));
        s.on_air_bytes(1, 64_000, start + Duration::from_millis(400));
        s.on_air_bytes(1, 64_000, start + Duration::from_millis(1001));
        // only wlan1's 128000 bytes count: ~1000 kbit over ~1s
        let kbit = s.snapshot().current_air_datarate_kbit;
        assert!((900..=1100).contains(&kbit), "air kbit {kbit}");
    }

    #[test]
    fn bitrate_averages_over_the_long_window() {
        let mut s = aggregator_with_adapter();
        let start = Instant::now();
        s.on_decoded(64_000, start + Duration::from_millis(100));
        s.on_decoded(64_000, start + Duration::from_millis(501));
        // 128000 bytes in ~0.5s -> about 2000 kbit/s
        let kbit = s.snapshot().kbitrate;
        assert!((1900..=2100).contains(&kbit), "kbitrate {kbit}");
    }
}
