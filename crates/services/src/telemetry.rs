//! Telemetry downlink: vehicle sensors to the ground OSD.

use std::time::{Duration, Instant};

use anyhow::Result;
use rovercast_core::telemetry::{VectorTelemetry, TELEMETRY_LEN};
use rovercast_core::PORT_TELEMETRY;
use rovercast_radio::monitor::MonitorSet;
use rovercast_radio::raw::InjectorSet;
use rovercast_radio::snapshot::{self, SnapshotBus};
use rovercast_radio::{LinkConfig, RxStream, TxStream};

use crate::slots;
use crate::ticker::Ticker;

const TELEMETRY_PERIOD: Duration = Duration::from_millis(20);

/// Vehicle side: forwards the latest sensor record every cycle.
pub fn run_tx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_TELEMETRY);
    let mut sink = InjectorSet::open_all(cfg.port, &cfg.headers)?;
    let status_interval = cfg.status_interval;
    let mut tx = TxStream::new(cfg)?;

    let mut ticker = Ticker::new(TELEMETRY_PERIOD);
    let mut status_at = Instant::now();
    loop {
        ticker.wait();
        if let Some(record) = snapshot::read_latest::<Vec<u8>>(bus, slots::TELEMETRY_RECORD)? {
            tx.write(&record, &mut sink)?;
            tx.flush(&mut sink)?;
        }
        if status_at.elapsed() >= status_interval {
            snapshot::publish(bus, slots::TELEMETRY_TX_STATUS, tx.status())?;
            status_at = Instant::now();
        }
    }
}

/// Ground side: decodes the stream and publishes each record plus the
/// link status.
pub fn run_rx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_TELEMETRY);
    let mut monitors = MonitorSet::open_all(cfg.port)?;
    let mut rx = RxStream::new(cfg.clone())?;
    for m in monitors.monitors() {
        rx.stats_mut().add_adapter(m.ifname(), m.chipset());
    }

    let mut stream = Vec::new();
    let mut publish_at = Instant::now();
    loop {
        let frame = monitors.poll(cfg.poll_timeout)?;
        let now = Instant::now();
        if let Some(frame) = frame {
            rx.handle_frame(&frame, &mut stream, now)?;
        }
        rx.tick(now);

        while let Some(record) = take_record(&mut stream) {
            snapshot::publish(bus, slots::TELEMETRY_RECORD, &record)?;
        }
        if now.duration_since(publish_at) >= cfg.status_interval {
            for (i, m) in monitors.monitors().iter().enumerate() {
                rx.stats_mut().set_wrong_crc(i, m.bad_frame_cnt());
            }
            snapshot::publish(bus, slots::TELEMETRY_RX_STATUS, rx.stats().snapshot())?;
            publish_at = now;
        }
    }
}

/// Pops the next valid record off the decoded byte stream. Damage from
/// an infeasible block can leave partial records behind, so this scans
/// forward to the next start code that also passes the CRC.
fn take_record(stream: &mut Vec<u8>) -> Option<Vec<u8>> {
    while stream.len() >= TELEMETRY_LEN {
        if VectorTelemetry::decode(&stream[..TELEMETRY_LEN]).is_ok() {
            return Some(stream.drain(..TELEMETRY_LEN).collect());
        }
        stream.drain(..1);
    }
    None
}
