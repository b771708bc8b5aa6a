//! Diagnostic reports: the vehicle tells the ground how the uplinks
//! look from its side, plus its own health.

use std::time::Instant;

use anyhow::Result;
use rovercast_core::rssi::{RssiReport, RSSI_REPORT_LEN};
use rovercast_core::PORT_RSSI;
use rovercast_radio::monitor::MonitorSet;
use rovercast_radio::raw::InjectorSet;
use rovercast_radio::snapshot::{self, SnapshotBus};
use rovercast_radio::status::RxStatusSnapshot;
use rovercast_radio::tx::TxStatus;
use rovercast_radio::{LinkConfig, RxStream, TxStream};

use crate::slots;
use crate::sysinfo::{read_temperature, CpuLoad};
use crate::ticker::Ticker;

/// No adapter heard anything this window.
const SIGNAL_NONE: i8 = -127;

/// Vehicle side: assembles and transmits one report per status window.
pub fn run_tx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_RSSI);
    let mut sink = InjectorSet::open_all(cfg.port, &cfg.headers)?;
    let rate = cfg.headers.rate;
    let cts = cfg.headers.use_cts;
    let mut tx = TxStream::new(cfg.clone())?;
    let mut cpu = CpuLoad::new()?;

    let mut ticker = Ticker::new(cfg.status_interval);
    loop {
        ticker.wait();

        let rc_status: Option<RxStatusSnapshot> =
            snapshot::read_latest(bus, slots::RC_RX_STATUS)?;
        let uplink_status: Option<RxStatusSnapshot> =
            snapshot::read_latest(bus, slots::UPLINK_RX_STATUS)?;
        let tx_status: Option<TxStatus> =
            snapshot::read_latest(bus, slots::TELEMETRY_TX_STATUS)?;

        let mut report = RssiReport {
            cpuload: cpu.sample()?,
            temp: read_temperature(),
            // nominal downlink datarate so the OSD can scale its bars
            bitrate_kbit: u16::from(rate) * 1024,
            cts: cts as u8,
            undervolt: snapshot::read_latest::<u8>(bus, slots::UNDERVOLT)?.unwrap_or(0),
            signal: SIGNAL_NONE,
            signal_rc: SIGNAL_NONE,
            ..Default::default()
        };
        if let Some(s) = &rc_status {
            report.signal_rc = s.best_signal_dbm().unwrap_or(SIGNAL_NONE);
            report.lost_packets_rc = s.lost_packet_cnt;
        }
        if let Some(s) = &uplink_status {
            report.signal = s.best_signal_dbm().unwrap_or(SIGNAL_NONE);
            report.lost_packets = s.lost_packet_cnt;
            report.bitrate_measured_kbit = s.kbitrate.min(u32::from(u16::MAX)) as u16;
        }
        if let Some(t) = &tx_status {
            report.injected_block_cnt = t.injected_block_cnt;
            report.skipped_fec_cnt = t.skipped_fec_cnt;
            report.injection_fail_cnt = t.injection_fail_cnt;
            report.injection_time_block = t.injection_time_block;
        }

        tx.write(&report.encode(), &mut sink)?;
        tx.flush(&mut sink)?;
    }
}

/// Ground side: decodes reports and hands the newest to the OSD.
pub fn run_rx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_RSSI);
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

        while stream.len() >= RSSI_REPORT_LEN {
            let record: Vec<u8> = stream.drain(..RSSI_REPORT_LEN).collect();
            let report = RssiReport::decode(&record)?;
            log::debug!(
                "air: rc {} dBm, {} lost, cpu {}%, {}°C",
                report.signal_rc,
                report.lost_packets_rc,
                report.cpuload,
                report.temp
            );
            snapshot::publish(bus, slots::AIR_STATUS, &record)?;
        }
        if now.duration_since(publish_at) >= cfg.status_interval {
            for (i, m) in monitors.monitors().iter().enumerate() {
                rx.stats_mut().set_wrong_crc(i, m.bad_frame_cnt());
            }
            snapshot::publish(bus, slots::RSSI_RX_STATUS, rx.stats().snapshot())?;
            publish_at = now;
        }
    }
}
