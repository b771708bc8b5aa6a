//! R/C uplink: ground joystick to the vehicle's drive controller.

use std::time::{Duration, Instant};

use anyhow::Result;
use rovercast_core::rc::{RcCommand, RC_COMMAND_LEN};
use rovercast_core::PORT_RC;
use rovercast_radio::monitor::MonitorSet;
use rovercast_radio::raw::InjectorSet;
use rovercast_radio::snapshot::{self, SnapshotBus};
use rovercast_radio::{LinkConfig, RxStream, TxStream};

use crate::slots;
use crate::ticker::Ticker;

const RC_PERIOD: Duration = Duration::from_millis(20);

/// Ground side: repeats the latest command every cycle. Repetition is
/// the reliability mechanism; a dropped cycle just means the vehicle
/// acts on a 20ms-old command.
pub fn run_tx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_RC);
    let mut sink = InjectorSet::open_all(cfg.port, &cfg.headers)?;
    let mut tx = TxStream::new(cfg)?;

    let mut ticker = Ticker::new(RC_PERIOD);
    loop {
        ticker.wait();
        if let Some(command) = snapshot::read_latest::<Vec<u8>>(bus, slots::RC_COMMAND)? {
            tx.write(&command, &mut sink)?;
            tx.flush(&mut sink)?;
        }
    }
}

/// Vehicle side: publishes every decoded command and the uplink status
/// the diagnostic reporter folds into its reports.
pub fn run_rx(bus: &dyn SnapshotBus) -> Result<()> {
    let cfg = LinkConfig::for_port(PORT_RC);
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

        // fixed-size records, newest wins
        while stream.len() >= RC_COMMAND_LEN {
            let record: Vec<u8> = stream.drain(..RC_COMMAND_LEN).collect();
            let command = RcCommand::decode(&record)?;
            log::trace!(
                "drive command: speed {:.2}, steering {:.2}",
                command.speed,
                command.steering
            );
            snapshot::publish(bus, slots::RC_COMMAND, &record)?;
        }
        if now.duration_since(publish_at) >= cfg.status_interval {
            for (i, m) in monitors.monitors().iter().enumerate() {
                rx.stats_mut().set_wrong_crc(i, m.bad_frame_cnt());
            }
            snapshot::publish(bus, slots::RC_RX_STATUS, rx.stats().snapshot())?;
            publish_at = now;
        }
    }
}
