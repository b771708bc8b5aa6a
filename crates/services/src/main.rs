//! Link service processes, one role per invocation.
//!
//! The air side runs `telemetry-tx`, `rc-rx` and `rssi-tx`; the ground
//! station runs their counterparts. Every role talks to its neighbors
//! over the shared-memory snapshot bus, never directly: the joystick
//! process publishes the latest command, `rc-tx` picks it up whenever
//! its cycle fires, and nobody waits for anybody.

mod rc;
mod rssi;
mod sysinfo;
mod telemetry;
mod ticker;

use anyhow::{bail, Result};
use rovercast_radio::snapshot::ShmBus;

const BUS_PREFIX: &str = "rovercast";

/// Snapshot bus slot names. The same name can mean "input" on one
/// machine and "output" on the other; they never share memory.
pub mod slots {
    /// Encoded telemetry record: sensor output on the vehicle, decoded
    /// downlink on the ground.
    pub const TELEMETRY_RECORD: &str = "telemetry_record";
    pub const TELEMETRY_TX_STATUS: &str = "telemetry_tx_status";
    pub const TELEMETRY_RX_STATUS: &str = "telemetry_rx_status";
    /// Encoded drive command: joystick output on the ground, decoded
    /// uplink on the vehicle.
    pub const RC_COMMAND: &str = "rc_command";
    pub const RC_RX_STATUS: &str = "rc_rx_status";
    /// Receive status of an optional secondary uplink, when deployed.
    pub const UPLINK_RX_STATUS: &str = "uplink_rx_status";
    /// Raw encoded diagnostic report from the vehicle.
    pub const AIR_STATUS: &str = "air_status";
    pub const RSSI_RX_STATUS: &str = "rssi_rx_status";
    /// Set nonzero by the power monitor on brownout.
    pub const UNDERVOLT: &str = "undervolt";
}

fn main() -> Result<()> {
    env_logger::init();

    let role = std::env::args().nth(1).unwrap_or_default();
    let bus = ShmBus::new(BUS_PREFIX);
    match role.as_str() {
        "telemetry-tx" => telemetry::run_tx(&bus),
        "telemetry-rx" => telemetry::run_rx(&bus),
        "rc-tx" => rc::run_tx(&bus),
        "rc-rx" => rc::run_rx(&bus),
        "rssi-tx" => rssi::run_tx(&bus),
        "rssi-rx" => rssi::run_rx(&bus),
        other => bail!(
            "unknown role {other:?}; expected one of telemetry-tx, telemetry-rx, \
             rc-tx, rc-rx, rssi-tx, rssi-rx"
        ),
    }
}
