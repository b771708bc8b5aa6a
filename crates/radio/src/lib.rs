//! Raw 802.11 transport for the Rovercast link.
//!
//! The crate is split along the datapath:
//!
//! - [`fec`]: Reed-Solomon block coder shared by both directions
//! - [`tx`]: block/FEC transmit engine, chunking an application byte
//!   stream into fixed-size frames
//! - [`rx`]: receive engine, reassembling the stream out of whatever
//!   frames survived the air
//! - [`raw`]: packet injection over `AF_PACKET` sockets
//! - [`monitor`]: capture from monitor-mode adapters via libpcap
//! - [`discovery`]: sysfs enumeration and chipset classification
//! - [`status`]: link-quality aggregation and debouncing
//! - [`snapshot`]: latest-value snapshot bus used to hand status and
//!   decoded records to other processes

pub mod fec;
pub mod rx;
pub mod snapshot;
pub mod status;
pub mod tx;

#[cfg(target_os = "linux")]
pub mod discovery;
#[cfg(target_os = "linux")]
pub mod monitor;
#[cfg(target_os = "linux")]
pub mod raw;

use std::time::Duration;

use rovercast_core::{BlockGeometry, CodecError, HeaderOptions};
use thiserror::Error;

pub use fec::BlockCoder;
pub use rx::{RxFrame, RxStream};
pub use status::{RxStatusSnapshot, StatusAggregator};
pub use tx::{FrameSink, TxStatus, TxStream};

#[derive(Debug, Error)]
pub enum RadioError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(target_os = "linux")]
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("erasure coding failed: {0:?}")]
    Erasure(reed_solomon_erasure::Error),

    #[error("interface {0}: not a radiotap monitor interface")]
    NotMonitorMode(String),

    #[error("no wireless interfaces found")]
    NoInterfaces,

    #[error("all radio interfaces are down")]
    AllInterfacesDown,

    #[error("invalid link configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("snapshot bus: {0}")]
    Snapshot(String),
}

impl From<reed_solomon_erasure::Error> for RadioError {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        RadioError::Erasure(e)
    }
}

/// Everything one directed link needs to know. One instance per stream
/// and direction; nothing in the crate touches process globals.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Stream port, before wire encoding. Must be below 128.
    pub port: u8,
    pub geometry: BlockGeometry,
    pub headers: HeaderOptions,
    /// How long a capture multiplexer sleeps when nothing is readable.
    pub poll_timeout: Duration,
    /// Debounce window for loss and signal statistics.
    pub status_interval: Duration,
    /// Averaging window for the decoded-bitrate estimate.
    pub bitrate_interval: Duration,
    /// A block this many blocks older than the newest one seen means
    /// the far transmitter rebooted and counters must start over.
    pub restart_threshold: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            geometry: BlockGeometry::default(),
            headers: HeaderOptions::default(),
            poll_timeout: Duration::from_millis(100),
            status_interval: Duration::from_millis(220),
            bitrate_interval: Duration::from_millis(500),
            restart_threshold: 32,
        }
    }
}

impl LinkConfig {
    pub fn for_port(port: u8) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RadioError> {
        if self.port >= 128 {
            return Err(RadioError::InvalidConfig("port must be below 128"));
        }
        if self.geometry.data_packets == 0 {
            return Err(RadioError::InvalidConfig("need at least one data slot"));
        }
        if self.geometry.packet_length > rovercast_core::MAX_MTU {
            return Err(RadioError::InvalidConfig("packet length exceeds MTU"));
        }
        if self.geometry.min_packet_length > self.geometry.packet_length {
            return Err(RadioError::InvalidConfig(
                "minimum packet length exceeds packet length",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(LinkConfig::default().validate().is_ok());
    }

    #[test]
    fn oversized_port_rejected() {
        assert!(LinkConfig::for_port(128).validate().is_err());
    }

    #[test]
    fn oversized_packet_rejected() {
        let mut cfg = LinkConfig::default();
        cfg.geometry.packet_length = 4096;
        assert!(cfg.validate().is_err());
    }
}
