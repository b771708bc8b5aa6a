//! wire formats and frame codecs for the Rovercast wifi-broadcast link

use thiserror::Error;

pub mod block;
pub mod crc;
pub mod headers;
pub mod rc;
pub mod rssi;
pub mod telemetry;

pub use block::{
    block_index, slot_index, BlockGeometry, MAX_MTU, PAYLOAD_HEADER_LEN, WIFI_HEADER_LEN,
};
pub use headers::{Chipset, FrameKind, HeaderOptions, ParsedHeader};

/// Link purposes multiplexed on one physical channel. The port value is
/// encoded into the first byte of the destination MAC, so receivers can
/// filter with a single-byte BPF match.
pub const PORT_TELEMETRY: u8 = 1;
pub const PORT_RC: u8 = 30;
pub const PORT_RSSI: u8 = 63;

/// Encoded on-air port byte. Must be odd: wifi hardware decides
/// broadcast/multicast by the low bit of the first MAC byte.
pub fn encode_port(port: u8) -> u8 {
    (port * 2) + 1
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("capture too short: got {got} bytes, header needs {need}")]
    Truncated { got: usize, need: usize },

    #[error("unknown frame discriminator byte {0:#04x}")]
    UnknownFrameType(u8),

    #[error("bad radiotap header")]
    BadRadiotap,

    #[error("unsupported data rate {0}")]
    UnsupportedRate(u8),

    #[error("bad start code {0:#010x}")]
    BadStartCode(u32),

    #[error("crc mismatch: computed {computed:#06x}, stored {stored:#06x}")]
    CrcMismatch { computed: u16, stored: u16 },

    #[error("record too short: got {got} bytes, need {need}")]
    ShortRecord { got: usize, need: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_ports_are_odd() {
        for port in [0u8, PORT_TELEMETRY, PORT_RC, PORT_RSSI] {
            assert_eq!(encode_port(port) % 2, 1);
        }
    }
}
