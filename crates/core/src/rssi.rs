//! Link-quality diagnostic record, air → ground.
//!
//! The air side periodically reports the state of its own receive
//! links (R/C and telemetry uplink) plus CPU load, temperature and
//! injection statistics, so the ground OSD can show both directions of
//! the link. Packed little-endian, no padding.

use crate::CodecError;

pub const RSSI_REPORT_LEN: usize = 38;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssiReport {
    /// Best telemetry-uplink signal at the air side, dBm; -127 = none.
    pub signal: i8,
    pub lost_packets: u32,
    /// Best R/C-uplink signal at the air side, dBm; -127 = none.
    pub signal_rc: i8,
    pub lost_packets_rc: u32,
    pub cpuload: u8,
    pub temp: u8,
    pub injected_block_cnt: u32,
    pub skipped_fec_cnt: u32,
    pub injection_fail_cnt: u32,
    pub injection_time_block: u64,
    pub bitrate_kbit: u16,
    pub bitrate_measured_kbit: u16,
    pub cts: u8,
    pub undervolt: u8,
}

impl RssiReport {
    pub fn encode(&self) -> [u8; RSSI_REPORT_LEN] {
        let mut buf = [0u8; RSSI_REPORT_LEN];
        buf[0] = self.signal as u8;
        buf[1..5].copy_from_slice(&self.lost_packets.to_le_bytes());
        buf[5] = self.signal_rc as u8;
        buf[6..10].copy_from_slice(&self.lost_packets_rc.to_le_bytes());
        buf[10] = self.cpuload;
        buf[11] = self.temp;
        buf[12..16].copy_from_slice(&self.injected_block_cnt.to_le_bytes());
        buf[16..20].copy_from_slice(&self.skipped_fec_cnt.to_le_bytes());
        buf[20..24].copy_from_slice(&self.injection_fail_cnt.to_le_bytes());
        buf[24..32].copy_from_slice(&self.injection_time_block.to_le_bytes());
        buf[32..34].copy_from_slice(&self.bitrate_kbit.to_le_bytes());
        buf[34..36].copy_from_slice(&self.bitrate_measured_kbit.to_le_bytes());
        buf[36] = self.cts;
        buf[37] = self.undervolt;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < RSSI_REPORT_LEN {
            return Err(CodecError::ShortRecord {
                got: data.len(),
                need: RSSI_REPORT_LEN,
            });
        }
        let u32_at = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().expect("fixed"));
        let u16_at = |off: usize| u16::from_le_bytes(data[off..off + 2].try_into().expect("fixed"));
        Ok(Self {
            signal: data[0] as i8,
            lost_packets: u32_at(1),
            signal_rc: data[5] as i8,
            lost_packets_rc: u32_at(6),
            cpuload: data[10],
            temp: data[11],
            injected_block_cnt: u32_at(12),
            skipped_fec_cnt: u32_at(16),
            injection_fail_cnt: u32_at(20),
            injection_time_block: u64::from_le_bytes(data[24..32].try_into().expect("fixed")),
            bitrate_kbit: u16_at(32),
            bitrate_measured_kbit: u16_at(34),
            cts: data[36],
            undervolt: data[37],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let report = RssiReport {
            signal: -58,
            lost_packets: 17,
            signal_rc: -72,
            lost_packets_rc: 3,
            cpuload: 41,
            temp: 62,
            injected_block_cnt: 9001,
            skipped_fec_cnt: 12,
            injection_fail_cnt: 1,
            injection_time_block: 3400,
            bitrate_kbit: 4096,
            bitrate_measured_kbit: 11000,
            cts: 0,
            undervolt: 1,
        };
        let wire = report.encode();
        assert_eq!(wire.len(), RSSI_REPORT_LEN);
        assert_eq!(RssiReport::decode(&wire).unwrap(), report);
    }

    #[test]
    fn negative_signal_survives() {
        let report = RssiReport {
            signal: -127,
            signal_rc: -1,
            ..Default::default()
        };
        let decoded = RssiReport::decode(&report.encode()).unwrap();
        assert_eq!(decoded.signal, -127);
        assert_eq!(decoded.signal_rc, -1);
    }
}
