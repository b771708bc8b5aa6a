//! Vector telemetry downlink record.
//!
//! 97-byte packed little-endian layout shared with the ground station
//! OSD. The layout is frozen: any change breaks interop with deployed
//! ground software, which validates the start code and the
//! [`vt_crc16`](crate::crc::vt_crc16) trailer before trusting a frame.

use crate::crc::vt_crc16;
use crate::CodecError;

pub const START_CODE: u32 = 0xadde_1eb0;
pub const CRC_SEED: u16 = 0xffff;
pub const TELEMETRY_LEN: usize = 97;
const CRC_OFFSET: usize = TELEMETRY_LEN - 2;
const RFU_LEN: usize = 24;

/// One telemetry sample. Units follow the Vector convention: scaled
/// integers, never floats, e.g. `airspeed_kph_x10` is km/h times ten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorTelemetry {
    pub timestamp_ms: u32,
    pub baro_altitude_cm: i32,
    pub airspeed_kph_x10: u16,
    pub climb_rate_ms_x100: i16,
    pub rpm: u16,
    pub pitch_degrees: i16,
    pub roll_degrees: i16,
    pub yaw_degrees: i16,
    pub accel_x_centigrav: i16,
    pub accel_y_centigrav: i16,
    pub accel_z_centigrav: i16,
    pub pack_voltage_x100: u16,
    pub video_tx_voltage_x100: u16,
    pub camera_voltage_x100: u16,
    pub rx_voltage_x100: u16,
    pub pack_current_x100: u16,
    pub temp_degrees_c_x10: i16,
    pub mah_consumed: u16,
    pub compass_degrees: u16,
    pub rssi_percent: u8,
    pub lq_percent: u8,
    pub latitude_x1e7: i32,
    pub longitude_x1e7: i32,
    pub distance_from_home_m_x10: u32,
    pub groundspeed_kph_x10: u16,
    pub course_degrees_x10: u16,
    pub gps_altitude_cm: i32,
    pub hdop_x10: u8,
    pub sats_in_use: u8,
    pub flight_mode: u8,
}

struct Writer<'a> {
    buf: &'a mut [u8],
    off: usize,
}

impl<'a> Writer<'a> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.off..self.off + bytes.len()].copy_from_slice(bytes);
        self.off += bytes.len();
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.off..self.off + N]);
        self.off += N;
        out
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.off];
        self.off += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }
}

impl VectorTelemetry {
    /// Serializes to the fixed wire layout, computing the CRC trailer
    /// over the first 95 bytes.
    pub fn encode(&self) -> [u8; TELEMETRY_LEN] {
        let mut buf = [0u8; TELEMETRY_LEN];
        let mut w = Writer {
            buf: &mut buf,
            off: 0,
        };

        w.put(&START_CODE.to_le_bytes());
        w.put(&self.timestamp_ms.to_le_bytes());
        w.put(&self.baro_altitude_cm.to_le_bytes());
        w.put(&self.airspeed_kph_x10.to_le_bytes());
        w.put(&self.climb_rate_ms_x100.to_le_bytes());
        w.put(&self.rpm.to_le_bytes());
        w.put(&self.pitch_degrees.to_le_bytes());
        w.put(&self.roll_degrees.to_le_bytes());
        w.put(&self.yaw_degrees.to_le_bytes());
        w.put(&self.accel_x_centigrav.to_le_bytes());
        w.put(&self.accel_y_centigrav.to_le_bytes());
        w.put(&self.accel_z_centigrav.to_le_bytes());
        w.put(&self.pack_voltage_x100.to_le_bytes());
        w.put(&self.video_tx_voltage_x100.to_le_bytes());
        w.put(&self.camera_voltage_x100.to_le_bytes());
        w.put(&self.rx_voltage_x100.to_le_bytes());
        w.put(&self.pack_current_x100.to_le_bytes());
        w.put(&self.temp_degrees_c_x10.to_le_bytes());
        w.put(&self.mah_consumed.to_le_bytes());
        w.put(&self.compass_degrees.to_le_bytes());
        w.put(&[self.rssi_percent, self.lq_percent]);
        w.put(&self.latitude_x1e7.to_le_bytes());
        w.put(&self.longitude_x1e7.to_le_bytes());
        w.put(&self.distance_from_home_m_x10.to_le_bytes());
        w.put(&self.groundspeed_kph_x10.to_le_bytes());
        w.put(&self.course_degrees_x10.to_le_bytes());
        w.put(&self.gps_altitude_cm.to_le_bytes());
        w.put(&[self.hdop_x10, self.sats_in_use, self.flight_mode]);
        w.put(&[0u8; RFU_LEN]);
        debug_assert_eq!(w.off, CRC_OFFSET);

        let crc = vt_crc16(&buf[..CRC_OFFSET], CRC_SEED);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and validates a received record: length, start code, CRC.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < TELEMETRY_LEN {
            return Err(CodecError::ShortRecord {
                got: data.len(),
                need: TELEMETRY_LEN,
            });
        }

        let stored = u16::from_le_bytes([data[CRC_OFFSET], data[CRC_OFFSET + 1]]);
        let computed = vt_crc16(&data[..CRC_OFFSET], CRC_SEED);
        if stored != computed {
            return Err(CodecError::CrcMismatch { computed, stored });
        }

        let mut r = Reader { buf: data, off: 0 };
        let start_code = r.u32();
        if start_code != START_CODE {
            return Err(CodecError::BadStartCode(start_code));
        }

        let mut out = VectorTelemetry {
            timestamp_ms: r.u32(),
            baro_altitude_cm: r.i32(),
            airspeed_kph_x10: r.u16(),
            climb_rate_ms_x100: r.i16(),
            rpm: r.u16(),
            pitch_degrees: r.i16(),
            roll_degrees: r.i16(),
            yaw_degrees: r.i16(),
            accel_x_centigrav: r.i16(),
            accel_y_centigrav: r.i16(),
            accel_z_centigrav: r.i16(),
            pack_voltage_x100: r.u16(),
            video_tx_voltage_x100: r.u16(),
            camera_voltage_x100: r.u16(),
            rx_voltage_x100: r.u16(),
            pack_current_x100: r.u16(),
            temp_degrees_c_x10: r.i16(),
            mah_consumed: r.u16(),
            compass_degrees: r.u16(),
            ..Default::default()
        };
        out.rssi_percent = r.u8();
        out.lq_percent = r.u8();
        out.latitude_x1e7 = r.i32();
        out.longitude_x1e7 = r.i32();
        out.distance_from_home_m_x10 = r.u32();
        out.groundspeed_kph_x10 = r.u16();
        out.course_degrees_x10 = r.u16();
        out.gps_altitude_cm = r.i32();
        out.hdop_x10 = r.u8();
        out.sats_in_use = r.u8();
        out.flight_mode = r.u8();

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorTelemetry {
        VectorTelemetry {
            timestamp_ms: 123_456,
            baro_altitude_cm: -250,
            airspeed_kph_x10: 123,
            climb_rate_ms_x100: -42,
            pitch_degrees: -5,
            roll_degrees: 12,
            yaw_degrees: 178,
            pack_voltage_x100: 1180,
            pack_current_x100: 950,
            temp_degrees_c_x10: 315,
            mah_consumed: 1200,
            compass_degrees: 270,
            rssi_percent: 87,
            lq_percent: 99,
            latitude_x1e7: 557_558_000,
            longitude_x1e7: 376_173_000,
            distance_from_home_m_x10: 1234,
            groundspeed_kph_x10: 56,
            course_degrees_x10: 1800,
            gps_altitude_cm: 14_500,
            hdop_x10: 9,
            sats_in_use: 11,
            flight_mode: 2,
            ..Default::default()
        }
    }

    #[test]
    fn record_is_97_bytes_and_round_trips() {
        let t = sample();
        let wire = t.encode();
        assert_eq!(wire.len(), 97);
        assert_eq!(VectorTelemetry::decode(&wire).unwrap(), t);
    }

    #[test]
    fn start_code_is_first_field() {
        let wire = sample().encode();
        assert_eq!(u32::from_le_bytes(wire[..4].try_into().unwrap()), START_CODE);
    }

    #[test]
    fn corrupted_byte_fails_crc() {
        let mut wire = sample().encode();
        wire[20] ^= 0x01;
        assert!(matches!(
            VectorTelemetry::decode(&wire),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn wrong_start_code_rejected() {
        let mut wire = sample().encode();
        wire[0] ^= 0xff;
        // CRC covers the start code, so recompute it for the test
        let crc = vt_crc16(&wire[..95], CRC_SEED);
        wire[95..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            VectorTelemetry::decode(&wire),
            Err(CodecError::BadStartCode(_))
        ));
    }

    #[test]
    fn short_buffer_rejected() {
        let wire = sample().encode();
        assert!(matches!(
            VectorTelemetry::decode(&wire[..40]),
            Err(CodecError::ShortRecord { .. })
        ));
    }
}
