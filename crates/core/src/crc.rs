//! The Vector telemetry CRC16.
//!
//! This is not CRC16/CCITT: the ground station expects the exact
//! nibble-rotate/xor variant used by Vector OSDs, so the routine is a
//! bit-for-bit port of the reference and must never be "fixed" to a
//! table-driven standard polynomial.

fn round(crc: u16, byte: u8) -> u16 {
    let mut crcl = (crc & 0x00ff) as u8;
    let mut crch = (crc >> 8) as u8;

    let mut r0 = byte ^ crch;
    let mut a1 = crcl;

    crch = r0;
    crch = (crch << 4) | (crch >> 4);
    crcl = crch ^ r0;

    let mut crc16 = u16::from_be_bytes([crch, crcl]) & 0x0ff0;
    crcl = (crc16 & 0x00ff) as u8;
    crch = (crc16 >> 8) as u8;

    r0 ^= crch;
    a1 ^= crcl;

    crc16 <<= 1;
    crcl = (crc16 & 0x00ff) as u8;
    crch = (crc16 >> 8) as u8;

    crcl ^= r0;
    crch ^= a1;

    u16::from_be_bytes([crch, crcl])
}

pub fn vt_crc16(data: &[u8], seed: u16) -> u16 {
    data.iter().fold(seed, |crc, &b| round(crc, b))
}
