//! Radiotap + ieee80211 preamble codec.
//!
//! Every frame on the air starts with a chipset-specific preamble: a
//! radiotap header telling the driver how to inject the frame, followed
//! by one of three ieee80211 header variants. The first byte of the
//! destination MAC carries the encoded port so receivers can filter on
//! it with a one-byte BPF match.

use crate::{encode_port, CodecError};

/// Driver families we know how to inject through. Each one wants a
/// different header shape and minimum frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chipset {
    Atheros,
    Ralink,
    Realtek,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 5-byte truncated data header, used by Ralink-class cards.
    ShortData,
    /// Full 24-byte data header, used by Atheros with CTS protection.
    Data,
    /// RTS header, used by Realtek and by Atheros without CTS.
    Rts,
}

/// Tx-side radiotap knobs. `rate` is the legacy 802.11b/g rate in Mbit
/// (half-rate 5.5 is written as 5); the MCS fields only matter for the
/// Realtek 802.11n path.
#[derive(Debug, Clone, Copy)]
pub struct HeaderOptions {
    pub rate: u8,
    pub use_cts: bool,
    pub mcs_index: u8,
    pub stbc: bool,
    pub ldpc: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        // STBC and LDPC on by default to match deployed Realtek
        // transmitters
        Self {
            rate: 12,
            use_cts: false,
            mcs_index: 12,
            stbc: true,
            ldpc: true,
        }
    }
}

/// radiotap: version, length 12, present = rate + tx flags
const RADIOTAP_LEGACY: [u8; 12] = [
    0x00, 0x00, //
    0x0c, 0x00, //
    0x04, 0x80, 0x00, 0x00, //
    0x00, // rate, patched in build_header
    0x00, 0x00, 0x00,
];

/// radiotap: version, length 13, present = tx flags + mcs
const RADIOTAP_80211N: [u8; 13] = [
    0x00, 0x00, //
    0x0d, 0x00, //
    0x00, 0x80, 0x08, 0x00, //
    0x08, 0x00, // tx flags: NOACK
    0x00, 0x00, 0x00, // mcs known, flags, index; patched in build_header
];

const IEEE_DATA: [u8; 24] = [
    0x08, 0x02, 0x00, 0x00, // frame control, duration
    0xff, 0x00, 0x00, 0x00, 0x00, 0x00, // RA; first byte patched with encoded port
    0x13, 0x22, 0x33, 0x44, 0x55, 0x66, // TA
    0x13, 0x22, 0x33, 0x44, 0x55, 0x66, // BSSID
    0x00, 0x00, // seqnum, overwritten by the wifi chip
];

const IEEE_DATA_SHORT: [u8; 5] = [
    0x08, 0x01, 0x00, 0x00, // frame control, duration
    0xff, // RA first byte, patched with encoded port
];

const IEEE_RTS: [u8; 5] = [
    0xb4, 0x01, 0x00, 0x00, // frame control, duration
    0xff, // RA first byte, patched with encoded port
];

/// Filler for frames below the chipset's minimum payload size.
pub const PAD_BYTE: u8 = 0xdd;

const MCS_HAVE_BW: u8 = 0x01;
const MCS_HAVE_MCS: u8 = 0x02;
const MCS_HAVE_GI: u8 = 0x04;
const MCS_HAVE_STBC: u8 = 0x20;
const MCS_HAVE_FEC: u8 = 0x10;
const MCS_FEC_LDPC: u8 = 0x10;
const MCS_STBC_1: u8 = 1;
const MCS_STBC_SHIFT: u8 = 5;

/// The frame kind a given chipset transmits with.
pub fn frame_kind_for(chipset: Chipset, use_cts: bool) -> FrameKind {
    match chipset {
        Chipset::Ralink => FrameKind::ShortData,
        // CTS protection stalls R/C traffic on Atheros, so RTS is the
        // default there too.
        Chipset::Atheros => {
            if use_cts {
                FrameKind::Data
            } else {
                FrameKind::Rts
            }
        }
        Chipset::Realtek => FrameKind::Rts,
    }
}

/// Minimum payload length after the preamble; shorter frames get padded
/// with [`PAD_BYTE`]. Ralink cards drop anything below 18 bytes.
pub fn min_payload(chipset: Chipset) -> usize {
    match chipset {
        Chipset::Ralink => 18,
        Chipset::Atheros | Chipset::Realtek => 5,
    }
}

fn rate_byte(rate: u8) -> Result<u8, CodecError> {
    let b = match rate {
        1 => 0x02,
        2 => 0x04,
        5 => 0x0b, // 5.5
        6 => 0x0c,
        11 => 0x16,
        12 => 0x18,
        18 => 0x24,
        24 => 0x30,
        36 => 0x48,
        48 => 0x60,
        other => return Err(CodecError::UnsupportedRate(other)),
    };
    Ok(b)
}

/// Builds the exact preamble bytes for one frame kind. The Realtek path
/// uses the 802.11n MCS radiotap header, everything else the legacy
/// rate header.
pub fn build_header(
    chipset: Chipset,
    kind: FrameKind,
    port: u8,
    opts: &HeaderOptions,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(40);

    match chipset {
        Chipset::Realtek => {
            let mut rt = RADIOTAP_80211N;
            let mut flags = 0u8;
            if opts.stbc {
                flags |= MCS_STBC_1 << MCS_STBC_SHIFT;
            }
            if opts.ldpc {
                flags |= MCS_FEC_LDPC;
            }
            rt[10] = MCS_HAVE_MCS | MCS_HAVE_BW | MCS_HAVE_GI | MCS_HAVE_STBC | MCS_HAVE_FEC;
            rt[11] = flags;
            rt[12] = opts.mcs_index;
            out.extend_from_slice(&rt);
        }
        Chipset::Atheros | Chipset::Ralink => {
            let mut rt = RADIOTAP_LEGACY;
            rt[8] = rate_byte(opts.rate)?;
            out.extend_from_slice(&rt);
        }
    }

    match kind {
        FrameKind::ShortData => {
            let mut hdr = IEEE_DATA_SHORT;
            hdr[4] = encode_port(port);
            out.extend_from_slice(&hdr);
        }
        FrameKind::Data => {
            let mut hdr = IEEE_DATA;
            hdr[4] = encode_port(port);
            out.extend_from_slice(&hdr);
        }
        FrameKind::Rts => {
            let mut hdr = IEEE_RTS;
            hdr[4] = encode_port(port);
            out.extend_from_slice(&hdr);
        }
    }

    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    /// radiotap + ieee80211 length; the payload starts right after.
    pub header_len: usize,
    pub kind: FrameKind,
}

/// Parses the preamble of a captured frame and returns where the
/// payload starts.
///
/// The discriminator is the second byte after the radiotap header:
/// 0xbf for R/C RTS frames, 0x01 for short data / RTS telemetry, 0x02
/// for full data frames. Anything else is rejected rather than falling
/// back to a previously seen header length.
pub fn parse_header(frame: &[u8]) -> Result<ParsedHeader, CodecError> {
    let rt_len = radiotap_len(frame)?;
    if frame.len() < rt_len + 2 {
        return Err(CodecError::Truncated {
            got: frame.len(),
            need: rt_len + 2,
        });
    }

    let (ieee_len, kind) = match frame[rt_len + 1] {
        0xbf => (0x04, FrameKind::Rts),
        0x01 => (0x05, FrameKind::ShortData),
        0x02 => (0x18, FrameKind::Data),
        other => return Err(CodecError::UnknownFrameType(other)),
    };

    let header_len = rt_len + ieee_len;
    if frame.len() < header_len {
        return Err(CodecError::Truncated {
            got: frame.len(),
            need: header_len,
        });
    }

    Ok(ParsedHeader { header_len, kind })
}

fn radiotap_len(frame: &[u8]) -> Result<usize, CodecError> {
    if frame.len() < 8 {
        return Err(CodecError::Truncated {
            got: frame.len(),
            need: 8,
        });
    }
    if frame[0] != 0 {
        return Err(CodecError::BadRadiotap);
    }
    let len = u16::from_le_bytes([frame[2], frame[3]]) as usize;
    if len < 8 || len > frame.len() {
        return Err(CodecError::BadRadiotap);
    }
    Ok(len)
}

/// (alignment, size) per radiotap present bit, for the fields we can
/// skip over. Walking stops at the first bit we have no entry for,
/// since alignment of unknown fields is undefined.
const RADIOTAP_FIELDS: [(usize, usize); 22] = [
    (8, 8),  // TSFT
    (1, 1),  // FLAGS
    (1, 1),  // RATE
    (2, 4),  // CHANNEL
    (2, 2),  // FHSS
    (1, 1),  // DBM_ANTSIGNAL
    (1, 1),  // DBM_ANTNOISE
    (2, 2),  // LOCK_QUALITY
    (2, 2),  // TX_ATTENUATION
    (2, 2),  // DB_TX_ATTENUATION
    (1, 1),  // DBM_TX_POWER
    (1, 1),  // ANTENNA
    (1, 1),  // DB_ANTSIGNAL
    (1, 1),  // DB_ANTNOISE
    (2, 2),  // RX_FLAGS
    (2, 2),  // TX_FLAGS
    (1, 1),  // RTS_RETRIES
    (1, 1),  // DATA_RETRIES
    (4, 8),  // XCHANNEL
    (1, 3),  // MCS
    (4, 8),  // AMPDU_STATUS
    (2, 12), // VHT
];

const BIT_DBM_ANTSIGNAL: u32 = 5;
const BIT_EXT: u32 = 31;

/// Extracts the best (least negative) antenna signal from the radiotap
/// header of a captured frame. Values outside (-126, 0) are driver
/// noise and ignored; returns `None` when no usable reading is present.
pub fn antenna_signal_dbm(frame: &[u8]) -> Option<i8> {
    let rt_len = radiotap_len(frame).ok()?;

    // present-flag words; bit 31 chains to another word
    let mut present = Vec::new();
    let mut off = 4;
    loop {
        if off + 4 > rt_len {
            return None;
        }
        let word = u32::from_le_bytes(frame[off..off + 4].try_into().ok()?);
        off += 4;
        present.push(word);
        if word & (1 << BIT_EXT) == 0 {
            break;
        }
    }

    // only the first word carries fields we understand
    let word = present[0];
    let mut best: Option<i8> = None;

    for (bit, &(align, size)) in RADIOTAP_FIELDS.iter().enumerate() {
        if word & (1 << bit) == 0 {
            continue;
        }
        off = (off + align - 1) & !(align - 1);
        if off + size > rt_len {
            return best;
        }
        if bit as u32 == BIT_DBM_ANTSIGNAL {
            let dbm = frame[off] as i8;
            if dbm < 0 && dbm > -126 && best.map_or(true, |b| dbm > b) {
                best = Some(dbm);
            }
        }
        off += size;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_data_header_bytes() {
        let hdr = build_header(
            Chipset::Ralink,
            FrameKind::ShortData,
            1,
            &HeaderOptions::default(),
        )
        .unwrap();
        assert_eq!(hdr.len(), 12 + 5);
        // radiotap with rate 12 -> 0x18
        assert_eq!(
            &hdr[..12],
            &[0x00, 0x00, 0x0c, 0x00, 0x04, 0x80, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00]
        );
        assert_eq!(&hdr[12..], &[0x08, 0x01, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn data_header_bytes() {
        let hdr = build_header(
            Chipset::Atheros,
            FrameKind::Data,
            30,
            &HeaderOptions::default(),
        )
        .unwrap();
        assert_eq!(hdr.len(), 12 + 24);
        assert_eq!(hdr[12], 0x08);
        assert_eq!(hdr[13], 0x02);
        assert_eq!(hdr[16], 61); // (30*2)+1
        assert_eq!(&hdr[22..28], &[0x13, 0x22, 0x33, 0x44, 0x55, 0x66]);
    }

    #[test]
    fn rts_header_bytes() {
        let hdr = build_header(
            Chipset::Realtek,
            FrameKind::Rts,
            63,
            &HeaderOptions::default(),
        )
        .unwrap();
        assert_eq!(hdr.len(), 13 + 5);
        assert_eq!(hdr[2], 0x0d);
        assert_eq!(hdr[10], 0x37); // mcs known: mcs|bw|gi|stbc|fec
        assert_eq!(hdr[11], 0x30); // default mcs flags: stbc 1 + ldpc
        assert_eq!(&hdr[13..], &[0xb4, 0x01, 0x00, 0x00, 127]);
    }

    #[test]
    fn mcs_flags_clear_when_disabled() {
        let hdr = build_header(
            Chipset::Realtek,
            FrameKind::Rts,
            63,
            &HeaderOptions {
                stbc: false,
                ldpc: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(hdr[11], 0x00);
    }

    #[test]
    fn port_byte_for_known_ports() {
        for port in [0u8, 1, 30, 63] {
            let hdr = build_header(
                Chipset::Ralink,
                FrameKind::ShortData,
                port,
                &HeaderOptions::default(),
            )
            .unwrap();
            assert_eq!(hdr[16], (port * 2) + 1);
        }
    }

    #[test]
    fn parse_rejects_unknown_discriminator() {
        let mut frame = build_header(
            Chipset::Ralink,
            FrameKind::ShortData,
            1,
            &HeaderOptions::default(),
        )
        .unwrap();
        frame[13] = 0x77;
        frame.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            parse_header(&frame),
            Err(CodecError::UnknownFrameType(0x77))
        ));
    }

    #[test]
    fn parse_locates_payload_behind_built_preambles() {
        // RTS telemetry frames share the 0x01 discriminator with short
        // data (frame control 0xb4 0x01 vs 0x08 0x01), so a built Rts
        // parses as ShortData; both are 5-byte headers and the payload
        // offset is what matters.
        for (chipset, kind, ieee_len, parsed_kind) in [
            (Chipset::Ralink, FrameKind::ShortData, 5, FrameKind::ShortData),
            (Chipset::Atheros, FrameKind::Data, 24, FrameKind::Data),
            (Chipset::Realtek, FrameKind::Rts, 5, FrameKind::ShortData),
        ] {
            let mut frame = build_header(chipset, kind, 1, &HeaderOptions::default()).unwrap();
            let preamble_len = frame.len();
            frame.extend_from_slice(&[0u8; 64]);
            let parsed = parse_header(&frame).unwrap();
            assert_eq!(parsed.header_len, preamble_len);
            assert_eq!(parsed.kind, parsed_kind);
        }
    }

    #[test]
    fn parse_truncated_capture_is_recoverable() {
        let hdr = build_header(
            Chipset::Atheros,
            FrameKind::Data,
            1,
            &HeaderOptions::default(),
        )
        .unwrap();
        let err = parse_header(&hdr[..14]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn signal_extraction_picks_best_antenna() {
        // radiotap with DBM_ANTSIGNAL (bit 5) present, 9 bytes total
        let mut frame = vec![
            0x00, 0x00, 0x09, 0x00, //
            0x20, 0x00, 0x00, 0x00, // present: bit 5
            (-60i8) as u8,
        ];
        frame.extend_from_slice(&[0x08, 0x01, 0x00, 0x00, 0x03]);
        assert_eq!(antenna_signal_dbm(&frame), Some(-60));
    }

    #[test]
    fn signal_extraction_skips_leading_fields() {
        // TSFT (8 bytes, bit 0) + FLAGS (bit 1) + DBM_ANTSIGNAL (bit 5)
        let mut frame = vec![0x00, 0x00, 0x00, 0x00, 0x23, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0u8; 8]); // TSFT
        frame.push(0x00); // FLAGS
        frame.push((-42i8) as u8);
        frame[2] = frame.len() as u8;
        assert_eq!(antenna_signal_dbm(&frame), Some(-42));
    }

    #[test]
    fn signal_extraction_ignores_out_of_range() {
        let frame = vec![
            0x00, 0x00, 0x09, 0x00, //
            0x20, 0x00, 0x00, 0x00, //
            0x10, // +16 dBm: nonsense
        ];
        assert_eq!(antenna_signal_dbm(&frame), None);
    }
}
