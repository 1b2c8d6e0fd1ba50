//! Bit-error recovery: when a captured frame fails its FCS, try flipping
//! a small number of bits and re-checking. Each effort level is a strict
//! superset of the one below it.

use ax25::fcs::check_fcs;
use ax25::packet::Packet;

use crate::rrbb::Rrbb;

/// How much repair effort to spend on a bad-FCS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetryLevel {
    None,
    /// Flip one bit anywhere.
    SingleBit,
    /// Also two adjacent bits.
    DoubleAdjacent,
    /// Also three adjacent bits.
    TripleAdjacent,
    /// Also any two bits; O(n^2) and noticeably slow on large frames.
    TwoSeparated,
}

impl RetryLevel {
    /// Numeric CLI levels 0..=4.
    pub fn from_cli(level: u32) -> Option<RetryLevel> {
        match level {
            0 => Some(RetryLevel::None),
            1 => Some(RetryLevel::SingleBit),
            2 => Some(RetryLevel::DoubleAdjacent),
            3 => Some(RetryLevel::TripleAdjacent),
            4 => Some(RetryLevel::TwoSeparated),
            _ => None,
        }
    }
}

/// What a repaired frame must look like before we believe the repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityMode {
    /// Must be a UI/0xF0 frame with clean addresses.
    Aprs,
    /// Any frame with clean addresses.
    Ax25,
    /// Anything that parses structurally.
    None,
}

/// A successful decode, possibly after repair.
pub struct Decoded {
    pub packet: Packet,
    /// Number of bits flipped to make the FCS match (0 = clean).
    pub flips: usize,
}

/// Decode a captured bit buffer, repairing up to `level` flipped bits.
///
/// The first candidate whose FCS matches and which passes the sanity gate
/// wins; candidates are tried in flip-count order, then by bit index.
pub fn decode_with_repair(rrbb: &Rrbb, level: RetryLevel, sanity: SanityMode) -> Option<Decoded> {
    let bytes = rrbb.to_bytes();
    if bytes.len() < 3 {
        return None;
    }

    // Clean frames skip the sanity gate: the FCS already vouches for them.
    if check_fcs(&bytes) {
        let packet = Packet::from_frame(&bytes[..bytes.len() - 2], Some(rrbb.alevel())).ok()?;
        return Some(Decoded { packet, flips: 0 });
    }

    let nbits = bytes.len() * 8;
    let mut work = bytes;

    let mut candidate = |work: &mut Vec<u8>, flips: &[usize]| -> Option<Packet> {
        for &i in flips {
            work[i / 8] ^= 1 << (i % 8);
        }
        let packet = if check_fcs(work) {
            Packet::from_frame(&work[..work.len() - 2], Some(rrbb.alevel()))
                .ok()
                .filter(|p| sane(p, sanity))
        } else {
            None
        };
        for &i in flips {
            work[i / 8] ^= 1 << (i % 8);
        }
        packet
    };

    if level >= RetryLevel::SingleBit {
        for i in 0..nbits {
            if let Some(packet) = candidate(&mut work, &[i]) {
                return Some(Decoded { packet, flips: 1 });
            }
        }
    }
    if level >= RetryLevel::DoubleAdjacent {
        for i in 0..nbits - 1 {
            if let Some(packet) = candidate(&mut work, &[i, i + 1]) {
                return Some(Decoded { packet, flips: 2 });
            }
        }
    }
    if level >= RetryLevel::TripleAdjacent {
        for i in 0..nbits - 2 {
            if let Some(packet) = candidate(&mut work, &[i, i + 1, i + 2]) {
                return Some(Decoded { packet, flips: 3 });
            }
        }
    }
    if level >= RetryLevel::TwoSeparated {
        for i in 0..nbits {
            for j in i + 2..nbits {
                if let Some(packet) = candidate(&mut work, &[i, j]) {
                    return Some(Decoded { packet, flips: 2 });
                }
            }
        }
    }
    None
}

/// Last resort for `passall` operation: parse the frame despite the bad
/// FCS so it can be delivered marked as suspect.
pub fn decode_suspect(rrbb: &Rrbb) -> Option<Packet> {
    let bytes = rrbb.to_bytes();
    if bytes.len() < 3 {
        return None;
    }
    Packet::from_frame(&bytes[..bytes.len() - 2], Some(rrbb.alevel())).ok()
}

fn sane(pkt: &Packet, mode: SanityMode) -> bool {
    match mode {
        SanityMode::None => true,
        SanityMode::Ax25 => pkt.addresses_valid(),
        SanityMode::Aprs => pkt.addresses_valid() && pkt.is_aprs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax25::fcs::fcs;

    fn rrbb_from_bytes(bytes: &[u8]) -> Rrbb {
        let mut r = Rrbb::new(0, 0, 0, false, 0, false);
        for &b in bytes {
            for i in 0..8 {
                r.append_bit(b & (1 << i) != 0);
            }
        }
        r
    }

    fn good_frame() -> Vec<u8> {
        let p = Packet::from_text("W1ABC>TEST,WIDE1-1:hello repair", true).unwrap();
        let mut bytes = Vec::new();
        p.pack(&mut bytes);
        let f = fcs(&bytes);
        bytes.extend_from_slice(&f.to_le_bytes());
        bytes
    }

    #[test]
    fn test_clean_frame_decodes_at_level_none() {
        let rrbb = rrbb_from_bytes(&good_frame());
        let d = decode_with_repair(&rrbb, RetryLevel::None, SanityMode::Aprs).unwrap();
        assert_eq!(d.flips, 0);
        assert_eq!(d.packet.addr_with_ssid(1), "W1ABC");
    }

    #[test]
    fn test_single_flip_repaired() {
        let mut rrbb = rrbb_from_bytes(&good_frame());
        rrbb.flip_bit(100);
        assert!(decode_with_repair(&rrbb, RetryLevel::None, SanityMode::Aprs).is_none());
        let d = decode_with_repair(&rrbb, RetryLevel::SingleBit, SanityMode::Aprs).unwrap();
        assert_eq!(d.flips, 1);
        assert_eq!(d.packet.info(), b"hello repair");
    }

    #[test]
    fn test_double_adjacent_repaired() {
        let mut rrbb = rrbb_from_bytes(&good_frame());
        rrbb.flip_bit(60);
        rrbb.flip_bit(61);
        assert!(decode_with_repair(&rrbb, RetryLevel::SingleBit, SanityMode::Aprs).is_none());
        let d = decode_with_repair(&rrbb, RetryLevel::DoubleAdjacent, SanityMode::Aprs).unwrap();
        assert_eq!(d.flips, 2);
    }

    #[test]
    fn test_triple_adjacent_repaired() {
        // The error burst starts on an address extension bit, so any
        // repair that does not revert it exactly leaves an invalid
        // address behind and dies at the sanity gate.
        let mut rrbb = rrbb_from_bytes(&good_frame());
        for i in 16..19 {
            rrbb.flip_bit(i);
        }
        assert!(decode_with_repair(&rrbb, RetryLevel::DoubleAdjacent, SanityMode::Aprs).is_none());
        let d = decode_with_repair(&rrbb, RetryLevel::TripleAdjacent, SanityMode::Aprs).unwrap();
        assert_eq!(d.flips, 3);
        assert_eq!(d.packet.info(), b"hello repair");
    }

    #[test]
    fn test_two_separated_repaired() {
        // Both flipped bits are address extension bits (see above).
        let mut rrbb = rrbb_from_bytes(&good_frame());
        rrbb.flip_bit(40);
        rrbb.flip_bit(120);
        assert!(decode_with_repair(&rrbb, RetryLevel::TripleAdjacent, SanityMode::Aprs).is_none());
        let d = decode_with_repair(&rrbb, RetryLevel::TwoSeparated, SanityMode::Aprs).unwrap();
        assert_eq!(d.flips, 2);
        assert_eq!(d.packet.info(), b"hello repair");
    }

    #[test]
    fn test_levels_are_monotonic() {
        // Anything a lower level decodes, every higher level decodes too.
        let mut rrbb = rrbb_from_bytes(&good_frame());
        rrbb.flip_bit(100);
        for level in [
            RetryLevel::SingleBit,
            RetryLevel::DoubleAdjacent,
            RetryLevel::TripleAdjacent,
            RetryLevel::TwoSeparated,
        ] {
            assert!(
                decode_with_repair(&rrbb, level, SanityMode::Aprs).is_some(),
                "level {level:?} failed"
            );
        }
    }

    #[test]
    fn test_sanity_gate_rejects_non_aprs_repair() {
        // A valid frame whose control byte is SABM, not UI.
        let p = Packet::from_text("W1ABC>TEST:x", true).unwrap();
        let mut bytes = Vec::new();
        p.pack(&mut bytes);
        bytes[14] = 0x2f; // control: SABM
        let f = fcs(&bytes);
        bytes.extend_from_slice(&f.to_le_bytes());

        let mut rrbb = rrbb_from_bytes(&bytes);
        rrbb.flip_bit(30);
        assert!(decode_with_repair(&rrbb, RetryLevel::SingleBit, SanityMode::Aprs).is_none());
        assert!(decode_with_repair(&rrbb, RetryLevel::SingleBit, SanityMode::Ax25).is_some());
    }

    #[test]
    fn test_decode_suspect_ignores_fcs() {
        let mut rrbb = rrbb_from_bytes(&good_frame());
        rrbb.flip_bit(100);
        let p = decode_suspect(&rrbb).unwrap();
        assert_eq!(p.addr_with_ssid(0), "TEST");
    }
}
