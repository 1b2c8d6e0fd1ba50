use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::{ADDR_LEN, Address};
use crate::error::{Ax25Error, Result};
use crate::fcs::crc16;

/// Address slot of the destination field.
pub const DESTINATION: usize = 0;
/// Address slot of the source field.
pub const SOURCE: usize = 1;
/// Address slot of the first digipeater.
pub const REPEATER_1: usize = 2;

pub const MIN_ADDRS: usize = 2;
pub const MAX_ADDRS: usize = 10;
pub const MAX_REPEATERS: usize = MAX_ADDRS - 2;
pub const MAX_INFO_LEN: usize = 2048;

/// Two addresses plus the control byte.
pub const MIN_PACKET_LEN: usize = MIN_ADDRS * ADDR_LEN + 1;
/// Ten addresses, control, PID, and a full information field.
pub const MAX_PACKET_LEN: usize = MAX_ADDRS * ADDR_LEN + 2 + MAX_INFO_LEN;

/// UI frame control byte (with P/F clear).
pub const CONTROL_UI: u8 = 0x03;
/// "No layer 3" protocol ID used by APRS.
pub const PID_NO_LAYER3: u8 = 0xf0;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Received signal level measurements attached to a decoded frame.
///
/// `mark` and `space` are the tone detector outputs for AFSK; demodulators
/// with no tone pair (scrambled baseband) report negative sentinels there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AudioLevel {
    pub rec: i32,
    pub mark: i32,
    pub space: i32,
}

impl AudioLevel {
    pub fn new(rec: i32, mark: i32, space: i32) -> AudioLevel {
        AudioLevel { rec, mark, space }
    }

    /// Level report with no per-tone detail.
    pub fn baseband(rec: i32) -> AudioLevel {
        AudioLevel { rec, mark: -1, space: -1 }
    }
}

impl std::fmt::Display for AudioLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mark >= 0 && self.space >= 0 {
            write!(f, "{}({}/{})", self.rec, self.mark, self.space)
        } else {
            write!(f, "{}", self.rec)
        }
    }
}

/// One AX.25 frame, stored in wire order without flags or FCS:
/// 2..10 seven-byte address fields, one control byte, then for I and UI
/// frames a protocol ID byte and the information field.
///
/// A packet has exactly one owner; [`Packet::dup`] produces an independent
/// copy when the same frame must be handed to several consumers. The
/// sequence number exists only so leak diagnostics can name a packet.
#[derive(Debug)]
pub struct Packet {
    data: Vec<u8>,
    seq: u64,
    alevel: Option<AudioLevel>,
}

impl PartialEq for Packet {
    /// Structural equality: the frame bytes, not identity or signal level.
    fn eq(&self, other: &Packet) -> bool {
        self.data == other.data
    }
}

impl Packet {
    pub(crate) fn from_parts(data: Vec<u8>, alevel: Option<AudioLevel>) -> Packet {
        Packet {
            data,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            alevel,
        }
    }

    /// Build a packet from received frame bytes (flags and FCS already
    /// stripped). Validates the frame structurally: length bounds and a
    /// properly terminated address list of 2..10 entries.
    pub fn from_frame(bytes: &[u8], alevel: Option<AudioLevel>) -> Result<Packet> {
        if bytes.len() < MIN_PACKET_LEN {
            return Err(Ax25Error::FrameTooShort {
                got: bytes.len(),
                min: MIN_PACKET_LEN,
            });
        }
        if bytes.len() > MAX_PACKET_LEN {
            return Err(Ax25Error::FrameTooLong {
                got: bytes.len(),
                max: MAX_PACKET_LEN,
            });
        }
        let pkt = Packet::from_parts(bytes.to_vec(), alevel);
        let n = pkt.num_addr();
        if n < MIN_ADDRS {
            return Err(Ax25Error::BadAddress {
                index: n,
                reason: "address list is not terminated within ten entries".to_string(),
            });
        }
        Ok(pkt)
    }

    /// Deep copy with a fresh sequence number.
    pub fn dup(&self) -> Packet {
        Packet::from_parts(self.data.clone(), self.alevel)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn alevel(&self) -> Option<AudioLevel> {
        self.alevel
    }

    pub fn set_alevel(&mut self, alevel: AudioLevel) {
        self.alevel = Some(alevel);
    }

    /// Number of address fields, determined by the last-address bit.
    /// Returns 0 when the list is unterminated or runs past the frame.
    pub fn num_addr(&self) -> usize {
        for i in 0..MAX_ADDRS {
            let ssid_off = i * ADDR_LEN + 6;
            // The control byte must still fit after this address.
            if ssid_off + 1 >= self.data.len() {
                return 0;
            }
            if self.data[ssid_off] & 0x01 != 0 {
                return i + 1;
            }
        }
        0
    }

    pub fn num_repeaters(&self) -> usize {
        self.num_addr().saturating_sub(MIN_ADDRS)
    }

    fn addr_field(&self, n: usize) -> &[u8] {
        &self.data[n * ADDR_LEN..(n + 1) * ADDR_LEN]
    }

    fn addr(&self, n: usize) -> Address {
        Address::from_wire(self.addr_field(n), false)
            .expect("address field length is always 7")
    }

    /// Re-mark the last-address bit so it is set on exactly the final one
    /// of `n` address fields. Callers pass the count explicitly because the
    /// bits are inconsistent mid-mutation.
    fn fix_last_bits(&mut self, n: usize) {
        for i in 0..n {
            let off = i * ADDR_LEN + 6;
            if i + 1 == n {
                self.data[off] |= 0x01;
            } else {
                self.data[off] &= !0x01;
            }
        }
    }

    /// `"CALL-SSID"` (SSID suppressed when zero) for address `n`.
    pub fn addr_with_ssid(&self, n: usize) -> String {
        self.addr(n).to_text()
    }

    /// Callsign only for address `n`.
    pub fn addr_no_ssid(&self, n: usize) -> String {
        self.addr(n).call().to_string()
    }

    pub fn ssid(&self, n: usize) -> u8 {
        self.addr(n).ssid
    }

    pub fn set_ssid(&mut self, n: usize, ssid: u8) {
        debug_assert!(ssid <= 15);
        let off = n * ADDR_LEN + 6;
        self.data[off] = (self.data[off] & !0x1e) | (ssid << 1) & 0x1e;
    }

    /// The H ("has been repeated") bit of address `n`.
    pub fn h(&self, n: usize) -> bool {
        self.addr(n).h
    }

    pub fn set_h(&mut self, n: usize) {
        self.data[n * ADDR_LEN + 6] |= 0x80;
    }

    /// Replace address `n`, or append when `n` equals the current count.
    /// The H bit of a replaced address is cleared.
    pub fn set_addr(&mut self, n: usize, text: &str) {
        let num = self.num_addr();
        let Ok(addr) = Address::from_text(text, false) else {
            debug_assert!(false, "set_addr with unparseable callsign");
            return;
        };
        if n < num {
            let wire = addr.to_wire();
            self.data[n * ADDR_LEN..(n + 1) * ADDR_LEN].copy_from_slice(&wire);
            self.fix_last_bits(num);
        } else if n == num && num < MAX_ADDRS {
            let wire = addr.to_wire();
            // Insert ahead of the control byte.
            let at = num * ADDR_LEN;
            self.data.splice(at..at, wire.iter().copied());
            self.fix_last_bits(num + 1);
        } else {
            debug_assert!(false, "set_addr index out of range");
        }
    }

    /// Insert a new address at `n`, shifting later addresses up by one.
    /// Ignored when the frame already holds ten addresses.
    pub fn insert_addr(&mut self, n: usize, text: &str) {
        let num = self.num_addr();
        if num >= MAX_ADDRS || n < REPEATER_1 || n > num {
            return;
        }
        let Ok(addr) = Address::from_text(text, false) else {
            return;
        };
        let wire = addr.to_wire();
        let at = n * ADDR_LEN;
        self.data.splice(at..at, wire.iter().copied());
        self.fix_last_bits(num + 1);
    }

    /// Remove the repeater address at `n`, shifting later addresses down.
    pub fn remove_addr(&mut self, n: usize) {
        let num = self.num_addr();
        if n < REPEATER_1 || n >= num {
            return;
        }
        let at = n * ADDR_LEN;
        self.data.drain(at..at + ADDR_LEN);
        self.fix_last_bits(num - 1);
    }

    /// Index of the station this frame was most recently heard from:
    /// the last digipeater with H set, else the source.
    pub fn heard(&self) -> usize {
        let num = self.num_addr();
        for n in (REPEATER_1..num).rev() {
            if self.h(n) {
                return n;
            }
        }
        SOURCE
    }

    /// Index of the first digipeater that has not yet repeated this frame.
    pub fn first_not_repeated(&self) -> Option<usize> {
        (REPEATER_1..self.num_addr()).find(|&n| !self.h(n))
    }

    pub fn control(&self) -> u8 {
        self.data[self.num_addr() * ADDR_LEN]
    }

    /// Second control byte, present only in modulo-128 I and S frames.
    pub fn c2(&self) -> Option<u8> {
        self.data.get(self.num_addr() * ADDR_LEN + 1).copied()
    }

    /// Whether this frame type carries a PID byte (I and UI frames).
    fn has_pid(&self) -> bool {
        let c = self.control();
        c & 0x01 == 0 || c & 0xef == CONTROL_UI
    }

    pub fn pid(&self) -> Option<u8> {
        if !self.has_pid() {
            return None;
        }
        self.data.get(self.num_addr() * ADDR_LEN + 1).copied()
    }

    /// The information field; empty for frame types that have none.
    pub fn info(&self) -> &[u8] {
        let off = self.num_addr() * ADDR_LEN + if self.has_pid() { 2 } else { 1 };
        self.data.get(off..).unwrap_or(&[])
    }

    /// APRS data type indicator: the first info byte.
    pub fn dti(&self) -> char {
        self.info().first().map(|&b| b as char).unwrap_or(' ')
    }

    /// An APRS frame is a UI frame with PID 0xF0.
    pub fn is_aprs(&self) -> bool {
        self.num_addr() >= MIN_ADDRS
            && self.control() == CONTROL_UI
            && self.pid() == Some(PID_NO_LAYER3)
    }

    /// Strict wire-format validation of every address field. Used as the
    /// sanity gate when accepting a bit-flip repaired frame.
    pub fn addresses_valid(&self) -> bool {
        let num = self.num_addr();
        num >= MIN_ADDRS
            && (0..num).all(|n| Address::from_wire(self.addr_field(n), true).is_some())
    }

    /// Append the frame bytes for transmission. The FCS is the framer's
    /// responsibility, not the packet's.
    pub fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checksum used by the digipeater dedupe cache: source, destination,
    /// and the info field with trailing CR, LF, and space stripped, so the
    /// same beacon arriving via RF and via an internet relay (which may
    /// differ in trailing whitespace) still collides.
    pub fn dedupe_crc(&self) -> u16 {
        let src = self.addr_with_ssid(SOURCE);
        let dst = self.addr_with_ssid(DESTINATION);
        let mut info = self.info();
        while let Some((&last, rest)) = info.split_last() {
            if last == b'\r' || last == b'\n' || last == b' ' {
                info = rest;
            } else {
                break;
            }
        }
        let crc = crc16(src.as_bytes(), 0xffff);
        let crc = crc16(dst.as_bytes(), crc);
        crc16(info, crc)
    }

    /// Checksum over the whole frame, used to spot the same transmission
    /// decoded by more than one subchannel or slicer.
    pub fn m_m_crc(&self) -> u16 {
        crc16(&self.data, 0xffff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui_frame(addrs: &[(&str, bool)], info: &[u8]) -> Packet {
        let mut data = Vec::new();
        for (i, (text, h)) in addrs.iter().enumerate() {
            let mut a = Address::from_text(text, true).unwrap();
            a.h = *h;
            a.last = i + 1 == addrs.len();
            data.extend_from_slice(&a.to_wire());
        }
        data.push(CONTROL_UI);
        data.push(PID_NO_LAYER3);
        data.extend_from_slice(info);
        Packet::from_frame(&data, None).unwrap()
    }

    #[test]
    fn test_from_frame_too_short() {
        assert!(matches!(
            Packet::from_frame(&[0u8; 10], None),
            Err(Ax25Error::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_basic_accessors() {
        let p = ui_frame(&[("APRS", false), ("N0CALL-5", false)], b">hello");
        assert_eq!(p.num_addr(), 2);
        assert_eq!(p.num_repeaters(), 0);
        assert_eq!(p.addr_with_ssid(DESTINATION), "APRS");
        assert_eq!(p.addr_with_ssid(SOURCE), "N0CALL-5");
        assert_eq!(p.addr_no_ssid(SOURCE), "N0CALL");
        assert_eq!(p.ssid(SOURCE), 5);
        assert_eq!(p.control(), 0x03);
        assert_eq!(p.pid(), Some(0xf0));
        assert_eq!(p.info(), b">hello");
        assert_eq!(p.dti(), '>');
        assert!(p.is_aprs());
    }

    #[test]
    fn test_pack_round_trip() {
        let p = ui_frame(
            &[("TEST", false), ("W1ABC", false), ("WIDE1-1", true)],
            b"!4237.14N/07120.83W-",
        );
        let mut bytes = Vec::new();
        p.pack(&mut bytes);
        let q = Packet::from_frame(&bytes, None).unwrap();
        assert_eq!(p, q);
        assert_ne!(p.seq(), q.seq());
    }

    #[test]
    fn test_set_addr_append_and_replace() {
        let mut p = ui_frame(&[("TEST", false), ("W1ABC", false)], b"x");
        p.set_addr(2, "WIDE2-2");
        assert_eq!(p.num_addr(), 3);
        assert_eq!(p.addr_with_ssid(2), "WIDE2-2");
        // Last-address bit moved to the appended field.
        assert!(!p.h(2));
        p.set_addr(2, "WB2OSZ-9");
        assert_eq!(p.num_addr(), 3);
        assert_eq!(p.addr_with_ssid(2), "WB2OSZ-9");
        assert_eq!(p.info(), b"x");
    }

    #[test]
    fn test_insert_remove_is_identity() {
        let p = ui_frame(
            &[("TEST", false), ("W1ABC", false), ("WIDE2-1", false)],
            b"info",
        );
        let mut q = p.dup();
        q.insert_addr(2, "WB2OSZ-9");
        assert_eq!(q.num_addr(), 4);
        assert_eq!(q.addr_with_ssid(2), "WB2OSZ-9");
        assert_eq!(q.addr_with_ssid(3), "WIDE2-1");
        q.remove_addr(2);
        assert_eq!(p, q);
    }

    #[test]
    fn test_insert_ignored_at_max() {
        let mut p = ui_frame(
            &[
                ("TEST", false),
                ("W1ABC", false),
                ("R1", true),
                ("R2", true),
                ("R3", true),
                ("R4", true),
                ("R5", false),
                ("R6", false),
                ("R7", false),
                ("R8", false),
            ],
            b"",
        );
        assert_eq!(p.num_addr(), 10);
        p.insert_addr(2, "R9");
        assert_eq!(p.num_addr(), 10);
        assert_eq!(p.addr_with_ssid(2), "R1");
    }

    #[test]
    fn test_heard_and_first_not_repeated() {
        let p = ui_frame(&[("TEST", false), ("W1ABC", false)], b"");
        assert_eq!(p.heard(), SOURCE);
        assert_eq!(p.first_not_repeated(), None);

        let p = ui_frame(
            &[
                ("TEST", false),
                ("W1ABC", false),
                ("R1", true),
                ("WIDE2-1", false),
            ],
            b"",
        );
        assert_eq!(p.heard(), 2);
        assert_eq!(p.first_not_repeated(), Some(3));

        let p = ui_frame(
            &[("TEST", false), ("W1ABC", false), ("R1", true), ("R2", true)],
            b"",
        );
        assert_eq!(p.heard(), 3);
        assert_eq!(p.first_not_repeated(), None);
    }

    #[test]
    fn test_set_ssid_and_h() {
        let mut p = ui_frame(&[("TEST", false), ("W1ABC", false), ("WIDE3-3", false)], b"");
        p.set_ssid(2, 2);
        assert_eq!(p.addr_with_ssid(2), "WIDE3-2");
        assert!(!p.h(2));
        p.set_h(2);
        assert!(p.h(2));
        // Last-address bit is untouched by SSID/H edits.
        assert_eq!(p.num_addr(), 3);
    }

    #[test]
    fn test_dedupe_crc_strips_trailing_whitespace() {
        let a = ui_frame(&[("TEST", false), ("W1XYZ", false)], b"info1");
        let b = ui_frame(&[("TEST", false), ("W1XYZ", false)], b"info1 \r\n");
        let c = ui_frame(&[("TEST", false), ("W1XYZ", false)], b"info2");
        assert_eq!(a.dedupe_crc(), b.dedupe_crc());
        assert_ne!(a.dedupe_crc(), c.dedupe_crc());
    }

    #[test]
    fn test_dedupe_crc_ignores_path() {
        let a = ui_frame(&[("TEST", false), ("W1XYZ", false)], b"info1");
        let b = ui_frame(
            &[("TEST", false), ("W1XYZ", false), ("WIDE1-1", true)],
            b"info1",
        );
        assert_eq!(a.dedupe_crc(), b.dedupe_crc());
        assert_ne!(a.m_m_crc(), b.m_m_crc());
    }

    #[test]
    fn test_addresses_valid() {
        let p = ui_frame(&[("TEST", false), ("W1ABC", false)], b"");
        assert!(p.addresses_valid());

        let mut bytes = Vec::new();
        p.pack(&mut bytes);
        bytes[2] = 0xff; // not a shifted letter, digit, or space
        let q = Packet::from_frame(&bytes, None).unwrap();
        assert!(!q.addresses_valid());
    }

    #[test]
    fn test_audio_level_display() {
        assert_eq!(AudioLevel::new(88, 60, 55).to_string(), "88(60/55)");
        assert_eq!(AudioLevel::baseband(72).to_string(), "72");
    }
}
