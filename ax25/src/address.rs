use crate::error::{Ax25Error, Result};

/// Size of one encoded address field.
pub const ADDR_LEN: usize = 7;

/// Maximum callsign length (without SSID).
pub const MAX_CALL_LEN: usize = 6;

/// Bit 7 of the SSID byte: "has been repeated" on a digipeater address,
/// C/R on source and destination.
const SSID_H_MASK: u8 = 0x80;
/// Bits 6-5: reserved, transmitted as 1.
const SSID_RESERVED: u8 = 0x60;
/// Bits 4-1: the SSID value.
const SSID_MASK: u8 = 0x1e;
/// Bit 0: set only on the final address of the frame.
const SSID_LAST_MASK: u8 = 0x01;

/// One decoded 7-byte address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    call: [u8; MAX_CALL_LEN],
    call_len: usize,
    pub ssid: u8,
    pub h: bool,
    pub last: bool,
}

impl Address {
    /// Parse a textual `CALL` or `CALL-SSID`.
    ///
    /// `strict` enforces 1..=6 upper-case letters or digits and SSID 0..15;
    /// non-strict additionally tolerates lower case (folded up).
    pub fn from_text(text: &str, strict: bool) -> Result<Address> {
        let bad = |reason: &str| Ax25Error::BadCallsign {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let (call_part, ssid_part) = match text.split_once('-') {
            Some((c, s)) => (c, Some(s)),
            None => (text, None),
        };

        if call_part.is_empty() {
            return Err(bad("empty callsign"));
        }
        if call_part.len() > MAX_CALL_LEN {
            return Err(bad("callsign longer than 6 characters"));
        }

        let mut call = [b' '; MAX_CALL_LEN];
        for (i, ch) in call_part.bytes().enumerate() {
            let ch = match ch {
                b'A'..=b'Z' | b'0'..=b'9' => ch,
                b'a'..=b'z' if !strict => ch.to_ascii_uppercase(),
                _ => return Err(bad("callsign may contain only A-Z and 0-9")),
            };
            call[i] = ch;
        }

        let ssid = match ssid_part {
            Some(s) => s
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= 15)
                .ok_or_else(|| bad("SSID must be 0..15"))?,
            None => 0,
        };

        Ok(Address {
            call,
            call_len: call_part.len(),
            ssid,
            h: false,
            last: false,
        })
    }

    /// Decode a wire-format 7-byte field.
    ///
    /// `strict` rejects fields whose callsign bytes are not shifted
    /// upper-case letters, digits, or shifted-space padding.
    pub fn from_wire(field: &[u8], strict: bool) -> Option<Address> {
        if field.len() != ADDR_LEN {
            return None;
        }
        let mut call = [b' '; MAX_CALL_LEN];
        let mut call_len = 0;
        let mut in_pad = false;
        for (i, &b) in field[..MAX_CALL_LEN].iter().enumerate() {
            // Low bit must be clear on every callsign byte.
            if strict && b & 1 != 0 {
                return None;
            }
            let ch = b >> 1;
            match ch {
                b'A'..=b'Z' | b'0'..=b'9' => {
                    // Padding must be trailing only.
                    if strict && in_pad {
                        return None;
                    }
                    call[i] = ch;
                    call_len = i + 1;
                }
                b' ' => in_pad = true,
                _ if strict => return None,
                _ => in_pad = true,
            }
        }
        if strict && call_len == 0 {
            return None;
        }
        let ssid_byte = field[6];
        Some(Address {
            call,
            call_len,
            ssid: (ssid_byte & SSID_MASK) >> 1,
            h: ssid_byte & SSID_H_MASK != 0,
            last: ssid_byte & SSID_LAST_MASK != 0,
        })
    }

    /// Encode to the wire 7-byte form.
    pub fn to_wire(&self) -> [u8; ADDR_LEN] {
        let mut out = [b' ' << 1; ADDR_LEN];
        for i in 0..self.call_len {
            out[i] = self.call[i] << 1;
        }
        out[6] = SSID_RESERVED
            | (self.ssid << 1) & SSID_MASK
            | if self.h { SSID_H_MASK } else { 0 }
            | if self.last { SSID_LAST_MASK } else { 0 };
        out
    }

    /// Callsign without SSID, e.g. `"WB2OSZ"`.
    pub fn call(&self) -> &str {
        // Only ASCII upper-case letters and digits are ever stored.
        std::str::from_utf8(&self.call[..self.call_len]).unwrap_or("")
    }

    /// Callsign with `-SSID` suffix when the SSID is non-zero.
    pub fn to_text(&self) -> String {
        if self.ssid != 0 {
            format!("{}-{}", self.call(), self.ssid)
        } else {
            self.call().to_string()
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}
