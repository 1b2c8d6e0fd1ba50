//! Exchange-identification (XID) parameter negotiation payloads,
//! AX.25 v2.2 sections 4.3.3.7 and 6.3.2.
//!
//! Layout: format indicator 0x82, group indicator 0x80, a two-byte
//! big-endian group length, then (parameter indicator, length, big-endian
//! value) tuples.

use crate::address::Address;
use crate::error::{Ax25Error, Result};
use crate::frametype::Modulo;
use crate::packet::Packet;

const FORMAT_INDICATOR: u8 = 0x82;
const GROUP_INDICATOR: u8 = 0x80;

const PI_CLASSES_OF_PROCEDURES: u8 = 2;
const PI_HDLC_OPTIONAL_FUNCTIONS: u8 = 3;
const PI_I_FIELD_LENGTH_RX: u8 = 6;
const PI_WINDOW_SIZE_RX: u8 = 8;
const PI_ACK_TIMER: u8 = 9;
const PI_RETRIES: u8 = 10;

// Classes of procedures bits.
const PV_BALANCED_ABM: u16 = 0x0100;
const PV_HALF_DUPLEX: u16 = 0x2000;
const PV_FULL_DUPLEX: u16 = 0x4000;

// HDLC optional functions bits (three-byte value, read big-endian).
const PV_REJ: u32 = 0x020000;
const PV_SREJ: u32 = 0x040000;
const PV_EXTENDED_ADDRESS: u32 = 0x800000;
const PV_MODULO_8: u32 = 0x000400;
const PV_MODULO_128: u32 = 0x000800;
const PV_TEST_CMD_RESP: u32 = 0x002000;
const PV_16_BIT_FCS: u32 = 0x008000;
const PV_SYNCHRONOUS_TX: u32 = 0x000002;

/// Retransmission request convention. Negotiation keeps the lower variant,
/// so the order here is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum RejectMode {
    None,
    /// Plain REJ only.
    Implicit,
    /// SREJ only.
    Selective,
    /// Both SREJ and REJ.
    SelectiveAndImplicit,
}

impl RejectMode {
    pub fn negotiate(self, other: RejectMode) -> RejectMode {
        self.min(other)
    }
}

impl Modulo {
    /// Negotiation keeps the smaller modulus.
    pub fn negotiate(self, other: Modulo) -> Modulo {
        if self == Modulo::Eight || other == Modulo::Eight {
            Modulo::Eight
        } else {
            Modulo::OneTwentyEight
        }
    }

    fn default_window(self) -> u8 {
        match self {
            Modulo::Eight => 7,
            Modulo::OneTwentyEight => 32,
        }
    }
}

/// Negotiable link parameters carried in an XID information field.
///
/// Fields a peer leaves out of the encoded form take the defaults
/// produced by [`XidParams::default_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct XidParams {
    pub full_duplex: bool,
    pub rej: RejectMode,
    pub modulo: Modulo,
    /// Largest information field we can receive, in bytes.
    pub i_field_length_rx: u32,
    /// Receive window k, 1..modulo-1.
    pub window_size_rx: u8,
    /// Acknowledge timer T1 in milliseconds.
    pub ack_timer: u32,
    pub retries: u8,
}

impl XidParams {
    /// Defaults for a link running with the given modulus.
    pub fn default_for(modulo: Modulo) -> XidParams {
        XidParams {
            full_duplex: false,
            rej: RejectMode::Selective,
            modulo,
            i_field_length_rx: 2048,
            window_size_rx: modulo.default_window(),
            ack_timer: 3000,
            retries: 10,
        }
    }

    /// Encode to the wire form. Every parameter is emitted explicitly.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![FORMAT_INDICATOR, GROUP_INDICATOR, 0, 0];

        let mut classes = PV_BALANCED_ABM;
        classes |= if self.full_duplex { PV_FULL_DUPLEX } else { PV_HALF_DUPLEX };
        push_param(&mut out, PI_CLASSES_OF_PROCEDURES, &classes.to_be_bytes());

        let mut opt = PV_EXTENDED_ADDRESS | PV_TEST_CMD_RESP | PV_16_BIT_FCS | PV_SYNCHRONOUS_TX;
        opt |= match self.rej {
            RejectMode::None => 0,
            RejectMode::Implicit => PV_REJ,
            RejectMode::Selective => PV_SREJ,
            RejectMode::SelectiveAndImplicit => PV_SREJ | PV_REJ,
        };
        opt |= match self.modulo {
            Modulo::Eight => PV_MODULO_8,
            Modulo::OneTwentyEight => PV_MODULO_128,
        };
        push_param(&mut out, PI_HDLC_OPTIONAL_FUNCTIONS, &opt.to_be_bytes()[1..]);

        let bits = (self.i_field_length_rx * 8).min(u16::MAX as u32) as u16;
        push_param(&mut out, PI_I_FIELD_LENGTH_RX, &bits.to_be_bytes());
        push_param(&mut out, PI_WINDOW_SIZE_RX, &[self.window_size_rx]);
        let timer = self.ack_timer.min(u16::MAX as u32) as u16;
        push_param(&mut out, PI_ACK_TIMER, &timer.to_be_bytes());
        push_param(&mut out, PI_RETRIES, &[self.retries]);

        let group_len = (out.len() - 4) as u16;
        out[2..4].copy_from_slice(&group_len.to_be_bytes());
        out
    }

    /// Decode a received XID information field. Parameters we do not
    /// negotiate (e.g. the transmit-direction duplicates) are skipped.
    pub fn decode(bytes: &[u8]) -> Result<XidParams> {
        if bytes.len() < 4 {
            return Err(Ax25Error::XidBadLength {
                expected: 4,
                got: bytes.len(),
            });
        }
        if bytes[0] != FORMAT_INDICATOR {
            return Err(Ax25Error::XidBadFormat { got: bytes[0] });
        }
        if bytes[1] != GROUP_INDICATOR {
            return Err(Ax25Error::XidBadGroup { got: bytes[1] });
        }
        let group_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let body = &bytes[4..];
        if body.len() != group_len {
            return Err(Ax25Error::XidBadLength {
                expected: group_len,
                got: body.len(),
            });
        }

        let mut params = XidParams::default_for(Modulo::Eight);
        let mut window: Option<u8> = None;

        let mut i = 0;
        while i < body.len() {
            if body.len() - i < 2 {
                return Err(Ax25Error::XidTruncated {
                    pi: body[i],
                    offset: i + 4,
                });
            }
            let pi = body[i];
            let len = body[i + 1] as usize;
            if body.len() - i - 2 < len {
                return Err(Ax25Error::XidTruncated { pi, offset: i + 4 });
            }
            let raw = &body[i + 2..i + 2 + len];
            i += 2 + len;

            if len > 4 {
                return Err(Ax25Error::XidBadValue {
                    pi,
                    reason: format!("{len}-byte value is too long"),
                });
            }
            let value = raw.iter().fold(0u32, |acc, &b| acc << 8 | b as u32);

            match pi {
                PI_CLASSES_OF_PROCEDURES => {
                    params.full_duplex = value & PV_FULL_DUPLEX as u32 != 0;
                }
                PI_HDLC_OPTIONAL_FUNCTIONS => {
                    params.rej = match (value & PV_SREJ != 0, value & PV_REJ != 0) {
                        (true, true) => RejectMode::SelectiveAndImplicit,
                        (true, false) => RejectMode::Selective,
                        (false, true) => RejectMode::Implicit,
                        (false, false) => RejectMode::None,
                    };
                    params.modulo = if value & PV_MODULO_128 != 0 {
                        Modulo::OneTwentyEight
                    } else {
                        Modulo::Eight
                    };
                }
                PI_I_FIELD_LENGTH_RX => {
                    if value % 8 != 0 {
                        return Err(Ax25Error::XidBadValue {
                            pi,
                            reason: format!("{value} bits is not a whole number of bytes"),
                        });
                    }
                    params.i_field_length_rx = value / 8;
                }
                PI_WINDOW_SIZE_RX => window = Some(value as u8),
                PI_ACK_TIMER => params.ack_timer = value,
                PI_RETRIES => params.retries = value as u8,
                // Transmit-direction lengths and anything newer than we
                // understand are skipped without complaint.
                _ => {}
            }
        }

        params.window_size_rx = window.unwrap_or(params.modulo.default_window());
        Ok(params)
    }

    /// Build a complete XID frame around this parameter set: two
    /// addresses, the XID control byte with P/F set, and the encoded
    /// information field. U frames other than UI carry no PID.
    pub fn to_frame(&self, src: &str, dst: &str, response: bool) -> Result<Packet> {
        let mut dst_addr = Address::from_text(dst, true)?;
        let mut src_addr = Address::from_text(src, true)?;
        // The address H slots carry C bits here: command sets the
        // destination's, response the source's.
        dst_addr.h = !response;
        src_addr.h = response;
        src_addr.last = true;

        let payload = self.encode();
        let mut data = Vec::with_capacity(15 + payload.len());
        data.extend_from_slice(&dst_addr.to_wire());
        data.extend_from_slice(&src_addr.to_wire());
        data.push(0xaf | 0x10);
        data.extend_from_slice(&payload);
        Ok(Packet::from_parts(data, None))
    }
}

fn push_param(out: &mut Vec<u8>, pi: u8, value: &[u8]) {
    out.push(pi);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}
