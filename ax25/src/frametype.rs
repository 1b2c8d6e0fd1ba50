//! Control-field classification for both modulo-8 and modulo-128 frames.

use crate::packet::Packet;

/// Sequence-number modulus in effect on a link. Modulo-128 I and S frames
/// carry a two-byte control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Modulo {
    Eight,
    OneTwentyEight,
}

impl Modulo {
    /// Largest usable window size for this modulus.
    pub fn max_window(self) -> u8 {
        match self {
            Modulo::Eight => 7,
            Modulo::OneTwentyEight => 127,
        }
    }
}

/// Decoded frame type with the sequence fields that apply to it.
///
/// `pf` is the poll/final bit; `nr`/`ns` are receive and send sequence
/// numbers where the type defines them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FrameType {
    I { nr: u8, ns: u8, pf: bool },
    Rr { nr: u8, pf: bool },
    Rnr { nr: u8, pf: bool },
    Rej { nr: u8, pf: bool },
    Srej { nr: u8, pf: bool },
    Sabm { pf: bool },
    Sabme { pf: bool },
    Disc { pf: bool },
    Dm { pf: bool },
    Ua { pf: bool },
    Frmr { pf: bool },
    Ui { pf: bool },
    Xid { pf: bool },
    Test { pf: bool },
    Unknown { control: u8 },
}

impl FrameType {
    /// Short conventional name, e.g. `"RR"`.
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::I { .. } => "I",
            FrameType::Rr { .. } => "RR",
            FrameType::Rnr { .. } => "RNR",
            FrameType::Rej { .. } => "REJ",
            FrameType::Srej { .. } => "SREJ",
            FrameType::Sabm { .. } => "SABM",
            FrameType::Sabme { .. } => "SABME",
            FrameType::Disc { .. } => "DISC",
            FrameType::Dm { .. } => "DM",
            FrameType::Ua { .. } => "UA",
            FrameType::Frmr { .. } => "FRMR",
            FrameType::Ui { .. } => "UI",
            FrameType::Xid { .. } => "XID",
            FrameType::Test { .. } => "TEST",
            FrameType::Unknown { .. } => "?",
        }
    }
}

fn pf_mark(pf: bool) -> &'static str {
    if pf { " p/f" } else { "" }
}

/// Monitor-style rendering with the sequence fields spelled out,
/// e.g. `I nr=5 ns=3 p/f` or `RR nr=2`.
impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            FrameType::I { nr, ns, pf } => write!(f, "I nr={nr} ns={ns}{}", pf_mark(pf)),
            FrameType::Rr { nr, pf } => write!(f, "RR nr={nr}{}", pf_mark(pf)),
            FrameType::Rnr { nr, pf } => write!(f, "RNR nr={nr}{}", pf_mark(pf)),
            FrameType::Rej { nr, pf } => write!(f, "REJ nr={nr}{}", pf_mark(pf)),
            FrameType::Srej { nr, pf } => write!(f, "SREJ nr={nr}{}", pf_mark(pf)),
            FrameType::Sabm { pf }
            | FrameType::Sabme { pf }
            | FrameType::Disc { pf }
            | FrameType::Dm { pf }
            | FrameType::Ua { pf }
            | FrameType::Frmr { pf }
            | FrameType::Ui { pf }
            | FrameType::Xid { pf }
            | FrameType::Test { pf } => write!(f, "{}{}", self.name(), pf_mark(pf)),
            FrameType::Unknown { control } => write!(f, "control 0x{control:02x}"),
        }
    }
}

fn unnumbered(control: u8) -> FrameType {
    let pf = control & 0x10 != 0;
    match control & !0x10 {
        0x03 => FrameType::Ui { pf },
        0x0f => FrameType::Dm { pf },
        0x2f => FrameType::Sabm { pf },
        0x43 => FrameType::Disc { pf },
        0x63 => FrameType::Ua { pf },
        0x6f => FrameType::Sabme { pf },
        0x87 => FrameType::Frmr { pf },
        0xaf => FrameType::Xid { pf },
        0xe3 => FrameType::Test { pf },
        _ => FrameType::Unknown { control },
    }
}

fn supervisory(ss: u8, nr: u8, pf: bool) -> FrameType {
    match ss {
        0 => FrameType::Rr { nr, pf },
        1 => FrameType::Rnr { nr, pf },
        2 => FrameType::Rej { nr, pf },
        _ => FrameType::Srej { nr, pf },
    }
}

impl Packet {
    /// Classify the control field. Modulo-128 I and S frames read a second
    /// control byte; unnumbered frames always use one.
    pub fn frame_type(&self, modulo: Modulo) -> FrameType {
        let c = self.control();
        if c & 0x03 == 0x03 {
            return unnumbered(c);
        }
        match modulo {
            Modulo::Eight => {
                let pf = c & 0x10 != 0;
                let nr = c >> 5;
                if c & 0x01 == 0 {
                    FrameType::I { nr, ns: (c >> 1) & 0x07, pf }
                } else {
                    supervisory((c >> 2) & 0x03, nr, pf)
                }
            }
            Modulo::OneTwentyEight => {
                let Some(c2) = self.c2() else {
                    return FrameType::Unknown { control: c };
                };
                let pf = c2 & 0x01 != 0;
                let nr = c2 >> 1;
                if c & 0x01 == 0 {
                    FrameType::I { nr, ns: c >> 1, pf }
                } else {
                    supervisory((c >> 2) & 0x03, nr, pf)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_control(control: &[u8]) -> Packet {
        let text = Packet::from_text("W1ABC>TEST:", true).unwrap();
        let mut data = Vec::new();
        text.pack(&mut data);
        data.truncate(14); // keep the two address fields
        data.extend_from_slice(control);
        Packet::from_frame(&data, None).unwrap()
    }

    #[test]
    fn test_ui() {
        let p = frame_with_control(&[0x03, 0xf0]);
        assert_eq!(p.frame_type(Modulo::Eight), FrameType::Ui { pf: false });
        assert_eq!(p.frame_type(Modulo::Eight).name(), "UI");
    }

    #[test]
    fn test_i_frame_modulo_8() {
        // N(R)=5, P=1, N(S)=3: 101 1 011 0
        let p = frame_with_control(&[0xb6, 0xf0, b'x']);
        assert_eq!(
            p.frame_type(Modulo::Eight),
            FrameType::I { nr: 5, ns: 3, pf: true }
        );
    }

    #[test]
    fn test_s_frames_modulo_8() {
        // RR with N(R)=2: 010 0 00 01
        let p = frame_with_control(&[0x41]);
        assert_eq!(
            p.frame_type(Modulo::Eight),
            FrameType::Rr { nr: 2, pf: false }
        );
        // REJ with N(R)=7, F=1: 111 1 10 01
        let p = frame_with_control(&[0xf9]);
        assert_eq!(
            p.frame_type(Modulo::Eight),
            FrameType::Rej { nr: 7, pf: true }
        );
    }

    #[test]
    fn test_i_frame_modulo_128() {
        // N(S)=64 in byte one, N(R)=100 F=1 in byte two.
        let p = frame_with_control(&[64 << 1, (100 << 1) | 1, b'y']);
        assert_eq!(
            p.frame_type(Modulo::OneTwentyEight),
            FrameType::I { nr: 100, ns: 64, pf: true }
        );
    }

    #[test]
    fn test_unnumbered_ignores_modulo() {
        let p = frame_with_control(&[0x6f]);
        assert_eq!(
            p.frame_type(Modulo::OneTwentyEight),
            FrameType::Sabme { pf: false }
        );
        let p = frame_with_control(&[0xaf | 0x10]);
        assert_eq!(p.frame_type(Modulo::Eight), FrameType::Xid { pf: true });
    }

    #[test]
    fn test_srej_modulo_8() {
        let p = frame_with_control(&[0x0d]);
        assert_eq!(
            p.frame_type(Modulo::Eight),
            FrameType::Srej { nr: 0, pf: false }
        );
    }

    #[test]
    fn test_unknown_unnumbered() {
        let p = frame_with_control(&[0xff]);
        assert_eq!(
            p.frame_type(Modulo::Eight),
            FrameType::Unknown { control: 0xff }
        );
    }

    #[test]
    fn test_display_spells_out_fields() {
        let p = frame_with_control(&[0xb6, 0xf0, b'x']);
        assert_eq!(p.frame_type(Modulo::Eight).to_string(), "I nr=5 ns=3 p/f");
        let p = frame_with_control(&[0x41]);
        assert_eq!(p.frame_type(Modulo::Eight).to_string(), "RR nr=2");
        let p = frame_with_control(&[0x03, 0xf0]);
        assert_eq!(p.frame_type(Modulo::Eight).to_string(), "UI");
        let p = frame_with_control(&[0xff]);
        assert_eq!(p.frame_type(Modulo::Eight).to_string(), "control 0xff");
    }

    #[test]
    fn test_max_window() {
        assert_eq!(Modulo::Eight.max_window(), 7);
        assert_eq!(Modulo::OneTwentyEight.max_window(), 127);
    }
}
