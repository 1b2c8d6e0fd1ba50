//! TNC-2 monitor syntax: `SRC[-ssid]>DST[-ssid][,REP[-ssid][*]]...:INFO`.

use crate::address::Address;
use crate::error::{Ax25Error, Result};
use crate::packet::{
    CONTROL_UI, MAX_INFO_LEN, MAX_REPEATERS, PID_NO_LAYER3, Packet, REPEATER_1,
};

impl Packet {
    /// Parse a monitor-format string into a UI packet.
    ///
    /// `<0xNN>` escapes in the information part are replaced with the
    /// literal byte. `strict` applies full callsign validation and rejects
    /// the `qA...` constructs that exist only inside the APRS internet
    /// system, never on the air.
    pub fn from_text(monitor: &str, strict: bool) -> Result<Packet> {
        let bad = |reason: &str| Ax25Error::BadMonitorText {
            text: monitor.to_string(),
            reason: reason.to_string(),
        };

        let (header, info_text) = monitor
            .split_once(':')
            .ok_or_else(|| bad("missing ':' before information part"))?;
        let (src_text, path) = header
            .split_once('>')
            .ok_or_else(|| bad("missing '>' after source"))?;

        let mut path_iter = path.split(',');
        let dst_text = path_iter.next().unwrap_or("");

        let mut addrs = Vec::new();
        let src = Address::from_text(src_text, strict)?;
        let dst = Address::from_text(dst_text, strict)?;
        addrs.push(dst);
        addrs.push(src);

        for rep_text in path_iter {
            let (rep_text, heard) = match rep_text.strip_suffix('*') {
                Some(t) => (t, true),
                None => (rep_text, false),
            };
            if strict && rep_text.len() >= 2 && rep_text[..2].eq_ignore_ascii_case("qA") {
                return Err(bad("q-constructs are not valid over-the-air addresses"));
            }
            let mut rep = Address::from_text(rep_text, strict)?;
            rep.h = heard;
            addrs.push(rep);
        }
        if addrs.len() - 2 > MAX_REPEATERS {
            return Err(bad("more than eight digipeater addresses"));
        }

        let info = unescape_info(info_text);
        if info.len() > MAX_INFO_LEN {
            return Err(bad("information field longer than 2048 bytes"));
        }

        let n = addrs.len();
        let mut data = Vec::with_capacity(n * 7 + 2 + info.len());
        for (i, mut a) in addrs.into_iter().enumerate() {
            a.last = i + 1 == n;
            data.extend_from_slice(&a.to_wire());
        }
        data.push(CONTROL_UI);
        data.push(PID_NO_LAYER3);
        data.extend_from_slice(&info);

        Ok(Packet::from_parts(data, None))
    }

    /// Render the address portion, `SRC>DST[,REP...]:`, with an asterisk
    /// after the last digipeater whose H bit is set.
    pub fn format_addrs(&self) -> String {
        let num = self.num_addr();
        let mut out = String::new();
        out.push_str(&self.addr_with_ssid(crate::packet::SOURCE));
        out.push('>');
        out.push_str(&self.addr_with_ssid(crate::packet::DESTINATION));

        let last_heard = (REPEATER_1..num).rev().find(|&n| self.h(n));
        for n in REPEATER_1..num {
            out.push(',');
            out.push_str(&self.addr_with_ssid(n));
            if Some(n) == last_heard {
                out.push('*');
            }
        }
        out.push(':');
        out
    }
}

/// Replace `<0xNN>` escapes with the literal byte; everything else is
/// copied through as UTF-8 bytes.
fn unescape_info(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes.len() - i >= 6
            && &bytes[i..i + 3] == b"<0x"
            && bytes[i + 5] == b'>'
            && bytes[i + 3].is_ascii_hexdigit()
            && bytes[i + 4].is_ascii_hexdigit()
        {
            let hi = (bytes[i + 3] as char).to_digit(16).unwrap() as u8;
            let lo = (bytes[i + 4] as char).to_digit(16).unwrap() as u8;
            out.push(hi << 4 | lo);
            i += 6;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}
