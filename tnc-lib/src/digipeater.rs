//! APRS digipeater decision engine: decide whether a received UI frame
//! should be retransmitted, and rewrite its digipeater path accordingly.

use log::debug;
use regex::Regex;

use ax25::packet::{DESTINATION, MAX_REPEATERS, Packet, REPEATER_1};

use crate::dedupe::DedupeCache;
use crate::txqueue::Priority;

/// Destination-SSID shorthand paths: a beacon sent to `CALL-3` with no
/// digipeater addresses means "via WIDE3-3". SSIDs 8..15 were directional
/// variants; the directions are obsolete, the hop counts remain.
const SSID_TO_PATH: [&str; 16] = [
    "", "WIDE1-1", "WIDE2-2", "WIDE3-3", "WIDE4-4", "WIDE5-5", "WIDE6-6", "WIDE7-7",
    "WIDE1-1", "WIDE1-1", "WIDE1-1", "WIDE1-1", "WIDE2-2", "WIDE2-2", "WIDE2-2", "WIDE2-2",
];

/// What to do when our call or alias appears further down the path than
/// the first unused hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preempt {
    #[default]
    Off,
    /// Remove every earlier digipeater address.
    Drop,
    /// Keep earlier addresses but mark them repeated.
    Mark,
    /// Remove earlier addresses that were never used.
    Trace,
}

/// Arbitrary accept/reject hook evaluated before anything else. The
/// expression language lives with the configuration layer; the engine only
/// sees the compiled predicate.
pub type PacketFilter = Box<dyn Fn(&Packet) -> bool + Send + Sync>;

/// Digipeating behaviour for one (receive channel, transmit channel) pair.
pub struct DigiRule {
    pub enabled: bool,
    /// Our callsign as heard on the receive channel.
    pub mycall_rx: String,
    /// Our callsign on the transmit channel; may differ from `mycall_rx`.
    pub mycall_tx: String,
    /// "Trap" aliases rewritten wholesale to mycall, e.g. oversized
    /// WIDE4-7 requests.
    pub alias: Regex,
    /// The standard WIDEn-n / TRACEn-n hop-count patterns.
    pub wide: Regex,
    pub preempt: Preempt,
    pub filter: Option<PacketFilter>,
}

impl DigiRule {
    pub fn new(mycall: &str, alias: Regex, wide: Regex) -> DigiRule {
        DigiRule {
            enabled: true,
            mycall_rx: mycall.to_string(),
            mycall_tx: mycall.to_string(),
            alias,
            wide,
            preempt: Preempt::Off,
            filter: None,
        }
    }
}

/// Decide whether to digipeat `pkt` heard on `from_chan` out `to_chan`.
/// The input packet is never modified; a forward returns a rewritten
/// duplicate and its transmit priority.
pub fn digipeat(
    pkt: &Packet,
    from_chan: usize,
    to_chan: usize,
    rule: &DigiRule,
    dedupe: &mut DedupeCache,
) -> Option<(Packet, Priority)> {
    if !rule.enabled {
        return None;
    }
    let result = digipeat_match(pkt, to_chan, rule, dedupe)?;
    // Future copies of this packet are duplicates from here on, whatever
    // path rewriting was done to this one.
    dedupe.remember(pkt, to_chan);
    // Same-channel forwards go out ahead of locally originated traffic.
    let prio = if to_chan == from_chan {
        Priority::High
    } else {
        Priority::Low
    };
    Some((result, prio))
}

fn digipeat_match(
    pkt: &Packet,
    to_chan: usize,
    rule: &DigiRule,
    dedupe: &mut DedupeCache,
) -> Option<Packet> {
    if let Some(filter) = &rule.filter
        && !filter(pkt)
    {
        return None;
    }

    let mut result = pkt.dup();

    // A non-zero destination SSID with an empty path is shorthand for a
    // standard WIDE path.
    let dest_ssid = result.ssid(DESTINATION);
    if dest_ssid != 0 && result.num_repeaters() == 0 {
        let path = SSID_TO_PATH[dest_ssid as usize];
        if !path.is_empty() {
            result.set_addr(REPEATER_1, path);
        }
        result.set_ssid(DESTINATION, 0);
    }

    let r = result.first_not_repeated()?;
    let addr = result.addr_with_ssid(r);

    // Addressed to us explicitly: always repeat, even a recent duplicate.
    if addr == rule.mycall_rx {
        result.set_addr(r, &rule.mycall_tx);
        result.set_h(r);
        return Some(result);
    }

    if dedupe.check(pkt, to_chan) {
        debug!(
            "dropping duplicate of {} for channel {}",
            pkt.format_addrs(),
            to_chan
        );
        return None;
    }

    if rule.alias.is_match(&addr) {
        result.set_addr(r, &rule.mycall_tx);
        result.set_h(r);
        return Some(result);
    }

    if rule.preempt != Preempt::Off {
        for p in r + 1..result.num_addr() {
            let a = result.addr_with_ssid(p);
            if a == rule.mycall_rx || rule.alias.is_match(&a) {
                let new_r = preempt_adjust(&mut result, p, rule.preempt);
                result.set_addr(new_r, &rule.mycall_tx);
                result.set_h(new_r);
                return Some(result);
            }
        }
    }

    if rule.wide.is_match(&addr) {
        match result.ssid(r) {
            // Last hop: we are the final station on this path.
            1 => {
                result.set_addr(r, &rule.mycall_tx);
                result.set_h(r);
            }
            ssid @ 2..=7 => {
                result.set_ssid(r, ssid - 1);
                if result.num_repeaters() < MAX_REPEATERS {
                    result.insert_addr(r, &rule.mycall_tx);
                    result.set_h(r);
                }
            }
            _ => return None,
        }
        return Some(result);
    }

    None
}

/// Apply the preemption mode to the addresses ahead of the match at `p`;
/// returns the match's index afterwards.
fn preempt_adjust(result: &mut Packet, p: usize, mode: Preempt) -> usize {
    match mode {
        Preempt::Off => p,
        Preempt::Drop => {
            for i in (REPEATER_1..p).rev() {
                result.remove_addr(i);
            }
            REPEATER_1
        }
        Preempt::Mark => {
            for i in REPEATER_1..p {
                result.set_h(i);
            }
            p
        }
        Preempt::Trace => {
            let mut new_p = p;
            for i in (REPEATER_1..p).rev() {
                if !result.h(i) {
                    result.remove_addr(i);
                    new_p -= 1;
                }
            }
            new_p
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::DEFAULT_WINDOW;

    fn test_rule() -> DigiRule {
        DigiRule::new(
            "WB2OSZ-9",
            Regex::new("^WIDE[4-7]-[1-7]|CITYD$").unwrap(),
            Regex::new("^WIDE[1-7]-[1-7]$|^TRACE[1-7]-[1-7]$|^MA[1-7]-[1-7]$").unwrap(),
        )
    }

    fn run(monitor: &str, rule: &DigiRule) -> Option<String> {
        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let pkt = Packet::from_text(monitor, true).unwrap();
        digipeat(&pkt, 0, 0, rule, &mut dedupe).map(|(p, _)| {
            format!("{}{}", p.format_addrs(), String::from_utf8_lossy(p.info()))
        })
    }

    #[test]
    fn test_explicit_path_digipeat() {
        assert_eq!(
            run("W1ABC>TEST01,TRACE3-3:", &test_rule()).unwrap(),
            "W1ABC>TEST01,WB2OSZ-9*,TRACE3-2:"
        );
    }

    #[test]
    fn test_wide_decrement_at_end() {
        assert_eq!(
            run("W1ABC>TEST03,WIDE3-2:", &test_rule()).unwrap(),
            "W1ABC>TEST03,WB2OSZ-9*,WIDE3-1:"
        );
    }

    #[test]
    fn test_trap_oversized_wide() {
        assert_eq!(
            run("W1ABC>TEST21,WIDE4-4:", &test_rule()).unwrap(),
            "W1ABC>TEST21,WB2OSZ-9*:"
        );
    }

    #[test]
    fn test_destination_ssid_translation() {
        assert_eq!(
            run("W1ABC>TEST-3:", &test_rule()).unwrap(),
            "W1ABC>TEST,WB2OSZ-9*,WIDE3-2:"
        );
    }

    #[test]
    fn test_last_hop_takes_address() {
        assert_eq!(
            run("W1ABC>TEST,WIDE1-1:", &test_rule()).unwrap(),
            "W1ABC>TEST,WB2OSZ-9*:"
        );
    }

    #[test]
    fn test_fully_used_path_not_repeated() {
        assert!(run("W1ABC>TEST,WIDE1-1*:", &test_rule()).is_none());
    }

    #[test]
    fn test_dedupe_suppression() {
        let rule = test_rule();
        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let pkt = Packet::from_text("W1XYZ>TEST,R1*,WIDE3-2:info1", true).unwrap();

        let (first, _) = digipeat(&pkt, 0, 0, &rule, &mut dedupe).unwrap();
        assert_eq!(
            format!("{}{}", first.format_addrs(), String::from_utf8_lossy(first.info())),
            "W1XYZ>TEST,R1,WB2OSZ-9*,WIDE3-1:info1"
        );

        // Two more copies inside the window: suppressed.
        let pkt2 = Packet::from_text("W1XYZ>TEST,R1*,WIDE3-2:info1", true).unwrap();
        assert!(digipeat(&pkt2, 0, 0, &rule, &mut dedupe).is_none());
        assert!(digipeat(&pkt2, 0, 0, &rule, &mut dedupe).is_none());
    }

    #[test]
    fn test_explicit_mycall_skips_dedupe() {
        let rule = test_rule();
        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let pkt = Packet::from_text("W1ABC>TEST,WB2OSZ-9:hi", true).unwrap();
        assert!(digipeat(&pkt, 0, 0, &rule, &mut dedupe).is_some());
        // The duplicate is repeated anyway: it asked for us by name.
        let pkt2 = Packet::from_text("W1ABC>TEST,WB2OSZ-9:hi", true).unwrap();
        let (out, _) = digipeat(&pkt2, 0, 0, &rule, &mut dedupe).unwrap();
        assert_eq!(out.format_addrs(), "W1ABC>TEST,WB2OSZ-9*:");
    }

    #[test]
    fn test_mycall_rewrites_to_transmit_call() {
        let mut rule = test_rule();
        rule.mycall_tx = "WB2OSZ-10".to_string();
        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let pkt = Packet::from_text("W1ABC>TEST,WB2OSZ-9:hi", true).unwrap();
        let (out, _) = digipeat(&pkt, 0, 1, &rule, &mut dedupe).unwrap();
        assert_eq!(out.format_addrs(), "W1ABC>TEST,WB2OSZ-10*:");
    }

    #[test]
    fn test_priority_high_same_channel_low_cross_channel() {
        let rule = test_rule();
        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let pkt = Packet::from_text("W1ABC>TEST,WIDE1-1:", true).unwrap();
        let (_, prio) = digipeat(&pkt, 0, 0, &rule, &mut dedupe).unwrap();
        assert_eq!(prio, Priority::High);

        let mut dedupe = DedupeCache::new(DEFAULT_WINDOW);
        let (_, prio) = digipeat(&pkt, 0, 1, &rule, &mut dedupe).unwrap();
        assert_eq!(prio, Priority::Low);
    }

    #[test]
    fn test_preempt_trace_removes_unused() {
        let mut rule = test_rule();
        rule.preempt = Preempt::Trace;
        assert_eq!(
            run("W1ABC>TEST,R1,R2,WB2OSZ-9,R3:", &rule).unwrap(),
            "W1ABC>TEST,WB2OSZ-9*,R3:"
        );
        // A hop already used stays for the audit trail.
        assert_eq!(
            run("W1ABC>TEST,R1*,R2,WB2OSZ-9,R3:", &rule).unwrap(),
            "W1ABC>TEST,R1,WB2OSZ-9*,R3:"
        );
    }

    #[test]
    fn test_preempt_mark_keeps_addresses() {
        let mut rule = test_rule();
        rule.preempt = Preempt::Mark;
        assert_eq!(
            run("W1ABC>TEST,R1,R2,WB2OSZ-9,R3:", &rule).unwrap(),
            "W1ABC>TEST,R1,R2,WB2OSZ-9*,R3:"
        );
    }

    #[test]
    fn test_preempt_drop_removes_all_prior() {
        let mut rule = test_rule();
        rule.preempt = Preempt::Drop;
        assert_eq!(
            run("W1ABC>TEST,R1*,R2,WB2OSZ-9,R3:", &rule).unwrap(),
            "W1ABC>TEST,WB2OSZ-9*,R3:"
        );
    }

    #[test]
    fn test_preempt_off_ignores_later_match() {
        assert!(run("W1ABC>TEST,R1,WB2OSZ-9:", &test_rule()).is_none());
    }

    #[test]
    fn test_filter_rejects() {
        let mut rule = test_rule();
        rule.filter = Some(Box::new(|p: &Packet| p.info().starts_with(b"!")));
        assert!(run("W1ABC>TEST,WIDE1-1:>status", &rule).is_none());
        assert!(run("W1ABC>TEST,WIDE1-1:!position", &rule).is_some());
    }

    #[test]
    fn test_disabled_rule() {
        let mut rule = test_rule();
        rule.enabled = false;
        assert!(run("W1ABC>TEST,WIDE1-1:", &rule).is_none());
    }

    #[test]
    fn test_full_path_just_decrements() {
        // Eight repeaters already: decrement without inserting ourselves.
        let rule = test_rule();
        let out = run("W1ABC>TEST,R1*,R2*,R3*,R4*,R5*,R6*,R7*,WIDE2-2:", &rule).unwrap();
        assert_eq!(out, "W1ABC>TEST,R1,R2,R3,R4,R5,R6,R7*,WIDE2-1:");
    }
}
