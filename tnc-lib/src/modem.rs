//! Per-channel coordination: fan a sample stream out to every subchannel
//! and slicer, and suppress the duplicate decodes that parallel variants
//! inevitably produce.

use std::collections::VecDeque;

use crate::config::ModemConfig;
use crate::demod::Demodulator;
use crate::rrbb::Rrbb;

/// All demodulator variants of one audio channel.
pub struct Multimodem {
    demods: Vec<Demodulator>,
    decimate: u32,
    phase: u32,
    sample_clock: u64,
}

impl Multimodem {
    pub fn new(chan: usize, cfg: &ModemConfig) -> Multimodem {
        let demods = cfg
            .subchannels()
            .iter()
            .enumerate()
            .map(|(i, spec)| Demodulator::new(chan, i, spec, cfg))
            .collect();
        Multimodem {
            demods,
            decimate: cfg.decimate.clamp(1, 8),
            phase: 0,
            sample_clock: 0,
        }
    }

    pub fn num_subchans(&self) -> usize {
        self.demods.len()
    }

    /// Feed one sample (-1.0..1.0) to every subchannel. Captured frame
    /// buffers are stamped with the channel sample clock for the voter.
    pub fn process_sample(&mut self, x: f32, out: &mut Vec<Rrbb>) {
        self.sample_clock += 1;
        self.phase += 1;
        if self.phase < self.decimate {
            return;
        }
        self.phase = 0;

        let before = out.len();
        for d in &mut self.demods {
            d.process_sample(x, out);
        }
        for rrbb in &mut out[before..] {
            rrbb.set_sample_clock(self.sample_clock);
        }
    }

    /// Any subchannel believes a frame is in progress: the channel-busy
    /// input to the transmit side's carrier sense.
    pub fn dcd(&self) -> bool {
        self.demods.iter().any(|d| d.dcd())
    }

    pub fn sample_clock(&self) -> u64 {
        self.sample_clock
    }
}

/// First-decode-wins dedupe across the subchannels and slicers of one
/// channel. Frames are identified by whole-frame CRC; entries expire after
/// a fixed span of the channel's sample clock. Entirely separate from the
/// digipeater's dedupe cache.
pub struct Voter {
    window: u64,
    recent: VecDeque<(u16, u64)>,
}

impl Voter {
    /// `window` is in channel samples; half a second is plenty, as
    /// duplicate decodes of one transmission land within a frame time.
    pub fn new(window: u64) -> Voter {
        Voter {
            window,
            recent: VecDeque::new(),
        }
    }

    /// True when this frame is the first appearance within the window.
    pub fn accept(&mut self, m_m_crc: u16, clock: u64) -> bool {
        while let Some(&(_, at)) = self.recent.front() {
            if at + self.window <= clock {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.iter().any(|&(crc, _)| crc == m_m_crc) {
            return false;
        }
        self.recent.push_back((m_m_crc, clock));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voter_first_wins() {
        let mut v = Voter::new(1000);
        assert!(v.accept(0x1234, 10));
        assert!(!v.accept(0x1234, 500));
        assert!(v.accept(0x5678, 600));
    }

    #[test]
    fn test_voter_expires() {
        let mut v = Voter::new(1000);
        assert!(v.accept(0x1234, 10));
        assert!(v.accept(0x1234, 1100));
    }

    #[test]
    fn test_multimodem_expands_profiles() {
        use crate::config::{ModemConfig, Profile};
        let mut cfg = ModemConfig::for_baud(1200, 44100);
        cfg.profiles = Profile::parse("E").unwrap();
        let mm = Multimodem::new(0, &cfg);
        assert_eq!(mm.num_subchans(), 3);
    }

    #[test]
    fn test_decimation_reduces_work() {
        let mut cfg = ModemConfig::for_baud(1200, 44100);
        cfg.decimate = 4;
        let mut mm = Multimodem::new(0, &cfg);
        let mut out = Vec::new();
        for _ in 0..100 {
            mm.process_sample(0.0, &mut out);
        }
        assert_eq!(mm.sample_clock(), 100);
        assert!(out.is_empty());
    }
}
