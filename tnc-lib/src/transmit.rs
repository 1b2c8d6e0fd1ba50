//! Transmit side: audio synthesis for outgoing frames and the
//! p-persistence CSMA discipline that decides when to key up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};

use ax25::packet::Packet;

use crate::config::ModemConfig;
use crate::hdlc::HdlcSerializer;
use crate::txqueue::TxQueue;

/// Channel access timing, all units of 10 ms per the KISS convention.
#[derive(Debug, Clone, Copy)]
pub struct ChannelAccess {
    /// Extra squelch settling delay before anything else.
    pub dwait: u32,
    /// Wait between persistence tries while the channel stays ours to take.
    pub slottime: u32,
    /// Transmit when a random byte is <= this.
    pub persist: u8,
    /// Flag padding after keying PTT, before data.
    pub txdelay: u32,
    /// Flag padding before dropping PTT.
    pub txtail: u32,
    /// Full duplex: skip carrier sense entirely.
    pub fulldup: bool,
}

impl Default for ChannelAccess {
    fn default() -> ChannelAccess {
        ChannelAccess {
            dwait: 0,
            slottime: 10,
            persist: 63,
            txdelay: 30,
            txtail: 10,
            fulldup: false,
        }
    }
}

/// Continuous-phase audio synthesis for one channel.
pub struct Modulator {
    sample_rate: u32,
    baud: u32,
    mark_freq: f64,
    space_freq: f64,
    scrambled: bool,
    amplitude: f64,
    phase: f64,
    bit_clock: f64,
}

impl Modulator {
    /// `amplitude` is 0..=200 percent of half full scale, the convention
    /// the transmit harness exposes.
    pub fn new(cfg: &ModemConfig, amplitude: u32) -> Modulator {
        Modulator {
            sample_rate: cfg.sample_rate,
            baud: cfg.baud,
            mark_freq: cfg.mark_freq as f64,
            space_freq: cfg.space_freq as f64,
            scrambled: cfg.scrambled,
            amplitude: (amplitude.min(200) as f64 / 100.0) * 0.5,
            phase: 0.0,
            bit_clock: 0.0,
        }
    }

    /// Append the audio for one line bit: a tone burst for AFSK, a level
    /// for scrambled baseband. Fractional samples carry over so the bit
    /// rate is exact on average.
    pub fn modulate_bit(&mut self, line_bit: bool, out: &mut Vec<i16>) {
        self.bit_clock += self.sample_rate as f64 / self.baud as f64;
        let n = self.bit_clock as usize;
        self.bit_clock -= n as f64;

        if self.scrambled {
            let level = if line_bit { self.amplitude } else { -self.amplitude };
            let sample = (level * 32767.0) as i16;
            out.extend(std::iter::repeat_n(sample, n));
        } else {
            let freq = if line_bit { self.mark_freq } else { self.space_freq };
            let step = std::f64::consts::TAU * freq / self.sample_rate as f64;
            for _ in 0..n {
                out.push((self.phase.sin() * self.amplitude * 32767.0) as i16);
                self.phase = (self.phase + step) % std::f64::consts::TAU;
            }
        }
    }

    pub fn modulate(&mut self, line_bits: &[bool], out: &mut Vec<i16>) {
        for &b in line_bits {
            self.modulate_bit(b, out);
        }
    }
}

/// Build the line bits for one key-up: leading zeros, txdelay flags, the
/// frames, txtail flags.
pub fn build_transmission(
    cfg: &ModemConfig,
    access: &ChannelAccess,
    leading_zero_bits: usize,
    frames: &[&Packet],
) -> Vec<bool> {
    let mut ser = HdlcSerializer::new(cfg.scrambled);
    let mut line = Vec::new();
    ser.send_zero_bits(leading_zero_bits, &mut line);
    for _ in 0..flags_for_ticks(access.txdelay, cfg.baud) {
        ser.send_flag(&mut line);
    }
    let mut bytes = Vec::new();
    for (i, pkt) in frames.iter().enumerate() {
        if i > 0 {
            ser.send_flag(&mut line);
        }
        bytes.clear();
        pkt.pack(&mut bytes);
        ser.send_frame(&bytes, &mut line);
    }
    for _ in 0..flags_for_ticks(access.txtail, cfg.baud) {
        ser.send_flag(&mut line);
    }
    line
}

/// Number of flag bytes that fill `ticks` x 10 ms at the given baud rate,
/// with at least one.
fn flags_for_ticks(ticks: u32, baud: u32) -> usize {
    ((ticks as u64 * baud as u64) / (100 * 8)).max(1) as usize
}

/// Push-to-talk control line. Idempotent; forced off on shutdown.
pub trait PttSink: Send {
    fn ptt_set(&mut self, chan: usize, on: bool);
}

/// A PTT line that goes nowhere, for receive-only setups and tests.
pub struct NullPtt;

impl PttSink for NullPtt {
    fn ptt_set(&mut self, _chan: usize, _on: bool) {}
}

/// One transmitter thread body: drains a device's channel queues and
/// plays the audio out through `sink`.
pub struct Transmitter<S: FnMut(usize, &[i16])> {
    pub queue: Arc<TxQueue>,
    pub device: usize,
    /// Modem and access settings per global channel number.
    pub modems: Vec<ModemConfig>,
    pub access: Vec<ChannelAccess>,
    /// Per-channel busy indication from the receive side.
    pub dcd: Arc<Vec<AtomicBool>>,
    pub ptt: Box<dyn PttSink>,
    /// Receives (channel, samples) for each key-up.
    pub sink: S,
}

impl<S: FnMut(usize, &[i16])> Transmitter<S> {
    /// Consume until the queue closes. The final act is forcing PTT off
    /// on every channel, stuck-key insurance aside from being polite.
    pub fn run(&mut self) {
        while let Some((chan, pkt)) = self.queue.wait_dequeue(self.device) {
            self.send_one_keyup(chan, pkt);
        }
        for chan in 0..self.modems.len() {
            self.ptt.ptt_set(chan, false);
        }
        info!("transmitter for device {} finished", self.device);
    }

    fn send_one_keyup(&mut self, chan: usize, first: Packet) {
        self.wait_for_channel(chan);

        // Collect whatever else queued for this channel while we waited;
        // one key-up carries them all.
        let mut frames = vec![first];
        while let Some(p) = self.queue.try_dequeue_chan(chan) {
            frames.push(p);
        }
        debug!("channel {}: transmitting {} frame(s)", chan, frames.len());

        let cfg = &self.modems[chan];
        let refs: Vec<&Packet> = frames.iter().collect();
        let line = build_transmission(cfg, &self.access[chan], 0, &refs);
        let mut audio = Vec::with_capacity(line.len() * (cfg.sample_rate / cfg.baud) as usize);
        let mut modulator = Modulator::new(cfg, 100);
        modulator.modulate(&line, &mut audio);

        self.ptt.ptt_set(chan, true);
        (self.sink)(chan, &audio);
        self.ptt.ptt_set(chan, false);
    }

    /// p-persistence CSMA: settle the squelch, wait out the carrier, then
    /// roll the dice each slot.
    fn wait_for_channel(&self, chan: usize) {
        let a = self.access[chan];
        if a.fulldup {
            return;
        }
        ticks(a.dwait);
        loop {
            while self.dcd[chan].load(Ordering::Relaxed) {
                ticks(1);
            }
            if rand::random::<u8>() <= a.persist {
                return;
            }
            ticks(a.slottime);
        }
    }
}

fn ticks(n: u32) {
    if n > 0 {
        std::thread::sleep(Duration::from_millis(n as u64 * 10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txqueue::Priority;

    #[test]
    fn test_modulator_sample_count_is_exact() {
        // 1200 bd at 44100: 36.75 samples per bit on average.
        let cfg = ModemConfig::for_baud(1200, 44100);
        let mut m = Modulator::new(&cfg, 100);
        let mut out = Vec::new();
        let bits = vec![true; 1200];
        m.modulate(&bits, &mut out);
        assert_eq!(out.len(), 44100);
    }

    #[test]
    fn test_modulator_amplitude() {
        let cfg = ModemConfig::for_baud(1200, 44100);
        let mut m = Modulator::new(&cfg, 100);
        let mut out = Vec::new();
        m.modulate(&vec![true; 100], &mut out);
        let peak = out.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!((15000..=16400).contains(&peak), "peak {peak}");
    }

    #[test]
    fn test_flags_fill_txdelay() {
        // 30 x 10ms at 1200 bd = 300ms = 360 bits = 45 flags.
        assert_eq!(flags_for_ticks(30, 1200), 45);
        assert_eq!(flags_for_ticks(0, 1200), 1);
    }

    #[test]
    fn test_transmitter_sends_queued_frames() {
        let queue = Arc::new(TxQueue::new(&[vec![0]]));
        let pkt = Packet::from_text("W1ABC>TEST:keyup", true).unwrap();
        queue.append(0, Priority::High, pkt);
        queue.close();

        let mut keyups = Vec::new();
        // Full duplex: no carrier sense in tests.
        let access = ChannelAccess { fulldup: true, ..Default::default() };
        let mut tx = Transmitter {
            queue,
            device: 0,
            modems: vec![ModemConfig::for_baud(1200, 44100)],
            access: vec![access],
            dcd: Arc::new(vec![AtomicBool::new(false)]),
            ptt: Box::new(NullPtt),
            sink: |chan: usize, audio: &[i16]| keyups.push((chan, audio.len())),
        };
        tx.run();
        drop(tx);
        assert_eq!(keyups.len(), 1);
        assert_eq!(keyups[0].0, 0);
        assert!(keyups[0].1 > 10_000);
    }
}
