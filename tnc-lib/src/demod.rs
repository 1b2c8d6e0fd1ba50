//! Sample-level demodulators: AFSK tone correlation and scrambled
//! baseband slicing, each with a digital PLL for bit timing.
//!
//! One demodulator serves one subchannel; its slicers each run an
//! independent PLL and HDLC framer over the shared detector output.

use ax25::packet::AudioLevel;

use crate::config::{ModemConfig, SubchanSpec};
use crate::hdlc::HdlcFramer;
use crate::rrbb::Rrbb;

/// How hard a bit transition drags the clock phase back toward the
/// transition point. Searching pulls harder than tracking.
const PLL_LOCKED_INERTIA: f64 = 0.74;
const PLL_SEARCHING_INERTIA: f64 = 0.50;

/// Digital PLL over a wrapping 32-bit counter. The counter advances a
/// fixed step per sample; overflow from positive to negative marks the
/// symbol centre. Transitions in the sliced data nudge the counter toward
/// zero, pulling the sampling point half a symbol away from the edges.
struct Pll {
    step: i32,
    counter: i32,
    prev_bit: bool,
}

impl Pll {
    fn new(sample_rate: u32, baud: u32) -> Pll {
        let step = (4294967296.0 * baud as f64 / sample_rate as f64) as i64 as i32;
        Pll {
            step,
            counter: 0,
            prev_bit: false,
        }
    }

    /// Advance one sample. Returns the bit to clock into the framer when
    /// this sample sits on a symbol centre.
    fn advance(&mut self, bit: bool, locked: bool) -> Option<bool> {
        let prev = self.counter;
        self.counter = prev.wrapping_add(self.step);
        let out = (prev > 0 && self.counter < 0).then_some(bit);
        if bit != self.prev_bit {
            let inertia = if locked {
                PLL_LOCKED_INERTIA
            } else {
                PLL_SEARCHING_INERTIA
            };
            self.counter = (self.counter as f64 * inertia) as i32;
            self.prev_bit = bit;
        }
        out
    }
}

/// One threshold variant: a bias on the detector output, with its own
/// clock recovery and framer.
struct Slicer {
    bias: f32,
    pll: Pll,
    framer: HdlcFramer,
}

impl Slicer {
    fn process(&mut self, value: f32, out: &mut Vec<Rrbb>) {
        let bit = value > self.bias;
        let locked = self.framer.dcd();
        if let Some(sampled) = self.pll.advance(bit, locked)
            && let Some(rrbb) = self.framer.process_bit(sampled)
        {
            out.push(rrbb);
        }
    }
}

fn make_slicers(
    chan: usize,
    subchan: usize,
    count: usize,
    sample_rate: u32,
    baud: u32,
    scrambled: bool,
) -> Vec<Slicer> {
    (0..count)
        .map(|j| Slicer {
            // Symmetric biases around zero: j=1 of 3 is unbiased.
            bias: (j as f32 - (count as f32 - 1.0) / 2.0) * 0.2,
            pll: Pll::new(sample_rate, baud),
            framer: HdlcFramer::new(chan, subchan, j, scrambled),
        })
        .collect()
}

/// Direct-form FIR over a sample ring.
struct Fir {
    taps: Vec<f32>,
    ring: Vec<f32>,
    pos: usize,
}

impl Fir {
    /// Windowed-sinc band-pass, Hamming window, unity passband gain.
    fn band_pass(sample_rate: f32, f1: f32, f2: f32, len: usize) -> Fir {
        let len = len | 1; // odd length, symmetric delay
        let mid = (len / 2) as f32;
        let taps = (0..len)
            .map(|i| {
                let n = i as f32 - mid;
                let lp2 = 2.0 * f2 / sample_rate * sinc(2.0 * f2 * n / sample_rate);
                let lp1 = 2.0 * f1 / sample_rate * sinc(2.0 * f1 * n / sample_rate);
                let w = 0.54 - 0.46 * (std::f32::consts::TAU * i as f32 / (len - 1) as f32).cos();
                (lp2 - lp1) * w
            })
            .collect::<Vec<_>>();
        Fir {
            ring: vec![0.0; taps.len()],
            taps,
            pos: 0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.ring[self.pos] = x;
        self.pos = (self.pos + 1) % self.ring.len();
        let mut acc = 0.0;
        let (newer, older) = self.ring.split_at(self.pos);
        for (&s, &t) in older.iter().chain(newer).zip(&self.taps) {
            acc += s * t;
        }
        acc
    }
}

fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        let px = std::f32::consts::PI * x;
        px.sin() / px
    }
}

/// Moving-average matched filter for NRZ baseband: one symbol of
/// integration, O(1) per sample.
struct Boxcar {
    ring: Vec<f32>,
    sum: f32,
    pos: usize,
}

impl Boxcar {
    fn new(len: usize) -> Boxcar {
        Boxcar {
            ring: vec![0.0; len.max(1)],
            sum: 0.0,
            pos: 0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        self.sum += x - self.ring[self.pos];
        self.ring[self.pos] = x;
        self.pos += 1;
        if self.pos == self.ring.len() {
            self.pos = 0;
            self.sum = self.ring.iter().sum();
        }
        self.sum / self.ring.len() as f32
    }
}

/// Sliding-window quadrature correlator for one tone.
struct ToneCorr {
    phase: f32,
    step: f32,
    ring_i: Vec<f32>,
    ring_q: Vec<f32>,
    sum_i: f32,
    sum_q: f32,
    pos: usize,
}

impl ToneCorr {
    fn new(freq: f32, sample_rate: f32, window: usize) -> ToneCorr {
        ToneCorr {
            phase: 0.0,
            step: std::f32::consts::TAU * freq / sample_rate,
            ring_i: vec![0.0; window],
            ring_q: vec![0.0; window],
            sum_i: 0.0,
            sum_q: 0.0,
            pos: 0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let (s, c) = self.phase.sin_cos();
        self.phase = (self.phase + self.step) % std::f32::consts::TAU;

        let i = x * c;
        let q = x * s;
        self.sum_i += i - self.ring_i[self.pos];
        self.sum_q += q - self.ring_q[self.pos];
        self.ring_i[self.pos] = i;
        self.ring_q[self.pos] = q;
        self.pos += 1;
        if self.pos == self.ring_i.len() {
            self.pos = 0;
            // Re-add the window from scratch now and then so rounding
            // error cannot accumulate without bound.
            self.sum_i = self.ring_i.iter().sum();
            self.sum_q = self.ring_q.iter().sum();
        }
        (self.sum_i * self.sum_i + self.sum_q * self.sum_q).sqrt()
    }
}

/// AFSK demodulator: band-pass prefilter, mark/space correlators,
/// normalised difference decision, one or more slicers.
pub struct AfskDemod {
    prefilter: Fir,
    mark: ToneCorr,
    space: ToneCorr,
    slicers: Vec<Slicer>,
    half_window: f32,
    peak: f32,
    mark_peak: f32,
    space_peak: f32,
}

impl AfskDemod {
    pub fn new(chan: usize, subchan: usize, spec: &SubchanSpec, cfg: &ModemConfig) -> AfskDemod {
        let rate = cfg.effective_rate();
        // The correlators always integrate one symbol; a longer window
        // would smear adjacent bits together.
        let window = (rate as f32 / cfg.baud as f32).round().max(4.0) as usize;
        let mark_freq = (cfg.mark_freq as i32 + spec.freq_offset) as f32;
        let space_freq = (cfg.space_freq as i32 + spec.freq_offset) as f32;

        // Keep both tones plus one baud of sidebands. The profile's filter
        // factor sets the prefilter length: narrow profiles get sharper
        // skirts at the cost of slower settling.
        let lo = (mark_freq.min(space_freq) - cfg.baud as f32).max(50.0);
        let hi = (space_freq.max(mark_freq) + cfg.baud as f32).min(rate as f32 * 0.45);
        let prefilter_len = ((window as f32) * spec.filter_symbols).round() as usize;
        let prefilter = Fir::band_pass(rate as f32, lo, hi, prefilter_len);

        AfskDemod {
            prefilter,
            mark: ToneCorr::new(mark_freq, rate as f32, window),
            space: ToneCorr::new(space_freq, rate as f32, window),
            slicers: make_slicers(chan, subchan, spec.num_slicers, rate, cfg.baud, false),
            half_window: window as f32 / 2.0,
            peak: 0.0,
            mark_peak: 0.0,
            space_peak: 0.0,
        }
    }

    /// Process one sample in the -1.0..1.0 range.
    pub fn process_sample(&mut self, x: f32, out: &mut Vec<Rrbb>) {
        let x = self.prefilter.process(x);
        let m = self.mark.process(x);
        let s = self.space.process(x);

        self.peak = (self.peak * 0.9999).max(x.abs());
        self.mark_peak = (self.mark_peak * 0.9999).max(m / self.half_window);
        self.space_peak = (self.space_peak * 0.9999).max(s / self.half_window);

        let value = (m - s) / (m + s).max(1e-6);
        let before = out.len();
        for sl in &mut self.slicers {
            sl.process(value, out);
        }
        for rrbb in &mut out[before..] {
            rrbb.set_alevel(self.alevel());
        }
    }

    pub fn dcd(&self) -> bool {
        self.slicers.iter().any(|s| s.framer.dcd())
    }

    pub fn alevel(&self) -> AudioLevel {
        AudioLevel::new(
            level_percent(self.peak),
            level_percent(self.mark_peak),
            level_percent(self.space_peak),
        )
    }
}

/// Scrambled baseband demodulator (9600 bd): one symbol of matched
/// filtering, then slice against a running peak. No tone detection.
pub struct BasebandDemod {
    matched: Boxcar,
    slicers: Vec<Slicer>,
    peak: f32,
}

impl BasebandDemod {
    pub fn new(chan: usize, subchan: usize, spec: &SubchanSpec, cfg: &ModemConfig) -> BasebandDemod {
        let rate = cfg.effective_rate();
        let samples_per_bit = (rate as f32 / cfg.baud as f32).round().max(1.0) as usize;
        BasebandDemod {
            matched: Boxcar::new(samples_per_bit),
            slicers: make_slicers(chan, subchan, spec.num_slicers, rate, cfg.baud, true),
            peak: 0.0,
        }
    }

    pub fn process_sample(&mut self, x: f32, out: &mut Vec<Rrbb>) {
        let x = self.matched.process(x);
        self.peak = (self.peak * 0.9999).max(x.abs());
        let value = x / self.peak.max(1e-6);
        let before = out.len();
        for sl in &mut self.slicers {
            sl.process(value, out);
        }
        for rrbb in &mut out[before..] {
            rrbb.set_alevel(self.alevel());
        }
    }

    pub fn dcd(&self) -> bool {
        self.slicers.iter().any(|s| s.framer.dcd())
    }

    pub fn alevel(&self) -> AudioLevel {
        AudioLevel::baseband(level_percent(self.peak))
    }
}

fn level_percent(v: f32) -> i32 {
    (v * 100.0).round().clamp(0.0, 100.0) as i32
}

/// Either flavour, so a channel can hold a uniform subchannel list.
pub enum Demodulator {
    Afsk(AfskDemod),
    Baseband(BasebandDemod),
}

impl Demodulator {
    pub fn new(chan: usize, subchan: usize, spec: &SubchanSpec, cfg: &ModemConfig) -> Demodulator {
        if cfg.scrambled {
            Demodulator::Baseband(BasebandDemod::new(chan, subchan, spec, cfg))
        } else {
            Demodulator::Afsk(AfskDemod::new(chan, subchan, spec, cfg))
        }
    }

    pub fn process_sample(&mut self, x: f32, out: &mut Vec<Rrbb>) {
        match self {
            Demodulator::Afsk(d) => d.process_sample(x, out),
            Demodulator::Baseband(d) => d.process_sample(x, out),
        }
    }

    pub fn dcd(&self) -> bool {
        match self {
            Demodulator::Afsk(d) => d.dcd(),
            Demodulator::Baseband(d) => d.dcd(),
        }
    }

    pub fn alevel(&self) -> AudioLevel {
        match self {
            Demodulator::Afsk(d) => d.alevel(),
            Demodulator::Baseband(d) => d.alevel(),
        }
    }
}
