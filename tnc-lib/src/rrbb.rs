//! Raw received bit buffer: the de-stuffed bit sequence captured between
//! two HDLC flags, annotated with where it came from and the descrambler
//! state at frame start so a retry pass can replay the decode.

use ax25::packet::{AudioLevel, MAX_PACKET_LEN};

/// Largest frame plus FCS, in bits.
pub const MAX_FRAME_BITS: usize = (MAX_PACKET_LEN + 2) * 8;

#[derive(Debug, Clone)]
pub struct Rrbb {
    bits: Vec<u8>,
    len: usize,
    chan: usize,
    subchan: usize,
    slice: usize,
    alevel: AudioLevel,
    is_scrambled: bool,
    /// 17-bit descrambler shift register content at frame start.
    descram_state: u32,
    /// Previous descrambled bit at frame start (NRZI reference).
    prev_descram: bool,
    /// Channel sample counter at the closing flag; used by the
    /// cross-subchannel voter's time window.
    sample_clock: u64,
}

impl Rrbb {
    pub fn new(
        chan: usize,
        subchan: usize,
        slice: usize,
        is_scrambled: bool,
        descram_state: u32,
        prev_descram: bool,
    ) -> Rrbb {
        Rrbb {
            bits: Vec::with_capacity(MAX_FRAME_BITS / 8),
            len: 0,
            chan,
            subchan,
            slice,
            alevel: AudioLevel::baseband(0),
            is_scrambled,
            descram_state,
            prev_descram,
            sample_clock: 0,
        }
    }

    /// Append one bit; silently full beyond [`MAX_FRAME_BITS`].
    pub fn append_bit(&mut self, v: bool) {
        if self.len >= MAX_FRAME_BITS {
            return;
        }
        let byte = self.len / 8;
        if byte == self.bits.len() {
            self.bits.push(0);
        }
        if v {
            self.bits[byte] |= 1 << (self.len % 8);
        }
        self.len += 1;
    }

    pub fn get_len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len >= MAX_FRAME_BITS
    }

    pub fn get_bit(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn flip_bit(&mut self, i: usize) {
        debug_assert!(i < self.len);
        self.bits[i / 8] ^= 1 << (i % 8);
    }

    /// Remove the trailing flag byte.
    pub fn chop8(&mut self) {
        self.truncate(self.len.saturating_sub(8));
    }

    pub fn truncate(&mut self, new_len: usize) {
        if new_len < self.len {
            self.len = new_len;
            self.bits.truncate(new_len.div_ceil(8));
            if new_len % 8 != 0 {
                if let Some(last) = self.bits.last_mut() {
                    *last &= (1 << (new_len % 8)) - 1;
                }
            }
        }
    }

    /// The frame bytes (HDLC sends each byte least-significant bit first,
    /// which is the order bits were appended in). Only whole bytes are
    /// returned; a trailing partial byte is dropped.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits[..self.len / 8].to_vec()
    }

    pub fn chan(&self) -> usize {
        self.chan
    }

    pub fn subchan(&self) -> usize {
        self.subchan
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn alevel(&self) -> AudioLevel {
        self.alevel
    }

    pub fn set_alevel(&mut self, alevel: AudioLevel) {
        self.alevel = alevel;
    }

    pub fn is_scrambled(&self) -> bool {
        self.is_scrambled
    }

    pub fn descram_state(&self) -> u32 {
        self.descram_state
    }

    pub fn prev_descram(&self) -> bool {
        self.prev_descram
    }

    pub fn sample_clock(&self) -> u64 {
        self.sample_clock
    }

    pub fn set_sample_clock(&mut self, clock: u64) {
        self.sample_clock = clock;
    }
}
