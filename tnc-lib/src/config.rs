//! Per-channel modem configuration.

/// Demodulator profile letter with optional `+` slicer expansion.
///
/// Each letter selects a set of subchannels (frequency-offset variants of
/// the configured tone pair) and the band-pass prefilter length:
///
/// | letter | offsets (Hz)    | prefilter (symbols) |
/// |--------|-----------------|---------------------|
/// | A      | 0               | 1.0                 |
/// | B      | 0               | 2.0                 |
/// | C      | -75, +75        | 1.0                 |
/// | D      | -75, +75        | 2.0                 |
/// | E      | -75, 0, +75     | 1.0                 |
/// | F      | -150, 0, +150   | 2.0                 |
///
/// The `+` variant runs three slicers per subchannel instead of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub letter: char,
    pub plus: bool,
}

impl Profile {
    pub fn parse(text: &str) -> Option<Vec<Profile>> {
        let mut out = Vec::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            let letter = c.to_ascii_uppercase();
            if !('A'..='F').contains(&letter) {
                return None;
            }
            let plus = chars.peek() == Some(&'+');
            if plus {
                chars.next();
            }
            out.push(Profile { letter, plus });
        }
        if out.is_empty() { None } else { Some(out) }
    }

    fn offsets(&self) -> &'static [i32] {
        match self.letter {
            'A' | 'B' => &[0],
            'C' | 'D' => &[-75, 75],
            'E' => &[-75, 0, 75],
            _ => &[-150, 0, 150],
        }
    }

    fn filter_symbols(&self) -> f32 {
        match self.letter {
            'A' | 'C' | 'E' => 1.0,
            _ => 2.0,
        }
    }

    fn num_slicers(&self) -> usize {
        if self.plus { 3 } else { 1 }
    }
}

/// One subchannel to instantiate: a tone-pair offset, prefilter length,
/// and slicer count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubchanSpec {
    pub freq_offset: i32,
    pub filter_symbols: f32,
    pub num_slicers: usize,
}

/// Modem parameters for one audio channel.
#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub sample_rate: u32,
    pub baud: u32,
    /// Mark/space tone pair; unused when `scrambled`.
    pub mark_freq: u32,
    pub space_freq: u32,
    /// Scrambled baseband (no tone pair), the 9600 bd mode.
    pub scrambled: bool,
    pub profiles: Vec<Profile>,
    /// Process every Nth sample, 1..=8.
    pub decimate: u32,
}

impl ModemConfig {
    /// Standard settings for a baud rate: 300 uses 1600/1800 AFSK, 1200
    /// uses 1200/2200 AFSK, 9600 uses scrambled baseband. Other rates get
    /// the 1200/2200 pair and are otherwise the caller's problem.
    pub fn for_baud(baud: u32, sample_rate: u32) -> ModemConfig {
        let (mark, space, scrambled) = match baud {
            300 => (1600, 1800, false),
            9600 => (0, 0, true),
            _ => (1200, 2200, false),
        };
        ModemConfig {
            sample_rate,
            baud,
            mark_freq: mark,
            space_freq: space,
            scrambled,
            profiles: vec![Profile { letter: 'A', plus: false }],
            decimate: 1,
        }
    }

    /// Expand the profile letters into concrete subchannel specs.
    /// Scrambled baseband has no tone variants: always one subchannel,
    /// keeping the slicer count of the first profile.
    pub fn subchannels(&self) -> Vec<SubchanSpec> {
        if self.scrambled {
            let slicers = self.profiles.first().map(|p| p.num_slicers()).unwrap_or(1);
            return vec![SubchanSpec {
                freq_offset: 0,
                filter_symbols: 1.0,
                num_slicers: slicers,
            }];
        }
        let mut out = Vec::new();
        for p in &self.profiles {
            for &off in p.offsets() {
                out.push(SubchanSpec {
                    freq_offset: off,
                    filter_symbols: p.filter_symbols(),
                    num_slicers: p.num_slicers(),
                });
            }
        }
        out
    }

    /// Effective sample rate after decimation.
    pub fn effective_rate(&self) -> u32 {
        self.sample_rate / self.decimate.clamp(1, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        let p = Profile::parse("AC+").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p[0], Profile { letter: 'A', plus: false });
        assert_eq!(p[1], Profile { letter: 'C', plus: true });
        assert!(Profile::parse("G").is_none());
        assert!(Profile::parse("").is_none());
    }

    #[test]
    fn test_baud_presets() {
        let c = ModemConfig::for_baud(300, 44100);
        assert_eq!((c.mark_freq, c.space_freq), (1600, 1800));
        let c = ModemConfig::for_baud(1200, 44100);
        assert_eq!((c.mark_freq, c.space_freq), (1200, 2200));
        let c = ModemConfig::for_baud(9600, 96000);
        assert!(c.scrambled);
    }

    #[test]
    fn test_subchannel_expansion() {
        let mut c = ModemConfig::for_baud(1200, 44100);
        c.profiles = Profile::parse("E+").unwrap();
        let subs = c.subchannels();
        assert_eq!(subs.len(), 3);
        assert!(subs.iter().all(|s| s.num_slicers == 3));
        assert_eq!(subs[1].freq_offset, 0);
    }

    #[test]
    fn test_decimate_clamped() {
        let mut c = ModemConfig::for_baud(1200, 44100);
        c.decimate = 3;
        assert_eq!(c.effective_rate(), 14700);
        c.decimate = 99;
        assert_eq!(c.effective_rate(), 44100 / 8);
    }
}
