//! WAV audio input and output.
//!
//! The reader walks `RIFF/WAVE` chunks from any byte stream (a file or
//! standard input), accepting 8- or 16-bit PCM, mono or stereo, at any
//! sane sample rate. Unknown chunks (`LIST` and friends) are skipped.

use std::io::{Read, Seek, SeekFrom, Write};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a RIFF/WAVE stream: bad {chunk} header")]
    BadHeader { chunk: &'static str },

    #[error("no 'fmt ' chunk before 'data'")]
    MissingFormat,

    #[error("unsupported WAV format: {reason}")]
    Unsupported { reason: String },
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Sample stream format, shared by the reader and writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Streaming WAV reader. Samples are normalised to signed 16-bit range
/// regardless of the stored width.
pub struct WavReader<R: Read> {
    inner: R,
    format: SampleFormat,
    /// Payload bytes left in the data chunk.
    remaining: u64,
}

impl<R: Read> WavReader<R> {
    pub fn open(mut inner: R) -> Result<WavReader<R>> {
        let mut riff = [0u8; 12];
        inner.read_exact(&mut riff)?;
        if &riff[0..4] != b"RIFF" {
            return Err(AudioError::BadHeader { chunk: "RIFF" });
        }
        if &riff[8..12] != b"WAVE" {
            return Err(AudioError::BadHeader { chunk: "WAVE" });
        }

        let mut format: Option<SampleFormat> = None;
        loop {
            let mut head = [0u8; 8];
            inner.read_exact(&mut head)?;
            let id = [head[0], head[1], head[2], head[3]];
            let size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as u64;

            match &id {
                b"fmt " => {
                    if size < 16 {
                        return Err(AudioError::BadHeader { chunk: "fmt " });
                    }
                    let mut fmt = [0u8; 16];
                    inner.read_exact(&mut fmt)?;
                    skip(&mut inner, size - 16)?;

                    let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
                    let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                    let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                    let bits = u16::from_le_bytes([fmt[14], fmt[15]]);

                    if audio_format != 1 {
                        return Err(AudioError::Unsupported {
                            reason: format!("compression type {audio_format} (want PCM)"),
                        });
                    }
                    if !(1..=2).contains(&channels) {
                        return Err(AudioError::Unsupported {
                            reason: format!("{channels} channels"),
                        });
                    }
                    if bits != 8 && bits != 16 {
                        return Err(AudioError::Unsupported {
                            reason: format!("{bits} bits per sample"),
                        });
                    }
                    if !(8_000..=192_000).contains(&sample_rate) {
                        return Err(AudioError::Unsupported {
                            reason: format!("{sample_rate} Hz sample rate"),
                        });
                    }
                    format = Some(SampleFormat {
                        sample_rate,
                        channels,
                        bits_per_sample: bits,
                    });
                }
                b"data" => {
                    let format = format.ok_or(AudioError::MissingFormat)?;
                    return Ok(WavReader {
                        inner,
                        format,
                        remaining: size,
                    });
                }
                // LIST, fact, cue, whatever: skip (chunks are word-aligned).
                _ => skip(&mut inner, size + (size & 1))?,
            }
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Read one sample frame, scaled to i16 range. Mono input repeats the
    /// single value in both slots so callers can index either channel.
    /// Returns None at end of stream.
    pub fn read_frame(&mut self) -> Option<[i16; 2]> {
        let left = self.read_sample()?;
        let right = if self.format.channels == 2 {
            self.read_sample()?
        } else {
            left
        };
        Some([left, right])
    }

    fn read_sample(&mut self) -> Option<i16> {
        match self.format.bits_per_sample {
            8 => {
                let b = self.read_byte()?;
                Some(((b as i16) - 128) << 8)
            }
            _ => {
                let lo = self.read_byte()?;
                let hi = self.read_byte()?;
                Some(i16::from_le_bytes([lo, hi]))
            }
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let mut b = [0u8; 1];
        match self.inner.read_exact(&mut b) {
            Ok(()) => {
                self.remaining -= 1;
                Some(b[0])
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}

fn skip<R: Read>(inner: &mut R, mut n: u64) -> Result<()> {
    let mut buf = [0u8; 512];
    while n > 0 {
        let chunk = n.min(buf.len() as u64) as usize;
        inner.read_exact(&mut buf[..chunk])?;
        n -= chunk as u64;
    }
    Ok(())
}

/// WAV writer; sizes are back-patched on [`WavWriter::finish`].
pub struct WavWriter<W: Write + Seek> {
    inner: W,
    format: SampleFormat,
    data_bytes: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn create(mut inner: W, format: SampleFormat) -> Result<WavWriter<W>> {
        let block_align = format.channels * format.bits_per_sample / 8;
        let byte_rate = format.sample_rate * block_align as u32;

        inner.write_all(b"RIFF")?;
        inner.write_all(&0u32.to_le_bytes())?; // patched in finish()
        inner.write_all(b"WAVE")?;
        inner.write_all(b"fmt ")?;
        inner.write_all(&16u32.to_le_bytes())?;
        inner.write_all(&1u16.to_le_bytes())?; // PCM
        inner.write_all(&format.channels.to_le_bytes())?;
        inner.write_all(&format.sample_rate.to_le_bytes())?;
        inner.write_all(&byte_rate.to_le_bytes())?;
        inner.write_all(&block_align.to_le_bytes())?;
        inner.write_all(&format.bits_per_sample.to_le_bytes())?;
        inner.write_all(b"data")?;
        inner.write_all(&0u32.to_le_bytes())?; // patched in finish()

        Ok(WavWriter {
            inner,
            format,
            data_bytes: 0,
        })
    }

    /// Write one value; for stereo output call once per channel.
    pub fn write_sample(&mut self, value: i16) -> Result<()> {
        match self.format.bits_per_sample {
            8 => {
                self.inner.write_all(&[((value >> 8) + 128) as u8])?;
                self.data_bytes += 1;
            }
            _ => {
                self.inner.write_all(&value.to_le_bytes())?;
                self.data_bytes += 2;
            }
        }
        Ok(())
    }

    /// Patch the RIFF and data sizes and flush.
    pub fn finish(mut self) -> Result<()> {
        let riff_size = 36 + self.data_bytes;
        self.inner.seek(SeekFrom::Start(4))?;
        self.inner.write_all(&riff_size.to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(40))?;
        self.inner.write_all(&self.data_bytes.to_le_bytes())?;
        self.inner.flush()?;
        Ok(())
    }
}
