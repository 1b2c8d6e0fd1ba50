//! Software TNC engine: the receive path from raw audio samples through
//! AFSK or scrambled-baseband demodulation, HDLC framing, bit-error
//! recovery, and the APRS digipeater; plus the transmit queueing and
//! p-persistence channel access that gate outgoing frames.

pub mod audio;
pub mod config;
pub mod dedupe;
pub mod demod;
pub mod digipeater;
pub mod fixbits;
pub mod hdlc;
pub mod modem;
pub mod pipeline;
pub mod rrbb;
pub mod transmit;
pub mod txqueue;

pub use config::ModemConfig;
pub use pipeline::{DecodedFrame, RxConfig, RxPipeline};
