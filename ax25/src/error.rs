use thiserror::Error;

#[derive(Error, Debug)]
pub enum Ax25Error {
    #[error("frame too short: {got} bytes, minimum {min}")]
    FrameTooShort { got: usize, min: usize },

    #[error("frame too long: {got} bytes, maximum {max}")]
    FrameTooLong { got: usize, max: usize },

    #[error("bad address field at index {index}: {reason}")]
    BadAddress { index: usize, reason: String },

    #[error("bad callsign '{text}': {reason}")]
    BadCallsign { text: String, reason: String },

    #[error("malformed monitor text '{text}': {reason}")]
    BadMonitorText { text: String, reason: String },

    #[error("bad XID format indicator: expected 0x82, got 0x{got:02X}")]
    XidBadFormat { got: u8 },

    #[error("bad XID group indicator: expected 0x80, got 0x{got:02X}")]
    XidBadGroup { got: u8 },

    #[error("XID group length mismatch: header says {expected}, got {got} bytes")]
    XidBadLength { expected: usize, got: usize },

    #[error("truncated XID parameter (PI {pi}) at offset {offset}")]
    XidTruncated { pi: u8, offset: usize },

    #[error("bad XID parameter value (PI {pi}): {reason}")]
    XidBadValue { pi: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, Ax25Error>;
