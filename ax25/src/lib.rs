//! AX.25 frame model and codecs: the wire-format packet with its address
//! manipulation operations, TNC-2 monitor text, the HDLC frame check
//! sequence, control-field classification, and the XID parameter
//! negotiation payload.

pub mod address;
pub mod error;
pub mod fcs;
pub mod frametype;
pub mod monitor;
pub mod packet;
pub mod xid;

pub use error::{Ax25Error, Result};
pub use frametype::{FrameType, Modulo};
pub use packet::{AudioLevel, Packet};
