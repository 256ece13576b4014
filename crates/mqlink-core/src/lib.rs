//! mqlink-core - MQTT control packet codec.
//!
//! Frames and parses the MQTT 3.1.1 and 5.0 control packets a client
//! session exchanges with a broker. The session engine in `mqlink-client`
//! only reaches this crate through its `PacketCodec` seam.

pub mod error;
pub mod packet;
pub mod varint;

pub use error::{ProtocolError, Result};
pub use packet::*;
