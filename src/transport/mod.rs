//! Decoding of the two frame encodings sent by the sensor: a comma separated
//! text line on the serial link and a fixed size binary packet over BLE.

mod line;
mod packet;

pub use line::parse_line;
pub use packet::{PACKET_LEN, parse_packet};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Field {index} is not a number: '{value}'")]
    BadField { index: usize, value: String },

    #[error("Expected a {expected} byte packet, got {got} bytes")]
    PacketLength { expected: usize, got: usize },
}
