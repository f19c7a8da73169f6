use bytes::Buf;

use crate::pipeline::RawFrame;

use super::FrameError;

/// `u32` millis followed by `qx, qy, qz, qw` as `f32`, little endian
pub const PACKET_LEN: usize = 20;

pub fn parse_packet(mut buf: &[u8]) -> Result<RawFrame, FrameError> {
    if buf.len() != PACKET_LEN {
        return Err(FrameError::PacketLength {
            expected: PACKET_LEN,
            got: buf.len(),
        });
    }

    let ms = buf.get_u32_le();
    let qx = buf.get_f32_le();
    let qy = buf.get_f32_le();
    let qz = buf.get_f32_le();
    let qw = buf.get_f32_le();

    Ok(RawFrame::new(
        ms as u64,
        qx as f64,
        qy as f64,
        qz as f64,
        qw as f64,
    ))
}
