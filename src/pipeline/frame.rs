use nalgebra::{Quaternion, UnitQuaternion};
use serde::Serialize;

use crate::telemetry::QuatRecord;

/// Below this norm a raw quaternion carries no orientation
const MIN_QUAT_NORM: f64 = 1e-9;

/// One decoded sensor frame, as produced by the transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFrame {
    pub timestamp_ms: u64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl RawFrame {
    pub fn new(timestamp_ms: u64, qx: f64, qy: f64, qz: f64, qw: f64) -> Self {
        Self {
            timestamp_ms,
            qx,
            qy,
            qz,
            qw,
        }
    }

    /// Normalized orientation, `None` for a (near) zero quaternion
    pub fn orientation(&self) -> Option<UnitQuaternion<f64>> {
        UnitQuaternion::try_new(
            Quaternion::new(self.qw, self.qx, self.qy, self.qz),
            MIN_QUAT_NORM,
        )
    }

    pub fn secs(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFrame {
    pub secs: f64,
    pub packet_rate_hz: f64,
    pub sample_rate_hz: f64,

    pub raw_quaternion: QuatRecord,
    pub raw_rotation_matrix: [[f64; 3]; 3],

    pub calibrated_quaternion: QuatRecord,
    pub calibrated_rotation_matrix: [[f64; 3]; 3],

    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}
