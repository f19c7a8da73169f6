use std::fmt;

use nalgebra::UnitQuaternion;
use serde::{Serialize, Serializer};

use crate::{calibration::CalibrationEvent, pipeline::OutputFrame};

/// Everything the core hands to the front end, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Data(OutputFrame),
    Status { status: Status },
    Axis { dominant_axis: [f64; 3] },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Calibration(CalibrationEvent),
    /// Free-form text forwarded by a collaborator (connection state, rejected commands)
    Text(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Calibration(ev) => ev.fmt(f),
            Status::Text(text) => f.write_str(text),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<CalibrationEvent> for Message {
    fn from(ev: CalibrationEvent) -> Self {
        Message::Status {
            status: Status::Calibration(ev),
        }
    }
}

impl From<OutputFrame> for Message {
    fn from(frame: OutputFrame) -> Self {
        Message::Data(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuatRecord {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<&UnitQuaternion<f64>> for QuatRecord {
    fn from(q: &UnitQuaternion<f64>) -> Self {
        let v = q.imag();
        QuatRecord {
            w: q.scalar(),
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_status_json() {
        let msg: Message = CalibrationEvent::CountdownTick(3).into();

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "status", "status": "3 s verbleiben" })
        );

        let msg = Message::Status {
            status: Status::Text("Verbunden: Nicla".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "status", "status": "Verbunden: Nicla" })
        );
    }

    #[test]
    fn test_axis_json() {
        let msg = Message::Axis {
            dominant_axis: [0.0, 1.0, 0.0],
        };

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "axis", "dominant_axis": [0.0, 1.0, 0.0] })
        );
    }

    #[test]
    fn test_quat_record() {
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::PI);
        let rec = QuatRecord::from(&q);

        assert!(rec.w.abs() < 1e-12);
        assert!((rec.z.abs() - 1.0).abs() < 1e-12);
    }
}
