use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use std::time::Duration;

use crate::{
    calibration::{CalibrationEngine, CalibrationError, SwingDurations, duration_from_secs},
    parameters::CalibrationParams,
};

/// Calibration triggers sent by a front end, one JSON object per line.
/// Durations are in seconds; missing ones come from the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Swing {
        duration: Option<f64>,
        baseline: Option<f64>,
        offset: Option<f64>,
    },
    Confirm {
        duration: Option<f64>,
    },
    Null {
        duration: Option<f64>,
    },
    Roll {
        deg: f64,
    },
    Axis {
        axis: [f64; 3],
    },
    Reset,
    Cancel,
}

impl Command {
    pub fn execute(
        &self,
        engine: &CalibrationEngine,
        params: &CalibrationParams,
    ) -> Result<(), CalibrationError> {
        match self {
            Command::Swing {
                duration,
                baseline,
                offset,
            } => {
                let defaults = params.swing_durations()?;
                engine.start_swing(SwingDurations {
                    swing: secs_or(*duration, defaults.swing)?,
                    baseline: secs_or(*baseline, defaults.baseline)?,
                    offset: secs_or(*offset, defaults.offset)?,
                })
            }
            Command::Confirm { duration } => {
                let duration = duration.map(duration_from_secs).transpose()?;
                engine.confirm_baseline(duration)
            }
            Command::Null { duration } => {
                engine.start_nullpoint(secs_or(*duration, params.null()?)?)
            }
            Command::Roll { deg } => engine.set_manual_roll(deg.to_radians()),
            Command::Axis { axis } => engine.set_manual_axis(&Vector3::from(*axis)),
            Command::Reset => {
                engine.reset();
                Ok(())
            }
            Command::Cancel => {
                if engine.cancel() {
                    Ok(())
                } else {
                    Err(CalibrationError::NotActive)
                }
            }
        }
    }
}

fn secs_or(secs: Option<f64>, default: Duration) -> Result<Duration, CalibrationError> {
    secs.map_or(Ok(default), duration_from_secs)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{calibration::Phase, telemetry::sink, utils::capacity::Capacity};

    #[test]
    fn test_deserialize() {
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type": "swing", "duration": 5.0}"#).unwrap(),
            Command::Swing {
                duration: Some(5.0),
                baseline: None,
                offset: None
            }
        );
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type": "axis", "axis": [0, 1, 0]}"#).unwrap(),
            Command::Axis {
                axis: [0.0, 1.0, 0.0]
            }
        );
        assert_eq!(
            serde_json::from_str::<Command>(r#"{"type": "reset"}"#).unwrap(),
            Command::Reset
        );
        assert!(serde_json::from_str::<Command>(r#"{"type": "explode"}"#).is_err());
    }

    #[test]
    fn test_execute() {
        let (sink, _stream) = sink(Capacity::Unbounded);
        let engine = CalibrationEngine::new(sink);
        let params = CalibrationParams::default();

        Command::Roll { deg: 90.0 }.execute(&engine, &params).unwrap();
        assert_relative_eq!(
            engine.state().roll_offset_rad,
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );

        assert_eq!(
            Command::Cancel.execute(&engine, &params),
            Err(CalibrationError::NotActive)
        );

        Command::Null {
            duration: Some(60.0),
        }
        .execute(&engine, &params)
        .unwrap();
        assert_eq!(engine.phase(), Phase::CollectingNull);

        assert_eq!(
            Command::Axis {
                axis: [0.0, 0.0, 1.0]
            }
            .execute(&engine, &params),
            Err(CalibrationError::PhaseConflict {
                active: Phase::CollectingNull
            })
        );

        Command::Cancel.execute(&engine, &params).unwrap();
        Command::Reset.execute(&engine, &params).unwrap();
        assert_eq!(engine.state().roll_offset_rad, 0.0);

        assert_eq!(
            Command::Swing {
                duration: None,
                baseline: Some(-2.0),
                offset: None
            }
            .execute(&engine, &params),
            Err(CalibrationError::InvalidDuration(-2.0))
        );

        assert_eq!(
            Command::Confirm {
                duration: Some(-1.0)
            }
            .execute(&engine, &params),
            Err(CalibrationError::InvalidDuration(-1.0))
        );

        engine.shutdown();
    }
}
