use std::fmt;

use super::phase::Phase;

/// Progress notifications of a calibration run, in the order a front end
/// shows them to the person holding the bell.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    BaselineHoldRequested,
    BaselineDone,
    SwingRequested,
    /// Whole seconds left in the swing window
    CountdownTick(u32),
    PcaCompleted { axis: [f64; 3] },
    OffsetHoldRequested,
    SwingDone,
    NullHoldRequested,
    NullDone,
    Cancelled,

    /// A window closed without samples, the previous (or identity) value was kept
    InsufficientSamples { phase: Phase },
    /// Too few usable angular velocity vectors, the default axis was used
    DegeneratePca { usable: usize },
}

impl fmt::Display for CalibrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationEvent::BaselineHoldRequested => f.write_str("please_hold_baseline"),
            CalibrationEvent::BaselineDone => f.write_str("baseline_done"),
            CalibrationEvent::SwingRequested => f.write_str("please_swing"),
            CalibrationEvent::CountdownTick(n) => write!(f, "{n} s verbleiben"),
            CalibrationEvent::PcaCompleted { .. } => f.write_str("swing_pca_done"),
            CalibrationEvent::OffsetHoldRequested => f.write_str("please_hold_offset"),
            CalibrationEvent::SwingDone => f.write_str("swing_done"),
            CalibrationEvent::NullHoldRequested => f.write_str("please_hold_null"),
            CalibrationEvent::NullDone => f.write_str("null_done"),
            CalibrationEvent::Cancelled => f.write_str("calibration_cancelled"),
            CalibrationEvent::InsufficientSamples { phase } => {
                write!(f, "too_few_samples_{phase}")
            }
            CalibrationEvent::DegeneratePca { .. } => f.write_str("swing_axis_default"),
        }
    }
}
