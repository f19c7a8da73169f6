mod engine;
mod events;
mod phase;
mod timer;

pub use engine::{CalibrationEngine, CalibrationState, SwingDurations, duration_from_secs};
pub use events::CalibrationEvent;
pub use phase::{Phase, PhaseChange, PhaseInput, PhaseMachine, RunId};
pub use timer::{PhaseTimer, ThreadTimer};

use thiserror::Error;

use crate::math::MathError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration phase '{active}' is already running")]
    PhaseConflict { active: Phase },

    #[error("Calibration run was cancelled or superseded")]
    StalePhase,

    #[error("No calibration phase is active")]
    NotActive,

    #[error("Input '{input}' is not valid in phase '{phase}'")]
    InvalidTransition { phase: Phase, input: &'static str },

    #[error("Invalid calibration window duration: {0} s")]
    InvalidDuration(f64),

    #[error("Invalid swing axis: {0}")]
    InvalidAxis(#[from] MathError),

    #[error("Could not start calibration task: {0}")]
    Spawn(String),
}
