use std::fmt;

use nalgebra::UnitQuaternion;
use serde::Serialize;
use statig::prelude::*;
use strum::{Display, IntoStaticStr};

use super::CalibrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    CollectingBaseline,
    CollectingSwing,
    CollectingOffset,
    CollectingNull,
    /// Window closed, result not yet committed. Samples are ignored and new
    /// triggers are rejected.
    Computing,
}

impl Phase {
    pub fn is_collecting(&self) -> bool {
        matches!(
            self,
            Phase::CollectingBaseline
                | Phase::CollectingSwing
                | Phase::CollectingOffset
                | Phase::CollectingNull
        )
    }
}

/// Identifies one calibration run. Every start or cancel produces a new id, so
/// a phase task holding an old id can tell it has been superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PhaseInput {
    Start(Phase),
    Sample(UnitQuaternion<f64>),
    WindowElapsed(RunId),
    Advance(RunId, Phase),
    Finish(RunId),
    Cancel,
}

impl PhaseInput {
    fn run(&self) -> Option<RunId> {
        match self {
            PhaseInput::WindowElapsed(run)
            | PhaseInput::Advance(run, _)
            | PhaseInput::Finish(run) => Some(*run),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseChange {
    Started(RunId),
    Collected(usize),
    Drained(Vec<UnitQuaternion<f64>>),
    Entered(Phase),
    Cancelled(Phase),
}

/// Phase state machine and sample buffer. Kept behind a single lock so that
/// closing a window and draining its buffer happen atomically with respect to
/// `collect`.
pub struct PhaseMachine {
    fsm: StateMachine<PhaseFsm>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self {
            fsm: PhaseFsm::default().state_machine(),
        }
    }
}

impl fmt::Debug for PhaseMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseMachine")
            .field("phase", &self.phase())
            .field("buffered", &self.fsm.buffer.len())
            .field("generation", &self.fsm.generation)
            .finish()
    }
}

impl PhaseMachine {
    pub fn phase(&self) -> Phase {
        match self.fsm.state() {
            State::Idle {} => Phase::Idle,
            State::CollectingBaseline {} => Phase::CollectingBaseline,
            State::CollectingSwing {} => Phase::CollectingSwing,
            State::CollectingOffset {} => Phase::CollectingOffset,
            State::CollectingNull {} => Phase::CollectingNull,
            State::Computing {} => Phase::Computing,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.phase().is_collecting()
    }

    pub fn buffered(&self) -> usize {
        self.fsm.buffer.len()
    }

    pub fn is_current(&self, run: RunId) -> bool {
        run.0 == self.fsm.generation
    }

    pub fn collect(&mut self, q: UnitQuaternion<f64>) {
        // Ignored outside a collection window
        let _ = self.handle(PhaseInput::Sample(q));
    }

    pub fn handle(&mut self, input: PhaseInput) -> Result<PhaseChange, CalibrationError> {
        if input.run().is_some_and(|run| !self.is_current(run)) {
            return Err(CalibrationError::StalePhase);
        }

        let phase = self.phase();
        let mut context = PhaseContext {
            phase,
            outcome: None,
        };
        self.fsm.handle_with_context(&input, &mut context);

        context
            .outcome
            .unwrap_or_else(|| Err(CalibrationError::InvalidTransition {
                phase,
                input: input.into(),
            }))
    }
}

struct PhaseContext {
    /// Phase the input was dispatched in
    phase: Phase,
    outcome: Option<Result<PhaseChange, CalibrationError>>,
}

#[derive(Default)]
struct PhaseFsm {
    buffer: Vec<UnitQuaternion<f64>>,
    generation: u64,
}

impl PhaseFsm {
    fn start_run(&mut self) -> RunId {
        self.generation += 1;
        self.buffer.clear();
        RunId(self.generation)
    }
}

fn collecting_state(phase: Phase) -> Option<State> {
    match phase {
        Phase::CollectingBaseline => Some(State::collecting_baseline()),
        Phase::CollectingSwing => Some(State::collecting_swing()),
        Phase::CollectingOffset => Some(State::collecting_offset()),
        Phase::CollectingNull => Some(State::collecting_null()),
        Phase::Idle | Phase::Computing => None,
    }
}

// Inputs left unhandled by every state produce no outcome and are reported as
// invalid transitions by `PhaseMachine::handle`.
#[state_machine(
    initial = "State::idle()",
    state(derive(Debug)),
    superstate(derive(Debug))
)]
impl PhaseFsm {
    #[state]
    fn idle(&mut self, context: &mut PhaseContext, event: &PhaseInput) -> Response<State> {
        match event {
            PhaseInput::Start(next) => match collecting_state(*next) {
                Some(target) => {
                    let run = self.start_run();
                    context.outcome = Some(Ok(PhaseChange::Started(run)));
                    Transition(target)
                }
                None => Super,
            },
            PhaseInput::Cancel => {
                context.outcome = Some(Err(CalibrationError::NotActive));
                Handled
            }
            _ => Super,
        }
    }

    #[superstate]
    fn active(&mut self, context: &mut PhaseContext, event: &PhaseInput) -> Response<State> {
        match event {
            PhaseInput::Start(next) if next.is_collecting() => {
                context.outcome = Some(Err(CalibrationError::PhaseConflict {
                    active: context.phase,
                }));
                Handled
            }
            PhaseInput::Cancel => {
                // Invalidates the run held by the phase task
                self.start_run();
                context.outcome = Some(Ok(PhaseChange::Cancelled(context.phase)));
                Transition(State::idle())
            }
            _ => Super,
        }
    }

    #[superstate(superstate = "active")]
    fn collecting(&mut self, context: &mut PhaseContext, event: &PhaseInput) -> Response<State> {
        match event {
            PhaseInput::Sample(q) => {
                self.buffer.push(*q);
                context.outcome = Some(Ok(PhaseChange::Collected(self.buffer.len())));
                Handled
            }
            PhaseInput::WindowElapsed(_) => {
                let samples = std::mem::take(&mut self.buffer);
                context.outcome = Some(Ok(PhaseChange::Drained(samples)));
                Transition(State::computing())
            }
            _ => Super,
        }
    }

    #[state(superstate = "collecting")]
    fn collecting_baseline(event: &PhaseInput) -> Response<State> {
        match event {
            _ => Super,
        }
    }

    #[state(superstate = "collecting")]
    fn collecting_swing(event: &PhaseInput) -> Response<State> {
        match event {
            _ => Super,
        }
    }

    #[state(superstate = "collecting")]
    fn collecting_offset(event: &PhaseInput) -> Response<State> {
        match event {
            _ => Super,
        }
    }

    #[state(superstate = "collecting")]
    fn collecting_null(event: &PhaseInput) -> Response<State> {
        match event {
            _ => Super,
        }
    }

    #[state(superstate = "active")]
    fn computing(&mut self, context: &mut PhaseContext, event: &PhaseInput) -> Response<State> {
        match event {
            PhaseInput::Advance(_, next) => match collecting_state(*next) {
                Some(target) => {
                    self.buffer.clear();
                    context.outcome = Some(Ok(PhaseChange::Entered(*next)));
                    Transition(target)
                }
                None => Super,
            },
            PhaseInput::Finish(_) => {
                context.outcome = Some(Ok(PhaseChange::Entered(Phase::Idle)));
                Transition(State::idle())
            }
            _ => Super,
        }
    }
}
