use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use flume::{Receiver, Sender};
use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::{DMatrix, UnitQuaternion, Vector3};

use crate::{
    math::quaternion::{average, canonical, roll_pitch_yaw, rotation_between, rotation_vector},
    telemetry::MessageSink,
};

use super::{
    CalibrationError, CalibrationEvent, Phase, PhaseChange, PhaseInput, PhaseMachine, PhaseTimer,
    RunId, ThreadTimer,
};

/// Fewer angular velocity vectors than this do not define a swing plane
const MIN_PCA_VECTORS: usize = 2;

pub fn duration_from_secs(secs: f64) -> Result<Duration, CalibrationError> {
    Duration::try_from_secs_f64(secs).map_err(|_| CalibrationError::InvalidDuration(secs))
}

/// Rotations applied to every raw sample, `q_offset * q_axis * q_base * raw`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Maps the held-still mounting orientation to identity
    pub q_base: UnitQuaternion<f64>,
    /// Dominant swing axis, in the base corrected frame
    pub axis: Vector3<f64>,
    /// Aligns `axis` with X
    pub q_axis: UnitQuaternion<f64>,
    /// Residual rotation zeroing the rest pose
    pub q_offset: UnitQuaternion<f64>,
    pub roll_offset_rad: f64,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            q_base: UnitQuaternion::identity(),
            axis: Vector3::x(),
            q_axis: UnitQuaternion::identity(),
            q_offset: UnitQuaternion::identity(),
            roll_offset_rad: 0.0,
        }
    }
}

impl CalibrationState {
    /// Base correction first, then axis alignment, then the residual offset
    pub fn apply(&self, raw: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        let q = self.q_offset * self.q_axis * self.q_base * raw;
        UnitQuaternion::new_normalize(q.into_inner())
    }

    fn base_and_axis(&self) -> UnitQuaternion<f64> {
        self.q_axis * self.q_base
    }

    fn set_roll(&mut self, angle_rad: f64) {
        self.roll_offset_rad = angle_rad;
        self.q_offset = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -angle_rad);
    }

    fn set_axis(&mut self, axis: &Vector3<f64>) -> Result<(), CalibrationError> {
        let q_axis = rotation_between(axis, &Vector3::x())?;

        self.axis = axis.normalize();
        self.q_axis = q_axis;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingDurations {
    pub swing: Duration,
    pub baseline: Duration,
    /// Used by a following `confirm_baseline(None)`
    pub offset: Duration,
}

impl Default for SwingDurations {
    fn default() -> Self {
        Self {
            swing: Duration::from_secs(10),
            baseline: Duration::from_millis(500),
            offset: Duration::from_millis(500),
        }
    }
}

impl SwingDurations {
    pub fn from_secs(swing: f64, baseline: f64, offset: f64) -> Result<Self, CalibrationError> {
        Ok(Self {
            swing: duration_from_secs(swing)?,
            baseline: duration_from_secs(baseline)?,
            offset: duration_from_secs(offset)?,
        })
    }
}

struct PhaseTask {
    cancel: Option<Sender<()>>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    machine: Mutex<PhaseMachine>,
    state: RwLock<CalibrationState>,
    task: Mutex<Option<PhaseTask>>,
    pending_offset: Mutex<Duration>,
    timer: Box<dyn PhaseTimer>,
    sink: MessageSink,
}

/// Owns the calibration state and the phase machine driving the timed
/// collection windows.
///
/// Cheap to clone: the ingestion path keeps one handle for `collect` and
/// `apply`, front ends keep another for the triggers. Each run executes on
/// one background task; `cancel` or `shutdown` stop it.
#[derive(Clone)]
pub struct CalibrationEngine {
    inner: Arc<EngineInner>,
}

impl CalibrationEngine {
    pub fn new(sink: MessageSink) -> Self {
        Self::with_timer(sink, ThreadTimer)
    }

    pub fn with_timer(sink: MessageSink, timer: impl PhaseTimer + 'static) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                machine: Mutex::new(PhaseMachine::default()),
                state: RwLock::new(CalibrationState::default()),
                task: Mutex::new(None),
                pending_offset: Mutex::new(SwingDurations::default().offset),
                timer: Box::new(timer),
                sink,
            }),
        }
    }

    /// Appends `raw` to the active window, no-op when idle
    pub fn collect(&self, raw: UnitQuaternion<f64>) {
        self.inner.lock_machine().collect(raw);
    }

    pub fn apply(&self, raw: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.inner.read_state().apply(raw)
    }

    pub fn is_collecting(&self) -> bool {
        self.inner.lock_machine().is_collecting()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock_machine().phase()
    }

    pub fn state(&self) -> CalibrationState {
        *self.inner.read_state()
    }

    /// Swing calibration: baseline hold, then swing with PCA. The offset hold
    /// is not started here; call `confirm_baseline` once the PCA is done.
    pub fn start_swing(&self, durations: SwingDurations) -> Result<(), CalibrationError> {
        self.launch(
            Phase::CollectingBaseline,
            CalibrationEvent::BaselineHoldRequested,
            move |inner, run, cancel| inner.run_swing(run, cancel, durations),
        )?;

        *self.inner.lock_pending_offset() = durations.offset;

        info!(
            "Swing calibration started (baseline {:.2} s, swing {:.2} s)",
            durations.baseline.as_secs_f64(),
            durations.swing.as_secs_f64()
        );

        Ok(())
    }

    /// Roll zero point of the swing calibration. Without a duration, the
    /// offset duration of the last `start_swing` is used.
    pub fn confirm_baseline(&self, duration: Option<Duration>) -> Result<(), CalibrationError> {
        let duration = duration.unwrap_or_else(|| *self.inner.lock_pending_offset());

        self.launch(
            Phase::CollectingOffset,
            CalibrationEvent::OffsetHoldRequested,
            move |inner, run, cancel| inner.run_offset(run, cancel, duration),
        )?;

        info!("Offset hold started ({:.2} s)", duration.as_secs_f64());

        Ok(())
    }

    /// Zeroes roll, pitch and yaw in the held pose
    pub fn start_nullpoint(&self, duration: Duration) -> Result<(), CalibrationError> {
        self.launch(
            Phase::CollectingNull,
            CalibrationEvent::NullHoldRequested,
            move |inner, run, cancel| inner.run_nullpoint(run, cancel, duration),
        )?;

        info!(
            "Nullpoint calibration started ({:.2} s)",
            duration.as_secs_f64()
        );

        Ok(())
    }

    pub fn set_manual_roll(&self, angle_rad: f64) -> Result<(), CalibrationError> {
        self.inner.update_idle(|state| {
            state.set_roll(angle_rad);
            Ok(())
        })
    }

    pub fn set_manual_axis(&self, axis: &Vector3<f64>) -> Result<(), CalibrationError> {
        self.inner.update_idle(|state| state.set_axis(axis))
    }

    /// Stops the active phase and discards its samples. Returns false if no
    /// phase was active.
    pub fn cancel(&self) -> bool {
        let mut task = self.inner.lock_task();
        let result = self.inner.lock_machine().handle(PhaseInput::Cancel);

        match result {
            Ok(PhaseChange::Cancelled(phase)) => {
                release(&mut task);
                drop(task);

                info!("Calibration phase '{phase}' cancelled");
                self.inner.sink.status(CalibrationEvent::Cancelled);
                true
            }
            _ => false,
        }
    }

    /// Cancels any active phase and restores identity calibration
    pub fn reset(&self) {
        let cancelled = {
            let mut task = self.inner.lock_task();
            let mut machine = self.inner.lock_machine();

            let cancelled = machine.handle(PhaseInput::Cancel).is_ok();
            if cancelled {
                release(&mut task);
            }

            *self.inner.write_state() = CalibrationState::default();
            cancelled
        };

        if cancelled {
            self.inner.sink.status(CalibrationEvent::Cancelled);
        }

        info!("Calibration reset to identity");
    }

    /// Cancels the active phase and waits for its task to exit
    pub fn shutdown(&self) {
        self.cancel();

        let task = self.inner.lock_task().take();
        if let Some(task) = task {
            drop(task.cancel);
            if task.handle.join().is_err() {
                warn!("Calibration task panicked");
            }
        }
    }

    fn launch<F>(
        &self,
        first: Phase,
        announce: CalibrationEvent,
        job: F,
    ) -> Result<(), CalibrationError>
    where
        F: FnOnce(&EngineInner, RunId, &Receiver<()>) -> Result<(), CalibrationError>
            + Send
            + 'static,
    {
        let mut task = self.inner.lock_task();

        let started = self.inner.lock_machine().handle(PhaseInput::Start(first));
        let run = match started {
            Ok(PhaseChange::Started(run)) => run,
            Ok(other) => {
                return Err(CalibrationError::InvalidTransition {
                    phase: first,
                    input: transition_name(&other),
                });
            }
            Err(e) => {
                warn!("Calibration trigger rejected: {e}");
                return Err(e);
            }
        };

        // The machine was idle, so any previous task is finished or stale
        if let Some(mut prev) = task.take() {
            prev.cancel.take();
            if prev.handle.join().is_err() {
                warn!("Previous calibration task panicked");
            }
        }

        self.inner.sink.status(announce);

        let (cancel_tx, cancel_rx) = flume::bounded(1);
        let inner = self.inner.clone();

        let spawned = thread::Builder::new()
            .name(format!("calibration-{first}"))
            .spawn(move || {
                if let Err(e) = job(inner.as_ref(), run, &cancel_rx) {
                    match e {
                        CalibrationError::StalePhase => {
                            debug!("Calibration task exiting, run was cancelled")
                        }
                        e => warn!("Calibration task failed: {e}"),
                    }

                    // No-op unless the run is still the active one
                    inner.abort(run);
                }
            });

        match spawned {
            Ok(handle) => {
                *task = Some(PhaseTask {
                    cancel: Some(cancel_tx),
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                let _ = self.inner.lock_machine().handle(PhaseInput::Cancel);
                Err(CalibrationError::Spawn(e.to_string()))
            }
        }
    }
}

impl EngineInner {
    fn lock_machine(&self) -> MutexGuard<'_, PhaseMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PhaseTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending_offset(&self) -> MutexGuard<'_, Duration> {
        self.pending_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CalibrationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CalibrationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort(&self, run: RunId) {
        let mut machine = self.lock_machine();
        if machine.is_current(run) {
            let _ = machine.handle(PhaseInput::Cancel);
        }
    }

    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> Result<(), CalibrationError> {
        if self.timer.wait(duration, cancel) {
            Ok(())
        } else {
            Err(CalibrationError::StalePhase)
        }
    }

    fn drain(&self, run: RunId) -> Result<Vec<UnitQuaternion<f64>>, CalibrationError> {
        match self.lock_machine().handle(PhaseInput::WindowElapsed(run))? {
            PhaseChange::Drained(samples) => Ok(samples),
            other => Err(CalibrationError::InvalidTransition {
                phase: Phase::Computing,
                input: transition_name(&other),
            }),
        }
    }

    fn advance(&self, run: RunId, next: Phase) -> Result<(), CalibrationError> {
        self.lock_machine()
            .handle(PhaseInput::Advance(run, next))
            .map(|_| ())
    }

    fn finish(&self, run: RunId) -> Result<(), CalibrationError> {
        self.lock_machine().handle(PhaseInput::Finish(run)).map(|_| ())
    }

    /// Writes the result of `run`, unless it was cancelled in the meantime
    fn commit<R>(
        &self,
        run: RunId,
        update: impl FnOnce(&mut CalibrationState) -> R,
    ) -> Result<R, CalibrationError> {
        let machine = self.lock_machine();

        if !machine.is_current(run) {
            return Err(CalibrationError::StalePhase);
        }

        let mut state = self.write_state();
        Ok(update(&mut state))
    }

    fn update_idle(
        &self,
        update: impl FnOnce(&mut CalibrationState) -> Result<(), CalibrationError>,
    ) -> Result<(), CalibrationError> {
        let machine = self.lock_machine();

        match machine.phase() {
            Phase::Idle => {
                let mut state = self.write_state();
                update(&mut state)
            }
            active => Err(CalibrationError::PhaseConflict { active }),
        }
    }

    fn run_swing(
        &self,
        run: RunId,
        cancel: &Receiver<()>,
        durations: SwingDurations,
    ) -> Result<(), CalibrationError> {
        self.wait(durations.baseline, cancel)?;

        let samples = self.drain(run)?;
        debug!("Baseline window closed with {} samples", samples.len());

        // Committed together with the axis, a cancelled swing leaves both untouched
        let q_base = match average(&samples) {
            Ok(mean) => canonical(mean.inverse()),
            Err(e) => {
                warn!("Baseline: {e}, keeping previous base rotation");
                self.sink.status(CalibrationEvent::InsufficientSamples {
                    phase: Phase::CollectingBaseline,
                });
                self.read_state().q_base
            }
        };

        self.sink.status(CalibrationEvent::BaselineDone);

        self.advance(run, Phase::CollectingSwing)?;
        self.sink.status(CalibrationEvent::SwingRequested);

        let whole_secs = durations.swing.as_secs();
        for remaining in (1..=whole_secs).rev() {
            self.sink
                .status(CalibrationEvent::CountdownTick(remaining as u32));
            self.wait(Duration::from_secs(1), cancel)?;
        }

        let rest = durations.swing - Duration::from_secs(whole_secs);
        if !rest.is_zero() {
            self.wait(rest, cancel)?;
        }

        let samples = self.drain(run)?;
        let (axis, usable) = dominant_axis(&q_base, &samples);

        debug!(
            "Swing window closed with {} samples, {usable} usable rotation vectors",
            samples.len()
        );

        let axis = match axis {
            Some(axis) => axis,
            None => {
                warn!("Swing: only {usable} usable rotation vectors, using default axis");
                self.sink
                    .status(CalibrationEvent::DegeneratePca { usable });
                Vector3::x()
            }
        };

        self.commit(run, |state| {
            state.set_axis(&axis)?;
            state.q_base = q_base;
            Ok::<(), CalibrationError>(())
        })??;
        self.finish(run)?;

        info!(
            "Dominant swing axis: [{:.4}, {:.4}, {:.4}]",
            axis.x, axis.y, axis.z
        );

        self.sink.axis(&axis);
        self.sink.status(CalibrationEvent::PcaCompleted {
            axis: [axis.x, axis.y, axis.z],
        });

        Ok(())
    }

    fn run_offset(
        &self,
        run: RunId,
        cancel: &Receiver<()>,
        duration: Duration,
    ) -> Result<(), CalibrationError> {
        self.wait(duration, cancel)?;

        let samples = self.drain(run)?;
        let correction = self.read_state().base_and_axis();

        let rolls: Vec<f64> = samples
            .iter()
            .map(|q| roll_pitch_yaw(&(correction * q)).0)
            .collect();

        let roll = circular_mean(&rolls).unwrap_or_else(|| {
            warn!("Offset hold: no samples, clearing roll offset");
            self.sink.status(CalibrationEvent::InsufficientSamples {
                phase: Phase::CollectingOffset,
            });
            0.0
        });

        self.commit(run, |state| state.set_roll(roll))?;
        self.finish(run)?;

        info!("Roll offset set to {:.3}°", roll.to_degrees());
        self.sink.status(CalibrationEvent::SwingDone);

        Ok(())
    }

    fn run_nullpoint(
        &self,
        run: RunId,
        cancel: &Receiver<()>,
        duration: Duration,
    ) -> Result<(), CalibrationError> {
        self.wait(duration, cancel)?;

        let samples = self.drain(run)?;
        let correction = self.read_state().base_and_axis();

        let corrected: Vec<UnitQuaternion<f64>> = samples.iter().map(|q| correction * q).collect();

        let q_offset = match average(&corrected) {
            Ok(mean) => canonical(mean.inverse()),
            Err(e) => {
                warn!("Nullpoint: {e}, using identity offset");
                self.sink.status(CalibrationEvent::InsufficientSamples {
                    phase: Phase::CollectingNull,
                });
                UnitQuaternion::identity()
            }
        };

        self.commit(run, |state| state.q_offset = q_offset)?;
        self.finish(run)?;

        let (roll, pitch, yaw) = roll_pitch_yaw(&q_offset);
        info!(
            "Nullpoint offset set from {} samples (roll {:.2}°, pitch {:.2}°, yaw {:.2}°)",
            samples.len(),
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        );
        self.sink.status(CalibrationEvent::NullDone);

        Ok(())
    }
}

/// Principal direction of the angular velocity between consecutive base
/// corrected samples. Returns the axis (if there was enough motion) and the
/// number of usable rotation vectors.
fn dominant_axis(
    q_base: &UnitQuaternion<f64>,
    samples: &[UnitQuaternion<f64>],
) -> (Option<Vector3<f64>>, usize) {
    let omegas: Vec<Vector3<f64>> = samples
        .iter()
        .map(|q| q_base * q)
        .tuple_windows()
        .filter_map(|(a, b)| rotation_vector(&(b * a.inverse())))
        .collect();

    if omegas.len() < MIN_PCA_VECTORS {
        return (None, omegas.len());
    }

    let m = DMatrix::from_fn(omegas.len(), 3, |r, c| omegas[r][c]);
    let svd = m.svd(false, true);

    let axis = svd.v_t.as_ref().and_then(|v_t| {
        let row = v_t.row(svd.singular_values.imax());
        Vector3::new(row[0], row[1], row[2]).try_normalize(f64::EPSILON)
    });

    // A swing reverses direction every half period, so the sign is arbitrary.
    // Pick the one closest to X to keep the alignment rotation small.
    let axis = axis.map(|a| if a.x < 0.0 { -a } else { a });

    (axis, omegas.len())
}

/// Wakes the phase task of a cancelled run
fn release(task: &mut Option<PhaseTask>) {
    if let Some(task) = task.as_mut() {
        task.cancel.take();
    }
}

fn circular_mean(angles: &[f64]) -> Option<f64> {
    if angles.is_empty() {
        return None;
    }

    let (sin, cos) = angles
        .iter()
        .fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));

    Some(sin.atan2(cos))
}

fn transition_name(transition: &PhaseChange) -> &'static str {
    match transition {
        PhaseChange::Started(_) => "started",
        PhaseChange::Collected(_) => "collected",
        PhaseChange::Drained(_) => "drained",
        PhaseChange::Entered(_) => "entered",
        PhaseChange::Cancelled(_) => "cancelled",
    }
}
