use chrono::TimeDelta;
use log::trace;

use crate::{
    calibration::CalibrationEngine,
    core::time::{Clock, SystemClock},
    math::quaternion::{roll_pitch_yaw, rotation_matrix},
    telemetry::MessageSink,
};

use super::{OutputFrame, RawFrame, rate::RateCounter};

pub const DEFAULT_RATE_WINDOW: TimeDelta = TimeDelta::seconds(2);

/// Per-frame orchestration: rate accounting, calibration collection and
/// correction, output to the sink. Holds no calibration logic itself.
pub struct DataPipeline {
    engine: CalibrationEngine,
    sink: MessageSink,
    clock: Box<dyn Clock + Send>,

    packet_rate: RateCounter,
    sample_rate: RateCounter,
}

impl DataPipeline {
    pub fn new(engine: CalibrationEngine, sink: MessageSink) -> Self {
        Self::with_clock(engine, sink, SystemClock::default(), DEFAULT_RATE_WINDOW)
    }

    pub fn with_clock(
        engine: CalibrationEngine,
        sink: MessageSink,
        clock: impl Clock + Send + 'static,
        rate_window: TimeDelta,
    ) -> Self {
        let now = clock.monotonic();

        Self {
            engine,
            sink,
            clock: Box::new(clock),
            packet_rate: RateCounter::new(rate_window, now),
            sample_rate: RateCounter::new(rate_window, now),
        }
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    /// Processes one frame and emits it. Returns `None`, counting the frame
    /// as a rejected packet, when the quaternion has no usable orientation.
    pub fn ingest(&mut self, frame: &RawFrame) -> Option<OutputFrame> {
        let Some(raw) = frame.orientation() else {
            trace!("Zero quaternion at {} ms", frame.timestamp_ms);
            self.record_rejected_packet();
            return None;
        };

        let now = self.clock.monotonic();
        let packet_rate_hz = self.packet_rate.tick(now);
        let sample_rate_hz = self.sample_rate.tick(now);

        self.engine.collect(raw);
        let calibrated = self.engine.apply(&raw);

        let (roll, pitch, yaw) = roll_pitch_yaw(&calibrated);

        let out = OutputFrame {
            secs: frame.secs(),
            packet_rate_hz,
            sample_rate_hz,
            raw_quaternion: (&raw).into(),
            raw_rotation_matrix: rotation_matrix(&raw),
            calibrated_quaternion: (&calibrated).into(),
            calibrated_rotation_matrix: rotation_matrix(&calibrated),
            roll_deg: roll.to_degrees(),
            pitch_deg: pitch.to_degrees(),
            yaw_deg: yaw.to_degrees(),
        };

        self.sink.data(out.clone());

        Some(out)
    }

    /// A packet arrived but did not decode. Counts towards the packet rate only.
    pub fn record_rejected_packet(&mut self) {
        let now = self.clock.monotonic();
        self.packet_rate.tick(now);
    }

    pub fn packet_rate_hz(&self) -> f64 {
        self.packet_rate.rate_hz()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate.rate_hz()
    }
}
