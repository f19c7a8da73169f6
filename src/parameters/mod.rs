mod parameters;

pub use parameters::{BellframeParams, CalibrationParams, Error, PipelineParams, SerialParams};
