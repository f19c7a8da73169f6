pub mod calibration;
pub mod command;
pub mod core;
pub mod math;
pub mod parameters;
pub mod pipeline;
pub mod runner;
pub mod telemetry;
pub mod transport;
pub mod utils;
