mod frame;
mod pipeline;
mod rate;

pub use frame::{OutputFrame, RawFrame};
pub use pipeline::{DEFAULT_RATE_WINDOW, DataPipeline};
pub use rate::RateCounter;
