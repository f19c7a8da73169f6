pub mod quaternion;

pub use quaternion::{MathError, average, rotation_between};
