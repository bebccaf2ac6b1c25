//! Foundation utilities: math, color, timing and logging

pub mod color;
pub mod logging;
pub mod math;
pub mod time;
