//! State machine test utilities and round scenarios.

mod round;
pub mod utils;
