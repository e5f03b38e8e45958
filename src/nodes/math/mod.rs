//! Numeric transform filters on analog waveforms

pub mod decimate;
pub mod moving_average;
pub mod squelch;

pub use decimate::DecimateFilter;
pub use moving_average::MovingAverageFilter;
pub use squelch::SquelchFilter;
