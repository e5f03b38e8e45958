//! Buffer model driven waveform synthesis

pub mod filter;
pub mod model;

pub use filter::DriverFilter;
pub use model::{Corner, DriverModel, InMemoryLoader, ModelError, ModelLibrary, ModelLoader};
