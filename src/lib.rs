//! Waveform filter graph for captured oscilloscope / logic analyzer data
//!
//! This library turns captured analog and digital sample streams into derived
//! waveforms and decoded protocol symbols.
//!
//! # Architecture
//!
//! - **Waveform**: sparse, variable-rate timeline with a dense fast path
//! - **FilterGraph**: DAG of filters refreshed in dependency order, one pass
//!   per capture, under a single graph lock
//! - **Decoders**: HyperRAM and SPI decoders that merge several digital
//!   channels into one ordered event timeline
//! - **Acquisition**: arm → poll → acquire → refresh loop over an
//!   `Instrument` handle
//!
//! # Example
//!
//! ```
//! use scopegraph::{CaptureSource, DecimateFilter, FilterGraph, WaveformData, AnalogWaveform};
//!
//! let mut graph = FilterGraph::new();
//! graph.add_filter("scope", CaptureSource::analog(&["CH1"]))?;
//! graph.add_filter("dec", DecimateFilter::new())?;
//! graph.connect("scope", "CH1", "dec", "din")?;
//! graph.set_parameter_str("dec", "Downsample Factor", "2")?;
//!
//! let ramp = AnalogWaveform::from_dense(1000, (0..8).map(|i| i as f32).collect());
//! graph.load_source("scope", 0, Some(WaveformData::Analog(ramp)))?;
//! graph.refresh_all();
//! assert_eq!(graph.output("dec", 0).map(|w| w.len()), Some(4));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod nodes;
pub mod runtime;

// Re-export decoder data types
pub use nodes::decoders::{CommandAddress, SpiMode, Symbol, SymbolKind};

// Re-export nodes
pub use nodes::capture::CaptureSource;
pub use nodes::decoders::{HyperRamDecoder, SpiDecoder};
pub use nodes::driver::{DriverFilter, ModelLoader};
pub use nodes::math::{DecimateFilter, MovingAverageFilter, SquelchFilter};

// Re-export graph runtime components
pub use runtime::{
    AcquisitionError, AcquisitionRunner, AnalogWaveform, ConnectionError, DigitalWaveform, Filter,
    FilterGraph, GraphError, Instrument, NodeId, Parameter, ParameterError, ProtocolWaveform,
    RefreshError, SharedGraph, StreamKind, Waveform, WaveformData, create_filter,
    register_filter,
};
