//! Concrete graph nodes
//!
//! - **Capture**: source node fed by an instrument or test harness
//! - **Decoders**: protocol decoders (HyperRAM, SPI) built on a shared
//!   multi-channel event merge
//! - **Math**: numeric transforms on analog waveforms
//! - **Driver**: analog output synthesis from characterized buffer models
//!
//! # Examples
//!
//! ```
//! use scopegraph::nodes::capture::CaptureSource;
//! use scopegraph::nodes::math::MovingAverageFilter;
//! use scopegraph::runtime::graph::FilterGraph;
//!
//! let mut graph = FilterGraph::new();
//! graph.add_filter("scope", CaptureSource::analog(&["CH1"]))?;
//! graph.add_filter("avg", MovingAverageFilter::new())?;
//! graph.connect("scope", "CH1", "avg", "din")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod decoders;
pub mod driver;
pub mod math;

pub use capture::CaptureSource;
