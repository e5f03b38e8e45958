//! Runtime support for filter graphs

pub mod acquisition;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod parameter;
pub mod ports;
pub mod registry;
pub mod waveform;

pub use acquisition::{
    acquire_once, AcquisitionOptions, AcquisitionRunner, ChannelBinding, ChannelConfig, Instrument,
    PassReport, TriggerConfig, TriggerState,
};
pub use errors::{
    AcquisitionError, ConnectionError, GraphError, ParameterError, RefreshError, RefreshResult,
};
pub use filter::{Filter, FilterExt, WaveformSource};
pub use graph::{FilterGraph, NodeId, SharedGraph};
pub use parameter::{Parameter, ParameterSet, ParameterType, Unit};
pub use ports::{InputSet, OutputStreams, PortDirection, PortSchema, StreamDescriptor};
pub use registry::{create_filter, register_filter, registered_protocols};
pub use waveform::{
    AnalogWaveform, DigitalWaveform, ProtocolWaveform, StreamKind, Waveform, WaveformData,
    FS_PER_SECOND,
};
