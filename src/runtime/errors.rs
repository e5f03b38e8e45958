//! Error types for the runtime system

use super::waveform::StreamKind;

/// Error type for graph connection operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Port '{port}' not found on node '{node}'")]
    PortNotFound { node: String, port: String },

    #[error("Input '{to_port}' on '{to_node}' rejected {from_node}.{from_port} ({kind})")]
    Rejected {
        from_node: String,
        from_port: String,
        kind: StreamKind,
        to_node: String,
        to_port: String,
    },

    #[error("{0}")]
    DuplicateConnection(String),

    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Node with name '{0}' already exists")]
    DuplicateNode(String),

    #[error("Node '{0}' does not accept external waveforms")]
    NotASource(String),
}

/// Error type for parameter access and mutation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("Parameter '{0}' not found")]
    NotFound(String),

    #[error("Cannot parse '{value}' as {expected}")]
    Parse { value: String, expected: &'static str },

    #[error("Enum value '{0}' not in table")]
    UnknownEnumName(String),
}

/// Error type for graph-level operations that touch a node's parameters
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Node '{node}': {source}")]
    Parameter {
        node: String,
        #[source]
        source: ParameterError,
    },
}

/// Reason a refresh produced no output
///
/// Never escapes `Filter::refresh`: the output layer converts it into a null
/// output and a debug log line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefreshError {
    #[error("Input {0} is not connected or has no data")]
    MissingInput(usize),

    #[error("Input {slot} is {actual}, expected {expected}")]
    WrongKind {
        slot: usize,
        expected: StreamKind,
        actual: StreamKind,
    },

    #[error("Need at least {needed} samples, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("No model loaded")]
    NoModel,

    #[error("Input contains no transitions")]
    NoEdges,

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Result type for refresh bodies
pub type RefreshResult<T> = Result<T, RefreshError>;

/// Failure reported by the instrument collaborator
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Channel {0} does not exist")]
    NoSuchChannel(usize),

    #[error("Trigger did not fire within {0} polls")]
    TriggerTimeout(usize),

    #[error("Acquisition stopped before the trigger fired")]
    Stopped,

    #[error(transparent)]
    Graph(#[from] ConnectionError),
}
