//! Port schemas and the waveform views a filter sees during refresh
//!
//! - [`PortSchema`] names and types each input slot / output stream.
//! - [`StreamDescriptor`] identifies one output stream of one node.
//! - [`InputSet`] is the refresh-scoped view of a filter's inputs.
//! - [`OutputStreams`] owns the waveforms a filter has published.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::errors::{RefreshError, RefreshResult};
use super::graph::NodeId;
use super::waveform::{AnalogWaveform, DigitalWaveform, ProtocolWaveform, StreamKind, WaveformData};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Schema describing a port's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PortSchema {
    pub name: String,
    pub kind: StreamKind,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    pub fn new(
        name: impl Into<String>,
        kind: StreamKind,
        index: usize,
        direction: PortDirection,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            index,
            direction,
        }
    }

    pub fn input(name: impl Into<String>, kind: StreamKind, index: usize) -> Self {
        Self::new(name, kind, index, PortDirection::Input)
    }

    pub fn output(name: impl Into<String>, kind: StreamKind, index: usize) -> Self {
        Self::new(name, kind, index, PortDirection::Output)
    }
}

/// Reference to one output stream of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamDescriptor {
    pub node: NodeId,
    pub stream: usize,
    pub kind: StreamKind,
}

impl StreamDescriptor {
    pub fn new(node: NodeId, stream: usize, kind: StreamKind) -> Self {
        Self { node, stream, kind }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{} ({})", self.node.as_usize(), self.stream, self.kind)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// InputSet: borrowed view of upstream outputs
// ────────────────────────────────────────────────────────────────────────────

/// Current upstream waveforms for each input slot of one filter.
///
/// Built by the graph immediately before `refresh()` and dropped right after;
/// filters must not keep the contained `Arc`s past the refresh call.
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    slots: Vec<Option<Arc<WaveformData>>>,
}

impl InputSet {
    pub fn new(slots: Vec<Option<Arc<WaveformData>>>) -> Self {
        Self { slots }
    }

    /// Convenience for tests and standalone use: every slot connected
    pub fn from_waveforms(waveforms: Vec<WaveformData>) -> Self {
        Self {
            slots: waveforms.into_iter().map(|w| Some(Arc::new(w))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw access; `None` when unconnected or the upstream output is null
    pub fn get(&self, slot: usize) -> Option<&WaveformData> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    /// Check that the first `count` slots are connected and carry data
    pub fn verify_all(&self, count: usize) -> RefreshResult<()> {
        for slot in 0..count {
            match self.get(slot) {
                Some(w) if !w.is_empty() => {}
                _ => return Err(RefreshError::MissingInput(slot)),
            }
        }
        Ok(())
    }

    fn require(&self, slot: usize) -> RefreshResult<&WaveformData> {
        self.get(slot)
            .filter(|w| !w.is_empty())
            .ok_or(RefreshError::MissingInput(slot))
    }

    fn wrong_kind(slot: usize, expected: StreamKind, data: &WaveformData) -> RefreshError {
        RefreshError::WrongKind {
            slot,
            expected,
            actual: data.kind(),
        }
    }

    pub fn analog(&self, slot: usize) -> RefreshResult<&AnalogWaveform> {
        match self.require(slot)? {
            WaveformData::Analog(w) => Ok(w),
            other => Err(Self::wrong_kind(slot, StreamKind::Analog, other)),
        }
    }

    pub fn digital(&self, slot: usize) -> RefreshResult<&DigitalWaveform> {
        match self.require(slot)? {
            WaveformData::Digital(w) => Ok(w),
            other => Err(Self::wrong_kind(slot, StreamKind::Digital, other)),
        }
    }

    pub fn protocol(&self, slot: usize) -> RefreshResult<&ProtocolWaveform> {
        match self.require(slot)? {
            WaveformData::Protocol(w) => Ok(w),
            other => Err(Self::wrong_kind(slot, StreamKind::Protocol, other)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OutputStreams: owned published outputs
// ────────────────────────────────────────────────────────────────────────────

/// The waveforms a filter has published, one slot per output stream.
///
/// Every publish replaces the slot's `Arc`; a consumer that still holds the
/// previous one keeps a valid (stale) waveform until it drops it.
#[derive(Debug, Default)]
pub struct OutputStreams {
    streams: Vec<Option<Arc<WaveformData>>>,
    generations: Vec<u64>,
}

impl OutputStreams {
    pub fn new(count: usize) -> Self {
        Self {
            streams: vec![None; count],
            generations: vec![0; count],
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Current output of `stream`, shared with the caller
    pub fn get(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.streams.get(stream).cloned().flatten()
    }

    /// Number of times `stream` has been published
    pub fn generation(&self, stream: usize) -> u64 {
        self.generations.get(stream).copied().unwrap_or(0)
    }

    pub fn set(&mut self, stream: usize, data: Option<WaveformData>) {
        if stream >= self.streams.len() {
            return;
        }
        self.streams[stream] = data.map(Arc::new);
        self.generations[stream] += 1;
    }

    /// Publish the result of a refresh body; errors become a null output.
    pub fn publish(&mut self, filter: &str, stream: usize, result: RefreshResult<WaveformData>) {
        match result {
            Ok(data) => self.set(stream, Some(data)),
            Err(e) => {
                debug!("[{}] stream {}: no output ({})", filter, stream, e);
                self.set(stream, None);
            }
        }
    }

    /// Null every stream
    pub fn clear_all(&mut self) {
        for stream in 0..self.streams.len() {
            self.set(stream, None);
        }
    }

    /// Take back the previous output buffer of `stream` for in-place reuse.
    ///
    /// Returns `None` if nothing was published or a consumer still holds a
    /// reference; in that case the caller must allocate a fresh waveform.
    pub fn take_reusable(&mut self, stream: usize) -> Option<WaveformData> {
        let previous = self.streams.get_mut(stream)?.take()?;
        Arc::try_unwrap(previous).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analog(samples: Vec<f32>) -> WaveformData {
        WaveformData::Analog(AnalogWaveform::from_dense(1, samples))
    }

    #[test]
    fn test_typed_access_checks_kind() {
        let inputs = InputSet::from_waveforms(vec![analog(vec![1.0])]);
        assert!(inputs.analog(0).is_ok());
        assert_eq!(
            inputs.digital(0).unwrap_err(),
            RefreshError::WrongKind {
                slot: 0,
                expected: StreamKind::Digital,
                actual: StreamKind::Analog
            }
        );
        assert_eq!(inputs.analog(1).unwrap_err(), RefreshError::MissingInput(1));
    }

    #[test]
    fn test_empty_upstream_counts_as_missing() {
        let inputs = InputSet::new(vec![Some(Arc::new(analog(vec![]))), None]);
        assert_eq!(inputs.verify_all(1), Err(RefreshError::MissingInput(0)));
        assert_eq!(inputs.analog(0).unwrap_err(), RefreshError::MissingInput(0));
    }

    #[test]
    fn test_publish_error_nulls_output() {
        let mut outputs = OutputStreams::new(1);
        outputs.publish("test", 0, Ok(analog(vec![1.0])));
        assert!(outputs.get(0).is_some());
        outputs.publish("test", 0, Err(RefreshError::NoModel));
        assert!(outputs.get(0).is_none());
        assert_eq!(outputs.generation(0), 2);
    }

    #[test]
    fn test_take_reusable_only_when_unshared() {
        let mut outputs = OutputStreams::new(1);
        outputs.set(0, Some(analog(vec![1.0, 2.0])));
        assert!(outputs.take_reusable(0).is_some());

        outputs.set(0, Some(analog(vec![3.0])));
        let held = outputs.get(0);
        assert!(outputs.take_reusable(0).is_none());
        // The consumer's view is unaffected
        assert_eq!(held.unwrap().len(), 1);
    }
}
