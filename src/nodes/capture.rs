//! Capture source
//!
//! Provides `CaptureSource` - a graph node with no inputs whose outputs are
//! the channels of an instrument (or a test harness). Acquired waveforms are
//! staged with [`WaveformSource::load`] and become visible to downstream
//! filters on the next refresh pass.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::runtime::filter::{Filter, WaveformSource};
use crate::runtime::parameter::ParameterSet;
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{StreamKind, WaveformData};

/// One instrument channel exposed as an output stream
#[derive(Debug, Clone)]
pub struct CaptureChannel {
    pub name: String,
    pub kind: StreamKind,
}

/// Source node that publishes externally acquired waveforms
///
/// Each channel is one output port, named after the channel. A channel
/// whose staged data is `None` (disabled, or not returned by the
/// instrument) publishes a null output. Channels with nothing staged since
/// the last refresh keep their previous output.
pub struct CaptureSource {
    name: String,
    channels: Vec<CaptureChannel>,
    staged: Vec<Option<WaveformData>>,
    pending: Vec<bool>,
    outputs: OutputStreams,
    params: ParameterSet,
}

impl CaptureSource {
    pub fn new(channels: Vec<CaptureChannel>) -> Self {
        let n = channels.len();
        Self {
            name: "capture".to_string(),
            channels,
            staged: (0..n).map(|_| None).collect(),
            pending: vec![false; n],
            outputs: OutputStreams::new(n),
            params: ParameterSet::new(),
        }
    }

    /// Oscilloscope-style source with one analog output per name
    pub fn analog(names: &[&str]) -> Self {
        Self::with_kind(names, StreamKind::Analog)
    }

    /// Logic-analyzer-style source with one digital output per name
    pub fn digital(names: &[&str]) -> Self {
        Self::with_kind(names, StreamKind::Digital)
    }

    fn with_kind(names: &[&str], kind: StreamKind) -> Self {
        Self::new(
            names
                .iter()
                .map(|&name| CaptureChannel {
                    name: name.to_string(),
                    kind,
                })
                .collect(),
        )
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn channels(&self) -> &[CaptureChannel] {
        &self.channels
    }
}

impl WaveformSource for CaptureSource {
    fn load(&mut self, stream: usize, data: Option<WaveformData>) {
        let (Some(slot), Some(pending)) = (self.staged.get_mut(stream), self.pending.get_mut(stream))
        else {
            debug!("[{}] Ignoring data for unknown channel {}", self.name, stream);
            return;
        };
        *slot = data;
        *pending = true;
    }

    fn stream_count(&self) -> usize {
        self.channels.len()
    }
}

impl Filter for CaptureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "Capture"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, ch)| PortSchema::output(ch.name.clone(), ch.kind, i))
            .collect()
    }

    fn refresh(&mut self, _inputs: &InputSet) {
        for (i, channel) in self.channels.iter().enumerate() {
            if !std::mem::take(&mut self.pending[i]) {
                continue;
            }
            let data = self.staged[i].take().filter(|w| {
                let ok = w.kind() == channel.kind;
                if !ok {
                    debug!(
                        "[{}] Channel {} expects {} data, got {}",
                        self.name,
                        channel.name,
                        channel.kind,
                        w.kind()
                    );
                }
                ok
            });
            trace!(
                "[{}] {}: {} samples",
                self.name,
                channel.name,
                data.as_ref().map_or(0, WaveformData::len)
            );
            self.outputs.set(i, data);
        }
    }

    fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.outputs.get(stream)
    }

    fn default_output_name(&self, _input_names: &[String]) -> String {
        self.name.clone()
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn as_source(&self) -> Option<&dyn WaveformSource> {
        Some(self)
    }

    fn as_source_mut(&mut self) -> Option<&mut dyn WaveformSource> {
        Some(self)
    }
}
