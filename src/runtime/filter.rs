//! Filter trait for graph nodes
//!
//! Every node in a [`FilterGraph`](super::graph::FilterGraph) implements
//! [`Filter`]. Unlike a streaming node, a filter does not run continuously:
//! the graph calls [`Filter::refresh`] once per pass, after every upstream
//! filter has published its output.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::errors::{ParameterError, RefreshResult};
use super::parameter::{Parameter, ParameterSet};
use super::ports::{InputSet, OutputStreams, PortSchema, StreamDescriptor};
use super::waveform::WaveformData;

/// A graph node that recomputes its outputs from typed inputs and parameters
///
/// - Sources have 0 inputs and N outputs
/// - Transforms and decoders have N inputs and M outputs
pub trait Filter: Send {
    /// Instance name, used in logs and default output names
    fn name(&self) -> &str;

    /// Registry key of the filter type ("HyperRAM", "Downsample", ...)
    fn protocol_name(&self) -> &str;

    /// Schema for all input slots (name + kind + index)
    fn input_schema(&self) -> Vec<PortSchema>;

    /// Schema for all output streams (name + kind + index)
    fn output_schema(&self) -> Vec<PortSchema>;

    /// Decide whether `stream` may be connected to input `slot`.
    ///
    /// Must be side-effect free. The default accepts a stream only when it is
    /// present and its kind matches the slot's schema.
    fn validate_input(&self, slot: usize, stream: Option<&StreamDescriptor>) -> bool {
        match stream {
            Some(desc) => self
                .input_schema()
                .get(slot)
                .is_some_and(|schema| schema.kind == desc.kind),
            None => false,
        }
    }

    /// Recompute every output stream from `inputs`.
    ///
    /// Never fails outward: configuration or resource problems publish a
    /// null output for the affected stream instead.
    fn refresh(&mut self, inputs: &InputSet);

    /// Current published output of `stream`
    fn output(&self, stream: usize) -> Option<Arc<WaveformData>>;

    /// True when the default parameter values cannot produce useful output
    fn needs_explicit_configuration(&self) -> bool {
        false
    }

    /// Human readable name derived from the connected inputs' names and the
    /// key parameter values
    fn default_output_name(&self, input_names: &[String]) -> String;

    fn parameters(&self) -> &ParameterSet;

    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Synchronous hook run after parameter `name` was mutated through
    /// [`FilterExt::update_parameter`]. Must not trigger a refresh.
    fn on_parameter_changed(&mut self, _name: &str) {}

    /// Vertical full-scale range suggested for displaying `stream`
    fn display_range(&self, _stream: usize) -> Option<f32> {
        None
    }

    fn as_source(&self) -> Option<&dyn WaveformSource> {
        None
    }

    /// Access to the capture side of source nodes
    fn as_source_mut(&mut self) -> Option<&mut dyn WaveformSource> {
        None
    }
}

/// A node whose outputs are fed from outside the graph (an instrument,
/// a file, a test harness) instead of being computed from inputs
pub trait WaveformSource {
    /// Stage `data` for `stream`; it is published on the next refresh
    fn load(&mut self, stream: usize, data: Option<WaveformData>);

    fn stream_count(&self) -> usize;
}

/// Parameter mutation helpers available on every filter
pub trait FilterExt: Filter {
    /// Apply `update` to parameter `name`, then run the filter's change
    /// handler on the caller's stack.
    fn update_parameter<F>(&mut self, name: &str, update: F) -> Result<(), ParameterError>
    where
        F: FnOnce(&mut Parameter) -> Result<(), ParameterError>,
    {
        update(self.parameters_mut().require_mut(name)?)?;
        self.on_parameter_changed(name);
        Ok(())
    }

    /// Parse `value` into parameter `name` (SI suffixes, enum names)
    fn set_parameter_str(&mut self, name: &str, value: &str) -> Result<(), ParameterError> {
        self.update_parameter(name, |p| p.parse_string(value))
    }

    /// Apply persisted values, then run the change handler once per applied
    /// name. Enum values naming entries that only exist after another
    /// handler has run are retained as text and resolved by that handler.
    fn load_parameters(&mut self, values: &BTreeMap<String, String>) -> Vec<String> {
        let applied = self.parameters_mut().load_serialized(values);
        for name in &applied {
            self.on_parameter_changed(name);
        }
        applied
    }
}

impl<T: Filter + ?Sized> FilterExt for T {}

// ────────────────────────────────────────────────────────────────────────────
// Shared helpers for implementors
// ────────────────────────────────────────────────────────────────────────────

/// Run a single-output refresh body and publish its result
pub fn publish_single<F>(name: &str, outputs: &mut OutputStreams, body: F)
where
    F: FnOnce(&mut OutputStreams) -> RefreshResult<WaveformData>,
{
    let result = body(outputs);
    outputs.publish(name, 0, result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::graph::NodeId;
    use crate::runtime::parameter::Unit;
    use crate::runtime::waveform::StreamKind;

    struct Gain {
        params: ParameterSet,
        outputs: OutputStreams,
        changes: Vec<String>,
    }

    impl Gain {
        fn new() -> Self {
            let mut params = ParameterSet::new();
            params.insert("Gain", Parameter::float(Unit::Counts, 1.0));
            Self {
                params,
                outputs: OutputStreams::new(1),
                changes: Vec::new(),
            }
        }
    }

    impl Filter for Gain {
        fn name(&self) -> &str {
            "gain"
        }
        fn protocol_name(&self) -> &str {
            "Gain"
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::input("in", StreamKind::Analog, 0)]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::output("out", StreamKind::Analog, 0)]
        }
        fn refresh(&mut self, inputs: &InputSet) {
            let gain = self.params.float_val("Gain");
            publish_single("gain", &mut self.outputs, |_| {
                let gain = gain? as f32;
                let mut out = inputs.analog(0)?.clone();
                out.samples.iter_mut().for_each(|s| *s *= gain);
                Ok(WaveformData::Analog(out))
            });
        }
        fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
            self.outputs.get(stream)
        }
        fn default_output_name(&self, input_names: &[String]) -> String {
            format!("Gain({})", input_names.join(","))
        }
        fn parameters(&self) -> &ParameterSet {
            &self.params
        }
        fn parameters_mut(&mut self) -> &mut ParameterSet {
            &mut self.params
        }
        fn on_parameter_changed(&mut self, name: &str) {
            self.changes.push(name.to_string());
        }
    }

    #[test]
    fn test_default_validate_input_checks_kind() {
        let gain = Gain::new();
        let analog = StreamDescriptor::new(NodeId::new(0), 0, StreamKind::Analog);
        let digital = StreamDescriptor::new(NodeId::new(0), 0, StreamKind::Digital);
        assert!(gain.validate_input(0, Some(&analog)));
        assert!(!gain.validate_input(0, Some(&digital)));
        assert!(!gain.validate_input(0, None));
        assert!(!gain.validate_input(1, Some(&analog)));
    }

    #[test]
    fn test_update_parameter_runs_change_handler() {
        let mut gain = Gain::new();
        gain.set_parameter_str("Gain", "2").unwrap();
        assert_eq!(gain.changes, vec!["Gain".to_string()]);
        assert_eq!(gain.params.float_val("Gain").unwrap(), 2.0);

        assert!(gain.set_parameter_str("Missing", "2").is_err());
        assert_eq!(gain.changes.len(), 1);
    }

    #[test]
    fn test_load_parameters_runs_handlers_for_applied_names() {
        let mut gain = Gain::new();
        let values: BTreeMap<String, String> = [("Gain", "4"), ("Bogus", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(gain.load_parameters(&values), vec!["Gain".to_string()]);
        assert_eq!(gain.changes, vec!["Gain".to_string()]);
        assert_eq!(gain.params.float_val("Gain").unwrap(), 4.0);
    }

    #[test]
    fn test_refresh_without_input_publishes_null() {
        let mut gain = Gain::new();
        gain.refresh(&InputSet::new(vec![None]));
        assert!(gain.output(0).is_none());

        let input = WaveformData::Analog(crate::runtime::waveform::AnalogWaveform::from_dense(
            1,
            vec![1.0, 2.0],
        ));
        gain.set_parameter_str("Gain", "3").unwrap();
        gain.refresh(&InputSet::from_waveforms(vec![input]));
        let out = gain.output(0).unwrap();
        assert_eq!(out.as_analog().unwrap().samples, vec![3.0, 6.0]);
    }
}
