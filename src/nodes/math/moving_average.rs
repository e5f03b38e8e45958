//! Boxcar moving average

use std::sync::Arc;

use tracing::debug;

use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{AnalogWaveform, StreamKind, WaveformData};

pub const DEPTH: &str = "Depth";

/// Mean over a sliding window of `Depth` samples
///
/// Output sample `i` averages input samples `[i, i + depth)` and takes its
/// timestamp from input sample `i + depth / 2`. The output is `depth`
/// samples shorter than the input.
pub struct MovingAverageFilter {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
    /// Display range, computed from the first output after a depth change
    range: Option<f32>,
    offset: f32,
}

impl MovingAverageFilter {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.insert(DEPTH, Parameter::int(Unit::SampleDepth, 0));
        Self {
            name: "moving_average".to_string(),
            params,
            outputs: OutputStreams::new(1),
            range: None,
            offset: 0.0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Vertical offset that centers the output in the display range
    pub fn display_offset(&self) -> f32 {
        self.offset
    }

    fn compute(&mut self, inputs: &InputSet) -> RefreshResult<AnalogWaveform> {
        let din = inputs.analog(0)?;
        let depth = self.params.int_val(DEPTH)?;
        if depth < 1 {
            return Err(RefreshError::InvalidParameter {
                name: DEPTH.to_string(),
                reason: "depth must be at least 1".to_string(),
            });
        }
        let depth = depth as usize;
        let len = din.len();
        if len < depth {
            return Err(RefreshError::InsufficientSamples {
                needed: depth,
                got: len,
            });
        }

        let nsamples = len - depth;
        let off = depth / 2;

        let mut prefix = Vec::with_capacity(len + 1);
        prefix.push(0.0f64);
        for &s in &din.samples {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + f64::from(s));
        }

        let mut cap = match self.outputs.take_reusable(0) {
            Some(WaveformData::Analog(w)) => w,
            _ => AnalogWaveform::new(1),
        };
        cap.dense_packed = false;
        cap.resize(nsamples);
        for i in 0..nsamples {
            cap.offsets[i] = din.offsets[i + off];
            cap.durations[i] = din.durations[i + off];
            cap.samples[i] = ((prefix[i + depth] - prefix[i]) / depth as f64) as f32;
        }

        cap.timescale = din.timescale;
        cap.start_timestamp = din.start_timestamp;
        cap.start_femtoseconds = din.start_femtoseconds;
        cap.trigger_phase = din.trigger_phase;
        Ok(cap)
    }

    fn update_display_range(&mut self, cap: &AnalogWaveform) {
        if self.range.is_some() || cap.is_empty() {
            return;
        }
        let (vmin, vmax) = cap
            .samples
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        self.range = Some((vmax - vmin) * 1.05);
        self.offset = -((vmax - vmin) / 2.0 + vmin);
        debug!("[{}] display range {:?}", self.name, self.range);
    }
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for MovingAverageFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "Moving average"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input("din", StreamKind::Analog, 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("dout", StreamKind::Analog, 0)]
    }

    fn refresh(&mut self, inputs: &InputSet) {
        let result = self.compute(inputs);
        if let Ok(cap) = &result {
            self.update_display_range(cap);
        }
        self.outputs.publish(&self.name, 0, result.map(WaveformData::Analog));
    }

    fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.outputs.get(stream)
    }

    fn needs_explicit_configuration(&self) -> bool {
        true
    }

    fn default_output_name(&self, input_names: &[String]) -> String {
        format!(
            "MovingAvg({}, {})",
            input_names.first().map(String::as_str).unwrap_or("NULL"),
            self.params.display(DEPTH)
        )
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn on_parameter_changed(&mut self, name: &str) {
        if name == DEPTH {
            self.range = None;
        }
    }

    fn display_range(&self, _stream: usize) -> Option<f32> {
        self.range
    }
}
