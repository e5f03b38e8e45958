//! I/Q squelch: pass the signal only while its magnitude is above threshold

use std::sync::Arc;

use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{AnalogWaveform, StreamKind, WaveformData};

pub const THRESHOLD: &str = "Threshold";
pub const HOLD_TIME: &str = "Hold time";

/// Gates an I/Q pair on its magnitude
///
/// The gate opens on any sample with `|I,Q| > Threshold` and closes once no
/// such sample has been seen for longer than `Hold time`. Closed samples
/// read as zero on both outputs.
pub struct SquelchFilter {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
}

impl SquelchFilter {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.insert(THRESHOLD, Parameter::float(Unit::Volts, 0.01));
        params.insert(HOLD_TIME, Parameter::int(Unit::Femtoseconds, 1_000_000));
        Self {
            name: "squelch".to_string(),
            params,
            outputs: OutputStreams::new(2),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn compute(&self, inputs: &InputSet) -> RefreshResult<(AnalogWaveform, AnalogWaveform)> {
        let din_i = inputs.analog(0)?;
        let din_q = inputs.analog(1)?;
        let threshold = self.params.float_val(THRESHOLD)? as f32;
        let hold_fs = self.params.int_val(HOLD_TIME)?;
        if din_i.timescale <= 0 {
            return Err(RefreshError::InvalidParameter {
                name: "timescale".to_string(),
                reason: format!("input timescale {} is not positive", din_i.timescale),
            });
        }
        let hold_samples = (hold_fs / din_i.timescale).max(0) as usize;

        let len = din_i.len().min(din_q.len());
        let mut dout_i = timebase_prefix(din_i, len);
        let mut dout_q = timebase_prefix(din_q, len);

        let tsq = threshold * threshold;
        let mut open = false;
        let mut topen = 0usize;
        for i in 0..len {
            let vi = din_i.samples[i];
            let vq = din_q.samples[i];
            if vi * vi + vq * vq > tsq {
                open = true;
                topen = i;
            } else if open && i - topen > hold_samples {
                open = false;
            }

            let (oi, oq) = if open { (vi, vq) } else { (0.0, 0.0) };
            dout_i.samples.push(oi);
            dout_q.samples.push(oq);
        }
        Ok((dout_i, dout_q))
    }
}

/// Empty output sharing the first `len` timestamps of `din`
fn timebase_prefix(din: &AnalogWaveform, len: usize) -> AnalogWaveform {
    let mut out = AnalogWaveform::new(din.timescale);
    out.copy_timebase_from(din);
    out.dense_packed = din.dense_packed;
    out.offsets.extend_from_slice(&din.offsets[..len]);
    out.durations.extend_from_slice(&din.durations[..len]);
    out.samples.reserve(len);
    out
}

impl Default for SquelchFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for SquelchFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "Squelch"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::input("I", StreamKind::Analog, 0),
            PortSchema::input("Q", StreamKind::Analog, 1),
        ]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::output("I", StreamKind::Analog, 0),
            PortSchema::output("Q", StreamKind::Analog, 1),
        ]
    }

    fn refresh(&mut self, inputs: &InputSet) {
        match self.compute(inputs) {
            Ok((i, q)) => {
                self.outputs.publish(&self.name, 0, Ok(WaveformData::Analog(i)));
                self.outputs.publish(&self.name, 1, Ok(WaveformData::Analog(q)));
            }
            Err(e) => {
                self.outputs.publish(&self.name, 0, Err(e.clone()));
                self.outputs.publish(&self.name, 1, Err(e));
            }
        }
    }

    fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.outputs.get(stream)
    }

    fn needs_explicit_configuration(&self) -> bool {
        true
    }

    fn default_output_name(&self, input_names: &[String]) -> String {
        let name = |i: usize| input_names.get(i).map(String::as_str).unwrap_or("NULL");
        format!("Squelch({}, {})", name(0), name(1))
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::filter::FilterExt;

    fn run(filter: &mut SquelchFilter, i: Vec<f32>, q: Vec<f32>) -> Option<(Vec<f32>, Vec<f32>)> {
        filter.refresh(&InputSet::from_waveforms(vec![
            WaveformData::Analog(AnalogWaveform::from_dense(1000, i)),
            WaveformData::Analog(AnalogWaveform::from_dense(1000, q)),
        ]));
        let i = filter.output(0)?.as_analog()?.samples.clone();
        let q = filter.output(1)?.as_analog()?.samples.clone();
        Some((i, q))
    }

    #[test]
    fn test_gate_opens_and_holds() {
        let mut filter = SquelchFilter::new();
        // 1000 fs per sample, hold 2 samples
        filter.set_parameter_str(HOLD_TIME, "2000").unwrap();
        let i = vec![0.0, 0.5, 0.0, 0.0, 0.0, 0.001, 0.0];
        let q = vec![0.0, 0.0, 0.001, 0.002, 0.003, 0.0, 0.0];
        let (oi, oq) = run(&mut filter, i, q).unwrap();
        assert_eq!(oi, vec![0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(oq, vec![0.0, 0.0, 0.001, 0.002, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_output_length_is_shorter_input() {
        let (oi, oq) = run(&mut SquelchFilter::new(), vec![1.0; 5], vec![1.0; 3]).unwrap();
        assert_eq!(oi.len(), 3);
        assert_eq!(oq.len(), 3);
    }

    #[test]
    fn test_threshold_is_on_magnitude() {
        let mut filter = SquelchFilter::new();
        filter.set_parameter_str(THRESHOLD, "1 V").unwrap();
        filter.set_parameter_str(HOLD_TIME, "1000").unwrap();
        // |(0.8, 0.8)| > 1 even though neither component is
        let (oi, _) = run(&mut filter, vec![0.8, 0.5], vec![0.8, 0.5]).unwrap();
        assert_eq!(oi, vec![0.8, 0.5]);
        let (oi, _) = run(&mut filter, vec![0.8, 0.5, 0.5], vec![0.8, 0.5, 0.5]).unwrap();
        assert_eq!(oi, vec![0.8, 0.5, 0.0]);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let mut filter = SquelchFilter::new();
        filter.set_parameter_str(HOLD_TIME, "3000").unwrap();
        let i: Vec<f32> = (0..40).map(|n| if n % 9 == 0 { 0.5 } else { 0.001 }).collect();
        let q: Vec<f32> = (0..40).map(|n| (n as f32 * 0.3).cos() * 0.005).collect();
        let first = run(&mut filter, i.clone(), q.clone()).unwrap();
        let second = run(&mut filter, i, q).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_q_nulls_both_outputs() {
        let mut filter = SquelchFilter::new();
        filter.refresh(&InputSet::new(vec![
            Some(Arc::new(WaveformData::Analog(AnalogWaveform::from_dense(1, vec![1.0])))),
            None,
        ]));
        assert!(filter.output(0).is_none());
        assert!(filter.output(1).is_none());
    }
}
