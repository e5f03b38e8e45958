//! Decimation by an integer factor, with optional Gaussian anti-aliasing

use std::sync::Arc;

use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{AnalogWaveform, StreamKind, WaveformData};

pub const FACTOR: &str = "Downsample Factor";
pub const ANTIALIAS: &str = "Antialiasing Filter";

/// Normalized Gaussian low-pass kernel for decimating by `factor`.
///
/// `sigma = factor / sqrt(2 ln 2)` puts the -3 dB point at the new Nyquist
/// rate; the kernel extends `ceil(3 sigma)` taps either side of the center.
pub fn gaussian_kernel(factor: usize) -> Vec<f32> {
    let sigma = factor as f64 / (2.0 * std::f64::consts::LN_2).sqrt();
    let radius = (3.0 * sigma).ceil() as i64;
    let raw: Vec<f64> = (-radius..=radius)
        .map(|d| (-((d * d) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|k| (k / sum) as f32).collect()
}

/// Keeps every `factor`-th sample of an analog waveform
///
/// Input: "din" (analog). Output: "dout" (analog), timescale multiplied by
/// the factor.
pub struct DecimateFilter {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
}

impl DecimateFilter {
    pub fn new() -> Self {
        let mut params = ParameterSet::new();
        params.insert(FACTOR, Parameter::int(Unit::Counts, 10));
        params.insert(ANTIALIAS, Parameter::boolean(true));
        Self {
            name: "downsample".to_string(),
            params,
            outputs: OutputStreams::new(1),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn compute(&mut self, inputs: &InputSet) -> RefreshResult<WaveformData> {
        let din = inputs.analog(0)?;
        let factor = self.params.int_val(FACTOR)?;
        if factor < 1 {
            return Err(RefreshError::InvalidParameter {
                name: FACTOR.to_string(),
                reason: format!("factor {} is less than 1", factor),
            });
        }
        let timescale = din
            .timescale
            .checked_mul(factor)
            .ok_or_else(|| RefreshError::InvalidParameter {
                name: FACTOR.to_string(),
                reason: format!("factor {} overflows the output timescale", factor),
            })?;
        let factor = factor as usize;
        let antialias = self.params.bool_val(ANTIALIAS)?;
        let outlen = din.len() / factor;

        let mut cap = match self.outputs.take_reusable(0) {
            Some(WaveformData::Analog(w)) => w,
            _ => AnalogWaveform::new(1),
        };
        cap.fill_resampled_timebase(din, factor, outlen);

        // The kernel grows with the factor; skip it when nothing is produced
        if antialias && outlen > 0 {
            let kernel = gaussian_kernel(factor);
            let radius = (kernel.len() / 2) as isize;
            let len = din.len() as isize;
            for (i, out) in cap.samples.iter_mut().enumerate() {
                let base = (i * factor) as isize;
                // Taps past either end are skipped, not renormalized
                *out = kernel
                    .iter()
                    .enumerate()
                    .filter_map(|(k, &weight)| {
                        let pos = base + k as isize - radius;
                        (0..len).contains(&pos).then(|| din.samples[pos as usize] * weight)
                    })
                    .sum();
            }
        } else {
            for (i, out) in cap.samples.iter_mut().enumerate() {
                *out = din.samples[i * factor];
            }
        }

        cap.timescale = timescale;
        cap.start_timestamp = din.start_timestamp;
        cap.start_femtoseconds = din.start_femtoseconds;
        cap.trigger_phase = din.trigger_phase;
        Ok(WaveformData::Analog(cap))
    }
}

impl Default for DecimateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for DecimateFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "Downsample"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input("din", StreamKind::Analog, 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("dout", StreamKind::Analog, 0)]
    }

    fn refresh(&mut self, inputs: &InputSet) {
        let result = self.compute(inputs);
        self.outputs.publish(&self.name, 0, result);
    }

    fn output(&self, stream: usize) -> Option<Arc<WaveformData>> {
        self.outputs.get(stream)
    }

    fn needs_explicit_configuration(&self) -> bool {
        true
    }

    fn default_output_name(&self, input_names: &[String]) -> String {
        format!(
            "Downsample({}, {})",
            input_names.first().map(String::as_str).unwrap_or("NULL"),
            self.params.int_val(FACTOR).unwrap_or_default()
        )
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

    fn run(filter: &mut DecimateFilter, input: AnalogWaveform) -> Option<AnalogWaveform> {
        filter.refresh(&InputSet::from_waveforms(vec![WaveformData::Analog(input)]));
        filter.output(0).and_then(|w| w.as_analog().cloned())
    }

    fn plain(factor: &str) -> DecimateFilter {
        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, factor).unwrap();
        filter.set_parameter_str(ANTIALIAS, "0").unwrap();
        filter
    }

    #[test]
    fn test_plain_decimation_of_dense_input() {
        let input = AnalogWaveform::from_dense(100, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = run(&mut plain("2"), input).unwrap();
        assert_eq!(out.samples, vec![0.0, 2.0, 4.0]);
        assert!(out.dense_packed);
        assert_eq!(out.offsets, vec![0, 1, 2]);
        assert_eq!(out.timescale, 200);
        assert!(out.is_consistent());
    }

    #[test]
    fn test_sparse_input_divides_timestamps() {
        let mut input = AnalogWaveform::new(10);
        for i in 0..7 {
            input.append_sample(i * 6, 6, i as f32);
        }
        let out = run(&mut plain("3"), input).unwrap();
        assert!(!out.dense_packed);
        assert_eq!(out.samples, vec![0.0, 3.0]);
        assert_eq!(out.offsets, vec![0, 6]);
        assert_eq!(out.durations, vec![2, 2]);
        assert_eq!(out.timescale, 30);
    }

    #[test]
    fn test_length_law_both_paths() {
        for &(len, factor) in &[(10usize, 3usize), (9, 3), (5, 10), (100, 7)] {
            let input = AnalogWaveform::from_dense(1, vec![1.0; len]);

            let out = run(&mut plain(&factor.to_string()), input.clone()).unwrap();
            assert_eq!(out.len(), len / factor);

            let mut aa = DecimateFilter::new();
            aa.set_parameter_str(FACTOR, &factor.to_string()).unwrap();
            let out = run(&mut aa, input).unwrap();
            assert_eq!(out.len(), len / factor);
            assert_eq!(out.timescale, factor as i64);
        }
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(4);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(kernel.len() % 2, 1);
        let n = kernel.len();
        for i in 0..n / 2 {
            assert!((kernel[i] - kernel[n - 1 - i]).abs() < 1e-7);
        }
        assert!(kernel[n / 2] > kernel[0]);
    }

    #[test]
    fn test_antialiasing_passes_dc_in_the_interior() {
        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, "2").unwrap();
        let out = run(&mut filter, AnalogWaveform::from_dense(1, vec![1.0; 40])).unwrap();
        assert!((out.samples[10] - 1.0).abs() < 1e-4);
        // Edge windows lose the skipped taps
        assert!(out.samples[0] < 0.9);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let input = AnalogWaveform::from_dense(1, (0..50).map(|i| (i as f32).sin()).collect());
        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, "4").unwrap();
        let a = run(&mut filter, input.clone()).unwrap();
        let b = run(&mut filter, input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reuse_after_shrinking_keeps_dense_timestamps() {
        let mut filter = plain("2");
        run(&mut filter, AnalogWaveform::from_dense(1, vec![0.0; 20])).unwrap();
        let out = run(&mut filter, AnalogWaveform::from_dense(1, vec![0.0; 8])).unwrap();
        assert_eq!(out.offsets, vec![0, 1, 2, 3]);
        assert!(out.is_consistent());
    }

    #[test]
    fn test_antialiased_sparse_input_divides_timestamps() {
        let mut input = AnalogWaveform::new(10);
        for i in 0..8 {
            input.append_sample(i * 4, 4, 1.0);
        }
        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, "2").unwrap();
        let out = run(&mut filter, input).unwrap();
        assert!(!out.dense_packed);
        assert_eq!(out.len(), 4);
        assert_eq!(out.offsets, vec![0, 4, 8, 12]);
        assert_eq!(out.durations, vec![2, 2, 2, 2]);
        assert_eq!(out.timescale, 20);
        assert!(out.is_consistent());
    }

    #[test]
    fn test_overflowing_factor_gives_null_output() {
        let input = AnalogWaveform::from_dense(1_000_000, vec![0.0; 16]);
        let mut filter = plain("10T");
        assert!(run(&mut filter, input.clone()).is_none());

        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, "10T").unwrap();
        assert!(run(&mut filter, input).is_none());
    }

    #[test]
    fn test_factor_beyond_length_skips_kernel() {
        let mut filter = DecimateFilter::new();
        filter.set_parameter_str(FACTOR, "1G").unwrap();
        let out = run(&mut filter, AnalogWaveform::from_dense(1, vec![1.0; 16])).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.timescale, 1_000_000_000);
    }

    #[test]
    fn test_zero_factor_gives_null_output() {
        let mut filter = plain("0");
        assert!(run(&mut filter, AnalogWaveform::from_dense(1, vec![0.0; 4])).is_none());
    }
}
