//! Timestamped waveform storage
//!
//! A [`Waveform`] is a sparse, variable-rate timeline: every sample carries an
//! explicit offset and duration, measured in units of `timescale`
//! femtoseconds. When a waveform is *dense packed* (`offset[i] == i`,
//! `duration[i] == 1`) consumers can skip the per-sample lookup and use index
//! arithmetic instead.

use std::fmt;

use crate::nodes::decoders::types::Symbol;

/// Femtoseconds per second, the base tick of every timestamp in the crate
pub const FS_PER_SECOND: i64 = 1_000_000_000_000_000;

/// Seconds per femtosecond
pub const SECONDS_PER_FS: f64 = 1e-15;

/// Timeline of samples with parallel offset / duration arrays
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform<T> {
    /// Femtoseconds represented by one offset unit
    pub timescale: i64,
    /// Wall-clock anchor of offset 0 (seconds since epoch)
    pub start_timestamp: i64,
    /// Sub-second part of the anchor, in femtoseconds
    pub start_femtoseconds: i64,
    /// Sub-tick correction applied to every sample, in femtoseconds
    pub trigger_phase: i64,
    /// `offsets[i] == i` and `durations[i] == 1` for every sample
    pub dense_packed: bool,
    pub offsets: Vec<i64>,
    pub durations: Vec<i64>,
    pub samples: Vec<T>,
}

pub type AnalogWaveform = Waveform<f32>;
pub type DigitalWaveform = Waveform<bool>;
pub type ProtocolWaveform = Waveform<Symbol>;

impl<T> Default for Waveform<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> Waveform<T> {
    /// Create an empty, sparse waveform
    pub fn new(timescale: i64) -> Self {
        Self {
            timescale,
            start_timestamp: 0,
            start_femtoseconds: 0,
            trigger_phase: 0,
            dense_packed: false,
            offsets: Vec::new(),
            durations: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Create an empty waveform that will be filled densely
    pub fn new_dense(timescale: i64) -> Self {
        Self {
            dense_packed: true,
            ..Self::new(timescale)
        }
    }

    /// Build a dense-packed waveform from a sample vector
    pub fn from_dense(timescale: i64, samples: Vec<T>) -> Self {
        let len = samples.len() as i64;
        Self {
            dense_packed: true,
            offsets: (0..len).collect(),
            durations: vec![1; samples.len()],
            samples,
            ..Self::new(timescale)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append one sample to a sparse waveform
    ///
    /// Streaming producers such as protocol decoders use this when the final
    /// length is not known in advance. Appending clears the dense-packed flag
    /// unless the new sample happens to extend the dense run.
    pub fn append_sample(&mut self, offset: i64, duration: i64, value: T) {
        if self.dense_packed && (offset != self.offsets.len() as i64 || duration != 1) {
            self.dense_packed = false;
        }
        self.offsets.push(offset);
        self.durations.push(duration);
        self.samples.push(value);
    }

    /// Copy the time base (scale, anchor, phase) from another waveform
    pub fn copy_timebase_from<U>(&mut self, other: &Waveform<U>) {
        self.timescale = other.timescale;
        self.start_timestamp = other.start_timestamp;
        self.start_femtoseconds = other.start_femtoseconds;
        self.trigger_phase = other.trigger_phase;
    }

    /// Absolute start time of sample `i` in femtoseconds, relative to the anchor
    #[inline]
    pub fn time_of(&self, i: usize) -> i64 {
        self.offsets[i] * self.timescale + self.trigger_phase
    }

    /// Absolute end time of sample `i` in femtoseconds
    #[inline]
    pub fn end_time_of(&self, i: usize) -> i64 {
        (self.offsets[i] + self.durations[i]) * self.timescale + self.trigger_phase
    }

    /// Drop all samples, keeping the time base
    pub fn clear(&mut self) {
        self.offsets.clear();
        self.durations.clear();
        self.samples.clear();
    }

    /// Check the structural invariants: parallel arrays of equal length,
    /// non-decreasing offsets, non-negative durations, and the dense-packed
    /// contract when the flag is set.
    pub fn is_consistent(&self) -> bool {
        let n = self.samples.len();
        if self.offsets.len() != n || self.durations.len() != n {
            return false;
        }
        if self.offsets.windows(2).any(|w| w[1] < w[0]) {
            return false;
        }
        if self.durations.iter().any(|&d| d < 0) {
            return false;
        }
        if self.dense_packed {
            return self
                .offsets
                .iter()
                .zip(&self.durations)
                .enumerate()
                .all(|(i, (&o, &d))| o == i as i64 && d == 1);
        }
        true
    }
}

impl<T: Clone + Default> Waveform<T> {
    /// Resize the three parallel arrays to `n` samples.
    ///
    /// Existing entries are preserved. When the waveform is dense packed the
    /// newly created slots get `offset = i, duration = 1` so the invariant
    /// keeps holding; sparse waveforms get zeroed slots for the caller to fill.
    pub fn resize(&mut self, n: usize) {
        let old = self.offsets.len();
        self.samples.resize(n, T::default());
        if self.dense_packed {
            self.offsets.truncate(n);
            self.durations.truncate(n);
            self.offsets.extend(old as i64..n as i64);
            self.durations.resize(n, 1);
        } else {
            self.offsets.resize(n, 0);
            self.durations.resize(n, 0);
        }
    }

    /// Prepare this waveform as the output of a uniform-stride resampling of
    /// `input` by `factor`, taking the dense-pack fast path when possible.
    ///
    /// Dense input: the output becomes dense packed and timestamps are only
    /// written for slots that are new or were previously sparse. Sparse
    /// input: every offset and duration is derived from the corresponding
    /// input sample divided by `factor`.
    pub fn fill_resampled_timebase<U>(&mut self, input: &Waveform<U>, factor: usize, outlen: usize) {
        let stride = factor as i64;
        if input.dense_packed {
            if !self.dense_packed {
                self.dense_packed = true;
                self.offsets.clear();
                self.durations.clear();
            }
            self.resize(outlen);
        } else {
            self.dense_packed = false;
            self.resize(outlen);
            for i in 0..outlen {
                self.offsets[i] = input.offsets[i * factor] / stride;
                self.durations[i] = input.durations[i * factor] / stride;
            }
        }
    }
}

/// Kind of data carried by a stream; what `validate_input` checks against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Analog,
    Digital,
    Protocol,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamKind::Analog => write!(f, "analog"),
            StreamKind::Digital => write!(f, "digital"),
            StreamKind::Protocol => write!(f, "protocol"),
        }
    }
}

/// A published waveform of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum WaveformData {
    Analog(AnalogWaveform),
    Digital(DigitalWaveform),
    Protocol(ProtocolWaveform),
}

impl WaveformData {
    pub fn kind(&self) -> StreamKind {
        match self {
            WaveformData::Analog(_) => StreamKind::Analog,
            WaveformData::Digital(_) => StreamKind::Digital,
            WaveformData::Protocol(_) => StreamKind::Protocol,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WaveformData::Analog(w) => w.len(),
            WaveformData::Digital(w) => w.len(),
            WaveformData::Protocol(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_analog(&self) -> Option<&AnalogWaveform> {
        match self {
            WaveformData::Analog(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_digital(&self) -> Option<&DigitalWaveform> {
        match self {
            WaveformData::Digital(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&ProtocolWaveform> {
        match self {
            WaveformData::Protocol(w) => Some(w),
            _ => None,
        }
    }

    pub fn into_analog(self) -> Option<AnalogWaveform> {
        match self {
            WaveformData::Analog(w) => Some(w),
            _ => None,
        }
    }
}

impl fmt::Display for WaveformData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Waveform[{}, samples={}]", self.kind(), self.len())
    }
}

/// Sample `data` on every edge (rising and falling) of `clock`.
///
/// The result has a 1 fs timescale: each sample starts at the absolute time
/// of a clock transition and lasts until the next one. The last sample lasts
/// until the end of the clock waveform.
pub fn sample_on_any_edges(data: &DigitalWaveform, clock: &DigitalWaveform) -> DigitalWaveform {
    let mut out = DigitalWaveform::new(1);
    out.start_timestamp = clock.start_timestamp;
    out.start_femtoseconds = clock.start_femtoseconds;
    if clock.is_empty() || data.is_empty() {
        return out;
    }

    let mut edges = Vec::new();
    let mut last = clock.samples[0];
    for i in 1..clock.len() {
        if clock.samples[i] != last {
            last = clock.samples[i];
            edges.push(clock.time_of(i));
        }
    }

    let mut idata = 0usize;
    for (n, &t) in edges.iter().enumerate() {
        while idata + 1 < data.len() && data.time_of(idata + 1) <= t {
            idata += 1;
        }
        if data.time_of(idata) > t {
            continue;
        }
        let end = edges
            .get(n + 1)
            .copied()
            .unwrap_or_else(|| clock.end_time_of(clock.len() - 1));
        out.append_sample(t, (end - t).max(0), data.samples[idata]);
    }
    out
}
