//! Analog output synthesis from a characterized buffer model
//!
//! [`DriverFilter`] samples a digital data line on every clock edge and plays
//! the model's rising or falling V(t) table from each data transition,
//! producing the analog waveform the buffer would drive into its test
//! fixture.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::model::{Corner, DriverModel, ModelLibrary, ModelLoader};
use crate::runtime::errors::{RefreshError, RefreshResult};
use crate::runtime::filter::Filter;
use crate::runtime::parameter::{Parameter, ParameterSet, ParameterType, Unit};
use crate::runtime::ports::{InputSet, OutputStreams, PortSchema};
use crate::runtime::waveform::{
    sample_on_any_edges, AnalogWaveform, StreamKind, WaveformData, FS_PER_SECOND, SECONDS_PER_FS,
};

pub const SAMPLE_RATE: &str = "Sample Rate";
pub const FILE_PATH: &str = "File Path";
pub const MODEL_NAME: &str = "Model Name";
pub const CORNER: &str = "Corner";
pub const TERMINATION: &str = "Termination";

/// Loaded library and the model currently selected from it
#[derive(Default)]
struct ModelState {
    library: ModelLibrary,
    model: Option<Arc<DriverModel>>,
}

/// Running vertical extent of everything synthesized since the last reset
#[derive(Debug, Clone, Copy)]
struct Sweep {
    vmin: f32,
    vmax: f32,
    range: f32,
    offset: f32,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            vmin: f32::MAX,
            vmax: f32::MIN,
            range: 1.0,
            offset: 0.0,
        }
    }
}

/// Synthesizes a buffer's analog output from a digital data/clock pair
///
/// Inputs: "data" and "clk" (digital). Output: "dout" (analog), dense at
/// `Sample Rate`, starting at the first clock edge.
pub struct DriverFilter {
    name: String,
    params: ParameterSet,
    outputs: OutputStreams,
    loader: Arc<dyn ModelLoader>,
    state: RwLock<ModelState>,
    sweep: Sweep,
}

impl DriverFilter {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        let mut params = ParameterSet::new();
        params.insert(SAMPLE_RATE, Parameter::int(Unit::SampleRate, 100_000_000_000));
        params.insert(
            FILE_PATH,
            Parameter::file_name("*.ibs", "IBIS model files (*.ibs)"),
        );
        params.insert(MODEL_NAME, Parameter::new(ParameterType::Enum, Unit::Counts));
        let mut corner = Parameter::enumeration(Corner::ALL.map(|c| (c.name(), c.code())));
        corner.set_int_val(Corner::Typical.code());
        params.insert(CORNER, corner);
        params.insert(TERMINATION, Parameter::new(ParameterType::Enum, Unit::Counts));

        Self {
            name: "driver".to_string(),
            params,
            outputs: OutputStreams::new(1),
            loader,
            state: RwLock::new(ModelState::default()),
            sweep: Sweep::default(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Forget the vertical extent of earlier output
    pub fn clear_sweeps(&mut self) {
        self.sweep = Sweep::default();
    }

    /// Vertical offset that centers the synthesized output
    pub fn display_offset(&self) -> f32 {
        self.sweep.offset
    }

    /// Name of the selected model, if any
    pub fn model_name(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.model.as_ref().map(|m| m.name.clone())
    }

    // ── Parameter handlers ───────────────────────────────────────────────

    fn on_file_changed(&mut self) {
        let path = self
            .params
            .get(FILE_PATH)
            .map(|p| p.file_name_val().to_string())
            .unwrap_or_default();

        let library = if path.is_empty() {
            ModelLibrary::new()
        } else {
            match self.loader.load(Path::new(&path)) {
                Ok(library) => {
                    info!("[{}] Loaded {} models from {}", self.name, library.len(), path);
                    library
                }
                Err(e) => {
                    warn!("[{}] {}", self.name, e);
                    ModelLibrary::new()
                }
            }
        };

        let names: Vec<String> = library.driver_names().into_iter().map(String::from).collect();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.library = library;
            state.model = None;
        }

        // A previously chosen name that still exists stays selected
        let still_selected = match self.params.get_mut(MODEL_NAME) {
            Some(param) => {
                param.clear_enum_values();
                for (i, name) in names.iter().enumerate() {
                    param.add_enum_value(name.as_str(), i as i64);
                }
                param.reinterpret().is_ok()
            }
            None => false,
        };
        if still_selected {
            self.on_model_changed();
        }
        self.clear_sweeps();
    }

    fn on_model_changed(&mut self) {
        let selected = self
            .params
            .get(MODEL_NAME)
            .and_then(|p| p.enum_name(p.int_val()).map(String::from));

        let model = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let model = selected.as_deref().and_then(|name| state.library.get(name));
            state.model = model.clone();
            model
        };
        debug!("[{}] Selected model {:?}", self.name, selected);

        if let Some(param) = self.params.get_mut(TERMINATION) {
            param.clear_enum_values();
            for (i, curve) in model.iter().flat_map(|m| m.rising.iter()).enumerate() {
                let label = format!(
                    "{} to {}",
                    Unit::Ohms.pretty_print(f64::from(curve.fixture_resistance)),
                    Unit::Volts.pretty_print(f64::from(curve.fixture_voltage))
                );
                param.add_enum_value(label, i as i64);
            }
            if param.reinterpret().is_err() {
                param.set_int_val(0);
            }
        }
        self.clear_sweeps();
    }

    // ── Synthesis ────────────────────────────────────────────────────────

    fn synthesize(&mut self, inputs: &InputSet) -> RefreshResult<AnalogWaveform> {
        inputs.verify_all(2)?;
        let din = inputs.digital(0)?;
        let clk = inputs.digital(1)?;

        let model = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state.model.clone()
        }
        .ok_or(RefreshError::NoModel)?;

        let rate = self.params.int_val(SAMPLE_RATE)?;
        let period = if rate > 0 { FS_PER_SECOND / rate } else { 0 };
        if period <= 0 {
            return Err(RefreshError::InvalidParameter {
                name: SAMPLE_RATE.to_string(),
                reason: format!("{} S/s gives no usable sample period", rate),
            });
        }
        let corner = Corner::from_code(self.params.int_val(CORNER)?).ok_or_else(|| {
            RefreshError::InvalidParameter {
                name: CORNER.to_string(),
                reason: "unknown corner".to_string(),
            }
        })?;

        let termination = self.params.int_val(TERMINATION)?;
        let rising = usize::try_from(termination)
            .ok()
            .and_then(|i| model.rising.get(i))
            .ok_or_else(|| RefreshError::InvalidParameter {
                name: TERMINATION.to_string(),
                reason: format!("model {} has no termination {}", model.name, termination),
            })?;
        let falling = model
            .falling
            .iter()
            .find(|f| f.same_fixture(rising))
            .ok_or_else(|| RefreshError::InvalidParameter {
                name: TERMINATION.to_string(),
                reason: format!("model {} has no falling curve for this fixture", model.name),
            })?;
        let rising_delay = rising.propagation_delay(corner);
        let falling_delay = falling.propagation_delay(corner);

        let samples = sample_on_any_edges(din, clk);
        if samples.is_empty() {
            return Err(RefreshError::NoEdges);
        }
        let capstart = samples.offsets[0];
        let last = samples.len() - 1;
        let capend = samples.offsets[last] + samples.durations[last];
        let caplen = ((capend - capstart) / period).max(0) as usize;

        // (timestamp, rising) of every data transition
        let edges: Vec<(i64, bool)> = samples
            .samples
            .windows(2)
            .zip(&samples.offsets[1..])
            .filter(|(pair, _)| pair[0] != pair[1])
            .map(|(pair, &t)| (t, pair[1]))
            .collect();
        if edges.is_empty() {
            return Err(RefreshError::NoEdges);
        }

        let mut cap = match self.outputs.take_reusable(0) {
            Some(WaveformData::Analog(w)) => w,
            _ => AnalogWaveform::new_dense(period),
        };
        if !cap.dense_packed {
            cap.clear();
            cap.dense_packed = true;
        }
        cap.resize(caplen);
        cap.timescale = period;
        cap.trigger_phase = capstart;
        cap.start_timestamp = din.start_timestamp;
        cap.start_femtoseconds = din.start_femtoseconds;

        let delay = |is_rising: bool| if is_rising { rising_delay } else { falling_delay };
        let mut iedge = 0usize;
        for (i, out) in cap.samples.iter_mut().enumerate() {
            let tnow = period * i as i64 + capstart;

            // A new edge takes over once its buffer has started to move
            while let Some(&(t, dir)) = edges.get(iedge + 1) {
                if tnow < t + delay(dir) {
                    break;
                }
                iedge += 1;
            }

            let (tedge, dir) = edges[iedge];
            let rel = (tnow - tedge) as f64 * SECONDS_PER_FS;
            let curve = if dir { rising } else { falling };
            let v = curve.interpolate_voltage(corner, rel);

            self.sweep.vmin = self.sweep.vmin.min(v);
            self.sweep.vmax = self.sweep.vmax.max(v);
            *out = v;
        }

        let span = self.sweep.vmax - self.sweep.vmin;
        if span.is_finite() && span >= 0.0 {
            self.sweep.range = span * 1.05;
            self.sweep.offset = -(span / 2.0 + self.sweep.vmin);
        }

        debug!(
            "[{}] {} samples from {} edges, {} fs period",
            self.name,
            caplen,
            edges.len(),
            period
        );
        Ok(cap)
    }
}

impl Filter for DriverFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol_name(&self) -> &str {
        "IBIS Driver"
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![
            PortSchema::input("data", StreamKind::Digital, 0),
            PortSchema::input("clk", StreamKind::Digital, 1),
        ]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output("dout", StreamKind::Analog, 0)]
    }

    fn refresh(&mut self, inputs: &InputSet) {
        let result = self.synthesize(inputs).map(WaveformData::Analog);
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
            "IBIS({})",
            input_names.first().map(String::as_str).unwrap_or("NULL")
        )
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn on_parameter_changed(&mut self, name: &str) {
        match name {
            FILE_PATH => self.on_file_changed(),
            MODEL_NAME => self.on_model_changed(),
            _ => {}
        }
    }

    fn display_range(&self, _stream: usize) -> Option<f32> {
        Some(self.sweep.range)
    }
}
