//! Characterized output buffer models
//!
//! A [`ModelLibrary`] is what a model file loader returns: named
//! [`DriverModel`]s, each holding rising and falling voltage-vs-time tables
//! measured into one or more test fixtures. Parsing model files is left to a
//! [`ModelLoader`] implementation supplied by the caller.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::runtime::waveform::FS_PER_SECOND;

/// Error type for model file loading
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Cannot read model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("No model library at {0}")]
    NotFound(PathBuf),
}

/// Process / voltage / temperature corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    Minimum,
    Typical,
    Maximum,
}

impl Corner {
    pub const ALL: [Corner; 3] = [Corner::Minimum, Corner::Typical, Corner::Maximum];

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            Corner::Minimum => "Minimum",
            Corner::Typical => "Typical",
            Corner::Maximum => "Maximum",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One point of a V(t) table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VtPoint {
    /// Seconds since the start of the transition
    pub time: f64,
    pub voltage: f32,
}

impl VtPoint {
    pub fn new(time: f64, voltage: f32) -> Self {
        Self { time, voltage }
    }
}

/// Voltage-vs-time response of one edge into one fixture, per corner
#[derive(Debug, Clone, PartialEq)]
pub struct VtCurves {
    pub fixture_resistance: f32,
    pub fixture_voltage: f32,
    curves: [Vec<VtPoint>; 3],
}

/// Voltage departure from the starting level that counts as "moving"
const DELAY_THRESHOLD_V: f32 = 0.01;

impl VtCurves {
    pub fn new(fixture_resistance: f32, fixture_voltage: f32) -> Self {
        Self {
            fixture_resistance,
            fixture_voltage,
            curves: Default::default(),
        }
    }

    /// Set the table for `corner`; points are sorted by time
    pub fn with_curve(mut self, corner: Corner, mut points: Vec<VtPoint>) -> Self {
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.curves[corner.index()] = points;
        self
    }

    pub fn curve(&self, corner: Corner) -> &[VtPoint] {
        &self.curves[corner.index()]
    }

    /// Linear interpolation of the table at `time` seconds. Times before the
    /// first point or after the last hold the end values.
    pub fn interpolate_voltage(&self, corner: Corner, time: f64) -> f32 {
        let curve = self.curve(corner);
        let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
            return 0.0;
        };
        if time <= first.time {
            return first.voltage;
        }
        if time >= last.time {
            return last.voltage;
        }

        let hi = curve.partition_point(|p| p.time <= time);
        let (a, b) = (curve[hi - 1], curve[hi]);
        let span = b.time - a.time;
        if span <= 0.0 {
            return b.voltage;
        }
        let frac = ((time - a.time) / span) as f32;
        a.voltage + (b.voltage - a.voltage) * frac
    }

    /// Time before the output starts to move, in femtoseconds
    pub fn propagation_delay(&self, corner: Corner) -> i64 {
        let curve = self.curve(corner);
        let Some(start) = curve.first() else {
            return 0;
        };
        curve
            .iter()
            .find(|p| (p.voltage - start.voltage).abs() > DELAY_THRESHOLD_V)
            .map(|p| (p.time * FS_PER_SECOND as f64).round() as i64)
            .unwrap_or(0)
    }

    /// Same test fixture as `other`, within 10 mΩ / 10 mV
    pub fn same_fixture(&self, other: &VtCurves) -> bool {
        (self.fixture_resistance - other.fixture_resistance).abs() < 0.01
            && (self.fixture_voltage - other.fixture_voltage).abs() < 0.01
    }
}

/// Buffer type declared by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Input,
    Output,
    InputOutput,
    OpenDrain,
    Terminator,
    Other,
}

impl ModelKind {
    /// Push-pull outputs and bidirectional buffers can drive a line
    pub fn can_drive(self) -> bool {
        matches!(self, ModelKind::Output | ModelKind::InputOutput)
    }
}

/// One named buffer model
#[derive(Debug, Clone, PartialEq)]
pub struct DriverModel {
    pub name: String,
    pub kind: ModelKind,
    pub rising: Vec<VtCurves>,
    pub falling: Vec<VtCurves>,
}

impl DriverModel {
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rising: Vec::new(),
            falling: Vec::new(),
        }
    }
}

/// Contents of one model file
#[derive(Debug, Clone, Default)]
pub struct ModelLibrary {
    models: BTreeMap<String, Arc<DriverModel>>,
}

impl ModelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: DriverModel) {
        self.models.insert(model.name.clone(), Arc::new(model));
    }

    pub fn get(&self, name: &str) -> Option<Arc<DriverModel>> {
        self.models.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Names of the models that can drive a line, sorted
    pub fn driver_names(&self) -> Vec<&str> {
        self.models
            .values()
            .filter(|m| m.kind.can_drive())
            .map(|m| m.name.as_str())
            .collect()
    }
}

/// Model file collaborator
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelLibrary, ModelError>;
}

/// Loader serving libraries registered in memory, keyed by path
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    libraries: HashMap<PathBuf, ModelLibrary>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, path: impl Into<PathBuf>, library: ModelLibrary) -> Self {
        self.libraries.insert(path.into(), library);
        self
    }
}

impl ModelLoader for InMemoryLoader {
    fn load(&self, path: &Path) -> Result<ModelLibrary, ModelError> {
        self.libraries
            .get(path)
            .cloned()
            .ok_or_else(|| ModelError::NotFound(path.to_path_buf()))
    }
}
