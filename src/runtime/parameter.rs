//! Typed, named filter parameters
//!
//! Parameters carry every non-waveform input of a filter: scalar settings,
//! file paths and enumerated choices. Each parameter keeps a list of
//! subscriber closures that are invoked synchronously at the end of every
//! setter. A subscriber must not call a setter on the same parameter.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use super::errors::ParameterError;

/// Storage type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    FileName,
    Enum,
    String,
}

/// Physical unit of a numeric parameter, used for display and parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Counts,
    SampleDepth,
    /// Stored in femtoseconds, displayed in seconds
    Femtoseconds,
    Hz,
    SampleRate,
    Volts,
    Ohms,
}

const SI_PREFIXES: [(f64, &str); 9] = [
    (1e12, "T"),
    (1e9, "G"),
    (1e6, "M"),
    (1e3, "k"),
    (1.0, ""),
    (1e-3, "m"),
    (1e-6, "µ"),
    (1e-9, "n"),
    (1e-12, "p"),
];

impl Unit {
    fn suffix(&self) -> &'static str {
        match self {
            Unit::Counts | Unit::SampleDepth => "",
            Unit::Femtoseconds => "s",
            Unit::Hz => "Hz",
            Unit::SampleRate => "S/s",
            Unit::Volts => "V",
            Unit::Ohms => "Ω",
        }
    }

    /// Stored units per displayed unit
    fn stored_per_display(&self) -> f64 {
        match self {
            Unit::Femtoseconds => 1e15,
            _ => 1.0,
        }
    }

    /// Format a stored value with an SI prefix, e.g. `1.5 MHz`, `50 Ω`
    pub fn pretty_print(&self, value: f64) -> String {
        if *self == Unit::Counts {
            return if value.fract() == 0.0 {
                format!("{}", value as i64)
            } else {
                format!("{}", value)
            };
        }

        let scaled = value / self.stored_per_display();
        let magnitude = scaled.abs();
        let (factor, prefix) = SI_PREFIXES
            .iter()
            .copied()
            .find(|(f, _)| magnitude >= *f)
            .unwrap_or((1.0, ""));
        let factor = if magnitude == 0.0 { 1.0 } else { factor };
        let prefix = if magnitude == 0.0 { "" } else { prefix };

        let mantissa = scaled / factor;
        let text = format!("{:.4}", mantissa);
        let text = text.trim_end_matches('0').trim_end_matches('.');
        let suffix = self.suffix();
        if prefix.is_empty() && suffix.is_empty() {
            text.to_string()
        } else {
            format!("{} {}{}", text, prefix, suffix)
        }
    }

    /// Parse a locale-invariant number with optional SI prefix and unit suffix.
    ///
    /// `"1.5M"`, `"1.5 MHz"` and `"1500000"` all parse to 1.5e6 for `Unit::Hz`.
    /// A bare number without the unit suffix is taken in stored units, so
    /// `"1000"` is 1000 fs while `"1 ps"` is also 1000 fs.
    pub fn parse(&self, text: &str) -> Option<f64> {
        let mut s = text.trim();
        let suffix = self.suffix();
        let mut scale = 1.0;
        if !suffix.is_empty() {
            if let Some(stripped) = s.strip_suffix(suffix) {
                s = stripped.trim_end();
                scale = self.stored_per_display();
            }
        }

        let split = s
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (number, rest) = s.split_at(split);
        let number: f64 = number.trim().parse().ok()?;

        let value = match rest.trim() {
            "" => number,
            "T" => number * 1e12,
            "G" => number * 1e9,
            "M" => number * 1e6,
            "k" | "K" => number * 1e3,
            "m" => number / 1e3,
            "u" | "µ" => number / 1e6,
            "n" => number / 1e9,
            "p" => number / 1e12,
            "f" => number / 1e15,
            _ => return None,
        };
        Some(value * scale)
    }
}

type Subscriber = Box<dyn FnMut(&Parameter) + Send>;

/// A single named filter parameter
pub struct Parameter {
    kind: ParameterType,
    unit: Unit,
    int_val: i64,
    float_val: f64,
    string: String,
    forward_enum: BTreeMap<String, i64>,
    reverse_enum: BTreeMap<i64, String>,
    /// Glob of accepted files for `FileName` parameters (e.g. `*.ibs`)
    pub file_filter_mask: String,
    /// Human-readable description of `file_filter_mask`
    pub file_filter_name: String,
    change_subscribers: Vec<Subscriber>,
    enum_subscribers: Vec<Subscriber>,
}

impl Parameter {
    pub fn new(kind: ParameterType, unit: Unit) -> Self {
        Self {
            kind,
            unit,
            int_val: 0,
            float_val: 0.0,
            string: String::new(),
            forward_enum: BTreeMap::new(),
            reverse_enum: BTreeMap::new(),
            file_filter_mask: String::new(),
            file_filter_name: String::new(),
            change_subscribers: Vec::new(),
            enum_subscribers: Vec::new(),
        }
    }

    /// Integer parameter with an initial value
    pub fn int(unit: Unit, value: i64) -> Self {
        let mut p = Self::new(ParameterType::Int, unit);
        p.set_int_val(value);
        p
    }

    /// Floating point parameter with an initial value
    pub fn float(unit: Unit, value: f64) -> Self {
        let mut p = Self::new(ParameterType::Float, unit);
        p.set_float_val(value);
        p
    }

    pub fn boolean(value: bool) -> Self {
        let mut p = Self::new(ParameterType::Bool, Unit::Counts);
        p.set_bool_val(value);
        p
    }

    pub fn file_name(mask: impl Into<String>, description: impl Into<String>) -> Self {
        let mut p = Self::new(ParameterType::FileName, Unit::Counts);
        p.file_filter_mask = mask.into();
        p.file_filter_name = description.into();
        p
    }

    /// Enum parameter with an initial table of `(name, code)` pairs
    pub fn enumeration<'a>(values: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        let mut p = Self::new(ParameterType::Enum, Unit::Counts);
        for (name, code) in values {
            p.add_enum_value(name, code);
        }
        p
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn bool_val(&self) -> bool {
        self.int_val != 0
    }

    pub fn int_val(&self) -> i64 {
        self.int_val
    }

    pub fn float_val(&self) -> f64 {
        self.float_val
    }

    pub fn file_name_val(&self) -> &str {
        &self.string
    }

    pub fn string_val(&self) -> &str {
        &self.string
    }

    // ── Setters ──────────────────────────────────────────────────────────

    pub fn set_bool_val(&mut self, b: bool) {
        self.int_val = i64::from(b);
        self.float_val = self.int_val as f64;
        self.string = if b { "1".into() } else { "0".into() };
        self.notify_changed();
    }

    pub fn set_int_val(&mut self, i: i64) {
        self.int_val = i;
        self.float_val = i as f64;
        self.string = self.reverse_enum.get(&i).cloned().unwrap_or_default();
        self.notify_changed();
    }

    pub fn set_float_val(&mut self, f: f64) {
        self.int_val = f as i64;
        self.float_val = f;
        self.string.clear();
        self.notify_changed();
    }

    pub fn set_file_name(&mut self, path: impl Into<String>) {
        self.int_val = 0;
        self.float_val = 0.0;
        self.string = path.into();
        self.notify_changed();
    }

    pub fn set_string_val(&mut self, s: impl Into<String>) {
        self.set_file_name(s);
    }

    /// Set the value from its locale-invariant string form.
    ///
    /// For enum parameters the name is kept even when it is not (yet) in the
    /// table so that [`Parameter::reinterpret`] can resolve it after the table
    /// is rebuilt; the numeric value is left untouched in that case.
    pub fn parse_string(&mut self, text: &str) -> Result<(), ParameterError> {
        match self.kind {
            ParameterType::Bool => {
                let b = matches!(text.trim(), "1" | "true");
                self.set_bool_val(b);
            }
            ParameterType::Float | ParameterType::Int => {
                let v = self.unit.parse(text).ok_or_else(|| ParameterError::Parse {
                    value: text.to_string(),
                    expected: "number",
                })?;
                self.float_val = v;
                self.int_val = v as i64;
                self.string.clear();
                self.notify_changed();
            }
            ParameterType::FileName | ParameterType::String => {
                self.set_file_name(text);
            }
            ParameterType::Enum => {
                self.string = text.to_string();
                let code = *self
                    .forward_enum
                    .get(text)
                    .ok_or_else(|| ParameterError::UnknownEnumName(text.to_string()))?;
                self.int_val = code;
                self.float_val = code as f64;
                self.notify_changed();
            }
        }
        Ok(())
    }

    /// Re-resolve the stored string (after the enum table changed)
    pub fn reinterpret(&mut self) -> Result<(), ParameterError> {
        let text = self.string.clone();
        self.parse_string(&text)
    }

    /// Locale-invariant form used for persistence. Enums persist their
    /// display name so saved files survive enum reordering.
    pub fn to_serialized(&self) -> String {
        match self.kind {
            ParameterType::Float => format!("{}", self.float_val),
            ParameterType::Int => format!("{}", self.int_val),
            ParameterType::Bool => if self.bool_val() { "1" } else { "0" }.to_string(),
            ParameterType::FileName | ParameterType::String => self.string.clone(),
            ParameterType::Enum => self
                .reverse_enum
                .get(&self.int_val)
                .cloned()
                .unwrap_or_else(|| self.string.clone()),
        }
    }

    // ── Enum table ───────────────────────────────────────────────────────

    pub fn add_enum_value(&mut self, name: impl Into<String>, code: i64) {
        let name = name.into();
        self.forward_enum.insert(name.clone(), code);
        self.reverse_enum.insert(code, name);
        self.notify_enums_changed();
    }

    pub fn clear_enum_values(&mut self) {
        self.forward_enum.clear();
        self.reverse_enum.clear();
        self.notify_enums_changed();
    }

    /// Enum display names, sorted
    pub fn enum_names(&self) -> Vec<&str> {
        self.forward_enum.keys().map(String::as_str).collect()
    }

    pub fn enum_code(&self, name: &str) -> Option<i64> {
        self.forward_enum.get(name).copied()
    }

    pub fn enum_name(&self, code: i64) -> Option<&str> {
        self.reverse_enum.get(&code).map(String::as_str)
    }

    // ── Notification ─────────────────────────────────────────────────────

    /// Subscribe to value changes
    pub fn on_change(&mut self, f: impl FnMut(&Parameter) + Send + 'static) {
        self.change_subscribers.push(Box::new(f));
    }

    /// Subscribe to enum table changes
    pub fn on_enums_changed(&mut self, f: impl FnMut(&Parameter) + Send + 'static) {
        self.enum_subscribers.push(Box::new(f));
    }

    fn notify_changed(&mut self) {
        let mut subscribers = std::mem::take(&mut self.change_subscribers);
        for s in subscribers.iter_mut() {
            s(self);
        }
        self.change_subscribers = subscribers;
    }

    fn notify_enums_changed(&mut self) {
        let mut subscribers = std::mem::take(&mut self.enum_subscribers);
        for s in subscribers.iter_mut() {
            s(self);
        }
        self.enum_subscribers = subscribers;
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ParameterType::Float => write!(f, "{}", self.unit.pretty_print(self.float_val)),
            ParameterType::Int => write!(f, "{}", self.unit.pretty_print(self.int_val as f64)),
            ParameterType::Bool => write!(f, "{}", self.bool_val()),
            ParameterType::FileName | ParameterType::String => write!(f, "{}", self.string),
            ParameterType::Enum => match self.reverse_enum.get(&self.int_val) {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{}", self.string),
            },
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("kind", &self.kind)
            .field("unit", &self.unit)
            .field("value", &self.to_serialized())
            .field("subscribers", &self.change_subscribers.len())
            .finish()
    }
}

/// The parameters of one filter, keyed by name
///
/// Names and types are fixed once the owning filter is constructed; only
/// values (and enum tables) change afterwards.
#[derive(Debug, Default)]
pub struct ParameterSet {
    params: HashMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    pub fn require(&self, name: &str) -> Result<&Parameter, ParameterError> {
        self.params
            .get(name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut Parameter, ParameterError> {
        self.params
            .get_mut(name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    pub fn int_val(&self, name: &str) -> Result<i64, ParameterError> {
        self.require(name).map(Parameter::int_val)
    }

    pub fn float_val(&self, name: &str) -> Result<f64, ParameterError> {
        self.require(name).map(Parameter::float_val)
    }

    pub fn bool_val(&self, name: &str) -> Result<bool, ParameterError> {
        self.require(name).map(Parameter::bool_val)
    }

    /// Display form of a parameter, empty if it does not exist
    pub fn display(&self, name: &str) -> String {
        self.params.get(name).map(|p| p.to_string()).unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Snapshot of every value as `(name → locale-invariant string)`
    pub fn to_serialized(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(name, p)| (name.clone(), p.to_serialized()))
            .collect()
    }

    /// Apply persisted values. Unknown names are skipped; values that fail
    /// to parse (including enum names missing from the current table) leave
    /// the prior value in place. Returns the names that were applied.
    pub fn load_serialized(&mut self, values: &BTreeMap<String, String>) -> Vec<String> {
        let mut applied = Vec::new();
        for (name, value) in values {
            let Some(param) = self.params.get_mut(name) else {
                debug!("Ignoring persisted value for unknown parameter '{}'", name);
                continue;
            };
            match param.parse_string(value) {
                Ok(()) => applied.push(name.clone()),
                Err(e) => warn!("Parameter '{}': {}, keeping previous value", name, e),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unit_parse_si_suffix() {
        assert_eq!(Unit::Hz.parse("1.5M"), Some(1.5e6));
        assert_eq!(Unit::Hz.parse("1.5 MHz"), Some(1.5e6));
        assert_eq!(Unit::Counts.parse("42"), Some(42.0));
        assert_eq!(Unit::Volts.parse("10 mV"), Some(0.01));
        assert_eq!(Unit::Counts.parse("abc"), None);
        // seconds in, femtoseconds stored
        let fs = Unit::Femtoseconds.parse("1 ns").unwrap();
        assert!((fs - 1e6).abs() < 1e-6);
        assert_eq!(Unit::Femtoseconds.parse("1000000"), Some(1e6));
    }

    #[test]
    fn test_unit_pretty_print() {
        assert_eq!(Unit::Counts.pretty_print(10.0), "10");
        assert_eq!(Unit::Hz.pretty_print(1.5e6), "1.5 MHz");
        assert_eq!(Unit::Ohms.pretty_print(50.0), "50 Ω");
        assert_eq!(Unit::Volts.pretty_print(0.0), "0 V");
        assert_eq!(Unit::SampleRate.pretty_print(1e11), "100 GS/s");
    }

    #[test]
    fn test_int_parse_accepts_si_prefix() {
        let mut p = Parameter::int(Unit::SampleRate, 0);
        p.parse_string("100G").unwrap();
        assert_eq!(p.int_val(), 100_000_000_000);
    }

    #[test]
    fn test_change_notification_is_synchronous() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let mut p = Parameter::int(Unit::Counts, 1);
        p.on_change(move |param| {
            assert_eq!(param.int_val(), 7);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        p.set_int_val(7);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enum_round_trip_by_name() {
        let mut p = Parameter::enumeration([("Minimum", 0), ("Typical", 1), ("Maximum", 2)]);
        p.set_int_val(2);
        assert_eq!(p.to_string(), "Maximum");
        assert_eq!(p.to_serialized(), "Maximum");

        p.parse_string("Minimum").unwrap();
        assert_eq!(p.int_val(), 0);
    }

    #[test]
    fn test_enum_notifies_table_changes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let mut p = Parameter::new(ParameterType::Enum, Unit::Counts);
        p.on_enums_changed(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        p.add_enum_value("a", 0);
        p.clear_enum_values();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(p.enum_names().is_empty());
    }

    #[test]
    fn test_load_unknown_enum_name_keeps_prior_value() {
        let mut set = ParameterSet::new();
        set.insert("Corner", Parameter::enumeration([("Typical", 1), ("Maximum", 2)]));
        set.get_mut("Corner").unwrap().set_int_val(2);

        let mut saved = BTreeMap::new();
        saved.insert("Corner".to_string(), "Sideways".to_string());
        let applied = set.load_serialized(&saved);

        assert!(applied.is_empty());
        assert_eq!(set.int_val("Corner").unwrap(), 2);
        assert_eq!(set.display("Corner"), "Maximum");
    }

    #[test]
    fn test_reinterpret_after_table_rebuild() {
        let mut p = Parameter::new(ParameterType::Enum, Unit::Counts);
        assert!(p.parse_string("ModelB").is_err());
        p.add_enum_value("ModelA", 0);
        p.add_enum_value("ModelB", 1);
        p.reinterpret().unwrap();
        assert_eq!(p.int_val(), 1);
    }

    #[test]
    fn test_serialized_round_trip() {
        let mut set = ParameterSet::new();
        set.insert("Factor", Parameter::int(Unit::Counts, 12));
        set.insert("AA", Parameter::boolean(false));
        set.insert("Threshold", Parameter::float(Unit::Volts, 0.25));

        let saved = set.to_serialized();
        assert_eq!(saved["Factor"], "12");
        assert_eq!(saved["AA"], "0");

        let mut other = ParameterSet::new();
        other.insert("Factor", Parameter::int(Unit::Counts, 1));
        other.insert("AA", Parameter::boolean(true));
        other.insert("Threshold", Parameter::float(Unit::Volts, 0.0));
        other.load_serialized(&saved);

        assert_eq!(other.int_val("Factor").unwrap(), 12);
        assert!(!other.bool_val("AA").unwrap());
        assert_eq!(other.float_val("Threshold").unwrap(), 0.25);
    }
}
