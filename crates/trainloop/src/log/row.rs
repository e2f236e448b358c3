//! Log rows and the values stored in them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A single value recorded in a log row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogValue {
    /// Explicit "nothing", used as the failure marker for save records
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
    Path(PathBuf),
    /// Several destinations written during the same iteration
    Paths(Vec<PathBuf>),
}

impl LogValue {
    /// Whether this is the explicit `None` marker
    pub fn is_none(&self) -> bool {
        matches!(self, LogValue::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LogValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LogValue::Float(value) => Some(*value),
            LogValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            LogValue::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Paths held by this value; a single path counts as one.
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            LogValue::Path(path) => std::slice::from_ref(path),
            LogValue::Paths(paths) => paths,
            _ => &[],
        }
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::None => write!(f, "None"),
            LogValue::Bool(value) => write!(f, "{}", value),
            LogValue::Int(value) => write!(f, "{}", value),
            LogValue::Float(value) => write!(f, "{:.4}", value),
            LogValue::Text(value) => write!(f, "{}", value),
            LogValue::Path(path) => write!(f, "{}", path.display()),
            LogValue::Paths(paths) => {
                let joined = paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({})", joined)
            }
        }
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        LogValue::Bool(value)
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        LogValue::Int(value)
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        LogValue::Float(value)
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        LogValue::Text(value)
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        LogValue::Text(value.to_string())
    }
}

impl From<PathBuf> for LogValue {
    fn from(value: PathBuf) -> Self {
        LogValue::Path(value)
    }
}

/// JSON has no NaN or infinity, so human-readable formats write non-finite
/// floats as the strings `"NaN"`, `"inf"` and `"-inf"`.
mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() || !serializer.is_human_readable() {
            return serializer.serialize_f64(*value);
        }
        let text = if value.is_nan() {
            "NaN"
        } else if value.is_sign_positive() {
            "inf"
        } else {
            "-inf"
        };
        serializer.serialize_str(text)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        if !deserializer.is_human_readable() {
            return f64::deserialize(deserializer);
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float {:?}", other))),
            },
        }
    }
}

/// A mapping of record names to values for one iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRow {
    records: BTreeMap<String, LogValue>,
}

impl LogRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&LogValue> {
        self.records.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Set a record, returning the previous value if there was one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<LogValue>,
    ) -> Option<LogValue> {
        self.records.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<LogValue> {
        self.records.remove(key)
    }

    /// True if `key` holds `Bool(true)`
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(LogValue::as_bool).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LogValue)> {
        self.records.iter()
    }
}
