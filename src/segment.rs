//! Tagged values stored in the variable pool.
//!
//! A [`Segment`] is the unit of data a node produces: a string, a number, a
//! boolean, an object, or an array. Segments convert losslessly to and from
//! `serde_json::Value`, which is also how they serialize inside snapshots.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ============================================================================
// Segment
// ============================================================================

/// A tagged value stored at a selector in the variable pool.
#[derive(Clone, Debug)]
pub enum Segment {
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(FxHashMap<String, Segment>),
    ArrayString(Vec<String>),
    Array(Vec<Segment>),
}

/// Type markers exposed to node configuration and template tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    String,
    Number,
    Boolean,
    Object,
    ArrayString,
    Array,
    File,
    Any,
}

impl Segment {
    /// Convert to a `serde_json::Value`.
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => serde_json::json!(*i),
            Segment::Float(f) => serde_json::json!(*f),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => {
                let m: serde_json::Map<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), v.to_value())).collect();
                Value::Object(m)
            }
            Segment::ArrayString(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
            Segment::Array(v) => Value::Array(v.iter().map(Segment::to_value).collect()),
        }
    }

    /// Build a segment from a `serde_json::Value`.
    ///
    /// Arrays of strings collapse into `ArrayString`; everything else maps
    /// onto the obvious variant.
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => {
                if !arr.is_empty() && arr.iter().all(Value::is_string) {
                    Segment::ArrayString(
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    )
                } else {
                    Segment::Array(arr.iter().map(Segment::from_value).collect())
                }
            }
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        match self {
            Segment::None => SegmentType::Any,
            Segment::String(_) => SegmentType::String,
            Segment::Integer(_) | Segment::Float(_) => SegmentType::Number,
            Segment::Boolean(_) => SegmentType::Boolean,
            Segment::Object(_) => SegmentType::Object,
            Segment::ArrayString(_) => SegmentType::ArrayString,
            Segment::Array(_) => SegmentType::Array,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    /// Render the segment as user-facing text.
    ///
    /// Scalars render bare; containers render as compact JSON. This is the
    /// form the response coordinator forwards for scalar template
    /// references.
    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            other => serde_json::to_string(&other.to_value()).unwrap_or_default(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::None, Segment::None) => true,
            (Segment::String(a), Segment::String(b)) => a == b,
            (Segment::Integer(a), Segment::Integer(b)) => a == b,
            (Segment::Float(a), Segment::Float(b)) => (a - b).abs() < 1e-10,
            (Segment::Integer(a), Segment::Float(b)) | (Segment::Float(b), Segment::Integer(a)) => {
                (*a as f64 - b).abs() < 1e-10
            }
            (Segment::Boolean(a), Segment::Boolean(b)) => a == b,
            (Segment::ArrayString(a), Segment::ArrayString(b)) => a == b,
            _ => self.to_value() == other.to_value(),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl Serialize for Segment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        Ok(Segment::from_value(&v))
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::String(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::String(s)
    }
}

impl From<i64> for Segment {
    fn from(i: i64) -> Self {
        Segment::Integer(i)
    }
}

impl From<bool> for Segment {
    fn from(b: bool) -> Self {
        Segment::Boolean(b)
    }
}

// ============================================================================
// File values
// ============================================================================

/// Metadata describing a file referenced from the variable pool.
///
/// Files are stored as object segments so they survive JSON round-trips;
/// this struct is the typed view.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSegment {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileSegment {
    pub fn to_segment(&self) -> Segment {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        Segment::from_value(&value)
    }

    pub fn from_segment(seg: &Segment) -> Option<Self> {
        serde_json::from_value(seg.to_value()).ok()
    }
}
