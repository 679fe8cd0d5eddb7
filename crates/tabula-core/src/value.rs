use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::mode::ColumnMode;

/// A single cell value in one of the four native representations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Numeric(#[serde(with = "json_f64")] f64),
    Integer(i64),
    Text(String),
    DateTime(Option<NaiveDateTime>),
}

impl CellValue {
    /// The representation family this value belongs to
    pub fn storage_mode(&self) -> ColumnMode {
        match self {
            CellValue::Numeric(_) => ColumnMode::Numeric,
            CellValue::Integer(_) => ColumnMode::Integer,
            CellValue::Text(_) => ColumnMode::Text,
            CellValue::DateTime(_) => ColumnMode::DateTime,
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Numeric(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::DateTime(Some(value))
    }
}

impl From<CellValue> for ColumnData {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Numeric(x) => ColumnData::Numeric(vec![x]),
            CellValue::Integer(x) => ColumnData::Integer(vec![x]),
            CellValue::Text(x) => ColumnData::Text(vec![x]),
            CellValue::DateTime(x) => ColumnData::DateTime(vec![x]),
        }
    }
}

/// Homogeneous storage for one column; exactly one variant is active at a time.
///
/// Month, Day and DateTime modes share the `DateTime` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values")]
pub enum ColumnData {
    Numeric(#[serde(with = "json_f64::vec")] Vec<f64>),
    Integer(Vec<i64>),
    Text(Vec<String>),
    DateTime(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    /// Empty storage for `mode`
    pub fn empty(mode: ColumnMode) -> Self {
        Self::with_len(mode, 0)
    }

    /// Storage for `mode` holding `len` invalid/default values
    pub fn with_len(mode: ColumnMode, len: usize) -> Self {
        match mode {
            ColumnMode::Numeric => ColumnData::Numeric(vec![f64::NAN; len]),
            ColumnMode::Integer => ColumnData::Integer(vec![0; len]),
            ColumnMode::Text => ColumnData::Text(vec![String::new(); len]),
            ColumnMode::Month | ColumnMode::Day | ColumnMode::DateTime => {
                ColumnData::DateTime(vec![None; len])
            }
        }
    }

    /// The representation family, reported as the base mode of that family
    pub fn storage_mode(&self) -> ColumnMode {
        match self {
            ColumnData::Numeric(_) => ColumnMode::Numeric,
            ColumnData::Integer(_) => ColumnMode::Integer,
            ColumnData::Text(_) => ColumnMode::Text,
            ColumnData::DateTime(_) => ColumnMode::DateTime,
        }
    }

    /// True when values of this storage can back a column in `mode`
    pub fn fits(&self, mode: ColumnMode) -> bool {
        match self {
            ColumnData::DateTime(_) => mode.is_date_time(),
            other => other.storage_mode() == mode,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Integer(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::DateTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Option<CellValue> {
        match self {
            ColumnData::Numeric(v) => v.get(row).map(|x| CellValue::Numeric(*x)),
            ColumnData::Integer(v) => v.get(row).map(|x| CellValue::Integer(*x)),
            ColumnData::Text(v) => v.get(row).map(|x| CellValue::Text(x.clone())),
            ColumnData::DateTime(v) => v.get(row).map(|x| CellValue::DateTime(*x)),
        }
    }

    /// Copy of `count` values starting at `first`, clamped to the stored length
    pub fn slice(&self, first: usize, count: usize) -> ColumnData {
        let start = first.min(self.len());
        let end = first.saturating_add(count).min(self.len());
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(v[start..end].to_vec()),
            ColumnData::Integer(v) => ColumnData::Integer(v[start..end].to_vec()),
            ColumnData::Text(v) => ColumnData::Text(v[start..end].to_vec()),
            ColumnData::DateTime(v) => ColumnData::DateTime(v[start..end].to_vec()),
        }
    }

    /// Insert `count` default values before `before`
    pub fn insert_default(&mut self, before: usize, count: usize) {
        let defaults = ColumnData::with_len(self.storage_mode(), count);
        self.insert(before, defaults);
    }

    /// Insert `values` before `before`; ignored when the families differ
    pub fn insert(&mut self, before: usize, values: ColumnData) {
        match (self, values) {
            (ColumnData::Numeric(v), ColumnData::Numeric(new)) => {
                v.splice(before..before, new);
            }
            (ColumnData::Integer(v), ColumnData::Integer(new)) => {
                v.splice(before..before, new);
            }
            (ColumnData::Text(v), ColumnData::Text(new)) => {
                v.splice(before..before, new);
            }
            (ColumnData::DateTime(v), ColumnData::DateTime(new)) => {
                v.splice(before..before, new);
            }
            _ => {}
        }
    }

    /// Remove and return `count` values starting at `first`
    pub fn remove(&mut self, first: usize, count: usize) -> ColumnData {
        let range = first..first + count;
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(v.drain(range).collect()),
            ColumnData::Integer(v) => ColumnData::Integer(v.drain(range).collect()),
            ColumnData::Text(v) => ColumnData::Text(v.drain(range).collect()),
            ColumnData::DateTime(v) => ColumnData::DateTime(v.drain(range).collect()),
        }
    }

    /// Overwrite values starting at `first` with `values`, growing storage if it ends past
    /// the current length. Returns false when the families differ.
    pub fn overwrite(&mut self, first: usize, values: &ColumnData) -> bool {
        fn put<T: Clone>(dst: &mut Vec<T>, first: usize, src: &[T], fill: T) {
            let end = first + src.len();
            if dst.len() < end {
                dst.resize(end, fill);
            }
            dst[first..end].clone_from_slice(src);
        }

        match (self, values) {
            (ColumnData::Numeric(v), ColumnData::Numeric(src)) => put(v, first, src, f64::NAN),
            (ColumnData::Integer(v), ColumnData::Integer(src)) => put(v, first, src, 0),
            (ColumnData::Text(v), ColumnData::Text(src)) => put(v, first, src, String::new()),
            (ColumnData::DateTime(v), ColumnData::DateTime(src)) => put(v, first, src, None),
            _ => return false,
        }
        true
    }

    /// Write a single value; returns false when the families differ or `row` is out of range
    pub fn set(&mut self, row: usize, value: CellValue) -> bool {
        let written = match (self, value) {
            (ColumnData::Numeric(v), CellValue::Numeric(x)) => v.get_mut(row).map(|s| *s = x),
            (ColumnData::Integer(v), CellValue::Integer(x)) => v.get_mut(row).map(|s| *s = x),
            (ColumnData::Text(v), CellValue::Text(x)) => v.get_mut(row).map(|s| *s = x),
            (ColumnData::DateTime(v), CellValue::DateTime(x)) => v.get_mut(row).map(|s| *s = x),
            _ => None,
        };
        written.is_some()
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            ColumnData::Numeric(v) => v.truncate(len),
            ColumnData::Integer(v) => v.truncate(len),
            ColumnData::Text(v) => v.truncate(len),
            ColumnData::DateTime(v) => v.truncate(len),
        }
    }
}

/// JSON form of `f64`: NaN is `null`, the infinities are the strings `"inf"` and `"-inf"`
pub(crate) mod json_f64 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub const POSITIVE_INFINITY: &str = "inf";
    pub const NEGATIVE_INFINITY: &str = "-inf";

    pub fn to_value(value: f64) -> Value {
        if value.is_nan() {
            Value::Null
        } else if value == f64::INFINITY {
            Value::from(POSITIVE_INFINITY)
        } else if value == f64::NEG_INFINITY {
            Value::from(NEGATIVE_INFINITY)
        } else {
            Value::from(value)
        }
    }

    /// `None` unless `value` is a number, `null` or an infinity tag
    pub fn from_value(value: &Value) -> Option<f64> {
        match value {
            Value::Null => Some(f64::NAN),
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s == POSITIVE_INFINITY => Some(f64::INFINITY),
            Value::String(s) if s == NEGATIVE_INFINITY => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    fn parse<E: Error>(value: &Value) -> Result<f64, E> {
        from_value(value).ok_or_else(|| E::custom(format!("not a number: {}", value)))
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        to_value(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        parse(&Value::deserialize(deserializer)?)
    }

    pub mod vec {
        use super::*;

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|v| to_value(*v)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
            Vec::<Value>::deserialize(deserializer)?
                .iter()
                .map(|v| parse::<D::Error>(v))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_len_defaults() {
        assert!(matches!(ColumnData::with_len(ColumnMode::Numeric, 2), ColumnData::Numeric(v) if v.iter().all(|x| x.is_nan())));
        assert_eq!(ColumnData::with_len(ColumnMode::Integer, 2), ColumnData::Integer(vec![0, 0]));
        assert_eq!(ColumnData::with_len(ColumnMode::Month, 1), ColumnData::DateTime(vec![None]));
    }

    #[test]
    fn test_insert_remove_slice() {
        let mut data = ColumnData::Integer(vec![1, 2, 3]);
        data.insert_default(1, 2);
        assert_eq!(data, ColumnData::Integer(vec![1, 0, 0, 2, 3]));

        let removed = data.remove(0, 2);
        assert_eq!(removed, ColumnData::Integer(vec![1, 0]));
        assert_eq!(data.slice(1, 10), ColumnData::Integer(vec![2, 3]));
    }

    #[test]
    fn test_overwrite_grows_and_rejects_other_family() {
        let mut data = ColumnData::Text(vec!["a".into()]);
        assert!(data.overwrite(1, &ColumnData::Text(vec!["b".into(), "c".into()])));
        assert_eq!(data.len(), 3);
        assert!(!data.overwrite(0, &ColumnData::Integer(vec![1])));
    }

    #[test]
    fn test_set_checks_family_and_bounds() {
        let mut data = ColumnData::Numeric(vec![1.0]);
        assert!(data.set(0, CellValue::Numeric(2.0)));
        assert!(!data.set(1, CellValue::Numeric(2.0)));
        assert!(!data.set(0, CellValue::Integer(2)));
    }

    #[test]
    fn test_nan_round_trips_through_json() {
        let data = ColumnData::Numeric(vec![1.5, f64::NAN]);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"type":"Numeric","values":[1.5,null]}"#);

        let back: ColumnData = serde_json::from_str(&json).unwrap();
        match back {
            ColumnData::Numeric(v) => {
                assert_eq!(v[0], 1.5);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_infinities_round_trip_through_json() {
        let data = ColumnData::Numeric(vec![f64::INFINITY, f64::NEG_INFINITY, -1.0]);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"type":"Numeric","values":["inf","-inf",-1.0]}"#);

        let back: ColumnData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);

        let cell: CellValue = serde_json::from_str(r#"{"type":"Numeric","value":"-inf"}"#).unwrap();
        assert_eq!(cell, CellValue::Numeric(f64::NEG_INFINITY));
        assert!(serde_json::from_str::<ColumnData>(r#"{"type":"Numeric","values":["x"]}"#).is_err());
    }
}
