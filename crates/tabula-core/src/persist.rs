//! JSON save/load for a single column.
//!
//! Saving writes every attribute; loading is tolerant. Anything missing or malformed below
//! the top-level object is replaced by a default and reported as a [`LoadWarning`], so a
//! damaged file still yields a usable column.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::{Read, Write};

use crate::column::{Column, ColumnParts};
use crate::convert::DEFAULT_DATETIME_FORMAT;
use crate::error::{ColumnError, Result};
use crate::formula::GlobalFormula;
use crate::interval::{Interval, IntervalMap};
use crate::mode::{ColumnMode, PlotDesignation};
use crate::value::{json_f64, ColumnData};

/// Date-time layout used in saved files, independent of the column's display format
pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A recoverable problem found while loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadWarning {
    pub field: String,
    pub message: String,
}

impl LoadWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        let warning = Self {
            field: field.into(),
            message: message.into(),
        };
        tracing::warn!(field = %warning.field, "{}", warning.message);
        warning
    }
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Serialize)]
struct FormulaEntry<'a> {
    start: usize,
    end: usize,
    formula: &'a str,
}

impl Column {
    /// Serialize this column to a JSON value
    pub fn to_json_value(&self) -> Value {
        let masks: Vec<[usize; 2]> = self
            .masks()
            .intervals()
            .map(|iv| [iv.start, iv.end])
            .collect();
        let formulas: Vec<FormulaEntry<'_>> = self
            .formulas()
            .entries()
            .iter()
            .map(|(iv, formula)| FormulaEntry {
                start: iv.start,
                end: iv.end,
                formula,
            })
            .collect();
        let values: Vec<Value> = match self.data() {
            ColumnData::Numeric(v) => v.iter().map(|x| json_f64::to_value(*x)).collect(),
            ColumnData::Integer(v) => v.iter().map(|x| json!(x)).collect(),
            ColumnData::Text(v) => v.iter().map(|x| json!(x)).collect(),
            ColumnData::DateTime(v) => v
                .iter()
                .map(|x| match x {
                    Some(dt) => json!(dt.format(ISO_DATETIME_FORMAT).to_string()),
                    None => Value::Null,
                })
                .collect(),
        };

        json!({
            "name": self.name(),
            "mode": self.column_mode().code(),
            "plot_designation": self.plot_designation(),
            "datetime_format": self.datetime_format(),
            "masks": masks,
            "formulas": formulas,
            "global_formula": self.global_formula(),
            "values": Value::Array(values),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_value())?)
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.to_json_value())?;
        Ok(())
    }

    /// Parse a saved column, collecting warnings for every recovered defect
    pub fn from_json(text: &str) -> Result<(Column, Vec<LoadWarning>)> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(value)
    }

    pub fn load<R: Read>(reader: R) -> Result<(Column, Vec<LoadWarning>)> {
        let value: Value = serde_json::from_reader(reader)?;
        Self::from_json_value(value)
    }

    pub fn from_json_value(value: Value) -> Result<(Column, Vec<LoadWarning>)> {
        let Value::Object(object) = value else {
            return Err(ColumnError::Malformed(
                "top-level value is not an object".to_string(),
            ));
        };
        let mut warnings = Vec::new();

        let name = match object.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => {
                warnings.push(LoadWarning::new("name", "missing or not a string"));
                String::new()
            }
        };

        let mode = match object.get("mode").and_then(Value::as_i64) {
            Some(code) => match i32::try_from(code).ok().and_then(ColumnMode::from_code) {
                Some(mode) => mode,
                None => {
                    warnings.push(LoadWarning::new(
                        "mode",
                        format!("unknown mode {}, using numeric", code),
                    ));
                    ColumnMode::Numeric
                }
            },
            None => {
                warnings.push(LoadWarning::new("mode", "missing, using numeric"));
                ColumnMode::Numeric
            }
        };

        let plot_designation = optional::<PlotDesignation>(&object, "plot_designation", &mut warnings)
            .unwrap_or_default();
        let datetime_format = optional::<String>(&object, "datetime_format", &mut warnings)
            .unwrap_or_else(|| DEFAULT_DATETIME_FORMAT.to_string());
        let global_formula =
            optional::<Option<GlobalFormula>>(&object, "global_formula", &mut warnings).flatten();

        let data = read_values(object.get("values"), mode, &mut warnings);
        let masks = read_masks(object.get("masks"), &mut warnings);
        let formulas = read_formulas(object.get("formulas"), &mut warnings);

        let column = Column::from_parts(ColumnParts {
            name,
            mode,
            plot_designation,
            datetime_format,
            data,
            masks,
            formulas,
            global_formula,
        });
        Ok((column, warnings))
    }
}

/// Optional attribute: absent or null is silent, present but malformed warns
fn optional<T: for<'de> Deserialize<'de>>(
    object: &Map<String, Value>,
    field: &str,
    warnings: &mut Vec<LoadWarning>,
) -> Option<T> {
    let value = object.get(field).filter(|v| !v.is_null())?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warnings.push(LoadWarning::new(field, format!("ignored: {}", err)));
            None
        }
    }
}

fn read_values(values: Option<&Value>, mode: ColumnMode, warnings: &mut Vec<LoadWarning>) -> ColumnData {
    let Some(Value::Array(values)) = values else {
        warnings.push(LoadWarning::new("values", "missing or not an array"));
        return ColumnData::empty(mode);
    };

    let mut bad = |row: usize| {
        warnings.push(LoadWarning::new(
            format!("values[{}]", row),
            format!("malformed {} value, stored as invalid", mode),
        ));
    };

    match mode {
        ColumnMode::Numeric => ColumnData::Numeric(
            values
                .iter()
                .enumerate()
                .map(|(row, v)| {
                    json_f64::from_value(v).unwrap_or_else(|| {
                        bad(row);
                        f64::NAN
                    })
                })
                .collect(),
        ),
        ColumnMode::Integer => ColumnData::Integer(
            values
                .iter()
                .enumerate()
                .map(|(row, v)| {
                    v.as_i64().unwrap_or_else(|| {
                        bad(row);
                        0
                    })
                })
                .collect(),
        ),
        ColumnMode::Text => ColumnData::Text(
            values
                .iter()
                .enumerate()
                .map(|(row, v)| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    _ => {
                        bad(row);
                        String::new()
                    }
                })
                .collect(),
        ),
        ColumnMode::Month | ColumnMode::Day | ColumnMode::DateTime => ColumnData::DateTime(
            values
                .iter()
                .enumerate()
                .map(|(row, v)| match v {
                    Value::Null => None,
                    Value::String(s) => {
                        let parsed = NaiveDateTime::parse_from_str(s, ISO_DATETIME_FORMAT).ok();
                        if parsed.is_none() {
                            bad(row);
                        }
                        parsed
                    }
                    _ => {
                        bad(row);
                        None
                    }
                })
                .collect(),
        ),
    }
}

fn read_interval(value: &Value) -> Option<Interval> {
    let pair = value.as_array()?;
    match pair.as_slice() {
        [start, end] => Some(Interval::new(
            usize::try_from(start.as_u64()?).ok()?,
            usize::try_from(end.as_u64()?).ok()?,
        )),
        _ => None,
    }
}

fn read_masks(value: Option<&Value>, warnings: &mut Vec<LoadWarning>) -> IntervalMap<()> {
    let mut masks = IntervalMap::new();
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return masks;
    };
    let Some(entries) = value.as_array() else {
        warnings.push(LoadWarning::new("masks", "not an array, ignored"));
        return masks;
    };
    for (i, entry) in entries.iter().enumerate() {
        match read_interval(entry) {
            Some(iv) => masks.set(iv, ()),
            None => warnings.push(LoadWarning::new(
                format!("masks[{}]", i),
                "malformed interval skipped",
            )),
        }
    }
    masks
}

fn read_formulas(value: Option<&Value>, warnings: &mut Vec<LoadWarning>) -> IntervalMap<String> {
    #[derive(Deserialize)]
    struct Entry {
        start: usize,
        end: usize,
        formula: String,
    }

    let mut formulas = IntervalMap::new();
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return formulas;
    };
    let Some(entries) = value.as_array() else {
        warnings.push(LoadWarning::new("formulas", "not an array, ignored"));
        return formulas;
    };
    for (i, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Entry>(entry.clone()) {
            Ok(e) if !e.formula.is_empty() => {
                formulas.set(Interval::new(e.start, e.end), e.formula)
            }
            Ok(_) => {}
            Err(_) => warnings.push(LoadWarning::new(
                format!("formulas[{}]", i),
                "malformed interval skipped",
            )),
        }
    }
    formulas
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeDelta};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_save_load_round_trip() {
        let mut col = Column::numeric("speed", vec![1.5, f64::NAN, 3.0, 4.0]);
        col.set_masked(Interval::new(2, 3), true).unwrap();
        col.set_formula(Interval::new(0, 1), "x*2").unwrap();
        col.set_plot_designation(PlotDesignation::Y).unwrap();
        col.set_global_formula(Some(
            GlobalFormula::new("a+1").with_variable("a", "other").auto_update(true),
        ))
        .unwrap();

        let mut buffer = Vec::new();
        col.save(&mut buffer).unwrap();
        let (loaded, warnings) = Column::load(buffer.as_slice()).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(loaded.name(), "speed");
        assert_eq!(loaded.column_mode(), ColumnMode::Numeric);
        assert_eq!(loaded.plot_designation(), PlotDesignation::Y);
        assert_eq!(loaded.masked_intervals(), col.masked_intervals());
        assert_eq!(loaded.formulas(), col.formulas());
        assert_eq!(loaded.global_formula(), col.global_formula());
        assert_eq!(loaded.value_at(0), 1.5);
        assert!(loaded.value_at(1).is_nan());
        assert_eq!(loaded.row_count(), 4);
    }

    #[test]
    fn test_date_times_saved_as_iso_strings() {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 250)
            .unwrap();
        let mut col = Column::date_time("when", vec![Some(dt), None]);
        col.set_datetime_format("%d/%m/%Y").unwrap();

        let value = col.to_json_value();
        assert_eq!(value["values"], json!(["2023-12-31T23:59:58.250", null]));
        assert_eq!(value["mode"], json!(6));

        let (loaded, warnings) = Column::from_json_value(value).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(loaded.date_time_at(0), Some(dt));
        assert_eq!(loaded.date_time_at(1), None);
        assert_eq!(loaded.datetime_format(), "%d/%m/%Y");
    }

    #[test]
    fn test_load_recovers_with_warnings() {
        let text = r#"{
            "mode": 99,
            "values": [1, "oops", null],
            "masks": [[0, 1], "bad"],
            "plot_designation": "Sideways"
        }"#;
        let (col, warnings) = Column::from_json(text).unwrap();

        assert_eq!(col.column_mode(), ColumnMode::Numeric);
        assert_eq!(col.row_count(), 3);
        assert!(!col.is_valid(1));
        assert_eq!(col.masked_intervals(), vec![Interval::new(0, 1)]);

        let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["name", "mode", "plot_designation", "values[1]", "masks[1]"]
        );
    }

    #[test]
    fn test_load_rejects_non_object() {
        assert!(matches!(
            Column::from_json("[1, 2, 3]"),
            Err(ColumnError::Malformed(_))
        ));
        assert!(matches!(Column::from_json("{ nope"), Err(ColumnError::Json(_))));
    }

    #[test]
    fn test_masks_past_end_are_dropped() {
        let text = r#"{"name": "n", "mode": 24, "values": [1, 2], "masks": [[1, 5]]}"#;
        let (col, warnings) = Column::from_json(text).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(col.masked_intervals(), vec![Interval::single(1)]);
        assert_eq!(col.integer_at(1), 2);
    }

    #[test]
    fn test_infinities_survive_save_and_load() {
        let col = Column::numeric("x", vec![f64::INFINITY, -1.0, f64::NEG_INFINITY, f64::NAN]);
        let value = col.to_json_value();
        assert_eq!(value["values"], json!(["inf", -1.0, "-inf", null]));

        let (loaded, warnings) = Column::from_json_value(value).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(loaded.value_at(0), f64::INFINITY);
        assert!(loaded.is_valid(0));
        assert_eq!(loaded.value_at(2), f64::NEG_INFINITY);
        assert!(!loaded.is_valid(3));
    }

    #[test]
    fn test_text_integer_month_and_day_round_trip() {
        let columns = [
            Column::text("t", ["a", "", "c"]),
            Column::integer("n", vec![i64::MIN, 0, i64::MAX]),
            Column::with_data(
                "m",
                ColumnMode::Month,
                ColumnData::Numeric(vec![1.0, 12.0, f64::NAN]),
            ),
            Column::with_data("d", ColumnMode::Day, ColumnData::Numeric(vec![7.0, 1.0])),
        ];
        for col in columns {
            let (loaded, warnings) = Column::from_json(&col.to_json().unwrap()).unwrap();
            assert!(warnings.is_empty());
            assert_eq!(loaded.column_mode(), col.column_mode());
            assert_eq!(loaded.data(), col.data());
        }
    }

    fn same_data(a: &ColumnData, b: &ColumnData) -> bool {
        match (a, b) {
            (ColumnData::Numeric(a), ColumnData::Numeric(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            _ => a == b,
        }
    }

    fn column_data() -> impl Strategy<Value = (ColumnMode, ColumnData)> {
        let numbers = prop_oneof![
            4 => (-1_000_000i64..1_000_000).prop_map(|n| n as f64 / 64.0),
            1 => Just(f64::NAN),
            1 => Just(f64::INFINITY),
            1 => Just(f64::NEG_INFINITY),
        ];
        let date_times = proptest::option::of((-5_000_000_000_000i64..5_000_000_000_000).prop_map(
            |ms| {
                NaiveDate::from_ymd_opt(1900, 1, 1)
                    .unwrap()
                    .and_time(NaiveTime::MIN)
                    + TimeDelta::milliseconds(ms)
            },
        ));
        prop_oneof![
            prop::collection::vec(numbers, 0..20)
                .prop_map(|v| (ColumnMode::Numeric, ColumnData::Numeric(v))),
            prop::collection::vec(any::<i64>(), 0..20)
                .prop_map(|v| (ColumnMode::Integer, ColumnData::Integer(v))),
            prop::collection::vec(".{0,8}", 0..20)
                .prop_map(|v| (ColumnMode::Text, ColumnData::Text(v))),
            (
                prop::sample::select(vec![ColumnMode::Month, ColumnMode::Day, ColumnMode::DateTime]),
                prop::collection::vec(date_times, 0..20),
            )
                .prop_map(|(mode, v)| (mode, ColumnData::DateTime(v))),
        ]
    }

    proptest! {
        #[test]
        fn save_load_round_trips_every_mode(
            (mode, data) in column_data(),
            masks in prop::collection::vec((0usize..20, 0usize..4), 0..4),
            formulas in prop::collection::vec((0usize..20, 0usize..4, "[a-z]{1,4}"), 0..4),
            designation in prop::sample::select(vec![
                PlotDesignation::NoDesignation,
                PlotDesignation::X,
                PlotDesignation::YError,
            ]),
        ) {
            let mut col = Column::with_data("col", mode, data);
            let rows = col.row_count();
            for (start, len) in masks {
                if start + len < rows {
                    col.set_masked(Interval::new(start, start + len), true).unwrap();
                }
            }
            for (start, len, formula) in formulas {
                if start + len < rows {
                    col.set_formula(Interval::new(start, start + len), formula).unwrap();
                }
            }
            col.set_plot_designation(designation).unwrap();

            let mut buffer = Vec::new();
            col.save(&mut buffer).unwrap();
            let (loaded, warnings) = Column::load(buffer.as_slice()).unwrap();

            prop_assert!(warnings.is_empty());
            prop_assert_eq!(loaded.column_mode(), mode);
            prop_assert_eq!(loaded.plot_designation(), designation);
            prop_assert_eq!(loaded.row_count(), rows);
            prop_assert_eq!(loaded.masked_intervals(), col.masked_intervals());
            prop_assert_eq!(loaded.formulas(), col.formulas());
            prop_assert!(same_data(loaded.data(), col.data()));
        }
    }
}
