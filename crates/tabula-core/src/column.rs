use bitvec::prelude::*;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;
use uuid::Uuid;

use crate::convert::{self, ConversionOptions, DEFAULT_DATETIME_FORMAT};
use crate::delta::{ColumnDelta, ColumnState};
use crate::error::{ColumnError, Result};
use crate::events::{ColumnEvent, EventKind, ListenerId, Listeners};
use crate::formula::GlobalFormula;
use crate::interval::{Interval, IntervalMap};
use crate::mode::{ColumnMode, PlotDesignation};
use crate::stats::{ColumnProperties, ColumnStatistics};
use crate::value::{CellValue, ColumnData};

/// Stable identity of a column, independent of its (mutable) name
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(Uuid);

impl ColumnId {
    pub fn new() -> Self {
        ColumnId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ColumnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct ColumnParts {
    pub name: String,
    pub mode: ColumnMode,
    pub plot_designation: PlotDesignation,
    pub datetime_format: String,
    pub data: ColumnData,
    pub masks: IntervalMap<()>,
    pub formulas: IntervalMap<String>,
    pub global_formula: Option<GlobalFormula>,
}

/// A named, typed, ordered sequence of cell values plus mask and formula metadata.
///
/// Reads never fail: asking for a representation the column does not hold yields that
/// representation's harmless default (NaN, `0`, `""`, `None`). Every mutation validates its
/// arguments up front, returns the [`ColumnDelta`] it applied, and is bracketed by an
/// "about to" / "changed" notification pair.
///
/// Cloning produces a detached snapshot with the same id and no listeners.
#[derive(Debug, Clone)]
pub struct Column {
    id: ColumnId,
    name: String,
    mode: ColumnMode,
    plot_designation: PlotDesignation,
    datetime_format: String,
    data: ColumnData,
    masks: IntervalMap<()>,
    formulas: IntervalMap<String>,
    global_formula: Option<GlobalFormula>,
    properties: OnceCell<ColumnProperties>,
    listeners: Listeners,
    destroyed: bool,
}

impl Column {
    /// Create an empty column in `mode`
    pub fn new(name: impl Into<String>, mode: ColumnMode) -> Self {
        Self::with_data(name, mode, ColumnData::empty(mode))
    }

    /// Create a column holding `data`, converting it when it does not fit `mode`
    pub fn with_data(name: impl Into<String>, mode: ColumnMode, data: ColumnData) -> Self {
        let data = if data.fits(mode) {
            data
        } else {
            let from = data.storage_mode();
            convert::convert(&data, from, mode, &ConversionOptions::default())
        };
        Self {
            id: ColumnId::new(),
            name: name.into(),
            mode,
            plot_designation: PlotDesignation::default(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            data,
            masks: IntervalMap::new(),
            formulas: IntervalMap::new(),
            global_formula: None,
            properties: OnceCell::new(),
            listeners: Listeners::new(),
            destroyed: false,
        }
    }

    /// Reassemble a column from persisted parts; masks and formulas past the end are dropped
    pub(crate) fn from_parts(parts: ColumnParts) -> Self {
        let mut column = Self::with_data(parts.name, parts.mode, parts.data);
        let rows = column.row_count();
        column.plot_designation = parts.plot_designation;
        column.datetime_format = parts.datetime_format;
        column.masks = parts.masks;
        column.masks.truncate(rows);
        column.formulas = parts.formulas;
        column.formulas.truncate(rows);
        column.global_formula = parts.global_formula;
        column
    }

    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::with_data(name, ColumnMode::Numeric, ColumnData::Numeric(values))
    }

    pub fn integer(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self::with_data(name, ColumnMode::Integer, ColumnData::Integer(values))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::with_data(name, ColumnMode::Text, ColumnData::Text(values))
    }

    pub fn date_time(name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> Self {
        Self::with_data(name, ColumnMode::DateTime, ColumnData::DateTime(values))
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_mode(&self) -> ColumnMode {
        self.mode
    }

    pub fn plot_designation(&self) -> PlotDesignation {
        self.plot_designation
    }

    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }

    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions::with_format(self.datetime_format.clone())
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_numeric(&self) -> bool {
        self.mode.is_numeric()
    }

    pub fn is_plottable(&self) -> bool {
        self.mode.is_plottable()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// Snapshot of everything a whole-column rewrite replaces
    pub fn state(&self) -> ColumnState {
        ColumnState {
            mode: self.mode,
            data: self.data.clone(),
            masks: self.masks.clone(),
            formulas: self.formulas.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Lenient typed reads
    // ------------------------------------------------------------------

    /// Double at `row`; NaN unless the column is Numeric
    pub fn value_at(&self, row: usize) -> f64 {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Integer at `row`; 0 unless the column is Integer
    pub fn integer_at(&self, row: usize) -> i64 {
        match &self.data {
            ColumnData::Integer(v) => v.get(row).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Text at `row`; empty unless the column is Text
    pub fn text_at(&self, row: usize) -> &str {
        match &self.data {
            ColumnData::Text(v) => v.get(row).map(String::as_str).unwrap_or(""),
            _ => "",
        }
    }

    /// Date-time at `row`; `None` unless the column is Month, Day or DateTime
    pub fn date_time_at(&self, row: usize) -> Option<NaiveDateTime> {
        match &self.data {
            ColumnData::DateTime(v) => v.get(row).copied().flatten(),
            _ => None,
        }
    }

    pub fn date_at(&self, row: usize) -> Option<NaiveDate> {
        self.date_time_at(row).map(|d| d.date())
    }

    pub fn time_at(&self, row: usize) -> Option<NaiveTime> {
        self.date_time_at(row).map(|d| d.time())
    }

    /// Value at `row` in whatever representation is active
    pub fn cell_at(&self, row: usize) -> Option<CellValue> {
        self.data.get(row)
    }

    /// Numeric reading of any numeric or date-time mode: integers widen, date-times map to
    /// month number, weekday number or fractional days per mode. Text reads NaN.
    pub fn numeric_at(&self, row: usize) -> f64 {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().unwrap_or(f64::NAN),
            ColumnData::Integer(v) => v.get(row).map_or(f64::NAN, |x| *x as f64),
            ColumnData::DateTime(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(f64::NAN, |d| convert::date_time_number(d, self.mode)),
            ColumnData::Text(_) => f64::NAN,
        }
    }

    /// False when `row` holds the mode's invalid sentinel or lies past the end
    pub fn is_valid(&self, row: usize) -> bool {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).is_some_and(|x| !x.is_nan()),
            ColumnData::Integer(v) => row < v.len(),
            ColumnData::Text(v) => v.get(row).is_some_and(|s| !s.is_empty()),
            ColumnData::DateTime(v) => v.get(row).is_some_and(Option::is_some),
        }
    }

    /// Bitmap of rows that are valid and not masked
    pub fn valid_rows(&self) -> BitVec {
        let mut bits = bitvec![0; self.row_count()];
        for row in 0..self.row_count() {
            if self.is_valid(row) && !self.is_masked(row) {
                bits.set(row, true);
            }
        }
        bits
    }

    fn usable_values(&self) -> impl Iterator<Item = f64> + '_ {
        let rows: Vec<usize> = self.valid_rows().iter_ones().collect();
        rows.into_iter().map(move |row| self.numeric_at(row))
    }

    // ------------------------------------------------------------------
    // Masks and formulas (reads)
    // ------------------------------------------------------------------

    pub fn is_masked(&self, row: usize) -> bool {
        self.masks.contains(row)
    }

    /// True when every row of `interval` is masked
    pub fn is_interval_masked(&self, interval: Interval) -> bool {
        self.masks.covers(interval)
    }

    pub fn masked_intervals(&self) -> Vec<Interval> {
        self.masks.intervals().collect()
    }

    pub fn masks(&self) -> &IntervalMap<()> {
        &self.masks
    }

    pub fn formula_at(&self, row: usize) -> Option<&str> {
        self.formulas.get(row).map(String::as_str)
    }

    pub fn formula_intervals(&self) -> Vec<Interval> {
        self.formulas.intervals().collect()
    }

    pub fn formulas(&self) -> &IntervalMap<String> {
        &self.formulas
    }

    pub fn global_formula(&self) -> Option<&GlobalFormula> {
        self.global_formula.as_ref()
    }

    // ------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------

    /// Statistics over valid, unmasked rows of a Numeric or Integer column
    pub fn statistics(&self) -> ColumnStatistics {
        if !self.is_numeric() {
            return ColumnStatistics::default();
        }
        let values: Vec<f64> = self.usable_values().collect();
        ColumnStatistics::compute(&values)
    }

    /// Ordering flags of a plottable column, cached until the next mutation
    pub fn properties(&self) -> ColumnProperties {
        *self.properties.get_or_init(|| {
            if self.is_plottable() {
                ColumnProperties::scan(self.usable_values())
            } else {
                ColumnProperties::default()
            }
        })
    }

    pub fn minimum(&self) -> f64 {
        self.usable_values()
            .fold(f64::NAN, |acc, x| if acc.is_nan() || x < acc { x } else { acc })
    }

    pub fn maximum(&self) -> f64 {
        self.usable_values()
            .fold(f64::NAN, |acc, x| if acc.is_nan() || x > acc { x } else { acc })
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register a listener for every event
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&Column, &ColumnEvent) + Send + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(None, Box::new(listener))
    }

    /// Register a listener for one kind of event
    pub fn subscribe_to(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&Column, &ColumnEvent) + Send + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(Some(kind), Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&mut self, event: ColumnEvent) {
        let mut listeners = std::mem::take(&mut self.listeners);
        listeners.dispatch(self, &event);
        self.listeners = listeners;
    }

    /// First phase of teardown: announce destruction, drop observers and outgoing formula
    /// references. Every later mutation fails with [`ColumnError::Destroyed`].
    pub fn prepare_for_destruction(&mut self) {
        if self.destroyed {
            return;
        }
        tracing::debug!(column = %self.name, "preparing for destruction");
        self.notify(ColumnEvent::AboutToBeDestroyed);
        self.listeners.clear();
        self.global_formula = None;
        self.destroyed = true;
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(ColumnError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row < self.row_count() {
            Ok(())
        } else {
            Err(ColumnError::RowOutOfRange {
                row,
                row_count: self.row_count(),
            })
        }
    }

    /// `count` rows starting at `first` must already exist
    fn check_span(&self, first: usize, count: usize) -> Result<()> {
        match count {
            0 if first <= self.row_count() => Ok(()),
            0 => self.check_row(first),
            _ => match first.checked_add(count - 1) {
                Some(last) => self.check_row(last),
                None => Err(ColumnError::RowOutOfRange {
                    row: first,
                    row_count: self.row_count(),
                }),
            },
        }
    }

    fn check_interval(&self, interval: Interval) -> Result<()> {
        if interval.end < self.row_count() {
            Ok(())
        } else {
            Err(ColumnError::IntervalOutOfRange {
                start: interval.start,
                end: interval.end,
                row_count: self.row_count(),
            })
        }
    }

    fn check_family(&self, values: ColumnMode) -> Result<()> {
        if self.data.storage_mode() == values {
            Ok(())
        } else {
            Err(ColumnError::ModeMismatch {
                expected: values,
                actual: self.mode,
            })
        }
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    fn commit(&mut self, delta: ColumnDelta) -> Result<ColumnDelta> {
        if !delta.is_noop() {
            self.run(&delta, true);
        }
        Ok(delta)
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        let delta = ColumnDelta::Name {
            old: self.name.clone(),
            new: name.into(),
        };
        self.commit(delta)
    }

    pub fn set_plot_designation(&mut self, designation: PlotDesignation) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.commit(ColumnDelta::PlotDesignation {
            old: self.plot_designation,
            new: designation,
        })
    }

    pub fn set_datetime_format(&mut self, format: impl Into<String>) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.commit(ColumnDelta::DateTimeFormat {
            old: self.datetime_format.clone(),
            new: format.into(),
        })
    }

    /// Switch mode, rewriting every value into the new representation
    pub fn set_column_mode(&mut self, mode: ColumnMode) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        let new_data = convert::convert(&self.data, self.mode, mode, &self.conversion_options());
        tracing::debug!(
            column = %self.name,
            from = %self.mode,
            to = %mode,
            rows = self.row_count(),
            "converting column mode"
        );
        self.commit(ColumnDelta::Mode {
            old_mode: self.mode,
            new_mode: mode,
            old_data: self.data.clone(),
            new_data,
        })
    }

    /// Write one cell; the value's representation must match the active one
    pub fn set_cell(&mut self, row: usize, value: CellValue) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.check_family(value.storage_mode())?;
        self.check_row(row)?;
        self.commit(ColumnDelta::Values {
            first: row,
            old: self.data.slice(row, 1),
            new: ColumnData::from(value),
            old_formulas: self.formulas.slice(Interval::single(row)),
        })
    }

    pub fn set_value_at(&mut self, row: usize, value: f64) -> Result<ColumnDelta> {
        self.set_cell(row, CellValue::Numeric(value))
    }

    pub fn set_integer_at(&mut self, row: usize, value: i64) -> Result<ColumnDelta> {
        self.set_cell(row, CellValue::Integer(value))
    }

    pub fn set_text_at(&mut self, row: usize, value: impl Into<String>) -> Result<ColumnDelta> {
        self.set_cell(row, CellValue::Text(value.into()))
    }

    pub fn set_date_time_at(&mut self, row: usize, value: Option<NaiveDateTime>) -> Result<ColumnDelta> {
        self.set_cell(row, CellValue::DateTime(value))
    }

    /// Replace the date part of `row`, keeping its time (midnight when the row is invalid)
    pub fn set_date_at(&mut self, row: usize, date: NaiveDate) -> Result<ColumnDelta> {
        let time = self.time_at(row).unwrap_or(NaiveTime::MIN);
        self.set_date_time_at(row, Some(date.and_time(time)))
    }

    /// Replace the time part of `row`, keeping its date (1900-01-01 when the row is invalid)
    pub fn set_time_at(&mut self, row: usize, time: NaiveTime) -> Result<ColumnDelta> {
        let date = self.date_at(row).unwrap_or_else(convert::epoch_date);
        self.set_date_time_at(row, Some(date.and_time(time)))
    }

    /// Overwrite existing rows starting at `first`; never grows the column
    pub fn replace_data(&mut self, first: usize, values: ColumnData) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.check_family(values.storage_mode())?;
        self.check_span(first, values.len())?;
        let old_formulas = match Interval::from_count(first, values.len()) {
            Some(range) => self.formulas.slice(range),
            None => Vec::new(),
        };
        self.commit(ColumnDelta::Values {
            first,
            old: self.data.slice(first, values.len()),
            new: values,
            old_formulas,
        })
    }

    pub fn replace_values(&mut self, first: usize, values: Vec<f64>) -> Result<ColumnDelta> {
        self.replace_data(first, ColumnData::Numeric(values))
    }

    pub fn replace_integers(&mut self, first: usize, values: Vec<i64>) -> Result<ColumnDelta> {
        self.replace_data(first, ColumnData::Integer(values))
    }

    pub fn replace_texts(&mut self, first: usize, values: Vec<String>) -> Result<ColumnDelta> {
        self.replace_data(first, ColumnData::Text(values))
    }

    pub fn replace_date_times(
        &mut self,
        first: usize,
        values: Vec<Option<NaiveDateTime>>,
    ) -> Result<ColumnDelta> {
        self.replace_data(first, ColumnData::DateTime(values))
    }

    /// Insert `count` invalid rows before row `before` (`before == row_count` appends)
    pub fn insert_rows(&mut self, before: usize, count: usize) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        if before > self.row_count() || self.row_count().checked_add(count).is_none() {
            return Err(ColumnError::RowOutOfRange {
                row: before,
                row_count: self.row_count(),
            });
        }
        self.commit(ColumnDelta::InsertRows { before, count })
    }

    pub fn remove_rows(&mut self, first: usize, count: usize) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.check_span(first, count)?;
        let (masks, formulas) = match Interval::from_count(first, count) {
            Some(range) => (
                self.masks.slice(range).into_iter().map(|(iv, _)| iv).collect(),
                self.formulas.slice(range),
            ),
            None => (Vec::new(), Vec::new()),
        };
        self.commit(ColumnDelta::RemoveRows {
            first,
            count,
            values: self.data.slice(first, count),
            masks,
            formulas,
        })
    }

    pub fn set_masked(&mut self, interval: Interval, masked: bool) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.check_interval(interval)?;
        let mut new = self.masks.clone();
        if masked {
            new.set(interval, ());
        } else {
            new.remove(interval);
        }
        self.commit(ColumnDelta::Masks {
            old: self.masks.clone(),
            new,
        })
    }

    pub fn set_masked_row(&mut self, row: usize, masked: bool) -> Result<ColumnDelta> {
        self.set_masked(Interval::single(row), masked)
    }

    pub fn clear_masks(&mut self) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.commit(ColumnDelta::Masks {
            old: self.masks.clone(),
            new: IntervalMap::new(),
        })
    }

    /// Annotate `interval` with formula text; empty text clears the annotation
    pub fn set_formula(&mut self, interval: Interval, formula: impl Into<String>) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.check_interval(interval)?;
        let formula = formula.into();
        let mut new = self.formulas.clone();
        if formula.is_empty() {
            new.remove(interval);
        } else {
            new.set(interval, formula);
        }
        self.commit(ColumnDelta::Formulas {
            old: self.formulas.clone(),
            new,
        })
    }

    pub fn set_formula_row(&mut self, row: usize, formula: impl Into<String>) -> Result<ColumnDelta> {
        self.set_formula(Interval::single(row), formula)
    }

    pub fn clear_formulas(&mut self) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.commit(ColumnDelta::Formulas {
            old: self.formulas.clone(),
            new: IntervalMap::new(),
        })
    }

    /// Store the global formula descriptor. Dependency checks live with the registry that
    /// resolves variable columns.
    pub fn set_global_formula(&mut self, formula: Option<GlobalFormula>) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        self.commit(ColumnDelta::GlobalFormula {
            old: self.global_formula.clone(),
            new: formula,
        })
    }

    /// Remove every row
    pub fn clear(&mut self) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        let new = ColumnState {
            mode: self.mode,
            data: ColumnData::empty(self.mode),
            masks: IntervalMap::new(),
            formulas: IntervalMap::new(),
        };
        self.commit(ColumnDelta::Replace {
            old: Box::new(self.state()),
            new: Box::new(new),
        })
    }

    /// Replace the whole value sequence, switching to `mode`. Masks and formulas past the new
    /// end are dropped.
    pub fn replace_all(&mut self, mode: ColumnMode, data: ColumnData) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        if !data.fits(mode) {
            return Err(ColumnError::ModeMismatch {
                expected: mode,
                actual: data.storage_mode(),
            });
        }
        let mut masks = self.masks.clone();
        masks.truncate(data.len());
        let mut formulas = self.formulas.clone();
        formulas.truncate(data.len());
        tracing::debug!(column = %self.name, rows = data.len(), %mode, "replacing all values");
        self.commit(ColumnDelta::Replace {
            old: Box::new(self.state()),
            new: Box::new(ColumnState {
                mode,
                data,
                masks,
                formulas,
            }),
        })
    }

    /// Copy values, masks and formulas of `source`; both columns must share a mode
    pub fn copy_from(&mut self, source: &Column) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        if source.mode != self.mode {
            return Err(ColumnError::ModeMismatch {
                expected: self.mode,
                actual: source.mode,
            });
        }
        self.commit(ColumnDelta::Replace {
            old: Box::new(self.state()),
            new: Box::new(source.state()),
        })
    }

    /// Copy `count` rows of `source` starting at `source_start` into this column at
    /// `dest_start`, growing it when the copy ends past the last row
    pub fn copy_range(
        &mut self,
        source: &Column,
        source_start: usize,
        dest_start: usize,
        count: usize,
    ) -> Result<ColumnDelta> {
        self.ensure_alive()?;
        if source.mode != self.mode {
            return Err(ColumnError::ModeMismatch {
                expected: self.mode,
                actual: source.mode,
            });
        }
        source.check_span(source_start, count)?;
        if dest_start > self.row_count() {
            return Err(ColumnError::RowOutOfRange {
                row: dest_start,
                row_count: self.row_count(),
            });
        }
        let (Some(src_range), Some(dest_range)) = (
            Interval::from_count(source_start, count),
            Interval::from_count(dest_start, count),
        ) else {
            return self.commit(ColumnDelta::Values {
                first: dest_start,
                old: ColumnData::empty(self.mode),
                new: ColumnData::empty(self.mode),
                old_formulas: Vec::new(),
            });
        };

        let mut new = self.state();
        new.data.overwrite(dest_start, &source.data.slice(source_start, count));
        new.masks.remove(dest_range);
        for (iv, _) in source.masks.slice(src_range) {
            let shifted = Interval::new(iv.start - source_start + dest_start, iv.end - source_start + dest_start);
            new.masks.set(shifted, ());
        }
        new.formulas.remove(dest_range);
        for (iv, formula) in source.formulas.slice(src_range) {
            let shifted = Interval::new(iv.start - source_start + dest_start, iv.end - source_start + dest_start);
            new.formulas.set(shifted, formula);
        }

        self.commit(ColumnDelta::Replace {
            old: Box::new(self.state()),
            new: Box::new(new),
        })
    }

    // ------------------------------------------------------------------
    // Delta replay
    // ------------------------------------------------------------------

    /// Re-apply a delta produced by this column (redo)
    pub fn apply_delta(&mut self, delta: &ColumnDelta) -> Result<()> {
        self.ensure_alive()?;
        self.check_applicable(delta, true)?;
        self.run(delta, true);
        Ok(())
    }

    /// Invert a delta produced by this column (undo)
    pub fn revert_delta(&mut self, delta: &ColumnDelta) -> Result<()> {
        self.ensure_alive()?;
        self.check_applicable(delta, false)?;
        self.run(delta, false);
        Ok(())
    }

    fn check_applicable(&self, delta: &ColumnDelta, forward: bool) -> Result<()> {
        match delta {
            ColumnDelta::Values { first, old, new, .. } => {
                let values = if forward { new } else { old };
                self.check_family(values.storage_mode())?;
                self.check_span(*first, values.len())
            }
            ColumnDelta::InsertRows { before, count } if forward => {
                if self.row_count().checked_add(*count).is_none() {
                    return Err(ColumnError::RowOutOfRange {
                        row: *before,
                        row_count: self.row_count(),
                    });
                }
                self.check_span(*before, 0)
            }
            ColumnDelta::InsertRows { before, count } => self.check_span(*before, *count),
            ColumnDelta::RemoveRows { first, count, .. } if forward => {
                self.check_span(*first, *count)
            }
            ColumnDelta::RemoveRows { first, values, .. } => {
                self.check_family(values.storage_mode())?;
                self.check_span(*first, 0)
            }
            ColumnDelta::Mode { old_data, new_data, .. } => {
                let current = if forward { old_data } else { new_data };
                if current.len() == self.row_count() {
                    Ok(())
                } else {
                    Err(ColumnError::RowOutOfRange {
                        row: current.len(),
                        row_count: self.row_count(),
                    })
                }
            }
            _ => Ok(()),
        }
    }

    fn invalidate(&mut self) {
        self.properties = OnceCell::new();
    }

    /// Apply one side of a delta, bracketed by its notification pair
    fn run(&mut self, delta: &ColumnDelta, forward: bool) {
        match delta {
            ColumnDelta::Values {
                first,
                old,
                new,
                old_formulas,
            } => {
                self.notify(ColumnEvent::DataAboutToChange);
                let values = if forward { new } else { old };
                self.data.overwrite(*first, values);
                if let Some(range) = Interval::from_count(*first, new.len()) {
                    self.formulas.remove(range);
                    if !forward {
                        for (iv, formula) in old_formulas {
                            self.formulas.set(*iv, formula.clone());
                        }
                    }
                }
                self.invalidate();
                self.notify(ColumnEvent::DataChanged);
            }
            ColumnDelta::InsertRows { before, count } => {
                if forward {
                    self.insert_rows_raw(*before, *count, None);
                } else {
                    self.remove_rows_raw(*before, *count);
                }
            }
            ColumnDelta::RemoveRows {
                first,
                count,
                values,
                masks,
                formulas,
            } => {
                if forward {
                    self.remove_rows_raw(*first, *count);
                } else {
                    self.insert_rows_raw(*first, *count, Some((values, masks, formulas)));
                }
            }
            ColumnDelta::Mode {
                old_mode,
                new_mode,
                old_data,
                new_data,
            } => {
                let (mode, data) = if forward {
                    (*new_mode, new_data)
                } else {
                    (*old_mode, old_data)
                };
                self.notify(ColumnEvent::ModeAboutToChange);
                self.mode = mode;
                self.data = data.clone();
                self.invalidate();
                self.notify(ColumnEvent::ModeChanged);
            }
            ColumnDelta::Masks { old, new } => {
                self.notify(ColumnEvent::MaskingAboutToChange);
                self.masks = if forward { new.clone() } else { old.clone() };
                self.invalidate();
                self.notify(ColumnEvent::MaskingChanged);
            }
            ColumnDelta::Formulas { old, new } => {
                self.notify(ColumnEvent::FormulaAboutToChange);
                self.formulas = if forward { new.clone() } else { old.clone() };
                self.notify(ColumnEvent::FormulaChanged);
            }
            ColumnDelta::GlobalFormula { old, new } => {
                self.notify(ColumnEvent::FormulaAboutToChange);
                self.global_formula = if forward { new.clone() } else { old.clone() };
                self.notify(ColumnEvent::FormulaChanged);
            }
            ColumnDelta::PlotDesignation { old, new } => {
                self.notify(ColumnEvent::PlotDesignationAboutToChange);
                self.plot_designation = if forward { *new } else { *old };
                self.notify(ColumnEvent::PlotDesignationChanged);
            }
            ColumnDelta::Name { old, new } => {
                self.notify(ColumnEvent::NameAboutToChange);
                self.name = if forward { new.clone() } else { old.clone() };
                self.notify(ColumnEvent::NameChanged);
            }
            ColumnDelta::DateTimeFormat { old, new } => {
                self.notify(ColumnEvent::DataAboutToChange);
                self.datetime_format = if forward { new.clone() } else { old.clone() };
                self.notify(ColumnEvent::DataChanged);
            }
            ColumnDelta::Replace { old, new } => {
                let target = if forward { new } else { old };
                self.replace_state_raw(target);
            }
        }
    }

    fn insert_rows_raw(
        &mut self,
        before: usize,
        count: usize,
        restore: Option<(&ColumnData, &Vec<Interval>, &Vec<(Interval, String)>)>,
    ) {
        tracing::debug!(column = %self.name, before, count, "inserting rows");
        self.notify(ColumnEvent::RowsAboutToBeInserted { before, count });
        match restore {
            Some((values, _, _)) => self.data.insert(before, values.clone()),
            None => self.data.insert_default(before, count),
        }
        self.masks.insert_rows(before, count);
        self.formulas.insert_rows(before, count);
        if let Some((_, masks, formulas)) = restore {
            for iv in masks {
                self.masks.set(*iv, ());
            }
            for (iv, formula) in formulas {
                self.formulas.set(*iv, formula.clone());
            }
        }
        self.invalidate();
        self.notify(ColumnEvent::RowsInserted { before, count });
    }

    fn remove_rows_raw(&mut self, first: usize, count: usize) {
        tracing::debug!(column = %self.name, first, count, "removing rows");
        self.notify(ColumnEvent::RowsAboutToBeRemoved { first, count });
        self.data.remove(first, count);
        self.masks.remove_rows(first, count);
        self.formulas.remove_rows(first, count);
        self.invalidate();
        self.notify(ColumnEvent::RowsRemoved { first, count });
    }

    fn replace_state_raw(&mut self, state: &ColumnState) {
        let mode_changes = state.mode != self.mode;
        let masks_change = state.masks != self.masks;
        if mode_changes {
            self.notify(ColumnEvent::ModeAboutToChange);
        }
        if masks_change {
            self.notify(ColumnEvent::MaskingAboutToChange);
        }
        self.notify(ColumnEvent::DataAboutToChange);
        self.mode = state.mode;
        self.data = state.data.clone();
        self.masks = state.masks.clone();
        self.formulas = state.formulas.clone();
        self.invalidate();
        self.notify(ColumnEvent::DataChanged);
        if masks_change {
            self.notify(ColumnEvent::MaskingChanged);
        }
        if mode_changes {
            self.notify(ColumnEvent::ModeChanged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn numbers(values: &[f64]) -> Column {
        Column::numeric("x", values.to_vec())
    }

    #[test]
    fn test_lenient_cross_type_reads() {
        let col = Column::text("t", ["a", "b"]);
        assert!(col.value_at(0).is_nan());
        assert_eq!(col.integer_at(0), 0);
        assert_eq!(col.date_time_at(0), None);
        assert_eq!(col.text_at(1), "b");
        assert_eq!(col.text_at(99), "");
    }

    #[test]
    fn test_writes_reject_out_of_range_and_wrong_type() {
        let mut col = numbers(&[1.0, 2.0]);
        assert!(matches!(
            col.set_value_at(2, 5.0),
            Err(ColumnError::RowOutOfRange { row: 2, row_count: 2 })
        ));
        assert!(matches!(
            col.replace_values(1, vec![1.0, 2.0]),
            Err(ColumnError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            col.set_text_at(0, "x"),
            Err(ColumnError::ModeMismatch { .. })
        ));
        assert_eq!(col.row_count(), 2);
    }

    #[test]
    fn test_mode_change_preserves_rows_and_reverts() {
        let mut col = numbers(&[1.4, f64::NAN, 3.0]);
        let delta = col.set_column_mode(ColumnMode::Integer).unwrap();
        assert_eq!(col.column_mode(), ColumnMode::Integer);
        assert_eq!(col.row_count(), 3);
        assert_eq!(col.integer_at(0), 1);
        assert_eq!(col.integer_at(1), 0);

        col.revert_delta(&delta).unwrap();
        assert_eq!(col.column_mode(), ColumnMode::Numeric);
        assert_eq!(col.value_at(0), 1.4);
        assert!(col.value_at(1).is_nan());
    }

    #[test]
    fn test_insert_rows_shifts_masks() {
        let mut col = numbers(&[1.0, 2.0, 3.0, 4.0]);
        col.set_masked(Interval::new(2, 3), true).unwrap();
        col.insert_rows(1, 2).unwrap();
        assert_eq!(col.row_count(), 6);
        assert_eq!(col.masked_intervals(), vec![Interval::new(4, 5)]);
        assert!(col.value_at(1).is_nan());
        assert_eq!(col.value_at(4), 3.0);
    }

    #[test]
    fn test_remove_rows_discards_and_undo_restores() {
        let mut col = numbers(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        col.set_masked(Interval::new(1, 4), true).unwrap();
        col.set_formula(Interval::new(2, 3), "x*2").unwrap();

        let delta = col.remove_rows(2, 2).unwrap();
        assert_eq!(col.row_count(), 4);
        assert_eq!(col.masked_intervals(), vec![Interval::new(1, 2)]);
        assert!(col.formula_intervals().is_empty());
        assert_eq!(col.value_at(2), 4.0);

        col.revert_delta(&delta).unwrap();
        assert_eq!(col.row_count(), 6);
        assert_eq!(col.masked_intervals(), vec![Interval::new(1, 4)]);
        assert_eq!(col.formula_intervals(), vec![Interval::new(2, 3)]);
        assert_eq!(col.value_at(3), 3.0);
    }

    #[test]
    fn test_masked_rows_excluded_from_statistics() {
        let mut col = numbers(&[1.0, 2.0, 3.0, 100.0]);
        assert_eq!(col.statistics().arithmetic_mean, 26.5);
        col.set_masked_row(3, true).unwrap();
        assert_eq!(col.statistics().arithmetic_mean, 2.0);
        assert_eq!(col.maximum(), 3.0);
        assert_eq!(col.value_at(3), 100.0);
    }

    #[test]
    fn test_invalid_rows_excluded_from_statistics() {
        let col = numbers(&[f64::NAN, 4.0, 6.0]);
        let stats = col.statistics();
        assert_eq!(stats.arithmetic_mean, 5.0);
        assert_eq!(stats.minimum, 4.0);
        assert_eq!(col.valid_rows().count_ones(), 2);
    }

    #[test]
    fn test_geometric_mean_with_negative_value() {
        let col = numbers(&[-1.0, 2.0, 3.0]);
        assert!(col.statistics().geometric_mean.is_nan());
    }

    #[test]
    fn test_statistics_undefined_without_rows() {
        let mut col = numbers(&[1.0]);
        col.set_masked_row(0, true).unwrap();
        let stats = col.statistics();
        assert!(stats.minimum.is_nan());
        assert!(stats.median.is_nan());
        assert!(Column::text("t", ["1"]).statistics().arithmetic_mean.is_nan());
    }

    #[test]
    fn test_descending_sequence_is_reported_monotonic_increasing() {
        // Historical convention: "increasing" means prev >= cur for every pair.
        let col = numbers(&[5.0, 4.0, 3.0, 2.0, 1.0]);
        let props = col.properties();
        assert!(props.monotonic_increasing);
        assert!(!props.monotonic_decreasing);
    }

    #[test]
    fn test_properties_cache_invalidated_by_mutation() {
        let mut col = numbers(&[1.0, 2.0, 3.0]);
        assert!(col.properties().monotonic_decreasing);
        col.set_value_at(2, 0.0).unwrap();
        assert!(col.properties().is_empty());
        col.set_masked_row(2, true).unwrap();
        assert!(col.properties().monotonic_decreasing);
    }

    #[test]
    fn test_notifications_are_ordered_pairs() {
        let mut col = numbers(&[1.0, 2.0]);
        let log = EventLog::new();
        col.subscribe(log.listener());

        col.set_value_at(0, 9.0).unwrap();
        col.insert_rows(1, 3).unwrap();
        col.remove_rows(0, 1).unwrap();
        col.set_masked_row(0, true).unwrap();
        col.set_column_mode(ColumnMode::Text).unwrap();

        assert_eq!(
            log.events(),
            vec![
                ColumnEvent::DataAboutToChange,
                ColumnEvent::DataChanged,
                ColumnEvent::RowsAboutToBeInserted { before: 1, count: 3 },
                ColumnEvent::RowsInserted { before: 1, count: 3 },
                ColumnEvent::RowsAboutToBeRemoved { first: 0, count: 1 },
                ColumnEvent::RowsRemoved { first: 0, count: 1 },
                ColumnEvent::MaskingAboutToChange,
                ColumnEvent::MaskingChanged,
                ColumnEvent::ModeAboutToChange,
                ColumnEvent::ModeChanged,
            ]
        );
    }

    #[test]
    fn test_listeners_see_old_then_new_state() {
        use std::sync::{Arc, Mutex};

        let mut col = numbers(&[1.0]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        col.subscribe(move |c, event| {
            sink.lock().unwrap().push((*event, c.value_at(0)));
        });
        col.set_value_at(0, 2.0).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ColumnEvent::DataAboutToChange, 1.0),
                (ColumnEvent::DataChanged, 2.0)
            ]
        );
    }

    #[test]
    fn test_subscribe_to_kind_and_unsubscribe() {
        let mut col = numbers(&[1.0]);
        let log = EventLog::new();
        let id = col.subscribe_to(EventKind::DataChanged, log.listener());

        col.set_value_at(0, 3.0).unwrap();
        assert_eq!(log.events(), vec![ColumnEvent::DataChanged]);

        assert!(col.unsubscribe(id));
        col.set_value_at(0, 4.0).unwrap();
        assert_eq!(log.events().len(), 1);
        assert!(!col.unsubscribe(id));
    }

    #[test]
    fn test_prepare_for_destruction() {
        let mut col = numbers(&[1.0]);
        col.set_global_formula(Some(GlobalFormula::new("1"))).unwrap();
        let log = EventLog::new();
        col.subscribe(log.listener());

        col.prepare_for_destruction();
        col.prepare_for_destruction();

        assert_eq!(log.events(), vec![ColumnEvent::AboutToBeDestroyed]);
        assert_eq!(col.listener_count(), 0);
        assert!(col.global_formula().is_none());
        assert!(matches!(col.set_value_at(0, 1.0), Err(ColumnError::Destroyed)));
        assert_eq!(col.value_at(0), 1.0);
    }

    #[test]
    fn test_replace_clears_formula_in_range_and_undo_restores() {
        let mut col = numbers(&[1.0, 2.0, 3.0]);
        col.set_formula(Interval::new(0, 2), "sin(x)").unwrap();
        let delta = col.replace_values(1, vec![7.0]).unwrap();
        assert_eq!(col.formula_at(1), None);
        assert_eq!(col.formula_at(0), Some("sin(x)"));
        assert_eq!(col.formula_intervals().len(), 2);

        col.revert_delta(&delta).unwrap();
        assert_eq!(col.value_at(1), 2.0);
        assert_eq!(col.formula_intervals(), vec![Interval::new(0, 2)]);

        col.apply_delta(&delta).unwrap();
        assert_eq!(col.value_at(1), 7.0);
    }

    #[test]
    fn test_formula_intervals_merge() {
        let mut col = numbers(&[0.0; 6]);
        col.set_formula(Interval::new(0, 2), "x").unwrap();
        col.set_formula(Interval::new(3, 5), "x").unwrap();
        assert_eq!(col.formula_intervals(), vec![Interval::new(0, 5)]);
        col.set_formula_row(2, "").unwrap();
        assert_eq!(col.formula_intervals().len(), 2);
        assert!(matches!(
            col.set_formula(Interval::new(4, 6), "y"),
            Err(ColumnError::IntervalOutOfRange { .. })
        ));
    }

    #[test]
    fn test_clear_and_copy() {
        let mut source = numbers(&[1.0, 2.0, 3.0]);
        source.set_masked_row(1, true).unwrap();

        let mut dest = numbers(&[9.0]);
        let delta = dest.copy_from(&source).unwrap();
        assert_eq!(dest.row_count(), 3);
        assert!(dest.is_masked(1));

        dest.revert_delta(&delta).unwrap();
        assert_eq!(dest.row_count(), 1);
        assert!(!dest.is_masked(0));

        dest.copy_range(&source, 1, 1, 2).unwrap();
        assert_eq!(dest.row_count(), 3);
        assert_eq!(dest.value_at(0), 9.0);
        assert_eq!(dest.value_at(2), 3.0);
        assert!(dest.is_masked(1));

        dest.clear().unwrap();
        assert_eq!(dest.row_count(), 0);
        assert!(dest.masked_intervals().is_empty());

        let text = Column::text("t", ["a"]);
        assert!(matches!(dest.copy_from(&text), Err(ColumnError::ModeMismatch { .. })));
    }

    #[test]
    fn test_date_time_accessors() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        let col = Column::date_time("d", vec![Some(dt), None]);
        assert_eq!(col.date_at(0), Some(dt.date()));
        assert_eq!(col.time_at(0), Some(dt.time()));
        assert!(!col.is_valid(1));
        assert!(col.is_plottable());
        assert!(!col.is_numeric());
    }

    #[test]
    fn test_set_date_and_time_keep_the_other_half() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        let mut col = Column::date_time("d", vec![Some(dt), None]);
        let new_date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let new_time = NaiveTime::from_hms_opt(23, 0, 1).unwrap();

        col.set_date_at(0, new_date).unwrap();
        assert_eq!(col.date_time_at(0), Some(new_date.and_time(dt.time())));
        col.set_time_at(0, new_time).unwrap();
        assert_eq!(col.date_time_at(0), Some(new_date.and_time(new_time)));

        col.set_time_at(1, new_time).unwrap();
        assert_eq!(col.date_at(1), NaiveDate::from_ymd_opt(1900, 1, 1));
        col.set_date_at(1, new_date).unwrap();
        assert_eq!(col.date_time_at(1), Some(new_date.and_time(new_time)));

        let delta = col.set_date_at(0, dt.date()).unwrap();
        col.revert_delta(&delta).unwrap();
        assert_eq!(col.date_at(0), Some(new_date));

        let mut numbers = Column::numeric("x", vec![1.0]);
        assert!(matches!(
            numbers.set_date_at(0, new_date),
            Err(ColumnError::ModeMismatch { .. })
        ));
        assert!(matches!(
            col.set_time_at(5, new_time),
            Err(ColumnError::RowOutOfRange { .. })
        ));
    }

    #[test]
    fn test_huge_row_spans_are_rejected() {
        let mut col = numbers(&[1.0, 2.0]);
        assert!(matches!(
            col.remove_rows(usize::MAX, 2),
            Err(ColumnError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            col.replace_values(usize::MAX, vec![1.0, 2.0]),
            Err(ColumnError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            col.insert_rows(1, usize::MAX),
            Err(ColumnError::RowOutOfRange { .. })
        ));
        let source = numbers(&[3.0]);
        assert!(matches!(
            col.copy_range(&source, usize::MAX, 0, 2),
            Err(ColumnError::RowOutOfRange { .. })
        ));
        assert_eq!(Interval::from_count(usize::MAX, 2), None);
        assert_eq!(col.row_count(), 2);
        assert_eq!(col.value_at(1), 2.0);
    }

    #[test]
    fn test_text_to_date_time_uses_column_format() {
        let mut col = Column::text("t", ["06|05|2024", "junk"]);
        col.set_datetime_format("%d|%m|%Y").unwrap();
        col.set_column_mode(ColumnMode::DateTime).unwrap();
        assert_eq!(
            col.date_at(0),
            NaiveDate::from_ymd_opt(2024, 5, 6)
        );
        assert_eq!(col.date_time_at(1), None);
        assert_eq!(col.row_count(), 2);
    }

    proptest! {
        #[test]
        fn prop_mode_transitions_preserve_row_count(
            values in proptest::collection::vec(-1e6f64..1e6, 0..30),
            path in proptest::collection::vec(0usize..6, 1..6),
        ) {
            let mut col = Column::numeric("p", values.clone());
            for step in path {
                let before = col.row_count();
                col.set_column_mode(ColumnMode::ALL[step]).unwrap();
                prop_assert_eq!(col.row_count(), before);
                prop_assert_eq!(col.valid_rows().len(), before);
            }
            prop_assert_eq!(col.row_count(), values.len());
        }
    }
}
