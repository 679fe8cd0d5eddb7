//! Typed, observable columns for tabular data.
//!
//! A [`Column`] holds one of several value representations ([`ColumnMode`]), sparse row
//! masks and per-row formula annotations, and reports every mutation to its listeners as a
//! pair of [`ColumnEvent`]s. Mutators return a [`ColumnDelta`] that can be replayed or
//! inverted, which is all an undo stack needs.

pub mod column;
pub mod convert;
pub mod delta;
pub mod error;
pub mod events;
pub mod formula;
pub mod interval;
pub mod mode;
pub mod persist;
pub mod stats;
pub mod value;

pub use column::{Column, ColumnId};
pub use convert::{
    convert, format_date_time, parse_date_time, ConversionOptions, DATE_FORMATS,
    DEFAULT_DATETIME_FORMAT, TIME_FORMATS,
};
pub use delta::{ColumnDelta, ColumnState};
pub use error::{ColumnError, Result};
pub use events::{ColumnEvent, ColumnListener, EventKind, EventLog, ListenerId};
pub use formula::{FormulaVariable, GlobalFormula};
pub use interval::{Interval, IntervalMap};
pub use mode::{ColumnMode, PlotDesignation};
pub use persist::{LoadWarning, ISO_DATETIME_FORMAT};
pub use stats::{ColumnProperties, ColumnStatistics};
pub use value::{CellValue, ColumnData};
