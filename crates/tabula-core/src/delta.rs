use serde::{Deserialize, Serialize};

use crate::formula::GlobalFormula;
use crate::interval::{Interval, IntervalMap};
use crate::mode::{ColumnMode, PlotDesignation};
use crate::value::ColumnData;

/// Full value-bearing state of a column, captured when a mutation rewrites all of it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnState {
    pub mode: ColumnMode,
    pub data: ColumnData,
    pub masks: IntervalMap<()>,
    pub formulas: IntervalMap<String>,
}

/// Record of one column mutation holding both the old and the new sub-state.
///
/// Every mutator returns one; `Column::apply_delta` replays it and `Column::revert_delta`
/// inverts it exactly, so an external undo stack needs nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ColumnDelta {
    /// Values overwritten in place starting at `first`; per-row formulas in that range drop
    Values {
        first: usize,
        old: ColumnData,
        new: ColumnData,
        old_formulas: Vec<(Interval, String)>,
    },
    InsertRows {
        before: usize,
        count: usize,
    },
    /// Rows removed together with their values, masks and formulas
    RemoveRows {
        first: usize,
        count: usize,
        values: ColumnData,
        masks: Vec<Interval>,
        formulas: Vec<(Interval, String)>,
    },
    Mode {
        old_mode: ColumnMode,
        new_mode: ColumnMode,
        old_data: ColumnData,
        new_data: ColumnData,
    },
    Masks {
        old: IntervalMap<()>,
        new: IntervalMap<()>,
    },
    Formulas {
        old: IntervalMap<String>,
        new: IntervalMap<String>,
    },
    GlobalFormula {
        old: Option<GlobalFormula>,
        new: Option<GlobalFormula>,
    },
    PlotDesignation {
        old: PlotDesignation,
        new: PlotDesignation,
    },
    Name {
        old: String,
        new: String,
    },
    DateTimeFormat {
        old: String,
        new: String,
    },
    /// Whole-column rewrite: clear, full copy, growing partial copy, formula evaluation
    Replace {
        old: Box<ColumnState>,
        new: Box<ColumnState>,
    },
}

impl ColumnDelta {
    /// Short label for history displays
    pub fn label(&self) -> &'static str {
        match self {
            ColumnDelta::Values { .. } => "set values",
            ColumnDelta::InsertRows { .. } => "insert rows",
            ColumnDelta::RemoveRows { .. } => "remove rows",
            ColumnDelta::Mode { .. } => "change mode",
            ColumnDelta::Masks { .. } => "change masking",
            ColumnDelta::Formulas { .. } => "change formulas",
            ColumnDelta::GlobalFormula { .. } => "set global formula",
            ColumnDelta::PlotDesignation { .. } => "set plot designation",
            ColumnDelta::Name { .. } => "rename",
            ColumnDelta::DateTimeFormat { .. } => "set date-time format",
            ColumnDelta::Replace { .. } => "replace column",
        }
    }

    /// True when applying this delta changes nothing observable
    pub fn is_noop(&self) -> bool {
        match self {
            ColumnDelta::Values { old, new, old_formulas, .. } => {
                old == new && old_formulas.is_empty()
            }
            ColumnDelta::InsertRows { count, .. } | ColumnDelta::RemoveRows { count, .. } => {
                *count == 0
            }
            ColumnDelta::Mode { old_mode, new_mode, .. } => old_mode == new_mode,
            ColumnDelta::Masks { old, new } => old == new,
            ColumnDelta::Formulas { old, new } => old == new,
            ColumnDelta::GlobalFormula { old, new } => old == new,
            ColumnDelta::PlotDesignation { old, new } => old == new,
            ColumnDelta::Name { old, new } | ColumnDelta::DateTimeFormat { old, new } => old == new,
            ColumnDelta::Replace { old, new } => old == new,
        }
    }
}
