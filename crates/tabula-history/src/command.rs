use std::any::Any;

use tabula_core::{
    CellValue, Column, ColumnData, ColumnDelta, ColumnMode, GlobalFormula, Interval,
    PlotDesignation, Result,
};

/// Type alias for boxed commands
pub type CommandBox = Box<dyn Command>;

/// Trait for undoable column edits
pub trait Command: std::fmt::Debug + Send {
    /// Apply the edit. The first call runs the column mutator; later calls (redo) replay
    /// the recorded delta.
    fn execute(&mut self, column: &mut Column) -> Result<()>;

    /// Invert the last `execute`
    fn undo(&mut self, column: &mut Column) -> Result<()>;

    /// Short text for history displays
    fn description(&self) -> &str;

    /// Fold `other` into this command; returns true on success
    fn merge(&mut self, _other: &dyn Command) -> bool {
        false
    }

    fn can_merge(&self, _other: &dyn Command) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Delta captured by a command's first execution
#[derive(Debug, Default, Clone)]
struct Recorded(Option<ColumnDelta>);

impl Recorded {
    fn execute(
        &mut self,
        column: &mut Column,
        mutate: impl FnOnce(&mut Column) -> Result<ColumnDelta>,
    ) -> Result<()> {
        match &self.0 {
            Some(delta) => column.apply_delta(delta),
            None => {
                self.0 = Some(mutate(column)?);
                Ok(())
            }
        }
    }

    fn undo(&self, column: &mut Column) -> Result<()> {
        match &self.0 {
            Some(delta) => column.revert_delta(delta),
            None => Ok(()),
        }
    }
}

/// Write one cell. Consecutive writes to the same row merge into one undo step.
#[derive(Debug)]
pub struct SetValueCommand {
    row: usize,
    value: CellValue,
    recorded: Recorded,
}

impl SetValueCommand {
    pub fn new(row: usize, value: impl Into<CellValue>) -> Self {
        Self {
            row,
            value: value.into(),
            recorded: Recorded::default(),
        }
    }

    pub fn delta(&self) -> Option<&ColumnDelta> {
        self.recorded.0.as_ref()
    }
}

impl Command for SetValueCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (row, value) = (self.row, self.value.clone());
        self.recorded.execute(column, |c| c.set_cell(row, value))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Set value"
    }

    fn can_merge(&self, other: &dyn Command) -> bool {
        other
            .as_any()
            .downcast_ref::<SetValueCommand>()
            .is_some_and(|other| {
                other.row == self.row
                    && matches!(self.delta(), Some(ColumnDelta::Values { .. }))
                    && matches!(other.delta(), Some(ColumnDelta::Values { .. }))
            })
    }

    fn merge(&mut self, other: &dyn Command) -> bool {
        let Some(other) = other.as_any().downcast_ref::<SetValueCommand>() else {
            return false;
        };
        let (
            Some(ColumnDelta::Values { new, .. }),
            Some(ColumnDelta::Values { new: latest, .. }),
        ) = (self.recorded.0.as_mut(), other.delta())
        else {
            return false;
        };
        *new = latest.clone();
        self.value = other.value.clone();
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Overwrite a run of existing rows
#[derive(Debug)]
pub struct ReplaceValuesCommand {
    first: usize,
    values: ColumnData,
    recorded: Recorded,
}

impl ReplaceValuesCommand {
    pub fn new(first: usize, values: ColumnData) -> Self {
        Self {
            first,
            values,
            recorded: Recorded::default(),
        }
    }
}

impl Command for ReplaceValuesCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (first, values) = (self.first, self.values.clone());
        self.recorded.execute(column, |c| c.replace_data(first, values))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Replace values"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct InsertRowsCommand {
    before: usize,
    count: usize,
    recorded: Recorded,
}

impl InsertRowsCommand {
    pub fn new(before: usize, count: usize) -> Self {
        Self {
            before,
            count,
            recorded: Recorded::default(),
        }
    }
}

impl Command for InsertRowsCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (before, count) = (self.before, self.count);
        self.recorded.execute(column, |c| c.insert_rows(before, count))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Insert rows"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RemoveRowsCommand {
    first: usize,
    count: usize,
    recorded: Recorded,
}

impl RemoveRowsCommand {
    pub fn new(first: usize, count: usize) -> Self {
        Self {
            first,
            count,
            recorded: Recorded::default(),
        }
    }
}

impl Command for RemoveRowsCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (first, count) = (self.first, self.count);
        self.recorded.execute(column, |c| c.remove_rows(first, count))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Remove rows"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct SetModeCommand {
    mode: ColumnMode,
    recorded: Recorded,
}

impl SetModeCommand {
    pub fn new(mode: ColumnMode) -> Self {
        Self {
            mode,
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetModeCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let mode = self.mode;
        self.recorded.execute(column, |c| c.set_column_mode(mode))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Change column mode"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct SetMaskedCommand {
    interval: Interval,
    masked: bool,
    recorded: Recorded,
}

impl SetMaskedCommand {
    pub fn new(interval: Interval, masked: bool) -> Self {
        Self {
            interval,
            masked,
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetMaskedCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (interval, masked) = (self.interval, self.masked);
        self.recorded.execute(column, |c| c.set_masked(interval, masked))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        if self.masked {
            "Mask rows"
        } else {
            "Unmask rows"
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct ClearMasksCommand {
    recorded: Recorded,
}

impl ClearMasksCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for ClearMasksCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.execute(column, Column::clear_masks)
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Clear masks"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Annotate rows with formula text; empty text clears
#[derive(Debug)]
pub struct SetFormulaCommand {
    interval: Interval,
    formula: String,
    recorded: Recorded,
}

impl SetFormulaCommand {
    pub fn new(interval: Interval, formula: impl Into<String>) -> Self {
        Self {
            interval,
            formula: formula.into(),
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetFormulaCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let (interval, formula) = (self.interval, self.formula.clone());
        self.recorded.execute(column, |c| c.set_formula(interval, formula))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Set formula"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct ClearFormulasCommand {
    recorded: Recorded,
}

impl ClearFormulasCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for ClearFormulasCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.execute(column, Column::clear_formulas)
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Clear formulas"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Replace the global formula descriptor.
///
/// Applied to a bare column this skips the dependency check; inside a table, set the
/// formula through `Table::set_global_formula` and record the returned delta with
/// [`RecordedCommand`].
#[derive(Debug)]
pub struct SetGlobalFormulaCommand {
    formula: Option<GlobalFormula>,
    recorded: Recorded,
}

impl SetGlobalFormulaCommand {
    pub fn new(formula: Option<GlobalFormula>) -> Self {
        Self {
            formula,
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetGlobalFormulaCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let formula = self.formula.clone();
        self.recorded.execute(column, |c| c.set_global_formula(formula))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Set column formula"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct SetPlotDesignationCommand {
    designation: PlotDesignation,
    recorded: Recorded,
}

impl SetPlotDesignationCommand {
    pub fn new(designation: PlotDesignation) -> Self {
        Self {
            designation,
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetPlotDesignationCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let designation = self.designation;
        self.recorded.execute(column, |c| c.set_plot_designation(designation))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Set plot designation"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RenameCommand {
    name: String,
    recorded: Recorded,
}

impl RenameCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorded: Recorded::default(),
        }
    }
}

impl Command for RenameCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let name = self.name.clone();
        self.recorded.execute(column, |c| c.set_name(name))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Rename column"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct SetDateTimeFormatCommand {
    format: String,
    recorded: Recorded,
}

impl SetDateTimeFormatCommand {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            recorded: Recorded::default(),
        }
    }
}

impl Command for SetDateTimeFormatCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let format = self.format.clone();
        self.recorded.execute(column, |c| c.set_datetime_format(format))
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Set date-time format"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Remove every row
#[derive(Debug, Default)]
pub struct ClearColumnCommand {
    recorded: Recorded,
}

impl ClearColumnCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for ClearColumnCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.execute(column, Column::clear)
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Clear column"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Copy another column's rows into the target; holds a detached snapshot of the source
#[derive(Debug)]
pub struct CopyCommand {
    source: Column,
    range: Option<(usize, usize, usize)>,
    recorded: Recorded,
}

impl CopyCommand {
    /// Full copy, see [`Column::copy_from`]
    pub fn all(source: &Column) -> Self {
        Self {
            source: source.clone(),
            range: None,
            recorded: Recorded::default(),
        }
    }

    /// Partial copy, see [`Column::copy_range`]
    pub fn range(source: &Column, source_start: usize, dest_start: usize, count: usize) -> Self {
        Self {
            source: source.clone(),
            range: Some((source_start, dest_start, count)),
            recorded: Recorded::default(),
        }
    }
}

impl Command for CopyCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        let source = &self.source;
        let range = self.range;
        self.recorded.execute(column, |c| match range {
            None => c.copy_from(source),
            Some((source_start, dest_start, count)) => {
                c.copy_range(source, source_start, dest_start, count)
            }
        })
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        self.recorded.undo(column)
    }

    fn description(&self) -> &str {
        "Copy column"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a delta that was already applied elsewhere (for instance by formula evaluation),
/// so that it can be pushed onto the history without running anything
#[derive(Debug)]
pub struct RecordedCommand {
    delta: ColumnDelta,
    applied: bool,
}

impl RecordedCommand {
    pub fn new(delta: ColumnDelta) -> Self {
        Self {
            delta,
            applied: true,
        }
    }
}

impl Command for RecordedCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        if !self.applied {
            column.apply_delta(&self.delta)?;
            self.applied = true;
        }
        Ok(())
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        column.revert_delta(&self.delta)?;
        self.applied = false;
        Ok(())
    }

    fn description(&self) -> &str {
        self.delta.label()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Several commands on one column applied as a unit
#[derive(Debug)]
pub struct CompositeCommand {
    commands: Vec<CommandBox>,
    description: String,
}

impl CompositeCommand {
    pub fn new(commands: Vec<CommandBox>, description: impl Into<String>) -> Self {
        Self {
            commands,
            description: description.into(),
        }
    }
}

impl Command for CompositeCommand {
    fn execute(&mut self, column: &mut Column) -> Result<()> {
        for done in 0..self.commands.len() {
            if let Err(err) = self.commands[done].execute(column) {
                // leave the column as it was before the composite started
                for applied in self.commands[..done].iter_mut().rev() {
                    applied.undo(column)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn undo(&mut self, column: &mut Column) -> Result<()> {
        for cmd in self.commands.iter_mut().rev() {
            cmd.undo(column)?;
        }
        Ok(())
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
