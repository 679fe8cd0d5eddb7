use tabula_core::{Column, ColumnError, ColumnId, Result};
use tabula_formula::Table;

use crate::command::CommandBox;

/// Something that can lend out a column by id for the duration of an edit
pub trait ColumnHost {
    fn with_column<T>(
        &mut self,
        id: ColumnId,
        f: impl FnOnce(&mut Column) -> Result<T>,
    ) -> Result<T>;
}

impl ColumnHost for Column {
    fn with_column<T>(
        &mut self,
        id: ColumnId,
        f: impl FnOnce(&mut Column) -> Result<T>,
    ) -> Result<T> {
        if self.id() != id {
            return Err(ColumnError::UnknownColumn(id.to_string()));
        }
        f(self)
    }
}

/// Edits routed through the table re-trigger auto-update formulas, on undo and redo too
impl ColumnHost for Table {
    fn with_column<T>(
        &mut self,
        id: ColumnId,
        f: impl FnOnce(&mut Column) -> Result<T>,
    ) -> Result<T> {
        self.modify(id, f)
    }
}

#[derive(Debug)]
struct Step {
    column: ColumnId,
    command: CommandBox,
}

/// One undo level: a single command or a closed group
#[derive(Debug)]
struct Entry {
    description: String,
    steps: Vec<Step>,
}

#[derive(Debug)]
struct Group {
    description: String,
    steps: Vec<Step>,
    depth: usize,
}

/// Manages undo/redo history for column edits
#[derive(Default)]
pub struct HistoryManager {
    /// Entries that can be undone
    undo_stack: Vec<Entry>,
    /// Entries that can be redone
    redo_stack: Vec<Entry>,
    /// Maximum number of undo levels
    max_size: usize,
    /// Whether to try merging similar commands
    enable_merging: bool,
    /// Group being collected, if any
    open_group: Option<Group>,
}

impl HistoryManager {
    /// Create a new history manager with the specified max undo levels
    pub fn new(max_size: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_size,
            enable_merging: true,
            open_group: None,
        }
    }

    /// Execute a command on a standalone column and record it
    pub fn execute(&mut self, command: CommandBox, column: &mut Column) -> Result<()> {
        let id = column.id();
        self.execute_on(command, column, id)
    }

    /// Execute a command on column `id` of `host` and record it
    pub fn execute_on<H: ColumnHost>(
        &mut self,
        mut command: CommandBox,
        host: &mut H,
        id: ColumnId,
    ) -> Result<()> {
        host.with_column(id, |column| command.execute(column))?;
        tracing::debug!(column = %id, command = command.description(), "recorded");

        self.redo_stack.clear();
        let step = Step {
            column: id,
            command,
        };

        if let Some(group) = self.open_group.as_mut() {
            group.steps.push(step);
            return Ok(());
        }

        if self.enable_merging {
            if let Some(last) = self.undo_stack.last_mut() {
                if let [previous] = last.steps.as_mut_slice() {
                    if previous.column == step.column
                        && previous.command.can_merge(&*step.command)
                        && previous.command.merge(&*step.command)
                    {
                        return Ok(());
                    }
                }
            }
        }

        self.push(Entry {
            description: step.command.description().to_string(),
            steps: vec![step],
        });
        Ok(())
    }

    fn push(&mut self, entry: Entry) {
        if entry.steps.is_empty() {
            return;
        }
        self.undo_stack.push(entry);
        while self.undo_stack.len() > self.max_size {
            self.undo_stack.remove(0);
        }
    }

    /// Undo the last entry; `Ok(false)` when there is nothing to undo.
    ///
    /// On failure the entry is dropped from the history.
    pub fn undo<H: ColumnHost>(&mut self, host: &mut H) -> Result<bool> {
        let Some(mut entry) = self.undo_stack.pop() else {
            return Ok(false);
        };
        for step in entry.steps.iter_mut().rev() {
            let command = &mut step.command;
            host.with_column(step.column, |column| command.undo(column))?;
        }
        self.redo_stack.push(entry);
        Ok(true)
    }

    /// Redo the last undone entry; `Ok(false)` when there is nothing to redo
    pub fn redo<H: ColumnHost>(&mut self, host: &mut H) -> Result<bool> {
        let Some(mut entry) = self.redo_stack.pop() else {
            return Ok(false);
        };
        for step in entry.steps.iter_mut() {
            let command = &mut step.command;
            host.with_column(step.column, |column| command.execute(column))?;
        }
        self.undo_stack.push(entry);
        Ok(true)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get the description of the next undo entry
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|e| e.description.as_str())
    }

    /// Get the description of the next redo entry
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.description.as_str())
    }

    /// Get the number of undo levels available
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get the number of redo levels available
    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Clear all history, dropping an open group
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.open_group = None;
    }

    /// Enable or disable merging of consecutive edits
    pub fn set_merging_enabled(&mut self, enabled: bool) {
        self.enable_merging = enabled;
    }

    /// Start collecting commands into one undo level. Groups nest; only the outermost
    /// description is kept.
    pub fn start_group(&mut self, description: impl Into<String>) {
        match self.open_group.as_mut() {
            Some(group) => group.depth += 1,
            None => {
                self.open_group = Some(Group {
                    description: description.into(),
                    steps: Vec::new(),
                    depth: 1,
                })
            }
        }
    }

    /// Close the innermost group; closing the outermost one records it
    pub fn end_group(&mut self) {
        let Some(group) = self.open_group.as_mut() else {
            return;
        };
        group.depth -= 1;
        if group.depth > 0 {
            return;
        }
        if let Some(group) = self.open_group.take() {
            self.push(Entry {
                description: group.description,
                steps: group.steps,
            });
        }
    }

    /// Check if a group is currently collecting commands
    pub fn in_group(&self) -> bool {
        self.open_group.is_some()
    }
}

impl std::fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryManager")
            .field("undo_count", &self.undo_stack.len())
            .field("redo_count", &self.redo_stack.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}
