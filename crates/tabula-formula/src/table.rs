//! Column registry that resolves formula variables and drives auto-update.
//!
//! A [`Table`] subscribes to every column it owns. Listeners only record which column
//! changed; re-evaluation happens after the mutation returns, inside [`Table::modify`], so
//! no formula ever runs while a notification is being delivered.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tabula_core::{
    Column, ColumnData, ColumnDelta, ColumnError, ColumnId, ColumnMode, GlobalFormula,
    ListenerId, Result,
};

use crate::dependency::DependencyGraph;
use crate::evaluator::CompiledFormula;

type DirtyQueue = Arc<Mutex<Vec<ColumnId>>>;

struct Entry {
    column: Column,
    listener: ListenerId,
}

/// Ordered collection of columns with formula dependencies between them
#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    graph: DependencyGraph,
    dirty: DirtyQueue,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.entries.iter().map(|e| e.column.name()).collect::<Vec<_>>())
            .field("graph", &self.graph)
            .finish()
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take ownership of `column`. Fails with [`ColumnError::FormulaCycle`], handing
    /// nothing over, when its name or formula would close a dependency loop.
    pub fn add_column(&mut self, mut column: Column) -> Result<ColumnId> {
        let id = column.id();
        let dirty = self.dirty.clone();
        let listener = column.subscribe(move |column, event| {
            if event.changes_values() {
                dirty
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(column.id());
            }
        });
        self.entries.push(Entry { column, listener });
        self.rebuild_graph();

        if let Err(err) = self.graph.check_acyclic() {
            if let Some(Entry {
                mut column,
                listener,
            }) = self.entries.pop()
            {
                column.unsubscribe(listener);
                tracing::warn!(column = %column.name(), "rejected column closing a formula cycle");
            }
            self.rebuild_graph();
            return Err(err);
        }
        if let Some(entry) = self.entries.last() {
            tracing::debug!(column = %entry.column.name(), %id, "column added to table");
        }
        Ok(id)
    }

    /// Detach and return a column after announcing its destruction
    pub fn remove_column(&mut self, id: ColumnId) -> Result<Column> {
        let index = self.index_of(id)?;
        let Entry {
            mut column,
            listener,
        } = self.entries.remove(index);
        column.unsubscribe(listener);
        column.prepare_for_destruction();
        self.graph.remove_column(id);
        self.rebuild_graph();
        tracing::debug!(column = %column.name(), %id, "column removed from table");
        Ok(column)
    }

    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.entries.iter().find(|e| e.column.id() == id).map(|e| &e.column)
    }

    /// First column carrying `name`
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.entries
            .iter()
            .find(|e| e.column.name() == name)
            .map(|e| &e.column)
    }

    pub fn id_of(&self, name: &str) -> Option<ColumnId> {
        self.column_by_name(name).map(Column::id)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.entries.iter().map(|e| &e.column)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn index_of(&self, id: ColumnId) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.column.id() == id)
            .ok_or_else(|| ColumnError::UnknownColumn(id.to_string()))
    }

    /// Run `f` against one column, then re-evaluate every auto-update formula that
    /// (transitively) reads a column whose values changed.
    ///
    /// A rename or formula change that closes a dependency loop is rolled back and reported
    /// as [`ColumnError::FormulaCycle`]; other effects of `f` stay.
    pub fn modify<T>(&mut self, id: ColumnId, f: impl FnOnce(&mut Column) -> Result<T>) -> Result<T> {
        let index = self.index_of(id)?;
        let column = &mut self.entries[index].column;
        let old_name = column.name().to_string();
        let old_formula = column.global_formula().cloned();

        let outcome = f(column);

        let column = &self.entries[index].column;
        let relinked = column.name() != old_name || column.global_formula() != old_formula.as_ref();
        let mut cycle = None;
        if relinked {
            // a rename can change how formulas resolve
            self.rebuild_graph();
            if let Err(err) = self.graph.check_acyclic() {
                tracing::warn!(column = %old_name, %err, "rejected formula cycle");
                let column = &mut self.entries[index].column;
                if column.name() != old_name {
                    column.set_name(old_name)?;
                }
                if column.global_formula() != old_formula.as_ref() {
                    column.set_global_formula(old_formula)?;
                }
                self.rebuild_graph();
                cycle = Some(err);
            }
        }

        self.propagate()?;
        match cycle {
            Some(err) => Err(err),
            None => outcome,
        }
    }

    /// Attach or clear the global formula of `id`, rejecting unparsable formulas and
    /// dependency loops
    pub fn set_global_formula(
        &mut self,
        id: ColumnId,
        formula: Option<GlobalFormula>,
    ) -> Result<ColumnDelta> {
        if let Some(formula) = &formula {
            CompiledFormula::compile(formula)?;
        }
        self.modify(id, |column| column.set_global_formula(formula))
    }

    /// Evaluate the global formula of `id` now, regardless of its auto-update flag
    pub fn evaluate(&mut self, id: ColumnId) -> Result<ColumnDelta> {
        let delta = self.evaluate_into(id)?;
        self.propagate()?;
        Ok(delta)
    }

    /// Compute the formula of `id` from the current columns and write the result
    fn evaluate_into(&mut self, id: ColumnId) -> Result<ColumnDelta> {
        let index = self.index_of(id)?;
        let target = &self.entries[index].column;
        let formula = target
            .global_formula()
            .cloned()
            .ok_or_else(|| ColumnError::FormulaParse(format!("{} has no formula", target.name())))?;
        let compiled = CompiledFormula::compile(&formula)?;
        let values = compiled.evaluate(target.row_count(), |name| self.column_by_name(name))?;

        tracing::debug!(
            column = %target.name(),
            expression = %formula.expression,
            rows = values.len(),
            "evaluating global formula"
        );
        self.entries[index]
            .column
            .replace_all(ColumnMode::Numeric, ColumnData::Numeric(values))
    }

    fn drain_dirty(&self) -> Vec<ColumnId> {
        std::mem::take(
            &mut *self
                .dirty
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Re-evaluate auto-update dependents of every column changed since the last drain.
    ///
    /// A dependent whose formula cannot be evaluated keeps its values; the failure is logged.
    fn propagate(&mut self) -> Result<()> {
        let changed = self.drain_dirty();
        if changed.is_empty() {
            return Ok(());
        }

        let mut changed: HashSet<ColumnId> = changed.into_iter().collect();
        let order = self.graph.recalc_order(changed.iter().copied())?;
        for id in order {
            let Some(column) = self.column(id) else {
                continue;
            };
            let auto = column.global_formula().is_some_and(|f| f.auto_update);
            let inputs_changed = self
                .graph
                .direct_dependencies(id)
                .is_some_and(|deps| deps.iter().any(|d| changed.contains(d)));
            if !(auto && inputs_changed) {
                continue;
            }
            match self.evaluate_into(id) {
                Ok(_) => {
                    changed.insert(id);
                }
                Err(err) => {
                    tracing::warn!(column = %id, %err, "auto-update evaluation failed");
                }
            }
        }
        // our own writes are already accounted for by the topological order
        self.drain_dirty();
        Ok(())
    }

    fn rebuild_graph(&mut self) {
        let mut graph = DependencyGraph::new();
        for entry in &self.entries {
            let Some(formula) = entry.column.global_formula() else {
                continue;
            };
            let deps: HashSet<ColumnId> = formula
                .referenced_columns()
                .filter_map(|name| self.id_of(name))
                .collect();
            graph.set_dependencies(entry.column.id(), deps);
        }
        self.graph = graph;
    }
}
