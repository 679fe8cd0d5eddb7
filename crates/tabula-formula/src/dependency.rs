use std::collections::{HashMap, HashSet, VecDeque};

use tabula_core::{ColumnError, ColumnId};

/// Tracks which columns' global formulas read which other columns
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Column -> columns its formula reads
    dependencies: HashMap<ColumnId, HashSet<ColumnId>>,

    /// Column -> columns whose formulas read it
    dependents: HashMap<ColumnId, HashSet<ColumnId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the inputs of `column`
    pub fn set_dependencies(&mut self, column: ColumnId, deps: HashSet<ColumnId>) {
        if let Some(old_deps) = self.dependencies.get(&column) {
            for dep in old_deps {
                if let Some(dependents) = self.dependents.get_mut(dep) {
                    dependents.remove(&column);
                }
            }
        }

        for dep in &deps {
            self.dependents.entry(*dep).or_default().insert(column);
        }

        if deps.is_empty() {
            self.dependencies.remove(&column);
        } else {
            self.dependencies.insert(column, deps);
        }
    }

    /// Forget a column in both directions
    pub fn remove_column(&mut self, column: ColumnId) {
        self.set_dependencies(column, HashSet::new());
        if let Some(dependents) = self.dependents.remove(&column) {
            for dependent in dependents {
                if let Some(deps) = self.dependencies.get_mut(&dependent) {
                    deps.remove(&column);
                }
            }
        }
    }

    pub fn direct_dependents(&self, column: ColumnId) -> Option<&HashSet<ColumnId>> {
        self.dependents.get(&column)
    }

    pub fn direct_dependencies(&self, column: ColumnId) -> Option<&HashSet<ColumnId>> {
        self.dependencies.get(&column)
    }

    /// Every column transitively affected by `changed`, including the changed columns
    /// themselves, with inputs ordered before the formulas reading them
    pub fn recalc_order(
        &self,
        changed: impl IntoIterator<Item = ColumnId>,
    ) -> Result<Vec<ColumnId>, ColumnError> {
        let mut queue: VecDeque<ColumnId> = changed.into_iter().collect();
        let mut affected = HashSet::new();
        while let Some(column) = queue.pop_front() {
            if !affected.insert(column) {
                continue;
            }
            if let Some(dependents) = self.direct_dependents(column) {
                queue.extend(dependents.iter().copied());
            }
        }

        // Sorted start points keep the order deterministic for equal-rank columns
        let mut starts: Vec<ColumnId> = affected.iter().copied().collect();
        starts.sort();

        let mut order = Vec::with_capacity(affected.len());
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        for column in starts {
            self.topological_sort(column, &affected, &mut order, &mut visited, &mut in_progress)?;
        }
        Ok(order)
    }

    fn topological_sort(
        &self,
        column: ColumnId,
        affected: &HashSet<ColumnId>,
        result: &mut Vec<ColumnId>,
        visited: &mut HashSet<ColumnId>,
        in_progress: &mut HashSet<ColumnId>,
    ) -> Result<(), ColumnError> {
        if in_progress.contains(&column) {
            return Err(ColumnError::FormulaCycle(column.to_string()));
        }
        if visited.contains(&column) {
            return Ok(());
        }

        in_progress.insert(column);
        if let Some(deps) = self.direct_dependencies(column) {
            let mut deps: Vec<ColumnId> = deps.iter().copied().collect();
            deps.sort();
            for dep in deps {
                if affected.contains(&dep) {
                    self.topological_sort(dep, affected, result, visited, in_progress)?;
                }
            }
        }
        in_progress.remove(&column);
        visited.insert(column);
        result.push(column);
        Ok(())
    }

    /// Fail with [`ColumnError::FormulaCycle`] when any formula reaches itself
    pub fn check_acyclic(&self) -> Result<(), ColumnError> {
        self.recalc_order(self.dependencies.keys().copied()).map(|_| ())
    }

    /// Whether making `column` read `new_dep` would close a loop
    pub fn would_create_cycle(&self, column: ColumnId, new_dep: ColumnId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([new_dep]);

        while let Some(current) = queue.pop_front() {
            if current == column {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(deps) = self.direct_dependencies(current) {
                queue.extend(deps.iter().copied());
            }
        }
        false
    }

    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids<const N: usize>() -> [ColumnId; N] {
        std::array::from_fn(|_| ColumnId::new())
    }

    #[test]
    fn test_basic_dependency() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();

        // a = b + c
        graph.set_dependencies(a, HashSet::from([b, c]));

        assert!(graph.direct_dependencies(a).unwrap().contains(&b));
        assert!(graph.direct_dependents(b).unwrap().contains(&a));
        assert!(graph.direct_dependents(c).unwrap().contains(&a));

        graph.set_dependencies(a, HashSet::from([c]));
        assert!(!graph.direct_dependents(b).unwrap().contains(&a));
    }

    #[test]
    fn test_recalc_order() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, unrelated] = ids();

        // b = f(a), c = f(b, a)
        graph.set_dependencies(b, HashSet::from([a]));
        graph.set_dependencies(c, HashSet::from([b, a]));
        graph.set_dependencies(unrelated, HashSet::new());

        let order = graph.recalc_order([a]).unwrap();
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert_eq!(order.len(), 3);
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn test_cycle_detected_in_recalc() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();
        graph.set_dependencies(a, HashSet::from([b]));
        graph.set_dependencies(b, HashSet::from([a]));

        assert!(matches!(
            graph.recalc_order([a]),
            Err(ColumnError::FormulaCycle(_))
        ));
    }

    #[test]
    fn test_would_create_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // a = f(b), b = f(c)
        graph.set_dependencies(a, HashSet::from([b]));
        graph.set_dependencies(b, HashSet::from([c]));

        assert!(graph.would_create_cycle(c, a));
        assert!(graph.would_create_cycle(a, a));
        assert!(!graph.would_create_cycle(c, d));
    }

    #[test]
    fn test_remove_column() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();
        graph.set_dependencies(a, HashSet::from([b]));
        graph.remove_column(b);
        assert!(graph.direct_dependencies(a).unwrap().is_empty());
        assert!(graph.direct_dependents(b).is_none());
    }

    #[test]
    fn test_check_acyclic() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();
        graph.set_dependencies(a, HashSet::from([b]));
        graph.set_dependencies(b, HashSet::from([c]));
        assert!(graph.check_acyclic().is_ok());

        graph.set_dependencies(c, HashSet::from([a]));
        assert!(matches!(graph.check_acyclic(), Err(ColumnError::FormulaCycle(_))));

        graph.set_dependencies(c, HashSet::from([c]));
        assert!(graph.check_acyclic().is_err());
    }

    proptest! {
        // Edges only point from later to earlier columns, so every generated graph is acyclic
        #[test]
        fn recalc_order_puts_inputs_first(
            edges in proptest::collection::vec((1usize..8, 0usize..8), 0..20),
            changed in 0usize..8,
        ) {
            let columns: [ColumnId; 8] = ids();
            let mut deps: HashMap<usize, HashSet<ColumnId>> = HashMap::new();
            for (from, to) in edges {
                let to = to % from;
                deps.entry(from).or_default().insert(columns[to]);
            }
            let mut graph = DependencyGraph::new();
            for (from, inputs) in &deps {
                graph.set_dependencies(columns[*from], inputs.clone());
            }

            prop_assert!(graph.check_acyclic().is_ok());
            let order = graph.recalc_order([columns[changed]]).unwrap();
            prop_assert_eq!(order.iter().collect::<HashSet<_>>().len(), order.len());
            prop_assert!(order.contains(&columns[changed]));

            let position: HashMap<ColumnId, usize> =
                order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
            for id in &order {
                if let Some(dependents) = graph.direct_dependents(*id) {
                    for dependent in dependents {
                        prop_assert!(position.contains_key(dependent));
                        prop_assert!(position[id] < position[dependent]);
                    }
                }
            }
        }
    }
}
