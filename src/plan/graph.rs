//! Operation dependency graph.
//!
//! Nodes are indices into the operation list; the graph never owns the
//! operations themselves. Ordering uses Kahn's algorithm with the ready set
//! kept sorted by index, so the result is deterministic.

use std::collections::{BTreeSet, HashMap};

use super::operation::{Operation, OperationId};
use crate::error::{DotError, Result};

/// Immutable DAG over a slice of operations.
#[derive(Debug, Clone)]
pub struct Dag {
    /// `deps[i]`: indices `i` waits for.
    deps: Vec<Vec<usize>>,
    /// `dependents[i]`: indices waiting for `i`.
    dependents: Vec<Vec<usize>>,
    ids: Vec<OperationId>,
}

impl Dag {
    /// Build the graph. Dependencies on ids that are not in `ops` are
    /// ignored.
    #[must_use]
    pub fn build(ops: &[Operation]) -> Self {
        let index: HashMap<&OperationId, usize> =
            ops.iter().enumerate().map(|(i, op)| (&op.id, i)).collect();

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        for (i, op) in ops.iter().enumerate() {
            for dep in &op.deps {
                if let Some(&d) = index.get(dep)
                    && let Some(list) = deps.get_mut(i)
                    && !list.contains(&d)
                {
                    list.push(d);
                    if let Some(rev) = dependents.get_mut(d) {
                        rev.push(i);
                    }
                }
            }
        }

        Self {
            deps,
            dependents,
            ids: ops.iter().map(|op| op.id.clone()).collect(),
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// `true` for an empty graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Indices node `i` depends on.
    #[must_use]
    pub fn dependencies(&self, i: usize) -> &[usize] {
        self.deps.get(i).map_or(&[], Vec::as_slice)
    }

    fn in_degrees(&self) -> Vec<usize> {
        self.deps.iter().map(Vec::len).collect()
    }

    /// A total order in which every node follows its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::CyclicDependency`] naming a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut in_degree = self.in_degrees();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(i))
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &next in self.dependents.get(idx).map_or(&[][..], Vec::as_slice) {
                if let Some(count) = in_degree.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(self.cycle_error(&in_degree))
        }
    }

    /// Kahn layering: batch 0 has no dependencies and every node in batch
    /// `k` depends only on nodes in earlier batches.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::CyclicDependency`] naming a cycle.
    pub fn levels(&self) -> Result<Vec<Vec<usize>>> {
        let mut in_degree = self.in_degrees();
        let mut current: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(i))
            .collect();
        let mut levels = Vec::new();
        let mut seen = 0usize;

        while !current.is_empty() {
            seen += current.len();
            let mut next = BTreeSet::new();
            for &idx in &current {
                for &dep in self.dependents.get(idx).map_or(&[][..], Vec::as_slice) {
                    if let Some(count) = in_degree.get_mut(dep) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(dep);
                        }
                    }
                }
            }
            levels.push(current);
            current = next.into_iter().collect();
        }

        if seen == self.len() {
            Ok(levels)
        } else {
            Err(self.cycle_error(&in_degree))
        }
    }

    /// Find one cycle among the nodes Kahn could not release and name it.
    fn cycle_error(&self, in_degree: &[usize]) -> DotError {
        let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        let start = stuck.iter().position(|&s| s).unwrap_or(0);

        // Every stuck node has at least one stuck dependency, so walking
        // dependencies must revisit a node.
        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut node = start;
        loop {
            if let Some(&at) = position.get(&node) {
                let mut names: Vec<String> = path
                    .get(at..)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|&i| self.ids.get(i).map(ToString::to_string))
                    .collect();
                if let Some(first) = names.first().cloned() {
                    names.push(first);
                }
                return DotError::CyclicDependency(names);
            }
            position.insert(node, path.len());
            path.push(node);
            let next = self
                .dependencies(node)
                .iter()
                .copied()
                .find(|&d| stuck.get(d).copied().unwrap_or(false));
            match next {
                Some(n) => node = n,
                None => {
                    return DotError::CyclicDependency(
                        path.iter()
                            .filter_map(|&i| self.ids.get(i).map(ToString::to_string))
                            .collect(),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::paths::FilePath;
    use crate::plan::operation::OperationKind;

    fn op(name: &str, deps: &[&str]) -> Operation {
        let kind = OperationKind::DirCreate {
            path: FilePath::new(format!("/{name}")).unwrap(),
        };
        Operation::new(
            kind,
            deps.iter()
                .map(|d| {
                    OperationKind::DirCreate {
                        path: FilePath::new(format!("/{d}")).unwrap(),
                    }
                    .id()
                })
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn empty_graph() {
        let dag = Dag::build(&[]);
        assert!(dag.topological_order().unwrap().is_empty());
        assert!(dag.levels().unwrap().is_empty());
    }

    #[test]
    fn chain_orders_dependencies_first() {
        let ops = vec![op("c", &["b"]), op("b", &["a"]), op("a", &[])];
        let dag = Dag::build(&ops);
        assert_eq!(dag.topological_order().unwrap(), vec![2, 1, 0]);
        assert_eq!(dag.levels().unwrap(), vec![vec![2], vec![1], vec![0]]);
    }

    #[test]
    fn diamond_layers() {
        let ops = vec![
            op("a", &[]),
            op("b", &["a"]),
            op("c", &["a"]),
            op("d", &["b", "c"]),
        ];
        let dag = Dag::build(&ops);
        assert_eq!(
            dag.levels().unwrap(),
            vec![vec![0], vec![1, 2], vec![3]]
        );
    }

    #[test]
    fn independent_nodes_share_level_zero() {
        let ops = vec![op("a", &[]), op("b", &[]), op("c", &[])];
        let dag = Dag::build(&ops);
        assert_eq!(dag.levels().unwrap(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn order_respects_every_edge() {
        let ops = vec![
            op("e", &["d", "a"]),
            op("d", &["c"]),
            op("c", &["a", "b"]),
            op("b", &[]),
            op("a", &[]),
        ];
        let dag = Dag::build(&ops);
        let order = dag.topological_order().unwrap();
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        for i in 0..ops.len() {
            for &d in dag.dependencies(i) {
                assert!(pos(d) < pos(i));
            }
        }
    }

    #[test]
    fn missing_dependency_is_ignored() {
        let ops = vec![op("a", &["ghost"])];
        let dag = Dag::build(&ops);
        assert_eq!(dag.topological_order().unwrap(), vec![0]);
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    #[test]
    fn cycle_is_rejected_and_named() {
        let ops = vec![op("a", &["c"]), op("b", &["a"]), op("c", &["b"]), op("free", &[])];
        let dag = Dag::build(&ops);
        let err = dag.topological_order().unwrap_err();
        let DotError::CyclicDependency(names) = err else {
            panic!("expected cycle error");
        };
        assert_eq!(names.first(), names.last());
        assert_eq!(names.len(), 4);
        assert!(names.iter().all(|n| !n.contains("free")));
        assert!(matches!(dag.levels(), Err(DotError::CyclicDependency(_))));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let ops = vec![op("a", &["a"])];
        let dag = Dag::build(&ops);
        let Err(DotError::CyclicDependency(names)) = dag.levels() else {
            panic!("expected cycle error");
        };
        assert_eq!(names, vec!["dir-create:/a", "dir-create:/a"]);
    }
}
