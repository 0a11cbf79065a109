//! Reverse-dependency closure over Input Unit edges.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;

/// Computes `changed` plus every unit that transitively depends on one of them.
///
/// `edges` are `(unit, dependency)` pairs. Nodes named only in `changed` are
/// still part of the result, so the closure is always a superset of the
/// changed set. Edges may mention units that no longer exist; a removed
/// unit's dependents are reached through the edges recorded for them.
pub fn affected_closure<'a>(
    changed: impl IntoIterator<Item = &'a Path>,
    edges: impl IntoIterator<Item = (&'a Path, &'a Path)>,
) -> BTreeSet<PathBuf> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&Path, ()> = DiGraphMap::new();
    for (unit, dependency) in edges {
        graph.add_edge(dependency, unit, ());
    }

    let starts: Vec<&Path> = changed.into_iter().collect();
    for &start in &starts {
        graph.add_node(start);
    }

    let mut affected = BTreeSet::new();
    let mut dfs = Dfs::empty(&graph);
    for start in starts {
        dfs.move_to(start);
        while let Some(node) = dfs.next(&graph) {
            affected.insert(node.to_path_buf());
        }
    }
    affected
}
