use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::case::{DepKind, TestCase};
use crate::error::CoreError;

/// The dependency graph over a set of instantiated cases.
///
/// One node per case, one edge per dependency whose target name resolves
/// to a case in the set. A dependency on a name with no matching case
/// (e.g. a fixture dropped by a construction failure) is recorded as
/// dangling instead of an edge.
pub struct DependencyGraph {
    pub graph: DiGraph<String, DepKind>,
    pub node_indices: Vec<NodeIndex>,
    dangling: Vec<(String, String)>,
}

impl DependencyGraph {
    /// Build the dependency graph of a case set.
    pub fn build(cases: &[TestCase]) -> Self {
        let mut graph = DiGraph::new();
        let node_indices: Vec<NodeIndex> =
            cases.iter().map(|c| graph.add_node(c.name.clone())).collect();

        let mut dangling = Vec::new();
        for (i, case) in cases.iter().enumerate() {
            for (target, kind) in case.deps() {
                match cases.iter().position(|c| &c.name == target) {
                    Some(j) => {
                        graph.add_edge(node_indices[i], node_indices[j], *kind);
                    }
                    None => dangling.push((case.name.clone(), target.clone())),
                }
            }
        }

        Self {
            graph,
            node_indices,
            dangling,
        }
    }

    /// Dependencies whose target case is absent from the set, as
    /// (dependent, missing target) pairs.
    pub fn dangling(&self) -> &[(String, String)] {
        &self.dangling
    }

    /// Verify the graph has no dependency cycles.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] naming a case on a cycle.
    pub fn ensure_acyclic(&self) -> Result<(), CoreError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|e| {
            CoreError::Configuration(format!(
                "dependency cycle involving case {:?}",
                self.graph[e.node_id()]
            ))
        })
    }
}
