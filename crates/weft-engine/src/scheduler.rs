//! Wave scheduling with Kahn's algorithm over structural edges.
//!
//! Nodes whose structural predecessors have all been placed form the next
//! wave; nodes within a wave may run concurrently. Loop edges are left out of
//! the dependency graph entirely, so a loop edge may point at an earlier (or
//! the same) wave without tripping the cycle check.

use std::collections::HashMap;

use weft_core::error::{Result, WeftError};
use weft_core::workflow::{Edge, Node};

/// Execution order as a sequence of concurrent waves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    waves: Vec<Vec<String>>,
    wave_of: HashMap<String, usize>,
}

impl Schedule {
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn wave(&self, index: usize) -> Option<&[String]> {
        self.waves.get(index).map(Vec::as_slice)
    }

    /// Wave index assigned to `node_id`.
    pub fn wave_of(&self, node_id: &str) -> Option<usize> {
        self.wave_of.get(node_id).copied()
    }
}

/// Compute waves from `nodes` and the non-loop subset of `edges`.
///
/// Within a wave, nodes keep their declaration order. Edges that reference
/// unknown nodes are rejected; `Workflow::validate` normally catches these first.
///
/// # Errors
/// - [`WeftError::DanglingEdge`] if an edge endpoint is not a node.
/// - [`WeftError::Cycle`] listing every node left unresolved once loop edges are removed.
pub fn schedule(nodes: &[Node], edges: &[Edge]) -> Result<Schedule> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for edge in edges.iter().filter(|e| !e.is_loop()) {
        let from = endpoint(&index, edge, &edge.from)?;
        let to = endpoint(&index, edge, &edge.to)?;
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut wave_of = HashMap::with_capacity(nodes.len());
    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0usize;

    while !ready.is_empty() {
        let wave_index = waves.len();
        let mut next = Vec::new();

        for &i in &ready {
            wave_of.insert(nodes[i].id.clone(), wave_index);
            for &s in &successors[i] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    next.push(s);
                }
            }
        }

        placed += ready.len();
        waves.push(ready.iter().map(|&i| nodes[i].id.clone()).collect());
        next.sort_unstable();
        next.dedup();
        ready = next;
    }

    if placed < nodes.len() {
        let stuck = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, n)| n.id.clone())
            .collect();
        return Err(WeftError::Cycle(stuck));
    }

    Ok(Schedule { waves, wave_of })
}

fn endpoint(index: &HashMap<&str, usize>, edge: &Edge, node: &str) -> Result<usize> {
    index
        .get(node)
        .copied()
        .ok_or_else(|| WeftError::DanglingEdge {
            edge: edge.id.clone(),
            node: node.to_string(),
        })
}
