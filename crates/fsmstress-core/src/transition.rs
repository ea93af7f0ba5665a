//! Precomputed weighted transition table.
//!
//! Built once from a resolved [`Config`] before any agent starts and shared
//! read-only afterwards. Each row is a cumulative distribution over the
//! state's successors, normalized to `[0, 1]`, laid out in the insertion
//! order of the config's edges.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::config::{Config, Edges};

/// One successor with its normalized cumulative weight.
#[derive(Debug, Clone, PartialEq)]
struct Successor {
    state: String,
    weight: f64,
    cumulative: f64,
}

/// Immutable state → successor-distribution map.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    rows: BTreeMap<String, Vec<Successor>>,
    digest: String,
}

impl TransitionTable {
    pub fn build<T>(config: &Config<T>) -> Self {
        Self::from_edges(config.transitions())
    }

    pub fn from_edges(transitions: &BTreeMap<String, Edges>) -> Self {
        let rows = transitions
            .iter()
            .map(|(from, edges)| (from.clone(), cumulative_row(edges)))
            .collect();
        Self {
            rows,
            digest: compute_graph_digest(transitions),
        }
    }

    /// Next state for `draw` in `[0, 1)`, or `None` when `state` is terminal.
    ///
    /// Returns the first successor whose cumulative weight strictly exceeds
    /// the draw, so zero-weight edges are never chosen.
    pub fn select(&self, state: &str, draw: f64) -> Option<&str> {
        let row = self.rows.get(state)?;
        row.iter()
            .find(|s| s.weight > 0.0 && s.cumulative > draw)
            .or_else(|| row.iter().rev().find(|s| s.weight > 0.0))
            .map(|s| s.state.as_str())
    }

    /// A state is terminal when it has no edge with positive weight.
    pub fn is_terminal(&self, state: &str) -> bool {
        self.rows
            .get(state)
            .map_or(true, |row| row.iter().all(|s| s.weight <= 0.0))
    }

    /// Successors of `state` with their normalized probabilities.
    pub fn probabilities(&self, state: &str) -> Vec<(&str, f64)> {
        let Some(row) = self.rows.get(state) else {
            return Vec::new();
        };
        let mut previous = 0.0;
        row.iter()
            .map(|s| {
                let p = s.cumulative - previous;
                previous = s.cumulative;
                (s.state.as_str(), p)
            })
            .collect()
    }

    /// SHA-256 over the ordered edge list; equal digests mean equal graphs.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cumulative_row(edges: &Edges) -> Vec<Successor> {
    let total = edges.total_weight();
    if total <= 0.0 {
        return edges
            .iter()
            .map(|(state, weight)| Successor {
                state: state.to_string(),
                weight,
                cumulative: 0.0,
            })
            .collect();
    }
    let mut running = 0.0;
    edges
        .iter()
        .map(|(state, weight)| {
            running += weight;
            Successor {
                state: state.to_string(),
                weight,
                cumulative: running / total,
            }
        })
        .collect()
}

fn compute_graph_digest(transitions: &BTreeMap<String, Edges>) -> String {
    let mut hasher = Sha256::new();
    for (from, edges) in transitions {
        hasher.update(from.as_bytes());
        hasher.update(b"\0");
        for (to, weight) in edges.iter() {
            hasher.update(to.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(weight.to_bits().to_be_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
