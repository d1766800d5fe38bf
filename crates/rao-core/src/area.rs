//! Area adjacency graph and area boundaries.
//!
//! Areas (bidding zones, countries) are nodes of an undirected graph whose
//! edges are boundaries. The search tree uses hop distances in this graph to
//! skip network actions located far from the current constraints, and the
//! relative-margin evaluator uses boundaries to sum zonal PTDFs.

use crate::error::{RaoError, RaoResult};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

/// A border between two areas, written `FR-BE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Boundary {
    pub from: String,
    pub to: String,
}

impl Boundary {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl FromStr for Boundary {
    type Err = RaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() && a != b => {
                Ok(Boundary::new(a, b))
            }
            _ => Err(RaoError::Parse(format!(
                "invalid boundary '{s}', expected two distinct areas like 'FR-BE'"
            ))),
        }
    }
}

impl TryFrom<String> for Boundary {
    type Error = RaoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Boundary> for String {
    fn from(b: Boundary) -> Self {
        b.to_string()
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Undirected area adjacency graph.
#[derive(Debug, Clone, Default)]
pub struct AreaGraph {
    graph: UnGraph<String, ()>,
    index: BTreeMap<String, NodeIndex>,
}

impl AreaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_boundaries<'a>(boundaries: impl IntoIterator<Item = &'a Boundary>) -> Self {
        let mut graph = Self::new();
        for b in boundaries {
            graph.add_boundary(b);
        }
        graph
    }

    fn node(&mut self, area: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(area) {
            return *idx;
        }
        let idx = self.graph.add_node(area.to_string());
        self.index.insert(area.to_string(), idx);
        idx
    }

    pub fn add_boundary(&mut self, boundary: &Boundary) {
        let a = self.node(&boundary.from);
        let b = self.node(&boundary.to);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn contains(&self, area: &str) -> bool {
        self.index.contains_key(area)
    }

    pub fn area_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Hop distance from the closest source to every reachable area (multi-source BFS).
    pub fn distances_from(&self, sources: &BTreeSet<String>) -> BTreeMap<String, usize> {
        let mut distances = BTreeMap::new();
        let mut queue = VecDeque::new();
        for source in sources {
            if let Some(idx) = self.index.get(source) {
                if distances.insert(source.clone(), 0).is_none() {
                    queue.push_back((*idx, 0usize));
                }
            }
        }
        while let Some((node, depth)) = queue.pop_front() {
            for neighbor in self.graph.neighbors(node) {
                let name = &self.graph[neighbor];
                if !distances.contains_key(name) {
                    distances.insert(name.clone(), depth + 1);
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        distances
    }

    /// Hop distance between two areas, `None` if either is unknown or unreachable.
    pub fn distance(&self, from: &str, to: &str) -> Option<usize> {
        let sources = BTreeSet::from([from.to_string()]);
        self.distances_from(&sources).get(to).copied()
    }
}

/// Parse a list of `A-B` strings.
pub fn parse_boundaries<S: AsRef<str>>(items: &[S]) -> RaoResult<Vec<Boundary>> {
    items.iter().map(|s| s.as_ref().parse()).collect()
}
