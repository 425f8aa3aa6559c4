// EMTOR: Generation and Validation of ModelNet Topologies for Emulated Tor Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Shortest-path computation between virtual nodes: Dijkstra over a named
//! edge-weight attribute, or BFS hop counts when no weight is given.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::io::Write;

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use priority_queue::PriorityQueue;
use rayon::prelude::*;

use crate::{loader::LoadedTopology, Delay, Vn};

#[derive(Debug, thiserror::Error)]
pub enum PathsError {
    #[error("edge {edge} has no usable weight attribute `{attr}` (value: {value:?})")]
    BadWeight {
        edge: u64,
        attr: String,
        value: Option<String>,
    },
}

/// A concrete route between two virtual nodes, expressed as document edge
/// indices in traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub vn_src: Vn,
    pub vn_dst: Vn,
    pub hops: Vec<u64>,
}

/// Shortest-path engine over a loaded topology. Gateways may appear as
/// intermediate hops but never as path endpoints.
pub struct PathEngine<'a> {
    topo: &'a LoadedTopology,
    /// Per-edge weight, indexed by petgraph edge index; `None` = hop counts.
    weights: Option<Vec<Delay>>,
}

impl<'a> PathEngine<'a> {
    /// Build an engine; `weight` names the edge attribute to minimize over
    /// (e.g. `int_delayms`). `None` selects unweighted hop counts.
    pub fn new(topo: &'a LoadedTopology, weight: Option<&str>) -> Result<Self, PathsError> {
        let weights = match weight {
            None => None,
            Some(attr) => {
                let mut weights = vec![0; topo.graph.edge_count()];
                for edge in topo.graph.edge_indices() {
                    let data = &topo.graph[edge];
                    let raw = data.attrs.get(attr);
                    let parsed = raw.and_then(|r| r.parse::<Delay>().ok());
                    weights[edge.index()] =
                        parsed.ok_or_else(|| PathsError::BadWeight {
                            edge: data.doc_idx,
                            attr: attr.to_string(),
                            value: raw.cloned(),
                        })?;
                }
                Some(weights)
            }
        };
        Ok(Self { topo, weights })
    }

    /// Shortest-path tree rooted at `src`: distance and predecessor edge per
    /// reached node.
    fn single_source(
        &self,
        src: NodeIndex,
    ) -> (
        HashMap<NodeIndex, Delay>,
        HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
    ) {
        match &self.weights {
            Some(weights) => self.dijkstra(src, weights),
            None => self.bfs(src),
        }
    }

    fn dijkstra(
        &self,
        src: NodeIndex,
        weights: &[Delay],
    ) -> (
        HashMap<NodeIndex, Delay>,
        HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
    ) {
        let mut dist: HashMap<NodeIndex, Delay> = HashMap::new();
        let mut prev: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
        let mut queue: PriorityQueue<NodeIndex, Reverse<Delay>> = PriorityQueue::new();

        dist.insert(src, 0);
        queue.push(src, Reverse(0));

        while let Some((node, Reverse(d))) = queue.pop() {
            for edge in self.topo.graph.edges(node) {
                let next = edge.target();
                let candidate = d + weights[edge.id().index()];
                if dist.get(&next).map_or(true, |&best| candidate < best) {
                    dist.insert(next, candidate);
                    prev.insert(next, (node, edge.id()));
                    queue.push_increase(next, Reverse(candidate));
                }
            }
        }

        (dist, prev)
    }

    fn bfs(
        &self,
        src: NodeIndex,
    ) -> (
        HashMap<NodeIndex, Delay>,
        HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
    ) {
        let mut dist: HashMap<NodeIndex, Delay> = HashMap::new();
        let mut prev: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
        let mut queue = VecDeque::new();

        dist.insert(src, 0);
        queue.push_back(src);

        while let Some(node) = queue.pop_front() {
            let d = dist[&node];
            for edge in self.topo.graph.edges(node) {
                let next = edge.target();
                if !dist.contains_key(&next) {
                    dist.insert(next, d + 1);
                    prev.insert(next, (node, edge.id()));
                    queue.push_back(next);
                }
            }
        }

        (dist, prev)
    }

    /// Walk the predecessor map back from `dst`, returning document edge
    /// indices in forward order.
    fn hops_to(
        &self,
        prev: &HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
        src: NodeIndex,
        dst: NodeIndex,
    ) -> Option<Vec<u64>> {
        let mut hops = Vec::new();
        let mut cur = dst;
        while cur != src {
            let &(parent, edge) = prev.get(&cur)?;
            hops.push(self.topo.graph[edge].doc_idx);
            cur = parent;
        }
        hops.reverse();
        Some(hops)
    }

    /// All path records from one source to every other virtual node, in
    /// destination vn order.
    fn records_from(&self, src: NodeIndex) -> Vec<PathRecord> {
        let (dist, prev) = self.single_source(src);
        let vn_src = self.topo.vn_of(src);
        self.topo
            .virtual_nodes()
            .filter(|&dst| dst != src && dist.contains_key(&dst))
            .sorted_by_key(|&dst| self.topo.vn_of(dst))
            .filter_map(|dst| {
                self.hops_to(&prev, src, dst).map(|hops| PathRecord {
                    vn_src,
                    vn_dst: self.topo.vn_of(dst),
                    hops,
                })
            })
            .collect()
    }

    /// Compute one record per ordered pair of distinct virtual nodes. The
    /// per-source computations run in parallel but results are merged in
    /// source order, so the output matches a sequential pass.
    pub fn all_pairs(&self) -> Vec<PathRecord> {
        let sources: Vec<NodeIndex> = self.topo.virtual_nodes().collect();
        let bar = ProgressBar::new(sources.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{wide_bar} routed {pos}/{len} nodes, eta: {eta}")
                .unwrap(),
        );

        let per_source: Vec<Vec<PathRecord>> = sources
            .par_iter()
            .map(|&src| {
                let records = self.records_from(src);
                bar.inc(1);
                records
            })
            .collect();
        bar.finish_and_clear();

        per_source.into_iter().flatten().collect()
    }

    /// Sampled mode: records (and total distances) for the given pairs only.
    /// Numerically identical to [`Self::all_pairs`] for any shared pair.
    pub fn paths_between(&self, pairs: &[(Vn, Vn)]) -> Vec<(PathRecord, Delay)> {
        let mut trees: HashMap<NodeIndex, _> = HashMap::new();
        let mut results = Vec::new();
        for &(vn_src, vn_dst) in pairs {
            if vn_src == vn_dst {
                continue;
            }
            let (Some(src), Some(dst)) =
                (self.topo.node_by_vn(vn_src), self.topo.node_by_vn(vn_dst))
            else {
                log::warn!("unknown virtual node in pair ({vn_src}, {vn_dst})");
                continue;
            };
            let (dist, prev) = trees
                .entry(src)
                .or_insert_with(|| self.single_source(src));
            let Some(&cost) = dist.get(&dst) else {
                log::warn!("no path from vn {vn_src} to vn {vn_dst}");
                continue;
            };
            if let Some(hops) = self.hops_to(prev, src, dst) {
                results.push((
                    PathRecord {
                        vn_src,
                        vn_dst,
                        hops,
                    },
                    cost,
                ));
            }
        }
        results
    }

    /// Record and total weight for a single pair, if a path exists.
    pub fn path_between(&self, vn_src: Vn, vn_dst: Vn) -> Option<(PathRecord, Delay)> {
        self.paths_between(&[(vn_src, vn_dst)]).into_iter().next()
    }

    /// Emit the `<allpairs>` path-table document.
    pub fn write_allpairs<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, r#"<?xml version="1.0" encoding="ISO-8859-1"?>"#)?;
        writeln!(out, "<allpairs>")?;
        for record in self.all_pairs() {
            writeln!(
                out,
                r#"<path int_vndst="{}" int_vnsrc="{}" hops="{}"/>"#,
                record.vn_dst,
                record.vn_src,
                record.hops.iter().map(u64::to_string).join(" ")
            )?;
        }
        writeln!(out, "</allpairs>")?;
        Ok(())
    }
}
