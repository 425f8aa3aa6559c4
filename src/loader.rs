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
//! Parser for topology documents, reconstructing the graph together with the
//! document-index mappings needed by the path engine and the validator.

use std::collections::HashMap;
use std::str::FromStr;

use lazy_static::lazy_static;
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use regex::Regex;

use crate::{
    util::{get_attr, parse_attrs},
    Vn, GATEWAY_VN,
};

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("no virtual nodes found: document contains no {0} records")]
    EmptyDocument(&'static str),
    #[error("{element} record is missing the `{field}` attribute")]
    MissingField {
        element: &'static str,
        field: &'static str,
    },
    #[error("{element} attribute `{field}` has non-numeric value `{value}`")]
    BadField {
        element: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("duplicate vertex index {0} in document")]
    DuplicateIndex(u64),
}

lazy_static! {
    static ref VERTEX_RE: Regex = Regex::new(r"<vertex\s+([^>]*?)/?>").unwrap();
    static ref EDGE_RE: Regex = Regex::new(r"<edge\s+([^>]*?)/?>").unwrap();
}

/// Vertex role as written in the document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum_macros::EnumString,
)]
pub enum Role {
    #[strum(serialize = "gateway")]
    Gateway,
    #[strum(serialize = "virtnode")]
    VirtNode,
}

#[derive(Debug, Clone)]
pub struct LoadedVertex {
    /// Dense internal index from the document.
    pub doc_idx: u64,
    pub role: Role,
    /// Virtual-node index; [`GATEWAY_VN`] for gateways.
    pub vn: Vn,
    /// Every document attribute, copied verbatim.
    pub attrs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LoadedEdge {
    pub doc_idx: u64,
    /// Every document attribute, copied verbatim. The engine resolves its
    /// weight attribute against this map.
    pub attrs: HashMap<String, String>,
}

/// A loaded topology document: the graph plus the index mappings, owned as a
/// unit and borrowed by consumers for the duration of one pass.
#[derive(Debug)]
pub struct LoadedTopology {
    pub graph: Graph<LoadedVertex, LoadedEdge>,
    /// Document vertex index -> graph node.
    pub vertices: HashMap<u64, NodeIndex>,
    /// Virtual-node index -> graph node.
    pub virtnodes: HashMap<Vn, NodeIndex>,
    /// Document edge index -> graph edge.
    pub edges: HashMap<u64, EdgeIndex>,
    /// Edge records whose endpoints did not resolve; counted and reported,
    /// never silently dropped.
    pub dangling_edges: Vec<u64>,
}

impl LoadedTopology {
    /// Virtual nodes in document order.
    pub fn virtual_nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph
            .node_indices()
            .filter(|&n| self.graph[n].vn != GATEWAY_VN)
    }

    pub fn node_by_vn(&self, vn: Vn) -> Option<NodeIndex> {
        self.virtnodes.get(&vn).copied()
    }

    pub fn vn_of(&self, node: NodeIndex) -> Vn {
        self.graph[node].vn
    }
}

fn required<'a>(
    attrs: &'a [(String, String)],
    element: &'static str,
    field: &'static str,
) -> Result<&'a str, LoaderError> {
    get_attr(attrs, field).ok_or(LoaderError::MissingField { element, field })
}

fn numeric<T: FromStr>(
    raw: &str,
    element: &'static str,
    field: &'static str,
) -> Result<T, LoaderError> {
    raw.parse().map_err(|_| LoaderError::BadField {
        element,
        field,
        value: raw.to_string(),
    })
}

/// Parse a topology document into a [`LoadedTopology`].
pub fn load_topology(content: &str) -> Result<LoadedTopology, LoaderError> {
    let mut graph = Graph::new();
    let mut vertices = HashMap::new();
    let mut virtnodes = HashMap::new();

    for caps in VERTEX_RE.captures_iter(content) {
        let attrs = parse_attrs(&caps[1]);
        let doc_idx: u64 = numeric(required(&attrs, "vertex", "int_idx")?, "vertex", "int_idx")?;
        let role = get_attr(&attrs, "role")
            .and_then(|r| Role::from_str(r).ok())
            .unwrap_or(Role::VirtNode);
        let vn = match role {
            Role::Gateway => GATEWAY_VN,
            Role::VirtNode => match get_attr(&attrs, "int_vn") {
                Some(raw) => numeric(raw, "vertex", "int_vn")?,
                None => GATEWAY_VN,
            },
        };
        let node = graph.add_node(LoadedVertex {
            doc_idx,
            role,
            vn,
            attrs: attrs.into_iter().collect(),
        });
        if vertices.insert(doc_idx, node).is_some() {
            return Err(LoaderError::DuplicateIndex(doc_idx));
        }
        if vn != GATEWAY_VN {
            virtnodes.insert(vn, node);
        }
    }

    if vertices.is_empty() {
        return Err(LoaderError::EmptyDocument("vertex"));
    }

    let mut edges = HashMap::new();
    let mut dangling_edges = Vec::new();
    let mut num_edges = 0usize;

    for caps in EDGE_RE.captures_iter(content) {
        let attrs = parse_attrs(&caps[1]);
        let doc_idx: u64 = numeric(required(&attrs, "edge", "int_idx")?, "edge", "int_idx")?;
        let src: u64 = numeric(required(&attrs, "edge", "int_src")?, "edge", "int_src")?;
        let dst: u64 = numeric(required(&attrs, "edge", "int_dst")?, "edge", "int_dst")?;
        num_edges += 1;

        let (Some(&src_node), Some(&dst_node)) = (vertices.get(&src), vertices.get(&dst)) else {
            log::warn!("edge {doc_idx} references unknown vertex ({src} -> {dst})");
            dangling_edges.push(doc_idx);
            continue;
        };

        let edge = graph.add_edge(
            src_node,
            dst_node,
            LoadedEdge {
                doc_idx,
                attrs: attrs.into_iter().collect(),
            },
        );
        edges.insert(doc_idx, edge);
    }

    if num_edges == 0 {
        return Err(LoaderError::EmptyDocument("edge"));
    }

    if !dangling_edges.is_empty() {
        log::warn!(
            "{} of {} edge records have dangling endpoints",
            dangling_edges.len(),
            num_edges
        );
    }

    Ok(LoadedTopology {
        graph,
        vertices,
        virtnodes,
        edges,
        dangling_edges,
    })
}
