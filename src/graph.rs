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
//! In-memory model of an attributed topology graph as produced by the
//! upstream topology generator.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate vertex identifier `{0}`")]
    DuplicateVertex(String),
    #[error("link endpoint `{0}` does not name a known vertex")]
    UnknownVertex(String),
    #[error("link {0} -> {1} has negative delay {2}")]
    NegativeDelay(String, String, f64),
}

lazy_static! {
    static ref RELAY_RE: Regex = Regex::new(r"^([0-9]{1,3}_){3}[0-9]{1,3}").unwrap();
    static ref CLIENT_RE: Regex = Regex::new(r"^client_node_[0-9]+").unwrap();
    static ref DEST_RE: Regex = Regex::new(r"^dest_node_[0-9]+").unwrap();
}

/// Semantic class of a vertex, derived from its identifier once at
/// construction time. All downstream role decisions are plain field lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum VertexClass {
    /// Underscore-delimited dotted-quad identifier (an emulated relay host).
    Relay,
    /// `client_node_<n>` identifier.
    Client,
    /// `dest_node_<n>` identifier.
    Dest,
    /// Pure routing infrastructure without a virtual-node role.
    Gateway,
}

impl VertexClass {
    pub fn classify(name: &str) -> Self {
        if RELAY_RE.is_match(name) {
            Self::Relay
        } else if CLIENT_RE.is_match(name) {
            Self::Client
        } else if DEST_RE.is_match(name) {
            Self::Dest
        } else {
            Self::Gateway
        }
    }

    /// Virtual nodes are addressable emulated hosts and receive a dense
    /// `int_vn` index during serialization; gateways do not.
    pub fn is_virtual(&self) -> bool {
        !matches!(self, Self::Gateway)
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub name: String,
    pub class: VertexClass,
    pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Link {
    /// Link latency in milliseconds (truncated to an integer on emission).
    pub delay_ms: f64,
    pub attrs: BTreeMap<String, String>,
}

/// An attributed topology graph. Vertices and links keep their insertion
/// order, which doubles as the dense internal index space used by the
/// topology document format.
#[derive(Debug, Default)]
pub struct TopoGraph {
    pub graph: Graph<Vertex, Link>,
    names: HashMap<String, NodeIndex>,
}

impl TopoGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(
        &mut self,
        name: impl Into<String>,
        attrs: BTreeMap<String, String>,
    ) -> Result<NodeIndex, GraphError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateVertex(name));
        }
        let class = VertexClass::classify(&name);
        let idx = self.graph.add_node(Vertex {
            name: name.clone(),
            class,
            attrs,
        });
        self.names.insert(name, idx);
        Ok(idx)
    }

    pub fn add_link(
        &mut self,
        src: &str,
        dst: &str,
        delay_ms: f64,
        attrs: BTreeMap<String, String>,
    ) -> Result<EdgeIndex, GraphError> {
        let a = self.vertex(src)?;
        let b = self.vertex(dst)?;
        if delay_ms < 0.0 {
            return Err(GraphError::NegativeDelay(
                src.to_string(),
                dst.to_string(),
                delay_ms,
            ));
        }
        Ok(self.graph.add_edge(a, b, Link { delay_ms, attrs }))
    }

    pub fn vertex(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownVertex(name.to_string()))
    }

    pub fn num_vertices(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_links(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(VertexClass::classify("192_168_1_1"), VertexClass::Relay);
        assert_eq!(VertexClass::classify("10_0_0_254"), VertexClass::Relay);
        assert_eq!(VertexClass::classify("client_node_0"), VertexClass::Client);
        assert_eq!(VertexClass::classify("dest_node_12"), VertexClass::Dest);
        assert_eq!(VertexClass::classify("router_7"), VertexClass::Gateway);
        assert_eq!(VertexClass::classify("pop_nyc"), VertexClass::Gateway);

        assert!(VertexClass::Relay.is_virtual());
        assert!(VertexClass::Client.is_virtual());
        assert!(VertexClass::Dest.is_virtual());
        assert!(!VertexClass::Gateway.is_virtual());
    }

    #[test]
    fn test_duplicate_vertex_rejected() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        assert!(matches!(
            gr.add_vertex("router_1", BTreeMap::new()),
            Err(GraphError::DuplicateVertex(_))
        ));
    }

    #[test]
    fn test_link_endpoints_must_exist() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        assert!(matches!(
            gr.add_link("router_1", "router_2", 10.0, BTreeMap::new()),
            Err(GraphError::UnknownVertex(_))
        ));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("a_1", BTreeMap::new()).unwrap();
        gr.add_vertex("b_1", BTreeMap::new()).unwrap();
        assert!(matches!(
            gr.add_link("a_1", "b_1", -1.0, BTreeMap::new()),
            Err(GraphError::NegativeDelay(_, _, _))
        ));
    }

    #[test]
    fn test_insertion_order_is_index_order() {
        let mut gr = TopoGraph::new();
        let a = gr.add_vertex("192_168_1_1", BTreeMap::new()).unwrap();
        let b = gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        let c = gr.add_vertex("client_node_0", BTreeMap::new()).unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
    }
}
