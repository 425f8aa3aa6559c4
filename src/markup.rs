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
//! Reader for the topology-generator graph markup: `<node id>` elements with
//! nested `<attribute attr value/>` children, followed by `<edge node1 node2
//! wt>` elements. Each physical link appears once.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    graph::{GraphError, TopoGraph},
    util::{get_attr, parse_attrs},
};

#[derive(Debug, thiserror::Error)]
pub enum MarkupError {
    #[error("document contains no node elements")]
    NoNodes,
    #[error("node element without an `id` attribute")]
    MissingId,
    #[error("edge element without `node1`/`node2` endpoints")]
    MissingEndpoint,
    #[error("edge weight `{0}` is not numeric")]
    BadWeight(String),
    #[error("attribute element outside of a node or edge")]
    StrayAttribute,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

lazy_static! {
    static ref NODE_RE: Regex = Regex::new(r"<node\s+([^>]*?)/?>").unwrap();
    static ref EDGE_RE: Regex = Regex::new(r"<edge\s+([^>]*?)/?>").unwrap();
    static ref ATTRIBUTE_RE: Regex = Regex::new(r"<attribute\s+([^>]*?)/?>").unwrap();
}

enum Pending {
    Node {
        id: String,
        attrs: BTreeMap<String, String>,
    },
    Edge {
        node1: String,
        node2: String,
        wt: f64,
        attrs: BTreeMap<String, String>,
    },
}

/// Parse a graph markup document into a [`TopoGraph`].
pub fn read_graph(content: &str) -> Result<TopoGraph, MarkupError> {
    let mut gr = TopoGraph::new();
    let mut pending: Option<Pending> = None;
    let mut num_nodes = 0usize;

    for line in content.lines() {
        if let Some(caps) = NODE_RE.captures(line) {
            flush(&mut gr, pending.take())?;
            let attrs = parse_attrs(&caps[1]);
            let id = get_attr(&attrs, "id")
                .ok_or(MarkupError::MissingId)?
                .to_string();
            num_nodes += 1;
            pending = Some(Pending::Node {
                id,
                attrs: BTreeMap::new(),
            });
        } else if let Some(caps) = EDGE_RE.captures(line) {
            flush(&mut gr, pending.take())?;
            let attrs = parse_attrs(&caps[1]);
            let node1 = get_attr(&attrs, "node1")
                .ok_or(MarkupError::MissingEndpoint)?
                .to_string();
            let node2 = get_attr(&attrs, "node2")
                .ok_or(MarkupError::MissingEndpoint)?
                .to_string();
            let wt = match get_attr(&attrs, "wt") {
                Some(raw) => raw
                    .parse::<f64>()
                    .map_err(|_| MarkupError::BadWeight(raw.to_string()))?,
                None => 1.0,
            };
            pending = Some(Pending::Edge {
                node1,
                node2,
                wt,
                attrs: BTreeMap::new(),
            });
        } else if let Some(caps) = ATTRIBUTE_RE.captures(line) {
            let parsed = parse_attrs(&caps[1]);
            let key = get_attr(&parsed, "attr").unwrap_or_default().to_string();
            let val = get_attr(&parsed, "value").unwrap_or_default().to_string();
            match pending.as_mut() {
                Some(Pending::Node { attrs, .. }) | Some(Pending::Edge { attrs, .. }) => {
                    attrs.insert(key, val);
                }
                None => return Err(MarkupError::StrayAttribute),
            }
        }
    }
    flush(&mut gr, pending.take())?;

    if num_nodes == 0 {
        return Err(MarkupError::NoNodes);
    }
    Ok(gr)
}

fn flush(gr: &mut TopoGraph, pending: Option<Pending>) -> Result<(), MarkupError> {
    match pending {
        None => {}
        Some(Pending::Node { id, attrs }) => {
            gr.add_vertex(id, attrs)?;
        }
        Some(Pending::Edge {
            node1,
            node2,
            wt,
            attrs,
        }) => {
            gr.add_link(&node1, &node2, wt, attrs)?;
        }
    }
    Ok(())
}
