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
//! Serializer converting a [`TopoGraph`] into the ModelNet topology document
//! (`<topology>` with vertices, edges and link-class specs).

use std::collections::HashSet;
use std::io::Write;

use itertools::Itertools;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::graph::{TopoGraph, Vertex, VertexClass};

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("vertex `{vertex}` carries non-numeric bandwidth `{value}`")]
    BadBandwidth { vertex: String, value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Link class assigned to each emitted edge record. A label only; never used
/// for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkClass {
    #[strum(serialize = "client-stub")]
    ClientStub,
    #[strum(serialize = "stub-stub")]
    StubStub,
}

/// Resolved bandwidth of a physical link.
///
/// Relay (dotted-quad) endpoints store bandwidth in bytes and are converted
/// to bits (x8); client endpoints already store bits and are taken as-is.
/// The unit mismatch is inherited from the upstream model files and must not
/// be "fixed" here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bandwidth {
    Symmetric(f64),
    Asymmetric { down: f64, up: f64 },
    Absent,
}

impl Bandwidth {
    /// Value emitted on the forward record (`int_dst` = first endpoint).
    fn forward(&self) -> Option<f64> {
        match self {
            Self::Symmetric(v) => Some(*v),
            Self::Asymmetric { up, .. } => Some(*up),
            Self::Absent => None,
        }
    }

    /// Value emitted on the synthesized reverse record.
    fn reverse(&self) -> Option<f64> {
        match self {
            Self::Symmetric(v) => Some(*v),
            Self::Asymmetric { down, .. } => Some(*down),
            Self::Absent => None,
        }
    }
}

/// Attribute projection copied onto virtual-node vertex records, with the
/// output field each source attribute is renamed to.
const VERT_PROJECTION: [(&str, &str); 7] = [
    ("bandwidth (kb/s)", "bw"),
    ("ip address", "ip_address"),
    ("router name", "nickname"),
    ("as", "as"),
    ("nodetype", "nodetype"),
    ("flag - exit", "exit"),
    ("flag - authority", "authority"),
];

/// Write the complete topology document for `gr`.
pub fn write_topology<W: Write>(gr: &TopoGraph, out: &mut W) -> Result<(), TopologyError> {
    writeln!(out, r#"<?xml version="1.0" encoding="ISO-8859-1"?>"#)?;
    writeln!(out, "<topology>")?;
    write_vertices(gr, out)?;
    write_edges(gr, out)?;
    write_specs(out)?;
    writeln!(out, "</topology>")?;
    Ok(())
}

fn write_vertices<W: Write>(gr: &TopoGraph, out: &mut W) -> Result<(), TopologyError> {
    writeln!(out, "<vertices>")?;
    let mut vert_num = 0usize;
    for idx in gr.graph.node_indices() {
        let vertex = &gr.graph[idx];
        if vertex.class.is_virtual() {
            writeln!(
                out,
                r#"<vertex int_idx="{}" role="virtnode" int_vn="{}" {}/>"#,
                idx.index(),
                vert_num,
                node_info(vertex)
            )?;
            vert_num += 1;
        } else {
            writeln!(out, r#"<vertex int_idx="{}" role="gateway"/>"#, idx.index())?;
        }
    }
    writeln!(out, "</vertices>")?;
    Ok(())
}

fn node_info(vertex: &Vertex) -> String {
    let projected = vertex
        .attrs
        .iter()
        .filter_map(|(key, val)| {
            VERT_PROJECTION
                .iter()
                .find(|(src, _)| src == key)
                .map(|(_, renamed)| format!("{renamed}='{val}'"))
        })
        .join(" ");
    format!(" {projected} ")
}

fn link_class(a: &Vertex, b: &Vertex) -> LinkClass {
    let touches_host = |v: &Vertex| matches!(v.class, VertexClass::Relay | VertexClass::Client);
    if touches_host(a) || touches_host(b) {
        LinkClass::ClientStub
    } else {
        LinkClass::StubStub
    }
}

fn resolve_bandwidth(a: &Vertex, b: &Vertex) -> Result<Bandwidth, TopologyError> {
    fn symmetric(v: &Vertex) -> Result<Bandwidth, TopologyError> {
        match v.attrs.get("bandwidth (kb/s)") {
            None => Ok(Bandwidth::Absent),
            Some(raw) => raw
                .parse::<f64>()
                .map(|bytes| Bandwidth::Symmetric(bytes * 8.0))
                .map_err(|_| TopologyError::BadBandwidth {
                    vertex: v.name.clone(),
                    value: raw.clone(),
                }),
        }
    }

    fn client_bw(v: &Vertex, key: &str) -> Result<Option<f64>, TopologyError> {
        match v.attrs.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|_| TopologyError::BadBandwidth {
                    vertex: v.name.clone(),
                    value: raw.clone(),
                }),
        }
    }

    // Client bandwidths are already in bits/s; orientation depends on which
    // endpoint is the client.
    fn asymmetric(v: &Vertex, swapped: bool) -> Result<Bandwidth, TopologyError> {
        let (Some(download), Some(upload)) =
            (client_bw(v, "download_bw")?, client_bw(v, "upload_bw")?)
        else {
            return Ok(Bandwidth::Absent);
        };
        Ok(if swapped {
            Bandwidth::Asymmetric {
                down: upload,
                up: download,
            }
        } else {
            Bandwidth::Asymmetric {
                down: download,
                up: upload,
            }
        })
    }

    if a.class == VertexClass::Relay {
        symmetric(a)
    } else if b.class == VertexClass::Relay {
        symmetric(b)
    } else if a.class == VertexClass::Client {
        asymmetric(a, false)
    } else if b.class == VertexClass::Client {
        asymmetric(b, true)
    } else {
        Ok(Bandwidth::Absent)
    }
}

fn bw_field(kbps: Option<f64>) -> String {
    kbps.map(|v| format!(r#"dbl_kbps="{v:?}""#)).unwrap_or_default()
}

fn write_edges<W: Write>(gr: &TopoGraph, out: &mut W) -> Result<(), TopologyError> {
    // One record per ordered (dst, src) pair; a source edge yields the
    // forward record plus a synthesized reverse record, each deduplicated
    // independently. Indices ascend globally over all emitted records.
    let mut written: HashSet<(usize, usize)> = HashSet::new();
    let mut all_idx = 0u64;

    write!(out, "<edges>")?;
    for edge in gr.graph.edge_references() {
        let (a, b): (NodeIndex, NodeIndex) = (edge.source(), edge.target());
        let (va, vb) = (&gr.graph[a], &gr.graph[b]);
        let bw = resolve_bandwidth(va, vb)?;
        let spec = link_class(va, vb);
        let delay = edge.weight().delay_ms.trunc() as i64;
        let (ai, bi) = (a.index(), b.index());

        if !written.contains(&(ai, bi)) {
            writeln!(
                out,
                r#"<edge int_dst="{ai}" int_src="{bi}" int_idx="{all_idx}" specs="{spec}" int_delayms="{delay}" {}/>"#,
                bw_field(bw.forward())
            )?;
            written.insert((ai, bi));
            all_idx += 1;
        }

        if !written.contains(&(bi, ai)) {
            writeln!(
                out,
                r#"<edge int_dst="{bi}" int_src="{ai}" int_idx="{all_idx}" specs="{spec}" int_delayms="{delay}" {}/>"#,
                bw_field(bw.reverse())
            )?;
            written.insert((bi, ai));
            all_idx += 1;
        }
    }
    writeln!(out, "</edges>")?;
    Ok(())
}

fn write_specs<W: Write>(out: &mut W) -> Result<(), TopologyError> {
    writeln!(out, r#"<specs xmloutbug="workaround">"#)?;
    writeln!(
        out,
        r#"<client-stub dbl_plr="0" dbl_kbps="10000000" int_delayms="0" int_qlen="100"/>"#
    )?;
    writeln!(
        out,
        r#"<stub-stub dbl_plr="0" dbl_kbps="10000000" int_delayms="0" int_qlen="100"/>"#
    )?;
    writeln!(out, "</specs>")?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn render(gr: &TopoGraph) -> String {
        let mut out = Vec::new();
        write_topology(gr, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn edge_lines(doc: &str) -> Vec<&str> {
        doc.lines()
            .flat_map(|l| l.split("<edges>"))
            .filter(|l| l.starts_with("<edge "))
            .collect()
    }

    #[test]
    fn test_relay_bandwidth_symmetric_times_eight() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("192_168_1_1", attrs(&[("bandwidth (kb/s)", "125")]))
            .unwrap();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_link("192_168_1_1", "router_1", 5.0, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        let edges = edge_lines(&doc);
        assert_eq!(edges.len(), 2);
        for line in &edges {
            assert!(line.contains(r#"dbl_kbps="1000.0""#), "line: {line}");
            assert!(line.contains(r#"specs="client-stub""#));
            assert!(line.contains(r#"int_delayms="5""#));
        }
    }

    #[test]
    fn test_client_bandwidth_asymmetric_not_converted() {
        let mut gr = TopoGraph::new();
        gr.add_vertex(
            "client_node_0",
            attrs(&[("download_bw", "6000"), ("upload_bw", "1500")]),
        )
        .unwrap();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_link("client_node_0", "router_1", 20.0, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        let edges = edge_lines(&doc);
        assert_eq!(edges.len(), 2);
        // forward record (int_dst = client) carries the upload bandwidth
        assert!(edges[0].contains(r#"int_dst="0" int_src="1""#));
        assert!(edges[0].contains(r#"dbl_kbps="1500.0""#));
        // reverse record carries the download bandwidth
        assert!(edges[1].contains(r#"int_dst="1" int_src="0""#));
        assert!(edges[1].contains(r#"dbl_kbps="6000.0""#));
    }

    #[test]
    fn test_gateway_link_has_no_bandwidth() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_vertex("router_2", BTreeMap::new()).unwrap();
        gr.add_link("router_1", "router_2", 7.9, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        for line in edge_lines(&doc) {
            assert!(!line.contains("dbl_kbps"), "line: {line}");
            assert!(line.contains(r#"specs="stub-stub""#));
            // latency is truncated, not rounded
            assert!(line.contains(r#"int_delayms="7""#));
        }
    }

    #[test]
    fn test_edge_dedup_both_directions_present() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_vertex("router_2", BTreeMap::new()).unwrap();
        // the upstream graph stores the link once per direction
        gr.add_link("router_1", "router_2", 3.0, BTreeMap::new())
            .unwrap();
        gr.add_link("router_2", "router_1", 3.0, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        let edges = edge_lines(&doc);
        assert_eq!(edges.len(), 2);

        let mut seen = HashSet::new();
        for line in &edges {
            let attrs = crate::util::parse_attrs(line);
            let dst = crate::util::get_attr(&attrs, "int_dst").unwrap().to_string();
            let src = crate::util::get_attr(&attrs, "int_src").unwrap().to_string();
            assert!(seen.insert((dst, src)), "duplicate record: {line}");
        }
    }

    #[test]
    fn test_edge_indices_ascend_globally() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("192_168_1_1", attrs(&[("bandwidth (kb/s)", "10")]))
            .unwrap();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_vertex("router_2", BTreeMap::new()).unwrap();
        gr.add_link("192_168_1_1", "router_1", 1.0, BTreeMap::new())
            .unwrap();
        gr.add_link("router_1", "router_2", 1.0, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        let indices: Vec<u64> = edge_lines(&doc)
            .iter()
            .map(|l| {
                let attrs = crate::util::parse_attrs(l);
                crate::util::get_attr(&attrs, "int_idx")
                    .unwrap()
                    .parse()
                    .unwrap()
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_non_numeric_bandwidth_is_an_error() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("192_168_1_1", attrs(&[("bandwidth (kb/s)", "fast")]))
            .unwrap();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_link("192_168_1_1", "router_1", 1.0, BTreeMap::new())
            .unwrap();

        let mut out = Vec::new();
        assert!(matches!(
            write_topology(&gr, &mut out),
            Err(TopologyError::BadBandwidth { .. })
        ));
    }

    #[test]
    fn test_missing_client_bandwidth_fails_soft() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("client_node_0", attrs(&[("download_bw", "6000")]))
            .unwrap();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        gr.add_link("client_node_0", "router_1", 1.0, BTreeMap::new())
            .unwrap();

        let doc = render(&gr);
        for line in edge_lines(&doc) {
            assert!(!line.contains("dbl_kbps"), "line: {line}");
        }
    }

    #[test]
    fn test_vertex_projection_and_vn_assignment() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", attrs(&[("bandwidth (kb/s)", "999")]))
            .unwrap();
        gr.add_vertex(
            "192_168_1_1",
            attrs(&[
                ("bandwidth (kb/s)", "125"),
                ("ip address", "192.168.1.1"),
                ("router name", "relay1"),
                ("nodetype", "tor_relay"),
                ("flag - exit", "1"),
                ("secret", "dropme"),
            ]),
        )
        .unwrap();
        gr.add_vertex("client_node_0", BTreeMap::new()).unwrap();

        let doc = render(&gr);
        // gateways emit no projection, even if they carry attributes
        assert!(doc.contains(r#"<vertex int_idx="0" role="gateway"/>"#));
        // virtual indices are dense and skip the gateway
        let relay_line = doc
            .lines()
            .find(|l| l.contains(r#"int_idx="1""#))
            .unwrap();
        assert!(relay_line.contains(r#"role="virtnode""#));
        assert!(relay_line.contains(r#"int_vn="0""#));
        assert!(relay_line.contains("bw='125'"));
        assert!(relay_line.contains("ip_address='192.168.1.1'"));
        assert!(relay_line.contains("nickname='relay1'"));
        assert!(relay_line.contains("nodetype='tor_relay'"));
        assert!(relay_line.contains("exit='1'"));
        // non-allow-listed attributes are dropped
        assert!(!relay_line.contains("secret"));

        let client_line = doc
            .lines()
            .find(|l| l.contains(r#"int_idx="2""#))
            .unwrap();
        assert!(client_line.contains(r#"int_vn="1""#));
    }

    #[test]
    fn test_specs_section_is_static() {
        let mut gr = TopoGraph::new();
        gr.add_vertex("router_1", BTreeMap::new()).unwrap();
        let doc = render(&gr);
        assert!(doc.contains(r#"<specs xmloutbug="workaround">"#));
        assert!(doc.contains(
            r#"<client-stub dbl_plr="0" dbl_kbps="10000000" int_delayms="0" int_qlen="100"/>"#
        ));
        assert!(doc.contains(
            r#"<stub-stub dbl_plr="0" dbl_kbps="10000000" int_delayms="0" int_qlen="100"/>"#
        ));
        assert!(doc.trim_end().ends_with("</topology>"));
    }
}
