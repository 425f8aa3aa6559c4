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
//! Model-file handling: virtual-node records, validation-pair sampling, and
//! the hop/node consistency check.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::{
    util::{get_attr, parse_attrs},
    Vn,
};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("no virtual nodes found in the model file")]
    NoVirtNodes,
    #[error("virtnode record is missing the `int_vn` attribute")]
    MissingVn,
    #[error("virtnode attribute `int_vn` has non-numeric value `{0}`")]
    BadVn(String),
    #[error("cannot sample {want} nodes of type `{nodetype}`: only {have} available")]
    SampleTooLarge {
        want: usize,
        have: usize,
        nodetype: String,
    },
}

lazy_static! {
    static ref VIRTNODE_RE: Regex = Regex::new(r"<virtnode\s+([^>]*?)/?>").unwrap();
    static ref HOP_RE: Regex = Regex::new(r"<hop\s+([^>]*?)/?>").unwrap();
}

/// One `<virtnode>` record from a model file.
#[derive(Debug, Clone)]
pub struct VirtNode {
    pub vn: Vn,
    pub vip: String,
    pub nodetype: String,
    pub attrs: HashMap<String, String>,
}

/// One endpoint of a validation pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleEndpoint {
    pub vn: Vn,
    pub ip: String,
}

/// An ordered pair of sampled virtual nodes. Self-pairs are kept here and
/// skipped at comparison time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplePair {
    pub a: SampleEndpoint,
    pub b: SampleEndpoint,
}

/// Parse all virtnode records from a model document.
pub fn load_model(content: &str) -> Result<Vec<VirtNode>, ModelError> {
    let mut nodes = Vec::new();
    for caps in VIRTNODE_RE.captures_iter(content) {
        let attrs = parse_attrs(&caps[1]);
        let raw_vn = get_attr(&attrs, "int_vn").ok_or(ModelError::MissingVn)?;
        let vn = raw_vn
            .parse()
            .map_err(|_| ModelError::BadVn(raw_vn.to_string()))?;
        nodes.push(VirtNode {
            vn,
            vip: get_attr(&attrs, "vip").unwrap_or_default().to_string(),
            nodetype: get_attr(&attrs, "nodetype").unwrap_or_default().to_string(),
            attrs: attrs.into_iter().collect(),
        });
    }
    if nodes.is_empty() {
        return Err(ModelError::NoVirtNodes);
    }
    Ok(nodes)
}

/// Draw two independent without-replacement samples of `n` nodes with the
/// given nodetype and zip them into ordered pairs.
pub fn select_sample<R: Rng + ?Sized>(
    nodes: &[VirtNode],
    nodetype: &str,
    n: usize,
    rng: &mut R,
) -> Result<Vec<SamplePair>, ModelError> {
    let eligible: Vec<&VirtNode> = nodes.iter().filter(|v| v.nodetype == nodetype).collect();
    if eligible.len() < n {
        return Err(ModelError::SampleTooLarge {
            want: n,
            have: eligible.len(),
            nodetype: nodetype.to_string(),
        });
    }

    let endpoint = |v: &&VirtNode| SampleEndpoint {
        vn: v.vn,
        ip: v.vip.clone(),
    };
    let set1: Vec<SampleEndpoint> = eligible.choose_multiple(rng, n).map(endpoint).collect();
    let set2: Vec<SampleEndpoint> = eligible.choose_multiple(rng, n).map(endpoint).collect();

    Ok(set1
        .into_iter()
        .zip(set2)
        .map(|(a, b)| SamplePair { a, b })
        .collect())
}

/// Result of the model consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCheck {
    /// Virtual nodes never referenced as both a hop source and destination.
    pub nodes_missing_hops: usize,
    /// Hop endpoint references to nonexistent virtual nodes.
    pub hops_missing_nodes: usize,
}

/// Cross-check the virtnode and hop sections of a model file: every virtual
/// node should be touched by at least one hop in each direction, and every
/// hop endpoint should name an existing node.
pub fn check_model(content: &str) -> Result<ModelCheck, ModelError> {
    let nodes = load_model(content)?;
    let known: HashSet<Vn> = nodes.iter().map(|v| v.vn).collect();

    let mut has_src: HashSet<Vn> = HashSet::new();
    let mut has_dst: HashSet<Vn> = HashSet::new();
    let mut hops_missing_nodes = 0usize;

    for caps in HOP_RE.captures_iter(content) {
        let attrs = parse_attrs(&caps[1]);
        let hop_idx = get_attr(&attrs, "int_idx").unwrap_or("?");
        for (field, seen) in [("int_src", &mut has_src), ("int_dst", &mut has_dst)] {
            match get_attr(&attrs, field).and_then(|r| r.parse::<Vn>().ok()) {
                Some(vn) if known.contains(&vn) => {
                    seen.insert(vn);
                }
                Some(vn) => {
                    log::warn!("hop {hop_idx} has nonexistent {field} {vn}");
                    hops_missing_nodes += 1;
                }
                None => {
                    log::warn!("hop {hop_idx} has no usable {field}");
                    hops_missing_nodes += 1;
                }
            }
        }
    }

    let nodes_missing_hops = known
        .iter()
        .filter(|vn| !has_src.contains(vn) || !has_dst.contains(vn))
        .count();

    Ok(ModelCheck {
        nodes_missing_hops,
        hops_missing_nodes,
    })
}
