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
//! Library for generating ModelNet/ExperimenTor topology files from graph
//! descriptions of Tor-like networks, and for validating the resulting
//! emulated path latencies against live measurements.

/// Virtual-node index as it appears in topology and model documents. Gateway
/// nodes carry the sentinel `-1`.
pub type Vn = i64;

/// Link latency in milliseconds.
pub type Delay = u64;

/// Sentinel `vn` value of a gateway node in a loaded topology document.
pub const GATEWAY_VN: Vn = -1;

pub mod graph;
pub mod loader;
pub mod markup;
pub mod model;
pub mod paths;
pub mod topology;
pub mod util;
pub mod validate;

pub mod prelude {
    pub use super::{
        graph::{TopoGraph, VertexClass},
        loader::{load_topology, LoadedTopology},
        model::{load_model, select_sample, SamplePair},
        paths::{PathEngine, PathRecord},
        topology::write_topology,
        validate::{Prober, RouteTable, Validator},
        Delay, Vn, GATEWAY_VN,
    };
}
