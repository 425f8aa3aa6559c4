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
//! Empirical path validation: probe sampled node pairs, compare measured
//! one-way latencies against the model's shortest paths, and aggregate the
//! discrepancies.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use petgraph::graph::NodeIndex;
use regex::Regex;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::{
    loader::LoadedTopology,
    model::SamplePair,
    paths::PathEngine,
    Delay, Vn,
};

/// Round-trip samples taken per pair; the second-smallest is kept.
pub const PROBE_COUNT: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe exited with code {code}: {output}")]
    Probe { code: i32, output: String },
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),
    #[error("cannot parse probe output line `{0}`")]
    ProbeOutput(String),
    #[error("route hop {0} does not exist in the topology")]
    UnknownHop(u64),
    #[error("route hop {0} does not share an endpoint with the previous hop")]
    BrokenRoute(u64),
    #[error("virtual node {0} does not exist in the topology")]
    UnknownVn(Vn),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
}

/// Round-trip latency measurement between two emulated endpoints.
pub trait Prober {
    /// Probe `dst` from `src` `count` times, returning round-trip times in
    /// milliseconds.
    fn probe(&self, src: &str, dst: &str, count: usize) -> Result<Vec<f64>, ValidateError>;
}

/// Runs a modelnetping-compatible binary: `<bin> <src> <dst> <count>`, one
/// output line per probe with the RTT as the 8th whitespace field.
pub struct PingProber {
    bin: PathBuf,
    timeout: Duration,
}

impl PingProber {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    fn parse_output(stdout: &[u8], count: usize) -> Result<Vec<f64>, ValidateError> {
        String::from_utf8_lossy(stdout)
            .lines()
            .take(count)
            .map(|line| {
                line.split_whitespace()
                    .nth(7)
                    .and_then(|f| f.parse::<f64>().ok())
                    .ok_or_else(|| ValidateError::ProbeOutput(line.to_string()))
            })
            .collect()
    }
}

impl Prober for PingProber {
    fn probe(&self, src: &str, dst: &str, count: usize) -> Result<Vec<f64>, ValidateError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let output = runtime.block_on(async {
            tokio::time::timeout(
                self.timeout,
                tokio::process::Command::new(&self.bin)
                    .arg(src)
                    .arg(dst)
                    .arg(count.to_string())
                    .stderr(Stdio::null())
                    .output(),
            )
            .await
            .map_err(|_| ValidateError::ProbeTimeout(self.timeout))?
            .map_err(ValidateError::Io)
        })?;

        if !output.status.success() {
            return Err(ValidateError::Probe {
                code: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }
        Self::parse_output(&output.stdout, count)
    }
}

/// Lookup of the emulator's actual route for an ordered virtual-node pair.
pub trait RouteTable {
    /// Document edge indices of the route, or `None` if no record exists.
    fn lookup(&self, vn_src: Vn, vn_dst: Vn) -> Result<Option<Vec<u64>>, ValidateError>;
}

lazy_static! {
    static ref HOPS_RE: Regex = Regex::new(r#"hops="([0-9 ]+)""#).unwrap();
}

/// Scans a route file line by line for the record of one pair. Route files
/// are far too large to parse up front, so each lookup is a fresh scan.
pub struct RouteFile {
    path: PathBuf,
}

impl RouteFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn scan<R: BufRead>(
        reader: R,
        vn_src: Vn,
        vn_dst: Vn,
    ) -> Result<Option<Vec<u64>>, ValidateError> {
        let needle = format!(r#"int_vndst="{vn_dst}" int_vnsrc="{vn_src}""#);
        for line in reader.lines() {
            let line = line?;
            if !line.contains(&needle) {
                continue;
            }
            let hops = HOPS_RE
                .captures(&line)
                .map(|caps| {
                    caps[1]
                        .split_whitespace()
                        .filter_map(|h| h.parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Some(hops));
        }
        Ok(None)
    }
}

impl RouteTable for RouteFile {
    fn lookup(&self, vn_src: Vn, vn_dst: Vn) -> Result<Option<Vec<u64>>, ValidateError> {
        let file = std::fs::File::open(&self.path)?;
        Self::scan(BufReader::new(file), vn_src, vn_dst)
    }
}

/// Translate a route (document edge indices) into the sequence of vertices
/// it passes through, starting at the virtual node `start_vn`. Consecutive
/// hops must share an endpoint.
pub fn route_to_vertices(
    topo: &LoadedTopology,
    start_vn: Vn,
    hops: &[u64],
) -> Result<Vec<NodeIndex>, ValidateError> {
    let start = topo
        .node_by_vn(start_vn)
        .ok_or(ValidateError::UnknownVn(start_vn))?;
    let mut vertices = vec![start];

    for &hop in hops {
        let &edge = topo.edges.get(&hop).ok_or(ValidateError::UnknownHop(hop))?;
        let (src, dst) = topo.graph.edge_endpoints(edge).unwrap();
        let last = *vertices.last().unwrap();
        if src == last {
            vertices.push(dst);
        } else if dst == last {
            vertices.push(src);
        } else {
            return Err(ValidateError::BrokenRoute(hop));
        }
    }

    Ok(vertices)
}

/// Per-pair record written to the validation CSV.
#[derive(Debug, Serialize)]
pub struct PairRecord {
    pub vn_src: Vn,
    pub vn_dst: Vn,
    pub ip_src: String,
    pub ip_dst: String,
    pub model_ms: Delay,
    pub measured_ms: Delay,
    pub latency_diff: Delay,
    pub model_path_len: Option<usize>,
    pub measured_path_len: Option<usize>,
}

/// Append-only discrepancy series collected over one validation pass.
#[derive(Debug, Clone, Default)]
pub struct DiscrepancyStats {
    pub latency_diff: Vec<f64>,
    pub path_len_diff: Vec<f64>,
    pub eq_len_latency_diff: Vec<f64>,
}

/// Arithmetic means of the discrepancy series; `None` where a series stayed
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancySummary {
    pub mismatches: usize,
    pub avg_latency_diff: Option<f64>,
    pub avg_path_len_diff: Option<f64>,
    pub avg_eq_len_latency_diff: Option<f64>,
}

impl DiscrepancyStats {
    pub fn summary(&self) -> DiscrepancySummary {
        fn mean(series: &[f64]) -> Option<f64> {
            (!series.is_empty()).then(|| series.iter().mean())
        }
        DiscrepancySummary {
            mismatches: self.latency_diff.len(),
            avg_latency_diff: mean(&self.latency_diff),
            avg_path_len_diff: mean(&self.path_len_diff),
            avg_eq_len_latency_diff: mean(&self.eq_len_latency_diff),
        }
    }
}

/// Outcome counters of one validation pass.
#[derive(Debug)]
pub struct ValidationReport {
    pub stats: DiscrepancyStats,
    pub pairs_probed: usize,
    pub pairs_skipped: usize,
}

/// Single-pass validator: sample -> for each pair { measure, compare,
/// accumulate } -> summarize. Collaborators are injected so tests can run
/// with deterministic doubles.
pub struct Validator<'a, P, R> {
    topo: &'a LoadedTopology,
    engine: &'a PathEngine<'a>,
    prober: P,
    routes: Option<R>,
}

impl<'a, P: Prober, R: RouteTable> Validator<'a, P, R> {
    pub fn new(
        topo: &'a LoadedTopology,
        engine: &'a PathEngine<'a>,
        prober: P,
        routes: Option<R>,
    ) -> Self {
        Self {
            topo,
            engine,
            prober,
            routes,
        }
    }

    /// Select the round-trip value: sort ascending, keep the second-smallest
    /// of the three samples, halve for a one-way estimate.
    fn one_way_ms(mut rtts: Vec<f64>) -> Delay {
        rtts.sort_by(f64::total_cmp);
        (rtts[1] / 2.0) as Delay
    }

    fn measured_route(&self, pair: &SamplePair) -> Option<Vec<NodeIndex>> {
        let routes = self.routes.as_ref()?;
        let hops = match routes.lookup(pair.a.vn, pair.b.vn) {
            Ok(Some(hops)) => hops,
            Ok(None) => {
                log::info!("no route record for ({}, {})", pair.a.vn, pair.b.vn);
                return None;
            }
            Err(e) => {
                log::warn!("route lookup failed for ({}, {}): {e}", pair.a.vn, pair.b.vn);
                return None;
            }
        };
        match route_to_vertices(self.topo, pair.a.vn, &hops) {
            Ok(vertices) => Some(vertices),
            Err(e) => {
                log::warn!(
                    "cannot link measured route for ({}, {}): {e}",
                    pair.a.vn,
                    pair.b.vn
                );
                None
            }
        }
    }

    /// Run the validation pass over `pairs`, optionally appending one CSV row
    /// per probed pair.
    pub fn run<W: Write>(
        &self,
        pairs: &[SamplePair],
        mut csv: Option<&mut csv::Writer<W>>,
    ) -> Result<ValidationReport, ValidateError> {
        let mut stats = DiscrepancyStats::default();
        let mut pairs_probed = 0usize;
        let mut pairs_skipped = 0usize;

        let bar = ProgressBar::new(pairs.len() as u64);
        bar.set_style(ProgressStyle::with_template("{wide_bar} pairs: {pos}/{len}").unwrap());

        for pair in pairs {
            bar.inc(1);
            if pair.a.vn == pair.b.vn {
                pairs_skipped += 1;
                continue;
            }

            let Some((model_record, model_ms)) =
                self.engine.path_between(pair.a.vn, pair.b.vn)
            else {
                log::warn!("no modeled path for ({}, {})", pair.a.vn, pair.b.vn);
                pairs_skipped += 1;
                continue;
            };

            let rtts = match self.prober.probe(&pair.a.ip, &pair.b.ip, PROBE_COUNT) {
                Ok(rtts) if rtts.len() >= PROBE_COUNT => rtts,
                Ok(rtts) => {
                    log::warn!(
                        "probe {} -> {} returned {} of {PROBE_COUNT} samples, skipping",
                        pair.a.ip,
                        pair.b.ip,
                        rtts.len()
                    );
                    pairs_skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("probe {} -> {} failed: {e}", pair.a.ip, pair.b.ip);
                    pairs_skipped += 1;
                    continue;
                }
            };
            let measured_ms = Self::one_way_ms(rtts);
            pairs_probed += 1;

            let mut model_path_len = None;
            let mut measured_path_len = None;

            if measured_ms != model_ms {
                let model_path =
                    route_to_vertices(self.topo, pair.a.vn, &model_record.hops).ok();
                let measured_path = self.measured_route(pair);
                model_path_len = model_path.as_ref().map(Vec::len);
                measured_path_len = measured_path.as_ref().map(Vec::len);

                println!(
                    "({} -> {}): Model: {}{model_ms} ms{} {}; Empirically: {}{measured_ms} ms{} {};",
                    pair.a.vn,
                    pair.b.vn,
                    termion::color::Fg(termion::color::Red),
                    termion::color::Fg(termion::color::Reset),
                    fmt_path(self.topo, &model_path),
                    termion::color::Fg(termion::color::Red),
                    termion::color::Fg(termion::color::Reset),
                    fmt_path(self.topo, &measured_path),
                );

                let diff = model_ms.abs_diff(measured_ms) as f64;
                stats.latency_diff.push(diff);
                if let (Some(m), Some(e)) = (model_path_len, measured_path_len) {
                    stats.path_len_diff.push((m as f64 - e as f64).abs());
                    if m == e {
                        stats.eq_len_latency_diff.push(diff);
                    }
                }
            }

            if let Some(csv) = csv.as_mut() {
                csv.serialize(PairRecord {
                    vn_src: pair.a.vn,
                    vn_dst: pair.b.vn,
                    ip_src: pair.a.ip.clone(),
                    ip_dst: pair.b.ip.clone(),
                    model_ms,
                    measured_ms,
                    latency_diff: model_ms.abs_diff(measured_ms),
                    model_path_len,
                    measured_path_len,
                })?;
            }
        }
        bar.finish_and_clear();

        Ok(ValidationReport {
            stats,
            pairs_probed,
            pairs_skipped,
        })
    }
}

fn fmt_path(topo: &LoadedTopology, path: &Option<Vec<NodeIndex>>) -> String {
    match path {
        None => "[Not Available]".to_string(),
        Some(vertices) => format!(
            "{:?}",
            vertices
                .iter()
                .map(|&n| topo.graph[n].doc_idx)
                .collect::<Vec<_>>()
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loader::load_topology;
    use crate::model::SampleEndpoint;
    use std::cell::RefCell;
    use std::io::Cursor;

    /// Line topology vn0 -- gateway -- vn1, 5 ms end to end.
    const LINE_DOC: &str = r#"<topology><vertices>
<vertex int_idx="0" role="virtnode" int_vn="0"/>
<vertex int_idx="1" role="gateway"/>
<vertex int_idx="2" role="virtnode" int_vn="1"/>
</vertices><edges>
<edge int_dst="1" int_src="0" int_idx="0" int_delayms="2"/>
<edge int_dst="0" int_src="1" int_idx="1" int_delayms="2"/>
<edge int_dst="2" int_src="1" int_idx="2" int_delayms="3"/>
<edge int_dst="1" int_src="2" int_idx="3" int_delayms="3"/>
</edges></topology>"#;

    struct FixedProber {
        rtts: Vec<f64>,
    }

    impl Prober for FixedProber {
        fn probe(&self, _: &str, _: &str, _: usize) -> Result<Vec<f64>, ValidateError> {
            Ok(self.rtts.clone())
        }
    }

    struct FailingProber {
        calls: RefCell<usize>,
    }

    impl Prober for FailingProber {
        fn probe(&self, _: &str, _: &str, _: usize) -> Result<Vec<f64>, ValidateError> {
            *self.calls.borrow_mut() += 1;
            Err(ValidateError::Probe {
                code: 1,
                output: "unreachable".to_string(),
            })
        }
    }

    struct FixedRoutes {
        hops: Vec<u64>,
    }

    impl RouteTable for FixedRoutes {
        fn lookup(&self, _: Vn, _: Vn) -> Result<Option<Vec<u64>>, ValidateError> {
            Ok(Some(self.hops.clone()))
        }
    }

    fn pair(a: Vn, b: Vn) -> SamplePair {
        SamplePair {
            a: SampleEndpoint {
                vn: a,
                ip: format!("10.0.0.{a}"),
            },
            b: SampleEndpoint {
                vn: b,
                ip: format!("10.0.0.{b}"),
            },
        }
    }

    #[test]
    fn test_one_way_keeps_second_smallest() {
        let rtts = vec![20.0, 10.0, 14.0];
        assert_eq!(Validator::<FixedProber, FixedRoutes>::one_way_ms(rtts), 7);
    }

    #[test]
    fn test_probe_output_parsing() {
        let out = b"a b c d e f g 12.4 extra\n1 2 3 4 5 6 7 10.0\n";
        let rtts = PingProber::parse_output(out, 2).unwrap();
        assert_eq!(rtts, vec![12.4, 10.0]);

        let bad = b"too short line\n";
        assert!(matches!(
            PingProber::parse_output(bad, 1),
            Err(ValidateError::ProbeOutput(_))
        ));
    }

    #[test]
    fn test_route_file_scan() {
        let content = "\
<allpairs>
<path int_vndst=\"1\" int_vnsrc=\"0\" hops=\"0 2\"/>
<path int_vndst=\"0\" int_vnsrc=\"1\" hops=\"3 1\"/>
</allpairs>
";
        let hops = RouteFile::scan(Cursor::new(content), 0, 1).unwrap();
        assert_eq!(hops, Some(vec![0, 2]));
        let hops = RouteFile::scan(Cursor::new(content), 1, 0).unwrap();
        assert_eq!(hops, Some(vec![3, 1]));
        let hops = RouteFile::scan(Cursor::new(content), 5, 5).unwrap();
        assert_eq!(hops, None);
    }

    #[test]
    fn test_route_reconstruction_follows_shared_endpoints() {
        let topo = load_topology(LINE_DOC).unwrap();
        // route given with the reverse-direction edge for the second hop;
        // linking by shared endpoint still resolves it
        let path = route_to_vertices(&topo, 0, &[0, 3]).unwrap();
        let doc_indices: Vec<u64> = path.iter().map(|&n| topo.graph[n].doc_idx).collect();
        assert_eq!(doc_indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_route_reconstruction_broken_linkage() {
        let doc = r#"<topology><vertices>
<vertex int_idx="0" role="virtnode" int_vn="0"/>
<vertex int_idx="1" role="virtnode" int_vn="1"/>
<vertex int_idx="2" role="virtnode" int_vn="2"/>
<vertex int_idx="3" role="virtnode" int_vn="3"/>
</vertices><edges>
<edge int_dst="1" int_src="0" int_idx="0" int_delayms="1"/>
<edge int_dst="3" int_src="2" int_idx="1" int_delayms="1"/>
</edges></topology>"#;
        let topo = load_topology(doc).unwrap();
        assert!(matches!(
            route_to_vertices(&topo, 0, &[0, 1]),
            Err(ValidateError::BrokenRoute(1))
        ));
        assert!(matches!(
            route_to_vertices(&topo, 0, &[9]),
            Err(ValidateError::UnknownHop(9))
        ));
    }

    #[test]
    fn test_matching_latency_records_no_discrepancy() {
        let topo = load_topology(LINE_DOC).unwrap();
        let engine = PathEngine::new(&topo, Some("int_delayms")).unwrap();
        // model distance is 5 ms one way; probe returns 10 ms round trips
        let prober = FixedProber {
            rtts: vec![10.0, 10.0, 10.0],
        };
        let validator = Validator::new(&topo, &engine, prober, None::<RouteFile>);

        let report = validator
            .run::<Vec<u8>>(&[pair(0, 1)], None)
            .unwrap();
        assert_eq!(report.pairs_probed, 1);
        assert_eq!(report.stats.latency_diff.len(), 0);
        assert_eq!(report.stats.summary().avg_latency_diff, None);
    }

    #[test]
    fn test_mismatch_accumulates_discrepancy() {
        let topo = load_topology(LINE_DOC).unwrap();
        let engine = PathEngine::new(&topo, Some("int_delayms")).unwrap();
        // second-smallest RTT 14 -> one-way 7, model says 5 -> diff 2
        let prober = FixedProber {
            rtts: vec![10.0, 14.0, 20.0],
        };
        let routes = FixedRoutes { hops: vec![0, 2] };
        let validator = Validator::new(&topo, &engine, prober, Some(routes));

        let report = validator
            .run::<Vec<u8>>(&[pair(0, 1)], None)
            .unwrap();
        assert_eq!(report.stats.latency_diff, vec![2.0]);
        // both paths traverse the gateway: 3 vertices each
        assert_eq!(report.stats.path_len_diff, vec![0.0]);
        assert_eq!(report.stats.eq_len_latency_diff, vec![2.0]);
    }

    #[test]
    fn test_self_pairs_skipped_probe_failures_skipped() {
        let topo = load_topology(LINE_DOC).unwrap();
        let engine = PathEngine::new(&topo, Some("int_delayms")).unwrap();
        let prober = FailingProber {
            calls: RefCell::new(0),
        };
        let validator = Validator::new(&topo, &engine, prober, None::<RouteFile>);

        let report = validator
            .run::<Vec<u8>>(&[pair(0, 0), pair(0, 1), pair(1, 0)], None)
            .unwrap();
        assert_eq!(report.pairs_probed, 0);
        assert_eq!(report.pairs_skipped, 3);
        // the self-pair is skipped before probing
        assert_eq!(*validator.prober.calls.borrow(), 2);
    }

    #[test]
    fn test_summary_means() {
        let stats = DiscrepancyStats {
            latency_diff: vec![2.0, 4.0, 6.0],
            path_len_diff: vec![1.0],
            eq_len_latency_diff: vec![],
        };
        let summary = stats.summary();
        assert_eq!(summary.mismatches, 3);
        assert_eq!(summary.avg_latency_diff, Some(4.0));
        assert_eq!(summary.avg_path_len_diff, Some(1.0));
        assert_eq!(summary.avg_eq_len_latency_diff, None);
    }

    #[test]
    fn test_csv_rows_written_per_probed_pair() {
        let topo = load_topology(LINE_DOC).unwrap();
        let engine = PathEngine::new(&topo, Some("int_delayms")).unwrap();
        let prober = FixedProber {
            rtts: vec![10.0, 10.0, 10.0],
        };
        let validator = Validator::new(&topo, &engine, prober, None::<RouteFile>);

        let mut writer = csv::Writer::from_writer(Vec::new());
        validator
            .run(&[pair(0, 1), pair(1, 1)], Some(&mut writer))
            .unwrap();
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = data.lines();
        assert_eq!(
            lines.next(),
            Some(
                "vn_src,vn_dst,ip_src,ip_dst,model_ms,measured_ms,latency_diff,\
                 model_path_len,measured_path_len"
            )
        );
        assert_eq!(lines.next(), Some("0,1,10.0.0.0,10.0.0.1,5,5,0,,"));
        assert_eq!(lines.next(), None);
    }
}
