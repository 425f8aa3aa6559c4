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
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use emtor::{
    loader,
    model::{load_model, select_sample},
    paths::PathEngine,
    util,
    validate::{PingProber, RouteFile, Validator},
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// ModelNet graph file (topology document).
    graph_file: PathBuf,
    /// The ModelNet model file supplying the sampling universe.
    model_file: PathBuf,
    /// The number of paths to sample and test.
    sample_size: usize,
    /// The ModelNet route file; without it, measured paths are unavailable.
    route_file: Option<PathBuf>,
    /// The probing binary (modelnetping-compatible).
    #[arg(long, default_value = "modelnetping")]
    prober: PathBuf,
    /// Nodetype of the virtual nodes to sample pairs from.
    #[arg(long, default_value = "tor_relay")]
    nodetype: String,
    /// Probe timeout in seconds.
    #[arg(long, default_value_t = 30)]
    probe_timeout: u64,
    /// Directory receiving the per-pair CSV and the JSON summary.
    #[arg(short, long, default_value = "./")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();

    let content = fs::read_to_string(&args.graph_file)
        .with_context(|| format!("Failed to read {:?}", args.graph_file))?;
    let topo = loader::load_topology(&content)
        .with_context(|| format!("Cannot load the topology from {:?}", args.graph_file))?;
    let engine = PathEngine::new(&topo, Some("int_delayms"))?;

    let model = fs::read_to_string(&args.model_file)
        .with_context(|| format!("Failed to read {:?}", args.model_file))?;
    let nodes = load_model(&model)
        .with_context(|| format!("Cannot load the model from {:?}", args.model_file))?;
    let pairs = select_sample(&nodes, &args.nodetype, args.sample_size, &mut rand::thread_rng())?;

    let prober = PingProber::new(&args.prober, Duration::from_secs(args.probe_timeout));
    let routes = args.route_file.as_ref().map(RouteFile::new);
    let validator = Validator::new(&topo, &engine, prober, routes);

    let ts = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S");
    let csv_path = args.out_dir.join(format!("validation_{ts}.csv"));
    let mut csv = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("Cannot create {csv_path:?}"))?;

    let report = validator.run(&pairs, Some(&mut csv))?;
    csv.flush()?;

    let summary = report.stats.summary();
    log::info!(
        "probed {} pairs ({} skipped), {} mismatches",
        report.pairs_probed,
        report.pairs_skipped,
        summary.mismatches
    );
    print_avg("Average latency difference", summary.avg_latency_diff, "ms");
    print_avg(
        "Average path length difference",
        summary.avg_path_len_diff,
        "",
    );
    print_avg(
        "Average latency difference in equal length paths",
        summary.avg_eq_len_latency_diff,
        "ms",
    );

    let summary_path = args.out_dir.join(format!("validation_{ts}.json"));
    let summary_file = fs::File::create(&summary_path)
        .with_context(|| format!("Cannot create {summary_path:?}"))?;
    serde_json::to_writer_pretty(summary_file, &summary)?;

    Ok(())
}

fn print_avg(label: &str, value: Option<f64>, unit: &str) {
    match value {
        Some(avg) => println!("{label}: {avg:.1} {unit}"),
        None => println!("{label}: no data"),
    }
}
