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
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use emtor::{loader, paths::PathEngine, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Attribute to use for shortest path weight (hop counts if omitted).
    #[arg(short = 'w', long = "weight")]
    weight: Option<String>,
    /// ModelNet graph file (topology document).
    graph_file: PathBuf,
    /// Write the path table here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();

    let content = fs::read_to_string(&args.graph_file)
        .with_context(|| format!("Failed to read {:?}", args.graph_file))?;
    let topo = loader::load_topology(&content)
        .with_context(|| format!("Cannot load the topology from {:?}", args.graph_file))?;
    let engine = PathEngine::new(&topo, args.weight.as_deref())?;

    log::info!(
        "routing {} virtual nodes over {} vertices",
        topo.virtual_nodes().count(),
        topo.graph.node_count()
    );

    match &args.output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Cannot create {path:?}"))?;
            let mut out = BufWriter::new(file);
            engine.write_allpairs(&mut out)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            engine.write_allpairs(&mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}
