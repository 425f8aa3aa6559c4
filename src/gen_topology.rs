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

use emtor::{markup, topology, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// An XML file containing a graph representation created by the topology
    /// generator.
    graph_xml: PathBuf,
    /// Write the topology document here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();

    let content = fs::read_to_string(&args.graph_xml)
        .with_context(|| format!("Failed to read {:?}", args.graph_xml))?;
    let gr = markup::read_graph(&content)
        .with_context(|| format!("Cannot parse the graph in {:?}", args.graph_xml))?;

    log::info!(
        "read graph with {} vertices and {} links",
        gr.num_vertices(),
        gr.num_links()
    );

    match &args.output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Cannot create {path:?}"))?;
            let mut out = BufWriter::new(file);
            topology::write_topology(&gr, &mut out)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            topology::write_topology(&gr, &mut out)?;
            out.flush()?;
        }
    }

    log::info!(
        "successfully wrote the .graph file; use `allpairs` and `mkmodel` to generate topology files"
    );
    Ok(())
}
