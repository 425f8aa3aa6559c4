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

use anyhow::Context;
use clap::Parser;

use emtor::{model, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// The ModelNet model file to check.
    model_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();

    let content = fs::read_to_string(&args.model_file)
        .with_context(|| format!("Failed to read {:?}", args.model_file))?;
    let check = model::check_model(&content)
        .with_context(|| format!("Cannot check the model in {:?}", args.model_file))?;

    println!(
        "{} nodes missing hops; {} hops missing nodes",
        check.nodes_missing_hops, check.hops_missing_nodes
    );
    Ok(())
}
