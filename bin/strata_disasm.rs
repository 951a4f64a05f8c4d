//=====================================================
// File: bin/strata_disasm.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Bytecode disassembler
// Objective: Print a .stc file as a listing grouped by function
//=====================================================

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use strata_core::vm::Chunk;

#[derive(Parser, Debug)]
#[command(name = "strata_disasm", about = "Disassemble Strata bytecode")]
struct Args {
    /// Input .stc bytecode file.
    input: PathBuf,
    /// Dump the chunk as JSON instead of a listing.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let data = fs::read(&args.input).with_context(|| format!("failed to read {}", args.input.display()))?;
    let chunk = Chunk::decode(&data[..]).with_context(|| format!("failed to decode {}", args.input.display()))?;
    if args.json {
        println!("{}", chunk.to_json()?);
    } else {
        print!("{}", chunk.disassemble());
    }
    Ok(())
}
