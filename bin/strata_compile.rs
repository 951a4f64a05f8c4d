//=====================================================
// File: bin/strata_compile.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Ahead-of-time compiler
// Objective: Compile a .st source file into a .stc bytecode file
//=====================================================

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use strata::diagnostics;
use strata::{CompileOptions, OptLevel, StrataError, compile_source};

#[derive(Parser, Debug)]
#[command(name = "strata_compile", about = "Compile Strata source to bytecode")]
struct Args {
    /// Input .st source file.
    input: PathBuf,
    /// Output .stc bytecode file; defaults to the input with a .stc extension.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Optimization level (0-3).
    #[arg(short = 'O', default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: u8,
    /// Render diagnostics as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match compile_file(&args) {
        Ok(output) => {
            println!("wrote {}", output.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            match err.downcast_ref::<StrataError>() {
                Some(failure) => eprintln!("{}", diagnostics::render(&failure.diagnostics(), args.json)),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn compile_file(args: &Args) -> Result<PathBuf> {
    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let options = CompileOptions::with_level(OptLevel::try_from(args.opt_level)?);
    let chunk = compile_source(&source, &options)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("stc"));
    let file = File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    chunk
        .encode(&mut writer)
        .with_context(|| format!("failed to write {}", output.display()))?;
    writer.flush()?;
    Ok(output)
}
