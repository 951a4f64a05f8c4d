//=====================================================
// File: main.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata CLI entry point
// Objective: Run .st sources and .stc bytecode, dump tokens, AST or
//            bytecode, and report diagnostics as text or JSON
//=====================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use strata::diagnostics::{self, Diagnostic};
use strata::{CompileOptions, OptLevel, StrataConfig, StrataError, check_source, compile};
use strata_core::vm::{Chunk, RuntimeOptions, Vm};
use strata_core::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata", about = "Strata compiler and virtual machine")]
pub struct Args {
    /// A .st source file or .stc bytecode file.
    pub input: PathBuf,

    /// Print an intermediate form instead of running.
    #[arg(long, value_enum)]
    pub emit: Option<Emit>,

    /// Optimization level (0-3).
    #[arg(short = 'O', value_parser = clap::value_parser!(u8).range(0..=3))]
    pub opt_level: Option<u8>,

    /// Type-check only.
    #[arg(long)]
    pub check: bool,

    /// Trace every executed instruction (also STRATA_TRACE=1).
    #[arg(long)]
    pub trace: bool,

    /// Render diagnostics and dumps as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print parsed AST before execution.
    #[arg(long = "print-ast")]
    pub print_ast: bool,

    /// Print VM statistics after execution.
    #[arg(long)]
    pub stats: bool,

    /// Use this configuration file instead of searching for strata.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Tokens,
    Ast,
    Bytecode,
}

/// Effective settings after merging the config file with flags.
struct Settings {
    compile: CompileOptions,
    runtime: RuntimeOptions,
    print_ast: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let tracing_enabled = args.trace || std::env::var("STRATA_TRACE").is_ok_and(|value| value == "1");
    init_tracing(tracing_enabled);

    match run(&args, tracing_enabled) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<StrataError>() {
                Some(failure) => report(&failure.diagnostics(), args.json),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(tracing_enabled: bool) {
    let default = if tracing_enabled { "strata_core=trace,warn" } else { "warn" };
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings(args: &Args, tracing_enabled: bool) -> Result<Settings> {
    let config = match &args.config {
        Some(path) => StrataConfig::from_path(path)?,
        None => StrataConfig::load()?,
    };
    let opt_level = match args.opt_level {
        Some(level) => OptLevel::try_from(level)?,
        None => config.opt_level()?,
    };
    let mut runtime = config.runtime_options();
    runtime.trace |= tracing_enabled;
    Ok(Settings {
        compile: CompileOptions::with_level(opt_level),
        runtime,
        print_ast: config.print_ast || args.print_ast,
    })
}

fn run(args: &Args, tracing_enabled: bool) -> Result<()> {
    let settings = settings(args, tracing_enabled)?;
    if args.input.extension().is_some_and(|ext| ext == "stc") {
        let chunk = load_bytecode(&args.input)?;
        if args.emit == Some(Emit::Bytecode) {
            return emit_bytecode(&chunk, args.json);
        }
        return execute(chunk, settings.runtime, args.stats);
    }

    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    match args.emit {
        Some(Emit::Tokens) => return emit_tokens(&source, args.json),
        Some(Emit::Ast) => return emit_ast(&source, args.json),
        _ => {}
    }

    let checked = check_source(&source)?;
    let warnings: Vec<Diagnostic> = checked.diagnostics.iter().map(Diagnostic::from).collect();
    if !warnings.is_empty() {
        report(&warnings, args.json);
    }
    if settings.print_ast {
        println!("{:#?}", checked.program);
    }
    if args.check {
        if args.json && warnings.is_empty() {
            println!("[]");
        }
        return Ok(());
    }

    let chunk = compile(&checked, &settings.compile)
        .map_err(|err| StrataError::Compile(format!("{err:#}")))?;
    if args.emit == Some(Emit::Bytecode) {
        return emit_bytecode(&chunk, args.json);
    }
    execute(chunk, settings.runtime, args.stats)
}

fn execute(chunk: Chunk, options: RuntimeOptions, show_stats: bool) -> Result<()> {
    let mut vm = Vm::new(Arc::new(chunk), options);
    let result = vm.execute();
    if show_stats {
        let stats = vm.stats();
        eprintln!(
            "instructions: {}, max frame depth: {}, max stack depth: {}",
            stats.instructions, stats.max_frame_depth, stats.max_stack_depth
        );
    }
    let value = result.map_err(StrataError::from)?;
    if !matches!(value, Value::Null) {
        println!("{value}");
    }
    Ok(())
}

fn load_bytecode(path: &Path) -> Result<Chunk> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Chunk::decode(&bytes[..]).with_context(|| format!("failed to decode {}", path.display()))
}

fn emit_tokens(source: &str, json: bool) -> Result<()> {
    let tokens = strata::tokenizer::tokenize(source)
        .map_err(|err| StrataError::Rejected(vec![Diagnostic::from(&err)]))?;
    if json {
        let listing: Vec<serde_json::Value> = tokens
            .iter()
            .map(|token| {
                serde_json::json!({
                    "kind": format!("{:?}", token.kind),
                    "lexeme": token.lexeme,
                    "line": token.position.line,
                    "column": token.position.column,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    for token in &tokens {
        println!(
            "{:>4}:{:<3} {:?}",
            token.position.line, token.position.column, token.kind
        );
    }
    Ok(())
}

fn emit_ast(source: &str, json: bool) -> Result<()> {
    let tokens = strata::tokenizer::tokenize(source)
        .map_err(|err| StrataError::Rejected(vec![Diagnostic::from(&err)]))?;
    let program = strata::parser::parse(tokens)
        .map_err(|errors| StrataError::Rejected(errors.iter().map(Diagnostic::from).collect()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&program)?);
    } else {
        println!("{program:#?}");
    }
    Ok(())
}

fn emit_bytecode(chunk: &Chunk, json: bool) -> Result<()> {
    if json {
        println!("{}", chunk.to_json()?);
    } else {
        print!("{}", chunk.disassemble());
    }
    Ok(())
}

fn report(diagnostics: &[Diagnostic], json: bool) {
    eprintln!("{}", diagnostics::render(diagnostics, json));
}
