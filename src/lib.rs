//=====================================================
// File: lib.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata library interface
// Objective: Export the lexer, parser, type checker and bytecode compiler,
//            plus the source-to-result pipeline used by the CLI tools
//=====================================================

pub mod ast;
pub mod checker;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod parser;
pub mod symbol;
pub mod tokenizer;

use std::sync::Arc;

use strata_core::vm::{Chunk, RuntimeOptions, Vm, VmError};
use strata_core::Value;
use thiserror::Error;
use tracing::debug;

pub use checker::CheckedProgram;
pub use compiler::{CompileOptions, OptLevel, compile};
pub use config::{ConfigError, StrataConfig};
pub use diagnostics::{Diagnostic, ErrorCode, Severity};

/// Failure of one pipeline stage.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Lexer, parser or checker errors; everything one pass found.
    #[error("{}", diagnostics::render(.0, false))]
    Rejected(Vec<Diagnostic>),
    #[error("compile error: {0}")]
    Compile(String),
    #[error("{}", .0.render())]
    Runtime(#[from] VmError),
}

impl StrataError {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            StrataError::Rejected(diagnostics) => diagnostics.clone(),
            StrataError::Compile(message) => vec![Diagnostic {
                line: 0,
                column: 0,
                severity: Severity::Error,
                message: message.clone(),
                kind: "CompileError".to_string(),
                code: ErrorCode::Internal,
            }],
            StrataError::Runtime(err) => vec![Diagnostic::from(err)],
        }
    }
}

/// Lexes, parses and checks `source`. Warnings stay on the returned program.
pub fn check_source(source: &str) -> Result<CheckedProgram, StrataError> {
    let tokens = tokenizer::tokenize(source)
        .map_err(|err| StrataError::Rejected(vec![Diagnostic::from(&err)]))?;
    debug!(tokens = tokens.len(), "lexed source");
    let program = parser::parse(tokens)
        .map_err(|errors| StrataError::Rejected(errors.iter().map(Diagnostic::from).collect()))?;
    debug!(statements = program.statements.len(), "parsed source");
    let checked = checker::check_program(program);
    debug!(diagnostics = checked.diagnostics.len(), "checked source");
    if checked.has_errors() {
        return Err(StrataError::Rejected(
            checked.diagnostics.iter().map(Diagnostic::from).collect(),
        ));
    }
    Ok(checked)
}

pub fn compile_source(source: &str, options: &CompileOptions) -> Result<Chunk, StrataError> {
    let checked = check_source(source)?;
    compile(&checked, options).map_err(|err| StrataError::Compile(format!("{err:#}")))
}

pub fn run_chunk(chunk: Arc<Chunk>, options: RuntimeOptions) -> Result<Value, StrataError> {
    Ok(Vm::new(chunk, options).execute()?)
}

/// Compiles and runs `source`, returning the script's result value.
pub fn run_source(
    source: &str,
    compile_options: &CompileOptions,
    runtime_options: RuntimeOptions,
) -> Result<Value, StrataError> {
    let chunk = compile_source(source, compile_options)?;
    run_chunk(Arc::new(chunk), runtime_options)
}
