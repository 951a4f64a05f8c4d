// Strata diagnostic reporting tests
// Covers: error codes per stage, warnings, JSON rendering

use strata::diagnostics::render;
use strata::{CompileOptions, ErrorCode, Severity, StrataError, check_source, run_source};
use strata_core::vm::RuntimeOptions;

fn rejected(source: &str) -> Vec<strata::Diagnostic> {
    match check_source(source) {
        Err(StrataError::Rejected(diagnostics)) => diagnostics,
        Err(other) => panic!("expected diagnostics, got {other:?}"),
        Ok(_) => panic!("expected {source:?} to be rejected"),
    }
}

#[test]
fn test_lex_errors_use_the_lex_code() {
    let diagnostics = rejected("int x = \"unterminated;");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, ErrorCode::Lex);
    assert_eq!(diagnostics[0].code.as_str(), "E001");
}

#[test]
fn test_undefined_symbols_are_reported() {
    let diagnostics = rejected("int y = missing + 1;");
    assert!(diagnostics
        .iter()
        .any(|diagnostic| diagnostic.code == ErrorCode::UndefinedSymbol));
}

#[test]
fn test_checker_reports_every_error_in_one_pass() {
    let diagnostics = rejected("int a = \"one\";\nbool b = 2;\n");
    let mismatches: Vec<_> = diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.code == ErrorCode::TypeMismatch)
        .collect();
    assert_eq!(mismatches.len(), 2);
    assert_eq!(mismatches[0].line, 1);
    assert_eq!(mismatches[1].line, 2);
}

#[test]
fn test_warnings_do_not_block_compilation() {
    let checked = check_source("int f() { return 1; int dead = 2; }\nf()").unwrap();
    assert!(!checked.has_errors());
    assert!(checked
        .diagnostics
        .iter()
        .map(strata::Diagnostic::from)
        .any(|diagnostic| diagnostic.severity == Severity::Warning
            && diagnostic.code == ErrorCode::UnreachableCode));
}

#[test]
fn test_runtime_errors_render_as_diagnostics() {
    let err = run_source(
        "int[] items = [1, 2];\nitems[5]",
        &CompileOptions::default(),
        RuntimeOptions::default(),
    )
    .unwrap_err();
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics[0].code, ErrorCode::IndexOutOfRange);
    assert_eq!(diagnostics[0].kind, "IndexOutOfRangeException");
}

#[test]
fn test_json_rendering_carries_codes() {
    let diagnostics = rejected("int x = \"not a number\";");
    let json: serde_json::Value = serde_json::from_str(&render(&diagnostics, true)).unwrap();
    let first = &json[0];
    assert_eq!(first["code"], "E101");
    assert_eq!(first["severity"], "error");
    assert_eq!(first["line"], 1);
}
