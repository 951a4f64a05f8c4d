// Strata end-to-end tests for the lexer, parser, checker, compiler and VM
// Covers: arithmetic, recursion, branches, exceptions, closures, @high syntax,
// enums, cancellation

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata::{CompileOptions, ErrorCode, OptLevel, StrataError, compile_source, run_source};
use strata_core::vm::{
    CancellationToken, Constant, Opcode, OutputBuffer, RuntimeOptions, Vm, VmErrorKind,
};
use strata_core::Value;

fn run(source: &str) -> Value {
    run_source(source, &CompileOptions::default(), RuntimeOptions::default()).unwrap()
}

fn run_capturing(source: &str) -> (Value, String) {
    let chunk = compile_source(source, &CompileOptions::default()).unwrap();
    let output = OutputBuffer::new();
    let mut vm = Vm::new(Arc::new(chunk), RuntimeOptions::default()).with_output(output.clone());
    let value = vm.execute().unwrap();
    (value, output.contents())
}

#[test]
fn test_arithmetic_precedence() {
    let chunk = compile_source("2 + 3 * 4", &CompileOptions::default()).unwrap();
    assert_eq!(
        chunk.constants,
        vec![Constant::Integer(2), Constant::Integer(3), Constant::Integer(4)]
    );
    assert_eq!(run("2 + 3 * 4"), Value::Integer(14));
}

#[test]
fn test_recursive_fibonacci() {
    let source = "
        int fib(int n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        fib(30)
    ";
    assert_eq!(run(source), Value::Integer(832040));
}

#[test]
fn test_constant_condition_branches_once() {
    let source = "if (true) return 1; else return 2;";
    let chunk = compile_source(source, &CompileOptions::default()).unwrap();
    let branches = chunk
        .instructions
        .iter()
        .filter(|inst| inst.opcode == Opcode::JumpIfFalse)
        .count();
    assert_eq!(branches, 1);
    assert_eq!(run(source), Value::Integer(1));
}

#[test]
fn test_divide_by_zero_is_catchable() {
    let source = "
        string message = \"\";
        try {
            int zero = 0;
            int result = 1 / zero;
        } catch (DivideByZeroException e) {
            message = e.Message;
        }
        message
    ";
    assert_eq!(run(source), Value::string("Attempted to divide by zero."));
}

#[test]
fn test_uncaught_fault_reaches_the_caller() {
    let err = run_source(
        "int zero = 0;\n10 / zero",
        &CompileOptions::default(),
        RuntimeOptions::default(),
    )
    .unwrap_err();
    match err {
        StrataError::Runtime(vm_error) => assert_eq!(vm_error.kind, VmErrorKind::DivisionByZero),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn test_type_mismatch_blocks_compilation() {
    let err = compile_source("int x = \"not a number\";", &CompileOptions::default()).unwrap_err();
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, ErrorCode::TypeMismatch);
    assert_eq!(diagnostics[0].line, 1);
}

#[test]
fn test_closures_capture_by_reference() {
    let source = "
        int total = 0;
        int run() {
            int count = 10;
            var add = (int n) => { count = count + n; return count; };
            add(5);
            add(7);
            return count;
        }
        total = run();
        total
    ";
    assert_eq!(run(source), Value::Integer(22));
}

#[test]
fn test_break_outside_loop_is_rejected() {
    let err = compile_source("break;", &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, StrataError::Rejected(_)));
    assert_eq!(err.diagnostics()[0].code, ErrorCode::Syntax);
}

#[test]
fn test_high_level_syntax() {
    let source = "@high\nset x to 5\nif x is greater than 3 then\n  display x\notherwise\n  display 0\nend\n";
    let (_, output) = run_capturing(source);
    assert_eq!(output.trim(), "5");
}

#[test]
fn test_optimization_levels_agree() {
    let source = "
        int total = 0;
        for (int i = 0; i < 10; i++) {
            if (1 + 1 == 2) { total += i * (2 + 3); }
        }
        while (false) { total = -1; }
        total
    ";
    for level in [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3] {
        let value = run_source(source, &CompileOptions::with_level(level), RuntimeOptions::default())
            .unwrap();
        assert_eq!(value, Value::Integer(225), "level {level:?}");
    }
}

#[test]
fn test_deep_recursion_overflows() {
    let source = "int down(int n) { return down(n + 1); }\ndown(0)";
    let options = RuntimeOptions {
        max_frames: 64,
        ..RuntimeOptions::default()
    };
    let err = run_source(source, &CompileOptions::default(), options).unwrap_err();
    assert_eq!(err.diagnostics()[0].code, ErrorCode::StackOverflow);
}

#[test]
fn test_enum_members_are_integers() {
    let source = "enum Color { Red, Green = 5, Blue }\nColor.Blue";
    assert_eq!(run(source), Value::Integer(6));
}

#[test]
fn test_cancellation_runs_finally_but_skips_catch() {
    let source = "
        int r = 0;
        try {
            forever { r++; }
        } catch (Exception e) {
            r = -1;
        } finally {
            println(\"fin\");
        }
    ";
    let chunk = compile_source(source, &CompileOptions::default()).unwrap();
    let token = CancellationToken::new();
    let options = RuntimeOptions {
        cancellation: Some(token.clone()),
        ..RuntimeOptions::default()
    };
    let output = OutputBuffer::new();
    let mut vm = Vm::new(Arc::new(chunk), options).with_output(output.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let err = vm.execute().unwrap_err();
    canceller.join().unwrap();

    assert_eq!(err.kind, VmErrorKind::Cancelled);
    assert_eq!(output.contents().trim(), "fin");
    match vm.global("r") {
        Some(Value::Integer(count)) => assert!(*count > 0, "catch body ran: r = {count}"),
        other => panic!("unexpected r: {other:?}"),
    }
}
