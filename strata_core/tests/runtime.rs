//===================================================
// StrataCore Runtime
//===================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Exercise the VM on hand-assembled chunks
// Objective: Arithmetic, handlers, frame limits, async natives, cancellation
//===================================================

use std::sync::Arc;

use strata_core::natives::NativeRegistry;
use strata_core::vm::{
    CancellationToken, Constant, FunctionInfo, Instruction, Opcode, OutputBuffer, Step, VmState,
};
use strata_core::{Chunk, RuntimeOptions, Value, Vm, VmErrorKind};

fn op(opcode: Opcode, a: u32) -> Instruction {
    Instruction::new(opcode, a, 0, None)
}

fn op2(opcode: Opcode, a: u32, b: u32) -> Instruction {
    Instruction::new(opcode, a, b, None)
}

fn function(name: &str, arity: u16, locals: u16, start: u32, end: u32) -> FunctionInfo {
    FunctionInfo {
        name: name.into(),
        arity,
        required: arity,
        variadic: false,
        locals,
        start,
        end,
        captures: Vec::new(),
    }
}

fn script(chunk: &mut Chunk, code: Vec<Instruction>) {
    let end = code.len() as u32;
    chunk.instructions = code;
    chunk.functions.push(function("<script>", 0, 1, 0, end));
}

fn run(chunk: Chunk) -> Result<Value, strata_core::VmError> {
    Vm::new(Arc::new(chunk), RuntimeOptions::default()).execute()
}

#[test]
fn evaluates_arithmetic() {
    let mut chunk = Chunk::default();
    let two = chunk.add_constant(Constant::Integer(2));
    let three = chunk.add_constant(Constant::Integer(3));
    let four = chunk.add_constant(Constant::Integer(4));
    script(
        &mut chunk,
        vec![
            op(Opcode::LoadConst, two),
            op(Opcode::LoadConst, three),
            op(Opcode::LoadConst, four),
            op(Opcode::Mul, 0),
            op(Opcode::Add, 0),
            op(Opcode::Return, 0),
        ],
    );
    assert_eq!(run(chunk).expect("run"), Value::Integer(14));
}

#[test]
fn handler_catches_division_by_zero() {
    let mut chunk = Chunk::default();
    let one = chunk.add_constant(Constant::Integer(1));
    let zero = chunk.add_constant(Constant::Integer(0));
    let class = chunk.add_constant(Constant::String("DivideByZeroException".into()));
    script(
        &mut chunk,
        vec![
            op(Opcode::PushHandler, 6),
            op(Opcode::LoadConst, one),
            op(Opcode::LoadConst, zero),
            op(Opcode::Div, 0),
            op(Opcode::PopHandler, 0),
            op(Opcode::Return, 0),
            op(Opcode::IsInstance, class),
            op(Opcode::Return, 0),
        ],
    );
    assert_eq!(run(chunk).expect("run"), Value::Boolean(true));
}

#[test]
fn uncaught_fault_reports_kind_and_stack() {
    let mut chunk = Chunk::default();
    let one = chunk.add_constant(Constant::Integer(1));
    let zero = chunk.add_constant(Constant::Integer(0));
    script(
        &mut chunk,
        vec![
            op(Opcode::LoadConst, one),
            op(Opcode::LoadConst, zero),
            Instruction::new(Opcode::Mod, 0, 0, Some(3)),
            op(Opcode::Return, 0),
        ],
    );
    let err = run(chunk).unwrap_err();
    assert_eq!(err.kind, VmErrorKind::DivisionByZero);
    assert_eq!(err.stack.len(), 1);
    assert_eq!(err.stack[0].line, Some(3));
}

#[test]
fn unbounded_recursion_overflows() {
    let mut chunk = Chunk::default();
    chunk.instructions = vec![
        op(Opcode::Null, 0),
        op2(Opcode::CallDirect, 1, 0),
        op(Opcode::Return, 0),
        op(Opcode::Null, 0),
        op2(Opcode::CallDirect, 1, 0),
        op(Opcode::Return, 0),
    ];
    chunk.functions.push(function("<script>", 0, 1, 0, 3));
    chunk.functions.push(function("spin", 0, 1, 3, 6));
    let options = RuntimeOptions {
        max_frames: 64,
        ..RuntimeOptions::default()
    };
    let mut vm = Vm::new(Arc::new(chunk), options);
    let err = vm.execute().unwrap_err();
    assert_eq!(err.kind, VmErrorKind::StackOverflow);
    assert_eq!(vm.state(), VmState::Faulted);
    assert_eq!(vm.stats().max_frame_depth, 64);
}

#[test]
fn async_native_suspends_and_resumes() {
    let mut chunk = Chunk::default();
    let name = chunk.add_constant(Constant::String("fetch".into()));
    let one = chunk.add_constant(Constant::Integer(1));
    script(
        &mut chunk,
        vec![
            op2(Opcode::CallNative, name, 0),
            op(Opcode::LoadConst, one),
            op(Opcode::Add, 0),
            op(Opcode::Return, 0),
        ],
    );
    let mut natives = NativeRegistry::with_defaults();
    natives.register_async("fetch", Some(0), |_, _| Ok(Value::Integer(0)));
    let mut vm = Vm::new(Arc::new(chunk), RuntimeOptions::default())
        .with_natives(natives.into_shared());

    let step = vm.run().expect("run");
    match step {
        Step::Yield(call) => assert_eq!(call.name, "fetch"),
        Step::Complete(value) => panic!("expected suspension, got {value:?}"),
    }
    assert_eq!(vm.state(), VmState::Suspended);
    match vm.resume(Value::Integer(41)).expect("resume") {
        Step::Complete(value) => assert_eq!(value, Value::Integer(42)),
        Step::Yield(_) => panic!("unexpected second suspension"),
    }
    assert_eq!(vm.state(), VmState::Halted);
}

#[test]
fn cancelled_loop_stops() {
    let mut chunk = Chunk::default();
    script(&mut chunk, vec![op(Opcode::Nop, 0), op(Opcode::Loop, 0)]);
    let token = CancellationToken::new();
    token.cancel();
    let options = RuntimeOptions {
        cancellation: Some(token),
        ..RuntimeOptions::default()
    };
    let err = Vm::new(Arc::new(chunk), options).execute().unwrap_err();
    assert_eq!(err.kind, VmErrorKind::Cancelled);
}

#[test]
fn println_goes_to_configured_output() {
    let mut chunk = Chunk::default();
    let name = chunk.add_constant(Constant::String("println".into()));
    let text = chunk.add_constant(Constant::String("hello".into()));
    script(
        &mut chunk,
        vec![
            op(Opcode::LoadConst, text),
            op2(Opcode::CallNative, name, 1),
            op(Opcode::Return, 0),
        ],
    );
    let buffer = OutputBuffer::new();
    let value = Vm::new(Arc::new(chunk), RuntimeOptions::default())
        .with_output(buffer.clone())
        .execute()
        .expect("run");
    assert_eq!(value, Value::Null);
    assert_eq!(buffer.contents(), "hello\n");
}

#[test]
fn bytecode_survives_filesystem_round_trip() {
    let mut chunk = Chunk::default();
    let seven = chunk.add_constant(Constant::Integer(7));
    script(&mut chunk, vec![op(Opcode::LoadConst, seven), op(Opcode::Return, 0)]);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("seven.stc");
    std::fs::write(&path, chunk.serialize().expect("encode")).expect("write");
    let bytes = std::fs::read(&path).expect("read");
    let decoded = Chunk::decode(&bytes[..]).expect("decode");
    assert_eq!(run(decoded).expect("run"), Value::Integer(7));
}
