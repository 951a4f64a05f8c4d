use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use strata_core::vm::{Constant, FunctionInfo, Instruction, Opcode};
use strata_core::{Chunk, RuntimeOptions, Vm};

fn op(opcode: Opcode, a: u32, b: u32) -> Instruction {
    Instruction::new(opcode, a, b, None)
}

/// Recursive fibonacci assembled by hand: the script calls `fib(n)`.
fn fib_chunk(n: i64) -> Chunk {
    let mut chunk = Chunk::default();
    let arg = chunk.add_constant(Constant::Integer(n));
    let one = chunk.add_constant(Constant::Integer(1));
    let two = chunk.add_constant(Constant::Integer(2));
    let base = 4;
    chunk.instructions = vec![
        op(Opcode::Null, 0, 0),
        op(Opcode::LoadConst, arg, 0),
        op(Opcode::CallDirect, 1, 1),
        op(Opcode::Return, 0, 0),
        // fib(n)
        op(Opcode::LoadLocal, 1, 0),
        op(Opcode::LoadConst, two, 0),
        op(Opcode::Less, 0, 0),
        op(Opcode::JumpIfFalse, base + 6, 0),
        op(Opcode::LoadLocal, 1, 0),
        op(Opcode::Return, 0, 0),
        op(Opcode::Null, 0, 0),
        op(Opcode::LoadLocal, 1, 0),
        op(Opcode::LoadConst, one, 0),
        op(Opcode::Sub, 0, 0),
        op(Opcode::CallDirect, 1, 1),
        op(Opcode::Null, 0, 0),
        op(Opcode::LoadLocal, 1, 0),
        op(Opcode::LoadConst, two, 0),
        op(Opcode::Sub, 0, 0),
        op(Opcode::CallDirect, 1, 1),
        op(Opcode::Add, 0, 0),
        op(Opcode::Return, 0, 0),
    ];
    let end = chunk.instructions.len() as u32;
    chunk.functions = vec![
        FunctionInfo {
            name: "<script>".into(),
            arity: 0,
            required: 0,
            variadic: false,
            locals: 1,
            start: 0,
            end: base,
            captures: Vec::new(),
        },
        FunctionInfo {
            name: "fib".into(),
            arity: 1,
            required: 1,
            variadic: false,
            locals: 2,
            start: base,
            end,
            captures: Vec::new(),
        },
    ];
    chunk
}

fn bench_vm(c: &mut Criterion) {
    let chunk = Arc::new(fib_chunk(20));
    c.bench_function("fib_vm", |b| {
        b.iter(|| {
            let _ = Vm::new(Arc::clone(&chunk), RuntimeOptions::default())
                .execute()
                .unwrap();
        })
    });
}

criterion_group!(benches, bench_vm);
criterion_main!(benches);
