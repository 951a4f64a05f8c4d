//=====================================================
// File: compiler/peephole.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Bytecode peephole pass
// Objective: Drop push/pop pairs and jumps to the next instruction, then
//            relocate branch targets and function ranges
//=====================================================

use std::collections::HashSet;

use strata_core::vm::{Chunk, Instruction, Opcode};

/// Pushes one value without side effects.
fn is_pure_push(inst: &Instruction) -> bool {
    matches!(
        inst.opcode,
        Opcode::LoadConst
            | Opcode::Null
            | Opcode::LoadLocal
            | Opcode::LoadGlobal
            | Opcode::LoadUpvalue
            | Opcode::Dup
    )
}

/// Runs to a fixpoint and returns the number of instructions removed.
pub fn optimize(chunk: &mut Chunk) -> usize {
    let mut removed = 0;
    loop {
        let dead = find_dead(chunk);
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        compact(chunk, &dead);
    }
}

fn find_dead(chunk: &Chunk) -> HashSet<usize> {
    let targets: HashSet<u32> = chunk
        .instructions
        .iter()
        .filter_map(Instruction::branch_target)
        .collect();
    let mut dead = HashSet::new();
    for function in &chunk.functions {
        let (start, end) = (function.start as usize, function.end as usize);
        let Some(code) = chunk.instructions.get(start..end) else {
            continue;
        };
        let mut offset = 0;
        while offset < code.len() {
            let ip = start + offset;
            let inst = &code[offset];
            if inst.opcode == Opcode::Jump && inst.operand_a as usize == ip + 1 {
                dead.insert(ip);
                offset += 1;
                continue;
            }
            let pops_next = code
                .get(offset + 1)
                .is_some_and(|next| next.opcode == Opcode::Pop && !targets.contains(&((ip + 1) as u32)));
            if is_pure_push(inst) && pops_next {
                dead.insert(ip);
                dead.insert(ip + 1);
                offset += 2;
                continue;
            }
            offset += 1;
        }
    }
    dead
}

/// Removes `dead` and maps every old index to the next surviving one.
fn compact(chunk: &mut Chunk, dead: &HashSet<usize>) {
    let len = chunk.instructions.len();
    let mut remap = Vec::with_capacity(len + 1);
    let mut kept = 0u32;
    for ip in 0..len {
        remap.push(kept);
        if !dead.contains(&ip) {
            kept += 1;
        }
    }
    remap.push(kept);

    let instructions = std::mem::take(&mut chunk.instructions);
    chunk.instructions = instructions
        .into_iter()
        .enumerate()
        .filter(|(ip, _)| !dead.contains(ip))
        .map(|(_, mut inst)| {
            if inst.is_branch() {
                inst.operand_a = remap[inst.operand_a as usize];
            }
            inst
        })
        .collect();
    for function in &mut chunk.functions {
        function.start = remap[function.start as usize];
        function.end = remap[function.end as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::{compile_source, run_at};
    use crate::compiler::OptLevel;
    use strata_core::Value;
    use strata_core::vm::{Constant, FunctionInfo};

    fn script(instructions: Vec<Instruction>) -> Chunk {
        let mut chunk = Chunk::default();
        chunk.add_constant(Constant::Integer(1));
        chunk.functions.push(FunctionInfo {
            name: "<script>".into(),
            arity: 0,
            required: 0,
            variadic: false,
            locals: 1,
            start: 0,
            end: instructions.len() as u32,
            captures: Vec::new(),
        });
        chunk.instructions = instructions;
        chunk
    }

    #[test]
    fn drops_discarded_loads_and_trivial_jumps() {
        let mut chunk = script(vec![
            Instruction::new(Opcode::LoadConst, 0, 0, None),
            Instruction::simple(Opcode::Pop),
            Instruction::new(Opcode::Jump, 3, 0, None),
            Instruction::new(Opcode::LoadConst, 0, 0, None),
            Instruction::simple(Opcode::Return),
        ]);
        assert_eq!(optimize(&mut chunk), 3);
        let opcodes: Vec<Opcode> = chunk.instructions.iter().map(|inst| inst.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::LoadConst, Opcode::Return]);
        assert_eq!(chunk.functions[0].end, 2);
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn keeps_pops_that_are_branch_targets() {
        let mut chunk = script(vec![
            Instruction::new(Opcode::LoadLocal, 0, 0, None),
            Instruction::new(Opcode::JumpIfNotNull, 3, 0, None),
            Instruction::new(Opcode::LoadConst, 0, 0, None),
            Instruction::simple(Opcode::Pop),
            Instruction::simple(Opcode::Null),
            Instruction::simple(Opcode::Return),
        ]);
        assert_eq!(optimize(&mut chunk), 0);
        assert_eq!(chunk.instructions.len(), 6);
    }

    #[test]
    fn optimized_programs_compute_the_same_result() {
        let source = "
            int total = 0;
            total;
            for (int i = 0; i < 10; i++) { total += i; }
            total
        ";
        let plain = compile_source(source, OptLevel::O0);
        let optimized = compile_source(source, OptLevel::O3);
        assert!(optimized.instructions.len() < plain.instructions.len());
        assert_eq!(run_at(source, OptLevel::O3), Value::Integer(45));
    }
}
