//=====================================================
// File: compiler/asm.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Inline assembly lowering
// Objective: Map `@asm` mnemonics onto VM opcodes with local labels
//=====================================================

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use strata_core::vm::{Constant, Opcode};
use tracing::warn;

use super::Compiler;
use crate::ast::{AsmBlock, AsmLine, AsmOperand};
use crate::tokenizer::SyntaxLevel;

impl<'a> Compiler<'a> {
    pub(super) fn compile_asm(&mut self, block: &'a AsmBlock) -> Result<()> {
        if block.level == SyntaxLevel::AsmSpirv {
            warn!(lines = block.lines.len(), "skipping @asm spirv block");
            return Ok(());
        }
        let mut labels: HashMap<&str, usize> = HashMap::new();
        let mut pending: Vec<(usize, &str, usize)> = Vec::new();
        for line in &block.lines {
            if line.position.line > 0 {
                self.current.line = line.position.line as u32;
            }
            if let Some(label) = &line.label {
                if labels.insert(label.as_str(), self.here()).is_some() {
                    bail!("line {}: label '{label}' defined twice", line.position.line);
                }
            }
            let Some(mnemonic) = &line.mnemonic else {
                continue;
            };
            match mnemonic.to_ascii_lowercase().as_str() {
                "push" => self.asm_push(line)?,
                "pop" => self.simple(Opcode::Pop),
                "dup" => self.simple(Opcode::Dup),
                "add" => self.simple(Opcode::Add),
                "sub" => self.simple(Opcode::Sub),
                "mul" => self.simple(Opcode::Mul),
                "div" => self.simple(Opcode::Div),
                "mod" => self.simple(Opcode::Mod),
                "neg" => self.simple(Opcode::Neg),
                "not" => self.simple(Opcode::Not),
                "eq" => self.simple(Opcode::Equal),
                "ne" => self.simple(Opcode::NotEqual),
                "lt" => self.simple(Opcode::Less),
                "le" => self.simple(Opcode::LessEqual),
                "gt" => self.simple(Opcode::Greater),
                "ge" => self.simple(Opcode::GreaterEqual),
                "load" => {
                    let name = name_operand(line)?;
                    self.load_name(name)?;
                }
                "store" => {
                    let name = name_operand(line)?;
                    self.store_name(name)?;
                }
                "print" => {
                    let println = self.name_constant("println");
                    self.emit(Opcode::CallNative, println, 1);
                    self.emit_op(Opcode::Pop);
                }
                "ret" => self.simple(Opcode::Return),
                "jmp" | "jz" => {
                    let opcode = if mnemonic.eq_ignore_ascii_case("jmp") {
                        Opcode::Jump
                    } else {
                        Opcode::JumpIfFalse
                    };
                    let target = name_operand(line)?;
                    let at = self.emit_jump(opcode);
                    pending.push((at, target, line.position.line));
                }
                "nop" => self.simple(Opcode::Nop),
                other => bail!("line {}: unknown instruction '{other}'", line.position.line),
            }
        }
        for (at, label, line) in pending {
            let target = labels
                .get(label)
                .copied()
                .ok_or_else(|| anyhow!("line {line}: undefined label '{label}'"))?;
            self.patch_jump_to(at, target);
        }
        Ok(())
    }

    fn simple(&mut self, opcode: Opcode) {
        self.emit_op(opcode);
    }

    fn asm_push(&mut self, line: &AsmLine) -> Result<()> {
        match line.operands.first() {
            Some(AsmOperand::Number(value)) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
                self.emit_constant(Constant::Integer(*value as i64));
            }
            Some(AsmOperand::Number(value)) => self.emit_constant(Constant::Float(*value)),
            Some(AsmOperand::Str(text)) => self.emit_constant(Constant::String(text.clone())),
            Some(AsmOperand::Name(name)) => match name.as_str() {
                "true" => self.emit_constant(Constant::Boolean(true)),
                "false" => self.emit_constant(Constant::Boolean(false)),
                "null" => {
                    self.emit_op(Opcode::Null);
                }
                _ => self.load_name(name)?,
            },
            None => bail!("line {}: 'push' needs an operand", line.position.line),
        }
        Ok(())
    }
}

fn name_operand(line: &AsmLine) -> Result<&str> {
    match line.operands.first() {
        Some(AsmOperand::Name(name)) => Ok(name.as_str()),
        _ => Err(anyhow!(
            "line {}: '{}' needs a name operand",
            line.position.line,
            line.mnemonic.as_deref().unwrap_or_default()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::super::OptLevel;
    use super::super::tests::{compile_source, run};
    use strata_core::vm::Opcode;
    use strata_core::Value;

    #[test]
    fn arithmetic_lowers_to_vm_opcodes() {
        let source = "int total = 0;\n@asm {\n  push 2\n  push 3\n  add\n  store total\n}\ntotal";
        let chunk = compile_source(source, OptLevel::O0);
        assert!(chunk.instructions.iter().any(|inst| inst.opcode == Opcode::Add));
        assert_eq!(run(source), Value::Integer(5));
    }

    #[test]
    fn labels_drive_loops() {
        let source = "int n = 0;\n@asm {\nagain:\n  load n\n  push 1\n  add\n  dup\n  store n\n  push 4\n  lt\n  jz done\n  jmp again\ndone:\n  nop\n}\nn";
        assert_eq!(run(source), Value::Integer(4));
    }

    #[test]
    fn spirv_blocks_are_skipped() {
        let source = "int n = 7;\n@asm spirv {\n  OpNop\n}\nn";
        assert_eq!(run(source), Value::Integer(7));
    }
}
