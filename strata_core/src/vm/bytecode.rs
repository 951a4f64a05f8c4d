use super::instruction::{Instruction, Opcode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid bytecode magic")]
    InvalidMagic,
    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed bytecode: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BytecodeError {
    fn from(err: std::io::Error) -> Self {
        BytecodeError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Constant {
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Null, Constant::Null) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

/// Variable captured by a closure: a slot of the enclosing frame when
/// `is_local`, otherwise an upvalue of the enclosing closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub is_local: bool,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Declared parameter count, slot 0 (callee or receiver) excluded.
    pub arity: u16,
    /// Parameters without a default value.
    pub required: u16,
    /// Last parameter collects surplus arguments into an array.
    pub variadic: bool,
    pub locals: u16,
    pub start: u32,
    pub end: u32,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    /// Implemented interfaces; they only take part in type tests.
    #[serde(default)]
    pub interfaces: Vec<String>,
    pub fields: Vec<String>,
    pub methods: Vec<(String, u32)>,
    pub constructor: Option<u32>,
    pub is_abstract: bool,
}

impl ClassInfo {
    pub fn method(&self, name: &str) -> Option<u32> {
        self.methods
            .iter()
            .find(|(method, _)| method == name)
            .map(|(_, index)| *index)
    }
}

/// Immutable compiled program: one flat instruction stream where each
/// function owns the `[start, end)` range of its [`FunctionInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub version: u16,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub globals: Vec<String>,
    pub entry: u32,
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            version: Chunk::VERSION,
            instructions: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            globals: Vec::new(),
            entry: 0,
        }
    }
}

impl Chunk {
    const MAGIC: &'static [u8; 4] = b"STRC";
    pub const VERSION: u16 = 1;

    /// Returns the index of `constant`, appending it only when no equal
    /// constant exists yet.
    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        if let Some(index) = self.constants.iter().position(|c| c.same_as(&constant)) {
            return index as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    pub fn string_constant(&self, index: u32) -> Option<&str> {
        match self.constants.get(index as usize) {
            Some(Constant::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|class| class.name == name)
    }

    /// Function that owns instruction `ip`.
    pub fn function_at(&self, ip: usize) -> Option<&FunctionInfo> {
        self.functions
            .iter()
            .find(|function| (function.start as usize) <= ip && ip < function.end as usize)
    }

    pub fn encode<W: Write>(&self, mut writer: W) -> Result<(), BytecodeError> {
        writer.write_all(Self::MAGIC)?;
        writer.write_all(&Self::VERSION.to_le_bytes())?;
        let body =
            bincode::serialize(self).map_err(|err| BytecodeError::Malformed(err.to_string()))?;
        writer.write_all(&(body.len() as u64).to_le_bytes())?;
        writer.write_all(&body)?;
        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BytecodeError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn decode<R: Read>(mut reader: R) -> Result<Self, BytecodeError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != Self::MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes)?;
        let version = u16::from_le_bytes(version_bytes);
        if version != Self::VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let mut len_bytes = [0u8; 8];
        reader.read_exact(&mut len_bytes)?;
        let len = usize::try_from(u64::from_le_bytes(len_bytes))
            .map_err(|_| BytecodeError::Malformed("body length overflow".into()))?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        let chunk: Chunk =
            bincode::deserialize(&body).map_err(|err| BytecodeError::Malformed(err.to_string()))?;
        chunk.validate()?;
        Ok(chunk)
    }

    /// Structural checks run on decoded chunks before a VM accepts them.
    pub fn validate(&self) -> Result<(), BytecodeError> {
        let len = self.instructions.len() as u32;
        if self.functions.get(self.entry as usize).is_none() {
            return Err(BytecodeError::Malformed("entry function out of range".into()));
        }
        for function in &self.functions {
            if function.start > function.end || function.end > len {
                return Err(BytecodeError::Malformed(format!(
                    "function '{}' has an invalid code range",
                    function.name
                )));
            }
        }
        for (ip, inst) in self.instructions.iter().enumerate() {
            if let Some(target) = inst.branch_target() {
                if target > len {
                    return Err(BytecodeError::Malformed(format!(
                        "branch at {ip} targets {target}"
                    )));
                }
            }
            if inst.opcode == Opcode::LoadConst && inst.operand_a as usize >= self.constants.len()
            {
                return Err(BytecodeError::Malformed(format!(
                    "constant index {} out of range at {ip}",
                    inst.operand_a
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, BytecodeError> {
        serde_json::to_string_pretty(self).map_err(|err| BytecodeError::Malformed(err.to_string()))
    }

    /// Human readable listing grouped by function.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "constants:");
        for (index, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "  [{index:>3}] {constant:?}");
        }
        if !self.globals.is_empty() {
            let _ = writeln!(out, "globals: {}", self.globals.join(", "));
        }
        for class in &self.classes {
            let base = class.base.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "class {} : {} fields=[{}] methods=[{}]",
                class.name,
                base,
                class.fields.join(", "),
                class
                    .methods
                    .iter()
                    .map(|(name, index)| format!("{name}#{index}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        let mut order: Vec<usize> = (0..self.functions.len()).collect();
        order.sort_by_key(|index| self.functions[*index].start);
        for index in order {
            let function = &self.functions[index];
            let _ = writeln!(
                out,
                "fn#{index} {} (arity {}, locals {}, captures {})",
                function.name,
                function.arity,
                function.locals,
                function.captures.len()
            );
            for ip in function.start..function.end {
                let inst = &self.instructions[ip as usize];
                let _ = writeln!(out, "  {ip:>5}  {}", self.describe(inst));
            }
        }
        out
    }

    fn describe(&self, inst: &Instruction) -> String {
        use Opcode::*;
        let name = format!("{:?}", inst.opcode);
        match inst.opcode {
            LoadConst => format!(
                "{name:<14} {} ; {:?}",
                inst.operand_a,
                self.constants.get(inst.operand_a as usize)
            ),
            LoadGlobal | StoreGlobal => format!(
                "{name:<14} {} ; {}",
                inst.operand_a,
                self.globals
                    .get(inst.operand_a as usize)
                    .map(String::as_str)
                    .unwrap_or("?")
            ),
            GetField | SetField | IsInstance | AsType | LoadNative => format!(
                "{name:<14} {}",
                self.string_constant(inst.operand_a).unwrap_or("?")
            ),
            CallNative | Invoke | MakeException => format!(
                "{name:<14} {} argc={}",
                self.string_constant(inst.operand_a).unwrap_or("?"),
                inst.operand_b
            ),
            CallDirect => format!(
                "{name:<14} {} argc={}",
                self.functions
                    .get(inst.operand_a as usize)
                    .map(|f| f.name.as_str())
                    .unwrap_or("?"),
                inst.operand_b
            ),
            New => format!(
                "{name:<14} {} argc={}",
                self.classes
                    .get(inst.operand_a as usize)
                    .map(|c| c.name.as_str())
                    .unwrap_or("?"),
                inst.operand_b
            ),
            LoadLocal | StoreLocal | LoadUpvalue | StoreUpvalue | CloseUpvalues | Jump
            | JumpIfFalse | JumpIfTrue | JumpIfNull | JumpIfNotNull | Loop | Call
            | MakeClosure | MakeArray | MakeRange | Concat | PushHandler => {
                format!("{name:<14} {}", inst.operand_a)
            }
            _ => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        let mut chunk = Chunk::default();
        let two = chunk.add_constant(Constant::Integer(2));
        chunk.instructions = vec![
            Instruction::new(Opcode::LoadConst, two, 0, Some(1)),
            Instruction::simple(Opcode::Return),
        ];
        chunk.functions.push(FunctionInfo {
            name: "<script>".into(),
            arity: 0,
            required: 0,
            variadic: false,
            locals: 1,
            start: 0,
            end: 2,
            captures: Vec::new(),
        });
        chunk
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut chunk = Chunk::default();
        let a = chunk.add_constant(Constant::String("x".into()));
        let b = chunk.add_constant(Constant::Integer(1));
        let c = chunk.add_constant(Constant::String("x".into()));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn integer_and_float_constants_stay_distinct() {
        let mut chunk = Chunk::default();
        let a = chunk.add_constant(Constant::Integer(1));
        let b = chunk.add_constant(Constant::Float(1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn encode_decode_preserves_chunk() {
        let chunk = sample();
        let bytes = chunk.serialize().expect("encode");
        let decoded = Chunk::decode(&bytes[..]).expect("decode");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let err = Chunk::decode(&b"NOPE\x01\x00"[..]).unwrap_err();
        assert!(matches!(err, BytecodeError::InvalidMagic));
    }

    #[test]
    fn disassembly_lists_functions() {
        let listing = sample().disassemble();
        assert!(listing.contains("fn#0 <script>"));
        assert!(listing.contains("LoadConst"));
    }
}
