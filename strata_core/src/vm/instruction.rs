use serde::{Deserialize, Serialize};

/// VM operation codes. Operands live in [`Instruction::operand_a`] and
/// [`Instruction::operand_b`]; their meaning is listed per opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    /// a = constant index
    LoadConst,
    Null,
    Pop,
    Dup,
    /// a = frame slot
    LoadLocal,
    /// a = frame slot; pops
    StoreLocal,
    /// a = upvalue index
    LoadUpvalue,
    /// a = upvalue index; pops
    StoreUpvalue,
    /// a = first frame slot to close
    CloseUpvalues,
    /// a = global index
    LoadGlobal,
    /// a = global index; pops
    StoreGlobal,
    /// a = constant index of the native name
    LoadNative,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compare,
    In,
    Subset,
    Union,
    Intersect,
    /// a = 1 for an inclusive upper bound
    MakeRange,
    /// a = target
    Jump,
    /// a = target; pops the condition
    JumpIfFalse,
    /// a = target; pops the condition
    JumpIfTrue,
    /// a = target; peeks
    JumpIfNull,
    /// a = target; peeks
    JumpIfNotNull,
    /// a = target; backward edge, checks cancellation
    Loop,
    /// a = argument count; callee sits below the arguments
    Call,
    /// a = function index, b = argument count
    CallDirect,
    /// a = constant index of the native name, b = argument count
    CallNative,
    /// a = constant index of the method name, b = argument count
    Invoke,
    Return,
    /// a = function index
    MakeClosure,
    /// a = element count
    MakeArray,
    LoadIndex,
    /// leaves the stored value on the stack
    StoreIndex,
    /// a = class index, b = argument count
    New,
    /// a = constant index of the member name
    GetField,
    /// a = constant index of the member name; leaves the stored value
    SetField,
    /// a = constant index of the type name
    IsInstance,
    /// a = constant index of the type name
    AsType,
    /// a = part count
    Concat,
    Len,
    /// a = handler target
    PushHandler,
    PopHandler,
    Throw,
    /// a = constant index of the exception type, b = argument count (0 or 1)
    MakeException,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand_a: u32,
    pub operand_b: u32,
    pub debug: Option<u32>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand_a: u32, operand_b: u32, debug: Option<u32>) -> Self {
        Self {
            opcode,
            operand_a,
            operand_b,
            debug,
        }
    }

    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0, None)
    }

    /// Instructions whose `operand_a` is an instruction index.
    pub fn is_branch(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::JumpIfTrue
                | Opcode::JumpIfNull
                | Opcode::JumpIfNotNull
                | Opcode::Loop
                | Opcode::PushHandler
        )
    }

    pub fn branch_target(&self) -> Option<u32> {
        self.is_branch().then_some(self.operand_a)
    }
}
