pub mod bytecode;
pub mod error;
pub mod instruction;
pub mod methods;
pub mod stack_vm;

pub use bytecode::{BytecodeError, Capture, Chunk, ClassInfo, Constant, FunctionInfo};
pub use error::{TraceFrame, VmError, VmErrorKind, VmResult};
pub use instruction::{Instruction, Opcode};
pub use stack_vm::{
    execute, AsyncCall, CancellationToken, OutputBuffer, RuntimeOptions, Step, Vm, VmState,
    VmStats,
};
