//=====================================================
// File: strata_core/src/lib.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata runtime core
// Objective: Export the bytecode format, value model, operator semantics,
//            native registry and virtual machine
//=====================================================

pub mod natives;
pub mod ops;
pub mod value;
pub mod vm;

pub use natives::{NativeError, NativeFunction, NativeRegistry, SharedNatives};
pub use value::Value;
pub use vm::{Chunk, RuntimeOptions, Vm, VmError, VmErrorKind};

//=====================================================
// End of file
//=====================================================
