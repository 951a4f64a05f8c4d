use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::natives::{default_registry, NativeContext, NativeError, SharedNatives};
use crate::ops::{self, BinaryOp, OpError, UnaryOp};
use crate::value::{Closure, Object, Upvalue, UpvalueRef, Value};

use super::bytecode::Chunk;
use super::error::{TraceFrame, VmError, VmErrorKind, VmResult, CANCELLATION_CLASS};
use super::instruction::{Instruction, Opcode};
use super::methods;

/// Upper bound on elements materialised by a range expression.
const MAX_RANGE_LEN: i64 = 10_000_000;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub max_frames: usize,
    pub trace: bool,
    pub cancellation: Option<CancellationToken>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            trace: false,
            cancellation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    Suspended,
    Faulted,
    Halted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub instructions: u64,
    pub max_frame_depth: usize,
    pub max_stack_depth: usize,
}

/// Pending call to an asynchronous native; the host completes it and
/// passes the result to [`Vm::resume`].
#[derive(Debug, Clone)]
pub struct AsyncCall {
    pub name: String,
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub enum Step {
    Complete(Value),
    Yield(AsyncCall),
}

/// Thread-safe byte sink for capturing program output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Normal,
    Constructor,
}

struct CallFrame {
    function: u32,
    ip: usize,
    base: usize,
    closure: Option<Rc<Closure>>,
    kind: FrameKind,
}

struct Handler {
    target: usize,
    stack_len: usize,
    frame_depth: usize,
}

enum Flow {
    Continue,
    Finished(Value),
    Yield(AsyncCall),
}

pub struct Vm {
    chunk: Arc<Chunk>,
    options: RuntimeOptions,
    natives: SharedNatives,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<Handler>,
    globals: Vec<Value>,
    open_upvalues: Vec<UpvalueRef>,
    state: VmState,
    stats: VmStats,
    cancelling: bool,
    output: Box<dyn Write>,
}

/// Runs `chunk` to completion with the default natives, printing to stdout.
pub fn execute(chunk: Arc<Chunk>, options: RuntimeOptions) -> VmResult<Value> {
    Vm::new(chunk, options).execute()
}

impl Vm {
    pub fn new(chunk: Arc<Chunk>, options: RuntimeOptions) -> Self {
        let globals = vec![Value::Null; chunk.globals.len()];
        Self {
            chunk,
            options,
            natives: default_registry().clone().into_shared(),
            stack: Vec::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            globals,
            open_upvalues: Vec::new(),
            state: VmState::Ready,
            stats: VmStats::default(),
            cancelling: false,
            output: Box::new(std::io::stdout()),
        }
    }

    pub fn with_natives(mut self, natives: SharedNatives) -> Self {
        self.natives = natives;
        self
    }

    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn stats(&self) -> VmStats {
        self.stats
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        let index = self.chunk.globals.iter().position(|global| global == name)?;
        self.globals.get(index)
    }

    /// Drives the program, completing asynchronous natives inline.
    pub fn execute(&mut self) -> VmResult<Value> {
        let mut step = self.run()?;
        loop {
            match step {
                Step::Complete(value) => return Ok(value),
                Step::Yield(call) => {
                    step = match self.call_native_now(&call.name, &call.args) {
                        Ok(value) => self.resume(value)?,
                        Err(err) => self.fail(err)?,
                    };
                }
            }
        }
    }

    /// Starts execution at the entry function.
    pub fn run(&mut self) -> VmResult<Step> {
        if self.state != VmState::Ready {
            return Err(VmError::internal(format!(
                "cannot start a VM in state {:?}",
                self.state
            )));
        }
        let entry = self.chunk.entry;
        let info = self
            .chunk
            .functions
            .get(entry as usize)
            .ok_or_else(|| VmError::internal("invalid entry function index"))?;
        if info.required != 0 {
            return Err(VmError::internal(format!(
                "entry function '{}' expects {} arguments",
                info.name, info.required
            )));
        }
        tracing::debug!(
            instructions = self.chunk.instructions.len(),
            functions = self.chunk.functions.len(),
            "starting vm"
        );
        self.stack.push(Value::Null);
        self.push_frame(entry, 0, None, FrameKind::Normal)?;
        self.state = VmState::Running;
        self.dispatch()
    }

    /// Continues a suspended VM with the result of the pending native call.
    pub fn resume(&mut self, value: Value) -> VmResult<Step> {
        self.expect_suspended()?;
        self.stack.push(value);
        self.state = VmState::Running;
        self.dispatch()
    }

    /// Continues a suspended VM by raising the native's failure as an exception.
    pub fn fail(&mut self, err: NativeError) -> VmResult<Step> {
        self.expect_suspended()?;
        self.state = VmState::Running;
        let exception = make_exception("ArgumentException", &err.to_string());
        if let Err(err) = self.throw_value(exception) {
            self.state = VmState::Faulted;
            return Err(err);
        }
        self.dispatch()
    }

    fn expect_suspended(&self) -> VmResult<()> {
        if self.state != VmState::Suspended {
            return Err(VmError::internal(format!(
                "cannot resume a VM in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn dispatch(&mut self) -> VmResult<Step> {
        let chunk = Arc::clone(&self.chunk);
        loop {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| VmError::internal("no active call frame"))?;
            let ip = frame.ip;
            let inst = chunk
                .instructions
                .get(ip)
                .ok_or_else(|| VmError::internal(format!("instruction pointer {ip} out of range")))?;
            frame.ip += 1;
            self.stats.instructions += 1;
            if self.options.trace {
                tracing::trace!(
                    ip,
                    opcode = ?inst.opcode,
                    a = inst.operand_a,
                    b = inst.operand_b,
                    depth = self.frames.len(),
                    stack = self.stack.len(),
                    "exec"
                );
            }

            let outcome = self.execute_instruction(&chunk, inst);
            if self.stack.len() > self.stats.max_stack_depth {
                self.stats.max_stack_depth = self.stack.len();
            }
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished(value)) => {
                    self.state = VmState::Halted;
                    return Ok(Step::Complete(value));
                }
                Ok(Flow::Yield(call)) => {
                    self.state = VmState::Suspended;
                    return Ok(Step::Yield(call));
                }
                Err(err) if self.state == VmState::Faulted => return Err(err),
                Err(err) if err.kind == VmErrorKind::Internal => {
                    self.state = VmState::Faulted;
                    return Err(err.with_stack(self.stack_trace()));
                }
                Err(err) => {
                    if err.kind == VmErrorKind::Cancelled {
                        self.cancelling = true;
                    }
                    let exception = make_exception(err.kind.exception_name(), &err.message);
                    if let Err(err) = self.throw_value(exception) {
                        self.state = VmState::Faulted;
                        return Err(err);
                    }
                }
            }
        }
    }

    fn execute_instruction(&mut self, chunk: &Chunk, inst: &Instruction) -> VmResult<Flow> {
        let a = inst.operand_a;
        let b = inst.operand_b;
        match inst.opcode {
            Opcode::Nop => {}
            Opcode::LoadConst => {
                let constant = chunk
                    .constants
                    .get(a as usize)
                    .ok_or_else(|| VmError::internal(format!("constant {a} out of range")))?;
                self.stack.push(Value::from_constant(constant));
            }
            Opcode::Null => self.stack.push(Value::Null),
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.peek(0)?.clone();
                self.stack.push(top);
            }
            Opcode::LoadLocal => {
                let index = self.frame()?.base + a as usize;
                let value = self
                    .stack
                    .get(index)
                    .cloned()
                    .ok_or_else(|| VmError::internal(format!("local slot {a} out of range")))?;
                self.stack.push(value);
            }
            Opcode::StoreLocal => {
                let value = self.pop()?;
                let index = self.frame()?.base + a as usize;
                let slot = self
                    .stack
                    .get_mut(index)
                    .ok_or_else(|| VmError::internal(format!("local slot {a} out of range")))?;
                *slot = value;
            }
            Opcode::LoadUpvalue => {
                let upvalue = self.upvalue(a)?;
                let value = match &*upvalue.borrow() {
                    Upvalue::Open(index) => self.stack[*index].clone(),
                    Upvalue::Closed(value) => value.clone(),
                };
                self.stack.push(value);
            }
            Opcode::StoreUpvalue => {
                let value = self.pop()?;
                let upvalue = self.upvalue(a)?;
                let open_index = match &*upvalue.borrow() {
                    Upvalue::Open(index) => Some(*index),
                    Upvalue::Closed(_) => None,
                };
                match open_index {
                    Some(index) => self.stack[index] = value,
                    None => *upvalue.borrow_mut() = Upvalue::Closed(value),
                }
            }
            Opcode::CloseUpvalues => {
                let from = self.frame()?.base + a as usize;
                self.close_upvalues(from);
            }
            Opcode::LoadGlobal => {
                let value = self
                    .globals
                    .get(a as usize)
                    .cloned()
                    .ok_or_else(|| VmError::internal(format!("global {a} out of range")))?;
                self.stack.push(value);
            }
            Opcode::StoreGlobal => {
                let value = self.pop()?;
                let slot = self
                    .globals
                    .get_mut(a as usize)
                    .ok_or_else(|| VmError::internal(format!("global {a} out of range")))?;
                *slot = value;
            }
            Opcode::LoadNative => {
                let name = string_operand(chunk, a)?;
                self.stack.push(Value::Native(Rc::from(name)));
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual
            | Opcode::Compare => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let value = ops::binary(binary_op(inst.opcode), &lhs, &rhs).map_err(op_fault)?;
                self.stack.push(value);
            }
            Opcode::Neg | Opcode::Not | Opcode::BitNot => {
                let operand = self.pop()?;
                let op = match inst.opcode {
                    Opcode::Neg => UnaryOp::Neg,
                    Opcode::Not => UnaryOp::Not,
                    _ => UnaryOp::BitNot,
                };
                let value = ops::unary(op, &operand).map_err(op_fault)?;
                self.stack.push(value);
            }
            Opcode::In => {
                let collection = self.pop()?;
                let item = self.pop()?;
                let found = ops::contains(&collection, &item).map_err(op_fault)?;
                self.stack.push(Value::Boolean(found));
            }
            Opcode::Subset => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = ops::subset(&lhs, &rhs).map_err(op_fault)?;
                self.stack.push(Value::Boolean(result));
            }
            Opcode::Union | Opcode::Intersect => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let value = if inst.opcode == Opcode::Union {
                    ops::union(&lhs, &rhs)
                } else {
                    ops::intersect(&lhs, &rhs)
                }
                .map_err(op_fault)?;
                self.stack.push(value);
            }
            Opcode::MakeRange => {
                let end = self.pop()?;
                let start = self.pop()?;
                let (Some(start), Some(end)) = (start.as_integer(), end.as_integer()) else {
                    return Err(VmError::new(
                        VmErrorKind::TypeCast,
                        "range bounds must be integers",
                    ));
                };
                let end = if a == 1 { end.saturating_add(1) } else { end };
                if end.saturating_sub(start) > MAX_RANGE_LEN {
                    return Err(VmError::new(
                        VmErrorKind::IndexOutOfRange,
                        format!("range {start}..{end} is too large"),
                    ));
                }
                let items = (start..end).map(Value::Integer).collect();
                self.stack.push(Value::array(items));
            }
            Opcode::Jump => self.jump(a)?,
            Opcode::JumpIfFalse => {
                if !self.pop()?.is_truthy() {
                    self.jump(a)?;
                }
            }
            Opcode::JumpIfTrue => {
                if self.pop()?.is_truthy() {
                    self.jump(a)?;
                }
            }
            Opcode::JumpIfNull => {
                if self.peek(0)?.is_null() {
                    self.jump(a)?;
                }
            }
            Opcode::JumpIfNotNull => {
                if !self.peek(0)?.is_null() {
                    self.jump(a)?;
                }
            }
            Opcode::Loop => {
                self.check_cancelled()?;
                self.jump(a)?;
            }
            Opcode::Call => return self.call_value(a as usize),
            Opcode::CallDirect => {
                self.push_frame(a, b as usize, None, FrameKind::Normal)?;
            }
            Opcode::CallNative => {
                let name = string_operand(chunk, a)?.to_string();
                return self.call_native(name, b as usize);
            }
            Opcode::Invoke => {
                let name = string_operand(chunk, a)?.to_string();
                return self.invoke(&name, b as usize);
            }
            Opcode::Return => return self.return_from_frame(),
            Opcode::MakeClosure => {
                let info = chunk
                    .functions
                    .get(a as usize)
                    .ok_or_else(|| VmError::internal(format!("function {a} out of range")))?;
                let base = self.frame()?.base;
                let mut upvalues = Vec::with_capacity(info.captures.len());
                for capture in &info.captures {
                    if capture.is_local {
                        upvalues.push(self.capture_upvalue(base + capture.index as usize));
                    } else {
                        upvalues.push(self.upvalue(u32::from(capture.index))?);
                    }
                }
                self.stack.push(Value::Closure(Rc::new(Closure {
                    function: a,
                    upvalues,
                })));
            }
            Opcode::MakeArray => {
                let items = self.pop_n(a as usize)?;
                self.stack.push(Value::array(items));
            }
            Opcode::LoadIndex => {
                let index = self.pop()?;
                let target = self.pop()?;
                let value = load_index(&target, &index)?;
                self.stack.push(value);
            }
            Opcode::StoreIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let target = self.pop()?;
                store_index(&target, &index, value.clone())?;
                self.stack.push(value);
            }
            Opcode::New => return self.instantiate(chunk, a, b as usize),
            Opcode::GetField => {
                let name = string_operand(chunk, a)?;
                let receiver = self.pop()?;
                let value = self.get_member(&receiver, name)?;
                self.stack.push(value);
            }
            Opcode::SetField => {
                let name = string_operand(chunk, a)?;
                let value = self.pop()?;
                let receiver = self.pop()?;
                match &receiver {
                    Value::Object(object) => object.set(name, value.clone()),
                    Value::Null => {
                        return Err(VmError::new(
                            VmErrorKind::NullDereference,
                            format!("cannot assign member '{name}' of null"),
                        ))
                    }
                    other => {
                        return Err(VmError::new(
                            VmErrorKind::TypeCast,
                            format!("cannot assign member '{name}' on {}", other.type_name()),
                        ))
                    }
                }
                self.stack.push(value);
            }
            Opcode::IsInstance => {
                let name = string_operand(chunk, a)?;
                let value = self.pop()?;
                let matches = self.type_matches(&value, name);
                self.stack.push(Value::Boolean(matches));
            }
            Opcode::AsType => {
                let name = string_operand(chunk, a)?;
                let value = self.pop()?;
                let result = if self.type_matches(&value, name) {
                    value
                } else {
                    Value::Null
                };
                self.stack.push(result);
            }
            Opcode::Concat => {
                let parts = self.pop_n(a as usize)?;
                let text: String = parts.iter().map(Value::to_string).collect();
                self.stack.push(Value::string(text));
            }
            Opcode::Len => {
                let value = self.pop()?;
                let len = match &value {
                    Value::Array(items) => items.borrow().len() as i64,
                    Value::String(text) => text.chars().count() as i64,
                    Value::Null => {
                        return Err(VmError::new(
                            VmErrorKind::NullDereference,
                            "cannot iterate over null",
                        ))
                    }
                    other => {
                        return Err(VmError::new(
                            VmErrorKind::TypeCast,
                            format!("{} is not iterable", other.type_name()),
                        ))
                    }
                };
                self.stack.push(Value::Integer(len));
            }
            Opcode::PushHandler => {
                self.handlers.push(Handler {
                    target: a as usize,
                    stack_len: self.stack.len(),
                    frame_depth: self.frames.len(),
                });
            }
            Opcode::PopHandler => {
                self.handlers
                    .pop()
                    .ok_or_else(|| VmError::internal("handler stack underflow"))?;
            }
            Opcode::Throw => {
                let value = self.pop()?;
                self.throw_value(value)?;
            }
            Opcode::MakeException => {
                let name = string_operand(chunk, a)?;
                let message = if b > 0 {
                    let args = self.pop_n(b as usize)?;
                    args.first().map(Value::to_string).unwrap_or_default()
                } else {
                    format!("Exception of type '{name}' was thrown.")
                };
                self.stack.push(make_exception(name, &message));
            }
        }
        Ok(Flow::Continue)
    }

    fn frame(&self) -> VmResult<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| VmError::internal("no active call frame"))
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::internal("operand stack underflow"))
    }

    fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if count > self.stack.len() {
            return Err(VmError::internal("operand stack underflow"));
        }
        let start = self.stack.len() - count;
        Ok(self.stack.drain(start..).collect())
    }

    fn peek(&self, distance: usize) -> VmResult<&Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| VmError::internal("operand stack underflow"))
    }

    fn jump(&mut self, target: u32) -> VmResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| VmError::internal("no active call frame"))?;
        frame.ip = target as usize;
        Ok(())
    }

    fn check_cancelled(&self) -> VmResult<()> {
        if self.cancelling {
            return Ok(());
        }
        match &self.options.cancellation {
            Some(token) if token.is_cancelled() => {
                Err(VmError::new(VmErrorKind::Cancelled, "execution cancelled"))
            }
            _ => Ok(()),
        }
    }

    fn upvalue(&self, index: u32) -> VmResult<UpvalueRef> {
        self.frame()?
            .closure
            .as_ref()
            .and_then(|closure| closure.upvalues.get(index as usize))
            .cloned()
            .ok_or_else(|| VmError::internal(format!("upvalue {index} out of range")))
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> UpvalueRef {
        for upvalue in &self.open_upvalues {
            if matches!(&*upvalue.borrow(), Upvalue::Open(index) if *index == stack_index) {
                return Rc::clone(upvalue);
            }
        }
        let upvalue = Rc::new(std::cell::RefCell::new(Upvalue::Open(stack_index)));
        self.open_upvalues.push(Rc::clone(&upvalue));
        upvalue
    }

    fn close_upvalues(&mut self, from: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|upvalue| {
            let open_index = match &*upvalue.borrow() {
                Upvalue::Open(index) => *index,
                Upvalue::Closed(_) => return false,
            };
            if open_index < from {
                return true;
            }
            let value = stack.get(open_index).cloned().unwrap_or(Value::Null);
            *upvalue.borrow_mut() = Upvalue::Closed(value);
            false
        });
    }

    /// Pushes a frame for `function` whose `argc` arguments sit on top of the
    /// stack, just above the slot-0 value (callee or receiver).
    fn push_frame(
        &mut self,
        function: u32,
        argc: usize,
        closure: Option<Rc<Closure>>,
        kind: FrameKind,
    ) -> VmResult<()> {
        let chunk = Arc::clone(&self.chunk);
        let info = chunk
            .functions
            .get(function as usize)
            .ok_or_else(|| VmError::internal(format!("function {function} out of range")))?;
        if self.frames.len() >= self.options.max_frames {
            return Err(VmError::new(
                VmErrorKind::StackOverflow,
                format!("call depth exceeded {} frames", self.options.max_frames),
            ));
        }
        self.check_cancelled()?;

        let arity = info.arity as usize;
        let mut argc = argc;
        if info.variadic {
            let fixed = arity.saturating_sub(1);
            let rest = if argc > fixed {
                self.pop_n(argc - fixed)?
            } else {
                for _ in argc..fixed {
                    self.stack.push(Value::Null);
                }
                Vec::new()
            };
            self.stack.push(Value::array(rest));
            argc = arity;
        }
        if argc < info.required as usize || argc > arity {
            return Err(VmError::new(
                VmErrorKind::TypeCast,
                format!(
                    "function '{}' expects {} argument(s), received {argc}",
                    info.name, info.arity
                ),
            ));
        }
        for _ in argc..arity {
            self.stack.push(Value::Null);
        }
        let base = self
            .stack
            .len()
            .checked_sub(arity + 1)
            .ok_or_else(|| VmError::internal("operand stack underflow on call"))?;
        for _ in (arity + 1)..(info.locals as usize).max(arity + 1) {
            self.stack.push(Value::Null);
        }
        self.frames.push(CallFrame {
            function,
            ip: info.start as usize,
            base,
            closure,
            kind,
        });
        if self.frames.len() > self.stats.max_frame_depth {
            self.stats.max_frame_depth = self.frames.len();
        }
        Ok(())
    }

    fn return_from_frame(&mut self) -> VmResult<Flow> {
        let result = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::internal("return without a frame"))?;
        self.close_upvalues(frame.base);
        let result = match frame.kind {
            FrameKind::Constructor => self.stack.get(frame.base).cloned().unwrap_or(Value::Null),
            FrameKind::Normal => result,
        };
        self.stack.truncate(frame.base);
        if self.frames.is_empty() {
            return Ok(Flow::Finished(result));
        }
        self.stack.push(result);
        Ok(Flow::Continue)
    }

    fn call_value(&mut self, argc: usize) -> VmResult<Flow> {
        let callee = self.peek(argc)?.clone();
        match callee {
            Value::Closure(closure) => {
                let function = closure.function;
                self.push_frame(function, argc, Some(closure), FrameKind::Normal)?;
                Ok(Flow::Continue)
            }
            Value::Native(name) => {
                let callee_slot = self.stack.len() - argc - 1;
                self.stack.remove(callee_slot);
                self.call_native(name.to_string(), argc)
            }
            Value::Null => Err(VmError::new(
                VmErrorKind::NullDereference,
                "attempted to call null",
            )),
            other => Err(VmError::new(
                VmErrorKind::TypeCast,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn call_native(&mut self, name: String, argc: usize) -> VmResult<Flow> {
        let args = self.pop_n(argc)?;
        let is_async = {
            let natives = self.natives.read();
            natives
                .get(&name)
                .map(|native| native.is_async)
                .ok_or_else(|| VmError::internal(format!("unknown native function '{name}'")))?
        };
        if is_async {
            return Ok(Flow::Yield(AsyncCall { name, args }));
        }
        match self.call_native_now(&name, &args) {
            Ok(value) => {
                self.stack.push(value);
                Ok(Flow::Continue)
            }
            Err(err) => {
                self.throw_value(make_exception("ArgumentException", &err.to_string()))?;
                Ok(Flow::Continue)
            }
        }
    }

    fn call_native_now(&mut self, name: &str, args: &[Value]) -> Result<Value, NativeError> {
        let native = self
            .natives
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NativeError::Argument(format!("unknown native function '{name}'")))?;
        let mut ctx = NativeContext {
            out: self.output.as_mut(),
        };
        native.call(&mut ctx, args)
    }

    fn find_method(&self, class: &str, name: &str) -> Option<u32> {
        let mut current = Some(class.to_string());
        while let Some(class_name) = current {
            let info = self.chunk.classes.iter().find(|c| c.name == class_name)?;
            if let Some(index) = info.method(name) {
                return Some(index);
            }
            current = info.base.clone();
        }
        None
    }

    fn invoke(&mut self, name: &str, argc: usize) -> VmResult<Flow> {
        let receiver = self.peek(argc)?.clone();
        match &receiver {
            Value::Object(object) => {
                if let Some(method) = self.find_method(&object.class, name) {
                    self.push_frame(method, argc, None, FrameKind::Normal)?;
                    return Ok(Flow::Continue);
                }
                match object.get(name) {
                    Some(field @ (Value::Closure(_) | Value::Native(_))) => {
                        let index = self.stack.len() - argc - 1;
                        self.stack[index] = field;
                        self.call_value(argc)
                    }
                    _ => Err(VmError::new(
                        VmErrorKind::TypeCast,
                        format!("'{}' has no method '{name}'", object.class),
                    )),
                }
            }
            Value::Null => Err(VmError::new(
                VmErrorKind::NullDereference,
                format!("cannot call '{name}' on null"),
            )),
            other => {
                let args = self.pop_n(argc)?;
                self.pop()?;
                match methods::invoke(other, name, &args)? {
                    Some(value) => {
                        self.stack.push(value);
                        Ok(Flow::Continue)
                    }
                    None => Err(VmError::new(
                        VmErrorKind::TypeCast,
                        format!("{} has no method '{name}'", other.type_name()),
                    )),
                }
            }
        }
    }

    fn instantiate(&mut self, chunk: &Chunk, class_index: u32, argc: usize) -> VmResult<Flow> {
        let class = chunk
            .classes
            .get(class_index as usize)
            .ok_or_else(|| VmError::internal(format!("class {class_index} out of range")))?;
        if class.is_abstract {
            return Err(VmError::new(
                VmErrorKind::TypeCast,
                format!("cannot instantiate abstract class '{}'", class.name),
            ));
        }
        let object = Object::new(class.name.as_str());
        let mut current = Some(class);
        while let Some(info) = current {
            for field in &info.fields {
                if object.get(field).is_none() {
                    object.set(field.clone(), Value::Null);
                }
            }
            current = info
                .base
                .as_deref()
                .and_then(|base| chunk.classes.iter().find(|c| c.name == base));
        }
        let slot = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or_else(|| VmError::internal("operand stack underflow on new"))?;
        self.stack.insert(slot, Value::Object(Rc::new(object)));
        match class.constructor {
            Some(constructor) => {
                self.push_frame(constructor, argc, None, FrameKind::Constructor)?;
            }
            None => {
                self.pop_n(argc)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn get_member(&self, receiver: &Value, name: &str) -> VmResult<Value> {
        match receiver {
            Value::Object(object) => object.get(name).ok_or_else(|| {
                VmError::new(
                    VmErrorKind::TypeCast,
                    format!("'{}' has no member '{name}'", object.class),
                )
            }),
            Value::Null => Err(VmError::new(
                VmErrorKind::NullDereference,
                format!("cannot read member '{name}' of null"),
            )),
            other => methods::property(other, name).ok_or_else(|| {
                VmError::new(
                    VmErrorKind::TypeCast,
                    format!("{} has no member '{name}'", other.type_name()),
                )
            }),
        }
    }

    fn is_subclass(&self, class: &str, target: &str) -> bool {
        let mut pending = vec![class.to_string()];
        let mut visited = 0;
        while let Some(name) = pending.pop() {
            if name == target {
                return true;
            }
            visited += 1;
            if visited > 256 {
                return false;
            }
            match self.chunk.classes.iter().find(|c| c.name == name) {
                Some(info) => {
                    pending.extend(info.interfaces.iter().cloned());
                    pending.extend(info.base.clone());
                }
                None if name != "Exception" && name.ends_with("Exception") => {
                    pending.push("Exception".to_string());
                }
                None => {}
            }
        }
        false
    }

    fn type_matches(&self, value: &Value, name: &str) -> bool {
        match name {
            "object" | "Object" => {
                !value.is_null() && !matches!(value, Value::Object(o) if &*o.class == CANCELLATION_CLASS)
            }
            "int" | "long" | "short" | "byte" | "i8" | "i16" | "i32" | "i64" | "u8" | "u16"
            | "u32" | "u64" | "usize" => matches!(value, Value::Integer(_)),
            "double" | "float" | "decimal" | "f32" | "f64" => matches!(value, Value::Float(_)),
            "number" => matches!(value, Value::Integer(_) | Value::Float(_)),
            "string" | "String" => matches!(value, Value::String(_)),
            "char" => matches!(value, Value::String(s) if s.chars().count() == 1),
            "bool" => matches!(value, Value::Boolean(_)),
            "array" => matches!(value, Value::Array(_)),
            _ if name.ends_with("[]") || name.starts_with("List") => {
                matches!(value, Value::Array(_))
            }
            _ => match value {
                Value::Object(object) => self.is_subclass(&object.class, name),
                Value::Closure(_) | Value::Native(_) => {
                    name.starts_with("Func") || name.starts_with("Action")
                }
                _ => false,
            },
        }
    }

    /// Unwinds to the innermost handler, or fails with the thrown value when
    /// none is installed.
    fn throw_value(&mut self, value: Value) -> VmResult<()> {
        match self.handlers.pop() {
            Some(handler) => {
                self.close_upvalues(handler.stack_len);
                self.frames.truncate(handler.frame_depth);
                self.stack.truncate(handler.stack_len);
                self.stack.push(value);
                self.jump(handler.target as u32)
            }
            None => {
                let err = error_from_value(&value).with_stack(self.stack_trace());
                self.state = VmState::Faulted;
                tracing::debug!(kind = ?err.kind, message = %err.message, "uncaught exception");
                Err(err)
            }
        }
    }

    fn stack_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                function: self
                    .chunk
                    .functions
                    .get(frame.function as usize)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| "<unknown>".into()),
                line: frame
                    .ip
                    .checked_sub(1)
                    .and_then(|ip| self.chunk.instructions.get(ip))
                    .and_then(|inst| inst.debug),
            })
            .collect()
    }
}

fn string_operand(chunk: &Chunk, index: u32) -> VmResult<&str> {
    chunk
        .string_constant(index)
        .ok_or_else(|| VmError::internal(format!("expected string constant at {index}")))
}

fn binary_op(opcode: Opcode) -> BinaryOp {
    match opcode {
        Opcode::Add => BinaryOp::Add,
        Opcode::Sub => BinaryOp::Sub,
        Opcode::Mul => BinaryOp::Mul,
        Opcode::Div => BinaryOp::Div,
        Opcode::Mod => BinaryOp::Mod,
        Opcode::Pow => BinaryOp::Pow,
        Opcode::BitAnd => BinaryOp::BitAnd,
        Opcode::BitOr => BinaryOp::BitOr,
        Opcode::BitXor => BinaryOp::BitXor,
        Opcode::Equal => BinaryOp::Equal,
        Opcode::NotEqual => BinaryOp::NotEqual,
        Opcode::Less => BinaryOp::Less,
        Opcode::LessEqual => BinaryOp::LessEqual,
        Opcode::Greater => BinaryOp::Greater,
        Opcode::GreaterEqual => BinaryOp::GreaterEqual,
        _ => BinaryOp::Compare,
    }
}

fn op_fault(err: OpError) -> VmError {
    match err {
        OpError::DivisionByZero => {
            VmError::new(VmErrorKind::DivisionByZero, "Attempted to divide by zero.")
        }
        other => VmError::new(VmErrorKind::TypeCast, other.to_string()),
    }
}

fn make_exception(class: &str, message: &str) -> Value {
    let object = Object::new(class);
    object.set("Message", Value::string(message));
    Value::Object(Rc::new(object))
}

fn error_from_value(value: &Value) -> VmError {
    match value {
        Value::Object(object) => {
            let message = object
                .get("Message")
                .map(|message| message.to_string())
                .unwrap_or_else(|| object.class.to_string());
            VmError::new(VmErrorKind::from_exception_name(&object.class), message)
        }
        other => VmError::new(VmErrorKind::UserThrown, other.to_string()),
    }
}

fn index_of(index: &Value, len: usize) -> VmResult<usize> {
    let raw = index.as_integer().ok_or_else(|| {
        VmError::new(
            VmErrorKind::TypeCast,
            format!("index must be an integer, found {}", index.type_name()),
        )
    })?;
    usize::try_from(raw)
        .ok()
        .filter(|position| *position < len)
        .ok_or_else(|| {
            VmError::new(
                VmErrorKind::IndexOutOfRange,
                format!("Index {raw} was outside the bounds of the array (length {len})."),
            )
        })
}

fn load_index(target: &Value, index: &Value) -> VmResult<Value> {
    match target {
        Value::Array(items) => {
            let items = items.borrow();
            let position = index_of(index, items.len())?;
            Ok(items[position].clone())
        }
        Value::String(text) => {
            let count = text.chars().count();
            let position = index_of(index, count)?;
            Ok(Value::string(
                text.chars().nth(position).map(String::from).unwrap_or_default(),
            ))
        }
        Value::Null => Err(VmError::new(
            VmErrorKind::NullDereference,
            "cannot index into null",
        )),
        other => Err(VmError::new(
            VmErrorKind::TypeCast,
            format!("{} cannot be indexed", other.type_name()),
        )),
    }
}

fn store_index(target: &Value, index: &Value, value: Value) -> VmResult<()> {
    match target {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            let position = index_of(index, items.len())?;
            items[position] = value;
            Ok(())
        }
        Value::Null => Err(VmError::new(
            VmErrorKind::NullDereference,
            "cannot index into null",
        )),
        other => Err(VmError::new(
            VmErrorKind::TypeCast,
            format!("{} does not support index assignment", other.type_name()),
        )),
    }
}
