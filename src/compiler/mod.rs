//=====================================================
// File: compiler/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata bytecode compiler
// Objective: Lower a checked program into a strata_core Chunk: function
//            and class tables, frame slots, closures and the optimization
//            levels; statements, expressions and patterns live in sibling
//            modules
//=====================================================

mod asm;
mod expr;
pub mod fold;
mod patterns;
pub mod peephole;
mod stmt;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use strata_core::vm::{Capture, Chunk, ClassInfo, Constant, FunctionInfo, Instruction, Opcode};
use tracing::debug;

use crate::ast::{
    ClassDecl, ClassMember, ConstructorDecl, Expr, FieldDecl, FunctionBody, FunctionDecl, Param,
    Program, Stmt, StmtKind, TypeExpr,
};
use crate::checker::registry::BUILTIN_EXCEPTIONS;
use crate::checker::types::Type;
use crate::checker::{Annotations, CheckedProgram};

//=====================================================
// Section 1: Options
//=====================================================

/// How much work the compiler spends on the emitted code.
///
/// * `O0` emits the program as written.
/// * `O1` folds constant expressions.
/// * `O2` also removes branches and statements that can never run.
/// * `O3` also runs the peephole pass over the finished bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum OptLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    pub fn folds_constants(self) -> bool {
        self >= OptLevel::O1
    }

    pub fn eliminates_dead_code(self) -> bool {
        self >= OptLevel::O2
    }

    pub fn runs_peephole(self) -> bool {
        self >= OptLevel::O3
    }
}

impl TryFrom<u8> for OptLevel {
    type Error = anyhow::Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(OptLevel::O0),
            1 => Ok(OptLevel::O1),
            2 => Ok(OptLevel::O2),
            3 => Ok(OptLevel::O3),
            other => bail!("optimization level must be between 0 and 3, got {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub opt_level: OptLevel,
}

impl CompileOptions {
    pub fn with_level(opt_level: OptLevel) -> Self {
        Self { opt_level }
    }
}

/// Compiles a checked program. Programs with type errors are refused;
/// warnings do not block compilation.
pub fn compile(checked: &CheckedProgram, options: &CompileOptions) -> Result<Chunk> {
    if checked.has_errors() {
        let count = checked.errors().count();
        bail!("cannot compile a program with {count} type error(s)");
    }
    let level = options.opt_level;
    let program: Cow<'_, Program> = if level.folds_constants() {
        let mut program = checked.program.clone();
        let rewrites = fold::fold_program(&mut program, &checked.annotations, level.eliminates_dead_code());
        debug!(rewrites, "constant folding finished");
        Cow::Owned(program)
    } else {
        Cow::Borrowed(&checked.program)
    };

    let mut compiler = Compiler::new(&checked.annotations)?;
    compiler.compile_program(&program)?;
    let mut chunk = compiler.chunk;

    if level.runs_peephole() {
        let removed = peephole::optimize(&mut chunk);
        debug!(removed, "peephole pass finished");
    }
    chunk
        .validate()
        .map_err(|err| anyhow!("compiler produced invalid bytecode: {err}"))?;
    debug!(
        level = ?level,
        instructions = chunk.instructions.len(),
        constants = chunk.constants.len(),
        functions = chunk.functions.len(),
        classes = chunk.classes.len(),
        "compiled program"
    );
    Ok(chunk)
}

//=====================================================
// Section 2: Compiler state
//=====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Constructor,
    Lambda,
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: usize,
    slot: u32,
    captured: bool,
}

/// Where a resolved variable lives in the current frame.
#[derive(Debug, Clone, Copy)]
enum Access {
    Local(u32),
    Upvalue(u32),
}

#[derive(Debug, Default)]
struct LoopContext {
    is_switch: bool,
    breaks: Vec<usize>,
    continues: Vec<usize>,
    /// Known continue target; otherwise continues are patched later.
    continue_target: Option<usize>,
    slot_floor: u32,
    try_depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct TryContext<'a> {
    handler_active: bool,
    finally: Option<&'a [Stmt]>,
}

struct FunctionState<'a> {
    index: u32,
    name: String,
    kind: FunctionKind,
    /// Nested functions capture from the state that encloses them.
    nested: bool,
    arity: u16,
    required: u16,
    variadic: bool,
    code: Vec<Instruction>,
    locals: Vec<Local>,
    upvalues: Vec<(String, Capture)>,
    depth: usize,
    max_slot: u32,
    line: u32,
    loops: Vec<LoopContext>,
    tries: Vec<TryContext<'a>>,
    /// Slots holding the exception of each enclosing catch clause.
    catches: Vec<u32>,
    class: Option<String>,
    is_static: bool,
    return_type: Option<&'a TypeExpr>,
}

impl<'a> FunctionState<'a> {
    fn new(index: u32, name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            nested: false,
            arity: 0,
            required: 0,
            variadic: false,
            code: Vec::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            depth: 0,
            max_slot: 0,
            line: 0,
            loops: Vec::new(),
            tries: Vec::new(),
            catches: Vec::new(),
            class: None,
            is_static: false,
            return_type: None,
        }
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        self.locals
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| local.slot)
    }

    fn next_slot(&self) -> u32 {
        self.locals.last().map_or(0, |local| local.slot + 1)
    }

    fn mark_captured(&mut self, slot: u32) {
        if let Some(local) = self.locals.iter_mut().rev().find(|local| local.slot == slot) {
            local.captured = true;
        }
    }

    fn add_upvalue(&mut self, name: &str, capture: Capture) -> u32 {
        if let Some(index) = self.upvalues.iter().position(|(_, existing)| *existing == capture) {
            return index as u32;
        }
        self.upvalues.push((name.to_string(), capture));
        (self.upvalues.len() - 1) as u32
    }

    fn captures_from(&self, floor: u32) -> bool {
        self.locals
            .iter()
            .any(|local| local.slot >= floor && local.captured)
    }
}

/// Everything `begin_function` needs to open a frame.
struct FunctionSetup<'a> {
    index: u32,
    name: String,
    kind: FunctionKind,
    nested: bool,
    params: &'a [Param],
    return_type: Option<&'a TypeExpr>,
    class: Option<String>,
    is_static: bool,
}

struct FunctionEntry<'a> {
    index: u32,
    decl: &'a FunctionDecl,
    module: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum MethodRef<'a> {
    /// Dispatched on the receiver; abstract methods have no body.
    Virtual(&'a FunctionDecl, Option<u32>),
    Static(&'a FunctionDecl, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRef {
    Instance,
    Static,
}

struct ClassEntry<'a> {
    index: u32,
    decl: &'a ClassDecl,
    module: Option<String>,
    base: Option<String>,
    interfaces: Vec<String>,
    instance_fields: Vec<&'a FieldDecl>,
    static_fields: Vec<&'a FieldDecl>,
    methods: HashMap<String, MethodRef<'a>>,
    explicit_constructor: Option<&'a ConstructorDecl>,
    constructor: Option<u32>,
}

pub(crate) fn is_builtin_exception(name: &str) -> bool {
    BUILTIN_EXCEPTIONS.contains(&name)
}

fn qualify_in(module: Option<&str>, name: &str) -> String {
    match module {
        Some(module) => format!("{module}.{name}"),
        None => name.to_string(),
    }
}

pub(crate) struct Compiler<'a> {
    annotations: &'a Annotations,
    chunk: Chunk,
    current: FunctionState<'a>,
    enclosing: Vec<FunctionState<'a>>,
    functions: HashMap<String, FunctionEntry<'a>>,
    function_order: Vec<String>,
    classes: HashMap<String, ClassEntry<'a>>,
    class_order: Vec<String>,
    interfaces: HashSet<String>,
    enums: HashMap<String, HashMap<String, i64>>,
    modules: HashSet<String>,
    module: Option<String>,
    lambda_count: usize,
}

impl<'a> Compiler<'a> {
    fn new(annotations: &'a Annotations) -> Result<Self> {
        let mut chunk = Chunk::default();
        chunk.functions.push(placeholder("<script>"));
        Ok(Self {
            annotations,
            chunk,
            current: FunctionState::new(0, "<script>", FunctionKind::Script),
            enclosing: Vec::new(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            classes: HashMap::new(),
            class_order: Vec::new(),
            interfaces: HashSet::new(),
            enums: HashMap::new(),
            modules: HashSet::new(),
            module: None,
            lambda_count: 0,
        })
    }

    fn compile_program(&mut self, program: &'a Program) -> Result<()> {
        self.chunk.entry = 0;
        self.collect(&program.statements, None)?;
        self.layout_classes()?;

        for name in self.function_order.clone() {
            self.compile_top_level_function(&name)?;
        }
        for name in self.class_order.clone() {
            self.compile_class(&name)?;
        }
        self.compile_script(&program.statements)
    }

    fn compile_script(&mut self, statements: &'a [Stmt]) -> Result<()> {
        self.declare_local("$script")?;
        for name in self.function_order.clone() {
            let index = self.function_entry(&name)?.index;
            let global = self.global_slot(&name);
            self.emit(Opcode::MakeClosure, index, 0);
            self.emit(Opcode::StoreGlobal, global, 0);
        }
        let last = statements.len().checked_sub(1);
        for (position, stmt) in statements.iter().enumerate() {
            match &stmt.kind {
                StmtKind::Expr(expr) if Some(position) == last => {
                    self.current.line = stmt.position.line as u32;
                    self.compile_expr(expr)?;
                    self.emit_op(Opcode::Return);
                }
                _ => self.compile_stmt(stmt)?,
            }
        }
        let script = std::mem::replace(
            &mut self.current,
            FunctionState::new(0, "<script>", FunctionKind::Script),
        );
        self.install(script)
    }

    //=====================================================
    // Section 3: Declaration pass
    //=====================================================

    fn collect(&mut self, statements: &'a [Stmt], module: Option<&str>) -> Result<()> {
        for stmt in statements {
            match &stmt.kind {
                StmtKind::Function(decl) => {
                    let qualified = qualify_in(module, &decl.name);
                    let index = self.reserve_function(&qualified);
                    self.global_slot(&qualified);
                    self.functions.insert(
                        qualified.clone(),
                        FunctionEntry {
                            index,
                            decl,
                            module: module.map(str::to_string),
                        },
                    );
                    self.function_order.push(qualified);
                }
                StmtKind::Var(decl) => {
                    self.global_slot(&qualify_in(module, &decl.name));
                }
                StmtKind::Set { name, .. } => {
                    self.global_slot(&qualify_in(module, name));
                }
                StmtKind::Class(decl) => self.collect_class(decl, module)?,
                StmtKind::Interface(decl) => {
                    self.interfaces.insert(decl.name.to_string());
                }
                StmtKind::Enum(decl) => {
                    let mut values = HashMap::new();
                    let mut next = 0i64;
                    for (variant, explicit) in &decl.variants {
                        let value = explicit.unwrap_or(next);
                        values.insert(variant.to_string(), value);
                        next = value.wrapping_add(1);
                    }
                    self.enums.insert(decl.name.to_string(), values);
                }
                StmtKind::Module(decl) => {
                    let path = qualify_in(module, &decl.name);
                    self.modules.insert(path.clone());
                    self.collect(&decl.body, Some(&path))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_class(&mut self, decl: &'a ClassDecl, module: Option<&str>) -> Result<()> {
        let name = decl.name.to_string();
        if self.classes.contains_key(&name) {
            bail!("class '{name}' is declared twice");
        }
        let index = self.chunk.classes.len() as u32;
        self.chunk.classes.push(ClassInfo {
            name: name.clone(),
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructor: None,
            is_abstract: decl.is_abstract,
        });

        let mut entry = ClassEntry {
            index,
            decl,
            module: module.map(str::to_string),
            base: None,
            interfaces: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            methods: HashMap::new(),
            explicit_constructor: None,
            constructor: None,
        };
        for member in &decl.members {
            match member {
                ClassMember::Field(field) if field.is_static || field.is_const => {
                    self.global_slot(&format!("{name}.{}", field.name));
                    entry.static_fields.push(field);
                }
                ClassMember::Field(field) => entry.instance_fields.push(field),
                ClassMember::Method(method) => {
                    let method_ref = match (&method.body, method.modifiers.is_static) {
                        (FunctionBody::None, _) => MethodRef::Virtual(method, None),
                        (_, true) => {
                            let index = self.reserve_function(&format!("{name}.{}", method.name));
                            MethodRef::Static(method, index)
                        }
                        (_, false) => {
                            let index = self.reserve_function(&format!("{name}.{}", method.name));
                            MethodRef::Virtual(method, Some(index))
                        }
                    };
                    entry.methods.insert(method.name.to_string(), method_ref);
                }
                ClassMember::Constructor(constructor) => {
                    if entry.explicit_constructor.is_some() {
                        bail!("class '{name}' declares more than one constructor");
                    }
                    entry.explicit_constructor = Some(constructor);
                }
            }
        }
        self.classes.insert(name.clone(), entry);
        self.class_order.push(name);
        Ok(())
    }

    /// Splits bases into the base class and interfaces, decides which
    /// classes need a constructor and fills in the class table.
    fn layout_classes(&mut self) -> Result<()> {
        for name in self.class_order.clone() {
            let decl = self.class_entry(&name)?.decl;
            let mut base = None;
            let mut interfaces = Vec::new();
            for ty in &decl.bases {
                let TypeExpr::Named { name: base_name, .. } = ty else {
                    bail!("class '{name}' has an invalid base type '{ty}'");
                };
                let is_class = self.classes.contains_key(base_name.as_str())
                    || is_builtin_exception(base_name);
                if is_class && base.is_none() && !self.interfaces.contains(base_name.as_str()) {
                    base = Some(base_name.to_string());
                } else {
                    interfaces.push(base_name.to_string());
                }
            }
            let entry = self.class_entry_mut(&name)?;
            entry.base = base;
            entry.interfaces = interfaces;
        }

        for name in self.class_order.clone() {
            if self.needs_constructor(&name) {
                let index = self.reserve_function(&format!("{name}.ctor"));
                self.class_entry_mut(&name)?.constructor = Some(index);
            }
        }

        for name in self.class_order.clone() {
            let entry = self.class_entry(&name)?;
            let mut fields: Vec<String> = entry
                .instance_fields
                .iter()
                .map(|field| field.name.to_string())
                .collect();
            if entry.base.as_deref().is_some_and(is_builtin_exception) {
                fields.push("Message".to_string());
            }
            let mut methods: Vec<(String, u32)> = entry
                .methods
                .iter()
                .filter_map(|(method, method_ref)| match method_ref {
                    MethodRef::Virtual(_, Some(index)) => Some((method.clone(), *index)),
                    _ => None,
                })
                .collect();
            methods.sort();
            let info = ClassInfo {
                name: name.clone(),
                base: entry.base.clone(),
                interfaces: entry.interfaces.clone(),
                fields,
                methods,
                constructor: entry.constructor,
                is_abstract: entry.decl.is_abstract,
            };
            let index = entry.index as usize;
            let slot = self
                .chunk
                .classes
                .get_mut(index)
                .ok_or_else(|| anyhow!("class slot {index} missing for '{name}'"))?;
            *slot = info;
        }
        Ok(())
    }

    fn needs_constructor(&self, class: &str) -> bool {
        for name in self.ancestry(class) {
            if is_builtin_exception(&name) {
                return true;
            }
            let Some(entry) = self.classes.get(&name) else {
                return false;
            };
            if entry.explicit_constructor.is_some()
                || entry.instance_fields.iter().any(|field| field.init.is_some())
            {
                return true;
            }
        }
        false
    }

    //=====================================================
    // Section 4: Functions, methods and constructors
    //=====================================================

    fn compile_top_level_function(&mut self, name: &str) -> Result<()> {
        let entry = self.function_entry(name)?;
        let (index, decl, module) = (entry.index, entry.decl, entry.module.clone());
        let saved = std::mem::replace(&mut self.module, module);
        self.begin_function(FunctionSetup {
            index,
            name: name.to_string(),
            kind: FunctionKind::Function,
            nested: false,
            params: &decl.params,
            return_type: decl.return_type.as_ref(),
            class: None,
            is_static: true,
        })?;
        self.compile_function_body(&decl.body)?;
        let state = self.end_function()?;
        self.install(state)?;
        self.module = saved;
        Ok(())
    }

    fn compile_class(&mut self, name: &str) -> Result<()> {
        let entry = self.class_entry(name)?;
        let module = entry.module.clone();
        let mut methods: Vec<(String, MethodRef<'a>)> = entry
            .methods
            .iter()
            .map(|(method, method_ref)| (method.clone(), *method_ref))
            .collect();
        methods.sort_by(|a, b| a.0.cmp(&b.0));
        let constructor = entry.constructor;

        let saved = std::mem::replace(&mut self.module, module);
        for (method, method_ref) in methods {
            let (decl, index, is_static) = match method_ref {
                MethodRef::Virtual(decl, Some(index)) => (decl, index, false),
                MethodRef::Static(decl, index) => (decl, index, true),
                MethodRef::Virtual(_, None) => continue,
            };
            self.begin_function(FunctionSetup {
                index,
                name: format!("{name}.{method}"),
                kind: FunctionKind::Method,
                nested: false,
                params: &decl.params,
                return_type: decl.return_type.as_ref(),
                class: Some(name.to_string()),
                is_static,
            })?;
            self.compile_function_body(&decl.body)?;
            let state = self.end_function()?;
            self.install(state)?;
        }
        if let Some(index) = constructor {
            self.compile_constructor(name, index)?;
        }
        self.module = saved;
        Ok(())
    }

    /// Slot 0 holds the new object. Field initializers run first, then the
    /// base constructor, then the body.
    fn compile_constructor(&mut self, class: &str, index: u32) -> Result<()> {
        let entry = self.class_entry(class)?;
        let explicit = entry.explicit_constructor;
        let fields = entry.instance_fields.clone();
        let base = entry.base.clone();
        let params: &'a [Param] = explicit.map_or(&[], |ctor| ctor.params.as_slice());

        self.begin_function(FunctionSetup {
            index,
            name: format!("{class}.ctor"),
            kind: FunctionKind::Constructor,
            nested: false,
            params,
            return_type: None,
            class: Some(class.to_string()),
            is_static: false,
        })?;
        if let Some(ctor) = explicit {
            self.current.line = ctor.position.line as u32;
        }

        for field in fields {
            let Some(init) = &field.init else {
                continue;
            };
            let name = self.name_constant(&field.name);
            self.emit(Opcode::LoadLocal, 0, 0);
            self.compile_expr_as(init, field.ty.as_ref())?;
            self.emit(Opcode::SetField, name, 0);
            self.emit_op(Opcode::Pop);
        }

        let base_args: &'a [Expr] = explicit
            .and_then(|ctor| ctor.base_args.as_deref())
            .unwrap_or(&[]);
        if let Some(base) = base {
            let user_base = self.classes.get(&base).map(|entry| {
                let params: &'a [Param] = entry
                    .explicit_constructor
                    .map_or(&[], |ctor| ctor.params.as_slice());
                (entry.constructor, params)
            });
            if let Some((base_ctor, base_params)) = user_base {
                if let Some(base_ctor) = base_ctor {
                    self.emit(Opcode::LoadLocal, 0, 0);
                    self.compile_args(base_args, base_params)?;
                    self.emit(Opcode::CallDirect, base_ctor, base_args.len() as u32);
                    self.emit_op(Opcode::Pop);
                }
            } else if is_builtin_exception(&base) {
                let message = self.name_constant("Message");
                self.emit(Opcode::LoadLocal, 0, 0);
                match base_args.first() {
                    Some(arg) => self.compile_expr(arg)?,
                    None => self.emit_constant(Constant::String(format!(
                        "Exception of type '{class}' was thrown."
                    ))),
                }
                self.emit(Opcode::SetField, message, 0);
                self.emit_op(Opcode::Pop);
            }
        }

        if let Some(ctor) = explicit {
            for stmt in &ctor.body {
                self.compile_stmt(stmt)?;
            }
        }
        let state = self.end_function()?;
        self.install(state)
    }

    fn compile_function_body(&mut self, body: &'a FunctionBody) -> Result<()> {
        match body {
            FunctionBody::Block(statements) => {
                for stmt in statements {
                    self.compile_stmt(stmt)?;
                }
            }
            FunctionBody::Expr(expr) => {
                self.current.line = expr.position.line as u32;
                let return_type = self.current.return_type;
                self.compile_expr_as(expr, return_type)?;
                self.emit_op(Opcode::Return);
            }
            FunctionBody::None => {}
        }
        Ok(())
    }

    fn begin_function(&mut self, setup: FunctionSetup<'a>) -> Result<()> {
        if setup.params.len() >= u16::MAX as usize {
            bail!("function '{}' has too many parameters", setup.name);
        }
        let mut state = FunctionState::new(setup.index, setup.name, setup.kind);
        state.nested = setup.nested;
        state.arity = setup.params.len() as u16;
        state.required = setup
            .params
            .iter()
            .filter(|param| param.default.is_none() && !param.variadic)
            .count() as u16;
        state.variadic = setup.params.last().is_some_and(|param| param.variadic);
        state.class = setup.class;
        state.is_static = setup.is_static;
        state.return_type = setup.return_type;
        state.line = self.current.line;

        let parent = std::mem::replace(&mut self.current, state);
        self.enclosing.push(parent);

        let receiver = match setup.kind {
            FunctionKind::Method | FunctionKind::Constructor if !setup.is_static => "this",
            _ => "$callee",
        };
        self.declare_local(receiver)?;
        for param in setup.params {
            self.declare_local(&param.name)?;
        }
        for (position, param) in setup.params.iter().enumerate() {
            let Some(default) = &param.default else {
                continue;
            };
            let slot = position as u32 + 1;
            self.emit(Opcode::LoadLocal, slot, 0);
            let present = self.emit_jump(Opcode::JumpIfNotNull);
            self.compile_expr_as(default, param.ty.as_ref())?;
            self.emit(Opcode::StoreLocal, slot, 0);
            self.patch_jump(present);
            self.emit_op(Opcode::Pop);
        }
        Ok(())
    }

    fn end_function(&mut self) -> Result<FunctionState<'a>> {
        let parent = self
            .enclosing
            .pop()
            .ok_or_else(|| anyhow!("function stack underflow"))?;
        Ok(std::mem::replace(&mut self.current, parent))
    }

    /// Appends a finished function to the chunk, relocating its branch
    /// targets to absolute instruction indices.
    fn install(&mut self, mut state: FunctionState<'a>) -> Result<()> {
        let len = state.code.len() as u32;
        let falls_off = !matches!(state.code.last(), Some(inst) if inst.opcode == Opcode::Return)
            || state.code.iter().any(|inst| inst.branch_target() == Some(len));
        if falls_off {
            let line = (state.line > 0).then_some(state.line);
            state.code.push(Instruction::new(Opcode::Null, 0, 0, line));
            state.code.push(Instruction::new(Opcode::Return, 0, 0, line));
        }
        if state.max_slot > u32::from(u16::MAX) {
            bail!("function '{}' uses too many local slots", state.name);
        }

        let start = self.chunk.instructions.len() as u32;
        for mut inst in state.code {
            if inst.is_branch() {
                inst.operand_a += start;
            }
            self.chunk.instructions.push(inst);
        }
        let end = self.chunk.instructions.len() as u32;
        let captures = state.upvalues.into_iter().map(|(_, capture)| capture).collect();
        let index = state.index as usize;
        let info = self
            .chunk
            .functions
            .get_mut(index)
            .ok_or_else(|| anyhow!("function slot {index} missing for '{}'", state.name))?;
        *info = FunctionInfo {
            name: state.name,
            arity: state.arity,
            required: state.required,
            variadic: state.variadic,
            locals: state.max_slot as u16,
            start,
            end,
            captures,
        };
        Ok(())
    }

    fn reserve_function(&mut self, name: &str) -> u32 {
        self.chunk.functions.push(placeholder(name));
        (self.chunk.functions.len() - 1) as u32
    }

    //=====================================================
    // Section 5: Scopes and variables
    //=====================================================

    fn begin_scope(&mut self) {
        self.current.depth += 1;
    }

    fn end_scope(&mut self) {
        let state = &mut self.current;
        state.depth = state.depth.saturating_sub(1);
        let mut first_captured = None;
        while let Some(local) = state.locals.last() {
            if local.depth <= state.depth {
                break;
            }
            if local.captured {
                first_captured = Some(local.slot);
            }
            state.locals.pop();
        }
        if let Some(slot) = first_captured {
            self.emit(Opcode::CloseUpvalues, slot, 0);
        }
    }

    fn declare_local(&mut self, name: &str) -> Result<u32> {
        let slot = self.current.next_slot();
        if slot >= u32::from(u16::MAX) {
            bail!("too many local variables in '{}'", self.current.name);
        }
        let depth = self.current.depth;
        self.current.locals.push(Local {
            name: name.to_string(),
            depth,
            slot,
            captured: false,
        });
        self.current.max_slot = self.current.max_slot.max(slot + 1);
        Ok(slot)
    }

    /// Hidden scratch slot, released with the enclosing scope.
    fn declare_temp(&mut self) -> Result<u32> {
        self.declare_local("$temp")
    }

    fn is_top_level(&self) -> bool {
        self.enclosing.is_empty() && self.current.kind == FunctionKind::Script && self.current.depth == 0
    }

    fn level(&self, level: usize) -> &FunctionState<'a> {
        if level >= self.enclosing.len() {
            &self.current
        } else {
            &self.enclosing[level]
        }
    }

    fn level_mut(&mut self, level: usize) -> &mut FunctionState<'a> {
        if level >= self.enclosing.len() {
            &mut self.current
        } else {
            &mut self.enclosing[level]
        }
    }

    fn resolve_variable(&mut self, name: &str) -> Option<Access> {
        if let Some(slot) = self.current.find_local(name) {
            return Some(Access::Local(slot));
        }
        self.resolve_upvalue(self.enclosing.len(), name)
            .map(Access::Upvalue)
    }

    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u32> {
        if level == 0 || !self.level(level).nested {
            return None;
        }
        let parent = level - 1;
        if let Some(slot) = self.level(parent).find_local(name) {
            self.level_mut(parent).mark_captured(slot);
            let capture = Capture {
                is_local: true,
                index: slot as u16,
            };
            return Some(self.level_mut(level).add_upvalue(name, capture));
        }
        let index = self.resolve_upvalue(parent, name)?;
        let capture = Capture {
            is_local: false,
            index: index as u16,
        };
        Some(self.level_mut(level).add_upvalue(name, capture))
    }

    fn qualify(&self, name: &str) -> String {
        qualify_in(self.module.as_deref(), name)
    }

    fn global_slot(&mut self, name: &str) -> u32 {
        if let Some(index) = self.global_index(name) {
            return index;
        }
        self.chunk.globals.push(name.to_string());
        (self.chunk.globals.len() - 1) as u32
    }

    fn global_index(&self, name: &str) -> Option<u32> {
        self.chunk
            .globals
            .iter()
            .position(|global| global == name)
            .map(|index| index as u32)
    }

    /// Global visible from the current module: its own members first, then
    /// the top level.
    fn visible_global(&self, name: &str) -> Option<u32> {
        if self.module.is_some() {
            if let Some(index) = self.global_index(&self.qualify(name)) {
                return Some(index);
            }
        }
        self.global_index(name)
    }

    fn visible_function(&self, name: &str) -> Option<&FunctionEntry<'a>> {
        if self.module.is_some() {
            if let Some(entry) = self.functions.get(&self.qualify(name)) {
                return Some(entry);
            }
        }
        self.functions.get(name)
    }

    fn function_entry(&self, name: &str) -> Result<&FunctionEntry<'a>> {
        self.functions
            .get(name)
            .ok_or_else(|| anyhow!("missing function entry for '{name}'"))
    }

    fn class_entry(&self, name: &str) -> Result<&ClassEntry<'a>> {
        self.classes
            .get(name)
            .ok_or_else(|| anyhow!("missing class entry for '{name}'"))
    }

    fn class_entry_mut(&mut self, name: &str) -> Result<&mut ClassEntry<'a>> {
        self.classes
            .get_mut(name)
            .ok_or_else(|| anyhow!("missing class entry for '{name}'"))
    }

    /// The class followed by its base classes, nearest first.
    fn ancestry(&self, class: &str) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            current = self.classes.get(&name).and_then(|entry| entry.base.clone());
            chain.push(name);
        }
        chain
    }

    /// Field lookup through the base chain; static fields report their
    /// declaring class.
    fn find_field(&self, class: &str, name: &str) -> Option<(FieldRef, String)> {
        for owner in self.ancestry(class) {
            match self.classes.get(&owner) {
                Some(entry) => {
                    if entry.instance_fields.iter().any(|field| field.name.as_str() == name) {
                        return Some((FieldRef::Instance, owner));
                    }
                    if entry.static_fields.iter().any(|field| field.name.as_str() == name) {
                        return Some((FieldRef::Static, owner));
                    }
                }
                None if is_builtin_exception(&owner) && name == "Message" => {
                    return Some((FieldRef::Instance, owner));
                }
                None => {}
            }
        }
        None
    }

    fn find_method(&self, class: &str, name: &str) -> Option<MethodRef<'a>> {
        self.ancestry(class).into_iter().find_map(|owner| {
            self.classes
                .get(&owner)
                .and_then(|entry| entry.methods.get(name).copied())
        })
    }

    fn is_class_name(&self, name: &str) -> bool {
        self.classes.contains_key(name) || self.enums.contains_key(name)
    }

    /// An identifier naming a class or enum rather than a value.
    fn names_type(&mut self, name: &str) -> bool {
        self.is_class_name(name)
            && self.visible_global(name).is_none()
            && self.resolve_variable(name).is_none()
    }

    /// Runtime type name tested by `IsInstance` and `AsType`.
    fn type_test_name(&self, ty: &TypeExpr) -> String {
        match ty {
            TypeExpr::Named { name, .. } if self.enums.contains_key(name.as_str()) => "int".to_string(),
            TypeExpr::Named { name, .. } => name.to_string(),
            TypeExpr::Nullable(inner) => self.type_test_name(inner),
            TypeExpr::Array(_) | TypeExpr::Tuple(_) => "array".to_string(),
        }
    }

    fn default_value(&self, ty: Option<&TypeExpr>) -> Constant {
        let Some(TypeExpr::Named { name, args }) = ty else {
            return Constant::Null;
        };
        if !args.is_empty() {
            return Constant::Null;
        }
        match name.as_str() {
            "int" | "long" | "short" | "byte" => Constant::Integer(0),
            "double" | "float" | "decimal" => Constant::Float(0.0),
            "bool" => Constant::Boolean(false),
            other if self.enums.contains_key(other) => Constant::Integer(0),
            _ => Constant::Null,
        }
    }

    //=====================================================
    // Section 6: Emission
    //=====================================================

    fn emit(&mut self, opcode: Opcode, a: u32, b: u32) -> usize {
        let line = self.current.line;
        self.current
            .code
            .push(Instruction::new(opcode, a, b, (line > 0).then_some(line)));
        self.current.code.len() - 1
    }

    fn emit_op(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, 0, 0)
    }

    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, u32::MAX, 0)
    }

    fn patch_jump(&mut self, at: usize) {
        let target = self.current.code.len();
        self.patch_jump_to(at, target);
    }

    fn patch_jump_to(&mut self, at: usize, target: usize) {
        if let Some(inst) = self.current.code.get_mut(at) {
            inst.operand_a = target as u32;
        }
    }

    fn here(&self) -> usize {
        self.current.code.len()
    }

    fn emit_loop(&mut self, start: usize) {
        self.emit(Opcode::Loop, start as u32, 0);
    }

    fn emit_constant(&mut self, constant: Constant) {
        let index = self.chunk.add_constant(constant);
        self.emit(Opcode::LoadConst, index, 0);
    }

    fn name_constant(&mut self, name: &str) -> u32 {
        self.chunk.add_constant(Constant::String(name.to_string()))
    }

    fn load_access(&mut self, access: Access) {
        match access {
            Access::Local(slot) => self.emit(Opcode::LoadLocal, slot, 0),
            Access::Upvalue(index) => self.emit(Opcode::LoadUpvalue, index, 0),
        };
    }

    fn store_access(&mut self, access: Access) {
        match access {
            Access::Local(slot) => self.emit(Opcode::StoreLocal, slot, 0),
            Access::Upvalue(index) => self.emit(Opcode::StoreUpvalue, index, 0),
        };
    }

    fn load_this(&mut self) -> Result<()> {
        match self.resolve_variable("this") {
            Some(access) => {
                self.load_access(access);
                Ok(())
            }
            None => bail!("'this' is not available in '{}'", self.current.name),
        }
    }

    /// Widens an `int` value to a floating target type.
    fn coerce(&mut self, expr: &Expr, target: Option<&TypeExpr>) {
        let floating = match target {
            Some(TypeExpr::Named { name, .. }) => is_floating(name),
            Some(TypeExpr::Nullable(inner)) => {
                matches!(&**inner, TypeExpr::Named { name, .. } if is_floating(name))
            }
            _ => false,
        };
        if floating && self.annotations.types.get(&expr.id) == Some(&Type::Int) {
            self.emit_constant(Constant::Float(0.0));
            self.emit_op(Opcode::Add);
        }
    }
}

fn is_floating(name: &str) -> bool {
    matches!(name, "double" | "float" | "decimal")
}

fn placeholder(name: &str) -> FunctionInfo {
    FunctionInfo {
        name: name.to_string(),
        arity: 0,
        required: 0,
        variadic: false,
        locals: 0,
        start: 0,
        end: 0,
        captures: Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checker::check_program;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;
    use strata_core::vm::{RuntimeOptions, Vm};
    use strata_core::Value;
    use std::sync::Arc;

    pub(crate) fn compile_source(source: &str, level: OptLevel) -> Chunk {
        let tokens = tokenize(source).expect("lex");
        let program = parse(tokens).expect("parse");
        let checked = check_program(program);
        assert!(!checked.has_errors(), "{:?}", checked.diagnostics);
        compile(&checked, &CompileOptions::with_level(level)).expect("compile")
    }

    pub(crate) fn run(source: &str) -> Value {
        run_at(source, OptLevel::O0)
    }

    pub(crate) fn run_at(source: &str, level: OptLevel) -> Value {
        let chunk = compile_source(source, level);
        let mut vm = Vm::new(Arc::new(chunk), RuntimeOptions::default())
            .with_output(strata_core::vm::OutputBuffer::new());
        vm.execute().expect("run")
    }

    #[test]
    fn levels_parse_from_numbers() {
        assert_eq!(OptLevel::try_from(2).expect("level"), OptLevel::O2);
        assert!(OptLevel::try_from(4).is_err());
        assert!(OptLevel::O3.runs_peephole());
        assert!(!OptLevel::O1.eliminates_dead_code());
    }

    #[test]
    fn type_errors_block_compilation() {
        let tokens = tokenize("int x = \"not a number\";").expect("lex");
        let checked = check_program(parse(tokens).expect("parse"));
        assert!(compile(&checked, &CompileOptions::default()).is_err());
    }

    #[test]
    fn script_value_is_the_last_expression() {
        let chunk = compile_source("2 + 3 * 4", OptLevel::O0);
        let ops: Vec<Opcode> = chunk.instructions.iter().map(|inst| inst.opcode).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::LoadConst,
                Opcode::Mul,
                Opcode::Add,
                Opcode::Return
            ]
        );
        assert_eq!(run("2 + 3 * 4"), Value::Integer(14));
    }

    #[test]
    fn functions_recurse_through_globals() {
        let source = "
            int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
            fib(20)
        ";
        assert_eq!(run(source), Value::Integer(6765));
    }

    #[test]
    fn classes_dispatch_virtually() {
        let source = "
            abstract class Shape { public abstract int Area(); public string Name() { return \"shape\"; } }
            class Square : Shape {
                private int side;
                public Square(int side) { this.side = side; }
                public override int Area() { return side * side; }
            }
            Shape s = new Square(4);
            s.Area()
        ";
        assert_eq!(run(source), Value::Integer(16));
    }

    #[test]
    fn field_initializers_run_before_the_constructor_body() {
        let source = "
            class Counter { public int Count = 10; public Counter(int extra) { Count = Count + extra; } }
            new Counter(5).Count
        ";
        assert_eq!(run(source), Value::Integer(15));
    }

    #[test]
    fn base_constructors_run_first() {
        let source = "
            class Animal { public string Sound; public Animal(string sound) { Sound = sound; } }
            class Dog : Animal { public Dog() : base(\"woof\") { Sound = Sound + \"!\"; } }
            new Dog().Sound
        ";
        assert_eq!(run(source), Value::string("woof!"));
    }

    #[test]
    fn static_fields_are_shared() {
        let source = "
            class Ids { public static int Next = 1; public static int Take() { Next = Next + 1; return Next; } }
            Ids.Take();
            Ids.Take()
        ";
        assert_eq!(run(source), Value::Integer(3));
    }

    #[test]
    fn int_arguments_widen_to_double_parameters() {
        let source = "
            double half(double x) { return x / 2; }
            half(5)
        ";
        assert_eq!(run(source), Value::Float(2.5));
    }
}
