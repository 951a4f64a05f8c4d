//=====================================================
// File: compiler/stmt.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Statement lowering
// Objective: Declarations, branches, every loop form, switch sections and
//            try/catch/finally with unwinding for early exits
//=====================================================

use anyhow::{Result, anyhow, bail};
use strata_core::vm::{Constant, Opcode};

use super::{Compiler, FunctionKind, FunctionSetup, LoopContext, TryContext};
use crate::ast::{
    CatchClause, ClassMember, Expr, ExprKind, FunctionDecl, Literal, Stmt, StmtKind, SwitchCase,
    UnaryOp, VarDecl,
};

/// Step written as a negative literal, which makes `iterate` count down.
fn counts_down(step: Option<&Expr>) -> bool {
    match step.map(|step| &step.kind) {
        Some(ExprKind::Literal(Literal::Integer(value))) => *value < 0,
        Some(ExprKind::Literal(Literal::Float(value))) => *value < 0.0,
        Some(ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        }) => operand.is_literal(),
        _ => false,
    }
}

impl<'a> Compiler<'a> {
    pub(super) fn compile_stmt(&mut self, stmt: &'a Stmt) -> Result<()> {
        if stmt.position.line > 0 {
            self.current.line = stmt.position.line as u32;
        }
        match &stmt.kind {
            StmtKind::Var(decl) => self.compile_var(decl),
            StmtKind::Function(decl) => {
                if self.is_top_level() {
                    return Ok(());
                }
                let slot = self.declare_local(&decl.name)?;
                self.compile_local_function(decl)?;
                self.emit(Opcode::StoreLocal, slot, 0);
                Ok(())
            }
            StmtKind::Class(decl) => {
                let saved_class = self.current.class.replace(decl.name.to_string());
                let saved_static = std::mem::replace(&mut self.current.is_static, true);
                for member in &decl.members {
                    let ClassMember::Field(field) = member else {
                        continue;
                    };
                    if !(field.is_static || field.is_const) {
                        continue;
                    }
                    match &field.init {
                        Some(init) => self.compile_expr_as(init, field.ty.as_ref())?,
                        None => {
                            let value = self.default_value(field.ty.as_ref());
                            self.emit_constant(value);
                        }
                    }
                    let global = self.global_slot(&format!("{}.{}", decl.name, field.name));
                    self.emit(Opcode::StoreGlobal, global, 0);
                }
                self.current.class = saved_class;
                self.current.is_static = saved_static;
                Ok(())
            }
            StmtKind::Interface(_) | StmtKind::Enum(_) => Ok(()),
            StmtKind::Module(decl) => {
                let path = self.qualify(&decl.name);
                let saved = self.module.replace(path);
                for stmt in &decl.body {
                    self.compile_stmt(stmt)?;
                }
                self.module = saved;
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit_op(Opcode::Pop);
                Ok(())
            }
            StmtKind::Set { name, value } => {
                self.compile_expr(value)?;
                self.store_name(name)
            }
            StmtKind::Block(statements) => {
                self.begin_scope();
                for stmt in statements {
                    self.compile_stmt(stmt)?;
                }
                self.end_scope();
                Ok(())
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.compile_if(condition, then_branch, else_branch.as_deref()),
            StmtKind::While { condition, body } => self.compile_while(condition, body),
            StmtKind::DoWhile { body, condition } => self.compile_do_while(body, condition),
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => self.compile_for(init.as_deref(), condition.as_ref(), update, body),
            StmtKind::Foreach {
                var, iterable, body, ..
            } => self.compile_foreach(var, iterable, body),
            StmtKind::Repeat { count, body } => self.compile_repeat(count, body),
            StmtKind::Iterate {
                var,
                start,
                end,
                step,
                body,
            } => self.compile_iterate(var, start, end, step.as_ref(), body),
            StmtKind::Forever(body) => {
                let start = self.here();
                self.begin_loop(false, Some(start));
                self.compile_scoped(body)?;
                self.emit_loop(start);
                self.end_loop();
                Ok(())
            }
            StmtKind::Parallel(inner) => self.compile_stmt(inner),
            StmtKind::Switch { subject, cases } => self.compile_switch(subject, cases),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.compile_try(body, catches, finally.as_deref()),
            StmtKind::Throw(Some(value)) => {
                self.compile_expr(value)?;
                self.emit_op(Opcode::Throw);
                Ok(())
            }
            StmtKind::Throw(None) => {
                let slot = *self
                    .current
                    .catches
                    .last()
                    .ok_or_else(|| anyhow!("'throw;' is only valid inside a catch clause"))?;
                self.emit(Opcode::LoadLocal, slot, 0);
                self.emit_op(Opcode::Throw);
                Ok(())
            }
            StmtKind::Return(value) => self.compile_return(value.as_ref()),
            StmtKind::Break => self.compile_break(),
            StmtKind::Continue => self.compile_continue(),
            StmtKind::Asm(block) => self.compile_asm(block),
        }
    }

    fn compile_scoped(&mut self, stmt: &'a Stmt) -> Result<()> {
        self.begin_scope();
        self.compile_stmt(stmt)?;
        self.end_scope();
        Ok(())
    }

    fn compile_var(&mut self, decl: &'a VarDecl) -> Result<()> {
        match &decl.init {
            Some(init) => self.compile_expr_as(init, decl.ty.as_ref())?,
            None => {
                let value = self.default_value(decl.ty.as_ref());
                self.emit_constant(value);
            }
        }
        if self.is_top_level() {
            let qualified = self.qualify(&decl.name);
            let global = self.global_slot(&qualified);
            self.emit(Opcode::StoreGlobal, global, 0);
        } else {
            let slot = self.declare_local(&decl.name)?;
            self.emit(Opcode::StoreLocal, slot, 0);
        }
        Ok(())
    }

    fn compile_local_function(&mut self, decl: &'a FunctionDecl) -> Result<()> {
        let index = self.reserve_function(&decl.name);
        let class = self.current.class.clone();
        let is_static = self.current.is_static;
        self.begin_function(FunctionSetup {
            index,
            name: decl.name.to_string(),
            kind: FunctionKind::Lambda,
            nested: true,
            params: &decl.params,
            return_type: decl.return_type.as_ref(),
            class,
            is_static,
        })?;
        self.compile_function_body(&decl.body)?;
        let state = self.end_function()?;
        self.install(state)?;
        self.emit(Opcode::MakeClosure, index, 0);
        Ok(())
    }

    fn compile_if(&mut self, condition: &'a Expr, then_branch: &'a Stmt, else_branch: Option<&'a Stmt>) -> Result<()> {
        self.compile_expr(condition)?;
        let otherwise = self.emit_jump(Opcode::JumpIfFalse);
        self.compile_scoped(then_branch)?;
        match else_branch {
            Some(else_branch) => {
                let end = self.emit_jump(Opcode::Jump);
                self.patch_jump(otherwise);
                self.compile_scoped(else_branch)?;
                self.patch_jump(end);
            }
            None => self.patch_jump(otherwise),
        }
        Ok(())
    }

    //=====================================================
    // Section 1: Loops
    //=====================================================

    fn begin_loop(&mut self, is_switch: bool, continue_target: Option<usize>) {
        let context = LoopContext {
            is_switch,
            continue_target,
            slot_floor: self.current.next_slot(),
            try_depth: self.current.tries.len(),
            ..LoopContext::default()
        };
        self.current.loops.push(context);
    }

    /// Points pending continues at the current instruction.
    fn patch_continues(&mut self) {
        let target = self.here();
        let pending = self
            .current
            .loops
            .last_mut()
            .map(|context| std::mem::take(&mut context.continues))
            .unwrap_or_default();
        for at in pending {
            self.patch_jump_to(at, target);
        }
    }

    fn end_loop(&mut self) {
        if let Some(context) = self.current.loops.pop() {
            for at in context.breaks.into_iter().chain(context.continues) {
                self.patch_jump(at);
            }
        }
    }

    fn compile_while(&mut self, condition: &'a Expr, body: &'a Stmt) -> Result<()> {
        let start = self.here();
        self.compile_expr(condition)?;
        let exit = self.emit_jump(Opcode::JumpIfFalse);
        self.begin_loop(false, Some(start));
        self.compile_scoped(body)?;
        self.emit_loop(start);
        self.patch_jump(exit);
        self.end_loop();
        Ok(())
    }

    fn compile_do_while(&mut self, body: &'a Stmt, condition: &'a Expr) -> Result<()> {
        let start = self.here();
        self.begin_loop(false, None);
        self.compile_scoped(body)?;
        self.patch_continues();
        self.compile_expr(condition)?;
        let exit = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_loop(start);
        self.patch_jump(exit);
        self.end_loop();
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&'a Stmt>,
        condition: Option<&'a Expr>,
        update: &'a [Expr],
        body: &'a Stmt,
    ) -> Result<()> {
        self.begin_scope();
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let start = self.here();
        let exit = match condition {
            Some(condition) => {
                self.compile_expr(condition)?;
                Some(self.emit_jump(Opcode::JumpIfFalse))
            }
            None => None,
        };
        self.begin_loop(false, None);
        self.compile_scoped(body)?;
        self.patch_continues();
        for expr in update {
            self.compile_expr(expr)?;
            self.emit_op(Opcode::Pop);
        }
        self.emit_loop(start);
        if let Some(exit) = exit {
            self.patch_jump(exit);
        }
        self.end_loop();
        self.end_scope();
        Ok(())
    }

    fn compile_foreach(&mut self, var: &str, iterable: &'a Expr, body: &'a Stmt) -> Result<()> {
        self.begin_scope();
        self.compile_expr(iterable)?;
        let items = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, items, 0);
        let position = self.declare_temp()?;
        self.emit_constant(Constant::Integer(0));
        self.emit(Opcode::StoreLocal, position, 0);

        let start = self.here();
        self.emit(Opcode::LoadLocal, position, 0);
        self.emit(Opcode::LoadLocal, items, 0);
        self.emit_op(Opcode::Len);
        self.emit_op(Opcode::Less);
        let exit = self.emit_jump(Opcode::JumpIfFalse);

        self.begin_loop(false, None);
        self.begin_scope();
        let slot = self.declare_local(var)?;
        self.emit(Opcode::LoadLocal, items, 0);
        self.emit(Opcode::LoadLocal, position, 0);
        self.emit_op(Opcode::LoadIndex);
        self.emit(Opcode::StoreLocal, slot, 0);
        self.compile_stmt(body)?;
        self.end_scope();
        self.patch_continues();

        self.emit(Opcode::LoadLocal, position, 0);
        self.emit_constant(Constant::Integer(1));
        self.emit_op(Opcode::Add);
        self.emit(Opcode::StoreLocal, position, 0);
        self.emit_loop(start);
        self.patch_jump(exit);
        self.end_loop();
        self.end_scope();
        Ok(())
    }

    fn compile_repeat(&mut self, count: &'a Expr, body: &'a Stmt) -> Result<()> {
        self.begin_scope();
        self.compile_expr(count)?;
        let remaining = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, remaining, 0);

        let start = self.here();
        self.emit(Opcode::LoadLocal, remaining, 0);
        self.emit_constant(Constant::Integer(0));
        self.emit_op(Opcode::Greater);
        let exit = self.emit_jump(Opcode::JumpIfFalse);

        self.begin_loop(false, None);
        self.compile_scoped(body)?;
        self.patch_continues();
        self.emit(Opcode::LoadLocal, remaining, 0);
        self.emit_constant(Constant::Integer(1));
        self.emit_op(Opcode::Sub);
        self.emit(Opcode::StoreLocal, remaining, 0);
        self.emit_loop(start);
        self.patch_jump(exit);
        self.end_loop();
        self.end_scope();
        Ok(())
    }

    /// `iterate i from a to b [step s]`; the upper bound is exclusive.
    fn compile_iterate(
        &mut self,
        var: &str,
        start: &'a Expr,
        end: &'a Expr,
        step: Option<&'a Expr>,
        body: &'a Stmt,
    ) -> Result<()> {
        self.begin_scope();
        self.compile_expr(start)?;
        let counter = self.declare_local(var)?;
        self.emit(Opcode::StoreLocal, counter, 0);
        self.compile_expr(end)?;
        let limit = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, limit, 0);
        match step {
            Some(step) => self.compile_expr(step)?,
            None => self.emit_constant(Constant::Integer(1)),
        }
        let stride = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, stride, 0);

        let top = self.here();
        self.emit(Opcode::LoadLocal, counter, 0);
        self.emit(Opcode::LoadLocal, limit, 0);
        self.emit_op(if counts_down(step) { Opcode::Greater } else { Opcode::Less });
        let exit = self.emit_jump(Opcode::JumpIfFalse);

        self.begin_loop(false, None);
        self.compile_scoped(body)?;
        self.patch_continues();
        self.emit(Opcode::LoadLocal, counter, 0);
        self.emit(Opcode::LoadLocal, stride, 0);
        self.emit_op(Opcode::Add);
        self.emit(Opcode::StoreLocal, counter, 0);
        self.emit_loop(top);
        self.patch_jump(exit);
        self.end_loop();
        self.end_scope();
        Ok(())
    }

    fn compile_break(&mut self) -> Result<()> {
        let position = self
            .current
            .loops
            .len()
            .checked_sub(1)
            .ok_or_else(|| anyhow!("'break' outside of a loop or switch"))?;
        self.leave_loop(position)?;
        let jump = self.emit_jump(Opcode::Jump);
        if let Some(context) = self.current.loops.get_mut(position) {
            context.breaks.push(jump);
        }
        Ok(())
    }

    fn compile_continue(&mut self) -> Result<()> {
        let position = self
            .current
            .loops
            .iter()
            .rposition(|context| !context.is_switch)
            .ok_or_else(|| anyhow!("'continue' outside of a loop"))?;
        self.leave_loop(position)?;
        let target = self.current.loops.get(position).and_then(|context| context.continue_target);
        match target {
            Some(target) => self.emit_loop(target),
            None => {
                let jump = self.emit_jump(Opcode::Jump);
                if let Some(context) = self.current.loops.get_mut(position) {
                    context.continues.push(jump);
                }
            }
        }
        Ok(())
    }

    /// Runs finally blocks and closes captured slots opened inside the loop
    /// at `position` before jumping out of it.
    fn leave_loop(&mut self, position: usize) -> Result<()> {
        let (try_depth, floor) = match self.current.loops.get(position) {
            Some(context) => (context.try_depth, context.slot_floor),
            None => bail!("loop context {position} missing"),
        };
        self.unwind_tries(try_depth)?;
        if self.current.captures_from(floor) {
            self.emit(Opcode::CloseUpvalues, floor, 0);
        }
        Ok(())
    }

    //=====================================================
    // Section 2: Switch statements
    //=====================================================

    fn compile_switch(&mut self, subject: &'a Expr, cases: &'a [SwitchCase]) -> Result<()> {
        self.begin_scope();
        self.compile_expr(subject)?;
        let slot = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, slot, 0);

        let mut entries: Vec<Vec<usize>> = vec![Vec::new(); cases.len()];
        for (position, case) in cases.iter().enumerate() {
            for label in &case.labels {
                let mut fails = self.compile_pattern(&label.pattern, slot)?;
                if let Some(guard) = &label.guard {
                    self.compile_expr(guard)?;
                    fails.push(self.emit_jump(Opcode::JumpIfFalse));
                }
                entries[position].push(self.emit_jump(Opcode::Jump));
                for fail in fails {
                    self.patch_jump(fail);
                }
            }
        }
        let fallback = self.emit_jump(Opcode::Jump);
        let default = cases.iter().position(|case| case.is_default);

        self.begin_loop(true, None);
        let mut ends = Vec::new();
        for (position, case) in cases.iter().enumerate() {
            for &at in &entries[position] {
                self.patch_jump(at);
            }
            if default == Some(position) {
                self.patch_jump(fallback);
            }
            self.begin_scope();
            for stmt in &case.body {
                self.compile_stmt(stmt)?;
            }
            self.end_scope();
            ends.push(self.emit_jump(Opcode::Jump));
        }
        if default.is_none() {
            self.patch_jump(fallback);
        }
        for end in ends {
            self.patch_jump(end);
        }
        self.end_loop();
        self.end_scope();
        Ok(())
    }

    //=====================================================
    // Section 3: Exceptions and returns
    //=====================================================

    /// Layout:
    ///
    /// ```text
    ///     PushHandler CATCH
    ///     <body>
    ///     PopHandler
    ///     Jump DONE
    /// CATCH:
    ///     StoreLocal exception
    ///     [PushHandler RETHROW]          with finally
    ///     <typed catch clauses, each ending in Jump DONE>
    ///     [PopHandler; <finally>]
    ///     LoadLocal exception; Throw
    /// RETHROW:                           with finally
    ///     <finally>; Throw
    /// DONE:
    ///     [<finally>]
    /// ```
    fn compile_try(
        &mut self,
        body: &'a [Stmt],
        catches: &'a [CatchClause],
        finally: Option<&'a [Stmt]>,
    ) -> Result<()> {
        let handler = self.emit_jump(Opcode::PushHandler);
        self.current.tries.push(TryContext {
            handler_active: true,
            finally,
        });
        self.begin_scope();
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.end_scope();
        self.current.tries.pop();
        self.emit_op(Opcode::PopHandler);
        let mut done = vec![self.emit_jump(Opcode::Jump)];

        self.patch_jump(handler);
        self.begin_scope();
        let exception = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, exception, 0);
        let rethrow = match finally {
            Some(_) => {
                let at = self.emit_jump(Opcode::PushHandler);
                self.current.tries.push(TryContext {
                    handler_active: true,
                    finally,
                });
                Some(at)
            }
            None => None,
        };

        for clause in catches {
            let type_name = clause.ty.as_ref().map_or("object", |ty| ty.as_str());
            let type_name = self.name_constant(type_name);
            self.emit(Opcode::LoadLocal, exception, 0);
            self.emit(Opcode::IsInstance, type_name, 0);
            let next = self.emit_jump(Opcode::JumpIfFalse);

            self.begin_scope();
            let slot = match &clause.name {
                Some(name) => {
                    let slot = self.declare_local(name)?;
                    self.emit(Opcode::LoadLocal, exception, 0);
                    self.emit(Opcode::StoreLocal, slot, 0);
                    slot
                }
                None => exception,
            };
            self.current.catches.push(slot);
            for stmt in &clause.body {
                self.compile_stmt(stmt)?;
            }
            self.current.catches.pop();
            self.end_scope();
            if rethrow.is_some() {
                self.emit_op(Opcode::PopHandler);
            }
            done.push(self.emit_jump(Opcode::Jump));
            self.patch_jump(next);
        }

        if rethrow.is_some() {
            self.current.tries.pop();
            self.emit_op(Opcode::PopHandler);
        }
        if let Some(finally) = finally {
            self.compile_block(finally)?;
        }
        self.emit(Opcode::LoadLocal, exception, 0);
        self.emit_op(Opcode::Throw);
        self.end_scope();

        if let (Some(at), Some(finally)) = (rethrow, finally) {
            self.patch_jump(at);
            self.compile_block(finally)?;
            self.emit_op(Opcode::Throw);
        }

        for at in done {
            self.patch_jump(at);
        }
        if let Some(finally) = finally {
            self.compile_block(finally)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, statements: &'a [Stmt]) -> Result<()> {
        self.begin_scope();
        for stmt in statements {
            self.compile_stmt(stmt)?;
        }
        self.end_scope();
        Ok(())
    }

    /// Leaves every try region above `floor`, innermost first: drops its
    /// handler and runs its finally block inline.
    fn unwind_tries(&mut self, floor: usize) -> Result<()> {
        let saved = self.current.tries.clone();
        for position in (floor..saved.len()).rev() {
            let context = saved[position];
            if context.handler_active {
                self.emit_op(Opcode::PopHandler);
            }
            if let Some(finally) = context.finally {
                self.current.tries.truncate(position);
                self.compile_block(finally)?;
            }
        }
        self.current.tries = saved;
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&'a Expr>) -> Result<()> {
        if self.current.kind == FunctionKind::Constructor {
            self.unwind_tries(0)?;
            self.emit_op(Opcode::Null);
            self.emit_op(Opcode::Return);
            return Ok(());
        }
        match value {
            Some(value) => {
                let return_type = self.current.return_type;
                self.compile_expr_as(value, return_type)?;
            }
            None => {
                self.emit_op(Opcode::Null);
            }
        }
        if !self.current.tries.is_empty() {
            self.begin_scope();
            let slot = self.declare_temp()?;
            self.emit(Opcode::StoreLocal, slot, 0);
            self.unwind_tries(0)?;
            self.emit(Opcode::LoadLocal, slot, 0);
            self.end_scope();
        }
        self.emit_op(Opcode::Return);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::OptLevel;
    use super::super::tests::{compile_source, run, run_at};
    use strata_core::vm::Opcode;
    use strata_core::Value;

    #[test]
    fn constant_if_keeps_one_branch_instruction() {
        let source = "if (true) return 1; else return 2;";
        let chunk = compile_source(source, OptLevel::O0);
        let branches = chunk
            .instructions
            .iter()
            .filter(|inst| inst.opcode == Opcode::JumpIfFalse)
            .count();
        assert_eq!(branches, 1);
        assert_eq!(run(source), Value::Integer(1));
    }

    #[test]
    fn loops_accumulate() {
        let source = "
            int total = 0;
            for (int i = 0; i < 5; i++) { if (i == 3) continue; total += i; }
            int j = 0;
            while (true) { j++; if (j > 4) break; }
            do { total += 100; } while (false);
            total + j
        ";
        assert_eq!(run(source), Value::Integer(7 + 100 + 5));
    }

    #[test]
    fn foreach_walks_arrays() {
        let source = "
            int sum = 0;
            foreach (var n in [4, 5, 6]) { sum += n; }
            sum
        ";
        assert_eq!(run(source), Value::Integer(15));
    }

    #[test]
    fn catch_clauses_match_by_type() {
        let source = "
            string outcome = \"none\";
            try {
                int zero = 0;
                int boom = 10 / zero;
            } catch (IndexOutOfRangeException e) {
                outcome = \"index\";
            } catch (DivideByZeroException e) {
                outcome = e.Message;
            }
            outcome
        ";
        assert_eq!(run(source), Value::string("Attempted to divide by zero."));
    }

    #[test]
    fn finally_runs_on_early_return() {
        let source = "
            int log = 0;
            int work() {
                try { return 1; } finally { log = 42; }
            }
            work() + log
        ";
        assert_eq!(run(source), Value::Integer(43));
    }

    #[test]
    fn rethrow_propagates_to_the_outer_handler() {
        let source = "
            string seen = \"\";
            try {
                try { throw new InvalidOperationException(\"inner\"); }
                catch (Exception e) { seen = \"first\"; throw; }
            } catch (InvalidOperationException e) {
                seen = seen + \"+\" + e.Message;
            }
            seen
        ";
        assert_eq!(run(source), Value::string("first+inner"));
    }

    #[test]
    fn switch_sections_break_out() {
        let source = "
            string name(int day) {
                switch (day) {
                    case 0: return \"sun\";
                    case 6: return \"sat\";
                    default: return \"week\";
                }
            }
            name(6) + name(3)
        ";
        assert_eq!(run(source), Value::string("satweek"));
    }

    #[test]
    fn dead_branches_disappear_at_level_two() {
        let source = "if (true) return 1; else return 2;";
        let chunk = compile_source(source, OptLevel::O2);
        assert!(chunk.instructions.iter().all(|inst| inst.opcode != Opcode::JumpIfFalse));
        assert_eq!(run_at(source, OptLevel::O2), Value::Integer(1));
    }
}
