//=====================================================
// File: checker/scope.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Lexical scope stack for the checker
// Objective: Name bindings with storage class and declaration site,
//            shadowing, redeclaration detection and null-check narrowing
//=====================================================

use std::collections::HashMap;
use std::rc::Rc;

use super::registry::FunctionSig;
use super::types::Type;
use crate::symbol::Symbol;
use crate::tokenizer::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global,
    Local,
    Param,
    Function,
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub ty: Type,
    /// Type as declared; differs from `ty` while a null check narrows it.
    pub declared: Type,
    pub storage: Storage,
    pub declared_at: Position,
    pub mutable: bool,
    pub signature: Option<Rc<FunctionSig>>,
    /// Registered ahead of its declaration statement.
    pub predeclared: bool,
    pub narrowed: bool,
}

impl SymbolInfo {
    pub fn new(ty: Type, storage: Storage, declared_at: Position, mutable: bool) -> Self {
        Self {
            declared: ty.clone(),
            ty,
            storage,
            declared_at,
            mutable,
            signature: None,
            predeclared: false,
            narrowed: false,
        }
    }

    pub fn function(signature: Rc<FunctionSig>, storage: Storage, declared_at: Position) -> Self {
        let mut info = Self::new(signature.as_type(), storage, declared_at, false);
        info.signature = Some(signature);
        info
    }
}

#[derive(Debug, Default)]
struct Scope {
    symbols: HashMap<Symbol, SymbolInfo>,
}

/// Stack of scopes; index 0 is the global scope.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Pops a scope opened for narrowing only; names declared in it move
    /// to the enclosing scope.
    pub fn pop_keeping_declarations(&mut self) {
        if self.scopes.len() <= 1 {
            return;
        }
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        if let Some(parent) = self.scopes.last_mut() {
            for (name, info) in scope.symbols {
                if !info.narrowed {
                    parent.symbols.insert(name, info);
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_global(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Declares `name` in the innermost scope. Returns the earlier site
    /// when the name is already declared there.
    pub fn declare(&mut self, name: Symbol, info: SymbolInfo) -> Result<(), Position> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(());
        };
        if let Some(existing) = scope.symbols.get(&name) {
            if !existing.predeclared && !existing.narrowed {
                return Err(existing.declared_at);
            }
        }
        scope.symbols.insert(name, info);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolInfo> {
        self.scopes.iter().rev().find_map(|scope| scope.symbols.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut SymbolInfo> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.symbols.get_mut(name))
    }

    pub fn in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.symbols.get(name).is_some_and(|info| !info.narrowed))
    }

    /// Treats `name` as `ty` from here to the end of the innermost scope.
    pub fn narrow(&mut self, name: &Symbol, ty: Type) {
        let Some(original) = self.lookup(name).cloned() else {
            return;
        };
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        match scope.symbols.get_mut(name.as_str()) {
            Some(info) => info.ty = ty,
            None => {
                let mut info = original;
                info.ty = ty;
                info.narrowed = true;
                scope.symbols.insert(name.clone(), info);
            }
        }
    }

    /// Drops narrowing of `name` after an assignment that may store null.
    pub fn widen(&mut self, name: &str) {
        if let Some(info) = self.lookup_mut(name) {
            info.ty = info.declared.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ty: Type) -> SymbolInfo {
        SymbolInfo::new(ty, Storage::Local, Position::default(), true)
    }

    #[test]
    fn redeclaration_in_same_scope_is_rejected() {
        let mut scopes = ScopeStack::new();
        assert!(scopes.declare(Symbol::from("x"), info(Type::Int)).is_ok());
        assert!(scopes.declare(Symbol::from("x"), info(Type::Int)).is_err());
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        let mut scopes = ScopeStack::new();
        scopes.declare(Symbol::from("x"), info(Type::Int)).unwrap();
        scopes.push();
        scopes.declare(Symbol::from("x"), info(Type::String)).unwrap();
        assert_eq!(scopes.lookup("x").unwrap().ty, Type::String);
        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().ty, Type::Int);
    }

    #[test]
    fn narrowing_ends_with_its_scope() {
        let mut scopes = ScopeStack::new();
        scopes
            .declare(Symbol::from("s"), info(Type::nullable(Type::String)))
            .unwrap();
        scopes.push();
        scopes.narrow(&Symbol::from("s"), Type::String);
        assert_eq!(scopes.lookup("s").unwrap().ty, Type::String);
        scopes.pop();
        assert!(scopes.lookup("s").unwrap().ty.is_nullable());
    }
}
