//==================================================
// File: symbol/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Identifier names shared across compiler stages
// Objective: Provide the Symbol newtype used for every name in the AST
//==================================================

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use serde::{Serialize, Serializer};

/// Immutable name. Clones share one allocation, so the checker and compiler
/// can copy names out of the AST freely.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0.to_string()
    }

    /// Hidden names produced by desugaring never collide with user names.
    pub fn synthetic(prefix: &str, index: usize) -> Self {
        Symbol::from(format!("${prefix}{index}"))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Symbol(Rc::from(value))
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol(Rc::from(value))
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.into_string()
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Symbol;
    use std::collections::HashMap;

    #[test]
    fn clones_share_storage() {
        let name = Symbol::from("total");
        let copy = name.clone();
        assert!(std::ptr::eq(name.as_str(), copy.as_str()));
    }

    #[test]
    fn looks_up_by_str() {
        let mut table = HashMap::new();
        table.insert(Symbol::from("x"), 1);
        assert_eq!(table.get("x"), Some(&1));
        assert!(Symbol::synthetic("tmp", 3).is_synthetic());
        assert_eq!(Symbol::synthetic("tmp", 3), "$tmp3");
    }
}
