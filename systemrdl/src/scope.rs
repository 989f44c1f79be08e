// Licensed under the Apache-2.0 license

//! Lexically scoped name binding.
//!
//! A [`ScopeStack`] is a stack of name→binding maps. Lookups walk from the
//! innermost scope outward; declaring a name twice in the same scope is an
//! error, while shadowing an outer scope is allowed. The elaborator keeps
//! one stack for parameter bindings; the type and enum registries use the
//! same discipline keyed by lexical scope id (see `registry`).

use std::collections::HashMap;

/// Raised by [`ScopeStack::declare`] when the name already exists in the
/// current scope. The caller turns this into a `DuplicateName` diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplicateName;

#[derive(Clone, Debug)]
pub struct ScopeStack<V> {
    scopes: Vec<HashMap<String, V>>,
}

impl<V> Default for ScopeStack<V> {
    fn default() -> Self {
        ScopeStack { scopes: Vec::new() }
    }
}

impl<V> ScopeStack<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn leave_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declare `name` in the innermost scope.
    pub fn declare(&mut self, name: &str, binding: V) -> Result<(), DuplicateName> {
        let scope = self
            .scopes
            .last_mut()
            .expect("declare called with no open scope");
        if scope.contains_key(name) {
            return Err(DuplicateName);
        }
        scope.insert(name.to_string(), binding);
        Ok(())
    }

    /// Innermost-to-outermost lookup.
    pub fn lookup(&self, name: &str) -> Option<&V> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing() {
        let mut scopes: ScopeStack<i64> = ScopeStack::new();
        scopes.enter_scope();
        scopes.declare("n", 1).unwrap();
        scopes.enter_scope();
        scopes.declare("n", 2).unwrap();
        assert_eq!(scopes.lookup("n"), Some(&2));
        scopes.leave_scope();
        assert_eq!(scopes.lookup("n"), Some(&1));
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let mut scopes: ScopeStack<i64> = ScopeStack::new();
        scopes.enter_scope();
        scopes.declare("n", 1).unwrap();
        assert_eq!(scopes.declare("n", 2), Err(DuplicateName));
    }

    #[test]
    fn test_unresolved() {
        let mut scopes: ScopeStack<i64> = ScopeStack::new();
        scopes.enter_scope();
        assert_eq!(scopes.lookup("missing"), None);
    }
}
