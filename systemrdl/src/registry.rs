// Licensed under the Apache-2.0 license

//! Component type and enumeration registries.
//!
//! Pass 1 of elaboration walks the parse tree and registers every component
//! type and enum definition here, keyed by the lexical scope (parse-tree
//! node id of the enclosing body) in which it appears. A definition is
//! visible in its own scope and any inner scope, but not above. Bodies are
//! retained unevaluated; instantiation clones nothing until pass 2 asks.

use std::collections::HashMap;

use crate::cst::{NodeId, RuleNode};
use crate::diag::{Diagnostic, DiagnosticKind, Span};
use crate::model::ComponentKind;

/// Index of a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeId(pub usize);

/// Declared type of a formal parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Bool,
    Str,
}

impl ParamType {
    /// Maps SystemRDL parameter type keywords; anything integral collapses
    /// to `Int`.
    pub fn from_type_name(name: &str) -> ParamType {
        match name {
            "boolean" => ParamType::Bool,
            "string" => ParamType::Str,
            _ => ParamType::Int,
        }
    }
}

/// A formal parameter of a component type. The default expression stays
/// unevaluated until each instantiation binds it.
#[derive(Clone, Debug)]
pub struct FormalParam<'a> {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<&'a RuleNode>,
}

/// A declared but uninstantiated component type. Immutable once registered;
/// captures no addresses.
#[derive(Clone, Debug)]
pub struct ComponentTypeDef<'a> {
    pub kind: ComponentKind,
    pub name: Option<String>,
    pub params: Vec<FormalParam<'a>>,
    pub body: &'a RuleNode,
    pub def_span: Span,
    /// Lexical scope chain of the defining site, outermost first. Names
    /// inside the body resolve against this chain, not the instantiation
    /// site.
    pub chain: Vec<NodeId>,
}

#[derive(Default)]
pub struct TypeRegistry<'a> {
    defs: Vec<ComponentTypeDef<'a>>,
    by_scope: HashMap<NodeId, HashMap<String, TypeId>>,
    /// Anonymous types, keyed by the syntactic position (node id) of their
    /// definition.
    anon: HashMap<NodeId, TypeId>,
}

impl<'a> TypeRegistry<'a> {
    /// Register a named type in `scope`. Fails with `DuplicateType` when the
    /// name is already taken in that same scope.
    pub fn register(
        &mut self,
        scope: NodeId,
        def: ComponentTypeDef<'a>,
    ) -> Result<TypeId, Diagnostic> {
        let name = def.name.clone().expect("named registration without a name");
        let span = def.def_span;
        let scope_map = self.by_scope.entry(scope).or_default();
        if scope_map.contains_key(&name) {
            return Err(Diagnostic::new(
                DiagnosticKind::DuplicateType,
                span,
                format!("component type '{}' is already defined in this scope", name),
            ));
        }
        let id = TypeId(self.defs.len());
        self.defs.push(def);
        scope_map.insert(name, id);
        Ok(id)
    }

    /// Register an anonymous type, keyed by its definition node.
    pub fn register_anon(&mut self, def_node: NodeId, def: ComponentTypeDef<'a>) -> TypeId {
        let id = TypeId(self.defs.len());
        self.defs.push(def);
        self.anon.insert(def_node, id);
        id
    }

    /// Resolve `name` against a lexical scope chain, innermost last.
    pub fn resolve(&self, name: &str, chain: &[NodeId]) -> Option<TypeId> {
        for scope in chain.iter().rev() {
            if let Some(id) = self.by_scope.get(scope).and_then(|m| m.get(name)) {
                return Some(*id);
            }
        }
        None
    }

    pub fn anon_at(&self, def_node: NodeId) -> Option<TypeId> {
        self.anon.get(&def_node).copied()
    }

    pub fn get(&self, id: TypeId) -> &ComponentTypeDef<'a> {
        &self.defs[id.0]
    }
}

/// An evaluated enumeration definition.
#[derive(Clone, Debug)]
pub struct EnumDefInfo {
    pub name: String,
    pub variants: Vec<(String, i64)>,
    pub span: Span,
}

impl EnumDefInfo {
    pub fn variant(&self, name: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

#[derive(Default)]
pub struct EnumRegistry {
    by_scope: HashMap<NodeId, HashMap<String, EnumDefInfo>>,
}

impl EnumRegistry {
    pub fn register(&mut self, scope: NodeId, def: EnumDefInfo) -> Result<(), Diagnostic> {
        let scope_map = self.by_scope.entry(scope).or_default();
        if scope_map.contains_key(&def.name) {
            return Err(Diagnostic::new(
                DiagnosticKind::DuplicateType,
                def.span,
                format!("enum '{}' is already defined in this scope", def.name),
            ));
        }
        scope_map.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn resolve(&self, name: &str, chain: &[NodeId]) -> Option<&EnumDefInfo> {
        for scope in chain.iter().rev() {
            if let Some(def) = self.by_scope.get(scope).and_then(|m| m.get(name)) {
                return Some(def);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_register_and_resolve() {
        // Borrow a real body node so the def has something to point at.
        let tree = parse("reg t { };").unwrap();
        let body = tree.rules().next().unwrap();
        let mut registry = TypeRegistry::default();
        let def = ComponentTypeDef {
            kind: ComponentKind::Reg,
            name: Some("t".to_string()),
            params: Vec::new(),
            body,
            def_span: Span::default(),
            chain: vec![0],
        };
        let id = registry.register(7, def.clone()).unwrap();
        assert_eq!(registry.resolve("t", &[7]), Some(id));
        assert_eq!(registry.resolve("t", &[7, 9]), Some(id), "visible in inner scopes");
        assert_eq!(registry.resolve("t", &[9]), None, "not visible above");
        assert!(registry.register(7, def).is_err(), "duplicate in same scope");
    }

    #[test]
    fn test_enum_registry() {
        let mut enums = EnumRegistry::default();
        enums
            .register(
                1,
                EnumDefInfo {
                    name: "mode_e".to_string(),
                    variants: vec![("idle".to_string(), 0), ("busy".to_string(), 1)],
                    span: Span::default(),
                },
            )
            .unwrap();
        let def = enums.resolve("mode_e", &[1, 2]).unwrap();
        assert_eq!(def.variant("busy"), Some(1));
        assert_eq!(def.variant("nope"), None);
    }
}
