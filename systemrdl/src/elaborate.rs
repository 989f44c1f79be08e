// Licensed under the Apache-2.0 license

//! The instantiator: turns a parse tree into the elaborated model.
//!
//! Elaboration runs in two passes. Pass 1 walks the tree once and registers
//! every component type and enum definition in its lexical scope, without
//! evaluating anything. Pass 2 starts from the root address map and
//! recursively materializes instances: binding parameters, expanding
//! arrays, assigning addresses, resolving property assignments, and calling
//! the validator at register and container boundaries. Diagnostics are
//! accumulated throughout; a run with any error yields no root.

use std::collections::HashMap;
use std::mem;

use indexmap::IndexMap;
use log::{debug, warn};

use crate::cst::{NodeId, Rule, RuleNode};
use crate::diag::{has_errors, Diagnostic, DiagnosticKind, Span};
use crate::expr::{self, EvalEnv};
use crate::model::{ComponentKind, ElaboratedNode, NodeState};
use crate::registry::{
    ComponentTypeDef, EnumDefInfo, EnumRegistry, FormalParam, ParamType, TypeId, TypeRegistry,
};
use crate::schema::{self, Addressing};
use crate::scope::ScopeStack;
use crate::token::{Token, TokenKind};
use crate::validate;
use crate::value::{NodePath, PropertyValue};

/// Outcome of an elaboration run. `root` is present only when no diagnostic
/// of error severity was raised; warnings may accompany a successful root.
#[derive(Debug)]
pub struct ElaborationResult {
    pub root: Option<ElaboratedNode>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ElaborationResult {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Elaborate a parsed tree. `origin` is the source path recorded on
/// diagnostics.
pub fn elaborate(tree: &RuleNode, origin: &str) -> ElaborationResult {
    let mut elab = Elaborator {
        registry: TypeRegistry::default(),
        enums: EnumRegistry::default(),
        body_insts: HashMap::new(),
        params: ScopeStack::new(),
        defaults: Vec::new(),
        chain: Vec::new(),
        path: Vec::new(),
        root_candidate: None,
        diags: Vec::new(),
    };

    let mut chain = vec![tree.id];
    elab.register_body(tree, &mut chain);
    debug!("pass 1 complete: type registration done");

    let root = elab.instantiate_root(tree);
    let mut diags = elab.diags;

    let root = match root {
        Some(mut node) => {
            validate::finalize(&mut node, &mut diags);
            Some(node)
        }
        None => None,
    };

    for d in &mut diags {
        if d.file.is_empty() {
            d.file = origin.to_string();
        }
    }
    let root = if has_errors(&diags) { None } else { root };
    ElaborationResult { root, diagnostics: diags }
}

/// Byte/bit cursors while elaborating one component body.
struct BodyState {
    cursor: u64,
    next_bit: u64,
    min_start: Option<u64>,
    max_end: u64,
    /// Addressing mode inherited from enclosing address maps.
    inherited: Addressing,
}

impl BodyState {
    fn new(inherited: Addressing) -> Self {
        BodyState {
            cursor: 0,
            next_bit: 0,
            min_start: None,
            max_end: 0,
            inherited,
        }
    }

    fn place(&mut self, offset: u64, span: u64) {
        self.min_start = Some(self.min_start.map_or(offset, |m| m.min(offset)));
        self.max_end = self.max_end.max(offset + span);
        self.cursor = offset + span;
    }
}

struct Elaborator<'a> {
    registry: TypeRegistry<'a>,
    enums: EnumRegistry,
    /// Instance names declared per body, for telling forward references
    /// apart from unknown names.
    body_insts: HashMap<NodeId, Vec<String>>,
    params: ScopeStack<PropertyValue>,
    /// Stack of `default` property frames, outermost first.
    defaults: Vec<IndexMap<String, PropertyValue>>,
    /// Lexical scope chain of the body currently being elaborated.
    chain: Vec<NodeId>,
    /// Child-index path of the node currently being elaborated.
    path: Vec<usize>,
    root_candidate: Option<TypeId>,
    diags: Vec<Diagnostic>,
}

/// Expression-evaluation view over the elaborator's state. `ancestors`
/// holds the in-progress nodes enclosing `current`, outermost first, so
/// that expressions can refer to earlier siblings at any enclosing level.
struct ElabEnv<'e> {
    params: &'e ScopeStack<PropertyValue>,
    enums: &'e EnumRegistry,
    chain: &'e [NodeId],
    body_insts: &'e HashMap<NodeId, Vec<String>>,
    body_id: NodeId,
    current: Option<&'e ElaboratedNode>,
    ancestors: &'e [&'e ElaboratedNode],
    path: &'e [usize],
}

impl EvalEnv for ElabEnv<'_> {
    fn lookup_param(&self, name: &str) -> Option<PropertyValue> {
        self.params.lookup(name).cloned()
    }

    fn lookup_enum(&self, type_name: &str) -> Option<&EnumDefInfo> {
        self.enums.resolve(type_name, self.chain)
    }

    fn resolve_ref(
        &self,
        segs: &[&Token],
        prop: Option<&Token>,
    ) -> Result<PropertyValue, Diagnostic> {
        let first = segs.first().expect("empty instance reference");
        let Some(current) = self.current else {
            return Err(Diagnostic::new(
                DiagnosticKind::UnresolvedName,
                first.span(),
                format!("cannot resolve '{}' in this context", first.text),
            ));
        };

        // Innermost scope first, then enclosing nodes outward.
        let mut err = None;
        let mut resolved = None;
        match walk_instance_path(current, segs, self.body_insts, Some(self.body_id)) {
            Ok((target, indices)) => {
                let mut full = self.path.to_vec();
                full.extend(indices);
                resolved = Some((target, full));
            }
            Err(diag) => err = Some(diag),
        }
        if resolved.is_none() {
            for (depth, &anc) in self.ancestors.iter().enumerate().rev() {
                if let Ok((target, indices)) = walk_instance_path(anc, segs, self.body_insts, None)
                {
                    let mut full = self.path[..depth].to_vec();
                    full.extend(indices);
                    resolved = Some((target, full));
                    break;
                }
            }
        }
        let Some((target, full_path)) = resolved else {
            return Err(err.unwrap_or_else(|| {
                Diagnostic::new(
                    DiagnosticKind::UnresolvedName,
                    first.span(),
                    format!("no instance named '{}' in scope", first.text),
                )
            }));
        };

        match prop {
            Some(prop_tok) => {
                if let Some(value) = target.get_property(&prop_tok.text) {
                    Ok(value.clone())
                } else if let Some(value) = schema::builtin_default(&prop_tok.text, target.kind) {
                    Ok(value)
                } else {
                    Err(Diagnostic::new(
                        DiagnosticKind::UnresolvedName,
                        prop_tok.span(),
                        format!(
                            "property '{}' is not set on '{}'",
                            prop_tok.text, target.inst_name
                        ),
                    ))
                }
            }
            None => Ok(PropertyValue::Ref(NodePath(full_path))),
        }
    }
}

/// Walk `segs` from `current`'s children. A leading `this` names `current`
/// itself. Each intermediate segment must already be elaborated: when
/// `body_id` is known, a first segment declared later in that body is
/// reported as a forward reference rather than an unknown name.
fn walk_instance_path<'n>(
    current: &'n ElaboratedNode,
    segs: &[&Token],
    body_insts: &HashMap<NodeId, Vec<String>>,
    body_id: Option<NodeId>,
) -> Result<(&'n ElaboratedNode, Vec<usize>), Diagnostic> {
    let mut target = current;
    let mut indices = Vec::new();
    for (i, seg) in segs.iter().enumerate() {
        if i == 0 && seg.text == "this" {
            continue;
        }
        if seg.text == "parent" {
            return Err(Diagnostic::new(
                DiagnosticKind::Unsupported,
                seg.span(),
                "'parent' references are not supported",
            ));
        }
        match target.children.iter().position(|c| c.inst_name == seg.text) {
            Some(index) => {
                indices.push(index);
                target = &target.children[index];
            }
            None => {
                let declared_later = i == 0
                    && body_id.is_some_and(|id| {
                        body_insts
                            .get(&id)
                            .is_some_and(|names| names.iter().any(|n| n == &seg.text))
                    });
                let kind = if declared_later {
                    DiagnosticKind::ForwardReference
                } else {
                    DiagnosticKind::UnresolvedName
                };
                let message = if declared_later {
                    format!("'{}' is instantiated later in this scope", seg.text)
                } else {
                    format!("no instance named '{}' in scope", seg.text)
                };
                return Err(Diagnostic::new(kind, seg.span(), message));
            }
        }
    }
    Ok((target, indices))
}

/// Properties that fix a node's layout; they cannot be rewritten through
/// dynamic assignments once the instance exists.
const STRUCTURAL_PROPS: &[&str] = &[
    "msb",
    "lsb",
    "width",
    "fieldwidth",
    "regwidth",
    "memwidth",
    "mementries",
];

impl<'a> Elaborator<'a> {
    fn report(&mut self, diag: Diagnostic) {
        self.diags.push(diag);
    }

    // ------------------------------------------------------------------
    // Pass 1: registration
    // ------------------------------------------------------------------

    /// Register named types, anonymous types, and enums declared directly in
    /// `body`, then recurse into nested bodies. Also records the instance
    /// names declared per body for forward-reference detection.
    fn register_body(&mut self, body: &'a RuleNode, chain: &mut Vec<NodeId>) {
        let mut inst_names = Vec::new();
        for elem in body.rules() {
            match elem.rule {
                Rule::ComponentDef => {
                    if let Some(named) = elem.find(Rule::ComponentNamedDef) {
                        self.register_named_def(named, chain);
                    } else if let Some(anon) = elem.find(Rule::ComponentAnonDef) {
                        self.register_anon_def(anon, chain);
                    }
                    if let Some(insts) = elem.find(Rule::ComponentInsts) {
                        collect_inst_names(insts, &mut inst_names);
                    }
                }
                Rule::ExplicitComponentInst => {
                    for inst in elem.find_all(Rule::ComponentInst) {
                        if let Some(name) = inst.first_ident() {
                            inst_names.push(name.text.clone());
                        }
                    }
                }
                Rule::EnumDef => self.register_enum(elem, chain),
                Rule::LocalPropertyAssignment | Rule::DynamicPropertyAssignment
                    if chain.len() == 1 =>
                {
                    warn!("ignoring property assignment outside any component");
                }
                _ => {}
            }
        }
        self.body_insts.insert(body.id, inst_names);
    }

    fn register_named_def(&mut self, named: &'a RuleNode, chain: &mut Vec<NodeId>) {
        let Some(kind_tok) = named.first_ident() else {
            return;
        };
        let Some(kind) = ComponentKind::from_keyword(&kind_tok.text) else {
            return;
        };
        let Some(name_tok) = named.tokens().find(|t| t.kind == TokenKind::Ident) else {
            return;
        };
        let Some(body) = named.find(Rule::ComponentBody) else {
            return;
        };
        let params = named
            .find(Rule::ParamDef)
            .map(formal_params)
            .unwrap_or_default();
        let def = ComponentTypeDef {
            kind,
            name: Some(name_tok.text.clone()),
            params,
            body,
            def_span: name_tok.span(),
            chain: chain.clone(),
        };
        let scope = *chain.last().expect("empty scope chain");
        match self.registry.register(scope, def) {
            Ok(id) => {
                if kind == ComponentKind::AddrMap && chain.len() == 1 {
                    // The last top-level addrmap definition becomes the root.
                    self.root_candidate = Some(id);
                }
            }
            Err(diag) => self.report(diag),
        }
        chain.push(body.id);
        self.register_body(body, chain);
        chain.pop();
    }

    fn register_anon_def(&mut self, anon: &'a RuleNode, chain: &mut Vec<NodeId>) {
        let Some(kind_tok) = anon.first_ident() else {
            return;
        };
        let Some(kind) = ComponentKind::from_keyword(&kind_tok.text) else {
            return;
        };
        let Some(body) = anon.find(Rule::ComponentBody) else {
            return;
        };
        let def = ComponentTypeDef {
            kind,
            name: None,
            params: Vec::new(),
            body,
            def_span: kind_tok.span(),
            chain: chain.clone(),
        };
        self.registry.register_anon(anon.id, def);
        chain.push(body.id);
        self.register_body(body, chain);
        chain.pop();
    }

    fn register_enum(&mut self, enum_def: &'a RuleNode, chain: &mut [NodeId]) {
        let Some(name_tok) = enum_def.tokens().find(|t| t.kind == TokenKind::Ident) else {
            return;
        };
        let mut variants = Vec::new();
        let mut next_value: i64 = 0;
        for entry in enum_def.find_all(Rule::EnumEntry) {
            let Some(entry_name) = entry.first_ident() else {
                continue;
            };
            let value = match entry.rules().next() {
                Some(value_expr) => match expr::eval_int(value_expr, &expr::EmptyEnv) {
                    Ok(v) => v,
                    Err(diag) => {
                        self.report(diag);
                        next_value
                    }
                },
                None => next_value,
            };
            variants.push((entry_name.text.clone(), value));
            next_value = value + 1;
        }
        let info = EnumDefInfo {
            name: name_tok.text.clone(),
            variants,
            span: name_tok.span(),
        };
        let scope = *chain.last().expect("empty scope chain");
        if let Err(diag) = self.enums.register(scope, info) {
            self.report(diag);
        }
    }

    // ------------------------------------------------------------------
    // Pass 2: instantiation
    // ------------------------------------------------------------------

    fn instantiate_root(&mut self, tree: &'a RuleNode) -> Option<ElaboratedNode> {
        let Some(root_ty) = self.root_candidate else {
            self.report(Diagnostic::new(
                DiagnosticKind::Unsupported,
                tree.start,
                "no top-level addrmap definition to elaborate",
            ));
            return None;
        };
        let def = self.registry.get(root_ty);
        let name = def.name.clone().unwrap_or_default();
        let span = def.def_span;
        debug!("elaborating root addrmap '{}'", name);
        self.instantiate_type(
            root_ty,
            &name,
            span,
            HashMap::new(),
            Addressing::default(),
            &[],
        )
    }

    /// Materialize one instance of `ty`: bind parameters, elaborate the
    /// body, apply cascaded defaults, and derive the node's size. The
    /// returned subtree is based at address 0; the caller shifts it into
    /// place.
    fn instantiate_type(
        &mut self,
        ty: TypeId,
        inst_name: &str,
        span: Span,
        actuals: HashMap<String, PropertyValue>,
        inherited: Addressing,
        ancestors: &[&ElaboratedNode],
    ) -> Option<ElaboratedNode> {
        let def = self.registry.get(ty);
        let kind = def.kind;
        let type_name = def.name.clone().unwrap_or_default();
        let body = def.body;
        let formals = def.params.clone();
        let mut body_chain = def.chain.clone();
        body_chain.push(body.id);

        // Unknown actuals have no formal to bind to.
        for actual_name in actuals.keys() {
            if !formals.iter().any(|f| &f.name == actual_name) {
                self.report(Diagnostic::new(
                    DiagnosticKind::BadParameter,
                    span,
                    format!(
                        "type '{}' has no parameter named '{}'",
                        type_name, actual_name
                    ),
                ));
            }
        }

        self.params.enter_scope();
        for formal in &formals {
            let value = match actuals.get(&formal.name) {
                Some(value) => Some(value.clone()),
                None => match formal.default {
                    Some(default_expr) => {
                        let result = {
                            let env = self.env(None, body.id, &[]);
                            expr::eval(default_expr, &env)
                        };
                        match result {
                            Ok(v) => Some(v),
                            Err(diag) => {
                                self.report(diag);
                                None
                            }
                        }
                    }
                    None => {
                        self.report(Diagnostic::new(
                            DiagnosticKind::BadParameter,
                            span,
                            format!(
                                "no value for parameter '{}' of type '{}'",
                                formal.name, type_name
                            ),
                        ));
                        None
                    }
                },
            };
            let value = value.unwrap_or(PropertyValue::Int(0));
            if !param_type_matches(formal.ty, &value) {
                self.report(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    span,
                    format!(
                        "parameter '{}' expects a {} value, got {}",
                        formal.name,
                        param_type_name(formal.ty),
                        value.kind_name()
                    ),
                ));
            }
            if self.params.declare(&formal.name, value).is_err() {
                self.report(Diagnostic::new(
                    DiagnosticKind::DuplicateName,
                    span,
                    format!("duplicate parameter '{}'", formal.name),
                ));
            }
        }

        let saved_chain = mem::replace(&mut self.chain, body_chain);
        let mut node = ElaboratedNode::new(kind, inst_name, &type_name, span);
        self.defaults.push(IndexMap::new());
        let stats = self.elaborate_body(&mut node, body, inherited, ancestors);
        self.defaults.pop();

        self.apply_defaults(&mut node);
        self.derive_size(&mut node, &stats);

        self.chain = saved_chain;
        self.params.leave_scope();
        node.state = NodeState::Bodied;
        Some(node)
    }

    /// Cascaded `default` values from enclosing bodies, nearest frame
    /// winning, never overriding an explicit assignment.
    fn apply_defaults(&mut self, node: &mut ElaboratedNode) {
        let mut effective: IndexMap<String, PropertyValue> = IndexMap::new();
        for frame in &self.defaults {
            for (name, value) in frame {
                effective.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in effective {
            let applies = schema::property_meta(&name)
                .is_some_and(|meta| meta.applies_to.contains(&node.kind));
            if applies && !node.properties.contains_key(&name) {
                node.set_property(&name, value);
            }
        }
    }

    /// Materialize built-in defaults that every node of the kind carries,
    /// then derive `size`.
    fn derive_size(&mut self, node: &mut ElaboratedNode, stats: &BodyState) {
        match node.kind {
            ComponentKind::Reg => {
                let regwidth = node.int_property("regwidth").unwrap_or(32);
                node.set_property("regwidth", PropertyValue::Int(regwidth as i64));
                node.size = regwidth.div_ceil(8);
            }
            ComponentKind::Field => {
                for access in ["sw", "hw"] {
                    if node.get_property(access).is_none() {
                        if let Some(value) = schema::builtin_default(access, node.kind) {
                            node.set_property(access, value);
                        }
                    }
                }
                node.size = 0;
            }
            ComponentKind::Mem => {
                let entries = node.int_property("mementries").unwrap_or(1).max(1);
                let memwidth = node.int_property("memwidth").unwrap_or(32);
                node.set_property("mementries", PropertyValue::Int(entries as i64));
                node.set_property("memwidth", PropertyValue::Int(memwidth as i64));
                node.size = memwidth.div_ceil(8) * entries;
            }
            ComponentKind::AddrMap | ComponentKind::RegFile => {
                node.size = match stats.min_start {
                    Some(min_start) => stats.max_end - min_start,
                    None => 0,
                };
            }
        }
    }

    fn env<'e>(
        &'e self,
        current: Option<&'e ElaboratedNode>,
        body_id: NodeId,
        ancestors: &'e [&'e ElaboratedNode],
    ) -> ElabEnv<'e> {
        ElabEnv {
            params: &self.params,
            enums: &self.enums,
            chain: &self.chain,
            body_insts: &self.body_insts,
            body_id,
            current,
            ancestors,
            path: &self.path,
        }
    }

    fn elaborate_body(
        &mut self,
        node: &mut ElaboratedNode,
        body: &'a RuleNode,
        inherited: Addressing,
        ancestors: &[&ElaboratedNode],
    ) -> BodyState {
        let mut st = BodyState::new(inherited);
        for elem in body.rules() {
            match elem.rule {
                Rule::ComponentDef => {
                    let Some(insts) = elem.find(Rule::ComponentInsts) else {
                        continue; // pure type declaration
                    };
                    let ty = if let Some(named) = elem.find(Rule::ComponentNamedDef) {
                        named
                            .tokens()
                            .find(|t| t.kind == TokenKind::Ident)
                            .and_then(|name| self.registry.resolve(&name.text, &self.chain))
                    } else {
                        elem.find(Rule::ComponentAnonDef)
                            .and_then(|anon| self.registry.anon_at(anon.id))
                    };
                    let Some(ty) = ty else {
                        self.report(Diagnostic::new(
                            DiagnosticKind::UnresolvedType,
                            elem.start,
                            "component definition was not registered",
                        ));
                        continue;
                    };
                    for inst in insts.find_all(Rule::ComponentInst) {
                        self.elaborate_one_inst(
                            node,
                            &mut st,
                            ty,
                            inst,
                            HashMap::new(),
                            body.id,
                            ancestors,
                        );
                    }
                }
                Rule::ExplicitComponentInst => {
                    let Some(type_tok) =
                        elem.tokens().find(|t| t.kind == TokenKind::Ident).cloned()
                    else {
                        continue;
                    };
                    let Some(ty) = self.registry.resolve(&type_tok.text, &self.chain) else {
                        self.report(Diagnostic::new(
                            DiagnosticKind::UnresolvedType,
                            type_tok.span(),
                            format!("unknown component type '{}'", type_tok.text),
                        ));
                        continue;
                    };
                    let actuals =
                        self.eval_actuals(elem.find(Rule::ParamInst), node, body.id, ancestors);
                    for inst in elem.find_all(Rule::ComponentInst) {
                        self.elaborate_one_inst(
                            node,
                            &mut st,
                            ty,
                            inst,
                            actuals.clone(),
                            body.id,
                            ancestors,
                        );
                    }
                }
                Rule::LocalPropertyAssignment => {
                    self.local_assignment(node, elem, body.id, ancestors)
                }
                Rule::DynamicPropertyAssignment => {
                    self.dynamic_assignment(node, elem, body.id, ancestors)
                }
                _ => {}
            }
        }

        // Register and container boundaries: registers validate (and gain
        // reserved fields) once their parent body is complete, so dynamic
        // assignments earlier in this body have already landed.
        for child in node.children.iter_mut() {
            if child.kind == ComponentKind::Reg {
                validate::check_register(child, &mut self.diags);
            }
        }
        if node.kind.is_container() {
            validate::check_container(node, &mut self.diags);
        }
        st
    }

    fn eval_actuals(
        &mut self,
        param_inst: Option<&'a RuleNode>,
        node: &ElaboratedNode,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) -> HashMap<String, PropertyValue> {
        let mut actuals = HashMap::new();
        let Some(param_inst) = param_inst else {
            return actuals;
        };
        for assignment in param_inst.find_all(Rule::ParamAssignment) {
            let Some(name_tok) = assignment.tokens().find(|t| t.kind == TokenKind::Ident) else {
                continue;
            };
            let Some(value_expr) = assignment.rules().next() else {
                continue;
            };
            let value = {
                let env = self.env(Some(node), body_id, ancestors);
                expr::eval(value_expr, &env)
            };
            match value {
                Ok(value) => {
                    if actuals.insert(name_tok.text.clone(), value).is_some() {
                        self.report(Diagnostic::new(
                            DiagnosticKind::BadParameter,
                            name_tok.span(),
                            format!("parameter '{}' bound more than once", name_tok.text),
                        ));
                    }
                }
                Err(diag) => self.report(diag),
            }
        }
        actuals
    }

    #[allow(clippy::too_many_arguments)]
    fn elaborate_one_inst(
        &mut self,
        parent: &mut ElaboratedNode,
        st: &mut BodyState,
        ty: TypeId,
        inst: &'a RuleNode,
        actuals: HashMap<String, PropertyValue>,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) {
        let Some(name_tok) = inst.first_ident() else {
            return;
        };
        let name = name_tok.text.clone();
        let span = name_tok.span();
        let child_kind = self.registry.get(ty).kind;

        if !parent.kind.allows_child(child_kind) {
            self.report(Diagnostic::new(
                DiagnosticKind::IllegalChild,
                span,
                format!(
                    "a {} cannot be instantiated inside a {}",
                    child_kind.as_str(),
                    parent.kind.as_str()
                ),
            ));
            return;
        }
        if parent.find_child(&name).is_some() {
            self.report(Diagnostic::new(
                DiagnosticKind::DuplicateName,
                span,
                format!("instance '{}' is already declared in this scope", name),
            ));
            return;
        }

        if child_kind == ComponentKind::Field {
            self.elaborate_field_inst(parent, st, ty, inst, &name, span, actuals, body_id, ancestors);
        } else {
            self.elaborate_addressable_inst(
                parent, st, ty, inst, &name, span, actuals, body_id, ancestors,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn elaborate_field_inst(
        &mut self,
        parent: &mut ElaboratedNode,
        st: &mut BodyState,
        ty: TypeId,
        inst: &'a RuleNode,
        name: &str,
        span: Span,
        actuals: HashMap<String, PropertyValue>,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) {
        // Bit-range sources: a `[msb:lsb]` range, a `[width]` suffix, or
        // width-bearing properties. Whatever is given must agree.
        let mut range_bounds = None;
        if let Some(range) = inst.find(Rule::RangeSuffix) {
            let mut exprs = range.rules();
            let (Some(high_expr), Some(low_expr)) = (exprs.next(), exprs.next()) else {
                return;
            };
            let high = self.eval_u64_in(high_expr, parent, body_id, ancestors);
            let low = self.eval_u64_in(low_expr, parent, body_id, ancestors);
            let (Some(high), Some(low)) = (high, low) else {
                return;
            };
            if high < low {
                self.report(Diagnostic::new(
                    DiagnosticKind::BitRangeInconsistent,
                    range.start,
                    format!("field '{}' has msb {} below lsb {}", name, high, low),
                ));
                return;
            }
            range_bounds = Some((high, low));
        }

        let arrays: Vec<&RuleNode> = inst.find_all(Rule::ArraySuffix).collect();
        if arrays.len() > 1 {
            self.report(Diagnostic::new(
                DiagnosticKind::Unsupported,
                span,
                format!("field '{}' cannot have multiple dimensions", name),
            ));
            return;
        }
        let mut width_suffix = None;
        if let Some(array) = arrays.first() {
            let Some(width_expr) = array.rules().next() else {
                return;
            };
            let Some(w) = self.eval_u64_in(width_expr, parent, body_id, ancestors) else {
                return;
            };
            width_suffix = Some(w);
        }

        self.path.push(parent.children.len());
        let node = {
            let mut inner: Vec<&ElaboratedNode> = ancestors.to_vec();
            inner.push(&*parent);
            self.instantiate_type(ty, name, span, actuals, st.inherited, &inner)
        };
        self.path.pop();
        let Some(mut node) = node else {
            return;
        };

        let prop_width = node
            .int_property("fieldwidth")
            .or_else(|| node.int_property("width"));
        let prop_lsb = node.int_property("lsb");
        let prop_msb = node.int_property("msb");

        let lsb = range_bounds
            .map(|(_, low)| low)
            .or(prop_lsb)
            .unwrap_or(st.next_bit);
        let width = range_bounds
            .map(|(high, low)| high - low + 1)
            .or(width_suffix)
            .or(prop_width)
            .or_else(|| prop_msb.and_then(|m| m.checked_sub(lsb).map(|d| d + 1)))
            .unwrap_or(1);
        let msb = lsb + width.max(1) - 1;

        // Cross-check every explicitly given piece against the derived
        // triple.
        let mut inconsistent = width == 0;
        if let Some(w) = prop_width {
            inconsistent |= w != width;
        }
        if let Some(w) = width_suffix {
            inconsistent |= w != width;
        }
        if let Some(m) = prop_msb {
            inconsistent |= m != msb;
        }
        if let Some(l) = prop_lsb {
            inconsistent |= l != lsb;
        }
        if let Some((high, low)) = range_bounds {
            inconsistent |= high != msb || low != lsb;
        }
        if inconsistent {
            self.report(Diagnostic::new(
                DiagnosticKind::BitRangeInconsistent,
                span,
                format!(
                    "field '{}' has inconsistent bit attributes (width {}, msb {}, lsb {})",
                    name, width, msb, lsb
                ),
            ));
            return;
        }

        node.set_property("width", PropertyValue::Int(width as i64));
        node.set_property("lsb", PropertyValue::Int(lsb as i64));
        node.set_property("msb", PropertyValue::Int(msb as i64));
        st.next_bit = msb + 1;

        if let Some(reset) = inst.find(Rule::FieldReset) {
            if let Some(reset_expr) = reset.rules().next() {
                let value = {
                    let env = self.env(Some(parent), body_id, ancestors);
                    expr::eval(reset_expr, &env)
                };
                match value {
                    Ok(value) => match schema::check_assignment(node.kind, "reset", value) {
                        Ok(value) => node.set_property("reset", value),
                        Err(message) => self.report(Diagnostic::new(
                            DiagnosticKind::TypeMismatch,
                            reset.start,
                            message,
                        )),
                    },
                    Err(diag) => self.report(diag),
                }
            }
        }

        parent.children.push(node);
    }

    #[allow(clippy::too_many_arguments)]
    fn elaborate_addressable_inst(
        &mut self,
        parent: &mut ElaboratedNode,
        st: &mut BodyState,
        ty: TypeId,
        inst: &'a RuleNode,
        name: &str,
        span: Span,
        actuals: HashMap<String, PropertyValue>,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) {
        if let Some(range) = inst.find(Rule::RangeSuffix) {
            self.report(Diagnostic::new(
                DiagnosticKind::Unsupported,
                range.start,
                format!("range suffix is not valid on instance '{}'", name),
            ));
            return;
        }

        let mut dims = Vec::new();
        for array in inst.find_all(Rule::ArraySuffix) {
            let Some(dim_expr) = array.rules().next() else {
                return;
            };
            let Some(dim) = self.eval_u64_in(dim_expr, parent, body_id, ancestors) else {
                return;
            };
            if dim == 0 {
                self.report(Diagnostic::new(
                    DiagnosticKind::BadParameter,
                    array.start,
                    format!("array dimension of '{}' is zero", name),
                ));
                return;
            }
            dims.push(dim);
        }

        let child_addressing = self.effective_addressing(parent, st);
        self.path.push(parent.children.len());
        let node = {
            let mut inner: Vec<&ElaboratedNode> = ancestors.to_vec();
            inner.push(&*parent);
            self.instantiate_type(ty, name, span, actuals, child_addressing, &inner)
        };
        self.path.pop();
        let Some(mut node) = node else {
            return;
        };

        let elem_size = node.size.max(1);
        let mode = self.effective_addressing(parent, st);
        let mode_align = match (mode, node.kind) {
            (Addressing::Compact, _) => 1,
            (Addressing::RegAlign, ComponentKind::Reg) => elem_size,
            _ => elem_size.next_power_of_two(),
        };

        let mut offset = match inst.find(Rule::InstAddrFixed) {
            Some(fixed) => {
                let Some(fixed_expr) = fixed.rules().next() else {
                    return;
                };
                match self.eval_u64_in(fixed_expr, parent, body_id, ancestors) {
                    Some(offset) => offset,
                    None => return,
                }
            }
            None => round_up(st.cursor, mode_align),
        };

        if let Some(align) = inst.find(Rule::InstAddrAlign) {
            if let Some(align_expr) = align.rules().next() {
                if let Some(alignment) = self.eval_u64_in(align_expr, parent, body_id, ancestors) {
                    if alignment > 0 {
                        offset = round_up(offset, alignment);
                    }
                }
            }
        }

        let stride = match inst.find(Rule::InstAddrStride) {
            Some(stride_node) => {
                let Some(stride_expr) = stride_node.rules().next() else {
                    return;
                };
                match self.eval_u64_in(stride_expr, parent, body_id, ancestors) {
                    Some(stride) => stride,
                    None => return,
                }
            }
            None => elem_size,
        };
        if !dims.is_empty() && stride < node.size {
            self.report(
                Diagnostic::new(
                    DiagnosticKind::InstanceOverlap,
                    span,
                    format!(
                        "array stride {:#x} of '{}' is smaller than the element size {:#x}",
                        stride, name, node.size
                    ),
                )
                .with_related(format!("{}.{}", parent.inst_name, name)),
            );
        }

        // Per-dimension strides, outermost first.
        let mut stride_vec = vec![0u64; dims.len()];
        let mut running = stride;
        for i in (0..dims.len()).rev() {
            stride_vec[i] = running;
            running *= dims[i];
        }
        let total = if dims.is_empty() {
            node.size
        } else {
            dims.iter().product::<u64>() * stride
        };

        node.shift_addresses(offset);
        node.array_dimensions = dims;
        node.array_stride = stride_vec;
        debug!(
            "placed {} '{}' at {:#x} (span {:#x})",
            node.kind.as_str(),
            name,
            offset,
            total
        );
        st.place(offset, total);
        parent.children.push(node);
    }

    /// Addressing mode in force for children of `parent`.
    fn effective_addressing(&self, parent: &ElaboratedNode, st: &BodyState) -> Addressing {
        if parent.kind == ComponentKind::AddrMap {
            if let Some(value) = parent.get_property("addressing") {
                if let Some(mode) = Addressing::from_value(value) {
                    return mode;
                }
            }
        }
        st.inherited
    }

    fn eval_u64_in(
        &mut self,
        expr_node: &RuleNode,
        node: &ElaboratedNode,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) -> Option<u64> {
        let value = {
            let env = self.env(Some(node), body_id, ancestors);
            expr::eval_u64(expr_node, &env)
        };
        match value {
            Ok(v) => Some(v),
            Err(diag) => {
                self.report(diag);
                None
            }
        }
    }

    fn local_assignment(
        &mut self,
        node: &mut ElaboratedNode,
        elem: &'a RuleNode,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) {
        let is_default = elem.has_token("default");
        let Some(prop_tok) = elem.tokens().find(|t| t.kind == TokenKind::Ident).cloned() else {
            return;
        };
        let value = match elem.rules().next() {
            Some(value_expr) => {
                let result = {
                    let env = self.env(Some(node), body_id, ancestors);
                    expr::eval(value_expr, &env)
                };
                match result {
                    Ok(value) => value,
                    Err(diag) => {
                        self.report(diag);
                        return;
                    }
                }
            }
            // A bare property name asserts a boolean.
            None => PropertyValue::Bool(true),
        };

        if schema::property_meta(&prop_tok.text).is_none() {
            self.report(Diagnostic::new(
                DiagnosticKind::UnresolvedName,
                prop_tok.span(),
                format!("unknown property '{}'", prop_tok.text),
            ));
            return;
        }

        if is_default {
            match schema::check_value_type(&prop_tok.text, value) {
                Ok(value) => {
                    let frame = self.defaults.last_mut().expect("no default frame open");
                    frame.insert(prop_tok.text.clone(), value);
                }
                Err(message) => self.report(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    prop_tok.span(),
                    message,
                )),
            }
        } else {
            match schema::check_assignment(node.kind, &prop_tok.text, value) {
                Ok(value) => node.set_property(&prop_tok.text, value),
                Err(message) => self.report(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    prop_tok.span(),
                    message,
                )),
            }
        }
    }

    fn dynamic_assignment(
        &mut self,
        node: &mut ElaboratedNode,
        elem: &'a RuleNode,
        body_id: NodeId,
        ancestors: &[&ElaboratedNode],
    ) {
        let Some(iref) = elem.find(Rule::InstanceRef) else {
            return;
        };
        let Some(prop_tok) = elem.tokens().find(|t| t.kind == TokenKind::Ident).cloned() else {
            return;
        };
        let Some(value_expr) = elem.rules().nth(1) else {
            return;
        };

        let segs: Vec<&Token> = iref.tokens().filter(|t| !t.is(".")).collect();
        let resolution = walk_instance_path(node, &segs, &self.body_insts, Some(body_id));
        let (target_kind, target_state, indices) = match resolution {
            Ok((target, indices)) => (target.kind, target.state, indices),
            Err(diag) => {
                self.report(diag);
                return;
            }
        };

        if target_state >= NodeState::Finalized {
            self.report(Diagnostic::new(
                DiagnosticKind::Unsupported,
                prop_tok.span(),
                format!(
                    "instance '{}' is finalized and can no longer be modified",
                    segs.last().map(|t| t.text.as_str()).unwrap_or_default()
                ),
            ));
            return;
        }
        if STRUCTURAL_PROPS.contains(&prop_tok.text.as_str()) {
            self.report(Diagnostic::new(
                DiagnosticKind::Unsupported,
                prop_tok.span(),
                format!(
                    "property '{}' fixes the layout and cannot be assigned dynamically",
                    prop_tok.text
                ),
            ));
            return;
        }

        let value = {
            let env = self.env(Some(node), body_id, ancestors);
            expr::eval(value_expr, &env)
        };
        let value = match value {
            Ok(value) => value,
            Err(diag) => {
                self.report(diag);
                return;
            }
        };
        match schema::check_assignment(target_kind, &prop_tok.text, value) {
            Ok(value) => {
                let mut target = &mut *node;
                for index in indices {
                    target = &mut target.children[index];
                }
                target.set_property(&prop_tok.text, value);
            }
            Err(message) => self.report(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                prop_tok.span(),
                message,
            )),
        }
    }
}

fn collect_inst_names(insts: &RuleNode, out: &mut Vec<String>) {
    for inst in insts.find_all(Rule::ComponentInst) {
        if let Some(name) = inst.first_ident() {
            out.push(name.text.clone());
        }
    }
}

fn formal_params(param_def: &RuleNode) -> Vec<FormalParam<'_>> {
    let mut params = Vec::new();
    for elem in param_def.find_all(Rule::ParamDefElem) {
        let idents: Vec<&Token> = elem
            .tokens()
            .filter(|t| t.kind == TokenKind::Ident)
            .collect();
        let Some(name_tok) = idents.last() else {
            continue;
        };
        let ty = idents
            .first()
            .map(|t| ParamType::from_type_name(&t.text))
            .unwrap_or(ParamType::Int);
        params.push(FormalParam {
            name: name_tok.text.clone(),
            ty,
            default: elem.rules().next(),
        });
    }
    params
}

fn param_type_matches(ty: ParamType, value: &PropertyValue) -> bool {
    match ty {
        ParamType::Int => value.as_int().is_some(),
        ParamType::Bool => value.as_bool().is_some(),
        ParamType::Str => value.as_str().is_some(),
    }
}

fn param_type_name(ty: ParamType) -> &'static str {
    match ty {
        ParamType::Int => "integer",
        ParamType::Bool => "boolean",
        ParamType::Str => "string",
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}
