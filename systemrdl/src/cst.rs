// Licensed under the Apache-2.0 license

//! The rule-labeled concrete syntax tree.
//!
//! This is the interchange surface between the parser front-end and the
//! elaboration core: a tree whose interior nodes carry a rule label from the
//! closed [`Rule`] set and whose leaves are the original tokens with their
//! source positions. The elaborator consumes this tree directly; the AST
//! JSON serializer renders it verbatim.

use crate::diag::Span;
use crate::token::{Token, TokenKind};

/// Unique id assigned to every rule node by the parser. Used as a stable key
/// for lexical scopes during elaboration.
pub type NodeId = u32;

/// The closed set of grammar rule labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rule {
    Root,
    ComponentDef,
    ComponentNamedDef,
    ComponentAnonDef,
    ComponentBody,
    ComponentInsts,
    ComponentInst,
    ExplicitComponentInst,
    ParamDef,
    ParamDefElem,
    ParamInst,
    ParamAssignment,
    ArraySuffix,
    RangeSuffix,
    InstAddrFixed,
    InstAddrStride,
    InstAddrAlign,
    FieldReset,
    LocalPropertyAssignment,
    DynamicPropertyAssignment,
    InstanceRef,
    EnumDef,
    EnumEntry,
    BinaryExpr,
    UnaryExpr,
    TernaryExpr,
    ParenExpr,
    Concat,
    Replicate,
    Literal,
    EnumRef,
    RefExpr,
}

impl Rule {
    /// Grammar rule name, as surfaced in the AST JSON.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Root => "root",
            Rule::ComponentDef => "component_def",
            Rule::ComponentNamedDef => "component_named_def",
            Rule::ComponentAnonDef => "component_anon_def",
            Rule::ComponentBody => "component_body",
            Rule::ComponentInsts => "component_insts",
            Rule::ComponentInst => "component_inst",
            Rule::ExplicitComponentInst => "explicit_component_inst",
            Rule::ParamDef => "param_def",
            Rule::ParamDefElem => "param_def_elem",
            Rule::ParamInst => "param_inst",
            Rule::ParamAssignment => "param_assignment",
            Rule::ArraySuffix => "array_suffix",
            Rule::RangeSuffix => "range_suffix",
            Rule::InstAddrFixed => "inst_addr_fixed",
            Rule::InstAddrStride => "inst_addr_stride",
            Rule::InstAddrAlign => "inst_addr_align",
            Rule::FieldReset => "field_reset",
            Rule::LocalPropertyAssignment => "local_property_assignment",
            Rule::DynamicPropertyAssignment => "dynamic_property_assignment",
            Rule::InstanceRef => "instance_ref",
            Rule::EnumDef => "enum_def",
            Rule::EnumEntry => "enum_entry",
            Rule::BinaryExpr => "binary_expr",
            Rule::UnaryExpr => "unary_expr",
            Rule::TernaryExpr => "ternary_expr",
            Rule::ParenExpr => "paren_expr",
            Rule::Concat => "concat",
            Rule::Replicate => "replicate",
            Rule::Literal => "literal",
            Rule::EnumRef => "enum_ref",
            Rule::RefExpr => "ref_expr",
        }
    }
}

/// A parse tree element: an interior rule node or a leaf token.
#[derive(Clone, Debug)]
pub enum CstNode {
    Rule(RuleNode),
    Token(Token),
}

impl CstNode {
    pub fn as_rule(&self) -> Option<&RuleNode> {
        match self {
            CstNode::Rule(rule) => Some(rule),
            CstNode::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            CstNode::Token(token) => Some(token),
            CstNode::Rule(_) => None,
        }
    }
}

/// An interior node of the parse tree.
#[derive(Clone, Debug)]
pub struct RuleNode {
    pub rule: Rule,
    pub id: NodeId,
    pub children: Vec<CstNode>,
    pub start: Span,
    pub stop: Span,
    /// Byte range in the original source, for text extraction.
    pub text_range: (usize, usize),
}

impl RuleNode {
    /// Iterates the direct child rule nodes.
    pub fn rules(&self) -> impl Iterator<Item = &RuleNode> {
        self.children.iter().filter_map(CstNode::as_rule)
    }

    /// Iterates the direct child tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.children.iter().filter_map(CstNode::as_token)
    }

    /// First direct child with the given rule label.
    pub fn find(&self, rule: Rule) -> Option<&RuleNode> {
        self.rules().find(|r| r.rule == rule)
    }

    /// All direct children with the given rule label.
    pub fn find_all(&self, rule: Rule) -> impl Iterator<Item = &RuleNode> {
        self.rules().filter(move |r| r.rule == rule)
    }

    /// First identifier-like token child (identifier or keyword).
    pub fn first_ident(&self) -> Option<&Token> {
        self.tokens()
            .find(|t| matches!(t.kind, TokenKind::Ident | TokenKind::Keyword))
    }

    /// True if a direct token child has exactly this text.
    pub fn has_token(&self, text: &str) -> bool {
        self.tokens().any(|t| t.text == text)
    }

    /// Source text this node spans.
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        src.get(self.text_range.0..self.text_range.1).unwrap_or("")
    }
}
