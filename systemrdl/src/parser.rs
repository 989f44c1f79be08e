// Licensed under the Apache-2.0 license

//! Recursive-descent parser producing the rule-labeled concrete syntax tree.
//!
//! This is the stand-in for the grammar-generated front-end: it accepts the
//! SystemRDL 2.0 subset the elaboration core understands and hands back the
//! tree described in `cst`. Parsing stops at the first syntax error.

use crate::cst::{CstNode, NodeId, Rule, RuleNode};
use crate::diag::{Diagnostic, DiagnosticKind, Span};
use crate::lexer::lex;
use crate::token::{is_component_kind, Token, TokenKind};

/// Binary operator precedence levels, loosest first. `**` (right
/// associative) and the unary operators bind tighter than all of these.
const BIN_LEVELS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["|"],
    &["^", "~^", "^~"],
    &["&"],
    &["==", "!="],
    &["<", "<=", ">", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

/// Parse SystemRDL source text into a `root` parse tree.
pub fn parse(src: &str) -> Result<RuleNode, Diagnostic> {
    let tokens = lex(src)?;
    Parser {
        tokens,
        pos: 0,
        next_id: 0,
    }
    .parse_root()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: NodeId,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn at(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(text))
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        self.pos += 1;
        token
    }

    fn here(&self) -> Span {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(Token::span)
            .unwrap_or_default()
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::SyntaxError, self.here(), message)
    }

    fn expect(&mut self, text: &str) -> Result<Token, Diagnostic> {
        if self.at(text) {
            Ok(self.bump())
        } else {
            let found = self
                .peek()
                .map(|t| format!("'{}'", t.text))
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(format!("expected '{}', found {}", text, found)))
        }
    }

    fn expect_ident(&mut self) -> Result<Token, Diagnostic> {
        if self.at_kind(TokenKind::Ident) {
            Ok(self.bump())
        } else {
            let found = self
                .peek()
                .map(|t| format!("'{}'", t.text))
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(format!("expected identifier, found {}", found)))
        }
    }

    /// Wraps children into a rule node, deriving spans and the source byte
    /// range from the first and last elements.
    fn node(&mut self, rule: Rule, children: Vec<CstNode>) -> CstNode {
        fn bounds(node: &CstNode) -> (Span, usize, usize) {
            match node {
                CstNode::Token(t) => (t.span(), t.offset, t.end),
                CstNode::Rule(r) => (r.start, r.text_range.0, r.text_range.1),
            }
        }
        let (start, first, _) = children.first().map(bounds).unwrap_or_default();
        let (stop, _, last) = children.last().map(bounds).unwrap_or_default();
        let id = self.next_id;
        self.next_id += 1;
        CstNode::Rule(RuleNode {
            rule,
            id,
            children,
            start,
            stop,
            text_range: (first, last),
        })
    }

    fn parse_root(mut self) -> Result<RuleNode, Diagnostic> {
        let mut children = Vec::new();
        while self.peek().is_some() {
            children.push(self.parse_body_elem()?);
        }
        match self.node(Rule::Root, children) {
            CstNode::Rule(root) => Ok(root),
            CstNode::Token(_) => unreachable!(),
        }
    }

    fn parse_body_elem(&mut self) -> Result<CstNode, Diagnostic> {
        let Some(token) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        let kind = token.kind;
        let text = token.text.clone();
        if kind == TokenKind::Keyword {
            return match text.as_str() {
                k if is_component_kind(k) => self.parse_component_def(),
                "enum" => self.parse_enum_def(),
                "default" => self.parse_local_property_assignment(),
                "this" | "parent" => self.parse_dynamic_property_assignment(),
                other => Err(self.error(format!("unexpected keyword '{}'", other))),
            };
        }
        if kind == TokenKind::Ident {
            enum Next {
                Explicit,
                Dynamic,
                Local,
                Bad,
            }
            let next = match self.peek_at(1) {
                Some(t) if t.is("#") || t.kind == TokenKind::Ident => Next::Explicit,
                Some(t) if t.is(".") || t.is("->") => Next::Dynamic,
                Some(t) if t.is("=") || t.is(";") => Next::Local,
                _ => Next::Bad,
            };
            return match next {
                Next::Explicit => self.parse_explicit_component_inst(),
                Next::Dynamic => self.parse_dynamic_property_assignment(),
                Next::Local => self.parse_local_property_assignment(),
                Next::Bad => Err(self.error(format!("unexpected token after '{}'", text))),
            };
        }
        Err(self.error(format!("unexpected token '{}'", text)))
    }

    fn parse_component_def(&mut self) -> Result<CstNode, Diagnostic> {
        let kind = self.bump();
        let mut children = Vec::new();
        if self.at_kind(TokenKind::Ident) {
            // Named definition, optionally followed by instances.
            let name = self.bump();
            let mut def_children = vec![CstNode::Token(kind), CstNode::Token(name)];
            if self.at("#") {
                def_children.push(self.parse_param_def()?);
            }
            def_children.push(self.parse_component_body()?);
            children.push(self.node(Rule::ComponentNamedDef, def_children));
            if !self.at(";") {
                children.push(self.parse_component_insts()?);
            }
        } else {
            // Anonymous definition; the instance list is mandatory.
            let body = self.parse_component_body()?;
            let def_children = vec![CstNode::Token(kind), body];
            children.push(self.node(Rule::ComponentAnonDef, def_children));
            children.push(self.parse_component_insts()?);
        }
        children.push(CstNode::Token(self.expect(";")?));
        Ok(self.node(Rule::ComponentDef, children))
    }

    fn parse_component_body(&mut self) -> Result<CstNode, Diagnostic> {
        let mut children = vec![CstNode::Token(self.expect("{")?)];
        while !self.at("}") {
            if self.peek().is_none() {
                return Err(self.error("unterminated component body"));
            }
            children.push(self.parse_body_elem()?);
        }
        children.push(CstNode::Token(self.bump()));
        Ok(self.node(Rule::ComponentBody, children))
    }

    fn parse_component_insts(&mut self) -> Result<CstNode, Diagnostic> {
        let mut children = vec![self.parse_component_inst()?];
        while self.at(",") {
            children.push(CstNode::Token(self.bump()));
            children.push(self.parse_component_inst()?);
        }
        Ok(self.node(Rule::ComponentInsts, children))
    }

    fn parse_component_inst(&mut self) -> Result<CstNode, Diagnostic> {
        let name = self.expect_ident()?;
        let mut children = vec![CstNode::Token(name)];
        while self.at("[") {
            let open = self.bump();
            let first = self.parse_expr()?;
            if self.at(":") {
                let colon = self.bump();
                let second = self.parse_expr()?;
                let close = self.expect("]")?;
                children.push(self.node(
                    Rule::RangeSuffix,
                    vec![
                        CstNode::Token(open),
                        first,
                        CstNode::Token(colon),
                        second,
                        CstNode::Token(close),
                    ],
                ));
            } else {
                let close = self.expect("]")?;
                children.push(self.node(
                    Rule::ArraySuffix,
                    vec![CstNode::Token(open), first, CstNode::Token(close)],
                ));
            }
        }
        if self.at("=") {
            let eq = self.bump();
            let expr = self.parse_expr()?;
            children.push(self.node(Rule::FieldReset, vec![CstNode::Token(eq), expr]));
        }
        if self.at("@") {
            let at = self.bump();
            let expr = self.parse_expr()?;
            children.push(self.node(Rule::InstAddrFixed, vec![CstNode::Token(at), expr]));
        }
        if self.at("+=") {
            let op = self.bump();
            let expr = self.parse_expr()?;
            children.push(self.node(Rule::InstAddrStride, vec![CstNode::Token(op), expr]));
        }
        if self.at("%=") {
            let op = self.bump();
            let expr = self.parse_expr()?;
            children.push(self.node(Rule::InstAddrAlign, vec![CstNode::Token(op), expr]));
        }
        Ok(self.node(Rule::ComponentInst, children))
    }

    fn parse_explicit_component_inst(&mut self) -> Result<CstNode, Diagnostic> {
        let type_name = self.expect_ident()?;
        let mut children = vec![CstNode::Token(type_name)];
        if self.at("#") {
            children.push(self.parse_param_inst()?);
        }
        children.push(self.parse_component_inst()?);
        while self.at(",") {
            children.push(CstNode::Token(self.bump()));
            children.push(self.parse_component_inst()?);
        }
        children.push(CstNode::Token(self.expect(";")?));
        Ok(self.node(Rule::ExplicitComponentInst, children))
    }

    fn parse_param_def(&mut self) -> Result<CstNode, Diagnostic> {
        let mut children = vec![CstNode::Token(self.expect("#")?), CstNode::Token(self.expect("(")?)];
        loop {
            let ty = self.expect_ident()?;
            let mut elem = vec![CstNode::Token(ty)];
            if self.peek().is_some_and(|t| t.text == "unsigned") {
                elem.push(CstNode::Token(self.bump()));
            }
            elem.push(CstNode::Token(self.expect_ident()?));
            if self.at("=") {
                elem.push(CstNode::Token(self.bump()));
                elem.push(self.parse_expr()?);
            }
            children.push(self.node(Rule::ParamDefElem, elem));
            if self.at(",") {
                children.push(CstNode::Token(self.bump()));
            } else {
                break;
            }
        }
        children.push(CstNode::Token(self.expect(")")?));
        Ok(self.node(Rule::ParamDef, children))
    }

    fn parse_param_inst(&mut self) -> Result<CstNode, Diagnostic> {
        let mut children = vec![CstNode::Token(self.expect("#")?), CstNode::Token(self.expect("(")?)];
        loop {
            let dot = self.expect(".")?;
            let name = self.expect_ident()?;
            let open = self.expect("(")?;
            let value = self.parse_expr()?;
            let close = self.expect(")")?;
            children.push(self.node(
                Rule::ParamAssignment,
                vec![
                    CstNode::Token(dot),
                    CstNode::Token(name),
                    CstNode::Token(open),
                    value,
                    CstNode::Token(close),
                ],
            ));
            if self.at(",") {
                children.push(CstNode::Token(self.bump()));
            } else {
                break;
            }
        }
        children.push(CstNode::Token(self.expect(")")?));
        Ok(self.node(Rule::ParamInst, children))
    }

    fn parse_local_property_assignment(&mut self) -> Result<CstNode, Diagnostic> {
        let mut children = Vec::new();
        if self.at("default") {
            children.push(CstNode::Token(self.bump()));
        }
        children.push(CstNode::Token(self.expect_ident()?));
        if self.at("=") {
            children.push(CstNode::Token(self.bump()));
            children.push(self.parse_expr()?);
        }
        children.push(CstNode::Token(self.expect(";")?));
        Ok(self.node(Rule::LocalPropertyAssignment, children))
    }

    /// `a.b->prop = expr;` or `a.b.prop = expr;`; in the dotted form the
    /// final segment is the property.
    fn parse_dynamic_property_assignment(&mut self) -> Result<CstNode, Diagnostic> {
        let mut path: Vec<CstNode> = vec![CstNode::Token(self.bump())];
        while self.at(".") {
            path.push(CstNode::Token(self.bump()));
            path.push(CstNode::Token(self.expect_ident()?));
        }
        let mut children = Vec::new();
        if self.at("->") {
            let arrow = self.bump();
            let prop = self.expect_ident()?;
            children.push(self.node(Rule::InstanceRef, path));
            children.push(CstNode::Token(arrow));
            children.push(CstNode::Token(prop));
        } else {
            // Dotted form needs at least one instance segment plus the
            // property segment.
            if path.len() < 3 {
                return Err(self.error("expected '->' or '.' and a property name"));
            }
            let prop = path.pop().expect("nonempty");
            path.pop(); // the '.' before the property
            children.push(self.node(Rule::InstanceRef, path));
            children.push(prop);
        }
        children.push(CstNode::Token(self.expect("=")?));
        children.push(self.parse_expr()?);
        children.push(CstNode::Token(self.expect(";")?));
        Ok(self.node(Rule::DynamicPropertyAssignment, children))
    }

    fn parse_enum_def(&mut self) -> Result<CstNode, Diagnostic> {
        let kw = self.bump();
        let name = self.expect_ident()?;
        let mut children = vec![
            CstNode::Token(kw),
            CstNode::Token(name),
            CstNode::Token(self.expect("{")?),
        ];
        while !self.at("}") {
            let entry_name = self.expect_ident()?;
            let mut entry = vec![CstNode::Token(entry_name)];
            if self.at("=") {
                entry.push(CstNode::Token(self.bump()));
                entry.push(self.parse_expr()?);
            }
            entry.push(CstNode::Token(self.expect(";")?));
            children.push(self.node(Rule::EnumEntry, entry));
        }
        children.push(CstNode::Token(self.bump()));
        children.push(CstNode::Token(self.expect(";")?));
        Ok(self.node(Rule::EnumDef, children))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn parse_expr(&mut self) -> Result<CstNode, Diagnostic> {
        let cond = self.parse_binary(0)?;
        if self.at("?") {
            let question = self.bump();
            let then_val = self.parse_expr()?;
            let colon = self.expect(":")?;
            let else_val = self.parse_expr()?;
            return Ok(self.node(
                Rule::TernaryExpr,
                vec![
                    cond,
                    CstNode::Token(question),
                    then_val,
                    CstNode::Token(colon),
                    else_val,
                ],
            ));
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, level: usize) -> Result<CstNode, Diagnostic> {
        if level == BIN_LEVELS.len() {
            return self.parse_power();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while BIN_LEVELS[level].iter().any(|op| self.at(op)) {
            let op = self.bump();
            let rhs = self.parse_binary(level + 1)?;
            lhs = self.node(Rule::BinaryExpr, vec![lhs, CstNode::Token(op), rhs]);
        }
        Ok(lhs)
    }

    fn parse_power(&mut self) -> Result<CstNode, Diagnostic> {
        let lhs = self.parse_unary()?;
        if self.at("**") {
            let op = self.bump();
            let rhs = self.parse_power()?; // right associative
            return Ok(self.node(Rule::BinaryExpr, vec![lhs, CstNode::Token(op), rhs]));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<CstNode, Diagnostic> {
        if self.at("!") || self.at("~") || self.at("+") || self.at("-") {
            let op = self.bump();
            let operand = self.parse_unary()?;
            return Ok(self.node(Rule::UnaryExpr, vec![CstNode::Token(op), operand]));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<CstNode, Diagnostic> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected expression"));
        };
        let kind = token.kind;
        let text = token.text.clone();
        match kind {
            TokenKind::Number | TokenKind::SizedNumber => {
                let tok = self.bump();
                Ok(self.node(Rule::Literal, vec![CstNode::Token(tok)]))
            }
            TokenKind::StrLit => {
                // Adjacent string literals concatenate.
                let mut toks = vec![CstNode::Token(self.bump())];
                while self.at_kind(TokenKind::StrLit) {
                    toks.push(CstNode::Token(self.bump()));
                }
                Ok(self.node(Rule::Literal, toks))
            }
            TokenKind::Keyword if text == "true" || text == "false" => {
                let tok = self.bump();
                Ok(self.node(Rule::Literal, vec![CstNode::Token(tok)]))
            }
            TokenKind::Keyword if text == "this" || text == "parent" => self.parse_ref_expr(),
            TokenKind::Punct if text == "(" => {
                let open = self.bump();
                let inner = self.parse_expr()?;
                let close = self.expect(")")?;
                Ok(self.node(
                    Rule::ParenExpr,
                    vec![CstNode::Token(open), inner, CstNode::Token(close)],
                ))
            }
            TokenKind::Punct if text == "{" => self.parse_concat_or_replicate(),
            TokenKind::Ident => {
                if self.peek_at(1).is_some_and(|t| t.is("::")) {
                    let ty = self.bump();
                    let sep = self.bump();
                    let name = self.expect_ident()?;
                    Ok(self.node(
                        Rule::EnumRef,
                        vec![CstNode::Token(ty), CstNode::Token(sep), CstNode::Token(name)],
                    ))
                } else {
                    self.parse_ref_expr()
                }
            }
            _ => Err(self.error(format!("expected expression, found '{}'", text))),
        }
    }

    /// `a.b.c` with an optional trailing `->prop`.
    fn parse_ref_expr(&mut self) -> Result<CstNode, Diagnostic> {
        let mut path: Vec<CstNode> = vec![CstNode::Token(self.bump())];
        while self.at(".") {
            path.push(CstNode::Token(self.bump()));
            path.push(CstNode::Token(self.expect_ident()?));
        }
        let instance_ref = self.node(Rule::InstanceRef, path);
        let mut children = vec![instance_ref];
        if self.at("->") {
            children.push(CstNode::Token(self.bump()));
            children.push(CstNode::Token(self.expect_ident()?));
        }
        Ok(self.node(Rule::RefExpr, children))
    }

    /// `{a, b}` concatenation or `{N{a}}` replication, disambiguated by the
    /// token following the first inner expression.
    fn parse_concat_or_replicate(&mut self) -> Result<CstNode, Diagnostic> {
        let open = self.bump();
        let first = self.parse_expr()?;
        if self.at("{") {
            let inner_open = self.bump();
            let mut inner = vec![self.parse_expr()?];
            while self.at(",") {
                inner.push(CstNode::Token(self.bump()));
                inner.push(self.parse_expr()?);
            }
            let inner_close = self.expect("}")?;
            let concat = self.node(Rule::Concat, inner);
            let close = self.expect("}")?;
            return Ok(self.node(
                Rule::Replicate,
                vec![
                    CstNode::Token(open),
                    first,
                    CstNode::Token(inner_open),
                    concat,
                    CstNode::Token(inner_close),
                    CstNode::Token(close),
                ],
            ));
        }
        let mut children = vec![CstNode::Token(open), first];
        while self.at(",") {
            children.push(CstNode::Token(self.bump()));
            children.push(self.parse_expr()?);
        }
        children.push(CstNode::Token(self.expect("}")?));
        Ok(self.node(Rule::Concat, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_addrmap() {
        let root = parse("addrmap m { reg { field { sw=rw; } f[7:0]; } r @ 0x0; };").unwrap();
        assert_eq!(root.rule, Rule::Root);
        let def = root.find(Rule::ComponentDef).unwrap();
        let named = def.find(Rule::ComponentNamedDef).unwrap();
        assert_eq!(named.first_ident().unwrap().text, "addrmap");
        let body = named.find(Rule::ComponentBody).unwrap();
        let inner = body.find(Rule::ComponentDef).unwrap();
        assert!(inner.find(Rule::ComponentAnonDef).is_some());
        let insts = inner.find(Rule::ComponentInsts).unwrap();
        let inst = insts.find(Rule::ComponentInst).unwrap();
        assert_eq!(inst.first_ident().unwrap().text, "r");
        assert!(inst.find(Rule::InstAddrFixed).is_some());
    }

    #[test]
    fn test_parameterized_inst() {
        let root = parse(
            "regfile rf_t #(longint unsigned N=4) { reg { field { sw=rw; } f[7:0]; } r[N] @ 0x0 += 0x4; };\n\
             addrmap top { rf_t #(.N(3)) rf @ 0x100; };",
        )
        .unwrap();
        let defs: Vec<_> = root.find_all(Rule::ComponentDef).collect();
        assert_eq!(defs.len(), 2);
        let named = defs[0].find(Rule::ComponentNamedDef).unwrap();
        let params = named.find(Rule::ParamDef).unwrap();
        let elem = params.find(Rule::ParamDefElem).unwrap();
        let idents: Vec<_> = elem.tokens().map(|t| t.text.clone()).collect();
        assert!(idents.contains(&"N".to_string()));
        let top_body = defs[1]
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap();
        let explicit = top_body.find(Rule::ExplicitComponentInst).unwrap();
        assert!(explicit.find(Rule::ParamInst).is_some());
    }

    #[test]
    fn test_dynamic_assignment_forms() {
        let root = parse("addrmap m { reg { field {} a[7:0]; } r @ 0x0; r.a->reset = 0x5A; };")
            .unwrap();
        let body = root
            .find(Rule::ComponentDef)
            .unwrap()
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap();
        let dyn_assign = body.find(Rule::DynamicPropertyAssignment).unwrap();
        let iref = dyn_assign.find(Rule::InstanceRef).unwrap();
        let segs: Vec<_> = iref.tokens().filter(|t| t.text != ".").collect();
        assert_eq!(segs.len(), 2);

        // Dotted form: last segment is the property.
        let root = parse("addrmap m { reg { field {} a[7:0]; } r @ 0x0; r.a.reset = 1; };").unwrap();
        let body = root
            .find(Rule::ComponentDef)
            .unwrap()
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap();
        let dyn_assign = body.find(Rule::DynamicPropertyAssignment).unwrap();
        let iref = dyn_assign.find(Rule::InstanceRef).unwrap();
        let segs: Vec<_> = iref.tokens().filter(|t| t.text != ".").collect();
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn test_expression_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        let root = parse("addrmap m { x = 1 + 2 * 3; };").unwrap();
        let assign = root
            .find(Rule::ComponentDef)
            .unwrap()
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap()
            .find(Rule::LocalPropertyAssignment)
            .unwrap();
        let top = assign.find(Rule::BinaryExpr).unwrap();
        assert!(top.has_token("+"));
        let rhs = top.find(Rule::BinaryExpr).unwrap();
        assert!(rhs.has_token("*"));
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse("addrmap m { reg r @ ; };").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert_eq!(err.span.line, 1);
    }

    #[test]
    fn test_enum_def() {
        let root = parse("addrmap m { enum mode_e { idle = 0; busy = 1; }; };").unwrap();
        let body = root
            .find(Rule::ComponentDef)
            .unwrap()
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap();
        let enum_def = body.find(Rule::EnumDef).unwrap();
        assert_eq!(enum_def.find_all(Rule::EnumEntry).count(), 2);
    }
}
