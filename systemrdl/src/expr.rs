// Licensed under the Apache-2.0 license

//! Constant expression evaluation.
//!
//! Reduces a parse-tree expression to a concrete [`PropertyValue`].
//! Arithmetic is 64-bit two's-complement. Width is tracked where the source
//! carries an explicit width (sized literals, concatenation, replication);
//! shifts and bitwise operators truncate at the operand width. Anything the
//! expression needs from its surroundings (parameters, enum definitions,
//! previously elaborated instances) comes through the [`EvalEnv`] trait,
//! which the elaborator implements.

use crate::bits::{self, NumberError};
use crate::cst::{Rule, RuleNode};
use crate::diag::{Diagnostic, DiagnosticKind, Span};
use crate::registry::EnumDefInfo;
use crate::schema;
use crate::token::{Token, TokenKind};
use crate::value::PropertyValue;

/// Name resolution hooks for expression evaluation.
pub(crate) trait EvalEnv {
    fn lookup_param(&self, name: &str) -> Option<PropertyValue>;
    fn lookup_enum(&self, type_name: &str) -> Option<&EnumDefInfo>;
    /// Resolve an instance reference (`a.b`, optionally `->prop`) against
    /// the in-progress elaborated tree.
    fn resolve_ref(&self, segs: &[&Token], prop: Option<&Token>) -> Result<PropertyValue, Diagnostic>;
}

/// Environment with nothing in scope; used where expressions must already be
/// self-contained (enum entry values, tests).
pub(crate) struct EmptyEnv;

impl EvalEnv for EmptyEnv {
    fn lookup_param(&self, _name: &str) -> Option<PropertyValue> {
        None
    }
    fn lookup_enum(&self, _type_name: &str) -> Option<&EnumDefInfo> {
        None
    }
    fn resolve_ref(&self, segs: &[&Token], _prop: Option<&Token>) -> Result<PropertyValue, Diagnostic> {
        let first = segs.first().expect("empty instance reference");
        Err(Diagnostic::new(
            DiagnosticKind::UnresolvedName,
            first.span(),
            format!("cannot resolve '{}' in this context", first.text),
        ))
    }
}

/// Evaluation result with optional width tracking.
#[derive(Clone, Debug)]
struct Evaluated {
    value: PropertyValue,
    width: Option<u32>,
}

impl Evaluated {
    fn plain(value: PropertyValue) -> Self {
        Evaluated { value, width: None }
    }
}

pub(crate) fn eval(node: &RuleNode, env: &dyn EvalEnv) -> Result<PropertyValue, Diagnostic> {
    eval_sized(node, env).map(|e| e.value)
}

/// Integer view of a value: integers, booleans, and enumerators (their
/// underlying value) all count.
fn int_of(value: &PropertyValue) -> Option<i64> {
    value.as_int().or_else(|| value.as_enum().map(|e| e.value))
}

/// Evaluate and require an integer result.
pub(crate) fn eval_int(node: &RuleNode, env: &dyn EvalEnv) -> Result<i64, Diagnostic> {
    let value = eval(node, env)?;
    int_of(&value).ok_or_else(|| {
        Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            node.start,
            format!("expected an integer value, got {}", value.kind_name()),
        )
    })
}

pub(crate) fn eval_u64(node: &RuleNode, env: &dyn EvalEnv) -> Result<u64, Diagnostic> {
    let v = eval_int(node, env)?;
    if v < 0 {
        return Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            node.start,
            format!("expected a non-negative value, got {}", v),
        ));
    }
    Ok(v as u64)
}

fn eval_sized(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    match node.rule {
        Rule::Literal => eval_literal(node),
        Rule::ParenExpr => eval_sized(expect_sub(node, 0)?, env),
        Rule::UnaryExpr => eval_unary(node, env),
        Rule::BinaryExpr => eval_binary(node, env),
        Rule::TernaryExpr => {
            let cond = eval_sized(expect_sub(node, 0)?, env)?;
            if cond.value.is_truthy() {
                eval_sized(expect_sub(node, 1)?, env)
            } else {
                eval_sized(expect_sub(node, 2)?, env)
            }
        }
        Rule::Concat => eval_concat(node, env),
        Rule::Replicate => eval_replicate(node, env),
        Rule::EnumRef => eval_enum_ref(node, env),
        Rule::RefExpr => eval_ref(node, env),
        other => Err(Diagnostic::new(
            DiagnosticKind::Unsupported,
            node.start,
            format!("rule '{}' is not a constant expression", other.name()),
        )),
    }
}

fn expect_sub(node: &RuleNode, index: usize) -> Result<&RuleNode, Diagnostic> {
    node.rules().nth(index).ok_or_else(|| {
        Diagnostic::new(
            DiagnosticKind::Unsupported,
            node.start,
            "malformed expression node",
        )
    })
}

fn eval_literal(node: &RuleNode) -> Result<Evaluated, Diagnostic> {
    let first = node.tokens().next().ok_or_else(|| {
        Diagnostic::new(DiagnosticKind::Unsupported, node.start, "empty literal")
    })?;
    match first.kind {
        TokenKind::StrLit => {
            // Adjacent string literals concatenate.
            let text: String = node.tokens().map(|t| t.text.as_str()).collect();
            Ok(Evaluated::plain(PropertyValue::Str(text)))
        }
        TokenKind::Number | TokenKind::SizedNumber => {
            let parsed = bits::parse_number(&first.text).map_err(|e| match e {
                NumberError::Overflow(msg) => {
                    Diagnostic::new(DiagnosticKind::OverflowInWidth, first.span(), msg)
                }
                NumberError::Malformed(msg) => {
                    Diagnostic::new(DiagnosticKind::SyntaxError, first.span(), msg)
                }
            })?;
            Ok(Evaluated {
                value: PropertyValue::Int(parsed.value as i64),
                width: parsed.width,
            })
        }
        TokenKind::Keyword if first.text == "true" => {
            Ok(Evaluated::plain(PropertyValue::Bool(true)))
        }
        TokenKind::Keyword if first.text == "false" => {
            Ok(Evaluated::plain(PropertyValue::Bool(false)))
        }
        _ => Err(Diagnostic::new(
            DiagnosticKind::Unsupported,
            first.span(),
            format!("unexpected literal '{}'", first.text),
        )),
    }
}

fn as_num(value: &PropertyValue, span: Span) -> Result<i64, Diagnostic> {
    int_of(value).ok_or_else(|| {
        Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            span,
            format!("expected an integer operand, got {}", value.kind_name()),
        )
    })
}

fn eval_unary(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let op = node.tokens().next().expect("unary node without operator");
    let operand = eval_sized(expect_sub(node, 0)?, env)?;
    let span = node.start;
    match op.text.as_str() {
        "!" => Ok(Evaluated::plain(PropertyValue::Bool(
            !operand.value.is_truthy(),
        ))),
        "~" => match &operand.value {
            PropertyValue::Bool(b) => Ok(Evaluated::plain(PropertyValue::Bool(!b))),
            _ => {
                let v = as_num(&operand.value, span)?;
                let w = operand.width.unwrap_or(64);
                Ok(Evaluated {
                    value: PropertyValue::Int(bits::mask(!(v as u64), w) as i64),
                    width: operand.width,
                })
            }
        },
        "-" => {
            let v = as_num(&operand.value, span)?;
            Ok(Evaluated {
                value: PropertyValue::Int(v.wrapping_neg()),
                width: operand.width,
            })
        }
        "+" => {
            as_num(&operand.value, span)?;
            Ok(operand)
        }
        other => Err(Diagnostic::new(
            DiagnosticKind::Unsupported,
            span,
            format!("unary operator '{}'", other),
        )),
    }
}

fn combine_width(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

fn eval_binary(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let op = node.tokens().next().expect("binary node without operator");
    let span = op.span();

    // Logical operators short-circuit so that the untaken side is never
    // evaluated.
    if op.text == "&&" || op.text == "||" {
        let lhs = eval_sized(expect_sub(node, 0)?, env)?;
        let lhs_true = lhs.value.is_truthy();
        if (op.text == "&&" && !lhs_true) || (op.text == "||" && lhs_true) {
            return Ok(Evaluated::plain(PropertyValue::Bool(lhs_true)));
        }
        let rhs = eval_sized(expect_sub(node, 1)?, env)?;
        return Ok(Evaluated::plain(PropertyValue::Bool(rhs.value.is_truthy())));
    }

    let lhs = eval_sized(expect_sub(node, 0)?, env)?;
    let rhs = eval_sized(expect_sub(node, 1)?, env)?;

    match op.text.as_str() {
        "==" | "!=" => {
            let equal = match (lhs.value.as_int(), rhs.value.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => {
                    if lhs.value.kind_name() != rhs.value.kind_name() {
                        return Err(Diagnostic::new(
                            DiagnosticKind::TypeMismatch,
                            span,
                            format!(
                                "cannot compare {} with {}",
                                lhs.value.kind_name(),
                                rhs.value.kind_name()
                            ),
                        ));
                    }
                    lhs.value == rhs.value
                }
            };
            Ok(Evaluated::plain(PropertyValue::Bool(
                equal == (op.text == "=="),
            )))
        }
        "<" | "<=" | ">" | ">=" => {
            let a = as_num(&lhs.value, span)?;
            let b = as_num(&rhs.value, span)?;
            let result = match op.text.as_str() {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            };
            Ok(Evaluated::plain(PropertyValue::Bool(result)))
        }
        "<<" | ">>" => {
            let a = as_num(&lhs.value, span)?;
            let s = as_num(&rhs.value, span)?;
            if s < 0 {
                return Err(Diagnostic::new(
                    DiagnosticKind::BadShift,
                    span,
                    format!("negative shift count {}", s),
                ));
            }
            let w = lhs.width.unwrap_or(64);
            let value = if s >= 64 {
                0
            } else if op.text == "<<" {
                bits::mask((a as u64) << s, w)
            } else {
                bits::mask(a as u64, w) >> s
            };
            Ok(Evaluated {
                value: PropertyValue::Int(value as i64),
                width: lhs.width,
            })
        }
        "&" | "|" | "^" | "~^" | "^~" => {
            let a = as_num(&lhs.value, span)? as u64;
            let b = as_num(&rhs.value, span)? as u64;
            let width = combine_width(lhs.width, rhs.width);
            let raw = match op.text.as_str() {
                "&" => a & b,
                "|" => a | b,
                _ if op.text == "^" => a ^ b,
                _ => !(a ^ b), // xnor
            };
            let value = width.map_or(raw, |w| bits::mask(raw, w));
            Ok(Evaluated {
                value: PropertyValue::Int(value as i64),
                width,
            })
        }
        "+" | "-" | "*" | "/" | "%" => {
            let a = as_num(&lhs.value, span)?;
            let b = as_num(&rhs.value, span)?;
            if (op.text == "/" || op.text == "%") && b == 0 {
                return Err(Diagnostic::new(
                    DiagnosticKind::DivisionByZero,
                    span,
                    "division by zero in constant expression",
                ));
            }
            let value = match op.text.as_str() {
                "+" => a.wrapping_add(b),
                "-" => a.wrapping_sub(b),
                "*" => a.wrapping_mul(b),
                "/" => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            };
            Ok(Evaluated {
                value: PropertyValue::Int(value),
                width: combine_width(lhs.width, rhs.width),
            })
        }
        "**" => {
            let a = as_num(&lhs.value, span)?;
            let b = as_num(&rhs.value, span)?;
            if b < 0 {
                return Err(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    span,
                    "negative exponent in constant expression",
                ));
            }
            let exp = u32::try_from(b).map_err(|_| {
                Diagnostic::new(
                    DiagnosticKind::OverflowInWidth,
                    span,
                    format!("exponent {} is too large", b),
                )
            })?;
            Ok(Evaluated {
                value: PropertyValue::Int(a.wrapping_pow(exp)),
                width: combine_width(lhs.width, rhs.width),
            })
        }
        other => Err(Diagnostic::new(
            DiagnosticKind::Unsupported,
            span,
            format!("binary operator '{}'", other),
        )),
    }
}

fn eval_concat(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let mut total_width: u32 = 0;
    let mut acc: u64 = 0;
    for operand in node.rules() {
        let part = eval_sized(operand, env)?;
        let Some(w) = part.width else {
            return Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                operand.start,
                "concatenation operands must carry an explicit width",
            ));
        };
        let v = as_num(&part.value, operand.start)? as u64;
        total_width += w;
        if total_width > 64 {
            return Err(Diagnostic::new(
                DiagnosticKind::OverflowInWidth,
                node.start,
                format!("concatenation width {} exceeds 64 bits", total_width),
            ));
        }
        acc = (acc << w) | bits::mask(v, w);
    }
    Ok(Evaluated {
        value: PropertyValue::Int(acc as i64),
        width: Some(total_width),
    })
}

fn eval_replicate(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let count_node = expect_sub(node, 0)?;
    let count = eval_int(count_node, env)?;
    if count < 0 {
        return Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            count_node.start,
            format!("negative replication count {}", count),
        ));
    }
    let inner = eval_sized(expect_sub(node, 1)?, env)?;
    let Some(w) = inner.width else {
        return Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            node.start,
            "replication operand must carry an explicit width",
        ));
    };
    let total = (count as u64).checked_mul(u64::from(w)).unwrap_or(u64::MAX);
    if total > 64 {
        return Err(Diagnostic::new(
            DiagnosticKind::OverflowInWidth,
            node.start,
            format!("replication width {} exceeds 64 bits", total),
        ));
    }
    let v = bits::mask(as_num(&inner.value, node.start)? as u64, w);
    let mut acc: u64 = 0;
    for _ in 0..count {
        acc = (acc << w) | v;
    }
    Ok(Evaluated {
        value: PropertyValue::Int(acc as i64),
        width: Some(total as u32),
    })
}

fn eval_enum_ref(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let mut idents = node.tokens().filter(|t| t.kind == TokenKind::Ident);
    let type_tok = idents.next().expect("enum ref without type");
    let name_tok = idents.next().expect("enum ref without variant");
    if let Some(def) = env.lookup_enum(&type_tok.text) {
        let Some(value) = def.variant(&name_tok.text) else {
            return Err(Diagnostic::new(
                DiagnosticKind::UnresolvedName,
                name_tok.span(),
                format!("enum '{}' has no variant '{}'", type_tok.text, name_tok.text),
            ));
        };
        return Ok(Evaluated::plain(PropertyValue::enumerator(
            &type_tok.text,
            &name_tok.text,
            value,
        )));
    }
    // Qualified reference to a predefined enumeration, e.g. AccessType::rw.
    if let Some(value) = schema::builtin_enum_value(&name_tok.text) {
        if value.as_enum().map(|e| e.type_name.as_str()) == Some(type_tok.text.as_str()) {
            return Ok(Evaluated::plain(value));
        }
    }
    Err(Diagnostic::new(
        DiagnosticKind::UnresolvedName,
        type_tok.span(),
        format!("unknown enum type '{}'", type_tok.text),
    ))
}

fn eval_ref(node: &RuleNode, env: &dyn EvalEnv) -> Result<Evaluated, Diagnostic> {
    let iref = node.find(Rule::InstanceRef).ok_or_else(|| {
        Diagnostic::new(DiagnosticKind::Unsupported, node.start, "malformed reference")
    })?;
    let segs: Vec<&Token> = iref.tokens().filter(|t| !t.is(".")).collect();
    let prop = node.tokens().find(|t| t.kind == TokenKind::Ident);

    if segs.len() == 1 && prop.is_none() {
        let name = &segs[0].text;
        if let Some(value) = env.lookup_param(name) {
            return Ok(Evaluated::plain(value));
        }
        if let Some(value) = schema::builtin_enum_value(name) {
            return Ok(Evaluated::plain(value));
        }
    }
    env.resolve_ref(&segs, prop).map(Evaluated::plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Parse `src` as a property RHS and hand back the expression node.
    fn expr_tree(src: &str) -> crate::cst::RuleNode {
        let root = parse(&format!("addrmap m {{ x = {}; }};", src)).unwrap();
        let assign = root
            .find(Rule::ComponentDef)
            .unwrap()
            .find(Rule::ComponentNamedDef)
            .unwrap()
            .find(Rule::ComponentBody)
            .unwrap()
            .find(Rule::LocalPropertyAssignment)
            .unwrap()
            .clone();
        let result = assign.rules().next().unwrap().clone();
        result
    }

    fn eval_src(src: &str) -> Result<PropertyValue, Diagnostic> {
        eval(&expr_tree(src), &EmptyEnv)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval_src("1 + 2 * 3").unwrap(), PropertyValue::Int(7));
        assert_eq!(eval_src("(1 + 2) * 3").unwrap(), PropertyValue::Int(9));
        assert_eq!(eval_src("10 % 4").unwrap(), PropertyValue::Int(2));
        assert_eq!(eval_src("2 ** 10").unwrap(), PropertyValue::Int(1024));
        assert_eq!(eval_src("-5 + 3").unwrap(), PropertyValue::Int(-2));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_src("4 / 0").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::DivisionByZero);
        let err = eval_src("4 % 0").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::DivisionByZero);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(eval_src("1 << 4").unwrap(), PropertyValue::Int(16));
        assert_eq!(eval_src("0x100 >> 8").unwrap(), PropertyValue::Int(1));
        // Shifts truncate at the operand width.
        assert_eq!(eval_src("4'hF << 1").unwrap(), PropertyValue::Int(0xE));
        let err = eval_src("1 << (0 - 1)").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::BadShift);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_src("3 < 4").unwrap(), PropertyValue::Bool(true));
        assert_eq!(eval_src("3 == 4").unwrap(), PropertyValue::Bool(false));
        assert_eq!(eval_src("true && false").unwrap(), PropertyValue::Bool(false));
        assert_eq!(eval_src("true || false").unwrap(), PropertyValue::Bool(true));
        assert_eq!(eval_src("!0").unwrap(), PropertyValue::Bool(true));
        // Short-circuit skips the divide.
        assert_eq!(eval_src("false && (1 / 0 == 0)").unwrap(), PropertyValue::Bool(false));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval_src("1 < 2 ? 10 : 20").unwrap(), PropertyValue::Int(10));
        assert_eq!(eval_src("0 ? 10 : 20").unwrap(), PropertyValue::Int(20));
    }

    #[test]
    fn test_sized_literal_overflow() {
        let err = eval_src("4'h1F").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::OverflowInWidth);
    }

    #[test]
    fn test_concat_and_replicate() {
        assert_eq!(eval_src("{4'hA, 4'h5}").unwrap(), PropertyValue::Int(0xA5));
        assert_eq!(eval_src("{3{4'h7}}").unwrap(), PropertyValue::Int(0x777));
        // Unsized operands cannot concatenate.
        let err = eval_src("{1, 2}").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::TypeMismatch);
        // Width overflow.
        let err = eval_src("{17{4'hF}}").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::OverflowInWidth);
    }

    #[test]
    fn test_string_adjacency() {
        assert_eq!(
            eval_src("\"ab\" \"cd\"").unwrap(),
            PropertyValue::Str("abcd".to_string())
        );
    }

    #[test]
    fn test_builtin_access_literal() {
        let v = eval_src("rw").unwrap();
        assert_eq!(v.as_enum().unwrap().type_name, "AccessType");
        let v = eval_src("na").unwrap();
        assert_eq!(v.as_enum().unwrap().name, "na");
    }

    #[test]
    fn test_unresolved_reference() {
        let err = eval_src("no_such_param + 1").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::UnresolvedName);
    }

    #[test]
    fn test_bitwise_with_width() {
        assert_eq!(eval_src("4'hC & 4'hA").unwrap(), PropertyValue::Int(0x8));
        assert_eq!(eval_src("4'hC ~^ 4'hA").unwrap(), PropertyValue::Int(0x9));
        assert_eq!(eval_src("~4'h0").unwrap(), PropertyValue::Int(0xF));
    }
}
