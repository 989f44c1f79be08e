// Licensed under the Apache-2.0 license

//! Post-elaboration validation.
//!
//! Registers are checked once their parent body is complete: field bit
//! ranges must be legal and non-overlapping, and every uncovered interval
//! of the register is filled with a synthesized reserved field so that the
//! final field set partitions `[0, regwidth)`. Containers are checked for
//! sibling byte-range overlap. A final global pass asserts address
//! consistency, warns about misaligned registers, and freezes the tree.
//!
//! A register that fails its checks skips reserved-field synthesis but does
//! not abort the run; the caller sees every problem at once.

use log::debug;

use crate::diag::{Diagnostic, DiagnosticKind};
use crate::model::{ComponentKind, ElaboratedNode, NodeState};
use crate::value::PropertyValue;

/// Validate one register's bit layout and synthesize reserved fields for
/// the gaps. Called at the register's parent-body boundary, after any
/// dynamic property assignments in that body have landed.
pub(crate) fn check_register(reg: &mut ElaboratedNode, diags: &mut Vec<Diagnostic>) {
    let regwidth = reg.int_property("regwidth").unwrap_or(32);

    let mut order: Vec<usize> = (0..reg.children.len()).collect();
    order.sort_by_key(|&i| reg.children[i].lsb().unwrap_or(0));

    let mut layout_ok = true;
    for pair in order.windows(2) {
        let prev = &reg.children[pair[0]];
        let next = &reg.children[pair[1]];
        let (Some(prev_msb), Some(next_lsb)) = (prev.msb(), next.lsb()) else {
            continue;
        };
        if prev_msb >= next_lsb {
            layout_ok = false;
            diags.push(
                Diagnostic::new(
                    DiagnosticKind::FieldOverlap,
                    next.src,
                    format!(
                        "field '{}' overlaps field '{}' in register '{}'",
                        next.inst_name, prev.inst_name, reg.inst_name
                    ),
                )
                .with_related(format!("{}.{}", reg.inst_name, next.inst_name)),
            );
        }
    }
    for &i in &order {
        let field = &reg.children[i];
        if field.msb().is_some_and(|msb| msb >= regwidth) {
            layout_ok = false;
            diags.push(
                Diagnostic::new(
                    DiagnosticKind::FieldOutOfRange,
                    field.src,
                    format!(
                        "field '{}' bit {} is outside the {}-bit register '{}'",
                        field.inst_name,
                        field.msb().unwrap_or(0),
                        regwidth,
                        reg.inst_name
                    ),
                )
                .with_related(format!("{}.{}", reg.inst_name, field.inst_name)),
            );
        }
    }

    if !layout_ok {
        // Bad layouts get no synthesized fields; the run continues so other
        // registers still report their own problems.
        return;
    }

    // Fill every maximal uncovered interval of [0, regwidth).
    let mut reserved = Vec::new();
    let mut expected = 0u64;
    for &i in &order {
        let field = &reg.children[i];
        let (Some(lsb), Some(msb)) = (field.lsb(), field.msb()) else {
            continue;
        };
        if lsb > expected {
            reserved.push(make_reserved(reg, lsb - 1, expected));
        }
        expected = msb + 1;
    }
    if expected < regwidth {
        reserved.push(make_reserved(reg, regwidth - 1, expected));
    }
    if !reserved.is_empty() {
        debug!(
            "register '{}': synthesized {} reserved field(s)",
            reg.inst_name,
            reserved.len()
        );
        reg.children.append(&mut reserved);
    }
    reg.children.sort_by_key(|f| f.lsb().unwrap_or(0));

    // The final field set must partition the register exactly.
    let covered: u64 = reg.children.iter().filter_map(|f| f.width()).sum();
    if covered != regwidth {
        diags.push(Diagnostic::new(
            DiagnosticKind::Unsupported,
            reg.src,
            format!(
                "internal: register '{}' covers {} of {} bits after synthesis",
                reg.inst_name, covered, regwidth
            ),
        ));
        return;
    }

    for field in &mut reg.children {
        field.state = NodeState::Validated;
    }
    reg.state = NodeState::Validated;
}

fn make_reserved(reg: &ElaboratedNode, msb: u64, lsb: u64) -> ElaboratedNode {
    let mut field = ElaboratedNode::new(
        ComponentKind::Field,
        &format!("RESERVED_{}_{}", msb, lsb),
        "",
        reg.src,
    );
    field.absolute_address = reg.absolute_address;
    field.set_property("sw", PropertyValue::enumerator("AccessType", "r", 3));
    field.set_property("hw", PropertyValue::enumerator("AccessType", "na", 0));
    field.set_property("desc", PropertyValue::Str("reserved".to_string()));
    field.set_property("width", PropertyValue::Int((msb - lsb + 1) as i64));
    field.set_property("lsb", PropertyValue::Int(lsb as i64));
    field.set_property("msb", PropertyValue::Int(msb as i64));
    field.state = NodeState::Validated;
    field
}

/// Check sibling byte ranges inside one container.
pub(crate) fn check_container(node: &ElaboratedNode, diags: &mut Vec<Diagnostic>) {
    let mut order: Vec<usize> = (0..node.children.len()).collect();
    order.sort_by_key(|&i| node.children[i].absolute_address);
    for pair in order.windows(2) {
        let prev = &node.children[pair[0]];
        let next = &node.children[pair[1]];
        if prev.end_address() > next.absolute_address {
            diags.push(
                Diagnostic::new(
                    DiagnosticKind::AddressOverlap,
                    next.src,
                    format!(
                        "'{}' at {:#x} overlaps '{}' ending at {:#x}",
                        next.inst_name,
                        next.absolute_address,
                        prev.inst_name,
                        prev.end_address()
                    ),
                )
                .with_related(format!(
                    "{}.{} / {}.{}",
                    node.inst_name, prev.inst_name, node.inst_name, next.inst_name
                )),
            );
        }
    }
}

/// Global pass: address monotonic consistency, misalignment warnings, and
/// the transition to the immutable `Finalized` state.
pub(crate) fn finalize(root: &mut ElaboratedNode, diags: &mut Vec<Diagnostic>) {
    fn walk(node: &mut ElaboratedNode, parent_addr: u64, diags: &mut Vec<Diagnostic>) {
        if node.absolute_address < parent_addr {
            diags.push(Diagnostic::new(
                DiagnosticKind::Unsupported,
                node.src,
                format!(
                    "internal: '{}' at {:#x} sits below its parent at {:#x}",
                    node.inst_name, node.absolute_address, parent_addr
                ),
            ));
        }
        if node.kind == ComponentKind::Reg {
            let alignment = node.size.max(1).next_power_of_two();
            if node.absolute_address % alignment != 0 {
                diags.push(Diagnostic::new(
                    DiagnosticKind::MisalignedAddress,
                    node.src,
                    format!(
                        "register '{}' at {:#x} is not aligned to its {}-byte span",
                        node.inst_name, node.absolute_address, alignment
                    ),
                ));
            }
        }
        let addr = node.absolute_address;
        for child in &mut node.children {
            walk(child, addr, diags);
        }
        node.state = NodeState::Finalized;
    }
    walk(root, root.absolute_address, diags);
}

/// Re-run the full validation suite over an already elaborated tree.
/// Validation is idempotent: a clean tree gains no diagnostics and no new
/// reserved fields.
pub fn validate(root: &mut ElaboratedNode) -> Vec<Diagnostic> {
    fn walk(node: &mut ElaboratedNode, diags: &mut Vec<Diagnostic>) {
        if node.kind == ComponentKind::Reg {
            check_register(node, diags);
        }
        if node.kind.is_container() {
            check_container(node, diags);
        }
        for child in &mut node.children {
            walk(child, diags);
        }
    }
    let mut diags = Vec::new();
    walk(root, &mut diags);
    finalize(root, &mut diags);
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Span;

    fn field(name: &str, msb: u64, lsb: u64) -> ElaboratedNode {
        let mut f = ElaboratedNode::new(ComponentKind::Field, name, "", Span::default());
        f.set_property("width", PropertyValue::Int((msb - lsb + 1) as i64));
        f.set_property("lsb", PropertyValue::Int(lsb as i64));
        f.set_property("msb", PropertyValue::Int(msb as i64));
        f
    }

    fn reg_with(fields: Vec<ElaboratedNode>) -> ElaboratedNode {
        let mut reg = ElaboratedNode::new(ComponentKind::Reg, "r", "", Span::default());
        reg.set_property("regwidth", PropertyValue::Int(32));
        reg.size = 4;
        reg.children = fields;
        reg
    }

    #[test]
    fn test_gap_synthesis_counts_maximal_intervals() {
        let mut reg = reg_with(vec![
            field("ctrl", 0, 0),
            field("status", 7, 4),
            field("data", 23, 16),
            field("enable", 31, 31),
        ]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        assert!(diags.is_empty());
        let reserved: Vec<&str> = reg
            .children
            .iter()
            .filter(|f| f.inst_name.starts_with("RESERVED"))
            .map(|f| f.inst_name.as_str())
            .collect();
        assert_eq!(reserved, vec!["RESERVED_3_1", "RESERVED_15_8", "RESERVED_30_24"]);
        let total: u64 = reg.children.iter().filter_map(|f| f.width()).sum();
        assert_eq!(total, 32);
    }

    #[test]
    fn test_empty_register_gets_single_reserved() {
        let mut reg = reg_with(vec![]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        assert_eq!(reg.children.len(), 1);
        assert_eq!(reg.children[0].inst_name, "RESERVED_31_0");
    }

    #[test]
    fn test_full_register_gets_nothing() {
        let mut reg = reg_with(vec![field("all", 31, 0)]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        assert_eq!(reg.children.len(), 1);
    }

    #[test]
    fn test_overlap_blocks_synthesis() {
        let mut reg = reg_with(vec![field("a", 7, 0), field("b", 3, 0)]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::FieldOverlap);
        assert!(diags[0].message.contains("'a'") && diags[0].message.contains("'b'"));
        assert_eq!(reg.children.len(), 2, "no reserved fields on a bad layout");
    }

    #[test]
    fn test_out_of_range() {
        let mut reg = reg_with(vec![field("wide", 35, 0)]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        assert_eq!(diags[0].kind, DiagnosticKind::FieldOutOfRange);
    }

    #[test]
    fn test_container_overlap() {
        let mut map = ElaboratedNode::new(ComponentKind::AddrMap, "m", "", Span::default());
        let mut a = ElaboratedNode::new(ComponentKind::Reg, "regA", "", Span::default());
        a.size = 4;
        let mut b = ElaboratedNode::new(ComponentKind::Reg, "regB", "", Span::default());
        b.absolute_address = 2;
        b.size = 4;
        map.children = vec![a, b];
        let mut diags = Vec::new();
        check_container(&map, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::AddressOverlap);
        assert!(diags[0].message.contains("regA") && diags[0].message.contains("regB"));
    }

    #[test]
    fn test_validation_idempotent() {
        let mut reg = reg_with(vec![field("ctrl", 3, 0)]);
        let mut diags = Vec::new();
        check_register(&mut reg, &mut diags);
        let count = reg.children.len();
        let diags = validate(&mut reg);
        assert!(diags.is_empty());
        assert_eq!(reg.children.len(), count);
    }

    #[test]
    fn test_misaligned_register_warns() {
        let mut map = ElaboratedNode::new(ComponentKind::AddrMap, "m", "", Span::default());
        let mut reg = reg_with(vec![field("all", 31, 0)]);
        reg.absolute_address = 2;
        map.children = vec![reg];
        let mut diags = Vec::new();
        finalize(&mut map, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::MisalignedAddress);
        assert!(!diags[0].is_error());
    }
}
