// Licensed under the Apache-2.0 license

//! End-to-end tests: literal SystemRDL inputs driven through parse,
//! elaboration, validation, and JSON serialization.

use crate::diag::DiagnosticKind;
use crate::model::{address_map, ComponentKind, ElaboratedNode};
use crate::value::PropertyValue;
use crate::{elaborate_source, json, validate, Diagnostic};

fn elaborate_ok(src: &str) -> ElaboratedNode {
    let result = elaborate_source(src, "test.rdl");
    for diag in &result.diagnostics {
        println!("{}", diag);
    }
    assert!(
        !result.has_errors(),
        "unexpected elaboration errors: {:?}",
        result.diagnostics
    );
    result.root.expect("no root despite clean run")
}

fn elaborate_err(src: &str) -> Vec<Diagnostic> {
    let result = elaborate_source(src, "test.rdl");
    assert!(result.has_errors(), "expected elaboration to fail");
    assert!(result.root.is_none(), "root must be absent on error");
    result.diagnostics
}

fn enum_name(node: &ElaboratedNode, prop: &str) -> String {
    node.get_property(prop)
        .and_then(PropertyValue::as_enum)
        .map(|e| e.name.clone())
        .unwrap_or_default()
}

/// Every register's fields must partition [0, regwidth).
fn assert_field_partition(node: &ElaboratedNode) {
    if node.kind == ComponentKind::Reg {
        let regwidth = node.int_property("regwidth").unwrap();
        let mut expected = 0;
        for field in &node.children {
            assert_eq!(field.lsb().unwrap(), expected, "gap in '{}'", node.inst_name);
            assert_eq!(
                field.width().unwrap(),
                field.msb().unwrap() - field.lsb().unwrap() + 1
            );
            expected = field.msb().unwrap() + 1;
        }
        assert_eq!(expected, regwidth, "register '{}' not covered", node.inst_name);
    }
    for child in &node.children {
        assert_field_partition(child);
    }
}

#[test]
fn test_simple_two_register_chip() {
    let root = elaborate_ok(
        r#"
addrmap simple_chip {
  reg { field { sw=rw; } data[31:0]; } reg1 @ 0x0;
  reg { field { sw=rw; } status[7:0]; } reg2 @ 0x4;
};
"#,
    );
    assert_eq!(root.kind, ComponentKind::AddrMap);
    assert_eq!(root.inst_name, "simple_chip");
    assert_eq!(root.absolute_address, 0x0);
    assert_eq!(root.size, 8);
    assert_eq!(root.children.len(), 2);

    let reg1 = &root.children[0];
    assert_eq!((reg1.inst_name.as_str(), reg1.absolute_address, reg1.size), ("reg1", 0x0, 4));
    assert_eq!(reg1.children.len(), 1, "full coverage needs no reserved field");
    assert_eq!(reg1.children[0].inst_name, "data");
    assert_eq!(enum_name(&reg1.children[0], "sw"), "rw");

    let reg2 = &root.children[1];
    assert_eq!((reg2.inst_name.as_str(), reg2.absolute_address, reg2.size), ("reg2", 0x4, 4));
    assert_eq!(reg2.children.len(), 2);
    let reserved = &reg2.children[1];
    assert_eq!(reserved.inst_name, "RESERVED_31_8");
    assert_eq!((reserved.lsb(), reserved.msb(), reserved.width()), (Some(8), Some(31), Some(24)));
    assert_eq!(enum_name(reserved, "sw"), "r");
    assert_eq!(enum_name(reserved, "hw"), "na");
    assert_eq!(reserved.get_property("desc"), Some(&PropertyValue::Str("reserved".into())));

    assert_field_partition(&root);
}

#[test]
fn test_bit_gap_synthesis() {
    let root = elaborate_ok(
        r#"
addrmap m {
  reg {
    field { sw=rw; } ctrl[0:0];
    field { sw=rw; } status[7:4];
    field { sw=rw; } data[23:16];
    field { sw=rw; } enable[31:31];
  } r @ 0x0;
};
"#,
    );
    let reg = &root.children[0];
    let reserved: Vec<(&str, u64)> = reg
        .children
        .iter()
        .filter(|f| f.inst_name.starts_with("RESERVED"))
        .map(|f| (f.inst_name.as_str(), f.width().unwrap()))
        .collect();
    assert_eq!(
        reserved,
        vec![("RESERVED_3_1", 3), ("RESERVED_15_8", 8), ("RESERVED_30_24", 7)]
    );
    for f in &reg.children {
        if f.inst_name.starts_with("RESERVED") {
            assert_eq!(enum_name(f, "sw"), "r");
            assert_eq!(enum_name(f, "hw"), "na");
        }
    }
    assert_field_partition(&root);
}

#[test]
fn test_field_overlap_fails() {
    let diags = elaborate_err(
        "addrmap m { reg { field { sw=rw; } a[7:0]; field { sw=rw; } b[3:0]; } r @ 0x0; };",
    );
    let overlap = diags
        .iter()
        .find(|d| d.kind == DiagnosticKind::FieldOverlap)
        .expect("missing FieldOverlap");
    assert!(overlap.message.contains("'a'") && overlap.message.contains("'b'"));
}

#[test]
fn test_register_overlap_fails() {
    let diags = elaborate_err(
        r#"
addrmap m {
  reg { field { sw=rw; } f[31:0]; } regA @ 0x0;
  reg { field { sw=rw; } f[31:0]; } regB @ 0x2;
};
"#,
    );
    let overlap = diags
        .iter()
        .find(|d| d.kind == DiagnosticKind::AddressOverlap)
        .expect("missing AddressOverlap");
    assert!(overlap.message.contains("regA") && overlap.message.contains("regB"));
}

#[test]
fn test_parameterized_regfile_array() {
    let root = elaborate_ok(
        r#"
regfile rf_t #(longint unsigned N=4) { reg { field { sw=rw; } f[7:0]; } r[N] @ 0x0 += 0x4; };
addrmap top { rf_t #(.N(3)) rf @ 0x100; };
"#,
    );
    assert_eq!(root.inst_name, "top");
    let rf = root.find_child("rf").unwrap();
    assert_eq!(rf.absolute_address, 0x100);
    assert_eq!(rf.size, 0xC);
    assert_eq!(rf.type_name, "rf_t");

    let r = rf.find_child("r").unwrap();
    assert_eq!(r.array_dimensions, vec![3]);
    assert_eq!(r.array_stride, vec![4]);
    assert_eq!(r.size, 4);
    assert_eq!(r.element_address(&[0]), Some(0x100));
    assert_eq!(r.element_address(&[1]), Some(0x104));
    assert_eq!(r.element_address(&[2]), Some(0x108));
    assert_eq!(r.element_address(&[3]), None);
}

#[test]
fn test_parameter_default_applies() {
    let root = elaborate_ok(
        r#"
regfile rf_t #(longint unsigned N=4) { reg { field { sw=rw; } f[7:0]; } r[N] @ 0x0; };
addrmap top { rf_t rf @ 0x0; };
"#,
    );
    let rf = root.find_child("rf").unwrap();
    assert_eq!(rf.find_child("r").unwrap().array_dimensions, vec![4]);
    assert_eq!(rf.size, 0x10);
}

#[test]
fn test_dynamic_property_assignment() {
    let root = elaborate_ok(
        "addrmap m { reg { field { sw=rw; } a[7:0]; } r @ 0x0; r.a->reset = 0x5A; };",
    );
    let a = root.find_child("r").unwrap().find_child("a").unwrap();
    assert_eq!(a.get_property("reset"), Some(&PropertyValue::Int(0x5A)));
}

#[test]
fn test_dynamic_assignment_dotted_form() {
    let root = elaborate_ok(
        "addrmap m { reg { field { sw=rw; } a[7:0]; } r @ 0x0; r.a.reset = 3; };",
    );
    let a = root.find_child("r").unwrap().find_child("a").unwrap();
    assert_eq!(a.get_property("reset"), Some(&PropertyValue::Int(3)));
}

#[test]
fn test_forward_reference_rejected() {
    let diags = elaborate_err(
        "addrmap m { r.a->reset = 1; reg { field { sw=rw; } a[7:0]; } r @ 0x0; };",
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::ForwardReference));
}

#[test]
fn test_unknown_instance_in_dynamic_assignment() {
    let diags = elaborate_err(
        "addrmap m { q.a->reset = 1; reg { field { sw=rw; } a[7:0]; } r @ 0x0; };",
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::UnresolvedName));
}

#[test]
fn test_empty_register_boundary() {
    let root = elaborate_ok("addrmap m { reg { } r @ 0x0; };");
    let reg = &root.children[0];
    assert_eq!(reg.children.len(), 1);
    assert_eq!(reg.children[0].inst_name, "RESERVED_31_0");
    assert_field_partition(&root);
}

#[test]
fn test_zero_array_dimension_fails() {
    let diags = elaborate_err("addrmap m { reg { field { sw=rw; } f[7:0]; } r[0] @ 0x0; };");
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::BadParameter));
}

#[test]
fn test_odd_regwidth_size_rounds_up() {
    let root = elaborate_ok(
        "addrmap m { reg { regwidth = 24; field { sw=rw; } f[23:0]; } r @ 0x0; };",
    );
    assert_eq!(root.children[0].size, 3);
}

#[test]
fn test_default_property_cascade() {
    let root = elaborate_ok(
        r#"
addrmap m {
  default sw = r;
  reg {
    field { } quiet[3:0];
    field { sw = w; } loud[7:4];
  } r1 @ 0x0;
};
"#,
    );
    let r1 = root.find_child("r1").unwrap();
    assert_eq!(enum_name(r1.find_child("quiet").unwrap(), "sw"), "r");
    assert_eq!(
        enum_name(r1.find_child("loud").unwrap(), "sw"),
        "w",
        "explicit assignment beats the cascaded default"
    );
}

#[test]
fn test_illegal_child_rejected() {
    let diags = elaborate_err("addrmap m { field { sw=rw; } f[7:0]; };");
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::IllegalChild));
}

#[test]
fn test_duplicate_type_rejected() {
    let diags = elaborate_err(
        r#"
addrmap m {
  reg t { field { sw=rw; } f[7:0]; };
  reg t { field { sw=rw; } f[7:0]; };
  t x @ 0x0;
};
"#,
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::DuplicateType));
}

#[test]
fn test_duplicate_instance_rejected() {
    let diags = elaborate_err(
        r#"
addrmap m {
  reg { field { sw=rw; } f[7:0]; } r @ 0x0;
  reg { field { sw=rw; } f[7:0]; } r @ 0x4;
};
"#,
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::DuplicateName));
}

#[test]
fn test_unresolved_type() {
    let diags = elaborate_err("addrmap m { missing_t x @ 0x0; };");
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::UnresolvedType));
}

#[test]
fn test_unknown_actual_parameter() {
    let diags = elaborate_err(
        r#"
regfile rf_t #(longint unsigned N=4) { reg { field { sw=rw; } f[7:0]; } r[N] @ 0x0; };
addrmap top { rf_t #(.M(3)) rf @ 0x0; };
"#,
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::BadParameter));
}

#[test]
fn test_compact_addressing_packs() {
    let root = elaborate_ok(
        r#"
addrmap m {
  addressing = compact;
  reg { regwidth = 24; field { sw=rw; } f[23:0]; } a @ 0x0;
  reg { field { sw=rw; } f[31:0]; } b;
};
"#,
    );
    assert_eq!(root.find_child("b").unwrap().absolute_address, 3);
}

#[test]
fn test_regalign_addressing_default() {
    let root = elaborate_ok(
        r#"
addrmap m {
  reg { regwidth = 24; field { sw=rw; } f[23:0]; } a @ 0x0;
  reg { field { sw=rw; } f[31:0]; } b;
};
"#,
    );
    assert_eq!(root.find_child("b").unwrap().absolute_address, 4);
}

#[test]
fn test_array_stride_below_element_size() {
    let diags = elaborate_err(
        "addrmap m { reg { field { sw=rw; } f[31:0]; } r[2] @ 0x0 += 0x2; };",
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::InstanceOverlap));
}

#[test]
fn test_misaligned_register_is_warning_only() {
    let result = elaborate_source(
        "addrmap m { reg { field { sw=rw; } f[31:0]; } r @ 0x2; };",
        "test.rdl",
    );
    assert!(!result.has_errors());
    assert!(result.root.is_some());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::MisalignedAddress && !d.is_error()));
}

#[test]
fn test_expression_in_property() {
    let root = elaborate_ok(
        "addrmap m { reg { regwidth = 1 << 6; field { sw=rw; } f[63:0]; } r @ 0x0; };",
    );
    assert_eq!(root.children[0].size, 8);
}

#[test]
fn test_user_enum_in_expression() {
    let root = elaborate_ok(
        r#"
addrmap m {
  enum mode_e { off = 0; on = 1; };
  reg { field { sw=rw; } f[mode_e::on + 7:0]; } r @ 0x0;
};
"#,
    );
    let f = root.children[0].find_child("f").unwrap();
    assert_eq!(f.width(), Some(9));
}

#[test]
fn test_this_property_reference() {
    let root = elaborate_ok(
        "addrmap m { reg { regwidth = 64; field { sw=rw; } f[this->regwidth - 1:0]; } r @ 0x0; };",
    );
    let f = root.children[0].find_child("f").unwrap();
    assert_eq!((f.msb(), f.lsb()), (Some(63), Some(0)));
}

#[test]
fn test_sibling_property_reference() {
    let root = elaborate_ok(
        r#"
addrmap m {
  reg { field { sw=rw; } a[7:0]; } r1 @ 0x0;
  reg { field { sw=rw; } b[r1->regwidth / 8 - 1:0]; } r2 @ 0x4;
};
"#,
    );
    let b = root.find_child("r2").unwrap().find_child("b").unwrap();
    assert_eq!((b.msb(), b.lsb()), (Some(3), Some(0)));
}

#[test]
fn test_field_reset_suffix() {
    let root = elaborate_ok(
        "addrmap m { reg { field { sw=rw; hw=r; } f[8] = 0x42; } r @ 0x0; };",
    );
    let f = root.children[0].find_child("f").unwrap();
    assert_eq!(f.get_property("reset"), Some(&PropertyValue::Int(0x42)));
    assert_eq!((f.lsb(), f.msb()), (Some(0), Some(7)));
}

#[test]
fn test_sequential_field_packing() {
    // Width-form fields pack upward from bit 0 in source order.
    let root = elaborate_ok(
        "addrmap m { reg { field { sw=rw; } a[4]; field { sw=rw; } b[4]; } r @ 0x0; };",
    );
    let reg = &root.children[0];
    let b = reg.find_child("b").unwrap();
    assert_eq!((b.lsb(), b.msb()), (Some(4), Some(7)));
    assert_field_partition(&root);
}

#[test]
fn test_bit_range_inconsistent() {
    let diags = elaborate_err(
        "addrmap m { reg { field { fieldwidth = 4; } f[7:0]; } r @ 0x0; };",
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::BitRangeInconsistent));
}

#[test]
fn test_mem_with_virtual_register() {
    let root = elaborate_ok(
        r#"
addrmap m {
  mem { mementries = 64; memwidth = 32; } buffer @ 0x1000;
};
"#,
    );
    let buffer = root.find_child("buffer").unwrap();
    assert_eq!(buffer.kind, ComponentKind::Mem);
    assert_eq!(buffer.size, 256);
    assert_eq!(buffer.absolute_address, 0x1000);
}

#[test]
fn test_nested_regfile_addresses() {
    let root = elaborate_ok(
        r#"
addrmap soc {
  regfile block_t {
    reg { field { sw=rw; } f[31:0]; } ctrl @ 0x0;
    reg { field { sw=rw; } f[31:0]; } status @ 0x4;
  };
  block_t block0 @ 0x1000;
  block_t block1 @ 0x2000;
};
"#,
    );
    let block1 = root.find_child("block1").unwrap();
    assert_eq!(block1.find_child("ctrl").unwrap().absolute_address, 0x2000);
    assert_eq!(block1.find_child("status").unwrap().absolute_address, 0x2004);

    // P2: flattened address map is sorted and non-overlapping.
    let map = address_map(&root);
    for pair in map.windows(2) {
        assert!(pair[0].address + pair[0].size <= pair[1].address);
    }
    assert_eq!(map.len(), 4);
    assert_eq!(map[0].path, "soc.block0.ctrl");
}

#[test]
fn test_json_round_trip() {
    let root = elaborate_ok(
        r#"
addrmap simple_chip {
  reg { field { sw=rw; } data[31:0]; } reg1 @ 0x0;
  reg { field { sw=rw; } status[7:0]; } reg2 @ 0x4;
};
"#,
    );
    let text = json::model_to_json_string(&root);
    let value: serde_json::Value = serde_json::from_str(&text).expect("output must be valid JSON");
    assert_eq!(value["format"], "SystemRDL_ElaboratedModel");
    let top = &value["model"][0];
    assert_eq!(top["inst_name"], "simple_chip");
    assert_eq!(top["children"][1]["absolute_address"], "0x4");
    let reserved = &top["children"][1]["children"][1];
    assert_eq!(reserved["properties"]["sw"], "r");
    assert_eq!(reserved["properties"]["hw"], "na");
    assert_eq!(reserved["properties"]["width"], 24);
}

#[test]
fn test_revalidation_is_idempotent() {
    let mut root = elaborate_ok(
        r#"
addrmap m {
  reg { field { sw=rw; } ctrl[0:0]; field { sw=rw; } data[23:16]; } r @ 0x0;
};
"#,
    );
    let fields_before = root.children[0].children.len();
    let diags = validate::validate(&mut root);
    assert!(diags.is_empty(), "revalidation raised: {:?}", diags);
    assert_eq!(root.children[0].children.len(), fields_before);
}

#[test]
fn test_syntax_error_reports_position() {
    let result = elaborate_source("addrmap m { reg r @ ; };", "broken.rdl");
    assert!(result.root.is_none());
    assert_eq!(result.diagnostics.len(), 1);
    let diag = &result.diagnostics[0];
    assert_eq!(diag.kind, DiagnosticKind::SyntaxError);
    assert_eq!(diag.file, "broken.rdl");
    assert!(diag.to_string().starts_with("broken.rdl:1:"));
}

#[test]
fn test_no_toplevel_addrmap() {
    let diags = elaborate_err("reg t { field { sw=rw; } f[7:0]; };");
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::Unsupported));
}

#[test]
fn test_division_by_zero_in_source() {
    let diags = elaborate_err(
        "addrmap m { reg { regwidth = 32 / 0; field { sw=rw; } f[7:0]; } r @ 0x0; };",
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::DivisionByZero));
}

#[test]
fn test_multiple_errors_reported_together() {
    // One register overlaps bits, another overlaps addresses; both must be
    // visible in a single run.
    let diags = elaborate_err(
        r#"
addrmap m {
  reg { field { sw=rw; } a[7:0]; field { sw=rw; } b[3:0]; } bad_bits @ 0x0;
  reg { field { sw=rw; } f[31:0]; } x @ 0x10;
  reg { field { sw=rw; } f[31:0]; } y @ 0x12;
};
"#,
    );
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::FieldOverlap));
    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::AddressOverlap));
}
