// Licensed under the Apache-2.0 license

//! The built-in SystemRDL property schema.
//!
//! One process-wide, read-only table describing every built-in property:
//! which component kinds it applies to, what value type it takes, and its
//! built-in default (when the language defines one). Built once on first
//! use; elaboration threads no mutable global state through it.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::model::ComponentKind;
use crate::value::{EnumValue, PropertyValue};

/// Declared value type of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyType {
    Int,
    Bool,
    Str,
    Access,
    OnRead,
    OnWrite,
    Addressing,
}

impl PropertyType {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::Int => "integer",
            PropertyType::Bool => "boolean",
            PropertyType::Str => "string",
            PropertyType::Access => "access type",
            PropertyType::OnRead => "onread type",
            PropertyType::OnWrite => "onwrite type",
            PropertyType::Addressing => "addressing type",
        }
    }
}

/// Schema entry for one built-in property.
#[derive(Clone, Debug)]
pub struct PropertyMeta {
    pub ty: PropertyType,
    pub applies_to: &'static [ComponentKind],
    pub default: Option<PropertyValue>,
}

use crate::model::ComponentKind::{AddrMap, Field, Mem, Reg, RegFile};

const ALL: &[ComponentKind] = &[AddrMap, RegFile, Reg, Field, Mem];
const ADDRMAP: &[ComponentKind] = &[AddrMap];
const CONTAINERS: &[ComponentKind] = &[AddrMap, RegFile];
const REG: &[ComponentKind] = &[Reg];
const FIELD: &[ComponentKind] = &[Field];
const FIELD_MEM: &[ComponentKind] = &[Field, Mem];
const MEM: &[ComponentKind] = &[Mem];

/// The predefined enumerations: `sw`/`hw` access values, read/write side
/// effects, and addressing modes. Variant names are globally unique, so a
/// bare identifier like `rw` or `compact` resolves without qualification.
static BUILTIN_ENUMS: &[(&str, &[&str])] = &[
    ("AccessType", &["na", "rw", "wr", "r", "w", "rw1", "w1"]),
    ("OnReadType", &["rclr", "rset", "ruser"]),
    (
        "OnWriteType",
        &["woset", "woclr", "wot", "wzs", "wzc", "wclr", "wset", "wuser"],
    ),
    ("AddressingType", &["compact", "regalign", "fullalign"]),
];

fn enumerator(type_name: &str, name: &str) -> PropertyValue {
    let value = BUILTIN_ENUMS
        .iter()
        .find(|(ty, _)| *ty == type_name)
        .and_then(|(_, names)| names.iter().position(|n| *n == name))
        .unwrap_or(0) as i64;
    PropertyValue::Enum(EnumValue {
        type_name: type_name.to_string(),
        name: name.to_string(),
        value,
    })
}

/// Look up a bare identifier against the predefined enumerations.
pub fn builtin_enum_value(name: &str) -> Option<PropertyValue> {
    for (ty, names) in BUILTIN_ENUMS {
        if names.contains(&name) {
            return Some(enumerator(ty, name));
        }
    }
    None
}

static PROPERTIES: LazyLock<HashMap<&'static str, PropertyMeta>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    let mut add = |name: &'static str,
                   ty: PropertyType,
                   applies_to: &'static [ComponentKind],
                   default: Option<PropertyValue>| {
        table.insert(name, PropertyMeta { ty, applies_to, default });
    };

    // Universal.
    add("name", PropertyType::Str, ALL, None);
    add("desc", PropertyType::Str, ALL, None);
    add("ispresent", PropertyType::Bool, ALL, None);
    add("donttest", PropertyType::Bool, ALL, None);
    add("dontcompare", PropertyType::Bool, ALL, None);

    // Address maps and register files.
    add(
        "addressing",
        PropertyType::Addressing,
        ADDRMAP,
        Some(enumerator("AddressingType", "regalign")),
    );
    add("alignment", PropertyType::Int, CONTAINERS, None);
    add("sharedextbus", PropertyType::Bool, CONTAINERS, None);
    add("bigendian", PropertyType::Bool, ADDRMAP, None);
    add("littleendian", PropertyType::Bool, ADDRMAP, None);
    add("lsb0", PropertyType::Bool, ADDRMAP, None);
    add("msb0", PropertyType::Bool, ADDRMAP, None);

    // Registers.
    add("regwidth", PropertyType::Int, REG, Some(PropertyValue::Int(32)));
    add("accesswidth", PropertyType::Int, REG, None);
    add("shared", PropertyType::Bool, REG, None);
    add("errextbus", PropertyType::Bool, REG, None);

    // Fields.
    add(
        "sw",
        PropertyType::Access,
        FIELD_MEM,
        Some(enumerator("AccessType", "rw")),
    );
    add(
        "hw",
        PropertyType::Access,
        FIELD,
        Some(enumerator("AccessType", "rw")),
    );
    add("reset", PropertyType::Int, FIELD, None);
    add("fieldwidth", PropertyType::Int, FIELD, None);
    add("width", PropertyType::Int, FIELD, None);
    add("lsb", PropertyType::Int, FIELD, None);
    add("msb", PropertyType::Int, FIELD, None);
    add("onread", PropertyType::OnRead, FIELD, None);
    add("onwrite", PropertyType::OnWrite, FIELD, None);
    for flag in [
        "rclr",
        "rset",
        "woclr",
        "woset",
        "singlepulse",
        "hwclr",
        "hwset",
        "swmod",
        "swacc",
        "we",
        "wel",
        "anded",
        "ored",
        "xored",
        "counter",
        "intr",
    ] {
        add(flag, PropertyType::Bool, FIELD, None);
    }

    // Memories.
    add("mementries", PropertyType::Int, MEM, Some(PropertyValue::Int(1)));
    add("memwidth", PropertyType::Int, MEM, Some(PropertyValue::Int(32)));

    table
});

/// Look up a built-in property by name.
pub fn property_meta(name: &str) -> Option<&'static PropertyMeta> {
    PROPERTIES.get(name)
}

/// Built-in default for a property on a given kind, when the schema defines
/// one.
pub fn builtin_default(name: &str, kind: ComponentKind) -> Option<PropertyValue> {
    let meta = property_meta(name)?;
    if !meta.applies_to.contains(&kind) {
        return None;
    }
    meta.default.clone()
}

/// Validate and coerce `value` for assignment of `name` on a node of `kind`.
/// Returns the (possibly coerced) value, or a message describing the
/// mismatch.
pub fn check_assignment(
    kind: ComponentKind,
    name: &str,
    value: PropertyValue,
) -> Result<PropertyValue, String> {
    let Some(meta) = property_meta(name) else {
        return Err(format!("unknown property '{}'", name));
    };
    if !meta.applies_to.contains(&kind) {
        return Err(format!(
            "property '{}' does not apply to {} components",
            name,
            kind.as_str()
        ));
    }
    check_value_type(name, value)
}

/// Type-check and coerce `value` for property `name` without pinning down
/// the component kind. Used for `default` assignments, whose target kind is
/// only known when the default is applied.
pub fn check_value_type(name: &str, value: PropertyValue) -> Result<PropertyValue, String> {
    let Some(meta) = property_meta(name) else {
        return Err(format!("unknown property '{}'", name));
    };
    let mismatch = |value: &PropertyValue| {
        format!(
            "property '{}' expects a {} value, got {}",
            name,
            meta.ty.name(),
            value.kind_name()
        )
    };
    let enum_type = match meta.ty {
        PropertyType::Int => {
            return match value {
                PropertyValue::Int(_) => Ok(value),
                PropertyValue::Bool(b) => Ok(PropertyValue::Int(i64::from(b))),
                other => Err(mismatch(&other)),
            };
        }
        PropertyType::Bool => {
            return match value {
                PropertyValue::Bool(_) => Ok(value),
                // The schema permits 0/1 integers for boolean properties.
                PropertyValue::Int(v) if v == 0 || v == 1 => Ok(PropertyValue::Bool(v != 0)),
                other => Err(mismatch(&other)),
            };
        }
        PropertyType::Str => {
            return match value {
                PropertyValue::Str(_) => Ok(value),
                other => Err(mismatch(&other)),
            };
        }
        PropertyType::Access => "AccessType",
        PropertyType::OnRead => "OnReadType",
        PropertyType::OnWrite => "OnWriteType",
        PropertyType::Addressing => "AddressingType",
    };
    match value {
        PropertyValue::Enum(e) if e.type_name == enum_type => Ok(PropertyValue::Enum(e)),
        other => Err(mismatch(&other)),
    }
}

/// Addressing modes for container byte-cursor advancement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Addressing {
    Compact,
    #[default]
    RegAlign,
    FullAlign,
}

impl Addressing {
    pub fn from_value(value: &PropertyValue) -> Option<Addressing> {
        match value.as_enum()?.name.as_str() {
            "compact" => Some(Addressing::Compact),
            "regalign" => Some(Addressing::RegAlign),
            "fullalign" => Some(Addressing::FullAlign),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_enum_lookup() {
        let rw = builtin_enum_value("rw").unwrap();
        assert_eq!(rw.as_enum().unwrap().type_name, "AccessType");
        let compact = builtin_enum_value("compact").unwrap();
        assert_eq!(compact.as_enum().unwrap().type_name, "AddressingType");
        assert!(builtin_enum_value("bogus").is_none());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            builtin_default("regwidth", ComponentKind::Reg),
            Some(PropertyValue::Int(32))
        );
        assert_eq!(
            builtin_default("sw", ComponentKind::Field)
                .unwrap()
                .as_enum()
                .unwrap()
                .name,
            "rw"
        );
        // regwidth does not apply to fields.
        assert_eq!(builtin_default("regwidth", ComponentKind::Field), None);
    }

    #[test]
    fn test_check_assignment() {
        assert!(check_assignment(ComponentKind::Reg, "regwidth", PropertyValue::Int(64)).is_ok());
        // 0/1 integer coerces to boolean.
        assert_eq!(
            check_assignment(ComponentKind::Field, "hwclr", PropertyValue::Int(1)),
            Ok(PropertyValue::Bool(true))
        );
        assert!(check_assignment(ComponentKind::Field, "regwidth", PropertyValue::Int(32)).is_err());
        assert!(
            check_assignment(ComponentKind::Field, "sw", PropertyValue::Int(3)).is_err(),
            "access property rejects integers"
        );
        assert!(check_assignment(ComponentKind::Reg, "nosuch", PropertyValue::Int(0)).is_err());
    }
}
