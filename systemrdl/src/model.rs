// Licensed under the Apache-2.0 license

//! The elaborated model.
//!
//! Elaboration produces a single tree of [`ElaboratedNode`]s rooted at an
//! address map. Every node owns its children exclusively; cross-references
//! (from property values) use [`NodePath`] index chains rather than
//! pointers. After a successful run every address is absolute, every array
//! is described by its dimensions and strides, and every property value is
//! concrete.

use indexmap::IndexMap;

use crate::diag::Span;
use crate::value::{NodePath, PropertyValue};

/// The closed set of component kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    AddrMap,
    RegFile,
    Reg,
    Field,
    Mem,
}

impl ComponentKind {
    pub fn from_keyword(text: &str) -> Option<ComponentKind> {
        match text {
            "addrmap" => Some(ComponentKind::AddrMap),
            "regfile" => Some(ComponentKind::RegFile),
            "reg" => Some(ComponentKind::Reg),
            "field" => Some(ComponentKind::Field),
            "mem" => Some(ComponentKind::Mem),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::AddrMap => "addrmap",
            ComponentKind::RegFile => "regfile",
            ComponentKind::Reg => "reg",
            ComponentKind::Field => "field",
            ComponentKind::Mem => "mem",
        }
    }

    /// Legal child kinds per container.
    pub fn allows_child(&self, child: ComponentKind) -> bool {
        use ComponentKind::*;
        match self {
            AddrMap => matches!(child, AddrMap | RegFile | Reg | Mem),
            RegFile => matches!(child, RegFile | Reg),
            Reg => matches!(child, Field),
            Mem => matches!(child, Reg),
            Field => false,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ComponentKind::AddrMap | ComponentKind::RegFile | ComponentKind::Mem
        )
    }
}

/// Lifecycle of a node during elaboration. Dynamic property assignments are
/// legal while a target is bodied or validated; a finalized node is
/// immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Declared,
    Bodied,
    Validated,
    Finalized,
}

/// One node of the elaborated model.
#[derive(Clone, Debug)]
pub struct ElaboratedNode {
    pub kind: ComponentKind,
    pub inst_name: String,
    /// Name of the component type this was instantiated from; empty for
    /// anonymous types.
    pub type_name: String,
    /// Absolute byte address. For fields this is the owning register's
    /// address; fields occupy bit positions, not bytes.
    pub absolute_address: u64,
    /// Size in bytes of one element: register span, memory span, or covered
    /// span for containers. Zero for fields.
    pub size: u64,
    /// Array dimensions, outermost first. Empty for scalar instances.
    pub array_dimensions: Vec<u64>,
    /// Per-dimension stride in bytes, aligned with `array_dimensions`.
    pub array_stride: Vec<u64>,
    /// Property values, insertion order preserved for serialization.
    pub properties: IndexMap<String, PropertyValue>,
    pub children: Vec<ElaboratedNode>,
    pub(crate) state: NodeState,
    pub(crate) src: Span,
}

impl ElaboratedNode {
    pub fn new(kind: ComponentKind, inst_name: &str, type_name: &str, src: Span) -> Self {
        ElaboratedNode {
            kind,
            inst_name: inst_name.to_string(),
            type_name: type_name.to_string(),
            absolute_address: 0,
            size: 0,
            array_dimensions: Vec::new(),
            array_stride: Vec::new(),
            properties: IndexMap::new(),
            children: Vec::new(),
            state: NodeState::Declared,
            src,
        }
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Inserts or overwrites a property. Overwriting keeps the original
    /// insertion position, so serialization order stays stable.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn int_property(&self, name: &str) -> Option<u64> {
        self.get_property(name).and_then(PropertyValue::as_u64)
    }

    /// Derived bit attributes; present on every field after elaboration.
    pub fn lsb(&self) -> Option<u64> {
        self.int_property("lsb")
    }

    pub fn msb(&self) -> Option<u64> {
        self.int_property("msb")
    }

    pub fn width(&self) -> Option<u64> {
        self.int_property("width")
    }

    pub fn find_child(&self, name: &str) -> Option<&ElaboratedNode> {
        self.children.iter().find(|c| c.inst_name == name)
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut ElaboratedNode> {
        self.children.iter_mut().find(|c| c.inst_name == name)
    }

    /// Total bytes covered by this instance including all array elements.
    pub fn total_span(&self) -> u64 {
        match (self.array_dimensions.first(), self.array_stride.first()) {
            (Some(dim), Some(stride)) => dim * stride,
            _ => self.size,
        }
    }

    pub fn end_address(&self) -> u64 {
        self.absolute_address + self.total_span()
    }

    /// Absolute address of one array element. `indices` must match the
    /// dimension count; out-of-range indices return `None`.
    pub fn element_address(&self, indices: &[u64]) -> Option<u64> {
        if indices.len() != self.array_dimensions.len() {
            return None;
        }
        let mut addr = self.absolute_address;
        for (i, &index) in indices.iter().enumerate() {
            if index >= self.array_dimensions[i] {
                return None;
            }
            addr += index * self.array_stride[i];
        }
        Some(addr)
    }

    /// Resolve a root-relative [`NodePath`] against this node as the root.
    pub fn node_at(&self, path: &NodePath) -> Option<&ElaboratedNode> {
        let mut node = self;
        for &index in &path.0 {
            node = node.children.get(index)?;
        }
        Some(node)
    }

    /// Dotted instance-name form of a [`NodePath`], e.g. `top.rf.r`.
    pub fn path_name(&self, path: &NodePath) -> Option<String> {
        let mut node = self;
        let mut parts = vec![self.inst_name.clone()];
        for &index in &path.0 {
            node = node.children.get(index)?;
            parts.push(node.inst_name.clone());
        }
        Some(parts.join("."))
    }

    /// Shift this subtree's absolute addresses by `delta` bytes.
    pub(crate) fn shift_addresses(&mut self, delta: u64) {
        self.absolute_address += delta;
        for child in &mut self.children {
            child.shift_addresses(delta);
        }
    }
}

/// Pre/post-order traversal callbacks over the elaborated tree.
pub trait ModelVisitor {
    fn pre_visit(&mut self, node: &ElaboratedNode, depth: usize);
    fn post_visit(&mut self, _node: &ElaboratedNode, _depth: usize) {}
}

pub fn traverse(node: &ElaboratedNode, visitor: &mut dyn ModelVisitor) {
    fn walk(node: &ElaboratedNode, visitor: &mut dyn ModelVisitor, depth: usize) {
        visitor.pre_visit(node, depth);
        for child in &node.children {
            walk(child, visitor, depth + 1);
        }
        visitor.post_visit(node, depth);
    }
    walk(node, visitor, 0);
}

/// One row of the flat address map listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressMapEntry {
    pub address: u64,
    pub size: u64,
    pub name: String,
    pub path: String,
}

/// Flatten the addressable leaves (registers and memories) into an
/// address-sorted listing. Array elements are expanded one entry each.
pub fn address_map(root: &ElaboratedNode) -> Vec<AddressMapEntry> {
    fn walk(node: &ElaboratedNode, prefix: &str, out: &mut Vec<AddressMapEntry>) {
        let path = if prefix.is_empty() {
            node.inst_name.clone()
        } else {
            format!("{}.{}", prefix, node.inst_name)
        };
        match node.kind {
            ComponentKind::Reg | ComponentKind::Mem => {
                if node.array_dimensions.is_empty() {
                    out.push(AddressMapEntry {
                        address: node.absolute_address,
                        size: node.size,
                        name: node.inst_name.clone(),
                        path,
                    });
                } else {
                    for (element, addr) in element_addresses(node) {
                        out.push(AddressMapEntry {
                            address: addr,
                            size: node.size,
                            name: format!("{}{}", node.inst_name, element),
                            path: format!("{}{}", path, element),
                        });
                    }
                }
            }
            _ => {
                for child in &node.children {
                    walk(child, &path, out);
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(root, "", &mut out);
    out.sort_by_key(|e| e.address);
    out
}

/// Enumerate `[i][j]...` suffixes and absolute addresses for every element
/// of an arrayed instance.
fn element_addresses(node: &ElaboratedNode) -> Vec<(String, u64)> {
    let mut out = Vec::new();
    let dims = &node.array_dimensions;
    let mut indices = vec![0u64; dims.len()];
    loop {
        let suffix: String = indices.iter().map(|i| format!("[{}]", i)).collect();
        if let Some(addr) = node.element_address(&indices) {
            out.push((suffix, addr));
        }
        // Odometer increment over the dimension vector.
        let mut dim = dims.len();
        loop {
            if dim == 0 {
                return out;
            }
            dim -= 1;
            indices[dim] += 1;
            if indices[dim] < dims[dim] {
                break;
            }
            indices[dim] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Span;

    fn reg(name: &str, addr: u64) -> ElaboratedNode {
        let mut node = ElaboratedNode::new(ComponentKind::Reg, name, "", Span::default());
        node.absolute_address = addr;
        node.size = 4;
        node
    }

    #[test]
    fn test_legal_children() {
        assert!(ComponentKind::AddrMap.allows_child(ComponentKind::Reg));
        assert!(!ComponentKind::AddrMap.allows_child(ComponentKind::Field));
        assert!(ComponentKind::Reg.allows_child(ComponentKind::Field));
        assert!(!ComponentKind::Field.allows_child(ComponentKind::Field));
    }

    #[test]
    fn test_element_addresses() {
        let mut node = reg("r", 0x100);
        node.array_dimensions = vec![3];
        node.array_stride = vec![4];
        assert_eq!(node.element_address(&[0]), Some(0x100));
        assert_eq!(node.element_address(&[2]), Some(0x108));
        assert_eq!(node.element_address(&[3]), None);
        assert_eq!(node.total_span(), 12);
    }

    #[test]
    fn test_multi_dim_strides() {
        let mut node = reg("r", 0);
        node.array_dimensions = vec![2, 3];
        node.array_stride = vec![12, 4];
        assert_eq!(node.element_address(&[1, 2]), Some(20));
        assert_eq!(node.total_span(), 24);
    }

    #[test]
    fn test_address_map_flattening() {
        let mut top = ElaboratedNode::new(ComponentKind::AddrMap, "top", "", Span::default());
        let mut r = reg("r", 0x100);
        r.array_dimensions = vec![2];
        r.array_stride = vec![4];
        top.children.push(r);
        top.children.push(reg("s", 0x0));
        let map = address_map(&top);
        assert_eq!(map.len(), 3);
        assert_eq!(map[0].path, "top.s");
        assert_eq!(map[1].path, "top.r[0]");
        assert_eq!(map[2].address, 0x104);
    }

    #[test]
    fn test_node_path_resolution() {
        let mut top = ElaboratedNode::new(ComponentKind::AddrMap, "top", "", Span::default());
        top.children.push(reg("a", 0));
        top.children.push(reg("b", 4));
        let path = NodePath(vec![1]);
        assert_eq!(top.node_at(&path).unwrap().inst_name, "b");
        assert_eq!(top.path_name(&path).unwrap(), "top.b");
    }
}
