//! Tree-node handles.
//!
//! An [OfNode] names one node of either a live [DeviceTree] or a [FlatTree]. Every accessor
//! dispatches on the representation internally, so callers never need to know which one the
//! firmware is running with. Handles are `Copy` and compare equal when they name the same node of
//! the same tree.
use crate::{
    fdt::FlatTree,
    node::DeviceTree,
    prop::{PropertyError, decode_str, decode_strlist, decode_u32, decode_u32_array, decode_u64},
};
use alloc::{string::String, vec::Vec};
use core::{fmt, ptr};

/// Properties that mark a node as needed before relocation.
const PRE_RELOC_PROPS: [&str; 6] = [
    "bootph-all",
    "bootph-pre-ram",
    "bootph-pre-sram",
    "u-boot,dm-pre-reloc",
    "u-boot,dm-pre-proper",
    "u-boot,dm-spl",
];

/// A whole hardware description tree in one of its two representations.
#[derive(Clone, Copy)]
pub enum OfTree {
    Live(&'static DeviceTree),
    Flat(&'static FlatTree),
}

impl OfTree {
    pub fn root(&self) -> OfNode {
        match *self {
            OfTree::Live(tree) => OfNode::Live {
                tree,
                id: tree.root_id,
            },
            OfTree::Flat(tree) => OfNode::Flat {
                tree,
                offset: tree.root(),
            },
        }
    }

    /// Resolve an absolute path, or an alias name when `path` does not start with `/`.
    pub fn path(&self, path: &str) -> Option<OfNode> {
        if !path.starts_with('/') {
            let target = self.aliases_node()?.read_string(path).ok()?;
            if !target.starts_with('/') {
                return None;
            }
            return self.path(target);
        }
        match *self {
            OfTree::Live(tree) => tree
                .get_node(path)
                .map(|node| OfNode::Live { tree, id: node.node_id }),
            OfTree::Flat(tree) => tree
                .path_offset(path)
                .map(|offset| OfNode::Flat { tree, offset }),
        }
    }

    pub fn node_by_phandle(&self, phandle: u32) -> Option<OfNode> {
        match *self {
            OfTree::Live(tree) => tree
                .get_by_phandle(phandle)
                .map(|node| OfNode::Live { tree, id: node.node_id }),
            OfTree::Flat(tree) => tree
                .node_by_phandle(phandle)
                .map(|offset| OfNode::Flat { tree, offset }),
        }
    }

    pub fn aliases_node(&self) -> Option<OfNode> {
        self.root().find_subnode("aliases")
    }

    pub fn chosen_node(&self) -> Option<OfNode> {
        self.root().find_subnode("chosen")
    }

    /// Aliases of the form `<stem><n>` as `(n, target)` pairs. Aliases pointing nowhere are
    /// dropped.
    fn aliases_for(&self, stem: &str) -> Vec<(u32, OfNode)> {
        let Some(aliases) = self.aliases_node() else {
            return Vec::new();
        };
        aliases
            .properties()
            .into_iter()
            .filter_map(|(name, data)| {
                let seq = name.strip_prefix(stem)?.parse::<u32>().ok()?;
                let target = self.path(decode_str(data).ok()?)?;
                Some((seq, target))
            })
            .collect()
    }

    /// The sequence number given to `node` by an `/aliases` entry named `<stem><n>`.
    pub fn alias_seq(&self, stem: &str, node: OfNode) -> Option<u32> {
        self.aliases_for(stem)
            .into_iter()
            .find(|(_, target)| *target == node)
            .map(|(seq, _)| seq)
    }

    /// The highest `<n>` among `<stem><n>` aliases.
    pub fn highest_alias(&self, stem: &str) -> Option<u32> {
        self.aliases_for(stem).into_iter().map(|(seq, _)| seq).max()
    }
}

impl fmt::Debug for OfTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfTree::Live(_) => f.write_str("OfTree::Live"),
            OfTree::Flat(_) => f.write_str("OfTree::Flat"),
        }
    }
}

/// Handle to one node of an [OfTree].
#[derive(Clone, Copy)]
pub enum OfNode {
    Live {
        tree: &'static DeviceTree,
        id: usize,
    },
    Flat {
        tree: &'static FlatTree,
        offset: usize,
    },
}

impl PartialEq for OfNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OfNode::Live { tree: a, id: x }, OfNode::Live { tree: b, id: y }) => {
                ptr::eq(*a, *b) && x == y
            }
            (OfNode::Flat { tree: a, offset: x }, OfNode::Flat { tree: b, offset: y }) => {
                ptr::eq(*a, *b) && x == y
            }
            _ => false,
        }
    }
}

impl Eq for OfNode {}

impl fmt::Debug for OfNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfNode::Live { id, .. } => write!(f, "OfNode::Live({}, {:?})", id, self.name()),
            OfNode::Flat { offset, .. } => {
                write!(f, "OfNode::Flat({:#x}, {:?})", offset, self.name())
            }
        }
    }
}

/// Navigation
impl OfNode {
    pub fn tree(&self) -> OfTree {
        match *self {
            OfNode::Live { tree, .. } => OfTree::Live(tree),
            OfNode::Flat { tree, .. } => OfTree::Flat(tree),
        }
    }

    /// Whether this node is backed by the live tree.
    pub fn is_live(&self) -> bool {
        matches!(self, OfNode::Live { .. })
    }

    /// The node name including its unit address, e.g. `gpio@1000`. The root's name is empty.
    pub fn name(&self) -> &'static str {
        match *self {
            OfNode::Live { tree, id } => tree.container[id].full_name.as_ref(),
            OfNode::Flat { tree, offset } => tree.name(offset).unwrap_or(""),
        }
    }

    pub fn first_child(&self) -> Option<OfNode> {
        match *self {
            OfNode::Live { tree, id } => tree.container[id]
                .children
                .first()
                .map(|child| OfNode::Live { tree, id: *child }),
            OfNode::Flat { tree, offset } => tree
                .first_subnode(offset)
                .map(|offset| OfNode::Flat { tree, offset }),
        }
    }

    pub fn next_sibling(&self) -> Option<OfNode> {
        match *self {
            OfNode::Live { tree, id } => tree
                .next_sibling(&tree.container[id])
                .map(|node| OfNode::Live { tree, id: node.node_id }),
            OfNode::Flat { tree, offset } => tree
                .next_subnode(offset)
                .map(|offset| OfNode::Flat { tree, offset }),
        }
    }

    pub fn parent(&self) -> Option<OfNode> {
        match *self {
            OfNode::Live { tree, id } => {
                let node = &tree.container[id];
                (!tree.is_root(node)).then_some(OfNode::Live {
                    tree,
                    id: node.parent_id,
                })
            }
            OfNode::Flat { tree, offset } => tree
                .parent(offset)
                .map(|offset| OfNode::Flat { tree, offset }),
        }
    }

    pub fn children(&self) -> OfNodeIter {
        OfNodeIter {
            next: self.first_child(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().count()
    }

    /// Find a direct child by full name, falling back to the name without unit address.
    pub fn find_subnode(&self, name: &str) -> Option<OfNode> {
        self.children()
            .find(|child| child.name() == name)
            .or_else(|| {
                self.children()
                    .find(|child| child.name().split('@').next() == Some(name))
            })
    }

    pub fn full_path(&self) -> String {
        match self.parent() {
            None => String::from("/"),
            Some(parent) => {
                let mut path = parent.full_path();
                if !path.ends_with('/') {
                    path.push('/');
                }
                path.push_str(self.name());
                path
            }
        }
    }
}

/// Property access
impl OfNode {
    /// All properties of the node as `(name, data)` pairs.
    pub fn properties(&self) -> Vec<(&'static str, &'static [u8])> {
        match *self {
            OfNode::Live { tree, id } => tree.container[id]
                .props
                .iter()
                .map(|p| (p.name.as_ref(), p.data.as_ref()))
                .collect(),
            OfNode::Flat { tree, offset } => tree.properties(offset).collect(),
        }
    }

    pub fn read_prop(&self, name: &str) -> Result<&'static [u8], PropertyError> {
        let data = match *self {
            OfNode::Live { tree, id } => tree
                .get_property(&tree.container[id], name)
                .map(|p| p.data.as_ref()),
            OfNode::Flat { tree, offset } => tree.get_property(offset, name),
        };
        data.ok_or(PropertyError::PropNotFound)
    }

    pub fn has_prop(&self, name: &str) -> bool {
        self.read_prop(name).is_ok()
    }

    pub fn read_u32(&self, name: &str) -> Result<u32, PropertyError> {
        decode_u32(self.read_prop(name)?)
    }

    pub fn read_u32_default(&self, name: &str, def: u32) -> u32 {
        self.read_u32(name).unwrap_or(def)
    }

    pub fn read_u32_index(&self, name: &str, index: usize) -> Result<u32, PropertyError> {
        let cells = decode_u32_array(self.read_prop(name)?)?;
        cells
            .get(index)
            .copied()
            .ok_or(PropertyError::InvalidPropFormat)
    }

    pub fn read_u32_array(&self, name: &str) -> Result<Vec<u32>, PropertyError> {
        decode_u32_array(self.read_prop(name)?)
    }

    pub fn read_u64(&self, name: &str) -> Result<u64, PropertyError> {
        decode_u64(self.read_prop(name)?)
    }

    pub fn read_u64_default(&self, name: &str, def: u64) -> u64 {
        self.read_u64(name).unwrap_or(def)
    }

    /// A boolean property is true when present, whatever its value.
    pub fn read_bool(&self, name: &str) -> bool {
        self.has_prop(name)
    }

    pub fn read_string(&self, name: &str) -> Result<&'static str, PropertyError> {
        decode_str(self.read_prop(name)?)
    }

    pub fn read_string_list(&self, name: &str) -> Result<Vec<&'static str>, PropertyError> {
        decode_strlist(self.read_prop(name)?)
    }

    pub fn read_string_index(&self, name: &str, index: usize) -> Result<&'static str, PropertyError> {
        self.read_string_list(name)?
            .get(index)
            .copied()
            .ok_or(PropertyError::InvalidPropFormat)
    }

    pub fn string_count(&self, name: &str) -> Result<usize, PropertyError> {
        Ok(self.read_string_list(name)?.len())
    }

    /// Index of `value` inside the string list `name`.
    pub fn stringlist_search(&self, name: &str, value: &str) -> Result<usize, PropertyError> {
        self.read_string_list(name)?
            .iter()
            .position(|s| *s == value)
            .ok_or(PropertyError::PropNotFound)
    }

    pub fn is_compatible(&self, compat: &str) -> bool {
        self.stringlist_search("compatible", compat).is_ok()
    }

    /// A node is enabled when it has no `status`, or its status is `okay` or `ok`.
    pub fn is_enabled(&self) -> bool {
        match self.read_string("status") {
            Err(_) => true,
            Ok(status) => status == "okay" || status == "ok",
        }
    }

    /// Whether the node carries one of the markers requesting binding before relocation.
    pub fn pre_reloc(&self) -> bool {
        PRE_RELOC_PROPS.iter().any(|prop| self.has_prop(prop))
    }

    pub fn phandle(&self) -> Option<u32> {
        self.read_u32("phandle")
            .or_else(|_| self.read_u32("linux,phandle"))
            .ok()
    }

    /// `#address-cells` of this node, defaulting to 2.
    pub fn address_cells(&self) -> u32 {
        self.read_u32_default("#address-cells", 2)
    }

    /// `#size-cells` of this node, defaulting to 1.
    pub fn size_cells(&self) -> u32 {
        self.read_u32_default("#size-cells", 1)
    }

    /// Entry `index` of `reg`, decoded with the parent's cell counts, as `(address, size)`.
    pub fn get_addr_size_index(&self, index: usize) -> Result<(u64, u64), PropertyError> {
        let (na, ns) = match self.parent() {
            Some(parent) => (parent.address_cells() as usize, parent.size_cells() as usize),
            None => (2, 1),
        };
        let cells = self.read_u32_array("reg")?;
        let width = na + ns;
        if width == 0 || na > 2 || ns > 2 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let entry = cells
            .chunks_exact(width)
            .nth(index)
            .ok_or(PropertyError::InvalidPropFormat)?;
        let fold = |acc: u64, cell: &u32| (acc << 32) | *cell as u64;
        Ok((
            entry[..na].iter().fold(0, fold),
            entry[na..].iter().fold(0, fold),
        ))
    }

    pub fn get_addr(&self) -> Result<u64, PropertyError> {
        self.get_addr_size_index(0).map(|(addr, _)| addr)
    }
}

/// Iterator over the children of a node.
pub struct OfNodeIter {
    next: Option<OfNode>,
}

impl Iterator for OfNodeIter {
    type Item = OfNode;

    fn next(&mut self) -> Option<OfNode> {
        let node = self.next?;
        self.next = node.next_sibling();
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdt::{reader::FdtReader, writer::FdtWriter};
    use alloc::boxed::Box;

    fn blob() -> &'static [u8] {
        let mut w = FdtWriter::new();
        w.begin_node("");
        w.property_u32("#address-cells", 1);
        w.property_u32("#size-cells", 1);
        w.begin_node("aliases");
        w.property_string("gpio3", "/soc/gpio@1000");
        w.property_string("serial0", "/soc/missing");
        w.end_node();
        w.begin_node("soc");
        w.property_strings("compatible", &["vendor,soc", "simple-bus"]);
        w.property_u32("#address-cells", 1);
        w.property_u32("#size-cells", 1);
        w.begin_node("gpio@1000");
        w.property_strings("compatible", &["vendor,gpio"]);
        w.property_u32_array("reg", &[0x1000, 0x40]);
        w.property_flag("bootph-all");
        w.property_u32("phandle", 9);
        w.end_node();
        w.begin_node("uart@2000");
        w.property_string("status", "disabled");
        w.property_strings("clock-names", &["baud", "apb"]);
        w.end_node();
        w.end_node();
        w.end_node();
        Box::leak(w.finish().unwrap().into_boxed_slice())
    }

    fn both_trees() -> [OfTree; 2] {
        let flat: &'static FlatTree = Box::leak(Box::new(FlatTree::new(blob()).unwrap()));
        let live: &'static DeviceTree = Box::leak(Box::new(FdtReader::new(flat).read().unwrap()));
        [OfTree::Flat(flat), OfTree::Live(live)]
    }

    #[test]
    fn both_representations_answer_alike() {
        for tree in both_trees() {
            let root = tree.root();
            let names: Vec<&str> = root.children().map(|n| n.name()).collect();
            assert_eq!(names, ["aliases", "soc"]);

            let soc = tree.path("/soc").unwrap();
            assert!(soc.is_compatible("simple-bus"));
            assert_eq!(soc.stringlist_search("compatible", "simple-bus"), Ok(1));
            assert_eq!(soc.child_count(), 2);

            let gpio = soc.first_child().unwrap();
            assert_eq!(gpio.name(), "gpio@1000");
            assert_eq!(gpio.parent(), Some(soc));
            assert_eq!(gpio.full_path(), "/soc/gpio@1000");
            assert!(gpio.is_enabled());
            assert!(gpio.pre_reloc());
            assert_eq!(gpio.get_addr_size_index(0), Ok((0x1000, 0x40)));
            assert_eq!(tree.node_by_phandle(9), Some(gpio));

            let uart = gpio.next_sibling().unwrap();
            assert!(!uart.is_enabled());
            assert!(!uart.pre_reloc());
            assert_eq!(uart.read_string_index("clock-names", 1), Ok("apb"));
            assert_eq!(uart.read_u32("reg"), Err(PropertyError::PropNotFound));
            assert_eq!(uart.read_u32_default("reg", 4), 4);
            assert_eq!(uart.next_sibling(), None);
        }
    }

    #[test]
    fn aliases_resolve_to_nodes_and_sequences() {
        for tree in both_trees() {
            let gpio = tree.path("/soc/gpio@1000").unwrap();
            assert_eq!(tree.path("gpio3"), Some(gpio));
            assert_eq!(tree.alias_seq("gpio", gpio), Some(3));
            assert_eq!(tree.highest_alias("gpio"), Some(3));
            assert_eq!(tree.highest_alias("serial"), None);
            assert_eq!(tree.alias_seq("i2c", gpio), None);
        }
    }

    #[test]
    fn handles_from_different_trees_differ() {
        let [flat, live] = both_trees();
        assert_ne!(flat.root(), live.root());
        assert_eq!(flat.root(), flat.root());
    }
}
