//! The live device tree: every node is stored in one arena and refers to its parent and children
//! by index, so the tree can be walked in both directions without pointers.
use crate::prop::{Property, PropertyError, decode_u32_array};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, string::String, vec, vec::Vec};
use core::ops::Range;

pub struct DeviceTree {
    pub root_id: usize,
    pub container: Vec<Node>,
    pub mem_rsv_map: Vec<Range<usize>>,
    pub phandle_map: BTreeMap<u32, usize>,
}

pub struct Node {
    pub node_id: usize,
    pub parent_id: usize,
    pub full_name: Box<str>,
    pub node_name: Box<str>,
    pub unit_addr: Box<str>,
    pub children: Vec<usize>,
    pub props: Vec<Property>,
}

impl Node {
    fn new(node_id: usize, parent_id: usize, full_name: &str) -> Node {
        let (node_name, unit_addr) = match full_name.find('@') {
            Some(idx) => (&full_name[..idx], &full_name[idx + 1..]),
            None => (full_name, ""),
        };
        Node {
            node_id,
            parent_id,
            full_name: Box::from(full_name),
            node_name: Box::from(node_name),
            unit_addr: Box::from(unit_addr),
            children: vec![],
            props: vec![],
        }
    }
}

/// Construction
impl DeviceTree {
    /// Create a tree holding only an unnamed root node.
    pub fn new() -> DeviceTree {
        DeviceTree {
            root_id: 0,
            container: vec![Node::new(0, 0, "")],
            mem_rsv_map: vec![],
            phandle_map: BTreeMap::new(),
        }
    }

    /// Append a child named `full_name` (e.g. `gpio@1000`) under `parent` and return its id.
    pub fn add_node(&mut self, parent: usize, full_name: &str) -> usize {
        let id = self.container.len();
        self.container.push(Node::new(id, parent, full_name));
        self.container[parent].children.push(id);
        id
    }

    /// Set or replace a property. Writing `phandle` keeps the phandle map current.
    pub fn set_prop(&mut self, node: usize, name: &str, data: &[u8]) {
        if name == "phandle" {
            if let Ok(handle) = crate::prop::decode_u32(data) {
                self.phandle_map.insert(handle, node);
            }
        }
        let props = &mut self.container[node].props;
        match props.iter_mut().find(|p| p.name.as_ref() == name) {
            Some(prop) => prop.data = Box::from(data),
            None => props.push(Property::new(name, data)),
        }
    }

    pub fn set_prop_u32(&mut self, node: usize, name: &str, value: u32) {
        self.set_prop(node, name, &value.to_be_bytes());
    }

    pub fn set_prop_u32_array(&mut self, node: usize, name: &str, values: &[u32]) {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.set_prop(node, name, &data);
    }

    pub fn set_prop_str(&mut self, node: usize, name: &str, value: &str) {
        self.set_prop_strlist(node, name, &[value]);
    }

    pub fn set_prop_strlist(&mut self, node: usize, name: &str, values: &[&str]) {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        self.set_prop(node, name, &data);
    }

    /// Set an empty (boolean) property.
    pub fn set_prop_flag(&mut self, node: usize, name: &str) {
        self.set_prop(node, name, &[]);
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Queries
impl DeviceTree {
    pub fn is_root(&self, node: &Node) -> bool {
        self.get_parent(node).node_id == node.node_id
    }
    fn full_path(&self, node: &Node) -> String {
        if self.is_root(node) {
            String::from("")
        } else {
            self.full_path(self.get_parent(node)) + "/" + node.full_name.as_ref()
        }
    }
    pub fn get_full_path(&self, node: &Node) -> Box<str> {
        let path = self.full_path(node);
        if path.is_empty() {
            Box::from("/")
        } else {
            path.into_boxed_str()
        }
    }
    pub fn get(&self, id: usize) -> Option<&Node> {
        self.container.get(id)
    }
    pub fn get_parent(&self, node: &Node) -> &Node {
        &self.container[node.parent_id]
    }
    pub fn get_children<'b>(&'b self, node: &Node) -> impl Iterator<Item = &'b Node> {
        node.children.iter().map(|x| &self.container[*x])
    }
    pub fn get_property<'b>(&self, node: &'b Node, name: impl AsRef<str>) -> Option<&'b Property> {
        let name = name.as_ref();
        node.props.iter().find(|prop| prop.name.as_ref() == name)
    }

    /// The sibling that follows `node` in its parent's child list.
    pub fn next_sibling(&self, node: &Node) -> Option<&Node> {
        if self.is_root(node) {
            return None;
        }
        let siblings = &self.get_parent(node).children;
        let pos = siblings.iter().position(|id| *id == node.node_id)?;
        siblings.get(pos + 1).map(|id| &self.container[*id])
    }

    /// Resolve an absolute path. Each section may be a full name (`uart@1000`) or, when
    /// unambiguous enough for the caller, a bare node name (`uart`).
    pub fn get_node(&self, path: impl AsRef<str>) -> Option<&Node> {
        let mut node = &self.container[self.root_id];
        for section in path.as_ref().split('/') {
            if section.trim().is_empty() {
                continue;
            }
            node = self
                .get_children(node)
                .find(|sub| sub.full_name.as_ref() == section)
                .or_else(|| {
                    self.get_children(node)
                        .find(|sub| sub.node_name.as_ref() == section)
                })?;
        }
        Some(node)
    }

    pub fn get_by_phandle(&self, phandle: u32) -> Option<&Node> {
        self.phandle_map.get(&phandle).map(|id| &self.container[*id])
    }

    /// Decode the `reg` property with the parent's `#address-cells` / `#size-cells`.
    pub fn get_reg_value(&self, node: &Node) -> Result<Vec<Range<usize>>, PropertyError> {
        let mut size_cel = 1;
        let mut addr_cel = 2;
        if !self.is_root(node) {
            let parent = self.get_parent(node);
            if let Some(prop) = self.get_property(parent, "#address-cells") {
                addr_cel = prop.value_as_u32()? as usize;
            }
            if let Some(prop) = self.get_property(parent, "#size-cells") {
                size_cel = prop.value_as_u32()? as usize;
            }
        }
        let reg = self
            .get_property(node, "reg")
            .ok_or(PropertyError::PropNotFound)?;
        let reg = decode_u32_array(&reg.data)?;
        let width = size_cel + addr_cel;
        if width == 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        let mut res = vec![];
        for entry in reg.chunks_exact(width) {
            let addr = entry[..addr_cel]
                .iter()
                .fold(0usize, |acc, cell| (acc << 32) + *cell as usize);
            let sz = entry[addr_cel..]
                .iter()
                .fold(0usize, |acc, cell| (acc << 32) + *cell as usize);
            res.push(addr..addr + sz);
        }
        Ok(res)
    }
}
