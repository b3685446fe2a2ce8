use crate::{fdt::FlatTree, node::DeviceTree};
use alloc::vec::Vec;

use super::FdtError;

/// Unflattens a [FlatTree] into a live [DeviceTree].
///
/// All strings and byte-array data are **copied**, so the blob may be discarded afterwards.
pub struct FdtReader<'a> {
    flat: &'a FlatTree,
    /// `(flat offset, live id)` pairs still waiting for their children.
    pending: Vec<(usize, usize)>,
}

impl<'a> FdtReader<'a> {
    pub fn new(flat: &'a FlatTree) -> FdtReader<'a> {
        FdtReader {
            flat,
            pending: Vec::new(),
        }
    }

    fn copy_props(&self, tree: &mut DeviceTree, offset: usize, id: usize) {
        for (name, data) in self.flat.properties(offset) {
            tree.set_prop(id, name, data);
        }
    }

    fn read_internal(&mut self) -> Result<DeviceTree, FdtError> {
        let mut tree = DeviceTree::new();
        let (root, root_id) = (self.flat.root(), tree.root_id);
        self.copy_props(&mut tree, root, root_id);
        self.pending.push((root, root_id));

        while let Some((offset, id)) = self.pending.pop() {
            let mut child = self.flat.first_subnode(offset);
            while let Some(child_off) = child {
                let name = self
                    .flat
                    .name(child_off)
                    .ok_or(FdtError::BadString { offset: child_off })?;
                let child_id = tree.add_node(id, name);
                self.copy_props(&mut tree, child_off, child_id);
                self.pending.push((child_off, child_id));
                child = self.flat.next_subnode(child_off);
            }
        }

        tree.mem_rsv_map = self
            .flat
            .reserved_regions()
            .into_iter()
            .map(|r| r.start as usize..r.end as usize)
            .collect();
        Ok(tree)
    }

    /// Build the live tree. Child order matches the blob.
    pub fn read(&mut self) -> Result<DeviceTree, FdtError> {
        let res = self.read_internal();
        self.pending.clear();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdt::writer::FdtWriter;
    use alloc::boxed::Box;

    #[test]
    fn unflattened_tree_keeps_order_and_props() {
        let mut w = FdtWriter::new();
        w.begin_node("");
        w.property_u32("#address-cells", 2);
        w.begin_node("a");
        w.property_u32("phandle", 1);
        w.begin_node("a1");
        w.end_node();
        w.end_node();
        w.begin_node("b");
        w.property_string("status", "disabled");
        w.end_node();
        w.end_node();
        let blob = Box::leak(w.finish().unwrap().into_boxed_slice());
        let flat = FlatTree::new(blob).unwrap();
        let tree = FdtReader::new(&flat).read().unwrap();

        let root = &tree.container[tree.root_id];
        assert_eq!(
            tree.get_property(root, "#address-cells").unwrap().value_as_u32().unwrap(),
            2
        );
        let names: Vec<&str> = tree.get_children(root).map(|n| n.full_name.as_ref()).collect();
        assert_eq!(names, ["a", "b"]);
        let a1 = tree.get_node("/a/a1").unwrap();
        assert_eq!(tree.get_parent(a1).full_name.as_ref(), "a");
        assert_eq!(tree.get_by_phandle(1).unwrap().full_name.as_ref(), "a");
        let b = tree.get_node("/b").unwrap();
        assert_eq!(
            tree.get_property(b, "status").unwrap().value_as_str().unwrap(),
            "disabled"
        );
    }
}
