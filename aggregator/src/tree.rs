//! Arena-backed symbol tree shared by the bottom-up and top-down views
//!
//! Nodes live in one vector and are addressed by [`NodeId`], which doubles as
//! the index into the cost tables. Parent links are filled in by
//! [`SymbolTree::initialize_parents`] once the tree stops growing.

use perfstream_shared::SymbolId;

/// Dense node id, equal to the node's index in the arena
pub type NodeId = u32;

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub symbol: SymbolId,
    /// Children in insertion order
    pub children: Vec<NodeId>,
    parent: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    parents_linked: bool,
}

impl SymbolTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id as usize]
    }

    pub fn symbol(&self, id: NodeId) -> SymbolId {
        self.node(id).symbol
    }

    /// Top-level nodes
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of `parent`, or the top level for `None`
    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.node(id).children,
            None => &self.roots,
        }
    }

    pub fn find_child(&self, parent: Option<NodeId>, symbol: SymbolId) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&child| self.symbol(child) == symbol)
    }

    /// Child of `parent` for `symbol`, created with the next dense id if missing
    pub fn child_for_symbol(&mut self, parent: Option<NodeId>, symbol: SymbolId) -> NodeId {
        if let Some(existing) = self.find_child(parent, symbol) {
            return existing;
        }

        let id = self.nodes.len() as NodeId;
        self.nodes.push(TreeNode {
            symbol,
            children: Vec::new(),
            parent: None,
        });
        match parent {
            Some(parent) => self.nodes[parent as usize].children.push(id),
            None => self.roots.push(id),
        }
        self.parents_linked = false;
        id
    }

    /// Link every node to its parent. Top-level nodes keep `None`.
    pub fn initialize_parents(&mut self) {
        for index in 0..self.nodes.len() {
            for child_index in 0..self.nodes[index].children.len() {
                let child = self.nodes[index].children[child_index];
                self.nodes[child as usize].parent = Some(index as NodeId);
            }
        }
        for &root in &self.roots {
            self.nodes[root as usize].parent = None;
        }
        self.parents_linked = true;
    }

    pub fn parents_linked(&self) -> bool {
        self.parents_linked
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        debug_assert!(self.parents_linked, "parents are not linked yet");
        self.node(id).parent
    }

    /// `id` followed by its ancestors up to the top level
    pub fn path_to_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            path.push(parent);
            current = parent;
        }
        path
    }

    /// Pre-order walk over all nodes with their depth
    pub fn walk(&self, mut visit: impl FnMut(NodeId, usize)) {
        let mut pending: Vec<(NodeId, usize)> =
            self.roots.iter().rev().map(|&root| (root, 0)).collect();
        while let Some((id, depth)) = pending.pop() {
            visit(id, depth);
            pending.extend(
                self.node(id)
                    .children
                    .iter()
                    .rev()
                    .map(|&child| (child, depth + 1)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_for_symbol_reuses_nodes() {
        let mut tree = SymbolTree::new();
        let a = tree.child_for_symbol(None, 1);
        let b = tree.child_for_symbol(Some(a), 2);
        assert_eq!(tree.child_for_symbol(None, 1), a);
        assert_eq!(tree.child_for_symbol(Some(a), 2), b);

        // same symbol at another position is a new node
        let b_root = tree.child_for_symbol(None, 2);
        assert_ne!(b_root, b);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots(), &[a, b_root]);
    }

    #[test]
    fn test_ids_are_dense() {
        let mut tree = SymbolTree::new();
        let ids: Vec<NodeId> = (0..5)
            .map(|symbol| tree.child_for_symbol(None, symbol))
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_parents_after_linking() {
        let mut tree = SymbolTree::new();
        let a = tree.child_for_symbol(None, 1);
        let b = tree.child_for_symbol(Some(a), 2);
        let c = tree.child_for_symbol(Some(b), 3);
        assert!(!tree.parents_linked());

        tree.initialize_parents();
        assert_eq!(tree.parent(a), None);
        assert_eq!(tree.parent(c), Some(b));
        assert_eq!(tree.path_to_root(c), vec![c, b, a]);
    }

    #[test]
    fn test_walk_is_pre_order() {
        let mut tree = SymbolTree::new();
        let a = tree.child_for_symbol(None, 1);
        let b = tree.child_for_symbol(Some(a), 2);
        let c = tree.child_for_symbol(Some(a), 3);
        let d = tree.child_for_symbol(None, 4);

        let mut visited = Vec::new();
        tree.walk(|id, depth| visited.push((id, depth)));
        assert_eq!(visited, vec![(a, 0), (b, 1), (c, 1), (d, 0)]);
    }
}
