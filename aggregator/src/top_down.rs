//! Top-down call tree derived from the bottom-up tree
//!
//! Top-level nodes are the outermost callers. Self cost lands on the
//! innermost frame of each chain; inclusive cost on every node of the chain.

use crate::bottom_up::BottomUpResults;
use crate::tree::{NodeId, SymbolTree};
use perfstream_shared::{Costs, ItemCost, Symbol, SymbolTable};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct TopDownResults {
    pub tree: SymbolTree,
    pub self_costs: Costs,
    pub inclusive_costs: Costs,
    pub symbols: Arc<SymbolTable>,
}

impl TopDownResults {
    /// Invert `bottom_up`, whose parents must already be linked.
    ///
    /// With `skip_first_level` the synthetic top level of the bottom-up tree
    /// (thread, process or cpu) stays on top instead of becoming the
    /// innermost frame.
    pub fn from_bottom_up(bottom_up: &BottomUpResults, skip_first_level: bool) -> Self {
        let mut results = Self {
            tree: SymbolTree::new(),
            self_costs: Costs::new(),
            inclusive_costs: Costs::new(),
            symbols: Arc::clone(&bottom_up.symbols),
        };
        results.self_costs.initialize_from(&bottom_up.costs);
        results.inclusive_costs.initialize_from(&bottom_up.costs);

        results.build(bottom_up, None, skip_first_level);
        results.tree.initialize_parents();
        results
    }

    /// Returns the summed cost of `parent`'s children
    fn build(
        &mut self,
        bottom_up: &BottomUpResults,
        parent: Option<NodeId>,
        skip_first_level: bool,
    ) -> ItemCost {
        let num_types = bottom_up.costs.num_types();
        let mut total = ItemCost::new(num_types);

        for &row in bottom_up.tree.children(parent) {
            let child_cost = self.build(bottom_up, Some(row), skip_first_level);
            let row_cost = bottom_up.costs.item_cost(row);
            let diff = &row_cost - &child_cost;

            if !diff.is_zero() {
                // outermost caller first
                let mut chain = bottom_up.tree.path_to_root(row);
                if skip_first_level {
                    chain.rotate_right(1);
                }

                let mut frame = None;
                let innermost = chain.len() - 1;
                for (index, &node) in chain.iter().enumerate() {
                    let id = self
                        .tree
                        .child_for_symbol(frame, bottom_up.tree.symbol(node));
                    self.inclusive_costs.add_item(id, &diff);
                    if index == innermost {
                        self.self_costs.add_item(id, &diff);
                    }
                    frame = Some(id);
                }
            }

            total += &row_cost;
        }

        total
    }

    pub fn symbol(&self, id: NodeId) -> &Symbol {
        self.symbols.get(self.tree.symbol(id))
    }

    /// Sum of inclusive costs of the top-level nodes
    pub fn root_inclusive_cost(&self, cost_type: usize) -> i64 {
        self.tree
            .roots()
            .iter()
            .map(|&root| self.inclusive_costs.cost(cost_type, root))
            .fold(0, i64::saturating_add)
    }
}
