//! Per-symbol caller/callee aggregation
//!
//! Collapses every call chain into one entry per symbol: its self and
//! inclusive cost, the direct callers and callees with the cost flowing
//! through each edge, and costs per source line and per address.

use crate::bottom_up::BottomUpResults;
use crate::tree::NodeId;
use perfstream_shared::{CostType, Costs, ItemCost, Location, Symbol, SymbolId, SymbolTable};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Self and inclusive cost of one source location or address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationCost {
    pub self_cost: ItemCost,
    pub inclusive_cost: ItemCost,
}

impl LocationCost {
    pub fn new(num_types: usize) -> Self {
        Self {
            self_cost: ItemCost::new(num_types),
            inclusive_cost: ItemCost::new(num_types),
        }
    }

    fn ensure_len(&mut self, num_types: usize) {
        self.self_cost.ensure_len(num_types);
        self.inclusive_cost.ensure_len(num_types);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallerCalleeEntry {
    /// Dense id, index into the result's cost tables
    pub id: u32,
    pub callers: HashMap<SymbolId, ItemCost>,
    pub callees: HashMap<SymbolId, ItemCost>,
    /// Keyed by `file:line`
    pub source_map: HashMap<String, LocationCost>,
    /// Keyed by address relative to the binary
    pub offsets: HashMap<u64, LocationCost>,
}

impl CallerCalleeEntry {
    pub fn caller_mut(&mut self, caller: SymbolId, num_types: usize) -> &mut ItemCost {
        self.callers
            .entry(caller)
            .or_insert_with(|| ItemCost::new(num_types))
    }

    pub fn callee_mut(&mut self, callee: SymbolId, num_types: usize) -> &mut ItemCost {
        self.callees
            .entry(callee)
            .or_insert_with(|| ItemCost::new(num_types))
    }

    pub fn source_mut(&mut self, location: &str, num_types: usize) -> &mut LocationCost {
        self.source_map
            .entry(location.to_string())
            .or_insert_with(|| LocationCost::new(num_types))
    }

    pub fn offset_mut(&mut self, rel_addr: u64, num_types: usize) -> &mut LocationCost {
        self.offsets
            .entry(rel_addr)
            .or_insert_with(|| LocationCost::new(num_types))
    }

    /// Grow every cost vector to `num_types` slots
    fn ensure_len(&mut self, num_types: usize) {
        for cost in self.callers.values_mut().chain(self.callees.values_mut()) {
            cost.ensure_len(num_types);
        }
        for cost in self.source_map.values_mut().chain(self.offsets.values_mut()) {
            cost.ensure_len(num_types);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallerCalleeResults {
    entries: HashMap<SymbolId, CallerCalleeEntry>,
    /// Costs per entry id
    pub self_costs: Costs,
    pub inclusive_costs: Costs,
    pub symbols: Arc<SymbolTable>,
}

impl CallerCalleeResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `symbol`, created on first use
    pub fn entry_mut(&mut self, symbol: SymbolId) -> &mut CallerCalleeEntry {
        let next_id = self.entries.len() as u32;
        self.entries
            .entry(symbol)
            .or_insert_with(|| CallerCalleeEntry {
                id: next_id,
                ..CallerCalleeEntry::default()
            })
    }

    pub fn entry(&self, symbol: SymbolId) -> Option<&CallerCalleeEntry> {
        self.entries.get(&symbol)
    }

    pub fn entries(&self) -> impl Iterator<Item = (SymbolId, &CallerCalleeEntry)> {
        self.entries.iter().map(|(&symbol, entry)| (symbol, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.symbols.get(id)
    }

    pub fn self_cost(&self, symbol: SymbolId) -> ItemCost {
        self.entry(symbol)
            .map(|entry| self.self_costs.item_cost(entry.id))
            .unwrap_or_else(|| ItemCost::new(self.self_costs.num_types()))
    }

    pub fn inclusive_cost(&self, symbol: SymbolId) -> ItemCost {
        self.entry(symbol)
            .map(|entry| self.inclusive_costs.item_cost(entry.id))
            .unwrap_or_else(|| ItemCost::new(self.inclusive_costs.num_types()))
    }

    /// Per-frame bookkeeping while a sample is added to the bottom-up tree.
    ///
    /// `recursion_guard` must be fresh for every sample: a symbol is only
    /// credited the first time it appears on the stack, and self cost goes
    /// to the leaf frame alone.
    pub fn add_frame_cost(
        &mut self,
        symbol: SymbolId,
        location: &Location,
        cost_type: CostType,
        cost: i64,
        recursion_guard: &mut HashSet<SymbolId>,
    ) {
        if recursion_guard.contains(&symbol) {
            return;
        }
        let is_leaf = recursion_guard.is_empty();
        let num_types = cost_type + 1;

        let entry = self.entry_mut(symbol);
        let source = entry.source_mut(&location.file_line, num_types);
        source.inclusive_cost.add(cost_type, cost);
        if is_leaf {
            source.self_cost.add(cost_type, cost);
        }
        let offset = entry.offset_mut(location.rel_addr, num_types);
        offset.inclusive_cost.add(cost_type, cost);
        if is_leaf {
            offset.self_cost.add(cost_type, cost);
        }

        recursion_guard.insert(symbol);
    }

    /// Build from a bottom-up tree whose parents are linked
    pub fn from_bottom_up(bottom_up: &BottomUpResults, skip_first_level: bool) -> Self {
        let mut results = Self::new();
        results.build_from_bottom_up(bottom_up, skip_first_level);
        results
    }

    /// Add self, inclusive and edge costs on top of any per-frame costs
    /// gathered with [`Self::add_frame_cost`]
    pub fn build_from_bottom_up(&mut self, bottom_up: &BottomUpResults, skip_first_level: bool) {
        self.symbols = Arc::clone(&bottom_up.symbols);
        self.self_costs.initialize_from(&bottom_up.costs);
        self.inclusive_costs.initialize_from(&bottom_up.costs);

        let num_types = bottom_up.costs.num_types();
        for entry in self.entries.values_mut() {
            entry.ensure_len(num_types);
        }

        self.build(bottom_up, None, skip_first_level);
    }

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
                self.add_chain(bottom_up, row, &diff, skip_first_level);
            }

            total += &row_cost;
        }

        total
    }

    /// Credit `diff` along the chain from the outermost caller `row` inwards
    fn add_chain(
        &mut self,
        bottom_up: &BottomUpResults,
        row: NodeId,
        diff: &ItemCost,
        skip_first_level: bool,
    ) {
        let num_types = diff.len();
        let mut chain = bottom_up.tree.path_to_root(row);
        if skip_first_level {
            chain.pop();
        }
        let Some(&innermost) = chain.last() else {
            return;
        };

        let mut recursion_guard = HashSet::new();
        let mut edge_guard = HashSet::new();
        let mut caller: Option<SymbolId> = None;

        for &node in &chain {
            let symbol = bottom_up.tree.symbol(node);
            let id = self.entry_mut(symbol).id;

            if recursion_guard.insert(symbol) {
                self.inclusive_costs.add_item(id, diff);
            }
            if node == innermost {
                self.self_costs.add_item(id, diff);
            }

            if let Some(caller) = caller {
                if edge_guard.insert((symbol, caller)) {
                    *self.entry_mut(caller).callee_mut(symbol, num_types) += diff;
                    *self.entry_mut(symbol).caller_mut(caller, num_types) += diff;
                }
            }
            caller = Some(symbol);
        }
    }
}
