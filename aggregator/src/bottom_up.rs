//! Bottom-up call tree
//!
//! Top-level nodes are the innermost frames of each sample; descending the
//! tree walks towards the callers. Every node accumulates the cost of all
//! samples whose call chain ends in the node's path.

use crate::config::CostAggregation;
use crate::tree::{NodeId, SymbolTree};
use perfstream_shared::{
    CostType, Costs, CpuId, FrameLocation, LocationId, LocationTable, Pid, Symbol, SymbolId,
    SymbolTable, ThreadNames, Tid, EMPTY_SYMBOL, INVALID_ID,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static EMPTY_LOCATION: FrameLocation = FrameLocation::EMPTY;

/// Treatment of frames that did not resolve to a symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramePolicy {
    /// Replace an unresolved frame by its inline parent's symbol and skip
    /// that parent. Collapses the function entry trampolines perfparser
    /// reports.
    #[default]
    SkipEntryTrampolines,
    /// Report every frame as is
    KeepAll,
}

/// Resolves location ids of a stack into symbols, following inline chains
#[derive(Debug, Clone, Copy)]
pub struct FrameWalker<'a> {
    locations: &'a LocationTable,
    policy: FramePolicy,
}

impl<'a> FrameWalker<'a> {
    pub fn new(locations: &'a LocationTable, policy: FramePolicy) -> Self {
        Self { locations, policy }
    }

    /// Visit frames leaf first until `visit` returns false
    pub fn for_each(
        &self,
        frames: &[LocationId],
        mut visit: impl FnMut(SymbolId, &FrameLocation) -> bool,
    ) {
        for &id in frames {
            if !self.handle_frame(id, &mut visit) {
                break;
            }
        }
    }

    fn handle_frame(
        &self,
        location_id: LocationId,
        visit: &mut impl FnMut(SymbolId, &FrameLocation) -> bool,
    ) -> bool {
        let mut id = location_id;
        let mut skip_next = false;
        while id != INVALID_ID {
            let location = self.locations.location(id).unwrap_or(&EMPTY_LOCATION);
            let parent = inline_parent(id, location);
            if skip_next {
                id = parent;
                skip_next = false;
                continue;
            }

            let mut symbol = self.locations.symbol(id);
            if symbol == EMPTY_SYMBOL && self.policy == FramePolicy::SkipEntryTrampolines {
                symbol = self.locations.symbol(parent);
                skip_next = true;
            }

            if !visit(symbol, location) {
                return false;
            }
            id = parent;
        }
        true
    }
}

/// Parent of an inlined location. Parents are declared before their children,
/// so a parent id that is not smaller ends the chain.
fn inline_parent(id: LocationId, location: &FrameLocation) -> LocationId {
    if location.parent_location_id < id {
        location.parent_location_id
    } else {
        INVALID_ID
    }
}

/// Synthetic top-level symbol for a sample under `aggregation`
pub fn aggregation_root(
    aggregation: CostAggregation,
    names: &ThreadNames,
    pid: Pid,
    tid: Tid,
    cpu: CpuId,
) -> Option<Symbol> {
    let label = match aggregation {
        CostAggregation::BySymbol => return None,
        CostAggregation::ByThread => names
            .get(pid, tid)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| tid.to_string()),
        CostAggregation::ByProcess => names
            .process_name(pid)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| pid.to_string()),
        CostAggregation::ByCpu => format!("CPU {}", cpu),
    };
    Some(Symbol::new(label, ""))
}

#[derive(Debug, Clone, Default)]
pub struct BottomUpResults {
    pub tree: SymbolTree,
    /// Costs per node id
    pub costs: Costs,
    pub symbols: Arc<SymbolTable>,
    pub locations: Arc<LocationTable>,
    pub frame_policy: FramePolicy,
}

impl BottomUpResults {
    pub fn new(
        symbols: Arc<SymbolTable>,
        locations: Arc<LocationTable>,
        frame_policy: FramePolicy,
    ) -> Self {
        Self {
            tree: SymbolTree::new(),
            costs: Costs::new(),
            symbols,
            locations,
            frame_policy,
        }
    }

    /// Mutable symbol table, copied first if shared
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        Arc::make_mut(&mut self.symbols)
    }

    /// Mutable location table, copied first if shared
    pub fn locations_mut(&mut self) -> &mut LocationTable {
        Arc::make_mut(&mut self.locations)
    }

    pub fn frame_walker(&self) -> FrameWalker<'_> {
        FrameWalker::new(&self.locations, self.frame_policy)
    }

    /// Visit resolved frames of `frames`, stopping when `visit` returns false
    pub fn foreach_frame(
        &self,
        frames: &[LocationId],
        visit: impl FnMut(SymbolId, &FrameLocation) -> bool,
    ) {
        self.frame_walker().for_each(frames, visit);
    }

    pub fn symbol(&self, id: NodeId) -> &Symbol {
        self.symbols.get(self.tree.symbol(id))
    }

    /// Add `cost` along the stack and return the node of the outermost frame.
    ///
    /// `frame_callback` sees every retained frame leaf first. The total is
    /// incremented even when no frame remains.
    pub fn add_event(
        &mut self,
        cost_type: CostType,
        cost: i64,
        frames: &[LocationId],
        frame_callback: impl FnMut(SymbolId, &FrameLocation),
    ) -> Option<NodeId> {
        self.costs.add_total(cost_type, cost);
        self.add_frames(None, cost_type, cost, frames, frame_callback)
    }

    /// Like [`Self::add_event`], below a synthetic top-level `root` that
    /// also receives the cost
    pub fn add_event_with_root(
        &mut self,
        root: Symbol,
        cost_type: CostType,
        cost: i64,
        frames: &[LocationId],
        frame_callback: impl FnMut(SymbolId, &FrameLocation),
    ) -> Option<NodeId> {
        // avoid copying a shared table for roots that are already known
        let root_symbol = match self.symbols.find(&root) {
            Some(id) => id,
            None => self.symbols_mut().intern(root),
        };
        let root = self.tree.child_for_symbol(None, root_symbol);
        self.costs.add(cost_type, root, cost);
        self.costs.add_total(cost_type, cost);
        self.add_frames(Some(root), cost_type, cost, frames, frame_callback)
            .or(Some(root))
    }

    /// Dispatch on an optional synthetic root
    pub fn add_aggregated_event(
        &mut self,
        root: Option<Symbol>,
        cost_type: CostType,
        cost: i64,
        frames: &[LocationId],
        frame_callback: impl FnMut(SymbolId, &FrameLocation),
    ) -> Option<NodeId> {
        match root {
            Some(root) => self.add_event_with_root(root, cost_type, cost, frames, frame_callback),
            None => self.add_event(cost_type, cost, frames, frame_callback),
        }
    }

    fn add_frames(
        &mut self,
        start: Option<NodeId>,
        cost_type: CostType,
        cost: i64,
        frames: &[LocationId],
        mut frame_callback: impl FnMut(SymbolId, &FrameLocation),
    ) -> Option<NodeId> {
        let walker = FrameWalker::new(&self.locations, self.frame_policy);
        let tree = &mut self.tree;
        let costs = &mut self.costs;

        let mut parent = start;
        let mut last = None;
        walker.for_each(frames, |symbol, location| {
            let node = tree.child_for_symbol(parent, symbol);
            costs.add(cost_type, node, cost);
            frame_callback(symbol, location);
            parent = Some(node);
            last = Some(node);
            true
        });
        last
    }

    /// Sum of top-level node costs for `cost_type`
    pub fn root_cost(&self, cost_type: CostType) -> i64 {
        self.tree
            .roots()
            .iter()
            .map(|&root| self.costs.cost(cost_type, root))
            .fold(0, i64::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{bottom_up_from_stacks, dump_bottom_up, TreeFixture};
    use perfstream_shared::{CostUnit, Location};

    fn tree1() -> Vec<&'static str> {
        vec![
            "A;B;C",
            "A;B;D",
            "A;B;D",
            "A;B;C;E",
            "A;B;C;E;C",
            "A;B;C;E;C;E",
            "A;B;C;C",
            "C",
            "C",
        ]
    }

    #[test]
    fn test_bottom_up_tree() {
        let results = bottom_up_from_stacks(&tree1());
        let expected = vec![
            "C=5", " B=1", "  A=1", " E=1", "  C=1", "   B=1", "    A=1", " C=1", "  B=1",
            "   A=1", "D=2", " B=2", "  A=2", "E=2", " C=2", "  B=1", "   A=1", "  E=1",
            "   C=1", "    B=1", "     A=1",
        ];
        assert_eq!(dump_bottom_up(&results), expected);
        assert_eq!(results.costs.total(0), 9);
    }

    #[test]
    fn test_root_costs_match_total() {
        let results = bottom_up_from_stacks(&tree1());
        assert_eq!(results.root_cost(0), results.costs.total(0));
    }

    #[test]
    fn test_add_event_returns_outermost_frame() {
        let mut fixture = TreeFixture::new(&["A", "B"]);
        let frames = fixture.frames("A;B");
        let results = fixture.results();
        let node = results.add_event(0, 1, &frames, |_, _| {}).unwrap();
        assert_eq!(results.symbol(node).name, "A");
        assert!(results.add_event(0, 1, &[], |_, _| {}).is_none());
        assert_eq!(results.costs.total(0), 2);
    }

    #[test]
    fn test_event_with_root() {
        let mut fixture = TreeFixture::new(&["A", "B"]);
        let frames = fixture.frames("A;B");
        let results = fixture.results();
        results.add_event_with_root(Symbol::new("T1", ""), 0, 3, &frames, |_, _| {});
        results.add_event_with_root(Symbol::new("T1", ""), 0, 2, &[], |_, _| {});
        results.tree.initialize_parents();

        let root = results.tree.roots()[0];
        assert_eq!(results.symbol(root).name, "T1");
        assert_eq!(results.costs.cost(0, root), 5);
        assert_eq!(results.costs.total(0), 5);
    }

    fn inline_locations() -> (Arc<SymbolTable>, Arc<LocationTable>) {
        let mut symbols = SymbolTable::new();
        let mut locations = LocationTable::new();
        let frame = |parent| FrameLocation {
            parent_location_id: parent,
            location: Location::default(),
        };
        // 0: outer function, 1: entry trampoline without symbol inlined
        // into 0, 2: a regular frame
        locations.add_location(0, frame(INVALID_ID));
        locations.add_location(1, frame(0));
        locations.add_location(2, frame(INVALID_ID));
        let outer = symbols.intern(Symbol::new("outer", "app"));
        let main = symbols.intern(Symbol::new("main", "app"));
        locations.set_symbol(0, outer);
        locations.set_symbol(2, main);
        (Arc::new(symbols), Arc::new(locations))
    }

    #[test]
    fn test_entry_trampolines_are_collapsed() {
        let (symbols, locations) = inline_locations();
        let mut results =
            BottomUpResults::new(symbols, locations, FramePolicy::SkipEntryTrampolines);
        results.costs.add_type("samples", CostUnit::Unknown);

        let mut seen = Vec::new();
        results.add_event(0, 1, &[1, 2], |symbol, _| seen.push(symbol));
        let names: Vec<&str> = seen
            .iter()
            .map(|&id| results.symbols.get(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["outer", "main"]);
    }

    #[test]
    fn test_keep_all_frames() {
        let (symbols, locations) = inline_locations();
        let results = BottomUpResults::new(symbols, locations, FramePolicy::KeepAll);

        let mut seen = Vec::new();
        results.foreach_frame(&[1, 2], |symbol, _| {
            seen.push(symbol);
            true
        });
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], EMPTY_SYMBOL);
    }

    #[test]
    fn test_foreach_frame_stops_early() {
        let (symbols, locations) = inline_locations();
        let results = BottomUpResults::new(symbols, locations, FramePolicy::KeepAll);
        let mut count = 0;
        results.foreach_frame(&[1, 2], |_, _| {
            count += 1;
            false
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_cyclic_inline_chain_terminates() {
        let mut symbols = SymbolTable::new();
        let mut locations = LocationTable::new();
        let frame = |parent| FrameLocation {
            parent_location_id: parent,
            location: Location::default(),
        };
        locations.add_location(0, frame(0));
        locations.add_location(1, frame(2));
        locations.add_location(2, frame(1));
        let main = symbols.intern(Symbol::new("main", "app"));
        let helper = symbols.intern(Symbol::new("helper", "app"));
        locations.set_symbol(0, main);
        locations.set_symbol(1, helper);
        locations.set_symbol(2, main);
        let results = BottomUpResults::new(
            Arc::new(symbols),
            Arc::new(locations),
            FramePolicy::SkipEntryTrampolines,
        );

        let mut seen = Vec::new();
        results.foreach_frame(&[0, 2], |symbol, _| {
            seen.push(symbol);
            true
        });
        // 2 -> 1 is a valid inline parent, 1 -> 2 is not
        assert_eq!(seen, vec![main, main, helper]);
    }

    #[test]
    fn test_unknown_location_resolves_to_empty_symbol() {
        let results = BottomUpResults::default();
        let mut seen = Vec::new();
        results.foreach_frame(&[42], |symbol, location| {
            seen.push((symbol, location.parent_location_id));
            true
        });
        // the empty symbol has no parent to substitute, so it is kept
        assert_eq!(seen, vec![(EMPTY_SYMBOL, INVALID_ID)]);
    }

    #[test]
    fn test_aggregation_root_labels() {
        let mut names = ThreadNames::default();
        names.insert(10, 10, "server".to_string());
        names.insert(10, 11, "worker".to_string());

        let root = |aggregation, tid| aggregation_root(aggregation, &names, 10, tid, 3);
        assert_eq!(root(CostAggregation::BySymbol, 11), None);
        assert_eq!(root(CostAggregation::ByThread, 11).unwrap().name, "worker");
        assert_eq!(root(CostAggregation::ByThread, 12).unwrap().name, "12");
        assert_eq!(root(CostAggregation::ByProcess, 12).unwrap().name, "server");
        assert_eq!(root(CostAggregation::ByCpu, 11).unwrap().name, "CPU 3");
    }
}
