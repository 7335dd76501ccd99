//! Helpers for building trees from `;`-joined stacks in tests
//!
//! Stacks are written outermost caller first (`"main;work"`), the reverse of
//! the leaf-first frame order used on the wire. Every name gets one location
//! with file `<name>.c` and a line number equal to its declaration order.

use crate::bottom_up::{BottomUpResults, FramePolicy};
use crate::caller_callee::CallerCalleeResults;
use crate::collector::{AnalysisResults, PerfDataCollector};
use crate::config::CostAggregation;
use crate::top_down::TopDownResults;
use crate::tree::NodeId;
use perfstream_shared::protocol::{
    AttributesDefinition, Command, ContextSwitchDefinition, FeaturesDefinition,
    LocationDefinition, LostDefinition, Record, Sample, SampleCost, StreamEvent, StreamWriter,
    StringDefinition, SymbolDefinition, DEFAULT_STREAM_VERSION,
};
use perfstream_shared::{
    CostUnit, FrameLocation, Location, LocationId, LocationTable, Symbol, SymbolTable, INVALID_ID,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub(crate) struct TreeFixture {
    ids: HashMap<String, LocationId>,
    results: BottomUpResults,
}

impl TreeFixture {
    pub(crate) fn new(names: &[&str]) -> Self {
        let mut symbols = SymbolTable::new();
        let mut locations = LocationTable::new();
        let mut ids = HashMap::new();
        for (index, name) in names.iter().enumerate() {
            let id = index as LocationId;
            locations.add_location(
                id,
                FrameLocation {
                    parent_location_id: INVALID_ID,
                    location: Location {
                        address: 0x1000 + index as u64 * 0x10,
                        rel_addr: index as u64 * 0x10,
                        file_line: format!("{}.c:{}", name, index + 1),
                    },
                },
            );
            let symbol = symbols.intern(Symbol::new(*name, "app"));
            locations.set_symbol(id, symbol);
            ids.insert(name.to_string(), id);
        }

        let mut results = BottomUpResults::new(
            Arc::new(symbols),
            Arc::new(locations),
            FramePolicy::default(),
        );
        results.costs.add_type("samples", CostUnit::Unknown);
        Self { ids, results }
    }

    /// Leaf-first location ids for an outermost-first stack
    pub(crate) fn frames(&self, stack: &str) -> Vec<LocationId> {
        stack.split(';').rev().map(|name| self.ids[name]).collect()
    }

    pub(crate) fn results(&mut self) -> &mut BottomUpResults {
        &mut self.results
    }

    pub(crate) fn into_results(mut self) -> BottomUpResults {
        self.results.tree.initialize_parents();
        self.results
    }
}

fn unique_names<'a>(stacks: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut names = Vec::new();
    for stack in stacks {
        for name in stack.split(';') {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// One sample of cost 1 per stack
pub(crate) fn bottom_up_from_stacks(stacks: &[&str]) -> BottomUpResults {
    analysis_from_stacks(stacks).0
}

/// Bottom-up tree plus the per-frame caller/callee costs of the same samples
pub(crate) fn analysis_from_stacks(stacks: &[&str]) -> (BottomUpResults, CallerCalleeResults) {
    let mut fixture = TreeFixture::new(&unique_names(stacks.iter().copied()));
    let mut caller_callee = CallerCalleeResults::new();
    for stack in stacks {
        let frames = fixture.frames(stack);
        let mut guard = HashSet::new();
        fixture.results().add_event(0, 1, &frames, |symbol, location| {
            caller_callee.add_frame_cost(symbol, &location.location, 0, 1, &mut guard);
        });
    }
    let bottom_up = fixture.into_results();
    caller_callee.build_from_bottom_up(&bottom_up, false);
    (bottom_up, caller_callee)
}

/// Stacks whose last element names the thread, e.g. `"main;work;T1"`
pub(crate) fn bottom_up_from_thread_stacks(stacks: &[&str]) -> BottomUpResults {
    let split: Vec<(&str, &str)> = stacks
        .iter()
        .map(|stack| stack.rsplit_once(';').unwrap_or(("", stack)))
        .collect();
    let mut fixture = TreeFixture::new(&unique_names(
        split.iter().map(|(frames, _)| *frames).filter(|f| !f.is_empty()),
    ));
    for (stack, thread) in &split {
        let frames = if stack.is_empty() {
            Vec::new()
        } else {
            fixture.frames(stack)
        };
        fixture
            .results()
            .add_event_with_root(Symbol::new(*thread, ""), 0, 1, &frames, |_, _| {});
    }
    fixture.into_results()
}

fn dump_tree(
    tree: &crate::tree::SymbolTree,
    name: impl Fn(NodeId) -> String,
    cost: impl Fn(NodeId) -> String,
) -> Vec<String> {
    let mut lines = Vec::new();
    tree.walk(|id, depth| {
        lines.push(format!("{}{}={}", " ".repeat(depth), name(id), cost(id)));
    });
    lines
}

pub(crate) fn dump_bottom_up(results: &BottomUpResults) -> Vec<String> {
    dump_tree(
        &results.tree,
        |id| results.symbol(id).name.clone(),
        |id| results.costs.cost(0, id).to_string(),
    )
}

pub(crate) fn dump_top_down(results: &TopDownResults) -> Vec<String> {
    dump_tree(
        &results.tree,
        |id| results.symbol(id).name.clone(),
        |id| {
            format!(
                "s:{},i:{}",
                results.self_costs.cost(0, id),
                results.inclusive_costs.cost(0, id)
            )
        },
    )
}

/// Entries sorted by name, each followed by its sorted caller (`<`) and
/// callee (`>`) edges
pub(crate) fn dump_caller_callee(results: &CallerCalleeResults) -> Vec<String> {
    let mut entries: Vec<_> = results.entries().collect();
    entries.sort_by(|(a, _), (b, _)| results.symbol(*a).name.cmp(&results.symbol(*b).name));

    let mut lines = Vec::new();
    for (symbol, entry) in entries {
        let name = &results.symbol(symbol).name;
        lines.push(format!(
            "{}=s:{},i:{}",
            name,
            results.self_costs.cost(0, entry.id),
            results.inclusive_costs.cost(0, entry.id)
        ));
        let mut edges: Vec<String> = entry
            .callers
            .iter()
            .map(|(caller, cost)| format!("{}<{}={}", name, results.symbol(*caller).name, cost[0]))
            .chain(
                entry
                    .callees
                    .iter()
                    .map(|(callee, cost)| format!("{}>{}={}", name, results.symbol(*callee).name, cost[0])),
            )
            .collect();
        edges.sort();
        lines.extend(edges);
    }
    lines
}

pub(crate) fn record(pid: u32, tid: u32, time: u64, cpu: u32) -> Record {
    Record {
        pid,
        tid,
        time,
        cpu,
    }
}

/// Feeds hand-built events into a [`PerfDataCollector`], declaring strings
/// on first use. Every thread belongs to process 1. The same events are
/// encoded into a stream for tests that decode.
pub(crate) struct StreamBuilder {
    pub(crate) collector: PerfDataCollector,
    writer: StreamWriter,
    strings: HashMap<String, i32>,
    locations: i32,
    attributes: i32,
}

impl StreamBuilder {
    pub(crate) fn new() -> Self {
        Self::with_aggregation(CostAggregation::BySymbol)
    }

    pub(crate) fn with_aggregation(aggregation: CostAggregation) -> Self {
        Self {
            collector: PerfDataCollector::new(aggregation, FramePolicy::default()),
            writer: StreamWriter::new(DEFAULT_STREAM_VERSION),
            strings: HashMap::new(),
            locations: 0,
            attributes: 0,
        }
    }

    pub(crate) fn apply(&mut self, event: StreamEvent) {
        self.writer.write_event(&event);
        self.collector.apply(event);
    }

    /// Encoded stream of every event applied so far
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.writer.as_bytes().to_vec()
    }

    pub(crate) fn string(&mut self, value: &str) -> i32 {
        if let Some(&id) = self.strings.get(value) {
            return id;
        }
        let id = self.strings.len() as i32;
        self.apply(StreamEvent::StringDefinition(StringDefinition {
            id,
            value: value.as_bytes().to_vec(),
        }));
        self.strings.insert(value.to_string(), id);
        id
    }

    pub(crate) fn attribute(&mut self, name: &str, attr_type: u32, period: u64) -> i32 {
        let name = self.string(name);
        let id = self.attributes;
        self.attributes += 1;
        self.apply(StreamEvent::AttributesDefinition(AttributesDefinition {
            id,
            attr_type,
            config: 0,
            name,
            uses_frequency: false,
            frequency_or_period: period,
        }));
        id
    }

    /// Location in `<name>.c:10` resolving to `name` in `binary`. An empty
    /// name leaves the symbol without debug information.
    pub(crate) fn function(&mut self, name: &str, binary: &str) -> LocationId {
        let file = self.string(&format!("{}.c", name));
        let id = self.locations;
        self.locations += 1;
        self.apply(StreamEvent::LocationDefinition(LocationDefinition {
            id,
            address: 0x1000 + id as u64,
            rel_addr: id as u64,
            file,
            pid: 1,
            line: 10,
            column: 0,
            parent_location_id: INVALID_ID,
        }));
        let name = self.string(name);
        let binary = self.string(binary);
        self.apply(StreamEvent::SymbolDefinition(SymbolDefinition {
            id,
            name,
            binary,
            path: INVALID_ID,
            ..SymbolDefinition::default()
        }));
        id
    }

    pub(crate) fn features(&mut self, cpus: u32) {
        self.apply(StreamEvent::FeaturesDefinition(Box::new(FeaturesDefinition {
            nr_cpus_online: cpus,
            nr_cpus_available: cpus,
            ..FeaturesDefinition::default()
        })));
    }

    pub(crate) fn command(&mut self, pid: u32, tid: u32, comm: &str) {
        let comm = self.string(comm);
        self.apply(StreamEvent::Command(Command {
            record: record(pid, tid, 1, 0),
            comm,
        }));
    }

    pub(crate) fn sample(&mut self, tid: u32, time: u64, frames: &[LocationId], costs: &[(i32, u64)]) {
        self.sample_on(tid, time, 0, frames, costs);
    }

    pub(crate) fn sample_on(
        &mut self,
        tid: u32,
        time: u64,
        cpu: u32,
        frames: &[LocationId],
        costs: &[(i32, u64)],
    ) {
        self.apply(StreamEvent::Sample(Sample {
            record: record(1, tid, time, cpu),
            frames: frames.to_vec(),
            guessed_frames: 0,
            costs: costs
                .iter()
                .map(|&(attribute_id, cost)| SampleCost { attribute_id, cost })
                .collect(),
        }));
    }

    pub(crate) fn switch(&mut self, tid: u32, time: u64, switch_out: bool) {
        self.apply(StreamEvent::ContextSwitch(ContextSwitchDefinition {
            record: record(1, tid, time, 0),
            switch_out,
        }));
    }

    pub(crate) fn lost(&mut self, tid: u32, time: u64, lost: u64) {
        self.apply(StreamEvent::LostDefinition(LostDefinition {
            record: record(1, tid, time, 0),
            lost,
        }));
    }

    pub(crate) fn finish(self) -> AnalysisResults {
        self.collector.finalize()
    }
}
