//! Decode-side aggregation
//!
//! [`PerfDataCollector`] applies decoded stream events in wire order: it fills
//! the interning tables, registers cost types, appends every sample to the
//! per-thread and per-cpu event log and adds it to the bottom-up tree. Once the
//! stream ends, [`PerfDataCollector::finalize`] derives the remaining views.

use crate::bottom_up::{aggregation_root, BottomUpResults, FramePolicy};
use crate::caller_callee::CallerCalleeResults;
use crate::config::CostAggregation;
use crate::session::ParserEvent;
use crate::top_down::TopDownResults;
use perfstream_shared::protocol::{
    AttributesDefinition, Command, ContextSwitchDefinition, ErrorDefinition, FeaturesDefinition,
    LocationDefinition, LostDefinition, Record, Sample, StreamEvent, SymbolDefinition,
    ThreadStart,
};
use perfstream_shared::{
    CostSummary, CostType, CostUnit, CpuEvents, CpuId, Event, EventResults, FrameLocation,
    FrequencyData, FrequencyResults, Location, LocationId, Pid, StackId, StringTable, Summary,
    Symbol, ThreadEvents, ThreadState, Tid, TimeRange, Timestamp, Tracepoint, TracepointResults,
    INVALID_ID,
};
use perfstream_shared::saturating_cost;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the scheduler tracepoint whose stacks explain off-CPU time
pub const SCHED_SWITCH: &str = "sched:sched_switch";

/// Label of the cost type registered for time spent switched out
pub const OFF_CPU_TIME: &str = "off-CPU Time";

/// Label of the cost type registered for lost records
pub const LOST_EVENT: &str = "Lost Event";

pub const NO_CALL_STACKS_WARNING: &str =
    "Samples contained no call stack frames. Consider passing --call-graph dwarf to perf record.";

/// Everything derived from one decode or filter pass.
///
/// Each view is shared so notifications and the session baseline can hand
/// them out without copying.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResults {
    pub summary: Arc<Summary>,
    pub bottom_up: Arc<BottomUpResults>,
    pub top_down: Arc<TopDownResults>,
    pub caller_callee: Arc<CallerCalleeResults>,
    pub events: Arc<EventResults>,
    pub frequency: Arc<FrequencyResults>,
    pub tracepoints: Arc<TracepointResults>,
    /// Reported after the data-available notifications
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ModuleSymbols {
    total: u64,
    missing: u64,
}

/// Accumulates decoded events into result sets
#[derive(Debug)]
pub struct PerfDataCollector {
    aggregation: CostAggregation,
    strings: StringTable,
    attributes: HashMap<i32, AttributesDefinition>,
    attribute_cost_ids: HashMap<i32, CostType>,
    cost_ids_by_name: HashMap<String, CostType>,
    sched_switch_cost_id: Option<CostType>,
    bottom_up: BottomUpResults,
    caller_callee: CallerCalleeResults,
    events: EventResults,
    summary: Summary,
    frequency: FrequencyResults,
    tracepoints: TracepointResults,
    stack_ids: HashMap<Vec<LocationId>, StackId>,
    unique_pids: HashSet<Pid>,
    unique_tids: HashSet<Tid>,
    application_time: TimeRange,
    last_sample_time_per_core: Vec<Timestamp>,
    samples_with_call_stack: u64,
    symbols_by_module: BTreeMap<String, ModuleSymbols>,
}

impl PerfDataCollector {
    pub fn new(aggregation: CostAggregation, frame_policy: FramePolicy) -> Self {
        Self {
            aggregation,
            strings: StringTable::new(),
            attributes: HashMap::new(),
            attribute_cost_ids: HashMap::new(),
            cost_ids_by_name: HashMap::new(),
            sched_switch_cost_id: None,
            bottom_up: BottomUpResults::new(Arc::default(), Arc::default(), frame_policy),
            caller_callee: CallerCalleeResults::new(),
            events: EventResults::default(),
            summary: Summary::default(),
            frequency: FrequencyResults::default(),
            tracepoints: TracepointResults::default(),
            stack_ids: HashMap::new(),
            unique_pids: HashSet::new(),
            unique_tids: HashSet::new(),
            application_time: TimeRange::default(),
            last_sample_time_per_core: Vec::new(),
            samples_with_call_stack: 0,
            symbols_by_module: BTreeMap::new(),
        }
    }

    /// Apply one decoded event.
    ///
    /// Returns a notification for events that are reported rather than
    /// aggregated (progress updates).
    pub fn apply(&mut self, event: StreamEvent) -> Option<ParserEvent> {
        match event {
            StreamEvent::ThreadStart(start) => {
                self.add_record(&start.record);
                self.add_thread_start(&start);
            }
            StreamEvent::ThreadEnd(record) => {
                self.add_record(&record);
                let (pid, tid) = ids(&record);
                if let Some(thread) = self.events.find_thread_mut(pid, tid) {
                    thread.time.end = record.time;
                }
            }
            StreamEvent::Command(command) => {
                self.add_record(&command.record);
                self.add_command(&command);
            }
            StreamEvent::LocationDefinition(location) => self.add_location(&location),
            StreamEvent::SymbolDefinition(symbol) => self.add_symbol(&symbol),
            StreamEvent::StringDefinition(string) => {
                let value = String::from_utf8_lossy(&string.value).into_owned();
                self.strings.insert(string.id, value);
            }
            StreamEvent::LostDefinition(lost) => {
                self.add_record(&lost.record);
                self.add_lost(&lost);
            }
            StreamEvent::FeaturesDefinition(features) => self.set_features(&features),
            StreamEvent::Error(error) => self.add_error(error),
            StreamEvent::Progress(progress) => return Some(ParserEvent::Progress(progress)),
            StreamEvent::TracePointFormat(_) => {
                debug!("Ignoring tracepoint format definition");
            }
            StreamEvent::AttributesDefinition(attribute) => self.add_attributes(attribute),
            StreamEvent::ContextSwitch(switch) => {
                self.add_record(&switch.record);
                self.add_context_switch(&switch);
            }
            StreamEvent::Sample(sample) | StreamEvent::TracePointSample(sample) => {
                self.add_sample(sample)
            }
            StreamEvent::DebugInfoDownloadProgress(progress) => {
                return Some(ParserEvent::DebugInfoDownloadProgress {
                    url: self.strings.get(progress.url).to_string(),
                    numerator: progress.numerator,
                    denominator: progress.denominator,
                });
            }
        }
        None
    }

    /// Number of samples decoded so far
    pub fn sample_count(&self) -> u64 {
        self.summary.sample_count
    }

    fn add_record(&mut self, record: &Record) {
        let (pid, tid) = ids(record);
        self.unique_pids.insert(pid);
        self.unique_tids.insert(tid);

        let time = &mut self.application_time;
        if record.time < time.start || time.start == 0 {
            time.start = record.time;
        }
        if record.time > time.end || time.end == 0 {
            time.end = record.time;
        }
    }

    fn thread_index(&self, pid: Pid, tid: Tid) -> Option<usize> {
        self.events
            .threads
            .iter()
            .rposition(|thread| thread.pid == pid && thread.tid == tid)
    }

    /// Start tracking a thread. Threads seen for the first time were most
    /// likely alive when recording started.
    fn add_thread(&mut self, record: &Record) -> usize {
        let (pid, tid) = ids(record);
        let mut thread = ThreadEvents::new(pid, tid);
        thread.time.start = self.application_time.start;
        thread.name = self
            .events
            .thread_names
            .get(pid, tid)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                if pid != tid {
                    self.events.thread_names.process_name(pid)
                } else {
                    None
                }
            })
            .unwrap_or_default()
            .to_string();
        self.events.threads.push(thread);
        self.events.threads.len() - 1
    }

    fn add_thread_start(&mut self, start: &ThreadStart) {
        let index = self.add_thread(&start.record);
        self.events.threads[index].time.start = start.record.time;

        if start.ppid != start.record.pid {
            let pid = start.record.pid as Pid;
            let parent = self
                .events
                .thread_names
                .process_name(start.ppid as Pid)
                .unwrap_or_default()
                .to_string();
            self.events.thread_names.insert(pid, pid, parent.clone());
            self.events.threads[index].name = parent;
        }
    }

    fn add_command(&mut self, command: &Command) {
        let (pid, tid) = ids(&command.record);
        let comm = self.strings.get(command.comm).to_string();
        if let Some(thread) = self.events.find_thread_mut(pid, tid) {
            thread.name = comm.clone();
        }
        // a later ThreadStart may refer to it
        self.events.thread_names.insert(pid, tid, comm);
    }

    fn add_location(&mut self, definition: &LocationDefinition) {
        let mut file_line = String::new();
        if definition.file != INVALID_ID {
            file_line.push_str(self.strings.get(definition.file));
            if definition.line != -1 {
                file_line.push_str(&format!(":{}", definition.line));
            }
        }

        self.bottom_up.locations_mut().add_location(
            definition.id,
            FrameLocation {
                parent_location_id: definition.parent_location_id,
                location: Location {
                    address: definition.address,
                    rel_addr: definition.rel_addr,
                    file_line,
                },
            },
        );
    }

    fn add_symbol(&mut self, definition: &SymbolDefinition) {
        let symbol = Symbol {
            name: self.strings.get(definition.name).to_string(),
            binary: self.strings.get(definition.binary).to_string(),
            path: self.strings.get(definition.path).to_string(),
            actual_path: definition
                .actual_path
                .map(|id| self.strings.get(id).to_string())
                .unwrap_or_default(),
            rel_addr: definition.rel_addr,
            size: definition.size,
            is_kernel: definition.is_kernel,
        };

        let module = self
            .symbols_by_module
            .entry(symbol.binary.clone())
            .or_default();
        module.total += 1;
        if symbol.name.is_empty() && !symbol.binary.is_empty() {
            module.missing += 1;
        }

        let id = self.bottom_up.symbols_mut().intern(symbol);
        self.bottom_up.locations_mut().set_symbol(definition.id, id);
    }

    fn add_cost_type(&mut self, label: &str, unit: CostUnit) -> CostType {
        let cost_type = self.bottom_up.costs.add_type(label, unit);
        self.summary.costs.push(CostSummary::new(label, unit));
        if label == SCHED_SWITCH {
            self.sched_switch_cost_id = Some(cost_type);
        }
        debug!("Registered cost type {} as {}", label, cost_type);
        cost_type
    }

    /// Attributes sharing a name share one cost type
    fn add_attributes(&mut self, attribute: AttributesDefinition) {
        let name = self.strings.get(attribute.name).to_string();
        let cost_type = match self.cost_ids_by_name.get(&name) {
            Some(&cost_type) => cost_type,
            None => {
                let unit = if attribute.is_tracepoint() {
                    CostUnit::Tracepoint
                } else {
                    CostUnit::Unknown
                };
                let cost_type = self.add_cost_type(&name, unit);
                self.cost_ids_by_name.insert(name, cost_type);
                cost_type
            }
        };

        self.attribute_cost_ids.insert(attribute.id, cost_type);
        self.attributes.insert(attribute.id, attribute);
    }

    fn off_cpu_cost_id(&mut self) -> CostType {
        match self.events.off_cpu_time_cost_id {
            Some(cost_type) => cost_type,
            None => {
                let cost_type = self.add_cost_type(OFF_CPU_TIME, CostUnit::Time);
                self.events.off_cpu_time_cost_id = Some(cost_type);
                cost_type
            }
        }
    }

    fn lost_event_cost_id(&mut self) -> CostType {
        match self.events.lost_event_cost_id {
            Some(cost_type) => cost_type,
            None => {
                let cost_type = self.add_cost_type(LOST_EVENT, CostUnit::Unknown);
                self.events.lost_event_cost_id = Some(cost_type);
                cost_type
            }
        }
    }

    fn intern_stack(&mut self, frames: &[LocationId]) -> StackId {
        if let Some(&id) = self.stack_ids.get(frames) {
            return id;
        }
        let id = self.events.stacks.len() as StackId;
        self.events.stacks.push(frames.to_vec());
        self.stack_ids.insert(frames.to_vec(), id);
        id
    }

    /// Add to the bottom-up tree and collect per-frame caller/callee costs
    fn add_bottom_up_event(
        &mut self,
        root: Option<Symbol>,
        cost_type: CostType,
        cost: i64,
        frames: &[LocationId],
    ) {
        let mut recursion_guard = HashSet::new();
        let caller_callee = &mut self.caller_callee;
        self.bottom_up
            .add_aggregated_event(root, cost_type, cost, frames, |symbol, location| {
                caller_callee.add_frame_cost(
                    symbol,
                    &location.location,
                    cost_type,
                    cost,
                    &mut recursion_guard,
                );
            });
    }

    fn aggregation_root(&self, pid: Pid, tid: Tid, cpu: CpuId) -> Option<Symbol> {
        aggregation_root(self.aggregation, &self.events.thread_names, pid, tid, cpu)
    }

    fn add_frequency_data(&mut self, sample: &Sample) {
        let cpu = sample.record.cpu as usize;
        if self.last_sample_time_per_core.len() <= cpu {
            self.last_sample_time_per_core.resize(cpu + 1, 0);
        }
        let last_time =
            std::mem::replace(&mut self.last_sample_time_per_core[cpu], sample.record.time);
        if last_time == 0 || sample.record.time <= last_time {
            return;
        }
        let delta = (sample.record.time - last_time) as f64;

        if self.frequency.cores.len() <= cpu {
            self.frequency.cores.resize_with(cpu + 1, Default::default);
        }
        let core = &mut self.frequency.cores[cpu];
        for cost in &sample.costs {
            // attribute ids are dense, so known ids bound the growth below
            if !self.attributes.contains_key(&cost.attribute_id) {
                continue;
            }
            let Ok(attribute_id) = usize::try_from(cost.attribute_id) else {
                continue;
            };
            while core.costs.len() <= attribute_id {
                let name = self
                    .attributes
                    .get(&(core.costs.len() as i32))
                    .map(|attribute| self.strings.get(attribute.name))
                    .unwrap_or_default();
                core.costs.push(perfstream_shared::PerCostFrequencyData {
                    cost_name: name.to_string(),
                    values: Vec::new(),
                });
            }
            core.costs[attribute_id].values.push(FrequencyData {
                time: sample.record.time,
                cost: cost.cost as f64 / delta,
            });
        }
    }

    fn add_sample(&mut self, mut sample: Sample) {
        // a zero cost on a period based attribute means one period
        for sample_cost in &mut sample.costs {
            if sample_cost.cost == 0 {
                if let Some(attribute) = self.attributes.get(&sample_cost.attribute_id) {
                    if !attribute.uses_frequency {
                        sample_cost.cost = attribute.frequency_or_period;
                    }
                }
            }
        }

        self.add_record(&sample.record);
        self.add_frequency_data(&sample);

        let (pid, tid) = ids(&sample.record);
        let cpu = sample.record.cpu;
        let time = sample.record.time;
        let thread = match self.thread_index(pid, tid) {
            Some(index) => index,
            None => self.add_thread(&sample.record),
        };
        if self.events.cpus.len() <= cpu as usize {
            self.events
                .cpus
                .resize_with(cpu as usize + 1, CpuEvents::default);
        }
        let stack_id = self.intern_stack(&sample.frames);
        let root = self.aggregation_root(pid, tid, cpu);

        self.summary.sample_count += 1;
        for sample_cost in &sample.costs {
            let Some(&cost_type) = self.attribute_cost_ids.get(&sample_cost.attribute_id) else {
                warn!(
                    "Unexpected attribute id {}, only know about {} attributes so far",
                    sample_cost.attribute_id,
                    self.attribute_cost_ids.len()
                );
                continue;
            };

            let event = Event {
                time,
                cost: sample_cost.cost,
                cost_type,
                stack_id: Some(stack_id),
                cpu_id: cpu,
            };
            self.events.threads[thread].events.push(event);
            self.events.cpus[cpu as usize].events.push(event);

            if let Some(attribute) = self.attributes.get(&sample_cost.attribute_id) {
                let name = self.strings.get(attribute.name);
                // sched_switch shows up as off-CPU time instead
                if attribute.is_tracepoint() && name != SCHED_SWITCH {
                    self.tracepoints.tracepoints.push(Tracepoint {
                        time,
                        name: name.to_string(),
                    });
                }
            }

            let cost_summary = &mut self.summary.costs[cost_type];
            cost_summary.sample_count += 1;
            cost_summary.total_period =
                cost_summary.total_period.saturating_add(sample_cost.cost);

            self.add_bottom_up_event(
                root.clone(),
                cost_type,
                saturating_cost(sample_cost.cost),
                &sample.frames,
            );
        }

        if sample.frames.len() > 1 {
            self.samples_with_call_stack += 1;
        }
    }

    fn add_context_switch(&mut self, switch: &ContextSwitchDefinition) {
        let record = &switch.record;
        let (pid, tid) = ids(record);
        let Some(index) = self.thread_index(pid, tid) else {
            debug!("Context switch for unknown thread {}/{}", pid, tid);
            return;
        };

        let thread = &self.events.threads[index];
        if !switch.switch_out && thread.state == ThreadState::OffCpu {
            let switched_out_at = thread.last_switch_time;
            let switch_time = record.time.saturating_sub(switched_out_at);
            let cost_type = self.off_cpu_cost_id();

            let cost_summary = &mut self.summary.costs[cost_type];
            cost_summary.sample_count += 1;
            cost_summary.total_period = cost_summary.total_period.saturating_add(switch_time);

            // blame the stack that scheduled the thread out
            let stack_id = self.sched_switch_cost_id.and_then(|sched_switch| {
                self.events.threads[index]
                    .events
                    .iter()
                    .rev()
                    .find(|event| event.cost_type == sched_switch)
                    .and_then(|event| event.stack_id)
            });
            if let Some(stack_id) = stack_id {
                let frames = self.events.stack(stack_id).to_vec();
                let root = self.aggregation_root(pid, tid, record.cpu);
                self.add_bottom_up_event(root, cost_type, saturating_cost(switch_time), &frames);
            }

            let thread = &mut self.events.threads[index];
            thread.off_cpu_time += switch_time;
            thread.events.push(Event {
                time: switched_out_at,
                cost: switch_time,
                cost_type,
                stack_id,
                cpu_id: record.cpu,
            });
        }

        let thread = &mut self.events.threads[index];
        thread.last_switch_time = record.time;
        thread.state = if switch.switch_out {
            ThreadState::OffCpu
        } else {
            ThreadState::OnCpu
        };
    }

    fn add_lost(&mut self, lost: &LostDefinition) {
        self.summary.lost_chunks += 1;
        self.summary.lost_events += lost.lost;

        let (pid, tid) = ids(&lost.record);
        let Some(index) = self.thread_index(pid, tid) else {
            debug!("Lost events for unknown thread {}/{}", pid, tid);
            return;
        };

        let event = Event {
            time: lost.record.time,
            cost: lost.lost,
            cost_type: self.lost_event_cost_id(),
            stack_id: None,
            cpu_id: lost.record.cpu,
        };
        self.events.threads[index].events.push(event);
        // lost records carry no usable cpu
        for cpu in &mut self.events.cpus {
            cpu.events.push(event);
        }
    }

    fn set_features(&mut self, features: &FeaturesDefinition) {
        let summary = &mut self.summary;
        summary.command = match features.cmdline.split_first() {
            // the first argument is perf itself, possibly with a path
            Some((_, args)) => format!("perf {}", lossy_join(args, " ")),
            None => "??".to_string(),
        };
        summary.host_name = lossy(&features.host_name);
        summary.linux_kernel_version = lossy(&features.os_release);
        summary.perf_version = lossy(&features.version);
        summary.cpu_description = lossy(&features.cpu_desc);
        summary.cpu_id = lossy(&features.cpu_id);
        summary.cpu_architecture = lossy(&features.arch);
        summary.cpus_online = features.nr_cpus_online;
        summary.cpus_available = features.nr_cpus_available;
        summary.cpu_sibling_cores = format!("[{}]", lossy_join(&features.sibling_cores, "], ["));
        summary.cpu_sibling_threads =
            format!("[{}]", lossy_join(&features.sibling_threads, "], ["));
        summary.total_memory_in_kib = features.total_mem;

        let available = features.nr_cpus_available as usize;
        if self.events.cpus.len() < available {
            self.events.cpus.resize_with(available, CpuEvents::default);
        }
    }

    fn add_error(&mut self, error: ErrorDefinition) {
        warn!("perfparser error ({:?}): {}", error.kind(), error.message);
        self.summary.add_error(error.message);
    }

    /// Link the trees, derive top-down and caller/callee views and close
    /// the per-thread bookkeeping
    pub fn finalize(mut self) -> AnalysisResults {
        self.bottom_up.tree.initialize_parents();

        let application_time = self.application_time;
        self.summary.application_time = application_time;
        self.summary.thread_count = self.unique_tids.len() as u32;
        self.summary.process_count = self.unique_pids.len() as u32;

        let skip_first_level = self.aggregation.has_synthetic_root();
        let top_down = TopDownResults::from_bottom_up(&self.bottom_up, skip_first_level);
        self.caller_callee
            .build_from_bottom_up(&self.bottom_up, skip_first_level);

        for thread in &mut self.events.threads {
            thread.time.start = thread.time.start.max(application_time.start);
            thread.time.end = thread.time.end.min(application_time.end);
            if thread.name.is_empty() {
                thread.name = format!("#{}", thread.tid);
            }

            // switched out when recording stopped
            if thread.state == ThreadState::OffCpu {
                thread.off_cpu_time += thread.time.end.saturating_sub(thread.last_switch_time);
            }

            if thread.off_cpu_time > 0 {
                self.summary.off_cpu_time += thread.off_cpu_time;
                self.summary.on_cpu_time +=
                    thread.time.delta().saturating_sub(thread.off_cpu_time);
            }
        }

        for (cpu_id, cpu) in self.events.cpus.iter_mut().enumerate() {
            cpu.cpu_id = cpu_id as CpuId;
        }
        self.events.total_costs = self.summary.costs.clone();

        for (module, symbols) in &self.symbols_by_module {
            if symbols.missing > 0 {
                self.summary.add_error(format!(
                    "Module \"{}\" is missing {} of {} debug symbols.",
                    module, symbols.missing, symbols.total
                ));
            }
        }

        let mut warnings = Vec::new();
        // samples recorded without --call-graph have a single frame
        if self.samples_with_call_stack == 0 {
            warnings.push(NO_CALL_STACKS_WARNING.to_string());
        }

        debug!(
            "Finalized {} samples, {} bottom-up nodes, {} caller/callee entries",
            self.summary.sample_count,
            self.bottom_up.tree.len(),
            self.caller_callee.len()
        );

        AnalysisResults {
            summary: Arc::new(self.summary),
            bottom_up: Arc::new(self.bottom_up),
            top_down: Arc::new(top_down),
            caller_callee: Arc::new(self.caller_callee),
            events: Arc::new(self.events),
            frequency: Arc::new(self.frequency),
            tracepoints: Arc::new(self.tracepoints),
            warnings,
        }
    }
}

fn ids(record: &Record) -> (Pid, Tid) {
    (record.pid as Pid, record.tid as Tid)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn lossy_join(parts: &[Vec<u8>], separator: &str) -> String {
    parts
        .iter()
        .map(|part| String::from_utf8_lossy(part))
        .collect::<Vec<_>>()
        .join(separator)
}
