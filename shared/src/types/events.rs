//! Replayable event log
//!
//! These types hold every decoded sample, context switch and lost-event record
//! per thread and per cpu. The filter pipeline replays them instead of
//! decoding the stream again, so they are never mutated after decoding.

use crate::types::costs::CostType;
use crate::types::summary::CostSummary;
use crate::types::symbols::LocationId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp in nanoseconds
pub type Timestamp = u64;

/// Process ID
pub type Pid = i32;

/// Thread ID
pub type Tid = i32;

/// CPU core number
pub type CpuId = u32;

/// Index into [`EventResults::stacks`]
pub type StackId = u32;

/// Inclusive time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Range covering every timestamp
    pub const MAX: TimeRange = TimeRange {
        start: 0,
        end: Timestamp::MAX,
    };

    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// A range with both bounds zero means "unset"
    pub fn is_valid(&self) -> bool {
        self.start > 0 || self.end > 0
    }

    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && time <= self.end
    }

    pub fn delta(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Both ranges share at least one timestamp
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self { start: 0, end: 0 }
    }
}

/// One cost sample attributed to a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: Timestamp,
    pub cost: u64,
    pub cost_type: CostType,
    /// `None` for events without a call stack (lost events)
    pub stack_id: Option<StackId>,
    pub cpu_id: CpuId,
}

/// Scheduling state derived from context switch records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadState {
    #[default]
    Unknown,
    OnCpu,
    OffCpu,
}

/// Events of one thread in arrival order
#[derive(Debug, Clone)]
pub struct ThreadEvents {
    pub pid: Pid,
    pub tid: Tid,
    pub time: TimeRange,
    pub events: Vec<Event>,
    pub name: String,
    pub last_switch_time: Timestamp,
    pub off_cpu_time: u64,
    pub state: ThreadState,
}

impl ThreadEvents {
    pub fn new(pid: Pid, tid: Tid) -> Self {
        Self {
            pid,
            tid,
            ..Self::default()
        }
    }
}

impl Default for ThreadEvents {
    fn default() -> Self {
        Self {
            pid: 0,
            tid: 0,
            time: TimeRange::MAX,
            events: Vec::new(),
            name: String::new(),
            last_switch_time: Timestamp::MAX,
            off_cpu_time: 0,
            state: ThreadState::Unknown,
        }
    }
}

/// Events that ran on one cpu
#[derive(Debug, Clone, Default)]
pub struct CpuEvents {
    pub cpu_id: CpuId,
    pub events: Vec<Event>,
}

/// Command names per process and thread
#[derive(Debug, Clone, Default)]
pub struct ThreadNames {
    names: HashMap<Pid, HashMap<Tid, String>>,
}

impl ThreadNames {
    pub fn insert(&mut self, pid: Pid, tid: Tid, name: String) {
        self.names.entry(pid).or_default().insert(tid, name);
    }

    pub fn get(&self, pid: Pid, tid: Tid) -> Option<&str> {
        self.names
            .get(&pid)
            .and_then(|threads| threads.get(&tid))
            .map(String::as_str)
    }

    /// Name of the process, i.e. of its main thread
    pub fn process_name(&self, pid: Pid) -> Option<&str> {
        self.get(pid, pid)
    }

    /// Thread name, falling back to the process name
    pub fn thread_or_process_name(&self, pid: Pid, tid: Tid) -> Option<&str> {
        self.get(pid, tid).or_else(|| self.process_name(pid))
    }
}

/// The retained event log of one decode pass
#[derive(Debug, Clone, Default)]
pub struct EventResults {
    pub threads: Vec<ThreadEvents>,
    pub cpus: Vec<CpuEvents>,
    /// Unique call stacks, leaf first
    pub stacks: Vec<Vec<LocationId>>,
    pub total_costs: Vec<CostSummary>,
    pub off_cpu_time_cost_id: Option<CostType>,
    pub lost_event_cost_id: Option<CostType>,
    pub thread_names: ThreadNames,
}

impl EventResults {
    /// Most recently added thread with this pid/tid
    pub fn find_thread(&self, pid: Pid, tid: Tid) -> Option<&ThreadEvents> {
        self.threads
            .iter()
            .rev()
            .find(|thread| thread.pid == pid && thread.tid == tid)
    }

    pub fn find_thread_mut(&mut self, pid: Pid, tid: Tid) -> Option<&mut ThreadEvents> {
        self.threads
            .iter_mut()
            .rev()
            .find(|thread| thread.pid == pid && thread.tid == tid)
    }

    pub fn stack(&self, stack_id: StackId) -> &[LocationId] {
        &self.stacks[stack_id as usize]
    }

    /// Number of events across all threads
    pub fn event_count(&self) -> usize {
        self.threads.iter().map(|thread| thread.events.len()).sum()
    }
}

/// Instantaneous event rate at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyData {
    pub time: Timestamp,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerCostFrequencyData {
    pub cost_name: String,
    pub values: Vec<FrequencyData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerCoreFrequencyData {
    /// Indexed by attribute id
    pub costs: Vec<PerCostFrequencyData>,
}

/// Event rates per core and attribute
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrequencyResults {
    pub cores: Vec<PerCoreFrequencyData>,
}

impl FrequencyResults {
    /// Drop data points outside `range`
    pub fn retain_time(&mut self, range: &TimeRange) {
        for core in &mut self.cores {
            for cost in &mut core.costs {
                cost.values.retain(|point| range.contains(point.time));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracepoint {
    pub time: Timestamp,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracepointResults {
    pub tracepoints: Vec<Tracepoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_validity() {
        assert!(!TimeRange::default().is_valid());
        assert!(TimeRange::new(0, 10).is_valid());
        assert!(TimeRange::MAX.is_valid());
    }

    #[test]
    fn test_time_range_contains_is_inclusive() {
        let range = TimeRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert_eq!(range.delta(), 10);
        assert!(range.overlaps(&TimeRange::new(20, 30)));
        assert!(!range.overlaps(&TimeRange::new(21, 30)));
    }

    #[test]
    fn test_find_thread_prefers_latest() {
        let mut results = EventResults::default();
        let mut first = ThreadEvents::new(1, 2);
        first.name = "old".to_string();
        let mut second = ThreadEvents::new(1, 2);
        second.name = "new".to_string();
        results.threads.push(first);
        results.threads.push(second);

        assert_eq!(results.find_thread(1, 2).unwrap().name, "new");
        assert!(results.find_thread(1, 3).is_none());
    }

    #[test]
    fn test_thread_defaults() {
        let thread = ThreadEvents::new(10, 11);
        assert_eq!(thread.time, TimeRange::MAX);
        assert_eq!(thread.last_switch_time, Timestamp::MAX);
        assert_eq!(thread.state, ThreadState::Unknown);
    }

    #[test]
    fn test_thread_names_fallback() {
        let mut names = ThreadNames::default();
        names.insert(100, 100, "server".to_string());
        names.insert(100, 101, "worker".to_string());
        assert_eq!(names.thread_or_process_name(100, 101), Some("worker"));
        assert_eq!(names.thread_or_process_name(100, 102), Some("server"));
        assert_eq!(names.get(200, 200), None);
    }

    #[test]
    fn test_frequency_retain_time() {
        let mut results = FrequencyResults {
            cores: vec![PerCoreFrequencyData {
                costs: vec![PerCostFrequencyData {
                    cost_name: "cycles".to_string(),
                    values: vec![
                        FrequencyData { time: 5, cost: 1.0 },
                        FrequencyData { time: 15, cost: 2.0 },
                    ],
                }],
            }],
        };
        results.retain_time(&TimeRange::new(10, 20));
        assert_eq!(results.cores[0].costs[0].values.len(), 1);
        assert_eq!(results.cores[0].costs[0].values[0].time, 15);
    }
}
