//! Filter criteria for re-aggregating a retained event log

use crate::types::events::{CpuId, Pid, Tid, TimeRange};
use crate::types::symbols::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to keep when re-aggregating. The default keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterAction {
    /// Keep events inside this range; ignored unless [`TimeRange::is_valid`]
    pub time: Option<TimeRange>,
    pub process_id: Option<Pid>,
    pub thread_id: Option<Tid>,
    pub cpu_id: Option<CpuId>,
    pub exclude_process_ids: HashSet<Pid>,
    pub exclude_thread_ids: HashSet<Tid>,
    pub exclude_cpu_ids: HashSet<CpuId>,
    /// Keep stacks containing all of these symbols
    pub include_symbols: HashSet<Symbol>,
    pub exclude_symbols: HashSet<Symbol>,
    /// Keep stacks touching all of these binaries
    pub include_binaries: HashSet<String>,
    pub exclude_binaries: HashSet<String>,
}

impl FilterAction {
    /// Effective time range, if any
    pub fn time_range(&self) -> Option<TimeRange> {
        self.time.filter(TimeRange::is_valid)
    }

    /// Whether symbols or binaries restrict the accepted stacks
    pub fn filters_by_stack(&self) -> bool {
        !self.include_symbols.is_empty()
            || !self.exclude_symbols.is_empty()
            || !self.include_binaries.is_empty()
            || !self.exclude_binaries.is_empty()
    }

    /// Whether individual events, not just whole threads, need checking
    pub fn filters_events(&self) -> bool {
        self.time_range().is_some()
            || self.cpu_id.is_some()
            || !self.exclude_cpu_ids.is_empty()
            || self.filters_by_stack()
    }

    /// No constraint at all: results equal the unfiltered ones
    pub fn is_identity(&self) -> bool {
        self.time_range().is_none()
            && self.process_id.is_none()
            && self.thread_id.is_none()
            && self.cpu_id.is_none()
            && self.exclude_process_ids.is_empty()
            && self.exclude_thread_ids.is_empty()
            && self.exclude_cpu_ids.is_empty()
            && !self.filters_by_stack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        assert!(FilterAction::default().is_identity());
    }

    #[test]
    fn test_unset_time_range_is_identity() {
        let filter = FilterAction {
            time: Some(TimeRange::default()),
            ..FilterAction::default()
        };
        assert!(filter.is_identity());
        assert!(filter.time_range().is_none());
    }

    #[test]
    fn test_constraints_break_identity() {
        let by_pid = FilterAction {
            process_id: Some(1),
            ..FilterAction::default()
        };
        assert!(!by_pid.is_identity());
        assert!(!by_pid.filters_events());

        let mut by_symbol = FilterAction::default();
        by_symbol.exclude_symbols.insert(Symbol::new("malloc", "libc.so.6"));
        assert!(!by_symbol.is_identity());
        assert!(by_symbol.filters_by_stack());
        assert!(by_symbol.filters_events());
    }
}
