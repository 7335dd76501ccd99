//! Whole-recording summary

use crate::types::costs::CostUnit;
use crate::types::events::TimeRange;
use serde::{Deserialize, Serialize};

/// Totals for one cost type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSummary {
    pub label: String,
    pub sample_count: u64,
    pub total_period: u64,
    pub unit: CostUnit,
}

impl CostSummary {
    pub fn new(label: impl Into<String>, unit: CostUnit) -> Self {
        Self {
            label: label.into(),
            sample_count: 0,
            total_period: 0,
            unit,
        }
    }
}

/// Host, recording and cost overview
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub application_time: TimeRange,
    pub on_cpu_time: u64,
    pub off_cpu_time: u64,
    pub process_count: u32,
    pub thread_count: u32,
    pub sample_count: u64,
    pub lost_chunks: u64,
    pub lost_events: u64,
    pub command: String,
    pub host_name: String,
    pub linux_kernel_version: String,
    pub perf_version: String,
    pub cpu_description: String,
    pub cpu_id: String,
    pub cpu_architecture: String,
    pub cpus_online: u32,
    pub cpus_available: u32,
    pub cpu_sibling_cores: String,
    pub cpu_sibling_threads: String,
    pub total_memory_in_kib: u64,
    pub costs: Vec<CostSummary>,
    /// Deduplicated producer errors and data-quality warnings
    pub errors: Vec<String>,
}

impl Summary {
    /// Record an error message unless it was already reported
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_are_deduplicated() {
        let mut summary = Summary::default();
        summary.add_error("missing elf");
        summary.add_error("missing elf");
        summary.add_error("broken file");
        assert_eq!(summary.errors, vec!["missing elf", "broken file"]);
    }

    #[test]
    fn test_summary_serialization() {
        let mut summary = Summary::default();
        summary.costs.push(CostSummary::new("cycles", CostUnit::Unknown));
        summary.application_time = TimeRange::new(1, 2);

        let json = serde_json::to_string(&summary).unwrap();
        let decoded: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.costs, summary.costs);
        assert_eq!(decoded.application_time, summary.application_time);
    }
}
