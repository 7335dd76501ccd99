//! Re-aggregation of a retained event log
//!
//! Replays the per-thread events of a finished decode pass through the
//! bottom-up aggregation, keeping only what a [`FilterAction`] accepts. The
//! baseline is only read; every view of the result is rebuilt.

use crate::bottom_up::{aggregation_root, BottomUpResults};
use crate::caller_callee::CallerCalleeResults;
use crate::collector::AnalysisResults;
use crate::config::CostAggregation;
use crate::top_down::TopDownResults;
use perfstream_shared::{
    saturating_cost, CpuEvents, Event, EventResults, FilterAction, LocationId, Symbol,
    ThreadEvents, TimeRange,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The task was cancelled before it produced results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Parsing stopped.")]
pub struct Stopped;

fn check(cancel: &CancellationToken) -> Result<(), Stopped> {
    if cancel.is_cancelled() {
        Err(Stopped)
    } else {
        Ok(())
    }
}

/// Rebuild every view of `baseline` from the events `filter` accepts.
///
/// An identity filter hands back the baseline itself. The summary is shared
/// with the baseline; it describes the whole recording either way.
pub fn filter_results(
    baseline: &AnalysisResults,
    filter: &FilterAction,
    aggregation: CostAggregation,
    cancel: &CancellationToken,
) -> Result<AnalysisResults, Stopped> {
    if filter.is_identity() {
        debug!("Identity filter, reusing baseline results");
        return Ok(AnalysisResults {
            warnings: Vec::new(),
            ..baseline.clone()
        });
    }

    let source = &baseline.events;
    let time = filter.time_range();

    let mut bottom_up = BottomUpResults::new(
        Arc::clone(&baseline.bottom_up.symbols),
        Arc::clone(&baseline.bottom_up.locations),
        baseline.bottom_up.frame_policy,
    );
    bottom_up.costs.initialize_from(&baseline.bottom_up.costs);
    bottom_up.costs.clear_totals();
    let mut caller_callee = CallerCalleeResults::new();

    let mut tracepoints = (*baseline.tracepoints).clone();
    let mut frequency = (*baseline.frequency).clone();
    if let Some(range) = time {
        tracepoints
            .tracepoints
            .retain(|tracepoint| range.contains(tracepoint.time));
        frequency.retain_time(&range);
    }

    let accepted_stacks = if filter.filters_by_stack() {
        Some(accepted_stacks(&baseline.bottom_up, &source.stacks, filter, cancel)?)
    } else {
        None
    };

    let mut events = EventResults {
        threads: Vec::new(),
        cpus: source
            .cpus
            .iter()
            .map(|cpu| CpuEvents {
                cpu_id: cpu.cpu_id,
                events: Vec::new(),
            })
            .collect(),
        stacks: source.stacks.clone(),
        total_costs: source.total_costs.clone(),
        off_cpu_time_cost_id: source.off_cpu_time_cost_id,
        lost_event_cost_id: source.lost_event_cost_id,
        thread_names: source.thread_names.clone(),
    };

    // threads stay in their original order
    for thread in &source.threads {
        check(cancel)?;
        if !thread_matches(thread, filter, time) {
            continue;
        }

        let kept: Vec<Event> = thread
            .events
            .iter()
            .filter(|event| event_matches(event, filter, time, accepted_stacks.as_deref()))
            .copied()
            .collect();
        if kept.is_empty() {
            continue;
        }

        for event in &kept {
            if Some(event.cost_type) == events.lost_event_cost_id {
                for cpu in &mut events.cpus {
                    cpu.events.push(*event);
                }
            } else if Some(event.cost_type) != events.off_cpu_time_cost_id {
                if let Some(cpu) = events.cpus.get_mut(event.cpu_id as usize) {
                    cpu.events.push(*event);
                }
            }

            let Some(stack_id) = event.stack_id else {
                continue;
            };
            let root = aggregation_root(
                aggregation,
                &source.thread_names,
                thread.pid,
                thread.tid,
                event.cpu_id,
            );
            let cost = saturating_cost(event.cost);
            let mut recursion_guard = HashSet::new();
            bottom_up.add_aggregated_event(
                root,
                event.cost_type,
                cost,
                source.stack(stack_id),
                |symbol, location| {
                    caller_callee.add_frame_cost(
                        symbol,
                        &location.location,
                        event.cost_type,
                        cost,
                        &mut recursion_guard,
                    );
                },
            );
        }

        events.threads.push(ThreadEvents {
            pid: thread.pid,
            tid: thread.tid,
            time: thread.time,
            events: kept,
            name: thread.name.clone(),
            last_switch_time: thread.last_switch_time,
            off_cpu_time: thread.off_cpu_time,
            state: thread.state,
        });
    }

    bottom_up.tree.initialize_parents();
    check(cancel)?;

    let skip_first_level = aggregation.has_synthetic_root();
    caller_callee.build_from_bottom_up(&bottom_up, skip_first_level);
    check(cancel)?;

    let top_down = TopDownResults::from_bottom_up(&bottom_up, skip_first_level);
    check(cancel)?;

    debug!(
        "Filter kept {} of {} threads and {} of {} events",
        events.threads.len(),
        source.threads.len(),
        events.event_count(),
        source.event_count()
    );

    Ok(AnalysisResults {
        summary: Arc::clone(&baseline.summary),
        bottom_up: Arc::new(bottom_up),
        top_down: Arc::new(top_down),
        caller_callee: Arc::new(caller_callee),
        events: Arc::new(events),
        frequency: Arc::new(frequency),
        tracepoints: Arc::new(tracepoints),
        warnings: Vec::new(),
    })
}

/// Whether each unique stack satisfies the symbol and binary constraints.
///
/// A stack is rejected as soon as one frame matches an exclusion. It is
/// accepted once every included symbol and binary was seen.
fn accepted_stacks(
    bottom_up: &BottomUpResults,
    stacks: &[Vec<LocationId>],
    filter: &FilterAction,
    cancel: &CancellationToken,
) -> Result<Vec<bool>, Stopped> {
    let walker = bottom_up.frame_walker();
    let mut accepted = Vec::with_capacity(stacks.len());

    for frames in stacks {
        check(cancel)?;

        let mut missing_symbols: HashSet<&Symbol> = filter.include_symbols.iter().collect();
        let mut missing_binaries: HashSet<&str> =
            filter.include_binaries.iter().map(String::as_str).collect();
        let mut excluded = false;

        walker.for_each(frames, |symbol_id, _| {
            let symbol = bottom_up.symbols.get(symbol_id);
            if filter.exclude_symbols.contains(symbol)
                || filter.exclude_binaries.contains(&symbol.binary)
            {
                excluded = true;
                return false;
            }
            missing_symbols.remove(symbol);
            missing_binaries.remove(symbol.binary.as_str());

            // exclusions need the whole stack
            !missing_symbols.is_empty()
                || !missing_binaries.is_empty()
                || !filter.exclude_symbols.is_empty()
                || !filter.exclude_binaries.is_empty()
        });

        accepted.push(!excluded && missing_symbols.is_empty() && missing_binaries.is_empty());
    }

    Ok(accepted)
}

fn thread_matches(thread: &ThreadEvents, filter: &FilterAction, time: Option<TimeRange>) -> bool {
    filter.process_id.map_or(true, |pid| thread.pid == pid)
        && filter.thread_id.map_or(true, |tid| thread.tid == tid)
        && time.map_or(true, |range| thread.time.overlaps(&range))
        && !filter.exclude_process_ids.contains(&thread.pid)
        && !filter.exclude_thread_ids.contains(&thread.tid)
}

fn event_matches(
    event: &Event,
    filter: &FilterAction,
    time: Option<TimeRange>,
    accepted_stacks: Option<&[bool]>,
) -> bool {
    if let Some(range) = time {
        if !range.contains(event.time) {
            return false;
        }
    }
    if filter.cpu_id.map_or(false, |cpu| event.cpu_id != cpu) {
        return false;
    }
    if filter.exclude_cpu_ids.contains(&event.cpu_id) {
        return false;
    }
    // events without a stack are never filtered by stack
    match (accepted_stacks, event.stack_id) {
        (Some(accepted), Some(stack_id)) => {
            accepted.get(stack_id as usize).copied().unwrap_or(false)
        }
        _ => true,
    }
}
