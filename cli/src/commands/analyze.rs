//! Analyze command implementation

use crate::commands::follow;
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use perfstream_aggregator::tree::NodeId;
use perfstream_aggregator::{
    AnalysisConfig, AnalysisResults, CostAggregation, PerfSession, TaskOutcome, TopDownResults,
};
use perfstream_shared::utils::format_kib;
use perfstream_shared::utils::percentage;
use perfstream_shared::utils::time::format_duration_ns;
use perfstream_shared::{FilterAction, Summary, Symbol, SymbolTable, TimeRange};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// perf.data recording or .perfparser stream
    pub path: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Keep events at or after this timestamp (ns)
    #[arg(long)]
    pub time_start: Option<u64>,

    /// Keep events at or before this timestamp (ns)
    #[arg(long)]
    pub time_end: Option<u64>,

    /// Keep only this process
    #[arg(long)]
    pub pid: Option<i32>,

    /// Keep only this thread
    #[arg(long)]
    pub tid: Option<i32>,

    /// Keep only events on this cpu
    #[arg(long)]
    pub cpu: Option<u32>,

    #[arg(long, value_delimiter = ',')]
    pub exclude_pid: Vec<i32>,

    #[arg(long, value_delimiter = ',')]
    pub exclude_tid: Vec<i32>,

    #[arg(long, value_delimiter = ',')]
    pub exclude_cpu: Vec<u32>,

    /// Keep stacks containing this symbol (`name` or `name@binary`)
    #[arg(long)]
    pub include_symbol: Vec<String>,

    /// Drop stacks containing this symbol (`name` or `name@binary`)
    #[arg(long)]
    pub exclude_symbol: Vec<String>,

    /// Keep stacks touching this binary
    #[arg(long)]
    pub include_binary: Vec<String>,

    /// Drop stacks touching this binary
    #[arg(long)]
    pub exclude_binary: Vec<String>,

    /// Group costs by-symbol, by-thread, by-process or by-cpu
    #[arg(long)]
    pub aggregate: Option<CostAggregation>,

    /// Number of hottest symbols to list
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Depth of the printed top-down tree
    #[arg(long, default_value = "4")]
    pub depth: usize,

    /// Also write the report as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let mut config = AnalysisConfig::load(args.config.as_deref())?;
    if let Some(aggregation) = args.aggregate {
        config.cost_aggregation = aggregation;
    }

    let session = PerfSession::new(config);
    let handle = session
        .start_parse_file(&args.path)
        .with_context(|| format!("Failed to parse {}", args.path.display()))?;
    let Some(mut results) = finished(follow(handle, "Parsing").await)? else {
        return Ok(());
    };
    output::success(&format!(
        "Parsed {} samples from {}",
        results.summary.sample_count,
        args.path.display()
    ));

    let filter = build_filter(&args, &results.bottom_up.symbols)?;
    if !filter.is_identity() {
        let handle = session.filter_results(filter.clone())?;
        let Some(filtered) = finished(follow(handle, "Filtering").await)? else {
            return Ok(());
        };
        output::info(&format!(
            "Filter kept {} of {} events",
            filtered.events.event_count(),
            results.events.event_count()
        ));
        results = filtered;
    }

    print_summary(&results.summary);
    let hotspots = hotspots(&results, args.top);
    print_hotspots(&results, &hotspots);
    print_top_down(&results.top_down, args.depth);

    if let Some(path) = &args.json {
        let report = Report {
            summary: &results.summary,
            filter: &filter,
            hotspots,
            top_down: json_tree(&results.top_down, None, args.depth),
        };
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)
            .context("Failed to write JSON report")?;
        output::success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}

/// Results of a finished task, `None` if it was stopped
fn finished(outcome: TaskOutcome) -> Result<Option<Arc<AnalysisResults>>> {
    match outcome {
        TaskOutcome::Finished(results) => Ok(Some(results)),
        TaskOutcome::Failed(message) => anyhow::bail!(message),
        TaskOutcome::Stopped => {
            output::warning("Parsing stopped.");
            Ok(None)
        }
    }
}

fn build_filter(args: &AnalyzeArgs, symbols: &SymbolTable) -> Result<FilterAction> {
    let time = match (args.time_start, args.time_end) {
        (None, None) => None,
        (start, end) => Some(TimeRange::new(
            start.unwrap_or(0),
            end.unwrap_or(TimeRange::MAX.end),
        )),
    };

    let mut include_symbols = HashSet::new();
    for spec in &args.include_symbol {
        let matches = resolve_symbols(symbols, spec);
        match matches.len() {
            0 => anyhow::bail!("No symbol matches '{}'", spec),
            1 => include_symbols.extend(matches),
            n => anyhow::bail!(
                "'{}' matches {} symbols, qualify it as name@binary",
                spec,
                n
            ),
        }
    }

    let mut exclude_symbols = HashSet::new();
    for spec in &args.exclude_symbol {
        let matches = resolve_symbols(symbols, spec);
        if matches.is_empty() {
            output::warning(&format!("No symbol matches '{}'", spec));
        }
        exclude_symbols.extend(matches);
    }

    Ok(FilterAction {
        time,
        process_id: args.pid,
        thread_id: args.tid,
        cpu_id: args.cpu,
        exclude_process_ids: args.exclude_pid.iter().copied().collect(),
        exclude_thread_ids: args.exclude_tid.iter().copied().collect(),
        exclude_cpu_ids: args.exclude_cpu.iter().copied().collect(),
        include_symbols,
        exclude_symbols,
        include_binaries: args.include_binary.iter().cloned().collect(),
        exclude_binaries: args.exclude_binary.iter().cloned().collect(),
    })
}

/// Split `name@binary`; a bare name matches any binary
fn parse_symbol_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.rsplit_once('@') {
        Some((name, binary)) if !name.is_empty() => (name, Some(binary)),
        _ => (spec, None),
    }
}

/// Interned symbols matching `spec`
fn resolve_symbols(symbols: &SymbolTable, spec: &str) -> Vec<Symbol> {
    let (name, binary) = parse_symbol_spec(spec);
    symbols
        .iter()
        .map(|(_, symbol)| symbol)
        .filter(|symbol| symbol.name == name && binary.map_or(true, |b| symbol.binary == b))
        .cloned()
        .collect()
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a Summary,
    filter: &'a FilterAction,
    hotspots: Vec<Hotspot>,
    top_down: Vec<TreeNodeJson>,
}

#[derive(Debug, Serialize)]
struct Hotspot {
    symbol: String,
    binary: String,
    /// Per cost type
    self_cost: Vec<i64>,
    inclusive_cost: Vec<i64>,
}

#[derive(Serialize)]
struct TreeNodeJson {
    symbol: String,
    binary: String,
    self_cost: Vec<i64>,
    inclusive_cost: Vec<i64>,
    children: Vec<TreeNodeJson>,
}

/// Symbols with the highest self cost of the first cost type
fn hotspots(results: &AnalysisResults, limit: usize) -> Vec<Hotspot> {
    let caller_callee = &results.caller_callee;
    if caller_callee.self_costs.num_types() == 0 {
        return Vec::new();
    }

    let mut entries: Vec<_> = caller_callee
        .entries()
        .map(|(symbol, entry)| (symbol, caller_callee.self_costs.cost(0, entry.id)))
        .filter(|&(_, cost)| cost > 0)
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    entries
        .into_iter()
        .take(limit)
        .map(|(symbol_id, _)| {
            let symbol = caller_callee.symbol(symbol_id);
            Hotspot {
                symbol: symbol.name.clone(),
                binary: symbol.binary.clone(),
                self_cost: caller_callee.self_cost(symbol_id).as_slice().to_vec(),
                inclusive_cost: caller_callee.inclusive_cost(symbol_id).as_slice().to_vec(),
            }
        })
        .collect()
}

fn print_summary(summary: &Summary) {
    output::section("Summary");
    if !summary.command.is_empty() {
        println!("  Command:        {}", summary.command);
    }
    println!(
        "  Run time:       {}",
        format_duration_ns(summary.application_time.delta())
    );
    if summary.off_cpu_time > 0 {
        println!(
            "  On-CPU time:    {}",
            format_duration_ns(summary.on_cpu_time)
        );
        println!(
            "  Off-CPU time:   {}",
            format_duration_ns(summary.off_cpu_time)
        );
    }
    println!(
        "  Processes:      {} ({} threads)",
        summary.process_count, summary.thread_count
    );
    println!("  Samples:        {}", summary.sample_count);
    if summary.lost_chunks > 0 {
        println!(
            "  Lost:           {} events in {} chunks",
            summary.lost_events, summary.lost_chunks
        );
    }
    if !summary.host_name.is_empty() {
        println!("  Host:           {}", summary.host_name);
        println!("  Kernel:         {}", summary.linux_kernel_version);
        println!("  perf version:   {}", summary.perf_version);
        println!(
            "  CPU:            {} ({}/{} online)",
            summary.cpu_description, summary.cpus_online, summary.cpus_available
        );
        println!("  Memory:         {}", format_kib(summary.total_memory_in_kib));
    }
    for cost in &summary.costs {
        println!(
            "  {:<15} {} samples, total {}",
            format!("{}:", cost.label),
            cost.sample_count,
            output::format_cost(cost.total_period as i64, cost.unit)
        );
    }
    for error in &summary.errors {
        output::warning(error);
    }
}

fn print_hotspots(results: &AnalysisResults, hotspots: &[Hotspot]) {
    let costs = &results.caller_callee.self_costs;
    if costs.num_types() == 0 {
        output::info("No costs recorded");
        return;
    }

    output::section(&format!("Hottest symbols by self {}", costs.type_name(0)));
    let total = results.bottom_up.costs.total(0);
    let unit = costs.unit(0);
    println!("  {:>7} {:>12} {:>12}  SYMBOL", "SELF%", "SELF", "INCLUSIVE");
    for hotspot in hotspots {
        let symbol = Symbol::new(hotspot.symbol.as_str(), hotspot.binary.as_str());
        println!(
            "  {:>6.2}% {:>12} {:>12}  {}",
            percentage(hotspot.self_cost[0], total),
            output::format_cost(hotspot.self_cost[0], unit),
            output::format_cost(hotspot.inclusive_cost[0], unit),
            output::format_symbol(&symbol)
        );
    }
}

/// Children sorted by descending inclusive cost of the first cost type
fn sorted_children(top_down: &TopDownResults, parent: Option<NodeId>) -> Vec<NodeId> {
    let mut children = top_down.tree.children(parent).to_vec();
    if top_down.inclusive_costs.num_types() > 0 {
        children.sort_by_key(|&id| std::cmp::Reverse(top_down.inclusive_costs.cost(0, id)));
    }
    children
}

fn print_top_down(top_down: &TopDownResults, depth: usize) {
    if depth == 0 || top_down.inclusive_costs.num_types() == 0 {
        return;
    }
    output::section("Top-down");
    let total = top_down.root_inclusive_cost(0);
    for root in sorted_children(top_down, None) {
        print_node(top_down, root, 0, depth, total);
    }
}

fn print_node(top_down: &TopDownResults, id: NodeId, level: usize, depth: usize, total: i64) {
    let unit = top_down.inclusive_costs.unit(0);
    let inclusive = top_down.inclusive_costs.cost(0, id);
    println!(
        "  {}{:>6.2}% {} (self {})",
        "  ".repeat(level),
        percentage(inclusive, total),
        output::format_symbol(top_down.symbol(id)),
        output::format_cost(top_down.self_costs.cost(0, id), unit)
    );
    if level + 1 < depth {
        for child in sorted_children(top_down, Some(id)) {
            print_node(top_down, child, level + 1, depth, total);
        }
    }
}

fn json_tree(top_down: &TopDownResults, parent: Option<NodeId>, depth: usize) -> Vec<TreeNodeJson> {
    if depth == 0 {
        return Vec::new();
    }
    sorted_children(top_down, parent)
        .into_iter()
        .map(|id| {
            let symbol = top_down.symbol(id);
            TreeNodeJson {
                symbol: symbol.name.clone(),
                binary: symbol.binary.clone(),
                self_cost: top_down.self_costs.item_cost(id).as_slice().to_vec(),
                inclusive_cost: top_down.inclusive_costs.item_cost(id).as_slice().to_vec(),
                children: json_tree(top_down, Some(id), depth - 1),
            }
        })
        .collect()
}
