//! Output formatting utilities for CLI commands

use colored::Colorize;
use perfstream_shared::utils::time::format_duration_ns;
use perfstream_shared::{CostUnit, Symbol};

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a section header
pub fn section(title: &str) {
    println!("\n{}", format!("=== {} ===", title).bold());
}

/// Render a cost in its unit
pub fn format_cost(cost: i64, unit: CostUnit) -> String {
    match unit {
        CostUnit::Time => format_duration_ns(cost.max(0) as u64),
        CostUnit::Unknown | CostUnit::Tracepoint => cost.to_string(),
    }
}

/// `name` or `??` for unresolved symbols
pub fn symbol_name(symbol: &Symbol) -> &str {
    if symbol.name.is_empty() {
        "??"
    } else {
        &symbol.name
    }
}

/// Symbol name followed by its binary, if known
pub fn format_symbol(symbol: &Symbol) -> String {
    if symbol.binary.is_empty() {
        symbol_name(symbol).to_string()
    } else {
        format!("{} {}", symbol_name(symbol), format!("[{}]", symbol.binary).dimmed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(1234, CostUnit::Unknown), "1234");
        assert_eq!(format_cost(2_500_000, CostUnit::Time), "2.500ms");
    }

    #[test]
    fn test_unresolved_symbol_name() {
        assert_eq!(symbol_name(&Symbol::new("", "libc.so.6")), "??");
        assert_eq!(symbol_name(&Symbol::new("main", "app")), "main");
        assert_eq!(format_symbol(&Symbol::new("main", "")), "main");
    }
}
