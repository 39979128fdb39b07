//! CLI command implementations.

pub mod config;
pub mod listen;

use console::style;

/// Truncate to at most `max_chars` characters, ending in "..." when cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Print a one-line success marker.
pub fn print_ok(message: &str) {
    println!("  {} {message}", style("OK").green().bold());
}
