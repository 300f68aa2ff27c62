//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function. Reports go to
//! stdout; logs go to stderr.

pub mod add_files;
pub mod bad_lines;
pub mod drop_files;
pub mod process;
pub mod remove_changes;
pub mod show;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Table with the report styling shared by every command
pub(crate) fn report_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

/// Shorten `s` to at most `max` characters
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
