//! Output formatting for status reports.

use clap::ValueEnum;
use comfy_table::{Cell, Table};

use crate::commands::TableStatus;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

pub fn format_status(rows: &[TableStatus], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Table => Ok(status_table(rows)),
        OutputFormat::Json => serde_json::to_string_pretty(rows),
    }
}

fn status_table(rows: &[TableStatus]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Table", "Source", "Source database", "State", "Remaining rows"]);
    for row in rows {
        table.add_row(vec![
            Cell::new(&row.table),
            Cell::new(&row.source_table),
            Cell::new(row.source_database.as_deref().unwrap_or("(same)")),
            Cell::new(row.state),
            Cell::new(
                row.remaining_rows
                    .map(|rows| rows.to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }
    format!("{}\n{} table(s)", table, rows.len())
}
