//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

/// Creates a styled table with a bold header row.
pub fn results_table(columns: &[&str], rows: &[Vec<String>]) -> Table {
    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header: Vec<Cell> = columns
        .iter()
        .map(|col| Cell::new(col).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect();
    table.set_header(header);

    for row in rows {
        table.add_row(row);
    }

    table
}

/// Prints rows as a formatted table followed by a row count.
pub fn print_results(columns: &[&str], rows: &[Vec<String>]) {
    println!("{}", results_table(columns, rows));

    let count = rows.len();
    let row_word = if count == 1 { "row" } else { "rows" };
    println!("({count} {row_word})");
}

/// Creates a key-value table.
pub fn info_table(entries: &[(&str, String)]) -> Table {
    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for (key, value) in entries {
        table.add_row(vec![Cell::new(key).fg(Color::DarkGrey), Cell::new(value)]);
    }

    table
}
