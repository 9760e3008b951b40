use std::time::Duration;

use crate::JobSummary;
use crate::input::JobConfig;

pub fn show_greeting(config_path: &str) {
    println!("=== XDR Converter ===");
    println!("Loading configuration from: {}", config_path);
}

pub fn config_echo(config: &JobConfig) {
    println!("\nConfiguration:");
    println!("  Input XDR: {}", config.input);
    println!("  Output: {} ({})", config.output, config.format);
    println!("  Number of filters: {}", config.filters.len());

    for (i, filter) in config.filters.iter().enumerate() {
        println!("    Filter {}: {}", i + 1, filter.kind());
    }

    if let Some(regrid) = &config.regrid {
        let grid = &regrid.grid;
        println!(
            "  Regrid: {}x{} cells of {}x{} deg from ({}, {}), method {:?}",
            grid.columns, grid.rows, grid.cell_width, grid.cell_height, grid.west, grid.south, regrid.method
        );
        if let Some(span) = regrid.aggregate {
            println!("  Aggregate: {:?} (UTC offset {} h)", span, regrid.utc_offset_hours);
        }
    }
    if let Some(compare) = &config.compare {
        println!("  Compare: {} against {}:{}", compare.function, compare.reference, compare.variable);
    }
}

pub fn show_summary(summary: &JobSummary) {
    println!("\nResult:");
    println!("  Points read: {}", summary.points_read);
    if summary.points_kept != summary.points_read {
        println!("  Points kept by filters: {}", summary.points_kept);
    }
    println!(
        "  Written: {} {} in {} timesteps",
        summary.points_written,
        if summary.regridded { "regridded samples" } else { "points" },
        summary.timesteps_written
    );
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!("\n=== Conversion completed in {:.2?} ===", elapsed);
}
