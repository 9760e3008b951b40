//! # XDR File Information Module
//!
//! This module provides functionality to summarize an XDR file: its kind,
//! time range, bounds, variables and, for regridded files, the grid layout.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;

use crate::dataset::{Bounds, Dataset, Sample};

/// Information about one XDR variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XdrVariableInfo {
    pub name: String,
    pub units: String,
    /// Range of the present values, filled in detailed mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<usize>,
}

/// Layout of a regridded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegriddedInfo {
    pub columns: usize,
    pub rows: usize,
    pub layers: usize,
    pub hours_per_timestep: usize,
    pub is_vector: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
}

/// Complete information about an XDR file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XdrInfo {
    pub path: String,
    pub kind: String,
    pub note: String,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub bounds: Bounds,
    pub timesteps: usize,
    pub total_points: usize,
    pub variables: Vec<XdrVariableInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regridded: Option<RegriddedInfo>,
    pub file_size: Option<u64>,
}

fn value_range(values: impl Iterator<Item = Sample>) -> (Option<f64>, Option<f64>, usize) {
    let mut minimum: Option<f64> = None;
    let mut maximum: Option<f64> = None;
    let mut missing = 0;
    for sample in values {
        match sample.value() {
            Some(v) => {
                minimum = Some(minimum.map_or(v, |m| m.min(v)));
                maximum = Some(maximum.map_or(v, |m| m.max(v)));
            }
            None => missing += 1,
        }
    }
    (minimum, maximum, missing)
}

fn variable_info(name: &str, units: &str, stats: Option<(Option<f64>, Option<f64>, usize)>) -> XdrVariableInfo {
    let (minimum, maximum, missing) = match stats {
        Some((min, max, missing)) => (min, max, Some(missing)),
        None => (None, None, None),
    };
    XdrVariableInfo {
        name: name.to_string(),
        units: units.to_string(),
        minimum,
        maximum,
        missing,
    }
}

/// Summarizes a loaded dataset. `variable` restricts the variable list.
pub fn dataset_info(path: &str, dataset: &Dataset, variable: Option<&str>, detailed: bool) -> XdrInfo {
    let wanted = |name: &str| variable.is_none_or(|v| v.eq_ignore_ascii_case(name));
    let (timesteps, total_points, variables, regridded) = match &dataset.regridded {
        Some(output) => {
            let components = std::iter::once(&output.points.values).chain(output.points.values2.as_ref());
            let variables = output
                .variable_names
                .iter()
                .zip(&output.variable_units)
                .zip(components)
                .filter(|((name, _), _)| wanted(name))
                .map(|((name, units), samples)| {
                    variable_info(name, units, detailed.then(|| value_range(samples.iter().copied())))
                })
                .collect();
            let projection = output
                .grid_header
                .as_deref()
                .and_then(crate::grid::GridDescription::from_header_lines)
                .map(|g| g.projection);
            let layout = RegriddedInfo {
                columns: output.extent.columns,
                rows: output.extent.rows,
                layers: output.extent.layers,
                hours_per_timestep: output.hours_per_timestep,
                is_vector: output.is_vector(),
                projection,
            };
            (output.timesteps(), output.total_points(), variables, Some(layout))
        }
        None => {
            let variables = (0..dataset.variable_count())
                .filter(|i| wanted(&dataset.variable_names[*i]))
                .map(|i| {
                    let stats = detailed.then(|| value_range(dataset.variable(i).iter().map(|v| Sample::from_wire(*v))));
                    variable_info(&dataset.variable_names[i], &dataset.variable_units[i], stats)
                })
                .collect();
            (dataset.timesteps(), dataset.total_points(), variables, None)
        }
    };
    XdrInfo {
        path: path.to_string(),
        kind: dataset.kind.to_string(),
        note: dataset.note.clone(),
        first_timestamp: dataset.time_range.first.to_iso(),
        last_timestamp: dataset.time_range.last.to_iso(),
        bounds: dataset.bounds,
        timesteps,
        total_points,
        variables,
        regridded,
        file_size: None,
    }
}

/// Extract information from an XDR file
pub fn get_xdr_info(file_path: &str, variable: Option<&str>, detailed: bool) -> Result<XdrInfo> {
    debug!("Opening XDR file: {}", file_path);
    let file = File::open(file_path).with_context(|| format!("Failed to open XDR file: {}", file_path))?;
    let file_size = file.metadata().ok().map(|m| m.len());
    let dataset =
        Dataset::load(BufReader::new(file)).with_context(|| format!("Failed to read XDR file: {}", file_path))?;
    let mut info = dataset_info(file_path, &dataset, variable, detailed);
    info.file_size = file_size;
    Ok(info)
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Print XDR info in human-readable format
pub fn print_file_info_human(info: &XdrInfo) {
    println!("XDR File Information:");
    println!("  Path: {}", info.path);
    if let Some(size) = info.file_size {
        println!("  File Size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    println!(
        "  Kind: {}{}",
        info.kind,
        if info.regridded.is_some() { " (regridded)" } else { "" }
    );
    println!("  Note: {}", info.note);
    println!("  Time Range: {} .. {}", info.first_timestamp, info.last_timestamp);
    println!("  Bounds: {}", info.bounds);
    println!("  Timesteps: {}", info.timesteps);
    println!("  Points: {}", info.total_points);
    if let Some(grid) = &info.regridded {
        println!(
            "  Grid: {} x {} x {} cells, {} hours per timestep",
            grid.columns, grid.rows, grid.layers, grid.hours_per_timestep
        );
        if let Some(projection) = &grid.projection {
            println!("  Projection: {}", projection);
        }
    }
    println!("  Variables: {} total", info.variables.len());
    for var in &info.variables {
        println!("    {} ({})", var.name, var.units);
        if let Some(missing) = var.missing {
            println!(
                "      range: {} .. {}, missing: {}",
                format_value(var.minimum),
                format_value(var.maximum),
                missing
            );
        }
    }
}

/// Print XDR info in JSON format
pub fn print_file_info_json(info: &XdrInfo) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(info).context("Failed to serialize XDR info to JSON")?
    );
    Ok(())
}

/// Print XDR info in YAML format
pub fn print_file_info_yaml(info: &XdrInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize XDR info to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Print XDR info in CSV format (variables only)
pub fn print_file_info_csv(info: &XdrInfo) -> Result<()> {
    println!("variable_name,units,minimum,maximum,missing");
    for var in &info.variables {
        println!(
            "{},{},{},{},{}",
            var.name,
            var.units,
            var.minimum.map(|v| v.to_string()).unwrap_or_default(),
            var.maximum.map(|v| v.to_string()).unwrap_or_default(),
            var.missing.map(|v| v.to_string()).unwrap_or_default()
        );
    }
    Ok(())
}
