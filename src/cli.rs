//! # CLI Module
//!
//! This module provides the command-line interface for xdrconvert, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the XDRCONVERT_ prefix
//! - Merging of config file, environment and command-line values
//! - Filter DSL parsing for command line and environment variables

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::aggregate::AggregationSpan;
use crate::filters::{BoundsFilter, ListFilter, TimeRangeFilter, ValueRangeFilter};
use crate::grid::{LonLatGrid, RegridMethod};
use crate::input::{CompareConfig, FilterConfig, JobConfig, RegridConfig};
use crate::output::OutputFormat;
use crate::timestamp::is_valid_timestamp;

/// Regrid, aggregate, compare and re-encode XDR air-quality observation files
#[derive(Parser, Debug)]
#[command(name = "xdrconvert")]
#[command(about = "Convert XDR observation files to XDR, ASCII, COARDS or IOAPI output")]
#[command(version)]
#[command(long_about = "
xdrconvert reads XDR observation files (satellite swaths, aircraft/balloon
profiles, monitoring sites), optionally filters and regrids them onto a
regular longitude/latitude grid, aggregates hourly results to daily or
whole-period means, compares them against a reference model array, and
writes the result as XDR, tab-delimited ASCII, COARDS or IOAPI NetCDF.

EXAMPLES:
  # Re-encode as ASCII
  xdrconvert convert sites.xdr sites.txt -f ascii

  # Regrid a swath onto a 1 degree grid and write IOAPI
  xdrconvert convert modis.xdr modis.ncf -f ioapi \\
    --grid 70,30,-130,20,1,1 --method mean

  # Daily means, local days in UTC-5
  xdrconvert convert modis.xdr daily.xdr --grid 70,30,-130,20,1,1 \\
    --aggregate daily --utc-offset -5

  # Using config file
  xdrconvert convert --config job.yaml

  # Generate templates
  xdrconvert template regrid --format yaml > job.yaml

  # File inspection
  xdrconvert info modis.xdr --detailed
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured reports
    #[arg(long, global = true, value_enum, default_value_t = ReportFormat::Human)]
    pub output_format: ReportFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "XDRCONVERT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert an XDR file, optionally regridding and comparing it
    #[command(long_about = "
Convert an XDR file to another encoding with optional filtering, regridding,
time aggregation and comparison.

Command-line values override the configuration file; filters given on the
command line are appended to the configured ones.

EXAMPLES:
  # Basic conversion
  xdrconvert convert profiles.xdr profiles.ncf -f coards

  # With filters
  xdrconvert convert sites.xdr east.txt -f ascii \\
    --bounds -90,25,-70,45 --list id:10010,10020

  # Compare daily means against a model run
  xdrconvert convert modis.xdr compared.xdr --grid 70,30,-130,20,1,1 \\
    --aggregate daily --reference cmaq.ncf --reference-variable AOD

  # Dry run for validation
  xdrconvert convert --config job.json --dry-run
")]
    Convert {
        /// Input XDR file path
        #[arg(value_name = "INPUT", env = "XDRCONVERT_INPUT")]
        input: Option<String>,

        /// Output file path
        #[arg(value_name = "OUTPUT", env = "XDRCONVERT_OUTPUT")]
        output: Option<String>,

        /// Output encoding
        #[arg(short = 'f', long, value_enum, env = "XDRCONVERT_FORMAT")]
        format: Option<OutputFormat>,

        /// Keep points inside a box: min_lon,min_lat,max_lon,max_lat
        #[arg(long = "bounds", value_parser = parse_bounds_filter, allow_hyphen_values = true)]
        bounds_filters: Vec<BoundsFilterArg>,

        /// Keep points in a time window: first:last (YYYYDDDHHMM)
        #[arg(long = "time-range", value_parser = parse_time_range_filter)]
        time_filters: Vec<TimeRangeFilterArg>,

        /// Apply range filter: variable:min:max
        #[arg(long = "range", value_parser = parse_range_filter, allow_hyphen_values = true)]
        range_filters: Vec<RangeFilterArg>,

        /// Apply list filter: variable:val1,val2,val3
        #[arg(long = "list", value_parser = parse_list_filter, allow_hyphen_values = true)]
        list_filters: Vec<ListFilterArg>,

        /// Regrid onto columns,rows,west,south,cell_width,cell_height
        #[arg(long, value_parser = parse_grid, allow_hyphen_values = true, env = "XDRCONVERT_GRID")]
        grid: Option<LonLatGrid>,

        /// Layer edge elevations in meters, bottom to top: e0,e1,...
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        layer_edges: Vec<f64>,

        /// Statistic combining points in one cell
        #[arg(long, value_enum)]
        method: Option<RegridMethod>,

        /// Values below this are ignored while regridding
        #[arg(long, allow_negative_numbers = true)]
        minimum_valid_value: Option<f64>,

        /// Variable to regrid
        #[arg(short = 'n', long, env = "XDRCONVERT_VARIABLE")]
        variable: Option<String>,

        /// Second component of a vector variable
        #[arg(long)]
        vector: Option<String>,

        /// Aggregate hourly output
        #[arg(long, value_enum)]
        aggregate: Option<AggregationSpan>,

        /// Local time offset from UTC for daily windows
        #[arg(long, allow_negative_numbers = true)]
        utc_offset: Option<i64>,

        /// NetCDF file with the reference model array
        #[arg(long)]
        reference: Option<String>,

        /// Reference variable name
        #[arg(long)]
        reference_variable: Option<String>,

        /// Second reference variable, for converters
        #[arg(long)]
        reference_variable2: Option<String>,

        /// Comparison function
        #[arg(long)]
        compare_function: Option<String>,

        /// Force overwrite existing output files
        #[arg(long, env = "XDRCONVERT_FORCE")]
        force: bool,

        /// Dry run - validate configuration without processing
        #[arg(long, env = "XDRCONVERT_DRY_RUN")]
        dry_run: bool,
    },

    /// Validate configuration file or arguments
    #[command(long_about = "
Validate a job configuration without processing.

Checks the syntax, the format/mode combination, the grid definition, the
comparison function and the filter parameters, and reports whether the
input and reference files exist.

EXAMPLES:
  # Validate a configuration file
  xdrconvert validate job.json

  # Validate with detailed output
  xdrconvert validate job.yaml --detailed
")]
    Validate {
        /// Configuration file to validate
        config_file: Option<PathBuf>,

        /// Show detailed validation report
        #[arg(long)]
        detailed: bool,
    },

    /// Show information about an XDR file
    #[command(long_about = "
Inspect an XDR file and display its header and variables.

EXAMPLES:
  # Basic file info
  xdrconvert info modis.xdr

  # Value ranges and missing counts
  xdrconvert info regridded.xdr --detailed

  # JSON output for scripting
  xdrconvert info sites.xdr --format json
")]
    Info {
        /// XDR file path
        file: String,

        /// Show value ranges and missing counts
        #[arg(long)]
        detailed: bool,

        /// Show only specific variable info
        #[arg(short = 'n', long)]
        variable: Option<String>,

        /// Output format for file information
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
    },

    /// Generate configuration templates
    #[command(long_about = "
Generate job configuration templates for common use cases.

Available templates:
• basic: Re-encode a file
• filtered: Box, time and value filters
• regrid: Regrid a swath and write IOAPI
• daily: Regrid and aggregate to daily means
• compare: Regrid and compare against a model array

EXAMPLES:
  xdrconvert template basic
  xdrconvert template daily --format yaml -o daily.yaml
")]
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateType,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish, and PowerShell.

EXAMPLES:
  xdrconvert completions bash > ~/.bash_completion.d/xdrconvert
  xdrconvert completions zsh -o _xdrconvert
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum TemplateType {
    /// Re-encode a file
    Basic,
    /// Point filters
    Filtered,
    /// Regrid to IOAPI
    Regrid,
    /// Daily aggregation
    Daily,
    /// Comparison against a model array
    Compare,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Bounds filter argument from command line
#[derive(Clone, Debug, PartialEq)]
pub struct BoundsFilterArg {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

/// Time range filter argument from command line
#[derive(Clone, Debug, PartialEq)]
pub struct TimeRangeFilterArg {
    pub first: i64,
    pub last: i64,
}

/// Range filter argument from command line
#[derive(Clone, Debug, PartialEq)]
pub struct RangeFilterArg {
    pub variable: String,
    pub min_value: f64,
    pub max_value: f64,
}

/// List filter argument from command line
#[derive(Clone, Debug, PartialEq)]
pub struct ListFilterArg {
    pub variable: String,
    pub values: Vec<f64>,
}

fn parse_numbers(s: &str, count: usize, what: &str) -> Result<Vec<f64>, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("Invalid numeric value in {}", what))?;
    if values.len() != count {
        return Err(format!("{} needs {} comma-separated values", what, count));
    }
    Ok(values)
}

/// Parse bounds filter from command line argument
/// Format: min_lon,min_lat,max_lon,max_lat
fn parse_bounds_filter(s: &str) -> Result<BoundsFilterArg, String> {
    let v = parse_numbers(s, 4, "bounds filter 'min_lon,min_lat,max_lon,max_lat'")?;
    if v[0] > v[2] || v[1] > v[3] {
        return Err("Bounds minimum must not exceed maximum".to_string());
    }
    if !(-180.0..=180.0).contains(&v[0]) || !(-180.0..=180.0).contains(&v[2]) {
        return Err("Longitudes must lie in [-180, 180]".to_string());
    }
    if !(-90.0..=90.0).contains(&v[1]) || !(-90.0..=90.0).contains(&v[3]) {
        return Err("Latitudes must lie in [-90, 90]".to_string());
    }
    Ok(BoundsFilterArg {
        min_longitude: v[0],
        min_latitude: v[1],
        max_longitude: v[2],
        max_latitude: v[3],
    })
}

/// Parse time range filter from command line argument
/// Format: first:last as YYYYDDDHHMM
fn parse_time_range_filter(s: &str) -> Result<TimeRangeFilterArg, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Time range filter must be in format 'YYYYDDDHHMM:YYYYDDDHHMM'".to_string());
    }
    let first = parts[0].trim().parse::<i64>().map_err(|_| "Invalid first timestamp")?;
    let last = parts[1].trim().parse::<i64>().map_err(|_| "Invalid last timestamp")?;
    if !is_valid_timestamp(first) || !is_valid_timestamp(last) {
        return Err("Timestamps must be valid YYYYDDDHHMM values".to_string());
    }
    if first > last {
        return Err("First timestamp must not be after the last".to_string());
    }
    Ok(TimeRangeFilterArg { first, last })
}

/// Parse range filter from command line argument
/// Format: variable:min:max
fn parse_range_filter(s: &str) -> Result<RangeFilterArg, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err("Range filter must be in format 'variable:min:max'".to_string());
    }

    let variable = parts[0].to_string();
    let min_value = parts[1]
        .parse::<f64>()
        .map_err(|_| "Invalid minimum value in range filter")?;
    let max_value = parts[2]
        .parse::<f64>()
        .map_err(|_| "Invalid maximum value in range filter")?;

    if min_value > max_value {
        return Err("Minimum value must not exceed maximum value".to_string());
    }

    Ok(RangeFilterArg {
        variable,
        min_value,
        max_value,
    })
}

/// Parse list filter from command line argument
/// Format: variable:val1,val2,val3
fn parse_list_filter(s: &str) -> Result<ListFilterArg, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("List filter must be in format 'variable:val1,val2,val3'".to_string());
    }

    let variable = parts[0].to_string();
    let values: Result<Vec<f64>, _> = parts[1]
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect();

    let values = values.map_err(|_| "Invalid numeric values in list filter")?;

    if values.is_empty() {
        return Err("List filter must contain at least one value".to_string());
    }

    Ok(ListFilterArg { variable, values })
}

/// Parse a grid definition: columns,rows,west,south,cell_width,cell_height
fn parse_grid(s: &str) -> Result<LonLatGrid, String> {
    let v = parse_numbers(s, 6, "grid 'columns,rows,west,south,cell_width,cell_height'")?;
    if v[0] < 1.0 || v[1] < 1.0 || v[0].fract() != 0.0 || v[1].fract() != 0.0 {
        return Err("Grid columns and rows must be positive integers".to_string());
    }
    LonLatGrid::new(v[0] as usize, v[1] as usize, v[2], v[3], v[4], v[5], Vec::new()).map_err(|e| e.to_string())
}

impl From<BoundsFilterArg> for FilterConfig {
    fn from(arg: BoundsFilterArg) -> Self {
        FilterConfig::Bounds {
            params: BoundsFilter::new(arg.min_longitude, arg.min_latitude, arg.max_longitude, arg.max_latitude),
        }
    }
}

impl From<TimeRangeFilterArg> for FilterConfig {
    fn from(arg: TimeRangeFilterArg) -> Self {
        FilterConfig::TimeRange {
            params: TimeRangeFilter::new(arg.first, arg.last),
        }
    }
}

impl From<RangeFilterArg> for FilterConfig {
    fn from(arg: RangeFilterArg) -> Self {
        FilterConfig::Range {
            params: ValueRangeFilter::new(&arg.variable, arg.min_value, arg.max_value),
        }
    }
}

impl From<ListFilterArg> for FilterConfig {
    fn from(arg: ListFilterArg) -> Self {
        FilterConfig::List {
            params: ListFilter::new(&arg.variable, arg.values),
        }
    }
}

/// Filters from the command line or the environment, by kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    pub bounds: Vec<BoundsFilterArg>,
    pub time: Vec<TimeRangeFilterArg>,
    pub range: Vec<RangeFilterArg>,
    pub list: Vec<ListFilterArg>,
}

impl FilterArgs {
    pub fn into_configs(self) -> Vec<FilterConfig> {
        let mut configs: Vec<FilterConfig> = Vec::new();
        configs.extend(self.bounds.into_iter().map(FilterConfig::from));
        configs.extend(self.time.into_iter().map(FilterConfig::from));
        configs.extend(self.range.into_iter().map(FilterConfig::from));
        configs.extend(self.list.into_iter().map(FilterConfig::from));
        configs
    }
}

fn parse_env_list<T>(
    name: &str,
    separator: char,
    parse: fn(&str) -> Result<T, String>,
) -> Result<Vec<T>, String> {
    let mut parsed = Vec::new();
    if let Ok(value) = env::var(name)
        && !value.trim().is_empty()
    {
        for item in value.split(separator) {
            let item = item.trim();
            if !item.is_empty() {
                parsed.push(parse(item).map_err(|e| format!("Invalid filter in {}: {}", name, e))?);
            }
        }
    }
    Ok(parsed)
}

/// Environment variable format:
/// - XDRCONVERT_BOUNDS_FILTERS: "-90,25,-70,45;-130,20,-100,50"
/// - XDRCONVERT_TIME_FILTERS: "20052380000:20052382359,20052400000:20052402359"
/// - XDRCONVERT_RANGE_FILTERS: "ozone:0:200,pm25:0:500"
/// - XDRCONVERT_LIST_FILTERS: "id:10010,10020;id:20010"
pub fn parse_filters_from_env() -> Result<FilterArgs, String> {
    Ok(FilterArgs {
        bounds: parse_env_list("XDRCONVERT_BOUNDS_FILTERS", ';', parse_bounds_filter)?,
        time: parse_env_list("XDRCONVERT_TIME_FILTERS", ',', parse_time_range_filter)?,
        range: parse_env_list("XDRCONVERT_RANGE_FILTERS", ',', parse_range_filter)?,
        list: parse_env_list("XDRCONVERT_LIST_FILTERS", ';', parse_list_filter)?,
    })
}

/// Merge CLI filters with environment variable filters
/// Priority: CLI arguments > Environment variables, per filter kind
pub fn merge_filters(cli: FilterArgs) -> Result<FilterArgs, String> {
    let from_env = parse_filters_from_env()?;
    Ok(FilterArgs {
        bounds: if cli.bounds.is_empty() { from_env.bounds } else { cli.bounds },
        time: if cli.time.is_empty() { from_env.time } else { cli.time },
        range: if cli.range.is_empty() { from_env.range } else { cli.range },
        list: if cli.list.is_empty() { from_env.list } else { cli.list },
    })
}

/// Builds the job for a `convert` command from the optional config file
/// values and the command-line overrides.
pub fn convert_job(base: Option<JobConfig>, command: Commands) -> Result<JobConfig> {
    let Commands::Convert {
        input,
        output,
        format,
        bounds_filters,
        time_filters,
        range_filters,
        list_filters,
        grid,
        layer_edges,
        method,
        minimum_valid_value,
        variable,
        vector,
        aggregate,
        utc_offset,
        reference,
        reference_variable,
        reference_variable2,
        compare_function,
        ..
    } = command
    else {
        bail!("not a convert command");
    };

    let mut job = match base {
        Some(job) => job,
        None => {
            let (Some(input), Some(output)) = (input.clone(), output.clone()) else {
                bail!("INPUT and OUTPUT are required without a configuration file");
            };
            JobConfig {
                input,
                output,
                format: OutputFormat::default(),
                filters: Vec::new(),
                regrid: None,
                compare: None,
            }
        }
    };
    if let Some(input) = input {
        job.input = input;
    }
    if let Some(output) = output {
        job.output = output;
    }
    if let Some(format) = format {
        job.format = format;
    }

    let filters = merge_filters(FilterArgs {
        bounds: bounds_filters,
        time: time_filters,
        range: range_filters,
        list: list_filters,
    })
    .map_err(anyhow::Error::msg)?;
    job.filters.extend(filters.into_configs());

    if let Some(mut grid) = grid {
        grid.layer_edges = layer_edges.clone();
        let previous = job.regrid.take();
        job.regrid = Some(match previous {
            Some(regrid) => RegridConfig { grid, ..regrid },
            None => RegridConfig {
                grid,
                method: RegridMethod::default(),
                minimum_valid_value: crate::regrid::RegridRequest::default().minimum_valid_value,
                variable: None,
                vector: None,
                aggregate: None,
                utc_offset_hours: 0,
            },
        });
    }
    let regrid_overrides = method.is_some()
        || minimum_valid_value.is_some()
        || variable.is_some()
        || vector.is_some()
        || aggregate.is_some()
        || utc_offset.is_some()
        || !layer_edges.is_empty();
    match job.regrid.as_mut() {
        Some(regrid) => {
            if let Some(method) = method {
                regrid.method = method;
            }
            if let Some(value) = minimum_valid_value {
                regrid.minimum_valid_value = value;
            }
            if variable.is_some() {
                regrid.variable = variable;
            }
            if vector.is_some() {
                regrid.vector = vector;
            }
            if aggregate.is_some() {
                regrid.aggregate = aggregate;
            }
            if let Some(offset) = utc_offset {
                regrid.utc_offset_hours = offset;
            }
            if !layer_edges.is_empty() {
                regrid.grid.layer_edges = layer_edges;
            }
        }
        None if regrid_overrides => bail!("regrid options need --grid or a regrid section in the configuration"),
        None => {}
    }

    if let Some(reference) = reference {
        if let Some(compare) = job.compare.as_mut() {
            compare.reference = reference;
        } else {
            let Some(variable) = reference_variable.clone() else {
                bail!("--reference needs --reference-variable");
            };
            job.compare = Some(CompareConfig {
                reference,
                variable,
                variable2: None,
                first_column: 1,
                first_row: 1,
                first_layer: 1,
                function: "difference".to_string(),
            });
        }
    }
    match job.compare.as_mut() {
        Some(compare) => {
            if let Some(variable) = reference_variable {
                compare.variable = variable;
            }
            if reference_variable2.is_some() {
                compare.variable2 = reference_variable2;
            }
            if let Some(function) = compare_function {
                compare.function = function;
            }
        }
        None if reference_variable.is_some() || reference_variable2.is_some() || compare_function.is_some() => {
            bail!("comparison options need --reference or a compare section in the configuration")
        }
        None => {}
    }
    Ok(job)
}

fn template_grid() -> LonLatGrid {
    LonLatGrid {
        columns: 70,
        rows: 30,
        west: -130.0,
        south: 20.0,
        cell_width: 1.0,
        cell_height: 1.0,
        layer_edges: Vec::new(),
    }
}

fn template_regrid(aggregate: Option<AggregationSpan>) -> RegridConfig {
    RegridConfig {
        grid: template_grid(),
        method: RegridMethod::Mean,
        minimum_valid_value: crate::regrid::RegridRequest::default().minimum_valid_value,
        variable: Some("aod".to_string()),
        vector: None,
        aggregate,
        utc_offset_hours: if aggregate.is_some() { -5 } else { 0 },
    }
}

/// Example configuration for `template_type`.
pub fn template_config(template_type: &TemplateType) -> JobConfig {
    let job = |input: &str, output: &str, format: OutputFormat| JobConfig {
        input: input.to_string(),
        output: output.to_string(),
        format,
        filters: Vec::new(),
        regrid: None,
        compare: None,
    };
    match template_type {
        TemplateType::Basic => job("sites.xdr", "sites.txt", OutputFormat::Ascii),
        TemplateType::Filtered => JobConfig {
            filters: vec![
                FilterConfig::Bounds {
                    params: BoundsFilter::new(-90.0, 25.0, -70.0, 45.0),
                },
                FilterConfig::TimeRange {
                    params: TimeRangeFilter::new(2005_238_0000, 2005_238_2359),
                },
                FilterConfig::Range {
                    params: ValueRangeFilter::new("ozone", 0.0, 200.0),
                },
            ],
            ..job("sites.xdr", "sites_filtered.xdr", OutputFormat::Xdr)
        },
        TemplateType::Regrid => JobConfig {
            regrid: Some(template_regrid(None)),
            ..job("modis.xdr", "modis.ncf", OutputFormat::Ioapi)
        },
        TemplateType::Daily => JobConfig {
            regrid: Some(template_regrid(Some(AggregationSpan::Daily))),
            ..job("modis.xdr", "modis_daily.xdr", OutputFormat::Xdr)
        },
        TemplateType::Compare => JobConfig {
            regrid: Some(template_regrid(None)),
            compare: Some(CompareConfig {
                reference: "cmaq_aod.ncf".to_string(),
                variable: "AOD".to_string(),
                variable2: None,
                first_column: 1,
                first_row: 1,
                first_layer: 1,
                function: "difference".to_string(),
            }),
            ..job("modis.xdr", "modis_vs_cmaq.txt", OutputFormat::Ascii)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Global mutex to ensure environment variable tests run sequentially
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const FILTER_VARS: [&str; 4] = [
        "XDRCONVERT_BOUNDS_FILTERS",
        "XDRCONVERT_TIME_FILTERS",
        "XDRCONVERT_RANGE_FILTERS",
        "XDRCONVERT_LIST_FILTERS",
    ];

    fn save_env() -> Vec<Option<String>> {
        FILTER_VARS.iter().map(|v| env::var(v).ok()).collect()
    }

    fn restore_env(saved: Vec<Option<String>>) {
        unsafe {
            for (name, value) in FILTER_VARS.iter().zip(saved) {
                match value {
                    Some(value) => env::set_var(name, value),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_parse_range_filter() {
        let result = parse_range_filter("ozone:0:200").unwrap();
        assert_eq!(result.variable, "ozone");
        assert_eq!(result.min_value, 0.0);
        assert_eq!(result.max_value, 200.0);

        assert!(parse_range_filter("ozone:30.0").is_err());
        assert!(parse_range_filter("ozone:30.0:60.0:extra").is_err());
        assert!(parse_range_filter("ozone:invalid:60.0").is_err());
        assert!(parse_range_filter("ozone:60.0:30.0").is_err());
    }

    #[test]
    fn test_parse_list_filter() {
        let result = parse_list_filter("id:10010,10020").unwrap();
        assert_eq!(result.variable, "id");
        assert_eq!(result.values, vec![10010.0, 10020.0]);

        assert!(parse_list_filter("id:1,invalid").is_err());
        assert!(parse_list_filter("id:").is_err());
        assert!(parse_list_filter("id").is_err());
    }

    #[test]
    fn test_parse_bounds_filter() {
        let result = parse_bounds_filter("-90,25,-70,45").unwrap();
        assert_eq!(result.min_longitude, -90.0);
        assert_eq!(result.max_latitude, 45.0);

        assert!(parse_bounds_filter("-90,25,-70").is_err());
        assert!(parse_bounds_filter("-70,25,-90,45").is_err());
        assert!(parse_bounds_filter("-190,25,-70,45").is_err());
    }

    #[test]
    fn test_parse_time_range_filter() {
        let result = parse_time_range_filter("20052380000:20052382359").unwrap();
        assert_eq!(result.first, 2005_238_0000);
        assert_eq!(result.last, 2005_238_2359);

        assert!(parse_time_range_filter("20052382359:20052380000").is_err());
        assert!(parse_time_range_filter("20053660000:20053660100").is_err());
        assert!(parse_time_range_filter("20052380000").is_err());
    }

    #[test]
    fn test_parse_grid() {
        let grid = parse_grid("70,30,-130,20,1,1").unwrap();
        assert_eq!(grid.columns, 70);
        assert_eq!(grid.south, 20.0);

        assert!(parse_grid("0,30,-130,20,1,1").is_err());
        assert!(parse_grid("1.5,30,-130,20,1,1").is_err());
        assert!(parse_grid("400,30,-130,20,1,1").is_err());
    }

    #[test]
    fn test_filter_conversion() {
        let range_arg = RangeFilterArg {
            variable: "ozone".to_string(),
            min_value: 10.0,
            max_value: 50.0,
        };

        let filter_config: FilterConfig = range_arg.into();
        if let FilterConfig::Range { params } = filter_config {
            assert_eq!(params.variable, "ozone");
            assert_eq!(params.min_value, 10.0);
            assert_eq!(params.max_value, 50.0);
        } else {
            panic!("Expected Range filter config");
        }

        let bounds: FilterConfig = parse_bounds_filter("-90,25,-70,45").unwrap().into();
        assert_eq!(bounds.kind(), "bounds");
    }

    #[test]
    fn test_environment_variable_filter_parsing() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let saved = save_env();

        unsafe {
            env::set_var("XDRCONVERT_BOUNDS_FILTERS", "-90,25,-70,45;-130,20,-100,50");
            env::set_var("XDRCONVERT_TIME_FILTERS", "20052380000:20052382359");
            env::set_var("XDRCONVERT_RANGE_FILTERS", "ozone:0:200,pm25:0:500");
            env::set_var("XDRCONVERT_LIST_FILTERS", "id:10010,10020;id:20010");
        }

        let result = parse_filters_from_env().unwrap();
        assert_eq!(result.bounds.len(), 2);
        assert_eq!(result.time.len(), 1);
        assert_eq!(result.range.len(), 2);
        assert_eq!(result.list.len(), 2);
        assert_eq!(result.range[1].variable, "pm25");
        assert_eq!(result.list[0].values, vec![10010.0, 10020.0]);

        unsafe {
            env::set_var("XDRCONVERT_RANGE_FILTERS", "ozone:200:0");
        }
        assert!(parse_filters_from_env().is_err());

        unsafe {
            for name in FILTER_VARS {
                env::remove_var(name);
            }
        }
        assert_eq!(parse_filters_from_env().unwrap(), FilterArgs::default());

        restore_env(saved);
    }

    #[test]
    fn test_filter_merging_priority() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let saved = save_env();

        unsafe {
            for name in FILTER_VARS {
                env::remove_var(name);
            }
            env::set_var("XDRCONVERT_RANGE_FILTERS", "ozone:0:90");
            env::set_var("XDRCONVERT_LIST_FILTERS", "id:10010");
        }

        let cli = FilterArgs {
            range: vec![RangeFilterArg {
                variable: "pm25".to_string(),
                min_value: 0.0,
                max_value: 500.0,
            }],
            ..Default::default()
        };
        let merged = merge_filters(cli).unwrap();

        // CLI range filter wins, environment list filter fills in
        assert_eq!(merged.range.len(), 1);
        assert_eq!(merged.range[0].variable, "pm25");
        assert_eq!(merged.list.len(), 1);
        assert_eq!(merged.list[0].variable, "id");
        assert!(merged.bounds.is_empty());

        restore_env(saved);
    }

    #[test]
    fn test_templates_validate() {
        for template in [
            TemplateType::Basic,
            TemplateType::Filtered,
            TemplateType::Regrid,
            TemplateType::Daily,
            TemplateType::Compare,
        ] {
            let config = template_config(&template);
            assert!(config.validate().is_ok(), "{:?}", template);
        }
    }
}
