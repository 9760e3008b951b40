//! # Input Configuration Module
//!
//! This module provides configuration parsing and validation for xdrconvert jobs.
//! A job names an XDR input file, an output file and format, and the optional
//! stages to run between them.
//!
//! ## Configuration Structure
//!
//! - **input**: Path to the input XDR file
//! - **output**: Path of the file to write
//! - **format**: One of `xdr`, `ascii`, `coards`, `ioapi` (default `xdr`)
//! - **filters**: Point filters applied before regridding
//! - **regrid**: Target grid, regrid method and optional time aggregation
//! - **compare**: Reference model array and comparison function
//!
//! Configurations are read from JSON or YAML; [`JobConfig::from_file`] picks
//! the parser from the file extension.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use xdrconvert::input::JobConfig;
//!
//! let config = JobConfig::from_file("job.yaml")?;
//!
//! let json = r#"
//! {
//!   "input": "modis.xdr",
//!   "output": "modis.txt",
//!   "format": "ascii",
//!   "filters": [
//!     {"kind": "bounds", "params": {"min_longitude": -90.0, "min_latitude": 25.0,
//!                                   "max_longitude": -70.0, "max_latitude": 45.0}}
//!   ]
//! }"#;
//! let config = JobConfig::from_json(json)?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::aggregate::AggregationSpan;
use crate::compare::{Comparator, WindowOrigin};
use crate::dataset::Bounds;
use crate::error::{XdrError, XdrResult};
use crate::filters::{BoundsFilter, ListFilter, PointFilter, TimeRangeFilter, ValueRangeFilter};
use crate::grid::{Grid, LonLatGrid, RegridMethod};
use crate::output::{OutputFormat, writer_for};
use crate::regrid::RegridRequest;
use crate::timestamp::Timestamp;

/// Main configuration structure for xdrconvert jobs.
///
/// # Examples
///
/// ```rust
/// use xdrconvert::input::{FilterConfig, JobConfig};
/// use xdrconvert::filters::ValueRangeFilter;
/// use xdrconvert::output::OutputFormat;
///
/// let config = JobConfig {
///     input: "sites.xdr".to_string(),
///     output: "sites.txt".to_string(),
///     format: OutputFormat::Ascii,
///     filters: vec![FilterConfig::Range {
///         params: ValueRangeFilter::new("ozone", 0.0, 200.0),
///     }],
///     regrid: None,
///     compare: None,
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Path to the input XDR file
    pub input: String,
    /// Path for the output file
    pub output: String,
    /// Output encoding
    #[serde(default)]
    pub format: OutputFormat,
    /// Filters applied to the observation points before regridding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regrid: Option<RegridConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<CompareConfig>,
}

/// Enumeration of all supported filter configurations.
///
/// ```rust
/// use xdrconvert::input::FilterConfig;
///
/// let filter: FilterConfig = serde_json::from_str(
///     r#"{"kind": "list", "params": {"variable": "id", "values": [10010, 10020]}}"#,
/// ).unwrap();
/// assert_eq!(filter.kind(), "list");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FilterConfig {
    /// Longitude/latitude box
    #[serde(rename = "bounds")]
    Bounds { params: BoundsFilter },
    /// Timestamp window, packed `YYYYDDDHHMM` values
    #[serde(rename = "time_range")]
    TimeRange { params: TimeRangeFilter },
    /// Value range of one variable
    #[serde(rename = "range")]
    Range { params: ValueRangeFilter },
    /// Discrete values of one variable
    #[serde(rename = "list")]
    List { params: ListFilter },
}

fn default_minimum_valid_value() -> f64 {
    RegridRequest::default().minimum_valid_value
}

/// Regrid stage settings.
///
/// `vector` names the second component of a vector variable (for wind, `v`
/// when `variable` is `u`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegridConfig {
    pub grid: LonLatGrid,
    #[serde(default)]
    pub method: RegridMethod,
    #[serde(default = "default_minimum_valid_value")]
    pub minimum_valid_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<String>,
    /// Optional aggregation of the hourly output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregationSpan>,
    /// Offset of local time from UTC, used for daily windows
    #[serde(default)]
    pub utc_offset_hours: i64,
}

impl RegridConfig {
    pub fn request(&self) -> RegridRequest {
        RegridRequest {
            method: self.method,
            minimum_valid_value: self.minimum_valid_value,
            variable: self.variable.clone(),
            variable2: self.vector.clone(),
        }
    }
}

fn default_first_index() -> i64 {
    1
}

fn default_function() -> String {
    "difference".to_string()
}

/// Compare stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareConfig {
    /// NetCDF file holding the reference model array
    pub reference: String,
    pub variable: String,
    /// Second reference component, required by converters such as `speed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable2: Option<String>,
    #[serde(default = "default_first_index")]
    pub first_column: i64,
    #[serde(default = "default_first_index")]
    pub first_row: i64,
    #[serde(default = "default_first_index")]
    pub first_layer: i64,
    /// Name of a builtin comparator
    #[serde(default = "default_function")]
    pub function: String,
}

impl CompareConfig {
    pub fn origin(&self) -> WindowOrigin {
        WindowOrigin {
            first_column: self.first_column,
            first_row: self.first_row,
            first_layer: self.first_layer,
        }
    }

    pub fn comparator(&self) -> XdrResult<Comparator> {
        Comparator::builtin(&self.function)
    }
}

impl JobConfig {
    /// Loads a job configuration from a JSON or YAML file.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else as JSON.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use xdrconvert::input::JobConfig;
    ///
    /// let config = JobConfig::from_file("job.json")?;
    /// println!("Converting {} to {}", config.input, config.output);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> XdrResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Loads a job configuration from a JSON string.
    ///
    /// ```rust
    /// use xdrconvert::input::JobConfig;
    ///
    /// let config = JobConfig::from_json(r#"{"input": "a.xdr", "output": "b.xdr"}"#)?;
    /// assert!(config.filters.is_empty());
    /// # Ok::<(), xdrconvert::XdrError>(())
    /// ```
    pub fn from_json(json_str: &str) -> XdrResult<Self> {
        let config: JobConfig = serde_json::from_str(json_str)?;
        Ok(config)
    }

    pub fn from_yaml(yaml_str: &str) -> XdrResult<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml_str)?;
        Ok(config)
    }

    pub fn to_json(&self) -> XdrResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> XdrResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks the job before any file is opened.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - The input or output path is empty
    /// - The output format has no writer for the data the job produces
    /// - The grid definition is inconsistent or the UTC offset is out of range
    /// - The comparison function is unknown or lacks its second reference
    /// - A filter cannot select anything (inverted ranges, empty lists)
    pub fn validate(&self) -> XdrResult<()> {
        if self.input.trim().is_empty() {
            return Err(XdrError::configuration("input path is empty"));
        }
        if self.output.trim().is_empty() {
            return Err(XdrError::configuration("output path is empty"));
        }
        // without a regrid stage the mode is decided by the input header
        if self.regrid.is_some() && writer_for(self.format, true).is_none() {
            return Err(XdrError::configuration(format!("no {} writer for regridded data", self.format)));
        }
        if let Some(regrid) = &self.regrid {
            if !regrid.grid.invariant() {
                return Err(XdrError::configuration(format!("invalid grid definition {:?}", regrid.grid)));
            }
            if !regrid.minimum_valid_value.is_finite() {
                return Err(XdrError::configuration("minimum_valid_value must be finite"));
            }
            if !(-12..=14).contains(&regrid.utc_offset_hours) {
                return Err(XdrError::configuration(format!(
                    "invalid UTC offset {} hours",
                    regrid.utc_offset_hours
                )));
            }
            if regrid.vector.is_some() && regrid.variable.is_none() {
                return Err(XdrError::configuration("a vector component needs 'variable' as its first component"));
            }
        }
        if let Some(compare) = &self.compare {
            if compare.reference.trim().is_empty() {
                return Err(XdrError::configuration("reference path is empty"));
            }
            let comparator = compare.comparator()?;
            if comparator.needs_second_reference() && compare.variable2.is_none() {
                return Err(XdrError::configuration(format!(
                    "comparison '{}' needs 'variable2'",
                    comparator.name
                )));
            }
            if compare.first_column < 1 || compare.first_row < 1 || compare.first_layer < 1 {
                return Err(XdrError::configuration("reference window must start at index 1 or later"));
            }
        }
        for filter in &self.filters {
            filter.check()?;
        }
        Ok(())
    }

    /// Builds the configured point filters, in order.
    pub fn point_filters(&self) -> XdrResult<Vec<Box<dyn PointFilter>>> {
        self.filters.iter().map(|f| f.to_filter()).collect()
    }
}

impl FilterConfig {
    /// Converts this filter configuration into a concrete filter implementation.
    ///
    /// ```rust
    /// use xdrconvert::input::FilterConfig;
    /// use xdrconvert::filters::BoundsFilter;
    ///
    /// let config = FilterConfig::Bounds {
    ///     params: BoundsFilter::new(-90.0, 25.0, -70.0, 45.0),
    /// };
    /// let filter = config.to_filter()?;
    /// assert!(filter.describe().starts_with("bounds"));
    /// # Ok::<(), xdrconvert::XdrError>(())
    /// ```
    pub fn to_filter(&self) -> XdrResult<Box<dyn PointFilter>> {
        self.check()?;
        Ok(match self {
            FilterConfig::Bounds { params } => Box::new(params.clone()),
            FilterConfig::TimeRange { params } => Box::new(params.clone()),
            FilterConfig::Range { params } => Box::new(params.clone()),
            FilterConfig::List { params } => Box::new(params.clone()),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FilterConfig::Bounds { .. } => "bounds",
            FilterConfig::TimeRange { .. } => "time_range",
            FilterConfig::Range { .. } => "range",
            FilterConfig::List { .. } => "list",
        }
    }

    fn check(&self) -> XdrResult<()> {
        let invalid = |msg: String| Err(XdrError::configuration(format!("{} filter: {}", self.kind(), msg)));
        match self {
            FilterConfig::Bounds { params } => {
                if let Err(e) = Bounds::new(
                    params.min_longitude,
                    params.min_latitude,
                    params.max_longitude,
                    params.max_latitude,
                ) {
                    return invalid(e.to_string());
                }
            }
            FilterConfig::TimeRange { params } => {
                let first = Timestamp::from_packed(params.first);
                let last = Timestamp::from_packed(params.last);
                match (first, last) {
                    (Ok(first), Ok(last)) if first <= last => {}
                    (Ok(_), Ok(_)) => return invalid(format!("{} is after {}", params.first, params.last)),
                    (Err(e), _) | (_, Err(e)) => return invalid(e.to_string()),
                }
            }
            FilterConfig::Range { params } => {
                if params.variable.trim().is_empty() || !(params.min_value <= params.max_value) {
                    return invalid(format!("[{}, {}] on '{}'", params.min_value, params.max_value, params.variable));
                }
            }
            FilterConfig::List { params } => {
                if params.variable.trim().is_empty() || params.values.is_empty() {
                    return invalid(format!("no values for '{}'", params.variable));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
input: modis.xdr
output: modis.ncf
format: ioapi
regrid:
  grid:
    columns: 10
    rows: 5
    west: -100.0
    south: 30.0
    cell_width: 1.0
    cell_height: 1.0
  method: nearest
  aggregate: daily
  utc_offset_hours: -5
"#;

    #[test]
    fn test_yaml_defaults() {
        let config = JobConfig::from_yaml(YAML).unwrap();
        let regrid = config.regrid.as_ref().unwrap();
        assert_eq!(config.format, OutputFormat::Ioapi);
        assert_eq!(regrid.method, RegridMethod::Nearest);
        assert_eq!(regrid.minimum_valid_value, -9998.0);
        assert_eq!(regrid.aggregate, Some(AggregationSpan::Daily));
        assert!(regrid.grid.layer_edges.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_json_agree() {
        let config = JobConfig::from_yaml(YAML).unwrap();
        let json = config.to_json().unwrap();
        assert_eq!(JobConfig::from_json(&json).unwrap(), config);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(JobConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_compare_defaults_and_arity() {
        let json = r#"{"input": "a.xdr", "output": "b.xdr",
            "regrid": {"grid": {"columns": 2, "rows": 2, "west": 0.0, "south": 0.0,
                                "cell_width": 1.0, "cell_height": 1.0}},
            "compare": {"reference": "cmaq.ncf", "variable": "O3"}}"#;
        let mut config = JobConfig::from_json(json).unwrap();
        let compare = config.compare.as_ref().unwrap();
        assert_eq!(compare.function, "difference");
        assert_eq!(compare.origin(), WindowOrigin::default());
        assert!(config.validate().is_ok());

        config.compare.as_mut().unwrap().function = "speed".to_string();
        assert!(config.validate().unwrap_err().is_configuration());
        config.compare.as_mut().unwrap().variable2 = Some("VWIND".to_string());
        assert!(config.validate().is_ok());

        config.compare.as_mut().unwrap().function = "sum".to_string();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_point_filters_from_params() {
        let json = r#"{"input": "a.xdr", "output": "b.xdr", "filters": [
            {"kind": "bounds", "params": {"min_longitude": -90.0, "min_latitude": 25.0,
                                          "max_longitude": -70.0, "max_latitude": 45.0}},
            {"kind": "time_range", "params": {"first": 20052380000, "last": 20052382359}},
            {"kind": "range", "params": {"variable": "ozone", "min_value": 0.0, "max_value": 200.0}},
            {"kind": "list", "params": {"variable": "id", "values": [10010]}}]}"#;
        let config = JobConfig::from_json(json).unwrap();
        let filters = config.point_filters().unwrap();
        let described: Vec<String> = filters.iter().map(|f| f.describe()).collect();
        assert_eq!(
            described,
            vec![
                "bounds [-90, -70] x [25, 45]",
                "time 20052380000 .. 20052382359",
                "ozone in [0, 200]",
                "id in [10010.0]",
            ]
        );

        // flat parameters without a `params` object are rejected
        let flat = r#"{"input": "a.xdr", "output": "b.xdr",
            "filters": [{"kind": "range", "variable": "ozone", "min_value": 0.0, "max_value": 1.0}]}"#;
        assert!(JobConfig::from_json(flat).is_err());
        let unknown = r#"{"input": "a.xdr", "output": "b.xdr", "filters": [{"kind": "grib", "params": {}}]}"#;
        assert!(JobConfig::from_json(unknown).is_err());
    }

    #[test]
    fn test_invalid_filters() {
        let bad = [
            FilterConfig::Bounds {
                params: BoundsFilter::new(10.0, 0.0, -10.0, 5.0),
            },
            FilterConfig::TimeRange {
                params: TimeRangeFilter::new(2005_239_0000, 2005_238_0000),
            },
            FilterConfig::Range {
                params: ValueRangeFilter::new("ozone", 5.0, 1.0),
            },
            FilterConfig::List {
                params: ListFilter::new("id", vec![]),
            },
        ];
        for filter in bad {
            assert!(filter.to_filter().is_err(), "{}", filter.kind());
        }
    }

    #[test]
    fn test_invalid_grid_and_offset() {
        let mut config = JobConfig::from_yaml(YAML).unwrap();
        config.regrid.as_mut().unwrap().utc_offset_hours = 20;
        assert!(config.validate().unwrap_err().is_configuration());
        let mut config = JobConfig::from_yaml(YAML).unwrap();
        config.regrid.as_mut().unwrap().grid.columns = 0;
        assert!(config.validate().unwrap_err().is_configuration());
    }
}
