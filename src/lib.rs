//! # xdrconvert
//!
//! A Rust library for regridding, aggregating, comparing and re-encoding XDR
//! air-quality observation files (satellite swaths, aircraft/balloon profiles
//! and monitoring sites).
//!
//! ## Features
//!
//! - **Bit-exact XDR codec**: big-endian headers and arrays, 4- or 8-byte words
//! - **Point filters**: box, time window, value range and value list
//! - **Regridding** onto a regular longitude/latitude grid with compaction of
//!   the ragged per-hour results
//! - **Time aggregation** of hourly output into daily or whole-period means
//! - **Comparison** against a reference model array read from NetCDF
//! - **Output** as XDR, tab-delimited ASCII, COARDS or IOAPI NetCDF
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xdrconvert::{process_job, input::JobConfig};
//!
//! let config = JobConfig::from_file("job.yaml")?;
//! let summary = process_job(&config)?;
//! println!("{} points written", summary.points_written);
//! # Ok::<(), xdrconvert::XdrError>(())
//! ```
//!
//! ## Configuration Example
//!
//! ```json
//! {
//!   "input": "modis.xdr",
//!   "output": "modis_daily.ncf",
//!   "format": "ioapi",
//!   "regrid": {
//!     "grid": {"columns": 70, "rows": 30, "west": -130.0, "south": 20.0,
//!              "cell_width": 1.0, "cell_height": 1.0},
//!     "method": "mean",
//!     "aggregate": "daily"
//!   }
//! }
//! ```

pub mod aggregate;
pub mod cli;
pub mod codec;
pub mod compare;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod grid;
pub mod info;
pub mod input;
pub mod log;
pub mod netcdf_writer;
pub mod output;
pub mod regrid;
pub mod timestamp;
pub mod validate;
pub mod xdr;

#[cfg(test)]
mod cli_tests;

pub use error::{XdrError, XdrResult};

use ::log::info;
use std::fs::File;
use std::io::BufReader;

use crate::compare::ReferenceArray;
use crate::dataset::Dataset;
use crate::input::JobConfig;
use crate::output::writer_for;

/// Pipeline stages reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Filter,
    Regrid,
    Aggregate,
    Compare,
    Write,
}

impl Stage {
    pub fn describe(self) -> &'static str {
        match self {
            Stage::Read => "Reading input",
            Stage::Filter => "Filtering points",
            Stage::Regrid => "Regridding",
            Stage::Aggregate => "Aggregating timesteps",
            Stage::Compare => "Comparing against reference",
            Stage::Write => "Writing output",
        }
    }
}

/// Point counts of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobSummary {
    pub points_read: usize,
    pub points_kept: usize,
    pub timesteps_written: usize,
    pub points_written: usize,
    pub regridded: bool,
}

/// Runs a job: read, filter, regrid, aggregate, compare, write.
///
/// # Arguments
///
/// * `config` - The job configuration naming input, stages and output
///
/// # Errors
///
/// This function will return an error if:
/// - The configuration is invalid (`Configuration`, before any file is opened)
/// - The input is malformed (`Format` or `Range`)
/// - A stage leaves no usable points (`EmptyResult`); no output file is created
/// - The reference array or the output file cannot be read or written
pub fn process_job(config: &JobConfig) -> XdrResult<JobSummary> {
    process_job_with_progress(config, |_| {})
}

/// [`process_job`] calling `on_stage` as each stage begins.
pub fn process_job_with_progress<F: FnMut(Stage)>(config: &JobConfig, mut on_stage: F) -> XdrResult<JobSummary> {
    config.validate()?;

    let mut reader = BufReader::new(File::open(&config.input)?);
    let will_be_regridded = config.regrid.is_some() || xdr::peek_regridded(&mut reader)?;
    if writer_for(config.format, will_be_regridded).is_none() {
        return Err(XdrError::configuration(format!(
            "no {} writer for {} data",
            config.format,
            if will_be_regridded { "regridded" } else { "unregridded" }
        )));
    }

    on_stage(Stage::Read);
    let mut dataset = Dataset::load(reader)?;
    info!(
        "Read {} {} ({} variables, {} points)",
        dataset.kind,
        if dataset.is_regridded() { "regridded data" } else { "observations" },
        dataset.variable_count(),
        dataset.total_points()
    );
    let mut summary = JobSummary {
        points_read: dataset.total_points(),
        points_kept: dataset.total_points(),
        ..Default::default()
    };

    if !config.filters.is_empty() {
        on_stage(Stage::Filter);
        let filters = config.point_filters()?;
        summary.points_kept = filters::apply_filters(&mut dataset, &filters)?;
    }

    if let Some(regrid) = &config.regrid {
        on_stage(Stage::Regrid);
        dataset.regrid(&regrid.grid, &regrid.request())?;
        if let Some(span) = regrid.aggregate {
            on_stage(Stage::Aggregate);
            dataset.aggregate_time(span, regrid.utc_offset_hours)?;
        }
    }

    if let Some(compare) = &config.compare {
        on_stage(Stage::Compare);
        let comparator = compare.comparator()?;
        let reference = ReferenceArray::from_netcdf(
            &compare.reference,
            &compare.variable,
            compare.variable2.as_deref(),
            compare.origin(),
        )?;
        dataset.compare_against(&reference, &comparator)?;
    }

    on_stage(Stage::Write);
    dataset.write_to_path(config.format, &config.output)?;
    match &dataset.regridded {
        Some(output) => {
            summary.regridded = true;
            summary.timesteps_written = output.timesteps();
            summary.points_written = output.total_points();
        }
        None => {
            summary.timesteps_written = dataset.timesteps();
            summary.points_written = dataset.total_points();
        }
    }
    Ok(summary)
}
