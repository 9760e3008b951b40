//! # Dataset Validation
//!
//! Predicates asserting the invariants a [`Dataset`] must satisfy. [`check`]
//! runs after loading and again after every stage that mutates a dataset
//! (filtering, regridding, compaction, time aggregation, comparison).
//!
//! Array-length disagreements are reported as `Format` errors; values outside
//! their domain (coordinates, timestamps, non-finite payloads, grid indices)
//! as `Range` errors naming the offending value.

use log::debug;
use rayon::prelude::*;

use crate::dataset::{is_latitude, is_longitude, Dataset, GridPoints, RegriddedOutput};
use crate::error::{XdrError, XdrResult};
use crate::timestamp::Timestamp;

/// Checks every invariant of `dataset`.
pub fn check(dataset: &Dataset) -> XdrResult<()> {
    check_header(dataset)?;
    if !dataset.has_observations() && !dataset.is_regridded() {
        return Err(XdrError::format("dataset has neither observations nor regridded output"));
    }
    if dataset.has_observations() {
        check_observations(dataset)?;
    }
    if let Some(output) = &dataset.regridded {
        check_regridded(dataset, output)?;
    }
    debug!(
        "validated {} dataset: {} observation points, {} regridded points",
        dataset.kind,
        dataset.total_points(),
        dataset.regridded.as_ref().map_or(0, |r| r.total_points())
    );
    Ok(())
}

fn check_words(words: &[String], what: &str) -> XdrResult<()> {
    if let Some(word) = words.iter().find(|w| w.is_empty() || w.chars().any(char::is_whitespace)) {
        return Err(XdrError::format(format!("invalid {} '{}'", what, word)));
    }
    Ok(())
}

fn check_header(dataset: &Dataset) -> XdrResult<()> {
    if dataset.note.contains('\n') {
        return Err(XdrError::format("note must be a single line"));
    }
    if dataset.variable_names.is_empty() || dataset.variable_names.len() != dataset.variable_units.len() {
        return Err(XdrError::format(format!(
            "{} variable names but {} units",
            dataset.variable_names.len(),
            dataset.variable_units.len()
        )));
    }
    check_words(&dataset.variable_names, "variable name")?;
    check_words(&dataset.variable_units, "variable unit")?;
    if dataset.time_range.first > dataset.time_range.last {
        return Err(XdrError::range(format!(
            "time range {} .. {} is not monotonic",
            dataset.time_range.first, dataset.time_range.last
        )));
    }
    if !dataset.bounds.is_valid() {
        return Err(XdrError::range(format!("invalid bounds {}", dataset.bounds)));
    }
    Ok(())
}

/// Index of the first non-finite value, searched in parallel.
fn first_non_finite(values: &[f64]) -> Option<usize> {
    values.par_iter().position_first(|v| !v.is_finite())
}

fn check_coordinates(longitudes: &[f64], latitudes: &[f64]) -> XdrResult<()> {
    if let Some(i) = longitudes.par_iter().position_first(|v| !is_longitude(*v)) {
        return Err(XdrError::range(format!("longitude {} at point {} is out of range", longitudes[i], i)));
    }
    if let Some(i) = latitudes.par_iter().position_first(|v| !is_latitude(*v)) {
        return Err(XdrError::range(format!("latitude {} at point {} is out of range", latitudes[i], i)));
    }
    Ok(())
}

fn check_observations(dataset: &Dataset) -> XdrResult<()> {
    let kind = dataset.kind;
    let implicit = kind.implicit_variables();
    if dataset.variable_count() <= implicit.len() {
        return Err(XdrError::format(format!(
            "{} data needs at least one variable after {:?}",
            kind, implicit
        )));
    }
    for (expected, found) in implicit.iter().zip(&dataset.variable_names) {
        if !expected.eq_ignore_ascii_case(found) {
            return Err(XdrError::format(format!(
                "{} variable '{}' found where '{}' was expected",
                kind, found, expected
            )));
        }
    }
    let total = dataset.total_points();
    if dataset.raw_data.len() != dataset.variable_count() * total {
        return Err(XdrError::format(format!(
            "data array holds {} values, expected {} variables x {} points",
            dataset.raw_data.len(),
            dataset.variable_count(),
            total
        )));
    }
    if let Some(i) = first_non_finite(&dataset.raw_data) {
        let variable = i / total.max(1);
        return Err(XdrError::range(format!(
            "non-finite value {} in variable '{}' at point {}",
            dataset.raw_data[i],
            dataset.variable_names[variable],
            i % total.max(1)
        )));
    }
    check_coordinates(dataset.longitudes(), dataset.latitudes())?;
    for (i, value) in dataset.timestamps().iter().enumerate() {
        let timestamp = Timestamp::from_value(*value)?;
        let floor = dataset.time_range.first.floor_hour();
        if timestamp < floor || timestamp > dataset.time_range.last {
            return Err(XdrError::range(format!(
                "timestamp {} at point {} lies outside {} .. {}",
                timestamp, i, dataset.time_range.first, dataset.time_range.last
            )));
        }
    }
    Ok(())
}

fn check_indices(values: &[i64], extent: usize, what: &str) -> XdrResult<()> {
    if let Some(i) = values.par_iter().position_first(|v| *v < 1 || *v as usize > extent) {
        return Err(XdrError::range(format!(
            "{} index {} at point {} is outside [1, {}]",
            what, values[i], i, extent
        )));
    }
    Ok(())
}

fn check_samples(points: &GridPoints) -> XdrResult<()> {
    let bad = |samples: &[crate::dataset::Sample]| {
        samples
            .par_iter()
            .position_first(|s| s.value().is_some_and(|v| !v.is_finite()))
    };
    if let Some(i) = bad(&points.values) {
        return Err(XdrError::range(format!("non-finite regridded value at point {}", i)));
    }
    if let Some(values2) = &points.values2
        && let Some(i) = bad(values2)
    {
        return Err(XdrError::range(format!("non-finite regridded second component at point {}", i)));
    }
    Ok(())
}

fn check_regridded(dataset: &Dataset, output: &RegriddedOutput) -> XdrResult<()> {
    let points = &output.points;
    let names = output.variable_names.len();
    if !(1..=2).contains(&names) || output.variable_units.len() != names {
        return Err(XdrError::format(format!(
            "regridded output needs 1 or 2 variables with units, found {} and {}",
            names,
            output.variable_units.len()
        )));
    }
    check_words(&output.variable_names, "regridded variable name")?;
    check_words(&output.variable_units, "regridded variable unit")?;
    if points.is_vector() != (names == 2) {
        return Err(XdrError::format("vector components do not match the variable names"));
    }
    if points.has_elevation() != dataset.kind.has_elevation() || points.layers.is_some() != points.has_elevation() {
        return Err(XdrError::format(format!(
            "{} regridded output has mismatched elevation/layer arrays",
            dataset.kind
        )));
    }
    if !points.lengths_agree() {
        return Err(XdrError::format("regridded arrays have different lengths"));
    }
    if output.timesteps() == 0 || output.hours_per_timestep == 0 {
        return Err(XdrError::format("regridded output has no timesteps"));
    }
    let total = points.len();
    let sum: usize = output.points_per_timestep.iter().sum();
    if sum != total {
        return Err(XdrError::format(format!(
            "regridded points per timestep sum to {} but arrays hold {}",
            sum, total
        )));
    }
    if let Some(count) = output.points_per_timestep.iter().find(|c| **c > total) {
        return Err(XdrError::range(format!("timestep point count {} exceeds total {}", count, total)));
    }
    if output.hours_per_timestep == 1 && output.timesteps() != output.time_range.hours() {
        return Err(XdrError::format(format!(
            "{} hourly timesteps do not cover {} .. {}",
            output.timesteps(),
            output.time_range.first,
            output.time_range.last
        )));
    }
    check_coordinates(&points.longitudes, &points.latitudes)?;
    if let Some(elevations) = &points.elevations
        && let Some(i) = first_non_finite(elevations)
    {
        return Err(XdrError::range(format!("non-finite elevation at point {}", i)));
    }
    check_indices(&points.columns, output.extent.columns, "column")?;
    check_indices(&points.rows, output.extent.rows, "row")?;
    if let Some(layers) = &points.layers {
        check_indices(layers, output.extent.layers, "layer")?;
    }
    check_samples(points)
}
