//! # Point Filters
//!
//! Filters select observation points before regridding. Each filter yields a
//! per-point keep mask; [`apply_filters`] combines the masks, compacts the
//! dataset's ragged arrays and re-validates it.
//!
//! Masks are computed in parallel over disjoint points with `rayon`.

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{Bounds, Dataset};
use crate::error::{XdrError, XdrResult};
use crate::timestamp::Timestamp;

pub trait PointFilter {
    /// Returns one flag per observation point, true to keep it.
    fn apply(&self, dataset: &Dataset) -> XdrResult<Vec<bool>>;

    fn describe(&self) -> String;
}

/// Keeps points inside a longitude/latitude box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsFilter {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

impl BoundsFilter {
    pub fn new(min_longitude: f64, min_latitude: f64, max_longitude: f64, max_latitude: f64) -> Self {
        BoundsFilter {
            min_longitude,
            min_latitude,
            max_longitude,
            max_latitude,
        }
    }
}

impl PointFilter for BoundsFilter {
    fn apply(&self, dataset: &Dataset) -> XdrResult<Vec<bool>> {
        let bounds = Bounds::new(self.min_longitude, self.min_latitude, self.max_longitude, self.max_latitude)?;
        Ok(dataset
            .longitudes()
            .par_iter()
            .zip(dataset.latitudes().par_iter())
            .map(|(longitude, latitude)| bounds.contains(*longitude, *latitude))
            .collect())
    }

    fn describe(&self) -> String {
        format!(
            "bounds [{}, {}] x [{}, {}]",
            self.min_longitude, self.max_longitude, self.min_latitude, self.max_latitude
        )
    }
}

/// Keeps points whose timestamp lies in `[first, last]` (packed `YYYYDDDHHMM`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRangeFilter {
    pub first: i64,
    pub last: i64,
}

impl TimeRangeFilter {
    pub fn new(first: i64, last: i64) -> Self {
        TimeRangeFilter { first, last }
    }
}

impl PointFilter for TimeRangeFilter {
    fn apply(&self, dataset: &Dataset) -> XdrResult<Vec<bool>> {
        let first = Timestamp::from_packed(self.first)?;
        let last = Timestamp::from_packed(self.last)?;
        dataset
            .timestamps()
            .par_iter()
            .map(|value| {
                let timestamp = Timestamp::from_value(*value)?;
                Ok(timestamp >= first && timestamp <= last)
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("time {} .. {}", self.first, self.last)
    }
}

/// Keeps points whose `variable` lies in `[min_value, max_value]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRangeFilter {
    pub variable: String,
    pub min_value: f64,
    pub max_value: f64,
}

impl ValueRangeFilter {
    pub fn new(variable: &str, min_value: f64, max_value: f64) -> Self {
        ValueRangeFilter {
            variable: variable.to_string(),
            min_value,
            max_value,
        }
    }
}

fn variable_values<'a>(dataset: &'a Dataset, name: &str) -> XdrResult<&'a [f64]> {
    let index = dataset
        .variable_index(name)
        .ok_or_else(|| XdrError::configuration(format!("Variable '{}' not found", name)))?;
    Ok(dataset.variable(index))
}

impl PointFilter for ValueRangeFilter {
    fn apply(&self, dataset: &Dataset) -> XdrResult<Vec<bool>> {
        let values = variable_values(dataset, &self.variable)?;
        Ok(values
            .par_iter()
            .map(|v| *v >= self.min_value && *v <= self.max_value)
            .collect())
    }

    fn describe(&self) -> String {
        format!("{} in [{}, {}]", self.variable, self.min_value, self.max_value)
    }
}

/// Keeps points whose `variable` equals one of `values`, e.g. a set of site ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub variable: String,
    pub values: Vec<f64>,
}

impl ListFilter {
    pub fn new(variable: &str, values: Vec<f64>) -> Self {
        ListFilter {
            variable: variable.to_string(),
            values,
        }
    }
}

impl PointFilter for ListFilter {
    fn apply(&self, dataset: &Dataset) -> XdrResult<Vec<bool>> {
        let values = variable_values(dataset, &self.variable)?;
        Ok(values.par_iter().map(|v| self.values.contains(v)).collect())
    }

    fn describe(&self) -> String {
        format!("{} in {:?}", self.variable, self.values)
    }
}

/// Keeps the points every filter accepts, then re-validates the dataset.
/// Returns the number of points kept.
pub fn apply_filters(dataset: &mut Dataset, filters: &[Box<dyn PointFilter>]) -> XdrResult<usize> {
    if filters.is_empty() {
        return Ok(dataset.total_points());
    }
    if !dataset.has_observations() {
        return Err(XdrError::configuration("point filters need observation points"));
    }
    let before = dataset.total_points();
    let mut keep = vec![true; before];
    for filter in filters {
        let mask = filter.apply(dataset)?;
        keep.par_iter_mut().zip(mask.par_iter()).for_each(|(k, m)| *k &= *m);
        debug!("filter {}: {} points pass", filter.describe(), mask.iter().filter(|m| **m).count());
    }
    dataset.retain_points(&keep)?;
    let after = dataset.total_points();
    info!("Filters kept {} of {} points", after, before);
    if after == 0 {
        return Err(XdrError::empty("no points left after filtering"));
    }
    crate::validate::check(dataset)?;
    Ok(after)
}
