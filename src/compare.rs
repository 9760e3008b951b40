//! # Model Comparison
//!
//! Aligns regridded observations with a reference model array addressed by
//! `(timestep, layer, row, column)` and replaces each sample with a pointwise
//! function of the observed and reference values.
//!
//! The number of samples never changes here: samples that fall outside the
//! reference sub-window become missing (`-9999.0` on the wire).

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dataset::{Dataset, MISSING_VALUE, RegriddedOutput, Sample};
use crate::error::{XdrError, XdrResult};

/// Model values for a window of the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceArray {
    pub timesteps: usize,
    pub layers: usize,
    pub rows: usize,
    pub columns: usize,
    /// 1-based grid indices of the window's first column, row and layer.
    pub first_column: i64,
    pub first_row: i64,
    pub first_layer: i64,
    /// Values as `[timestep][layer][row][column]`.
    pub data: Vec<f64>,
    /// Second reference component, used by converters.
    pub data2: Option<Vec<f64>>,
}

/// Where a reference window starts on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOrigin {
    pub first_column: i64,
    pub first_row: i64,
    pub first_layer: i64,
}

impl Default for WindowOrigin {
    fn default() -> Self {
        Self {
            first_column: 1,
            first_row: 1,
            first_layer: 1,
        }
    }
}

impl ReferenceArray {
    pub fn new(
        timesteps: usize,
        layers: usize,
        rows: usize,
        columns: usize,
        origin: WindowOrigin,
        data: Vec<f64>,
        data2: Option<Vec<f64>>,
    ) -> XdrResult<Self> {
        let reference = Self {
            timesteps,
            layers,
            rows,
            columns,
            first_column: origin.first_column,
            first_row: origin.first_row,
            first_layer: origin.first_layer,
            data,
            data2,
        };
        reference.check()?;
        Ok(reference)
    }

    fn check(&self) -> XdrResult<()> {
        let size = [self.layers, self.rows, self.columns]
            .iter()
            .try_fold(self.timesteps, |size, &n| size.checked_mul(n))
            .ok_or_else(|| XdrError::format("reference array dimensions overflow"))?;
        if size == 0 {
            return Err(XdrError::configuration("reference array has an empty dimension"));
        }
        if self.first_column < 1 || self.first_row < 1 || self.first_layer < 1 {
            return Err(XdrError::configuration("reference window must start at index 1 or later"));
        }
        if self.data.len() != size || self.data2.as_ref().is_some_and(|d| d.len() != size) {
            return Err(XdrError::format(format!(
                "reference array holds {} values, expected {}",
                self.data.len(),
                size
            )));
        }
        Ok(())
    }

    /// Reads `variable` (and optionally `variable2`) from a NetCDF file laid
    /// out as `(TSTEP, LAY, ROW, COL)` or `(TSTEP, ROW, COL)`.
    pub fn from_netcdf<P: AsRef<Path>>(
        path: P,
        variable: &str,
        variable2: Option<&str>,
        origin: WindowOrigin,
    ) -> XdrResult<Self> {
        let file = netcdf::open(path.as_ref())?;
        let read = |name: &str| -> XdrResult<(Vec<usize>, Vec<f64>)> {
            let var = file.variable(name).ok_or_else(|| {
                XdrError::configuration(format!("variable '{}' not found in {}", name, path.as_ref().display()))
            })?;
            let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
            let values = var.get_values::<f64, _>(..)?;
            Ok((shape, values))
        };
        let (shape, data) = read(variable)?;
        let (timesteps, layers, rows, columns) = match shape.as_slice() {
            [t, l, r, c] => (*t, *l, *r, *c),
            [t, r, c] => (*t, 1, *r, *c),
            _ => {
                return Err(XdrError::format(format!(
                    "reference variable '{}' has shape {:?}, expected (TSTEP, [LAY,] ROW, COL)",
                    variable, shape
                )));
            }
        };
        let data2 = match variable2 {
            Some(name) => {
                let (shape2, data2) = read(name)?;
                if shape2 != shape {
                    return Err(XdrError::format(format!(
                        "reference variables '{}' and '{}' differ in shape",
                        variable, name
                    )));
                }
                Some(data2)
            }
            None => None,
        };
        debug!(
            "loaded reference '{}' with {} timesteps, {} layers, {} rows, {} columns",
            variable, timesteps, layers, rows, columns
        );
        Self::new(timesteps, layers, rows, columns, origin, data, data2)
    }

    /// Flat index of a grid cell, or `None` outside the window.
    pub fn index(&self, timestep: usize, layer: i64, row: i64, column: i64) -> Option<usize> {
        let offset = |index: i64, first: i64, count: usize| {
            usize::try_from(index - first).ok().filter(|i| *i < count)
        };
        let l = offset(layer, self.first_layer, self.layers)?;
        let r = offset(row, self.first_row, self.rows)?;
        let c = offset(column, self.first_column, self.columns)?;
        (timestep < self.timesteps).then(|| ((timestep * self.layers + l) * self.rows + r) * self.columns + c)
    }

    /// Maps an observation timestep onto a reference timestep.
    ///
    /// Equal counts map one to one. A reference with a 24th of the observation
    /// timesteps is daily and takes hour `t` to day `t / 24`.
    pub fn timestep_mapping(&self, observed_timesteps: usize) -> XdrResult<fn(usize) -> usize> {
        let mapping: fn(usize) -> usize = if observed_timesteps == self.timesteps {
            |t| t
        } else if self.timesteps.checked_mul(24) == Some(observed_timesteps) {
            |t| t / 24
        } else {
            return Err(XdrError::configuration(format!(
                "mismatched timesteps: {} observed vs {} in the reference",
                observed_timesteps, self.timesteps
            )));
        };
        Ok(mapping)
    }
}

/// Pointwise function applied to aligned samples.
#[derive(Debug, Clone, Copy)]
pub enum Comparison {
    /// `f(observed, reference)`
    Compare(fn(f64, f64) -> f64),
    /// `f(observed, reference, reference2)`, for references given as a pair
    Convert(fn(f64, f64, f64) -> f64),
}

/// A named comparison function.
#[derive(Debug, Clone)]
pub struct Comparator {
    pub name: String,
    pub function: Comparison,
}

fn difference(observed: f64, reference: f64) -> f64 {
    observed - reference
}

fn ratio(observed: f64, reference: f64) -> f64 {
    observed / reference
}

fn reference(_: f64, reference: f64) -> f64 {
    reference
}

fn speed(_: f64, u: f64, v: f64) -> f64 {
    u.hypot(v)
}

fn speed_difference(observed: f64, u: f64, v: f64) -> f64 {
    observed - u.hypot(v)
}

/// Names accepted by [`Comparator::builtin`].
pub const BUILTIN_COMPARATORS: [&str; 5] = ["difference", "ratio", "reference", "speed", "speed_difference"];

impl Comparator {
    pub fn compare(name: impl Into<String>, function: fn(f64, f64) -> f64) -> Self {
        Self {
            name: name.into(),
            function: Comparison::Compare(function),
        }
    }

    pub fn convert(name: impl Into<String>, function: fn(f64, f64, f64) -> f64) -> Self {
        Self {
            name: name.into(),
            function: Comparison::Convert(function),
        }
    }

    pub fn builtin(name: &str) -> XdrResult<Self> {
        match name {
            "difference" => Ok(Self::compare(name, difference)),
            "ratio" => Ok(Self::compare(name, ratio)),
            "reference" => Ok(Self::compare(name, reference)),
            "speed" => Ok(Self::convert(name, speed)),
            "speed_difference" => Ok(Self::convert(name, speed_difference)),
            _ => Err(XdrError::configuration(format!(
                "unknown comparison '{}', expected one of {:?}",
                name, BUILTIN_COMPARATORS
            ))),
        }
    }

    pub fn needs_second_reference(&self) -> bool {
        matches!(self.function, Comparison::Convert(_))
    }
}

fn present(value: f64) -> Sample {
    if value.is_finite() && value != MISSING_VALUE {
        Sample::Present(value)
    } else {
        Sample::Missing
    }
}

/// Applies `comparator` to every sample of `output` against `reference`.
/// Returns the compared output and the number of samples inside the window.
pub fn compare(
    output: &RegriddedOutput,
    reference: &ReferenceArray,
    comparator: &Comparator,
) -> XdrResult<(RegriddedOutput, usize)> {
    let map_timestep = reference.timestep_mapping(output.timesteps())?;
    if comparator.needs_second_reference() && reference.data2.is_none() {
        return Err(XdrError::configuration(format!(
            "comparison '{}' needs two reference variables",
            comparator.name
        )));
    }
    if matches!(comparator.function, Comparison::Compare(_)) && output.is_vector() && reference.data2.is_none() {
        return Err(XdrError::configuration(
            "vector observations need two reference variables",
        ));
    }

    let points = &output.points;
    let mut values = Vec::with_capacity(points.len());
    let mut values2 = Vec::with_capacity(if output.is_vector() { points.len() } else { 0 });
    let mut inside = 0;
    for timestep in 0..output.timesteps() {
        let reference_timestep = map_timestep(timestep);
        for i in output.timestep_range(timestep) {
            let point = points.get(i);
            let cell = reference.index(reference_timestep, point.layer.unwrap_or(1), point.row, point.column);
            if cell.is_some() {
                inside += 1;
            }
            let r1 = cell.map(|c| present(reference.data[c]));
            let r2 = cell.and_then(|c| reference.data2.as_ref().map(|d| present(d[c])));
            match comparator.function {
                Comparison::Compare(f) => {
                    values.push(apply2(f, point.value, r1));
                    if let Some(observed2) = point.value2 {
                        values2.push(apply2(f, observed2, r2));
                    }
                }
                Comparison::Convert(f) => {
                    let observed = match point.value2 {
                        Some(observed2) => magnitude(point.value, observed2),
                        None => point.value,
                    };
                    values.push(apply3(f, observed, r1, r2));
                }
            }
        }
    }
    if inside == 0 {
        return Err(XdrError::empty("no points in output"));
    }

    let mut compared = output.clone();
    compared.points.values = values;
    compared.points.values2 = match comparator.function {
        Comparison::Compare(_) => compared.points.values2.map(|_| values2),
        Comparison::Convert(_) => None,
    };
    let keep = compared.points.values2.as_ref().map_or(1, |_| 2);
    compared.variable_names.truncate(keep);
    compared.variable_units.truncate(keep);
    for name in compared.variable_names.iter_mut() {
        *name = format!("{}_{}", comparator.name, name);
    }
    Ok((compared, inside))
}

fn apply2(f: fn(f64, f64) -> f64, observed: Sample, reference: Option<Sample>) -> Sample {
    match (observed, reference) {
        (Sample::Present(o), Some(Sample::Present(r))) => present(f(o, r)),
        _ => Sample::Missing,
    }
}

fn apply3(f: fn(f64, f64, f64) -> f64, observed: Sample, r1: Option<Sample>, r2: Option<Sample>) -> Sample {
    match (observed, r1, r2) {
        (Sample::Present(o), Some(Sample::Present(a)), Some(Sample::Present(b))) => present(f(o, a, b)),
        _ => Sample::Missing,
    }
}

fn magnitude(a: Sample, b: Sample) -> Sample {
    match (a, b) {
        (Sample::Present(x), Sample::Present(y)) => Sample::Present(x.hypot(y)),
        _ => Sample::Missing,
    }
}

impl Dataset {
    /// Compares the regridded output against `reference`, in place.
    ///
    /// # Errors
    ///
    /// `Configuration` for mismatched timesteps or a comparator needing a
    /// second reference variable that is absent; `EmptyResult` when no
    /// sample falls inside the reference window.
    pub fn compare_against(&mut self, reference: &ReferenceArray, comparator: &Comparator) -> XdrResult<()> {
        let output = self
            .regridded
            .as_ref()
            .ok_or_else(|| XdrError::configuration("comparison requires regridded output"))?;
        let (compared, inside) = compare(output, reference, comparator)?;
        info!(
            "Compared {} samples with '{}', {} inside the reference window",
            compared.total_points(),
            comparator.name,
            inside
        );
        let original = self.regridded.replace(compared);
        if let Err(error) = crate::validate::check(self) {
            self.regridded = original;
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_window() {
        let origin = WindowOrigin {
            first_column: 3,
            first_row: 2,
            first_layer: 1,
        };
        let reference = ReferenceArray::new(2, 1, 2, 2, origin, (0..8).map(f64::from).collect(), None).unwrap();
        assert_eq!(reference.index(0, 1, 2, 3), Some(0));
        assert_eq!(reference.index(1, 1, 3, 4), Some(7));
        assert_eq!(reference.index(0, 1, 2, 2), None);
        assert_eq!(reference.index(0, 1, 4, 3), None);
        assert_eq!(reference.index(2, 1, 2, 3), None);
    }

    #[test]
    fn test_reference_size_checked() {
        assert!(ReferenceArray::new(1, 1, 2, 2, WindowOrigin::default(), vec![0.0; 3], None).is_err());
        assert!(ReferenceArray::new(1, 1, 2, 2, WindowOrigin::default(), vec![0.0; 4], Some(vec![0.0; 5])).is_err());
        let error = ReferenceArray::new(usize::MAX, 2, 2, 2, WindowOrigin::default(), vec![0.0; 4], None).unwrap_err();
        assert!(matches!(error, XdrError::Format(_)));
    }

    #[test]
    fn test_timestep_mapping() {
        let reference = ReferenceArray::new(1, 1, 1, 1, WindowOrigin::default(), vec![0.0], None).unwrap();
        assert_eq!(reference.timestep_mapping(1).unwrap()(0), 0);
        assert_eq!(reference.timestep_mapping(24).unwrap()(23), 0);
        assert!(reference.timestep_mapping(2).is_err());
    }

    #[test]
    fn test_builtins() {
        assert!(Comparator::builtin("speed").unwrap().needs_second_reference());
        assert!(!Comparator::builtin("ratio").unwrap().needs_second_reference());
        assert!(Comparator::builtin("sum").is_err());
        assert_eq!(speed(0.0, 3.0, 4.0), 5.0);
        assert_eq!(apply2(ratio, Sample::Present(1.0), Some(Sample::Present(0.0))), Sample::Missing);
        assert_eq!(apply2(difference, Sample::Missing, Some(Sample::Present(1.0))), Sample::Missing);
    }
}
