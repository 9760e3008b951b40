//! # Dataset Model
//!
//! In-memory form of one XDR collection: the observation points read from an
//! input file, grouped into ragged timesteps, and the optional regridded output
//! produced from them.
//!
//! Observation values are stored flat as `[variable][point]`. Regridded output
//! is a struct of parallel arrays ([`GridPoints`]) in which index `i` denotes
//! the same physical sample in every array.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use std::ops::Range;

use crate::error::{XdrError, XdrResult};
use crate::timestamp::TimeRange;

/// Wire value that stands for a missing sample.
pub const MISSING_VALUE: f64 = -9999.0;

/// A payload value that may be absent.
///
/// The `-9999.0` sentinel exists only on the wire; inside the pipeline a
/// missing sample is always `Sample::Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Sample {
    Present(f64),
    #[default]
    Missing,
}

impl Sample {
    pub fn from_wire(value: f64) -> Self {
        if value == MISSING_VALUE {
            Sample::Missing
        } else {
            Sample::Present(value)
        }
    }

    pub fn to_wire(self) -> f64 {
        match self {
            Sample::Present(value) => value,
            Sample::Missing => MISSING_VALUE,
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Sample::Present(value) => Some(value),
            Sample::Missing => None,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Sample::Missing)
    }
}

/// The three families of irregular observation collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Satellite swath: one timestep per scan.
    Swath,
    /// Aircraft or balloon track with elevations.
    Profile,
    /// Fixed monitoring stations.
    Site,
}

impl DataKind {
    pub fn name(self) -> &'static str {
        match self {
            DataKind::Swath => "Swath",
            DataKind::Profile => "Profile",
            DataKind::Site => "Site",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Swath" => Some(DataKind::Swath),
            "Profile" => Some(DataKind::Profile),
            "Site" => Some(DataKind::Site),
            _ => None,
        }
    }

    /// Leading variables every file of this kind carries, in order.
    pub fn implicit_variables(self) -> &'static [&'static str] {
        match self {
            DataKind::Swath => &["Timestamp", "Longitude", "Latitude"],
            DataKind::Profile => &["Timestamp", "Longitude", "Latitude", "Elevation"],
            DataKind::Site => &["Timestamp", "Id", "Longitude", "Latitude"],
        }
    }

    /// Swath and profile headers carry a domain rectangle; site bounds are derived.
    pub fn has_domain(self) -> bool {
        !matches!(self, DataKind::Site)
    }

    pub fn has_elevation(self) -> bool {
        matches!(self, DataKind::Profile)
    }

    /// Swath points arrive already grouped by scan.
    pub fn batched_by_scan(self) -> bool {
        matches!(self, DataKind::Swath)
    }

    pub fn longitude_index(self) -> usize {
        self.implicit_variables().iter().position(|v| *v == "Longitude").unwrap_or(1)
    }

    pub fn latitude_index(self) -> usize {
        self.longitude_index() + 1
    }

    pub fn elevation_index(self) -> Option<usize> {
        self.implicit_variables().iter().position(|v| *v == "Elevation")
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Longitude/latitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

impl Bounds {
    pub fn new(min_longitude: f64, min_latitude: f64, max_longitude: f64, max_latitude: f64) -> XdrResult<Self> {
        let bounds = Self {
            min_longitude,
            min_latitude,
            max_longitude,
            max_latitude,
        };
        if !bounds.is_valid() {
            return Err(XdrError::range(format!("invalid bounds {}", bounds)));
        }
        Ok(bounds)
    }

    pub fn is_valid(&self) -> bool {
        is_longitude(self.min_longitude)
            && is_longitude(self.max_longitude)
            && is_latitude(self.min_latitude)
            && is_latitude(self.max_latitude)
            && self.min_longitude <= self.max_longitude
            && self.min_latitude <= self.max_latitude
    }

    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.min_longitude
            && longitude <= self.max_longitude
            && latitude >= self.min_latitude
            && latitude <= self.max_latitude
    }

    /// Smallest rectangle enclosing the given coordinates.
    pub fn enclosing(longitudes: &[f64], latitudes: &[f64]) -> XdrResult<Self> {
        if longitudes.is_empty() || longitudes.len() != latitudes.len() {
            return Err(XdrError::range("cannot compute bounds of an empty coordinate set"));
        }
        let fold = |values: &[f64]| {
            values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
        };
        let (min_longitude, max_longitude) = fold(longitudes);
        let (min_latitude, max_latitude) = fold(latitudes);
        Self::new(min_longitude, min_latitude, max_longitude, max_latitude)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.min_longitude, self.max_longitude, self.min_latitude, self.max_latitude
        )
    }
}

pub fn is_longitude(value: f64) -> bool {
    (-180.0..=180.0).contains(&value)
}

pub fn is_latitude(value: f64) -> bool {
    (-90.0..=90.0).contains(&value)
}

/// Number of columns, rows and layers of the target grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridExtent {
    pub columns: usize,
    pub rows: usize,
    pub layers: usize,
}

/// One regridded sample, gathered from the parallel arrays of [`GridPoints`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: Option<f64>,
    pub column: i64,
    pub row: i64,
    pub layer: Option<i64>,
    pub value: Sample,
    pub value2: Option<Sample>,
}

/// Parallel arrays describing regridded samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridPoints {
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub elevations: Option<Vec<f64>>,
    pub columns: Vec<i64>,
    pub rows: Vec<i64>,
    pub layers: Option<Vec<i64>>,
    pub values: Vec<Sample>,
    pub values2: Option<Vec<Sample>>,
}

impl GridPoints {
    /// Empty arrays with the given optional components present.
    pub fn new(has_elevation: bool, is_vector: bool) -> Self {
        Self {
            elevations: has_elevation.then(Vec::new),
            layers: has_elevation.then(Vec::new),
            values2: is_vector.then(Vec::new),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has_elevation(&self) -> bool {
        self.elevations.is_some()
    }

    pub fn is_vector(&self) -> bool {
        self.values2.is_some()
    }

    /// True when every present array has the same length.
    pub fn lengths_agree(&self) -> bool {
        let n = self.len();
        self.longitudes.len() == n
            && self.latitudes.len() == n
            && self.columns.len() == n
            && self.rows.len() == n
            && self.elevations.as_ref().is_none_or(|v| v.len() == n)
            && self.layers.as_ref().is_none_or(|v| v.len() == n)
            && self.values2.as_ref().is_none_or(|v| v.len() == n)
    }

    pub fn push(&mut self, point: GridPoint) {
        self.longitudes.push(point.longitude);
        self.latitudes.push(point.latitude);
        self.columns.push(point.column);
        self.rows.push(point.row);
        self.values.push(point.value);
        if let Some(elevations) = self.elevations.as_mut() {
            elevations.push(point.elevation.unwrap_or(0.0));
        }
        if let Some(layers) = self.layers.as_mut() {
            layers.push(point.layer.unwrap_or(1));
        }
        if let Some(values2) = self.values2.as_mut() {
            values2.push(point.value2.unwrap_or(Sample::Missing));
        }
    }

    pub fn get(&self, index: usize) -> GridPoint {
        GridPoint {
            longitude: self.longitudes[index],
            latitude: self.latitudes[index],
            elevation: self.elevations.as_ref().map(|v| v[index]),
            column: self.columns[index],
            row: self.rows[index],
            layer: self.layers.as_ref().map(|v| v[index]),
            value: self.values[index],
            value2: self.values2.as_ref().map(|v| v[index]),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = GridPoint> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Grows every array to `length`, filling new slots with placeholders.
    pub fn resize(&mut self, length: usize) {
        self.longitudes.resize(length, 0.0);
        self.latitudes.resize(length, 0.0);
        self.columns.resize(length, 0);
        self.rows.resize(length, 0);
        self.values.resize(length, Sample::Missing);
        if let Some(v) = self.elevations.as_mut() {
            v.resize(length, 0.0);
        }
        if let Some(v) = self.layers.as_mut() {
            v.resize(length, 0);
        }
        if let Some(v) = self.values2.as_mut() {
            v.resize(length, Sample::Missing);
        }
    }

    /// Copies all of `source` into slots starting at `offset`.
    pub fn write_at(&mut self, offset: usize, source: &GridPoints) -> XdrResult<()> {
        let end = offset + source.len();
        if end > self.len() || source.has_elevation() != self.has_elevation() || source.is_vector() != self.is_vector() {
            return Err(XdrError::format(format!(
                "cannot write {} regridded points at offset {} into {} slots",
                source.len(),
                offset,
                self.len()
            )));
        }
        self.longitudes[offset..end].copy_from_slice(&source.longitudes);
        self.latitudes[offset..end].copy_from_slice(&source.latitudes);
        self.columns[offset..end].copy_from_slice(&source.columns);
        self.rows[offset..end].copy_from_slice(&source.rows);
        self.values[offset..end].copy_from_slice(&source.values);
        if let (Some(to), Some(from)) = (self.elevations.as_mut(), source.elevations.as_ref()) {
            to[offset..end].copy_from_slice(from);
        }
        if let (Some(to), Some(from)) = (self.layers.as_mut(), source.layers.as_ref()) {
            to[offset..end].copy_from_slice(from);
        }
        if let (Some(to), Some(from)) = (self.values2.as_mut(), source.values2.as_ref()) {
            to[offset..end].copy_from_slice(from);
        }
        Ok(())
    }
}

/// Regridded counterpart of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct RegriddedOutput {
    /// Variable name(s): one for scalars, two for vector components.
    pub variable_names: Vec<String>,
    pub variable_units: Vec<String>,
    pub time_range: TimeRange,
    /// Width of each output timestep: 1 (hourly), 24 (daily) or the whole period.
    pub hours_per_timestep: usize,
    pub points_per_timestep: Vec<usize>,
    pub points: GridPoints,
    pub extent: GridExtent,
    /// Grid description lines carried between the units and the binary section.
    pub grid_header: Option<Vec<String>>,
}

impl RegriddedOutput {
    pub fn timesteps(&self) -> usize {
        self.points_per_timestep.len()
    }

    pub fn total_points(&self) -> usize {
        self.points.len()
    }

    pub fn is_vector(&self) -> bool {
        self.points.is_vector()
    }

    /// Index range of the samples belonging to `timestep`.
    pub fn timestep_range(&self, timestep: usize) -> Range<usize> {
        let start: usize = self.points_per_timestep[..timestep].iter().sum();
        start..start + self.points_per_timestep[timestep]
    }
}

/// One input collection and, once regridded, its regridded output.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub kind: DataKind,
    pub note: String,
    pub time_range: TimeRange,
    pub bounds: Bounds,
    pub variable_names: Vec<String>,
    pub variable_units: Vec<String>,
    /// Observation points per timestep; empty for a dataset read from a regridded file.
    pub points_per_timestep: Vec<usize>,
    /// Observation values addressed as `[variable][point]`.
    pub raw_data: Vec<f64>,
    pub regridded: Option<RegriddedOutput>,
}

impl Dataset {
    /// Reads and validates a dataset from an XDR stream.
    ///
    /// ```rust,no_run
    /// use std::fs::File;
    /// use std::io::BufReader;
    /// use xdrconvert::dataset::Dataset;
    ///
    /// let file = File::open("modis.xdr")?;
    /// let dataset = Dataset::load(BufReader::new(file))?;
    /// println!("{} points in {} scans", dataset.total_points(), dataset.timesteps());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<R: BufRead>(reader: R) -> XdrResult<Self> {
        let dataset = crate::xdr::read_dataset(reader)?;
        crate::validate::check(&dataset)?;
        Ok(dataset)
    }

    pub fn has_observations(&self) -> bool {
        !self.points_per_timestep.is_empty()
    }

    pub fn is_regridded(&self) -> bool {
        self.regridded.is_some()
    }

    pub fn variable_count(&self) -> usize {
        self.variable_names.len()
    }

    pub fn timesteps(&self) -> usize {
        self.points_per_timestep.len()
    }

    pub fn total_points(&self) -> usize {
        self.points_per_timestep.iter().sum()
    }

    /// Values of one variable across all points.
    pub fn variable(&self, index: usize) -> &[f64] {
        let n = self.total_points();
        &self.raw_data[index * n..(index + 1) * n]
    }

    /// Case-insensitive variable lookup.
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variable_names.iter().position(|v| v.eq_ignore_ascii_case(name))
    }

    pub fn timestamps(&self) -> &[f64] {
        self.variable(0)
    }

    pub fn longitudes(&self) -> &[f64] {
        self.variable(self.kind.longitude_index())
    }

    pub fn latitudes(&self) -> &[f64] {
        self.variable(self.kind.latitude_index())
    }

    pub fn elevations(&self) -> Option<&[f64]> {
        self.kind.elevation_index().map(|i| self.variable(i))
    }

    /// Indices of the variables after the implicit leading ones.
    pub fn user_variables(&self) -> Range<usize> {
        self.kind.implicit_variables().len()..self.variable_count()
    }

    /// Point index range of one input timestep.
    pub fn timestep_range(&self, timestep: usize) -> Range<usize> {
        let start: usize = self.points_per_timestep[..timestep].iter().sum();
        start..start + self.points_per_timestep[timestep]
    }

    /// Keeps only the points for which `keep[point]` is true, in order,
    /// recomputing per-timestep counts. Timesteps may become empty.
    pub fn retain_points(&mut self, keep: &[bool]) -> XdrResult<()> {
        let total = self.total_points();
        if keep.len() != total {
            return Err(XdrError::format(format!(
                "point mask has {} entries for {} points",
                keep.len(),
                total
            )));
        }
        let kept = keep.iter().filter(|k| **k).count();
        let mut data = Vec::with_capacity(kept * self.variable_count());
        for variable in 0..self.variable_count() {
            let values = self.variable(variable);
            data.extend(values.iter().zip(keep).filter(|(_, k)| **k).map(|(v, _)| *v));
        }
        let counts = (0..self.timesteps())
            .map(|t| keep[self.timestep_range(t)].iter().filter(|k| **k).count())
            .collect();
        self.raw_data = data;
        self.points_per_timestep = counts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_wire_conversion() {
        assert_eq!(Sample::from_wire(-9999.0), Sample::Missing);
        assert_eq!(Sample::from_wire(1.5), Sample::Present(1.5));
        assert_eq!(Sample::Missing.to_wire(), MISSING_VALUE);
        assert_eq!(Sample::Present(2.0).value(), Some(2.0));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(-130.0, 20.0, -60.0, 50.0).is_ok());
        assert!(Bounds::new(-60.0, 20.0, -130.0, 50.0).is_err());
        assert!(Bounds::new(-190.0, 20.0, -60.0, 50.0).is_err());
        let b = Bounds::enclosing(&[-100.0, -90.0], &[30.0, 35.0]).unwrap();
        assert_eq!(b.min_longitude, -100.0);
        assert_eq!(b.max_latitude, 35.0);
    }

    #[test]
    fn test_kind_layout() {
        assert_eq!(DataKind::Site.longitude_index(), 2);
        assert_eq!(DataKind::Swath.latitude_index(), 2);
        assert_eq!(DataKind::Profile.elevation_index(), Some(3));
        assert_eq!(DataKind::Swath.elevation_index(), None);
    }

    #[test]
    fn test_grid_points_write_at() {
        let mut buffer = GridPoints::new(false, false);
        buffer.resize(4);
        let mut chunk = GridPoints::new(false, false);
        chunk.push(GridPoint {
            longitude: 1.0,
            latitude: 2.0,
            elevation: None,
            column: 3,
            row: 4,
            layer: None,
            value: Sample::Present(5.0),
            value2: None,
        });
        buffer.write_at(2, &chunk).unwrap();
        assert_eq!(buffer.columns, vec![0, 0, 3, 0]);
        assert!(buffer.write_at(4, &chunk).is_err());
        assert!(buffer.lengths_agree());
    }
}
