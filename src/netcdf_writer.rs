//! # NetCDF Writers
//!
//! COARDS and IOAPI encodings of a dataset, written through the [`NetcdfSink`]
//! trait. [`FileSink`] is the real sink on top of the `netcdf` crate; tests use
//! an in-memory recorder.
//!
//! - **COARDS**: point lists, observations or regridded samples, along a
//!   single `points` dimension
//! - **IOAPI**: regridded samples scattered into full `(TSTEP, LAY, ROW, COL)`
//!   grids with a `TFLAG` variable and the IOAPI global attributes

use chrono::Utc;
use log::debug;
use std::path::Path;

use crate::dataset::{Dataset, MISSING_VALUE, RegriddedOutput};
use crate::error::{XdrError, XdrResult};
use crate::grid::GridDescription;
use crate::timestamp::Timestamp;

/// Estimated sizes above this need the 64-bit offset file variant.
pub const LARGE_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Value types a sink can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    Int,
    Float,
    Double,
}

/// Attribute values written by the encoders.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Text(String),
    Int(i32),
    Ints(Vec<i32>),
    Float(f32),
    Floats(Vec<f32>),
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::Text(value.to_string())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::Text(value)
    }
}

impl From<i32> for Attribute {
    fn from(value: i32) -> Self {
        Attribute::Int(value)
    }
}

impl From<f32> for Attribute {
    fn from(value: f32) -> Self {
        Attribute::Float(value)
    }
}

/// Output side of a NetCDF file.
pub trait NetcdfSink {
    fn create_dimension(&mut self, name: &str, length: usize) -> XdrResult<()>;

    fn create_variable(&mut self, name: &str, kind: VariableType, dimensions: &[&str]) -> XdrResult<()>;

    /// Sets an attribute on `variable`, or a global attribute when `None`.
    fn put_attribute(&mut self, variable: Option<&str>, name: &str, value: Attribute) -> XdrResult<()>;

    fn write_ints(&mut self, variable: &str, values: &[i32]) -> XdrResult<()>;

    fn write_floats(&mut self, variable: &str, values: &[f32]) -> XdrResult<()>;

    fn write_doubles(&mut self, variable: &str, values: &[f64]) -> XdrResult<()>;

    /// Flushes and releases the file.
    fn close(&mut self) -> XdrResult<()>;
}

/// [`NetcdfSink`] backed by a file on disk.
pub struct FileSink {
    file: Option<netcdf::FileMut>,
}

impl FileSink {
    /// Creates (or truncates) `path`, in the 64-bit offset variant when
    /// `estimated_bytes` exceeds [`LARGE_FILE_BYTES`].
    pub fn create<P: AsRef<Path>>(path: P, estimated_bytes: u64) -> XdrResult<Self> {
        let options = if estimated_bytes > LARGE_FILE_BYTES {
            netcdf::Options::_64BIT_OFFSET
        } else {
            netcdf::Options::CLASSIC
        };
        debug!(
            "creating NetCDF file {} ({} estimated bytes, {:?})",
            path.as_ref().display(),
            estimated_bytes,
            options.bits()
        );
        let file = netcdf::create_with(path.as_ref(), options)?;
        Ok(Self { file: Some(file) })
    }

    fn file(&mut self) -> XdrResult<&mut netcdf::FileMut> {
        self.file
            .as_mut()
            .ok_or_else(|| XdrError::configuration("NetCDF file is already closed"))
    }

    fn variable<'f>(file: &'f mut netcdf::FileMut, name: &str) -> XdrResult<netcdf::VariableMut<'f>> {
        file.variable_mut(name)
            .ok_or_else(|| XdrError::format(format!("NetCDF variable '{}' was not created", name)))
    }
}

fn to_netcdf_attribute(value: Attribute) -> netcdf::AttributeValue {
    match value {
        Attribute::Text(text) => text.into(),
        Attribute::Int(v) => v.into(),
        Attribute::Ints(v) => v.into(),
        Attribute::Float(v) => v.into(),
        Attribute::Floats(v) => v.into(),
    }
}

impl NetcdfSink for FileSink {
    fn create_dimension(&mut self, name: &str, length: usize) -> XdrResult<()> {
        self.file()?.add_dimension(name, length)?;
        Ok(())
    }

    fn create_variable(&mut self, name: &str, kind: VariableType, dimensions: &[&str]) -> XdrResult<()> {
        let file = self.file()?;
        match kind {
            VariableType::Int => {
                file.add_variable::<i32>(name, dimensions)?;
            }
            VariableType::Float => {
                file.add_variable::<f32>(name, dimensions)?;
            }
            VariableType::Double => {
                file.add_variable::<f64>(name, dimensions)?;
            }
        }
        Ok(())
    }

    fn put_attribute(&mut self, variable: Option<&str>, name: &str, value: Attribute) -> XdrResult<()> {
        let file = self.file()?;
        let value = to_netcdf_attribute(value);
        match variable {
            Some(variable) => {
                Self::variable(file, variable)?.put_attribute(name, value)?;
            }
            None => {
                file.add_attribute(name, value)?;
            }
        }
        Ok(())
    }

    fn write_ints(&mut self, variable: &str, values: &[i32]) -> XdrResult<()> {
        Self::variable(self.file()?, variable)?.put_values(values, ..)?;
        Ok(())
    }

    fn write_floats(&mut self, variable: &str, values: &[f32]) -> XdrResult<()> {
        Self::variable(self.file()?, variable)?.put_values(values, ..)?;
        Ok(())
    }

    fn write_doubles(&mut self, variable: &str, values: &[f64]) -> XdrResult<()> {
        Self::variable(self.file()?, variable)?.put_values(values, ..)?;
        Ok(())
    }

    fn close(&mut self) -> XdrResult<()> {
        // dropping the handle closes the file
        drop(self.file.take());
        Ok(())
    }
}

/// Rough on-disk size of the encoding, used to pick the file variant.
pub fn estimated_bytes(dataset: &Dataset, ioapi: bool) -> u64 {
    match &dataset.regridded {
        Some(output) if ioapi => {
            let extent = output.extent;
            let cells = (extent.columns * extent.rows * extent.layers) as u64;
            let variables = output.variable_names.len() as u64;
            output.timesteps() as u64 * (variables * cells * 4 + variables * 8)
        }
        Some(output) => output.total_points() as u64 * (8 * 4 + 4 * output.variable_names.len() as u64),
        None => dataset.total_points() as u64 * (12 + 4 * dataset.variable_count() as u64),
    }
}

fn to_floats(values: &[f64]) -> Vec<f32> {
    values.iter().map(|v| *v as f32).collect()
}

fn to_ints(values: &[i64]) -> XdrResult<Vec<i32>> {
    values
        .iter()
        .map(|v| i32::try_from(*v).map_err(|_| XdrError::range(format!("integer {} does not fit in 32 bits", v))))
        .collect()
}

fn described_variable(
    sink: &mut dyn NetcdfSink,
    name: &str,
    kind: VariableType,
    dimensions: &[&str],
    units: &str,
    long_name: &str,
) -> XdrResult<()> {
    sink.create_variable(name, kind, dimensions)?;
    sink.put_attribute(Some(name), "units", units.into())?;
    sink.put_attribute(Some(name), "long_name", long_name.into())?;
    if kind == VariableType::Float {
        sink.put_attribute(Some(name), "missing_value", (MISSING_VALUE as f32).into())?;
    }
    Ok(())
}

fn common_attributes(sink: &mut dyn NetcdfSink, dataset: &Dataset) -> XdrResult<()> {
    sink.put_attribute(None, "Conventions", "COARDS".into())?;
    sink.put_attribute(None, "description", dataset.note.clone().into())?;
    sink.put_attribute(
        None,
        "history",
        format!("{}: created by xdrconvert", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")).into(),
    )?;
    let b = &dataset.bounds;
    sink.put_attribute(None, "west_bound", (b.min_longitude as f32).into())?;
    sink.put_attribute(None, "east_bound", (b.max_longitude as f32).into())?;
    sink.put_attribute(None, "south_bound", (b.min_latitude as f32).into())?;
    sink.put_attribute(None, "north_bound", (b.max_latitude as f32).into())?;
    Ok(())
}

/// Hours since the first (floored) hour of the dataset, per timestamp.
fn hours_since(first: Timestamp, timestamps: &[f64]) -> XdrResult<(Vec<f64>, Vec<i32>, Vec<i32>)> {
    let origin = first.floor_hour().datetime();
    let mut hours = Vec::with_capacity(timestamps.len());
    let mut dates = Vec::with_capacity(timestamps.len());
    let mut times = Vec::with_capacity(timestamps.len());
    for value in timestamps {
        let timestamp = Timestamp::from_value(*value)?;
        hours.push((timestamp.datetime() - origin).num_minutes() as f64 / 60.0);
        dates.push(timestamp.yyyyddd());
        times.push(timestamp.hhmmss());
    }
    Ok((hours, dates, times))
}

fn time_units(first: Timestamp) -> String {
    format!("hours since {}", first.floor_hour().datetime().format("%Y-%m-%d %H:%M:%S"))
}

/// COARDS encoding of the observation points.
pub fn write_coards_observations(dataset: &Dataset, sink: &mut dyn NetcdfSink) -> XdrResult<()> {
    if !dataset.has_observations() {
        return Err(XdrError::configuration("dataset has no observation points to write"));
    }
    let points = ["points"];
    sink.create_dimension("points", dataset.total_points())?;
    described_variable(sink, "time", VariableType::Double, &points, &time_units(dataset.time_range.first), "time")?;
    described_variable(sink, "yyyyddd", VariableType::Int, &points, "date", "date of observation")?;
    described_variable(sink, "hhmmss", VariableType::Int, &points, "time", "time of observation")?;
    let implicit = dataset.kind.implicit_variables().len();
    for index in 1..dataset.variable_count() {
        let name = &dataset.variable_names[index];
        let kind = if name.eq_ignore_ascii_case("Id") {
            VariableType::Int
        } else {
            VariableType::Float
        };
        let long_name = if index < implicit { name.to_lowercase() } else { name.clone() };
        described_variable(sink, &long_name, kind, &points, &dataset.variable_units[index], name)?;
    }
    common_attributes(sink, dataset)?;

    let (hours, dates, times) = hours_since(dataset.time_range.first, dataset.timestamps())?;
    sink.write_doubles("time", &hours)?;
    sink.write_ints("yyyyddd", &dates)?;
    sink.write_ints("hhmmss", &times)?;
    for index in 1..dataset.variable_count() {
        let name = &dataset.variable_names[index];
        let variable = if index < implicit { name.to_lowercase() } else { name.clone() };
        let values = dataset.variable(index);
        if name.eq_ignore_ascii_case("Id") {
            let ids: Vec<i64> = values.iter().map(|v| *v as i64).collect();
            sink.write_ints(&variable, &to_ints(&ids)?)?;
        } else {
            sink.write_floats(&variable, &to_floats(values))?;
        }
    }
    sink.close()
}

fn regridded(dataset: &Dataset) -> XdrResult<&RegriddedOutput> {
    dataset
        .regridded
        .as_ref()
        .ok_or_else(|| XdrError::configuration("dataset has not been regridded"))
}

/// Start of each output timestep.
fn timestep_starts(output: &RegriddedOutput) -> XdrResult<Vec<Timestamp>> {
    let first = output.time_range.first.floor_hour();
    (0..output.timesteps())
        .map(|t| first.increment_hours((t * output.hours_per_timestep) as i64))
        .collect()
}

/// COARDS encoding of the regridded samples.
pub fn write_coards_regridded(dataset: &Dataset, sink: &mut dyn NetcdfSink) -> XdrResult<()> {
    let output = regridded(dataset)?;
    let points = &output.points;
    let dims = ["points"];
    sink.create_dimension("points", points.len())?;
    described_variable(sink, "time", VariableType::Double, &dims, &time_units(output.time_range.first), "time")?;
    described_variable(sink, "longitude", VariableType::Float, &dims, "degrees_east", "longitude")?;
    described_variable(sink, "latitude", VariableType::Float, &dims, "degrees_north", "latitude")?;
    if points.has_elevation() {
        described_variable(sink, "elevation", VariableType::Float, &dims, "m", "elevation")?;
    }
    described_variable(sink, "column", VariableType::Int, &dims, "-", "grid column")?;
    described_variable(sink, "row", VariableType::Int, &dims, "-", "grid row")?;
    if points.layers.is_some() {
        described_variable(sink, "layer", VariableType::Int, &dims, "-", "grid layer")?;
    }
    for (name, units) in output.variable_names.iter().zip(&output.variable_units) {
        described_variable(sink, name, VariableType::Float, &dims, units, name)?;
    }
    common_attributes(sink, dataset)?;
    sink.put_attribute(None, "hours_per_timestep", (output.hours_per_timestep as i32).into())?;

    let starts = timestep_starts(output)?;
    let origin = output.time_range.first.floor_hour();
    let mut hours = Vec::with_capacity(points.len());
    for (t, start) in starts.iter().enumerate() {
        let hour = origin.hours_until(start) as f64;
        hours.extend(std::iter::repeat_n(hour, output.points_per_timestep[t]));
    }
    sink.write_doubles("time", &hours)?;
    sink.write_floats("longitude", &to_floats(&points.longitudes))?;
    sink.write_floats("latitude", &to_floats(&points.latitudes))?;
    if let Some(elevations) = &points.elevations {
        sink.write_floats("elevation", &to_floats(elevations))?;
    }
    sink.write_ints("column", &to_ints(&points.columns)?)?;
    sink.write_ints("row", &to_ints(&points.rows)?)?;
    if let Some(layers) = &points.layers {
        sink.write_ints("layer", &to_ints(layers)?)?;
    }
    let components = std::iter::once(&points.values).chain(points.values2.as_ref());
    for (name, samples) in output.variable_names.iter().zip(components) {
        let values: Vec<f32> = samples.iter().map(|s| s.to_wire() as f32).collect();
        sink.write_floats(name, &values)?;
    }
    sink.close()
}

/// Pads `text` to `width` characters, as IOAPI expects of names and units.
fn padded(text: &str, width: usize) -> String {
    format!("{:<width$.width$}", text, width = width)
}

/// IOAPI encoding of the regridded samples as full grids.
pub fn write_ioapi(dataset: &Dataset, sink: &mut dyn NetcdfSink) -> XdrResult<()> {
    let output = regridded(dataset)?;
    let points = &output.points;
    let extent = output.extent;
    let variables = output.variable_names.len();
    let (columns, rows, layers) = (extent.columns, extent.rows, extent.layers);

    sink.create_dimension("TSTEP", output.timesteps())?;
    sink.create_dimension("DATE-TIME", 2)?;
    sink.create_dimension("LAY", layers)?;
    sink.create_dimension("VAR", variables)?;
    sink.create_dimension("ROW", rows)?;
    sink.create_dimension("COL", columns)?;

    sink.create_variable("TFLAG", VariableType::Int, &["TSTEP", "VAR", "DATE-TIME"])?;
    sink.put_attribute(Some("TFLAG"), "units", padded("<YYYYDDD,HHMMSS>", 16).into())?;
    sink.put_attribute(Some("TFLAG"), "long_name", padded("TFLAG", 16).into())?;
    sink.put_attribute(
        Some("TFLAG"),
        "var_desc",
        padded("Timestep-valid flags:  (1) YYYYDDD or (2) HHMMSS", 80).into(),
    )?;
    for (name, units) in output.variable_names.iter().zip(&output.variable_units) {
        sink.create_variable(name, VariableType::Float, &["TSTEP", "LAY", "ROW", "COL"])?;
        sink.put_attribute(Some(name), "long_name", padded(name, 16).into())?;
        sink.put_attribute(Some(name), "units", padded(units, 16).into())?;
        sink.put_attribute(Some(name), "var_desc", padded(name, 80).into())?;
        sink.put_attribute(Some(name), "missing_value", (MISSING_VALUE as f32).into())?;
    }

    let starts = timestep_starts(output)?;
    let first = starts.first().copied().unwrap_or(output.time_range.first);
    let now = Utc::now().naive_utc();
    let created = Timestamp::from_datetime(now)?;
    let geometry = output.grid_header.as_deref().and_then(GridDescription::from_header_lines);
    let (x_origin, y_origin, x_cell, y_cell) = geometry
        .as_ref()
        .map_or((0.0, 0.0, 1.0, 1.0), |g| (g.x_origin, g.y_origin, g.x_cell, g.y_cell));
    let var_list: String = output.variable_names.iter().map(|n| padded(n, 16)).collect();
    let globals: Vec<(&str, Attribute)> = vec![
        ("IOAPI_VERSION", padded("xdrconvert", 80).into()),
        ("EXEC_ID", padded("xdrconvert", 80).into()),
        ("FTYPE", 1.into()),
        ("CDATE", created.yyyyddd().into()),
        ("CTIME", created.hhmmss().into()),
        ("WDATE", created.yyyyddd().into()),
        ("WTIME", created.hhmmss().into()),
        ("SDATE", first.yyyyddd().into()),
        ("STIME", first.hhmmss().into()),
        ("TSTEP", (output.hours_per_timestep as i32 * 10_000).into()),
        ("NTHIK", 1.into()),
        ("NCOLS", (columns as i32).into()),
        ("NROWS", (rows as i32).into()),
        ("NLAYS", (layers as i32).into()),
        ("NVARS", (variables as i32).into()),
        ("GDTYP", 1.into()),
        ("P_ALP", Attribute::Float(0.0)),
        ("P_BET", Attribute::Float(0.0)),
        ("P_GAM", Attribute::Float(0.0)),
        ("XCENT", Attribute::Float(0.0)),
        ("YCENT", Attribute::Float(0.0)),
        ("XORIG", (x_origin as f32).into()),
        ("YORIG", (y_origin as f32).into()),
        ("XCELL", (x_cell as f32).into()),
        ("YCELL", (y_cell as f32).into()),
        ("VGTYP", (-9999).into()),
        ("VGTOP", Attribute::Float(0.0)),
        ("VGLVLS", Attribute::Floats((0..=layers).map(|l| l as f32).collect())),
        ("GDNAM", padded("LONLAT", 16).into()),
        ("UPNAM", padded("xdrconvert", 16).into()),
        ("VAR-LIST", var_list.into()),
        ("FILEDESC", padded(&dataset.note, 80).into()),
        ("HISTORY", "".into()),
    ];
    for (name, value) in globals {
        sink.put_attribute(None, name, value)?;
    }

    let mut tflag = Vec::with_capacity(starts.len() * variables * 2);
    for start in &starts {
        for _ in 0..variables {
            tflag.push(start.yyyyddd());
            tflag.push(start.hhmmss());
        }
    }
    sink.write_ints("TFLAG", &tflag)?;

    let cells = layers * rows * columns;
    let components = std::iter::once(&points.values).chain(points.values2.as_ref());
    for (name, samples) in output.variable_names.iter().zip(components) {
        let mut grid = vec![MISSING_VALUE as f32; output.timesteps() * cells];
        for t in 0..output.timesteps() {
            for i in output.timestep_range(t) {
                let layer = points.layers.as_ref().map_or(1, |l| l[i]);
                let index = ((layer - 1) as usize * rows + (points.rows[i] - 1) as usize) * columns
                    + (points.columns[i] - 1) as usize;
                grid[t * cells + index] = samples[i].to_wire() as f32;
            }
        }
        sink.write_floats(name, &grid)?;
    }
    sink.close()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Sink that keeps everything in memory.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub dimensions: Vec<(String, usize)>,
        pub variables: BTreeMap<String, (VariableType, Vec<String>)>,
        pub attributes: Vec<(Option<String>, String, Attribute)>,
        pub ints: BTreeMap<String, Vec<i32>>,
        pub floats: BTreeMap<String, Vec<f32>>,
        pub doubles: BTreeMap<String, Vec<f64>>,
        pub closed: bool,
    }

    impl RecordingSink {
        pub fn attribute(&self, variable: Option<&str>, name: &str) -> Option<&Attribute> {
            self.attributes
                .iter()
                .find(|(v, n, _)| v.as_deref() == variable && n == name)
                .map(|(_, _, a)| a)
        }

        fn check(&self, variable: &str) -> XdrResult<()> {
            if self.closed || !self.variables.contains_key(variable) {
                return Err(XdrError::format(format!("cannot write '{}'", variable)));
            }
            Ok(())
        }
    }

    impl NetcdfSink for RecordingSink {
        fn create_dimension(&mut self, name: &str, length: usize) -> XdrResult<()> {
            self.dimensions.push((name.to_string(), length));
            Ok(())
        }

        fn create_variable(&mut self, name: &str, kind: VariableType, dimensions: &[&str]) -> XdrResult<()> {
            let dimensions = dimensions.iter().map(|d| d.to_string()).collect();
            self.variables.insert(name.to_string(), (kind, dimensions));
            Ok(())
        }

        fn put_attribute(&mut self, variable: Option<&str>, name: &str, value: Attribute) -> XdrResult<()> {
            self.attributes.push((variable.map(str::to_string), name.to_string(), value));
            Ok(())
        }

        fn write_ints(&mut self, variable: &str, values: &[i32]) -> XdrResult<()> {
            self.check(variable)?;
            self.ints.insert(variable.to_string(), values.to_vec());
            Ok(())
        }

        fn write_floats(&mut self, variable: &str, values: &[f32]) -> XdrResult<()> {
            self.check(variable)?;
            self.floats.insert(variable.to_string(), values.to_vec());
            Ok(())
        }

        fn write_doubles(&mut self, variable: &str, values: &[f64]) -> XdrResult<()> {
            self.check(variable)?;
            self.doubles.insert(variable.to_string(), values.to_vec());
            Ok(())
        }

        fn close(&mut self) -> XdrResult<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn test_padded_names() {
        assert_eq!(padded("O3", 4), "O3  ");
        assert_eq!(padded("LONGNAME", 4), "LONG");
    }
}
