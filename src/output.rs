//! # Output Module
//!
//! Chooses a writer for a `(format, regridded?)` pair and writes datasets to
//! disk. XDR and ASCII stream through [`std::io::Write`]; COARDS and IOAPI go
//! through a [`NetcdfSink`](crate::netcdf_writer::NetcdfSink).
//!
//! ## Features
//!
//! - **Exhaustive dispatch**: [`writer_for`] matches every format/mode pair
//! - **Atomic files**: output is written to a temporary file in the target
//!   directory and renamed into place only after every array is written
//!
//! | format | observations | regridded |
//! |--------|--------------|-----------|
//! | xdr    | yes          | yes       |
//! | ascii  | yes          | yes       |
//! | coards | yes          | yes       |
//! | ioapi  | no           | yes       |

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dataset::{Dataset, RegriddedOutput};
use crate::error::{XdrError, XdrResult};
use crate::netcdf_writer::{self, FileSink, NetcdfSink};
use crate::timestamp::Timestamp;

/// Supported output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// XDR records, the same layout the input uses
    #[default]
    Xdr,
    /// Tab-delimited text
    Ascii,
    /// COARDS-convention NetCDF point lists
    Coards,
    /// IOAPI gridded NetCDF (regridded output only)
    Ioapi,
}

impl OutputFormat {
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Xdr => "xdr",
            OutputFormat::Ascii => "ascii",
            OutputFormat::Coards => "coards",
            OutputFormat::Ioapi => "ioapi",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type StreamWriter = fn(&Dataset, &mut dyn Write) -> XdrResult<()>;
pub type SinkWriter = fn(&Dataset, &mut dyn NetcdfSink) -> XdrResult<()>;

/// A writer found in the registry.
#[derive(Clone, Copy)]
pub enum Writer {
    Stream(StreamWriter),
    NetCdf(SinkWriter),
}

/// Looks up the writer for `format` applied to observation (`regridded ==
/// false`) or regridded data. `None` marks an unsupported combination.
pub fn writer_for(format: OutputFormat, regridded: bool) -> Option<Writer> {
    match (format, regridded) {
        (OutputFormat::Xdr, false) => Some(Writer::Stream(write_xdr_observations)),
        (OutputFormat::Xdr, true) => Some(Writer::Stream(write_xdr_regridded)),
        (OutputFormat::Ascii, false) => Some(Writer::Stream(write_ascii_observations)),
        (OutputFormat::Ascii, true) => Some(Writer::Stream(write_ascii_regridded)),
        (OutputFormat::Coards, false) => Some(Writer::NetCdf(netcdf_writer::write_coards_observations)),
        (OutputFormat::Coards, true) => Some(Writer::NetCdf(netcdf_writer::write_coards_regridded)),
        (OutputFormat::Ioapi, false) => None,
        (OutputFormat::Ioapi, true) => Some(Writer::NetCdf(netcdf_writer::write_ioapi)),
    }
}

fn lookup(format: OutputFormat, regridded: bool) -> XdrResult<Writer> {
    writer_for(format, regridded).ok_or_else(|| {
        XdrError::configuration(format!(
            "no {} writer for {} data",
            format,
            if regridded { "regridded" } else { "unregridded" }
        ))
    })
}

fn write_xdr_observations(dataset: &Dataset, mut out: &mut dyn Write) -> XdrResult<()> {
    crate::xdr::write_observations(dataset, &mut out)
}

fn write_xdr_regridded(dataset: &Dataset, mut out: &mut dyn Write) -> XdrResult<()> {
    crate::xdr::write_regridded(dataset, &mut out)
}

fn ascii_line(out: &mut dyn Write, fields: &[String]) -> XdrResult<()> {
    writeln!(out, "{}", fields.join("\t")).map_err(|e| crate::error::truncated("writing ASCII row", e))
}

fn column_headers<'a>(names: impl Iterator<Item = &'a String>, units: &'a [String]) -> Vec<String> {
    names.zip(units).map(|(n, u)| format!("{}({})", n, u)).collect()
}

fn write_ascii_observations(dataset: &Dataset, out: &mut dyn Write) -> XdrResult<()> {
    if !dataset.has_observations() {
        return Err(XdrError::configuration("dataset has no observation points to write"));
    }
    let mut header = vec!["Timestamp(UTC)".to_string()];
    header.extend(column_headers(
        dataset.variable_names.iter().skip(1),
        &dataset.variable_units[1..],
    ));
    ascii_line(out, &header)?;
    let id = dataset.variable_index("Id").filter(|_| dataset.kind == crate::dataset::DataKind::Site);
    let timestamps = dataset.timestamps();
    for point in 0..dataset.total_points() {
        let mut row = Vec::with_capacity(dataset.variable_count());
        row.push(Timestamp::from_value(timestamps[point])?.to_iso());
        for variable in 1..dataset.variable_count() {
            let value = dataset.variable(variable)[point];
            row.push(if Some(variable) == id {
                format!("{}", value as i64)
            } else {
                format!("{}", value)
            });
        }
        ascii_line(out, &row)?;
    }
    Ok(())
}

fn regridded_output(dataset: &Dataset) -> XdrResult<&RegriddedOutput> {
    dataset
        .regridded
        .as_ref()
        .ok_or_else(|| XdrError::configuration("dataset has not been regridded"))
}

fn write_ascii_regridded(dataset: &Dataset, out: &mut dyn Write) -> XdrResult<()> {
    let output = regridded_output(dataset)?;
    let points = &output.points;
    let mut header = vec![
        "Timestamp(UTC)".to_string(),
        "Longitude(deg)".to_string(),
        "Latitude(deg)".to_string(),
    ];
    if points.has_elevation() {
        header.push("Elevation(m)".to_string());
    }
    header.extend(["Column(-)".to_string(), "Row(-)".to_string()]);
    if points.layers.is_some() {
        header.push("Layer(-)".to_string());
    }
    header.extend(column_headers(output.variable_names.iter(), &output.variable_units));
    ascii_line(out, &header)?;

    let first = output.time_range.first.floor_hour();
    for t in 0..output.timesteps() {
        let start = first.increment_hours((t * output.hours_per_timestep) as i64)?.to_iso();
        for i in output.timestep_range(t) {
            let point = points.get(i);
            let mut row = vec![start.clone(), point.longitude.to_string(), point.latitude.to_string()];
            if let Some(elevation) = point.elevation {
                row.push(elevation.to_string());
            }
            row.push(point.column.to_string());
            row.push(point.row.to_string());
            if let Some(layer) = point.layer {
                row.push(layer.to_string());
            }
            row.push(point.value.to_wire().to_string());
            if let Some(value2) = point.value2 {
                row.push(value2.to_wire().to_string());
            }
            ascii_line(out, &row)?;
        }
    }
    Ok(())
}

impl Dataset {
    /// Streams the dataset in `format` to `out`.
    ///
    /// Fails with a configuration error for NetCDF formats, which need a sink
    /// (see [`Dataset::write_netcdf`]), and for unsupported combinations.
    pub fn write(&self, format: OutputFormat, out: &mut dyn Write) -> XdrResult<()> {
        match lookup(format, self.is_regridded())? {
            Writer::Stream(writer) => writer(self, out),
            Writer::NetCdf(_) => Err(XdrError::configuration(format!("{} output needs a NetCDF sink", format))),
        }
    }

    /// Writes the dataset in a NetCDF `format` through `sink`.
    pub fn write_netcdf(&self, format: OutputFormat, sink: &mut dyn NetcdfSink) -> XdrResult<()> {
        match lookup(format, self.is_regridded())? {
            Writer::NetCdf(writer) => writer(self, sink),
            Writer::Stream(_) => Err(XdrError::configuration(format!("{} output is not NetCDF", format))),
        }
    }

    /// Writes the dataset in `format` to `path`.
    ///
    /// # Arguments
    ///
    /// * `format` - Output encoding
    /// * `path` - Destination file; replaced only if the write succeeds
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported `(format, regridded?)`
    /// combination before touching the file system. Any write error leaves no
    /// file behind.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use std::fs::File;
    /// use std::io::BufReader;
    /// use xdrconvert::dataset::Dataset;
    /// use xdrconvert::output::OutputFormat;
    ///
    /// let dataset = Dataset::load(BufReader::new(File::open("sites.xdr")?))?;
    /// dataset.write_to_path(OutputFormat::Ascii, "sites.txt")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn write_to_path<P: AsRef<Path>>(&self, format: OutputFormat, path: P) -> XdrResult<()> {
        let path = path.as_ref();
        let writer = lookup(format, self.is_regridded())?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temporary = tempfile::NamedTempFile::new_in(directory)?;
        debug!("writing {} output through {}", format, temporary.path().display());
        match writer {
            Writer::Stream(writer) => {
                let mut out = BufWriter::new(temporary.as_file());
                writer(self, &mut out)?;
                out.flush()?;
            }
            Writer::NetCdf(writer) => {
                let ioapi = format == OutputFormat::Ioapi;
                let mut sink = FileSink::create(temporary.path(), netcdf_writer::estimated_bytes(self, ioapi))?;
                writer(self, &mut sink)?;
                sink.close()?;
            }
        }
        temporary.persist(path).map_err(|e| XdrError::Io(e.error))?;
        info!("Wrote {} output to {}", format, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_pair() {
        for format in [OutputFormat::Xdr, OutputFormat::Ascii, OutputFormat::Coards, OutputFormat::Ioapi] {
            for regridded in [false, true] {
                let expected = !(format == OutputFormat::Ioapi && !regridded);
                assert_eq!(writer_for(format, regridded).is_some(), expected, "{} {}", format, regridded);
            }
        }
    }

    #[test]
    fn test_unsupported_pair_is_configuration_error() {
        let error = lookup(OutputFormat::Ioapi, false).err().unwrap();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_format_serde_names() {
        let format: OutputFormat = serde_json::from_str("\"coards\"").unwrap();
        assert_eq!(format, OutputFormat::Coards);
        assert_eq!(serde_json::to_string(&OutputFormat::Ioapi).unwrap(), "\"ioapi\"");
        assert_eq!(OutputFormat::default(), OutputFormat::Xdr);
    }
}
