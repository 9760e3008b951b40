//! # XDR Layouts
//!
//! The two record layouts built on [`crate::codec`]:
//!
//! ```text
//! Swath 2.0
//! <note>
//! 2005-08-26T00:00:00-0000 2005-08-26T23:59:00-0000
//! # Dimensions: variables timesteps points:
//! 4 2 8
//! # Variable names:
//! Timestamp Longitude Latitude AOD
//! # Variable units:
//! yyyydddhhmm deg deg -
//! # Domain: min_lon min_lat max_lon max_lat
//! -130 20 -60 50
//! # MSB 64-bit integers points[timesteps] and
//! # IEEE-754 64-bit reals data[variables][points]:
//! <binary>
//! ```
//!
//! and the regridded layout, `REGRIDDED-<Kind> 2.0`, whose binary section is a
//! list of parallel per-point arrays. Site files omit the domain lines, profile
//! files add elevation and layer arrays when regridded.

use std::io::{BufRead, Write};

use crate::codec::{self, HeaderReader, WordSize};
use crate::dataset::{Bounds, DataKind, Dataset, GridExtent, GridPoints, RegriddedOutput, Sample};
use crate::error::{XdrError, XdrResult};
use crate::grid::GridDescription;
use crate::timestamp::{TimeRange, Timestamp};

pub const VERSION: &str = "2.0";
pub const REGRIDDED_PREFIX: &str = "REGRIDDED-";
const DIMENSIONS: &str = "# Dimensions: variables timesteps points:";
const REGRIDDED_DIMENSIONS: &str = "# Dimensions: variables timesteps points hours_per_timestep:";
const NAMES: &str = "# Variable names:";
const UNITS: &str = "# Variable units:";
const DOMAIN: &str = "# Domain: min_lon min_lat max_lon max_lat";

fn counts_line(word: WordSize) -> String {
    format!("# MSB {}-bit integers points[timesteps] and", word.bits())
}

fn observations_line(word: WordSize) -> String {
    format!("# IEEE-754 {}-bit reals data[variables][points]:", word.bits())
}

fn reals_line(word: WordSize, array: &str, last: bool) -> String {
    format!("# IEEE-754 {}-bit reals {}[points]{}", word.bits(), array, if last { ":" } else { " and" })
}

fn integers_line(word: WordSize, array: &str) -> String {
    format!("# MSB {}-bit integers {}[points] and", word.bits(), array)
}

/// Parses the first header line into (is regridded, kind).
fn parse_format_line(line: &str) -> XdrResult<(bool, DataKind)> {
    let unknown = || XdrError::format(format!("unrecognized format line '{}'", line));
    let (name, version) = line.split_once(' ').ok_or_else(unknown)?;
    if version != VERSION {
        return Err(unknown());
    }
    let (regridded, kind_name) = match name.strip_prefix(REGRIDDED_PREFIX) {
        Some(kind_name) => (true, kind_name),
        None => (false, name),
    };
    let kind = DataKind::from_name(kind_name).ok_or_else(unknown)?;
    Ok((regridded, kind))
}

fn read_time_range<R: BufRead>(header: &mut HeaderReader<R>) -> XdrResult<TimeRange> {
    let words = header.read_words(2)?;
    let first = Timestamp::from_iso(&words[0])?;
    let last = Timestamp::from_iso(&words[1])?;
    TimeRange::new(first, last)
}

fn to_count(value: i64, what: &str) -> XdrResult<usize> {
    usize::try_from(value).map_err(|_| XdrError::format(format!("negative {} {}", what, value)))
}

fn checked_sum(counts: &[usize]) -> XdrResult<usize> {
    counts
        .iter()
        .try_fold(0usize, |total, &count| total.checked_add(count))
        .ok_or_else(|| XdrError::format("points per timestep overflow the point count"))
}

fn to_samples(values: Vec<f64>) -> Vec<Sample> {
    values.into_iter().map(Sample::from_wire).collect()
}

fn to_wire(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| s.to_wire()).collect()
}

/// Reports whether the stream starts with a regridded format line, leaving
/// the stream where it was.
pub fn peek_regridded<R: BufRead>(reader: &mut R) -> XdrResult<bool> {
    let buffer = reader.fill_buf()?;
    Ok(buffer.starts_with(REGRIDDED_PREFIX.as_bytes()))
}

/// Reads either layout. The result is not yet validated.
pub fn read_dataset<R: BufRead>(reader: R) -> XdrResult<Dataset> {
    let mut header = HeaderReader::new(reader);
    let first = header.read_line()?;
    let (regridded, kind) = parse_format_line(&first)?;
    if regridded {
        read_regridded(header, kind)
    } else {
        read_observations(header, kind)
    }
}

fn read_observations<R: BufRead>(mut header: HeaderReader<R>, kind: DataKind) -> XdrResult<Dataset> {
    let note = header.read_line()?;
    let time_range = read_time_range(&mut header)?;
    header.expect_literal(DIMENSIONS)?;
    let dimensions = header.read_integers(3)?;
    let variables = to_count(dimensions[0], "variable count")?;
    let timesteps = to_count(dimensions[1], "timestep count")?;
    let points = to_count(dimensions[2], "point count")?;
    if variables <= kind.implicit_variables().len() || timesteps == 0 {
        return Err(XdrError::format(format!(
            "{} file needs more than {} variables and at least one timestep, found {} and {}",
            kind,
            kind.implicit_variables().len(),
            variables,
            timesteps
        )));
    }
    header.expect_literal(NAMES)?;
    let variable_names = header.read_words(variables)?;
    header.expect_literal(UNITS)?;
    let variable_units = header.read_words(variables)?;
    let domain = if kind.has_domain() {
        header.expect_literal(DOMAIN)?;
        let r = header.read_reals(4)?;
        Some(Bounds::new(r[0], r[1], r[2], r[3])?)
    } else {
        None
    };
    let sentinels = [counts_line(WordSize::Eight), counts_line(WordSize::Four)];
    let (index, block) = header.read_sentinel(&[sentinels[0].as_str(), sentinels[1].as_str()])?;
    if block.is_some() {
        return Err(XdrError::format("grid description is only allowed in regridded files"));
    }
    let word = if index == 0 { WordSize::Eight } else { WordSize::Four };
    header.expect_literal(&observations_line(word))?;

    let mut stream = header.into_inner();
    let points_per_timestep = codec::read_integers(&mut stream, timesteps, word)?
        .into_iter()
        .map(|c| to_count(c, "point count"))
        .collect::<XdrResult<Vec<usize>>>()?;
    let sum = checked_sum(&points_per_timestep)?;
    if sum != points {
        return Err(XdrError::format(format!(
            "points per timestep sum to {} but the header declares {}",
            sum, points
        )));
    }
    let values = variables
        .checked_mul(points)
        .ok_or_else(|| XdrError::format(format!("{} variables of {} points overflow the array size", variables, points)))?;
    let raw_data = codec::read_reals(&mut stream, values, word)?;
    codec::expect_end(&mut stream)?;

    let mut dataset = Dataset {
        kind,
        note,
        time_range,
        bounds: domain.unwrap_or(Bounds::new(-180.0, -90.0, 180.0, 90.0)?),
        variable_names,
        variable_units,
        points_per_timestep,
        raw_data,
        regridded: None,
    };
    if domain.is_none() {
        dataset.bounds = Bounds::enclosing(dataset.longitudes(), dataset.latitudes())?;
    }
    Ok(dataset)
}

fn read_regridded<R: BufRead>(mut header: HeaderReader<R>, kind: DataKind) -> XdrResult<Dataset> {
    let note = header.read_line()?;
    let time_range = read_time_range(&mut header)?;
    header.expect_literal(REGRIDDED_DIMENSIONS)?;
    let dimensions = header.read_integers(4)?;
    let variables = to_count(dimensions[0], "variable count")?;
    let timesteps = to_count(dimensions[1], "timestep count")?;
    let points = to_count(dimensions[2], "point count")?;
    let hours_per_timestep = to_count(dimensions[3], "hours per timestep")?;
    if !(1..=2).contains(&variables) || timesteps == 0 || hours_per_timestep == 0 {
        return Err(XdrError::format(format!(
            "regridded file needs 1 or 2 variables and at least one timestep, found {} and {}",
            variables, timesteps
        )));
    }
    header.expect_literal(NAMES)?;
    let variable_names = header.read_words(variables)?;
    header.expect_literal(UNITS)?;
    let variable_units = header.read_words(variables)?;

    let sentinels = [counts_line(WordSize::Four), counts_line(WordSize::Eight)];
    let (index, grid_header) = header.read_sentinel(&[sentinels[0].as_str(), sentinels[1].as_str()])?;
    let word = if index == 0 { WordSize::Four } else { WordSize::Eight };
    let has_elevation = kind.has_elevation();
    let is_vector = variables == 2;
    header.expect_literal(&reals_line(word, "longitudes", false))?;
    header.expect_literal(&reals_line(word, "latitudes", false))?;
    if has_elevation {
        header.expect_literal(&reals_line(word, "elevations", false))?;
    }
    header.expect_literal(&integers_line(word, "columns"))?;
    header.expect_literal(&integers_line(word, "rows"))?;
    if has_elevation {
        header.expect_literal(&integers_line(word, "layers"))?;
    }
    if is_vector {
        header.expect_literal(&reals_line(word, "data_1", false))?;
        header.expect_literal(&reals_line(word, "data_2", true))?;
    } else {
        header.expect_literal(&reals_line(word, "data", true))?;
    }

    let mut stream = header.into_inner();
    let points_per_timestep = codec::read_integers(&mut stream, timesteps, word)?
        .into_iter()
        .map(|c| to_count(c, "point count"))
        .collect::<XdrResult<Vec<usize>>>()?;
    let sum = checked_sum(&points_per_timestep)?;
    if sum != points {
        return Err(XdrError::format(format!(
            "regridded points per timestep sum to {} but the header declares {}",
            sum, points
        )));
    }
    let longitudes = codec::read_reals(&mut stream, points, word)?;
    let latitudes = codec::read_reals(&mut stream, points, word)?;
    let elevations = if has_elevation { Some(codec::read_reals(&mut stream, points, word)?) } else { None };
    let columns = codec::read_integers(&mut stream, points, word)?;
    let rows = codec::read_integers(&mut stream, points, word)?;
    let layers = if has_elevation { Some(codec::read_integers(&mut stream, points, word)?) } else { None };
    let values = to_samples(codec::read_reals(&mut stream, points, word)?);
    let values2 = if is_vector { Some(to_samples(codec::read_reals(&mut stream, points, word)?)) } else { None };
    codec::expect_end(&mut stream)?;

    let grid_points = GridPoints {
        longitudes,
        latitudes,
        elevations,
        columns,
        rows,
        layers,
        values,
        values2,
    };
    let extent = grid_header
        .as_deref()
        .and_then(GridDescription::extent_from_header_lines)
        .unwrap_or_else(|| extent_of(&grid_points));
    let bounds = if grid_points.is_empty() {
        Bounds::new(-180.0, -90.0, 180.0, 90.0)?
    } else {
        Bounds::enclosing(&grid_points.longitudes, &grid_points.latitudes)?
    };

    Ok(Dataset {
        kind,
        note,
        time_range,
        bounds,
        variable_names: variable_names.clone(),
        variable_units: variable_units.clone(),
        points_per_timestep: Vec::new(),
        raw_data: Vec::new(),
        regridded: Some(RegriddedOutput {
            variable_names,
            variable_units,
            time_range,
            hours_per_timestep,
            points_per_timestep,
            points: grid_points,
            extent,
            grid_header,
        }),
    })
}

/// Smallest extent that contains every index, used when a file carries no grid description.
fn extent_of(points: &GridPoints) -> GridExtent {
    let max = |values: &[i64]| values.iter().copied().max().unwrap_or(1).max(1) as usize;
    GridExtent {
        columns: max(&points.columns),
        rows: max(&points.rows),
        layers: points.layers.as_deref().map(max).unwrap_or(1),
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> XdrResult<()> {
    writeln!(writer, "{}", line).map_err(|e| crate::error::truncated("writing header", e))
}

/// Writes the observation layout with 64-bit words.
pub fn write_observations<W: Write>(dataset: &Dataset, writer: &mut W) -> XdrResult<()> {
    // packed YYYYDDDHHMM timestamps do not fit a 32-bit real
    let word = WordSize::Eight;
    if !dataset.has_observations() {
        return Err(XdrError::configuration("dataset has no observation points to write"));
    }
    let kind = dataset.kind;
    write_line(writer, &format!("{} {}", kind.name(), VERSION))?;
    write_line(writer, &dataset.note)?;
    write_line(writer, &format!("{} {}", dataset.time_range.first.to_iso(), dataset.time_range.last.to_iso()))?;
    write_line(writer, DIMENSIONS)?;
    write_line(
        writer,
        &format!("{} {} {}", dataset.variable_count(), dataset.timesteps(), dataset.total_points()),
    )?;
    write_line(writer, NAMES)?;
    write_line(writer, &dataset.variable_names.join(" "))?;
    write_line(writer, UNITS)?;
    write_line(writer, &dataset.variable_units.join(" "))?;
    if kind.has_domain() {
        let b = &dataset.bounds;
        write_line(writer, DOMAIN)?;
        write_line(
            writer,
            &format!("{} {} {} {}", b.min_longitude, b.min_latitude, b.max_longitude, b.max_latitude),
        )?;
    }
    write_line(writer, &counts_line(word))?;
    write_line(writer, &observations_line(word))?;
    let counts: Vec<i64> = dataset.points_per_timestep.iter().map(|c| *c as i64).collect();
    codec::write_integers(writer, &counts, word)?;
    codec::write_reals(writer, &dataset.raw_data, word)?;
    Ok(())
}

/// Writes the regridded layout with 32-bit words.
pub fn write_regridded<W: Write>(dataset: &Dataset, writer: &mut W) -> XdrResult<()> {
    let word = WordSize::Four;
    let output = dataset
        .regridded
        .as_ref()
        .ok_or_else(|| XdrError::configuration("dataset has not been regridded"))?;
    let points = &output.points;
    let has_elevation = points.has_elevation();
    write_line(writer, &format!("{}{} {}", REGRIDDED_PREFIX, dataset.kind.name(), VERSION))?;
    write_line(writer, &dataset.note)?;
    write_line(writer, &format!("{} {}", output.time_range.first.to_iso(), output.time_range.last.to_iso()))?;
    write_line(writer, REGRIDDED_DIMENSIONS)?;
    write_line(
        writer,
        &format!(
            "{} {} {} {}",
            output.variable_names.len(),
            output.timesteps(),
            output.total_points(),
            output.hours_per_timestep
        ),
    )?;
    write_line(writer, NAMES)?;
    write_line(writer, &output.variable_names.join(" "))?;
    write_line(writer, UNITS)?;
    write_line(writer, &output.variable_units.join(" "))?;
    if let Some(block) = &output.grid_header {
        for line in block {
            write_line(writer, line)?;
        }
    }
    write_line(writer, &counts_line(word))?;
    write_line(writer, &reals_line(word, "longitudes", false))?;
    write_line(writer, &reals_line(word, "latitudes", false))?;
    if has_elevation {
        write_line(writer, &reals_line(word, "elevations", false))?;
    }
    write_line(writer, &integers_line(word, "columns"))?;
    write_line(writer, &integers_line(word, "rows"))?;
    if has_elevation {
        write_line(writer, &integers_line(word, "layers"))?;
    }
    if output.is_vector() {
        write_line(writer, &reals_line(word, "data_1", false))?;
        write_line(writer, &reals_line(word, "data_2", true))?;
    } else {
        write_line(writer, &reals_line(word, "data", true))?;
    }

    let counts: Vec<i64> = output.points_per_timestep.iter().map(|c| *c as i64).collect();
    codec::write_integers(writer, &counts, word)?;
    codec::write_reals(writer, &points.longitudes, word)?;
    codec::write_reals(writer, &points.latitudes, word)?;
    if let Some(elevations) = &points.elevations {
        codec::write_reals(writer, elevations, word)?;
    }
    codec::write_integers(writer, &points.columns, word)?;
    codec::write_integers(writer, &points.rows, word)?;
    if let Some(layers) = &points.layers {
        codec::write_integers(writer, layers, word)?;
    }
    codec::write_reals(writer, &to_wire(&points.values), word)?;
    if let Some(values2) = &points.values2 {
        codec::write_reals(writer, &to_wire(values2), word)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_line() {
        assert_eq!(parse_format_line("Swath 2.0").unwrap(), (false, DataKind::Swath));
        assert_eq!(parse_format_line("REGRIDDED-Profile 2.0").unwrap(), (true, DataKind::Profile));
        assert!(parse_format_line("Swath 1.0").is_err());
        assert!(parse_format_line("Grid 2.0").is_err());
        assert!(parse_format_line("Swath").is_err());
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(counts_line(WordSize::Four), "# MSB 32-bit integers points[timesteps] and");
        assert_eq!(reals_line(WordSize::Four, "data", true), "# IEEE-754 32-bit reals data[points]:");
        assert_eq!(integers_line(WordSize::Eight, "rows"), "# MSB 64-bit integers rows[points] and");
    }
}
