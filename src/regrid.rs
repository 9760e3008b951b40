//! # Regridding
//!
//! Projects the observation points of a [`Dataset`] onto a [`Grid`], one hour
//! at a time, and attaches the result as [`RegriddedOutput`].
//!
//! Every output hour gets a slot sized for its worst case (one cell per input
//! point). The grid writes its samples at the start of the slot and
//! [`compact`] then closes the gaps in one stable pass over all parallel
//! arrays, so index `i` stays the same physical sample everywhere.

use log::{debug, info};
use rayon::prelude::*;

use crate::dataset::{Dataset, GridPoints, RegriddedOutput};
use crate::error::{XdrError, XdrResult};
use crate::grid::{Grid, PointSet, RegridMethod};
use crate::timestamp::Timestamp;

/// What to regrid and how.
#[derive(Debug, Clone, PartialEq)]
pub struct RegridRequest {
    pub method: RegridMethod,
    /// Values below this are ignored by the grid.
    pub minimum_valid_value: f64,
    /// Variable to regrid; defaults to the first non-implicit variable.
    pub variable: Option<String>,
    /// Second component of a vector variable (e.g. wind V).
    pub variable2: Option<String>,
}

impl Default for RegridRequest {
    fn default() -> Self {
        Self {
            method: RegridMethod::Mean,
            minimum_valid_value: -9998.0,
            variable: None,
            variable2: None,
        }
    }
}

/// Moves the first `counts[t]` values of every slot `t` (of `capacities[t]`
/// values each) forward so the slots become contiguous, then truncates.
fn compact_slots<T: Copy>(values: &mut Vec<T>, capacities: &[usize], counts: &[usize]) {
    let mut read = 0;
    let mut write = 0;
    for (capacity, count) in capacities.iter().zip(counts) {
        values.copy_within(read..read + count, write);
        write += count;
        read += capacity;
    }
    values.truncate(write);
}

/// Removes the slack between per-timestep slots of `points`.
///
/// Running it with `capacities == counts` leaves `points` unchanged.
pub fn compact(points: &mut GridPoints, capacities: &[usize], counts: &[usize]) -> XdrResult<()> {
    let slack_free = capacities.len() == counts.len()
        && capacities.iter().zip(counts).all(|(capacity, count)| count <= capacity)
        && capacities.iter().sum::<usize>() == points.len()
        && points.lengths_agree();
    if !slack_free {
        return Err(XdrError::format(format!(
            "cannot compact {} regridded points with slots {:?} holding {:?}",
            points.len(),
            capacities,
            counts
        )));
    }
    compact_slots(&mut points.longitudes, capacities, counts);
    compact_slots(&mut points.latitudes, capacities, counts);
    compact_slots(&mut points.columns, capacities, counts);
    compact_slots(&mut points.rows, capacities, counts);
    compact_slots(&mut points.values, capacities, counts);
    if let Some(v) = points.elevations.as_mut() {
        compact_slots(v, capacities, counts);
    }
    if let Some(v) = points.layers.as_mut() {
        compact_slots(v, capacities, counts);
    }
    if let Some(v) = points.values2.as_mut() {
        compact_slots(v, capacities, counts);
    }
    Ok(())
}

/// Input points of one output hour, gathered into owned arrays.
struct HourPoints {
    longitudes: Vec<f64>,
    latitudes: Vec<f64>,
    elevations: Option<Vec<f64>>,
    values: Vec<f64>,
    values2: Option<Vec<f64>>,
}

impl HourPoints {
    fn gather(dataset: &Dataset, indices: &[usize], variable: usize, variable2: Option<usize>) -> Self {
        let pick = |values: &[f64]| indices.iter().map(|i| values[*i]).collect::<Vec<f64>>();
        Self {
            longitudes: pick(dataset.longitudes()),
            latitudes: pick(dataset.latitudes()),
            elevations: dataset.elevations().map(pick),
            values: pick(dataset.variable(variable)),
            values2: variable2.map(|v| pick(dataset.variable(v))),
        }
    }

    fn as_point_set(&self) -> PointSet<'_> {
        PointSet {
            longitudes: &self.longitudes,
            latitudes: &self.latitudes,
            elevations: self.elevations.as_deref(),
            values: &self.values,
            values2: self.values2.as_deref(),
        }
    }
}

fn resolve_variable(dataset: &Dataset, name: &str) -> XdrResult<usize> {
    dataset
        .variable_index(name)
        .filter(|i| dataset.user_variables().contains(i))
        .ok_or_else(|| {
            XdrError::configuration(format!(
                "variable '{}' is not a data variable of this {} dataset",
                name, dataset.kind
            ))
        })
}

impl Dataset {
    /// Regrids the observation points onto `grid`, one output timestep per hour
    /// of the dataset's time range, and attaches the result.
    ///
    /// Swath scans are projected one scan at a time; scans falling in the same
    /// hour are merged with [`Grid::aggregate`]. Profile and site points are
    /// selected per hour from their timestamp column.
    ///
    /// # Errors
    ///
    /// `EmptyResult` when no point lands on the grid, `Configuration` for an
    /// invalid grid or unknown variable.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use xdrconvert::dataset::Dataset;
    /// use xdrconvert::grid::LonLatGrid;
    /// use xdrconvert::regrid::RegridRequest;
    ///
    /// # fn run(mut dataset: Dataset) -> xdrconvert::XdrResult<()> {
    /// let grid = LonLatGrid::new(70, 30, -130.0, 20.0, 1.0, 1.0, Vec::new())?;
    /// let output = dataset.regrid(&grid, &RegridRequest::default())?;
    /// println!("{} regridded points", output.total_points());
    /// # Ok(())
    /// # }
    /// ```
    pub fn regrid(&mut self, grid: &dyn Grid, request: &RegridRequest) -> XdrResult<&RegriddedOutput> {
        if self.is_regridded() {
            return Err(XdrError::configuration("dataset is already regridded"));
        }
        if !self.has_observations() {
            return Err(XdrError::configuration("dataset has no observation points to regrid"));
        }
        if !grid.invariant() {
            return Err(XdrError::configuration("grid definition is invalid"));
        }
        let variable = match &request.variable {
            Some(name) => resolve_variable(self, name)?,
            None => self.user_variables().start,
        };
        let variable2 = request.variable2.as_deref().map(|name| resolve_variable(self, name)).transpose()?;

        let start = self.time_range.first.floor_hour();
        let hours = self.time_range.hours();
        let hour_of_point: Vec<usize> = self
            .timestamps()
            .par_iter()
            .map(|value| {
                let timestamp = Timestamp::from_value(*value)?;
                usize::try_from(start.hours_until(&timestamp))
                    .ok()
                    .filter(|h| *h < hours)
                    .ok_or_else(|| XdrError::range(format!("timestamp {} is outside the dataset range", timestamp)))
            })
            .collect::<XdrResult<Vec<usize>>>()?;

        info!(
            "Regridding {} {} points over {} hours onto a {}x{}x{} grid",
            self.total_points(),
            self.kind,
            hours,
            grid.columns(),
            grid.rows(),
            grid.layers()
        );

        let mut points_by_hour: Vec<Vec<usize>> = vec![Vec::new(); hours];
        if !self.kind.batched_by_scan() {
            for (i, hour) in hour_of_point.iter().enumerate() {
                points_by_hour[*hour].push(i);
            }
        }

        let mut chunks: Vec<GridPoints> = Vec::with_capacity(hours);
        let mut capacities = Vec::with_capacity(hours);
        for hour in 0..hours {
            let (capacity, chunk) = if self.kind.batched_by_scan() {
                self.regrid_scans(grid, request, &hour_of_point, hour, variable, variable2)?
            } else {
                let indices = &points_by_hour[hour];
                if indices.is_empty() {
                    (0, None)
                } else {
                    let points = HourPoints::gather(self, indices, variable, variable2);
                    let out = grid.regrid(request.method, request.minimum_valid_value, &points.as_point_set())?;
                    (indices.len(), Some(out))
                }
            };
            let chunk = chunk.unwrap_or_else(|| GridPoints::new(self.kind.has_elevation(), variable2.is_some()));
            if chunk.len() > capacity {
                return Err(XdrError::format(format!(
                    "grid returned {} points for {} inputs in hour {}",
                    chunk.len(),
                    capacity,
                    hour
                )));
            }
            debug!("hour {}: {} inputs -> {} cells", hour, capacity, chunk.len());
            capacities.push(capacity);
            chunks.push(chunk);
        }

        let mut buffer = GridPoints::new(self.kind.has_elevation(), variable2.is_some());
        buffer.resize(capacities.iter().sum());
        let mut offset = 0;
        for (chunk, capacity) in chunks.iter().zip(&capacities) {
            buffer.write_at(offset, chunk)?;
            offset += capacity;
        }
        let counts: Vec<usize> = chunks.iter().map(GridPoints::len).collect();
        compact(&mut buffer, &capacities, &counts)?;

        if buffer.is_empty() {
            return Err(XdrError::empty("no points projected onto the grid"));
        }
        info!("Regridded {} points into {} cells", self.total_points(), buffer.len());

        let names = std::iter::once(variable).chain(variable2);
        let output = RegriddedOutput {
            variable_names: names.clone().map(|v| self.variable_names[v].clone()).collect(),
            variable_units: names.map(|v| self.variable_units[v].clone()).collect(),
            time_range: self.time_range,
            hours_per_timestep: 1,
            points_per_timestep: counts,
            points: buffer,
            extent: grid.extent(),
            grid_header: grid.description().map(|d| d.to_header_lines()),
        };
        self.regridded = Some(output);
        if let Err(error) = crate::validate::check(self) {
            self.regridded = None;
            return Err(error);
        }
        self.regridded
            .as_ref()
            .ok_or_else(|| XdrError::format("regridded output missing after regrid"))
    }

    /// Regrids each swath scan of `hour` separately and merges them.
    /// Returns the number of input points and the merged cells.
    fn regrid_scans(
        &self,
        grid: &dyn Grid,
        request: &RegridRequest,
        hour_of_point: &[usize],
        hour: usize,
        variable: usize,
        variable2: Option<usize>,
    ) -> XdrResult<(usize, Option<GridPoints>)> {
        let mut inputs = 0;
        let mut scans = Vec::new();
        for scan in 0..self.timesteps() {
            let range = self.timestep_range(scan);
            if range.is_empty() || hour_of_point[range.start] != hour {
                continue;
            }
            let indices: Vec<usize> = range.collect();
            inputs += indices.len();
            let points = HourPoints::gather(self, &indices, variable, variable2);
            scans.push(grid.regrid(request.method, request.minimum_valid_value, &points.as_point_set())?);
        }
        let merged = match scans.len() {
            0 => None,
            1 => scans.pop(),
            _ => Some(grid.aggregate(request.method, request.minimum_valid_value, &scans)?),
        };
        Ok((inputs, merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{GridPoint, Sample};

    fn point(column: i64, value: f64) -> GridPoint {
        GridPoint {
            longitude: column as f64,
            latitude: 0.0,
            elevation: Some(column as f64 * 10.0),
            column,
            row: column + 100,
            layer: Some(1),
            value: Sample::Present(value),
            value2: None,
        }
    }

    fn slotted() -> GridPoints {
        // slots of 3, 0 and 2 holding 2, 0 and 1 samples
        let mut points = GridPoints::new(true, false);
        for (column, value) in [(1, 1.0), (2, 2.0), (0, 0.0), (4, 4.0), (0, 0.0)] {
            points.push(point(column, value));
        }
        points
    }

    #[test]
    fn test_compact_keeps_arrays_aligned() {
        let mut points = slotted();
        compact(&mut points, &[3, 0, 2], &[2, 0, 1]).unwrap();
        assert!(points.lengths_agree());
        assert_eq!(points.columns, vec![1, 2, 4]);
        assert_eq!(points.rows, vec![101, 102, 104]);
        assert_eq!(points.elevations, Some(vec![10.0, 20.0, 40.0]));
        assert_eq!(points.values[2], Sample::Present(4.0));
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut points = slotted();
        compact(&mut points, &[3, 0, 2], &[2, 0, 1]).unwrap();
        let once = points.clone();
        compact(&mut points, &[2, 0, 1], &[2, 0, 1]).unwrap();
        assert_eq!(points, once);
    }

    #[test]
    fn test_compact_rejects_overfull_slot() {
        let mut points = slotted();
        assert!(compact(&mut points, &[3, 0, 2], &[4, 0, 1]).is_err());
        assert!(compact(&mut points, &[3, 0], &[2, 0]).is_err());
    }
}
