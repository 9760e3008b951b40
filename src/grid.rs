//! # Target Grids
//!
//! The [`Grid`] trait is the seam between the pipeline and the grid-projection
//! service: it reports the grid extent, projects longitude/latitude points onto
//! 1-based cell indices and bins one timestep of points into cells.
//!
//! [`LonLatGrid`] is the built-in implementation: a regular longitude/latitude
//! grid with optional layers bounded by elevation edges.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dataset::{GridExtent, GridPoint, GridPoints, Sample};
use crate::error::{XdrError, XdrResult};

/// Statistic used to combine the points that fall into the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegridMethod {
    /// Value of the point closest to the cell center.
    Nearest,
    /// Arithmetic mean of the points in the cell.
    #[default]
    Mean,
    /// Inverse-distance weighted mean around the cell center.
    Weighted,
}

/// Location of one point on the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellProjection {
    pub column: i64,
    pub row: i64,
    /// Fractional position inside the cell, `[0, 1)`.
    pub x_offset: f64,
    pub y_offset: f64,
    /// Center of the cell.
    pub longitude: f64,
    pub latitude: f64,
}

/// One timestep of points handed to [`Grid::regrid`].
#[derive(Debug, Clone, Copy)]
pub struct PointSet<'a> {
    pub longitudes: &'a [f64],
    pub latitudes: &'a [f64],
    pub elevations: Option<&'a [f64]>,
    pub values: &'a [f64],
    pub values2: Option<&'a [f64]>,
}

impl PointSet<'_> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lengths_agree(&self) -> bool {
        let n = self.len();
        self.longitudes.len() == n
            && self.latitudes.len() == n
            && self.elevations.is_none_or(|e| e.len() == n)
            && self.values2.is_none_or(|v| v.len() == n)
    }
}

pub trait Grid {
    fn columns(&self) -> usize;
    fn rows(&self) -> usize;
    fn layers(&self) -> usize;

    /// True when the grid definition is internally consistent.
    fn invariant(&self) -> bool;

    fn extent(&self) -> GridExtent {
        GridExtent {
            columns: self.columns(),
            rows: self.rows(),
            layers: self.layers(),
        }
    }

    /// Projects each point onto the grid; points outside it map to `None`.
    fn project_xy(&self, longitudes: &[f64], latitudes: &[f64]) -> Vec<Option<CellProjection>>;

    /// Bins one timestep of points into cells. Points whose value is below
    /// `minimum_valid_value` or that fall outside the grid are ignored.
    fn regrid(&self, method: RegridMethod, minimum_valid_value: f64, points: &PointSet) -> XdrResult<GridPoints>;

    /// Merges several regridded sources for the same timestep, one sample per cell.
    fn aggregate(&self, method: RegridMethod, minimum_valid_value: f64, sources: &[GridPoints]) -> XdrResult<GridPoints>;

    /// Four header lines describing the grid, written ahead of the binary section.
    fn description(&self) -> Option<GridDescription> {
        None
    }
}

const PROJECTION_LITERAL: &str = "# Projection:";
const GRID_LITERAL: &str = "# Grid: ncols nrows nlays xorig yorig xcell ycell:";

/// Grid geometry carried in the optional regridded-header block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDescription {
    pub projection: String,
    pub extent: GridExtent,
    pub x_origin: f64,
    pub y_origin: f64,
    pub x_cell: f64,
    pub y_cell: f64,
}

impl GridDescription {
    pub fn to_header_lines(&self) -> Vec<String> {
        vec![
            PROJECTION_LITERAL.to_string(),
            self.projection.clone(),
            GRID_LITERAL.to_string(),
            format!(
                "{} {} {} {} {} {} {}",
                self.extent.columns,
                self.extent.rows,
                self.extent.layers,
                self.x_origin,
                self.y_origin,
                self.x_cell,
                self.y_cell
            ),
        ]
    }

    /// Recognizes a block written by [`GridDescription::to_header_lines`].
    pub fn from_header_lines(lines: &[String]) -> Option<Self> {
        if lines.len() != 4 || lines[0] != PROJECTION_LITERAL || lines[2] != GRID_LITERAL {
            return None;
        }
        let words: Vec<&str> = lines[3].split_whitespace().collect();
        if words.len() != 7 {
            return None;
        }
        let count = |w: &str| w.parse::<usize>().ok().filter(|c| *c > 0);
        let real = |w: &str| w.parse::<f64>().ok();
        Some(Self {
            projection: lines[1].clone(),
            extent: GridExtent {
                columns: count(words[0])?,
                rows: count(words[1])?,
                layers: count(words[2])?,
            },
            x_origin: real(words[3])?,
            y_origin: real(words[4])?,
            x_cell: real(words[5])?,
            y_cell: real(words[6])?,
        })
    }

    pub fn extent_from_header_lines(lines: &[String]) -> Option<GridExtent> {
        Self::from_header_lines(lines).map(|d| d.extent)
    }
}

/// Regular longitude/latitude grid.
///
/// ```
/// use xdrconvert::grid::{Grid, LonLatGrid};
///
/// let grid = LonLatGrid::new(4, 2, -100.0, 30.0, 1.0, 1.0, Vec::new()).unwrap();
/// let cells = grid.project_xy(&[-99.5, -95.0], &[30.5, 30.5]);
/// assert_eq!(cells[0].map(|c| (c.column, c.row)), Some((1, 1)));
/// assert!(cells[1].is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LonLatGrid {
    pub columns: usize,
    pub rows: usize,
    /// Western edge of the first column.
    pub west: f64,
    /// Southern edge of the first row.
    pub south: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    /// Elevations (m) bounding the layers, bottom to top. Empty for a single surface layer.
    #[serde(default)]
    pub layer_edges: Vec<f64>,
}

impl LonLatGrid {
    pub fn new(
        columns: usize,
        rows: usize,
        west: f64,
        south: f64,
        cell_width: f64,
        cell_height: f64,
        layer_edges: Vec<f64>,
    ) -> XdrResult<Self> {
        let grid = Self {
            columns,
            rows,
            west,
            south,
            cell_width,
            cell_height,
            layer_edges,
        };
        if !grid.invariant() {
            return Err(XdrError::configuration(format!("invalid grid definition {:?}", grid)));
        }
        Ok(grid)
    }

    pub fn cell_center(&self, column: i64, row: i64) -> (f64, f64) {
        (
            self.west + (column as f64 - 0.5) * self.cell_width,
            self.south + (row as f64 - 0.5) * self.cell_height,
        )
    }

    /// 1-based layer containing `elevation`, or `None` outside the layer edges.
    pub fn layer_of(&self, elevation: f64) -> Option<i64> {
        if self.layer_edges.is_empty() {
            return Some(1);
        }
        self.layer_edges
            .windows(2)
            .position(|edge| elevation >= edge[0] && elevation < edge[1])
            .map(|i| i as i64 + 1)
    }

    pub fn layer_center(&self, layer: i64) -> Option<f64> {
        let i = usize::try_from(layer - 1).ok()?;
        let bottom = self.layer_edges.get(i)?;
        let top = self.layer_edges.get(i + 1)?;
        Some(0.5 * (bottom + top))
    }
}

/// Running per-cell accumulator used by both regrid and aggregate.
#[derive(Debug, Clone)]
struct CellAccumulator {
    longitude: f64,
    latitude: f64,
    elevation_sum: f64,
    weight: f64,
    sum: f64,
    sum2: f64,
    count: usize,
    best_distance: f64,
}

impl CellAccumulator {
    fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            elevation_sum: 0.0,
            weight: 0.0,
            sum: 0.0,
            sum2: 0.0,
            count: 0,
            best_distance: f64::INFINITY,
        }
    }

    fn add(&mut self, method: RegridMethod, distance: f64, elevation: f64, value: f64, value2: f64) {
        self.count += 1;
        self.elevation_sum += elevation;
        match method {
            RegridMethod::Mean => {
                self.weight += 1.0;
                self.sum += value;
                self.sum2 += value2;
            }
            RegridMethod::Weighted => {
                let w = 1.0 / (distance + 1e-6);
                self.weight += w;
                self.sum += w * value;
                self.sum2 += w * value2;
            }
            RegridMethod::Nearest => {
                if distance < self.best_distance {
                    self.best_distance = distance;
                    self.weight = 1.0;
                    self.sum = value;
                    self.sum2 = value2;
                }
            }
        }
    }

    fn finish(&self) -> (f64, f64) {
        (self.sum / self.weight, self.sum2 / self.weight)
    }
}

type CellKey = (i64, i64, i64);

/// Cells in order of first occurrence.
struct CellBins {
    order: Vec<CellKey>,
    cells: HashMap<CellKey, CellAccumulator>,
}

impl CellBins {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            cells: HashMap::new(),
        }
    }

    fn cell(&mut self, key: CellKey, longitude: f64, latitude: f64) -> &mut CellAccumulator {
        if !self.cells.contains_key(&key) {
            self.order.push(key);
        }
        self.cells.entry(key).or_insert_with(|| CellAccumulator::new(longitude, latitude))
    }

    fn into_points(self, grid: &LonLatGrid, has_elevation: bool, is_vector: bool) -> GridPoints {
        let mut points = GridPoints::new(has_elevation, is_vector);
        for key in &self.order {
            let cell = &self.cells[key];
            let (value, value2) = cell.finish();
            let (column, row, layer) = *key;
            let elevation = grid
                .layer_center(layer)
                .unwrap_or(cell.elevation_sum / cell.count as f64);
            points.push(GridPoint {
                longitude: cell.longitude,
                latitude: cell.latitude,
                elevation: has_elevation.then_some(elevation),
                column,
                row,
                layer: has_elevation.then_some(layer),
                value: Sample::Present(value),
                value2: is_vector.then_some(Sample::Present(value2)),
            });
        }
        points
    }
}

impl Grid for LonLatGrid {
    fn columns(&self) -> usize {
        self.columns
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn layers(&self) -> usize {
        self.layer_edges.len().saturating_sub(1).max(1)
    }

    fn invariant(&self) -> bool {
        let east = self.west + self.columns as f64 * self.cell_width;
        let north = self.south + self.rows as f64 * self.cell_height;
        self.columns > 0
            && self.rows > 0
            && self.cell_width > 0.0
            && self.cell_height > 0.0
            && self.west >= -180.0
            && east <= 180.0 + 1e-9
            && self.south >= -90.0
            && north <= 90.0 + 1e-9
            && (self.layer_edges.is_empty()
                || (self.layer_edges.len() >= 2 && self.layer_edges.windows(2).all(|e| e[0] < e[1])))
    }

    fn project_xy(&self, longitudes: &[f64], latitudes: &[f64]) -> Vec<Option<CellProjection>> {
        longitudes
            .iter()
            .zip(latitudes)
            .map(|(longitude, latitude)| {
                let x = (longitude - self.west) / self.cell_width;
                let y = (latitude - self.south) / self.cell_height;
                if !(x >= 0.0 && y >= 0.0 && x < self.columns as f64 && y < self.rows as f64) {
                    return None;
                }
                let column = x.floor() as i64 + 1;
                let row = y.floor() as i64 + 1;
                let (center_longitude, center_latitude) = self.cell_center(column, row);
                Some(CellProjection {
                    column,
                    row,
                    x_offset: x.fract(),
                    y_offset: y.fract(),
                    longitude: center_longitude,
                    latitude: center_latitude,
                })
            })
            .collect()
    }

    fn regrid(&self, method: RegridMethod, minimum_valid_value: f64, points: &PointSet) -> XdrResult<GridPoints> {
        if !points.lengths_agree() {
            return Err(XdrError::format("regrid input arrays have different lengths"));
        }
        let projections = self.project_xy(points.longitudes, points.latitudes);
        let mut bins = CellBins::new();
        for (i, projection) in projections.iter().enumerate() {
            let Some(cell) = projection else { continue };
            let value = points.values[i];
            let value2 = points.values2.map_or(minimum_valid_value, |v| v[i]);
            if value < minimum_valid_value || value2 < minimum_valid_value {
                continue;
            }
            let elevation = points.elevations.map_or(0.0, |e| e[i]);
            let layer = match points.elevations {
                Some(_) => match self.layer_of(elevation) {
                    Some(layer) => layer,
                    None => continue,
                },
                None => 1,
            };
            let distance = ((cell.x_offset - 0.5).powi(2) + (cell.y_offset - 0.5).powi(2)).sqrt();
            bins.cell((cell.column, cell.row, layer), cell.longitude, cell.latitude)
                .add(method, distance, elevation, value, value2);
        }
        Ok(bins.into_points(self, points.elevations.is_some(), points.values2.is_some()))
    }

    fn aggregate(&self, method: RegridMethod, minimum_valid_value: f64, sources: &[GridPoints]) -> XdrResult<GridPoints> {
        let Some(first) = sources.first() else {
            return Ok(GridPoints::default());
        };
        let (has_elevation, is_vector) = (first.has_elevation(), first.is_vector());
        if sources.iter().any(|s| s.has_elevation() != has_elevation || s.is_vector() != is_vector) {
            return Err(XdrError::format("cannot aggregate regridded sources of different shapes"));
        }
        let mut bins = CellBins::new();
        for point in sources.iter().flat_map(|s| s.iter()) {
            let Some(value) = point.value.value() else { continue };
            let value2 = match point.value2 {
                Some(sample) => match sample.value() {
                    Some(v) => v,
                    None => continue,
                },
                None => minimum_valid_value,
            };
            if value < minimum_valid_value || value2 < minimum_valid_value {
                continue;
            }
            let layer = point.layer.unwrap_or(1);
            // Sources are already cell values, so weighting by distance reduces to the mean.
            let method = if method == RegridMethod::Nearest { method } else { RegridMethod::Mean };
            bins.cell((point.column, point.row, layer), point.longitude, point.latitude)
                .add(method, 0.0, point.elevation.unwrap_or(0.0), value, value2);
        }
        Ok(bins.into_points(self, has_elevation, is_vector))
    }

    fn description(&self) -> Option<GridDescription> {
        Some(GridDescription {
            projection: "+proj=longlat +datum=WGS84".to_string(),
            extent: self.extent(),
            x_origin: self.west,
            y_origin: self.south,
            x_cell: self.cell_width,
            y_cell: self.cell_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> LonLatGrid {
        LonLatGrid::new(4, 3, -100.0, 30.0, 1.0, 1.0, Vec::new()).unwrap()
    }

    #[test]
    fn test_invalid_grids_rejected() {
        assert!(LonLatGrid::new(0, 3, -100.0, 30.0, 1.0, 1.0, Vec::new()).is_err());
        assert!(LonLatGrid::new(400, 3, -100.0, 30.0, 1.0, 1.0, Vec::new()).is_err());
        assert!(LonLatGrid::new(4, 3, -100.0, 30.0, 1.0, 1.0, vec![0.0]).is_err());
        assert!(LonLatGrid::new(4, 3, -100.0, 30.0, 1.0, 1.0, vec![0.0, 100.0, 50.0]).is_err());
    }

    #[test]
    fn test_regrid_mean_per_cell() {
        let grid = grid();
        let points = PointSet {
            longitudes: &[-99.9, -99.1, -97.5, -120.0],
            latitudes: &[30.5, 30.5, 32.5, 30.5],
            elevations: None,
            values: &[1.0, 3.0, 5.0, 7.0],
            values2: None,
        };
        let out = grid.regrid(RegridMethod::Mean, 0.0, &points).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!((out.columns[0], out.rows[0]), (1, 1));
        assert_eq!(out.values[0], Sample::Present(2.0));
        assert_eq!((out.columns[1], out.rows[1]), (3, 3));
        assert_eq!(out.longitudes[1], -97.5);
        assert_eq!(out.latitudes[1], 32.5);
    }

    #[test]
    fn test_regrid_ignores_values_below_minimum() {
        let grid = grid();
        let points = PointSet {
            longitudes: &[-99.5, -99.5],
            latitudes: &[30.5, 30.5],
            elevations: None,
            values: &[-9999.0, 4.0],
            values2: None,
        };
        let out = grid.regrid(RegridMethod::Mean, -9998.0, &points).unwrap();
        assert_eq!(out.values, vec![Sample::Present(4.0)]);
    }

    #[test]
    fn test_regrid_nearest_picks_center_point() {
        let grid = grid();
        let points = PointSet {
            longitudes: &[-99.95, -99.5],
            latitudes: &[30.05, 30.5],
            elevations: None,
            values: &[10.0, 20.0],
            values2: None,
        };
        let out = grid.regrid(RegridMethod::Nearest, 0.0, &points).unwrap();
        assert_eq!(out.values, vec![Sample::Present(20.0)]);
    }

    #[test]
    fn test_layers_from_elevation() {
        let grid = LonLatGrid::new(4, 3, -100.0, 30.0, 1.0, 1.0, vec![0.0, 100.0, 1000.0]).unwrap();
        assert_eq!(grid.layers(), 2);
        assert_eq!(grid.layer_of(50.0), Some(1));
        assert_eq!(grid.layer_of(500.0), Some(2));
        assert_eq!(grid.layer_of(5000.0), None);
        let points = PointSet {
            longitudes: &[-99.5, -99.5, -99.5],
            latitudes: &[30.5, 30.5, 30.5],
            elevations: Some(&[10.0, 500.0, 5000.0]),
            values: &[1.0, 2.0, 3.0],
            values2: None,
        };
        let out = grid.regrid(RegridMethod::Mean, 0.0, &points).unwrap();
        assert_eq!(out.layers, Some(vec![1, 2]));
        assert_eq!(out.elevations, Some(vec![50.0, 550.0]));
    }

    #[test]
    fn test_aggregate_merges_cells() {
        let grid = grid();
        let a = grid
            .regrid(
                RegridMethod::Mean,
                0.0,
                &PointSet {
                    longitudes: &[-99.5],
                    latitudes: &[30.5],
                    elevations: None,
                    values: &[2.0],
                    values2: None,
                },
            )
            .unwrap();
        let b = grid
            .regrid(
                RegridMethod::Mean,
                0.0,
                &PointSet {
                    longitudes: &[-99.5, -98.5],
                    latitudes: &[30.5, 30.5],
                    elevations: None,
                    values: &[4.0, 6.0],
                    values2: None,
                },
            )
            .unwrap();
        let merged = grid.aggregate(RegridMethod::Mean, 0.0, &[a, b]).unwrap();
        assert_eq!(merged.columns, vec![1, 2]);
        assert_eq!(merged.values, vec![Sample::Present(3.0), Sample::Present(6.0)]);
    }

    #[test]
    fn test_description_round_trip() {
        let description = grid().description().unwrap();
        let lines = description.to_header_lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(GridDescription::from_header_lines(&lines), Some(description));
        assert!(GridDescription::extent_from_header_lines(&lines[..3]).is_none());
    }
}
