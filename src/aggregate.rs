//! # Time Aggregation
//!
//! Folds hourly regridded output into daily or whole-period timesteps. Each
//! grid cell of a window keeps a running mean, updated hour by hour as
//! `new = old + (value - old) / (count + 1)`, with the count restarting at
//! every window boundary. Missing samples do not touch the mean, and a window
//! of identical values averages to that value exactly.

use chrono::Duration;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dataset::{Dataset, GridPoint, GridPoints, RegriddedOutput, Sample};
use crate::error::{XdrError, XdrResult};

/// Width of the aggregated timesteps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AggregationSpan {
    /// One timestep per (local) calendar day.
    Daily,
    /// A single timestep covering the whole time range.
    All,
}

/// Running mean of one sample component.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    pub fn add(&mut self, sample: Sample) {
        if let Some(value) = sample.value() {
            self.mean += (value - self.mean) / (self.count as f64 + 1.0);
            self.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sample(&self) -> Sample {
        if self.count == 0 {
            Sample::Missing
        } else {
            Sample::Present(self.mean)
        }
    }
}

/// Aggregated output plus, per sample, how many hourly values were averaged.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub output: RegriddedOutput,
    pub contributions: Vec<usize>,
}

type CellKey = (i64, i64, i64);

struct Window {
    order: Vec<CellKey>,
    cells: HashMap<CellKey, (GridPoint, RunningMean, RunningMean)>,
}

impl Window {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            cells: HashMap::new(),
        }
    }

    fn add(&mut self, point: GridPoint) {
        let key = (point.column, point.row, point.layer.unwrap_or(1));
        let entry = self.cells.entry(key).or_insert_with(|| {
            self.order.push(key);
            (point, RunningMean::default(), RunningMean::default())
        });
        entry.1.add(point.value);
        if let Some(value2) = point.value2 {
            entry.2.add(value2);
        }
    }

    fn drain_into(self, points: &mut GridPoints, contributions: &mut Vec<usize>) -> usize {
        let count = self.order.len();
        for key in &self.order {
            let (point, mean, mean2) = &self.cells[key];
            points.push(GridPoint {
                value: mean.sample(),
                value2: point.value2.map(|_| mean2.sample()),
                ..*point
            });
            contributions.push(mean.count());
        }
        count
    }
}

fn renamed(name: &str, span: AggregationSpan) -> String {
    if span == AggregationSpan::Daily && !name.to_ascii_lowercase().contains("daily") {
        format!("daily_{}", name)
    } else {
        name.to_string()
    }
}

/// Aggregates hourly `output` into `span`-wide timesteps.
///
/// `utc_offset_hours` shifts the daily windows to local days.
pub fn aggregate(output: &RegriddedOutput, span: AggregationSpan, utc_offset_hours: i64) -> XdrResult<Aggregated> {
    if output.hours_per_timestep != 1 {
        return Err(XdrError::configuration(format!(
            "only hourly output can be aggregated, found {} hours per timestep",
            output.hours_per_timestep
        )));
    }
    if !(-12..=14).contains(&utc_offset_hours) {
        return Err(XdrError::configuration(format!("invalid UTC offset {} hours", utc_offset_hours)));
    }
    let hours = output.timesteps();
    let local_start = output.time_range.first.floor_hour().datetime() + Duration::hours(utc_offset_hours);
    let window_of = |hour: usize| match span {
        AggregationSpan::Daily => {
            let local = local_start + Duration::hours(hour as i64);
            (local.date() - local_start.date()).num_days() as usize
        }
        AggregationSpan::All => 0,
    };
    let windows = window_of(hours.saturating_sub(1)) + 1;

    let mut points = GridPoints::new(output.points.has_elevation(), output.is_vector());
    let mut contributions = Vec::with_capacity(output.total_points());
    let mut points_per_timestep = Vec::with_capacity(windows);
    let mut window = Window::new();
    let mut current = 0;
    for hour in 0..hours {
        let index = window_of(hour);
        if index != current {
            points_per_timestep.push(std::mem::replace(&mut window, Window::new()).drain_into(&mut points, &mut contributions));
            // windows without any hour still occupy a timestep
            while points_per_timestep.len() < index {
                points_per_timestep.push(0);
            }
            current = index;
        }
        for i in output.timestep_range(hour) {
            window.add(output.points.get(i));
        }
    }
    points_per_timestep.push(window.drain_into(&mut points, &mut contributions));

    let hours_per_timestep = match span {
        AggregationSpan::Daily => 24,
        AggregationSpan::All => hours,
    };
    Ok(Aggregated {
        output: RegriddedOutput {
            variable_names: output.variable_names.iter().map(|n| renamed(n, span)).collect(),
            variable_units: output.variable_units.clone(),
            time_range: output.time_range,
            hours_per_timestep,
            points_per_timestep,
            points,
            extent: output.extent,
            grid_header: output.grid_header.clone(),
        },
        contributions,
    })
}

impl Dataset {
    /// Replaces the hourly regridded output with its `span` aggregate.
    pub fn aggregate_time(&mut self, span: AggregationSpan, utc_offset_hours: i64) -> XdrResult<&RegriddedOutput> {
        let hourly = self
            .regridded
            .as_ref()
            .ok_or_else(|| XdrError::configuration("time aggregation requires regridded output"))?;
        let aggregated = aggregate(hourly, span, utc_offset_hours)?;
        info!(
            "Aggregated {} hourly timesteps into {} {:?} timesteps ({} -> {} points)",
            hourly.timesteps(),
            aggregated.output.timesteps(),
            span,
            hourly.total_points(),
            aggregated.output.total_points()
        );
        let hourly = self.regridded.replace(aggregated.output);
        if let Err(error) = crate::validate::check(self) {
            self.regridded = hourly;
            return Err(error);
        }
        self.regridded
            .as_ref()
            .ok_or_else(|| XdrError::format("regridded output missing after aggregation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::GridExtent;
    use crate::timestamp::{TimeRange, Timestamp};

    fn hourly(values: &[Vec<Sample>], first: i64, last: i64) -> RegriddedOutput {
        let mut points = GridPoints::new(false, false);
        let mut counts = Vec::new();
        for hour in values {
            for (cell, value) in hour.iter().enumerate() {
                points.push(GridPoint {
                    longitude: cell as f64,
                    latitude: 0.0,
                    elevation: None,
                    column: cell as i64 + 1,
                    row: 1,
                    layer: None,
                    value: *value,
                    value2: None,
                });
            }
            counts.push(hour.len());
        }
        RegriddedOutput {
            variable_names: vec!["AOD".to_string()],
            variable_units: vec!["-".to_string()],
            time_range: TimeRange::new(Timestamp::from_packed(first).unwrap(), Timestamp::from_packed(last).unwrap())
                .unwrap(),
            hours_per_timestep: 1,
            points_per_timestep: counts,
            points,
            extent: GridExtent {
                columns: 4,
                rows: 1,
                layers: 1,
            },
            grid_header: None,
        }
    }

    #[test]
    fn test_running_mean_skips_missing() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.sample(), Sample::Missing);
        for sample in [Sample::Present(1.0), Sample::Missing, Sample::Present(3.0)] {
            mean.add(sample);
        }
        assert_eq!(mean.count(), 2);
        assert_eq!(mean.sample(), Sample::Present(2.0));
    }

    #[test]
    fn test_running_mean_of_identical_values_is_exact() {
        for value in [0.1, 0.3, 0.7, 1.1, 2.3, 0.01] {
            let mut mean = RunningMean::default();
            for _ in 0..24 {
                mean.add(Sample::Present(value));
            }
            assert_eq!(mean.sample(), Sample::Present(value));
        }

        let mut mean = RunningMean::default();
        for _ in 0..24 {
            mean.add(Sample::Present(0.1));
        }
        mean.add(Sample::Present(33.3));
        assert_eq!(mean.count(), 25);
        let expected = (24.0 * 0.1 + 33.3) / 25.0;
        assert!((mean.sample().value().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_running_count_restarts_at_local_midnight() {
        // 03:00 to 07:00 UTC with UTC-5: two hours on day 237, three on day 238
        let values = vec![
            vec![Sample::Present(2.0)],
            vec![Sample::Missing],
            vec![Sample::Present(6.0)],
            vec![Sample::Missing],
            vec![Sample::Present(9.0)],
        ];
        let output = hourly(&values, 2005_238_0300, 2005_238_0700);
        let daily = aggregate(&output, AggregationSpan::Daily, -5).unwrap();
        assert_eq!(daily.output.points_per_timestep, vec![1, 1]);
        assert_eq!(daily.contributions, vec![1, 2]);
        assert_eq!(daily.output.points.values, vec![Sample::Present(2.0), Sample::Present(7.5)]);

        // a window holding only missing hours keeps its cell with a zero count
        let values = vec![vec![Sample::Missing], vec![Sample::Present(4.0)]];
        let output = hourly(&values, 2005_238_2300, 2005_239_0000);
        let daily = aggregate(&output, AggregationSpan::Daily, 0).unwrap();
        assert_eq!(daily.contributions, vec![0, 1]);
        assert_eq!(daily.output.points.values, vec![Sample::Missing, Sample::Present(4.0)]);
    }

    #[test]
    fn test_daily_windows_split_at_midnight() {
        // 22:00 day 1 through 01:00 day 2
        let values = vec![
            vec![Sample::Present(1.0)],
            vec![Sample::Present(3.0)],
            vec![Sample::Present(10.0)],
            vec![Sample::Present(20.0)],
        ];
        let output = hourly(&values, 2005_238_2200, 2005_239_0100);
        let daily = aggregate(&output, AggregationSpan::Daily, 0).unwrap();
        assert_eq!(daily.output.points_per_timestep, vec![1, 1]);
        assert_eq!(daily.output.points.values, vec![Sample::Present(2.0), Sample::Present(15.0)]);
        assert_eq!(daily.output.hours_per_timestep, 24);

        // shifted two hours east, all four hours land on day 2
        let shifted = aggregate(&output, AggregationSpan::Daily, 2).unwrap();
        assert_eq!(shifted.output.points_per_timestep, vec![1]);
        assert_eq!(shifted.contributions, vec![4]);
    }

    #[test]
    fn test_whole_period_keeps_first_occurrence_order() {
        let values = vec![
            vec![Sample::Present(1.0), Sample::Present(5.0)],
            vec![Sample::Missing],
            vec![Sample::Present(3.0)],
        ];
        let output = hourly(&values, 2005_238_0000, 2005_238_0200);
        let all = aggregate(&output, AggregationSpan::All, 0).unwrap();
        assert_eq!(all.output.points_per_timestep, vec![2]);
        assert_eq!(all.output.points.columns, vec![1, 2]);
        assert_eq!(all.output.points.values, vec![Sample::Present(2.0), Sample::Present(5.0)]);
        assert_eq!(all.contributions, vec![2, 1]);
        assert_eq!(all.output.hours_per_timestep, 3);
        assert_eq!(all.output.variable_names, vec!["AOD"]);
    }

    #[test]
    fn test_rename_only_once() {
        assert_eq!(renamed("ozone", AggregationSpan::Daily), "daily_ozone");
        assert_eq!(renamed("daily_ozone", AggregationSpan::Daily), "daily_ozone");
        assert_eq!(renamed("ozone", AggregationSpan::All), "ozone");
    }

    #[test]
    fn test_aggregated_output_is_not_aggregated_again() {
        let output = hourly(&[vec![Sample::Present(1.0)]], 2005_238_0000, 2005_238_0000);
        let daily = aggregate(&output, AggregationSpan::Daily, 0).unwrap();
        assert!(aggregate(&daily.output, AggregationSpan::Daily, 0).is_err());
    }
}
