//! Resampling of the cell and sensor channels on a common time axis

use crate::{
    extractor::{ChannelRecord, Sensors},
    layout::{Grid, GridPosition, MappedChannel, Mapping},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Instant};

#[derive(thiserror::Error, Debug)]
pub enum AlignError {
    #[error("{found} distinct time stamps, at least {required} required")]
    InsufficientData { found: usize, required: usize },
    #[error("invalid maximum sample gap: {0}s")]
    MaxGap(f64),
}
type Result<T> = std::result::Result<T, AlignError>;

/// How the common time axis is built from the channels time stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    #[default]
    Union,
    Intersection,
}

/// How a channel value is picked at a time stamp of the axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    /// last sample at or before the time stamp
    #[default]
    Hold,
    /// interpolation between the samples on both sides of the time stamp
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignOptions {
    /// largest distance [s] to a sample for a value to be defined
    pub max_gap: f64,
    pub mode: TimestampMode,
    pub fill: Fill,
    pub min_frames: usize,
}
impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            max_gap: 1.,
            mode: TimestampMode::default(),
            fill: Fill::default(),
            min_frames: 1,
        }
    }
}

/// The plate temperatures and coolant sensor values at one time stamp
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame {
    pub time: f64,
    /// row-major grid of cell temperatures
    pub cells: Vec<Option<f64>>,
    pub inlet: Option<f64>,
    pub outlet: Option<f64>,
    pub flow: Option<f64>,
}
impl AlignedFrame {
    pub fn cell(&self, grid: &Grid, position: GridPosition) -> Option<f64> {
        self.cells.get(grid.index(position)).copied().flatten()
    }
    pub fn populated(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub grid: Grid,
    /// the mapped cell channels, in grid order
    pub channels: Vec<MappedChannel>,
    pub frames: Vec<AlignedFrame>,
}
impl Alignment {
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    pub fn time(&self) -> Vec<f64> {
        self.frames.iter().map(|f| f.time).collect()
    }
    /// The aligned values of a cell channel
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let channel = self.channels.iter().find(|c| c.name == name)?;
        let index = self.grid.index(channel.position);
        Some(self.frames.iter().map(|f| f.cells[index]).collect())
    }
}

/// Samples sorted by time, the last ingested sample kept for a repeated time stamp
#[derive(Debug, Default)]
struct Series {
    time: Vec<f64>,
    value: Vec<f64>,
}
impl Series {
    fn new(samples: &[(f64, f64)]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut series = Series::default();
        for (t, v) in sorted {
            if let (Some(&last), Some(value)) = (series.time.last(), series.value.last_mut()) {
                if last == t {
                    *value = v;
                    continue;
                }
            }
            series.time.push(t);
            series.value.push(v);
        }
        series
    }
    fn contains(&self, t: f64) -> bool {
        self.time.binary_search_by(|x| x.total_cmp(&t)).is_ok()
    }
}

/// Reads a series at increasing time stamps
struct Sampler<'a> {
    series: &'a Series,
    // first sample after the current time stamp
    next: usize,
}
impl<'a> Sampler<'a> {
    fn new(series: &'a Series) -> Self {
        Self { series, next: 0 }
    }
    fn at(&mut self, t: f64, options: &AlignOptions) -> Option<f64> {
        let Series { time, value } = self.series;
        while self.next < time.len() && time[self.next] <= t {
            self.next += 1;
        }
        let before = self.next.checked_sub(1)?;
        let (t0, v0) = (time[before], value[before]);
        if t - t0 > options.max_gap {
            return None;
        }
        if t0 == t || options.fill == Fill::Hold {
            return Some(v0);
        }
        match time.get(self.next) {
            Some(&t1) if t1 - t <= options.max_gap => {
                let v1 = value[self.next];
                Some(v0 + (v1 - v0) * (t - t0) / (t1 - t0))
            }
            _ => Some(v0),
        }
    }
}

fn axis(series: &[&Series], mode: TimestampMode) -> Vec<f64> {
    let mut time: Vec<f64> = match mode {
        TimestampMode::Union => series.iter().flat_map(|s| s.time.iter().copied()).collect(),
        TimestampMode::Intersection => match series.split_first() {
            Some((first, others)) => first
                .time
                .iter()
                .copied()
                .filter(|&t| others.iter().all(|s| s.contains(t)))
                .collect(),
            None => vec![],
        },
    };
    time.sort_by(|a, b| a.total_cmp(b));
    time.dedup();
    time
}

/// Aligns the mapped cell channels and the coolant sensors on a common time axis
///
/// `cells` are looked up by the names of the mapped channels; cell channels
/// without a place on the grid are left out.
pub fn align(
    mapping: &Mapping,
    cells: &[ChannelRecord],
    sensors: &Sensors,
    options: &AlignOptions,
) -> Result<Alignment> {
    if options.max_gap.is_nan() || options.max_gap < 0. {
        return Err(AlignError::MaxGap(options.max_gap));
    }
    let now = Instant::now();
    let records: HashMap<&str, &ChannelRecord> =
        cells.iter().map(|r| (r.name.as_str(), r)).collect();
    let cell_series: Vec<(usize, Series)> = mapping
        .channels
        .iter()
        .map(|c| {
            let series = records
                .get(c.name.as_str())
                .map(|r| Series::new(&r.samples))
                .unwrap_or_default();
            (mapping.grid.index(c.position), series)
        })
        .collect();
    let sensor_series: [Option<Series>; 3] = [&sensors.inlet, &sensors.outlet, &sensors.flow]
        .map(|record| record.as_ref().map(|r| Series::new(&r.samples)));

    let all: Vec<&Series> = cell_series
        .iter()
        .map(|(_, s)| s)
        .chain(sensor_series.iter().flatten())
        .collect();
    let time = axis(&all, options.mode);
    let required = options.min_frames.max(1);
    if time.len() < required {
        return Err(AlignError::InsufficientData {
            found: time.len(),
            required,
        });
    }

    let mut cell_samplers: Vec<(usize, Sampler)> = cell_series
        .iter()
        .map(|(index, series)| (*index, Sampler::new(series)))
        .collect();
    let mut sensor_samplers = sensor_series.each_ref().map(|s| s.as_ref().map(Sampler::new));
    let frames: Vec<AlignedFrame> = time
        .into_iter()
        .map(|t| {
            let mut frame_cells = vec![None; mapping.grid.cell_count()];
            for (index, sampler) in cell_samplers.iter_mut() {
                frame_cells[*index] = sampler.at(t, options);
            }
            let [inlet, outlet, flow] = sensor_samplers
                .each_mut()
                .map(|s| s.as_mut().and_then(|s| s.at(t, options)));
            AlignedFrame {
                time: t,
                cells: frame_cells,
                inlet,
                outlet,
                flow,
            }
        })
        .collect();
    log::info!(
        "{} frames aligned in {}ms",
        frames.len(),
        now.elapsed().as_millis()
    );
    Ok(Alignment {
        grid: mapping.grid,
        channels: mapping.channels.clone(),
        frames,
    })
}
