//! Pipeline configuration
//!
//! The configuration is a JSON file, every field optional:
//! ```json
//! {
//!   "inlet_channel": "Coolant_Inlet_Temp",
//!   "outlet_channel": "Coolant_Outlet_Temp",
//!   "flow_channel": "Coolant_Flow",
//!   "flow_unit": "litres_per_minute",
//!   "max_gap": 2.0,
//!   "timestamp_mode": "union",
//!   "fill": "hold",
//!   "layout_table": "layouts/HVB_340_800_L.json",
//!   "coverage": { "min_fraction": 0.5, "abort": false }
//! }
//! ```

use crate::{
    aligner::{AlignOptions, Fill, TimestampMode},
    analyzer::{Analyzer, Coolant, FlowUnit},
    extractor::ChannelSelection,
    layout::{Layout, LayoutError},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to open the configuration file {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse the configuration file")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid layout")]
    Layout(#[from] LayoutError),
}
type Result<T> = std::result::Result<T, ConfigError>;

/// What to do when too few layout cells have a channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoveragePolicy {
    /// fraction of the layout cells that must have a channel
    pub min_fraction: f64,
    /// fail the run instead of warning
    pub abort: bool,
}
impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            min_fraction: 0.5,
            abort: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inlet_channel: Option<String>,
    pub outlet_channel: Option<String>,
    pub flow_channel: Option<String>,
    /// [s]
    pub max_gap: f64,
    pub timestamp_mode: TimestampMode,
    pub fill: Fill,
    pub min_frames: usize,
    pub flow_unit: FlowUnit,
    pub coolant: Coolant,
    pub layout: Layout,
    /// sensor order table, replaces the naming rule of `layout`
    pub layout_table: Option<PathBuf>,
    pub coverage: CoveragePolicy,
    /// default heatmap color scale [°C]
    pub color_range: (f64, f64),
}
impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inlet_channel: None,
            outlet_channel: None,
            flow_channel: None,
            max_gap: 1.,
            timestamp_mode: TimestampMode::Union,
            fill: Fill::Hold,
            min_frames: 1,
            flow_unit: FlowUnit::default(),
            coolant: Coolant::default(),
            layout: Layout::default(),
            layout_table: None,
            coverage: CoveragePolicy::default(),
            color_range: (15., 40.),
        }
    }
}
impl PipelineConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration {:?}...", path);
        let file = File::open(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
    pub fn inlet_channel<S: Into<String>>(self, name: S) -> Self {
        Self {
            inlet_channel: Some(name.into()),
            ..self
        }
    }
    pub fn outlet_channel<S: Into<String>>(self, name: S) -> Self {
        Self {
            outlet_channel: Some(name.into()),
            ..self
        }
    }
    pub fn flow_channel<S: Into<String>>(self, name: S) -> Self {
        Self {
            flow_channel: Some(name.into()),
            ..self
        }
    }
    pub fn max_gap(self, max_gap: f64) -> Self {
        Self { max_gap, ..self }
    }
    pub fn timestamp_mode(self, timestamp_mode: TimestampMode) -> Self {
        Self {
            timestamp_mode,
            ..self
        }
    }
    pub fn fill(self, fill: Fill) -> Self {
        Self { fill, ..self }
    }
    pub fn min_frames(self, min_frames: usize) -> Self {
        Self { min_frames, ..self }
    }
    pub fn flow_unit(self, flow_unit: FlowUnit) -> Self {
        Self { flow_unit, ..self }
    }
    pub fn coolant(self, coolant: Coolant) -> Self {
        Self { coolant, ..self }
    }
    pub fn layout(self, layout: Layout) -> Self {
        Self { layout, ..self }
    }
    pub fn layout_table<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            layout_table: Some(path.into()),
            ..self
        }
    }
    pub fn coverage(self, coverage: CoveragePolicy) -> Self {
        Self { coverage, ..self }
    }
    pub fn color_range(self, vmin: f64, vmax: f64) -> Self {
        Self {
            color_range: (vmin, vmax),
            ..self
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.max_gap.is_nan() || self.max_gap < 0. {
            return Err(ConfigError::Invalid(format!(
                "max_gap must be positive, found {}",
                self.max_gap
            )));
        }
        if !(0. ..=1.).contains(&self.coverage.min_fraction) {
            return Err(ConfigError::Invalid(format!(
                "coverage fraction must be in [0,1], found {}",
                self.coverage.min_fraction
            )));
        }
        if self.coolant.density <= 0. || self.coolant.specific_heat <= 0. {
            return Err(ConfigError::Invalid(format!(
                "non-physical coolant {:?}",
                self.coolant
            )));
        }
        let (vmin, vmax) = self.color_range;
        if vmin.partial_cmp(&vmax) != Some(std::cmp::Ordering::Less) {
            return Err(ConfigError::Invalid(format!(
                "empty color range [{},{}]",
                vmin, vmax
            )));
        }
        self.layout.validate()?;
        Ok(())
    }
    pub fn selection(&self) -> ChannelSelection {
        ChannelSelection {
            inlet: self.inlet_channel.clone(),
            outlet: self.outlet_channel.clone(),
            flow: self.flow_channel.clone(),
        }
    }
    pub fn align_options(&self) -> AlignOptions {
        AlignOptions {
            max_gap: self.max_gap,
            mode: self.timestamp_mode,
            fill: self.fill,
            min_frames: self.min_frames,
        }
    }
    pub fn analyzer(&self) -> Analyzer {
        Analyzer::new(self.coolant, self.flow_unit)
    }
    /// The layout, read from the layout table if there is one
    pub fn resolve_layout(&self) -> Result<Layout> {
        match &self.layout_table {
            Some(path) => Ok(Layout::from_table(self.layout.grid, path)?),
            None => {
                self.layout.validate()?;
                Ok(self.layout.clone())
            }
        }
    }
}
