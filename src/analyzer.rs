//! Plate temperature statistics and coolant heat flux

use crate::{
    aligner::{AlignedFrame, Alignment},
    layout::Grid,
};
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Coolant physical properties
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coolant {
    /// density [kg/m^3]
    pub density: f64,
    /// specific heat capacity [J/(kg.K)]
    pub specific_heat: f64,
}
impl Coolant {
    pub const WATER: Coolant = Coolant {
        density: 1000.,
        specific_heat: 4186.,
    };
    pub const GLYCOL: Coolant = Coolant {
        density: 1070.,
        specific_heat: 3350.,
    };
    /// Mixture with a volume `fraction` of `other`
    pub fn mixture(&self, other: &Coolant, fraction: f64) -> Self {
        let density = (1. - fraction) * self.density + fraction * other.density;
        let heat_capacity = (1. - fraction) * self.volumetric_heat_capacity()
            + fraction * other.volumetric_heat_capacity();
        Self {
            density,
            specific_heat: heat_capacity / density,
        }
    }
    pub fn water_glycol(glycol_fraction: f64) -> Self {
        Coolant::WATER.mixture(&Coolant::GLYCOL, glycol_fraction)
    }
    /// ρ c_p [J/(m^3.K)]
    pub fn volumetric_heat_capacity(&self) -> f64 {
        self.density * self.specific_heat
    }
}
impl Default for Coolant {
    fn default() -> Self {
        Coolant::water_glycol(0.5)
    }
}

/// Unit of the flow channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowUnit {
    #[default]
    CubicMetresPerSecond,
    LitresPerSecond,
    LitresPerMinute,
}
impl FlowUnit {
    pub fn to_cubic_metres_per_second(&self, flow: f64) -> f64 {
        match self {
            FlowUnit::CubicMetresPerSecond => flow,
            FlowUnit::LitresPerSecond => flow * 1e-3,
            FlowUnit::LitresPerMinute => flow * 1e-3 / 60.,
        }
    }
}

/// Heat flux [W] carried away by the coolant
///
/// `flow` is in m^3/s and the temperatures in K or °C
pub fn heat_flux(flow: f64, inlet: f64, outlet: f64, coolant: &Coolant) -> f64 {
    flow * coolant.density * coolant.specific_heat * (outlet - inlet)
}

/// Statistics of a set of cell temperatures
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// max - min
    pub spread: f64,
    /// population standard deviation
    pub std: f64,
    pub count: usize,
}
impl CellStats {
    /// `None` without any value
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        let (min, max) = values
            .iter()
            .copied()
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()?;
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|x| x - mean).fold(0f64, |s, x| s + x * x) / n).sqrt();
        Some(Self {
            min,
            max,
            mean,
            spread: max - min,
            std,
            count: values.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    pub time: f64,
    /// statistics of the whole plate
    pub cells: Option<CellStats>,
    pub layers: Vec<Option<CellStats>>,
    /// range of the layer mean temperatures
    pub layer_spread: Option<f64>,
    /// [W]
    pub heat_flux: Option<f64>,
}
impl StatsSample {
    /// Number of cells with a temperature
    pub fn populated(&self) -> usize {
        self.cells.map_or(0, |c| c.count)
    }
    pub fn min(&self) -> Option<f64> {
        self.cells.map(|c| c.min)
    }
    pub fn max(&self) -> Option<f64> {
        self.cells.map(|c| c.max)
    }
    pub fn mean(&self) -> Option<f64> {
        self.cells.map(|c| c.mean)
    }
    pub fn spread(&self) -> Option<f64> {
        self.cells.map(|c| c.spread)
    }
    pub fn std(&self) -> Option<f64> {
        self.cells.map(|c| c.std)
    }
}

/// The statistics of all the frames of a recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics(pub Vec<StatsSample>);
impl std::ops::Deref for Statistics {
    type Target = Vec<StatsSample>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Statistics {
    /// Index of the frame with the highest cell temperature, the first one on ties
    pub fn hottest_frame(&self) -> Option<usize> {
        self.iter()
            .enumerate()
            .filter_map(|(i, s)| s.max().map(|max| (i, max)))
            .reduce(|hottest, x| if x.1 > hottest.1 { x } else { hottest })
            .map(|(i, _)| i)
    }
    /// Lowest and highest cell temperatures of the recording
    pub fn temperature_range(&self) -> Option<(f64, f64)> {
        self.iter()
            .filter_map(|s| s.cells)
            .flat_map(|c| [c.min, c.max])
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()
    }
    pub fn heat_flux_range(&self) -> Option<(f64, f64)> {
        match self
            .iter()
            .filter_map(|s| s.heat_flux)
            .minmax_by(|a, b| a.total_cmp(b))
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(q) => Some((q, q)),
            MinMaxResult::MinMax(q_min, q_max) => Some((q_min, q_max)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Analyzer {
    coolant: Coolant,
    flow_unit: FlowUnit,
}
impl Analyzer {
    pub fn new(coolant: Coolant, flow_unit: FlowUnit) -> Self {
        Self { coolant, flow_unit }
    }
    pub fn frame(&self, grid: &Grid, frame: &AlignedFrame) -> StatsSample {
        let mut layers = vec![vec![]; grid.layer_count()];
        for (index, value) in frame.cells.iter().enumerate() {
            if let Some(value) = value {
                layers[grid.layer_of(grid.position(index))].push(*value);
            }
        }
        let layers: Vec<_> = layers.into_iter().map(CellStats::from_values).collect();
        let layer_spread = layers
            .iter()
            .flatten()
            .map(|l| l.mean)
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()
            .map(|(min, max)| max - min);
        let heat_flux = match (frame.flow, frame.inlet, frame.outlet) {
            (Some(flow), Some(inlet), Some(outlet)) => Some(heat_flux(
                self.flow_unit.to_cubic_metres_per_second(flow),
                inlet,
                outlet,
                &self.coolant,
            )),
            _ => None,
        };
        StatsSample {
            time: frame.time,
            cells: CellStats::from_values(frame.cells.iter().flatten().copied()),
            layers,
            layer_spread,
            heat_flux,
        }
    }
    pub fn analyze(&self, alignment: &Alignment) -> Statistics {
        let now = Instant::now();
        let stats = Statistics(
            alignment
                .frames
                .iter()
                .map(|frame| self.frame(&alignment.grid, frame))
                .collect(),
        );
        log::info!(
            "statistics of {} frames computed in {}ms",
            stats.len(),
            now.elapsed().as_millis()
        );
        stats
    }
}
