use crate::{
    aligner::AlignError,
    config::ConfigError,
    export::ExportError,
    extractor::{ChannelDecodeError, ExtractError},
    layout::LayoutError,
};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `extractor` module")]
    Extract(#[from] ExtractError),
    #[error("Error in the `layout` module")]
    Layout(#[from] LayoutError),
    #[error("Error in the `aligner` module")]
    Align(#[from] AlignError),
    #[error("Error in the `config` module")]
    Config(#[from] ConfigError),
    #[error("Error in the `export` module")]
    Export(#[from] ExportError),
    #[error("only {mapped} of the {capacity} layout cells have a channel, below the {threshold} coverage threshold")]
    Coverage {
        mapped: usize,
        capacity: usize,
        threshold: f64,
    },
}

/// Coolant sensor channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorRole {
    Inlet,
    Outlet,
    Flow,
}
impl fmt::Display for SensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorRole::Inlet => write!(f, "inlet"),
            SensorRole::Outlet => write!(f, "outlet"),
            SensorRole::Flow => write!(f, "flow"),
        }
    }
}

/// Recoverable problems, reported with the results of a run
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Warning {
    #[error("{0}, channel dropped")]
    ChannelDecode(#[from] ChannelDecodeError),
    #[error("{0} has no cell in the layout, channel dropped")]
    Unmapped(String),
    #[error("{role} channel {channel:?} not found, {role} values are missing")]
    MissingSensor { role: SensorRole, channel: String },
    #[error("only {mapped} of the {capacity} layout cells have a channel")]
    LowCoverage { mapped: usize, capacity: usize },
}
