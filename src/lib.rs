//! # HVB thermal analysis
//!
//! Loads the cell temperature channels `moduleTemperature<NN>_BMS<MM>` of an
//! ASAM MDF 4 recording of a high-voltage battery, places them on the cooling
//! plate grid, resamples them with the coolant inlet, outlet and flow
//! sensors on a common time axis and computes the plate statistics and the
//! coolant heat flux frame by frame.
//!
//! ```no_run
//! use hvb_thermal::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default()
//!     .inlet_channel("Coolant_Inlet_Temp")
//!     .outlet_channel("Coolant_Outlet_Temp")
//!     .flow_channel("Coolant_Flow");
//! let run = Pipeline::new(config)?.run("recording.mf4")?;
//! run.summary();
//! # Ok::<(), hvb_thermal::Error>(())
//! ```

pub mod aligner;
pub mod analyzer;
pub mod config;
mod error;
pub mod export;
pub mod extractor;
pub mod layout;
pub mod mdf;
pub mod pipeline;

pub use aligner::{AlignedFrame, Alignment, Fill, TimestampMode};
pub use analyzer::{CellStats, Coolant, FlowUnit, Statistics, StatsSample};
pub use config::{CoveragePolicy, PipelineConfig};
pub use error::{Error, SensorRole, Warning};
pub use extractor::{ChannelRecord, ChannelSelection};
pub use layout::{parse_channel_name, CellId, GridPosition, Layout};
pub use pipeline::{Pipeline, Run};
