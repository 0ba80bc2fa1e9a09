use anyhow::Context;
use hvb_thermal::{export, Fill, FlowUnit, Pipeline, PipelineConfig, TimestampMode};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "hvb-thermal",
    about = "HVB cooling plate temperatures and heat flux from MDF 4 recordings"
)]
struct Opt {
    /// Path to the MDF 4 recording
    path: PathBuf,
    /// JSON configuration file
    #[structopt(short, long)]
    config: Option<PathBuf>,
    /// Coolant inlet temperature channel
    #[structopt(long)]
    inlet: Option<String>,
    /// Coolant outlet temperature channel
    #[structopt(long)]
    outlet: Option<String>,
    /// Coolant flow channel
    #[structopt(long)]
    flow: Option<String>,
    /// Coolant flow channel in L/min
    #[structopt(long)]
    flow_lpm: bool,
    /// Largest gap [s] to the previous sample of a channel
    #[structopt(short = "g", long)]
    max_gap: Option<f64>,
    /// Only keep the time stamps shared by all channels
    #[structopt(long)]
    intersection: bool,
    /// Interpolate the channels linearly between samples
    #[structopt(long)]
    linear: bool,
    /// Minimum number of frames
    #[structopt(long)]
    min_frames: Option<usize>,
    /// Layout table `{"sensor_order": [[NN, "MM"], ...]}`
    #[structopt(short, long)]
    layout: Option<PathBuf>,
    /// Directory to write `frames.csv` and `stats.csv` to
    #[structopt(long)]
    csv: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut config = match &opt.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(arg) = opt.inlet {
        config = config.inlet_channel(arg);
    }
    if let Some(arg) = opt.outlet {
        config = config.outlet_channel(arg);
    }
    if let Some(arg) = opt.flow {
        config = config.flow_channel(arg);
    }
    if opt.flow_lpm {
        config = config.flow_unit(FlowUnit::LitresPerMinute);
    }
    if let Some(arg) = opt.max_gap {
        config = config.max_gap(arg);
    }
    if opt.intersection {
        config = config.timestamp_mode(TimestampMode::Intersection);
    }
    if opt.linear {
        config = config.fill(Fill::Linear);
    }
    if let Some(arg) = opt.min_frames {
        config = config.min_frames(arg);
    }
    if let Some(arg) = opt.layout {
        config = config.layout_table(arg);
    }

    let run = Pipeline::new(config)?
        .run(&opt.path)
        .with_context(|| format!("failed to process {:?}", opt.path))?;
    if !run.warnings.is_empty() {
        println!("WARNINGS:");
        run.warnings.iter().for_each(|w| println!(" - {}", w));
    }
    run.summary();
    let (vmin, vmax) = run.color_range();
    println!(" - color scale: [{:.1}-{:.1}]°C", vmin, vmax);

    if let Some(dir) = opt.csv {
        let [frames, stats] = export::to_csv(&dir, &run.alignment, &run.stats)?;
        println!("CSV: {:?}, {:?}", frames, stats);
    }

    Ok(())
}
