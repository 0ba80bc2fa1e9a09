//! A measurement file through extraction, mapping, alignment and statistics

use crate::{
    aligner::{self, AlignedFrame, Alignment},
    analyzer::{CellStats, Statistics},
    config::PipelineConfig,
    error::{Error, Warning},
    extractor::{self, Extraction},
    layout::Mapping,
};
use std::{
    io::{Read, Seek},
    path::Path,
    time::Instant,
};

type Result<T> = std::result::Result<T, Error>;

/// Runs the thermal analysis of measurement files
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}
impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
    pub fn run<P: AsRef<Path>>(&self, path: P) -> Result<Run> {
        let extraction = extractor::extract(path, &self.config.selection())?;
        self.process(extraction)
    }
    pub fn run_reader<R: Read + Seek>(&self, reader: R) -> Result<Run> {
        let extraction = extractor::extract_from(reader, &self.config.selection())?;
        self.process(extraction)
    }
    fn process(&self, extraction: Extraction) -> Result<Run> {
        let now = Instant::now();
        let layout = self.config.resolve_layout()?;
        let mapping = layout.map(extraction.names())?;

        let mut warnings = extraction.warnings;
        warnings.extend(mapping.unmapped.iter().cloned().map(Warning::Unmapped));
        let policy = self.config.coverage;
        if mapping.coverage() < policy.min_fraction {
            let capacity = layout.capacity();
            if policy.abort {
                return Err(Error::Coverage {
                    mapped: mapping.len(),
                    capacity,
                    threshold: policy.min_fraction,
                });
            }
            log::warn!(
                "only {} of the {} layout cells have a channel",
                mapping.len(),
                capacity
            );
            warnings.push(Warning::LowCoverage {
                mapped: mapping.len(),
                capacity,
            });
        }

        let alignment = aligner::align(
            &mapping,
            &extraction.cells,
            &extraction.sensors,
            &self.config.align_options(),
        )?;
        let stats = self.config.analyzer().analyze(&alignment);
        log::info!("... pipeline completed in {}ms", now.elapsed().as_millis());
        Ok(Run {
            mapping,
            alignment,
            stats,
            warnings,
            default_color_range: self.config.color_range,
        })
    }
}

/// The results of a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub mapping: Mapping,
    pub alignment: Alignment,
    /// one sample per frame
    pub stats: Statistics,
    pub warnings: Vec<Warning>,
    default_color_range: (f64, f64),
}
impl Run {
    pub fn frames(&self) -> &[AlignedFrame] {
        &self.alignment.frames
    }
    pub fn hottest_frame(&self) -> Option<usize> {
        self.stats.hottest_frame()
    }
    /// Heatmap color scale: the recording temperature range or the configured default
    pub fn color_range(&self) -> (f64, f64) {
        match self.stats.temperature_range() {
            Some((vmin, vmax)) if vmin < vmax => (vmin, vmax),
            _ => self.default_color_range,
        }
    }
    /// Statistics of the layer mean temperatures over the frames, per layer
    pub fn layer_summary(&self) -> Vec<Option<CellStats>> {
        let n_layer = self.stats.first().map_or(0, |s| s.layers.len());
        (0..n_layer)
            .map(|layer| {
                CellStats::from_values(
                    self.stats
                        .iter()
                        .filter_map(|s| s.layers[layer].map(|l| l.mean)),
                )
            })
            .collect()
    }
    /// Prints out a summary of the run
    pub fn summary(&self) {
        let n = |x: Option<f64>| x.map_or_else(|| String::from("n/a"), |x| format!("{:.2}", x));
        let time = self.alignment.time();
        println!("SUMMARY:");
        println!(
            " - # of cell channels: {} ({:.1}% of the layout), {} unmapped",
            self.mapping.len(),
            self.mapping.coverage() * 1e2,
            self.mapping.unmapped.len()
        );
        println!(" - # of frames: {}", time.len());
        if let (Some(first), Some(last)) = (time.first(), time.last()) {
            println!(" - time range: [{:8.3}-{:8.3}]s", first, last);
        }
        let frames = self.frames();
        let has = |f: fn(&AlignedFrame) -> Option<f64>| frames.iter().any(|x| f(x).is_some());
        println!(
            " - sensors: inlet {}, outlet {}, flow {}",
            has(|f| f.inlet),
            has(|f| f.outlet),
            has(|f| f.flow)
        );
        if let Some((vmin, vmax)) = self.stats.temperature_range() {
            println!(" - temperature range: [{:.2}-{:.2}]°C", vmin, vmax);
        }
        println!(" - temperature [°C]:");
        println!(
            "    {:^16}: ({:^12}, {:^12})  ({:^12}, {:^12})",
            "LAYER", "MEAN", "STD", "MIN", "MAX"
        );
        for (layer, stats) in self.layer_summary().into_iter().enumerate() {
            match stats {
                Some(s) => println!(
                    "  - {:16}: {:>12.3?}  {:>12.3?}",
                    layer + 1,
                    (s.mean, s.std),
                    (s.min, s.max)
                ),
                None => println!("  - {:16}: {:?}", layer + 1, None::<f64>),
            }
        }
        if let Some(i) = self.hottest_frame() {
            let sample = &self.stats[i];
            println!(
                " - hottest frame: #{} at {:.3}s, max {}°C, mean {}°C",
                i,
                sample.time,
                n(sample.max()),
                n(sample.mean())
            );
        }
        match self.stats.heat_flux_range() {
            Some((q_min, q_max)) => println!(" - heat flux: [{:.1}-{:.1}]W", q_min, q_max),
            None => println!(" - heat flux: n/a"),
        }
        if !self.warnings.is_empty() {
            println!(" - # of warnings: {}", self.warnings.len());
        }
    }
}
