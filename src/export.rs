//! CSV export of the aligned frames and of their statistics
//!
//! Missing values are written as empty fields.

use crate::{aligner::Alignment, analyzer::Statistics};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("failed to create {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to write the CSV records")]
    Csv(#[from] csv::Error),
    #[error("{frames} frames but {stats} statistics samples")]
    Length { frames: usize, stats: usize },
}
type Result<T> = std::result::Result<T, ExportError>;

fn field(value: Option<f64>) -> String {
    value.map_or_else(String::new, |x| format!("{}", x))
}

/// Writes one row per frame: time, coolant sensors and the cell channels in grid order
pub fn write_frames<W: Write>(writer: W, alignment: &Alignment) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut keys = vec![
        String::from("Time [s]"),
        String::from("Inlet [°C]"),
        String::from("Outlet [°C]"),
        String::from("Flow"),
    ];
    keys.extend(alignment.channels.iter().map(|c| c.name.clone()));
    wtr.write_record(&keys)?;
    let indices: Vec<usize> = alignment
        .channels
        .iter()
        .map(|c| alignment.grid.index(c.position))
        .collect();
    for frame in &alignment.frames {
        let mut record = vec![
            format!("{}", frame.time),
            field(frame.inlet),
            field(frame.outlet),
            field(frame.flow),
        ];
        record.extend(indices.iter().map(|&i| field(frame.cells[i])));
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes one row of statistics per frame
pub fn write_stats<W: Write>(writer: W, stats: &Statistics) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let n_layer = stats.first().map_or(0, |s| s.layers.len());
    let mut keys: Vec<String> = [
        "Time [s]",
        "Min [°C]",
        "Max [°C]",
        "Mean [°C]",
        "Spread [°C]",
        "Std [°C]",
        "Populated cells",
        "Layer spread [°C]",
        "Heat flux [W]",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    keys.extend((1..=n_layer).map(|i| format!("Layer {} mean [°C]", i)));
    wtr.write_record(&keys)?;
    for sample in stats.iter() {
        let mut record = vec![
            format!("{}", sample.time),
            field(sample.min()),
            field(sample.max()),
            field(sample.mean()),
            field(sample.spread()),
            field(sample.std()),
            format!("{}", sample.populated()),
            field(sample.layer_spread),
            field(sample.heat_flux),
        ];
        record.extend(sample.layers.iter().map(|l| field(l.map(|l| l.mean))));
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes `frames.csv` and `stats.csv` into `dir`, creating it if needed
pub fn to_csv<P: AsRef<Path>>(
    dir: P,
    alignment: &Alignment,
    stats: &Statistics,
) -> Result<[PathBuf; 2]> {
    if alignment.len() != stats.len() {
        return Err(ExportError::Length {
            frames: alignment.len(),
            stats: stats.len(),
        });
    }
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| ExportError::Io(dir.to_path_buf(), e))?;
    let frames_path = dir.join("frames.csv");
    let file = fs::File::create(&frames_path).map_err(|e| ExportError::Io(frames_path.clone(), e))?;
    write_frames(file, alignment)?;
    let stats_path = dir.join("stats.csv");
    let file = fs::File::create(&stats_path).map_err(|e| ExportError::Io(stats_path.clone(), e))?;
    write_stats(file, stats)?;
    log::info!("CSV files written to {:?}", dir);
    Ok([frames_path, stats_path])
}
