//! Temperature channel extraction from a measurement file

use crate::{
    error::{SensorRole, Warning},
    layout::{parse_channel_name, CellId},
    mdf::{ChannelEntry, GroupRecords, Mdf, MdfError},
};
use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid MDF file")]
    FileFormat(#[from] MdfError),
}
type Result<T> = std::result::Result<T, ExtractError>;

/// A channel that could not be decoded
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("failed to decode {channel}: {reason}")]
pub struct ChannelDecodeError {
    pub channel: String,
    pub reason: String,
}

/// Names of the optional coolant sensor channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSelection {
    pub inlet: Option<String>,
    pub outlet: Option<String>,
    pub flow: Option<String>,
}
impl ChannelSelection {
    pub fn sensors(&self) -> impl Iterator<Item = (SensorRole, &str)> {
        [
            (SensorRole::Inlet, &self.inlet),
            (SensorRole::Outlet, &self.outlet),
            (SensorRole::Flow, &self.flow),
        ]
        .into_iter()
        .filter_map(|(role, name)| name.as_deref().map(|name| (role, name)))
    }
    /// The sensor a channel name is selected as, ignoring case
    pub fn role(&self, name: &str) -> Option<SensorRole> {
        self.sensors()
            .find(|(_, sensor)| sensor.eq_ignore_ascii_case(name))
            .map(|(role, _)| role)
    }
}

/// Time series of a channel, in ingestion order
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub name: String,
    pub unit: Option<String>,
    /// `None` for the coolant sensor channels
    pub cell: Option<CellId>,
    /// (time [s], value)
    pub samples: Vec<(f64, f64)>,
}
impl ChannelRecord {
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sensors {
    pub inlet: Option<ChannelRecord>,
    pub outlet: Option<ChannelRecord>,
    pub flow: Option<ChannelRecord>,
}
impl Sensors {
    pub fn get(&self, role: SensorRole) -> Option<&ChannelRecord> {
        match role {
            SensorRole::Inlet => self.inlet.as_ref(),
            SensorRole::Outlet => self.outlet.as_ref(),
            SensorRole::Flow => self.flow.as_ref(),
        }
    }
    fn slot(&mut self, role: SensorRole) -> &mut Option<ChannelRecord> {
        match role {
            SensorRole::Inlet => &mut self.inlet,
            SensorRole::Outlet => &mut self.outlet,
            SensorRole::Flow => &mut self.flow,
        }
    }
}

/// Cell and sensor channels of a file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// cell channels, in order of first appearance in the file
    pub cells: Vec<ChannelRecord>,
    pub sensors: Sensors,
    pub warnings: Vec<Warning>,
}
impl Extraction {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|c| c.name.as_str())
    }
}

enum Target {
    Cell(CellId),
    Sensor(SensorRole),
}

/// Extracts the cell temperature and selected sensor channels of an MDF file
pub fn extract<P: AsRef<Path>>(path: P, selection: &ChannelSelection) -> Result<Extraction> {
    let path = path.as_ref();
    log::info!("Loading {:?}...", path);
    let file = File::open(path).map_err(|source| ExtractError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    extract_from(BufReader::new(file), selection)
}

pub fn extract_from<R: Read + Seek>(reader: R, selection: &ChannelSelection) -> Result<Extraction> {
    let now = Instant::now();
    let mut mdf = Mdf::from_reader(reader)?;
    let entries = mdf.list_channels();
    let n_channel = entries.len();
    let selected: Vec<(ChannelEntry, Target)> = entries
        .into_iter()
        .filter(|entry| !entry.is_master)
        .filter_map(|entry| {
            let target = match selection.role(&entry.name) {
                Some(role) => Target::Sensor(role),
                None => Target::Cell(parse_channel_name(&entry.name)?),
            };
            Some((entry, target))
        })
        .collect();
    log::info!("{} of {} channels selected", selected.len(), n_channel);

    let mut extraction = Extraction::default();
    let mut cell_index: HashMap<String, usize> = HashMap::new();
    let groups: BTreeSet<usize> = selected.iter().map(|(entry, _)| entry.group).collect();
    for group in groups {
        let in_group = || selected.iter().filter(move |(entry, _)| entry.group == group);
        let records = match mdf.group_records(group) {
            Ok(records) => records,
            Err(e) => {
                for (entry, _) in in_group() {
                    let warning = ChannelDecodeError {
                        channel: entry.name.clone(),
                        reason: e.to_string(),
                    };
                    log::warn!("{}", warning);
                    extraction.warnings.push(warning.into());
                }
                continue;
            }
        };
        let mut masters = HashMap::new();
        for (entry, target) in in_group() {
            let samples = match samples(&mut mdf, &records, entry, &mut masters) {
                Ok(samples) => samples,
                Err(e) => {
                    let warning = ChannelDecodeError {
                        channel: entry.name.clone(),
                        reason: e.to_string(),
                    };
                    log::warn!("{}", warning);
                    extraction.warnings.push(warning.into());
                    continue;
                }
            };
            let record = match target {
                Target::Cell(cell) => {
                    let cells = &mut extraction.cells;
                    let i = *cell_index.entry(entry.name.clone()).or_insert_with(|| {
                        cells.push(ChannelRecord {
                            name: entry.name.clone(),
                            unit: entry.unit.clone(),
                            cell: Some(*cell),
                            samples: vec![],
                        });
                        cells.len() - 1
                    });
                    &mut cells[i]
                }
                Target::Sensor(role) => {
                    extraction
                        .sensors
                        .slot(*role)
                        .get_or_insert_with(|| ChannelRecord {
                            name: entry.name.clone(),
                            unit: entry.unit.clone(),
                            cell: None,
                            samples: vec![],
                        })
                }
            };
            record.samples.extend(samples);
        }
    }

    let mut empty = vec![];
    extraction.cells.retain(|c| {
        if c.is_empty() {
            empty.push(c.name.clone());
        }
        !c.is_empty()
    });
    for role in [SensorRole::Inlet, SensorRole::Outlet, SensorRole::Flow] {
        let slot = extraction.sensors.slot(role);
        if slot.as_ref().map_or(false, ChannelRecord::is_empty) {
            empty.extend(slot.take().map(|c| c.name));
        }
    }
    for channel in empty {
        let warning = ChannelDecodeError {
            channel,
            reason: "no valid samples".into(),
        };
        log::warn!("{}", warning);
        extraction.warnings.push(warning.into());
    }

    for (role, name) in selection.sensors() {
        if extraction.sensors.get(role).is_none() {
            log::warn!("{} channel {:?} not found", role, name);
            extraction.warnings.push(Warning::MissingSensor {
                role,
                channel: name.to_string(),
            });
        }
    }
    log::info!(
        "... {} cell channels extracted in {}ms",
        extraction.cells.len(),
        now.elapsed().as_millis()
    );
    Ok(extraction)
}

/// Valid, finite (time, value) samples of a channel
fn samples<R: Read + Seek>(
    mdf: &mut Mdf<R>,
    records: &GroupRecords,
    entry: &ChannelEntry,
    masters: &mut HashMap<usize, Vec<f64>>,
) -> std::result::Result<Vec<(f64, f64)>, MdfError> {
    if !masters.contains_key(&entry.channel_group) {
        let time = mdf.master(records, entry.channel_group)?;
        masters.insert(entry.channel_group, time);
    }
    let values = mdf.values(records, entry)?;
    let time = &masters[&entry.channel_group];
    Ok(time
        .iter()
        .zip(values)
        .filter_map(|(&t, value)| value.map(|v| (t, v)))
        .filter(|(t, v)| t.is_finite() && v.is_finite())
        .collect())
}
