//! ASAM MDF 4 measurement file reader
//!
//! Only the subset needed to pull numeric, time-indexed channels out of a
//! closed recording is supported: the HD → DG → CG → CN block chains, TX/MD
//! names and units, identity/linear/rational conversions, DT, DZ, DL and HL
//! data blocks, sorted and unsorted data groups and invalidation bits.
//!
//! Opening a file walks the block index once; record data is only read on
//! request, one data group at a time.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
    time::Instant,
};

mod block;
mod data;
mod decode;
#[cfg(test)]
pub(crate) mod fixture;

use block::{BlockReader, Channel, ChannelGroup, DataGroup};
pub use data::GroupRecords;

#[derive(thiserror::Error, Debug)]
pub enum MdfError {
    #[error("failed to read the MDF file")]
    Io(#[from] std::io::Error),
    #[error("not an MDF file (file identifier {0:?})")]
    NotMdf(String),
    #[error("the MDF file was not finalized by the logger")]
    Unfinalized,
    #[error("unsupported MDF version {0}, expected 4.x")]
    Version(u16),
    #[error("expected a {expected} block at {offset:#x}, found {found:?}")]
    BlockId {
        expected: String,
        found: String,
        offset: u64,
    },
    #[error("block at {0:#x} is truncated")]
    Truncated(u64),
    #[error("link {link:#x} points outside of the file ({size} bytes)")]
    Link { link: u64, size: u64 },
    #[error("block chain loops back to {0:#x}")]
    Cycle(u64),
    #[error("failed to inflate the DZ block at {0:#x}")]
    Inflate(u64, #[source] std::io::Error),
    #[error("unsupported DZ compression {0}")]
    Compression(u8),
    #[error("sorted data group holds {0} channel groups")]
    ChannelGroups(usize),
    #[error("record id {0} does not belong to any channel group")]
    RecordId(u64),
    #[error("data block holds {found} bytes, {expected} expected for the channel group records")]
    ShortData { expected: usize, found: usize },
    #[error("unsupported channel data type {0} (not numeric)")]
    DataType(u8),
    #[error("unsupported {bits} bit width for data type {data_type}")]
    BitCount { data_type: u8, bits: u32 },
    #[error("channel bytes {start}..{end} exceed the {size} bytes record")]
    RecordLayout { start: usize, end: usize, size: usize },
    #[error("unsupported conversion type {0}")]
    Conversion(u8),
    #[error("conversion type {cc_type} needs {expected} parameters, found {found}")]
    ConversionParameters {
        cc_type: u8,
        expected: usize,
        found: usize,
    },
    #[error("channel group has no time master channel")]
    NoTimeMaster,
}
type Result<T> = std::result::Result<T, MdfError>;

/// Location and description of a channel in the file
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    pub name: String,
    pub unit: Option<String>,
    /// MDF `cn_data_type`
    pub data_type: u8,
    pub is_master: bool,
    /// data group index
    pub group: usize,
    /// channel group index within the data group
    pub channel_group: usize,
    /// channel index within the channel group
    pub channel: usize,
}
impl ChannelEntry {
    /// Integer and floating point channels
    pub fn is_numeric(&self) -> bool {
        self.data_type <= 5
    }
}

/// An opened MDF 4 file
pub struct Mdf<R> {
    reader: BlockReader<R>,
    version: u16,
    groups: Vec<DataGroup>,
}
impl Mdf<BufReader<File>> {
    /// Opens the file and reads its block index
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        log::info!("Loading {:?}...", path.as_ref());
        Self::from_reader(BufReader::new(file))
    }
}
impl<R: Read + Seek> Mdf<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let now = Instant::now();
        let mut reader = BlockReader::new(reader)?;
        let version = reader.identification()?;
        let header = reader.block(64, &["HD"])?;

        let mut visited = HashSet::new();
        let mut groups = vec![];
        let mut dg_link = header.link(0);
        while dg_link != 0 {
            if !visited.insert(dg_link) {
                return Err(MdfError::Cycle(dg_link));
            }
            let (mut data_group, next) = DataGroup::read(&mut reader, dg_link)?;
            let mut cg_link = data_group.first_channel_group;
            while cg_link != 0 {
                if !visited.insert(cg_link) {
                    return Err(MdfError::Cycle(cg_link));
                }
                let (mut channel_group, next) = ChannelGroup::read(&mut reader, cg_link)?;
                let mut cn_link = channel_group.first_channel;
                while cn_link != 0 {
                    if !visited.insert(cn_link) {
                        return Err(MdfError::Cycle(cn_link));
                    }
                    let (channel, next) = Channel::read(&mut reader, cn_link)?;
                    channel_group.channels.push(channel);
                    cn_link = next;
                }
                data_group.channel_groups.push(channel_group);
                cg_link = next;
            }
            groups.push(data_group);
            dg_link = next;
        }
        log::info!(
            "... MDF {} index with {} data groups read in {}ms",
            version,
            groups.len(),
            now.elapsed().as_millis()
        );
        Ok(Self {
            reader,
            version,
            groups,
        })
    }
    /// MDF version number, e.g. 410
    pub fn version(&self) -> u16 {
        self.version
    }
    /// Number of data groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
    /// Lists all channels without reading any record data
    pub fn list_channels(&self) -> Vec<ChannelEntry> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(group, dg)| {
                dg.channel_groups
                    .iter()
                    .enumerate()
                    .flat_map(move |(channel_group, cg)| {
                        cg.channels
                            .iter()
                            .enumerate()
                            .map(move |(channel, cn)| ChannelEntry {
                                name: cn.name.clone(),
                                unit: cn.unit.clone(),
                                data_type: cn.data_type,
                                is_master: cn.is_time_master(),
                                group,
                                channel_group,
                                channel,
                            })
                    })
            })
            .collect()
    }
    /// Reads and splits the records of one data group
    pub fn group_records(&mut self, group: usize) -> Result<GroupRecords> {
        let dg = &self.groups[group];
        let bytes = data::read_data(&mut self.reader, dg.data)?;
        log::debug!("data group #{}: {} bytes of records", group, bytes.len());
        GroupRecords::split(group, dg, bytes)
    }
    /// Time stamps [s] of the records of a channel group
    pub fn master(&mut self, records: &GroupRecords, channel_group: usize) -> Result<Vec<f64>> {
        let cg = &records.channel_groups[channel_group];
        let channels = &self.groups[records.group].channel_groups[channel_group].channels;
        let master = channels
            .iter()
            .find(|cn| cn.is_time_master())
            .ok_or(MdfError::NoTimeMaster)?;
        let conversion = decode::Conversion::read(&mut self.reader, master.conversion)?;
        if master.is_virtual() {
            Ok((0..cg.len())
                .map(|i| conversion.apply(i as f64))
                .collect())
        } else {
            cg.iter()
                .map(|record| decode::raw_value(record, master).map(|x| conversion.apply(x)))
                .collect()
        }
    }
    /// Physical values of a channel, `None` where the record invalidation bit is set
    pub fn values(
        &mut self,
        records: &GroupRecords,
        entry: &ChannelEntry,
    ) -> Result<Vec<Option<f64>>> {
        let cg = &records.channel_groups[entry.channel_group];
        let channel =
            &self.groups[entry.group].channel_groups[entry.channel_group].channels[entry.channel];
        let conversion = decode::Conversion::read(&mut self.reader, channel.conversion)?;
        cg.iter()
            .map(|record| {
                if decode::is_invalid(record, channel, cg.data_bytes) {
                    Ok(None)
                } else {
                    decode::raw_value(record, channel).map(|x| Some(conversion.apply(x)))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{FixtureChannel, FixtureGroup, MdfFixture, Storage};
    use super::*;
    use std::{error::Error, io::Cursor};

    fn open(bytes: Vec<u8>) -> Result<Mdf<Cursor<Vec<u8>>>> {
        Mdf::from_reader(Cursor::new(bytes))
    }

    fn decode_all(bytes: Vec<u8>) -> std::result::Result<Vec<(String, Vec<(f64, Option<f64>)>)>, Box<dyn Error>> {
        let mut mdf = open(bytes)?;
        let entries = mdf.list_channels();
        let mut signals = vec![];
        for group in 0..mdf.len() {
            let records = mdf.group_records(group)?;
            for entry in entries.iter().filter(|e| e.group == group && !e.is_master) {
                let time = mdf.master(&records, entry.channel_group)?;
                let values = mdf.values(&records, entry)?;
                signals.push((entry.name.clone(), time.into_iter().zip(values).collect()));
            }
        }
        Ok(signals)
    }

    #[test]
    fn list_channels() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .group(
                FixtureGroup::new(vec![0., 1.])
                    .channel(FixtureChannel::float("moduleTemperature01_BMS01", vec![25., 26.]).unit("°C"))
                    .channel(FixtureChannel::bytes("vin")),
            )
            .group(FixtureGroup::new(vec![0.5]).channel(FixtureChannel::float("inlet", vec![20.])))
            .build();
        let mdf = open(bytes)?;
        assert_eq!(mdf.version(), 410);
        assert_eq!(mdf.len(), 2);
        let entries = mdf.list_channels();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["time", "moduleTemperature01_BMS01", "vin", "time", "inlet"]);
        assert!(entries[0].is_master);
        assert_eq!(entries[1].unit.as_deref(), Some("°C"));
        assert!(entries[1].is_numeric());
        assert!(!entries[2].is_numeric());
        assert_eq!((entries[4].group, entries[4].channel), (1, 1));
        Ok(())
    }

    #[test]
    fn float_and_linear_channels() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .group(
                FixtureGroup::new(vec![0., 0.1, 0.2])
                    .channel(FixtureChannel::float("a", vec![1.5, -2., 3.25]))
                    .channel(FixtureChannel::linear("b", vec![0, 10, 400], -40., 0.1)),
            )
            .build();
        let signals = decode_all(bytes)?;
        assert_eq!(
            signals[0],
            ("a".to_string(), vec![(0., Some(1.5)), (0.1, Some(-2.)), (0.2, Some(3.25))])
        );
        let (_, b) = &signals[1];
        let expected = [-40., -39., 0.];
        for ((_, value), x) in b.iter().zip(expected) {
            assert!((value.unwrap() - x).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn compressed_and_listed_data() -> std::result::Result<(), Box<dyn Error>> {
        let time: Vec<f64> = (0..50).map(|i| i as f64 * 0.5).collect();
        let values: Vec<f64> = (0..50).map(|i| 20. + i as f64 / 10.).collect();
        for storage in [
            Storage::ValueBlock,
            Storage::Deflate,
            Storage::Transposed,
            Storage::Listed,
            Storage::HeaderList,
        ] {
            let bytes = MdfFixture::default()
                .group(
                    FixtureGroup::new(time.clone())
                        .channel(FixtureChannel::float("t", values.clone()))
                        .storage(storage),
                )
                .build();
            let signals = decode_all(bytes)?;
            let decoded: Vec<_> = signals[0].1.iter().map(|(_, v)| v.unwrap()).collect();
            assert_eq!(decoded, values, "{:?}", storage);
        }
        Ok(())
    }

    #[test]
    fn transposed_data_with_tail() -> std::result::Result<(), Box<dyn Error>> {
        // 50 records of 16 bytes over 24 columns: 8 bytes left untransposed
        let time: Vec<f64> = (0..50).map(f64::from).collect();
        let values: Vec<f64> = (0..50).map(|i| 30. - i as f64 / 4.).collect();
        let bytes = MdfFixture::default()
            .group(
                FixtureGroup::new(time.clone())
                    .channel(FixtureChannel::float("t", values.clone()))
                    .storage(Storage::TransposedColumns(24)),
            )
            .build();
        let signals = decode_all(bytes)?;
        let expected: Vec<_> = time.into_iter().zip(values.into_iter().map(Some)).collect();
        assert_eq!(signals[0].1, expected);
        Ok(())
    }

    #[test]
    fn invalidation_bits() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .group(
                FixtureGroup::new(vec![0., 1., 2.]).channel(
                    FixtureChannel::float("a", vec![1., 2., 3.]).invalid(vec![false, true, false]),
                ),
            )
            .build();
        let signals = decode_all(bytes)?;
        let values: Vec<_> = signals[0].1.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![Some(1.), None, Some(3.)]);
        Ok(())
    }

    #[test]
    fn unsorted_data_group() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .unsorted(vec![
                FixtureGroup::new(vec![0., 1., 2.]).channel(FixtureChannel::float("fast", vec![1., 2., 3.])),
                FixtureGroup::new(vec![0., 2.]).channel(FixtureChannel::linear("slow", vec![5, 7], 0., 1.)),
            ])
            .build();
        let signals = decode_all(bytes)?;
        assert_eq!(signals[0].1, vec![(0., Some(1.)), (1., Some(2.)), (2., Some(3.))]);
        assert_eq!(signals[1].1, vec![(0., Some(5.)), (2., Some(7.))]);
        Ok(())
    }

    #[test]
    fn unsorted_data_group_with_signal_data() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .unsorted(vec![
                FixtureGroup::new(vec![0., 1., 2.]).channel(FixtureChannel::float("fast", vec![1., 2., 3.])),
                FixtureGroup::vlsd(vec![b"BMS01 ok".to_vec(), vec![], b"x".to_vec()]),
                FixtureGroup::new(vec![0., 2.]).channel(FixtureChannel::linear("slow", vec![5, 7], 0., 1.)),
            ])
            .build();
        let signals = decode_all(bytes)?;
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0], ("fast".to_string(), vec![(0., Some(1.)), (1., Some(2.)), (2., Some(3.))]));
        assert_eq!(signals[1], ("slow".to_string(), vec![(0., Some(5.)), (2., Some(7.))]));
        Ok(())
    }

    #[test]
    fn non_numeric_channel_fails_alone() -> std::result::Result<(), Box<dyn Error>> {
        let bytes = MdfFixture::default()
            .group(
                FixtureGroup::new(vec![0.])
                    .channel(FixtureChannel::bytes("vin"))
                    .channel(FixtureChannel::float("a", vec![1.])),
            )
            .build();
        let mut mdf = open(bytes)?;
        let entries = mdf.list_channels();
        let records = mdf.group_records(0)?;
        assert!(matches!(
            mdf.values(&records, &entries[1]),
            Err(MdfError::DataType(10))
        ));
        assert_eq!(mdf.values(&records, &entries[2])?, vec![Some(1.)]);
        Ok(())
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(
            open(b"PK\x03\x04 definitely not a measurement".to_vec()),
            Err(MdfError::NotMdf(_)) | Err(MdfError::Truncated(_))
        ));
        let mut bytes = vec![0u8; 64];
        bytes[..8].copy_from_slice(b"XYZ     ");
        assert!(matches!(open(bytes), Err(MdfError::NotMdf(_))));
    }

    #[test]
    fn rejects_corrupt_index() {
        let mut bytes = MdfFixture::default()
            .group(FixtureGroup::new(vec![0.]).channel(FixtureChannel::float("a", vec![1.])))
            .build();
        // first DG link of the HD block
        bytes[88..96].copy_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(open(bytes), Err(MdfError::Link { .. })));
    }

    #[test]
    fn rejects_wrong_block_in_chain() {
        let mut bytes = MdfFixture::default()
            .group(FixtureGroup::new(vec![0.]).channel(FixtureChannel::float("a", vec![1.])))
            .build();
        // point the DG link back at the HD block
        bytes[88..96].copy_from_slice(&64u64.to_le_bytes());
        assert!(matches!(open(bytes), Err(MdfError::BlockId { .. })));
    }
}
