//! In-memory MDF 4 files for the tests

use flate2::{write::ZlibEncoder, Compression};
use std::io::Write;

/// How the records of a group are stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Storage {
    Plain,
    /// DV block
    ValueBlock,
    Deflate,
    /// DZ with the record bytes transposed
    Transposed,
    /// DZ transposed over the given number of columns, the tail left as is
    TransposedColumns(usize),
    /// DL of two DT blocks
    Listed,
    /// HL pointing to a DL
    HeaderList,
}

#[derive(Debug, Clone)]
enum Values {
    Float(Vec<f64>),
    Linear {
        raw: Vec<u16>,
        offset: f64,
        factor: f64,
    },
    Bytes,
}

#[derive(Debug, Clone)]
pub(crate) struct FixtureChannel {
    name: String,
    unit: Option<String>,
    values: Values,
    invalid: Option<Vec<bool>>,
}
impl FixtureChannel {
    /// 64 bit float channel
    pub fn float(name: &str, values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            values: Values::Float(values),
            invalid: None,
        }
    }
    /// 16 bit unsigned channel with a linear conversion
    pub fn linear(name: &str, raw: Vec<u16>, offset: f64, factor: f64) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            values: Values::Linear {
                raw,
                offset,
                factor,
            },
            invalid: None,
        }
    }
    /// 4 bytes byte array channel
    pub fn bytes(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            values: Values::Bytes,
            invalid: None,
        }
    }
    pub fn unit(self, unit: &str) -> Self {
        Self {
            unit: Some(unit.to_string()),
            ..self
        }
    }
    pub fn invalid(self, mask: Vec<bool>) -> Self {
        Self {
            invalid: Some(mask),
            ..self
        }
    }
    fn width(&self) -> usize {
        match self.values {
            Values::Float(_) => 8,
            Values::Linear { .. } => 2,
            Values::Bytes => 4,
        }
    }
    fn write(&self, i: usize, record: &mut Vec<u8>) {
        match &self.values {
            Values::Float(values) => record.extend(values[i].to_le_bytes()),
            Values::Linear { raw, .. } => record.extend(raw[i].to_le_bytes()),
            Values::Bytes => record.extend(b"VIN0"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FixtureGroup {
    time: Vec<f64>,
    channels: Vec<FixtureChannel>,
    storage: Storage,
    /// signal data of a VLSD channel group
    vlsd: Option<Vec<Vec<u8>>>,
}
impl FixtureGroup {
    pub fn new(time: Vec<f64>) -> Self {
        Self {
            time,
            channels: vec![],
            storage: Storage::Plain,
            vlsd: None,
        }
    }
    /// Variable length signal data channel group, for unsorted data groups
    pub fn vlsd(values: Vec<Vec<u8>>) -> Self {
        Self {
            vlsd: Some(values),
            ..Self::new(vec![])
        }
    }
    pub fn channel(mut self, channel: FixtureChannel) -> Self {
        self.channels.push(channel);
        self
    }
    pub fn storage(self, storage: Storage) -> Self {
        Self { storage, ..self }
    }
    fn data_bytes(&self) -> usize {
        8 + self.channels.iter().map(|c| c.width()).sum::<usize>()
    }
    fn invalidation_bytes(&self) -> usize {
        usize::from(self.channels.iter().any(|c| c.invalid.is_some()))
    }
    fn record_size(&self) -> usize {
        self.data_bytes() + self.invalidation_bytes()
    }
    fn cycle_count(&self) -> usize {
        self.vlsd.as_ref().map_or(self.time.len(), |v| v.len())
    }
    fn records(&self) -> Vec<Vec<u8>> {
        if let Some(values) = &self.vlsd {
            return values
                .iter()
                .map(|v| [&(v.len() as u32).to_le_bytes()[..], v].concat())
                .collect();
        }
        self.time
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut record = t.to_le_bytes().to_vec();
                let mut invalid = 0u8;
                for (k, channel) in self.channels.iter().enumerate() {
                    channel.write(i, &mut record);
                    if channel.invalid.as_ref().is_some_and(|mask| mask[i]) {
                        invalid |= 1 << k;
                    }
                }
                if self.invalidation_bytes() > 0 {
                    record.push(invalid);
                }
                record
            })
            .collect()
    }
}

/// Builder of an MDF 4.10 file
#[derive(Debug, Default)]
pub(crate) struct MdfFixture {
    data_groups: Vec<Vec<FixtureGroup>>,
}
impl MdfFixture {
    /// Adds a sorted data group
    pub fn group(mut self, group: FixtureGroup) -> Self {
        self.data_groups.push(vec![group]);
        self
    }
    /// Adds an unsorted data group with 1 byte record ids
    pub fn unsorted(mut self, groups: Vec<FixtureGroup>) -> Self {
        self.data_groups.push(groups);
        self
    }
    pub fn build(&self) -> Vec<u8> {
        let mut id = Vec::with_capacity(64);
        id.extend(b"MDF     4.10    fixture ");
        id.extend([0u8; 4]);
        id.extend(410u16.to_le_bytes());
        id.resize(64, 0);
        let mut w = Writer { buf: id };
        let header = w.block(b"HD", &[0; 6], &[0; 32]);
        assert_eq!(header, 64);

        let mut next_dg = 0;
        for groups in self.data_groups.iter().rev() {
            let record_id_size = u8::from(groups.len() > 1);
            let data = w.data(groups, record_id_size);
            let mut next_cg = 0;
            for (i, group) in groups.iter().enumerate().rev() {
                let mut cg = vec![];
                cg.extend((i as u64 + 1).to_le_bytes());
                cg.extend((group.cycle_count() as u64).to_le_bytes());
                let first_cn = match &group.vlsd {
                    Some(values) => {
                        cg.extend(1u16.to_le_bytes());
                        cg.extend([0u8; 6]);
                        let size: usize = values.iter().map(Vec::len).sum();
                        cg.extend((size as u64).to_le_bytes());
                        0
                    }
                    None => {
                        cg.extend([0u8; 8]);
                        cg.extend((group.data_bytes() as u32).to_le_bytes());
                        cg.extend((group.invalidation_bytes() as u32).to_le_bytes());
                        w.channels(group)
                    }
                };
                next_cg = w.block(b"CG", &[next_cg, first_cn, 0, 0, 0, 0], &cg);
            }
            let mut dg = vec![record_id_size];
            dg.resize(8, 0);
            next_dg = w.block(b"DG", &[next_dg, next_cg, data, 0], &dg);
        }
        w.buf[88..96].copy_from_slice(&u64::to_le_bytes(next_dg));
        w.buf
    }
}

struct Writer {
    buf: Vec<u8>,
}
impl Writer {
    fn block(&mut self, id: &[u8; 2], links: &[u64], data: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf.extend(b"##");
        self.buf.extend(id);
        self.buf.extend([0u8; 4]);
        self.buf
            .extend(((24 + 8 * links.len() + data.len()) as u64).to_le_bytes());
        self.buf.extend((links.len() as u64).to_le_bytes());
        for link in links {
            self.buf.extend(link.to_le_bytes());
        }
        self.buf.extend(data);
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
        offset
    }
    fn text(&mut self, text: &str) -> u64 {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        self.block(b"TX", &[], &data)
    }
    fn linear(&mut self, offset: f64, factor: f64) -> u64 {
        let mut data = vec![1u8, 0];
        data.extend(0u16.to_le_bytes());
        data.extend(0u16.to_le_bytes());
        data.extend(2u16.to_le_bytes());
        data.extend([0u8; 16]);
        data.extend(offset.to_le_bytes());
        data.extend(factor.to_le_bytes());
        self.block(b"CC", &[0, 0, 0, 0], &data)
    }
    #[allow(clippy::too_many_arguments)]
    fn channel(
        &mut self,
        next: u64,
        name: &str,
        unit: Option<&str>,
        conversion: u64,
        (kind, sync, data_type): (u8, u8, u8),
        byte_offset: usize,
        bit_count: u32,
        invalidation: Option<u32>,
    ) -> u64 {
        let name = self.text(name);
        let unit = unit.map_or(0, |u| self.text(u));
        let mut data = vec![kind, sync, data_type, 0];
        data.extend((byte_offset as u32).to_le_bytes());
        data.extend(bit_count.to_le_bytes());
        data.extend(u32::from(invalidation.is_some() as u8 * 2).to_le_bytes());
        data.extend(invalidation.unwrap_or(0).to_le_bytes());
        data.resize(72, 0);
        self.block(b"CN", &[next, 0, name, 0, conversion, 0, unit, 0], &data)
    }
    fn channels(&mut self, group: &FixtureGroup) -> u64 {
        let mut offsets = vec![];
        let mut offset = 8;
        for channel in &group.channels {
            offsets.push(offset);
            offset += channel.width();
        }
        let mut next = 0;
        for (k, channel) in group.channels.iter().enumerate().rev() {
            let (conversion, data_type, bit_count) = match channel.values {
                Values::Float(_) => (0, 4, 64),
                Values::Linear { offset, factor, .. } => (self.linear(offset, factor), 0, 16),
                Values::Bytes => (0, 10, 32),
            };
            next = self.channel(
                next,
                &channel.name,
                channel.unit.as_deref(),
                conversion,
                (0, 0, data_type),
                offsets[k],
                bit_count,
                channel.invalid.as_ref().map(|_| k as u32),
            );
        }
        self.channel(next, "time", Some("s"), 0, (2, 1, 4), 0, 64, None)
    }
    fn data(&mut self, groups: &[FixtureGroup], record_id_size: u8) -> u64 {
        let bytes: Vec<u8> = if record_id_size == 0 {
            groups[0].records().concat()
        } else {
            let records: Vec<_> = groups.iter().map(|g| g.records()).collect();
            let n = records.iter().map(|r| r.len()).max().unwrap_or(0);
            let mut bytes = vec![];
            for i in 0..n {
                for (k, group) in records.iter().enumerate() {
                    if let Some(record) = group.get(i) {
                        bytes.push(k as u8 + 1);
                        bytes.extend(record);
                    }
                }
            }
            bytes
        };
        match groups[0].storage {
            Storage::Plain => self.block(b"DT", &[], &bytes),
            Storage::ValueBlock => self.block(b"DV", &[], &bytes),
            Storage::Deflate => self.deflate(&bytes, 0, 0),
            Storage::Transposed => self.deflate(&bytes, 1, groups[0].record_size()),
            Storage::TransposedColumns(columns) => self.deflate(&bytes, 1, columns),
            Storage::Listed => self.list(&bytes, groups[0].record_size()),
            Storage::HeaderList => {
                let list = self.list(&bytes, groups[0].record_size());
                // flags, zip type and reserved bytes
                self.block(b"HL", &[list], &[0u8; 8])
            }
        }
    }
    fn list(&mut self, bytes: &[u8], size: usize) -> u64 {
        let split = (bytes.len() / size / 2) * size;
        let first = self.block(b"DT", &[], &bytes[..split]);
        let second = self.block(b"DT", &[], &bytes[split..]);
        let mut list = vec![0u8; 4];
        list.extend(2u32.to_le_bytes());
        list.extend(0u64.to_le_bytes());
        list.extend((split as u64).to_le_bytes());
        self.block(b"DL", &[0, first, second], &list)
    }
    fn deflate(&mut self, bytes: &[u8], zip_type: u8, columns: usize) -> u64 {
        let mut stored = bytes.to_vec();
        if zip_type == 1 {
            let rows = bytes.len() / columns;
            for r in 0..rows {
                for c in 0..columns {
                    stored[c * rows + r] = bytes[r * columns + c];
                }
            }
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&stored).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut data = b"DT".to_vec();
        data.push(zip_type);
        data.push(0);
        data.extend((columns as u32).to_le_bytes());
        data.extend((bytes.len() as u64).to_le_bytes());
        data.extend((compressed.len() as u64).to_le_bytes());
        data.extend(compressed);
        self.block(b"DZ", &[], &data)
    }
}
