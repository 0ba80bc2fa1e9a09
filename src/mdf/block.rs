use super::{MdfError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Read, Seek, SeekFrom};

/// Block header: id, reserved, length, link count
const HEADER_SIZE: u64 = 24;

static XML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// A raw MDF block: its links and its data section
#[derive(Debug)]
pub(crate) struct Block {
    pub offset: u64,
    pub id: [u8; 2],
    pub links: Vec<u64>,
    pub data: Vec<u8>,
}
impl Block {
    /// Link `i`, or nil if the block has less links
    pub fn link(&self, i: usize) -> u64 {
        self.links.get(i).copied().unwrap_or(0)
    }
    pub fn fields(&self) -> Fields<'_> {
        Fields {
            buf: &self.data,
            pos: 0,
            offset: self.offset,
        }
    }
    pub fn is(&self, id: &str) -> bool {
        self.id[..] == id.as_bytes()[..2]
    }
    /// Zero terminated UTF-8 text of a TX or MD block
    pub fn text(&self) -> String {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        let text = String::from_utf8_lossy(&self.data[..end]);
        if self.is("MD") {
            XML_TAG.replace_all(&text, "").trim().to_string()
        } else {
            text.trim().to_string()
        }
    }
}

/// Little-endian reads over a block data section
pub(crate) struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
    offset: u64,
}
impl<'a> Fields<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or(MdfError::Truncated(self.offset))?;
        self.pos += N;
        let mut array = [0u8; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }
    pub fn skip(&mut self, n: usize) -> &mut Self {
        self.pos += n;
        self
    }
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }
    pub fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }
    pub fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }
    pub fn u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }
    pub fn f64(&mut self) -> Result<f64> {
        self.take().map(f64::from_le_bytes)
    }
    /// The bytes left after the current position
    pub fn rest(&self) -> &'a [u8] {
        self.buf.get(self.pos..).unwrap_or(&[])
    }
}

/// Seeks and reads blocks from the underlying file
pub(crate) struct BlockReader<R> {
    inner: R,
    size: u64,
}
impl<R: Read + Seek> BlockReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, size })
    }
    /// Checks the identification block and returns the version number
    pub fn identification(&mut self) -> Result<u16> {
        if self.size < 64 {
            return Err(MdfError::Truncated(0));
        }
        let mut id = [0u8; 64];
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.read_exact(&mut id)?;
        match &id[..8] {
            b"MDF     " => (),
            b"UnFinMF " => return Err(MdfError::Unfinalized),
            other => return Err(MdfError::NotMdf(String::from_utf8_lossy(other).into_owned())),
        }
        let version = u16::from_le_bytes([id[28], id[29]]);
        if !(400..500).contains(&version) {
            return Err(MdfError::Version(version));
        }
        Ok(version)
    }
    /// Reads the block at `offset`, checking its id against `expected`
    pub fn block(&mut self, offset: u64, expected: &[&str]) -> Result<Block> {
        if offset.saturating_add(HEADER_SIZE) > self.size {
            return Err(MdfError::Link {
                link: offset,
                size: self.size,
            });
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(&mut header)?;
        let found = &header[..4];
        if &found[..2] != b"##" || !expected.iter().any(|id| id.as_bytes() == &found[2..]) {
            return Err(MdfError::BlockId {
                expected: expected.join("|"),
                found: String::from_utf8_lossy(found).into_owned(),
                offset,
            });
        }
        let id = [found[2], found[3]];
        let mut word = [0u8; 8];
        word.copy_from_slice(&header[8..16]);
        let length = u64::from_le_bytes(word);
        word.copy_from_slice(&header[16..24]);
        let link_count = u64::from_le_bytes(word);
        let links_size = link_count
            .checked_mul(8)
            .filter(|n| HEADER_SIZE + *n <= length)
            .ok_or(MdfError::Truncated(offset))?;
        if length > self.size - offset {
            return Err(MdfError::Truncated(offset));
        }
        let mut links = vec![0u8; links_size as usize];
        self.inner.read_exact(&mut links)?;
        let links = links
            .chunks_exact(8)
            .map(|c| {
                word.copy_from_slice(c);
                u64::from_le_bytes(word)
            })
            .collect::<Vec<u64>>();
        if let Some(&link) = links.iter().find(|&&l| l >= self.size) {
            return Err(MdfError::Link {
                link,
                size: self.size,
            });
        }
        let mut data = vec![0u8; (length - HEADER_SIZE - links_size) as usize];
        self.inner.read_exact(&mut data)?;
        Ok(Block {
            offset,
            id,
            links,
            data,
        })
    }
    /// Text of the TX or MD block at `link`, `None` for a nil link
    pub fn text(&mut self, link: u64) -> Result<Option<String>> {
        if link == 0 {
            return Ok(None);
        }
        Ok(Some(self.block(link, &["TX", "MD"])?.text()))
    }
}

#[derive(Debug)]
pub(crate) struct DataGroup {
    pub first_channel_group: u64,
    pub data: u64,
    pub record_id_size: u8,
    pub channel_groups: Vec<ChannelGroup>,
}
impl DataGroup {
    /// Reads the data group and returns it with the link to the next one
    pub fn read<R: Read + Seek>(reader: &mut BlockReader<R>, link: u64) -> Result<(Self, u64)> {
        let block = reader.block(link, &["DG"])?;
        let record_id_size = block.fields().u8()?;
        if ![0, 1, 2, 4, 8].contains(&record_id_size) {
            return Err(MdfError::Truncated(link));
        }
        Ok((
            Self {
                first_channel_group: block.link(1),
                data: block.link(2),
                record_id_size,
                channel_groups: vec![],
            },
            block.link(0),
        ))
    }
}

#[derive(Debug)]
pub(crate) struct ChannelGroup {
    pub first_channel: u64,
    pub record_id: u64,
    pub cycle_count: u64,
    pub flags: u16,
    pub data_bytes: u32,
    pub invalidation_bytes: u32,
    pub channels: Vec<Channel>,
}
impl ChannelGroup {
    pub fn read<R: Read + Seek>(reader: &mut BlockReader<R>, link: u64) -> Result<(Self, u64)> {
        let block = reader.block(link, &["CG"])?;
        let mut fields = block.fields();
        let record_id = fields.u64()?;
        let cycle_count = fields.u64()?;
        let flags = fields.u16()?;
        let data_bytes = fields.skip(6).u32()?;
        let invalidation_bytes = fields.u32()?;
        Ok((
            Self {
                first_channel: block.link(1),
                record_id,
                cycle_count,
                flags,
                data_bytes,
                invalidation_bytes,
                channels: vec![],
            },
            block.link(0),
        ))
    }
    /// Variable length signal data group
    pub fn is_vlsd(&self) -> bool {
        self.flags & 1 != 0
    }
    pub fn record_size(&self) -> usize {
        self.data_bytes as usize + self.invalidation_bytes as usize
    }
}

#[derive(Debug)]
pub(crate) struct Channel {
    pub name: String,
    pub unit: Option<String>,
    pub conversion: u64,
    pub kind: u8,
    pub sync: u8,
    pub data_type: u8,
    pub bit_offset: u8,
    pub byte_offset: u32,
    pub bit_count: u32,
    pub flags: u32,
    pub invalidation_bit: u32,
}
impl Channel {
    pub fn read<R: Read + Seek>(reader: &mut BlockReader<R>, link: u64) -> Result<(Self, u64)> {
        let block = reader.block(link, &["CN"])?;
        let mut fields = block.fields();
        let kind = fields.u8()?;
        let sync = fields.u8()?;
        let data_type = fields.u8()?;
        let bit_offset = fields.u8()?;
        let byte_offset = fields.u32()?;
        let bit_count = fields.u32()?;
        let flags = fields.u32()?;
        let invalidation_bit = fields.u32()?;
        let name = reader.text(block.link(2))?.unwrap_or_default();
        let unit = reader.text(block.link(6))?.filter(|u| !u.is_empty());
        Ok((
            Self {
                name,
                unit,
                conversion: block.link(4),
                kind,
                sync,
                data_type,
                bit_offset,
                byte_offset,
                bit_count,
                flags,
                invalidation_bit,
            },
            block.link(0),
        ))
    }
    /// Master (or virtual master) channel synchronized on time
    pub fn is_time_master(&self) -> bool {
        matches!(self.kind, 2 | 3) && self.sync == 1
    }
    pub fn is_virtual(&self) -> bool {
        self.kind == 3
    }
}
