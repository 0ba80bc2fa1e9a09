use super::{
    block::{BlockReader, DataGroup},
    MdfError, Result,
};
use flate2::read::ZlibDecoder;
use std::{
    collections::{HashMap, HashSet},
    io::{Read, Seek},
};

/// Concatenated record bytes behind a `dg_data` link
pub(crate) fn read_data<R: Read + Seek>(reader: &mut BlockReader<R>, link: u64) -> Result<Vec<u8>> {
    let mut visited = HashSet::new();
    let mut bytes = vec![];
    append_data(reader, link, &mut bytes, &mut visited)?;
    Ok(bytes)
}

fn append_data<R: Read + Seek>(
    reader: &mut BlockReader<R>,
    link: u64,
    bytes: &mut Vec<u8>,
    visited: &mut HashSet<u64>,
) -> Result<()> {
    if link == 0 {
        return Ok(());
    }
    if !visited.insert(link) {
        return Err(MdfError::Cycle(link));
    }
    let block = reader.block(link, &["DT", "DV", "DZ", "DL", "HL"])?;
    if block.is("DT") || block.is("DV") {
        bytes.extend_from_slice(&block.data);
    } else if block.is("DZ") {
        bytes.append(&mut inflate(&block)?);
    } else if block.is("HL") {
        append_data(reader, block.link(0), bytes, visited)?;
    } else {
        // DL: next list, then the data blocks of this list
        let count = block.fields().skip(4).u32()? as usize;
        for &data_link in block.links.iter().skip(1).take(count) {
            append_data(reader, data_link, bytes, visited)?;
        }
        append_data(reader, block.link(0), bytes, visited)?;
    }
    Ok(())
}

/// Decompresses a DZ block, undoing the byte transposition when used
fn inflate(block: &super::block::Block) -> Result<Vec<u8>> {
    let mut fields = block.fields();
    let zip_type = fields.skip(2).u8()?;
    let columns = fields.skip(1).u32()? as usize;
    let original_length = fields.u64()? as usize;
    let compressed_length = fields.u64()? as usize;
    let compressed = fields
        .rest()
        .get(..compressed_length)
        .ok_or(MdfError::Truncated(block.offset))?;
    let mut bytes = Vec::with_capacity(original_length);
    ZlibDecoder::new(compressed)
        .read_to_end(&mut bytes)
        .map_err(|e| MdfError::Inflate(block.offset, e))?;
    if bytes.len() != original_length {
        return Err(MdfError::Truncated(block.offset));
    }
    match zip_type {
        0 => Ok(bytes),
        1 if columns > 0 => {
            let rows = original_length / columns;
            let mut out = bytes.clone();
            for r in 0..rows {
                for c in 0..columns {
                    out[r * columns + c] = bytes[c * rows + r];
                }
            }
            Ok(out)
        }
        1 => Ok(bytes),
        other => Err(MdfError::Compression(other)),
    }
}

/// Records of one channel group, invalidation bytes included
#[derive(Debug, Default)]
pub(crate) struct ChannelGroupRecords {
    pub data_bytes: usize,
    record_size: usize,
    bytes: Vec<u8>,
}
impl ChannelGroupRecords {
    pub fn len(&self) -> usize {
        if self.record_size == 0 {
            0
        } else {
            self.bytes.len() / self.record_size
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes.chunks_exact(self.record_size.max(1)).take(self.len())
    }
}

/// The records of a data group, split by channel group
#[derive(Debug)]
pub struct GroupRecords {
    pub(crate) group: usize,
    pub(crate) channel_groups: Vec<ChannelGroupRecords>,
}
impl GroupRecords {
    pub(crate) fn split(group: usize, dg: &DataGroup, bytes: Vec<u8>) -> Result<Self> {
        if dg.record_id_size == 0 {
            if dg.channel_groups.len() > 1 {
                return Err(MdfError::ChannelGroups(dg.channel_groups.len()));
            }
            let channel_groups = dg
                .channel_groups
                .iter()
                .map(|cg| {
                    let record_size = cg.record_size();
                    let expected = record_size.saturating_mul(cg.cycle_count as usize);
                    if bytes.len() < expected {
                        return Err(MdfError::ShortData {
                            expected,
                            found: bytes.len(),
                        });
                    }
                    Ok(ChannelGroupRecords {
                        data_bytes: cg.data_bytes as usize,
                        record_size,
                        bytes: bytes[..expected].to_vec(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self {
                group,
                channel_groups,
            });
        }

        let ids: HashMap<u64, usize> = dg
            .channel_groups
            .iter()
            .enumerate()
            .map(|(i, cg)| (cg.record_id, i))
            .collect();
        let mut channel_groups: Vec<_> = dg
            .channel_groups
            .iter()
            .map(|cg| ChannelGroupRecords {
                data_bytes: cg.data_bytes as usize,
                record_size: cg.record_size(),
                bytes: vec![],
            })
            .collect();
        let id_size = dg.record_id_size as usize;
        let mut pos = 0;
        while pos < bytes.len() {
            let id = bytes
                .get(pos..pos + id_size)
                .map(|b| b.iter().rev().fold(0u64, |id, &x| (id << 8) | x as u64))
                .ok_or(MdfError::ShortData {
                    expected: pos + id_size,
                    found: bytes.len(),
                })?;
            pos += id_size;
            let &i = ids.get(&id).ok_or(MdfError::RecordId(id))?;
            if dg.channel_groups[i].is_vlsd() {
                let length = bytes
                    .get(pos..pos + 4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                    .ok_or(MdfError::ShortData {
                        expected: pos + 4,
                        found: bytes.len(),
                    })?;
                pos += 4 + length;
                continue;
            }
            let size = channel_groups[i].record_size;
            let record = bytes.get(pos..pos + size).ok_or(MdfError::ShortData {
                expected: pos + size,
                found: bytes.len(),
            })?;
            channel_groups[i].bytes.extend_from_slice(record);
            pos += size;
        }
        Ok(Self {
            group,
            channel_groups,
        })
    }
}
