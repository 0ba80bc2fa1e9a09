use super::{
    block::{BlockReader, Channel},
    MdfError, Result,
};
use std::io::{Read, Seek};

/// Raw (unconverted) value of a fixed-length numeric channel in a record
pub(crate) fn raw_value(record: &[u8], channel: &Channel) -> Result<f64> {
    let start = channel.byte_offset as usize;
    let bits = channel.bit_count;
    match channel.data_type {
        0..=3 => {
            if bits == 0 || bits > 64 {
                return Err(MdfError::BitCount {
                    data_type: channel.data_type,
                    bits,
                });
            }
            let width = (channel.bit_offset as usize + bits as usize).div_ceil(8);
            if width > 8 {
                return Err(MdfError::BitCount {
                    data_type: channel.data_type,
                    bits,
                });
            }
            let bytes = slice(record, start, width)?;
            let word = if channel.data_type % 2 == 0 {
                bytes.iter().rev().fold(0u64, |w, &b| (w << 8) | b as u64)
            } else {
                bytes.iter().fold(0u64, |w, &b| (w << 8) | b as u64)
            };
            let word = word >> channel.bit_offset;
            let word = if bits == 64 {
                word
            } else {
                word & ((1u64 << bits) - 1)
            };
            if channel.data_type < 2 {
                Ok(word as f64)
            } else {
                // sign extension from `bits`
                let shift = 64 - bits;
                Ok(((word << shift) as i64 >> shift) as f64)
            }
        }
        4 | 5 => {
            let little = channel.data_type == 4;
            match bits {
                32 => {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(slice(record, start, 4)?);
                    Ok(if little {
                        f32::from_le_bytes(word)
                    } else {
                        f32::from_be_bytes(word)
                    } as f64)
                }
                64 => {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(slice(record, start, 8)?);
                    Ok(if little {
                        f64::from_le_bytes(word)
                    } else {
                        f64::from_be_bytes(word)
                    })
                }
                _ => Err(MdfError::BitCount {
                    data_type: channel.data_type,
                    bits,
                }),
            }
        }
        other => Err(MdfError::DataType(other)),
    }
}

fn slice(record: &[u8], start: usize, width: usize) -> Result<&[u8]> {
    record
        .get(start..start + width)
        .ok_or(MdfError::RecordLayout {
            start,
            end: start + width,
            size: record.len(),
        })
}

fn parameters(cc_type: u8, values: &[f64], expected: usize) -> Result<&[f64]> {
    values
        .get(..expected)
        .ok_or(MdfError::ConversionParameters {
            cc_type,
            expected,
            found: values.len(),
        })
}

/// Checks the channel invalidation bit of a record
pub(crate) fn is_invalid(record: &[u8], channel: &Channel, data_bytes: usize) -> bool {
    if channel.flags & 0b01 != 0 {
        return true;
    }
    if channel.flags & 0b10 == 0 {
        return false;
    }
    let pos = channel.invalidation_bit as usize;
    record
        .get(data_bytes + pos / 8)
        .map_or(false, |byte| (byte >> (pos % 8)) & 1 == 1)
}

/// Raw to physical value conversion of a CC block
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Conversion {
    Identity,
    Linear { offset: f64, factor: f64 },
    Rational([f64; 6]),
}
impl Conversion {
    pub fn read<R: Read + Seek>(reader: &mut BlockReader<R>, link: u64) -> Result<Self> {
        if link == 0 {
            return Ok(Conversion::Identity);
        }
        let block = reader.block(link, &["CC"])?;
        let mut fields = block.fields();
        let cc_type = fields.u8()?;
        let value_count = fields.skip(5).u16()? as usize;
        fields.skip(16);
        let values = (0..value_count)
            .map(|_| fields.f64())
            .collect::<Result<Vec<f64>>>()?;
        match cc_type {
            0 => Ok(Conversion::Identity),
            1 => {
                let p = parameters(cc_type, &values, 2)?;
                Ok(Conversion::Linear {
                    offset: p[0],
                    factor: p[1],
                })
            }
            2 => {
                let p = parameters(cc_type, &values, 6)?;
                Ok(Conversion::Rational([p[0], p[1], p[2], p[3], p[4], p[5]]))
            }
            other => Err(MdfError::Conversion(other)),
        }
    }
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Conversion::Identity => x,
            Conversion::Linear { offset, factor } => offset + factor * x,
            Conversion::Rational([p1, p2, p3, p4, p5, p6]) => {
                (p1 * x * x + p2 * x + p3) / (p4 * x * x + p5 * x + p6)
            }
        }
    }
}
