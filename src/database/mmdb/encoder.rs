//! MMDB data section encoder.
//!
//! Values are written in the MaxMind DB data format. Distinct top-level values
//! are written once and map keys are shared through pointers, so the many
//! records carrying the same four AS keys only store the key strings once.

use super::value::MmdbValue;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOLEAN: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Largest payload size representable in a control byte with its extension
const MAX_SIZE: usize = 65_821 + 0x00FF_FFFF;

/// Builder for the data section of a database.
#[derive(Default)]
pub(crate) struct DataSection {
    buf: Vec<u8>,
    /// Pointer-free encoding of each written top-level value, to its offset
    values: HashMap<Vec<u8>, u32>,
    /// Offsets of map key strings already written
    keys: HashMap<String, u32>,
}

impl DataSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value and return its offset within the data section.
    /// Identical values share one offset.
    pub fn insert(&mut self, value: &MmdbValue) -> Result<u32> {
        let mut canonical = Vec::new();
        encode_value(value, &mut canonical)?;
        if let Some(offset) = self.values.get(&canonical) {
            return Ok(*offset);
        }

        let offset = self.offset()?;
        self.write(value)?;
        self.values.insert(canonical, offset);
        Ok(offset)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn offset(&self) -> Result<u32> {
        u32::try_from(self.buf.len()).map_err(|_| anyhow!("data section exceeds 4 GiB"))
    }

    fn write(&mut self, value: &MmdbValue) -> Result<()> {
        match value {
            MmdbValue::Map(map) => {
                write_control(&mut self.buf, TYPE_MAP, map.len())?;
                for (k, v) in map {
                    match self.keys.get(k) {
                        Some(offset) => write_pointer(&mut self.buf, *offset),
                        None => {
                            let offset = self.offset()?;
                            write_string(&mut self.buf, k)?;
                            self.keys.insert(k.clone(), offset);
                        }
                    }
                    self.write(v)?;
                }
                Ok(())
            }
            MmdbValue::Array(values) => {
                write_control(&mut self.buf, TYPE_ARRAY, values.len())?;
                for v in values {
                    self.write(v)?;
                }
                Ok(())
            }
            other => encode_value(other, &mut self.buf),
        }
    }
}

/// Encode a value without any pointers.
pub(crate) fn encode_value(value: &MmdbValue, out: &mut Vec<u8>) -> Result<()> {
    match value {
        MmdbValue::Map(map) => {
            write_control(out, TYPE_MAP, map.len())?;
            for (k, v) in map {
                write_string(out, k)?;
                encode_value(v, out)?;
            }
        }
        MmdbValue::Array(values) => {
            write_control(out, TYPE_ARRAY, values.len())?;
            for v in values {
                encode_value(v, out)?;
            }
        }
        MmdbValue::String(s) => write_string(out, s)?,
        MmdbValue::Bytes(b) => {
            write_control(out, TYPE_BYTES, b.len())?;
            out.extend_from_slice(b);
        }
        MmdbValue::Uint16(v) => write_uint(out, TYPE_UINT16, &v.to_be_bytes())?,
        MmdbValue::Uint32(v) => write_uint(out, TYPE_UINT32, &v.to_be_bytes())?,
        MmdbValue::Uint64(v) => write_uint(out, TYPE_UINT64, &v.to_be_bytes())?,
        MmdbValue::Uint128(v) => write_uint(out, TYPE_UINT128, &v.to_be_bytes())?,
        // negative numbers keep all four bytes
        MmdbValue::Int32(v) => write_uint(out, TYPE_INT32, &(*v as u32).to_be_bytes())?,
        MmdbValue::Double(v) => {
            write_control(out, TYPE_DOUBLE, 8)?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        MmdbValue::Float(v) => {
            write_control(out, TYPE_FLOAT, 4)?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        MmdbValue::Boolean(v) => write_control(out, TYPE_BOOLEAN, *v as usize)?,
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_control(out, TYPE_STRING, s.len())?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_uint(out: &mut Vec<u8>, type_num: u8, be_bytes: &[u8]) -> Result<()> {
    let first = be_bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(be_bytes.len());
    let payload = &be_bytes[first..];
    write_control(out, type_num, payload.len())?;
    out.extend_from_slice(payload);
    Ok(())
}

fn write_control(out: &mut Vec<u8>, type_num: u8, size: usize) -> Result<()> {
    let (size_bits, extension): (u8, Vec<u8>) = if size < 29 {
        (size as u8, vec![])
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        let s = size - 285;
        (30, vec![(s >> 8) as u8, s as u8])
    } else if size <= MAX_SIZE {
        let s = size - 65_821;
        (31, vec![(s >> 16) as u8, (s >> 8) as u8, s as u8])
    } else {
        return Err(anyhow!("value of size {size} is too large to encode"));
    };

    if type_num <= 7 {
        out.push((type_num << 5) | size_bits);
    } else {
        // extended type: the type id follows the control byte
        out.push(size_bits);
        out.push(type_num - 7);
    }
    out.extend(extension);
    Ok(())
}

fn write_pointer(out: &mut Vec<u8>, offset: u32) {
    let base = (TYPE_POINTER << 5) as u32;
    if offset < 2_048 {
        out.push((base | (offset >> 8)) as u8);
        out.push(offset as u8);
    } else if offset < 526_336 {
        let p = offset - 2_048;
        out.push((base | (1 << 3) | (p >> 16)) as u8);
        out.extend_from_slice(&[(p >> 8) as u8, p as u8]);
    } else if offset < 134_744_064 {
        let p = offset - 526_336;
        out.push((base | (2 << 3) | (p >> 24)) as u8);
        out.extend_from_slice(&[(p >> 16) as u8, (p >> 8) as u8, p as u8]);
    } else {
        out.push((base | (3 << 3)) as u8);
        out.extend_from_slice(&offset.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::mmdb::value::MmdbMap;

    #[test]
    fn test_encode_scalars() {
        let mut out = Vec::new();
        encode_value(&MmdbValue::String("ZZ".to_string()), &mut out).unwrap();
        assert_eq!(out, vec![0x42, b'Z', b'Z']);

        let mut out = Vec::new();
        encode_value(&MmdbValue::Uint32(13335), &mut out).unwrap();
        assert_eq!(out, vec![0xC2, 0x34, 0x17]);

        let mut out = Vec::new();
        encode_value(&MmdbValue::Uint32(0), &mut out).unwrap();
        assert_eq!(out, vec![0xC0]);

        let mut out = Vec::new();
        encode_value(&MmdbValue::Uint64(1), &mut out).unwrap();
        assert_eq!(out, vec![0x01, 0x02, 0x01]);

        let mut out = Vec::new();
        encode_value(&MmdbValue::Boolean(true), &mut out).unwrap();
        assert_eq!(out, vec![0x01, 0x07]);
    }

    #[test]
    fn test_encode_long_string_size() {
        let s = "a".repeat(300);
        let mut out = Vec::new();
        encode_value(&MmdbValue::String(s), &mut out).unwrap();
        // size 300 uses the two byte extension: 300 - 285 = 15
        assert_eq!(&out[..3], &[0x5E, 0x00, 0x0F]);
        assert_eq!(out.len(), 303);
    }

    #[test]
    fn test_pointer_sizes() {
        let mut out = Vec::new();
        write_pointer(&mut out, 10);
        assert_eq!(out, vec![0x20, 10]);

        let mut out = Vec::new();
        write_pointer(&mut out, 2_048);
        assert_eq!(out, vec![0x28, 0, 0]);

        let mut out = Vec::new();
        write_pointer(&mut out, u32::MAX);
        assert_eq!(out, vec![0x38, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_data_section_dedup() {
        let mut map = MmdbMap::new();
        map.insert("autonomous_system_number".to_string(), 13335u32.into());
        let value = MmdbValue::Map(map.clone());

        let mut data = DataSection::new();
        let first = data.insert(&value).unwrap();
        let len_after_first = data.len();
        let second = data.insert(&value).unwrap();
        assert_eq!(first, second);
        assert_eq!(data.len(), len_after_first);

        // a different value reuses the key through a pointer
        map.insert("autonomous_system_number".to_string(), 15169u32.into());
        let third = data.insert(&MmdbValue::Map(map)).unwrap();
        assert_ne!(third, first);
        // control byte + 2-byte pointer + 3-byte uint32
        assert_eq!(data.len() - len_after_first, 6);
    }
}
