//! Typed values stored in the MMDB data section.

use anyhow::{anyhow, Result};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Map type used for MMDB maps. Keys are kept sorted so that encoding is
/// deterministic and identical records deduplicate.
pub type MmdbMap = BTreeMap<String, MmdbValue>;

/// A value of the MaxMind DB data format
#[derive(Debug, Clone, PartialEq)]
pub enum MmdbValue {
    Map(MmdbMap),
    Array(Vec<MmdbValue>),
    String(String),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uint128(u128),
    Int32(i32),
    Double(f64),
    Float(f32),
    Boolean(bool),
}

impl MmdbValue {
    pub fn as_map(&self) -> Option<&MmdbMap> {
        match self {
            MmdbValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MmdbValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Return the value as an unsigned integer if it is any of the unsigned types.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MmdbValue::Uint16(v) => Some(*v as u64),
            MmdbValue::Uint32(v) => Some(*v as u64),
            MmdbValue::Uint64(v) => Some(*v),
            MmdbValue::Uint128(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Look up a top-level key of a map value.
    pub fn get(&self, key: &str) -> Option<&MmdbValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Human readable name of the value type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            MmdbValue::Map(_) => "map",
            MmdbValue::Array(_) => "array",
            MmdbValue::String(_) => "utf8_string",
            MmdbValue::Bytes(_) => "bytes",
            MmdbValue::Uint16(_) => "uint16",
            MmdbValue::Uint32(_) => "uint32",
            MmdbValue::Uint64(_) => "uint64",
            MmdbValue::Uint128(_) => "uint128",
            MmdbValue::Int32(_) => "int32",
            MmdbValue::Double(_) => "double",
            MmdbValue::Float(_) => "float",
            MmdbValue::Boolean(_) => "boolean",
        }
    }
}

impl From<&str> for MmdbValue {
    fn from(value: &str) -> Self {
        MmdbValue::String(value.to_string())
    }
}

impl From<String> for MmdbValue {
    fn from(value: String) -> Self {
        MmdbValue::String(value)
    }
}

impl From<u32> for MmdbValue {
    fn from(value: u32) -> Self {
        MmdbValue::Uint32(value)
    }
}

impl From<MmdbMap> for MmdbValue {
    fn from(value: MmdbMap) -> Self {
        MmdbValue::Map(value)
    }
}

/// How a newly inserted value is combined with data already present in the tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum MergeStrategy {
    /// Overwrite existing data
    Replace,
    /// Keys of the new map override the same keys of the existing map
    #[default]
    TopLevelMerge,
    /// Maps are merged recursively; any non-map value is replaced
    DeepMerge,
}

impl MergeStrategy {
    /// Compute the value to store given what is currently stored.
    pub fn apply(&self, existing: Option<&MmdbValue>, new: &MmdbValue) -> Result<MmdbValue> {
        let existing = match existing {
            None => return Ok(new.clone()),
            Some(v) => v,
        };
        match self {
            MergeStrategy::Replace => Ok(new.clone()),
            MergeStrategy::TopLevelMerge => top_level_merge(existing, new),
            MergeStrategy::DeepMerge => Ok(deep_merge(existing, new)),
        }
    }
}

fn top_level_merge(existing: &MmdbValue, new: &MmdbValue) -> Result<MmdbValue> {
    let new_map = new
        .as_map()
        .ok_or_else(|| anyhow!("cannot merge a {} into existing data", new.type_name()))?;
    let existing_map = existing.as_map().ok_or_else(|| {
        anyhow!(
            "existing value is a {}, top-level merge requires a map",
            existing.type_name()
        )
    })?;

    let mut merged = existing_map.clone();
    for (k, v) in new_map {
        merged.insert(k.clone(), v.clone());
    }
    Ok(MmdbValue::Map(merged))
}

fn deep_merge(existing: &MmdbValue, new: &MmdbValue) -> MmdbValue {
    match (existing, new) {
        (MmdbValue::Map(old), MmdbValue::Map(new_map)) => {
            let mut merged = old.clone();
            for (k, v) in new_map {
                let value = match merged.get(k) {
                    Some(current) => deep_merge(current, v),
                    None => v.clone(),
                };
                merged.insert(k.clone(), value);
            }
            MmdbValue::Map(merged)
        }
        _ => new.clone(),
    }
}

// =============================================================================
// Serde integration
// =============================================================================

impl Serialize for MmdbValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MmdbValue::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            MmdbValue::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            MmdbValue::String(s) => serializer.serialize_str(s),
            MmdbValue::Bytes(b) => serializer.serialize_bytes(b),
            MmdbValue::Uint16(v) => serializer.serialize_u16(*v),
            MmdbValue::Uint32(v) => serializer.serialize_u32(*v),
            MmdbValue::Uint64(v) => serializer.serialize_u64(*v),
            MmdbValue::Uint128(v) => serializer.serialize_u128(*v),
            MmdbValue::Int32(v) => serializer.serialize_i32(*v),
            MmdbValue::Double(v) => serializer.serialize_f64(*v),
            MmdbValue::Float(v) => serializer.serialize_f32(*v),
            MmdbValue::Boolean(v) => serializer.serialize_bool(*v),
        }
    }
}

struct MmdbValueVisitor;

impl<'de> Visitor<'de> for MmdbValueVisitor {
    type Value = MmdbValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a MaxMind DB value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Boolean(v))
    }

    fn visit_u8<E: de::Error>(self, v: u8) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Uint16(v as u16))
    }

    fn visit_u16<E: de::Error>(self, v: u16) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Uint16(v))
    }

    fn visit_u32<E: de::Error>(self, v: u32) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Uint32(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Uint64(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Uint128(v))
    }

    fn visit_i32<E: de::Error>(self, v: i32) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Int32(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<MmdbValue, E> {
        match i32::try_from(v) {
            Ok(v) => Ok(MmdbValue::Int32(v)),
            Err(_) => Err(E::custom(format!("signed integer {v} does not fit int32"))),
        }
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Float(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MmdbValue, E> {
        Ok(MmdbValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<MmdbValue, E> {
        Ok(MmdbValue::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<MmdbValue, E> {
        Ok(MmdbValue::Bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<MmdbValue, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(v) = seq.next_element::<MmdbValue>()? {
            values.push(v);
        }
        Ok(MmdbValue::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MmdbValue, A::Error> {
        let mut map = MmdbMap::new();
        while let Some((k, v)) = access.next_entry::<String, MmdbValue>()? {
            map.insert(k, v);
        }
        Ok(MmdbValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for MmdbValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MmdbValueVisitor)
    }
}
