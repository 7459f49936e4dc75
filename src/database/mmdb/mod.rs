//! MaxMind DB writer
//!
//! `MmdbWriter` holds a prefix trie in memory, supports merge-insert of
//! values keyed by network, and serializes the whole database in the MMDB 2.0
//! binary format. Existing databases can be loaded (through the `maxminddb`
//! reader) and enriched incrementally.
//!
//! # Example
//!
//! ```rust,ignore
//! use asn_enrich::database::mmdb::{MergeStrategy, MmdbOptions, MmdbWriter};
//!
//! let mut writer = MmdbWriter::new(MmdbOptions::default())?;
//! writer.insert("1.1.1.0/24".parse()?, record, MergeStrategy::TopLevelMerge)?;
//! std::fs::write("out.mmdb", writer.to_bytes()?)?;
//! ```

mod encoder;
mod tree;
pub mod value;

pub use value::{MergeStrategy, MmdbMap, MmdbValue};

use crate::database::PrefixDatabase;
use anyhow::{anyhow, Context, Result};
use encoder::{encode_value, DataSection};
use ipnet::IpNet;
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};
use tree::{SearchTree, IPV4_ALIAS_NETWORKS};

/// Marker separating the data section from the metadata block
pub const METADATA_START_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Database type used for freshly created databases
pub const DEFAULT_DATABASE_TYPE: &str = "GeoLite2-ASN";

/// Record size used for freshly created databases
pub const DEFAULT_RECORD_SIZE: u16 = 24;

/// Options describing the database being written
#[derive(Debug, Clone, PartialEq)]
pub struct MmdbOptions {
    pub database_type: String,
    pub record_size: u16,
    pub ip_version: u16,
    pub languages: Vec<String>,
    pub description: BTreeMap<String, String>,
}

impl Default for MmdbOptions {
    fn default() -> Self {
        MmdbOptions {
            database_type: DEFAULT_DATABASE_TYPE.to_string(),
            record_size: DEFAULT_RECORD_SIZE,
            ip_version: 6,
            languages: vec![],
            description: BTreeMap::new(),
        }
    }
}

impl MmdbOptions {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.record_size, 24 | 28 | 32) {
            return Err(anyhow!(
                "invalid record size {}, must be 24, 28 or 32",
                self.record_size
            ));
        }
        if !matches!(self.ip_version, 4 | 6) {
            return Err(anyhow!(
                "invalid ip_version {}, must be 4 or 6",
                self.ip_version
            ));
        }
        Ok(())
    }
}

/// In-memory MaxMind DB under construction
pub struct MmdbWriter {
    options: MmdbOptions,
    tree: SearchTree,
}

impl MmdbWriter {
    /// Create an empty database.
    pub fn new(options: MmdbOptions) -> Result<MmdbWriter> {
        options.validate()?;
        let tree = SearchTree::new(options.ip_version)?;
        Ok(MmdbWriter { options, tree })
    }

    /// Load an existing database file, keeping its metadata and all its networks.
    pub fn load(path: &Path) -> Result<MmdbWriter> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| anyhow!("unable to open database {}: {}", path.display(), e))?;
        let metadata = &reader.metadata;

        let options = MmdbOptions {
            database_type: metadata.database_type.clone(),
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            languages: metadata.languages.clone(),
            description: metadata.description.clone(),
        };
        let mut writer = MmdbWriter::new(options)?;

        let aliases = IPV4_ALIAS_NETWORKS
            .iter()
            .map(|n| n.parse::<IpNet>())
            .collect::<Result<Vec<_>, _>>()?;
        let root: IpNetwork = match metadata.ip_version {
            4 => "0.0.0.0/0".parse()?,
            _ => "::/0".parse()?,
        };

        let mut count = 0usize;
        let networks = reader
            .within::<MmdbValue>(root)
            .map_err(|e| anyhow!("unable to iterate database {}: {}", path.display(), e))?;
        for item in networks {
            let item = item.map_err(|e| anyhow!("corrupt record in {}: {}", path.display(), e))?;
            let network = IpNet::new(item.ip_net.ip(), item.ip_net.prefix())?;
            if metadata.ip_version == 6 && aliases.iter().any(|alias| alias.contains(&network)) {
                debug!("skipping aliased network {}", network);
                continue;
            }
            writer
                .tree
                .insert(network, &item.info, MergeStrategy::Replace)
                .with_context(|| format!("unable to load network {network}"))?;
            count += 1;
        }

        info!(
            "loaded {} networks from {} ({})",
            count,
            path.display(),
            writer.options.database_type
        );
        Ok(writer)
    }

    /// Load `path` if given, otherwise create an empty database from `options`.
    pub fn open(path: Option<&Path>, options: MmdbOptions) -> Result<MmdbWriter> {
        match path {
            Some(p) => MmdbWriter::load(p),
            None => MmdbWriter::new(options),
        }
    }

    pub fn options(&self) -> &MmdbOptions {
        &self.options
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    /// Merge-insert a value for a network.
    pub fn insert(
        &mut self,
        network: IpNet,
        value: MmdbValue,
        strategy: MergeStrategy,
    ) -> Result<()> {
        self.tree.insert(network.trunc(), &value, strategy)
    }

    /// Longest-prefix lookup against the in-memory tree.
    pub fn lookup(&self, addr: IpAddr) -> Option<&MmdbValue> {
        self.tree.lookup(addr)
    }

    /// Serialize the database into MMDB bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = DataSection::new();
        let tree_bytes = self.tree.encode(self.options.record_size, &mut data)?;
        debug!(
            "serialized {} nodes, {} bytes of data",
            self.tree.node_count(),
            data.len()
        );
        let data_bytes = data.into_bytes();

        let mut out = Vec::with_capacity(tree_bytes.len() + 16 + data_bytes.len() + 512);
        out.extend_from_slice(&tree_bytes);
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&data_bytes);
        out.extend_from_slice(METADATA_START_MARKER);
        encode_value(&self.metadata()?, &mut out)?;
        Ok(out)
    }

    /// Serialize and write the database, returning the number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }

    fn metadata(&self) -> Result<MmdbValue> {
        let node_count = u32::try_from(self.tree.node_count())
            .map_err(|_| anyhow!("too many nodes: {}", self.tree.node_count()))?;

        let mut md = MmdbMap::new();
        md.insert("node_count".to_string(), MmdbValue::Uint32(node_count));
        md.insert(
            "record_size".to_string(),
            MmdbValue::Uint16(self.options.record_size),
        );
        md.insert(
            "ip_version".to_string(),
            MmdbValue::Uint16(self.options.ip_version),
        );
        md.insert(
            "database_type".to_string(),
            MmdbValue::String(self.options.database_type.clone()),
        );
        md.insert(
            "languages".to_string(),
            MmdbValue::Array(
                self.options
                    .languages
                    .iter()
                    .map(|l| MmdbValue::String(l.clone()))
                    .collect(),
            ),
        );
        md.insert(
            "description".to_string(),
            MmdbValue::Map(
                self.options
                    .description
                    .iter()
                    .map(|(k, v)| (k.clone(), MmdbValue::String(v.clone())))
                    .collect(),
            ),
        );
        md.insert(
            "binary_format_major_version".to_string(),
            MmdbValue::Uint16(2),
        );
        md.insert(
            "binary_format_minor_version".to_string(),
            MmdbValue::Uint16(0),
        );
        md.insert(
            "build_epoch".to_string(),
            MmdbValue::Uint64(chrono::Utc::now().timestamp().max(0) as u64),
        );
        Ok(MmdbValue::Map(md))
    }
}

impl PrefixDatabase for MmdbWriter {
    fn insert(&mut self, network: IpNet, value: MmdbValue, strategy: MergeStrategy) -> Result<()> {
        MmdbWriter::insert(self, network, value, strategy)
    }

    fn lookup(&self, addr: IpAddr) -> Option<&MmdbValue> {
        MmdbWriter::lookup(self, addr)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        MmdbWriter::to_bytes(self)
    }
}
