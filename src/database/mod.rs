//! Database module
//!
//! This module provides the output database for asn-enrich:
//!
//! - **mmdb**: MaxMind DB writer (search tree, data section encoder, loader)
//!
//! # Architecture
//!
//! ```text
//! database/
//! └── mmdb/           # MaxMind DB output
//!     ├── tree        # In-memory binary trie with merge-insert
//!     ├── encoder     # Data section serialization
//!     └── value       # Typed MMDB values and merge strategies
//! ```
//!
//! The enrichment pipeline only talks to the output through the
//! [`PrefixDatabase`] trait: open, insert with a merge strategy, serialize.
//!
//! # Usage
//!
//! ```rust,ignore
//! use asn_enrich::database::{MmdbOptions, MmdbWriter};
//!
//! // Enrich an existing database, or start from scratch
//! let writer = MmdbWriter::open(Some(Path::new("GeoLite2-Country.mmdb")), MmdbOptions::default())?;
//! ```

pub mod mmdb;

pub use mmdb::{
    MergeStrategy, MmdbMap, MmdbOptions, MmdbValue, MmdbWriter, DEFAULT_DATABASE_TYPE,
    DEFAULT_RECORD_SIZE,
};

use anyhow::Result;
use ipnet::IpNet;
use std::net::IpAddr;

/// A prefix-keyed database that enrichment results are merged into
pub trait PrefixDatabase {
    /// Merge-insert `value` for every address in `network`.
    fn insert(&mut self, network: IpNet, value: MmdbValue, strategy: MergeStrategy) -> Result<()>;

    /// Longest-prefix lookup.
    fn lookup(&self, addr: IpAddr) -> Option<&MmdbValue>;

    /// Serialize the complete database.
    fn to_bytes(&self) -> Result<Vec<u8>>;
}
