#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! asn-enrich - AS ownership enrichment for MaxMind DB files
//!
//! asn-enrich joins RouteViews prefix-to-AS snapshots with an AS ownership
//! history and writes the result as a MaxMind DB (MMDB) file, either from
//! scratch or by merging into an existing database. It can be used as both a
//! command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting of summaries | `tabled` |
//! | `cli` | CLI binary (default) | `clap`, `indicatif`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`datasets`]**: Input parsers
//!   - `as2org`: AS ownership history and the CAIDA AS-organization map builder
//!   - `pfx2as`: RouteViews prefix-to-AS snapshot reader
//!
//! - **[`database`]**: Output database
//!   - `mmdb`: MaxMind DB writer with merge-insert, loader and serializer
//!
//! - **[`lens`]**: High-level operations
//!   - `asmeta`: ASN to organization resolution with special-purpose ranges
//!   - `enrich`: Snapshot ingestion into the database
//!   - `validate`: Random lookup checks of a written database
//!
//! - **[`config`]**: Configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use asn_enrich::database::{MmdbOptions, MmdbWriter};
//! use asn_enrich::datasets::AsOrgHistory;
//! use std::path::Path;
//! use asn_enrich::lens::enrich::{EnrichLens, EnrichOptions};
//!
//! let history = AsOrgHistory::from_path(Path::new("outputs/all_as_org_map.json"))?;
//! let mut writer = MmdbWriter::new(MmdbOptions::default())?;
//!
//! let lens = EnrichLens::new(&history, "20230101")?;
//! let summary = lens.enrich(
//!     &mut writer,
//!     &EnrichOptions::new("cache_dir/routeviews-prefix2as"),
//!     None,
//! )?;
//! println!("inserted {} prefixes", summary.total_inserted());
//!
//! std::fs::write("outputs/GeoLite2-ASN.mmdb", writer.to_bytes()?)?;
//! ```

pub mod config;
pub mod database;
pub mod datasets;
pub mod lens;

pub use config::AsnEnrichConfig;

pub use database::{MergeStrategy, MmdbOptions, MmdbValue, MmdbWriter, PrefixDatabase};

pub use datasets::{AddressFamily, AsOrgHistory, AsOrgMapBuilder, AsOrgRecord, Pfx2asReader};

pub use lens::asmeta::{classify_asn, AsMeta, AsMetaLens, AsnCategory};
pub use lens::enrich::{EnrichLens, EnrichOptions, EnrichProgress, EnrichSummary};
pub use lens::utils::OutputFormat;
pub use lens::validate::{ValidateArgs, ValidateLens, ValidationReport};
