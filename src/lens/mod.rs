//! Lens module
//!
//! This module provides the high-level "lens" abstractions of asn-enrich. Each
//! lens combines the dataset parsers with the output database and is reusable
//! from the CLI or as a library.
//!
//! | Lens | Purpose |
//! |------|---------|
//! | `AsMetaLens` | Resolve an ASN to organization, country and AS name on a day |
//! | `EnrichLens` | Join prefix-to-AS snapshots with the ownership history into a database |
//! | `ValidateLens` | Spot-check a written database with random lookups |
//!
//! # Architecture
//!
//! Each lens module exports:
//! - A **Lens struct** - the main entry point for all operations
//! - **Args/Options structs** - input arguments for lens methods
//! - **Output types** - summaries and reports, renderable with [`utils::OutputFormat`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use asn_enrich::lens::asmeta::AsMetaLens;
//! use asn_enrich::lens::enrich::{EnrichLens, EnrichOptions};
//! use asn_enrich::lens::validate::{ValidateArgs, ValidateLens};
//! ```

pub mod utils;

pub mod asmeta;
pub mod enrich;
pub mod validate;
