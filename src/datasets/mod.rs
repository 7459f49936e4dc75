//! Input datasets: AS ownership history and prefix-to-AS snapshots.

pub mod as2org;
pub mod pfx2as;

pub use as2org::{AsOrgHistory, AsOrgMapBuilder, AsOrgRecord, DEFAULT_AS_ORG_DIR, DEFAULT_AS_ORG_MAP};
pub use pfx2as::{
    parse_line, parse_origin_asn, AddressFamily, Pfx2asLine, Pfx2asReader, DEFAULT_PREFIX2AS_DIR,
};
