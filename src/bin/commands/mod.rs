pub mod build_org_map;
pub mod config;
pub mod enrich;
pub mod validate;
