//! AS metadata lens module
//!
//! This module provides the `AsMetaLens` resolving an ASN to the AS ownership
//! metadata valid on a given day. Special-purpose ASNs are classified from the
//! IANA registry ranges before the ownership history is consulted:
//!
//! | Range | Category | RFC |
//! |-------|----------|-----|
//! | 64496-64511, 65536-65551 | documentation and sample code | RFC 5398 |
//! | 64512-65534, 4200000000-4294967294 | private use | RFC 6996 |
//! | 65535, 65552-131071, 4294967295 | reserved | RFC 7300, RFC 6793 |
//!
//! # Example
//!
//! ```rust,ignore
//! use asn_enrich::datasets::AsOrgHistory;
//! use std::path::Path;
//! use asn_enrich::lens::asmeta::AsMetaLens;
//!
//! let history = AsOrgHistory::from_path(Path::new("outputs/all_as_org_map.json"))?;
//! let lens = AsMetaLens::new(&history);
//!
//! let meta = lens.resolve(13335, "20230101");
//! println!("{} ({})", meta.org_name, meta.country);
//! ```

use crate::datasets::AsOrgHistory;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::warn;

/// Country code used for ASNs without a registered organization
pub const UNKNOWN_COUNTRY: &str = "ZZ";

// =============================================================================
// Types
// =============================================================================

/// Where resolved metadata came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsnCategory {
    /// Reserved for documentation and sample code
    Documentation,
    /// Reserved for private use
    PrivateUse,
    /// Reserved by the protocol
    Reserved,
    /// Not present in the ownership history
    Unassigned,
    /// Found in the ownership history
    Assigned,
}

impl AsnCategory {
    /// Organization name reported for special-purpose and unassigned ASNs
    pub fn placeholder_name(&self) -> Option<&'static str> {
        match self {
            AsnCategory::Documentation => {
                Some("Reserved for use in documentation and sample code")
            }
            AsnCategory::PrivateUse => Some("Reserved for private use"),
            AsnCategory::Reserved => Some("Reserved"),
            AsnCategory::Unassigned => Some("Unassigned"),
            AsnCategory::Assigned => None,
        }
    }

    /// True for the documentation, private-use and reserved ranges
    pub fn is_special_purpose(&self) -> bool {
        matches!(
            self,
            AsnCategory::Documentation | AsnCategory::PrivateUse | AsnCategory::Reserved
        )
    }
}

impl Display for AsnCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AsnCategory::Documentation => write!(f, "documentation"),
            AsnCategory::PrivateUse => write!(f, "private_use"),
            AsnCategory::Reserved => write!(f, "reserved"),
            AsnCategory::Unassigned => write!(f, "unassigned"),
            AsnCategory::Assigned => write!(f, "assigned"),
        }
    }
}

/// Classify special-purpose ASNs. Returns `None` for ASNs that must be
/// looked up in the ownership history.
pub fn classify_asn(asn: u32) -> Option<AsnCategory> {
    match asn {
        64496..=64511 | 65536..=65551 => Some(AsnCategory::Documentation),
        64512..=65534 | 4_200_000_000..=4_294_967_294 => Some(AsnCategory::PrivateUse),
        65535 | 65552..=131071 | 4_294_967_295 => Some(AsnCategory::Reserved),
        _ => None,
    }
}

/// AS metadata for one ASN on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsMeta {
    pub org_name: String,
    pub country: String,
    pub as_name: String,
    pub category: AsnCategory,
}

impl AsMeta {
    fn placeholder(category: AsnCategory) -> Self {
        AsMeta {
            org_name: category.placeholder_name().unwrap_or_default().to_string(),
            country: UNKNOWN_COUNTRY.to_string(),
            as_name: String::new(),
            category,
        }
    }
}

// =============================================================================
// Lens
// =============================================================================

/// Resolves ASNs against a borrowed ownership history
pub struct AsMetaLens<'a> {
    history: &'a AsOrgHistory,
}

impl<'a> AsMetaLens<'a> {
    pub fn new(history: &'a AsOrgHistory) -> Self {
        Self { history }
    }

    /// Resolve `asn` as of `day` (YYYYMMDD).
    ///
    /// ASNs missing from the history resolve to "Unassigned" and log one
    /// warning per call.
    pub fn resolve(&self, asn: u32, day: &str) -> AsMeta {
        if let Some(category) = classify_asn(asn) {
            return AsMeta::placeholder(category);
        }

        match self.history.record_on(asn, day) {
            Some(record) => AsMeta {
                org_name: record.org_name.clone(),
                country: record.country.clone(),
                as_name: record.as_name.clone(),
                category: AsnCategory::Assigned,
            },
            None => {
                warn!("Missing ASN for {}", asn);
                AsMeta::placeholder(AsnCategory::Unassigned)
            }
        }
    }
}
