//! Validation lens module
//!
//! This module provides the `ValidateLens` for spot-checking a written
//! database: random addresses are looked up through the `maxminddb` reader
//! and every record found must carry correctly typed AS fields.
//!
//! # Example
//!
//! ```rust,ignore
//! use asn_enrich::lens::validate::{ValidateArgs, ValidateLens};
//!
//! let args = ValidateArgs::new("outputs/GeoLite2-ASN.mmdb").with_seed(42);
//! let report = ValidateLens::new().validate(&args)?;
//! assert!(report.passed());
//! ```

use crate::database::MmdbValue;
use crate::datasets::AddressFamily;
use crate::lens::enrich::{KEY_ASN, KEY_COUNTRY, KEY_NAME, KEY_ORGANIZATION};
use anyhow::{anyhow, Result};
use maxminddb::Reader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, info, warn};

#[cfg(feature = "display")]
use tabled::Tabled;

/// A family passes with more hits than this
pub const DEFAULT_MIN_HITS: u64 = 100;

/// IPv4 lookups tried before giving up
pub const DEFAULT_MAX_ATTEMPTS_V4: u64 = 100_000;

/// IPv6 lookups tried before giving up
pub const DEFAULT_MAX_ATTEMPTS_V6: u64 = 10_000_000_000;

const STRING_KEYS: [&str; 3] = [KEY_COUNTRY, KEY_NAME, KEY_ORGANIZATION];

// =============================================================================
// Args
// =============================================================================

/// Arguments for database validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct ValidateArgs {
    /// Database file to validate
    pub file: String,

    /// Seed for the address generator, random if not set
    #[cfg_attr(feature = "cli", clap(long))]
    pub seed: Option<u64>,

    /// A family passes with more hits than this
    #[cfg_attr(feature = "cli", clap(long, default_value_t = DEFAULT_MIN_HITS))]
    pub min_hits: u64,

    /// Lookups tried per address family before giving up [default: 100000 for IPv4, 10000000000 for IPv6]
    #[cfg_attr(feature = "cli", clap(long))]
    pub max_attempts: Option<u64>,

    /// Key a record must contain to count as a hit
    #[cfg_attr(feature = "cli", clap(long, default_value = KEY_ASN))]
    pub required_key: String,
}

impl ValidateArgs {
    pub fn new(file: &str) -> Self {
        ValidateArgs {
            file: file.to_string(),
            seed: None,
            min_hits: DEFAULT_MIN_HITS,
            max_attempts: None,
            required_key: KEY_ASN.to_string(),
        }
    }

    /// Lookups to try for `family`.
    pub fn attempt_limit(&self, family: AddressFamily) -> u64 {
        match (self.max_attempts, family) {
            (Some(limit), _) => limit,
            (None, AddressFamily::Ipv4) => DEFAULT_MAX_ATTEMPTS_V4,
            (None, AddressFamily::Ipv6) => DEFAULT_MAX_ATTEMPTS_V6,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// =============================================================================
// Types
// =============================================================================

/// Lookup statistics of one address family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "display", derive(Tabled))]
pub struct FamilyCheck {
    pub family: AddressFamily,
    pub attempts: u64,
    pub hits: u64,
    pub passed: bool,
}

/// Result of a validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub database_type: String,
    pub node_count: u32,
    pub families: Vec<FamilyCheck>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.families.iter().all(|f| f.passed)
    }
}

// =============================================================================
// Lens
// =============================================================================

#[derive(Debug, Default)]
pub struct ValidateLens;

impl ValidateLens {
    pub fn new() -> Self {
        ValidateLens
    }

    /// Open and validate the database named in `args`.
    pub fn validate(&self, args: &ValidateArgs) -> Result<ValidationReport> {
        let reader = Reader::open_readfile(&args.file)
            .map_err(|e| anyhow!("unable to open database {}: {}", args.file, e))?;
        info!("validating {}", args.file);
        self.validate_reader(&reader, args)
    }

    /// Validate an already opened database.
    pub fn validate_reader<S: AsRef<[u8]>>(
        &self,
        reader: &Reader<S>,
        args: &ValidateArgs,
    ) -> Result<ValidationReport> {
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let families: &[AddressFamily] = match reader.metadata.ip_version {
            4 => &[AddressFamily::Ipv4],
            _ => &AddressFamily::ALL,
        };

        let mut checks = Vec::with_capacity(families.len());
        for family in families {
            let check = self.check_family(reader, *family, args, &mut rng)?;
            if check.passed {
                info!(
                    "{}: {} hits in {} lookups",
                    family, check.hits, check.attempts
                );
            } else {
                warn!(
                    "{}: only {} hits in {} lookups, more than {} required",
                    family, check.hits, check.attempts, args.min_hits
                );
            }
            checks.push(check);
        }

        Ok(ValidationReport {
            database_type: reader.metadata.database_type.clone(),
            node_count: reader.metadata.node_count,
            families: checks,
        })
    }

    fn check_family<S: AsRef<[u8]>>(
        &self,
        reader: &Reader<S>,
        family: AddressFamily,
        args: &ValidateArgs,
        rng: &mut StdRng,
    ) -> Result<FamilyCheck> {
        let limit = args.attempt_limit(family);
        let mut attempts = 0u64;
        let mut hits = 0u64;

        while hits <= args.min_hits && attempts < limit {
            attempts += 1;
            let addr = random_address(family, rng);
            let record = match reader.lookup::<MmdbValue>(addr) {
                Ok(record) => record,
                Err(maxminddb::MaxMindDBError::AddressNotFoundError(_)) => continue,
                Err(e) => return Err(anyhow!("lookup of {} failed: {}", addr, e)),
            };
            check_record(addr, &record)?;
            if record.get(&args.required_key).is_some() {
                hits += 1;
                debug!("{} has {}", addr, args.required_key);
            }
        }

        Ok(FamilyCheck {
            family,
            attempts,
            hits,
            passed: hits > args.min_hits,
        })
    }
}

/// Random address outside the lowest block of the family: IPv4 from
/// `[2^24, 2^32)` and IPv6 from `[2^32, 2^128)`.
fn random_address(family: AddressFamily, rng: &mut StdRng) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(rng.gen_range((1u32 << 24)..=u32::MAX))),
        AddressFamily::Ipv6 => {
            IpAddr::V6(Ipv6Addr::from(rng.gen_range((1u128 << 32)..=u128::MAX)))
        }
    }
}

/// Check the AS fields of a record have the expected types.
fn check_record(addr: IpAddr, record: &MmdbValue) -> Result<()> {
    if let Some(value) = record.get(KEY_ASN) {
        if value.as_u64().is_none() {
            return Err(anyhow!(
                "{} at {} is {}, expected an unsigned integer",
                KEY_ASN,
                addr,
                value.type_name()
            ));
        }
    }
    for key in STRING_KEYS {
        if let Some(value) = record.get(key) {
            if value.as_str().is_none() {
                return Err(anyhow!(
                    "{} at {} is {}, expected a string",
                    key,
                    addr,
                    value.type_name()
                ));
            }
        }
    }
    Ok(())
}
