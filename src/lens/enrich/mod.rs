//! Enrichment lens module
//!
//! This module provides the `EnrichLens` joining RouteViews prefix-to-AS
//! snapshots with the AS ownership history and merging the result into a
//! prefix database. For every prefix the output record is:
//!
//! | Key | Type |
//! |-----|------|
//! | `autonomous_system_number` | uint32 |
//! | `autonomous_system_organization` | string |
//! | `autonomous_system_country` | string |
//! | `autonomous_system_name` | string |
//!
//! Malformed snapshot lines abort the run; a record that cannot be merged into
//! the database is logged and skipped.
//!
//! # Progress Tracking
//!
//! ```rust,ignore
//! use asn_enrich::lens::enrich::{EnrichLens, EnrichOptions, EnrichProgress};
//! use std::sync::Arc;
//!
//! let lens = EnrichLens::new(&history, "20230101")?;
//! let callback = Arc::new(|progress: EnrichProgress| {
//!     if let EnrichProgress::FamilyCompleted { stats } = progress {
//!         println!("{}: {} prefixes", stats.family, stats.inserted);
//!     }
//! });
//! let summary = lens.enrich(&mut writer, &EnrichOptions::new("cache_dir/routeviews-prefix2as"), Some(callback))?;
//! ```

use crate::database::{MergeStrategy, MmdbMap, MmdbValue, PrefixDatabase};
use crate::datasets::{AddressFamily, AsOrgHistory, Pfx2asReader};
use crate::lens::asmeta::{AsMeta, AsMetaLens, AsnCategory};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[cfg(feature = "display")]
use tabled::Tabled;

pub const KEY_ASN: &str = "autonomous_system_number";
pub const KEY_ORGANIZATION: &str = "autonomous_system_organization";
pub const KEY_COUNTRY: &str = "autonomous_system_country";
pub const KEY_NAME: &str = "autonomous_system_name";

// =============================================================================
// Progress Tracking Types
// =============================================================================

/// Progress update interval for enrichment (every 100,000 lines)
pub const ENRICH_PROGRESS_INTERVAL: u64 = 100_000;

/// Progress information for enrichment runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EnrichProgress {
    /// A snapshot file has been opened
    Started {
        family: AddressFamily,
        file_path: String,
    },
    /// Progress update (emitted every ENRICH_PROGRESS_INTERVAL lines)
    Update {
        family: AddressFamily,
        lines_processed: u64,
        elapsed_secs: f64,
    },
    /// A snapshot file has been fully ingested
    FamilyCompleted { stats: FamilyStats },
    /// All families are done
    Completed {
        total_lines: u64,
        total_inserted: u64,
        duration_secs: f64,
    },
}

/// Type alias for progress callback function
pub type EnrichProgressCallback = Arc<dyn Fn(EnrichProgress) + Send + Sync>;

// =============================================================================
// Types
// =============================================================================

/// Counters for one ingested snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "display", derive(Tabled))]
pub struct FamilyStats {
    pub family: AddressFamily,
    /// Prefix lines read
    pub lines: u64,
    /// Records merged into the database
    pub inserted: u64,
    /// Records the database rejected
    pub insert_failures: u64,
    /// Origins missing from the ownership history
    pub unassigned: u64,
    /// Documentation, private-use and reserved origins
    pub special_purpose: u64,
}

impl FamilyStats {
    fn new(family: AddressFamily) -> Self {
        FamilyStats {
            family,
            lines: 0,
            inserted: 0,
            insert_failures: 0,
            unassigned: 0,
            special_purpose: 0,
        }
    }
}

/// Result of an enrichment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichSummary {
    pub day: String,
    pub families: Vec<FamilyStats>,
    pub duration_secs: f64,
}

impl EnrichSummary {
    pub fn total_inserted(&self) -> u64 {
        self.families.iter().map(|f| f.inserted).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.families.iter().map(|f| f.insert_failures).sum()
    }
}

// =============================================================================
// Args
// =============================================================================

/// Where and how snapshots are ingested
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Directory holding `routeviews-{rv2|rv6}-{day}.pfx2as.gz`
    pub prefix2as_dir: PathBuf,
    /// Families to ingest, in order
    pub families: Vec<AddressFamily>,
    /// How records are merged with existing data
    pub strategy: MergeStrategy,
}

impl EnrichOptions {
    pub fn new(prefix2as_dir: impl Into<PathBuf>) -> Self {
        EnrichOptions {
            prefix2as_dir: prefix2as_dir.into(),
            families: AddressFamily::ALL.to_vec(),
            strategy: MergeStrategy::TopLevelMerge,
        }
    }

    pub fn with_families(mut self, families: Vec<AddressFamily>) -> Self {
        self.families = families;
        self
    }
}

/// Check a day string is a valid `YYYYMMDD` date.
pub fn validate_day(day: &str) -> Result<()> {
    if day.len() != 8 || !day.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("day must be formatted as YYYYMMDD: {:?}", day));
    }
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .map_err(|e| anyhow!("invalid day {:?}: {}", day, e))?;
    Ok(())
}

/// Build the database record for an origin ASN.
pub fn asn_record(asn: u32, meta: &AsMeta) -> MmdbValue {
    let mut map = MmdbMap::new();
    map.insert(KEY_ASN.to_string(), MmdbValue::Uint32(asn));
    map.insert(KEY_ORGANIZATION.to_string(), meta.org_name.as_str().into());
    map.insert(KEY_COUNTRY.to_string(), meta.country.as_str().into());
    map.insert(KEY_NAME.to_string(), meta.as_name.as_str().into());
    MmdbValue::Map(map)
}

// =============================================================================
// Lens
// =============================================================================

/// Joins prefix-to-AS snapshots of one day with the ownership history
pub struct EnrichLens<'a> {
    resolver: AsMetaLens<'a>,
    day: String,
}

impl<'a> EnrichLens<'a> {
    pub fn new(history: &'a AsOrgHistory, day: &str) -> Result<Self> {
        validate_day(day)?;
        Ok(Self {
            resolver: AsMetaLens::new(history),
            day: day.to_string(),
        })
    }

    pub fn day(&self) -> &str {
        &self.day
    }

    /// Ingest the snapshot of every configured family into `db`.
    pub fn enrich<D: PrefixDatabase>(
        &self,
        db: &mut D,
        options: &EnrichOptions,
        callback: Option<EnrichProgressCallback>,
    ) -> Result<EnrichSummary> {
        let start = Instant::now();
        let mut families = Vec::with_capacity(options.families.len());

        for family in &options.families {
            let path = family.snapshot_path(&options.prefix2as_dir, &self.day);
            info!("ingesting {} prefixes from {}", family, path.display());
            if let Some(cb) = &callback {
                cb(EnrichProgress::Started {
                    family: *family,
                    file_path: path.display().to_string(),
                });
            }

            let reader = Pfx2asReader::open(&path)?;
            let stats = self
                .ingest(*family, reader, db, options.strategy, callback.clone())
                .with_context(|| format!("failed to ingest {}", path.display()))?;
            info!(
                "{}: {} lines, {} inserted, {} failed, {} unassigned",
                family, stats.lines, stats.inserted, stats.insert_failures, stats.unassigned
            );
            if let Some(cb) = &callback {
                cb(EnrichProgress::FamilyCompleted {
                    stats: stats.clone(),
                });
            }
            families.push(stats);
        }

        let duration_secs = start.elapsed().as_secs_f64();
        let summary = EnrichSummary {
            day: self.day.clone(),
            families,
            duration_secs,
        };
        if let Some(cb) = &callback {
            cb(EnrichProgress::Completed {
                total_lines: summary.families.iter().map(|f| f.lines).sum(),
                total_inserted: summary.total_inserted(),
                duration_secs,
            });
        }
        Ok(summary)
    }

    /// Ingest one snapshot stream. Any malformed line aborts with an error.
    pub fn ingest<R: BufRead, D: PrefixDatabase>(
        &self,
        family: AddressFamily,
        reader: Pfx2asReader<R>,
        db: &mut D,
        strategy: MergeStrategy,
        callback: Option<EnrichProgressCallback>,
    ) -> Result<FamilyStats> {
        let start = Instant::now();
        let mut stats = FamilyStats::new(family);

        for entry in reader {
            let entry = entry?;
            stats.lines += 1;

            let meta = self.resolver.resolve(entry.origin_asn, &self.day);
            match meta.category {
                AsnCategory::Unassigned => stats.unassigned += 1,
                c if c.is_special_purpose() => stats.special_purpose += 1,
                _ => {}
            }

            let record = asn_record(entry.origin_asn, &meta);
            match db.insert(entry.prefix, record, strategy) {
                Ok(()) => stats.inserted += 1,
                Err(e) => {
                    warn!(
                        "Failed to insert {} (AS{} {}): {}",
                        entry.prefix, entry.origin_asn, meta.org_name, e
                    );
                    stats.insert_failures += 1;
                }
            }

            if stats.lines % ENRICH_PROGRESS_INTERVAL == 0 {
                if let Some(cb) = &callback {
                    cb(EnrichProgress::Update {
                        family,
                        lines_processed: stats.lines,
                        elapsed_secs: start.elapsed().as_secs_f64(),
                    });
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MmdbOptions, MmdbWriter};
    use std::io::Write;
    use std::sync::Mutex;

    const HISTORY: &str = r#"{
        "13335": [["Cloudflare, Inc.","US","20100714","CLOUDFLARENET","ARIN"]],
        "100": [["OrgA","US","20200101","AS-A"],["OrgB","DE","20220101","AS-B"]]
    }"#;

    fn write_gz(path: &std::path::Path, content: &str) {
        let mut writer = oneio::get_writer(path.to_str().unwrap()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }

    fn snapshot_dir(v4: &str, v6: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_gz(
            &AddressFamily::Ipv4.snapshot_path(dir.path(), "20230101"),
            v4,
        );
        write_gz(
            &AddressFamily::Ipv6.snapshot_path(dir.path(), "20230101"),
            v6,
        );
        dir
    }

    #[test]
    fn test_validate_day() {
        assert!(validate_day("20230101").is_ok());
        assert!(validate_day("20230230").is_err());
        assert!(validate_day("2023-01-01").is_err());
        assert!(validate_day("2023011").is_err());
        assert!(validate_day("").is_err());
    }

    #[test]
    fn test_asn_record_keys() {
        let meta = AsMeta {
            org_name: "OrgB".to_string(),
            country: "DE".to_string(),
            as_name: "AS-B".to_string(),
            category: AsnCategory::Assigned,
        };
        let record = asn_record(100, &meta);
        assert_eq!(record.get(KEY_ASN), Some(&MmdbValue::Uint32(100)));
        assert_eq!(record.get(KEY_ORGANIZATION).and_then(|v| v.as_str()), Some("OrgB"));
        assert_eq!(record.get(KEY_COUNTRY).and_then(|v| v.as_str()), Some("DE"));
        assert_eq!(record.get(KEY_NAME).and_then(|v| v.as_str()), Some("AS-B"));
    }

    #[test]
    fn test_enrich_round_trip() {
        let dir = snapshot_dir(
            "1.1.1.0\t24\t13335\n192.0.2.0\t24\t64501_64502,64503\n198.51.100.0\t24\t999\n",
            "2606:4700::\t32\t13335\n2001:db8::\t32\t100\n",
        );
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let mut writer = MmdbWriter::new(MmdbOptions::default()).unwrap();

        let summary = lens
            .enrich(&mut writer, &EnrichOptions::new(dir.path()), None)
            .unwrap();
        assert_eq!(summary.families.len(), 2);
        assert_eq!(summary.families[0].lines, 3);
        assert_eq!(summary.families[0].unassigned, 1);
        assert_eq!(summary.families[0].special_purpose, 1);
        assert_eq!(summary.families[1].lines, 2);
        assert_eq!(summary.total_inserted(), 5);
        assert_eq!(summary.total_failures(), 0);

        let reader = maxminddb::Reader::from_source(writer.to_bytes().unwrap()).unwrap();
        let record: MmdbValue = reader.lookup("1.1.1.1".parse().unwrap()).unwrap();
        assert_eq!(record.get(KEY_ASN).and_then(|v| v.as_u64()), Some(13335));
        assert_eq!(
            record.get(KEY_ORGANIZATION).and_then(|v| v.as_str()),
            Some("Cloudflare, Inc.")
        );
        assert_eq!(record.get(KEY_COUNTRY).and_then(|v| v.as_str()), Some("US"));

        let record: MmdbValue = reader.lookup("192.0.2.10".parse().unwrap()).unwrap();
        assert_eq!(record.get(KEY_ASN).and_then(|v| v.as_u64()), Some(64501));
        assert_eq!(
            record.get(KEY_ORGANIZATION).and_then(|v| v.as_str()),
            Some("Reserved for use in documentation and sample code")
        );

        let record: MmdbValue = reader.lookup("198.51.100.1".parse().unwrap()).unwrap();
        assert_eq!(
            record.get(KEY_ORGANIZATION).and_then(|v| v.as_str()),
            Some("Unassigned")
        );

        let record: MmdbValue = reader.lookup("2001:db8:ffff::1".parse().unwrap()).unwrap();
        assert_eq!(record.get(KEY_NAME).and_then(|v| v.as_str()), Some("AS-B"));
        assert_eq!(record.get(KEY_COUNTRY).and_then(|v| v.as_str()), Some("DE"));
    }

    #[test]
    fn test_malformed_origin_aborts() {
        let dir = snapshot_dir(
            "1.1.1.0\t24\t13335\n1.0.0.0\t24\tnot-an-asn\n8.8.8.0\t24\t15169\n",
            "",
        );
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let mut writer = MmdbWriter::new(MmdbOptions::default()).unwrap();

        let err = lens
            .enrich(&mut writer, &EnrichOptions::new(dir.path()), None)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("invalid ASN"));
        // nothing after the bad line was ingested
        assert!(writer.lookup("8.8.8.8".parse().unwrap()).is_none());
    }

    #[test]
    fn test_missing_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let history = AsOrgHistory::default();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let mut writer = MmdbWriter::new(MmdbOptions::default()).unwrap();
        assert!(lens
            .enrich(&mut writer, &EnrichOptions::new(dir.path()), None)
            .is_err());
    }

    #[test]
    fn test_insert_failures_are_skipped() {
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let options = MmdbOptions {
            ip_version: 4,
            ..Default::default()
        };
        let mut writer = MmdbWriter::new(options).unwrap();

        let data = "2606:4700::\t32\t13335\n1.1.1.0\t24\t13335\n";
        let stats = lens
            .ingest(
                AddressFamily::Ipv6,
                Pfx2asReader::new(data.as_bytes()),
                &mut writer,
                MergeStrategy::TopLevelMerge,
                None,
            )
            .unwrap();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.insert_failures, 1);
        assert!(writer.lookup("1.1.1.1".parse().unwrap()).is_some());
    }

    #[test]
    fn test_aliased_prefixes_are_insert_failures() {
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let mut writer = MmdbWriter::new(MmdbOptions::default()).unwrap();

        let data = "2002::\t16\t13335\n2606:4700::\t32\t13335\n";
        let stats = lens
            .ingest(
                AddressFamily::Ipv6,
                Pfx2asReader::new(data.as_bytes()),
                &mut writer,
                MergeStrategy::TopLevelMerge,
                None,
            )
            .unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.insert_failures, 1);
        assert!(writer.lookup("2002::1".parse().unwrap()).is_none());
        assert!(writer.lookup("2606:4700::1".parse().unwrap()).is_some());
    }

    #[test]
    fn test_progress_callbacks() {
        let dir = snapshot_dir("1.1.1.0\t24\t13335\n", "2606:4700::\t32\t13335\n");
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        let lens = EnrichLens::new(&history, "20230101").unwrap();
        let mut writer = MmdbWriter::new(MmdbOptions::default()).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: EnrichProgressCallback = Arc::new(move |p: EnrichProgress| {
            sink.lock().unwrap().push(p);
        });
        lens.enrich(&mut writer, &EnrichOptions::new(dir.path()), Some(callback))
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events[0],
            EnrichProgress::Started {
                family: AddressFamily::Ipv4,
                ..
            }
        ));
        assert!(matches!(events[1], EnrichProgress::FamilyCompleted { .. }));
        assert!(matches!(
            events[4],
            EnrichProgress::Completed {
                total_lines: 2,
                total_inserted: 2,
                ..
            }
        ));
    }
}
