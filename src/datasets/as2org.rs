//! AS ownership history handling utility.
//!
//! Data source:
//! The CAIDA AS Organizations Dataset,
//!      http://www.caida.org/data/as-organizations
//!
//! The history file (`all_as_org_map.json`) maps every ASN to the list of
//! ownership records seen across all snapshots:
//!
//! ```json
//! {"13335": [["Cloudflare, Inc.", "US", "20100714", "CLOUDFLARENET", "ARIN"]]}
//! ```

use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default location of the AS ownership history file
pub const DEFAULT_AS_ORG_MAP: &str = "outputs/all_as_org_map.json";

/// Default directory of CAIDA AS-organization snapshots
pub const DEFAULT_AS_ORG_DIR: &str = "cache_dir/as-organizations";

/// One AS ownership record
///
/// ------------
/// Record fields
/// ------------
/// org_name       : name of the organization holding the AS
/// country        : country of registration of the organization
/// effective_date : first day (YYYYMMDD) this record is valid for
/// as_name        : the name registered for the AS itself
/// source         : the RIR or NIR database which contained this entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsOrgRecord {
    pub org_name: String,
    pub country: String,
    pub effective_date: String,
    pub as_name: String,
    pub source: Option<String>,
}

impl TryFrom<Vec<String>> for AsOrgRecord {
    type Error = String;

    fn try_from(fields: Vec<String>) -> Result<Self, Self::Error> {
        if fields.len() < 4 {
            return Err(format!(
                "expected at least 4 fields (org_name, country, effective_date, as_name), got {}",
                fields.len()
            ));
        }
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        let org_name = next();
        let country = next();
        let effective_date = next();
        let as_name = next();
        let source = fields.next();
        Ok(AsOrgRecord {
            org_name,
            country,
            effective_date,
            as_name,
            source,
        })
    }
}

impl<'de> Deserialize<'de> for AsOrgRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Vec::<String>::deserialize(deserializer)?;
        AsOrgRecord::try_from(fields).map_err(D::Error::custom)
    }
}

impl Serialize for AsOrgRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = vec![
            self.org_name.as_str(),
            self.country.as_str(),
            self.effective_date.as_str(),
            self.as_name.as_str(),
        ];
        if let Some(source) = &self.source {
            fields.push(source.as_str());
        }
        fields.serialize(serializer)
    }
}

/// ASN ownership history: every ASN mapped to its records in chronological order.
///
/// Built once and only read afterwards.
#[derive(Debug, Default)]
pub struct AsOrgHistory {
    records: HashMap<u32, Vec<AsOrgRecord>>,
}

impl AsOrgHistory {
    /// Load the history from a JSON file; compressed files (`.gz`, `.bz2`)
    /// are decoded by extension.
    pub fn from_path(path: &Path) -> Result<AsOrgHistory> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 path {}", path.display()))?;
        info!("loading AS organization history from {}", path_str);
        let raw = oneio::read_json_struct::<HashMap<String, Vec<AsOrgRecord>>>(path_str)
            .map_err(|e| anyhow!("unable to load AS organization map {}: {}", path_str, e))?;
        let history = AsOrgHistory::from_raw(raw);
        info!("loaded ownership history for {} ASNs", history.len());
        Ok(history)
    }

    /// Parse the history from a JSON string.
    pub fn from_json_str(json: &str) -> Result<AsOrgHistory> {
        let raw: HashMap<String, Vec<AsOrgRecord>> =
            serde_json::from_str(json).context("invalid AS organization map")?;
        Ok(AsOrgHistory::from_raw(raw))
    }

    fn from_raw(raw: HashMap<String, Vec<AsOrgRecord>>) -> AsOrgHistory {
        let mut records = HashMap::with_capacity(raw.len());
        for (key, mut list) in raw {
            let asn = match key.parse::<u32>() {
                Ok(asn) => asn,
                Err(_) => {
                    warn!("skipping invalid ASN key {:?} in AS organization map", key);
                    continue;
                }
            };
            // stable, so same-day records keep their file order
            list.sort_by(|a, b| a.effective_date.cmp(&b.effective_date));
            records.insert(asn, list);
        }
        AsOrgHistory { records }
    }

    /// All records of an ASN, oldest first
    pub fn records(&self, asn: u32) -> Option<&[AsOrgRecord]> {
        self.records.get(&asn).map(|v| v.as_slice())
    }

    /// Record valid for `asn` on `day`.
    ///
    /// Picks the last record whose effective date is on or before `day`,
    /// falling back to the oldest record when all of them are later.
    pub fn record_on(&self, asn: u32, day: &str) -> Option<&AsOrgRecord> {
        let records = self.records.get(&asn)?;
        let idx = records.partition_point(|r| r.effective_date.as_str() <= day);
        match idx {
            0 => records.first(),
            _ => records.get(idx - 1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Building the history from CAIDA snapshots
// =============================================================================

/// Builds the AS ownership history from CAIDA `as-org2info` snapshot files.
///
/// Each snapshot (`YYYYMMDD.as-org2info.txt.gz`) has an organization section
/// followed by an AS section:
///
/// ```text
/// # format:org_id|changed|org_name|country|source
/// CLOUD14-ARIN|20170128|Cloudflare, Inc.|US|ARIN
/// # format:aut|changed|aut_name|org_id|opaque_id|source
/// 13335|20170128|CLOUDFLARENET|CLOUD14-ARIN|...|ARIN
/// ```
#[derive(Debug, Default)]
pub struct AsOrgMapBuilder {
    map: BTreeMap<u32, Vec<AsOrgRecord>>,
}

impl AsOrgMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every `*.txt.gz` snapshot of `dir`, in file name order.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize> {
        let files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("unable to read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".txt.gz"))
                    .unwrap_or(false)
            })
            .sorted()
            .collect();

        for file in &files {
            let day = file
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split('.').next())
                .ok_or_else(|| anyhow!("invalid snapshot file name {}", file.display()))?
                .to_string();
            let path = file
                .to_str()
                .ok_or_else(|| anyhow!("non UTF-8 path {}", file.display()))?;

            info!("reading AS organization snapshot {}", path);
            let reader = oneio::get_reader(path)
                .map_err(|e| anyhow!("unable to open {}: {}", path, e))?;
            self.add_snapshot(std::io::BufReader::new(reader), &day)
                .with_context(|| format!("failed to parse {}", path))?;
        }
        Ok(files.len())
    }

    /// Merge one snapshot taken on `day` into the history.
    pub fn add_snapshot<R: BufRead>(&mut self, reader: R, day: &str) -> Result<()> {
        for (asn, record) in parse_snapshot(reader, day)? {
            let list = self.map.entry(asn).or_default();
            if list.contains(&record) {
                continue;
            }
            list.push(record);
            list.sort_by(|a, b| a.effective_date.cmp(&b.effective_date));
            // collapse consecutive records of the same organization, keeping the first
            list.dedup_by(|later, earlier| {
                later.org_name == earlier.org_name && later.country == earlier.country
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// JSON object keyed by ASN string, keys in sorted order.
    pub fn to_json(&self) -> Result<String> {
        let out: BTreeMap<String, &Vec<AsOrgRecord>> = self
            .map
            .iter()
            .map(|(asn, records)| (asn.to_string(), records))
            .collect();
        Ok(serde_json::to_string(&out)?)
    }

    /// Write the history file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("unable to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("unable to write {}", path.display()))?;
        info!("wrote {} ASNs to {}", self.map.len(), path.display());
        Ok(())
    }
}

/// Parse a single snapshot into one record per ASN.
fn parse_snapshot<R: BufRead>(reader: R, day: &str) -> Result<BTreeMap<u32, AsOrgRecord>> {
    let mut orgs: HashMap<String, (String, String)> = HashMap::new();
    let mut ases: BTreeMap<u32, AsOrgRecord> = BTreeMap::new();
    let mut in_as_section = false;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.starts_with("# format:aut") {
            in_as_section = true;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        if !in_as_section {
            if fields.len() < 4 {
                return Err(anyhow!("line {}: malformed organization row", line_no + 1));
            }
            let org_id = fields[0].to_string();
            if orgs.contains_key(&org_id) {
                return Err(anyhow!("line {}: duplicate org_id {}", line_no + 1, org_id));
            }
            orgs.insert(org_id, (fields[2].to_string(), fields[3].to_string()));
            continue;
        }

        if fields.len() < 4 {
            return Err(anyhow!("line {}: malformed AS row", line_no + 1));
        }
        let asn = fields[0]
            .parse::<u32>()
            .map_err(|_| anyhow!("line {}: invalid ASN {:?}", line_no + 1, fields[0]))?;
        let changed = match fields[1] {
            "" => day.to_string(),
            c => c.to_string(),
        };
        let org_id = fields[3];
        let (org_name, country) = orgs
            .get(org_id)
            .ok_or_else(|| anyhow!("line {}: unknown org_id {} for AS{}", line_no + 1, org_id, asn))?;

        let record = AsOrgRecord {
            org_name: org_name.clone(),
            country: country.clone(),
            effective_date: changed,
            as_name: fields[2].to_string(),
            source: fields.last().map(|s| s.to_string()),
        };

        // present in several registries: keep the freshest
        if let Some(existing) = ases.get(&asn) {
            if existing.org_name != record.org_name {
                debug!(
                    "AS{} has different organizations across registries: {:?} vs {:?}",
                    asn, existing.org_name, record.org_name
                );
            }
            if record.effective_date < existing.effective_date {
                continue;
            }
        }
        ases.insert(asn, record);
    }

    Ok(ases)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = r#"{"100": [["OrgB","DE","20220101","AS-B"],["OrgA","US","20200101","AS-A"]], "abc": []}"#;

    const SNAPSHOT: &str = "# format:org_id|changed|org_name|country|source
ORG-A|20200101|Org A|US|ARIN
ORG-B|20200101|Org B|DE|RIPE
# format:aut|changed|aut_name|org_id|opaque_id|source
100|20200105|AS-A|ORG-A||ARIN
200||AS-B|ORG-B||RIPE
200|20190101|AS-B-OLD|ORG-A||ARIN
";

    #[test]
    fn test_record_from_fields() {
        let fields = vec!["Org", "US", "20200101", "AS-ORG", "ARIN"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let record = AsOrgRecord::try_from(fields).unwrap();
        assert_eq!(record.org_name, "Org");
        assert_eq!(record.as_name, "AS-ORG");
        assert_eq!(record.source.as_deref(), Some("ARIN"));

        let short = vec!["Org".to_string(), "US".to_string()];
        assert!(AsOrgRecord::try_from(short).is_err());
    }

    #[test]
    fn test_history_sorted_and_selected() {
        let history = AsOrgHistory::from_json_str(HISTORY).unwrap();
        // the invalid key is skipped
        assert_eq!(history.len(), 1);

        let records = history.records(100).unwrap();
        assert_eq!(records[0].effective_date, "20200101");

        assert_eq!(history.record_on(100, "20210601").unwrap().org_name, "OrgA");
        assert_eq!(history.record_on(100, "20220101").unwrap().org_name, "OrgB");
        assert_eq!(history.record_on(100, "20230101").unwrap().org_name, "OrgB");
        assert_eq!(history.record_on(100, "20190101").unwrap().org_name, "OrgA");
        assert!(history.record_on(200, "20230101").is_none());
    }

    #[test]
    fn test_malformed_history_record() {
        let json = r#"{"100": [["OrgA","US"]]}"#;
        assert!(AsOrgHistory::from_json_str(json).is_err());
    }

    #[test]
    fn test_parse_snapshot() {
        let ases = parse_snapshot(SNAPSHOT.as_bytes(), "20200201").unwrap();
        assert_eq!(ases.len(), 2);

        let a = &ases[&100];
        assert_eq!(a.org_name, "Org A");
        assert_eq!(a.effective_date, "20200105");
        assert_eq!(a.source.as_deref(), Some("ARIN"));

        // empty changed falls back to the snapshot day, which is fresher
        let b = &ases[&200];
        assert_eq!(b.org_name, "Org B");
        assert_eq!(b.effective_date, "20200201");
    }

    #[test]
    fn test_parse_snapshot_unknown_org() {
        let snapshot = "# format:aut|changed|aut_name|org_id|opaque_id|source
100|20200105|AS-A|MISSING||ARIN
";
        assert!(parse_snapshot(snapshot.as_bytes(), "20200201").is_err());
    }

    #[test]
    fn test_builder_dedups_consecutive_owners() {
        let mut builder = AsOrgMapBuilder::new();
        let day1 = "# format:org_id|changed|org_name|country|source
ORG-A|20200101|Org A|US|ARIN
# format:aut|changed|aut_name|org_id|opaque_id|source
100|20200101|AS-A|ORG-A||ARIN
";
        let day2 = "# format:org_id|changed|org_name|country|source
ORG-A|20200101|Org A|US|ARIN
# format:aut|changed|aut_name|org_id|opaque_id|source
100|20200601|AS-A-RENAMED|ORG-A||ARIN
";
        let day3 = "# format:org_id|changed|org_name|country|source
ORG-C|20210101|Org C|NL|RIPE
# format:aut|changed|aut_name|org_id|opaque_id|source
100|20210101|AS-C|ORG-C||RIPE
";
        builder.add_snapshot(day1.as_bytes(), "20200101").unwrap();
        builder.add_snapshot(day2.as_bytes(), "20200601").unwrap();
        builder.add_snapshot(day3.as_bytes(), "20210101").unwrap();

        let json = builder.to_json().unwrap();
        let history = AsOrgHistory::from_json_str(&json).unwrap();
        let records = history.records(100).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_name, "AS-A");
        assert_eq!(records[1].org_name, "Org C");
    }

    #[test]
    fn test_builder_reads_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("20200201.as-org2info.txt.gz");
        let path = file.to_str().unwrap();
        {
            let mut writer = oneio::get_writer(path).unwrap();
            std::io::Write::write_all(&mut writer, SNAPSHOT.as_bytes()).unwrap();
        }
        std::fs::write(dir.path().join("README"), "not a snapshot").unwrap();

        let mut builder = AsOrgMapBuilder::new();
        assert_eq!(builder.add_dir(dir.path()).unwrap(), 1);
        assert_eq!(builder.len(), 2);

        let out = dir.path().join("outputs").join("all_as_org_map.json");
        builder.write(&out).unwrap();
        let history = AsOrgHistory::from_path(&out).unwrap();
        assert_eq!(history.record_on(200, "20200301").unwrap().as_name, "AS-B");
    }

    #[cfg(unix)]
    #[test]
    fn test_from_path_rejects_non_utf8() {
        use std::os::unix::ffi::OsStrExt;
        let path = Path::new(std::ffi::OsStr::from_bytes(b"outputs/\xff.json"));
        let err = AsOrgHistory::from_path(path).unwrap_err();
        assert!(err.to_string().contains("non UTF-8 path"));
    }
}
