use crate::database::{DEFAULT_DATABASE_TYPE, DEFAULT_RECORD_SIZE};
use crate::datasets::{DEFAULT_AS_ORG_DIR, DEFAULT_AS_ORG_MAP, DEFAULT_PREFIX2AS_DIR};
use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Effective settings of asn-enrich. Command line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsnEnrichConfig {
    /// AS ownership history JSON
    pub as_org_map: String,

    /// Directory of RouteViews prefix-to-AS snapshots
    pub prefix2as_dir: String,

    /// Directory of CAIDA AS-organization snapshots
    pub as_org_dir: String,

    /// Database type of freshly created databases
    pub database_type: String,

    /// Record size of freshly created databases (24, 28 or 32)
    pub record_size: u16,
}

pub const EMPTY_CONFIG: &str = r#"### asn-enrich configuration file

### AS ownership history produced by `asn-enrich build-org-map`
# as_org_map = "outputs/all_as_org_map.json"

### RouteViews prefix-to-AS snapshots (routeviews-rv2-YYYYMMDD.pfx2as.gz)
# prefix2as_dir = "cache_dir/routeviews-prefix2as"

### CAIDA AS-organization snapshots (YYYYMMDD.as-org2info.txt.gz)
# as_org_dir = "cache_dir/as-organizations"

### written database settings, used when no existing database is enriched
# database_type = "GeoLite2-ASN"
# record_size = 24
"#;

impl Default for AsnEnrichConfig {
    fn default() -> Self {
        Self {
            as_org_map: DEFAULT_AS_ORG_MAP.to_string(),
            prefix2as_dir: DEFAULT_PREFIX2AS_DIR.to_string(),
            as_org_dir: DEFAULT_AS_ORG_DIR.to_string(),
            database_type: DEFAULT_DATABASE_TYPE.to_string(),
            record_size: DEFAULT_RECORD_SIZE,
        }
    }
}

impl AsnEnrichConfig {
    /// Build the configuration from the config file and the environment.
    ///
    /// Without an explicit path, `$HOME/.asn-enrich/asn-enrich.toml` is read
    /// when it exists.
    pub fn new(path: &Option<String>) -> Result<AsnEnrichConfig> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                if !Path::new(p.as_str()).exists() {
                    return Err(anyhow!("Config file {} does not exist", p));
                }
                builder = builder.add_source(config::File::with_name(p.as_str()));
            }
            None => {
                if let Some(p) = Self::config_file_path() {
                    if Path::new(p.as_str()).exists() {
                        builder = builder.add_source(config::File::with_name(p.as_str()));
                    }
                }
            }
        }

        // E.g., `ASN_ENRICH_AS_ORG_MAP=/data/map.json asn-enrich enrich ...`
        builder = builder.add_source(config::Environment::with_prefix("ASN_ENRICH"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config)
    }

    /// Build the configuration from flattened key-value settings.
    pub fn from_map(config: &HashMap<String, String>) -> Result<AsnEnrichConfig> {
        let defaults = AsnEnrichConfig::default();
        let get = |key: &str, default: String| config.get(key).cloned().unwrap_or(default);

        let record_size = match config.get("record_size") {
            Some(s) => s
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("Invalid record_size {:?}: {}", s, e))?,
            None => defaults.record_size,
        };
        if !matches!(record_size, 24 | 28 | 32) {
            return Err(anyhow!(
                "Invalid record_size {}, must be 24, 28 or 32",
                record_size
            ));
        }

        Ok(AsnEnrichConfig {
            as_org_map: get("as_org_map", defaults.as_org_map),
            prefix2as_dir: get("prefix2as_dir", defaults.prefix2as_dir),
            as_org_dir: get("as_org_dir", defaults.as_org_dir),
            database_type: get("database_type", defaults.database_type),
            record_size,
        })
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let lines = [
            format!(
                "Config File:        {}",
                Self::config_file_path().unwrap_or_else(|| "(none)".to_string())
            ),
            format!("AS Org Map:         {}", self.as_org_map),
            format!("Prefix2as Dir:      {}", self.prefix2as_dir),
            format!("AS Org Dir:         {}", self.as_org_dir),
            format!("Database Type:      {}", self.database_type),
            format!("Record Size:        {}", self.record_size),
        ];
        lines.join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> Option<String> {
        let home_dir = dirs::home_dir()?;
        Some(format!(
            "{}/.asn-enrich/asn-enrich.toml",
            home_dir.to_string_lossy()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AsnEnrichConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config, AsnEnrichConfig::default());
        assert_eq!(config.as_org_map, "outputs/all_as_org_map.json");
        assert_eq!(config.prefix2as_dir, "cache_dir/routeviews-prefix2as");
        assert_eq!(config.record_size, 24);
    }

    #[test]
    fn test_record_size_validation() {
        let mut map = HashMap::new();
        map.insert("record_size".to_string(), "28".to_string());
        assert_eq!(AsnEnrichConfig::from_map(&map).unwrap().record_size, 28);

        map.insert("record_size".to_string(), "20".to_string());
        assert!(AsnEnrichConfig::from_map(&map).is_err());

        map.insert("record_size".to_string(), "big".to_string());
        assert!(AsnEnrichConfig::from_map(&map).is_err());
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asn-enrich.toml");
        std::fs::write(
            &path,
            "as_org_map = \"/data/map.json\"\ndatabase_type = \"Custom-ASN\"\nrecord_size = 32\n",
        )
        .unwrap();

        let config =
            AsnEnrichConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.as_org_map, "/data/map.json");
        assert_eq!(config.database_type, "Custom-ASN");
        assert_eq!(config.record_size, 32);
        assert_eq!(config.prefix2as_dir, DEFAULT_PREFIX2AS_DIR);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(AsnEnrichConfig::new(&Some(path.to_string_lossy().to_string())).is_err());
    }

    #[test]
    fn test_template_is_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.toml");
        std::fs::write(&path, EMPTY_CONFIG).unwrap();
        let config =
            AsnEnrichConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.database_type, DEFAULT_DATABASE_TYPE);
    }
}
