use anyhow::{anyhow, Result};
use asn_enrich::database::{MergeStrategy, MmdbOptions, MmdbWriter};
use asn_enrich::datasets::AsOrgHistory;
use asn_enrich::lens::enrich::{
    validate_day, EnrichLens, EnrichOptions, EnrichProgress, EnrichProgressCallback,
};
use asn_enrich::lens::utils::{render_rows, OutputFormat};
use asn_enrich::AsnEnrichConfig;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Arguments for the Enrich command
#[derive(Args)]
pub struct EnrichArgs {
    /// Day of the prefix-to-AS snapshots, formatted as YYYYMMDD
    #[clap(long = "dayStr", visible_alias = "day-str", value_parser = parse_day)]
    pub day_str: String,

    /// Existing database to enrich; a new one is created if not set
    #[clap(long = "dbFile", visible_alias = "db-file")]
    pub db_file: Option<PathBuf>,

    /// Path of the database to write
    #[clap(long = "outputFile", visible_alias = "output-file")]
    pub output_file: PathBuf,

    /// AS ownership history JSON [default: outputs/all_as_org_map.json]
    #[clap(long = "asOrgMap", visible_alias = "as-org-map")]
    pub as_org_map: Option<String>,

    /// Directory of prefix-to-AS snapshots [default: cache_dir/routeviews-prefix2as]
    #[clap(long = "prefix2asDir", visible_alias = "prefix2as-dir")]
    pub prefix2as_dir: Option<String>,

    /// How records are merged with data already in the database
    #[clap(long, value_enum, default_value_t = MergeStrategy::TopLevelMerge)]
    pub merge: MergeStrategy,

    /// Show a progress spinner
    #[clap(long)]
    pub progress: bool,
}

fn parse_day(s: &str) -> Result<String, String> {
    validate_day(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

pub fn run(config: &AsnEnrichConfig, args: EnrichArgs, output_format: OutputFormat) -> Result<()> {
    let EnrichArgs {
        day_str,
        db_file,
        output_file,
        as_org_map,
        prefix2as_dir,
        merge,
        progress,
    } = args;

    let as_org_map = as_org_map.unwrap_or_else(|| config.as_org_map.clone());
    let prefix2as_dir = prefix2as_dir.unwrap_or_else(|| config.prefix2as_dir.clone());

    let history = AsOrgHistory::from_path(Path::new(&as_org_map))?;

    let options = MmdbOptions {
        database_type: config.database_type.clone(),
        record_size: config.record_size,
        ..Default::default()
    };
    let mut writer = MmdbWriter::open(db_file.as_deref(), options)?;

    let lens = EnrichLens::new(&history, &day_str)?;
    let enrich_options = EnrichOptions {
        strategy: merge,
        ..EnrichOptions::new(prefix2as_dir)
    };

    let pb = match progress {
        true => {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_message("Starting");
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        }
        false => None,
    };
    let callback: Option<EnrichProgressCallback> = pb.clone().map(|pb| {
        Arc::new(move |p: EnrichProgress| match p {
            EnrichProgress::Started { family, file_path } => {
                pb.set_message(format!("{}: reading {}", family, file_path));
            }
            EnrichProgress::Update {
                family,
                lines_processed,
                ..
            } => {
                pb.set_message(format!("{}: processed {} prefixes", family, lines_processed));
            }
            EnrichProgress::FamilyCompleted { stats } => {
                pb.set_message(format!("{}: inserted {} prefixes", stats.family, stats.inserted));
            }
            EnrichProgress::Completed { .. } => {}
        }) as EnrichProgressCallback
    });

    let summary = lens.enrich(&mut writer, &enrich_options, callback)?;

    if let Some(pb) = &pb {
        pb.set_message("Writing database");
    }
    let bytes = writer.to_bytes()?;
    if let Some(parent) = output_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Unable to create {}: {}", parent.display(), e))?;
        }
    }
    std::fs::write(&output_file, &bytes)
        .map_err(|e| anyhow!("Unable to write {}: {}", output_file.display(), e))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    info!(
        "wrote {} bytes to {} in {:.1}s",
        bytes.len(),
        output_file.display(),
        summary.duration_secs
    );

    println!("{}", render_rows(&summary.families, output_format)?);
    Ok(())
}
