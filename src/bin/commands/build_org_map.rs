use anyhow::{anyhow, Result};
use asn_enrich::datasets::AsOrgMapBuilder;
use asn_enrich::AsnEnrichConfig;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the BuildOrgMap command
#[derive(Args)]
pub struct BuildOrgMapArgs {
    /// Directory of CAIDA `YYYYMMDD.as-org2info.txt.gz` snapshots [default: cache_dir/as-organizations]
    #[clap(long)]
    pub input_dir: Option<PathBuf>,

    /// Path of the history JSON to write [default: outputs/all_as_org_map.json]
    #[clap(long)]
    pub output: Option<PathBuf>,
}

pub fn run(config: &AsnEnrichConfig, args: BuildOrgMapArgs) -> Result<()> {
    let input_dir = args
        .input_dir
        .unwrap_or_else(|| PathBuf::from(&config.as_org_dir));
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.as_org_map));

    let mut builder = AsOrgMapBuilder::new();
    let files = builder.add_dir(&input_dir)?;
    if files == 0 {
        return Err(anyhow!(
            "no AS-organization snapshots found in {}",
            input_dir.display()
        ));
    }

    builder.write(&output)?;
    info!(
        "wrote ownership history of {} ASNs from {} snapshots to {}",
        builder.len(),
        files,
        output.display()
    );
    Ok(())
}
