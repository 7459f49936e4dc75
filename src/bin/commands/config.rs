use anyhow::Result;
use asn_enrich::config::EMPTY_CONFIG;
use asn_enrich::lens::utils::{render_json, OutputFormat};
use asn_enrich::AsnEnrichConfig;
use clap::Args;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Print a commented configuration file template instead
    #[clap(long)]
    pub template: bool,
}

pub fn run(config: &AsnEnrichConfig, args: ConfigArgs, output_format: OutputFormat) -> Result<()> {
    if args.template {
        print!("{}", EMPTY_CONFIG);
        return Ok(());
    }

    match output_format.is_json() {
        true => println!(
            "{}",
            render_json(config, output_format == OutputFormat::JsonPretty)?
        ),
        false => println!("{}", config.summary()),
    }
    Ok(())
}
