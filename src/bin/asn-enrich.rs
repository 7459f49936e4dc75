use asn_enrich::lens::utils::OutputFormat;
use asn_enrich::lens::validate::ValidateArgs;
use asn_enrich::AsnEnrichConfig;
use clap::{Parser, Subcommand};
use tracing::{error, Level};

mod commands;

use commands::build_org_map::BuildOrgMapArgs;
use commands::config::ConfigArgs;
use commands::enrich::EnrichArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.asn-enrich/asn-enrich.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Summary output format: table, markdown, json, json-pretty
    #[clap(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich a MaxMind DB with the AS ownership of one day's routing tables
    Enrich(EnrichArgs),

    /// Build the AS ownership history from CAIDA AS-organization snapshots
    BuildOrgMap(BuildOrgMapArgs),

    /// Spot-check a database with random lookups
    Validate(ValidateArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = match cli.debug {
        true => Level::DEBUG,
        false => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match AsnEnrichConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Enrich(args) => commands::enrich::run(&config, args, cli.format),
        Commands::BuildOrgMap(args) => commands::build_org_map::run(&config, args),
        Commands::Validate(args) => commands::validate::run(args, cli.format),
        Commands::Config(args) => commands::config::run(&config, args, cli.format),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
