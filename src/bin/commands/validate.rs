use anyhow::{anyhow, Result};
use asn_enrich::lens::utils::{render_json, render_rows, OutputFormat};
use asn_enrich::lens::validate::{ValidateArgs, ValidateLens};

pub fn run(args: ValidateArgs, output_format: OutputFormat) -> Result<()> {
    let report = ValidateLens::new().validate(&args)?;

    match output_format.is_json() {
        true => println!(
            "{}",
            render_json(&report, output_format == OutputFormat::JsonPretty)?
        ),
        false => {
            println!(
                "{}: {} nodes",
                report.database_type, report.node_count
            );
            println!("{}", render_rows(&report.families, output_format)?);
        }
    }

    if !report.passed() {
        return Err(anyhow!(
            "{} failed validation: no more than {} records with {}",
            args.file,
            args.min_hits,
            args.required_key
        ));
    }
    Ok(())
}
