use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use nsefetch::cli::{parse_date_range, Cli, Commands};
use nsefetch::config::Config;
use nsefetch::targets::{
    default_index_range, EquityPeriod, NseEquityTemplate, NseIndexTemplate, PlaceholderTemplate,
    TargetTemplate,
};
use nsefetch::{download_keys, keys, report, BatchOptions};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Set default log level to INFO if not specified
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "nsefetch=info");
    }

    // Initialize logging to both console and file
    use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let file_appender = tracing_appender::rolling::never(".", "nsefetch.log");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env())
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env())
        )
        .init();

    let cli = Cli::parse();
    let common = cli.command.common();

    let mut config = Config::from_env()?;
    common.apply(&mut config)?;
    config.validate()?;

    let (batch, template): (Vec<String>, Box<dyn TargetTemplate>) = match &cli.command {
        Commands::Equities { keys: key_args, date_range, from, to, .. } => {
            let period = match parse_date_range(*from, *to)? {
                Some(range) => EquityPeriod::Dates(range),
                None => EquityPeriod::Named(date_range.clone()),
            };
            let batch = key_args.resolve(keys::builtin_equities)?;
            (batch, Box::new(NseEquityTemplate::new(config.base_url.clone(), period)) as Box<dyn TargetTemplate>)
        }

        Commands::Indices { keys: key_args, from, to, .. } => {
            let range = parse_date_range(*from, *to)?.unwrap_or_else(default_index_range);
            let batch = key_args.resolve(keys::builtin_indices)?;
            (batch, Box::new(NseIndexTemplate::new(config.base_url.clone(), range)) as Box<dyn TargetTemplate>)
        }

        Commands::Fetch { url_template, keys: key_args, .. } => {
            let batch = key_args.resolve(Vec::new)?;
            (batch, Box::new(PlaceholderTemplate::new(url_template.clone())?) as Box<dyn TargetTemplate>)
        }
    };

    info!("Downloading {} keys into {}", batch.len(), config.output_dir.display());

    let mut options = BatchOptions::from_config(&config);
    if matches!(cli.command, Commands::Fetch { .. }) && common.base_url.is_none() {
        // Arbitrary sites: resolve relative links against the page itself.
        options.link_base = None;
    }

    let selector = common.selector();
    let outcome = download_keys(
        &config,
        options,
        !common.no_render,
        &batch,
        template.as_ref(),
        selector.as_ref(),
    )
    .await?;

    report::print_summary(&outcome);
    if let Some(path) = &common.report {
        match report::write_json_report(&outcome, path) {
            Ok(()) => info!("Wrote report to {}", path.display()),
            Err(e) => error!("Report failed: {:#}", e),
        }
    }
    println!("Done");

    if outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
