use clap::Parser;
use kpi_forecast::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build spectral-index KPI series from satellite rasters and forecast them
#[derive(Parser, Debug)]
#[command(name = "kpi-forecast", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short = 'c', long = "config-file")]
    config_file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = PipelineConfig::from_file(&cli.config_file)
        .and_then(Pipeline::new)
        .and_then(|pipeline| pipeline.run());

    match result {
        Ok(report) => {
            for model in &report.models {
                if let Some(metrics) = &model.metrics {
                    info!("{}: {}", model.strategy, metrics);
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
