use clap::Parser;
use destiny_manifest_cache::{CliArgs, LoggingConfig, RunConfig, init_logging, run};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = RunConfig::from_args(cli)?;

    // Validate configuration before touching the network (fail-fast)
    config.validate()?;
    tracing::debug!(?config, "configuration loaded");

    match run(&config).await {
        Ok(report) => {
            tracing::info!(
                races = report.races,
                classes = report.classes,
                genders = report.genders,
                activities = report.activities,
                activities_retained = report.activities_retained,
                merged = report.merged,
                written = report.written,
                elapsed = ?report.elapsed,
                "cache refresh complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            let kind = error.kind();
            tracing::error!(kind = %kind, %error, "cache refresh failed");
            Ok(ExitCode::from(kind.exit_code()))
        }
    }
}
