use std::{io, process};

use catalogcache::{
    config,
    infra::{error::InfraError, telemetry},
    replay::CatalogRuntime,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "catalogcache error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "catalogcache error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Replay(args) => run_replay(settings, args).await,
    }
}

async fn run_replay(settings: config::Settings, args: config::ReplayArgs) -> Result<(), InfraError> {
    let runtime = CatalogRuntime::from_settings(&settings);
    info!(
        scope = %runtime.catalog().scope(),
        indexes = runtime.catalog().indexes().len(),
        file = %args.file.display(),
        "Starting replay"
    );

    let mut stdout = io::stdout();
    let summary = runtime.replay(&args.file, &mut stdout).await?;

    let hit_rate = summary
        .stats
        .hit_rate()
        .map(|rate| format!("{rate:.2}%"))
        .unwrap_or_else(|| "n/a".to_string());
    info!(
        operations = summary.operations,
        inserts = summary.inserts,
        deletes = summary.deletes,
        searches = summary.searches,
        hits = summary.stats.hits,
        misses = summary.stats.misses,
        hit_rate = %hit_rate,
        "Replay summary"
    );

    Ok(())
}
