use anyhow::{Context, Result};
use mssql_fabric_loader::{
    config::Config,
    fabric::{provision_shortcuts, ProvisionOutcome},
    pipeline::{run_mssql_pipeline, DATASET_NAME},
    table_folders,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let config = Config::from_env().context("reading configuration from environment")?;
    info!(?config, "configured");

    // ─── 3) extract & load ───────────────────────────────────────────
    let load_info = run_mssql_pipeline(&config)
        .await
        .context("running mssql_tables pipeline")?;
    info!(
        load_id = %load_info.load_id,
        rows = load_info.total_rows(),
        "load complete"
    );
    println!("{}", load_info);

    // ─── 4) provision shortcuts ──────────────────────────────────────
    let folders = table_folders();
    let outcomes = provision_shortcuts(&config.fabric, DATASET_NAME, &folders)
        .await
        .context("provisioning Fabric shortcuts")?;

    let failed = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, ProvisionOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        warn!(failed, total = outcomes.len(), "some shortcuts were not created");
    }
    info!(total = outcomes.len(), failed, "done");
    Ok(())
}
