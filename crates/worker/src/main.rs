use anyhow::Context;

use jobtree_worker::app::Worker;
use jobtree_worker::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobtree_observability::init();

    let config = WorkerConfig::from_env().context("reading worker configuration")?;
    let worker = Worker::start(&config)?;
    tracing::info!(runner = %config.runner.name, "worker started; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");

    let scheduler = worker.scheduler().clone();
    let stats = tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    let jobs = scheduler.stats()?;

    tracing::info!(
        runner = %serde_json::to_string(&stats)?,
        jobs = %serde_json::to_string(&jobs)?,
        "worker stopped"
    );
    Ok(())
}
