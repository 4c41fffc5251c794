use rtac_scheduler::command::CommandTask;
use rtac_scheduler::config::ServiceConfig;
use rtac_scheduler::env::SystemEnv;
use rtac_scheduler::redis_store::RedisLockStore;
use rtac_scheduler::tasks_file::TasksFile;
use rtac_scheduler::{Scheduler, health, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env(&SystemEnv)?;
    let replica_id = config.scheduler.replica_id.clone();

    tracing::info!(
        replica_id = %replica_id,
        namespace = %config.scheduler.keys.namespace(),
        enabled = config.enabled,
        "Starting scheduler service"
    );

    let store = RedisLockStore::open(&config.redis_url, config.scheduler.store_timeout)?;
    let mut scheduler = Scheduler::new(store, config.scheduler.clone())?;

    if config.enabled {
        let file = TasksFile::load(&config.tasks_file)?;
        tracing::info!(
            path = %config.tasks_file.display(),
            task_count = file.tasks.len(),
            "Loaded task definitions"
        );
        for spec in &file.tasks {
            scheduler.register(CommandTask::descriptor_from_spec(spec, &replica_id)?)?;
        }
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let health_token = CancellationToken::new();
    let health = tokio::spawn(health::serve(
        scheduler.status_handle(),
        config.health_addr,
        health_token.clone(),
    ));

    if config.enabled {
        scheduler.run(shutdown.clone()).await;
    } else {
        tracing::info!("Scheduler disabled, serving health only");
        shutdown.cancelled().await;
    }

    health_token.cancel();
    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Health server exited with error"),
        Err(e) => tracing::error!(error = %e, "Health server task failed"),
    }

    tracing::info!(replica_id = %replica_id, "Scheduler service stopped");
    Ok(())
}
