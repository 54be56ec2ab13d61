use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use eligibility::{
    config::AppConfig, db, default_handlers, dryrun::DryRunner, flags::FlagSet, ingest::Ingestor,
    storage::S3Storage, store::PgStore, Worker, WorkerContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        dry_run_bucket = %config.dry_run_bucket,
        ingest_batch_size = config.ingest_batch_size,
        "loaded eligibility configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let (storage, dry_run_storage) = S3Storage::census_and_dry_run(&config).await;
    let (storage, dry_run_storage) = (Arc::new(storage), Arc::new(dry_run_storage));
    let store = Arc::new(PgStore::new(pool.clone()));
    let flags = Arc::new(FlagSet::from_json(&config.feature_flags)?);

    let context = Arc::new(WorkerContext {
        ingestor: Ingestor::new(store.clone(), storage, flags.clone(), &config),
        dry_runner: DryRunner::new(store.clone(), dry_run_storage, flags, &config),
        pre_verify_batch_size: config.pre_verify_batch_size,
        store,
    });
    let worker = Worker::new(pool, context, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
