use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use eligibility::{
    config::AppConfig,
    db::{self, PgPool},
    domain::NewFile,
    ingest::{purge_all_duplicate_hashes, purge_all_expired_members},
    jobs::{
        self, DryRunFilePayload, IngestFilePayload, PurgePayload, JOB_DRY_RUN_FILE,
        JOB_INGEST_FILE, JOB_PURGE_DUPLICATE_HASHES, JOB_PURGE_EXPIRED_RECORDS,
    },
    preverify::pre_verify_all,
    store::{PgStore, RecordStore},
};

const USAGE: &str = "Usage: maintenance <command>
  register-file <organization_id> <name>   record a census file and queue its ingest
  enqueue-file <file_id>                   queue an ingest for an existing file
  dry-run <name>                           queue a dry run of dryrun/<name>
  purge-duplicates [--queue]               purge duplicate hashes for every data provider
  purge-expired [--queue]                  move expired records to the historical table
  pre-verify-all                           link members to existing verifications";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        command = %command,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded eligibility configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let queue = args.iter().any(|arg| arg == "--queue");

    match command.as_str() {
        "register-file" => {
            let organization_id = arg(&args, 1, "organization_id")?.parse::<i64>()?;
            let name = arg(&args, 2, "name")?;
            register_file(&pool, organization_id, name).await?
        }
        "enqueue-file" => {
            let file_id = arg(&args, 1, "file_id")?.parse::<i64>()?;
            enqueue(&pool, JOB_INGEST_FILE, &IngestFilePayload { file_id })?
        }
        "dry-run" => {
            let name = arg(&args, 1, "name")?.to_string();
            enqueue(
                &pool,
                JOB_DRY_RUN_FILE,
                &DryRunFilePayload {
                    name,
                    override_sub_population: Default::default(),
                },
            )?
        }
        "purge-duplicates" if queue => {
            enqueue(&pool, JOB_PURGE_DUPLICATE_HASHES, &PurgePayload::default())?
        }
        "purge-duplicates" => {
            let stats = purge_all_duplicate_hashes(Arc::new(PgStore::new(pool))).await?;
            println!(
                "Hashed {} members, deleted {} duplicates.",
                stats.hashed, stats.deleted
            );
        }
        "purge-expired" if queue => {
            enqueue(&pool, JOB_PURGE_EXPIRED_RECORDS, &PurgePayload::default())?
        }
        "purge-expired" => {
            let purged = purge_all_expired_members(Arc::new(PgStore::new(pool))).await?;
            println!("Moved {purged} expired records to history.");
        }
        "pre-verify-all" => {
            let stats =
                pre_verify_all(Arc::new(PgStore::new(pool)), config.pre_verify_batch_size).await?;
            println!(
                "Linked {} members through {} links in {} batches.",
                stats.members_linked, stats.links_created, stats.batches
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) if !value.starts_with("--") => Ok(value),
        _ => bail!("missing <{name}>\n{USAGE}"),
    }
}

fn enqueue<P: serde::Serialize>(pool: &PgPool, job_type: &str, payload: &P) -> Result<()> {
    let mut conn = pool.get().context("failed to get database connection")?;
    let job = jobs::enqueue(&mut conn, job_type, payload)?;
    println!("Queued {job_type} job {}.", job.id);
    Ok(())
}

async fn register_file(pool: &PgPool, organization_id: i64, name: &str) -> Result<()> {
    let store = PgStore::new(pool.clone());
    if store.get_organization(organization_id).await?.is_none() {
        bail!("organization {organization_id} does not exist");
    }
    let file = store
        .persist_file(NewFile {
            organization_id,
            name: name.to_string(),
            encoding: "utf-8".to_string(),
        })
        .await?;
    println!("Recorded file {} for organization {organization_id}.", file.id);
    enqueue(pool, JOB_INGEST_FILE, &IngestFilePayload { file_id: file.id })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
