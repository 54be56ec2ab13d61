use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    db::PgPool,
    dryrun::DryRunner,
    ingest::Ingestor,
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    models::Job,
    store::RecordStore,
};

pub mod ingest;
pub mod maintenance;

pub const RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

impl JobExecution {
    /// Transient failures retry after [`RETRY_DELAY`]; everything else fails the job.
    pub fn from_error<E: Display>(err: E, transient: bool) -> Self {
        if transient {
            JobExecution::Retry {
                delay: RETRY_DELAY,
                error: err.to_string(),
            }
        } else {
            JobExecution::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// Collaborators shared by every job handler.
pub struct WorkerContext {
    pub store: Arc<dyn RecordStore>,
    pub ingestor: Ingestor,
    pub dry_runner: DryRunner,
    pub pre_verify_batch_size: i64,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution;
}

pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    job: &Job,
) -> Result<T, JobExecution> {
    serde_json::from_value(job.payload.clone()).map_err(|err| JobExecution::Failed {
        error: format!("invalid {} payload: {err}", job.job_type),
    })
}

pub struct Worker {
    pool: PgPool,
    context: Arc<WorkerContext>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        context: Arc<WorkerContext>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            pool,
            context,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(job_types = self.handlers.len(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in worker");
                return Ok(false);
            }
        };

        let job_opt = reserve_job(&mut conn, &job_types)?;
        drop(conn);

        let Some(job) = job_opt else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            match self.pool.get() {
                Ok(mut conn) => mark_job_failed(&mut conn, job.id, "no handler registered")?,
                Err(_) => error!("failed to mark job failed for missing handler due to pool error"),
            }
            return Ok(true);
        };

        let result = handler.handle(self.context.clone(), job.clone()).await;
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(_) => {
                error!(job_id = %job.id, "failed to record job outcome due to pool error");
                return Ok(true);
            }
        };
        match result {
            JobExecution::Success => {
                mark_job_succeeded(&mut conn, job.id)?;
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, %error, "job will retry");
                retry_job_after(&mut conn, job.id, delay, &error)?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                mark_job_failed(&mut conn, job.id, &error)?;
            }
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(ingest::IngestFileJob),
        Arc::new(ingest::DryRunFileJob),
        Arc::new(maintenance::PreVerifyOrgJob),
        Arc::new(maintenance::PurgeDuplicateHashesJob),
        Arc::new(maintenance::PurgeExpiredRecordsJob),
    ]
}
