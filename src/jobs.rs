use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_INGEST_FILE: &str = "ingest-file";
pub const JOB_DRY_RUN_FILE: &str = "dry-run-file";
pub const JOB_PRE_VERIFY_ORG: &str = "pre-verify-org";
pub const JOB_PURGE_DUPLICATE_HASHES: &str = "purge-duplicate-hashes";
pub const JOB_PURGE_EXPIRED_RECORDS: &str = "purge-expired-records";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFilePayload {
    pub file_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunFilePayload {
    pub name: String,
    /// organization id -> population id to use instead of the effective one
    #[serde(default)]
    pub override_sub_population: HashMap<i64, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreVerifyOrgPayload {
    pub organization_id: i64,
    #[serde(default)]
    pub file_id: Option<i64>,
}

/// Shared by both purge jobs; no organization means every eligible one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgePayload {
    #[serde(default)]
    pub organization_id: Option<i64>,
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<DateTime<Utc>>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(Utc::now),
    };

    let job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .get_result(conn)?;
    Ok(job)
}

/// Serializes `payload` and enqueues it to run immediately.
pub fn enqueue<P: Serialize>(
    conn: &mut PgConnection,
    job_type: &str,
    payload: &P,
) -> JobQueueResult<Job> {
    let payload = serde_json::to_value(payload)?;
    enqueue_job(conn, job_type, payload, None)
}

pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now();

    conn.transaction(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        match job_opt {
            Some(job) => {
                let reserved = diesel::update(jobs::table.find(job.id))
                    .set((
                        jobs::status.eq(STATUS_PROCESSING),
                        jobs::attempts.eq(job.attempts + 1),
                        jobs::updated_at.eq(now),
                    ))
                    .get_result::<Job>(conn)?;
                Ok::<Option<Job>, diesel::result::Error>(Some(reserved))
            }
            None => Ok(None),
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(next_run),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dry_run_payload_defaults_overrides() {
        let payload: DryRunFilePayload =
            serde_json::from_value(json!({"name": "dryrun/1_census.csv"})).unwrap();
        assert!(payload.override_sub_population.is_empty());

        let payload: DryRunFilePayload = serde_json::from_value(
            json!({"name": "dryrun/1_census.csv", "override_sub_population": {"1": 7}}),
        )
        .unwrap();
        assert_eq!(payload.override_sub_population.get(&1), Some(&7));
    }

    #[test]
    fn purge_payload_accepts_empty_object() {
        let payload: PurgePayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.organization_id.is_none());
    }
}
