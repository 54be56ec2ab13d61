//! Scheduled maintenance: pre-verification and the two purges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::{
    ingest::{
        purge_all_duplicate_hashes, purge_all_expired_members, purge_duplicate_hashes,
        purge_expired_members,
    },
    jobs::{
        PreVerifyOrgPayload, PurgePayload, JOB_PRE_VERIFY_ORG, JOB_PURGE_DUPLICATE_HASHES,
        JOB_PURGE_EXPIRED_RECORDS,
    },
    models::Job,
    preverify::pre_verify_org,
};

use super::{parse_payload, JobExecution, JobHandler, WorkerContext};

pub struct PreVerifyOrgJob;

#[async_trait]
impl JobHandler for PreVerifyOrgJob {
    fn job_type(&self) -> &'static str {
        JOB_PRE_VERIFY_ORG
    }

    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution {
        let payload: PreVerifyOrgPayload = match parse_payload(&job) {
            Ok(payload) => payload,
            Err(execution) => return execution,
        };

        match pre_verify_org(
            context.store.as_ref(),
            payload.organization_id,
            payload.file_id,
            context.pre_verify_batch_size,
            Utc::now(),
        )
        .await
        {
            Ok(stats) => {
                info!(
                    job_id = %job.id,
                    organization_id = payload.organization_id,
                    members_linked = stats.members_linked,
                    "pre-verify job completed"
                );
                JobExecution::Success
            }
            Err(err) => {
                let transient = err.is_transient();
                JobExecution::from_error(err, transient)
            }
        }
    }
}

pub struct PurgeDuplicateHashesJob;

#[async_trait]
impl JobHandler for PurgeDuplicateHashesJob {
    fn job_type(&self) -> &'static str {
        JOB_PURGE_DUPLICATE_HASHES
    }

    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution {
        let payload: PurgePayload = match parse_payload(&job) {
            Ok(payload) => payload,
            Err(execution) => return execution,
        };

        let result = match payload.organization_id {
            Some(organization_id) => {
                purge_duplicate_hashes(context.store.as_ref(), organization_id).await
            }
            None => purge_all_duplicate_hashes(context.store.clone()).await,
        };
        match result {
            Ok(stats) => {
                info!(
                    job_id = %job.id,
                    organization_id = ?payload.organization_id,
                    hashed = stats.hashed,
                    deleted = stats.deleted,
                    "duplicate hash purge completed"
                );
                JobExecution::Success
            }
            Err(err) => {
                let transient = err.is_transient();
                JobExecution::from_error(err, transient)
            }
        }
    }
}

pub struct PurgeExpiredRecordsJob;

#[async_trait]
impl JobHandler for PurgeExpiredRecordsJob {
    fn job_type(&self) -> &'static str {
        JOB_PURGE_EXPIRED_RECORDS
    }

    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution {
        let payload: PurgePayload = match parse_payload(&job) {
            Ok(payload) => payload,
            Err(execution) => return execution,
        };

        let result = match payload.organization_id {
            Some(organization_id) => {
                let now = Utc::now();
                purge_expired_members(context.store.as_ref(), organization_id, now.date_naive(), now)
                    .await
            }
            None => purge_all_expired_members(context.store.clone()).await,
        };
        match result {
            Ok(purged) => {
                info!(
                    job_id = %job.id,
                    organization_id = ?payload.organization_id,
                    purged,
                    "expired record purge completed"
                );
                JobExecution::Success
            }
            Err(err) => {
                let transient = err.is_transient();
                JobExecution::from_error(err, transient)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::testing::FakeStorage;
    use crate::store::MemoryStore;
    use crate::workers::testing::{context, job};

    #[tokio::test]
    async fn purges_accept_an_empty_payload() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, Arc::new(FakeStorage::default()));

        let execution = PurgeDuplicateHashesJob
            .handle(ctx.clone(), job(JOB_PURGE_DUPLICATE_HASHES, json!({})))
            .await;
        assert!(matches!(execution, JobExecution::Success));

        let execution = PurgeExpiredRecordsJob
            .handle(ctx, job(JOB_PURGE_EXPIRED_RECORDS, json!({"organization_id": 3})))
            .await;
        assert!(matches!(execution, JobExecution::Success));
    }

    #[tokio::test]
    async fn pre_verify_requires_an_organization() {
        let store = Arc::new(MemoryStore::new());
        let execution = PreVerifyOrgJob
            .handle(
                context(store, Arc::new(FakeStorage::default())),
                job(JOB_PRE_VERIFY_ORG, json!({"file_id": 2})),
            )
            .await;
        assert!(matches!(execution, JobExecution::Failed { .. }));
    }
}
