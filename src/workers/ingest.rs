use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    ingest::ProcessingResult,
    jobs::{DryRunFilePayload, IngestFilePayload, JOB_DRY_RUN_FILE, JOB_INGEST_FILE},
    models::Job,
};

use super::{parse_payload, JobExecution, JobHandler, WorkerContext};

/// Ingests one census file. A file that ends in a recorded failure result
/// (bad encoding, missing blob) still completes the job; the outcome lives on
/// the file row.
pub struct IngestFileJob;

#[async_trait]
impl JobHandler for IngestFileJob {
    fn job_type(&self) -> &'static str {
        JOB_INGEST_FILE
    }

    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution {
        let payload: IngestFilePayload = match parse_payload(&job) {
            Ok(payload) => payload,
            Err(execution) => return execution,
        };

        match context.ingestor.ingest_file(payload.file_id).await {
            Ok(report) => {
                if report.result != ProcessingResult::ProcessingSuccessful {
                    warn!(
                        job_id = %job.id,
                        file_id = payload.file_id,
                        result = report.result.code(),
                        "census file finished without success"
                    );
                }
                info!(
                    job_id = %job.id,
                    file_id = payload.file_id,
                    valid = report.valid,
                    errors = report.errors,
                    expired = report.expired,
                    "census file processed"
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

pub struct DryRunFileJob;

#[async_trait]
impl JobHandler for DryRunFileJob {
    fn job_type(&self) -> &'static str {
        JOB_DRY_RUN_FILE
    }

    async fn handle(&self, context: Arc<WorkerContext>, job: Job) -> JobExecution {
        let payload: DryRunFilePayload = match parse_payload(&job) {
            Ok(payload) => payload,
            Err(execution) => return execution,
        };

        match context
            .dry_runner
            .run(&payload.name, &payload.override_sub_population)
            .await
        {
            Ok(report) => {
                info!(
                    job_id = %job.id,
                    name = %payload.name,
                    organizations = report.populations.len(),
                    without_population = report.no_population.len(),
                    "dry run completed"
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
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use crate::domain::{EligibilityType, NewFile, Organization};
    use crate::storage::testing::FakeStorage;
    use crate::store::{MemberSource, MemoryStore, RecordStore};
    use crate::workers::testing::{context, job};

    fn organization(id: i64) -> Organization {
        Organization {
            id,
            name: "Acme".into(),
            directory_name: "acme".into(),
            data_provider: false,
            activated_at: Some(Utc::now() - Duration::days(30)),
            terminated_at: None,
            employee_only: false,
            medical_plan_only: false,
            eligibility_type: EligibilityType::Standard,
            client_specific_implementation: None,
        }
    }

    #[tokio::test]
    async fn ingest_job_processes_the_file() {
        let store = Arc::new(MemoryStore::new());
        store.persist_organization(organization(1)).await.unwrap();
        let storage = Arc::new(FakeStorage::default());
        storage.insert(
            "acme/census.csv",
            "employee_id,employee_first_name,employee_last_name,date_of_birth,email\nc1,Jane,Doe,1985-06-02,jane@acme.com",
        );
        let file = store
            .persist_file(NewFile {
                organization_id: 1,
                name: "acme/census.csv".into(),
                encoding: "utf-8".into(),
            })
            .await
            .unwrap();

        let execution = IngestFileJob
            .handle(
                context(store.clone(), storage),
                job(JOB_INGEST_FILE, json!({"file_id": file.id})),
            )
            .await;
        assert!(matches!(execution, JobExecution::Success));
        assert_eq!(store.member_count(MemberSource::Versioned).await, 1);
    }

    #[tokio::test]
    async fn unknown_file_fails_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let execution = IngestFileJob
            .handle(
                context(store, Arc::new(FakeStorage::default())),
                job(JOB_INGEST_FILE, json!({"file_id": 404})),
            )
            .await;
        assert!(matches!(execution, JobExecution::Failed { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_fails() {
        let store = Arc::new(MemoryStore::new());
        let execution = DryRunFileJob
            .handle(
                context(store, Arc::new(FakeStorage::default())),
                job(JOB_DRY_RUN_FILE, json!({"file": "x"})),
            )
            .await;
        match execution {
            JobExecution::Failed { error } => assert!(error.contains("invalid dry-run-file payload")),
            other => panic!("unexpected execution {other:?}"),
        }
    }

    #[tokio::test]
    async fn dry_run_with_bad_name_fails() {
        let store = Arc::new(MemoryStore::new());
        let execution = DryRunFileJob
            .handle(
                context(store, Arc::new(FakeStorage::default())),
                job(JOB_DRY_RUN_FILE, json!({"name": "dryrun/census.csv"})),
            )
            .await;
        assert!(matches!(execution, JobExecution::Failed { .. }));
    }
}
