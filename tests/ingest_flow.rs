mod common;

use std::collections::HashMap;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::TestApp;
use eligibility::domain::NewPopulation;
use eligibility::ingest::ProcessingResult;
use eligibility::store::{MemberSource, RecordStore};
use serde_json::json;

const CENSUS: &str = "employee_id,employee_first_name,employee_last_name,date_of_birth,email,work_state,custom_attributes.employment_status,custom_attributes.group_number
c1,Jane,Doe,1985-06-02,jane@acme.com,NY,Full,2
c2,John,Roe,1979-01-20,john@acme.com,NY,Part,1
c3,Ann,Poe,not-a-date,ann@acme.com,NY,Full,3";

#[tokio::test]
async fn ingested_census_is_immediately_searchable() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let file_id = app.upload(1, "org1/census.csv", CENSUS).await;

    let report = app.ingestor().ingest_file(file_id).await?;
    assert_eq!(report.result, ProcessingResult::ProcessingSuccessful);

    let file = app.store.get_file(file_id).await?.expect("file row");
    assert_eq!(file.raw_count, Some(3));
    assert_eq!(file.success_count, Some(2));
    assert_eq!(file.failure_count, Some(1));
    assert!(file.completed_at.is_some());
    assert_eq!(app.store.parse_errors_for_file(file_id).await?.len(), 1);
    assert_eq!(
        app.store
            .members_for_org(MemberSource::Versioned, 1)
            .await?
            .len(),
        2
    );

    let (status, body) = app
        .rpc(
            "CheckStandardEligibility",
            &json!({"date_of_birth": "1985-06-02", "company_email": "jane@acme.com"}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["unique_corp_id"], "c1");
    assert_eq!(body["work_state"], "NY");
    Ok(())
}

#[tokio::test]
async fn reingesting_a_completed_file_is_a_no_op() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let file_id = app.upload(1, "org1/census.csv", CENSUS).await;

    app.ingestor().ingest_file(file_id).await?;
    let before = app
        .store
        .members_for_org(MemberSource::Versioned, 1)
        .await?;

    let report = app.ingestor().ingest_file(file_id).await?;
    assert_eq!(report.result, ProcessingResult::ProcessingSuccessful);
    let after = app
        .store
        .members_for_org(MemberSource::Versioned, 1)
        .await?;
    assert_eq!(before.len(), after.len());
    Ok(())
}

#[tokio::test]
async fn missing_blob_leaves_the_file_open() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let file_id = app
        .store
        .persist_file(eligibility::domain::NewFile {
            organization_id: 1,
            name: "org1/never-uploaded.csv".into(),
            encoding: "utf-8".into(),
        })
        .await?
        .id;

    let report = app.ingestor().ingest_file(file_id).await?;
    assert_eq!(report.result, ProcessingResult::FileMissing);
    let file = app.store.get_file(file_id).await?.expect("file row");
    assert!(file.completed_at.is_none());
    Ok(())
}

#[tokio::test]
async fn dry_run_writes_reports_without_touching_members() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    app.store
        .persist_population(NewPopulation {
            organization_id: 1,
            activated_at: Some(Utc::now() - Duration::days(1)),
            deactivated_at: None,
            sub_pop_lookup_keys_csv:
                "work_state,custom_attributes.employment_status,custom_attributes.group_number"
                    .into(),
            sub_pop_lookup_map_json: json!({"NY": {"Full": {"2": 102, "3": 103}}}),
            advanced: false,
        })
        .await?;
    app.storage.insert("dryrun/1_census.csv", CENSUS).await;

    let report = app
        .dry_runner()
        .run("dryrun/1_census.csv", &HashMap::new())
        .await?;
    assert_eq!(report.result, ProcessingResult::ProcessingSuccessful);
    assert_eq!(report.file_parse_errors.len(), 1);
    assert_eq!(report.no_population.len(), 1);
    assert_eq!(report.no_population[0].unique_corp_id, "c2");

    let summary = app
        .storage
        .text("dryrun/reports/1_census/summary.txt")
        .await
        .expect("summary report");
    assert!(summary.contains("population 102 has 1 members"));
    let errors = app
        .storage
        .text("dryrun/reports/1_census/errors.csv")
        .await
        .expect("errors report");
    assert!(errors.contains("c3"));
    assert!(app
        .storage
        .text("dryrun/reports/1_census/1_non_pop_member.csv")
        .await
        .is_some());

    assert!(app
        .store
        .members_for_org(MemberSource::Versioned, 1)
        .await?
        .is_empty());
    Ok(())
}
