mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{date, new_member, TestApp};
use eligibility::ingest::ProcessingResult;
use eligibility::store::{MemberSource, RecordStore};
use serde_json::json;

#[tokio::test]
async fn create_get_and_deactivate_a_verification() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let jane = app
        .member(new_member(1, "c1", ("Jane", "Doe"), date("1985-06-02"), "jane@acme.com"))
        .await;

    let (status, created) = app
        .rpc(
            "CreateVerificationForUser",
            &json!({
                "user_id": 42,
                "verification_type": "primary",
                "organization_id": 1,
                "eligibility_member_id": jane.id,
                "email": "jane@acme.com",
                "date_of_birth": "1985-06-02",
                "unique_corp_id": "c1",
                "additional_fields": "{\"source\": \"signup\"}"
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert_eq!(created["user_id"], 42);
    assert_eq!(created["verification_type"], "PRIMARY");
    assert_eq!(created["eligibility_member_id"], jane.id);
    assert_eq!(created["is_active"], true);
    let verification_id = created["verification_id"].as_i64().unwrap_or_default();

    let (status, fetched) = app
        .rpc(
            "GetVerificationForUser",
            &json!({"user_id": 42, "organization_id": 1, "active_verifications_only": true}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["verification_id"], verification_id);

    let (status, all) = app
        .rpc("GetAllVerificationsForUser", &json!({"user_id": 42}))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["verification_list"].as_array().map(Vec::len), Some(1));

    let (status, deactivated) = app
        .rpc(
            "DeactivateVerificationForUser",
            &json!({"verification_id": verification_id, "user_id": 42}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(deactivated["deactivated_at"]["seconds"].is_i64());

    let (status, body) = app
        .rpc("GetVerificationForUser", &json!({"user_id": 42}))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn unknown_verification_type_is_invalid() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;

    let (status, body) = app
        .rpc(
            "CreateVerificationForUser",
            &json!({"user_id": 7, "verification_type": "carrier-pigeon", "organization_id": 1}),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["providedFields"], "verification_type");
    Ok(())
}

#[tokio::test]
async fn failed_verification_records_an_attempt() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;

    let (status, attempt) = app
        .rpc(
            "CreateFailedVerification",
            &json!({
                "user_id": 9,
                "verification_type": "alternate",
                "organization_id": 1,
                "first_name": "Ann",
                "last_name": "Poe",
                "date_of_birth": "1990-03-04",
                "policy_used": "{\"rule\": \"alternate\"}"
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{attempt}");
    assert_eq!(attempt["successful_verification"], false);
    assert_eq!(attempt["verification_type"], "ALTERNATE");
    assert_eq!(attempt["date_of_birth"], "1990-03-04");
    Ok(())
}

#[tokio::test]
async fn features_without_population_are_unrestricted() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let jane = app
        .member(new_member(1, "c1", ("Jane", "Doe"), date("1985-06-02"), "jane@acme.com"))
        .await;
    let (status, _) = app
        .rpc(
            "CreateVerificationForUser",
            &json!({
                "user_id": 42,
                "verification_type": "PRIMARY",
                "organization_id": 1,
                "eligibility_member_id": jane.id
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .rpc(
            "GetEligibleFeaturesForUser",
            &json!({"user_id": 42, "feature_type": 1}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"features": [], "has_population": false}));

    let (status, body) = app
        .rpc(
            "GetEligibleFeaturesForUser",
            &json!({"user_id": 42, "feature_type": 9}),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["providedFields"], "feature_type");

    let (status, body) = app
        .rpc("GetSubPopulationIdForUser", &json!({"user_id": 42}))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sub_population_id"], serde_json::Value::Null);
    Ok(())
}

#[tokio::test]
async fn reingested_member_is_pre_verified_against_existing_verification() -> Result<()> {
    let app = TestApp::new();
    app.organization(1).await;
    let header = "employee_id,employee_first_name,employee_last_name,date_of_birth,email,work_state";

    let first = app
        .upload(
            1,
            "org1/census-1.csv",
            &format!("{header}\nc1,Jane,Doe,1985-06-02,jane@acme.com,NY"),
        )
        .await;
    let report = app.ingestor().ingest_file(first).await?;
    assert_eq!(report.result, ProcessingResult::ProcessingSuccessful);
    let original = app
        .store
        .members_for_org(MemberSource::Versioned, 1)
        .await?
        .remove(0);

    let (status, created) = app
        .rpc(
            "CreateVerificationForUser",
            &json!({
                "user_id": 42,
                "verification_type": "PRIMARY",
                "organization_id": 1,
                "eligibility_member_id": original.id,
                "email": "jane@acme.com",
                "date_of_birth": "1985-06-02"
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{created}");
    let verification_id = created["verification_id"].as_i64().unwrap_or_default();

    // same identity, new work state: a new version of the member
    let second = app
        .upload(
            1,
            "org1/census-2.csv",
            &format!("{header}\nc1,Jane,Doe,1985-06-02,jane@acme.com,CA"),
        )
        .await;
    let report = app.ingestor().ingest_file(second).await?;
    assert_eq!(report.pre_verify.members_linked, 1);

    let newest = app
        .store
        .members_for_org(MemberSource::Versioned, 1)
        .await?
        .into_iter()
        .find(|member| member.file_id == Some(second))
        .expect("new member version");
    assert_ne!(newest.id, original.id);
    assert!(newest.pre_verified);
    let links = app.store.verification_links_for_member(newest.id).await?;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].verification_id, verification_id);
    Ok(())
}
