use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::engine::verification::{
    CreateVerificationRequest, FailedVerificationRequest, MultipleVerificationRequest,
};
use crate::error::AppResult;
use crate::state::AppState;

use super::wire::{VerificationAttemptMessage, VerificationListMessage, VerificationMessage};

#[derive(Debug, Deserialize)]
pub struct GetVerificationRequest {
    pub user_id: i64,
    #[serde(default)]
    pub organization_id: Option<i64>,
    #[serde(default)]
    pub active_verifications_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetAllVerificationsRequest {
    pub user_id: i64,
    #[serde(default)]
    pub organization_ids: Vec<i64>,
    #[serde(default)]
    pub active_verifications_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateVerificationRequest {
    pub verification_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct FamilyRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct FamilyResponse {
    pub user_ids: Vec<i64>,
}

pub async fn get_verification_for_user(
    State(state): State<AppState>,
    Json(payload): Json<GetVerificationRequest>,
) -> AppResult<Json<VerificationMessage>> {
    let verification = state
        .service
        .get_verification_for_user(
            payload.user_id,
            payload.organization_id,
            payload.active_verifications_only,
        )
        .await?;
    Ok(Json(verification.into()))
}

pub async fn get_all_verifications_for_user(
    State(state): State<AppState>,
    Json(payload): Json<GetAllVerificationsRequest>,
) -> AppResult<Json<VerificationListMessage>> {
    let verifications = state
        .service
        .get_all_verifications_for_user(
            payload.user_id,
            &payload.organization_ids,
            payload.active_verifications_only,
        )
        .await?;
    Ok(Json(verifications.into()))
}

pub async fn create_verification_for_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateVerificationRequest>,
) -> AppResult<Json<VerificationMessage>> {
    let verification = state.service.create_verification_for_user(&payload).await?;
    Ok(Json(verification.into()))
}

pub async fn create_multiple_verifications_for_user(
    State(state): State<AppState>,
    Json(payload): Json<MultipleVerificationRequest>,
) -> AppResult<Json<VerificationListMessage>> {
    let verifications = state
        .service
        .create_multiple_verifications_for_user(&payload)
        .await?;
    Ok(Json(verifications.into()))
}

pub async fn create_failed_verification(
    State(state): State<AppState>,
    Json(payload): Json<FailedVerificationRequest>,
) -> AppResult<Json<VerificationAttemptMessage>> {
    let attempt = state.service.create_failed_verification(&payload).await?;
    Ok(Json(attempt.into()))
}

pub async fn deactivate_verification_for_user(
    State(state): State<AppState>,
    Json(payload): Json<DeactivateVerificationRequest>,
) -> AppResult<Json<VerificationMessage>> {
    let verification = state
        .service
        .deactivate_verification_for_user(payload.verification_id, payload.user_id)
        .await?;
    Ok(Json(verification.into()))
}

pub async fn get_other_user_ids_in_family(
    State(state): State<AppState>,
    Json(payload): Json<FamilyRequest>,
) -> AppResult<Json<FamilyResponse>> {
    let user_ids = state
        .service
        .get_other_user_ids_in_family(payload.user_id)
        .await?;
    Ok(Json(FamilyResponse { user_ids }))
}
