use axum::{extract::State, Json};
use serde::Deserialize;

use crate::domain::OrgIdentity;
use crate::error::AppResult;
use crate::state::AppState;

use super::wire::{MemberMessage, WalletEnablementMessage};

#[derive(Debug, Deserialize)]
pub struct MemberIdRequest {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct OrgIdentityRequest {
    pub organization_id: i64,
    #[serde(default)]
    pub unique_corp_id: String,
    #[serde(default)]
    pub dependent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserIdRequest {
    pub user_id: i64,
}

pub async fn get_member_by_id(
    State(state): State<AppState>,
    Json(payload): Json<MemberIdRequest>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.get_member_by_id(payload.id).await?;
    Ok(Json(member.into()))
}

pub async fn get_member_by_org_identity(
    State(state): State<AppState>,
    Json(payload): Json<OrgIdentityRequest>,
) -> AppResult<Json<MemberMessage>> {
    let member = state
        .service
        .get_member_by_org_identity(
            payload.organization_id,
            &payload.unique_corp_id,
            &payload.dependent_id,
        )
        .await?;
    Ok(Json(member.into()))
}

pub async fn get_wallet_enablement_by_id(
    State(state): State<AppState>,
    Json(payload): Json<MemberIdRequest>,
) -> AppResult<Json<WalletEnablementMessage>> {
    let wallet = state.service.get_wallet_enablement(payload.id).await?;
    Ok(Json(wallet.into()))
}

pub async fn get_wallet_enablement_by_org_identity(
    State(state): State<AppState>,
    Json(payload): Json<OrgIdentityRequest>,
) -> AppResult<Json<WalletEnablementMessage>> {
    let identity = OrgIdentity::new(
        payload.organization_id,
        payload.unique_corp_id.trim(),
        payload.dependent_id.trim(),
    );
    let wallet = state
        .service
        .get_wallet_enablement_by_identity(&identity)
        .await?;
    Ok(Json(wallet.into()))
}

pub async fn get_wallet_enablement_by_user_id(
    State(state): State<AppState>,
    Json(payload): Json<UserIdRequest>,
) -> AppResult<Json<WalletEnablementMessage>> {
    let wallet = state
        .service
        .get_wallet_enablement_by_user_id(payload.user_id)
        .await?;
    Ok(Json(wallet.into()))
}
