use axum::{extract::State, Json};

use crate::engine::pre_eligibility::PreEligibilityCheck;
use crate::engine::query::QueryParams;
use crate::engine::{
    AlternateCheck, ClientSpecificCheck, MultistepCheck, NoDobCheck, OvereligibilityCheck,
    StandardCheck,
};
use crate::error::AppResult;
use crate::state::AppState;

use super::wire::{MemberListMessage, MemberMessage, PreEligibilityMessage};

pub async fn check_standard(
    State(state): State<AppState>,
    Json(payload): Json<StandardCheck>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_standard(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_alternate(
    State(state): State<AppState>,
    Json(payload): Json<AlternateCheck>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_alternate(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_overeligibility(
    State(state): State<AppState>,
    Json(payload): Json<OvereligibilityCheck>,
) -> AppResult<Json<MemberListMessage>> {
    let members = state.service.check_overeligibility(&payload).await?;
    Ok(Json(members.into()))
}

pub async fn check_no_dob(
    State(state): State<AppState>,
    Json(payload): Json<NoDobCheck>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_no_dob(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_multistep(
    State(state): State<AppState>,
    Json(payload): Json<MultistepCheck>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_multistep(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_client_specific(
    State(state): State<AppState>,
    Json(payload): Json<ClientSpecificCheck>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_client_specific(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_basic(
    State(state): State<AppState>,
    Json(payload): Json<QueryParams>,
) -> AppResult<Json<MemberListMessage>> {
    let members = state.service.check_basic(&payload).await?;
    Ok(Json(members.into()))
}

pub async fn check_employer(
    State(state): State<AppState>,
    Json(payload): Json<QueryParams>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_employer(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_healthplan(
    State(state): State<AppState>,
    Json(payload): Json<QueryParams>,
) -> AppResult<Json<MemberMessage>> {
    let member = state.service.check_healthplan(&payload).await?;
    Ok(Json(member.into()))
}

pub async fn check_pre_eligibility(
    State(state): State<AppState>,
    Json(payload): Json<PreEligibilityCheck>,
) -> AppResult<Json<PreEligibilityMessage>> {
    let result = state.service.check_pre_eligibility(&payload).await?;
    Ok(Json(result.into()))
}
