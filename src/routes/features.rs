use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::domain::FeatureType;
use crate::engine::features::SubPopulationLookup;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeaturesForUserRequest {
    pub user_id: i64,
    #[serde(default)]
    pub organization_id: Option<i64>,
    pub feature_type: i32,
}

#[derive(Debug, Deserialize)]
pub struct FeaturesBySubPopulationRequest {
    pub sub_population_id: i64,
    pub feature_type: i32,
}

#[derive(Debug, Deserialize)]
pub struct SubPopulationRequest {
    pub user_id: i64,
    #[serde(default)]
    pub organization_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FeaturesResponse {
    pub features: Vec<i64>,
    pub has_population: bool,
}

#[derive(Debug, Serialize)]
pub struct FeaturesDefinitionResponse {
    pub features: Vec<i64>,
    pub has_definition: bool,
}

#[derive(Debug, Serialize)]
pub struct SubPopulationResponse {
    pub sub_population_id: Option<i64>,
}

fn feature_type(raw: i32) -> AppResult<FeatureType> {
    FeatureType::from_i32(raw).ok_or_else(|| {
        AppError::bad_request(format!("Got unsupported value: {raw}"))
            .with_detail("providedFields", "feature_type")
    })
}

fn organization(request_org: Option<i64>) -> AppResult<i64> {
    request_org.filter(|id| *id > 0).ok_or_else(|| {
        AppError::bad_request("Got an empty value for organization_id.")
            .with_detail("providedFields", "organization_id")
    })
}

pub async fn get_eligible_features_for_user(
    State(state): State<AppState>,
    Json(payload): Json<FeaturesForUserRequest>,
) -> AppResult<Json<FeaturesResponse>> {
    let features = state
        .service
        .get_eligible_features_for_user(payload.user_id, feature_type(payload.feature_type)?)
        .await?;
    Ok(Json(FeaturesResponse {
        has_population: features.is_some(),
        features: features.unwrap_or_default(),
    }))
}

pub async fn get_eligible_features_for_user_and_org(
    State(state): State<AppState>,
    Json(payload): Json<FeaturesForUserRequest>,
) -> AppResult<Json<FeaturesResponse>> {
    let organization_id = organization(payload.organization_id)?;
    let features = state
        .service
        .get_eligible_features_for_user_and_org(
            payload.user_id,
            organization_id,
            feature_type(payload.feature_type)?,
        )
        .await?;
    Ok(Json(FeaturesResponse {
        has_population: features.is_some(),
        features: features.unwrap_or_default(),
    }))
}

pub async fn get_eligible_features_by_sub_population_id(
    State(state): State<AppState>,
    Json(payload): Json<FeaturesBySubPopulationRequest>,
) -> AppResult<Json<FeaturesDefinitionResponse>> {
    let features = state
        .service
        .get_eligible_features_by_sub_population_id(
            payload.sub_population_id,
            feature_type(payload.feature_type)?,
        )
        .await?;
    Ok(Json(FeaturesDefinitionResponse {
        has_definition: features.is_some(),
        features: features.unwrap_or_default(),
    }))
}

fn sub_population(lookup: SubPopulationLookup) -> Json<SubPopulationResponse> {
    Json(SubPopulationResponse {
        sub_population_id: lookup.sub_population_id,
    })
}

pub async fn get_sub_population_id_for_user(
    State(state): State<AppState>,
    Json(payload): Json<SubPopulationRequest>,
) -> AppResult<Json<SubPopulationResponse>> {
    let lookup = state
        .service
        .get_sub_population_id_for_user(payload.user_id)
        .await?;
    Ok(sub_population(lookup))
}

pub async fn get_sub_population_id_for_user_and_org(
    State(state): State<AppState>,
    Json(payload): Json<SubPopulationRequest>,
) -> AppResult<Json<SubPopulationResponse>> {
    let organization_id = organization(payload.organization_id)?;
    let lookup = state
        .service
        .get_sub_population_id_for_user_and_org(payload.user_id, organization_id)
        .await?;
    Ok(sub_population(lookup))
}
