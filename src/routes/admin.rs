//! Test-utility RPCs. Refused in production by the engine.

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::engine::test_records::TestMemberRecord;
use crate::engine::MatchedMember;
use crate::error::AppResult;
use crate::state::AppState;

use super::wire::MemberListMessage;

#[derive(Debug, Deserialize)]
pub struct CreateTestRecordsRequest {
    pub organization_id: i64,
    #[serde(default)]
    pub test_member_records: Vec<TestMemberRecord>,
}

pub async fn create_test_member_records(
    State(state): State<AppState>,
    Json(payload): Json<CreateTestRecordsRequest>,
) -> AppResult<Json<MemberListMessage>> {
    let members = state
        .service
        .create_test_member_records(payload.organization_id, &payload.test_member_records)
        .await?;
    let matched: Vec<MatchedMember> = members.into_iter().map(MatchedMember::v1).collect();
    Ok(Json(matched.into()))
}
