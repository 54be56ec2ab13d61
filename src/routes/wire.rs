//! Response messages. Dates are ISO-8601 strings, timestamps `{seconds, nanos}`,
//! JSON blobs strings; v1 members report version 0.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::domain::DateRange;
use crate::engine::pre_eligibility::{PreEligibility, PreEligibilityOrganization};
use crate::engine::verification::{VerificationAttemptResult, VerificationForUser};
use crate::engine::wallet::WalletEnablement;
use crate::engine::MatchedMember;
use crate::utils::timestamp::{self, Timestamp};

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn blob(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct DateRangeMessage {
    pub lower: Option<String>,
    pub upper: Option<String>,
    pub lower_inc: bool,
    pub upper_inc: bool,
}

impl From<DateRange> for DateRangeMessage {
    fn from(range: DateRange) -> Self {
        Self {
            lower: range.lower.map(iso),
            upper: range.upper.map(iso),
            lower_inc: range.lower.is_some(),
            upper_inc: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemberMessage {
    pub id: i64,
    pub version: i32,
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_range: DateRangeMessage,
    pub record: String,
    pub custom_attributes: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub is_v2: bool,
    pub member_1_id: Option<i64>,
    pub member_2_id: Option<i64>,
}

impl From<MatchedMember> for MemberMessage {
    fn from(matched: MatchedMember) -> Self {
        let MatchedMember {
            member,
            is_v2,
            member_1_id,
            member_2_id,
        } = matched;
        Self {
            id: member.id,
            version: if member.is_v2 { member.version } else { 0 },
            organization_id: member.organization_id,
            file_id: member.file_id,
            first_name: member.first_name,
            last_name: member.last_name,
            date_of_birth: iso(member.date_of_birth),
            email: member.email,
            unique_corp_id: member.unique_corp_id,
            dependent_id: member.dependent_id,
            work_state: member.work_state,
            work_country: member.work_country,
            gender_code: member.gender_code,
            do_not_contact: member.do_not_contact,
            employer_assigned_id: member.employer_assigned_id,
            effective_range: member.effective_range.into(),
            record: blob(&member.record),
            custom_attributes: blob(&member.custom_attributes),
            created_at: member.created_at,
            updated_at: member.updated_at,
            is_v2,
            member_1_id,
            member_2_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemberListMessage {
    pub members: Vec<MemberMessage>,
}

impl From<Vec<MatchedMember>> for MemberListMessage {
    fn from(members: Vec<MatchedMember>) -> Self {
        Self {
            members: members.into_iter().map(MemberMessage::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletEnablementMessage {
    pub member_id: i64,
    pub organization_id: i64,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub enabled: bool,
    pub insurance_plan: Option<String>,
    pub start_date: Option<String>,
    pub eligibility_date: Option<String>,
    pub eligibility_end_date: Option<String>,
    pub effective_range: DateRangeMessage,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub is_v2: bool,
    pub member_1_id: Option<i64>,
    pub member_2_id: Option<i64>,
}

impl From<WalletEnablement> for WalletEnablementMessage {
    fn from(wallet: WalletEnablement) -> Self {
        Self {
            member_id: wallet.member_id,
            organization_id: wallet.organization_id,
            unique_corp_id: wallet.unique_corp_id,
            dependent_id: wallet.dependent_id,
            enabled: wallet.enabled,
            insurance_plan: wallet.insurance_plan,
            start_date: wallet.start_date.map(iso),
            eligibility_date: wallet.eligibility_date.map(iso),
            eligibility_end_date: wallet.eligibility_end_date.map(iso),
            effective_range: wallet.effective_range.into(),
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
            is_v2: wallet.is_v2,
            member_1_id: wallet.member_1_id,
            member_2_id: wallet.member_2_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationMessage {
    pub verification_id: i64,
    pub user_id: i64,
    pub organization_id: i64,
    pub eligibility_member_id: Option<i64>,
    pub eligibility_member_version: Option<i32>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub date_of_birth: Option<String>,
    pub work_state: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub record: String,
    pub effective_range: Option<DateRangeMessage>,
    pub verification_type: String,
    pub is_active: bool,
    #[serde(with = "timestamp::option")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp::option")]
    pub deactivated_at: Option<DateTime<Utc>>,
    pub additional_fields: String,
    pub verification_session: Option<String>,
    pub is_v2: bool,
    pub verification_1_id: i64,
    pub verification_2_id: Option<i64>,
    pub eligibility_member_2_id: Option<i64>,
    pub eligibility_member_2_version: Option<i32>,
}

impl From<VerificationForUser> for VerificationMessage {
    fn from(verification: VerificationForUser) -> Self {
        Self {
            verification_id: verification.verification_id,
            user_id: verification.user_id,
            organization_id: verification.organization_id,
            eligibility_member_id: verification.eligibility_member_id,
            eligibility_member_version: verification.eligibility_member_version,
            first_name: verification.first_name,
            last_name: verification.last_name,
            email: verification.email,
            unique_corp_id: verification.unique_corp_id,
            dependent_id: verification.dependent_id,
            date_of_birth: verification.date_of_birth.map(iso),
            work_state: verification.work_state,
            employer_assigned_id: verification.employer_assigned_id,
            gender_code: verification.gender_code,
            do_not_contact: verification.do_not_contact,
            record: blob(&verification.record),
            effective_range: verification.effective_range.map(DateRangeMessage::from),
            verification_type: verification.verification_type.as_str().to_string(),
            is_active: verification.is_active,
            verified_at: verification.verified_at,
            created_at: verification.created_at,
            deactivated_at: verification.deactivated_at,
            additional_fields: blob(&verification.additional_fields),
            verification_session: verification
                .verification_session
                .map(|session| session.to_string()),
            is_v2: verification.is_v2,
            verification_1_id: verification.verification_1_id,
            verification_2_id: verification.verification_2_id,
            eligibility_member_2_id: verification.eligibility_member_2_id,
            eligibility_member_2_version: verification.eligibility_member_2_version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationListMessage {
    pub verification_list: Vec<VerificationMessage>,
}

impl From<Vec<VerificationForUser>> for VerificationListMessage {
    fn from(verifications: Vec<VerificationForUser>) -> Self {
        Self {
            verification_list: verifications
                .into_iter()
                .map(VerificationMessage::from)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationAttemptMessage {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: Option<i64>,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<String>,
    pub policy_used: Option<String>,
    pub successful_verification: bool,
    pub verification_id: Option<i64>,
    #[serde(with = "timestamp::option")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub additional_fields: String,
    pub eligibility_member_id: Option<i64>,
    pub is_v2: bool,
    pub verification_attempt_1_id: i64,
    pub verification_attempt_2_id: Option<i64>,
}

impl From<VerificationAttemptResult> for VerificationAttemptMessage {
    fn from(result: VerificationAttemptResult) -> Self {
        let attempt = result.attempt;
        let identity = attempt.identity;
        Self {
            id: attempt.id,
            user_id: attempt.user_id,
            organization_id: attempt.organization_id,
            verification_type: attempt.verification_type.as_str().to_string(),
            unique_corp_id: identity.unique_corp_id,
            dependent_id: identity.dependent_id,
            first_name: identity.first_name,
            last_name: identity.last_name,
            email: identity.email,
            work_state: identity.work_state,
            date_of_birth: identity.date_of_birth.map(iso),
            policy_used: attempt.policy_used,
            successful_verification: attempt.successful_verification,
            verification_id: attempt.verification_id,
            verified_at: attempt.verified_at,
            created_at: attempt.created_at,
            additional_fields: blob(&attempt.additional_fields),
            eligibility_member_id: result.eligibility_member_id,
            is_v2: result.is_v2,
            verification_attempt_1_id: result.verification_attempt_1_id,
            verification_attempt_2_id: result.verification_attempt_2_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreEligibilityOrganizationMessage {
    pub organization_id: i64,
    pub eligibility_end_date: Option<Timestamp>,
}

impl From<PreEligibilityOrganization> for PreEligibilityOrganizationMessage {
    fn from(organization: PreEligibilityOrganization) -> Self {
        Self {
            organization_id: organization.organization_id,
            eligibility_end_date: organization.eligibility_end_date.map(Timestamp::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreEligibilityMessage {
    pub match_type: &'static str,
    pub pre_eligibility_organizations: Vec<PreEligibilityOrganizationMessage>,
}

impl From<PreEligibility> for PreEligibilityMessage {
    fn from(result: PreEligibility) -> Self {
        Self {
            match_type: result.match_type.as_str(),
            pre_eligibility_organizations: result
                .organizations
                .into_iter()
                .map(PreEligibilityOrganizationMessage::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::Member;

    #[test]
    fn members_serialize_with_wire_conventions() {
        let created = DateTime::from_timestamp(1_700_000_000, 5).unwrap();
        let member = Member {
            id: 3,
            version: 7,
            is_v2: false,
            organization_id: 1,
            file_id: Some(2),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 6, 2).unwrap(),
            email: "jane@acme.com".into(),
            unique_corp_id: "c1".into(),
            dependent_id: String::new(),
            work_state: None,
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::new(NaiveDate::from_ymd_opt(2024, 1, 1), None),
            record: json!({"plan": "gold"}),
            custom_attributes: json!({}),
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: created,
            updated_at: created,
        };

        let message = serde_json::to_value(MemberMessage::from(MatchedMember::v1(member))).unwrap();
        assert_eq!(message["version"], 0);
        assert_eq!(message["date_of_birth"], "1985-06-02");
        assert_eq!(message["record"], "{\"plan\":\"gold\"}");
        assert_eq!(message["created_at"], json!({"seconds": 1_700_000_000, "nanos": 5}));
        assert_eq!(message["effective_range"]["lower"], "2024-01-01");
        assert_eq!(message["effective_range"]["upper"], Value::Null);
        assert_eq!(message["member_1_id"], 3);
    }
}
