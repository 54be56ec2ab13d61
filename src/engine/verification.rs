//! Writing and reading verifications.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{EligibilityError, EligibilityMethod, EligibilityResult};
use super::EligibilityService;
use crate::domain::{
    DateRange, IdentitySnapshot, LinkedVerification, Member, NewVerificationAttempt,
    VerificationAttempt, VerificationBundle, VerificationDraft, VerificationType,
};
use crate::flags::DISABLE_WRITE;
use crate::parser::convert::parse_date;
use crate::store::MemberSource;

const WRITES_DISABLED: &str = "Creation is disabled due to feature flag";
const NOT_FOUND_FOR_USER: &str = "Member Eligibility Verification record not found for user";

/// A verification as callers see it: snapshot fields fall back to the linked
/// member's values.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationForUser {
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
    pub date_of_birth: Option<NaiveDate>,
    pub work_state: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub record: Value,
    pub effective_range: Option<DateRange>,
    pub verification_type: VerificationType,
    pub is_active: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub additional_fields: Value,
    pub verification_session: Option<Uuid>,
    pub is_v2: bool,
    pub verification_1_id: i64,
    pub verification_2_id: Option<i64>,
    pub eligibility_member_2_id: Option<i64>,
    pub eligibility_member_2_version: Option<i32>,
}

fn fallback(snapshot: &Option<String>, member: Option<&str>) -> Option<String> {
    snapshot
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or(member.filter(|value| !value.trim().is_empty()))
        .map(str::to_string)
}

impl VerificationForUser {
    pub fn from_linked(linked: LinkedVerification, read_v2: bool, now: DateTime<Utc>) -> Self {
        let LinkedVerification {
            verification,
            verification_2,
            member,
            member_2,
        } = linked;
        let identity = &verification.identity;
        let m = member.as_ref();

        let (is_v2, member_2_id, member_2_version) = match (&verification_2, &member_2) {
            (Some(_), Some(member_2)) if read_v2 => (true, Some(member_2.id), Some(member_2.version)),
            (Some(_), None) if read_v2 => (true, None, None),
            _ => (false, None, None),
        };

        Self {
            verification_id: verification.id,
            user_id: verification.user_id,
            organization_id: verification.organization_id,
            eligibility_member_id: m.map(|member| member.id),
            eligibility_member_version: m.map(|member| member.version),
            first_name: fallback(&identity.first_name, m.map(|member| member.first_name.as_str())),
            last_name: fallback(&identity.last_name, m.map(|member| member.last_name.as_str())),
            email: fallback(&identity.email, m.map(|member| member.email.as_str())),
            unique_corp_id: fallback(
                &identity.unique_corp_id,
                m.map(|member| member.unique_corp_id.as_str()),
            ),
            dependent_id: fallback(
                &identity.dependent_id,
                m.map(|member| member.dependent_id.as_str()),
            ),
            date_of_birth: identity
                .date_of_birth
                .or(m.map(|member| member.date_of_birth)),
            work_state: fallback(
                &identity.work_state,
                m.and_then(|member| member.work_state.as_deref()),
            ),
            employer_assigned_id: m.and_then(|member| member.employer_assigned_id.clone()),
            gender_code: m.and_then(|member| member.gender_code.clone()),
            do_not_contact: m.and_then(|member| member.do_not_contact.clone()),
            record: m.map_or_else(|| Value::Object(Map::new()), |member| member.record.clone()),
            effective_range: m.map(|member| member.effective_range),
            verification_type: verification.verification_type,
            is_active: verification.is_active(now),
            verified_at: verification.verified_at,
            created_at: verification.created_at,
            deactivated_at: verification.deactivated_at,
            additional_fields: verification.additional_fields.clone(),
            verification_session: verification.verification_session,
            is_v2,
            verification_1_id: verification.id,
            verification_2_id: verification_2.as_ref().map(|row| row.id),
            eligibility_member_2_id: member_2_id,
            eligibility_member_2_version: member_2_version,
        }
    }
}

/// Identity fields shared by every verification write request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityFields {
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<String>,
}

impl IdentityFields {
    fn snapshot(&self, today: NaiveDate) -> IdentitySnapshot {
        let clean = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        IdentitySnapshot {
            unique_corp_id: clean(&self.unique_corp_id),
            dependent_id: clean(&self.dependent_id),
            first_name: clean(&self.first_name),
            last_name: clean(&self.last_name),
            email: clean(&self.email),
            work_state: clean(&self.work_state),
            date_of_birth: self
                .date_of_birth
                .as_deref()
                .and_then(|raw| parse_date(raw, today)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateVerificationRequest {
    pub user_id: Option<i64>,
    pub verification_type: String,
    pub organization_id: Option<i64>,
    #[serde(flatten)]
    pub identity: IdentityFields,
    pub eligibility_member_id: Option<i64>,
    /// JSON object encoded as a string.
    pub additional_fields: Option<String>,
    #[serde(with = "crate::utils::timestamp::option")]
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_session: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailedVerificationRequest {
    pub user_id: Option<i64>,
    pub verification_type: String,
    pub organization_id: Option<i64>,
    #[serde(flatten)]
    pub identity: IdentityFields,
    pub eligibility_member_id: Option<i64>,
    pub additional_fields: Option<String>,
    pub policy_used: Option<String>,
    #[serde(with = "crate::utils::timestamp::option")]
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerificationData {
    pub eligibility_member_id: Option<i64>,
    pub organization_id: i64,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub additional_fields: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MultipleVerificationRequest {
    pub user_id: Option<i64>,
    pub verification_type: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    #[serde(with = "crate::utils::timestamp::option")]
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_session: Option<String>,
    pub verification_data_list: Vec<VerificationData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationAttemptResult {
    pub attempt: VerificationAttempt,
    pub eligibility_member_id: Option<i64>,
    pub is_v2: bool,
    pub verification_attempt_1_id: i64,
    pub verification_attempt_2_id: Option<i64>,
}

fn method() -> Option<EligibilityMethod> {
    Some(EligibilityMethod::CreateVerificationForUser)
}

fn require_user(user_id: Option<i64>) -> EligibilityResult<i64> {
    user_id.ok_or_else(|| EligibilityError::validation(method(), "Null user_id provided", &["user_id"]))
}

fn parse_type(raw: &str) -> EligibilityResult<VerificationType> {
    raw.parse::<VerificationType>().map_err(|_| {
        EligibilityError::validation(
            method(),
            format!("Received an unknown verification type : {raw}"),
            &["verification_type"],
        )
    })
}

fn parse_session(raw: Option<&str>) -> EligibilityResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => Uuid::parse_str(value).map(Some).map_err(|_| {
            EligibilityError::validation(
                method(),
                format!("Invalid verification_session provided: {value}"),
                &["verification_session"],
            )
        }),
    }
}

fn parse_additional_fields(raw: Option<&str>) -> EligibilityResult<Value> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Value::Object(Map::new())),
        Some(value) => serde_json::from_str(value).map_err(|_| {
            EligibilityError::validation(
                method(),
                "additional_fields must be a JSON object",
                &["additional_fields"],
            )
        }),
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |midnight| midnight.and_utc())
}

/// Member eligibility is current when its range has not ended, inclusive of
/// the last day.
fn eligibility_current(member: &Member, today: NaiveDate) -> bool {
    member
        .effective_range
        .upper
        .map_or(true, |upper| today <= upper)
}

impl EligibilityService {
    fn ensure_writes_enabled(&self) -> EligibilityResult<()> {
        if self.flags.enabled(DISABLE_WRITE) {
            warn!("verification writes are disabled");
            return Err(EligibilityError::CreateVerification(
                WRITES_DISABLED.to_string(),
            ));
        }
        Ok(())
    }

    /// A record can be claimed again unless its organization allows one user
    /// per record.
    pub async fn verify_eligibility_record_usable(
        &self,
        member: &Member,
    ) -> EligibilityResult<bool> {
        if !self.store.member_has_verification(member.id).await? {
            return Ok(true);
        }
        let Some(organization) = self.store.get_organization(member.organization_id).await? else {
            return Ok(true);
        };
        if organization.employee_only {
            return Ok(false);
        }
        if organization.medical_plan_only && !member.beneficiaries_enabled() {
            return Ok(false);
        }
        Ok(true)
    }

    async fn member_2_for(&self, member: &Member) -> EligibilityResult<Option<(i64, i32)>> {
        Ok(self
            .store
            .by_org_identity(MemberSource::V2, &member.org_identity())
            .await?
            .map(|member_2| (member_2.id, member_2.version)))
    }

    pub async fn create_verification_for_user(
        &self,
        request: &CreateVerificationRequest,
    ) -> EligibilityResult<VerificationForUser> {
        self.ensure_writes_enabled()?;
        let user_id = require_user(request.user_id)?;
        let verification_type = parse_type(&request.verification_type)?;
        let organization_id = request.organization_id.ok_or_else(|| {
            EligibilityError::validation(
                method(),
                "Null organization_id provided",
                &["organization_id"],
            )
        })?;
        let verification_session = parse_session(request.verification_session.as_deref())?;
        let additional_fields = parse_additional_fields(request.additional_fields.as_deref())?;
        let now = Utc::now();
        let write_v2 = self.v2_write_enabled(organization_id);

        let member = match request.eligibility_member_id.filter(|id| *id > 0) {
            Some(member_id) => {
                let member = self
                    .store
                    .get_member(MemberSource::Versioned, member_id)
                    .await?
                    .ok_or_else(|| {
                        EligibilityError::CreateVerification(format!(
                            "Eligibility record not found for eligibility_member_id={member_id}"
                        ))
                    })?;
                if !self.verify_eligibility_record_usable(&member).await? {
                    let suffix = if write_v2 { " of v2" } else { "" };
                    return Err(EligibilityError::RecordAlreadyClaimed(format!(
                        "Error persisting verification record- e9y record already claimed{suffix}"
                    )));
                }
                Some(member)
            }
            None => None,
        };
        let member_2 = match (&member, write_v2) {
            (Some(member), true) => self.member_2_for(member).await?,
            _ => None,
        };

        let draft = VerificationDraft {
            user_id,
            organization_id,
            verification_type,
            identity: request.identity.snapshot(now.date_naive()),
            additional_fields,
            verified_at: request.verified_at.unwrap_or(now),
            verification_session,
            member_id: member.as_ref().map(|member| member.id),
            write_v2,
            member_2,
            policy_used: None,
        };
        let created = self
            .store
            .create_verifications(VerificationBundle {
                drafts: vec![draft],
            })
            .await
            .map_err(|err| {
                error!(user_id, organization_id, error = %err, "failed to persist verification");
                EligibilityError::CreateVerification(
                    "Error persisting verification record".to_string(),
                )
            })?;
        info!(
            user_id,
            organization_id,
            verification_type = %verification_type,
            verifications = created.len(),
            is_v2 = write_v2,
            "created verification"
        );

        self.get_verification_for_user(user_id, None, false).await
    }

    pub async fn create_multiple_verifications_for_user(
        &self,
        request: &MultipleVerificationRequest,
    ) -> EligibilityResult<Vec<VerificationForUser>> {
        self.ensure_writes_enabled()?;
        let user_id = require_user(request.user_id)?;
        let verification_type = parse_type(&request.verification_type)?;
        let verification_session = parse_session(request.verification_session.as_deref())?;
        let now = Utc::now();
        let verified_at = request.verified_at.unwrap_or(now);
        let date_of_birth = request
            .date_of_birth
            .as_deref()
            .and_then(|raw| parse_date(raw, now.date_naive()));

        let mut drafts = Vec::with_capacity(request.verification_data_list.len());
        for data in &request.verification_data_list {
            let member = match data.eligibility_member_id.filter(|id| *id > 0) {
                Some(member_id) => {
                    self.store
                        .get_member(MemberSource::Versioned, member_id)
                        .await?
                }
                None => None,
            };
            if let Some(member) = &member {
                if !self.verify_eligibility_record_usable(member).await? {
                    info!(
                        user_id,
                        member_id = member.id,
                        "skipping already claimed eligibility record"
                    );
                    continue;
                }
            }

            let write_v2 = self.v2_write_enabled(data.organization_id);
            let member_2 = match (&member, write_v2) {
                (Some(member), true) => self.member_2_for(member).await?,
                _ => None,
            };
            let identity = IdentityFields {
                unique_corp_id: data.unique_corp_id.clone(),
                dependent_id: data.dependent_id.clone(),
                first_name: request.first_name.clone(),
                last_name: request.last_name.clone(),
                email: data.email.clone(),
                work_state: data.work_state.clone(),
                date_of_birth: None,
            };
            let mut snapshot = identity.snapshot(now.date_naive());
            snapshot.date_of_birth = date_of_birth;

            drafts.push(VerificationDraft {
                user_id,
                organization_id: data.organization_id,
                verification_type,
                identity: snapshot,
                additional_fields: parse_additional_fields(data.additional_fields.as_deref())?,
                verified_at,
                verification_session,
                member_id: member.as_ref().map(|member| member.id),
                write_v2,
                member_2,
                policy_used: None,
            });
        }

        if drafts.is_empty() {
            return Err(EligibilityError::RecordAlreadyClaimed(
                "Error persisting verification records - e9y records already claimed".to_string(),
            ));
        }

        let count = drafts.len();
        self.store
            .create_verifications(VerificationBundle { drafts })
            .await
            .map_err(|err| {
                error!(user_id, error = %err, "failed to persist verifications");
                EligibilityError::CreateVerification(
                    "Error persisting verification records".to_string(),
                )
            })?;
        info!(user_id, verifications = count, "created verifications");

        self.get_all_verifications_for_user(user_id, &[], false).await
    }

    pub async fn create_failed_verification(
        &self,
        request: &FailedVerificationRequest,
    ) -> EligibilityResult<VerificationAttemptResult> {
        self.ensure_writes_enabled()?;
        let user_id = require_user(request.user_id)?;
        let verification_type = parse_type(&request.verification_type)?;
        let additional_fields = parse_additional_fields(request.additional_fields.as_deref())?;
        let now = Utc::now();

        let attempt = self
            .store
            .create_failed_attempt(NewVerificationAttempt {
                user_id,
                organization_id: request.organization_id,
                verification_type,
                identity: request.identity.snapshot(now.date_naive()),
                additional_fields,
                policy_used: Some(request.policy_used.clone().unwrap_or_default()),
                verified_at: request.verified_at,
            })
            .await?;
        info!(
            user_id,
            organization_id = ?request.organization_id,
            verification_type = %verification_type,
            "recorded failed verification attempt"
        );

        Ok(VerificationAttemptResult {
            verification_attempt_1_id: attempt.id,
            verification_attempt_2_id: None,
            is_v2: false,
            eligibility_member_id: request.eligibility_member_id,
            attempt,
        })
    }

    pub async fn deactivate_verification_for_user(
        &self,
        verification_id: i64,
        user_id: i64,
    ) -> EligibilityResult<VerificationForUser> {
        let failure = || {
            EligibilityError::DeactivateVerification(
                "Error deactivating verification record for the user".to_string(),
            )
        };
        let now = Utc::now();

        let verification = self
            .store
            .get_verification(verification_id)
            .await?
            .filter(|verification| verification.user_id == user_id)
            .ok_or_else(failure)?;
        let require_v2 = self.v2_write_enabled(verification.organization_id);

        match self
            .store
            .deactivate_verification(verification_id, start_of_day(now), require_v2)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Err(failure()),
            Err(err) => {
                error!(verification_id, user_id, error = %err, "failed to deactivate verification");
                return Err(failure());
            }
        }
        info!(verification_id, user_id, "deactivated verification");

        let read_v2 = self.v2_read_enabled(verification.organization_id);
        self.store
            .verifications_for_user(user_id)
            .await?
            .into_iter()
            .find(|linked| linked.verification.id == verification_id)
            .map(|linked| VerificationForUser::from_linked(linked, read_v2, now))
            .ok_or_else(failure)
    }

    /// Active verifications of the user, newest `verified_at` first.
    async fn active_verifications(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> EligibilityResult<Vec<LinkedVerification>> {
        let mut active: Vec<LinkedVerification> = self
            .store
            .verifications_for_user(user_id)
            .await?
            .into_iter()
            .filter(|linked| linked.verification.is_active(now))
            .collect();
        active.sort_by(|a, b| {
            (b.verification.verified_at, b.verification.id)
                .cmp(&(a.verification.verified_at, a.verification.id))
        });
        Ok(active)
    }

    pub async fn get_verification_for_user(
        &self,
        user_id: i64,
        organization_id: Option<i64>,
        active_eligibility_only: bool,
    ) -> EligibilityResult<VerificationForUser> {
        let now = Utc::now();
        let Some(latest) = self.active_verifications(user_id, now).await?.into_iter().next() else {
            return Err(EligibilityError::GetMatch(NOT_FOUND_FOR_USER.to_string()));
        };

        if let Some(organization_id) = organization_id.filter(|id| *id > 0) {
            if latest.verification.organization_id != organization_id {
                return Err(EligibilityError::GetMatch(
                    "Member Eligibility Verification record not found for organization/user combination"
                        .to_string(),
                ));
            }
        }

        if active_eligibility_only {
            let current = latest
                .member
                .as_ref()
                .map_or(true, |member| eligibility_current(member, now.date_naive()));
            if !current {
                return Err(EligibilityError::GetMatch(
                    "No Member Eligibility Verification record with valid eligibility found for user"
                        .to_string(),
                ));
            }
        }

        let read_v2 = self.v2_read_enabled(latest.verification.organization_id);
        Ok(VerificationForUser::from_linked(latest, read_v2, now))
    }

    /// Newest active verification per organization.
    pub async fn get_all_verifications_for_user(
        &self,
        user_id: i64,
        organization_ids: &[i64],
        active_eligibility_only: bool,
    ) -> EligibilityResult<Vec<VerificationForUser>> {
        let now = Utc::now();
        let active = self.active_verifications(user_id, now).await?;
        if active.is_empty() {
            return Err(EligibilityError::GetMatch(
                "No Member Eligibility Verification records found for user".to_string(),
            ));
        }

        let mut per_org: BTreeMap<i64, LinkedVerification> = BTreeMap::new();
        for linked in active {
            per_org
                .entry(linked.verification.organization_id)
                .or_insert(linked);
        }

        let today = now.date_naive();
        let records: Vec<VerificationForUser> = per_org
            .into_iter()
            .filter(|(organization_id, _)| {
                organization_ids.is_empty() || organization_ids.contains(organization_id)
            })
            .filter(|(_, linked)| {
                !active_eligibility_only
                    || linked
                        .member
                        .as_ref()
                        .map_or(true, |member| eligibility_current(member, today))
            })
            .map(|(organization_id, linked)| {
                VerificationForUser::from_linked(linked, self.v2_read_enabled(organization_id), now)
            })
            .collect();

        if records.is_empty() {
            return Err(EligibilityError::GetMatch(
                "No matching Member Eligibility Verification records found for user".to_string(),
            ));
        }
        Ok(records)
    }

    pub async fn get_other_user_ids_in_family(&self, user_id: i64) -> EligibilityResult<Vec<i64>> {
        Ok(self
            .store
            .other_user_ids_in_family(user_id, Utc::now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::testing::{fixture, new_member, organization, Fixture};
    use super::*;
    use crate::flags::{E9Y_2_READ, E9Y_2_WRITE};
    use crate::store::RecordStore;

    fn request(member_id: Option<i64>) -> CreateVerificationRequest {
        CreateVerificationRequest {
            user_id: Some(42),
            verification_type: "primary".into(),
            organization_id: Some(1),
            identity: IdentityFields {
                email: Some("jane@acme.com".into()),
                ..IdentityFields::default()
            },
            eligibility_member_id: member_id,
            ..CreateVerificationRequest::default()
        }
    }

    async fn seeded() -> (Fixture, Member) {
        let fx = fixture();
        fx.org(organization(1)).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;
        (fx, member)
    }

    #[tokio::test]
    async fn creates_and_reads_back_verification() {
        let (fx, member) = seeded().await;

        let created = fx
            .service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();
        assert_eq!(created.user_id, 42);
        assert_eq!(created.eligibility_member_id, Some(member.id));
        assert_eq!(created.verification_type, VerificationType::Primary);
        // work_state was not captured, so it comes from the member
        assert_eq!(created.work_state.as_deref(), Some("NY"));
        assert!(!created.is_v2);
        assert!(fx.store.verification_2_rows().await.is_empty());
    }

    #[tokio::test]
    async fn dual_write_captures_member_2() {
        let (fx, member) = seeded().await;
        let member_2 = fx
            .member(MemberSource::V2, new_member(1, "c1", "jane@acme.com"))
            .await;
        fx.flags.set_orgs(E9Y_2_WRITE, &[1]);
        fx.flags.set_orgs(E9Y_2_READ, &[1]);

        let created = fx
            .service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();
        assert!(created.is_v2);
        assert_eq!(created.eligibility_member_2_id, Some(member_2.id));
        let rows = fx.store.verification_2_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].member_id, Some(member_2.id));
    }

    #[tokio::test]
    async fn rejects_unknown_types_and_missing_users() {
        let (fx, _) = seeded().await;
        let mut bad_type = request(None);
        bad_type.verification_type = "sso".into();
        let err = fx
            .service
            .create_verification_for_user(&bad_type)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Received an unknown verification type : sso");

        let mut no_user = request(None);
        no_user.user_id = None;
        let err = fx
            .service
            .create_verification_for_user(&no_user)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Null user_id provided");
    }

    #[tokio::test]
    async fn writes_can_be_disabled() {
        let (fx, _) = seeded().await;
        fx.flags.set_bool(DISABLE_WRITE, true);
        let err = fx
            .service
            .create_verification_for_user(&request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::CreateVerification(_)));
    }

    #[tokio::test]
    async fn employee_only_records_cannot_be_claimed_twice() {
        let fx = fixture();
        let mut org = organization(1);
        org.employee_only = true;
        fx.org(org).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;

        fx.service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();
        let mut second = request(Some(member.id));
        second.user_id = Some(43);
        let err = fx
            .service
            .create_verification_for_user(&second)
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::RecordAlreadyClaimed(_)));
    }

    #[tokio::test]
    async fn multiple_verifications_skip_claimed_records() {
        let fx = fixture();
        let mut org = organization(1);
        org.employee_only = true;
        fx.org(org).await;
        fx.org(organization(2)).await;
        let claimed = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;
        let open = fx
            .member(MemberSource::Versioned, new_member(2, "c2", "jane@acme.com"))
            .await;
        fx.service
            .create_verification_for_user(&request(Some(claimed.id)))
            .await
            .unwrap();

        let multiple = MultipleVerificationRequest {
            user_id: Some(77),
            verification_type: "MULTISTEP".into(),
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            verification_data_list: vec![
                VerificationData {
                    eligibility_member_id: Some(claimed.id),
                    organization_id: 1,
                    ..VerificationData::default()
                },
                VerificationData {
                    eligibility_member_id: Some(open.id),
                    organization_id: 2,
                    ..VerificationData::default()
                },
            ],
            ..MultipleVerificationRequest::default()
        };
        let created = fx
            .service
            .create_multiple_verifications_for_user(&multiple)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].organization_id, 2);
    }

    #[tokio::test]
    async fn failed_attempt_is_recorded_without_verification() {
        let (fx, _) = seeded().await;
        let result = fx
            .service
            .create_failed_verification(&FailedVerificationRequest {
                user_id: Some(42),
                verification_type: "alternate".into(),
                organization_id: Some(1),
                ..FailedVerificationRequest::default()
            })
            .await
            .unwrap();
        assert!(!result.attempt.successful_verification);
        assert!(result.attempt.verification_id.is_none());
        assert_eq!(result.attempt.policy_used.as_deref(), Some(""));
        assert_eq!(fx.store.attempts_for_user(42).await.len(), 1);
    }

    #[tokio::test]
    async fn deactivation_requires_ownership_and_hides_record() {
        let (fx, member) = seeded().await;
        let created = fx
            .service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();

        let err = fx
            .service
            .deactivate_verification_for_user(created.verification_id, 99)
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::DeactivateVerification(_)));

        let deactivated = fx
            .service
            .deactivate_verification_for_user(created.verification_id, 42)
            .await
            .unwrap();
        assert!(!deactivated.is_active);
        assert!(fx
            .service
            .get_verification_for_user(42, None, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn scheduled_deactivation_keeps_verification_active_until_it_passes() {
        let (fx, member) = seeded().await;
        let created = fx
            .service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();

        fx.store
            .deactivate_verification(created.verification_id, Utc::now() + Duration::days(1), false)
            .await
            .unwrap();
        let found = fx
            .service
            .get_verification_for_user(42, None, true)
            .await
            .unwrap();
        assert_eq!(found.verification_id, created.verification_id);

        fx.store
            .deactivate_verification(created.verification_id, Utc::now() - Duration::days(1), false)
            .await
            .unwrap();
        let err = fx
            .service
            .get_verification_for_user(42, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::GetMatch(_)));
    }

    #[tokio::test]
    async fn org_filter_and_expired_eligibility_hide_verifications() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let mut expired = new_member(1, "c1", "jane@acme.com");
        expired.effective_range = DateRange::new(None, Some(Utc::now().date_naive() - Duration::days(2)));
        let member = fx.member(MemberSource::Versioned, expired).await;
        fx.service
            .create_verification_for_user(&request(Some(member.id)))
            .await
            .unwrap();

        let err = fx
            .service
            .get_verification_for_user(42, Some(2), false)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Member Eligibility Verification record not found for organization/user combination"
        );
        assert!(fx.service.get_verification_for_user(42, Some(1), false).await.is_ok());
        assert!(fx.service.get_verification_for_user(42, None, true).await.is_err());
        assert!(fx
            .service
            .get_all_verifications_for_user(42, &[1], true)
            .await
            .is_err());
    }
}
