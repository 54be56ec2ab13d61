//! Wallet enablement derived from a member's census record.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::error::{EligibilityError, EligibilityResult};
use super::EligibilityService;
use crate::domain::{DateRange, Member, OrgIdentity};
use crate::store::MemberSource;

#[derive(Debug, Clone, PartialEq)]
pub struct WalletEnablement {
    pub member_id: i64,
    pub organization_id: i64,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub enabled: bool,
    pub insurance_plan: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub eligibility_date: Option<NaiveDate>,
    pub eligibility_end_date: Option<NaiveDate>,
    pub effective_range: DateRange,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_v2: bool,
    pub member_1_id: Option<i64>,
    pub member_2_id: Option<i64>,
}

fn record_date(member: &Member, key: &str) -> Option<NaiveDate> {
    member
        .record_str(key)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

impl WalletEnablement {
    pub fn from_member(member: &Member, member_1_id: Option<i64>) -> Self {
        let enabled = match member.record.get("wallet_enabled") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(raw)) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "y" | "yes"
            ),
            _ => false,
        };
        let start_date = record_date(member, "wallet_eligibility_start_date")
            .or_else(|| record_date(member, "employee_start_date"));

        Self {
            member_id: member.id,
            organization_id: member.organization_id,
            unique_corp_id: member.unique_corp_id.clone(),
            dependent_id: member.dependent_id.clone(),
            enabled,
            insurance_plan: member.record_str("insurance_plan").map(str::to_string),
            start_date,
            eligibility_date: record_date(member, "employee_eligibility_date"),
            eligibility_end_date: member.effective_range.upper,
            effective_range: member.effective_range,
            created_at: member.created_at,
            updated_at: member.updated_at,
            is_v2: member.is_v2,
            member_1_id: member_1_id.or((!member.is_v2).then_some(member.id)),
            member_2_id: member.is_v2.then_some(member.id),
        }
    }
}

impl EligibilityService {
    pub async fn get_wallet_enablement(&self, member_id: i64) -> EligibilityResult<WalletEnablement> {
        let not_found = || {
            EligibilityError::GetMatch(format!(
                "Wallet enablement not found for member_id: {member_id}."
            ))
        };
        let member = self
            .store
            .get_member(MemberSource::Versioned, member_id)
            .await?
            .ok_or_else(not_found)?;

        if self.v2_read_enabled(member.organization_id) {
            if let Some(member_2) = self
                .store
                .by_org_identity(MemberSource::V2, &member.org_identity())
                .await?
            {
                return Ok(WalletEnablement::from_member(&member_2, Some(member.id)));
            }
        }
        Ok(WalletEnablement::from_member(&member, None))
    }

    pub async fn get_wallet_enablement_by_identity(
        &self,
        identity: &OrgIdentity,
    ) -> EligibilityResult<WalletEnablement> {
        let describe = || {
            format!(
                "identity=(organization_id={}, unique_corp_id={}, dependent_id={})",
                identity.organization_id, identity.unique_corp_id, identity.dependent_id
            )
        };
        let member = self
            .store
            .by_org_identity(MemberSource::Versioned, identity)
            .await?
            .ok_or_else(|| {
                EligibilityError::IdentityMatch(format!(
                    "Wallet enablement 1.0 not found for {}",
                    describe()
                ))
            })?;

        if !self.v2_read_enabled(identity.organization_id) {
            return Ok(WalletEnablement::from_member(&member, None));
        }
        let member_2 = self
            .store
            .by_org_identity(MemberSource::V2, identity)
            .await?
            .ok_or_else(|| {
                EligibilityError::IdentityMatch(format!(
                    "Wallet enablement 2.0 not found for {}",
                    describe()
                ))
            })?;
        Ok(WalletEnablement::from_member(&member_2, Some(member.id)))
    }

    /// Uses the member linked to the user's newest active verification.
    pub async fn get_wallet_enablement_by_user_id(
        &self,
        user_id: i64,
    ) -> EligibilityResult<WalletEnablement> {
        let now = Utc::now();
        let latest = self
            .store
            .verifications_for_user(user_id)
            .await?
            .into_iter()
            .filter(|linked| linked.verification.is_active(now) && linked.member.is_some())
            .max_by_key(|linked| (linked.verification.verified_at, linked.verification.id));

        let Some((member, member_2)) = latest.and_then(|linked| Some((linked.member?, linked.member_2)))
        else {
            return Err(EligibilityError::GetMatch(format!(
                "Wallet enablement not found for user_id: {user_id}."
            )));
        };

        match member_2 {
            Some(member_2) if self.v2_read_enabled(member.organization_id) => {
                Ok(WalletEnablement::from_member(&member_2, Some(member.id)))
            }
            _ => Ok(WalletEnablement::from_member(&member, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::{fixture, new_member, organization};
    use super::super::verification::CreateVerificationRequest;
    use super::*;
    use crate::flags::E9Y_2_READ;

    #[tokio::test]
    async fn wallet_fields_come_from_the_record() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let mut row = new_member(1, "c1", "jane@acme.com");
        row.record = json!({
            "wallet_enabled": true,
            "employee_start_date": "2023-02-01",
            "employee_eligibility_date": "2023-03-01",
            "insurance_plan": "PPO",
        });
        let member = fx.member(MemberSource::Versioned, row).await;

        let wallet = fx.service.get_wallet_enablement(member.id).await.unwrap();
        assert!(wallet.enabled);
        assert_eq!(wallet.start_date, NaiveDate::from_ymd_opt(2023, 2, 1));
        assert_eq!(wallet.eligibility_date, NaiveDate::from_ymd_opt(2023, 3, 1));
        assert_eq!(wallet.insurance_plan.as_deref(), Some("PPO"));
        assert_eq!(wallet.member_1_id, Some(member.id));
        assert!(!wallet.is_v2);
    }

    #[tokio::test]
    async fn wallet_defaults_to_disabled() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;
        let wallet = fx.service.get_wallet_enablement(member.id).await.unwrap();
        assert!(!wallet.enabled);
        assert!(wallet.start_date.is_none());

        let err = fx.service.get_wallet_enablement(999).await.unwrap_err();
        assert_eq!(err.to_string(), "Wallet enablement not found for member_id: 999.");
    }

    #[tokio::test]
    async fn identity_lookup_requires_v2_row_when_reading_v2() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;
        let identity = member.org_identity();
        assert!(fx.service.get_wallet_enablement_by_identity(&identity).await.is_ok());

        fx.flags.set_orgs(E9Y_2_READ, &[1]);
        let err = fx
            .service
            .get_wallet_enablement_by_identity(&identity)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Wallet enablement 2.0 not found"));

        let member_2 = fx
            .member(MemberSource::V2, new_member(1, "c1", "jane@acme.com"))
            .await;
        let wallet = fx
            .service
            .get_wallet_enablement_by_identity(&identity)
            .await
            .unwrap();
        assert!(wallet.is_v2);
        assert_eq!(wallet.member_2_id, Some(member_2.id));
        assert_eq!(wallet.member_1_id, Some(member.id));
    }

    #[tokio::test]
    async fn user_lookup_follows_the_active_verification() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;
        assert!(fx.service.get_wallet_enablement_by_user_id(5).await.is_err());

        fx.service
            .create_verification_for_user(&CreateVerificationRequest {
                user_id: Some(5),
                verification_type: "PRIMARY".into(),
                organization_id: Some(1),
                eligibility_member_id: Some(member.id),
                ..CreateVerificationRequest::default()
            })
            .await
            .unwrap();
        let wallet = fx.service.get_wallet_enablement_by_user_id(5).await.unwrap();
        assert_eq!(wallet.member_id, member.id);
    }
}
