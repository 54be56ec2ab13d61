//! Synthetic member records for non-production environments.

use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::error::{EligibilityError, EligibilityMethod, EligibilityResult};
use super::EligibilityService;
use crate::domain::{DateRange, Member, NewMember};
use crate::flags::DISABLE_WRITE;
use crate::parser::convert::parse_date;
use crate::store::MemberSource;

pub const DEFAULT_FIRST_NAME: &str = "E9Y Test User";
pub const DEFAULT_LAST_NAME: &str = "API";
pub const DEFAULT_EMAIL: &str = "apiTestUser@testemail.com";
pub const DEFAULT_CORP_ID: &str = "apiTestUser";
pub const DEFAULT_DEPENDENT_ID: &str = "apiTestDependent";
pub const DEFAULT_WORK_COUNTRY: &str = "US";
pub const DEFAULT_DATE_OF_BIRTH: &str = "1970-01-01";

/// Every field is optional; missing ones take the defaults above.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestMemberRecord {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub date_of_birth: Option<String>,
    pub work_country: Option<String>,
}

fn or_default(value: &Option<String>, default: &str) -> String {
    value.clone().unwrap_or_else(|| default.to_string())
}

impl TestMemberRecord {
    fn resolve(&self, organization_id: i64, today: NaiveDate) -> EligibilityResult<NewMember> {
        let raw_dob = or_default(&self.date_of_birth, DEFAULT_DATE_OF_BIRTH);
        let date_of_birth = parse_date(&raw_dob, today).ok_or_else(|| {
            EligibilityError::validation(
                Some(EligibilityMethod::CreateTestMemberRecords),
                format!("Invalid date_of_birth provided: {raw_dob}"),
                &["date_of_birth"],
            )
        })?;

        Ok(NewMember {
            organization_id,
            file_id: None,
            first_name: or_default(&self.first_name, DEFAULT_FIRST_NAME),
            last_name: or_default(&self.last_name, DEFAULT_LAST_NAME),
            date_of_birth,
            email: or_default(&self.email, DEFAULT_EMAIL),
            unique_corp_id: or_default(&self.unique_corp_id, DEFAULT_CORP_ID),
            dependent_id: or_default(&self.dependent_id, DEFAULT_DEPENDENT_ID),
            work_state: None,
            work_country: Some(or_default(&self.work_country, DEFAULT_WORK_COUNTRY)),
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::new(
                Some(today - Duration::days(1)),
                Some(today + Duration::days(365)),
            ),
            record: json!({}),
            custom_attributes: Value::Object(Default::default()),
            hash_value: None,
            hash_version: None,
        })
    }
}

impl EligibilityService {
    pub async fn create_test_member_records(
        &self,
        organization_id: i64,
        records: &[TestMemberRecord],
    ) -> EligibilityResult<Vec<Member>> {
        let method = EligibilityMethod::CreateTestMemberRecords;
        if self.environment.is_production() {
            return Err(EligibilityError::ForbiddenInProduction { method });
        }
        if self.store.get_organization(organization_id).await?.is_none() {
            return Err(EligibilityError::OrganizationNotFound(organization_id));
        }
        if self.flags.enabled(DISABLE_WRITE) {
            return Err(EligibilityError::CreateVerification(
                "Creation is disabled due to feature flag".to_string(),
            ));
        }

        let today = Utc::now().date_naive();
        let rows = records
            .iter()
            .map(|record| record.resolve(organization_id, today))
            .collect::<EligibilityResult<Vec<_>>>()?;

        if self.v2_write_enabled(organization_id) {
            self.store
                .persist_members(MemberSource::V2, rows.clone())
                .await?;
        }
        let persisted = self
            .store
            .persist_members(MemberSource::Versioned, rows)
            .await?;
        info!(
            organization_id,
            members = persisted.len(),
            "created test member records"
        );
        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fixture, fixture_with, organization};
    use super::*;
    use crate::config::{AppConfig, AppEnvironment};
    use crate::engine::client_specific::ClientSpecificRegistry;

    #[tokio::test]
    async fn missing_fields_take_defaults() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let created = fx
            .service
            .create_test_member_records(
                1,
                &[
                    TestMemberRecord::default(),
                    TestMemberRecord {
                        first_name: Some("Ada".into()),
                        unique_corp_id: Some("ada-1".into()),
                        ..TestMemberRecord::default()
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        let default = created
            .iter()
            .find(|member| member.unique_corp_id == DEFAULT_CORP_ID)
            .unwrap();
        assert_eq!(default.first_name, DEFAULT_FIRST_NAME);
        assert_eq!(default.email, DEFAULT_EMAIL);
        assert_eq!(default.date_of_birth.to_string(), DEFAULT_DATE_OF_BIRTH);
        assert!(default.file_id.is_none());
        assert!(default.hash_value.is_none());
        assert!(default.is_valid_on(Utc::now().date_naive()));
    }

    #[tokio::test]
    async fn unknown_organization_is_rejected() {
        let fx = fixture();
        let err = fx
            .service
            .create_test_member_records(5, &[TestMemberRecord::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::OrganizationNotFound(5)));
    }

    #[tokio::test]
    async fn production_refuses_test_records() {
        let mut config = AppConfig::for_tests();
        config.environment = AppEnvironment::Production;
        let fx = fixture_with(ClientSpecificRegistry::default(), config);
        fx.org(organization(1)).await;
        let err = fx
            .service
            .create_test_member_records(1, &[TestMemberRecord::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::ForbiddenInProduction { .. }));
    }
}
