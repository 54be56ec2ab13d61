//! Pre-eligibility: how a person's known record relates to other census rows
//! carrying the same name and date of birth.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use super::error::{EligibilityMethod, EligibilityResult};
use super::EligibilityService;
use crate::domain::Member;
use crate::store::{MemberCriteria, MemberSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Potential = 0,
    PotentialCurrentOrganization = 1,
    PotentialOtherOrganization = 2,
    ExistingEligibility = 3,
    UnknownEligibility = 4,
    None = 5,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Potential => "POTENTIAL",
            Self::PotentialCurrentOrganization => "POTENTIAL_CURRENT_ORGANIZATION",
            Self::PotentialOtherOrganization => "POTENTIAL_OTHER_ORGANIZATION",
            Self::ExistingEligibility => "EXISTING_ELIGIBILITY",
            Self::UnknownEligibility => "UNKNOWN_ELIGIBILITY",
            Self::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreEligibilityCheck {
    pub member_id: Option<i64>,
    pub user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreEligibilityOrganization {
    pub organization_id: i64,
    /// Midnight UTC of the range's upper bound.
    pub eligibility_end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreEligibility {
    pub match_type: MatchType,
    pub organizations: Vec<PreEligibilityOrganization>,
}

fn is_active(member: &Member, today: NaiveDate) -> bool {
    member.effective_range.has_not_ended(today)
}

pub fn match_type(member: Option<&Member>, matches: &[Member], today: NaiveDate) -> MatchType {
    let Some(member) = member else {
        return if matches.is_empty() {
            MatchType::UnknownEligibility
        } else {
            MatchType::Potential
        };
    };

    if is_active(member, today) {
        return match matches {
            [only] if only.id == member.id => MatchType::ExistingEligibility,
            _ => MatchType::UnknownEligibility,
        };
    }

    let mut active = matches.iter().filter(|row| is_active(row, today));
    if active
        .clone()
        .any(|row| row.organization_id == member.organization_id)
    {
        MatchType::PotentialCurrentOrganization
    } else if active.any(|row| row.organization_id != member.organization_id) {
        MatchType::PotentialOtherOrganization
    } else {
        MatchType::UnknownEligibility
    }
}

pub fn matching_organizations(matches: &[Member], today: NaiveDate) -> Vec<PreEligibilityOrganization> {
    matches
        .iter()
        .filter(|row| is_active(row, today))
        .map(|row| PreEligibilityOrganization {
            organization_id: row.organization_id,
            eligibility_end_date: row
                .effective_range
                .upper
                .and_then(|upper| upper.and_hms_opt(0, 0, 0))
                .map(|midnight| midnight.and_utc()),
        })
        .collect()
}

impl EligibilityService {
    pub async fn check_pre_eligibility(
        &self,
        check: &PreEligibilityCheck,
    ) -> EligibilityResult<PreEligibility> {
        let now = Utc::now();
        let today = Self::today(now);
        let method = EligibilityMethod::PreEligibility;
        let first_name = Self::required_text(method, "first_name", &check.first_name)?;
        let last_name = Self::required_text(method, "last_name", &check.last_name)?;
        let date_of_birth = Self::required_date(method, "date_of_birth", &check.date_of_birth, today)?;

        let matches = self
            .store
            .find_members(
                MemberSource::Versioned,
                &MemberCriteria::name_and_dob(first_name, last_name, date_of_birth),
                today,
            )
            .await?;

        let member = match (check.member_id.filter(|id| *id > 0), check.user_id) {
            (Some(member_id), _) => {
                self.store
                    .get_member(MemberSource::Versioned, member_id)
                    .await?
            }
            (None, Some(user_id)) => self
                .store
                .verifications_for_user(user_id)
                .await?
                .into_iter()
                .filter(|linked| linked.verification.is_active(now))
                .max_by_key(|linked| (linked.verification.verified_at, linked.verification.id))
                .and_then(|linked| linked.member),
            (None, None) => None,
        };

        let match_type = match_type(member.as_ref(), &matches, today);
        info!(
            member_id = ?check.member_id,
            matches = matches.len(),
            match_type = match_type.as_str(),
            "checked pre-eligibility"
        );
        Ok(PreEligibility {
            match_type,
            organizations: matching_organizations(&matches, today),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::super::testing::{dob, fixture, new_member, organization};
    use super::*;
    use crate::domain::DateRange;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn row(id: i64, org: i64, upper: Option<NaiveDate>) -> Member {
        let new = new_member(org, &format!("c{id}"), "jane@acme.com");
        Member {
            id,
            version: 0,
            is_v2: false,
            organization_id: new.organization_id,
            file_id: new.file_id,
            first_name: new.first_name,
            last_name: new.last_name,
            date_of_birth: new.date_of_birth,
            email: new.email,
            unique_corp_id: new.unique_corp_id,
            dependent_id: new.dependent_id,
            work_state: new.work_state,
            work_country: new.work_country,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::new(None, upper),
            record: new.record,
            custom_attributes: new.custom_attributes,
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_member_is_potential_when_rows_match() {
        assert_eq!(match_type(None, &[row(1, 1, None)], today()), MatchType::Potential);
        assert_eq!(match_type(None, &[], today()), MatchType::UnknownEligibility);
    }

    #[test]
    fn active_member_that_is_the_only_match_is_existing() {
        let member = row(1, 1, None);
        assert_eq!(
            match_type(Some(&member), &[member.clone()], today()),
            MatchType::ExistingEligibility
        );
        assert_eq!(
            match_type(Some(&member), &[member.clone(), row(2, 2, None)], today()),
            MatchType::UnknownEligibility
        );
    }

    #[test]
    fn expired_member_with_active_matches_is_potential() {
        let expired = row(1, 1, Some(today()));
        assert_eq!(
            match_type(Some(&expired), &[row(2, 1, None)], today()),
            MatchType::PotentialCurrentOrganization
        );
        assert_eq!(
            match_type(Some(&expired), &[row(3, 2, None)], today()),
            MatchType::PotentialOtherOrganization
        );
        assert_eq!(
            match_type(Some(&expired), &[row(4, 2, Some(today()))], today()),
            MatchType::UnknownEligibility
        );
    }

    #[test]
    fn organizations_carry_end_dates_at_midnight() {
        let end = today() + Duration::days(30);
        let orgs = matching_organizations(&[row(1, 7, Some(end)), row(2, 8, None)], today());
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].organization_id, 7);
        assert_eq!(
            orgs[0].eligibility_end_date.map(|at| at.date_naive()),
            Some(end)
        );
        assert_eq!(orgs[1].eligibility_end_date, None);
    }

    #[tokio::test]
    async fn service_finds_matches_by_name_and_dob() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let member = fx
            .member(MemberSource::Versioned, new_member(1, "c1", "jane@acme.com"))
            .await;

        let result = fx
            .service
            .check_pre_eligibility(&PreEligibilityCheck {
                member_id: Some(member.id),
                user_id: None,
                first_name: "jane".into(),
                last_name: "DOE".into(),
                date_of_birth: dob().to_string(),
            })
            .await
            .unwrap();
        assert_eq!(result.match_type, MatchType::ExistingEligibility);
        assert_eq!(result.organizations.len(), 1);
    }
}
