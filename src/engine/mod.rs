//! The verification engine: member lookup strategies, verification writes and
//! the reads built on top of them.
//!
//! Every entry point reads feature flags at call time and talks to the record
//! store through [`RecordStore`]; nothing here caches between calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::config::{AppConfig, AppEnvironment};
use crate::domain::{DateRange, Member, Organization};
use crate::flags::{
    FeatureFlags, E9Y_2_READ, E9Y_2_WRITE, ORGS_ENABLED_FOR_OVER_ELIGIBILITY,
    RELEASE_OVER_ELIGIBILITY,
};
use crate::parser::convert::parse_date;
use crate::store::{MemberCriteria, MemberSource, RecordStore};

pub mod client_specific;
pub mod error;
pub mod features;
pub mod pre_eligibility;
pub mod query;
pub mod selection;
pub mod test_records;
pub mod verification;
pub mod wallet;

use client_specific::{
    ClientSpecificCallError, ClientSpecificMode, ClientSpecificRegistry, ClientSpecificRequest,
    RegisteredAdapter,
};
use error::{EligibilityError, EligibilityMethod, EligibilityResult};

/// A member returned by a check, with both generations' ids when the v2
/// table answered.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedMember {
    pub member: Member,
    pub is_v2: bool,
    pub member_1_id: Option<i64>,
    pub member_2_id: Option<i64>,
}

impl MatchedMember {
    pub fn v1(member: Member) -> Self {
        Self {
            member_1_id: Some(member.id),
            member_2_id: None,
            is_v2: false,
            member,
        }
    }

    fn v2(member_1_id: Option<i64>, member: Member) -> Self {
        Self {
            member_1_id,
            member_2_id: Some(member.id),
            is_v2: true,
            member,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StandardCheck {
    pub date_of_birth: String,
    pub company_email: String,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlternateCheck {
    pub date_of_birth: String,
    pub first_name: String,
    pub last_name: String,
    pub work_state: Option<String>,
    pub unique_corp_id: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OvereligibilityCheck {
    pub date_of_birth: String,
    pub first_name: String,
    pub last_name: String,
    pub company_email: Option<String>,
    pub unique_corp_id: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NoDobCheck {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MultistepCheck {
    pub date_of_birth: String,
    pub first_name: String,
    pub last_name: String,
    pub company_email: Option<String>,
    pub work_state: Option<String>,
    pub unique_corp_id: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientSpecificCheck {
    pub organization_id: i64,
    pub unique_corp_id: String,
    pub date_of_birth: String,
    pub dependent_date_of_birth: String,
    pub is_employee: bool,
    pub user_id: Option<i64>,
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !blank(value))
}

pub struct EligibilityService {
    store: Arc<dyn RecordStore>,
    flags: Arc<dyn FeatureFlags>,
    client_specific: Arc<ClientSpecificRegistry>,
    no_dob_organizations: HashSet<i64>,
    environment: AppEnvironment,
}

impl EligibilityService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        flags: Arc<dyn FeatureFlags>,
        client_specific: Arc<ClientSpecificRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            flags,
            client_specific,
            no_dob_organizations: config.no_dob_organizations.clone(),
            environment: config.environment.clone(),
        }
    }

    fn today(now: DateTime<Utc>) -> NaiveDate {
        now.date_naive()
    }

    fn required_date(
        method: EligibilityMethod,
        field: &str,
        raw: &str,
        today: NaiveDate,
    ) -> EligibilityResult<NaiveDate> {
        parse_date(raw, today).ok_or_else(|| {
            EligibilityError::validation(
                Some(method),
                format!("Missing or invalid '{field}' provided."),
                &[field],
            )
        })
    }

    fn required_text<'a>(
        method: EligibilityMethod,
        field: &str,
        raw: &'a str,
    ) -> EligibilityResult<&'a str> {
        if blank(raw) {
            return Err(EligibilityError::validation(
                Some(method),
                format!("'{field}' must be provided."),
                &[field],
            ));
        }
        Ok(raw)
    }

    async fn organizations_of(
        &self,
        members: &[Member],
    ) -> EligibilityResult<HashMap<i64, Organization>> {
        let mut ids: Vec<i64> = members.iter().map(|member| member.organization_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .store
            .get_organizations(&ids)
            .await?
            .into_iter()
            .map(|org| (org.id, org))
            .collect())
    }

    async fn select_one(
        &self,
        method: EligibilityMethod,
        candidates: Vec<Member>,
        now: DateTime<Utc>,
    ) -> EligibilityResult<Member> {
        let organizations = self.organizations_of(&candidates).await?;
        selection::single_member(method, candidates, &organizations, now)
    }

    pub(crate) fn v2_write_enabled(&self, organization_id: i64) -> bool {
        self.flags.enabled_for_org(E9Y_2_WRITE, organization_id)
    }

    pub(crate) fn v2_read_enabled(&self, organization_id: i64) -> bool {
        self.flags.enabled_for_org(E9Y_2_READ, organization_id)
    }

    /// Re-runs the finder against `member_2` when the v2 write is on for the
    /// matched org. Without criteria the v2 row is found by org identity.
    async fn with_v2(
        &self,
        method: EligibilityMethod,
        member: Member,
        criteria: Option<&MemberCriteria>,
        now: DateTime<Utc>,
    ) -> EligibilityResult<MatchedMember> {
        if !self.v2_write_enabled(member.organization_id) {
            return Ok(MatchedMember::v1(member));
        }

        let member_2 = match criteria {
            Some(criteria) => {
                let candidates = self
                    .store
                    .find_members(MemberSource::V2, criteria, Self::today(now))
                    .await?;
                self.select_one(method, candidates, now).await?
            }
            None => self
                .store
                .by_org_identity(MemberSource::V2, &member.org_identity())
                .await?
                .ok_or_else(|| EligibilityError::not_found(method))?,
        };

        if member_2.organization_id != member.organization_id {
            error!(
                method = %method,
                member_id = member.id,
                member_2_id = member_2.id,
                "member_versioned and member_2 matched different organizations"
            );
            return Err(EligibilityError::Inconsistent(format!(
                "{method}: member_versioned and member_2 are not in sync"
            )));
        }

        Ok(MatchedMember::v2(Some(member.id), member_2))
    }

    /// `date_of_birth` + `company_email`.
    pub async fn check_standard(&self, check: &StandardCheck) -> EligibilityResult<MatchedMember> {
        let method = EligibilityMethod::Standard;
        let now = Utc::now();
        let today = Self::today(now);
        let dob = Self::required_date(method, "date_of_birth", &check.date_of_birth, today)?;
        let email = Self::required_text(method, "company_email", &check.company_email)?;

        let criteria = MemberCriteria::dob_and_email(dob, email);
        let candidates = self
            .store
            .find_members(MemberSource::Versioned, &criteria, today)
            .await?;
        let member = self.select_one(method, candidates, now).await?;
        info!(
            method = %method,
            user_id = ?check.user_id,
            member_id = member.id,
            organization_id = member.organization_id,
            "matched member"
        );
        self.with_v2(method, member, Some(&criteria), now).await
    }

    /// `date_of_birth` + names, narrowed by `work_state`; a `unique_corp_id`
    /// switches to the tertiary lookup.
    pub async fn check_alternate(
        &self,
        check: &AlternateCheck,
    ) -> EligibilityResult<MatchedMember> {
        let method = EligibilityMethod::Alternate;
        let now = Utc::now();
        let today = Self::today(now);
        let dob = Self::required_date(method, "date_of_birth", &check.date_of_birth, today)?;

        if let Some(corp_id) = non_blank(check.unique_corp_id.as_deref()) {
            let candidates = self
                .store
                .by_tertiary_verification(dob, corp_id, today)
                .await?;
            let member = self.select_one(method, candidates, now).await?;
            return self.with_v2(method, member, None, now).await;
        }

        Self::required_text(method, "first_name", &check.first_name)?;
        Self::required_text(method, "last_name", &check.last_name)?;
        let criteria = MemberCriteria::secondary(
            dob,
            &check.first_name,
            &check.last_name,
            check.work_state.as_deref(),
        );
        let candidates = self
            .store
            .find_members(MemberSource::Versioned, &criteria, today)
            .await?;
        let member = self.select_one(method, candidates, now).await?;
        self.with_v2(method, member, Some(&criteria), now).await
    }

    /// One member per organization the person is eligible under.
    pub async fn check_overeligibility(
        &self,
        check: &OvereligibilityCheck,
    ) -> EligibilityResult<Vec<MatchedMember>> {
        let method = EligibilityMethod::Overeligibility;
        let now = Utc::now();
        let today = Self::today(now);
        let dob = Self::required_date(method, "date_of_birth", &check.date_of_birth, today)?;
        Self::required_text(method, "first_name", &check.first_name)?;
        Self::required_text(method, "last_name", &check.last_name)?;

        let criteria = MemberCriteria::overeligibility(dob, &check.first_name, &check.last_name);
        let found = self
            .store
            .find_members(MemberSource::Versioned, &criteria, today)
            .await?;
        let organizations = self.organizations_of(&found).await?;
        let candidates = selection::overeligibility_candidates(
            found,
            check.company_email.as_deref(),
            check.unique_corp_id.as_deref(),
            &organizations,
        );
        if candidates.is_empty() {
            return Err(EligibilityError::not_found(method));
        }

        let mut organization_ids: Vec<i64> = candidates
            .iter()
            .map(|member| member.organization_id)
            .collect();
        organization_ids.sort_unstable();
        organization_ids.dedup();
        let released = self.flags.enabled(RELEASE_OVER_ELIGIBILITY)
            && self
                .flags
                .enabled_for_all_orgs(ORGS_ENABLED_FOR_OVER_ELIGIBILITY, &organization_ids);
        if !released {
            info!(
                method = %method,
                user_id = ?check.user_id,
                ?organization_ids,
                "over-eligibility is not enabled for every matched organization"
            );
            return Err(EligibilityError::not_found(method));
        }

        let members = selection::one_per_active_organization(candidates, &organizations, now);
        if members.is_empty() {
            return Err(EligibilityError::inactive_organization(method));
        }

        let mut matched = Vec::with_capacity(members.len());
        for member in members {
            matched.push(self.with_v2(method, member, None, now).await?);
        }
        info!(
            method = %method,
            user_id = ?check.user_id,
            organizations = matched.len(),
            "matched members across organizations"
        );
        Ok(matched)
    }

    /// Email + names, only for organizations that send no date of birth.
    pub async fn check_no_dob(&self, check: &NoDobCheck) -> EligibilityResult<MatchedMember> {
        let method = EligibilityMethod::NoDob;
        let now = Utc::now();
        let today = Self::today(now);
        Self::required_text(method, "email", &check.email)?;
        Self::required_text(method, "first_name", &check.first_name)?;
        Self::required_text(method, "last_name", &check.last_name)?;

        let criteria = MemberCriteria::email_and_name(&check.email, &check.first_name, &check.last_name);
        let candidates: Vec<Member> = self
            .store
            .find_members(MemberSource::Versioned, &criteria, today)
            .await?
            .into_iter()
            .filter(|member| self.no_dob_organizations.contains(&member.organization_id))
            .collect();
        if candidates.is_empty() {
            return Err(EligibilityError::no_dob_match());
        }
        let member = self.select_one(method, candidates, now).await?;

        if !self.v2_write_enabled(member.organization_id) {
            return Ok(MatchedMember::v1(member));
        }
        let member_2 = self
            .store
            .find_members(MemberSource::V2, &criteria, today)
            .await?
            .into_iter()
            .find(|candidate| candidate.organization_id == member.organization_id)
            .ok_or_else(|| {
                EligibilityError::NoDobMatch("No active records of 2.0 found for user.".to_string())
            })?;
        Ok(MatchedMember::v2(Some(member.id), member_2))
    }

    /// Primary (when an email is given), then secondary, then tertiary (when a
    /// corp id is given); the first lookup with candidates decides.
    pub async fn check_multistep(
        &self,
        check: &MultistepCheck,
    ) -> EligibilityResult<MatchedMember> {
        let method = EligibilityMethod::Multistep;
        let now = Utc::now();
        let today = Self::today(now);
        let dob = Self::required_date(method, "date_of_birth", &check.date_of_birth, today)?;

        if let Some(email) = non_blank(check.company_email.as_deref()) {
            let criteria = MemberCriteria::dob_and_email(dob, email);
            let candidates = self
                .store
                .find_members(MemberSource::Versioned, &criteria, today)
                .await?;
            if !candidates.is_empty() {
                let member = self.select_one(method, candidates, now).await?;
                return self.with_v2(method, member, Some(&criteria), now).await;
            }
        }

        if !blank(&check.first_name) && !blank(&check.last_name) {
            let criteria = MemberCriteria::secondary(
                dob,
                &check.first_name,
                &check.last_name,
                check.work_state.as_deref(),
            );
            let candidates = self
                .store
                .find_members(MemberSource::Versioned, &criteria, today)
                .await?;
            if !candidates.is_empty() {
                let member = self.select_one(method, candidates, now).await?;
                return self.with_v2(method, member, Some(&criteria), now).await;
            }
        }

        if let Some(corp_id) = non_blank(check.unique_corp_id.as_deref()) {
            let candidates = self
                .store
                .by_tertiary_verification(dob, corp_id, today)
                .await?;
            if !candidates.is_empty() {
                let member = self.select_one(method, candidates, now).await?;
                return self.with_v2(method, member, None, now).await;
            }
        }

        Err(EligibilityError::not_found(method))
    }

    pub async fn check_client_specific(
        &self,
        check: &ClientSpecificCheck,
    ) -> EligibilityResult<MatchedMember> {
        let method = EligibilityMethod::ClientSpecific;
        let now = Utc::now();
        let today = Self::today(now);
        let organization_id = check.organization_id;

        let unsupported = || {
            EligibilityError::ClientSpecificConfiguration(format!(
                "This organization does not support a client specific eligibility check: {organization_id}"
            ))
        };
        let organization = self
            .store
            .get_organization(organization_id)
            .await?
            .ok_or_else(unsupported)?;
        let implementation = organization
            .client_specific_implementation
            .clone()
            .filter(|name| !blank(name))
            .ok_or_else(unsupported)?;
        if !organization.is_active(now) {
            return Err(EligibilityError::ClientSpecificConfiguration(format!(
                "This organization is not currently activated: {organization_id}"
            )));
        }

        let dob = parse_date(&check.date_of_birth, today);
        let dependent_dob = parse_date(&check.dependent_date_of_birth, today);
        let date_of_birth = match (dob, dependent_dob) {
            (None, None) => {
                return Err(EligibilityError::validation(
                    Some(method),
                    "Neither 'date_of_birth' nor 'dependent_date_of_birth' provided.",
                    &["date_of_birth", "dependent_date_of_birth"],
                ))
            }
            (None, Some(_)) => {
                return Err(EligibilityError::validation(
                    Some(method),
                    "Employee 'date_of_birth' must be provided.",
                    &["date_of_birth"],
                ))
            }
            (Some(_), None) if !check.is_employee => {
                return Err(EligibilityError::validation(
                    Some(method),
                    "'dependent_date_of_birth' must be provided if is_employee=False",
                    &["dependent_date_of_birth"],
                ))
            }
            (Some(dob), _) => dob,
        };
        Self::required_text(method, "unique_corp_id", &check.unique_corp_id)?;

        let registered = self
            .client_specific
            .get(&implementation)
            .cloned()
            .ok_or_else(unsupported)?;
        let request = ClientSpecificRequest {
            is_employee: check.is_employee,
            unique_corp_id: check.unique_corp_id.trim().to_string(),
            date_of_birth,
            dependent_date_of_birth: dependent_dob,
        };

        let member = match registered.mode {
            ClientSpecificMode::OnlyClientCheck => {
                self.client_check(&implementation, &registered, &request, &organization, now)
                    .await?
            }
            ClientSpecificMode::OnlyCensus => {
                self.census_check(&implementation, &request, organization_id, today)
                    .await?
            }
            ClientSpecificMode::FallbackToCensus => {
                match self
                    .client_check(&implementation, &registered, &request, &organization, now)
                    .await
                {
                    Ok(member) => member,
                    Err(
                        client_error @ (EligibilityError::ClientSpecificMatch { .. }
                        | EligibilityError::UpstreamClientSpecific { .. }),
                    ) => {
                        info!(
                            implementation = %implementation,
                            organization_id,
                            "client check failed, falling back to census"
                        );
                        match self
                            .census_check(&implementation, &request, organization_id, today)
                            .await
                        {
                            Ok(member) => member,
                            Err(_) => return Err(client_error),
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        };

        if self.v2_write_enabled(organization_id) {
            Ok(MatchedMember {
                member_1_id: None,
                member_2_id: Some(member.id),
                is_v2: true,
                member,
            })
        } else {
            Ok(MatchedMember::v1(member))
        }
    }

    async fn client_check(
        &self,
        implementation: &str,
        registered: &RegisteredAdapter,
        request: &ClientSpecificRequest,
        organization: &Organization,
        now: DateTime<Utc>,
    ) -> EligibilityResult<Member> {
        let response = registered
            .adapter
            .verify(request)
            .await
            .map_err(|err: ClientSpecificCallError| {
                warn!(
                    implementation = %implementation,
                    organization_id = organization.id,
                    error = %err,
                    "client specific upstream call failed"
                );
                EligibilityError::UpstreamClientSpecific {
                    implementation: implementation.to_string(),
                    cause: err.to_string(),
                }
            })?
            .ok_or_else(|| EligibilityError::ClientSpecificMatch {
                implementation: implementation.to_string(),
            })?;

        let mut record = Map::new();
        record.insert("is_employee".to_string(), Value::Bool(request.is_employee));
        record.extend(response);

        Ok(Member {
            id: 0,
            version: 0,
            is_v2: false,
            organization_id: organization.id,
            file_id: None,
            first_name: String::new(),
            last_name: String::new(),
            date_of_birth: request.date_of_birth,
            email: String::new(),
            unique_corp_id: request.unique_corp_id.clone(),
            dependent_id: String::new(),
            work_state: None,
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::unbounded(),
            record: Value::Object(record),
            custom_attributes: Value::Object(Map::new()),
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn census_check(
        &self,
        implementation: &str,
        request: &ClientSpecificRequest,
        organization_id: i64,
        today: NaiveDate,
    ) -> EligibilityResult<Member> {
        let source = if self.v2_write_enabled(organization_id) {
            MemberSource::V2
        } else {
            MemberSource::Versioned
        };
        let criteria = MemberCriteria::client_specific(
            organization_id,
            &request.unique_corp_id,
            request.date_of_birth,
        );
        self.store
            .find_members(source, &criteria, today)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EligibilityError::ClientSpecificMatch {
                implementation: implementation.to_string(),
            })
    }

    pub async fn get_member_by_id(&self, member_id: i64) -> EligibilityResult<MatchedMember> {
        let member = self
            .store
            .get_member(MemberSource::Versioned, member_id)
            .await?
            .ok_or_else(|| {
                EligibilityError::GetMatch(format!("member_versioned not found for id={member_id}"))
            })?;

        if !self.v2_read_enabled(member.organization_id) {
            return Ok(MatchedMember::v1(member));
        }
        match self
            .store
            .by_org_identity(MemberSource::V2, &member.org_identity())
            .await?
        {
            Some(member_2) => Ok(MatchedMember::v2(Some(member.id), member_2)),
            None => {
                warn!(member_id, "member_2 not found, falling back to member_versioned");
                Ok(MatchedMember::v1(member))
            }
        }
    }

    pub async fn get_member_by_org_identity(
        &self,
        organization_id: i64,
        unique_corp_id: &str,
        dependent_id: &str,
    ) -> EligibilityResult<MatchedMember> {
        if blank(unique_corp_id) {
            return Err(EligibilityError::validation(
                Some(EligibilityMethod::GetByOrgIdentity),
                "Got an empty value for unique_corp_id.",
                &["unique_corp_id"],
            ));
        }
        let now = Utc::now();
        let identity = crate::domain::OrgIdentity::new(
            organization_id,
            unique_corp_id.trim(),
            dependent_id.trim(),
        );

        let member = self
            .store
            .by_org_identity(MemberSource::Versioned, &identity)
            .await?
            .ok_or_else(|| {
                EligibilityError::IdentityMatch(error::MATCH_NOT_FOUND.to_string())
            })?;
        let active = self
            .store
            .get_organization(organization_id)
            .await?
            .map_or(false, |org| org.is_active(now));
        if !active {
            return Err(EligibilityError::IdentityMatch(
                "Organization not active.".to_string(),
            ));
        }

        if !self.v2_read_enabled(organization_id) {
            return Ok(MatchedMember::v1(member));
        }
        match self
            .store
            .by_org_identity(MemberSource::V2, &identity)
            .await?
        {
            Some(member_2) => Ok(MatchedMember::v2(Some(member.id), member_2)),
            None => {
                warn!(
                    organization_id,
                    member_id = member.id,
                    "member_2 not found by org identity, falling back to member_versioned"
                );
                Ok(MatchedMember::v1(member))
            }
        }
    }

    pub fn environment(&self) -> &AppEnvironment {
        &self.environment
    }
}
