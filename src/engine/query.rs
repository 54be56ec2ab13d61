//! Basic, employer and health-plan checks.
//!
//! Each check owns an ordered list of queries. A query runs only when every
//! parameter it needs is present; the first query that finds anything decides
//! the result. When the v2 write is enabled for the matched organization the
//! same query runs against `member_2`, and the v2 row is used only if it agrees
//! with the v1 row on identity, names and date of birth.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::error::{EligibilityError, EligibilityMethod, EligibilityResult, MATCH_NOT_FOUND};
use super::{selection, EligibilityService, MatchedMember};
use crate::domain::Member;
use crate::parser::convert::parse_date;
use crate::store::{MemberCriteria, MemberSource};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub date_of_birth: Option<String>,
    pub dependent_date_of_birth: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub employee_first_name: Option<String>,
    pub employee_last_name: Option<String>,
    pub work_state: Option<String>,
    pub unique_corp_id: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Param {
    DateOfBirth,
    DependentDateOfBirth,
    Email,
    FirstName,
    LastName,
    EmployeeFirstName,
    EmployeeLastName,
    WorkState,
    UniqueCorpId,
}

impl Param {
    fn name(&self) -> &'static str {
        match self {
            Self::DateOfBirth => "date_of_birth",
            Self::DependentDateOfBirth => "dependent_date_of_birth",
            Self::Email => "email",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::EmployeeFirstName => "employee_first_name",
            Self::EmployeeLastName => "employee_last_name",
            Self::WorkState => "work_state",
            Self::UniqueCorpId => "unique_corp_id",
        }
    }

    fn is_date(&self) -> bool {
        matches!(self, Self::DateOfBirth | Self::DependentDateOfBirth)
    }
}

/// Request values that passed presence checks; dates are parsed.
struct Resolved {
    text: HashMap<Param, String>,
    dates: HashMap<Param, NaiveDate>,
}

impl Resolved {
    fn from_params(params: &QueryParams, today: NaiveDate) -> Self {
        let raw = [
            (Param::DateOfBirth, &params.date_of_birth),
            (Param::DependentDateOfBirth, &params.dependent_date_of_birth),
            (Param::Email, &params.email),
            (Param::FirstName, &params.first_name),
            (Param::LastName, &params.last_name),
            (Param::EmployeeFirstName, &params.employee_first_name),
            (Param::EmployeeLastName, &params.employee_last_name),
            (Param::WorkState, &params.work_state),
            (Param::UniqueCorpId, &params.unique_corp_id),
        ];

        let mut text = HashMap::new();
        let mut dates = HashMap::new();
        for (param, value) in raw {
            let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            if param.is_date() {
                if let Some(date) = parse_date(value, today) {
                    dates.insert(param, date);
                }
            } else {
                text.insert(param, value.to_string());
            }
        }
        Self { text, dates }
    }

    fn has(&self, param: Param) -> bool {
        if param.is_date() {
            self.dates.contains_key(&param)
        } else {
            self.text.contains_key(&param)
        }
    }

    fn text(&self, param: Param) -> &str {
        self.text.get(&param).map(String::as_str).unwrap_or_default()
    }

    fn date(&self, param: Param) -> Option<NaiveDate> {
        self.dates.get(&param).copied()
    }
}

struct Query {
    name: &'static str,
    params: &'static [Param],
    criteria: fn(&Resolved) -> Option<MemberCriteria>,
}

impl Query {
    fn missing(&self, resolved: &Resolved) -> Vec<&'static str> {
        self.params
            .iter()
            .filter(|param| !resolved.has(**param))
            .map(Param::name)
            .collect()
    }
}

fn name_and_dob(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::name_and_dob(
        r.text(Param::FirstName),
        r.text(Param::LastName),
        r.date(Param::DateOfBirth)?,
    ))
}

fn employee_name_and_dob(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::name_and_dob(
        r.text(Param::EmployeeFirstName),
        r.text(Param::EmployeeLastName),
        r.date(Param::DateOfBirth)?,
    ))
}

fn dob_and_email(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::dob_and_email(
        r.date(Param::DateOfBirth)?,
        r.text(Param::Email),
    ))
}

fn dependent_dob_and_email(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::dob_and_email(
        r.date(Param::DependentDateOfBirth)?,
        r.text(Param::Email),
    ))
}

fn dob_name_and_work_state(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::secondary(
        r.date(Param::DateOfBirth)?,
        r.text(Param::FirstName),
        r.text(Param::LastName),
        Some(r.text(Param::WorkState)),
    ))
}

fn email_and_name(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::email_and_name(
        r.text(Param::Email),
        r.text(Param::FirstName),
        r.text(Param::LastName),
    ))
}

fn email_and_employee_name(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::email_and_name(
        r.text(Param::Email),
        r.text(Param::EmployeeFirstName),
        r.text(Param::EmployeeLastName),
    ))
}

fn name_and_unique_corp_id(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::name_and_unique_corp_id(
        r.text(Param::FirstName),
        r.text(Param::LastName),
        r.text(Param::UniqueCorpId),
    ))
}

fn employee_name_and_unique_corp_id(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::name_and_unique_corp_id(
        r.text(Param::EmployeeFirstName),
        r.text(Param::EmployeeLastName),
        r.text(Param::UniqueCorpId),
    ))
}

fn dob_and_unique_corp_id(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::dob_and_unique_corp_id(
        r.date(Param::DateOfBirth)?,
        r.text(Param::UniqueCorpId),
    ))
}

fn dependent_dob_and_unique_corp_id(r: &Resolved) -> Option<MemberCriteria> {
    Some(MemberCriteria::dob_and_unique_corp_id(
        r.date(Param::DependentDateOfBirth)?,
        r.text(Param::UniqueCorpId),
    ))
}

const NAME_AND_DOB: Query = Query {
    name: "name_and_date_of_birth",
    params: &[Param::DateOfBirth, Param::FirstName, Param::LastName],
    criteria: name_and_dob,
};

const EMPLOYEE_NAME_AND_DOB: Query = Query {
    name: "employee_name_and_date_of_birth",
    params: &[
        Param::DateOfBirth,
        Param::EmployeeFirstName,
        Param::EmployeeLastName,
    ],
    criteria: employee_name_and_dob,
};

const BASIC_QUERIES: &[Query] = &[NAME_AND_DOB];

const EMPLOYER_QUERIES: &[Query] = &[
    Query {
        name: "dob_and_email",
        params: &[Param::DateOfBirth, Param::Email],
        criteria: dob_and_email,
    },
    Query {
        name: "dependent_dob_and_email",
        params: &[Param::DependentDateOfBirth, Param::Email],
        criteria: dependent_dob_and_email,
    },
    Query {
        name: "dob_name_and_work_state",
        params: &[
            Param::DateOfBirth,
            Param::FirstName,
            Param::LastName,
            Param::WorkState,
        ],
        criteria: dob_name_and_work_state,
    },
    Query {
        name: "email_and_name",
        params: &[Param::Email, Param::FirstName, Param::LastName],
        criteria: email_and_name,
    },
    Query {
        name: "email_and_employee_name",
        params: &[
            Param::Email,
            Param::EmployeeFirstName,
            Param::EmployeeLastName,
        ],
        criteria: email_and_employee_name,
    },
    NAME_AND_DOB,
];

const HEALTH_PLAN_QUERIES: &[Query] = &[
    Query {
        name: "name_and_unique_corp_id",
        params: &[Param::FirstName, Param::LastName, Param::UniqueCorpId],
        criteria: name_and_unique_corp_id,
    },
    Query {
        name: "employee_name_and_unique_corp_id",
        params: &[
            Param::EmployeeFirstName,
            Param::EmployeeLastName,
            Param::UniqueCorpId,
        ],
        criteria: employee_name_and_unique_corp_id,
    },
    Query {
        name: "date_of_birth_and_unique_corp_id",
        params: &[Param::DateOfBirth, Param::UniqueCorpId],
        criteria: dob_and_unique_corp_id,
    },
    Query {
        name: "dependent_date_of_birth_and_unique_corp_id",
        params: &[Param::DependentDateOfBirth, Param::UniqueCorpId],
        criteria: dependent_dob_and_unique_corp_id,
    },
    NAME_AND_DOB,
    EMPLOYEE_NAME_AND_DOB,
];

fn queries_for(method: EligibilityMethod) -> &'static [Query] {
    match method {
        EligibilityMethod::Employer => EMPLOYER_QUERIES,
        EligibilityMethod::HealthPlan => HEALTH_PLAN_QUERIES,
        _ => BASIC_QUERIES,
    }
}

/// v2 rows stand in for v1 rows only when they describe the same person.
fn same_person(v1: &Member, v2: &Member) -> bool {
    v1.organization_id == v2.organization_id
        && v1.unique_corp_id == v2.unique_corp_id
        && v1.dependent_id == v2.dependent_id
        && v1.first_name.trim().eq_ignore_ascii_case(v2.first_name.trim())
        && v1.last_name.trim().eq_ignore_ascii_case(v2.last_name.trim())
        && v1.date_of_birth == v2.date_of_birth
}

struct QueryHit {
    query: &'static Query,
    criteria: MemberCriteria,
    members: Vec<Member>,
}

impl EligibilityService {
    pub async fn check_basic(&self, params: &QueryParams) -> EligibilityResult<Vec<MatchedMember>> {
        let method = EligibilityMethod::Basic;
        let now = Utc::now();
        let hit = self.run_queries(method, params, now).await?;
        let organizations = self.organizations_of(&hit.members).await?;
        let members = selection::one_per_active_organization(hit.members, &organizations, now);
        if members.is_empty() {
            return Err(EligibilityError::inactive_organization(method));
        }

        let mut matched = Vec::with_capacity(members.len());
        for member in members {
            matched.push(self.query_v2(method, hit.query, &hit.criteria, member, now).await?);
        }
        Ok(matched)
    }

    pub async fn check_employer(&self, params: &QueryParams) -> EligibilityResult<MatchedMember> {
        self.check_single(EligibilityMethod::Employer, params).await
    }

    pub async fn check_healthplan(&self, params: &QueryParams) -> EligibilityResult<MatchedMember> {
        self.check_single(EligibilityMethod::HealthPlan, params).await
    }

    async fn check_single(
        &self,
        method: EligibilityMethod,
        params: &QueryParams,
    ) -> EligibilityResult<MatchedMember> {
        let now = Utc::now();
        let hit = self.run_queries(method, params, now).await?;
        let member = self.select_one(method, hit.members, now).await?;
        self.query_v2(method, hit.query, &hit.criteria, member, now).await
    }

    async fn run_queries(
        &self,
        method: EligibilityMethod,
        params: &QueryParams,
        now: DateTime<Utc>,
    ) -> EligibilityResult<QueryHit> {
        let today = now.date_naive();
        let resolved = Resolved::from_params(params, today);
        let queries = queries_for(method);

        let mut ran_any = false;
        for query in queries {
            if !query.missing(&resolved).is_empty() {
                continue;
            }
            let Some(criteria) = (query.criteria)(&resolved) else {
                continue;
            };
            ran_any = true;
            let members = self
                .store
                .find_members(MemberSource::Versioned, &criteria, today)
                .await?;
            if !members.is_empty() {
                info!(
                    method = %method,
                    query = query.name,
                    user_id = ?params.user_id,
                    found = members.len(),
                    "eligibility query matched"
                );
                return Ok(QueryHit {
                    query,
                    criteria,
                    members,
                });
            }
        }

        if !ran_any {
            let (first, rest) = match queries.split_first() {
                Some(split) => split,
                None => return Err(EligibilityError::not_found(method)),
            };
            let mut missing = first.missing(&resolved);
            let mut message = format!(
                "Query '{}' missing parameters: {}",
                first.name,
                missing.join(", ")
            );
            for query in rest {
                let query_missing = query.missing(&resolved);
                message.push_str(&format!(
                    "; Query '{}' missing parameters: {}",
                    query.name,
                    query_missing.join(", ")
                ));
                missing.extend(query_missing);
            }
            missing.sort_unstable();
            missing.dedup();
            return Err(EligibilityError::validation(Some(method), message, &missing));
        }

        Err(EligibilityError::MemberSearch {
            method,
            message: MATCH_NOT_FOUND.to_string(),
        })
    }

    async fn query_v2(
        &self,
        method: EligibilityMethod,
        query: &Query,
        criteria: &MemberCriteria,
        member: Member,
        now: DateTime<Utc>,
    ) -> EligibilityResult<MatchedMember> {
        if !self.v2_write_enabled(member.organization_id) {
            return Ok(MatchedMember::v1(member));
        }

        let scoped = criteria.clone().in_organization(member.organization_id);
        let candidates = self
            .store
            .find_members(MemberSource::V2, &scoped, now.date_naive())
            .await?;
        match candidates.into_iter().find(|candidate| same_person(&member, candidate)) {
            Some(member_2) => Ok(MatchedMember {
                member_1_id: Some(member.id),
                member_2_id: Some(member_2.id),
                is_v2: true,
                member: member_2,
            }),
            None => {
                warn!(
                    method = %method,
                    query = query.name,
                    member_id = member.id,
                    "v2 query did not agree with v1, using v1 result"
                );
                Ok(MatchedMember::v1(member))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dob, fixture, new_member, organization};
    use super::*;
    use crate::flags::E9Y_2_WRITE;

    #[tokio::test]
    async fn basic_check_requires_name_and_dob() {
        let fx = fixture();
        let err = fx
            .service
            .check_basic(&QueryParams {
                first_name: Some("Jane".into()),
                date_of_birth: Some("garbage".into()),
                ..QueryParams::default()
            })
            .await
            .unwrap_err();
        match err {
            EligibilityError::Validation { message, fields, .. } => {
                assert_eq!(
                    message,
                    "Query 'name_and_date_of_birth' missing parameters: date_of_birth, last_name"
                );
                assert_eq!(fields, vec!["date_of_birth", "last_name"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn basic_check_returns_one_member_per_org() {
        let fx = fixture();
        fx.org(organization(1)).await;
        fx.org(organization(2)).await;
        fx.member(MemberSource::Versioned, new_member(1, "a", "")).await;
        fx.member(MemberSource::Versioned, new_member(2, "b", "")).await;

        let matched = fx
            .service
            .check_basic(&QueryParams {
                first_name: Some("jane".into()),
                last_name: Some("DOE".into()),
                date_of_birth: Some(dob().to_string()),
                ..QueryParams::default()
            })
            .await
            .unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[tokio::test]
    async fn employer_check_uses_first_query_with_results() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let saved = fx
            .member(MemberSource::Versioned, new_member(1, "a", "jane@acme.com"))
            .await;

        let matched = fx
            .service
            .check_employer(&QueryParams {
                email: Some("jane@acme.com".into()),
                first_name: Some("Jane".into()),
                last_name: Some("Doe".into()),
                ..QueryParams::default()
            })
            .await
            .unwrap();
        assert_eq!(matched.member.id, saved.id);
    }

    #[tokio::test]
    async fn employer_check_reports_member_search_error() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let err = fx
            .service
            .check_employer(&QueryParams {
                email: Some("nobody@acme.com".into()),
                date_of_birth: Some(dob().to_string()),
                ..QueryParams::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EligibilityError::MemberSearch { .. }));
    }

    #[tokio::test]
    async fn healthplan_check_prefers_matching_v2_row() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let v1 = fx.member(MemberSource::Versioned, new_member(1, "sub-1", "")).await;
        let v2 = fx.member(MemberSource::V2, new_member(1, "sub-1", "")).await;
        fx.flags.set_orgs(E9Y_2_WRITE, &[1]);

        let matched = fx
            .service
            .check_healthplan(&QueryParams {
                unique_corp_id: Some("SUB-1".into()),
                date_of_birth: Some(dob().to_string()),
                ..QueryParams::default()
            })
            .await
            .unwrap();
        assert!(matched.is_v2);
        assert_eq!(matched.member_1_id, Some(v1.id));
        assert_eq!(matched.member_2_id, Some(v2.id));
    }

    #[tokio::test]
    async fn disagreeing_v2_row_falls_back_to_v1() {
        let fx = fixture();
        fx.org(organization(1)).await;
        let v1 = fx.member(MemberSource::Versioned, new_member(1, "sub-1", "")).await;
        let mut other = new_member(1, "sub-1", "");
        other.first_name = "Janet".into();
        fx.member(MemberSource::V2, other).await;
        fx.flags.set_orgs(E9Y_2_WRITE, &[1]);

        let matched = fx
            .service
            .check_healthplan(&QueryParams {
                unique_corp_id: Some("sub-1".into()),
                date_of_birth: Some(dob().to_string()),
                ..QueryParams::default()
            })
            .await
            .unwrap();
        assert!(!matched.is_v2);
        assert_eq!(matched.member.id, v1.id);
    }
}
