//! Narrowing finder candidates down to the member (or members) a check returns.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::error;

use super::error::{EligibilityError, EligibilityMethod, EligibilityResult, MULTIPLE_ORGANIZATIONS};
use crate::domain::{Member, Organization};

/// Members whose organization is known and active at `now`.
pub fn in_active_organizations(
    candidates: Vec<Member>,
    organizations: &HashMap<i64, Organization>,
    now: DateTime<Utc>,
) -> Vec<Member> {
    candidates
        .into_iter()
        .filter(|member| {
            organizations
                .get(&member.organization_id)
                .map_or(false, |org| org.is_active(now))
        })
        .collect()
}

/// Exactly one member from exactly one active organization.
pub fn single_member(
    method: EligibilityMethod,
    candidates: Vec<Member>,
    organizations: &HashMap<i64, Organization>,
    now: DateTime<Utc>,
) -> EligibilityResult<Member> {
    if candidates.is_empty() {
        return Err(EligibilityError::not_found(method));
    }

    let active = in_active_organizations(candidates, organizations, now);
    if active.is_empty() {
        return Err(EligibilityError::inactive_organization(method));
    }

    let mut by_org: BTreeMap<i64, Vec<Member>> = BTreeMap::new();
    for member in active {
        by_org.entry(member.organization_id).or_default().push(member);
    }

    if by_org.len() > 1 {
        let organization_ids: Vec<i64> = by_org.keys().copied().collect();
        error!(
            method = %method,
            ?organization_ids,
            "multiple organization records found for user"
        );
        return Err(EligibilityError::MatchMultiple {
            method,
            message: MULTIPLE_ORGANIZATIONS.to_string(),
        });
    }

    let mut members = by_org.into_values().next().unwrap_or_default();
    match members.len() {
        0 => Err(EligibilityError::not_found(method)),
        1 => Ok(members.remove(0)),
        _ => Err(EligibilityError::multiple(method)),
    }
}

/// Newest member (by `updated_at`) of every active organization, ordered by organization.
pub fn one_per_active_organization(
    candidates: Vec<Member>,
    organizations: &HashMap<i64, Organization>,
    now: DateTime<Utc>,
) -> Vec<Member> {
    let mut newest: BTreeMap<i64, Member> = BTreeMap::new();
    for member in in_active_organizations(candidates, organizations, now) {
        match newest.get(&member.organization_id) {
            Some(current) if current.updated_at >= member.updated_at => {}
            _ => {
                newest.insert(member.organization_id, member);
            }
        }
    }
    newest.into_values().collect()
}

/// Over-eligibility candidate filter: a supplied email must agree with any email
/// on the row, and healthplan organizations narrow to rows carrying the supplied
/// corp id whenever at least one does.
pub fn overeligibility_candidates(
    candidates: Vec<Member>,
    email: Option<&str>,
    unique_corp_id: Option<&str>,
    organizations: &HashMap<i64, Organization>,
) -> Vec<Member> {
    let email = email
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty());
    let corp_id = unique_corp_id
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty());

    let filtered: Vec<Member> = candidates
        .into_iter()
        .filter(|member| match &email {
            Some(expected) => {
                let actual = member.email.trim().to_lowercase();
                actual.is_empty() || actual == *expected
            }
            None => true,
        })
        .collect();

    let Some(corp_id) = corp_id else {
        return filtered;
    };

    let mut by_org: BTreeMap<i64, Vec<Member>> = BTreeMap::new();
    for member in filtered {
        by_org.entry(member.organization_id).or_default().push(member);
    }

    by_org
        .into_iter()
        .flat_map(|(organization_id, members)| {
            let healthplan = organizations
                .get(&organization_id)
                .map_or(false, Organization::is_healthplan);
            let any_match = members
                .iter()
                .any(|member| member.unique_corp_id.trim().to_lowercase() == corp_id);
            if healthplan && any_match {
                members
                    .into_iter()
                    .filter(|member| member.unique_corp_id.trim().to_lowercase() == corp_id)
                    .collect::<Vec<_>>()
            } else {
                members
            }
        })
        .collect()
}
