//! Pre-verification: links freshly ingested member versions to verifications
//! users already completed against earlier versions of the same person.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::domain::{Member, NewMemberVerification, Verification, VerificationType};
use crate::store::{RecordStore, StoreResult};

pub const MAX_CONCURRENT_ORGS: usize = 10;

const LINKABLE_TYPES: [VerificationType; 3] = [
    VerificationType::Primary,
    VerificationType::Alternate,
    VerificationType::Multistep,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreVerifyStats {
    pub batches: usize,
    pub members_linked: usize,
    pub links_created: usize,
}

impl PreVerifyStats {
    fn absorb(&mut self, other: PreVerifyStats) {
        self.batches += other.batches;
        self.members_linked += other.members_linked;
        self.links_created += other.links_created;
    }
}

fn same_text(captured: Option<&str>, current: &str) -> bool {
    captured.map_or(false, |captured| {
        let captured = captured.trim();
        !captured.is_empty() && captured.eq_ignore_ascii_case(current.trim())
    })
}

/// Optional fields only constrain the match when the verification captured them.
fn same_if_captured(captured: Option<&str>, current: Option<&str>) -> bool {
    match captured.map(str::trim).filter(|value| !value.is_empty()) {
        None => true,
        Some(captured) => current.map_or(false, |current| captured.eq_ignore_ascii_case(current.trim())),
    }
}

fn same_dob(captured: Option<NaiveDate>, current: NaiveDate) -> bool {
    captured == Some(current)
}

/// Whether the verification's captured identity still describes the member.
pub fn still_matches(verification: &Verification, member: &Member) -> bool {
    let identity = &verification.identity;
    if !same_dob(identity.date_of_birth, member.date_of_birth) {
        return false;
    }
    match verification.verification_type {
        VerificationType::Primary => same_text(identity.email.as_deref(), &member.email),
        VerificationType::Alternate | VerificationType::Multistep => {
            same_text(identity.first_name.as_deref(), &member.first_name)
                && same_text(identity.last_name.as_deref(), &member.last_name)
                && same_if_captured(identity.work_state.as_deref(), member.work_state.as_deref())
                && same_if_captured(
                    identity.unique_corp_id.as_deref(),
                    Some(member.unique_corp_id.as_str()),
                )
        }
        _ => false,
    }
}

/// Runs batches for one organization until no unlinked member remains.
pub async fn pre_verify_org(
    store: &dyn RecordStore,
    organization_id: i64,
    file_id: Option<i64>,
    batch_size: i64,
    now: DateTime<Utc>,
) -> StoreResult<PreVerifyStats> {
    let today = now.date_naive();
    let verifications = store
        .active_verifications_for_org(organization_id, &LINKABLE_TYPES, now)
        .await?;
    let mut stats = PreVerifyStats::default();
    if verifications.is_empty() {
        info!(organization_id, ?file_id, "no active verifications to pre-verify against");
        return Ok(stats);
    }

    let mut after_id = 0;
    loop {
        let members = store
            .members_for_pre_verification(organization_id, file_id, after_id, batch_size, today)
            .await?;
        let Some(last) = members.last() else {
            break;
        };
        after_id = last.id;
        stats.batches += 1;

        let mut links = Vec::new();
        let mut linked_members = Vec::new();
        for member in &members {
            let before = links.len();
            links.extend(
                verifications
                    .iter()
                    .filter(|verification| still_matches(verification, member))
                    .map(|verification| NewMemberVerification {
                        member_id: member.id,
                        verification_id: verification.id,
                        verification_attempt_id: None,
                    }),
            );
            if links.len() > before {
                linked_members.push(member.id);
            }
        }

        if !links.is_empty() {
            stats.links_created += store.link_pre_verified(links, &linked_members).await?;
            stats.members_linked += linked_members.len();
        }
        if (members.len() as i64) < batch_size {
            break;
        }
    }

    info!(
        organization_id,
        ?file_id,
        batches = stats.batches,
        members_linked = stats.members_linked,
        links_created = stats.links_created,
        "pre-verification completed for org"
    );
    Ok(stats)
}

/// Every organization, at most [`MAX_CONCURRENT_ORGS`] at a time. Failures are
/// logged per organization and do not stop the others.
pub async fn pre_verify_all(store: Arc<dyn RecordStore>, batch_size: i64) -> StoreResult<PreVerifyStats> {
    let organizations = store.all_organizations().await?;
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_ORGS));
    let now = Utc::now();

    let runs = organizations.into_iter().map(|organization| {
        let store = store.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.ok()?;
            match pre_verify_org(store.as_ref(), organization.id, None, batch_size, now).await {
                Ok(stats) => Some(stats),
                Err(err) => {
                    warn!(organization_id = organization.id, error = %err, "pre-verification failed for org");
                    None
                }
            }
        }
    });

    let mut total = PreVerifyStats::default();
    for stats in join_all(runs).await.into_iter().flatten() {
        total.absorb(stats);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::domain::{
        DateRange, EligibilityType, IdentitySnapshot, NewMember, Organization, VerificationBundle,
        VerificationDraft,
    };
    use crate::store::{MemberSource, MemoryStore};

    fn dob() -> NaiveDate {
        NaiveDate::from_ymd_opt(1985, 6, 2).unwrap()
    }

    fn row(corp: &str, email: &str, hash: &str) -> NewMember {
        NewMember {
            organization_id: 1,
            file_id: Some(2),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: dob(),
            email: email.into(),
            unique_corp_id: corp.into(),
            dependent_id: String::new(),
            work_state: Some("NY".into()),
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::unbounded(),
            record: json!({}),
            custom_attributes: json!({}),
            hash_value: Some(hash.into()),
            hash_version: Some(2),
        }
    }

    fn draft(verification_type: VerificationType, identity: IdentitySnapshot) -> VerificationDraft {
        VerificationDraft {
            user_id: 9,
            organization_id: 1,
            verification_type,
            identity,
            additional_fields: json!({}),
            verified_at: Utc::now() - Duration::days(1),
            verification_session: None,
            member_id: None,
            write_v2: false,
            member_2: None,
            policy_used: None,
        }
    }

    fn member_from(new: NewMember) -> Member {
        Member {
            id: 1,
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
            gender_code: new.gender_code,
            do_not_contact: new.do_not_contact,
            employer_assigned_id: new.employer_assigned_id,
            effective_range: new.effective_range,
            record: new.record,
            custom_attributes: new.custom_attributes,
            hash_value: new.hash_value,
            hash_version: new.hash_version,
            pre_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn verification(verification_type: VerificationType, identity: IdentitySnapshot) -> Verification {
        Verification {
            id: 1,
            user_id: 9,
            organization_id: 1,
            verification_type,
            identity,
            additional_fields: json!({}),
            verified_at: Some(Utc::now()),
            deactivated_at: None,
            verification_session: None,
            verification_2_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn store_with_org() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .persist_organization(Organization {
                id: 1,
                name: "Org".into(),
                directory_name: "org".into(),
                data_provider: false,
                activated_at: Some(Utc::now() - Duration::days(10)),
                terminated_at: None,
                employee_only: false,
                medical_plan_only: false,
                eligibility_type: EligibilityType::Standard,
                client_specific_implementation: None,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn alternate_rules_honor_captured_fields_only() {
        let member = member_from(row("c1", "jane@acme.com", "h"));
        let mut verification = verification(
            VerificationType::Alternate,
            IdentitySnapshot {
                first_name: Some(" JANE ".into()),
                last_name: Some("doe".into()),
                date_of_birth: Some(dob()),
                ..IdentitySnapshot::default()
            },
        );
        assert!(still_matches(&verification, &member));

        verification.identity.work_state = Some("CA".into());
        assert!(!still_matches(&verification, &member));

        verification.identity.work_state = Some("ny".into());
        verification.identity.unique_corp_id = Some("c1".into());
        assert!(still_matches(&verification, &member));

        verification.identity.date_of_birth = None;
        assert!(!still_matches(&verification, &member));
    }

    #[test]
    fn primary_rules_need_a_matching_email() {
        let member = member_from(row("c1", "Jane@Acme.com ", "h"));
        let mut verification = verification(
            VerificationType::Primary,
            IdentitySnapshot {
                email: Some("jane@acme.com".into()),
                date_of_birth: Some(dob()),
                ..IdentitySnapshot::default()
            },
        );
        assert!(still_matches(&verification, &member));
        verification.identity.email = None;
        assert!(!still_matches(&verification, &member));
    }

    #[tokio::test]
    async fn links_matching_members_once() {
        let store = store_with_org().await;
        store
            .create_verifications(VerificationBundle {
                drafts: vec![draft(
                    VerificationType::Primary,
                    IdentitySnapshot {
                        email: Some("jane@acme.com".into()),
                        date_of_birth: Some(dob()),
                        ..IdentitySnapshot::default()
                    },
                )],
            })
            .await
            .unwrap();
        store
            .persist_members(
                MemberSource::Versioned,
                vec![
                    row("c1", "jane@acme.com", "h1"),
                    row("c2", "other@acme.com", "h2"),
                    row("c3", "jane@acme.com", "h3"),
                ],
            )
            .await
            .unwrap();

        let first = pre_verify_org(store.as_ref(), 1, None, 2, Utc::now()).await.unwrap();
        assert_eq!(first.batches, 2);
        assert_eq!(first.members_linked, 2);
        assert_eq!(first.links_created, 2);

        let second = pre_verify_org(store.as_ref(), 1, None, 2, Utc::now()).await.unwrap();
        assert_eq!(second.links_created, 0);
        assert_eq!(second.members_linked, 0);
    }
}
