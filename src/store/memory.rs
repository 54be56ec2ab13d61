//! In-process `RecordStore` over plain tables behind one async mutex.
//!
//! Used by the dry-run harness as its write sink and by tests that do not need
//! Postgres. Every operation holds the lock for its whole duration, so
//! multi-row writes are atomic like their Postgres transactions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::{
    last_wins_by_key, latest_per_identity, latest_valid_per_identity, MemberCriteria,
    MemberSource, RecordStore, StoreError, StoreResult,
};
use crate::domain::{
    Address, CreatedVerification, ExternalIdMapping, File, FileCompletion, HeaderAlias,
    LinkedVerification, Member, MemberVerification, NewAddress, NewExternalIdMapping, NewFile,
    NewHeaderAlias, NewMember, NewMemberVerification, NewParseError, NewPopulation,
    NewSubPopulation, NewVerificationAttempt, OrgIdentity, Organization, ParseErrorRecord,
    Population, SubPopulation, Verification, Verification2, VerificationAttempt,
    VerificationBundle, VerificationType,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    organizations: HashMap<i64, Organization>,
    external_ids: Vec<ExternalIdMapping>,
    header_aliases: Vec<HeaderAlias>,
    files: HashMap<i64, File>,
    parse_errors: Vec<ParseErrorRecord>,
    members: HashMap<i64, Member>,
    members_2: HashMap<i64, Member>,
    historical: Vec<(Member, DateTime<Utc>)>,
    addresses: HashMap<i64, Address>,
    verifications: HashMap<i64, Verification>,
    verifications_2: HashMap<i64, Verification2>,
    attempts: HashMap<i64, VerificationAttempt>,
    member_verifications: Vec<MemberVerification>,
    populations: HashMap<i64, Population>,
    sub_populations: HashMap<i64, SubPopulation>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn members(&self, source: MemberSource) -> &HashMap<i64, Member> {
        match source {
            MemberSource::Versioned => &self.members,
            MemberSource::V2 => &self.members_2,
        }
    }

    fn is_linked(&self, member_id: i64) -> bool {
        self.member_verifications
            .iter()
            .any(|link| link.member_id == member_id)
    }

    fn insert_link(
        &mut self,
        link: NewMemberVerification,
        now: DateTime<Utc>,
    ) -> Option<MemberVerification> {
        let exists = self.member_verifications.iter().any(|existing| {
            existing.member_id == link.member_id && existing.verification_id == link.verification_id
        });
        if exists {
            return None;
        }
        let row = MemberVerification {
            id: self.id(),
            member_id: link.member_id,
            verification_id: link.verification_id,
            verification_attempt_id: link.verification_attempt_id,
            created_at: now,
        };
        self.member_verifications.push(row.clone());
        Some(row)
    }
}

fn new_member_row(
    id: i64,
    version: i32,
    is_v2: bool,
    member: NewMember,
    now: DateTime<Utc>,
) -> Member {
    Member {
        id,
        version,
        is_v2,
        organization_id: member.organization_id,
        file_id: member.file_id,
        first_name: member.first_name,
        last_name: member.last_name,
        date_of_birth: member.date_of_birth,
        email: member.email,
        unique_corp_id: member.unique_corp_id,
        dependent_id: member.dependent_id,
        work_state: member.work_state,
        work_country: member.work_country,
        gender_code: member.gender_code,
        do_not_contact: member.do_not_contact,
        employer_assigned_id: member.employer_assigned_id,
        effective_range: member.effective_range,
        record: member.record,
        custom_attributes: member.custom_attributes,
        hash_value: member.hash_value,
        hash_version: member.hash_version,
        pre_verified: false,
        created_at: now,
        updated_at: now,
    }
}

/// Overwrites the mutable columns of an existing row.
fn apply_update(existing: &mut Member, member: NewMember, now: DateTime<Utc>) {
    existing.file_id = member.file_id;
    existing.first_name = member.first_name;
    existing.last_name = member.last_name;
    existing.date_of_birth = member.date_of_birth;
    existing.email = member.email;
    existing.work_state = member.work_state;
    existing.work_country = member.work_country;
    existing.gender_code = member.gender_code;
    existing.do_not_contact = member.do_not_contact;
    existing.employer_assigned_id = member.employer_assigned_id;
    existing.effective_range = member.effective_range;
    existing.record = member.record;
    existing.custom_attributes = member.custom_attributes;
    existing.hash_value = member.hash_value;
    existing.hash_version = member.hash_version;
    existing.updated_at = now;
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows per member table; used by reports and assertions.
    pub async fn member_count(&self, source: MemberSource) -> usize {
        self.tables.lock().await.members(source).len()
    }

    pub async fn historical_count(&self) -> usize {
        self.tables.lock().await.historical.len()
    }

    pub async fn attempts_for_user(&self, user_id: i64) -> Vec<VerificationAttempt> {
        let tables = self.tables.lock().await;
        let mut attempts: Vec<VerificationAttempt> = tables
            .attempts
            .values()
            .filter(|attempt| attempt.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|attempt| attempt.id);
        attempts
    }

    pub async fn verification_2_rows(&self) -> Vec<Verification2> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Verification2> = tables.verifications_2.values().cloned().collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_organization(&self, organization_id: i64) -> StoreResult<Option<Organization>> {
        Ok(self
            .tables
            .lock()
            .await
            .organizations
            .get(&organization_id)
            .cloned())
    }

    async fn get_organizations(&self, organization_ids: &[i64]) -> StoreResult<Vec<Organization>> {
        let tables = self.tables.lock().await;
        Ok(organization_ids
            .iter()
            .filter_map(|id| tables.organizations.get(id).cloned())
            .collect())
    }

    async fn all_organizations(&self) -> StoreResult<Vec<Organization>> {
        let tables = self.tables.lock().await;
        let mut organizations: Vec<Organization> = tables.organizations.values().cloned().collect();
        organizations.sort_by_key(|org| org.id);
        Ok(organizations)
    }

    async fn persist_organization(&self, organization: Organization) -> StoreResult<Organization> {
        let mut tables = self.tables.lock().await;
        tables
            .organizations
            .insert(organization.id, organization.clone());
        Ok(organization)
    }

    async fn external_id_mappings(
        &self,
        data_provider_organization_id: i64,
    ) -> StoreResult<Vec<ExternalIdMapping>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .external_ids
            .iter()
            .filter(|mapping| {
                mapping.data_provider_organization_id == Some(data_provider_organization_id)
            })
            .cloned()
            .collect())
    }

    async fn external_ids_by_value(
        &self,
        external_ids: &[String],
    ) -> StoreResult<Vec<ExternalIdMapping>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .external_ids
            .iter()
            .filter(|mapping| external_ids.contains(&mapping.external_id))
            .cloned()
            .collect())
    }

    async fn persist_external_id(
        &self,
        mapping: NewExternalIdMapping,
    ) -> StoreResult<ExternalIdMapping> {
        let mut tables = self.tables.lock().await;
        let row = ExternalIdMapping {
            id: tables.id(),
            source: mapping.source,
            external_id: mapping.external_id,
            data_provider_organization_id: mapping.data_provider_organization_id,
            organization_id: mapping.organization_id,
        };
        tables.external_ids.push(row.clone());
        Ok(row)
    }

    async fn header_aliases(&self, organization_id: i64) -> StoreResult<Vec<HeaderAlias>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .header_aliases
            .iter()
            .filter(|alias| alias.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn persist_header_alias(&self, alias: NewHeaderAlias) -> StoreResult<HeaderAlias> {
        let mut tables = self.tables.lock().await;
        let row = HeaderAlias {
            id: tables.id(),
            organization_id: alias.organization_id,
            header: alias.header,
            alias: alias.alias,
        };
        tables.header_aliases.push(row.clone());
        Ok(row)
    }

    async fn persist_file(&self, file: NewFile) -> StoreResult<File> {
        let mut tables = self.tables.lock().await;
        let row = File {
            id: tables.id(),
            organization_id: file.organization_id,
            name: file.name,
            encoding: file.encoding,
            error: None,
            raw_count: None,
            success_count: None,
            failure_count: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        tables.files.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_file(&self, file_id: i64) -> StoreResult<Option<File>> {
        Ok(self.tables.lock().await.files.get(&file_id).cloned())
    }

    async fn mark_file_started(
        &self,
        file_id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<File>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.files.get_mut(&file_id).map(|file| {
            file.started_at = Some(at);
            file.clone()
        }))
    }

    async fn complete_file(
        &self,
        file_id: i64,
        completion: FileCompletion,
    ) -> StoreResult<Option<File>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.files.get_mut(&file_id).map(|file| {
            if let Some(encoding) = completion.encoding {
                file.encoding = encoding;
            }
            file.raw_count = Some(completion.raw_count);
            file.success_count = Some(completion.success_count);
            file.failure_count = Some(completion.failure_count);
            file.error = completion.error;
            file.completed_at = completion.completed_at;
            file.clone()
        }))
    }

    async fn persist_parse_errors(&self, errors: Vec<NewParseError>) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let count = errors.len();
        let now = Utc::now();
        for error in errors {
            let row = ParseErrorRecord {
                id: tables.id(),
                file_id: error.file_id,
                organization_id: error.organization_id,
                record: error.record,
                errors: error.errors,
                warnings: error.warnings,
                created_at: now,
            };
            tables.parse_errors.push(row);
        }
        Ok(count)
    }

    async fn parse_errors_for_file(&self, file_id: i64) -> StoreResult<Vec<ParseErrorRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .parse_errors
            .iter()
            .filter(|row| row.file_id == Some(file_id))
            .cloned()
            .collect())
    }

    async fn persist_members(
        &self,
        source: MemberSource,
        members: Vec<NewMember>,
    ) -> StoreResult<Vec<Member>> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut written = Vec::with_capacity(members.len());

        match source {
            MemberSource::Versioned => {
                let members = last_wins_by_key(members, |member| {
                    (
                        member.org_identity(),
                        member.hash_value.clone().unwrap_or_default(),
                        member.hash_value.is_none().then(|| member.record.to_string()),
                    )
                });
                for member in members {
                    let existing = member.hash_value.as_ref().and_then(|hash| {
                        tables
                            .members
                            .values()
                            .find(|row| {
                                row.org_identity() == member.org_identity()
                                    && row.hash_value.as_ref() == Some(hash)
                            })
                            .map(|row| row.id)
                    });
                    match existing {
                        Some(id) => {
                            if let Some(row) = tables.members.get_mut(&id) {
                                apply_update(row, member, now);
                                written.push(row.clone());
                            }
                        }
                        None => {
                            let id = tables.id();
                            let row = new_member_row(id, 0, false, member, now);
                            tables.members.insert(id, row.clone());
                            written.push(row);
                        }
                    }
                }
            }
            MemberSource::V2 => {
                let members = last_wins_by_key(members, NewMember::org_identity);
                for member in members {
                    let identity = member.org_identity();
                    let existing = tables
                        .members_2
                        .values()
                        .find(|row| row.org_identity() == identity)
                        .map(|row| row.id);
                    match existing {
                        Some(id) => {
                            if let Some(row) = tables.members_2.get_mut(&id) {
                                apply_update(row, member, now);
                                row.version += 1;
                                written.push(row.clone());
                            }
                        }
                        None => {
                            let id = tables.id();
                            let row = new_member_row(id, 1, true, member, now);
                            tables.members_2.insert(id, row.clone());
                            written.push(row);
                        }
                    }
                }
            }
        }

        Ok(written)
    }

    async fn persist_addresses(&self, addresses: Vec<NewAddress>) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let count = addresses.len();
        for address in addresses {
            let id = match tables.addresses.get(&address.member_id) {
                Some(existing) => existing.id,
                None => tables.id(),
            };
            tables.addresses.insert(
                address.member_id,
                Address {
                    id,
                    member_id: address.member_id,
                    fields: address.fields,
                },
            );
        }
        Ok(count)
    }

    async fn address_for_member(&self, member_id: i64) -> StoreResult<Option<Address>> {
        Ok(self.tables.lock().await.addresses.get(&member_id).cloned())
    }

    async fn get_member(
        &self,
        source: MemberSource,
        member_id: i64,
    ) -> StoreResult<Option<Member>> {
        Ok(self
            .tables
            .lock()
            .await
            .members(source)
            .get(&member_id)
            .cloned())
    }

    async fn find_members(
        &self,
        source: MemberSource,
        criteria: &MemberCriteria,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>> {
        if criteria.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.tables.lock().await;
        let candidates: Vec<Member> = tables
            .members(source)
            .values()
            .filter(|member| criteria.matches(member))
            .cloned()
            .collect();
        Ok(latest_valid_per_identity(candidates, today))
    }

    async fn by_org_identity(
        &self,
        source: MemberSource,
        identity: &OrgIdentity,
    ) -> StoreResult<Option<Member>> {
        let tables = self.tables.lock().await;
        let rows: Vec<Member> = tables
            .members(source)
            .values()
            .filter(|member| member.org_identity() == *identity)
            .cloned()
            .collect();
        Ok(latest_per_identity(rows).remove(identity))
    }

    async fn members_for_org(
        &self,
        source: MemberSource,
        organization_id: i64,
    ) -> StoreResult<Vec<Member>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Member> = tables
            .members(source)
            .values()
            .filter(|member| member.organization_id == organization_id)
            .cloned()
            .collect();
        rows.sort_by_key(|member| member.id);
        Ok(rows)
    }

    async fn unhashed_members(&self, organization_id: i64) -> StoreResult<Vec<Member>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Member> = tables
            .members
            .values()
            .filter(|member| member.organization_id == organization_id && member.hash_value.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|member| member.id);
        Ok(rows)
    }

    async fn delete_members(&self, member_ids: &[i64]) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut deleted = 0;
        for id in member_ids {
            if tables.members.remove(id).is_some() {
                deleted += 1;
            }
            tables.addresses.remove(id);
        }
        tables
            .member_verifications
            .retain(|link| !member_ids.contains(&link.member_id));
        Ok(deleted)
    }

    async fn update_hash_values(
        &self,
        organization_id: i64,
        hashes: Vec<(i64, String)>,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut taken: HashSet<String> = tables
            .members
            .values()
            .filter(|member| member.organization_id == organization_id)
            .filter_map(|member| member.hash_value.clone())
            .collect();
        let mut updated = 0;
        for (id, hash) in hashes {
            if taken.contains(&hash) {
                continue;
            }
            if let Some(member) = tables.members.get_mut(&id) {
                member.hash_value = Some(hash.clone());
                taken.insert(hash);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn move_to_historical(
        &self,
        member_ids: &[i64],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut moved = 0;
        for id in member_ids {
            if let Some(member) = tables.members.remove(id) {
                tables.addresses.remove(id);
                tables.historical.push((member, at));
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn linked_member_ids(&self, member_ids: &[i64]) -> StoreResult<HashSet<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .member_verifications
            .iter()
            .filter(|link| member_ids.contains(&link.member_id))
            .map(|link| link.member_id)
            .collect())
    }

    async fn other_user_ids_in_family(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock().await;
        let active: HashMap<i64, &Verification> = tables
            .verifications
            .values()
            .filter(|verification| verification.is_active(now))
            .map(|verification| (verification.id, verification))
            .collect();

        let member_key = |member_id: i64| {
            tables
                .members
                .get(&member_id)
                .map(|member| (member.organization_id, member.unique_corp_id.clone()))
        };

        let families: HashSet<(i64, String)> = tables
            .member_verifications
            .iter()
            .filter(|link| {
                active
                    .get(&link.verification_id)
                    .map_or(false, |verification| verification.user_id == user_id)
            })
            .filter_map(|link| member_key(link.member_id))
            .collect();

        let mut users: Vec<i64> = tables
            .member_verifications
            .iter()
            .filter_map(|link| {
                let verification = active.get(&link.verification_id)?;
                let key = member_key(link.member_id)?;
                (verification.user_id != user_id && families.contains(&key))
                    .then_some(verification.user_id)
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    async fn members_for_pre_verification(
        &self,
        organization_id: i64,
        file_id: Option<i64>,
        after_id: i64,
        limit: i64,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Member> = tables
            .members
            .values()
            .filter(|member| {
                member.organization_id == organization_id
                    && member.id > after_id
                    && file_id.map_or(true, |id| member.file_id == Some(id))
                    && !member.pre_verified
                    && member.is_valid_on(today)
                    && !tables.is_linked(member.id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|member| member.id);
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn active_verifications_for_org(
        &self,
        organization_id: i64,
        types: &[VerificationType],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Verification>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Verification> = tables
            .verifications
            .values()
            .filter(|verification| {
                verification.organization_id == organization_id
                    && types.contains(&verification.verification_type)
                    && verification.is_active(now)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|verification| verification.id);
        Ok(rows)
    }

    async fn link_pre_verified(
        &self,
        links: Vec<NewMemberVerification>,
        member_ids: &[i64],
    ) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut created = 0;
        for link in links {
            if tables.insert_link(link, now).is_some() {
                created += 1;
            }
        }
        for id in member_ids {
            if let Some(member) = tables.members.get_mut(id) {
                member.pre_verified = true;
            }
        }
        Ok(created)
    }

    async fn create_verifications(
        &self,
        bundle: VerificationBundle,
    ) -> StoreResult<Vec<CreatedVerification>> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut created = Vec::with_capacity(bundle.drafts.len());

        for draft in bundle.drafts {
            let verification_2 = if draft.write_v2 {
                let row = Verification2 {
                    id: tables.id(),
                    user_id: draft.user_id,
                    organization_id: draft.organization_id,
                    verification_type: draft.verification_type,
                    identity: draft.identity.clone(),
                    additional_fields: draft.additional_fields.clone(),
                    member_id: draft.member_2.map(|(id, _)| id),
                    member_version: draft.member_2.map(|(_, version)| version),
                    verified_at: Some(draft.verified_at),
                    deactivated_at: None,
                    verification_session: draft.verification_session,
                    created_at: now,
                };
                tables.verifications_2.insert(row.id, row.clone());
                Some(row)
            } else {
                None
            };

            let verification = Verification {
                id: tables.id(),
                user_id: draft.user_id,
                organization_id: draft.organization_id,
                verification_type: draft.verification_type,
                identity: draft.identity.clone(),
                additional_fields: draft.additional_fields.clone(),
                verified_at: Some(draft.verified_at),
                deactivated_at: None,
                verification_session: draft.verification_session,
                verification_2_id: verification_2.as_ref().map(|row| row.id),
                created_at: now,
                updated_at: now,
            };
            tables
                .verifications
                .insert(verification.id, verification.clone());

            let attempt = VerificationAttempt {
                id: tables.id(),
                user_id: draft.user_id,
                organization_id: Some(draft.organization_id),
                verification_type: draft.verification_type,
                identity: draft.identity,
                additional_fields: draft.additional_fields,
                successful_verification: true,
                verification_id: Some(verification.id),
                policy_used: draft.policy_used,
                verified_at: Some(draft.verified_at),
                created_at: now,
            };
            tables.attempts.insert(attempt.id, attempt.clone());

            let member_verification = match draft.member_id {
                Some(member_id) => tables.insert_link(
                    NewMemberVerification {
                        member_id,
                        verification_id: verification.id,
                        verification_attempt_id: Some(attempt.id),
                    },
                    now,
                ),
                None => None,
            };

            created.push(CreatedVerification {
                verification,
                verification_2,
                attempt,
                member_verification,
            });
        }

        Ok(created)
    }

    async fn create_failed_attempt(
        &self,
        attempt: NewVerificationAttempt,
    ) -> StoreResult<VerificationAttempt> {
        let mut tables = self.tables.lock().await;
        let row = VerificationAttempt {
            id: tables.id(),
            user_id: attempt.user_id,
            organization_id: attempt.organization_id,
            verification_type: attempt.verification_type,
            identity: attempt.identity,
            additional_fields: attempt.additional_fields,
            successful_verification: false,
            verification_id: None,
            policy_used: attempt.policy_used,
            verified_at: attempt.verified_at,
            created_at: Utc::now(),
        };
        tables.attempts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_verification(&self, verification_id: i64) -> StoreResult<Option<Verification>> {
        Ok(self
            .tables
            .lock()
            .await
            .verifications
            .get(&verification_id)
            .cloned())
    }

    async fn deactivate_verification(
        &self,
        verification_id: i64,
        at: DateTime<Utc>,
        require_v2: bool,
    ) -> StoreResult<Option<Verification>> {
        let mut tables = self.tables.lock().await;
        let Some(verification_2_id) = tables
            .verifications
            .get(&verification_id)
            .map(|verification| verification.verification_2_id)
        else {
            return Ok(None);
        };

        let has_v2 = verification_2_id.map_or(false, |id| tables.verifications_2.contains_key(&id));
        if require_v2 && !has_v2 {
            return Err(StoreError::Missing(format!(
                "verification_2 record not found for verification {verification_id}"
            )));
        }

        if let Some(v2) = verification_2_id.and_then(|id| tables.verifications_2.get_mut(&id)) {
            v2.deactivated_at = Some(at);
        }
        Ok(tables.verifications.get_mut(&verification_id).map(|verification| {
            verification.deactivated_at = Some(at);
            verification.updated_at = Utc::now();
            verification.clone()
        }))
    }

    async fn verifications_for_user(&self, user_id: i64) -> StoreResult<Vec<LinkedVerification>> {
        let tables = self.tables.lock().await;
        let mut linked: Vec<LinkedVerification> = tables
            .verifications
            .values()
            .filter(|verification| verification.user_id == user_id)
            .map(|verification| {
                let verification_2 = verification
                    .verification_2_id
                    .and_then(|id| tables.verifications_2.get(&id).cloned());
                let member = tables
                    .member_verifications
                    .iter()
                    .filter(|link| link.verification_id == verification.id)
                    .filter_map(|link| tables.members.get(&link.member_id))
                    .max_by_key(|member| (member.updated_at, member.id))
                    .cloned();
                let member_2 = verification_2
                    .as_ref()
                    .and_then(|v2| v2.member_id)
                    .and_then(|id| tables.members_2.get(&id).cloned());
                LinkedVerification {
                    verification: verification.clone(),
                    verification_2,
                    member,
                    member_2,
                }
            })
            .collect();
        linked.sort_by_key(|row| row.verification.id);
        Ok(linked)
    }

    async fn verification_links_for_member(
        &self,
        member_id: i64,
    ) -> StoreResult<Vec<MemberVerification>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .member_verifications
            .iter()
            .filter(|link| link.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn populations_for_org(&self, organization_id: i64) -> StoreResult<Vec<Population>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Population> = tables
            .populations
            .values()
            .filter(|population| population.organization_id == organization_id)
            .cloned()
            .collect();
        rows.sort_by_key(|population| population.id);
        Ok(rows)
    }

    async fn get_population(&self, population_id: i64) -> StoreResult<Option<Population>> {
        Ok(self
            .tables
            .lock()
            .await
            .populations
            .get(&population_id)
            .cloned())
    }

    async fn persist_population(&self, population: NewPopulation) -> StoreResult<Population> {
        let mut tables = self.tables.lock().await;
        let row = Population {
            id: tables.id(),
            organization_id: population.organization_id,
            activated_at: population.activated_at,
            deactivated_at: population.deactivated_at,
            sub_pop_lookup_keys_csv: population.sub_pop_lookup_keys_csv,
            sub_pop_lookup_map_json: population.sub_pop_lookup_map_json,
            advanced: population.advanced,
            created_at: Utc::now(),
        };
        tables.populations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn sub_populations(&self, population_id: i64) -> StoreResult<Vec<SubPopulation>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<SubPopulation> = tables
            .sub_populations
            .values()
            .filter(|sub| sub.population_id == population_id)
            .cloned()
            .collect();
        rows.sort_by_key(|sub| sub.id);
        Ok(rows)
    }

    async fn get_sub_population(
        &self,
        sub_population_id: i64,
    ) -> StoreResult<Option<SubPopulation>> {
        Ok(self
            .tables
            .lock()
            .await
            .sub_populations
            .get(&sub_population_id)
            .cloned())
    }

    async fn persist_sub_population(
        &self,
        sub_population: NewSubPopulation,
    ) -> StoreResult<SubPopulation> {
        let mut tables = self.tables.lock().await;
        let row = SubPopulation {
            id: tables.id(),
            population_id: sub_population.population_id,
            feature_set_name: sub_population.feature_set_name,
            feature_set_details_json: sub_population.feature_set_details_json,
        };
        tables.sub_populations.insert(row.id, row.clone());
        Ok(row)
    }
}
