//! Typed persistence for organizations, files, members, verifications and populations.
//!
//! `RecordStore` is implemented by [`postgres::PgStore`] (diesel) and by
//! [`memory::MemoryStore`] (tests and dry-runs). Finders never raise business
//! errors: missing data comes back as `None` or an empty list.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::domain::{
    Address, CreatedVerification, ExternalIdMapping, ExternalKey, File, FileCompletion,
    HeaderAlias, LinkedVerification, Member, MemberVerification, NewAddress,
    NewExternalIdMapping, NewFile, NewHeaderAlias, NewMember, NewMemberVerification,
    NewParseError, NewPopulation, NewSubPopulation, NewVerificationAttempt, OrgIdentity,
    Organization, ParseErrorRecord, Population, SubPopulation, Verification,
    VerificationAttempt, VerificationBundle, VerificationType,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("{0}")]
    Missing(String),
}

impl StoreError {
    /// Errors worth retrying later: the pool was exhausted or the connection dropped.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Pool(_) | StoreError::Task(_) => true,
            StoreError::Database(diesel::result::Error::DatabaseError(kind, _)) => matches!(
                kind,
                diesel::result::DatabaseErrorKind::ClosedConnection
                    | diesel::result::DatabaseErrorKind::SerializationFailure
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which member table a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberSource {
    /// `member_versioned`
    Versioned,
    /// `member_2`
    V2,
}

/// Finder criteria. Every populated field must match; strings compare
/// case-insensitively after trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberCriteria {
    pub organization_id: Option<i64>,
    pub date_of_birth: Option<NaiveDate>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub work_state: Option<String>,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
}

fn present(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl MemberCriteria {
    pub fn dob_and_email(date_of_birth: NaiveDate, email: &str) -> Self {
        Self {
            date_of_birth: Some(date_of_birth),
            email: present(email),
            ..Self::default()
        }
    }

    /// `work_state` that is missing or blank does not filter.
    pub fn secondary(
        date_of_birth: NaiveDate,
        first_name: &str,
        last_name: &str,
        work_state: Option<&str>,
    ) -> Self {
        Self {
            date_of_birth: Some(date_of_birth),
            first_name: present(first_name),
            last_name: present(last_name),
            work_state: work_state.and_then(present),
            ..Self::default()
        }
    }

    pub fn dob_and_unique_corp_id(date_of_birth: NaiveDate, unique_corp_id: &str) -> Self {
        Self {
            date_of_birth: Some(date_of_birth),
            unique_corp_id: present(unique_corp_id),
            ..Self::default()
        }
    }

    pub fn client_specific(
        organization_id: i64,
        unique_corp_id: &str,
        date_of_birth: NaiveDate,
    ) -> Self {
        Self {
            organization_id: Some(organization_id),
            date_of_birth: Some(date_of_birth),
            unique_corp_id: present(unique_corp_id),
            ..Self::default()
        }
    }

    pub fn overeligibility(date_of_birth: NaiveDate, first_name: &str, last_name: &str) -> Self {
        Self::secondary(date_of_birth, first_name, last_name, None)
    }

    pub fn email_and_name(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: present(email),
            first_name: present(first_name),
            last_name: present(last_name),
            ..Self::default()
        }
    }

    pub fn name_and_dob(first_name: &str, last_name: &str, date_of_birth: NaiveDate) -> Self {
        Self::secondary(date_of_birth, first_name, last_name, None)
    }

    pub fn name_and_unique_corp_id(
        first_name: &str,
        last_name: &str,
        unique_corp_id: &str,
    ) -> Self {
        Self {
            first_name: present(first_name),
            last_name: present(last_name),
            unique_corp_id: present(unique_corp_id),
            ..Self::default()
        }
    }

    pub fn in_organization(mut self, organization_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// A criteria with no populated field would match every member; finders refuse it.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, member: &Member) -> bool {
        fn same(expected: &Option<String>, actual: &str) -> bool {
            expected
                .as_ref()
                .map_or(true, |value| value.to_lowercase() == actual.trim().to_lowercase())
        }

        self.organization_id
            .map_or(true, |id| id == member.organization_id)
            && self
                .date_of_birth
                .map_or(true, |dob| dob == member.date_of_birth)
            && same(&self.email, &member.email)
            && same(&self.first_name, &member.first_name)
            && same(&self.last_name, &member.last_name)
            && same(&self.work_state, member.work_state.as_deref().unwrap_or(""))
            && same(&self.unique_corp_id, &member.unique_corp_id)
            && same(&self.dependent_id, &member.dependent_id)
    }
}

/// Keeps, for every org identity, only the newest version (by `updated_at`, then
/// `file_id`), and drops it when its effective range does not cover `today`.
pub fn latest_valid_per_identity(members: Vec<Member>, today: NaiveDate) -> Vec<Member> {
    let mut newest: BTreeMap<OrgIdentity, Member> = BTreeMap::new();
    for member in members {
        let identity = member.org_identity();
        match newest.get(&identity) {
            Some(current)
                if (current.updated_at, current.file_id, current.id)
                    >= (member.updated_at, member.file_id, member.id) => {}
            _ => {
                newest.insert(identity, member);
            }
        }
    }

    let mut current: Vec<Member> = newest
        .into_values()
        .filter(|member| member.is_valid_on(today))
        .collect();
    current.sort_by(|a, b| {
        a.organization_id
            .cmp(&b.organization_id)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });
    current
}

/// Newest version per identity without the validity filter.
pub fn latest_per_identity(members: Vec<Member>) -> HashMap<OrgIdentity, Member> {
    let mut newest: HashMap<OrgIdentity, Member> = HashMap::new();
    for member in members {
        let identity = member.org_identity();
        let replace = newest.get(&identity).map_or(true, |current| {
            (current.updated_at, current.file_id, current.id)
                < (member.updated_at, member.file_id, member.id)
        });
        if replace {
            newest.insert(identity, member);
        }
    }
    newest
}

/// Later rows win when a batch repeats a key; keeps first-seen order.
pub fn last_wins_by_key<K, T>(rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
where
    K: std::hash::Hash + Eq,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut unique: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        match positions.get(&key(&row)) {
            Some(&position) => unique[position] = row,
            None => {
                positions.insert(key(&row), unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    // organizations

    async fn get_organization(&self, organization_id: i64) -> StoreResult<Option<Organization>>;

    async fn get_organizations(&self, organization_ids: &[i64]) -> StoreResult<Vec<Organization>>;

    async fn all_organizations(&self) -> StoreResult<Vec<Organization>>;

    async fn data_provider_organizations(&self) -> StoreResult<Vec<Organization>> {
        Ok(self
            .all_organizations()
            .await?
            .into_iter()
            .filter(|org| org.data_provider)
            .collect())
    }

    async fn persist_organization(&self, organization: Organization) -> StoreResult<Organization>;

    /// Sub-organization mappings of one data provider.
    async fn external_id_mappings(
        &self,
        data_provider_organization_id: i64,
    ) -> StoreResult<Vec<ExternalIdMapping>>;

    /// Mappings whose `external_id` is one of `external_ids`, across all providers.
    async fn external_ids_by_value(
        &self,
        external_ids: &[String],
    ) -> StoreResult<Vec<ExternalIdMapping>>;

    async fn persist_external_id(
        &self,
        mapping: NewExternalIdMapping,
    ) -> StoreResult<ExternalIdMapping>;

    async fn header_aliases(&self, organization_id: i64) -> StoreResult<Vec<HeaderAlias>>;

    async fn persist_header_alias(&self, alias: NewHeaderAlias) -> StoreResult<HeaderAlias>;

    // files

    async fn persist_file(&self, file: NewFile) -> StoreResult<File>;

    async fn get_file(&self, file_id: i64) -> StoreResult<Option<File>>;

    async fn mark_file_started(&self, file_id: i64, at: DateTime<Utc>)
        -> StoreResult<Option<File>>;

    async fn complete_file(
        &self,
        file_id: i64,
        completion: FileCompletion,
    ) -> StoreResult<Option<File>>;

    async fn persist_parse_errors(&self, errors: Vec<NewParseError>) -> StoreResult<usize>;

    async fn parse_errors_for_file(&self, file_id: i64) -> StoreResult<Vec<ParseErrorRecord>>;

    // members

    /// Bulk upsert. `Versioned` conflicts on `(org identity, hash_value)`; `V2`
    /// conflicts on the org identity and bumps `version`.
    async fn persist_members(
        &self,
        source: MemberSource,
        members: Vec<NewMember>,
    ) -> StoreResult<Vec<Member>>;

    /// Upserts on `member_id`.
    async fn persist_addresses(&self, addresses: Vec<NewAddress>) -> StoreResult<usize>;

    async fn address_for_member(&self, member_id: i64) -> StoreResult<Option<Address>>;

    async fn get_member(&self, source: MemberSource, member_id: i64)
        -> StoreResult<Option<Member>>;

    /// Criteria filter, then [`latest_valid_per_identity`] against `today`.
    async fn find_members(
        &self,
        source: MemberSource,
        criteria: &MemberCriteria,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>>;

    /// Newest version of the identity, regardless of its effective range.
    async fn by_org_identity(
        &self,
        source: MemberSource,
        identity: &OrgIdentity,
    ) -> StoreResult<Option<Member>>;

    /// Every stored version of the org's members.
    async fn members_for_org(
        &self,
        source: MemberSource,
        organization_id: i64,
    ) -> StoreResult<Vec<Member>>;

    /// Current version of every identity in the org.
    async fn current_members_for_org(
        &self,
        organization_id: i64,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>> {
        let members = self
            .members_for_org(MemberSource::Versioned, organization_id)
            .await?;
        Ok(latest_valid_per_identity(members, today))
    }

    async fn unhashed_members(&self, organization_id: i64) -> StoreResult<Vec<Member>>;

    async fn delete_members(&self, member_ids: &[i64]) -> StoreResult<usize>;

    /// Stores each hash unless some row of the org already carries it.
    async fn update_hash_values(
        &self,
        organization_id: i64,
        hashes: Vec<(i64, String)>,
    ) -> StoreResult<usize>;

    /// Copies the rows into `member_versioned_historical` and deletes them.
    async fn move_to_historical(&self, member_ids: &[i64], at: DateTime<Utc>)
        -> StoreResult<usize>;

    /// Members among `member_ids` that carry at least one verification link.
    async fn linked_member_ids(&self, member_ids: &[i64]) -> StoreResult<HashSet<i64>>;

    /// Distinct users whose verified member shares `(organization_id, unique_corp_id)`
    /// with one of `user_id`'s active verifications.
    async fn other_user_ids_in_family(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<i64>>;

    /// Matches on `(dob, unique_corp_id)`; rows carrying a client id are re-homed
    /// through the external-id table, composite keys first.
    async fn by_tertiary_verification(
        &self,
        date_of_birth: NaiveDate,
        unique_corp_id: &str,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>> {
        let criteria = MemberCriteria::dob_and_unique_corp_id(date_of_birth, unique_corp_id);
        if criteria.unique_corp_id.is_none() {
            return Ok(Vec::new());
        }
        let members = self
            .find_members(MemberSource::Versioned, &criteria, today)
            .await?;

        let keys: Vec<(usize, Vec<ExternalKey>)> = members
            .iter()
            .enumerate()
            .filter_map(|(index, member)| {
                let client = member.record_str("client_id").and_then(present)?;
                let mut keys = Vec::new();
                if let Some(customer) = member.record_str("customer_id").and_then(present) {
                    keys.push(ExternalKey::Composite(client.clone(), customer));
                }
                keys.push(ExternalKey::Client(client));
                Some((index, keys))
            })
            .collect();
        if keys.is_empty() {
            return Ok(members);
        }

        let raw_ids: Vec<String> = keys
            .iter()
            .flat_map(|(_, keys)| keys.iter().map(external_key_string))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mappings = self.external_ids_by_value(&raw_ids).await?;
        let mut resolved = members;
        for (index, candidates) in keys {
            let data_provider = resolved[index]
                .record
                .get("data_provider_organization_id")
                .and_then(serde_json::Value::as_i64);
            let found = candidates.iter().find_map(|key| {
                let raw = external_key_string(key);
                mappings.iter().find(|mapping| {
                    mapping.external_id == raw
                        && data_provider.map_or(true, |provider| {
                            mapping
                                .data_provider_organization_id
                                .map_or(true, |id| id == provider)
                        })
                })
            });
            if let Some(mapping) = found {
                resolved[index].organization_id = mapping.organization_id;
            }
        }
        Ok(resolved)
    }

    // pre-verification

    /// A page of members in the org (optionally one file) that are valid today,
    /// not `pre_verified`, and have no verification link, ordered by id after `after_id`.
    async fn members_for_pre_verification(
        &self,
        organization_id: i64,
        file_id: Option<i64>,
        after_id: i64,
        limit: i64,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>>;

    async fn active_verifications_for_org(
        &self,
        organization_id: i64,
        types: &[VerificationType],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Verification>>;

    /// Inserts the links and flags the members `pre_verified`, in one transaction.
    async fn link_pre_verified(
        &self,
        links: Vec<NewMemberVerification>,
        member_ids: &[i64],
    ) -> StoreResult<usize>;

    // verifications

    /// Writes every draft of the bundle in one transaction.
    async fn create_verifications(
        &self,
        bundle: VerificationBundle,
    ) -> StoreResult<Vec<CreatedVerification>>;

    async fn create_failed_attempt(
        &self,
        attempt: NewVerificationAttempt,
    ) -> StoreResult<VerificationAttempt>;

    async fn get_verification(&self, verification_id: i64) -> StoreResult<Option<Verification>>;

    /// Deactivates the v1 row and its v2 counterpart together. With `require_v2`,
    /// a missing v2 row fails the whole operation.
    async fn deactivate_verification(
        &self,
        verification_id: i64,
        at: DateTime<Utc>,
        require_v2: bool,
    ) -> StoreResult<Option<Verification>>;

    async fn verifications_for_user(&self, user_id: i64) -> StoreResult<Vec<LinkedVerification>>;

    async fn verification_links_for_member(
        &self,
        member_id: i64,
    ) -> StoreResult<Vec<MemberVerification>>;

    async fn member_has_verification(&self, member_id: i64) -> StoreResult<bool> {
        Ok(!self.verification_links_for_member(member_id).await?.is_empty())
    }

    // populations

    async fn populations_for_org(&self, organization_id: i64) -> StoreResult<Vec<Population>>;

    async fn get_population(&self, population_id: i64) -> StoreResult<Option<Population>>;

    async fn persist_population(&self, population: NewPopulation) -> StoreResult<Population>;

    async fn sub_populations(&self, population_id: i64) -> StoreResult<Vec<SubPopulation>>;

    async fn get_sub_population(&self, sub_population_id: i64)
        -> StoreResult<Option<SubPopulation>>;

    async fn persist_sub_population(
        &self,
        sub_population: NewSubPopulation,
    ) -> StoreResult<SubPopulation>;
}

pub fn external_key_string(key: &ExternalKey) -> String {
    match key {
        ExternalKey::Client(client) => client.clone(),
        ExternalKey::Composite(client, customer) => format!("{client}:{customer}"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::domain::DateRange;

    fn member(id: i64, corp: &str, updated_minutes: i64, range: DateRange) -> Member {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Member {
            id,
            version: 0,
            is_v2: false,
            organization_id: 1,
            file_id: Some(1),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 6, 2).unwrap(),
            email: "Jane@Acme.com".into(),
            unique_corp_id: corp.into(),
            dependent_id: String::new(),
            work_state: Some("NY".into()),
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: range,
            record: json!({}),
            custom_attributes: json!({}),
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: base,
            updated_at: base + Duration::minutes(updated_minutes),
        }
    }

    #[test]
    fn dedup_keeps_newest_version_per_identity() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let rows = vec![
            member(1, "a", 1, DateRange::unbounded()),
            member(2, "a", 5, DateRange::unbounded()),
            member(3, "b", 1, DateRange::unbounded()),
        ];
        let kept: Vec<i64> = latest_valid_per_identity(rows, today)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&2));
        assert!(kept.contains(&3));
    }

    #[test]
    fn dedup_drops_identity_whose_newest_version_is_expired() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let rows = vec![
            member(1, "a", 1, DateRange::unbounded()),
            member(2, "a", 5, DateRange::new(None, Some(today))),
        ];
        assert!(latest_valid_per_identity(rows, today).is_empty());
    }

    #[test]
    fn criteria_match_ignores_case_and_whitespace() {
        let row = member(1, "a", 0, DateRange::unbounded());
        let dob = row.date_of_birth;
        assert!(MemberCriteria::dob_and_email(dob, " JANE@acme.com ").matches(&row));
        assert!(MemberCriteria::secondary(dob, "jane", "DOE", Some("")).matches(&row));
        assert!(MemberCriteria::secondary(dob, "jane", "doe", Some("ny")).matches(&row));
        assert!(!MemberCriteria::secondary(dob, "jane", "doe", Some("CA")).matches(&row));
    }

    #[test]
    fn last_wins_keeps_first_position() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        let unique = last_wins_by_key(rows, |row| row.0);
        assert_eq!(unique, vec![("a", 3), ("b", 2)]);
    }
}
