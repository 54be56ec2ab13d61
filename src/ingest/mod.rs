//! Census ingestion: one stored file in, member versions out.
//!
//! The parser yields bounded batches; each batch is persisted before the next
//! one is pulled. After the last batch the organization-level passes run
//! (duplicate hashes, expiration of identities the file no longer carries,
//! pre-verification) and the file row is stamped complete.

pub mod hashing;

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{
    AddressFields, ExternalKey, FileCompletion, Member, NewAddress, NewMember, OrgIdentity,
    Organization,
};
use crate::flags::{FeatureFlags, E9Y_2_WRITE, OPTUM_CLIENT_ID_STRICT};
use crate::parser::headers::HeaderMapping;
use crate::parser::{CensusParser, FileError, ParseContext, ParsedBatch};
use crate::preverify::{self, PreVerifyStats, MAX_CONCURRENT_ORGS};
use crate::storage::ObjectStorage;
use crate::store::{latest_per_identity, MemberSource, RecordStore, StoreError, StoreResult};

use self::hashing::EXPIRED_SUFFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingResult {
    NoRecordsFound,
    ErrorDuringProcessing,
    ProcessingSuccessful,
    FileMissing,
    BadFileEncoding,
}

impl ProcessingResult {
    pub fn code(&self) -> i32 {
        match self {
            Self::NoRecordsFound => 0,
            Self::ErrorDuringProcessing => -1,
            Self::ProcessingSuccessful => 1,
            Self::FileMissing => 2,
            Self::BadFileEncoding => 3,
        }
    }
}

impl From<FileError> for ProcessingResult {
    fn from(value: FileError) -> Self {
        match value {
            FileError::BadEncoding => Self::BadFileEncoding,
            FileError::Delimiter => Self::ErrorDuringProcessing,
            FileError::Empty => Self::NoRecordsFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file {0} does not exist")]
    UnknownFile(i64),
    #[error("organization {0} does not exist")]
    UnknownOrganization(i64),
    #[error("failed to fetch census blob {key}: {source}")]
    Blob {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Blob { .. } => true,
            IngestError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub hashed: usize,
    pub deleted: usize,
}

impl DedupStats {
    fn absorb(&mut self, other: DedupStats) {
        self.hashed += other.hashed;
        self.deleted += other.deleted;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub result: ProcessingResult,
    pub valid: usize,
    pub errors: usize,
    pub expired: usize,
    pub duplicates: DedupStats,
    pub pre_verify: PreVerifyStats,
}

impl IngestReport {
    fn new(result: ProcessingResult) -> Self {
        Self {
            result,
            valid: 0,
            errors: 0,
            expired: 0,
            duplicates: DedupStats::default(),
            pre_verify: PreVerifyStats::default(),
        }
    }
}

/// What one persisted batch produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub valid: usize,
    pub errors: usize,
    pub addresses: usize,
    pub members: Vec<Member>,
}

/// Header mapping and parser context for one organization's file. The
/// data-provider mapping is read here once and reused for every row.
pub async fn prepare_parse(
    store: &dyn RecordStore,
    flags: &dyn FeatureFlags,
    organization: Organization,
    file_id: Option<i64>,
    no_dob_organizations: &HashSet<i64>,
    today: NaiveDate,
) -> StoreResult<(HeaderMapping, ParseContext)> {
    let aliases = store.header_aliases(organization.id).await?;
    let external_ids = if organization.data_provider {
        store
            .external_id_mappings(organization.id)
            .await?
            .into_iter()
            .map(|mapping| {
                (
                    ExternalKey::from_external_id(&mapping.external_id),
                    mapping.organization_id,
                )
            })
            .collect()
    } else {
        HashMap::new()
    };

    let context = ParseContext {
        file_id,
        organization,
        external_ids,
        no_dob_organizations: no_dob_organizations.clone(),
        strict_client_id: flags.enabled(OPTUM_CLIENT_ID_STRICT),
        today,
    };
    Ok((HeaderMapping::for_organization(&aliases), context))
}

/// Writes one parser batch: parse errors, member versions (plus the v2 mirror
/// where enabled) and the addresses of the versions just written.
pub async fn persist_batch(
    store: &dyn RecordStore,
    flags: &dyn FeatureFlags,
    batch: ParsedBatch,
) -> StoreResult<BatchOutcome> {
    let ParsedBatch { valid, errors } = batch;
    let mut outcome = BatchOutcome {
        valid: valid.len(),
        errors: errors.len(),
        ..BatchOutcome::default()
    };
    if !errors.is_empty() {
        store.persist_parse_errors(errors).await?;
    }
    if valid.is_empty() {
        return Ok(outcome);
    }

    let mut addresses: HashMap<(OrgIdentity, Option<String>), AddressFields> = HashMap::new();
    let mut rows = Vec::with_capacity(valid.len());
    for row in valid {
        if let Some(address) = row.address.filter(|address| !address.is_empty()) {
            addresses.insert(
                (row.member.org_identity(), row.member.hash_value.clone()),
                address,
            );
        }
        rows.push(row.member);
    }

    let mirrored: Vec<NewMember> = rows
        .iter()
        .filter(|member| flags.enabled_for_org(E9Y_2_WRITE, member.organization_id))
        .cloned()
        .collect();
    let members = store.persist_members(MemberSource::Versioned, rows).await?;
    if !mirrored.is_empty() {
        store.persist_members(MemberSource::V2, mirrored).await?;
    }

    let new_addresses: Vec<NewAddress> = members
        .iter()
        .filter_map(|member| {
            addresses
                .remove(&(member.org_identity(), member.hash_value.clone()))
                .map(|fields| NewAddress {
                    member_id: member.id,
                    fields,
                })
        })
        .collect();
    if !new_addresses.is_empty() {
        outcome.addresses = store.persist_addresses(new_addresses).await?;
    }
    outcome.members = members;
    Ok(outcome)
}

/// Hashes an organization's unhashed rows and drops duplicates, keeping the
/// earliest created row of each hash. A kept row whose hash another row of the
/// org already carries stays unhashed. Rows with a verification link are never
/// deleted.
pub async fn purge_duplicate_hashes(
    store: &dyn RecordStore,
    organization_id: i64,
) -> StoreResult<DedupStats> {
    let rows = store.unhashed_members(organization_id).await?;
    if rows.is_empty() {
        return Ok(DedupStats::default());
    }

    let mut kept: HashMap<String, Member> = HashMap::new();
    let mut discard = Vec::new();
    for member in rows {
        let address = store.address_for_member(member.id).await?;
        let hash = hashing::member_hash(&member, address.as_ref().map(|address| &address.fields));
        match kept.entry(hash) {
            Entry::Vacant(slot) => {
                slot.insert(member);
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if (member.created_at, member.id) < (current.created_at, current.id) {
                    discard.push(slot.insert(member).id);
                } else {
                    discard.push(member.id);
                }
            }
        }
    }

    let linked = store.linked_member_ids(&discard).await?;
    let discard: Vec<i64> = discard
        .into_iter()
        .filter(|id| !linked.contains(id))
        .collect();
    let deleted = store.delete_members(&discard).await?;
    let hashed = store
        .update_hash_values(
            organization_id,
            kept.into_iter().map(|(hash, member)| (member.id, hash)).collect(),
        )
        .await?;

    info!(organization_id, hashed, deleted, "purged duplicate member hashes");
    Ok(DedupStats { hashed, deleted })
}

/// Ends every identity of the organization that an earlier file delivered but
/// `present` no longer contains. The closing version copies the newest one,
/// with `effective_range.upper = today` and its hash tagged `,expired`.
pub async fn expire_missing_members(
    store: &dyn RecordStore,
    flags: &dyn FeatureFlags,
    organization_id: i64,
    present: &HashSet<OrgIdentity>,
    today: NaiveDate,
) -> StoreResult<usize> {
    let newest = latest_per_identity(
        store
            .members_for_org(MemberSource::Versioned, organization_id)
            .await?,
    );
    let closing: Vec<NewMember> = newest
        .into_iter()
        .filter(|(identity, member)| {
            member.file_id.is_some()
                && !present.contains(identity)
                && member.effective_range.has_not_ended(today)
        })
        .map(|(_, member)| {
            let mut version = NewMember::from(&member);
            version.effective_range.upper = Some(today);
            version.hash_value = Some(format!(
                "{}{EXPIRED_SUFFIX}",
                member.hash_value.as_deref().unwrap_or_default()
            ));
            version
        })
        .collect();
    if closing.is_empty() {
        return Ok(0);
    }

    let mirrored = flags
        .enabled_for_org(E9Y_2_WRITE, organization_id)
        .then(|| closing.clone());
    let expired = store
        .persist_members(MemberSource::Versioned, closing)
        .await?
        .len();
    if let Some(mirrored) = mirrored {
        store.persist_members(MemberSource::V2, mirrored).await?;
    }

    info!(organization_id, expired, "expired members missing from latest file");
    Ok(expired)
}

/// Moves ended versions (upper bound before `today`) that are neither the
/// newest version of their identity nor linked to a verification into the
/// historical table.
pub async fn purge_expired_members(
    store: &dyn RecordStore,
    organization_id: i64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let members = store
        .members_for_org(MemberSource::Versioned, organization_id)
        .await?;
    let newest: HashSet<i64> = latest_per_identity(members.clone())
        .values()
        .map(|member| member.id)
        .collect();
    let candidates: Vec<i64> = members
        .iter()
        .filter(|member| member.effective_range.upper.map_or(false, |upper| upper < today))
        .filter(|member| !newest.contains(&member.id))
        .map(|member| member.id)
        .collect();
    if candidates.is_empty() {
        return Ok(0);
    }

    let linked = store.linked_member_ids(&candidates).await?;
    let purge: Vec<i64> = candidates
        .into_iter()
        .filter(|id| !linked.contains(id))
        .collect();
    let purged = store.move_to_historical(&purge, now).await?;
    info!(organization_id, purged, "purged expired member versions");
    Ok(purged)
}

/// Runs `task` for every organization, at most [`MAX_CONCURRENT_ORGS`] at a
/// time. A failing organization is logged and skipped.
async fn for_each_org<T, F, Fut>(
    organization_ids: impl IntoIterator<Item = i64>,
    operation: &'static str,
    task: F,
) -> Vec<T>
where
    F: Fn(i64) -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_ORGS));
    let runs = organization_ids.into_iter().map(|organization_id| {
        let semaphore = semaphore.clone();
        let run = task(organization_id);
        async move {
            let _permit = semaphore.acquire().await.ok()?;
            match run.await {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(organization_id, operation, error = %err, "organization task failed");
                    None
                }
            }
        }
    });
    join_all(runs).await.into_iter().flatten().collect()
}

/// Duplicate-hash purge for every data provider and the organizations it feeds.
pub async fn purge_all_duplicate_hashes(store: Arc<dyn RecordStore>) -> StoreResult<DedupStats> {
    let mut organization_ids = BTreeSet::new();
    for provider in store.data_provider_organizations().await? {
        organization_ids.insert(provider.id);
        for mapping in store.external_id_mappings(provider.id).await? {
            organization_ids.insert(mapping.organization_id);
        }
    }

    let mut total = DedupStats::default();
    for stats in for_each_org(organization_ids, "purge_duplicate_hashes", |organization_id| {
        let store = store.clone();
        async move { purge_duplicate_hashes(store.as_ref(), organization_id).await }
    })
    .await
    {
        total.absorb(stats);
    }
    Ok(total)
}

pub async fn purge_all_expired_members(store: Arc<dyn RecordStore>) -> StoreResult<usize> {
    let organization_ids: Vec<i64> = store
        .all_organizations()
        .await?
        .into_iter()
        .map(|organization| organization.id)
        .collect();
    let now = Utc::now();
    let today = now.date_naive();

    let purged = for_each_org(organization_ids, "purge_expired_members", |organization_id| {
        let store = store.clone();
        async move { purge_expired_members(store.as_ref(), organization_id, today, now).await }
    })
    .await;
    Ok(purged.into_iter().sum())
}

/// Ingestion orchestrator. Collaborators are injected; nothing is global.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    flags: Arc<dyn FeatureFlags>,
    batch_size: usize,
    pre_verify_batch_size: i64,
    no_dob_organizations: HashSet<i64>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        flags: Arc<dyn FeatureFlags>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            storage,
            flags,
            batch_size: config.ingest_batch_size,
            pre_verify_batch_size: config.pre_verify_batch_size,
            no_dob_organizations: config.no_dob_organizations.clone(),
        }
    }

    async fn close_file(
        &self,
        file_id: i64,
        error: &str,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.store
            .complete_file(
                file_id,
                FileCompletion {
                    error: Some(error.to_string()),
                    completed_at,
                    ..FileCompletion::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn ingest_file(&self, file_id: i64) -> Result<IngestReport, IngestError> {
        let store = self.store.as_ref();
        let file = store
            .get_file(file_id)
            .await?
            .ok_or(IngestError::UnknownFile(file_id))?;
        if file.completed_at.is_some() {
            info!(file_id, "file already processed, skipping");
            return Ok(IngestReport::new(ProcessingResult::ProcessingSuccessful));
        }
        let organization = store
            .get_organization(file.organization_id)
            .await?
            .ok_or(IngestError::UnknownOrganization(file.organization_id))?;
        let organization_id = organization.id;

        let bytes = match self.storage.get_object(&file.name).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(file_id, organization_id, "census blob is missing");
                self.close_file(file_id, "missing", None).await?;
                return Ok(IngestReport::new(ProcessingResult::FileMissing));
            }
            Err(source) => {
                return Err(IngestError::Blob {
                    key: file.name,
                    source,
                })
            }
        };

        let now = Utc::now();
        let today = now.date_naive();
        let (mapping, context) = prepare_parse(
            store,
            self.flags.as_ref(),
            organization,
            Some(file_id),
            &self.no_dob_organizations,
            today,
        )
        .await?;
        store.mark_file_started(file_id, now).await?;

        let parser = match CensusParser::new(&bytes, &mapping, context, self.batch_size) {
            Ok(parser) => parser,
            Err(err) => {
                warn!(file_id, organization_id, error = %err, "census file rejected");
                self.close_file(file_id, err.code(), Some(Utc::now())).await?;
                return Ok(IngestReport::new(err.into()));
            }
        };
        let encoding = parser.encoding();
        info!(file_id, organization_id, encoding, "ingesting census file");

        let mut report = IngestReport::new(ProcessingResult::NoRecordsFound);
        let mut present: HashMap<i64, HashSet<OrgIdentity>> = HashMap::new();
        for batch in parser {
            for row in &batch.valid {
                present
                    .entry(row.member.organization_id)
                    .or_default()
                    .insert(row.member.org_identity());
            }
            let outcome = persist_batch(store, self.flags.as_ref(), batch).await?;
            info!(
                file_id,
                valid = outcome.valid,
                errors = outcome.errors,
                addresses = outcome.addresses,
                "persisted census batch"
            );
            report.valid += outcome.valid;
            report.errors += outcome.errors;
        }

        let mut organization_ids: Vec<i64> = present.keys().copied().collect();
        organization_ids.sort_unstable();
        for id in &organization_ids {
            report
                .duplicates
                .absorb(purge_duplicate_hashes(store, *id).await?);
            report.expired +=
                expire_missing_members(store, self.flags.as_ref(), *id, &present[id], today)
                    .await?;
        }
        for id in &organization_ids {
            match preverify::pre_verify_org(
                store,
                *id,
                Some(file_id),
                self.pre_verify_batch_size,
                Utc::now(),
            )
            .await
            {
                Ok(stats) => {
                    report.pre_verify.batches += stats.batches;
                    report.pre_verify.members_linked += stats.members_linked;
                    report.pre_verify.links_created += stats.links_created;
                }
                Err(err) => {
                    warn!(file_id, organization_id = *id, error = %err, "pre-verification after ingest failed")
                }
            }
        }

        store
            .complete_file(
                file_id,
                FileCompletion {
                    encoding: Some(encoding.to_string()),
                    raw_count: count(report.valid + report.errors),
                    success_count: count(report.valid),
                    failure_count: count(report.errors),
                    error: None,
                    completed_at: Some(Utc::now()),
                },
            )
            .await?;

        if report.valid + report.errors > 0 {
            report.result = ProcessingResult::ProcessingSuccessful;
        }
        info!(
            file_id,
            organization_id,
            valid = report.valid,
            errors = report.errors,
            expired = report.expired,
            result = report.result.code(),
            "census file ingested"
        );
        Ok(report)
    }
}

fn count(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
