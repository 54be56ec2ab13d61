//! Dry runs: parse a census file staged under `dryrun/` and report how its
//! members would land in sub-populations, without writing anything
//! authoritative. Parsed rows go to an in-memory store; the reports go to the
//! dry-run bucket.

pub mod report;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{File, Member, NewParseError, Population};
use crate::flags::FeatureFlags;
use crate::ingest::{self, ProcessingResult};
use crate::parser::CensusParser;
use crate::populations;
use crate::storage::ObjectStorage;
use crate::store::{MemberSource, MemoryStore, RecordStore, StoreError};

pub use self::report::{ReportNoPopError, ReportParseError};

pub const DRY_RUN_FOLDER: &str = "dryrun";

#[derive(Debug, Error)]
pub enum DryRunError {
    #[error("Failed to parse organization_id from dry run file name: {0}.")]
    ParseOrganization(String),
    #[error("organization {0} does not exist")]
    UnknownOrganization(i64),
    #[error("dry-run blob access failed: {0}")]
    Blob(anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DryRunError {
    pub fn is_transient(&self) -> bool {
        match self {
            DryRunError::Blob(_) => true,
            DryRunError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Organization id from `dryrun/<organization_id>_<anything>`.
pub fn organization_id_from_name(name: &str) -> Result<i64, DryRunError> {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.split('_')
        .next()
        .and_then(|prefix| prefix.parse().ok())
        .ok_or_else(|| DryRunError::ParseOrganization(name.to_string()))
}

fn blob_key(name: &str) -> String {
    if name.starts_with(&format!("{DRY_RUN_FOLDER}/")) {
        name.to_string()
    } else {
        format!("{DRY_RUN_FOLDER}/{name}")
    }
}

/// Members of one organization paired with their sub-population.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationData {
    pub population_id_used: i64,
    pub members: Vec<(Member, Option<i64>)>,
}

impl PopulationData {
    pub fn unassigned(&self) -> impl Iterator<Item = &Member> {
        self.members
            .iter()
            .filter(|(_, sub_population_id)| sub_population_id.is_none())
            .map(|(member, _)| member)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub census_file_name: String,
    pub result: ProcessingResult,
    pub file: File,
    pub file_parse_errors: Vec<NewParseError>,
    pub population_id_used: BTreeMap<i64, i64>,
    pub populations: BTreeMap<i64, PopulationData>,
    pub no_population: Vec<ReportNoPopError>,
    pub additional_summary_lines: Vec<String>,
}

impl DryRunReport {
    fn new(census_file_name: &str, file: File) -> Self {
        Self {
            census_file_name: census_file_name.to_string(),
            result: ProcessingResult::NoRecordsFound,
            file,
            file_parse_errors: Vec::new(),
            population_id_used: BTreeMap::new(),
            populations: BTreeMap::new(),
            no_population: Vec::new(),
            additional_summary_lines: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct DryRunner {
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    flags: Arc<dyn FeatureFlags>,
    batch_size: usize,
    no_dob_organizations: HashSet<i64>,
}

impl DryRunner {
    /// `store` is only read (organizations, aliases, mappings, populations).
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
            no_dob_organizations: config.no_dob_organizations.clone(),
        }
    }

    async fn population_for(
        &self,
        organization_id: i64,
        override_sub_population: &HashMap<i64, i64>,
    ) -> Result<Option<Population>, DryRunError> {
        match override_sub_population.get(&organization_id) {
            Some(population_id) => Ok(self.store.get_population(*population_id).await?),
            None => Ok(populations::effective_population(
                self.store.as_ref(),
                organization_id,
                Utc::now(),
            )
            .await?),
        }
    }

    /// Parses the file, assigns sub-populations and uploads the reports.
    pub async fn run(
        &self,
        name: &str,
        override_sub_population: &HashMap<i64, i64>,
    ) -> Result<DryRunReport, DryRunError> {
        let report = self.evaluate(name, override_sub_population).await?;
        let keys = report::write_reports(self.storage.as_ref(), &report)
            .await
            .map_err(DryRunError::Blob)?;
        info!(
            census_file_name = %report.census_file_name,
            reports = keys.len(),
            "dry-run reports written"
        );
        Ok(report)
    }

    /// Everything but the uploads.
    pub async fn evaluate(
        &self,
        name: &str,
        override_sub_population: &HashMap<i64, i64>,
    ) -> Result<DryRunReport, DryRunError> {
        let organization_id = organization_id_from_name(name)?;
        let organization = self
            .store
            .get_organization(organization_id)
            .await?
            .ok_or(DryRunError::UnknownOrganization(organization_id))?;
        let key = blob_key(name);
        let now = Utc::now();
        let mut report = DryRunReport::new(
            name,
            File {
                id: -1,
                organization_id,
                name: key.clone(),
                encoding: String::new(),
                error: None,
                raw_count: None,
                success_count: None,
                failure_count: None,
                started_at: Some(now),
                completed_at: None,
                created_at: now,
            },
        );
        info!(census_file_name = name, organization_id, "dry run starting");

        let Some(bytes) = self.storage.get_object(&key).await.map_err(DryRunError::Blob)? else {
            warn!(census_file_name = name, "dry-run file not found");
            report.result = ProcessingResult::FileMissing;
            report.file.error = Some("missing".into());
            return Ok(report);
        };

        let (mapping, context) = ingest::prepare_parse(
            self.store.as_ref(),
            self.flags.as_ref(),
            organization,
            None,
            &self.no_dob_organizations,
            now.date_naive(),
        )
        .await?;
        let parser = match CensusParser::new(&bytes, &mapping, context, self.batch_size) {
            Ok(parser) => parser,
            Err(err) => {
                warn!(census_file_name = name, error = %err, "dry-run file rejected");
                report.result = err.into();
                report.file.error = Some(err.code().to_string());
                return Ok(report);
            }
        };
        report.file.encoding = parser.encoding().to_string();

        let sink = MemoryStore::new();
        let mut organization_ids = BTreeSet::new();
        let (mut valid, mut errors) = (0, 0);
        for batch in parser {
            organization_ids.extend(batch.valid.iter().map(|row| row.member.organization_id));
            report.file_parse_errors.extend(batch.errors.iter().cloned());
            let outcome = ingest::persist_batch(&sink, self.flags.as_ref(), batch).await?;
            valid += outcome.valid;
            errors += outcome.errors;
        }
        report.file.raw_count = Some(i32::try_from(valid + errors).unwrap_or(i32::MAX));
        report.file.success_count = Some(i32::try_from(valid).unwrap_or(i32::MAX));
        report.file.failure_count = Some(i32::try_from(errors).unwrap_or(i32::MAX));
        report.file.completed_at = Some(Utc::now());
        if valid + errors > 0 {
            report.result = ProcessingResult::ProcessingSuccessful;
        }
        info!(census_file_name = name, valid, errors, "dry-run parsing complete");

        for organization_id in organization_ids {
            let mut members = sink
                .members_for_org(MemberSource::Versioned, organization_id)
                .await?;
            members.sort_by_key(|member| member.id);
            let Some(population) = self
                .population_for(organization_id, override_sub_population)
                .await?
            else {
                report
                    .additional_summary_lines
                    .push(report::no_population_line(organization_id, members.len()));
                continue;
            };

            let members: Vec<(Member, Option<i64>)> = members
                .into_iter()
                .map(|member| {
                    let sub_population_id =
                        populations::resolve_sub_population(&population, &member);
                    (member, sub_population_id)
                })
                .collect();
            let data = PopulationData {
                population_id_used: population.id,
                members,
            };
            report
                .no_population
                .extend(data.unassigned().map(ReportNoPopError::from));
            report
                .population_id_used
                .insert(organization_id, population.id);
            report.populations.insert(organization_id, data);
        }
        Ok(report)
    }
}
