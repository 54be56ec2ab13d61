//! Dry-run report rendering: the CSV attachments and `summary.txt`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::domain::{File, Member, NewParseError};
use crate::parser::messages;
use crate::storage::ObjectStorage;

use super::{DryRunReport, PopulationData, DRY_RUN_FOLDER};

const ERROR_COLUMNS: [&str; 6] = [
    "organization_id",
    "parse_line_no",
    "unique_corp_id",
    "dependent_id",
    "errors",
    "warnings",
];

const NO_POP_COLUMNS: [&str; 5] = [
    "parse_line_no",
    "client_id",
    "customer_id",
    "unique_corp_id",
    "dependent_id",
];

fn record_text(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportParseError {
    pub organization_id: i64,
    pub parse_line_no: Option<String>,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub errors: String,
    pub warnings: String,
}

impl From<&NewParseError> for ReportParseError {
    fn from(error: &NewParseError) -> Self {
        Self {
            organization_id: error.organization_id,
            parse_line_no: record_text(&error.record, "parse_line_no"),
            unique_corp_id: record_text(&error.record, "unique_corp_id"),
            dependent_id: record_text(&error.record, "dependent_id"),
            errors: serde_json::to_string(&error.errors).unwrap_or_default(),
            warnings: serde_json::to_string(&error.warnings).unwrap_or_default(),
        }
    }
}

/// A parsed member the effective population leaves without a sub-population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportNoPopError {
    pub parse_line_no: Option<String>,
    pub client_id: Option<String>,
    pub customer_id: Option<String>,
    pub unique_corp_id: String,
    pub dependent_id: String,
}

impl From<&Member> for ReportNoPopError {
    fn from(member: &Member) -> Self {
        Self {
            parse_line_no: record_text(&member.record, "parse_line_no"),
            client_id: record_text(&member.record, "client_id"),
            customer_id: record_text(&member.record, "customer_id"),
            unique_corp_id: member.unique_corp_id.clone(),
            dependent_id: member.dependent_id.clone(),
        }
    }
}

fn to_csv<T: Serialize>(columns: &[&str], rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to finish report csv: {}", err.error()))
}

pub fn is_orphan(error: &NewParseError) -> bool {
    error
        .errors
        .iter()
        .any(|message| message == messages::CLIENT_ID_NO_MAPPING)
}

pub fn file_line(file: &File) -> String {
    let counts = format!(
        "{} rows processed. {} success rows, {} error rows.",
        file.raw_count.unwrap_or_default(),
        file.success_count.unwrap_or_default(),
        file.failure_count.unwrap_or_default()
    );
    match (file.started_at, file.completed_at) {
        (Some(started), Some(completed)) => {
            let millis = (completed - started).num_milliseconds().max(0);
            let minutes = millis / 60_000;
            let seconds = (millis % 60_000) as f64 / 1000.0;
            format!(
                "Dry run for file {} takes {minutes} mins, {seconds} secs. {counts}",
                file.name
            )
        }
        _ => format!(
            "Dry run for file {} not complete due to process errors. {counts}",
            file.name
        ),
    }
}

pub fn parse_error_line(errors: &[NewParseError]) -> String {
    let orphans = errors.iter().filter(|error| is_orphan(error)).count();
    format!(
        "{} parse errors found, {orphans} orphan records found. ",
        errors.len() - orphans
    )
}

pub fn population_lines(organization_id: i64, data: &PopulationData) -> Vec<String> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for sub_population_id in data.members.iter().filter_map(|(_, id)| *id) {
        *counts.entry(sub_population_id).or_default() += 1;
    }

    let mut lines = vec![format!(
        "Organization {organization_id}: total {} members, sub population calculated based on population_id={} - {} does not has population",
        data.members.len(),
        data.population_id_used,
        data.unassigned().count()
    )];
    lines.extend(
        counts
            .into_iter()
            .map(|(id, count)| format!("population {id} has {count} members")),
    );
    lines
}

pub fn no_population_line(organization_id: i64, member_count: usize) -> String {
    format!("Organization {organization_id}: total {member_count} members, No effective population found.")
}

pub fn summary_text(report: &DryRunReport) -> String {
    let mut lines = vec![
        file_line(&report.file),
        parse_error_line(&report.file_parse_errors),
    ];
    for (organization_id, data) in &report.populations {
        lines.extend(population_lines(*organization_id, data));
    }
    lines.extend(report.additional_summary_lines.iter().cloned());
    lines.join("\r\n")
}

/// `dryrun/reports/<census file stem>`
pub fn report_folder(census_file_name: &str) -> String {
    let base = census_file_name
        .rsplit('/')
        .next()
        .unwrap_or(census_file_name);
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    format!("{DRY_RUN_FOLDER}/reports/{stem}")
}

/// Uploads the attachments and the summary; returns the keys written.
pub async fn write_reports(storage: &dyn ObjectStorage, report: &DryRunReport) -> Result<Vec<String>> {
    let folder = report_folder(&report.census_file_name);
    let mut uploads: Vec<(String, Vec<u8>, &str)> = Vec::new();

    let errors: Vec<ReportParseError> = report
        .file_parse_errors
        .iter()
        .map(ReportParseError::from)
        .collect();
    uploads.push((format!("{folder}/errors.csv"), to_csv(&ERROR_COLUMNS, &errors)?, "text/csv"));

    for (organization_id, data) in &report.populations {
        let rows: Vec<ReportNoPopError> = data.unassigned().map(ReportNoPopError::from).collect();
        uploads.push((
            format!("{folder}/{organization_id}_non_pop_member.csv"),
            to_csv(&NO_POP_COLUMNS, &rows)?,
            "text/csv",
        ));
    }
    uploads.push((
        format!("{folder}/summary.txt"),
        summary_text(report).into_bytes(),
        "text/plain",
    ));

    let mut keys = Vec::with_capacity(uploads.len());
    for (key, bytes, content_type) in uploads {
        storage
            .put_object(&key, bytes, Some(content_type.to_string()))
            .await
            .with_context(|| format!("failed to upload dry-run report {key}"))?;
        keys.push(key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use serde_json::json;

    use super::*;
    use crate::domain::DateRange;

    fn parse_error(errors: &[&str]) -> NewParseError {
        NewParseError {
            file_id: None,
            organization_id: 1,
            record: json!({"parse_line_no": 4, "unique_corp_id": "c4", "dependent_id": ""}),
            errors: errors.iter().map(|e| e.to_string()).collect(),
            warnings: vec![],
        }
    }

    fn member(corp: &str, line: i64) -> Member {
        Member {
            id: line,
            version: 0,
            is_v2: false,
            organization_id: 1,
            file_id: None,
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 6, 2).unwrap(),
            email: String::new(),
            unique_corp_id: corp.into(),
            dependent_id: String::new(),
            work_state: None,
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::unbounded(),
            record: json!({"parse_line_no": line, "client_id": "cl-9"}),
            custom_attributes: json!({}),
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn parse_error_summary_separates_orphans() {
        let errors = vec![
            parse_error(&[messages::DOB_PARSE]),
            parse_error(&[messages::CLIENT_ID_NO_MAPPING]),
            parse_error(&[messages::EMAIL, messages::PII_MISS]),
        ];
        assert_eq!(
            parse_error_line(&errors),
            "2 parse errors found, 1 orphan records found. "
        );
    }

    #[test]
    fn population_lines_count_assigned_members() {
        let data = PopulationData {
            population_id_used: 7,
            members: vec![
                (member("a", 1), Some(102)),
                (member("b", 2), Some(101)),
                (member("c", 3), None),
                (member("d", 4), Some(102)),
            ],
        };
        assert_eq!(
            population_lines(1, &data),
            vec![
                "Organization 1: total 4 members, sub population calculated based on population_id=7 - 1 does not has population".to_string(),
                "population 101 has 1 members".to_string(),
                "population 102 has 2 members".to_string(),
            ]
        );
    }

    #[test]
    fn csv_attachments_keep_headers_when_empty() {
        let empty: Vec<ReportNoPopError> = vec![];
        let bytes = to_csv(&NO_POP_COLUMNS, &empty).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "parse_line_no,client_id,customer_id,unique_corp_id,dependent_id\n"
        );

        let rows = vec![ReportNoPopError::from(&member("c3", 3))];
        let text = String::from_utf8(to_csv(&NO_POP_COLUMNS, &rows).unwrap()).unwrap();
        assert!(text.ends_with("3,cl-9,,c3,\n"));

        let errors = vec![ReportParseError::from(&parse_error(&[messages::DOB_PARSE]))];
        let text = String::from_utf8(to_csv(&ERROR_COLUMNS, &errors).unwrap()).unwrap();
        assert!(text.contains("1,4,c4,,"));
        assert!(text.contains("Couldn't parse DOB."));
    }

    #[test]
    fn file_line_reports_duration_or_failure() {
        let started = Utc::now();
        let mut file = File {
            id: -1,
            organization_id: 1,
            name: "dryrun/1_census.csv".into(),
            encoding: "utf-8".into(),
            error: None,
            raw_count: Some(3),
            success_count: Some(2),
            failure_count: Some(1),
            started_at: Some(started),
            completed_at: Some(started + Duration::milliseconds(61_500)),
            created_at: started,
        };
        assert_eq!(
            file_line(&file),
            "Dry run for file dryrun/1_census.csv takes 1 mins, 1.5 secs. 3 rows processed. 2 success rows, 1 error rows."
        );
        file.completed_at = None;
        assert!(file_line(&file).contains("not complete due to process errors"));
    }

    #[test]
    fn report_folder_uses_the_file_stem() {
        assert_eq!(report_folder("dryrun/12_census.csv"), "dryrun/reports/12_census");
        assert_eq!(report_folder("12_census"), "dryrun/reports/12_census");
    }
}
