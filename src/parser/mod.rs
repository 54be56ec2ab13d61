//! Census file parsing.
//!
//! Bytes are decoded, the delimiter sniffed and the header row remapped to
//! canonical names; [`CensusParser`] then yields [`ParsedBatch`]es of valid
//! member rows and per-row parse errors, one batch at a time.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::{AddressFields, DateRange, ExternalKey, NewMember, NewParseError, Organization};
use crate::ingest::hashing::{file_record_hash, HASH_VERSION};

pub mod convert;
pub mod decode;
pub mod geo;
pub mod headers;

use convert::{DateValue, DEFAULT_DATE_OF_BIRTH};
use headers::{HeaderMapping, CUSTOM_ATTRIBUTE_PREFIX, HEALTH_PLAN_HEADERS};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    #[error("file could not be decoded")]
    BadEncoding,
    #[error("no delimiter found in header row")]
    Delimiter,
    #[error("file is empty")]
    Empty,
}

impl FileError {
    /// Value stored in `file.error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadEncoding => "unknown",
            Self::Delimiter => "delimiter",
            Self::Empty => "unknown",
        }
    }
}

pub mod messages {
    pub const DOB_MISS: &str = "Missing DOB.";
    pub const DOB_PARSE: &str = "Couldn't parse DOB.";
    pub const DOB_UNKNOWN: &str = "Unknown date provided - 0001-01-01";
    pub const DOB_FUT: &str = "DOB in future.";
    pub const CORP_ID_MISS: &str = "Row missing 'unique_corp_id'.";
    pub const EMAIL: &str = "Bad email.";
    pub const PII_MISS: &str = "Missing required PII.";
    pub const EXTRA_FIELD: &str = "Row contains extra fields.";
    pub const CLIENT_ID_NO_MAPPING: &str = "Missing organization_external_id mapping for a client_id in row originating from a data provider";
    pub const BAD_ROW: &str = "Row could not be read.";

    pub const WARN_EMAIL: &str = "Null email provided.";
    pub const WARN_STATE: &str = "Unknown State.";
    pub const WARN_COUNTRY: &str = "Unknown Country.";
    pub const WARN_SSN: &str = "PK resembles SSN";
}

pub const SSN_MARKER: &str = "id-resembling-hyphenated-ssn";

/// Per-file inputs to row parsing.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub file_id: Option<i64>,
    pub organization: Organization,
    /// Sub-organization mapping when the file comes from a data provider.
    pub external_ids: HashMap<ExternalKey, i64>,
    pub no_dob_organizations: HashSet<i64>,
    /// When false, unmapped client ids in `optum*` provider files are not logged as errors.
    pub strict_client_id: bool,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub member: NewMember,
    pub address: Option<AddressFields>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub valid: Vec<ParsedRow>,
    pub errors: Vec<NewParseError>,
}

impl ParsedBatch {
    pub fn len(&self) -> usize {
        self.valid.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
enum RowOutcome {
    Valid(ParsedRow),
    Invalid(NewParseError),
}

/// Single-pass batch iterator over one census file.
pub struct CensusParser {
    context: ParseContext,
    columns: Vec<Option<String>>,
    records: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
    encoding: &'static str,
    batch_size: usize,
    parse_line_no: u64,
    logged_no_dob: HashSet<i64>,
}

impl CensusParser {
    pub fn new(
        bytes: &[u8],
        mapping: &HeaderMapping,
        context: ParseContext,
        batch_size: usize,
    ) -> Result<Self, FileError> {
        let (text, encoding) = decode::decode(bytes)?;
        let delimiter = decode::sniff_delimiter(&text)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(text.into_bytes()));
        let header_row = match reader.records().next() {
            Some(Ok(record)) => record.iter().map(str::to_string).collect::<Vec<_>>(),
            Some(Err(_)) => return Err(FileError::BadEncoding),
            None => return Err(FileError::Empty),
        };
        let columns = mapping.remap(&header_row);
        if columns.iter().flatten().count() < 2 {
            return Err(FileError::Delimiter);
        }

        Ok(Self {
            context,
            columns,
            records: reader.into_records(),
            encoding,
            batch_size: batch_size.max(1),
            parse_line_no: 0,
            logged_no_dob: HashSet::new(),
        })
    }

    pub fn encoding(&self) -> &'static str {
        self.encoding
    }

    fn parse_cells(&mut self, cells: Vec<String>) -> RowOutcome {
        self.parse_line_no += 1;
        let mut fields = Map::new();
        let mut extra = Vec::new();
        for (index, cell) in cells.into_iter().enumerate() {
            match self.columns.get(index) {
                Some(Some(column)) => {
                    fields.insert(column.clone(), Value::String(cell));
                }
                Some(None) => {}
                None => extra.push(cell),
            }
        }

        let mut outcome = self.parse_row(fields, &extra);
        let line = Value::from(self.parse_line_no);
        match &mut outcome {
            RowOutcome::Valid(row) => insert(&mut row.member.record, "parse_line_no", line),
            RowOutcome::Invalid(row) => insert(&mut row.record, "parse_line_no", line),
        }
        outcome
    }

    fn parse_row(&mut self, mut fields: Map<String, Value>, extra: &[String]) -> RowOutcome {
        let file_org = self.context.organization.id;
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        fields.insert("file_id".into(), self.context.file_id.map_or(Value::Null, Value::from));
        fields.insert("organization_id".into(), Value::from(file_org));

        if extra.iter().any(|cell| !cell.trim().is_empty()) {
            errors.push(messages::EXTRA_FIELD.into());
            return self.invalid(file_org, fields, errors, warnings);
        }

        let mut organization_id = file_org;
        if self.context.organization.data_provider {
            let client_id = non_empty(&fields, "client_id");
            let customer_id = non_empty(&fields, "customer_id");
            let mapped = match (&client_id, &customer_id) {
                (Some(client), Some(customer)) => self
                    .context
                    .external_ids
                    .get(&ExternalKey::Composite(client.clone(), customer.clone())),
                _ => None,
            }
            .or_else(|| {
                client_id
                    .as_ref()
                    .and_then(|client| self.context.external_ids.get(&ExternalKey::Client(client.clone())))
            })
            .copied();

            match mapped {
                Some(mapped) => {
                    organization_id = mapped;
                    fields.insert("organization_id".into(), Value::from(mapped));
                    fields.insert("data_provider_organization_id".into(), Value::from(file_org));
                }
                None => {
                    if self.context.organization.is_optum_provider() && !self.context.strict_client_id {
                        debug!(
                            file_id = ?self.context.file_id,
                            organization_id = file_org,
                            "unmapped client_id in optum data provider row"
                        );
                    } else {
                        error!(
                            file_id = ?self.context.file_id,
                            organization_id = file_org,
                            external_client_id = ?client_id,
                            external_customer_id = ?customer_id,
                            "received a record from data provider that did not have a mapped external client_id"
                        );
                    }
                    errors.push(messages::CLIENT_ID_NO_MAPPING.into());
                    return self.invalid(file_org, fields, errors, warnings);
                }
            }
        }

        apply_converters(&mut fields, self.context.today);
        let custom_attributes = extract_custom_attributes(&mut fields);

        if let Some(raw) = fields.get("email").map(|value| value_str(value).trim().to_string()) {
            if raw.is_empty() {
                warnings.push(messages::WARN_EMAIL.into());
            } else if !convert::is_valid_email(&raw) {
                errors.push(messages::EMAIL.into());
            }
            fields.insert("email".into(), Value::String(raw));
        }

        let no_dob = self.context.no_dob_organizations.contains(&organization_id);
        let raw_dob = fields.get("date_of_birth").map(value_str);
        let date_of_birth = if no_dob {
            if self.logged_no_dob.insert(organization_id) {
                info!(
                    file_id = ?self.context.file_id,
                    organization_id,
                    "received a file from an organization that doesn't send date_of_birth"
                );
            }
            match raw_dob.as_deref().map(|raw| convert::to_date(raw, self.context.today)) {
                Some(DateValue::Date(date)) => Some(date),
                _ => Some(DEFAULT_DATE_OF_BIRTH),
            }
        } else {
            match raw_dob.as_deref() {
                None => {
                    errors.push(messages::DOB_MISS.into());
                    None
                }
                Some(raw) if raw.trim().is_empty() => {
                    errors.push(messages::DOB_MISS.into());
                    None
                }
                Some(raw) => match convert::to_date(raw, self.context.today) {
                    DateValue::Invalid => {
                        errors.push(messages::DOB_PARSE.into());
                        None
                    }
                    DateValue::Unknown => {
                        warnings.push(messages::DOB_UNKNOWN.into());
                        Some(DEFAULT_DATE_OF_BIRTH)
                    }
                    DateValue::Date(date) if date > self.context.today => {
                        errors.push(messages::DOB_FUT.into());
                        Some(date)
                    }
                    DateValue::Date(date) => Some(date),
                },
            }
        };
        if let Some(date) = date_of_birth {
            fields.insert("date_of_birth".into(), Value::String(date.to_string()));
        }

        let unique_corp_id = fields
            .get("unique_corp_id")
            .map(|value| value_str(value).trim().to_string())
            .unwrap_or_default();
        if unique_corp_id.is_empty() {
            errors.push(messages::CORP_ID_MISS.into());
        }
        let ssn = convert::detect_possible_ssn(&unique_corp_id);
        if ssn.resembles_ssn {
            warnings.push(messages::WARN_SSN.into());
        }
        let unique_corp_id = ssn.sanitized.clone().unwrap_or(unique_corp_id);
        fields.insert("unique_corp_id".into(), Value::String(unique_corp_id.clone()));

        if !has_required_pii(&fields, no_dob) {
            errors.push(messages::PII_MISS.into());
        }

        canonicalize_geography(&mut fields, &mut warnings);

        if let Some(dependent_id) = fields.get("dependent_id").map(|v| value_str(v).trim().to_string()) {
            fields.insert("dependent_id".into(), Value::String(dependent_id));
        }

        if !errors.is_empty() {
            debug!(
                file_id = ?self.context.file_id,
                organization_id,
                errors = ?errors,
                "errors encountered during parsing"
            );
            return self.invalid(organization_id, fields, errors, warnings);
        }

        let mut record = fields.clone();
        let hash_value = file_record_hash(&fields, &record, &custom_attributes, organization_id);
        if ssn.sanitized.is_some() {
            record.insert(SSN_MARKER.into(), Value::Bool(true));
        }
        let gender_code = convert::gender_code(&string_field(&fields, "gender").unwrap_or_default());

        let address = address_fields(&fields);
        let member = NewMember {
            organization_id,
            file_id: self.context.file_id,
            first_name: string_field(&fields, "first_name").unwrap_or_default().trim().to_string(),
            last_name: string_field(&fields, "last_name").unwrap_or_default().trim().to_string(),
            date_of_birth: date_of_birth.unwrap_or(DEFAULT_DATE_OF_BIRTH),
            email: string_field(&fields, "email").unwrap_or_default(),
            unique_corp_id,
            dependent_id: string_field(&fields, "dependent_id").unwrap_or_default(),
            work_state: non_empty(&fields, "work_state"),
            work_country: non_empty(&fields, "work_country"),
            gender_code: Some(gender_code).filter(|code| !code.is_empty()),
            do_not_contact: non_empty(&fields, "do_not_contact"),
            employer_assigned_id: non_empty(&fields, "employer_assigned_id"),
            effective_range: DateRange::new(Some(self.context.today), None),
            record: Value::Object(record),
            custom_attributes: Value::Object(custom_attributes),
            hash_value: Some(hash_value),
            hash_version: Some(HASH_VERSION),
        };

        RowOutcome::Valid(ParsedRow {
            member,
            address,
            warnings,
        })
    }

    fn invalid(
        &self,
        organization_id: i64,
        fields: Map<String, Value>,
        errors: Vec<String>,
        warnings: Vec<String>,
    ) -> RowOutcome {
        RowOutcome::Invalid(NewParseError {
            file_id: self.context.file_id,
            organization_id,
            record: Value::Object(fields),
            errors,
            warnings,
        })
    }
}

impl Iterator for CensusParser {
    type Item = ParsedBatch;

    fn next(&mut self) -> Option<ParsedBatch> {
        let mut batch = ParsedBatch::default();
        while batch.len() < self.batch_size {
            let cells = match self.records.next() {
                None => break,
                Some(Ok(record)) => record.iter().map(str::to_string).collect::<Vec<_>>(),
                Some(Err(err)) => {
                    batch.errors.push(self.unreadable_row(&err.to_string()));
                    continue;
                }
            };
            if cells.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            match self.parse_cells(cells) {
                RowOutcome::Valid(row) => batch.valid.push(row),
                RowOutcome::Invalid(row) => batch.errors.push(row),
            }
        }
        (!batch.is_empty()).then_some(batch)
    }
}

impl CensusParser {
    /// A row the reader could not split still takes a line number and counts
    /// as an error.
    fn unreadable_row(&mut self, reason: &str) -> NewParseError {
        self.parse_line_no += 1;
        error!(
            file_id = ?self.context.file_id,
            parse_line_no = self.parse_line_no,
            error = reason,
            "unreadable census row"
        );
        let organization_id = self.context.organization.id;
        let mut record = Map::new();
        record.insert("file_id".into(), self.context.file_id.map_or(Value::Null, Value::from));
        record.insert("organization_id".into(), Value::from(organization_id));
        record.insert("parse_line_no".into(), Value::from(self.parse_line_no));
        NewParseError {
            file_id: self.context.file_id,
            organization_id,
            record: Value::Object(record),
            errors: vec![messages::BAD_ROW.into()],
            warnings: Vec::new(),
        }
    }

    /// Every remaining row in one batch.
    pub fn collect_all(self) -> ParsedBatch {
        self.fold(ParsedBatch::default(), |mut all, batch| {
            all.valid.extend(batch.valid);
            all.errors.extend(batch.errors);
            all
        })
    }
}

fn insert(target: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = target {
        map.insert(key.into(), value);
    }
}

fn value_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).map(value_str)
}

fn non_empty(fields: &Map<String, Value>, key: &str) -> Option<String> {
    string_field(fields, key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn apply_converters(fields: &mut Map<String, Value>, today: NaiveDate) {
    let bool_field = |fields: &mut Map<String, Value>, key: &str, to_bool: fn(&str) -> bool| {
        if let Some(raw) = string_field(fields, key) {
            fields.insert(key.into(), Value::Bool(to_bool(&raw)));
        }
    };
    bool_field(fields, "beneficiaries_enabled", convert::to_beneficiaries_enabled);
    bool_field(fields, "wallet_enabled", convert::to_bool);
    bool_field(fields, "cobra_coverage", convert::to_bool);
    bool_field(fields, "company_couple", convert::to_bool);

    if let Some(raw) = string_field(fields, "gender") {
        fields.insert("can_get_pregnant".into(), Value::Bool(convert::to_can_get_pregnant(&raw)));
    }
    for key in ["employee_start_date", "employee_eligibility_date"] {
        if let Some(raw) = string_field(fields, key) {
            let parsed = convert::parse_date(&raw, today)
                .map_or(Value::Null, |date| Value::String(date.to_string()));
            fields.insert(key.into(), parsed);
        }
    }
}

/// Pulls `custom_attributes.*` and healthplan columns out of the row.
fn extract_custom_attributes(fields: &mut Map<String, Value>) -> Map<String, Value> {
    let mut custom = Map::new();
    let custom_keys: Vec<String> = fields
        .keys()
        .filter(|key| key.starts_with(CUSTOM_ATTRIBUTE_PREFIX))
        .cloned()
        .collect();
    for key in custom_keys {
        if let Some(value) = fields.remove(&key) {
            custom.insert(key[CUSTOM_ATTRIBUTE_PREFIX.len()..].to_string(), value);
        }
    }

    let mut health_plan = Map::new();
    for key in HEALTH_PLAN_HEADERS {
        if let Some(value) = fields.remove(*key) {
            if !value_str(&value).trim().is_empty() {
                health_plan.insert(key.to_string(), value);
            }
        }
    }
    if !health_plan.is_empty() {
        custom.insert("health_plan_values".into(), Value::Object(health_plan));
    }
    custom
}

fn has_required_pii(fields: &Map<String, Value>, no_dob: bool) -> bool {
    let present = |key: &str| non_empty(fields, key).is_some();
    if no_dob {
        return ["email", "first_name", "last_name", "unique_corp_id"]
            .iter()
            .all(|key| present(*key));
    }
    present("email") || (present("first_name") && present("last_name"))
}

fn canonicalize_geography(fields: &mut Map<String, Value>, warnings: &mut Vec<String>) {
    let mut country_code = geo::COUNTRY_DEFAULT;
    if let Some(raw) = non_empty(fields, "country") {
        match geo::to_country_code(&raw) {
            Some(code) => {
                country_code = code;
                fields.insert("country".into(), Value::String(code.into()));
            }
            None => warnings.push(messages::WARN_COUNTRY.into()),
        }
    }

    let mut state = None;
    if let Some(raw) = non_empty(fields, "state") {
        match geo::to_state_code(&raw, country_code) {
            Some(code) => {
                state = Some(code);
                fields.insert("state".into(), Value::String(code.into()));
            }
            None => warnings.push(messages::WARN_STATE.into()),
        }
    }

    if let Some(raw) = non_empty(fields, "work_state") {
        if state == Some(raw.as_str()) {
            return;
        }
        match geo::to_state_code(&raw, country_code).or(state) {
            Some(code) => {
                fields.insert("work_state".into(), Value::String(code.into()));
            }
            None => warnings.push(messages::WARN_STATE.into()),
        }
    }
}

fn address_fields(fields: &Map<String, Value>) -> Option<AddressFields> {
    let address = AddressFields {
        address_1: non_empty(fields, "address_1"),
        address_2: non_empty(fields, "address_2"),
        city: non_empty(fields, "city"),
        state: non_empty(fields, "state"),
        postal_code: non_empty(fields, "zip_code"),
        postal_code_suffix: None,
        country_code: non_empty(fields, "country"),
    };
    (!address.is_empty()).then_some(address)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{EligibilityType, HeaderAlias};

    fn organization(id: i64, data_provider: bool, directory: &str) -> Organization {
        Organization {
            id,
            name: format!("Org {id}"),
            directory_name: directory.into(),
            data_provider,
            activated_at: Some(Utc::now()),
            terminated_at: None,
            employee_only: false,
            medical_plan_only: false,
            eligibility_type: EligibilityType::Standard,
            client_specific_implementation: None,
        }
    }

    fn context(organization: Organization) -> ParseContext {
        ParseContext {
            file_id: Some(10),
            organization,
            external_ids: HashMap::new(),
            no_dob_organizations: HashSet::from([484]),
            strict_client_id: false,
            today: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        }
    }

    fn parse(csv: &str, context: ParseContext) -> ParsedBatch {
        CensusParser::new(csv.as_bytes(), &HeaderMapping::default(), context, 100)
            .unwrap()
            .collect_all()
    }

    const HEADER: &str = "employee_first_name,employee_last_name,date_of_birth,employee_id,email,work_state";

    #[test]
    fn valid_row_becomes_a_hashed_member() {
        let batch = parse(
            &format!("{HEADER},gender,wallet_enabled\nTed,Lasso,01/02/1985, E1 ,ted@afc.com,New York,female,Y\n"),
            context(organization(1, false, "org1")),
        );
        assert!(batch.errors.is_empty(), "{:?}", batch.errors);
        let member = &batch.valid[0].member;
        assert_eq!(member.first_name, "Ted");
        assert_eq!(member.unique_corp_id, "E1");
        assert_eq!(member.date_of_birth, NaiveDate::from_ymd_opt(1985, 1, 2).unwrap());
        assert_eq!(member.work_state.as_deref(), Some("NY"));
        assert_eq!(member.gender_code.as_deref(), Some("F"));
        assert_eq!(member.file_id, Some(10));
        assert_eq!(member.hash_version, Some(2));
        assert!(member.hash_value.as_deref().unwrap().ends_with(",1"));
        assert_eq!(member.record["wallet_enabled"], Value::Bool(true));
        assert_eq!(member.record["can_get_pregnant"], Value::Bool(true));
        assert_eq!(member.record["date_of_birth"], "1985-01-02");
        assert_eq!(member.record["parse_line_no"], 1);
    }

    #[test]
    fn row_errors_carry_literal_messages_and_line_numbers() {
        let batch = parse(
            &format!(
                "{HEADER}\n\
                 A,B,,e1,a@b.com,\n\
                 A,B,garbage,e2,a@b.com,\n\
                 A,B,01/01/2030,e3,a@b.com,\n\
                 A,B,1980-01-01,,a@b.com,\n\
                 A,B,1980-01-01,e5,not-an-email,\n\
                 ,,1980-01-01,e6,,\n\
                 A,B,1980-01-01,e7,a@b.com,,surplus\n"
            ),
            context(organization(1, false, "org1")),
        );
        assert!(batch.valid.is_empty());
        let errors: Vec<(u64, Vec<String>)> = batch
            .errors
            .iter()
            .map(|e| (e.record["parse_line_no"].as_u64().unwrap(), e.errors.clone()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (1, vec![messages::DOB_MISS.to_string()]),
                (2, vec![messages::DOB_PARSE.to_string()]),
                (3, vec![messages::DOB_FUT.to_string()]),
                (4, vec![messages::CORP_ID_MISS.to_string()]),
                (5, vec![messages::EMAIL.to_string()]),
                (6, vec![messages::PII_MISS.to_string()]),
                (7, vec![messages::EXTRA_FIELD.to_string()]),
            ]
        );
        assert_eq!(batch.errors[5].warnings, vec![messages::WARN_EMAIL.to_string()]);
    }

    #[test]
    fn unreadable_rows_keep_their_line_and_count_as_errors() {
        let mut parser = CensusParser::new(
            format!("{HEADER}\nA,B,1980-01-01,e2,a@b.com,NY\n").as_bytes(),
            &HeaderMapping::default(),
            context(organization(1, false, "org1")),
            100,
        )
        .unwrap();
        let unreadable = parser.unreadable_row("record 1: invalid field");
        assert_eq!(unreadable.errors, vec![messages::BAD_ROW.to_string()]);
        assert_eq!(unreadable.record["parse_line_no"], 1);
        assert_eq!(unreadable.organization_id, 1);

        let batch = parser.collect_all();
        assert_eq!(batch.valid.len(), 1);
        assert_eq!(batch.valid[0].member.record["parse_line_no"], 2);
    }

    #[test]
    fn email_local_part_is_limited_to_64_characters() {
        let at_limit = format!("{}@acme.com", "a".repeat(64));
        let over_limit = format!("{}@acme.com", "a".repeat(65));
        let batch = parse(
            &format!(
                "{HEADER}\nA,B,1980-01-01,e1,{at_limit},NY\nA,B,1980-01-01,e2,{over_limit},NY\n"
            ),
            context(organization(1, false, "org1")),
        );
        assert_eq!(batch.valid.len(), 1);
        assert_eq!(batch.valid[0].member.email, at_limit);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].errors, vec![messages::EMAIL.to_string()]);
    }

    #[test]
    fn date_of_birth_today_is_valid_and_effective_today() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let batch = parse(
            &format!("{HEADER}\nA,B,2024-06-01,e1,a@b.com,NY\nA,B,2024-06-02,e2,b@b.com,NY\n"),
            context(organization(1, false, "org1")),
        );
        assert_eq!(batch.valid.len(), 1);
        let member = &batch.valid[0].member;
        assert_eq!(member.date_of_birth, today);
        assert!(member.effective_range.contains(today));
        assert_eq!(batch.errors[0].errors, vec![messages::DOB_FUT.to_string()]);
    }

    #[test]
    fn unknown_dob_is_substituted_with_a_warning() {
        let batch = parse(
            &format!("{HEADER}\nA,B,0001-01-01,e1,a@b.com,\n"),
            context(organization(1, false, "org1")),
        );
        let row = &batch.valid[0];
        assert_eq!(row.member.date_of_birth, DEFAULT_DATE_OF_BIRTH);
        assert_eq!(row.warnings, vec![messages::DOB_UNKNOWN.to_string()]);
    }

    #[test]
    fn organizations_without_dob_need_email_and_names() {
        let batch = parse(
            "employee_first_name,employee_last_name,employee_id,email\nA,B,e1,a@b.com\n,B,e2,b@b.com\n",
            context(organization(484, false, "nodob")),
        );
        assert_eq!(batch.valid.len(), 1);
        assert_eq!(batch.valid[0].member.date_of_birth, DEFAULT_DATE_OF_BIRTH);
        assert_eq!(batch.errors[0].errors, vec![messages::PII_MISS.to_string()]);
    }

    #[test]
    fn hyphenated_ssn_ids_are_replaced() {
        let batch = parse(
            &format!("{HEADER}\nA,B,1980-01-01,123-45-6789,a@b.com,\nA,B,1980-01-01,123456789,c@b.com,\n"),
            context(organization(1, false, "org1")),
        );
        let hashed = &batch.valid[0];
        assert_eq!(hashed.member.unique_corp_id.len(), 64);
        assert_eq!(hashed.member.record[SSN_MARKER], Value::Bool(true));
        assert_eq!(hashed.warnings, vec![messages::WARN_SSN.to_string()]);

        let bare = &batch.valid[1];
        assert_eq!(bare.member.unique_corp_id, "123456789");
        assert!(bare.member.record.get(SSN_MARKER).is_none());
        assert_eq!(bare.warnings, vec![messages::WARN_SSN.to_string()]);
    }

    #[test]
    fn geography_is_canonicalized_with_fallbacks() {
        let batch = parse(
            "employee_first_name,employee_last_name,date_of_birth,employee_id,email,state,work_state,country,address_1,zip_code\n\
             A,B,1980-01-01,e1,a@b.com,New York,Old York,United States,1 Main St,10001\n\
             A,B,1980-01-01,e2,b@b.com,Old York,,Mordor,,\n",
            context(organization(1, false, "org1")),
        );
        let first = &batch.valid[0];
        assert_eq!(first.member.work_state.as_deref(), Some("NY"));
        assert_eq!(first.member.record["country"], "USA");
        let address = first.address.as_ref().unwrap();
        assert_eq!(address.state.as_deref(), Some("NY"));
        assert_eq!(address.postal_code.as_deref(), Some("10001"));

        let second = &batch.valid[1];
        assert_eq!(second.member.record["country"], "Mordor");
        assert_eq!(
            second.warnings,
            vec![messages::WARN_COUNTRY.to_string(), messages::WARN_STATE.to_string()]
        );
    }

    #[test]
    fn custom_and_health_plan_attributes_are_nested() {
        let mapping = HeaderMapping::for_organization(&[HeaderAlias {
            id: 1,
            organization_id: 1,
            header: "custom_attributes.employment_status".into(),
            alias: "status".into(),
        }]);
        let batch = CensusParser::new(
            format!("{HEADER},status,maternity_indicator,client_name\nA,B,1980-01-01,e1,a@b.com,,FT,Y,\n").as_bytes(),
            &mapping,
            context(organization(1, false, "org1")),
            100,
        )
        .unwrap()
        .collect_all();
        let member = &batch.valid[0].member;
        assert_eq!(member.custom_attributes["employment_status"], "FT");
        assert_eq!(member.custom_attributes["health_plan_values"]["maternity_indicator"], "Y");
        assert!(member.custom_attributes["health_plan_values"].get("client_name").is_none());
        assert!(member.record.get("status").is_none());
    }

    #[test]
    fn data_provider_rows_are_rehomed_by_client_id() {
        let mut ctx = context(organization(50, true, "acme_provider"));
        ctx.external_ids = HashMap::from([
            (ExternalKey::Client("c-1".into()), 501),
            (ExternalKey::Composite("c-1".into(), "x".into()), 502),
        ]);
        let batch = parse(
            &format!("{HEADER},client_id,customer_id\nA,B,1980-01-01,e1,a@b.com,,c-1,\nA,B,1980-01-01,e2,b@b.com,,c-1,x\nA,B,1980-01-01,e3,c@b.com,,zzz,\n"),
            ctx,
        );
        assert_eq!(batch.valid[0].member.organization_id, 501);
        assert_eq!(batch.valid[0].member.record["data_provider_organization_id"], 50);
        assert_eq!(batch.valid[1].member.organization_id, 502);
        assert_eq!(batch.errors[0].errors, vec![messages::CLIENT_ID_NO_MAPPING.to_string()]);
        assert_eq!(batch.errors[0].organization_id, 50);
    }

    #[test]
    fn batches_respect_the_requested_size() {
        let rows: String = (0..5)
            .map(|i| format!("A,B,1980-01-01,e{i},a{i}@b.com,\n"))
            .collect();
        let parser = CensusParser::new(
            format!("{HEADER}\n{rows}").as_bytes(),
            &HeaderMapping::default(),
            context(organization(1, false, "org1")),
            2,
        )
        .unwrap();
        let sizes: Vec<usize> = parser.map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn identical_rows_hash_identically_across_files() {
        let csv = format!("{HEADER}\nA,B,1980-01-01,e1,a@b.com,NY\n");
        let first = parse(&csv, context(organization(1, false, "org1")));
        let mut other = context(organization(1, false, "org1"));
        other.file_id = Some(11);
        let second = parse(&csv, other);
        assert_eq!(
            first.valid[0].member.hash_value,
            second.valid[0].member.hash_value
        );
    }

    #[test]
    fn header_without_delimiter_is_rejected() {
        let err = CensusParser::new(
            b"just_one_column\nvalue\n",
            &HeaderMapping::default(),
            context(organization(1, false, "org1")),
            10,
        )
        .err();
        assert_eq!(err, Some(FileError::Delimiter));
    }
}
