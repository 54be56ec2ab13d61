use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{
    Address, AddressFields, DateRange, EligibilityType, ExternalIdMapping, File, HeaderAlias,
    IdentitySnapshot, Member, MemberVerification, NewMember, Organization, ParseErrorRecord,
    Population, SubPopulation, Verification, Verification2, VerificationAttempt,
    VerificationType,
};
use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = configuration)]
#[diesel(primary_key(organization_id))]
pub struct ConfigurationRow {
    pub organization_id: i64,
    pub name: String,
    pub directory_name: String,
    pub data_provider: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub employee_only: bool,
    pub medical_plan_only: bool,
    pub eligibility_type: String,
    pub client_specific_implementation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConfigurationRow> for Organization {
    fn from(row: ConfigurationRow) -> Self {
        Self {
            id: row.organization_id,
            name: row.name,
            directory_name: row.directory_name,
            data_provider: row.data_provider,
            activated_at: row.activated_at,
            terminated_at: row.terminated_at,
            employee_only: row.employee_only,
            medical_plan_only: row.medical_plan_only,
            eligibility_type: EligibilityType::parse(&row.eligibility_type),
            client_specific_implementation: row.client_specific_implementation,
        }
    }
}

impl ConfigurationRow {
    pub fn from_domain(org: &Organization, now: DateTime<Utc>) -> Self {
        Self {
            organization_id: org.id,
            name: org.name.clone(),
            directory_name: org.directory_name.clone(),
            data_provider: org.data_provider,
            activated_at: org.activated_at,
            terminated_at: org.terminated_at,
            employee_only: org.employee_only,
            medical_plan_only: org.medical_plan_only,
            eligibility_type: org.eligibility_type.as_str().to_string(),
            client_specific_implementation: org.client_specific_implementation.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organization_external_id)]
pub struct ExternalIdRow {
    pub id: i64,
    pub source: Option<String>,
    pub external_id: String,
    pub data_provider_organization_id: Option<i64>,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organization_external_id)]
pub struct NewExternalIdRow {
    pub source: Option<String>,
    pub external_id: String,
    pub data_provider_organization_id: Option<i64>,
    pub organization_id: i64,
}

impl From<ExternalIdRow> for ExternalIdMapping {
    fn from(row: ExternalIdRow) -> Self {
        Self {
            id: row.id,
            source: row.source,
            external_id: row.external_id,
            data_provider_organization_id: row.data_provider_organization_id,
            organization_id: row.organization_id,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = header_alias)]
pub struct HeaderAliasRow {
    pub id: i64,
    pub organization_id: i64,
    pub header: String,
    pub alias: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = header_alias)]
pub struct NewHeaderAliasRow {
    pub organization_id: i64,
    pub header: String,
    pub alias: String,
}

impl From<HeaderAliasRow> for HeaderAlias {
    fn from(row: HeaderAliasRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            header: row.header,
            alias: row.alias,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = file)]
pub struct FileRow {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub encoding: String,
    pub error: Option<String>,
    pub raw_count: Option<i32>,
    pub success_count: Option<i32>,
    pub failure_count: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = file)]
pub struct NewFileRow {
    pub organization_id: i64,
    pub name: String,
    pub encoding: String,
}

impl From<FileRow> for File {
    fn from(row: FileRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            encoding: row.encoding,
            error: row.error,
            raw_count: row.raw_count,
            success_count: row.success_count,
            failure_count: row.failure_count,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = file_parse_errors)]
pub struct ParseErrorRow {
    pub id: i64,
    pub file_id: Option<i64>,
    pub organization_id: i64,
    pub record: Value,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = file_parse_errors)]
pub struct NewParseErrorRow {
    pub file_id: Option<i64>,
    pub organization_id: i64,
    pub record: Value,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl From<ParseErrorRow> for ParseErrorRecord {
    fn from(row: ParseErrorRow) -> Self {
        Self {
            id: row.id,
            file_id: row.file_id,
            organization_id: row.organization_id,
            record: row.record,
            errors: row.errors,
            warnings: row.warnings,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, QueryableByName, Identifiable)]
#[diesel(table_name = member_versioned)]
pub struct MemberVersionedRow {
    pub id: i64,
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_lower: Option<NaiveDate>,
    pub effective_upper: Option<NaiveDate>,
    pub record: Value,
    pub custom_attributes: Value,
    pub hash_value: Option<String>,
    pub hash_version: Option<i32>,
    pub pre_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MemberVersionedRow> for Member {
    fn from(row: MemberVersionedRow) -> Self {
        Self {
            id: row.id,
            version: 0,
            is_v2: false,
            organization_id: row.organization_id,
            file_id: row.file_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            email: row.email,
            unique_corp_id: row.unique_corp_id,
            dependent_id: row.dependent_id,
            work_state: row.work_state,
            work_country: row.work_country,
            gender_code: row.gender_code,
            do_not_contact: row.do_not_contact,
            employer_assigned_id: row.employer_assigned_id,
            effective_range: DateRange::new(row.effective_lower, row.effective_upper),
            record: row.record,
            custom_attributes: row.custom_attributes,
            hash_value: row.hash_value,
            hash_version: row.hash_version,
            pre_verified: row.pre_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = member_versioned)]
pub struct NewMemberVersionedRow {
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_lower: Option<NaiveDate>,
    pub effective_upper: Option<NaiveDate>,
    pub record: Value,
    pub custom_attributes: Value,
    pub hash_value: Option<String>,
    pub hash_version: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl NewMemberVersionedRow {
    pub fn from_domain(member: NewMember, now: DateTime<Utc>) -> Self {
        Self {
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
            effective_lower: member.effective_range.lower,
            effective_upper: member.effective_range.upper,
            record: member.record,
            custom_attributes: member.custom_attributes,
            hash_value: member.hash_value,
            hash_version: member.hash_version,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = member_versioned_historical)]
pub struct MemberHistoricalRow {
    pub id: i64,
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_lower: Option<NaiveDate>,
    pub effective_upper: Option<NaiveDate>,
    pub record: Value,
    pub custom_attributes: Value,
    pub hash_value: Option<String>,
    pub hash_version: Option<i32>,
    pub pre_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub purged_at: DateTime<Utc>,
}

impl MemberHistoricalRow {
    pub fn from_versioned(row: MemberVersionedRow, purged_at: DateTime<Utc>) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            file_id: row.file_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            email: row.email,
            unique_corp_id: row.unique_corp_id,
            dependent_id: row.dependent_id,
            work_state: row.work_state,
            work_country: row.work_country,
            gender_code: row.gender_code,
            do_not_contact: row.do_not_contact,
            employer_assigned_id: row.employer_assigned_id,
            effective_lower: row.effective_lower,
            effective_upper: row.effective_upper,
            record: row.record,
            custom_attributes: row.custom_attributes,
            hash_value: row.hash_value,
            hash_version: row.hash_version,
            pre_verified: row.pre_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
            purged_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, QueryableByName, Identifiable)]
#[diesel(table_name = member_2)]
pub struct Member2Row {
    pub id: i64,
    pub version: i32,
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_lower: Option<NaiveDate>,
    pub effective_upper: Option<NaiveDate>,
    pub record: Value,
    pub custom_attributes: Value,
    pub hash_value: Option<String>,
    pub hash_version: Option<i32>,
    pub pre_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Member2Row> for Member {
    fn from(row: Member2Row) -> Self {
        Self {
            id: row.id,
            version: row.version,
            is_v2: true,
            organization_id: row.organization_id,
            file_id: row.file_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            email: row.email,
            unique_corp_id: row.unique_corp_id,
            dependent_id: row.dependent_id,
            work_state: row.work_state,
            work_country: row.work_country,
            gender_code: row.gender_code,
            do_not_contact: row.do_not_contact,
            employer_assigned_id: row.employer_assigned_id,
            effective_range: DateRange::new(row.effective_lower, row.effective_upper),
            record: row.record,
            custom_attributes: row.custom_attributes,
            hash_value: row.hash_value,
            hash_version: row.hash_version,
            pre_verified: row.pre_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = member_2)]
pub struct NewMember2Row {
    pub organization_id: i64,
    pub file_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub email: String,
    pub unique_corp_id: String,
    pub dependent_id: String,
    pub work_state: Option<String>,
    pub work_country: Option<String>,
    pub gender_code: Option<String>,
    pub do_not_contact: Option<String>,
    pub employer_assigned_id: Option<String>,
    pub effective_lower: Option<NaiveDate>,
    pub effective_upper: Option<NaiveDate>,
    pub record: Value,
    pub custom_attributes: Value,
    pub hash_value: Option<String>,
    pub hash_version: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl From<NewMemberVersionedRow> for NewMember2Row {
    fn from(row: NewMemberVersionedRow) -> Self {
        Self {
            organization_id: row.organization_id,
            file_id: row.file_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            email: row.email,
            unique_corp_id: row.unique_corp_id,
            dependent_id: row.dependent_id,
            work_state: row.work_state,
            work_country: row.work_country,
            gender_code: row.gender_code,
            do_not_contact: row.do_not_contact,
            employer_assigned_id: row.employer_assigned_id,
            effective_lower: row.effective_lower,
            effective_upper: row.effective_upper,
            record: row.record,
            custom_attributes: row.custom_attributes,
            hash_value: row.hash_value,
            hash_version: row.hash_version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = address)]
pub struct AddressRow {
    pub id: i64,
    pub member_id: i64,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub postal_code_suffix: Option<String>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = address)]
pub struct NewAddressRow {
    pub member_id: i64,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub postal_code_suffix: Option<String>,
    pub country_code: Option<String>,
}

impl NewAddressRow {
    pub fn new(member_id: i64, fields: AddressFields) -> Self {
        Self {
            member_id,
            address_1: fields.address_1,
            address_2: fields.address_2,
            city: fields.city,
            state: fields.state,
            postal_code: fields.postal_code,
            postal_code_suffix: fields.postal_code_suffix,
            country_code: fields.country_code,
        }
    }
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: row.id,
            member_id: row.member_id,
            fields: AddressFields {
                address_1: row.address_1,
                address_2: row.address_2,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
                postal_code_suffix: row.postal_code_suffix,
                country_code: row.country_code,
            },
        }
    }
}

fn parse_verification_type(raw: &str) -> VerificationType {
    raw.parse().unwrap_or(VerificationType::Lookup)
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = verification)]
pub struct VerificationRow {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: i64,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub verified_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub verification_session: Option<Uuid>,
    pub verification_2_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<VerificationRow> for Verification {
    fn from(row: VerificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            verification_type: parse_verification_type(&row.verification_type),
            identity: IdentitySnapshot {
                unique_corp_id: row.unique_corp_id,
                dependent_id: row.dependent_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                work_state: row.work_state,
                date_of_birth: row.date_of_birth,
            },
            additional_fields: row.additional_fields,
            verified_at: row.verified_at,
            deactivated_at: row.deactivated_at,
            verification_session: row.verification_session,
            verification_2_id: row.verification_2_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = verification)]
pub struct NewVerificationRow {
    pub user_id: i64,
    pub organization_id: i64,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_session: Option<Uuid>,
    pub verification_2_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = verification_2)]
pub struct Verification2Row {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: i64,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub member_id: Option<i64>,
    pub member_version: Option<i32>,
    pub verified_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub verification_session: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Verification2Row> for Verification2 {
    fn from(row: Verification2Row) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            verification_type: parse_verification_type(&row.verification_type),
            identity: IdentitySnapshot {
                unique_corp_id: row.unique_corp_id,
                dependent_id: row.dependent_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                work_state: row.work_state,
                date_of_birth: row.date_of_birth,
            },
            additional_fields: row.additional_fields,
            member_id: row.member_id,
            member_version: row.member_version,
            verified_at: row.verified_at,
            deactivated_at: row.deactivated_at,
            verification_session: row.verification_session,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = verification_2)]
pub struct NewVerification2Row {
    pub user_id: i64,
    pub organization_id: i64,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub member_id: Option<i64>,
    pub member_version: Option<i32>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_session: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = verification_attempt)]
pub struct VerificationAttemptRow {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: Option<i64>,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub successful_verification: bool,
    pub verification_id: Option<i64>,
    pub policy_used: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationAttemptRow> for VerificationAttempt {
    fn from(row: VerificationAttemptRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            verification_type: parse_verification_type(&row.verification_type),
            identity: IdentitySnapshot {
                unique_corp_id: row.unique_corp_id,
                dependent_id: row.dependent_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                work_state: row.work_state,
                date_of_birth: row.date_of_birth,
            },
            additional_fields: row.additional_fields,
            successful_verification: row.successful_verification,
            verification_id: row.verification_id,
            policy_used: row.policy_used,
            verified_at: row.verified_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = verification_attempt)]
pub struct NewVerificationAttemptRow {
    pub user_id: i64,
    pub organization_id: Option<i64>,
    pub verification_type: String,
    pub unique_corp_id: Option<String>,
    pub dependent_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub work_state: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub additional_fields: Value,
    pub successful_verification: bool,
    pub verification_id: Option<i64>,
    pub policy_used: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = member_verification)]
pub struct MemberVerificationRow {
    pub id: i64,
    pub member_id: i64,
    pub verification_id: i64,
    pub verification_attempt_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<MemberVerificationRow> for MemberVerification {
    fn from(row: MemberVerificationRow) -> Self {
        Self {
            id: row.id,
            member_id: row.member_id,
            verification_id: row.verification_id,
            verification_attempt_id: row.verification_attempt_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = member_verification)]
pub struct NewMemberVerificationRow {
    pub member_id: i64,
    pub verification_id: i64,
    pub verification_attempt_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = population)]
pub struct PopulationRow {
    pub id: i64,
    pub organization_id: i64,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub sub_pop_lookup_keys_csv: String,
    pub sub_pop_lookup_map_json: Value,
    pub advanced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = population)]
pub struct NewPopulationRow {
    pub organization_id: i64,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub sub_pop_lookup_keys_csv: String,
    pub sub_pop_lookup_map_json: Value,
    pub advanced: bool,
}

impl From<PopulationRow> for Population {
    fn from(row: PopulationRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            activated_at: row.activated_at,
            deactivated_at: row.deactivated_at,
            sub_pop_lookup_keys_csv: row.sub_pop_lookup_keys_csv,
            sub_pop_lookup_map_json: row.sub_pop_lookup_map_json,
            advanced: row.advanced,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sub_population)]
pub struct SubPopulationRow {
    pub id: i64,
    pub population_id: i64,
    pub feature_set_name: String,
    pub feature_set_details_json: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sub_population)]
pub struct NewSubPopulationRow {
    pub population_id: i64,
    pub feature_set_name: String,
    pub feature_set_details_json: Value,
}

impl From<SubPopulationRow> for SubPopulation {
    fn from(row: SubPopulationRow) -> Self {
        let feature_set_details_json = match row.feature_set_details_json {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(csv) => Some((key, csv)),
                    Value::Number(number) => Some((key, number.to_string())),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            id: row.id,
            population_id: row.population_id,
            feature_set_name: row.feature_set_name,
            feature_set_details_json,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub status: String,
    pub run_after: DateTime<Utc>,
}
