//! Diesel-backed `RecordStore`.
//!
//! Diesel is synchronous, so every call checks a connection out of the r2d2 pool
//! and runs on `spawn_blocking`. One call is one connection scope; multi-row writes
//! run inside `conn.transaction`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use diesel::upsert::excluded;
use tokio::task;

use super::{
    last_wins_by_key, latest_valid_per_identity, MemberCriteria, MemberSource, RecordStore,
    StoreError, StoreResult,
};
use crate::db::PgPool;
use crate::domain::{
    Address, CreatedVerification, ExternalIdMapping, File, FileCompletion, HeaderAlias,
    IdentitySnapshot, LinkedVerification, Member, MemberVerification, NewAddress,
    NewExternalIdMapping, NewFile, NewHeaderAlias, NewMember, NewMemberVerification,
    NewParseError, NewPopulation, NewSubPopulation, NewVerificationAttempt, OrgIdentity,
    Organization, ParseErrorRecord, Population, SubPopulation, Verification,
    VerificationAttempt, VerificationBundle, VerificationType,
};
use crate::models::{
    AddressRow, ConfigurationRow, ExternalIdRow, FileRow, HeaderAliasRow, Member2Row,
    MemberHistoricalRow, MemberVerificationRow, MemberVersionedRow, NewAddressRow,
    NewExternalIdRow, NewFileRow, NewHeaderAliasRow, NewMember2Row, NewMemberVerificationRow,
    NewMemberVersionedRow, NewParseErrorRow, NewPopulationRow, NewSubPopulationRow,
    NewVerification2Row, NewVerificationAttemptRow, NewVerificationRow, ParseErrorRow,
    PopulationRow, SubPopulationRow, Verification2Row, VerificationAttemptRow, VerificationRow,
};
use crate::schema::{
    address, configuration, file, file_parse_errors, header_alias, member_2, member_verification,
    member_versioned, member_versioned_historical, organization_external_id, population,
    sub_population, verification, verification_2, verification_attempt,
};

/// Rows per INSERT statement; keeps bind parameters under the protocol limit.
const INSERT_CHUNK: usize = 1_000;

sql_function!(fn lower(x: Text) -> Text);
sql_function!(fn btrim(x: Text) -> Text);
sql_function! {
    #[sql_name = "lower"]
    fn lower_nullable(x: Nullable<Text>) -> Nullable<Text>;
}
sql_function! {
    #[sql_name = "btrim"]
    fn btrim_nullable(x: Nullable<Text>) -> Nullable<Text>;
}

/// Applies `MemberCriteria` to a boxed select over either member table.
macro_rules! filter_members {
    ($table:ident, $criteria:expr) => {{
        let criteria: &MemberCriteria = $criteria;
        let mut query = $table::table.into_boxed::<Pg>();
        if let Some(organization_id) = criteria.organization_id {
            query = query.filter($table::organization_id.eq(organization_id));
        }
        if let Some(date_of_birth) = criteria.date_of_birth {
            query = query.filter($table::date_of_birth.eq(date_of_birth));
        }
        if let Some(email) = &criteria.email {
            query = query.filter(lower(btrim($table::email)).eq(email.to_lowercase()));
        }
        if let Some(first_name) = &criteria.first_name {
            query = query.filter(lower(btrim($table::first_name)).eq(first_name.to_lowercase()));
        }
        if let Some(last_name) = &criteria.last_name {
            query = query.filter(lower(btrim($table::last_name)).eq(last_name.to_lowercase()));
        }
        if let Some(work_state) = &criteria.work_state {
            query = query.filter(
                lower_nullable(btrim_nullable($table::work_state)).eq(work_state.to_lowercase()),
            );
        }
        if let Some(unique_corp_id) = &criteria.unique_corp_id {
            query = query.filter(
                lower(btrim($table::unique_corp_id)).eq(unique_corp_id.to_lowercase()),
            );
        }
        if let Some(dependent_id) = &criteria.dependent_id {
            query =
                query.filter(lower(btrim($table::dependent_id)).eq(dependent_id.to_lowercase()));
        }
        query
    }};
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<F, T>(&self, operation: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Pool(err.to_string()))?;
            operation(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn load_members(
    conn: &mut PgConnection,
    source: MemberSource,
    criteria: &MemberCriteria,
) -> QueryResult<Vec<Member>> {
    Ok(match source {
        MemberSource::Versioned => filter_members!(member_versioned, criteria)
            .load::<MemberVersionedRow>(conn)?
            .into_iter()
            .map(Member::from)
            .collect(),
        MemberSource::V2 => filter_members!(member_2, criteria)
            .load::<Member2Row>(conn)?
            .into_iter()
            .map(Member::from)
            .collect(),
    })
}

fn insert_versioned(
    conn: &mut PgConnection,
    rows: &[NewMemberVersionedRow],
) -> QueryResult<Vec<MemberVersionedRow>> {
    use crate::schema::member_versioned::dsl::*;

    diesel::insert_into(member_versioned)
        .values(rows)
        .on_conflict((organization_id, unique_corp_id, dependent_id, hash_value))
        .do_update()
        .set((
            file_id.eq(excluded(file_id)),
            first_name.eq(excluded(first_name)),
            last_name.eq(excluded(last_name)),
            date_of_birth.eq(excluded(date_of_birth)),
            email.eq(excluded(email)),
            work_state.eq(excluded(work_state)),
            work_country.eq(excluded(work_country)),
            gender_code.eq(excluded(gender_code)),
            do_not_contact.eq(excluded(do_not_contact)),
            employer_assigned_id.eq(excluded(employer_assigned_id)),
            effective_lower.eq(excluded(effective_lower)),
            effective_upper.eq(excluded(effective_upper)),
            record.eq(excluded(record)),
            custom_attributes.eq(excluded(custom_attributes)),
            hash_version.eq(excluded(hash_version)),
            updated_at.eq(excluded(updated_at)),
        ))
        .get_results(conn)
}

fn insert_member_2(
    conn: &mut PgConnection,
    rows: &[NewMember2Row],
) -> QueryResult<Vec<Member2Row>> {
    use crate::schema::member_2::dsl::*;

    diesel::insert_into(member_2)
        .values(rows)
        .on_conflict((organization_id, unique_corp_id, dependent_id))
        .do_update()
        .set((
            version.eq(version + 1),
            file_id.eq(excluded(file_id)),
            first_name.eq(excluded(first_name)),
            last_name.eq(excluded(last_name)),
            date_of_birth.eq(excluded(date_of_birth)),
            email.eq(excluded(email)),
            work_state.eq(excluded(work_state)),
            work_country.eq(excluded(work_country)),
            gender_code.eq(excluded(gender_code)),
            do_not_contact.eq(excluded(do_not_contact)),
            employer_assigned_id.eq(excluded(employer_assigned_id)),
            effective_lower.eq(excluded(effective_lower)),
            effective_upper.eq(excluded(effective_upper)),
            record.eq(excluded(record)),
            custom_attributes.eq(excluded(custom_attributes)),
            hash_value.eq(excluded(hash_value)),
            hash_version.eq(excluded(hash_version)),
            updated_at.eq(excluded(updated_at)),
        ))
        .get_results(conn)
}

fn identity_columns(identity: &IdentitySnapshot) -> IdentityColumns {
    IdentityColumns {
        unique_corp_id: identity.unique_corp_id.clone(),
        dependent_id: identity.dependent_id.clone(),
        first_name: identity.first_name.clone(),
        last_name: identity.last_name.clone(),
        email: identity.email.clone(),
        work_state: identity.work_state.clone(),
        date_of_birth: identity.date_of_birth,
    }
}

struct IdentityColumns {
    unique_corp_id: Option<String>,
    dependent_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    work_state: Option<String>,
    date_of_birth: Option<NaiveDate>,
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get_organization(&self, organization_id: i64) -> StoreResult<Option<Organization>> {
        self.run(move |conn| {
            Ok(configuration::table
                .find(organization_id)
                .first::<ConfigurationRow>(conn)
                .optional()?
                .map(Organization::from))
        })
        .await
    }

    async fn get_organizations(&self, organization_ids: &[i64]) -> StoreResult<Vec<Organization>> {
        let ids = organization_ids.to_vec();
        self.run(move |conn| {
            Ok(configuration::table
                .filter(configuration::organization_id.eq_any(ids))
                .order(configuration::organization_id.asc())
                .load::<ConfigurationRow>(conn)?
                .into_iter()
                .map(Organization::from)
                .collect())
        })
        .await
    }

    async fn all_organizations(&self) -> StoreResult<Vec<Organization>> {
        self.run(|conn| {
            Ok(configuration::table
                .order(configuration::organization_id.asc())
                .load::<ConfigurationRow>(conn)?
                .into_iter()
                .map(Organization::from)
                .collect())
        })
        .await
    }

    async fn data_provider_organizations(&self) -> StoreResult<Vec<Organization>> {
        self.run(|conn| {
            Ok(configuration::table
                .filter(configuration::data_provider.eq(true))
                .order(configuration::organization_id.asc())
                .load::<ConfigurationRow>(conn)?
                .into_iter()
                .map(Organization::from)
                .collect())
        })
        .await
    }

    async fn persist_organization(&self, organization: Organization) -> StoreResult<Organization> {
        self.run(move |conn| {
            let row = ConfigurationRow::from_domain(&organization, Utc::now());
            let saved: ConfigurationRow = diesel::insert_into(configuration::table)
                .values(&row)
                .on_conflict(configuration::organization_id)
                .do_update()
                .set(&row)
                .get_result(conn)?;
            Ok(Organization::from(saved))
        })
        .await
    }

    async fn external_id_mappings(
        &self,
        data_provider_organization_id: i64,
    ) -> StoreResult<Vec<ExternalIdMapping>> {
        self.run(move |conn| {
            Ok(organization_external_id::table
                .filter(
                    organization_external_id::data_provider_organization_id
                        .eq(data_provider_organization_id),
                )
                .load::<ExternalIdRow>(conn)?
                .into_iter()
                .map(ExternalIdMapping::from)
                .collect())
        })
        .await
    }

    async fn external_ids_by_value(
        &self,
        external_ids: &[String],
    ) -> StoreResult<Vec<ExternalIdMapping>> {
        let values = external_ids.to_vec();
        self.run(move |conn| {
            Ok(organization_external_id::table
                .filter(organization_external_id::external_id.eq_any(values))
                .load::<ExternalIdRow>(conn)?
                .into_iter()
                .map(ExternalIdMapping::from)
                .collect())
        })
        .await
    }

    async fn persist_external_id(
        &self,
        mapping: NewExternalIdMapping,
    ) -> StoreResult<ExternalIdMapping> {
        self.run(move |conn| {
            let row = NewExternalIdRow {
                source: mapping.source,
                external_id: mapping.external_id,
                data_provider_organization_id: mapping.data_provider_organization_id,
                organization_id: mapping.organization_id,
            };
            let saved: ExternalIdRow = diesel::insert_into(organization_external_id::table)
                .values(&row)
                .get_result(conn)?;
            Ok(ExternalIdMapping::from(saved))
        })
        .await
    }

    async fn header_aliases(&self, organization_id: i64) -> StoreResult<Vec<HeaderAlias>> {
        self.run(move |conn| {
            Ok(header_alias::table
                .filter(header_alias::organization_id.eq(organization_id))
                .order(header_alias::id.asc())
                .load::<HeaderAliasRow>(conn)?
                .into_iter()
                .map(HeaderAlias::from)
                .collect())
        })
        .await
    }

    async fn persist_header_alias(&self, alias: NewHeaderAlias) -> StoreResult<HeaderAlias> {
        self.run(move |conn| {
            let row = NewHeaderAliasRow {
                organization_id: alias.organization_id,
                header: alias.header,
                alias: alias.alias,
            };
            let saved: HeaderAliasRow = diesel::insert_into(header_alias::table)
                .values(&row)
                .on_conflict((header_alias::organization_id, header_alias::header))
                .do_update()
                .set((
                    header_alias::alias.eq(excluded(header_alias::alias)),
                    header_alias::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;
            Ok(HeaderAlias::from(saved))
        })
        .await
    }

    async fn persist_file(&self, new_file: NewFile) -> StoreResult<File> {
        self.run(move |conn| {
            let row = NewFileRow {
                organization_id: new_file.organization_id,
                name: new_file.name,
                encoding: new_file.encoding,
            };
            let saved: FileRow = diesel::insert_into(file::table)
                .values(&row)
                .get_result(conn)?;
            Ok(File::from(saved))
        })
        .await
    }

    async fn get_file(&self, file_id: i64) -> StoreResult<Option<File>> {
        self.run(move |conn| {
            Ok(file::table
                .find(file_id)
                .first::<FileRow>(conn)
                .optional()?
                .map(File::from))
        })
        .await
    }

    async fn mark_file_started(
        &self,
        file_id: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<File>> {
        self.run(move |conn| {
            Ok(diesel::update(file::table.find(file_id))
                .set((file::started_at.eq(Some(at)), file::updated_at.eq(Utc::now())))
                .get_result::<FileRow>(conn)
                .optional()?
                .map(File::from))
        })
        .await
    }

    async fn complete_file(
        &self,
        file_id: i64,
        completion: FileCompletion,
    ) -> StoreResult<Option<File>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                if let Some(encoding) = completion.encoding {
                    diesel::update(file::table.find(file_id))
                        .set(file::encoding.eq(encoding))
                        .execute(conn)?;
                }
                let updated = diesel::update(file::table.find(file_id))
                    .set((
                        file::raw_count.eq(Some(completion.raw_count)),
                        file::success_count.eq(Some(completion.success_count)),
                        file::failure_count.eq(Some(completion.failure_count)),
                        file::error.eq(completion.error),
                        file::completed_at.eq(completion.completed_at),
                        file::updated_at.eq(Utc::now()),
                    ))
                    .get_result::<FileRow>(conn)
                    .optional()?;
                Ok(updated.map(File::from))
            })
        })
        .await
    }

    async fn persist_parse_errors(&self, errors: Vec<NewParseError>) -> StoreResult<usize> {
        if errors.is_empty() {
            return Ok(0);
        }
        self.run(move |conn| {
            let rows: Vec<NewParseErrorRow> = errors
                .into_iter()
                .map(|error| NewParseErrorRow {
                    file_id: error.file_id,
                    organization_id: error.organization_id,
                    record: error.record,
                    errors: error.errors,
                    warnings: error.warnings,
                })
                .collect();
            let mut inserted = 0;
            for chunk in rows.chunks(INSERT_CHUNK) {
                inserted += diesel::insert_into(file_parse_errors::table)
                    .values(chunk)
                    .execute(conn)?;
            }
            Ok(inserted)
        })
        .await
    }

    async fn parse_errors_for_file(&self, file_id: i64) -> StoreResult<Vec<ParseErrorRecord>> {
        self.run(move |conn| {
            Ok(file_parse_errors::table
                .filter(file_parse_errors::file_id.eq(file_id))
                .order(file_parse_errors::id.asc())
                .load::<ParseErrorRow>(conn)?
                .into_iter()
                .map(ParseErrorRecord::from)
                .collect())
        })
        .await
    }

    async fn persist_members(
        &self,
        source: MemberSource,
        members: Vec<NewMember>,
    ) -> StoreResult<Vec<Member>> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        self.run(move |conn| {
            let now = Utc::now();
            conn.transaction(|conn| {
                let mut written = Vec::with_capacity(members.len());
                match source {
                    MemberSource::Versioned => {
                        // NULL hashes never conflict, so only hashed rows are deduplicated.
                        let (hashed, unhashed): (Vec<_>, Vec<_>) = members
                            .into_iter()
                            .partition(|member| member.hash_value.is_some());
                        let mut members = last_wins_by_key(hashed, |member| {
                            (member.org_identity(), member.hash_value.clone())
                        });
                        members.extend(unhashed);
                        let rows: Vec<NewMemberVersionedRow> = members
                            .into_iter()
                            .map(|member| NewMemberVersionedRow::from_domain(member, now))
                            .collect();
                        for chunk in rows.chunks(INSERT_CHUNK) {
                            written.extend(
                                insert_versioned(conn, chunk)?
                                    .into_iter()
                                    .map(Member::from),
                            );
                        }
                    }
                    MemberSource::V2 => {
                        let members = last_wins_by_key(members, NewMember::org_identity);
                        let rows: Vec<NewMember2Row> = members
                            .into_iter()
                            .map(|member| {
                                NewMember2Row::from(NewMemberVersionedRow::from_domain(member, now))
                            })
                            .collect();
                        for chunk in rows.chunks(INSERT_CHUNK) {
                            written.extend(
                                insert_member_2(conn, chunk)?
                                    .into_iter()
                                    .map(Member::from),
                            );
                        }
                    }
                }
                Ok(written)
            })
        })
        .await
    }

    async fn persist_addresses(&self, addresses: Vec<NewAddress>) -> StoreResult<usize> {
        if addresses.is_empty() {
            return Ok(0);
        }
        self.run(move |conn| {
            let addresses = last_wins_by_key(addresses, |address| address.member_id);
            let rows: Vec<NewAddressRow> = addresses
                .into_iter()
                .map(|address| NewAddressRow::new(address.member_id, address.fields))
                .collect();
            let mut written = 0;
            for chunk in rows.chunks(INSERT_CHUNK) {
                written += diesel::insert_into(address::table)
                    .values(chunk)
                    .on_conflict(address::member_id)
                    .do_update()
                    .set((
                        address::address_1.eq(excluded(address::address_1)),
                        address::address_2.eq(excluded(address::address_2)),
                        address::city.eq(excluded(address::city)),
                        address::state.eq(excluded(address::state)),
                        address::postal_code.eq(excluded(address::postal_code)),
                        address::postal_code_suffix.eq(excluded(address::postal_code_suffix)),
                        address::country_code.eq(excluded(address::country_code)),
                    ))
                    .execute(conn)?;
            }
            Ok(written)
        })
        .await
    }

    async fn address_for_member(&self, member_id: i64) -> StoreResult<Option<Address>> {
        self.run(move |conn| {
            Ok(address::table
                .filter(address::member_id.eq(member_id))
                .first::<AddressRow>(conn)
                .optional()?
                .map(Address::from))
        })
        .await
    }

    async fn get_member(
        &self,
        source: MemberSource,
        member_id: i64,
    ) -> StoreResult<Option<Member>> {
        self.run(move |conn| {
            Ok(match source {
                MemberSource::Versioned => member_versioned::table
                    .find(member_id)
                    .first::<MemberVersionedRow>(conn)
                    .optional()?
                    .map(Member::from),
                MemberSource::V2 => member_2::table
                    .find(member_id)
                    .first::<Member2Row>(conn)
                    .optional()?
                    .map(Member::from),
            })
        })
        .await
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
        let criteria = criteria.clone();
        self.run(move |conn| {
            let candidates = load_members(conn, source, &criteria)?;
            Ok(latest_valid_per_identity(candidates, today))
        })
        .await
    }

    async fn by_org_identity(
        &self,
        source: MemberSource,
        identity: &OrgIdentity,
    ) -> StoreResult<Option<Member>> {
        let identity = identity.clone();
        self.run(move |conn| {
            let member = match source {
                MemberSource::Versioned => member_versioned::table
                    .filter(member_versioned::organization_id.eq(identity.organization_id))
                    .filter(member_versioned::unique_corp_id.eq(&identity.unique_corp_id))
                    .filter(member_versioned::dependent_id.eq(&identity.dependent_id))
                    .order((
                        member_versioned::updated_at.desc(),
                        member_versioned::file_id.desc().nulls_last(),
                        member_versioned::id.desc(),
                    ))
                    .first::<MemberVersionedRow>(conn)
                    .optional()?
                    .map(Member::from),
                MemberSource::V2 => member_2::table
                    .filter(member_2::organization_id.eq(identity.organization_id))
                    .filter(member_2::unique_corp_id.eq(&identity.unique_corp_id))
                    .filter(member_2::dependent_id.eq(&identity.dependent_id))
                    .first::<Member2Row>(conn)
                    .optional()?
                    .map(Member::from),
            };
            Ok(member)
        })
        .await
    }

    async fn members_for_org(
        &self,
        source: MemberSource,
        organization_id: i64,
    ) -> StoreResult<Vec<Member>> {
        self.run(move |conn| {
            Ok(match source {
                MemberSource::Versioned => member_versioned::table
                    .filter(member_versioned::organization_id.eq(organization_id))
                    .order(member_versioned::id.asc())
                    .load::<MemberVersionedRow>(conn)?
                    .into_iter()
                    .map(Member::from)
                    .collect(),
                MemberSource::V2 => member_2::table
                    .filter(member_2::organization_id.eq(organization_id))
                    .order(member_2::id.asc())
                    .load::<Member2Row>(conn)?
                    .into_iter()
                    .map(Member::from)
                    .collect(),
            })
        })
        .await
    }

    async fn unhashed_members(&self, organization_id: i64) -> StoreResult<Vec<Member>> {
        self.run(move |conn| {
            Ok(member_versioned::table
                .filter(member_versioned::organization_id.eq(organization_id))
                .filter(member_versioned::hash_value.is_null())
                .order(member_versioned::id.asc())
                .load::<MemberVersionedRow>(conn)?
                .into_iter()
                .map(Member::from)
                .collect())
        })
        .await
    }

    async fn delete_members(&self, member_ids: &[i64]) -> StoreResult<usize> {
        let ids = member_ids.to_vec();
        self.run(move |conn| {
            let deleted = diesel::delete(
                member_versioned::table.filter(member_versioned::id.eq_any(ids)),
            )
            .execute(conn)?;
            Ok(deleted)
        })
        .await
    }

    async fn update_hash_values(
        &self,
        organization_id: i64,
        hashes: Vec<(i64, String)>,
    ) -> StoreResult<usize> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let candidate_hashes: Vec<String> =
                    hashes.iter().map(|(_, hash)| hash.clone()).collect();
                let mut taken: HashSet<String> = member_versioned::table
                    .filter(member_versioned::organization_id.eq(organization_id))
                    .filter(member_versioned::hash_value.eq_any(candidate_hashes))
                    .select(member_versioned::hash_value)
                    .load::<Option<String>>(conn)?
                    .into_iter()
                    .flatten()
                    .collect();

                let mut updated = 0;
                for (member_id, hash) in hashes {
                    if taken.contains(&hash) {
                        continue;
                    }
                    updated += diesel::update(member_versioned::table.find(member_id))
                        .set(member_versioned::hash_value.eq(Some(&hash)))
                        .execute(conn)?;
                    taken.insert(hash);
                }
                Ok(updated)
            })
        })
        .await
    }

    async fn move_to_historical(
        &self,
        member_ids: &[i64],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        if member_ids.is_empty() {
            return Ok(0);
        }
        let ids = member_ids.to_vec();
        self.run(move |conn| {
            conn.transaction(|conn| {
                let rows: Vec<MemberVersionedRow> = member_versioned::table
                    .filter(member_versioned::id.eq_any(&ids))
                    .load(conn)?;
                let historical: Vec<MemberHistoricalRow> = rows
                    .into_iter()
                    .map(|row| MemberHistoricalRow::from_versioned(row, at))
                    .collect();
                for chunk in historical.chunks(INSERT_CHUNK) {
                    diesel::insert_into(member_versioned_historical::table)
                        .values(chunk)
                        .on_conflict_do_nothing()
                        .execute(conn)?;
                }
                let moved = diesel::delete(
                    member_versioned::table.filter(member_versioned::id.eq_any(&ids)),
                )
                .execute(conn)?;
                Ok(moved)
            })
        })
        .await
    }

    async fn linked_member_ids(&self, member_ids: &[i64]) -> StoreResult<HashSet<i64>> {
        let ids = member_ids.to_vec();
        self.run(move |conn| {
            Ok(member_verification::table
                .filter(member_verification::member_id.eq_any(ids))
                .select(member_verification::member_id)
                .distinct()
                .load::<i64>(conn)?
                .into_iter()
                .collect())
        })
        .await
    }

    async fn other_user_ids_in_family(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<i64>> {
        self.run(move |conn| {
            let own_verifications: Vec<i64> = verification::table
                .filter(verification::user_id.eq(user_id))
                .filter(
                    verification::deactivated_at
                        .is_null()
                        .or(verification::deactivated_at.gt(now)),
                )
                .select(verification::id)
                .load(conn)?;
            if own_verifications.is_empty() {
                return Ok(Vec::new());
            }

            let families: HashSet<(i64, String)> = member_verification::table
                .inner_join(member_versioned::table)
                .filter(member_verification::verification_id.eq_any(own_verifications))
                .select((
                    member_versioned::organization_id,
                    member_versioned::unique_corp_id,
                ))
                .load::<(i64, String)>(conn)?
                .into_iter()
                .collect();
            if families.is_empty() {
                return Ok(Vec::new());
            }

            let organizations: Vec<i64> = families.iter().map(|(org, _)| *org).collect();
            let corp_ids: Vec<String> = families.iter().map(|(_, corp)| corp.clone()).collect();
            let related: Vec<(i64, String, i64)> = member_verification::table
                .inner_join(member_versioned::table)
                .inner_join(verification::table)
                .filter(member_versioned::organization_id.eq_any(organizations))
                .filter(member_versioned::unique_corp_id.eq_any(corp_ids))
                .filter(verification::user_id.ne(user_id))
                .filter(
                    verification::deactivated_at
                        .is_null()
                        .or(verification::deactivated_at.gt(now)),
                )
                .select((
                    member_versioned::organization_id,
                    member_versioned::unique_corp_id,
                    verification::user_id,
                ))
                .load(conn)?;

            let mut users: Vec<i64> = related
                .into_iter()
                .filter(|(org, corp, _)| families.contains(&(*org, corp.clone())))
                .map(|(_, _, user)| user)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            users.sort_unstable();
            Ok(users)
        })
        .await
    }

    async fn members_for_pre_verification(
        &self,
        organization_id: i64,
        file_id: Option<i64>,
        after_id: i64,
        limit: i64,
        today: NaiveDate,
    ) -> StoreResult<Vec<Member>> {
        self.run(move |conn| {
            let mut query = member_versioned::table
                .into_boxed::<Pg>()
                .filter(member_versioned::organization_id.eq(organization_id))
                .filter(member_versioned::id.gt(after_id))
                .filter(member_versioned::pre_verified.eq(false))
                .filter(
                    member_versioned::effective_lower
                        .is_null()
                        .or(member_versioned::effective_lower.le(today)),
                )
                .filter(
                    member_versioned::effective_upper
                        .is_null()
                        .or(member_versioned::effective_upper.gt(today)),
                )
                .filter(
                    member_versioned::id
                        .ne_all(member_verification::table.select(member_verification::member_id)),
                );
            if let Some(file_id) = file_id {
                query = query.filter(member_versioned::file_id.eq(file_id));
            }
            Ok(query
                .order(member_versioned::id.asc())
                .limit(limit)
                .load::<MemberVersionedRow>(conn)?
                .into_iter()
                .map(Member::from)
                .collect())
        })
        .await
    }

    async fn active_verifications_for_org(
        &self,
        organization_id: i64,
        types: &[VerificationType],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Verification>> {
        let type_names: Vec<String> = types.iter().map(|kind| kind.as_str().to_string()).collect();
        self.run(move |conn| {
            Ok(verification::table
                .filter(verification::organization_id.eq(organization_id))
                .filter(verification::verification_type.eq_any(type_names))
                .filter(
                    verification::deactivated_at
                        .is_null()
                        .or(verification::deactivated_at.gt(now)),
                )
                .order(verification::id.asc())
                .load::<VerificationRow>(conn)?
                .into_iter()
                .map(Verification::from)
                .collect())
        })
        .await
    }

    async fn link_pre_verified(
        &self,
        links: Vec<NewMemberVerification>,
        member_ids: &[i64],
    ) -> StoreResult<usize> {
        let ids = member_ids.to_vec();
        self.run(move |conn| {
            conn.transaction(|conn| {
                let rows: Vec<NewMemberVerificationRow> = links
                    .into_iter()
                    .map(|link| NewMemberVerificationRow {
                        member_id: link.member_id,
                        verification_id: link.verification_id,
                        verification_attempt_id: link.verification_attempt_id,
                    })
                    .collect();
                let mut created = 0;
                for chunk in rows.chunks(INSERT_CHUNK) {
                    created += diesel::insert_into(member_verification::table)
                        .values(chunk)
                        .on_conflict((
                            member_verification::member_id,
                            member_verification::verification_id,
                        ))
                        .do_nothing()
                        .execute(conn)?;
                }
                diesel::update(member_versioned::table.filter(member_versioned::id.eq_any(ids)))
                    .set(member_versioned::pre_verified.eq(true))
                    .execute(conn)?;
                Ok(created)
            })
        })
        .await
    }

    async fn create_verifications(
        &self,
        bundle: VerificationBundle,
    ) -> StoreResult<Vec<CreatedVerification>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let mut created = Vec::with_capacity(bundle.drafts.len());
                for draft in bundle.drafts {
                    let identity = identity_columns(&draft.identity);

                    let verification_2 = if draft.write_v2 {
                        let row = NewVerification2Row {
                            user_id: draft.user_id,
                            organization_id: draft.organization_id,
                            verification_type: draft.verification_type.as_str().to_string(),
                            unique_corp_id: identity.unique_corp_id.clone(),
                            dependent_id: identity.dependent_id.clone(),
                            first_name: identity.first_name.clone(),
                            last_name: identity.last_name.clone(),
                            email: identity.email.clone(),
                            work_state: identity.work_state.clone(),
                            date_of_birth: identity.date_of_birth,
                            additional_fields: draft.additional_fields.clone(),
                            member_id: draft.member_2.map(|(id, _)| id),
                            member_version: draft.member_2.map(|(_, version)| version),
                            verified_at: Some(draft.verified_at),
                            verification_session: draft.verification_session,
                        };
                        let saved: Verification2Row = diesel::insert_into(verification_2::table)
                            .values(&row)
                            .get_result(conn)?;
                        Some(saved)
                    } else {
                        None
                    };

                    let row = NewVerificationRow {
                        user_id: draft.user_id,
                        organization_id: draft.organization_id,
                        verification_type: draft.verification_type.as_str().to_string(),
                        unique_corp_id: identity.unique_corp_id.clone(),
                        dependent_id: identity.dependent_id.clone(),
                        first_name: identity.first_name.clone(),
                        last_name: identity.last_name.clone(),
                        email: identity.email.clone(),
                        work_state: identity.work_state.clone(),
                        date_of_birth: identity.date_of_birth,
                        additional_fields: draft.additional_fields.clone(),
                        verified_at: Some(draft.verified_at),
                        verification_session: draft.verification_session,
                        verification_2_id: verification_2.as_ref().map(|row| row.id),
                    };
                    let saved: VerificationRow = diesel::insert_into(verification::table)
                        .values(&row)
                        .get_result(conn)?;

                    let attempt = NewVerificationAttemptRow {
                        user_id: draft.user_id,
                        organization_id: Some(draft.organization_id),
                        verification_type: draft.verification_type.as_str().to_string(),
                        unique_corp_id: identity.unique_corp_id,
                        dependent_id: identity.dependent_id,
                        first_name: identity.first_name,
                        last_name: identity.last_name,
                        email: identity.email,
                        work_state: identity.work_state,
                        date_of_birth: identity.date_of_birth,
                        additional_fields: draft.additional_fields,
                        successful_verification: true,
                        verification_id: Some(saved.id),
                        policy_used: draft.policy_used,
                        verified_at: Some(draft.verified_at),
                    };
                    let attempt: VerificationAttemptRow =
                        diesel::insert_into(verification_attempt::table)
                            .values(&attempt)
                            .get_result(conn)?;

                    let member_verification = match draft.member_id {
                        Some(member_id) => {
                            let link = NewMemberVerificationRow {
                                member_id,
                                verification_id: saved.id,
                                verification_attempt_id: Some(attempt.id),
                            };
                            let link: MemberVerificationRow =
                                diesel::insert_into(member_verification::table)
                                    .values(&link)
                                    .get_result(conn)?;
                            Some(MemberVerification::from(link))
                        }
                        None => None,
                    };

                    created.push(CreatedVerification {
                        verification: Verification::from(saved),
                        verification_2: verification_2.map(Into::into),
                        attempt: VerificationAttempt::from(attempt),
                        member_verification,
                    });
                }
                Ok(created)
            })
        })
        .await
    }

    async fn create_failed_attempt(
        &self,
        attempt: NewVerificationAttempt,
    ) -> StoreResult<VerificationAttempt> {
        self.run(move |conn| {
            let identity = identity_columns(&attempt.identity);
            let row = NewVerificationAttemptRow {
                user_id: attempt.user_id,
                organization_id: attempt.organization_id,
                verification_type: attempt.verification_type.as_str().to_string(),
                unique_corp_id: identity.unique_corp_id,
                dependent_id: identity.dependent_id,
                first_name: identity.first_name,
                last_name: identity.last_name,
                email: identity.email,
                work_state: identity.work_state,
                date_of_birth: identity.date_of_birth,
                additional_fields: attempt.additional_fields,
                successful_verification: false,
                verification_id: None,
                policy_used: attempt.policy_used,
                verified_at: attempt.verified_at,
            };
            let saved: VerificationAttemptRow = diesel::insert_into(verification_attempt::table)
                .values(&row)
                .get_result(conn)?;
            Ok(VerificationAttempt::from(saved))
        })
        .await
    }

    async fn get_verification(&self, verification_id: i64) -> StoreResult<Option<Verification>> {
        self.run(move |conn| {
            Ok(verification::table
                .find(verification_id)
                .first::<VerificationRow>(conn)
                .optional()?
                .map(Verification::from))
        })
        .await
    }

    async fn deactivate_verification(
        &self,
        verification_id: i64,
        at: DateTime<Utc>,
        require_v2: bool,
    ) -> StoreResult<Option<Verification>> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let Some(existing) = verification::table
                    .find(verification_id)
                    .first::<VerificationRow>(conn)
                    .optional()?
                else {
                    return Ok(None);
                };

                let updated_v2 = match existing.verification_2_id {
                    Some(v2_id) => diesel::update(verification_2::table.find(v2_id))
                        .set(verification_2::deactivated_at.eq(Some(at)))
                        .execute(conn)?,
                    None => 0,
                };
                if require_v2 && updated_v2 == 0 {
                    return Err(StoreError::Missing(format!(
                        "verification_2 record not found for verification {verification_id}"
                    )));
                }

                let updated: VerificationRow = diesel::update(verification::table.find(verification_id))
                    .set((
                        verification::deactivated_at.eq(Some(at)),
                        verification::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)?;
                Ok(Some(Verification::from(updated)))
            })
        })
        .await
    }

    async fn verifications_for_user(&self, user_id: i64) -> StoreResult<Vec<LinkedVerification>> {
        self.run(move |conn| {
            let verifications: Vec<Verification> = verification::table
                .filter(verification::user_id.eq(user_id))
                .order(verification::id.asc())
                .load::<VerificationRow>(conn)?
                .into_iter()
                .map(Verification::from)
                .collect();
            if verifications.is_empty() {
                return Ok(Vec::new());
            }

            let v2_ids: Vec<i64> = verifications
                .iter()
                .filter_map(|row| row.verification_2_id)
                .collect();
            let v2_rows: HashMap<i64, _> = verification_2::table
                .filter(verification_2::id.eq_any(v2_ids))
                .load::<Verification2Row>(conn)?
                .into_iter()
                .map(|row| (row.id, crate::domain::Verification2::from(row)))
                .collect();

            let verification_ids: Vec<i64> = verifications.iter().map(|row| row.id).collect();
            let linked: Vec<(i64, MemberVersionedRow)> = member_verification::table
                .inner_join(member_versioned::table)
                .filter(member_verification::verification_id.eq_any(verification_ids))
                .select((
                    member_verification::verification_id,
                    member_versioned::all_columns,
                ))
                .load(conn)?;
            let mut members: HashMap<i64, Member> = HashMap::new();
            for (verification_id, row) in linked {
                let member = Member::from(row);
                let newer = members.get(&verification_id).map_or(true, |current| {
                    (current.updated_at, current.id) < (member.updated_at, member.id)
                });
                if newer {
                    members.insert(verification_id, member);
                }
            }

            let member_2_ids: Vec<i64> = v2_rows.values().filter_map(|row| row.member_id).collect();
            let members_2: HashMap<i64, Member> = member_2::table
                .filter(member_2::id.eq_any(member_2_ids))
                .load::<Member2Row>(conn)?
                .into_iter()
                .map(|row| (row.id, Member::from(row)))
                .collect();

            Ok(verifications
                .into_iter()
                .map(|verification| {
                    let verification_2 = verification
                        .verification_2_id
                        .and_then(|id| v2_rows.get(&id).cloned());
                    let member_2 = verification_2
                        .as_ref()
                        .and_then(|row| row.member_id)
                        .and_then(|id| members_2.get(&id).cloned());
                    LinkedVerification {
                        member: members.get(&verification.id).cloned(),
                        verification,
                        verification_2,
                        member_2,
                    }
                })
                .collect())
        })
        .await
    }

    async fn verification_links_for_member(
        &self,
        member_id: i64,
    ) -> StoreResult<Vec<MemberVerification>> {
        self.run(move |conn| {
            Ok(member_verification::table
                .filter(member_verification::member_id.eq(member_id))
                .order(member_verification::id.asc())
                .load::<MemberVerificationRow>(conn)?
                .into_iter()
                .map(MemberVerification::from)
                .collect())
        })
        .await
    }

    async fn populations_for_org(&self, organization_id: i64) -> StoreResult<Vec<Population>> {
        self.run(move |conn| {
            Ok(population::table
                .filter(population::organization_id.eq(organization_id))
                .order(population::id.asc())
                .load::<PopulationRow>(conn)?
                .into_iter()
                .map(Population::from)
                .collect())
        })
        .await
    }

    async fn get_population(&self, population_id: i64) -> StoreResult<Option<Population>> {
        self.run(move |conn| {
            Ok(population::table
                .find(population_id)
                .first::<PopulationRow>(conn)
                .optional()?
                .map(Population::from))
        })
        .await
    }

    async fn persist_population(&self, new_population: NewPopulation) -> StoreResult<Population> {
        self.run(move |conn| {
            let row = NewPopulationRow {
                organization_id: new_population.organization_id,
                activated_at: new_population.activated_at,
                deactivated_at: new_population.deactivated_at,
                sub_pop_lookup_keys_csv: new_population.sub_pop_lookup_keys_csv,
                sub_pop_lookup_map_json: new_population.sub_pop_lookup_map_json,
                advanced: new_population.advanced,
            };
            let saved: PopulationRow = diesel::insert_into(population::table)
                .values(&row)
                .get_result(conn)?;
            Ok(Population::from(saved))
        })
        .await
    }

    async fn sub_populations(&self, population_id: i64) -> StoreResult<Vec<SubPopulation>> {
        self.run(move |conn| {
            Ok(sub_population::table
                .filter(sub_population::population_id.eq(population_id))
                .order(sub_population::id.asc())
                .load::<SubPopulationRow>(conn)?
                .into_iter()
                .map(SubPopulation::from)
                .collect())
        })
        .await
    }

    async fn get_sub_population(
        &self,
        sub_population_id: i64,
    ) -> StoreResult<Option<SubPopulation>> {
        self.run(move |conn| {
            Ok(sub_population::table
                .find(sub_population_id)
                .first::<SubPopulationRow>(conn)
                .optional()?
                .map(SubPopulation::from))
        })
        .await
    }

    async fn persist_sub_population(
        &self,
        new_sub_population: NewSubPopulation,
    ) -> StoreResult<SubPopulation> {
        self.run(move |conn| {
            let details = serde_json::to_value(&new_sub_population.feature_set_details_json)
                .map_err(|err| StoreError::Missing(format!("invalid feature set details: {err}")))?;
            let row = NewSubPopulationRow {
                population_id: new_sub_population.population_id,
                feature_set_name: new_sub_population.feature_set_name,
                feature_set_details_json: details,
            };
            let saved: SubPopulationRow = diesel::insert_into(sub_population::table)
                .values(&row)
                .get_result(conn)?;
            Ok(SubPopulation::from(saved))
        })
        .await
    }
}
