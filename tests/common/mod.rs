use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use eligibility::config::AppConfig;
use eligibility::db::{self, PgPool};
use eligibility::domain::{
    DateRange, EligibilityType, Member, NewFile, NewMember, Organization,
};
use eligibility::dryrun::DryRunner;
use eligibility::engine::client_specific::ClientSpecificRegistry;
use eligibility::engine::EligibilityService;
use eligibility::flags::FlagSet;
use eligibility::ingest::Ingestor;
use eligibility::routes;
use eligibility::state::AppState;
use eligibility::storage::ObjectStorage;
use eligibility::store::{MemberSource, MemoryStore, RecordStore};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }
}

impl FakeStorage {
    pub async fn insert(&self, key: &str, body: &str) {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), body.as_bytes().to_vec());
    }

    #[allow(dead_code)]
    pub async fn text(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub flags: Arc<FlagSet>,
    pub storage: Arc<FakeStorage>,
    pub config: AppConfig,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::for_tests())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let flags = Arc::new(FlagSet::default());
        let storage = Arc::new(FakeStorage::default());
        let service = EligibilityService::new(
            store.clone(),
            flags.clone(),
            Arc::new(ClientSpecificRegistry::default()),
            &config,
        );
        let router = routes::create_router(AppState::new(config.clone(), service));
        Self {
            store,
            flags,
            storage,
            config,
            router,
        }
    }

    #[allow(dead_code)]
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.store.clone(),
            self.storage.clone(),
            self.flags.clone(),
            &self.config,
        )
    }

    #[allow(dead_code)]
    pub fn dry_runner(&self) -> DryRunner {
        DryRunner::new(
            self.store.clone(),
            self.storage.clone(),
            self.flags.clone(),
            &self.config,
        )
    }

    pub async fn organization(&self, id: i64) -> Organization {
        self.store
            .persist_organization(organization(id))
            .await
            .expect("persist organization")
    }

    #[allow(dead_code)]
    pub async fn member(&self, member: NewMember) -> Member {
        self.store
            .persist_members(MemberSource::Versioned, vec![member])
            .await
            .expect("persist member")
            .remove(0)
    }

    /// Uploads `body` under `name` and records the file row.
    #[allow(dead_code)]
    pub async fn upload(&self, organization_id: i64, name: &str, body: &str) -> i64 {
        self.storage.insert(name, body).await;
        self.store
            .persist_file(NewFile {
                organization_id,
                name: name.to_string(),
                encoding: "utf-8".to_string(),
            })
            .await
            .expect("persist file")
            .id
    }

    pub async fn rpc<T: Serialize + ?Sized>(
        &self,
        method: &str,
        payload: &T,
    ) -> Result<(StatusCode, Value)> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/rpc/{method}"))
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response");
        let status = response.status();
        let bytes = body_to_vec(response.into_body()).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .with_context(|| format!("{method} returned non-JSON body"))?
        };
        Ok((status, value))
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response");
        let status = response.status();
        let bytes = body_to_vec(response.into_body()).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }
}

pub fn organization(id: i64) -> Organization {
    Organization {
        id,
        name: format!("Org {id}"),
        directory_name: format!("org{id}"),
        data_provider: false,
        activated_at: Some(Utc::now() - Duration::days(30)),
        terminated_at: None,
        employee_only: false,
        medical_plan_only: false,
        eligibility_type: EligibilityType::Standard,
        client_specific_implementation: None,
    }
}

#[allow(dead_code)]
pub fn new_member(
    organization_id: i64,
    unique_corp_id: &str,
    (first_name, last_name): (&str, &str),
    date_of_birth: NaiveDate,
    email: &str,
) -> NewMember {
    NewMember {
        organization_id,
        file_id: Some(1),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        date_of_birth,
        email: email.to_string(),
        unique_corp_id: unique_corp_id.to_string(),
        dependent_id: String::new(),
        work_state: Some("NY".to_string()),
        work_country: Some("US".to_string()),
        gender_code: None,
        do_not_contact: None,
        employer_assigned_id: None,
        effective_range: DateRange::new(Some(Utc::now().date_naive() - Duration::days(10)), None),
        record: json!({}),
        custom_attributes: json!({}),
        hash_value: Some(format!("{organization_id}-{unique_corp_id}")),
        hash_version: Some(2),
    }
}

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid test date")
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Pool over `TEST_DATABASE_URL` with migrations applied and tables emptied;
/// `None` when the variable is unset.
#[allow(dead_code)]
pub async fn test_database() -> Result<Option<PgPool>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };
    let pool = db::init_pool_with_size(&database_url, 4)?;
    let prepared = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = prepared
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")??;
    Ok(Some(pool))
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE member_verification, verification_attempt, verification, verification_2, \
         address, member_2, member_versioned_historical, member_versioned, file_parse_errors, file, \
         header_alias, organization_external_id, sub_population, population, configuration, jobs \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
