//! Third-party eligibility checks for organizations that verify against an
//! external API instead of (or before) their census file.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSpecificMode {
    OnlyClientCheck,
    OnlyCensus,
    FallbackToCensus,
}

impl ClientSpecificMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ONLY_CLIENT_CHECK" => Some(Self::OnlyClientCheck),
            "ONLY_CENSUS" => Some(Self::OnlyCensus),
            "FALLBACK_TO_CENSUS" => Some(Self::FallbackToCensus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSpecificRequest {
    pub is_employee: bool,
    pub unique_corp_id: String,
    pub date_of_birth: NaiveDate,
    pub dependent_date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Error)]
pub enum ClientSpecificCallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("got non-JSON response from server")]
    Decode,
}

/// One external implementation. `Ok(None)` means the upstream said the person
/// is not eligible.
#[async_trait]
pub trait ClientSpecificAdapter: Send + Sync {
    async fn verify(
        &self,
        request: &ClientSpecificRequest,
    ) -> Result<Option<Map<String, Value>>, ClientSpecificCallError>;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckPayload<'a> {
    employee_id: &'a str,
    is_employee: bool,
    date_of_birth: String,
    dependent_date_of_birth: Option<String>,
}

/// JSON-over-HTTPS adapter. Non-success statuses count as "no match"; an
/// `insuranceType` of null or `Waive Medical` is ineligible.
pub struct HttpClientSpecificAdapter {
    client: Client,
    url: String,
}

const INELIGIBLE_INSURANCE: &str = "Waive Medical";

impl HttpClientSpecificAdapter {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

pub fn eligible_response(body: Map<String, Value>) -> Option<Map<String, Value>> {
    match body.get("insuranceType") {
        Some(Value::String(kind)) if kind != INELIGIBLE_INSURANCE => Some(body),
        _ => None,
    }
}

#[async_trait]
impl ClientSpecificAdapter for HttpClientSpecificAdapter {
    async fn verify(
        &self,
        request: &ClientSpecificRequest,
    ) -> Result<Option<Map<String, Value>>, ClientSpecificCallError> {
        let payload = CheckPayload {
            employee_id: &request.unique_corp_id,
            is_employee: request.is_employee,
            date_of_birth: request.date_of_birth.to_string(),
            dependent_date_of_birth: request.dependent_date_of_birth.map(|dob| dob.to_string()),
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "client specific check returned an error status");
            return Ok(None);
        }

        let body: Value = response.json().await?;
        match body {
            Value::Object(map) => Ok(eligible_response(map)),
            _ => Err(ClientSpecificCallError::Decode),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredAdapter {
    pub mode: ClientSpecificMode,
    pub adapter: Arc<dyn ClientSpecificAdapter>,
}

/// Adapters keyed by upper-cased implementation name (e.g. `MICROSOFT`).
#[derive(Clone, Default)]
pub struct ClientSpecificRegistry {
    adapters: HashMap<String, RegisteredAdapter>,
}

impl ClientSpecificRegistry {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.client_specific_timeout_secs))
            .build()?;

        let mut registry = Self::default();
        for (name, endpoint) in &config.client_specific {
            let Some(mode) = ClientSpecificMode::parse(&endpoint.mode) else {
                anyhow::bail!(
                    "unsupported client specific mode {} for {name}",
                    endpoint.mode
                );
            };
            info!(implementation = %name, ?mode, "registered client specific implementation");
            registry.register(
                name,
                mode,
                Arc::new(HttpClientSpecificAdapter::new(client.clone(), endpoint.url.clone())),
            );
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        implementation: &str,
        mode: ClientSpecificMode,
        adapter: Arc<dyn ClientSpecificAdapter>,
    ) {
        self.adapters.insert(
            implementation.trim().to_ascii_uppercase(),
            RegisteredAdapter { mode, adapter },
        );
    }

    pub fn get(&self, implementation: &str) -> Option<&RegisteredAdapter> {
        self.adapters.get(&implementation.trim().to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn waived_or_missing_insurance_is_ineligible() {
        assert!(eligible_response(body(json!({"insuranceType": "Waive Medical"}))).is_none());
        assert!(eligible_response(body(json!({"insuranceType": null}))).is_none());
        assert!(eligible_response(body(json!({"country": "US"}))).is_none());
        assert!(eligible_response(body(json!({"insuranceType": "Medical", "country": "US"}))).is_some());
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(
            ClientSpecificMode::parse("fallback_to_census"),
            Some(ClientSpecificMode::FallbackToCensus)
        );
        assert_eq!(ClientSpecificMode::parse("sometimes"), None);
    }

    #[test]
    fn payload_uses_upstream_field_names() {
        let payload = CheckPayload {
            employee_id: "123",
            is_employee: false,
            date_of_birth: "1980-01-01".into(),
            dependent_date_of_birth: Some("2010-02-03".into()),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["EmployeeId"], "123");
        assert_eq!(value["IsEmployee"], false);
        assert_eq!(value["DependentDateOfBirth"], "2010-02-03");
    }
}
