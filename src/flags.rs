//! Feature-flag evaluation.
//!
//! Flags are read on every call. `FlagSet` evaluates a JSON document where each
//! key maps to a boolean, `"*"`, or a list of organization ids.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde_json::Value;

pub const E9Y_2_WRITE: &str = "e9y_2_write";
pub const E9Y_2_READ: &str = "e9y_2_read";
pub const RELEASE_OVER_ELIGIBILITY: &str = "release_over_eligibility";
pub const ORGS_ENABLED_FOR_OVER_ELIGIBILITY: &str = "orgs_enabled_for_over_eligibility";
pub const OPTUM_CLIENT_ID_STRICT: &str = "optum_data_provider_client_id_strict";
pub const DISABLE_WRITE: &str = "e9y_disable_write";

pub trait FeatureFlags: Send + Sync {
    fn enabled(&self, key: &str) -> bool;

    fn enabled_for_org(&self, key: &str, organization_id: i64) -> bool;

    fn enabled_for_all_orgs(&self, key: &str, organization_ids: &[i64]) -> bool {
        !organization_ids.is_empty()
            && organization_ids
                .iter()
                .all(|id| self.enabled_for_org(key, *id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FlagValue {
    Bool(bool),
    Orgs(HashSet<i64>),
}

/// Flags parsed from the `FEATURE_FLAGS` document. Values can be swapped at runtime.
#[derive(Debug, Default)]
pub struct FlagSet {
    values: RwLock<HashMap<String, FlagValue>>,
}

impl FlagSet {
    pub fn from_json(raw: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(raw).context("FEATURE_FLAGS must be JSON")?;
        let Value::Object(entries) = document else {
            anyhow::bail!("FEATURE_FLAGS must be a JSON object");
        };

        let mut values = HashMap::new();
        for (key, value) in entries {
            let parsed = match value {
                Value::Bool(flag) => FlagValue::Bool(flag),
                Value::String(ref all) if all == "*" => FlagValue::Bool(true),
                Value::Array(items) => FlagValue::Orgs(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::Number(number) => number.as_i64(),
                            Value::String(text) => text.trim().parse().ok(),
                            _ => None,
                        })
                        .collect(),
                ),
                other => anyhow::bail!("unsupported value for flag {key}: {other}"),
            };
            values.insert(key, parsed);
        }

        Ok(Self {
            values: RwLock::new(values),
        })
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.write(key, FlagValue::Bool(value));
    }

    pub fn set_orgs(&self, key: &str, organization_ids: &[i64]) {
        self.write(key, FlagValue::Orgs(organization_ids.iter().copied().collect()));
    }

    fn write(&self, key: &str, value: FlagValue) {
        let mut guard = self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(key.to_string(), value);
    }

    fn read(&self, key: &str) -> Option<FlagValue> {
        let guard = self
            .values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(key).cloned()
    }
}

impl FeatureFlags for FlagSet {
    fn enabled(&self, key: &str) -> bool {
        match self.read(key) {
            Some(FlagValue::Bool(flag)) => flag,
            Some(FlagValue::Orgs(orgs)) => !orgs.is_empty(),
            None => false,
        }
    }

    fn enabled_for_org(&self, key: &str, organization_id: i64) -> bool {
        match self.read(key) {
            Some(FlagValue::Bool(flag)) => flag,
            Some(FlagValue::Orgs(orgs)) => orgs.contains(&organization_id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_boolean_and_org_scoped_flags() {
        let flags = FlagSet::from_json(
            r#"{"e9y_2_write": [1, "2"], "release_over_eligibility": true, "e9y_2_read": "*"}"#,
        )
        .unwrap();

        assert!(flags.enabled_for_org(E9Y_2_WRITE, 1));
        assert!(flags.enabled_for_org(E9Y_2_WRITE, 2));
        assert!(!flags.enabled_for_org(E9Y_2_WRITE, 3));
        assert!(flags.enabled(RELEASE_OVER_ELIGIBILITY));
        assert!(flags.enabled_for_org(E9Y_2_READ, 99));
        assert!(!flags.enabled(DISABLE_WRITE));
    }

    #[test]
    fn all_orgs_requires_every_org() {
        let flags = FlagSet::from_json(r#"{"orgs_enabled_for_over_eligibility": [1, 2]}"#).unwrap();
        assert!(flags.enabled_for_all_orgs(ORGS_ENABLED_FOR_OVER_ELIGIBILITY, &[1, 2]));
        assert!(!flags.enabled_for_all_orgs(ORGS_ENABLED_FOR_OVER_ELIGIBILITY, &[1, 3]));
        assert!(!flags.enabled_for_all_orgs(ORGS_ENABLED_FOR_OVER_ELIGIBILITY, &[]));
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(FlagSet::from_json("[]").is_err());
        assert!(FlagSet::from_json(r#"{"x": 1}"#).is_err());
    }

    #[test]
    fn values_can_be_overridden() {
        let flags = FlagSet::default();
        assert!(!flags.enabled(E9Y_2_WRITE));
        flags.set_orgs(E9Y_2_WRITE, &[5]);
        assert!(flags.enabled_for_org(E9Y_2_WRITE, 5));
        flags.set_bool(E9Y_2_WRITE, false);
        assert!(!flags.enabled_for_org(E9Y_2_WRITE, 5));
    }
}
