//! Sub-population assignment.
//!
//! A population maps member attributes to a sub-population id through a nested
//! JSON map walked in `sub_pop_lookup_keys_csv` order.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{Member, Population};
use crate::store::{RecordStore, StoreResult};
use crate::utils::json::{lookup_path, scalar_key};

pub const IS_NULL_SENTINEL: &str = "ATTRIBUTE_IS_NULL";
pub const DEFAULT_CASE_SENTINEL: &str = "ATTRIBUTE_DEFAULT_CASE";

/// Top-level member field or a dotted path into `record` / `custom_attributes`.
pub fn member_attribute(member: &Member, key: &str) -> Option<Value> {
    let root = serde_json::to_value(member).ok()?;
    lookup_path(&root, key.trim())
}

/// Returns the sub-population id for the member, or `None` when unassigned.
pub fn resolve_sub_population(population: &Population, member: &Member) -> Option<i64> {
    let keys = population.lookup_keys();
    if keys.is_empty() {
        return None;
    }

    let mut node = &population.sub_pop_lookup_map_json;
    for key in &keys {
        let map = node.as_object()?;
        let map_key = member_attribute(member, key).and_then(|value| scalar_key(&value));

        node = match map_key {
            Some(value) => match map.get(&value) {
                Some(next) => next,
                None if population.advanced => map.get(DEFAULT_CASE_SENTINEL)?,
                None => return None,
            },
            None if population.advanced => map.get(IS_NULL_SENTINEL)?,
            None => return None,
        };

        if let Some(sub_population_id) = node.as_i64() {
            return Some(sub_population_id);
        }
    }
    None
}

/// The active population when there is one, otherwise the newest by `created_at`.
pub fn pick_effective(populations: Vec<Population>, now: DateTime<Utc>) -> Option<Population> {
    let (active, inactive): (Vec<Population>, Vec<Population>) = populations
        .into_iter()
        .partition(|population| population.is_active(now));
    let newest = |rows: Vec<Population>| {
        rows.into_iter()
            .max_by_key(|population| (population.created_at, population.id))
    };
    newest(active).or_else(|| newest(inactive))
}

pub async fn effective_population(
    store: &dyn RecordStore,
    organization_id: i64,
    now: DateTime<Utc>,
) -> StoreResult<Option<Population>> {
    let populations = store.populations_for_org(organization_id).await?;
    Ok(pick_effective(populations, now))
}

/// Parses the CSV of feature ids stored per feature type; blanks and junk are skipped.
pub fn parse_feature_ids(csv: &str) -> Vec<i64> {
    csv.split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};
    use serde_json::json;

    use super::*;
    use crate::domain::DateRange;

    fn population(keys: &str, map: Value, advanced: bool) -> Population {
        Population {
            id: 1,
            organization_id: 1,
            activated_at: Some(Utc::now() - Duration::days(1)),
            deactivated_at: None,
            sub_pop_lookup_keys_csv: keys.into(),
            sub_pop_lookup_map_json: map,
            advanced,
            created_at: Utc::now(),
        }
    }

    fn member(work_state: Option<&str>, custom_attributes: Value) -> Member {
        Member {
            id: 1,
            version: 0,
            is_v2: false,
            organization_id: 1,
            file_id: None,
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 6, 2).unwrap(),
            email: "jane@acme.com".into(),
            unique_corp_id: "c1".into(),
            dependent_id: String::new(),
            work_state: work_state.map(str::to_string),
            work_country: None,
            gender_code: None,
            do_not_contact: None,
            employer_assigned_id: None,
            effective_range: DateRange::unbounded(),
            record: json!({"wallet_enabled": true}),
            custom_attributes,
            hash_value: None,
            hash_version: None,
            pre_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn walks_the_lookup_map_in_key_order() {
        let pop = population(
            "work_state,custom_attributes.employment_status",
            json!({"NY": {"FT": 101, "PT": 102}, "CA": 103}),
            false,
        );
        assert_eq!(
            resolve_sub_population(&pop, &member(Some("NY"), json!({"employment_status": "PT"}))),
            Some(102)
        );
        // leaf reached before the path is consumed
        assert_eq!(
            resolve_sub_population(&pop, &member(Some("CA"), json!({}))),
            Some(103)
        );
        assert_eq!(
            resolve_sub_population(&pop, &member(Some("TX"), json!({}))),
            None
        );
    }

    #[test]
    fn booleans_and_sentinels_for_advanced_populations() {
        let pop = population(
            "record.wallet_enabled,work_state",
            json!({"true": {"ATTRIBUTE_IS_NULL": 5, "ATTRIBUTE_DEFAULT_CASE": 6, "NY": 7}}),
            true,
        );
        assert_eq!(resolve_sub_population(&pop, &member(None, json!({}))), Some(5));
        assert_eq!(resolve_sub_population(&pop, &member(Some("WA"), json!({}))), Some(6));
        assert_eq!(resolve_sub_population(&pop, &member(Some("NY"), json!({}))), Some(7));
    }

    #[test]
    fn plain_populations_ignore_sentinels() {
        let pop = population(
            "work_state",
            json!({"ATTRIBUTE_IS_NULL": 5, "ATTRIBUTE_DEFAULT_CASE": 6}),
            false,
        );
        assert_eq!(resolve_sub_population(&pop, &member(None, json!({}))), None);
        assert_eq!(resolve_sub_population(&pop, &member(Some("WA"), json!({}))), None);
    }

    #[test]
    fn default_case_never_applies_to_null() {
        let pop = population("work_state", json!({"ATTRIBUTE_DEFAULT_CASE": 6}), true);
        assert_eq!(resolve_sub_population(&pop, &member(None, json!({}))), None);
    }

    #[test]
    fn exhausted_path_without_leaf_is_unassigned() {
        let pop = population("work_state", json!({"NY": {"FT": 1}}), false);
        assert_eq!(resolve_sub_population(&pop, &member(Some("NY"), json!({}))), None);
    }

    #[test]
    fn effective_population_prefers_active_then_newest() {
        let now = Utc::now();
        let mut active = population("work_state", json!({}), false);
        active.id = 1;
        active.created_at = now - Duration::days(10);
        let mut newer = population("work_state", json!({}), false);
        newer.id = 2;
        newer.activated_at = None;
        newer.created_at = now;

        let picked = pick_effective(vec![active.clone(), newer.clone()], now).unwrap();
        assert_eq!(picked.id, 1);

        active.deactivated_at = Some(now - Duration::days(1));
        let picked = pick_effective(vec![active, newer], now).unwrap();
        assert_eq!(picked.id, 2);
        assert!(pick_effective(Vec::new(), now).is_none());
    }

    #[test]
    fn feature_csv_parses_integers() {
        assert_eq!(parse_feature_ids("1, 2,,x,3"), vec![1, 2, 3]);
        assert!(parse_feature_ids("").is_empty());
    }
}
