//! Content hashes identifying a member version within its organization.
//!
//! Both hashes are `<sha256 hex>,<organization_id>`. File rows get theirs at
//! parse time; rows that arrive without one are hashed by the dedup pass.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::{AddressFields, Member};

pub const HASH_VERSION: i32 = 2;

/// Suffix of the hash carried by the version that expires an identity.
pub const EXPIRED_SUFFIX: &str = ",expired";

const HEALTH_PLAN_KEY: &str = "health_plan_values";

/// Record keys stamped on stream rows by the sender; they must not change a hash.
const STREAM_RECORD_KEYS: [&str; 2] = ["received_ts", "mvn_batch_record_id"];

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn sorted_pairs<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> String {
    let mut pairs: Vec<String> = entries
        .map(|(key, value)| format!("{key}:{}", text(Some(value))))
        .collect();
    pairs.sort();
    format!("[{}]", pairs.join(", "))
}

fn finish(raw: &str, organization_id: i64) -> String {
    format!("{},{organization_id}", hex::encode(Sha256::digest(raw.as_bytes())))
}

/// Hash of a parsed census row. `fields` is the row after conversion, `record`
/// the copy that will be stored on the member.
pub fn file_record_hash(
    fields: &Map<String, Value>,
    record: &Map<String, Value>,
    custom_attributes: &Map<String, Value>,
    organization_id: i64,
) -> String {
    let field = |key: &str| text(fields.get(key));
    let custom = if custom_attributes.is_empty() {
        String::new()
    } else {
        sorted_pairs(
            custom_attributes
                .iter()
                .filter(|(key, _)| key.as_str() != HEALTH_PLAN_KEY),
        )
    };
    let health_plan = custom_attributes
        .get(HEALTH_PLAN_KEY)
        .and_then(Value::as_object)
        .filter(|values| !values.is_empty())
        .map(|values| sorted_pairs(values.iter()))
        .unwrap_or_default();

    let raw = [
        field("first_name"),
        field("last_name"),
        organization_id.to_string(),
        field("unique_corp_id"),
        field("date_of_birth"),
        field("state"),
        field("work_state"),
        field("country"),
        field("email"),
        field("dependent_id"),
        sorted_pairs(record.iter().filter(|(key, _)| key.as_str() != "file_id")),
        field("do_not_contact"),
        field("gender"),
        custom,
        health_plan,
    ]
    .join(",");
    finish(&raw, organization_id)
}

/// Hash of a stored member that arrived without one (stream-sourced rows).
pub fn member_hash(member: &Member, address: Option<&AddressFields>) -> String {
    let opt = |value: &Option<String>| value.clone().unwrap_or_default();
    let address_csv = address
        .map(|address| {
            [
                opt(&address.address_1),
                opt(&address.city),
                opt(&address.state),
                opt(&address.postal_code),
                opt(&address.address_2),
                opt(&address.postal_code_suffix),
                opt(&address.country_code),
            ]
            .join(",")
        })
        .unwrap_or_default();

    let record = match &member.record {
        Value::Object(map) => sorted_pairs(
            map.iter()
                .filter(|(key, _)| !STREAM_RECORD_KEYS.contains(&key.as_str())),
        ),
        _ => String::from("[]"),
    };
    let custom = match &member.custom_attributes {
        Value::Object(map) => sorted_pairs(map.iter()),
        _ => String::from("[]"),
    };
    let date = |date: Option<chrono::NaiveDate>| date.map(|d| d.to_string()).unwrap_or_default();

    let raw = [
        member.first_name.clone(),
        member.last_name.clone(),
        member.organization_id.to_string(),
        member.unique_corp_id.clone(),
        member.date_of_birth.to_string(),
        opt(&member.work_state),
        member.email.clone(),
        member.dependent_id.clone(),
        record,
        address_csv,
        opt(&member.do_not_contact),
        opt(&member.gender_code),
        opt(&member.employer_assigned_id),
        date(member.effective_range.upper),
        date(member.effective_range.lower),
        custom,
    ]
    .join(",");
    finish(&raw, member.organization_id)
}
