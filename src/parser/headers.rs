//! Client header names to canonical column names.

use std::collections::HashMap;

use crate::domain::HeaderAlias;

/// Canonical column -> header a client sends when the organization configures nothing.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("date_of_birth", "date_of_birth"),
    ("email", "email"),
    ("unique_corp_id", "employee_id"),
    ("employer_assigned_id", "employer_assigned_id"),
    ("dependent_id", "dependent_id"),
    ("gender", "gender"),
    ("beneficiaries_enabled", "beneficiaries_enabled"),
    ("wallet_enabled", "wallet_enabled"),
    ("office_id", "office_id"),
    ("work_state", "work_state"),
    ("work_country", "work_country"),
    ("first_name", "employee_first_name"),
    ("last_name", "employee_last_name"),
    ("dependent_relationship_code", "dependent_relationship_code"),
    ("lob", "lob"),
    ("salary_tier", "salary_tier"),
    ("plan_carrier", "plan_carrier"),
    ("cobra_coverage", "cobra_coverage"),
    ("company_couple", "company_couple"),
    ("address_1", "address_1"),
    ("address_2", "address_2"),
    ("city", "city"),
    ("state", "state"),
    ("zip_code", "zip_code"),
    ("country", "country"),
];

pub const OPTIONAL_HEADERS: &[(&str, &str)] = &[("client_id", "client_id")];

/// Healthplan indicator columns; collected into `custom_attributes.health_plan_values`.
pub const HEALTH_PLAN_HEADERS: &[&str] = &[
    "maternity_indicator",
    "maternity_indicator_date",
    "delivery_indicator",
    "delivery_indicator_date",
    "fertility_indicator",
    "fertility_indicator_date",
    "p_and_p_indicator",
    "client_name",
];

pub const CUSTOM_ATTRIBUTE_PREFIX: &str = "custom_attributes.";

/// Lower-cased, trimmed, unquoted, single-line header cell.
pub fn sanitize_header(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    canonical_by_client: HashMap<String, String>,
}

impl HeaderMapping {
    /// Defaults overridden by the organization's configured aliases.
    pub fn for_organization(aliases: &[HeaderAlias]) -> Self {
        let mut client_by_canonical: HashMap<String, String> = DEFAULT_HEADERS
            .iter()
            .chain(OPTIONAL_HEADERS)
            .map(|(canonical, client)| (canonical.to_string(), client.to_string()))
            .collect();
        for alias in aliases {
            client_by_canonical.insert(alias.header.clone(), alias.alias.clone());
        }

        let canonical_by_client = client_by_canonical
            .into_iter()
            .map(|(canonical, client)| (sanitize_header(&client), canonical))
            .collect();
        Self {
            canonical_by_client,
        }
    }

    /// Canonical name of a header cell; unknown headers keep their sanitized form.
    /// Empty cells map to `None`.
    pub fn canonical(&self, raw: &str) -> Option<String> {
        let cleaned = sanitize_header(raw);
        if cleaned.is_empty() {
            return None;
        }
        Some(
            self.canonical_by_client
                .get(&cleaned)
                .cloned()
                .unwrap_or(cleaned),
        )
    }

    /// Canonical names for a whole header row, position-preserving. Trailing
    /// blank cells are dropped so that values under them count as extra fields.
    pub fn remap(&self, header_row: &[String]) -> Vec<Option<String>> {
        let mut columns: Vec<Option<String>> =
            header_row.iter().map(|cell| self.canonical(cell)).collect();
        while matches!(columns.last(), Some(None)) {
            columns.pop();
        }
        columns
    }
}

impl Default for HeaderMapping {
    fn default() -> Self {
        Self::for_organization(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(header: &str, alias: &str) -> HeaderAlias {
        HeaderAlias {
            id: 1,
            organization_id: 1,
            header: header.into(),
            alias: alias.into(),
        }
    }

    #[test]
    fn defaults_map_client_headers() {
        let mapping = HeaderMapping::default();
        assert_eq!(mapping.canonical("Employee_ID").as_deref(), Some("unique_corp_id"));
        assert_eq!(mapping.canonical(" \"EMPLOYEE_FIRST_NAME\" ").as_deref(), Some("first_name"));
        assert_eq!(mapping.canonical("client_id").as_deref(), Some("client_id"));
        assert_eq!(mapping.canonical("Favorite\r\nColor").as_deref(), Some("favorite  color"));
        assert_eq!(mapping.canonical("  "), None);
    }

    #[test]
    fn organization_aliases_override_defaults() {
        let mapping = HeaderMapping::for_organization(&[
            alias("unique_corp_id", "Member Number"),
            alias("custom_attributes.employment_status", "status"),
        ]);
        assert_eq!(mapping.canonical("member number").as_deref(), Some("unique_corp_id"));
        assert_eq!(
            mapping.canonical("STATUS").as_deref(),
            Some("custom_attributes.employment_status")
        );
        // the replaced default is now just an unknown column
        assert_eq!(mapping.canonical("employee_id").as_deref(), Some("employee_id"));
    }

    #[test]
    fn remap_drops_trailing_blank_headers_only() {
        let mapping = HeaderMapping::default();
        let header: Vec<String> = ["email", "", "employee_id", "", ""]
            .iter()
            .map(|cell| cell.to_string())
            .collect();
        assert_eq!(
            mapping.remap(&header),
            vec![Some("email".to_string()), None, Some("unique_corp_id".to_string())]
        );
    }
}
