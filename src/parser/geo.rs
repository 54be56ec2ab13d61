//! Country and state canonicalization for census addresses.
//!
//! Countries resolve to ISO 3166-1 alpha-3; states resolve to the subdivision
//! suffix of their ISO 3166-2 code (`US-NY` -> `NY`).

/// Used for state lookups when the row carries no recognizable country.
pub const COUNTRY_DEFAULT: &str = "USA";

struct Country {
    alpha_2: &'static str,
    alpha_3: &'static str,
    names: &'static [&'static str],
}

const fn country(
    alpha_2: &'static str,
    alpha_3: &'static str,
    names: &'static [&'static str],
) -> Country {
    Country {
        alpha_2,
        alpha_3,
        names,
    }
}

static COUNTRIES: &[Country] = &[
    country("US", "USA", &["United States", "United States of America"]),
    country("CA", "CAN", &["Canada"]),
    country("MX", "MEX", &["Mexico"]),
    country("GB", "GBR", &["United Kingdom", "United Kingdom of Great Britain and Northern Ireland"]),
    country("IE", "IRL", &["Ireland"]),
    country("AU", "AUS", &["Australia"]),
    country("NZ", "NZL", &["New Zealand"]),
    country("DE", "DEU", &["Germany"]),
    country("FR", "FRA", &["France"]),
    country("ES", "ESP", &["Spain"]),
    country("PT", "PRT", &["Portugal"]),
    country("IT", "ITA", &["Italy"]),
    country("NL", "NLD", &["Netherlands"]),
    country("BE", "BEL", &["Belgium"]),
    country("CH", "CHE", &["Switzerland"]),
    country("AT", "AUT", &["Austria"]),
    country("SE", "SWE", &["Sweden"]),
    country("NO", "NOR", &["Norway"]),
    country("DK", "DNK", &["Denmark"]),
    country("FI", "FIN", &["Finland"]),
    country("PL", "POL", &["Poland"]),
    country("CZ", "CZE", &["Czechia", "Czech Republic"]),
    country("HU", "HUN", &["Hungary"]),
    country("RO", "ROU", &["Romania"]),
    country("GR", "GRC", &["Greece"]),
    country("TR", "TUR", &["Turkey", "Türkiye"]),
    country("IL", "ISR", &["Israel"]),
    country("AE", "ARE", &["United Arab Emirates"]),
    country("IN", "IND", &["India"]),
    country("PK", "PAK", &["Pakistan"]),
    country("CN", "CHN", &["China"]),
    country("HK", "HKG", &["Hong Kong"]),
    country("TW", "TWN", &["Taiwan"]),
    country("JP", "JPN", &["Japan"]),
    country("KR", "KOR", &["South Korea", "Korea, Republic of"]),
    country("SG", "SGP", &["Singapore"]),
    country("MY", "MYS", &["Malaysia"]),
    country("PH", "PHL", &["Philippines"]),
    country("TH", "THA", &["Thailand"]),
    country("VN", "VNM", &["Viet Nam", "Vietnam"]),
    country("ID", "IDN", &["Indonesia"]),
    country("BR", "BRA", &["Brazil"]),
    country("AR", "ARG", &["Argentina"]),
    country("CL", "CHL", &["Chile"]),
    country("CO", "COL", &["Colombia"]),
    country("PE", "PER", &["Peru"]),
    country("CR", "CRI", &["Costa Rica"]),
    country("DO", "DOM", &["Dominican Republic"]),
    country("JM", "JAM", &["Jamaica"]),
    country("ZA", "ZAF", &["South Africa"]),
    country("NG", "NGA", &["Nigeria"]),
    country("KE", "KEN", &["Kenya"]),
    country("EG", "EGY", &["Egypt"]),
    country("PR", "PRI", &["Puerto Rico"]),
    country("GU", "GUM", &["Guam"]),
    country("VI", "VIR", &["Virgin Islands, U.S.", "US Virgin Islands"]),
];

struct Subdivision {
    code: &'static str,
    name: &'static str,
}

const fn sub(code: &'static str, name: &'static str) -> Subdivision {
    Subdivision { code, name }
}

static SUBDIVISIONS: &[Subdivision] = &[
    sub("US-AL", "Alabama"),
    sub("US-AK", "Alaska"),
    sub("US-AZ", "Arizona"),
    sub("US-AR", "Arkansas"),
    sub("US-CA", "California"),
    sub("US-CO", "Colorado"),
    sub("US-CT", "Connecticut"),
    sub("US-DE", "Delaware"),
    sub("US-DC", "District of Columbia"),
    sub("US-FL", "Florida"),
    sub("US-GA", "Georgia"),
    sub("US-HI", "Hawaii"),
    sub("US-ID", "Idaho"),
    sub("US-IL", "Illinois"),
    sub("US-IN", "Indiana"),
    sub("US-IA", "Iowa"),
    sub("US-KS", "Kansas"),
    sub("US-KY", "Kentucky"),
    sub("US-LA", "Louisiana"),
    sub("US-ME", "Maine"),
    sub("US-MD", "Maryland"),
    sub("US-MA", "Massachusetts"),
    sub("US-MI", "Michigan"),
    sub("US-MN", "Minnesota"),
    sub("US-MS", "Mississippi"),
    sub("US-MO", "Missouri"),
    sub("US-MT", "Montana"),
    sub("US-NE", "Nebraska"),
    sub("US-NV", "Nevada"),
    sub("US-NH", "New Hampshire"),
    sub("US-NJ", "New Jersey"),
    sub("US-NM", "New Mexico"),
    sub("US-NY", "New York"),
    sub("US-NC", "North Carolina"),
    sub("US-ND", "North Dakota"),
    sub("US-OH", "Ohio"),
    sub("US-OK", "Oklahoma"),
    sub("US-OR", "Oregon"),
    sub("US-PA", "Pennsylvania"),
    sub("US-RI", "Rhode Island"),
    sub("US-SC", "South Carolina"),
    sub("US-SD", "South Dakota"),
    sub("US-TN", "Tennessee"),
    sub("US-TX", "Texas"),
    sub("US-UT", "Utah"),
    sub("US-VT", "Vermont"),
    sub("US-VA", "Virginia"),
    sub("US-WA", "Washington"),
    sub("US-WV", "West Virginia"),
    sub("US-WI", "Wisconsin"),
    sub("US-WY", "Wyoming"),
    sub("US-AS", "American Samoa"),
    sub("US-GU", "Guam"),
    sub("US-MP", "Northern Mariana Islands"),
    sub("US-PR", "Puerto Rico"),
    sub("US-UM", "United States Minor Outlying Islands"),
    sub("US-VI", "Virgin Islands, U.S."),
    sub("CA-AB", "Alberta"),
    sub("CA-BC", "British Columbia"),
    sub("CA-MB", "Manitoba"),
    sub("CA-NB", "New Brunswick"),
    sub("CA-NL", "Newfoundland and Labrador"),
    sub("CA-NS", "Nova Scotia"),
    sub("CA-NT", "Northwest Territories"),
    sub("CA-NU", "Nunavut"),
    sub("CA-ON", "Ontario"),
    sub("CA-PE", "Prince Edward Island"),
    sub("CA-QC", "Quebec"),
    sub("CA-SK", "Saskatchewan"),
    sub("CA-YT", "Yukon"),
    sub("MX-CMX", "Ciudad de México"),
    sub("MX-JAL", "Jalisco"),
    sub("MX-NLE", "Nuevo León"),
    sub("GB-ENG", "England"),
    sub("GB-NIR", "Northern Ireland"),
    sub("GB-SCT", "Scotland"),
    sub("GB-WLS", "Wales"),
    sub("AU-NSW", "New South Wales"),
    sub("AU-QLD", "Queensland"),
    sub("AU-VIC", "Victoria"),
    sub("AU-WA", "Western Australia"),
];

fn find_country(raw: &str) -> Option<&'static Country> {
    let needle = raw.trim();
    if needle.chars().count() < 2 {
        return None;
    }
    COUNTRIES.iter().find(|country| {
        country.alpha_2.eq_ignore_ascii_case(needle)
            || country.alpha_3.eq_ignore_ascii_case(needle)
            || country
                .names
                .iter()
                .any(|name| name.to_lowercase() == needle.to_lowercase())
    })
}

/// ISO alpha-3 for a code or English name.
pub fn to_country_code(raw: &str) -> Option<&'static str> {
    find_country(raw).map(|country| country.alpha_3)
}

/// Canonical state code within `country_alpha_3`, which falls back to
/// [`COUNTRY_DEFAULT`] when unknown. Two-letter inputs are treated as codes
/// of that country; longer inputs match a full ISO code or a name.
pub fn to_state_code(raw: &str, country_alpha_3: &str) -> Option<&'static str> {
    let needle = raw.trim();
    if needle.chars().count() < 2 {
        return None;
    }
    let country = COUNTRIES
        .iter()
        .find(|country| country.alpha_3 == country_alpha_3)
        .or_else(|| find_country(COUNTRY_DEFAULT))?;

    let found = if needle.chars().count() < 3 {
        let code = format!("{}-{}", country.alpha_2, needle.to_uppercase());
        SUBDIVISIONS.iter().find(|subdivision| subdivision.code == code)
    } else {
        let lowered = needle.to_lowercase();
        SUBDIVISIONS.iter().find(|subdivision| {
            subdivision.code.eq_ignore_ascii_case(needle) || subdivision.name.to_lowercase() == lowered
        })
    };

    found.and_then(|subdivision| subdivision.code.rsplit('-').next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countries_resolve_to_alpha_3() {
        assert_eq!(to_country_code("AU"), Some("AUS"));
        assert_eq!(to_country_code(" US"), Some("USA"));
        assert_eq!(to_country_code("usa"), Some("USA"));
        assert_eq!(to_country_code("United States of America"), Some("USA"));
        assert_eq!(to_country_code("US of A"), None);
        assert_eq!(to_country_code(""), None);
    }

    #[test]
    fn states_resolve_within_country() {
        for raw in ["OK", "Oklahoma", "US-OK", "ok", " ok"] {
            assert_eq!(to_state_code(raw, COUNTRY_DEFAULT), Some("OK"), "{raw}");
        }
        assert_eq!(to_state_code("New York", "USA"), Some("NY"));
        assert_eq!(to_state_code("ON", "CAN"), Some("ON"));
        assert_eq!(to_state_code("ON", "USA"), None);
        assert_eq!(to_state_code("N", "USA"), None);
        assert_eq!(to_state_code("Old York", "USA"), None);
    }

    #[test]
    fn unknown_country_uses_default_for_states() {
        assert_eq!(to_state_code("NY", "ZZZ"), Some("NY"));
    }
}
