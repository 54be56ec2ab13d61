//! Single-value converters applied to census cells.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Substituted for unknown dates of birth.
pub const DEFAULT_DATE_OF_BIRTH: NaiveDate = match NaiveDate::from_ymd_opt(1900, 1, 1) {
    Some(date) => date,
    None => NaiveDate::MIN,
};

/// `(M)M[-/. ](D)D[-/. ](YY)YY`, anything after the year is ignored.
static COMMON_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0?[1-9]|1[0-2])[\s/.-](0?[1-9]|[12][0-9]|3[01])[\s/.-](\d{4}|\d{2})(?:\D.*)?$")
        .unwrap_or_else(|err| panic!("invalid date pattern: {err}"))
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[\w!#$%&'*+/=?`{|}~^-]+(?:\.[\w!#$%&'*+/=?`{|}~^-]+)*@(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]+$",
    )
    .unwrap_or_else(|err| panic!("invalid email pattern: {err}"))
});

static SSN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-8]\d{2})(-?)(\d{2})(-?)(\d{4})$")
        .unwrap_or_else(|err| panic!("invalid ssn pattern: {err}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateValue {
    Date(NaiveDate),
    /// The `0001-01-01` placeholder some clients send.
    Unknown,
    Invalid,
}

fn windowed_year(two_digits: i32, today: NaiveDate) -> i32 {
    let century = today.year() - today.year() % 100;
    let tens = today.year() % 100;
    if two_digits > tens {
        century - 100 + two_digits
    } else {
        century + two_digits
    }
}

fn parse_relaxed(raw: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%Y.%m.%d"];
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.fZ"];

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|at| at.date())
        })
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|at| at.date_naive())
        })
}

/// Parses ISO-8601 and `mm/dd/yy(yy)`; two-digit years up to the current one
/// land in this century, the rest in the previous one.
pub fn to_date(raw: &str, today: NaiveDate) -> DateValue {
    let raw = raw.trim();
    if let Some(captures) = COMMON_DATE.captures(raw) {
        let number = |index: usize| {
            captures
                .get(index)
                .and_then(|group| group.as_str().parse::<i32>().ok())
        };
        let (Some(month), Some(day), Some(year)) = (number(1), number(2), number(3)) else {
            return DateValue::Invalid;
        };
        let year_digits = captures.get(3).map_or(0, |group| group.as_str().len());
        if year_digits == 4 && year == 1 && month == 1 && day == 1 {
            return DateValue::Unknown;
        }
        let year = if year_digits == 2 {
            windowed_year(year, today)
        } else {
            year
        };
        return NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .map_or(DateValue::Invalid, DateValue::Date);
    }

    match parse_relaxed(raw) {
        Some(date) if date == NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN) => {
            DateValue::Unknown
        }
        Some(date) => DateValue::Date(date),
        None => DateValue::Invalid,
    }
}

/// Lenient date parse for request fields and optional columns: blank,
/// unparseable or unknown dates are `None`.
pub fn parse_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    if raw.trim().is_empty() {
        return None;
    }
    match to_date(raw, today) {
        DateValue::Date(date) => Some(date),
        DateValue::Unknown | DateValue::Invalid => None,
    }
}

const TRUTHY: [&str; 4] = ["true", "1", "y", "yes"];

pub fn to_bool(raw: &str) -> bool {
    TRUTHY.contains(&raw.trim().to_lowercase().as_str())
}

const FAMILY_PLANS: [&str; 20] = [
    "dependents",
    "ee+children",
    "employee+child",
    "employee+child(ren)",
    "employee+child(ren)+domesticpartner",
    "employee+child(ren)+domesticpartner+dpchild(ren)",
    "employee+children",
    "employee+children+dpchildren",
    "employee+dependent",
    "employee+dependent(s)",
    "employee+dependents",
    "employee+domesticpartner",
    "employee+domesticpartner+children",
    "employee+spouse",
    "family",
    "you+child",
    "you+child(ren)",
    "you+children",
    "you+family",
    "you+spouse/dp",
];

/// Booleans plus coverage-tier phrases that imply dependents.
pub fn to_beneficiaries_enabled(raw: &str) -> bool {
    let compact: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    TRUTHY.contains(&compact.as_str()) || FAMILY_PLANS.contains(&compact.as_str())
}

pub fn to_can_get_pregnant(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "female" | "f" | "fe")
}

/// Normalizes free-form gender to `F`, `M`, `O` or `U`; unknown values pass
/// through unchanged and blanks become empty.
pub fn gender_code(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let code = match upper.as_str() {
        "" => "",
        "F" | "FEMALE" | "W" | "WOMAN" => "F",
        "M" | "MAN" | "MALE" => "M",
        "OTHER" | "O" | "NON-BINARY" | "NONBINARY" | "GENDERQUEER" | "GENDERFLUID" | "X" => "O",
        "UNKNOWN" | "U" | "NOT SPECIFIED" | "NOT DECLARED" | "UNDECLARED" | "UNSPECIFIED"
        | "D" | "DECLINE_TO_SELF_IDENTIFY" | "DECLINE TO SAY" => "U",
        _ => return raw.to_string(),
    };
    code.to_string()
}

/// Local part of at most 64 characters, one `@`, a dotted domain of at most 255.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    (1..=64).contains(&local.len())
        && (2..=255).contains(&domain.len())
        && EMAIL.is_match(email)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsnCheck {
    pub resembles_ssn: bool,
    /// Replacement for an id that looks like a hyphenated SSN.
    pub sanitized: Option<String>,
}

pub fn detect_possible_ssn(value: &str) -> SsnCheck {
    let Some(captures) = SSN.captures(value) else {
        return SsnCheck {
            resembles_ssn: false,
            sanitized: None,
        };
    };
    let group = |index: usize| captures.get(index).map_or("", |m| m.as_str());
    let area = group(1);
    let plausible =
        area != "000" && area != "666" && group(3) != "00" && group(5) != "0000";
    if !plausible {
        return SsnCheck {
            resembles_ssn: false,
            sanitized: None,
        };
    }

    let hyphenated = group(2) == "-" && group(4) == "-";
    SsnCheck {
        resembles_ssn: true,
        sanitized: hyphenated.then(|| hex::encode(Sha256::digest(value.as_bytes()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> DateValue {
        DateValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn parses_common_and_iso_dates() {
        assert_eq!(to_date("1985-06-02", today()), date(1985, 6, 2));
        assert_eq!(to_date("06/02/1985", today()), date(1985, 6, 2));
        assert_eq!(to_date("6-2-1985 00:00:00", today()), date(1985, 6, 2));
        assert_eq!(to_date("1985-06-02T10:11:12", today()), date(1985, 6, 2));
        assert_eq!(to_date("19850602", today()), date(1985, 6, 2));
    }

    #[test]
    fn two_digit_years_are_windowed() {
        assert_eq!(to_date("01/01/24", today()), date(2024, 1, 1));
        assert_eq!(to_date("01/01/25", today()), date(1925, 1, 1));
        assert_eq!(to_date("01/01/88", today()), date(1988, 1, 1));
    }

    #[test]
    fn unknown_and_garbage_dates() {
        assert_eq!(to_date("0001-01-01", today()), DateValue::Unknown);
        assert_eq!(to_date("01/01/0001", today()), DateValue::Unknown);
        assert_eq!(to_date("not a date", today()), DateValue::Invalid);
        assert_eq!(to_date("02/30/1990", today()), DateValue::Invalid);
        assert_eq!(parse_date("  ", today()), None);
        assert_eq!(parse_date("0001-01-01", today()), None);
    }

    #[test]
    fn boolean_converters() {
        assert!(to_bool("Yes"));
        assert!(to_bool("1"));
        assert!(!to_bool("no"));
        assert!(to_beneficiaries_enabled("Employee + Spouse"));
        assert!(to_beneficiaries_enabled("FAMILY"));
        assert!(!to_beneficiaries_enabled("employee only"));
        assert!(to_can_get_pregnant("Female"));
        assert!(!to_can_get_pregnant("M"));
    }

    #[test]
    fn gender_codes() {
        assert_eq!(gender_code("woman"), "F");
        assert_eq!(gender_code(" male "), "M");
        assert_eq!(gender_code("Non-Binary"), "O");
        assert_eq!(gender_code("decline to say"), "U");
        assert_eq!(gender_code(""), "");
        assert_eq!(gender_code("Z"), "Z");
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("jane.doe+x@acme.co.uk"));
        assert!(!is_valid_email("jane@@acme.com"));
        assert!(!is_valid_email("jane@acme"));
        assert!(is_valid_email(&format!("{}@acme.com", "a".repeat(64))));
        assert!(!is_valid_email(&format!("{}@acme.com", "a".repeat(65))));
    }

    #[test]
    fn ssn_like_ids() {
        let hyphenated = detect_possible_ssn("123-45-6789");
        assert!(hyphenated.resembles_ssn);
        assert_eq!(hyphenated.sanitized.as_ref().map(String::len), Some(64));

        let bare = detect_possible_ssn("123456789");
        assert!(bare.resembles_ssn);
        assert!(bare.sanitized.is_none());

        assert!(!detect_possible_ssn("000-45-6789").resembles_ssn);
        assert!(!detect_possible_ssn("E12345").resembles_ssn);
    }
}
