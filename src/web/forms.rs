//! Form field parsing and per-field validation messages.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::school_year::{parse_date_ymd, parse_school_year};

/// Validation messages keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeMap<String, String>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message; the first message for a field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Trimmed value, or `None` when blank.
pub fn optional(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Trimmed non-empty value; records "champ obligatoire" otherwise.
pub fn required(errors: &mut FormErrors, field: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.add(field, "Ce champ est obligatoire.");
    }
    trimmed.to_string()
}

/// Integer ≥ 0. Blank yields `default`.
pub fn non_negative_int(errors: &mut FormErrors, field: &str, raw: &str, default: i64) -> i64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<i64>() {
        Ok(n) if n >= 0 => n,
        _ => {
            errors.add(field, "Entrez un nombre entier positif ou nul.");
            default
        }
    }
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Decimal strictly greater than zero. Accepts a comma separator.
pub fn positive_decimal(errors: &mut FormErrors, field: &str, raw: &str, default: f64) -> f64 {
    if raw.trim().is_empty() {
        return default;
    }
    match parse_decimal(raw) {
        Some(v) if v > 0.0 => v,
        _ => {
            errors.add(field, "Entrez un nombre strictement positif.");
            default
        }
    }
}

/// Optional decimal strictly greater than zero.
pub fn optional_positive_decimal(errors: &mut FormErrors, field: &str, raw: &str) -> Option<f64> {
    if raw.trim().is_empty() {
        return None;
    }
    match parse_decimal(raw) {
        Some(v) if v > 0.0 => Some(v),
        _ => {
            errors.add(field, "Entrez un nombre strictement positif.");
            None
        }
    }
}

/// Optional decimal ≥ 0.
pub fn optional_non_negative_decimal(
    errors: &mut FormErrors,
    field: &str,
    raw: &str,
) -> Option<f64> {
    if raw.trim().is_empty() {
        return None;
    }
    match parse_decimal(raw) {
        Some(v) if v >= 0.0 => Some(v),
        _ => {
            errors.add(field, "Entrez un nombre positif ou nul.");
            None
        }
    }
}

/// Optional `YYYY-MM-DD` date.
pub fn optional_date(errors: &mut FormErrors, field: &str, raw: &str) -> Option<NaiveDate> {
    if raw.trim().is_empty() {
        return None;
    }
    let parsed = parse_date_ymd(raw);
    if parsed.is_none() {
        errors.add(field, "Date invalide (format AAAA-MM-JJ).");
    }
    parsed
}

/// `YYYY-YYYY` with consecutive years.
pub fn school_year(errors: &mut FormErrors, field: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.add(field, "Ce champ est obligatoire.");
    } else if parse_school_year(trimmed).is_none() {
        errors.add(field, "Année scolaire invalide (format AAAA-AAAA, années consécutives).");
    }
    trimmed.to_string()
}

/// Checkbox fields are present only when ticked.
pub fn checked(raw: &Option<String>) -> bool {
    raw.as_deref().is_some_and(|v| !v.is_empty() && v != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_flags_blank() {
        let mut errors = FormErrors::new();
        assert_eq!(required(&mut errors, "nom", "  6e A "), "6e A");
        assert!(errors.is_empty());
        required(&mut errors, "nom", "   ");
        assert!(errors.get("nom").is_some());
    }

    #[test]
    fn capacity_must_be_non_negative_integer() {
        let mut errors = FormErrors::new();
        assert_eq!(non_negative_int(&mut errors, "capacite_max", "", 0), 0);
        assert_eq!(non_negative_int(&mut errors, "capacite_max", "35", 0), 35);
        assert!(errors.is_empty());
        non_negative_int(&mut errors, "capacite_max", "-1", 0);
        assert!(errors.get("capacite_max").is_some());
        let mut errors = FormErrors::new();
        non_negative_int(&mut errors, "capacite_max", "3.5", 0);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn coefficient_accepts_comma_and_rejects_zero() {
        let mut errors = FormErrors::new();
        assert_eq!(positive_decimal(&mut errors, "coefficient", "1,5", 1.0), 1.5);
        assert!(errors.is_empty());
        positive_decimal(&mut errors, "coefficient", "0", 1.0);
        assert!(errors.get("coefficient").is_some());
    }

    #[test]
    fn school_year_requires_consecutive_years() {
        let mut errors = FormErrors::new();
        school_year(&mut errors, "annee_scolaire", "2026-2027");
        assert!(errors.is_empty());
        school_year(&mut errors, "annee_scolaire", "2026-2028");
        assert!(errors.get("annee_scolaire").is_some());
    }

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = FormErrors::new();
        errors.add("nom", "a");
        errors.add("nom", "b");
        assert_eq!(errors.get("nom"), Some("a"));
    }

    #[test]
    fn checkbox_presence() {
        assert!(checked(&Some("1".into())));
        assert!(checked(&Some("on".into())));
        assert!(!checked(&None));
        assert!(!checked(&Some("0".into())));
    }
}
