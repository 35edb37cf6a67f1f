use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ErrorKind};
use crate::national_id;

/// The text fields of the template, in the order they appear on the form.
pub const TEXT_FIELDS: [&str; 15] = [
    "nume",
    "initialaTatalui",
    "prenume",
    "cnp",
    "strada",
    "numar",
    "bloc",
    "scara",
    "etaj",
    "apartament",
    "judet",
    "localitate",
    "codPostal",
    "email",
    "telefon",
];

/// The field selecting for how many years the redirection holds, checked as `perioada{value}`.
pub const PERIOD_FIELD: &str = "perioadaRedirectionare";
/// The data processing consent checkbox.
pub const CONSENT_FIELD: &str = "acordDate";
/// Whether the user wants a copy of the form by email.
pub const EMAIL_COPY_FIELD: &str = "trimiteEmail";

const REQUIRED_MESSAGE: &str = "Acest câmp este obligatoriu";
const MISSING_SIGNATURE_MESSAGE: &str = "Vă rugăm să adăugați semnătura";

/// The key/value pairs collected from the form at the moment of a preview or a submission.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct FormFieldSet(BTreeMap<String, String>);

impl FormFieldSet {
    pub fn new() -> Self {
        FormFieldSet::default()
    }

    pub fn from_json(json_bytes: &[u8]) -> Result<Self, ContextError> {
        serde_json::from_slice(json_bytes).map_err(|error| {
            ContextError::with_error("Failed to parse the form fields", &error)
                .of_kind(ErrorKind::Validation)
        })
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// The value of the field, or an empty string if the field was never set.
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    /// A checkbox is only present in the collected fields when it is checked.
    pub fn is_checked(&self, name: &str) -> bool {
        !self.value(name).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iterator: I) -> Self {
        FormFieldSet(
            iterator
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

enum FieldCheck {
    Pattern(Regex),
    NationalId,
}

struct FieldRule {
    name: &'static str,
    check: FieldCheck,
    message: &'static str,
}

impl FieldRule {
    fn accepts(&self, value: &str) -> bool {
        match &self.check {
            FieldCheck::Pattern(pattern) => pattern.is_match(value),
            FieldCheck::NationalId => national_id::validate(value),
        }
    }
}

lazy_static! {
    static ref FIELD_RULES: Vec<FieldRule> = vec![
        FieldRule {
            name: "nume",
            check: FieldCheck::Pattern(
                Regex::new(r"^[A-Za-zĂăÂâÎîȘșȚț\s-]{1,50}$").unwrap(),
            ),
            message: "Numele poate conține doar litere, spații și cratimă (max. 50 caractere)",
        },
        FieldRule {
            name: "prenume",
            check: FieldCheck::Pattern(
                Regex::new(r"^[A-Za-zĂăÂâÎîȘșȚț\s-]{1,50}$").unwrap(),
            ),
            message: "Prenumele poate conține doar litere, spații și cratimă (max. 50 caractere)",
        },
        FieldRule {
            name: "initialaTatalui",
            check: FieldCheck::Pattern(Regex::new(r"^[A-Za-zĂăÂâÎîȘșȚț]$").unwrap()),
            message: "Inițiala tatălui trebuie să fie o singură literă",
        },
        FieldRule {
            name: "cnp",
            check: FieldCheck::NationalId,
            message: "CNP invalid",
        },
        FieldRule {
            name: "telefon",
            check: FieldCheck::Pattern(
                Regex::new(r"^(07[0-8]{1}[0-9]{1}|02[0-9]{2}|03[0-9]{2}){1}?([0-9]{6})$").unwrap(),
            ),
            message: "Număr de telefon invalid",
        },
        FieldRule {
            name: "email",
            check: FieldCheck::Pattern(Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap()),
            message: "Adresă de email invalidă",
        },
        FieldRule {
            name: "codPostal",
            check: FieldCheck::Pattern(Regex::new(r"^[0-9]{6}$").unwrap()),
            message: "Codul poștal trebuie să aibă 6 cifre",
        },
        FieldRule {
            name: PERIOD_FIELD,
            check: FieldCheck::Pattern(Regex::new(r"^[12]$").unwrap()),
            message: "Perioada de redirecționare poate fi de 1 sau 2 ani",
        },
    ];
}

/// A field whose value was rejected, with the message to show next to it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Check a single field as it is being edited. An empty value is only rejected when the
/// field is required; a non-empty value must always satisfy the rule of the field, if any.
pub fn check_field(name: &str, value: &str, is_required: bool) -> Option<FieldViolation> {
    if value.trim().is_empty() {
        return is_required.then(|| FieldViolation {
            field: name.into(),
            message: REQUIRED_MESSAGE.into(),
        });
    }

    FIELD_RULES
        .iter()
        .find(|rule| rule.name == name)
        .filter(|rule| !rule.accepts(value))
        .map(|rule| FieldViolation {
            field: name.into(),
            message: rule.message.into(),
        })
}

/// Why a preview or a submission was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidFields(Vec<FieldViolation>),
    MissingSignature,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidFields(violations) => {
                let descriptions: Vec<String> = violations
                    .iter()
                    .map(|violation| format!("{}: {}", violation.field, violation.message))
                    .collect();
                write!(formatter, "{}", descriptions.join("; "))
            }
            Rejection::MissingSignature => write!(formatter, "{}", MISSING_SIGNATURE_MESSAGE),
        }
    }
}

impl From<Rejection> for ContextError {
    fn from(rejection: Rejection) -> Self {
        ContextError::with_context(rejection.to_string()).of_kind(ErrorKind::Validation)
    }
}

/// Let an action proceed only if every required field is filled in, every filled in field is
/// valid, the CNP passes its checksum and the user has signed.
pub fn gate(
    fields: &FormFieldSet,
    required_fields: &[String],
    has_signature: bool,
) -> Result<(), Rejection> {
    let is_required = |name: &str| required_fields.iter().any(|required| required == name);

    let mut names: Vec<&str> = required_fields.iter().map(String::as_str).collect();
    names.extend(fields.iter().map(|(name, _)| name));
    // The CNP is checked even when it was left out of the required fields
    names.push("cnp");
    names.sort_unstable();
    names.dedup();

    let violations: Vec<FieldViolation> = names
        .into_iter()
        .filter_map(|name| {
            check_field(
                name,
                fields.value(name),
                is_required(name) || name == "cnp",
            )
        })
        .collect();
    if !violations.is_empty() {
        return Err(Rejection::InvalidFields(violations));
    }
    if !has_signature {
        return Err(Rejection::MissingSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<String> {
        ["nume", "prenume", "cnp", "judet"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn valid_fields() -> FormFieldSet {
        [
            ("nume", "Popescu"),
            ("prenume", "Ana-Maria"),
            ("cnp", "1800101221144"),
            ("judet", "Brașov"),
            ("telefon", "0721234567"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn optional_empty_fields_are_accepted() {
        assert_eq!(check_field("email", "", false), None);
        assert_eq!(check_field("telefon", "  ", false), None);
        assert_eq!(
            check_field("email", "", true).map(|violation| violation.message),
            Some(REQUIRED_MESSAGE.to_string())
        );
    }

    #[test]
    fn field_patterns() {
        assert_eq!(check_field("nume", "Țăranu Ștefan", true), None);
        assert!(check_field("nume", "Popescu2", true).is_some());
        assert!(check_field("nume", &"a".repeat(51), true).is_some());
        assert_eq!(check_field("initialaTatalui", "Ș", false), None);
        assert!(check_field("initialaTatalui", "AB", false).is_some());
        assert_eq!(check_field("telefon", "0212345678", false), None);
        assert!(check_field("telefon", "0791234567", false).is_some());
        assert!(check_field("telefon", "072123456", false).is_some());
        assert_eq!(check_field("email", "ana@example.ro", false), None);
        assert!(check_field("email", "ana@example", false).is_some());
        assert_eq!(check_field("codPostal", "500123", false), None);
        assert!(check_field("codPostal", "50012", false).is_some());
        assert_eq!(check_field(PERIOD_FIELD, "2", false), None);
        assert!(check_field(PERIOD_FIELD, "3", false).is_some());
        // Fields without a rule only need to be present
        assert_eq!(check_field("strada", "Lungă", true), None);
    }

    #[test]
    fn cnp_uses_the_checksum() {
        assert_eq!(check_field("cnp", "1800101221144", true), None);
        assert_eq!(
            check_field("cnp", "1800101221145", true),
            Some(FieldViolation {
                field: "cnp".into(),
                message: "CNP invalid".into(),
            })
        );
    }

    #[test]
    fn gate_accepts_a_complete_signed_form() {
        assert_eq!(gate(&valid_fields(), &required(), true), Ok(()));
    }

    #[test]
    fn gate_lists_every_violation() {
        let mut fields = valid_fields();
        fields.set("cnp", "1800101221145");
        fields.set("prenume", "");
        fields.set("email", "not-an-email");

        let Err(Rejection::InvalidFields(violations)) = gate(&fields, &required(), true) else {
            panic!("the form should have been rejected");
        };
        let rejected: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(rejected, vec!["cnp", "email", "prenume"]);
    }

    #[test]
    fn gate_requires_a_signature() {
        assert_eq!(
            gate(&valid_fields(), &required(), false),
            Err(Rejection::MissingSignature)
        );
    }

    #[test]
    fn gate_checks_the_cnp_even_when_not_required() {
        let mut fields = valid_fields();
        fields.set("cnp", "");
        let result = gate(&fields, &["nume".to_string()], true);
        assert!(matches!(result, Err(Rejection::InvalidFields(_))));
    }

    #[test]
    fn rejection_becomes_a_validation_error() {
        let error: ContextError = Rejection::MissingSignature.into();
        assert!(error.is_validation());
        assert_eq!(error.to_string(), MISSING_SIGNATURE_MESSAGE);
    }

    #[test]
    fn field_set_from_json() {
        let fields = FormFieldSet::from_json(br#"{ "nume": "Ion", "acordDate": "on" }"#).unwrap();
        assert_eq!(fields.value("nume"), "Ion");
        assert_eq!(fields.value("prenume"), "");
        assert!(fields.is_checked(CONSENT_FIELD));
        assert!(!fields.is_checked(EMAIL_COPY_FIELD));
        assert!(FormFieldSet::from_json(b"[1, 2]").is_err());
    }
}
