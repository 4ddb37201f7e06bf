//! Field checks handed to form callbacks.
//!
//! Amounts are read leniently: a comma decimal separator is accepted, the
//! longest numeric prefix is used and anything unreadable counts as zero.

use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;

use super::fields::FormFields;
use crate::notify::NotificationSink;

pub static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid e-mail pattern"));

static NUMERIC_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid numeric pattern")
});

/// Reads an amount the way the back office always has: `"12,5"` is 12.5,
/// `"3 boîtes"` is 3, `""` and `"abc"` are 0.
pub fn parse_amount(raw: Option<&str>) -> f64 {
    let raw: String = raw.unwrap_or("0").trim_start().replacen(',', ".", 1);
    NUMERIC_PREFIX
        .find(&raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// The first field that failed a check.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub field: CompactString,
    pub value: String,
}

pub type CheckResult = Result<(), Failure>;

/// One entry of a [`Validator::validate`] run.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    PositiveNumbers {
        fields: Vec<CompactString>,
        message: Option<String>,
    },
    GreaterThanZero {
        field: CompactString,
        message: Option<String>,
    },
    Email {
        field: CompactString,
        message: Option<String>,
    },
}

impl Check {
    pub fn positive_numbers<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        Self::PositiveNumbers {
            fields: fields.into_iter().map(Into::into).collect(),
            message: None,
        }
    }

    pub fn greater_than_zero(field: impl Into<CompactString>) -> Self {
        Self::GreaterThanZero {
            field: field.into(),
            message: None,
        }
    }

    pub fn email(field: impl Into<CompactString>) -> Self {
        Self::Email {
            field: field.into(),
            message: None,
        }
    }

    /// Message shown instead of the generic one when this check fails.
    #[must_use]
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::PositiveNumbers { message, .. }
            | Self::GreaterThanZero { message, .. }
            | Self::Email { message, .. } => *message = Some(text.into()),
        }
        self
    }

    fn message(&self) -> Option<&str> {
        match self {
            Self::PositiveNumbers { message, .. }
            | Self::GreaterThanZero { message, .. }
            | Self::Email { message, .. } => message.as_deref(),
        }
    }

    fn run(&self, data: &FormFields) -> CheckResult {
        match self {
            Self::PositiveNumbers { fields, .. } => Validator::validate_positive_numbers(data, fields),
            Self::GreaterThanZero { field, .. } => Validator::validate_greater_than_zero(data, field),
            Self::Email { field, .. } => Validator::validate_email(data, field),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Fails on the first listed field whose amount is negative.
    pub fn validate_positive_numbers<S: AsRef<str>>(data: &FormFields, fields: &[S]) -> CheckResult {
        for field in fields {
            let field: &str = field.as_ref();
            let value: f64 = parse_amount(data.get(field));
            if value < 0.0 {
                return Err(Failure {
                    field: field.into(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn validate_greater_than_zero(data: &FormFields, field: &str) -> CheckResult {
        let value: f64 = parse_amount(data.get(field));
        if value <= 0.0 {
            return Err(Failure {
                field: field.into(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_email(data: &FormFields, field: &str) -> CheckResult {
        let email: &str = data.get(field).unwrap_or_default();
        if !EMAIL_PATTERN.is_match(email) {
            return Err(Failure {
                field: field.into(),
                value: email.to_string(),
            });
        }
        Ok(())
    }

    /// Runs `checks` in order and stops at the first failure, which is
    /// reported to `sink` as an error.
    pub fn validate(&self, data: &FormFields, checks: &[Check], sink: Option<&NotificationSink>) -> CheckResult {
        for check in checks {
            if let Err(failure) = check.run(data) {
                if let Some(sink) = sink {
                    let text: String = check.message().map_or_else(
                        || format!("Erreur sur {}: {}", failure.field, failure.value),
                        str::to_string,
                    );
                    sink.show_error(text);
                }
                return Err(failure);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::NotificationConfig, dom::Document, notify::NotificationLevel};

    fn data(pairs: &[(&str, &str)]) -> FormFields {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_parse_amount_is_lenient() {
        assert_eq!(parse_amount(Some("12,5")), 12.5);
        assert_eq!(parse_amount(Some("3 boîtes")), 3.0);
        assert_eq!(parse_amount(Some("abc")), 0.0);
        assert_eq!(parse_amount(Some("")), 0.0);
        assert_eq!(parse_amount(None), 0.0);
        assert_eq!(parse_amount(Some("-2")), -2.0);
    }

    #[test]
    fn test_individual_checks() {
        let fields = data(&[("a", "1"), ("b", "-0,5"), ("units", "0"), ("mail", "x@y.fr")]);

        assert!(Validator::validate_positive_numbers(&fields, &["a", "missing"]).is_ok());
        let failure = Validator::validate_positive_numbers(&fields, &["a", "b"]).unwrap_err();
        assert_eq!(failure.field, "b");
        assert_eq!(failure.value, "-0.5");

        assert!(Validator::validate_greater_than_zero(&fields, "units").is_err());
        assert!(Validator::validate_greater_than_zero(&fields, "a").is_ok());

        assert!(Validator::validate_email(&fields, "mail").is_ok());
        assert!(Validator::validate_email(&fields, "a").is_err());
        assert!(Validator::validate_email(&fields, "missing").is_err());
    }

    #[test]
    fn test_validate_reports_first_failure_only() {
        let sink = NotificationSink::new(
            Document::parse(r#"<body><div id="codexGlobal"></div></body>"#),
            NotificationConfig::default(),
        );
        let fields = data(&[("qty", "0"), ("mail", "bad")]);
        let checks = [
            Check::positive_numbers(["qty"]),
            Check::greater_than_zero("qty").with_message("Quantité requise"),
            Check::email("mail"),
        ];

        let failure = Validator.validate(&fields, &checks, Some(&sink)).unwrap_err();
        assert_eq!(failure.field, "qty");
        let history = sink.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].level, NotificationLevel::Error);
        assert_eq!(history[0].message, "Quantité requise");
    }
}
