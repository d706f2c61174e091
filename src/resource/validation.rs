//! Validation of desired-release manifests.
//!
//! Field-level rules are declared on the types with the `validator` derive;
//! this module runs them and adds the cross-field checks, collecting every
//! problem before failing.

use std::collections::HashSet;
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{ConfigError, ChartMgrError, Result};

use super::types::DesiredRelease;

/// Validator for desired-release manifests.
#[derive(Debug, Default)]
pub struct ResourceValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ResourceValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a desired release.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any rule fails.
    pub fn validate(&self, desired: &DesiredRelease) -> Result<ValidationResult> {
        let result = self.check(desired);

        if result.errors.is_empty() {
            debug!("Manifest {} passed validation", desired.key());
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ChartMgrError::Config(ConfigError::ValidationError {
                message: format!("{}: {}", desired.key(), first_error.message),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every rule and returns all findings without failing.
    #[must_use]
    pub fn check(&self, desired: &DesiredRelease) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = desired.validate() {
            flatten_errors("", &errors, &mut result.errors);
        }
        Self::check_values(desired, &mut result);
        result
    }

    /// Duplicate value names are legal but almost always a mistake.
    fn check_values(desired: &DesiredRelease, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for value in &desired.spec.values {
            if !seen.insert(value.name.as_str()) {
                result.warnings.push(format!(
                    "Value '{}' is set more than once; the last occurrence wins",
                    value.name
                ));
            }
        }

        if desired.create_only() && desired.spec.release.is_none() {
            result.warnings.push(String::from(
                "createOnly is set without an explicit release name; renaming the object will orphan the release",
            ));
        }
    }
}

/// Turns nested `validator` errors into flat dotted field paths.
fn flatten_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<ValidationError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for err in field_errors {
                    let message = err
                        .message
                        .as_ref()
                        .map_or_else(|| describe_code(&err.code), ToString::to_string);
                    out.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(nested) => flatten_errors(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    flatten_errors(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

fn describe_code(code: &str) -> String {
    match code {
        "length" => String::from("has an invalid length"),
        "url" => String::from("is not a valid URL"),
        other => format!("failed check '{other}'"),
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
