//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use crate::resource::{
    compute_release_name, DesiredRelease, ReconciliationStatus, ReleaseState, ValidationResult,
};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// One desired release with its last recorded status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    /// Namespace and name of the manifest.
    pub key: String,
    /// Stable identity.
    pub identity: String,
    /// Chart reference as `name@version`.
    pub chart: String,
    /// Release name the manifest reconciles to.
    pub release: String,
    /// Last recorded state, if any.
    pub state: Option<ReleaseState>,
    /// Last recorded message.
    pub message: String,
    /// When the status was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

impl StatusEntry {
    /// Builds an entry from a manifest and its stored status.
    #[must_use]
    pub fn new(desired: &DesiredRelease, status: Option<ReconciliationStatus>) -> Self {
        let computed = compute_release_name(desired);
        let (state, release, message, last_reconciled) = match status {
            Some(status) => {
                let release = if status.release_name.is_empty() {
                    computed
                } else {
                    status.release_name
                };
                (Some(status.state), release, status.message, status.last_reconciled)
            }
            None => (None, computed, String::new(), None),
        };

        Self {
            key: desired.key(),
            identity: desired.identity().to_string(),
            chart: format!("{}@{}", desired.spec.chart.name, desired.spec.chart.version()),
            release,
            state,
            message,
            last_reconciled,
        }
    }
}

/// Validation findings for one manifest file.
#[derive(Debug)]
pub struct FileReport {
    /// Manifest path.
    pub path: PathBuf,
    /// Findings, or the load error when the file did not parse.
    pub outcome: Result<ValidationResult, String>,
}

impl FileReport {
    /// Returns true if the file parsed and passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.outcome.as_ref().is_ok_and(ValidationResult::is_valid)
    }
}

#[derive(Serialize)]
struct FileReportJson {
    path: String,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl From<&FileReport> for FileReportJson {
    fn from(report: &FileReport) -> Self {
        let (errors, warnings) = match &report.outcome {
            Ok(result) => (
                result.errors.iter().map(ToString::to_string).collect(),
                result.warnings.clone(),
            ),
            Err(message) => (vec![message.clone()], Vec::new()),
        };
        Self {
            path: report.path.display().to_string(),
            valid: report.is_valid(),
            errors,
            warnings,
        }
    }
}

/// Status row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Manifest")]
    key: String,
    #[tabled(rename = "Chart")]
    chart: String,
    #[tabled(rename = "Release")]
    release: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Reconciled")]
    reconciled: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the status listing.
    #[must_use]
    pub fn format_status(&self, entries: &[StatusEntry]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(entries).unwrap_or_default(),
            OutputFormat::Text => Self::format_status_text(entries),
        }
    }

    fn format_status_text(entries: &[StatusEntry]) -> String {
        if entries.is_empty() {
            return String::from("No manifests found.\n");
        }

        let rows: Vec<StatusRow> = entries
            .iter()
            .map(|e| StatusRow {
                key: e.key.clone(),
                chart: e.chart.clone(),
                release: e.release.clone(),
                state: e.state.map_or_else(|| "-".dimmed().to_string(), Self::format_state),
                message: Self::truncate(&e.message, 40),
                reconciled: e
                    .last_reconciled
                    .map_or_else(|| String::from("-"), |t| t.format("%Y-%m-%d %H:%M").to_string()),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');

        let deployed = entries
            .iter()
            .filter(|e| e.state == Some(ReleaseState::Deployed))
            .count();
        let failed = entries
            .iter()
            .filter(|e| e.state == Some(ReleaseState::Failed))
            .count();
        let _ = write!(
            output,
            "\n{} manifests: {} deployed, {} failed\n",
            entries.len(),
            deployed.to_string().green(),
            failed.to_string().red()
        );
        output
    }

    /// Formats validation reports.
    #[must_use]
    pub fn format_validation(&self, reports: &[FileReport]) -> String {
        match self.format {
            OutputFormat::Json => {
                let json: Vec<FileReportJson> = reports.iter().map(FileReportJson::from).collect();
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_validation_text(reports),
        }
    }

    fn format_validation_text(reports: &[FileReport]) -> String {
        let mut output = String::new();

        for report in reports {
            let path = report.path.display();
            match &report.outcome {
                Err(message) => {
                    let _ = writeln!(output, "{} {path}: {message}", "✗".red());
                }
                Ok(result) if result.is_valid() => {
                    let _ = writeln!(output, "{} {path}", "✓".green());
                }
                Ok(result) => {
                    let _ = writeln!(
                        output,
                        "{} {path}: {} error(s)",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
            }
            if let Ok(result) = &report.outcome {
                for warning in &result.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }
            }
        }

        let invalid = reports.iter().filter(|r| !r.is_valid()).count();
        let _ = write!(
            output,
            "\n{} file(s) checked, {} invalid\n",
            reports.len(),
            invalid
        );
        output
    }

    /// Formats a computed release name.
    #[must_use]
    pub fn format_release_name(&self, desired: &DesiredRelease) -> String {
        let name = compute_release_name(desired);
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "manifest": desired.key(),
                "identity": desired.identity(),
                "release": name,
            })
            .to_string(),
            OutputFormat::Text => name,
        }
    }

    /// Formats a state with color.
    fn format_state(state: ReleaseState) -> String {
        let label = state.as_str();
        match state {
            ReleaseState::Deployed => label.green().to_string(),
            ReleaseState::Failed => label.red().to_string(),
            ReleaseState::PendingInstall
            | ReleaseState::PendingUpgrade
            | ReleaseState::PendingRollback
            | ReleaseState::Deleting => label.yellow().to_string(),
            ReleaseState::Absent
            | ReleaseState::Superseded
            | ReleaseState::Deleted
            | ReleaseState::Unknown => label.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ValidationError;

    fn desired() -> DesiredRelease {
        serde_yaml::from_str(
            r"
metadata:
  name: web
  uid: abc123
spec:
  chart:
    name: nginx
    version: 1.2.0
",
        )
        .expect("manifest")
    }

    #[test]
    fn test_status_entry_prefers_stored_release() {
        let status = ReconciliationStatus::failed("chartmgr-rls-old", "boom");
        let entry = StatusEntry::new(&desired(), Some(status));
        assert_eq!(entry.release, "chartmgr-rls-old");
        assert_eq!(entry.state, Some(ReleaseState::Failed));
        assert_eq!(entry.chart, "nginx@1.2.0");

        let fresh = StatusEntry::new(&desired(), None);
        assert_eq!(fresh.release, "chartmgr-rls-abc123");
        assert_eq!(fresh.state, None);
    }

    #[test]
    fn test_status_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_status(&[StatusEntry::new(&desired(), None)]);
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(parsed[0]["release"], "chartmgr-rls-abc123");
        assert_eq!(parsed[0]["identity"], "abc123");
    }

    #[test]
    fn test_validation_text_lists_errors() {
        let reports = vec![
            FileReport {
                path: PathBuf::from("good.yaml"),
                outcome: Ok(ValidationResult::default()),
            },
            FileReport {
                path: PathBuf::from("bad.yaml"),
                outcome: Ok(ValidationResult {
                    errors: vec![ValidationError {
                        field: String::from("spec.chart.name"),
                        message: String::from("has an invalid length"),
                    }],
                    warnings: vec![],
                }),
            },
            FileReport {
                path: PathBuf::from("broken.yaml"),
                outcome: Err(String::from("YAML parse error")),
            },
        ];

        let output = OutputFormatter::new(OutputFormat::Text).format_validation(&reports);
        assert!(output.contains("spec.chart.name: has an invalid length"));
        assert!(output.contains("3 file(s) checked, 2 invalid"));
    }

    #[test]
    fn test_release_name_text_and_json() {
        let text = OutputFormatter::new(OutputFormat::Text).format_release_name(&desired());
        assert_eq!(text, "chartmgr-rls-abc123");

        let json = OutputFormatter::new(OutputFormat::Json).format_release_name(&desired());
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(parsed["release"], "chartmgr-rls-abc123");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
