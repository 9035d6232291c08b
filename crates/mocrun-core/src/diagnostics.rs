//! Failure report artifacts.
//!
//! When a stage aborts, the runner writes a report directory containing:
//! - `failure_report.json`: machine-readable report
//! - `failure_report.txt`: the same content for humans, with remediation
//!
//! Successful runs can write `stage_report.json` next to it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::Result;
use crate::descriptor::Notification;
use crate::error::{Error, InteractionError, Remediation, Severity};
use crate::stages::{Advisory, StageKind, StageReport};
use crate::store::WorkflowId;

/// What the runner knows about a failed stage.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub mocrun_version: String,
    pub generated_at: DateTime<Utc>,
    pub stage: StageKind,
    pub instance: Option<WorkflowId>,
    pub error: String,
    pub severity: Severity,
    /// Locator strategies attempted for the control that could not be found.
    pub strategies_tried: Vec<String>,
    pub last_notification: Option<String>,
    pub remediation: Option<Remediation>,
    pub advisories: Vec<Advisory>,
}

impl FailureReport {
    #[must_use]
    pub fn new(stage: StageKind, instance: Option<&WorkflowId>, error: &Error) -> Self {
        let strategies_tried = match error {
            Error::Interaction(InteractionError::ElementNotFound {
                strategies_tried, ..
            }) => strategies_tried.clone(),
            Error::Interaction(InteractionError::AmbiguousMatch { strategy, .. }) => {
                vec![strategy.clone()]
            }
            _ => Vec::new(),
        };
        Self {
            mocrun_version: crate::VERSION.to_string(),
            generated_at: Utc::now(),
            stage,
            instance: instance.cloned(),
            error: error.to_string(),
            severity: error.severity(),
            strategies_tried,
            last_notification: None,
            remediation: error.remediation(),
            advisories: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_notification(mut self, notification: Option<&Notification>) -> Self {
        self.last_notification = notification.map(|n| n.text.clone());
        self
    }

    #[must_use]
    pub fn with_advisories(mut self, advisories: Vec<Advisory>) -> Self {
        self.advisories = advisories;
        self
    }

    /// Plain-text rendering.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("mocrun {} failure report\n", self.mocrun_version));
        out.push_str(&format!("generated: {}\n", self.generated_at.to_rfc3339()));
        out.push_str(&format!("stage:     {}\n", self.stage));
        out.push_str(&format!(
            "instance:  {}\n",
            self.instance.as_ref().map_or("<none>", WorkflowId::as_str)
        ));
        out.push_str(&format!("severity:  {:?}\n", self.severity));
        out.push_str(&format!("error:     {}\n", self.error));

        if !self.strategies_tried.is_empty() {
            out.push_str("\nstrategies tried:\n");
            for (index, strategy) in self.strategies_tried.iter().enumerate() {
                out.push_str(&format!("  {index}. {strategy}\n"));
            }
        }

        out.push_str(&format!(
            "\nlast notification: {}\n",
            self.last_notification.as_deref().unwrap_or("<none>")
        ));

        if !self.advisories.is_empty() {
            out.push_str("\nadvisories:\n");
            for advisory in &self.advisories {
                out.push_str(&format!("  - {advisory}\n"));
            }
        }

        if let Some(remediation) = &self.remediation {
            out.push('\n');
            out.push_str(&remediation.render_plain());
        }
        out
    }
}

/// Where a report landed.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
    pub output_path: String,
    pub file_count: usize,
}

/// `<root>/<stage>-<YYYYmmdd-HHMMSS>`
#[must_use]
pub fn report_dir(root: &Path, stage: StageKind, at: DateTime<Utc>) -> PathBuf {
    root.join(format!("{stage}-{}", at.format("%Y%m%d-%H%M%S")))
}

/// Write `failure_report.json` and `failure_report.txt` under `root`.
pub fn write_failure_report(root: &Path, report: &FailureReport) -> Result<ArtifactResult> {
    let dir = report_dir(root, report.stage, report.generated_at);
    fs::create_dir_all(&dir)?;
    write_json_file(&dir, "failure_report.json", report)?;
    write_text_file(&dir, "failure_report.txt", &report.render_text())?;
    info!(path = %dir.display(), "Failure report written");
    Ok(ArtifactResult {
        output_path: dir.display().to_string(),
        file_count: 2,
    })
}

/// Write `stage_report.json` for a finished stage.
pub fn write_stage_report(root: &Path, report: &StageReport) -> Result<ArtifactResult> {
    let dir = report_dir(root, report.stage, Utc::now());
    fs::create_dir_all(&dir)?;
    write_json_file(&dir, "stage_report.json", report)?;
    Ok(ArtifactResult {
        output_path: dir.display().to_string(),
        file_count: 1,
    })
}

fn write_json_file<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text_file(dir, name, &json)
}

fn write_text_file(dir: &Path, name: &str, content: &str) -> Result<()> {
    let mut file = fs::File::create(dir.join(name))?;
    file.write_all(content.as_bytes())?;
    if !content.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    Ok(())
}
