//! Error types for mocrun-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// How a failure should be handled by the caller.
///
/// Transient failures are retried inside the resolver budget, advisory
/// failures are recorded on the stage report and the sequence continues,
/// fatal failures abort the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Transient,
    Advisory,
    Fatal,
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mocrun-core
#[derive(Error, Debug)]
pub enum Error {
    /// Element resolution and interaction errors
    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    /// Calendar widget errors
    #[error("Date picker error: {0}")]
    DatePicker(#[from] DatePickerError),

    /// Workflow and stage errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Login handshake errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Correlation store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (browser launch, handler task, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Classify the error for the continue/abort decision.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Interaction(err) => match err {
                InteractionError::Detached { .. }
                | InteractionError::Intercepted { .. }
                | InteractionError::Backend(_) => Severity::Transient,
                InteractionError::ElementNotFound { .. }
                | InteractionError::AmbiguousMatch { .. }
                | InteractionError::Timeout { .. } => Severity::Fatal,
            },
            Self::DatePicker(DatePickerError::DayNotFound { .. })
            | Self::Workflow(WorkflowError::OutcomeVerificationFailed { .. }) => Severity::Advisory,
            _ => Severity::Fatal,
        }
    }

    /// True when the failure may be downgraded to an advisory by the caller.
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        self.severity() == Severity::Advisory
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Interaction(err) => Some(err.remediation()),
            Self::DatePicker(err) => Some(err.remediation()),
            Self::Workflow(err) => Some(err.remediation()),
            Self::Auth(err) => Some(err.remediation()),
            Self::Store(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Show store", "mocrun store show")
                    .alternative("Verify the test-data directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON document and retry.")
                    .command("Validate JSON", "python -m json.tool < test-data/moc-numbers.json")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Relaunch the browser session and retry the stage.")
                    .command("Check config", "mocrun config check")
                    .alternative("Make sure a Chromium binary is installed and on PATH."),
            ),
        }
    }
}

/// Element resolution and interaction errors
#[derive(Error, Debug)]
pub enum InteractionError {
    /// Every locating strategy was exhausted without a usable match
    #[error("no usable match for '{descriptor}' (tried: {})", .strategies_tried.join(" | "))]
    ElementNotFound {
        descriptor: String,
        strategies_tried: Vec<String>,
    },

    /// A strategy matched several controls and no disambiguation rule was given
    #[error("'{descriptor}' matched {count} controls via {strategy} and requires a unique match")]
    AmbiguousMatch {
        descriptor: String,
        strategy: String,
        count: usize,
    },

    /// The element left the document between resolution and action
    #[error("element for '{descriptor}' detached from the document")]
    Detached { descriptor: String },

    /// Another element (overlay, toast, backdrop) received the click
    #[error("click on '{descriptor}' was intercepted by another element")]
    Intercepted { descriptor: String },

    /// A wait exceeded its budget
    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    /// Browser backend failure (protocol error, evaluation failure)
    #[error("browser backend error: {0}")]
    Backend(String),
}

impl InteractionError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ElementNotFound { descriptor, .. } => Remediation::new(format!(
                "No strategy located '{descriptor}'. The screen layout may have changed."
            ))
            .command("Rerun headed", "mocrun run <stage> --headed")
            .alternative("Inspect the failure report and update the control catalog."),
            Self::AmbiguousMatch { descriptor, .. } => Remediation::new(format!(
                "'{descriptor}' is ambiguous. Add a scope or an explicit pick rule."
            ))
            .command("Rerun headed", "mocrun run <stage> --headed")
            .alternative("Scope the lookup to the enclosing section or dialog."),
            Self::Detached { .. } | Self::Intercepted { .. } => Remediation::new(
                "The page re-rendered or an overlay blocked the control. Retry the stage.",
            )
            .command("Rerun", "mocrun run <stage>")
            .alternative("Increase timeouts.settle_ms in mocrun.toml."),
            Self::Timeout { .. } => Remediation::new("The page did not settle in time.")
                .command("Check config", "mocrun config show")
                .alternative("Raise the relevant [timeouts] value."),
            Self::Backend(_) => Remediation::new("The browser connection failed.")
                .command("Rerun headed", "mocrun run <stage> --headed")
                .alternative("Verify Chromium starts on this machine."),
        }
    }
}

/// Calendar widget errors
#[derive(Error, Debug)]
pub enum DatePickerError {
    #[error("invalid date '{input}': expected MM/DD/YYYY or YYYY-MM-DD")]
    InvalidDateFormat { input: String },

    #[error("date trigger index {index} out of range ({available} available)")]
    IndexOutOfRange { index: usize, available: usize },

    #[error("day {day} not found in calendar after {attempts} attempts")]
    DayNotFound { day: u32, attempts: u32 },
}

impl DatePickerError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidDateFormat { input } => {
                Remediation::new(format!("Fix the date value '{input}' in the stage data."))
                    .command("Check a date", format!("mocrun parse-date '{input}'"))
                    .alternative("Use MM/DD/YYYY or YYYY-MM-DD.")
            }
            Self::IndexOutOfRange { available, .. } => Remediation::new(format!(
                "Only {available} date fields are rendered. Check the form section."
            ))
            .command("Rerun headed", "mocrun run <stage> --headed")
            .alternative("Address the field by its label instead of its position."),
            Self::DayNotFound { .. } => Remediation::new(
                "The calendar did not show the target day. Check month navigation.",
            )
            .command("Rerun headed", "mocrun run <stage> --headed")
            .alternative("Pick a date that is not disabled by the application."),
        }
    }
}

/// Workflow and stage errors
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("workflow instance {id} not found in search results")]
    InstanceNotFound { id: String },

    #[error("no workflow recorded in {store}; run the request stage first")]
    NoWorkflowRecorded { store: String },

    #[error("{stage} outcome not verified (notification: {})", .notification.as_deref().unwrap_or("<none>"))]
    OutcomeVerificationFailed {
        stage: String,
        notification: Option<String>,
    },

    #[error("invalid workflow instance id: {0}")]
    InvalidInstanceId(String),

    #[error("no instance id found in URL {url}")]
    NoInstanceOriginated { url: String },
}

impl WorkflowError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InstanceNotFound { id } => {
                Remediation::new(format!("Instance {id} is not visible to this actor."))
                    .command("Show store", "mocrun store show")
                    .alternative("Confirm the previous stage completed for this instance.")
            }
            Self::NoWorkflowRecorded { .. } => {
                Remediation::new("Run the request stage to create a workflow instance.")
                    .command("Create instance", "mocrun run request")
                    .command("Seed manually", "mocrun store record <eMOC_id>")
            }
            Self::OutcomeVerificationFailed { .. } => {
                Remediation::new("The notification text did not match the success vocabulary.")
                    .command("Rerun headed", "mocrun run <stage> --headed")
                    .alternative("Check the instance state in the application.")
            }
            Self::InvalidInstanceId(_) => Remediation::new("Use an id of the form eMOC_000123.")
                .command("Show store", "mocrun store show"),
            Self::NoInstanceOriginated { .. } => {
                Remediation::new("Submission did not navigate to an instance route.")
                    .command("Check config", "mocrun config show")
                    .alternative("Verify app.id_pattern matches the instance URL.")
            }
        }
    }
}

/// Login handshake errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("login did not redirect back to {expected_origin} (last URL: {last_url})")]
    RedirectTimeout {
        expected_origin: String,
        last_url: String,
    },

    #[error("page title '{actual}' does not match expected '{expected}'")]
    TitleMismatch { expected: String, actual: String },

    #[error("missing credential for {role}: set {variable}")]
    MissingCredential { role: String, variable: String },
}

impl AuthError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::RedirectTimeout { .. } => {
                Remediation::new("Login did not complete. Check the credentials for this role.")
                    .command("Rerun headed", "mocrun run <stage> --headed")
                    .alternative("Raise timeouts.login_redirect_ms.")
            }
            Self::TitleMismatch { .. } => {
                Remediation::new("Logged in to an unexpected page. Check app.expected_title.")
                    .command("Check config", "mocrun config show")
            }
            Self::MissingCredential { variable, .. } => {
                Remediation::new(format!("Export {variable} before running this stage."))
                    .command("Set variable", format!("export {variable}=..."))
            }
        }
    }
}

/// Correlation store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("correlation store {path} is corrupt: {details}")]
    Corrupt { path: String, details: String },
}

impl StoreError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Corrupt { path, .. } => {
                Remediation::new(format!("Repair or remove the correlation file {path}."))
                    .command("Inspect", format!("cat \"{path}\""))
                    .alternative("Re-run the request stage to create a fresh record.")
            }
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseError(_) | Self::ParseFailed(_) => {
                Remediation::new("Config parse failed. Fix the syntax and retry.")
                    .command("Check config", "mocrun config check")
                    .alternative("Validate the config file format.")
            }
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Show config", "mocrun config show")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Check config", "mocrun config check")
                    .alternative("Review validation errors and adjust mocrun.toml.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_errors() -> Vec<Error> {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        vec![
            Error::Interaction(InteractionError::ElementNotFound {
                descriptor: "submit".to_string(),
                strategies_tried: vec!["id=#btn".to_string()],
            }),
            Error::Interaction(InteractionError::AmbiguousMatch {
                descriptor: "save".to_string(),
                strategy: "role=button[name=Save]".to_string(),
                count: 2,
            }),
            Error::Interaction(InteractionError::Detached {
                descriptor: "row".to_string(),
            }),
            Error::Interaction(InteractionError::Intercepted {
                descriptor: "row".to_string(),
            }),
            Error::Interaction(InteractionError::Timeout {
                what: "navigation".to_string(),
                waited_ms: 500,
            }),
            Error::Interaction(InteractionError::Backend("cdp".to_string())),
            Error::DatePicker(DatePickerError::InvalidDateFormat {
                input: "2025/12/20".to_string(),
            }),
            Error::DatePicker(DatePickerError::IndexOutOfRange {
                index: 2,
                available: 2,
            }),
            Error::DatePicker(DatePickerError::DayNotFound {
                day: 31,
                attempts: 3,
            }),
            Error::Workflow(WorkflowError::InstanceNotFound {
                id: "eMOC_000632".to_string(),
            }),
            Error::Workflow(WorkflowError::NoWorkflowRecorded {
                store: "moc-numbers.json".to_string(),
            }),
            Error::Workflow(WorkflowError::OutcomeVerificationFailed {
                stage: "coordinate".to_string(),
                notification: None,
            }),
            Error::Workflow(WorkflowError::InvalidInstanceId("x".to_string())),
            Error::Workflow(WorkflowError::NoInstanceOriginated {
                url: "https://moc.otdm.ca/tabs/dashboard".to_string(),
            }),
            Error::Auth(AuthError::RedirectTimeout {
                expected_origin: "https://moc.otdm.ca".to_string(),
                last_url: "https://idp/login".to_string(),
            }),
            Error::Auth(AuthError::TitleMismatch {
                expected: "Host App".to_string(),
                actual: "Sign in".to_string(),
            }),
            Error::Auth(AuthError::MissingCredential {
                role: "coordinator".to_string(),
                variable: "MOCRUN_COORDINATOR_PASS".to_string(),
            }),
            Error::Store(StoreError::Corrupt {
                path: "moc-numbers.json".to_string(),
                details: "expected object".to_string(),
            }),
            Error::Config(ConfigError::FileNotFound("mocrun.toml".to_string())),
            Error::Config(ConfigError::ReadFailed(
                "mocrun.toml".to_string(),
                "io".to_string(),
            )),
            Error::Config(ConfigError::ParseError("parse".to_string())),
            Error::Config(ConfigError::ParseFailed("parse".to_string())),
            Error::Config(ConfigError::SerializeFailed("serialize".to_string())),
            Error::Config(ConfigError::ValidationError("invalid".to_string())),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
            Error::Runtime("runtime".to_string()),
        ]
    }

    #[test]
    fn remediation_available_for_error_variants() {
        for error in all_errors() {
            let remediation = error.remediation().expect("missing remediation");
            assert!(
                !remediation.summary.is_empty(),
                "remediation summary empty for {error:?}"
            );
            assert!(
                !remediation.commands.is_empty(),
                "remediation commands empty for {error:?}"
            );
        }
    }

    #[test]
    fn severity_splits_fatal_and_advisory() {
        let advisory: Vec<_> = all_errors()
            .into_iter()
            .filter(Error::is_advisory)
            .map(|e| e.to_string())
            .collect();
        assert_eq!(advisory.len(), 2, "{advisory:?}");
        assert!(advisory.iter().any(|m| m.contains("day 31")));
        assert!(advisory.iter().any(|m| m.contains("not verified")));

        let missing = Error::Workflow(WorkflowError::NoWorkflowRecorded {
            store: "x".to_string(),
        });
        assert_eq!(missing.severity(), Severity::Fatal);
        let detached = Error::Interaction(InteractionError::Detached {
            descriptor: "x".to_string(),
        });
        assert_eq!(detached.severity(), Severity::Transient);
    }

    #[test]
    fn element_not_found_lists_strategies() {
        let err = InteractionError::ElementNotFound {
            descriptor: "search box".to_string(),
            strategies_tried: vec!["role=textbox".to_string(), "placeholder~search".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("search box"));
        assert!(msg.contains("role=textbox | placeholder~search"));
    }

    #[test]
    fn formatted_error_includes_remediation() {
        let err = Error::Workflow(WorkflowError::NoWorkflowRecorded {
            store: "test-data/moc-numbers.json".to_string(),
        });
        let rendered = format_error_with_remediation(&err);
        assert!(rendered.starts_with("Error: Workflow error: no workflow recorded"));
        assert!(rendered.contains("mocrun run request"));
    }
}
