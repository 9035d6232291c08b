//! Configuration management for mocrun
//!
//! Handles loading and validation of mocrun.toml configuration files.
//!
//! # Schema Overview
//!
//! - `general`: Log level, format, optional log file
//! - `app`: Target application URLs, expected title, instance id pattern
//! - `browser`: Headless flag, viewport, navigation/action timeouts
//! - `timeouts`: Element, alert, search and settle budgets
//! - `store`: Correlation file path and history key prefix
//! - `artifacts`: Failure report directory
//! - `credentials`: Default usernames per actor role (passwords come from env)
//! - `stages`: Per-stage input data
//!
//! All sections use `#[serde(default)]` to allow missing fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Config file name searched in the working directory and the config dir.
pub const CONFIG_FILE_NAME: &str = "mocrun.toml";

// =============================================================================
// Main Config
// =============================================================================

/// Complete mocrun.toml configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub app: AppConfig,
    pub browser: BrowserConfig,
    pub timeouts: TimeoutsConfig,
    pub store: StoreConfig,
    pub artifacts: ArtifactsConfig,
    pub credentials: CredentialsConfig,
    pub stages: StagesConfig,
}

// =============================================================================
// General Config
// =============================================================================

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format (default for interactive use)
    #[default]
    Pretty,
    /// Machine-parseable JSON lines (for CI)
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ParseError(format!(
                "invalid log format: {other} (expected 'pretty' or 'json')"
            ))),
        }
    }
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    pub log_format: LogFormat,

    /// Optional log file path (supports ~ expansion).
    /// When set, logs are appended to this file in addition to stderr.
    pub log_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

// =============================================================================
// Application
// =============================================================================

/// How a stage reaches its workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMode {
    /// Open the list, search the id, open the matching row.
    #[default]
    Search,
    /// Navigate straight to the instance route.
    DirectUrl,
}

/// Target application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    /// Route that triggers the identity-provider login.
    pub login_route: String,
    pub list_route: String,
    /// Instance route; `{id}` is replaced with the workflow id.
    pub instance_route: String,
    /// Substring the page title must contain after login.
    pub expected_title: String,
    /// Regex with one capture group extracting the id from an instance URL.
    pub id_pattern: String,
    pub locate_mode: LocateMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://moc.otdm.ca".to_string(),
            login_route: "/tabs/dashboard".to_string(),
            list_route: "/tabs/all-emocs".to_string(),
            instance_route: "/moc-builder/type/moc_facility_full/id/{id}".to_string(),
            expected_title: "Host App".to_string(),
            id_pattern: r"/id/(eMOC_\d+)".to_string(),
            locate_mode: LocateMode::default(),
        }
    }
}

impl AppConfig {
    /// Join a route onto the base URL.
    #[must_use]
    pub fn url(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }

    #[must_use]
    pub fn login_url(&self) -> String {
        self.url(&self.login_route)
    }

    #[must_use]
    pub fn list_url(&self) -> String {
        self.url(&self.list_route)
    }

    #[must_use]
    pub fn instance_url(&self, id: &str) -> String {
        self.url(&self.instance_route.replace("{id}", id))
    }

    /// Scheme and host of the base URL.
    #[must_use]
    pub fn origin(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match base.find("://") {
            Some(scheme_end) => {
                let rest = &base[scheme_end + 3..];
                let host_end = rest.find('/').map_or(base.len(), |i| scheme_end + 3 + i);
                base[..host_end].to_string()
            }
            None => base.to_string(),
        }
    }

    /// Compile the id pattern.
    pub fn id_regex(&self) -> crate::Result<regex::Regex> {
        let regex = regex::Regex::new(&self.id_pattern).map_err(|e| {
            ConfigError::ValidationError(format!("app.id_pattern is not a valid regex: {e}"))
        })?;
        if regex.captures_len() < 2 {
            return Err(ConfigError::ValidationError(
                "app.id_pattern must contain a capture group".to_string(),
            )
            .into());
        }
        Ok(regex)
    }
}

// =============================================================================
// Browser
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_ms: u64,
    pub action_timeout_ms: u64,
    /// Chromium executable; auto-detected when unset.
    pub executable: Option<String>,
    /// Root of the per-actor profile directories (supports ~ expansion).
    pub profiles_dir: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            navigation_timeout_ms: 30_000,
            action_timeout_ms: 10_000,
            executable: None,
            profiles_dir: "~/.local/share/mocrun/browser_profiles".to_string(),
        }
    }
}

// =============================================================================
// Timeouts
// =============================================================================

/// Wait budgets, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Per-strategy element wait.
    pub element_ms: u64,
    /// Notification surface wait after submit.
    pub alert_ms: u64,
    /// Search results wait.
    pub search_ms: u64,
    /// Pause after actions that re-render the form.
    pub settle_ms: u64,
    /// Pause after an upstream cascading selection.
    pub cascade_settle_ms: u64,
    /// Identity-provider redirect back to the application.
    pub login_redirect_ms: u64,
    /// Pause after opening a calendar.
    pub calendar_open_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            element_ms: 5_000,
            alert_ms: 10_000,
            search_ms: 10_000,
            settle_ms: 500,
            cascade_settle_ms: 2_000,
            login_redirect_ms: 60_000,
            calendar_open_ms: 1_500,
        }
    }
}

impl TimeoutsConfig {
    #[must_use]
    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    #[must_use]
    pub fn alert(&self) -> Duration {
        Duration::from_millis(self.alert_ms)
    }

    #[must_use]
    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    #[must_use]
    pub fn cascade_settle(&self) -> Duration {
        Duration::from_millis(self.cascade_settle_ms)
    }

    #[must_use]
    pub fn login_redirect(&self) -> Duration {
        Duration::from_millis(self.login_redirect_ms)
    }

    #[must_use]
    pub fn calendar_open(&self) -> Duration {
        Duration::from_millis(self.calendar_open_ms)
    }

    fn validate(&self) -> Result<(), String> {
        let required = [
            ("element_ms", self.element_ms),
            ("alert_ms", self.alert_ms),
            ("search_ms", self.search_ms),
            ("login_redirect_ms", self.login_redirect_ms),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(format!("timeouts.{name} must be >= 1"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Store / artifacts / credentials
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Correlation file (supports ~ expansion).
    pub path: String,
    /// History key prefix (`<prefix>_<epoch millis>`).
    pub history_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "test-data/moc-numbers.json".to_string(),
            history_prefix: crate::store::DEFAULT_HISTORY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub enabled: bool,
    pub dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "test-results/mocrun".to_string(),
        }
    }
}

/// Default usernames. Passwords are only read from `MOCRUN_<ROLE>_PASS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub requester_user: String,
    pub coordinator_user: String,
    pub acceptor_user: String,
    pub owner_user: String,
    pub approver_user: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            requester_user: "moc_requester1".to_string(),
            coordinator_user: "moc_coordinator1".to_string(),
            acceptor_user: "moc_acceptor1".to_string(),
            owner_user: "moc_owner1".to_string(),
            approver_user: "moc_approver1".to_string(),
        }
    }
}

// =============================================================================
// Stage input data
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StagesConfig {
    pub request: RequestData,
    pub coordinate: CoordinatorData,
    pub accept: AcceptorData,
    pub owner_risk: OwnerRiskData,
    pub owner_planning: OwnerPlanningData,
    pub approve: ApproverData,
}

/// How date fields are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateEntry {
    /// Open the calendar popup and click the day.
    #[default]
    Calendar,
    /// Type month, day and year into the field's spinbuttons.
    Typed,
}

/// Section 1 (Change - Facility) form data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestData {
    pub title: String,
    pub departments: Vec<String>,
    pub disciplines: Vec<String>,
    pub sub_disciplines: Vec<String>,
    pub driver: String,
    pub priority: String,
    pub privacy_policy: String,
    pub sites: Vec<String>,
    pub fields: Vec<String>,
    pub locations: Vec<String>,
    pub description: String,
    pub justification: String,
    pub proposed_start_date: String,
    pub proposed_end_date: String,
    pub estimated_implementation_date: String,
    pub date_entry: DateEntry,
    pub duration: String,
    /// Select the first asset row in the asset modal.
    pub add_asset: bool,
    pub budget_type: String,
    pub estimated_cost: String,
    pub account_type: String,
    pub request_acceptor: String,
    /// Typed into the acceptor dropdown filter when one is rendered.
    pub request_acceptor_filter: String,
}

impl Default for RequestData {
    fn default() -> Self {
        let s = |v: &str| v.to_string();
        Self {
            title: s("Emoc-0004562-2025-12-16"),
            departments: vec![s("Downstream"), s("Engineering")],
            disciplines: vec![s("Distribution"), s("Drilling Engineering")],
            sub_disciplines: vec![
                s("Directional Drilling"),
                s("Mud Engineering"),
                s("Well Design"),
            ],
            driver: s("Capital Project"),
            priority: s("Medium"),
            privacy_policy: s("Unrestricted"),
            sites: vec![s("AA DAIRY")],
            fields: vec![s("1")],
            locations: vec![s("AA DAIRY 1")],
            description: s("emoc000562- description"),
            justification: s("emoc000562 - justification"),
            proposed_start_date: s("12/20/2025"),
            proposed_end_date: s("12/25/2025"),
            estimated_implementation_date: s("12/30/2025"),
            date_entry: DateEntry::default(),
            duration: s("Permanent"),
            add_asset: true,
            budget_type: s("CAPEX"),
            estimated_cost: s("40"),
            account_type: s("moc000562"),
            request_acceptor: s("MOC Acceptor1"),
            request_acceptor_filter: s("accep"),
        }
    }
}

/// Coordinator screening decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Decision {
    #[default]
    Pass,
    Reject,
}

impl Decision {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Reject => "Reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorData {
    pub decision: Decision,
    /// `{id}` is replaced with the workflow id.
    pub justification: String,
}

impl Default for CoordinatorData {
    fn default() -> Self {
        Self {
            decision: Decision::Pass,
            justification: "MOC {id} approved by coordinator - All requirements met".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptorData {
    pub owner: String,
    pub comment: String,
}

impl Default for AcceptorData {
    fn default() -> Self {
        Self {
            owner: "MOC Owner1".to_string(),
            comment: "approved by acceptor1".to_string(),
        }
    }
}

/// One risk assessment method and the matrix rating to pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskMethod {
    pub method: String,
    pub rating: String,
}

/// Owner Section 3 (risk assessment and endorsement) data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerRiskData {
    /// Query typed into the stakeholder modal search box.
    pub stakeholder_search: String,
    pub stakeholder_name: String,
    pub stakeholder_role: String,
    pub plan_document_name: String,
    pub phase: String,
    pub document_type: String,
    pub department: String,
    pub discipline: String,
    pub sub_discipline: String,
    pub completion_state: String,
    pub plan_date: String,
    pub endorsers: String,
    pub endorsers_filter: String,
    pub description: String,
    /// 0-based indices of the "yes" answers in the suggested-method questionnaire.
    pub suggested_method_answers: Vec<usize>,
    pub risk_methods: Vec<RiskMethod>,
    /// `{id}` is replaced with the workflow id.
    pub risk_justification: String,
}

impl Default for OwnerRiskData {
    fn default() -> Self {
        let s = |v: &str| v.to_string();
        Self {
            stakeholder_search: s("asset owner"),
            stakeholder_name: s("MOC Asset Owners1"),
            stakeholder_role: s("Endorse"),
            plan_document_name: s("plan doc section 3"),
            phase: s("Initiation"),
            document_type: s("Drawing"),
            department: s("Engineering"),
            discipline: s("Drilling Engineering"),
            sub_discipline: s("Directional Drilling"),
            completion_state: s("Draft"),
            plan_date: s("01/01/2027"),
            endorsers: s("MOC Asset Owners1"),
            endorsers_filter: s("ass"),
            description: s("plan for 2027"),
            suggested_method_answers: vec![2, 3, 4, 5, 6, 7],
            risk_methods: vec![
                RiskMethod {
                    method: s("RA Matrix"),
                    rating: s("Low"),
                },
                RiskMethod {
                    method: s("What if"),
                    rating: s("Extreme 16"),
                },
            ],
            risk_justification: s("MOC {id} - Risk Assessment Complete"),
        }
    }
}

/// Owner Section 4 (execution planning) review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerPlanningData {
    pub heading: String,
    pub subsections: Vec<String>,
    pub indicators: Vec<String>,
    /// Terminal submit button label; no submit when unset.
    pub submit: Option<String>,
}

impl Default for OwnerPlanningData {
    fn default() -> Self {
        let s = |v: &str| v.to_string();
        Self {
            heading: s("4.0 Execution Planning"),
            subsections: vec![
                s("4.1 Ranking"),
                s("4.2 Implementation Details"),
                s("4.3 Milestone Schedule"),
                s("4.4 Project Schedule Summary"),
                s("4.5 Assign MOC Approver"),
                s("4.6 Approval for Implementation"),
            ],
            indicators: vec![s("Change Type"), s("Change Driver"), s("Complexity")],
            submit: None,
        }
    }
}

/// Approver decision path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPath {
    /// Release Approval → Approve → comment → remark dialog.
    #[default]
    Release,
    /// Comment field plus a decision button.
    Decision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproverData {
    pub path: ApprovalPath,
    pub comment: String,
    /// Approve, Request Changes or Reject (decision path only).
    pub decision: String,
}

impl Default for ApproverData {
    fn default() -> Self {
        Self {
            path: ApprovalPath::Release,
            comment: "approved by approver1".to_string(),
            decision: "Approve".to_string(),
        }
    }
}

// =============================================================================
// Config Loading
// =============================================================================

/// CLI overrides applied after env overrides
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_file: Option<String>,
    pub base_url: Option<String>,
    pub store_path: Option<String>,
    pub headless: Option<bool>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(ref log_level) = self.log_level {
            config.general.log_level.clone_from(log_level);
        }
        if let Some(log_format) = self.log_format {
            config.general.log_format = log_format;
        }
        if let Some(ref log_file) = self.log_file {
            config.general.log_file = Some(log_file.clone());
        }
        if let Some(ref base_url) = self.base_url {
            config.app.base_url.clone_from(base_url);
        }
        if let Some(ref store_path) = self.store_path {
            config.store.path.clone_from(store_path);
        }
        if let Some(headless) = self.headless {
            config.browser.headless = headless;
        }
    }

    /// `MOCRUN_*` environment variables; applied before CLI flags.
    fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let mut overrides = Self::default();

        if let Some(value) = lookup("MOCRUN_LOG_LEVEL") {
            overrides.log_level = Some(value);
        }
        if let Some(value) = lookup("MOCRUN_LOG_FORMAT") {
            overrides.log_format = Some(value.parse::<LogFormat>().map_err(crate::Error::Config)?);
        }
        if let Some(value) = lookup("MOCRUN_LOG_FILE") {
            overrides.log_file = Some(value);
        }
        if let Some(value) = lookup("MOCRUN_BASE_URL") {
            overrides.base_url = Some(value);
        }
        if let Some(value) = lookup("MOCRUN_STORE_PATH") {
            overrides.store_path = Some(value);
        }
        if let Some(value) = lookup("MOCRUN_HEADLESS") {
            overrides.headless = Some(parse_env_bool(&value)?);
        }

        Ok(overrides)
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./mocrun.toml (current directory)
    /// 2. $XDG_CONFIG_HOME/mocrun/mocrun.toml or ~/.config/mocrun/mocrun.toml
    /// 3. Default values
    pub fn load() -> crate::Result<Self> {
        let cwd_config = Path::new(CONFIG_FILE_NAME);
        if cwd_config.exists() {
            return Self::load_from(cwd_config);
        }

        if let Some(dir) = dirs_config_path() {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load_from(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    /// Load configuration with overrides and validation
    ///
    /// Resolution order: defaults -> config file -> env -> CLI overrides.
    /// An explicit path that does not exist is an error.
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> crate::Result<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => Self::load_from(path)?,
            Some(path) => {
                return Err(ConfigError::FileNotFound(path.display().to_string()).into());
            }
            None => Self::load()?,
        };

        ConfigOverrides::from_env()?.apply(&mut config);
        overrides.apply(&mut config);
        config.normalize_paths();
        config.validate()?;

        Ok(config)
    }

    /// Normalize path fields by expanding tildes
    pub fn normalize_paths(&mut self) {
        if let Some(log_file) = self.general.log_file.take() {
            self.general.log_file = Some(path_to_string(&expand_tilde(&log_file)));
        }
        self.store.path = path_to_string(&expand_tilde(&self.store.path));
        self.artifacts.dir = path_to_string(&expand_tilde(&self.artifacts.dir));
        self.browser.profiles_dir = path_to_string(&expand_tilde(&self.browser.profiles_dir));
    }

    /// Validate semantic constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.app.base_url.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("app.base_url must not be empty".to_string()).into(),
            );
        }
        if !self.app.instance_route.contains("{id}") {
            return Err(ConfigError::ValidationError(
                "app.instance_route must contain the {id} placeholder".to_string(),
            )
            .into());
        }
        self.app.id_regex()?;
        self.timeouts
            .validate()
            .map_err(ConfigError::ValidationError)?;
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(ConfigError::ValidationError(
                "browser viewport dimensions must be >= 1".to_string(),
            )
            .into());
        }
        if self.store.path.trim().is_empty() {
            return Err(
                ConfigError::ValidationError("store.path must not be empty".to_string()).into(),
            );
        }
        if self.store.history_prefix.is_empty()
            || !self
                .store
                .history_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::ValidationError(
                "store.history_prefix must be non-empty ASCII alphanumerics".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Get the config directory path (XDG on Linux, Library on macOS)
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support").join("mocrun"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|p| p.join("mocrun"))
    }
}

/// Expand ~ to home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(suffix) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(suffix);
        }
    }
    PathBuf::from(path)
}

pub(crate) fn parse_env_bool(value: &str) -> crate::Result<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "Invalid boolean value '{value}' for environment override"
        ))
        .into()),
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn toml_round_trip_keeps_stage_data() {
        let mut config = Config::default();
        config.stages.coordinate.decision = Decision::Reject;
        config.stages.request.sites = vec!["BB FARM".to_string()];
        config.app.locate_mode = LocateMode::DirectUrl;

        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(parsed.stages.coordinate.decision, Decision::Reject);
        assert_eq!(parsed.stages.request.sites, vec!["BB FARM".to_string()]);
        assert_eq!(parsed.app.locate_mode, LocateMode::DirectUrl);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [app]
            base_url = "https://staging.example"

            [stages.approve]
            path = "decision"
            decision = "Request Changes"
            "#,
        )
        .unwrap();
        assert_eq!(config.app.base_url, "https://staging.example");
        assert_eq!(config.app.list_route, "/tabs/all-emocs");
        assert_eq!(config.stages.approve.path, ApprovalPath::Decision);
        assert_eq!(config.stages.approve.comment, "approved by approver1");
        assert_eq!(config.timeouts.login_redirect_ms, 60_000);
    }

    #[test]
    fn env_then_cli_overrides() {
        let env: HashMap<&str, &str> = [
            ("MOCRUN_LOG_LEVEL", "debug"),
            ("MOCRUN_STORE_PATH", "env.json"),
            ("MOCRUN_HEADLESS", "off"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        ConfigOverrides::from_lookup(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.general.log_level, "debug");
        assert!(!config.browser.headless);

        let cli = ConfigOverrides {
            store_path: Some("cli.json".to_string()),
            headless: Some(true),
            ..ConfigOverrides::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.store.path, "cli.json");
        assert!(config.browser.headless);
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn invalid_env_format_is_rejected() {
        let err = ConfigOverrides::from_lookup(|k| {
            (k == "MOCRUN_LOG_FORMAT").then(|| "xml".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("invalid log format"));
    }

    #[test]
    fn validate_rejects_pattern_without_group() {
        let mut config = Config::default();
        config.app.id_pattern = r"/id/eMOC_\d+".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("capture group"));
    }

    #[test]
    fn validate_rejects_zero_timeouts_and_blank_base() {
        let mut config = Config::default();
        config.timeouts.alert_ms = 0;
        assert!(config.validate().unwrap_err().to_string().contains("alert_ms"));

        let mut config = Config::default();
        config.app.base_url = "  ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("base_url"));
    }

    #[test]
    fn urls_are_joined_and_origin_extracted() {
        let app = AppConfig {
            base_url: "https://moc.otdm.ca/".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(app.login_url(), "https://moc.otdm.ca/tabs/dashboard");
        assert_eq!(
            app.instance_url("eMOC_0004562"),
            "https://moc.otdm.ca/moc-builder/type/moc_facility_full/id/eMOC_0004562"
        );
        assert_eq!(app.origin(), "https://moc.otdm.ca");
    }

    #[test]
    fn parse_env_bool_accepts_values() {
        assert!(parse_env_bool("true").unwrap());
        assert!(parse_env_bool("1").unwrap());
        assert!(!parse_env_bool("false").unwrap());
        assert!(parse_env_bool("Yes").unwrap());
        assert!(!parse_env_bool("off").unwrap());
        assert!(parse_env_bool("maybe").is_err());
    }

    #[test]
    fn load_with_missing_explicit_path_fails() {
        let err = Config::load_with_overrides(
            Some(Path::new("/definitely/not/here/mocrun.toml")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[store]\npath = \"data/ids.json\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.path, "data/ids.json");
    }
}
