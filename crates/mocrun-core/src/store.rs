//! Workflow correlation store.
//!
//! Each stage runs in its own process; what they share is the identifier
//! of the most recently created workflow instance and the last stage each
//! instance was verified at. The store keeps both in one JSON object:
//!
//! ```json
//! {
//!   "latest": "eMOC_0004562",
//!   "progress": { "eMOC_0004562": "coordinated" },
//!   "moc_1765872000123": "eMOC_0004562"
//! }
//! ```
//!
//! Writes are whole-document read-modify-write through a temp file and a
//! rename. There is no locking: concurrent writers race and the last one wins.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;
use crate::error::{StoreError, WorkflowError};

/// Default history key prefix.
pub const DEFAULT_HISTORY_PREFIX: &str = "moc";

/// Opaque workflow instance identifier (e.g. `eMOC_0004562`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> std::result::Result<Self, WorkflowError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(WorkflowError::InvalidInstanceId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Extract the identifier from an instance URL using the first capture group.
    #[must_use]
    pub fn from_url(url: &str, pattern: &Regex) -> Option<Self> {
        pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Self::new(m.as_str()).ok())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = WorkflowError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

/// Lifecycle position of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    Coordinated,
    Accepted,
    /// Owner Section 3 (risk and endorsement) submitted.
    Owned,
    /// Owner Section 4 (execution planning) reviewed.
    Planned,
    Approved,
}

impl Stage {
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Coordinated),
            Self::Coordinated => Some(Self::Accepted),
            Self::Accepted => Some(Self::Owned),
            Self::Owned => Some(Self::Planned),
            Self::Planned => Some(Self::Approved),
            Self::Approved => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Coordinated => "coordinated",
            Self::Accepted => "accepted",
            Self::Owned => "owned",
            Self::Planned => "planned",
            Self::Approved => "approved",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow instance as known to this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub created_at: Option<DateTime<Utc>>,
    /// Last stage a verified run reached.
    pub stage: Option<Stage>,
}

/// On-disk document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    /// Last verified stage per instance id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub progress: BTreeMap<String, Stage>,
    #[serde(flatten)]
    pub history: BTreeMap<String, String>,
}

impl CorrelationRecord {
    /// Set `latest` and add a history entry keyed `<prefix>_<millis>`.
    ///
    /// A key collision in the same millisecond gets a `_<n>` suffix.
    pub fn record(&mut self, id: &WorkflowId, prefix: &str, at: DateTime<Utc>) -> String {
        let base = format!("{prefix}_{}", at.timestamp_millis());
        let mut key = base.clone();
        let mut n = 1u32;
        while self.history.contains_key(&key) {
            key = format!("{base}_{n}");
            n += 1;
        }
        self.history.insert(key.clone(), id.to_string());
        self.latest = Some(id.to_string());
        key
    }

    pub fn advance(&mut self, id: &WorkflowId, stage: Stage) {
        self.progress.insert(id.to_string(), stage);
    }

    #[must_use]
    pub fn stage_of(&self, id: &WorkflowId) -> Option<Stage> {
        self.progress.get(id.as_str()).copied()
    }

    /// Creation time recovered from the newest history key pointing at `id`.
    #[must_use]
    pub fn created_at(&self, id: &WorkflowId, prefix: &str) -> Option<DateTime<Utc>> {
        let stem = format!("{prefix}_");
        self.history
            .iter()
            .filter(|(_, value)| value.as_str() == id.as_str())
            .filter_map(|(key, _)| {
                let millis = key.strip_prefix(&stem)?.split('_').next()?;
                millis.parse::<i64>().ok()
            })
            .max()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Timestamped entries, oldest first.
    #[must_use]
    pub fn entries(&self, prefix: &str) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .history
            .iter()
            .filter_map(|(key, value)| {
                let millis: i64 = key
                    .strip_prefix(prefix)?
                    .strip_prefix('_')?
                    .split('_')
                    .next()?
                    .parse()
                    .ok()?;
                Some(HistoryEntry {
                    key: key.clone(),
                    id: WorkflowId::new(value.clone()).ok()?,
                    recorded_at: Utc.timestamp_millis_opt(millis).single(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then_with(|| a.key.cmp(&b.key)));
        entries
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub key: String,
    pub id: WorkflowId,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Narrow persistence interface for the cross-run handoff.
pub trait WorkflowStore: Send + Sync {
    /// Record a newly created instance; returns the history key.
    fn record_new(&self, id: &WorkflowId) -> Result<String>;

    /// Remember that `id` was verified at `stage`.
    fn record_stage(&self, id: &WorkflowId, stage: Stage) -> Result<()>;

    /// The most recently recorded identifier.
    fn read_latest(&self) -> Result<WorkflowId>;

    /// The latest identifier with its recovered creation time.
    fn read_latest_instance(&self) -> Result<WorkflowInstance>;

    /// All timestamped entries, oldest first.
    fn history(&self) -> Result<Vec<HistoryEntry>>;

    /// Where the store lives, for diagnostics.
    fn describe(&self) -> String;
}

fn latest_of(record: &CorrelationRecord, store: &str) -> Result<WorkflowId> {
    let latest = record
        .latest
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkflowError::NoWorkflowRecorded {
            store: store.to_string(),
        })?;
    Ok(WorkflowId::new(latest)?)
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    prefix: String,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix: DEFAULT_HISTORY_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. A missing file reads as empty.
    pub fn load(&self) -> Result<CorrelationRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CorrelationRecord::default());
            }
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(CorrelationRecord::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            StoreError::Corrupt {
                path: self.path.display().to_string(),
                details: e.to_string(),
            }
            .into()
        })
    }

    fn save(&self, record: &CorrelationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// [`WorkflowStore::record_new`] with an explicit timestamp.
    pub fn record_at(&self, id: &WorkflowId, at: DateTime<Utc>) -> Result<String> {
        let mut record = self.load()?;
        let key = record.record(id, &self.prefix, at);
        self.save(&record)?;
        info!(instance_id = %id, key = %key, path = %self.path.display(), "Recorded workflow instance");
        Ok(key)
    }
}

impl WorkflowStore for JsonFileStore {
    fn record_new(&self, id: &WorkflowId) -> Result<String> {
        self.record_at(id, Utc::now())
    }

    fn record_stage(&self, id: &WorkflowId, stage: Stage) -> Result<()> {
        let mut record = self.load()?;
        record.advance(id, stage);
        self.save(&record)?;
        debug!(instance_id = %id, stage = %stage, "Recorded stage progress");
        Ok(())
    }

    fn read_latest(&self) -> Result<WorkflowId> {
        let id = latest_of(&self.load()?, &self.describe())?;
        debug!(instance_id = %id, "Read latest workflow instance");
        Ok(id)
    }

    fn read_latest_instance(&self) -> Result<WorkflowInstance> {
        let record = self.load()?;
        let id = latest_of(&record, &self.describe())?;
        Ok(WorkflowInstance {
            created_at: record.created_at(&id, &self.prefix),
            stage: record.stage_of(&id),
            id,
        })
    }

    fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.load()?.entries(&self.prefix))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<CorrelationRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `latest` is already `id`.
    #[must_use]
    pub fn with_latest(id: &WorkflowId) -> Self {
        let store = Self::default();
        store.lock().record(id, DEFAULT_HISTORY_PREFIX, Utc::now());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CorrelationRecord> {
        self.record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl WorkflowStore for MemoryStore {
    fn record_new(&self, id: &WorkflowId) -> Result<String> {
        Ok(self.lock().record(id, DEFAULT_HISTORY_PREFIX, Utc::now()))
    }

    fn record_stage(&self, id: &WorkflowId, stage: Stage) -> Result<()> {
        self.lock().advance(id, stage);
        Ok(())
    }

    fn read_latest(&self) -> Result<WorkflowId> {
        latest_of(&self.lock(), &self.describe())
    }

    fn read_latest_instance(&self) -> Result<WorkflowInstance> {
        let record = self.lock();
        let id = latest_of(&record, &self.describe())?;
        Ok(WorkflowInstance {
            created_at: record.created_at(&id, DEFAULT_HISTORY_PREFIX),
            stage: record.stage_of(&id),
            id,
        })
    }

    fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.lock().entries(DEFAULT_HISTORY_PREFIX))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Explicit per-run workflow context handed to stage controllers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowContext {
    pub instance: Option<WorkflowInstance>,
    store: String,
}

impl WorkflowContext {
    /// Load the latest instance. An empty store yields an empty context.
    pub fn load(store: &dyn WorkflowStore) -> Result<Self> {
        let instance = match store.read_latest_instance() {
            Ok(instance) => Some(instance),
            Err(crate::Error::Workflow(WorkflowError::NoWorkflowRecorded { .. })) => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            instance,
            store: store.describe(),
        })
    }

    /// Context for a run that creates its own instance.
    #[must_use]
    pub fn originating() -> Self {
        Self::default()
    }

    /// Context pinned to a known instance.
    #[must_use]
    pub fn for_instance(id: WorkflowId) -> Self {
        Self {
            instance: Some(WorkflowInstance {
                id,
                created_at: None,
                stage: None,
            }),
            store: String::new(),
        }
    }

    /// The instance this stage operates on, or `NoWorkflowRecorded`.
    pub fn require_instance(&self) -> Result<&WorkflowInstance> {
        self.instance.as_ref().ok_or_else(|| {
            WorkflowError::NoWorkflowRecorded {
                store: if self.store.is_empty() {
                    "<none>".to_string()
                } else {
                    self.store.clone()
                },
            }
            .into()
        })
    }

    #[must_use]
    pub fn instance_id(&self) -> Option<&WorkflowId> {
        self.instance.as_ref().map(|i| &i.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    fn id(s: &str) -> WorkflowId {
        WorkflowId::new(s).unwrap()
    }

    #[test]
    fn id_from_url() {
        let pattern = Regex::new(r"/id/(eMOC_\d+)").unwrap();
        let url = "https://moc.otdm.ca/moc-builder/type/moc_facility_full/id/eMOC_0004562";
        assert_eq!(WorkflowId::from_url(url, &pattern), Some(id("eMOC_0004562")));
        assert_eq!(WorkflowId::from_url("https://moc.otdm.ca/tabs/dashboard", &pattern), None);
    }

    #[test]
    fn id_rejects_blank_and_whitespace() {
        assert!(WorkflowId::new("  ").is_err());
        assert!(WorkflowId::new("eMOC 1").is_err());
        assert_eq!(id(" eMOC_1 ").as_str(), "eMOC_1");
    }

    #[test]
    fn record_then_read_keeps_history() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("test-data/moc-numbers.json"));

        let t0 = Utc.timestamp_millis_opt(1_765_872_000_123).unwrap();
        let t1 = Utc.timestamp_millis_opt(1_765_872_999_000).unwrap();
        store.record_at(&id("eMOC_0000001"), t0).unwrap();
        assert_eq!(store.read_latest().unwrap(), id("eMOC_0000001"));

        store.record_at(&id("eMOC_0000002"), t1).unwrap();
        assert_eq!(store.read_latest().unwrap(), id("eMOC_0000002"));

        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, id("eMOC_0000001"));
        assert_eq!(history[0].key, "moc_1765872000123");

        let instance = store.read_latest_instance().unwrap();
        assert_eq!(instance.created_at, Some(t1));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["latest"], "eMOC_0000002");
        assert_eq!(raw["moc_1765872000123"], "eMOC_0000001");
    }

    #[test]
    fn stage_progress_survives_reload_and_new_records() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("moc-numbers.json"));
        store.record_new(&id("eMOC_0000001")).unwrap();
        store.record_stage(&id("eMOC_0000001"), Stage::Coordinated).unwrap();

        let reopened = JsonFileStore::new(store.path());
        assert_eq!(
            reopened.read_latest_instance().unwrap().stage,
            Some(Stage::Coordinated)
        );
        // progress is not a history entry
        assert_eq!(reopened.history().unwrap().len(), 1);

        reopened.record_new(&id("eMOC_0000002")).unwrap();
        assert_eq!(reopened.read_latest_instance().unwrap().stage, None);
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["progress"]["eMOC_0000001"], "coordinated");
    }

    #[test]
    fn same_millisecond_does_not_overwrite_history() {
        let mut record = CorrelationRecord::default();
        let at = Utc.timestamp_millis_opt(1_000).unwrap();
        let a = record.record(&id("eMOC_1"), "moc", at);
        let b = record.record(&id("eMOC_2"), "moc", at);
        assert_eq!(a, "moc_1000");
        assert_eq!(b, "moc_1000_1");
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.entries("moc").len(), 2);
    }

    #[test]
    fn merges_with_unrelated_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("moc-numbers.json");
        fs::write(&path, r#"{"latest":"eMOC_9","note":"kept"}"#).unwrap();
        let store = JsonFileStore::new(&path);
        store.record_new(&id("eMOC_10")).unwrap();
        let record = store.load().unwrap();
        assert_eq!(record.history.get("note").map(String::as_str), Some("kept"));
        assert_eq!(record.latest.as_deref(), Some("eMOC_10"));
    }

    #[test]
    fn missing_or_empty_store_is_no_workflow_recorded() {
        let dir = TempDir::new().unwrap();
        let missing = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(matches!(
            missing.read_latest(),
            Err(Error::Workflow(WorkflowError::NoWorkflowRecorded { .. }))
        ));

        let path = dir.path().join("empty.json");
        fs::write(&path, "{\"latest\": \"\"}").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).read_latest(),
            Err(Error::Workflow(WorkflowError::NoWorkflowRecorded { .. }))
        ));
    }

    #[test]
    fn corrupt_store_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).read_latest(),
            Err(Error::Store(StoreError::Corrupt { .. }))
        ));
    }

    #[test]
    fn context_from_empty_store_requires_instance() {
        let store = MemoryStore::new();
        let ctx = WorkflowContext::load(&store).unwrap();
        assert!(ctx.instance.is_none());
        assert!(matches!(
            ctx.require_instance(),
            Err(Error::Workflow(WorkflowError::NoWorkflowRecorded { .. }))
        ));

        let store = MemoryStore::with_latest(&id("eMOC_42"));
        let ctx = WorkflowContext::load(&store).unwrap();
        assert_eq!(ctx.instance_id(), Some(&id("eMOC_42")));
        assert!(ctx.require_instance().unwrap().created_at.is_some());
    }

    #[test]
    fn stage_sequence() {
        let mut stage = Stage::Created;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&Stage::Approved));
    }
}
