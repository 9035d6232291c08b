//! Tracing setup and the span vocabulary shared by every actor run.
//!
//! Each stage runs inside a `stage` span carrying `stage`, `role` and
//! `instance_id`, so any line of a pretty or JSON log can be tied to the
//! actor and the workflow instance it acted for. Resolver events add
//! `descriptor`, `strategy_index` and `attempt`.
//!
//! Passwords never reach a field: [`crate::auth::ActorCredential`] redacts
//! its `Debug` output.

use std::fs::OpenOptions;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::Span;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::config::LogFormat;
use crate::config::GeneralConfig;
use crate::stages::StageKind;
use crate::store::WorkflowId;

static INITIALIZED: OnceLock<()> = OnceLock::new();

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// Where and how a run logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Append-only copy of the log, in the same format.
    pub file: Option<PathBuf>,
}

impl From<&GeneralConfig> for LogConfig {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            level: general.log_level.clone(),
            format: general.log_format,
            file: general.log_file.as_ref().map(PathBuf::from),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level '{0}'; expected off, error, warn, info, debug or trace")]
    InvalidLevel(String),

    #[error("failed to open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Span wrapping one stage run.
#[must_use]
pub fn stage_span(kind: StageKind, instance: Option<&WorkflowId>) -> Span {
    tracing::info_span!(
        "stage",
        stage = kind.as_str(),
        role = kind.role().as_str(),
        instance_id = instance.map_or("-", WorkflowId::as_str),
    )
}

fn filter_for(config: &LogConfig) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level: LevelFilter = config
        .level
        .trim()
        .parse()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;
    Ok(EnvFilter::default().add_directive(level.into()))
}

fn layer_for<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Log files may hold usernames and instance ids: owner-only on unix.
fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let existed = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    if !existed {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = existed;
    Ok(file)
}

/// Install the global subscriber: stderr plus the optional file copy.
///
/// A second call returns [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = filter_for(config)?;
    let mut layers = vec![layer_for(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(layer_for(config.format, Mutex::new(file), false));
    }
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layers))?;
    let _ = INITIALIZED.set(());

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}
