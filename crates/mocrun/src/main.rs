//! mocrun CLI
//!
//! Runs one eMOC approval stage per invocation and keeps the workflow id
//! that links the stages in the correlation file.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use mocrun_core::auth::{ActorCredential, Role};
use mocrun_core::config::{Config, ConfigOverrides, LogFormat};
use mocrun_core::date::CalendarDate;
use mocrun_core::logging::{LogConfig, LogError, init_logging};
use mocrun_core::runner::StageRunner;
use mocrun_core::stages::{ListQuery, StageKind, StageReport};
use mocrun_core::store::{JsonFileStore, WorkflowContext, WorkflowId, WorkflowStore};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("MOCRUN_GIT_HASH"),
    env!("MOCRUN_GIT_DIRTY"),
    ", built ",
    env!("MOCRUN_BUILD_TS"),
    ", ",
    env!("MOCRUN_TARGET"),
    ", features: ",
    env!("MOCRUN_FEATURES"),
    ")"
);

/// Exit code for `--strict` runs whose outcome was not verified.
const EXIT_UNVERIFIED: i32 = 2;

/// mocrun - eMOC approval workflow automation
#[derive(Parser)]
#[command(name = "mocrun")]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Application base URL (overrides app.base_url)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workflow stage as its actor
    Run {
        /// Stage: request, coordinate, accept, owner-risk, owner-planning, approve
        stage: StageKind,

        /// Correlation file (overrides store.path)
        #[arg(long)]
        store: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Exit with code 2 when the outcome is not verified
        #[arg(long)]
        strict: bool,

        /// Print the stage report as JSON
        #[arg(long)]
        json: bool,

        /// Failure report directory (overrides artifacts.dir)
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Log in as an actor and browse the instance list
    List {
        /// Actor whose list is browsed
        #[arg(long = "as", value_name = "ROLE", default_value = "requester")]
        role: Role,

        /// Restrict the list to one status, e.g. "Pending Approval"
        #[arg(long)]
        status: Option<String>,

        /// Sort by the column whose header contains this text
        #[arg(long)]
        sort: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Inspect or edit the correlation file
    Store {
        /// Correlation file (overrides store.path)
        #[arg(long, global = true)]
        store: Option<String>,

        #[command(subcommand)]
        command: StoreCommands,
    },

    /// Show or validate the effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Parse a date the way the date picker does
    ParseDate {
        /// MM/DD/YYYY or YYYY-MM-DD
        value: String,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Print the latest id and the history
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Record an id as the latest instance
    Record {
        /// Workflow id, e.g. eMOC_0004562
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration and report credential availability
    Check,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            handle_fatal_error(&err);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let Cli {
        verbose,
        config,
        base_url,
        log_format,
        command,
    } = Cli::parse();

    let mut overrides = ConfigOverrides {
        base_url,
        log_format,
        ..ConfigOverrides::default()
    };
    if verbose {
        overrides.log_level = Some("debug".to_string());
    }
    match &command {
        Commands::Run { store, headed, .. } => {
            overrides.store_path.clone_from(store);
            if *headed {
                overrides.headless = Some(false);
            }
        }
        Commands::List { headed: true, .. } => overrides.headless = Some(false),
        Commands::Store { store, .. } => overrides.store_path.clone_from(store),
        Commands::List { .. } | Commands::Config { .. } | Commands::ParseDate { .. } => {}
    }

    let config_path = config.as_deref().map(Path::new);
    let config = Config::load_with_overrides(config_path, &overrides)?;
    init_logging_from_config(&config)?;

    match command {
        Commands::Run {
            stage,
            strict,
            json,
            artifacts,
            ..
        } => run_stage_command(&config, stage, strict, json, artifacts).await,
        Commands::List {
            role, status, sort, ..
        } => {
            list_command(&config, role, ListQuery { status, sort }).await?;
            Ok(0)
        }
        Commands::Store { command, .. } => {
            store_command(&config, command)?;
            Ok(0)
        }
        Commands::Config { command } => {
            config_command(&config, command)?;
            Ok(0)
        }
        Commands::ParseDate { value } => {
            let date = CalendarDate::parse(&value).map_err(mocrun_core::Error::from)?;
            println!("{date}");
            Ok(0)
        }
    }
}

// =============================================================================
// run
// =============================================================================

async fn run_stage_command(
    config: &Config,
    kind: StageKind,
    strict: bool,
    json: bool,
    artifacts: Option<PathBuf>,
) -> anyhow::Result<i32> {
    let start = Instant::now();
    let store = open_store(config);
    let mut runner = StageRunner::new(config, &store);
    if artifacts.is_some() {
        runner = runner.artifacts_dir(artifacts);
    }

    // Fail before launching a browser when there is nothing to act on.
    let ctx = runner.context(kind)?;
    let role = kind.role();
    let credential = ActorCredential::from_env(role, role.default_user(&config.credentials))?;

    tracing::info!(
        stage = %kind,
        role = %role,
        instance_id = ctx.instance_id().map_or("-", WorkflowId::as_str),
        "Starting stage"
    );
    let report = drive_browser(config, &runner, kind, &credential, &ctx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    tracing::info!(
        stage = %kind,
        verified = report.verified,
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Stage finished"
    );

    if strict && !report.verified {
        return Ok(EXIT_UNVERIFIED);
    }
    Ok(0)
}

async fn list_command(config: &Config, role: Role, query: ListQuery) -> anyhow::Result<()> {
    let store = open_store(config);
    let runner = StageRunner::new(config, &store);
    let credential = ActorCredential::from_env(role, role.default_user(&config.credentials))?;
    let rows = browse_list(config, &runner, &credential, &query).await?;
    println!("role:   {role}");
    println!("status: {}", query.status.as_deref().unwrap_or("all"));
    println!("sort:   {}", query.sort.as_deref().unwrap_or("-"));
    println!("rows:   {rows}");
    Ok(())
}

#[cfg(feature = "browser")]
async fn browse_list(
    config: &Config,
    runner: &StageRunner<'_>,
    credential: &ActorCredential,
    query: &ListQuery,
) -> anyhow::Result<usize> {
    use mocrun_core::page::cdp::{BrowserProfile, CdpBrowser};

    let profile = BrowserProfile::new(&config.browser.profiles_dir, credential.role.as_str());
    let browser = CdpBrowser::launch(&config.browser, &profile).await?;
    let outcome = match browser.new_page().await {
        Ok(page) => runner.login_and_browse(&page, credential, query).await,
        Err(err) => Err(err),
    };
    browser.close().await?;
    Ok(outcome?)
}

#[cfg(not(feature = "browser"))]
async fn browse_list(
    _config: &Config,
    _runner: &StageRunner<'_>,
    _credential: &ActorCredential,
    _query: &ListQuery,
) -> anyhow::Result<usize> {
    Err(no_browser_backend())
}

#[cfg(feature = "browser")]
async fn drive_browser(
    config: &Config,
    runner: &StageRunner<'_>,
    kind: StageKind,
    credential: &ActorCredential,
    ctx: &WorkflowContext,
) -> anyhow::Result<StageReport> {
    use mocrun_core::page::cdp::{BrowserProfile, CdpBrowser};

    let profile = BrowserProfile::new(&config.browser.profiles_dir, kind.role().as_str());
    let browser = CdpBrowser::launch(&config.browser, &profile).await?;
    let outcome = match browser.new_page().await {
        Ok(page) => runner.login_and_run(kind, &page, credential, ctx).await,
        Err(err) => Err(err),
    };
    browser.close().await?;
    Ok(outcome?)
}

#[cfg(not(feature = "browser"))]
async fn drive_browser(
    _config: &Config,
    _runner: &StageRunner<'_>,
    _kind: StageKind,
    _credential: &ActorCredential,
    _ctx: &WorkflowContext,
) -> anyhow::Result<StageReport> {
    Err(no_browser_backend())
}

#[cfg(not(feature = "browser"))]
fn no_browser_backend() -> anyhow::Error {
    mocrun_core::Error::Runtime(
        "this build has no browser backend; rebuild with `--features browser`".to_string(),
    )
    .into()
}

fn print_report(report: &StageReport) {
    let instance = report.instance_id().map_or("-", WorkflowId::as_str);
    println!("stage:        {} ({})", report.stage, report.role);
    println!("instance:     {instance}{}", if report.originated { " (new)" } else { "" });
    println!("reached:      {}", report.reached);
    println!(
        "notification: {}",
        report.notification.as_ref().map_or("-", |n| n.text.as_str())
    );
    println!("verified:     {}", if report.verified { "yes" } else { "no" });
    if let Some(next) = report.next {
        println!("next:         mocrun run {next}");
    }
    if report.has_advisories() {
        println!("advisories:");
        for advisory in &report.advisories {
            println!("  - {advisory}");
            if let Some(hint) = &advisory.remediation {
                println!("    {hint}");
            }
        }
    }
}

// =============================================================================
// store / config
// =============================================================================

fn open_store(config: &Config) -> JsonFileStore {
    JsonFileStore::new(&config.store.path).with_prefix(config.store.history_prefix.clone())
}

fn store_command(config: &Config, command: StoreCommands) -> anyhow::Result<()> {
    let store = open_store(config);
    match command {
        StoreCommands::Show { json } => {
            let history = store.history()?;
            let ctx = WorkflowContext::load(&store)?;
            if json {
                let value = serde_json::json!({
                    "store": store.describe(),
                    "latest": ctx.instance,
                    "history": history,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }
            println!("store:  {}", store.describe());
            match &ctx.instance {
                Some(instance) => println!(
                    "latest: {}{}",
                    instance.id,
                    instance
                        .created_at
                        .map(|at| format!(" (created {})", at.to_rfc3339()))
                        .unwrap_or_default()
                ),
                None => println!("latest: <none>"),
            }
            if let Some(stage) = ctx.instance.as_ref().and_then(|i| i.stage) {
                println!("stage:  {stage}");
            }
            for entry in history {
                let at = entry
                    .recorded_at
                    .map_or_else(|| "?".to_string(), |at| at.to_rfc3339());
                println!("  {at}  {}  {}", entry.id, entry.key);
            }
        }
        StoreCommands::Record { id } => {
            let id = WorkflowId::new(id).map_err(mocrun_core::Error::from)?;
            let key = store.record_new(&id)?;
            println!("recorded {id} as {key}");
        }
    }
    Ok(())
}

fn config_command(config: &Config, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", config.to_toml()?),
        ConfigCommands::Check => {
            println!("config ok");
            println!("  base url:   {}", config.app.base_url);
            println!("  store:      {}", config.store.path);
            println!(
                "  artifacts:  {}",
                if config.artifacts.enabled {
                    config.artifacts.dir.as_str()
                } else {
                    "disabled"
                }
            );
            for role in mocrun_core::auth::Role::ALL {
                let status = match ActorCredential::from_env(role, role.default_user(&config.credentials)) {
                    Ok(credential) => format!("ok ({})", credential.username),
                    Err(_) => format!("missing {}", role.password_variable()),
                };
                println!("  {:<12}{status}", format!("{role}:"));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Logging and errors
// =============================================================================

fn init_logging_from_config(config: &Config) -> anyhow::Result<()> {
    let log_config = LogConfig::from(&config.general);
    match init_logging(&log_config) {
        Ok(()) | Err(LogError::AlreadyInitialized) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn handle_fatal_error(err: &anyhow::Error) {
    if let Some(core_err) = err.downcast_ref::<mocrun_core::Error>() {
        eprintln!(
            "{}",
            mocrun_core::error::format_error_with_remediation(core_err)
        );
    } else {
        eprintln!("Error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_stage_aliases() {
        let cli = Cli::try_parse_from(["mocrun", "run", "owner-s4", "--strict", "--json"]).unwrap();
        match cli.command {
            Commands::Run {
                stage,
                strict,
                json,
                headed,
                ..
            } => {
                assert_eq!(stage, StageKind::OwnerPlanning);
                assert!(strict && json && !headed);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(Cli::try_parse_from(["mocrun", "run", "auditor"]).is_err());
    }

    #[test]
    fn list_takes_role_and_query() {
        let cli = Cli::try_parse_from([
            "mocrun",
            "list",
            "--as",
            "owner",
            "--status",
            "Pending Approval",
            "--sort",
            "Created",
        ])
        .unwrap();
        match cli.command {
            Commands::List {
                role,
                status,
                sort,
                headed,
            } => {
                assert_eq!(role, Role::Owner);
                assert_eq!(status.as_deref(), Some("Pending Approval"));
                assert_eq!(sort.as_deref(), Some("Created"));
                assert!(!headed);
            }
            _ => panic!("expected list"),
        }
        assert!(Cli::try_parse_from(["mocrun", "list", "--as", "auditor"]).is_err());
    }

    #[test]
    fn store_record_takes_an_id() {
        let cli = Cli::try_parse_from(["mocrun", "store", "--store", "x.json", "record", "eMOC_1"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Store {
                store: Some(_),
                command: StoreCommands::Record { .. }
            }
        ));
    }
}
