mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use scanlog_api::WebhookClient;
use scanlog_core::{ExitCode, ScanError, ScanResult, SyncState};
use scanlog_fs::{
    PushMode, ResolvedProfile, WorkspaceLock, WorkspacePaths, load_config, resolve_profile,
    resolve_workspace,
};
use scanlog_store::{RecordStore, SqliteStorage, resolve_token};
use scanlog_sync::{SharedStore, SyncEngine, shared_store};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "scanlog",
    version,
    about = "Local scan log with spreadsheet sync",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,

    #[arg(long, global = true, value_name = "URL")]
    endpoint: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Init,
    Doctor,
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    List,
    Use {
        name: String,
    },
    Set {
        #[arg(long)]
        name: Option<String>,

        #[arg(long = "url", value_name = "URL")]
        url: Option<String>,

        #[arg(long)]
        capacity: Option<usize>,

        #[arg(long, value_enum)]
        push_mode: Option<PushModeArg>,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    SetToken { token: String },
    Status,
    Clear,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    /// Capture a decoded payload as a new pending record.
    Add {
        payload: String,
        #[arg(long)]
        label: Option<String>,
        /// Push the new record right away.
        #[arg(long)]
        push: bool,
    },
    List {
        #[arg(long, value_enum)]
        state: Option<StateArg>,
        #[arg(long)]
        limit: Option<usize>,
    },
    Get {
        id: String,
    },
    Label {
        id: String,
        label: Option<String>,
        #[arg(long, conflicts_with = "label")]
        clear: bool,
        #[arg(long)]
        push: bool,
    },
    Retry {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Push,
    Full,
    Peek,
    Restore { id: String },
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PushModeArg {
    PerRecord,
    Batch,
}

impl From<PushModeArg> for PushMode {
    fn from(value: PushModeArg) -> Self {
        match value {
            PushModeArg::PerRecord => PushMode::PerRecord,
            PushModeArg::Batch => PushMode::Batch,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl From<StateArg> for SyncState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Pending => SyncState::Pending,
            StateArg::Syncing => SyncState::Syncing,
            StateArg::Synced => SyncState::Synced,
            StateArg::Error => SyncState::Error,
        }
    }
}

#[derive(Debug, Clone)]
struct GlobalOptions {
    profile: Option<String>,
    workspace: Option<PathBuf>,
    endpoint: Option<String>,
    json: bool,
    yes: bool,
}

/// An opened workspace with the active profile's record store.
struct StoreContext {
    paths: WorkspacePaths,
    profile: ResolvedProfile,
    storage: SqliteStorage,
    store: SharedStore,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    workspace: String,
    created: Vec<String>,
    updated: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProfileChangedOutput {
    profile: String,
    endpoint: Option<String>,
    capacity: usize,
    push_mode: PushMode,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    configure_logging(cli.debug, cli.json, cli.no_color);

    let globals = GlobalOptions {
        profile: cli.profile,
        workspace: cli.workspace,
        endpoint: cli.endpoint,
        json: cli.json,
        yes: cli.yes,
    };

    let result = run_command(cli.command, &globals).await;

    let exit = match result {
        Ok(code) => code,
        Err(error) => {
            render_error(&error, globals.json);
            error.exit_code()
        }
    };

    std::process::exit(exit.as_i32());
}

fn configure_logging(debug: bool, json: bool, no_color: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(!no_color)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_command(command: Command, globals: &GlobalOptions) -> ScanResult<ExitCode> {
    match command {
        Command::Init => commands::profile::cmd_init(globals),
        Command::Doctor => commands::profile::cmd_doctor(globals),
        Command::Profile { command } => commands::profile::cmd_profile(command, globals),
        Command::Auth { command } => commands::auth::cmd_auth(command, globals),
        Command::Record { command } => commands::record::cmd_record(command, globals).await,
        Command::Sync { command } => commands::sync::cmd_sync(command, globals).await,
    }
}

/// Waits for the workspace lock. Taken before [`open_store`] by commands
/// that write the record snapshot back.
fn lock_workspace(globals: &GlobalOptions) -> ScanResult<WorkspaceLock> {
    let paths = resolve_workspace(Some(&workspace_target(globals)?))?;
    WorkspaceLock::acquire(&paths)
}

/// Like [`lock_workspace`] but gives up when another process holds it.
fn try_lock_workspace(globals: &GlobalOptions) -> ScanResult<Option<WorkspaceLock>> {
    let paths = resolve_workspace(Some(&workspace_target(globals)?))?;
    WorkspaceLock::try_acquire(&paths)
}

fn open_store(globals: &GlobalOptions) -> ScanResult<StoreContext> {
    let target = workspace_target(globals)?;
    let paths = resolve_workspace(Some(&target))?;
    let config = load_config(&paths)?;
    let profile = resolve_profile(
        &config,
        globals.profile.as_deref(),
        globals.endpoint.as_deref(),
    )?;

    let storage = SqliteStorage::from_workspace(&paths)?;
    let store = RecordStore::open(storage.clone(), &profile.name, profile.capacity)?;

    Ok(StoreContext {
        paths,
        profile,
        storage,
        store: shared_store(store),
    })
}

/// Builds the sync engine for an opened store. Needs an endpoint and a token.
fn open_engine(ctx: &StoreContext) -> ScanResult<SyncEngine> {
    let endpoint = ctx.profile.endpoint.as_deref().ok_or_else(|| {
        ScanError::usage(format!(
            "profile '{}' has no webhook endpoint; run `scanlog profile set --url <URL>` or pass --endpoint",
            ctx.profile.name
        ))
    })?;

    let token = resolve_token(&ctx.storage, &ctx.profile.name, &ctx.paths.root)?
        .ok_or_else(|| {
            ScanError::unauthorized(format!(
                "no token for profile '{}'; run `scanlog auth set-token <TOKEN>` or set SCANLOG_TOKEN",
                ctx.profile.name
            ))
        })?;

    let client = WebhookClient::new(endpoint)?;
    tracing::debug!(
        endpoint = client.endpoint(),
        source = ?token.source,
        "sync engine ready"
    );

    Ok(
        SyncEngine::new(Arc::new(client), ctx.store.clone(), token.token)
            .with_push_mode(ctx.profile.push_mode),
    )
}

fn workspace_target(globals: &GlobalOptions) -> ScanResult<PathBuf> {
    match &globals.workspace {
        Some(path) => absolutize(path),
        None => std::env::current_dir().map_err(|err| {
            ScanError::io(format!(
                "failed to resolve current directory for workspace: {err}"
            ))
        }),
    }
}

fn absolutize(path: &Path) -> ScanResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().map_err(|err| {
        ScanError::io(format!(
            "failed to resolve current directory for path: {err}"
        ))
    })?;

    Ok(cwd.join(path))
}

fn render_error(error: &ScanError, json_output: bool) {
    if json_output {
        let payload = json!({
            "ok": false,
            "error": {
                "kind": error.kind,
                "message": &error.message,
            }
        });
        let serialized = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| {
            "{\"ok\":false,\"error\":{\"kind\":\"io\",\"message\":\"failed to serialize error\"}}".to_string()
        });
        eprintln!("{serialized}");
    } else {
        eprintln!("error: {}", error.message);
    }
}

fn print_json<T: Serialize>(value: &T) -> ScanResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| ScanError::io(format!("failed to render JSON output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

/// One line per record for human output.
fn describe_record(record: &scanlog_core::Record) -> String {
    format!(
        "{}  [{}] {} {}  {}",
        record.id,
        record.sync_state.as_str(),
        record.category.as_str(),
        record.display_label(),
        truncate(&record.payload, 60)
    )
}

fn truncate(value: &str, limit: usize) -> String {
    let single_line = value.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= limit {
        return single_line;
    }
    let mut shortened: String = single_line.chars().take(limit).collect();
    shortened.push_str("...");
    shortened
}
