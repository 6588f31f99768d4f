use crate::config::{WorkspaceConfig, load_config, save_config, set_profile_endpoint};
use scanlog_core::{ScanError, ScanResult};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".scanlog";

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub lock_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkspaceInitResult {
    pub paths: WorkspacePaths,
    pub created: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
}

impl WorkspacePaths {
    pub fn from_root(root: PathBuf) -> Self {
        let state_dir = root.join(STATE_DIR_NAME);

        Self {
            config_path: state_dir.join("config.toml"),
            state_db_path: state_dir.join("state.db"),
            logs_dir: state_dir.join("logs"),
            lock_path: state_dir.join("lock"),
            root,
            state_dir,
        }
    }
}

pub fn init_workspace(
    target: Option<&Path>,
    endpoint: Option<&str>,
) -> ScanResult<WorkspaceInitResult> {
    let root = match target {
        Some(path) => absolutize(path)?,
        None => std::env::current_dir().map_err(|err| {
            ScanError::io(format!(
                "failed to resolve current directory for init: {err}"
            ))
        })?,
    };

    let paths = WorkspacePaths::from_root(root);
    let mut created = Vec::new();
    let mut updated = Vec::new();

    for dir in [&paths.root, &paths.state_dir, &paths.logs_dir] {
        ensure(dir, Entry::Dir, &mut created)?;
    }
    ensure(&paths.state_db_path, Entry::EmptyFile, &mut created)?;
    ensure(&paths.lock_path, Entry::EmptyFile, &mut created)?;
    ensure_state_ignored(&paths, &mut created)?;

    if paths.config_path.exists() {
        let mut config = load_config(&paths)?;
        if let Some(endpoint) = endpoint.map(str::trim).filter(|value| !value.is_empty()) {
            let active = config.active_profile.clone();
            set_profile_endpoint(&mut config, &active, Some(endpoint), None, None)?;
            save_config(&paths, &config)?;
            updated.push(paths.config_path.clone());
        }
    } else {
        let config = WorkspaceConfig::with_default_endpoint(endpoint);
        save_config(&paths, &config)?;
        created.push(paths.config_path.clone());
    }

    Ok(WorkspaceInitResult {
        paths,
        created,
        updated,
    })
}

pub fn resolve_workspace(explicit: Option<&Path>) -> ScanResult<WorkspacePaths> {
    let root = match explicit {
        Some(path) => absolutize(path)?,
        None => std::env::current_dir().map_err(|err| {
            ScanError::io(format!(
                "failed to resolve current directory for workspace lookup: {err}"
            ))
        })?,
    };

    let paths = WorkspacePaths::from_root(root);
    if !paths.state_dir.is_dir() {
        let root_display = paths.root.display();
        return Err(ScanError::usage(format!(
            "workspace is not initialized at '{root_display}'; run `scanlog init --workspace {root_display}` first"
        )));
    }

    Ok(paths)
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

#[derive(Clone, Copy)]
enum Entry {
    Dir,
    EmptyFile,
}

/// Creates `path` when missing and records it in `created`. An existing
/// entry of the wrong kind is an error; existing content is never touched.
fn ensure(path: &Path, entry: Entry, created: &mut Vec<PathBuf>) -> ScanResult<()> {
    if path.exists() {
        let matches = match entry {
            Entry::Dir => path.is_dir(),
            Entry::EmptyFile => path.is_file(),
        };
        if matches {
            return Ok(());
        }

        let expected = match entry {
            Entry::Dir => "directory",
            Entry::EmptyFile => "file",
        };
        return Err(ScanError::io(format!(
            "expected '{}' to be a {expected}",
            path.display()
        )));
    }

    let outcome = match entry {
        Entry::Dir => fs::create_dir_all(path),
        Entry::EmptyFile => fs::write(path, []),
    };
    outcome.map_err(|err| {
        ScanError::io(format!("failed to create '{}': {err}", path.display()))
    })?;

    created.push(path.to_path_buf());
    Ok(())
}

/// The state database holds the webhook token, so keep it out of version
/// control when the workspace lives inside a repository.
fn ensure_state_ignored(paths: &WorkspacePaths, created: &mut Vec<PathBuf>) -> ScanResult<()> {
    let ignore_path = paths.state_dir.join(".gitignore");
    if ignore_path.exists() {
        return Ok(());
    }

    fs::write(&ignore_path, "state.db*\nlogs/\nlock\n").map_err(|err| {
        ScanError::io(format!(
            "failed to write '{}': {err}",
            ignore_path.display()
        ))
    })?;
    created.push(ignore_path);
    Ok(())
}
