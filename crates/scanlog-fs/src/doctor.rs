use crate::config::{load_config, resolve_profile};
use crate::workspace::WorkspacePaths;
use scanlog_core::ScanResult;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub workspace: String,
    pub healthy: bool,
    pub checks: Vec<DoctorCheck>,
    pub active_profile: Option<String>,
    pub endpoint: Option<String>,
}

pub fn run_doctor(
    paths: &WorkspacePaths,
    profile_override: Option<&str>,
    endpoint_override: Option<&str>,
) -> ScanResult<DoctorReport> {
    let mut checks = vec![
        path_check("workspace_root", paths.root.is_dir(), &paths.root),
        path_check("state_directory", paths.state_dir.is_dir(), &paths.state_dir),
        path_check("logs_directory", paths.logs_dir.is_dir(), &paths.logs_dir),
        path_check("config_file", paths.config_path.is_file(), &paths.config_path),
        path_check(
            "state_db_file",
            paths.state_db_path.is_file(),
            &paths.state_db_path,
        ),
        path_check("lock_file", paths.lock_path.is_file(), &paths.lock_path),
    ];

    let mut active_profile = None;
    let mut endpoint = None;

    if paths.config_path.is_file() {
        match load_config(paths) {
            Ok(config) => match resolve_profile(&config, profile_override, endpoint_override) {
                Ok(resolved) => {
                    active_profile = Some(resolved.name.clone());
                    endpoint = resolved.endpoint.clone();
                    checks.push(DoctorCheck {
                        name: "active_profile".to_string(),
                        ok: true,
                        details: format!("{} (capacity {})", resolved.name, resolved.capacity),
                    });
                    checks.push(DoctorCheck {
                        name: "endpoint".to_string(),
                        ok: resolved.endpoint.is_some(),
                        details: resolved
                            .endpoint
                            .unwrap_or_else(|| "not configured".to_string()),
                    });
                }
                Err(err) => checks.push(DoctorCheck {
                    name: "active_profile".to_string(),
                    ok: false,
                    details: err.message,
                }),
            },
            Err(err) => checks.push(DoctorCheck {
                name: "config_parse".to_string(),
                ok: false,
                details: err.message,
            }),
        }
    }

    let healthy = checks.iter().all(|check| check.ok);

    Ok(DoctorReport {
        workspace: paths.root.display().to_string(),
        healthy,
        checks,
        active_profile,
        endpoint,
    })
}

fn path_check(name: &str, ok: bool, path: &std::path::Path) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        ok,
        details: path.display().to_string(),
    }
}
