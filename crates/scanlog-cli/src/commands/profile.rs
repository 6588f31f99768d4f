use scanlog_core::{ExitCode, ScanResult};
use scanlog_fs::{
    ResolvedProfile, STATE_DIR_NAME, WorkspacePaths, init_workspace, list_profiles, load_config,
    resolve_profile, resolve_workspace, run_doctor, save_config, set_active_profile,
    set_profile_endpoint,
};
use scanlog_store::{SqliteStorage, resolve_token};
use serde_json::json;
use std::path::PathBuf;

use crate::{
    GlobalOptions, InitOutput, ProfileChangedOutput, ProfileCommand, print_json, workspace_target,
};

pub(crate) fn cmd_init(globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let target = workspace_target(globals)?;
    let result = init_workspace(Some(&target), globals.endpoint.as_deref())?;
    SqliteStorage::from_workspace(&result.paths)?;

    let output = InitOutput {
        workspace: result.paths.root.display().to_string(),
        created: display(&result.created),
        updated: display(&result.updated),
    };

    if globals.json {
        return print_json(&json!({"ok": true, "result": output})).map(|_| ExitCode::Success);
    }

    println!(
        "Workspace ready at {} ({} created, {} updated).",
        output.workspace,
        output.created.len(),
        output.updated.len()
    );
    for path in output.created.iter().chain(&output.updated) {
        println!("  {path}");
    }

    let config = load_config(&result.paths)?;
    let profile = resolve_profile(&config, None, None)?;
    if profile.endpoint.is_none() {
        println!("Next: scanlog profile set --url <WEBHOOK_URL>");
    }
    println!("Then: scanlog auth set-token <TOKEN> && scanlog sync full");

    Ok(ExitCode::Success)
}

pub(crate) fn cmd_doctor(globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let target = workspace_target(globals)?;
    let paths = resolve_workspace(Some(&target))?;

    let report = run_doctor(
        &paths,
        globals.profile.as_deref(),
        globals.endpoint.as_deref(),
    )?;

    let token_source = match report.active_profile.as_deref() {
        Some(profile) => {
            let storage = SqliteStorage::from_workspace(&paths)?;
            resolve_token(&storage, profile, &paths.root)?.map(|token| token.source)
        }
        None => None,
    };
    let token_ok = token_source.is_some();
    let ready = report.healthy && token_ok;

    if globals.json {
        print_json(&json!({
            "ok": ready,
            "result": {
                "workspace": report.workspace,
                "healthy": report.healthy,
                "checks": report.checks,
                "active_profile": report.active_profile,
                "endpoint": report.endpoint,
                "token": {
                    "present": token_ok,
                    "source": token_source,
                },
            }
        }))?;
    } else {
        println!("Workspace: {}", report.workspace);
        println!(
            "Health: {}",
            if report.healthy {
                "healthy"
            } else {
                "degraded"
            }
        );

        for check in &report.checks {
            let prefix = if check.ok { "OK" } else { "FAIL" };
            println!("[{}] {} -> {}", prefix, check.name, check.details);
        }

        println!(
            "[{}] token -> {}",
            if token_ok { "OK" } else { "FAIL" },
            match token_source {
                Some(source) => format!("resolved from {}", token_source_label(source)),
                None => "missing; run `scanlog auth set-token` or set SCANLOG_TOKEN".to_string(),
            }
        );
    }

    Ok(if ready { ExitCode::Success } else { ExitCode::Io })
}

pub(crate) fn cmd_profile(command: ProfileCommand, globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let paths = open_or_init(globals)?;
    let mut config = load_config(&paths)?;

    match command {
        ProfileCommand::List => {
            let profiles = list_profiles(&config);
            if globals.json {
                print_json(
                    &json!({"ok": true, "result": {"active_profile": config.active_profile, "profiles": profiles}}),
                )?;
            } else {
                println!("Active profile: {}", config.active_profile);
                for profile in profiles {
                    let marker = if profile.active { "*" } else { " " };
                    println!(
                        "{} {} ({}, capacity {})",
                        marker,
                        profile.name,
                        profile.endpoint.as_deref().unwrap_or("no endpoint"),
                        profile.capacity
                    );
                }
            }

            Ok(ExitCode::Success)
        }
        ProfileCommand::Use { name } => {
            set_active_profile(&mut config, &name)?;
            save_config(&paths, &config)?;

            let output = changed(resolve_profile(
                &config,
                Some(&name),
                globals.endpoint.as_deref(),
            )?);

            if globals.json {
                print_json(&json!({"ok": true, "result": output}))?;
            } else {
                println!(
                    "Active profile set to '{}' ({})",
                    output.profile,
                    output.endpoint.as_deref().unwrap_or("no endpoint")
                );
            }

            Ok(ExitCode::Success)
        }
        ProfileCommand::Set {
            name,
            url,
            capacity,
            push_mode,
        } => {
            let target_profile = name.unwrap_or_else(|| config.active_profile.clone());
            set_profile_endpoint(
                &mut config,
                &target_profile,
                url.as_deref(),
                capacity,
                push_mode.map(Into::into),
            )?;
            save_config(&paths, &config)?;

            let output = changed(resolve_profile(&config, Some(&target_profile), None)?);

            if globals.json {
                print_json(&json!({"ok": true, "result": output}))?;
            } else {
                println!(
                    "Profile '{}' updated: endpoint {}, capacity {}",
                    output.profile,
                    output.endpoint.as_deref().unwrap_or("none"),
                    output.capacity
                );
            }

            Ok(ExitCode::Success)
        }
    }
}

fn display(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|path| path.display().to_string()).collect()
}

fn changed(resolved: ResolvedProfile) -> ProfileChangedOutput {
    ProfileChangedOutput {
        profile: resolved.name,
        endpoint: resolved.endpoint,
        capacity: resolved.capacity,
        push_mode: resolved.push_mode,
    }
}

fn open_or_init(globals: &GlobalOptions) -> ScanResult<WorkspacePaths> {
    let target = workspace_target(globals)?;
    if !target.join(STATE_DIR_NAME).is_dir() {
        init_workspace(Some(&target), globals.endpoint.as_deref())?;
    }
    resolve_workspace(Some(&target))
}

pub(crate) fn token_source_label(source: scanlog_store::TokenSource) -> &'static str {
    match source {
        scanlog_store::TokenSource::Environment => "SCANLOG_TOKEN",
        scanlog_store::TokenSource::EnvFile => ".env file",
        scanlog_store::TokenSource::Stored => "stored profile token",
    }
}
