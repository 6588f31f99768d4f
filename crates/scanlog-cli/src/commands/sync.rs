use scanlog_core::{ExitCode, ScanError, ScanResult};
use scanlog_store::{AppState, load_app_state, resolve_token, save_app_state};
use scanlog_sync::SyncAttempt;
use serde::Serialize;
use serde_json::json;

use super::profile::token_source_label;
use crate::{
    GlobalOptions, StoreContext, SyncCommand, describe_record, lock_workspace, open_engine,
    open_store, print_json, try_lock_workspace,
};

pub(crate) async fn cmd_sync(command: SyncCommand, globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let _lock = match &command {
        SyncCommand::Push | SyncCommand::Full => match try_lock_workspace(globals)? {
            Some(lock) => Some(lock),
            None => {
                tracing::debug!("workspace is locked by another scanlog process");
                return report_already_running(globals);
            }
        },
        SyncCommand::Restore { .. } => Some(lock_workspace(globals)?),
        SyncCommand::Peek | SyncCommand::Status => None,
    };
    let ctx = open_store(globals)?;

    match command {
        SyncCommand::Push => {
            let engine = open_engine(&ctx)?;
            let attempt = record_outcome(&ctx, engine.push_only().await, AppState::mark_push_ok)?;

            let SyncAttempt::Completed(report) = attempt else {
                return report_already_running(globals);
            };

            if globals.json {
                print_json(&json!({"ok": report.failed == 0, "result": report}))?;
            } else {
                println!(
                    "Push completed: {} pushed, {} failed.",
                    report.pushed, report.failed
                );
            }

            Ok(if report.failed == 0 {
                ExitCode::Success
            } else {
                ExitCode::Sync
            })
        }
        SyncCommand::Full => {
            let engine = open_engine(&ctx)?;
            let attempt = record_outcome(&ctx, engine.full_sync().await, AppState::mark_sync_ok)?;

            let SyncAttempt::Completed(report) = attempt else {
                return report_already_running(globals);
            };

            if globals.json {
                print_json(&json!({"ok": report.failed == 0, "result": report}))?;
            } else {
                println!(
                    "Sync completed: {} pushed, {} failed, {} added, {} updated.",
                    report.pushed, report.failed, report.added, report.updated
                );
                if report.reconciled_missing > 0 {
                    println!(
                        "{} synced record(s) were missing from the cloud and are queued again.",
                        report.reconciled_missing
                    );
                }
                if report.evicted > 0 {
                    println!(
                        "Evicted {} synced record(s) to stay within capacity.",
                        report.evicted
                    );
                }
                if report.left_in_cloud > 0 {
                    println!(
                        "{} older cloud record(s) left remote; the local store is at capacity.",
                        report.left_in_cloud
                    );
                }
            }

            Ok(if report.failed == 0 {
                ExitCode::Success
            } else {
                ExitCode::Sync
            })
        }
        SyncCommand::Peek => {
            let engine = open_engine(&ctx)?;
            let remote_only = engine.peek_cloud().await?;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {"count": remote_only.len(), "records": remote_only}
                }))?;
            } else if remote_only.is_empty() {
                println!("Every cloud record is already local.");
            } else {
                println!("{} record(s) exist only in the cloud:", remote_only.len());
                for record in &remote_only {
                    println!("{}", describe_record(record));
                }
            }

            Ok(ExitCode::Success)
        }
        SyncCommand::Restore { id } => {
            let engine = open_engine(&ctx)?;
            let promoted = engine.restore(&id).await?;

            if globals.json {
                print_json(&json!({"ok": true, "result": promoted}))?;
            } else {
                println!("Restored {}", describe_record(&promoted.record));
                if !promoted.evicted.is_empty() {
                    println!(
                        "Evicted {} synced record(s) to stay within capacity.",
                        promoted.evicted.len()
                    );
                }
            }

            Ok(ExitCode::Success)
        }
        SyncCommand::Status => {
            let state = load_app_state(&ctx.storage, &ctx.profile.name)?;
            let token = resolve_token(&ctx.storage, &ctx.profile.name, &ctx.paths.root)?
                .map(|token| token.source);
            let (counts, total, capacity) = {
                let store = ctx.store.lock();
                (store.count_by_state(), store.len(), store.capacity())
            };

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "profile": ctx.profile.name,
                        "endpoint": ctx.profile.endpoint,
                        "push_mode": ctx.profile.push_mode,
                        "token_source": token,
                        "last_push_at": state.last_push_at,
                        "last_sync_at": state.last_sync_at,
                        "last_sync_status": state.last_sync_status,
                        "last_report": state.last_report,
                        "records": total,
                        "capacity": capacity,
                        "counts": counts,
                    }
                }))?;
            } else {
                println!("Profile: {}", ctx.profile.name);
                println!(
                    "Endpoint: {}",
                    ctx.profile.endpoint.as_deref().unwrap_or("none")
                );
                println!(
                    "Token: {}",
                    token.map(token_source_label).unwrap_or("none")
                );
                println!(
                    "Last push: {}",
                    state.last_push_at.unwrap_or_else(|| "never".to_string())
                );
                println!(
                    "Last sync: {}",
                    state.last_sync_at.unwrap_or_else(|| "never".to_string())
                );
                println!(
                    "Last status: {}",
                    state.last_sync_status.unwrap_or_else(|| "n/a".to_string())
                );
                println!(
                    "Records: {total}/{capacity} ({} pending, {} syncing, {} synced, {} error)",
                    counts.pending, counts.syncing, counts.synced, counts.error
                );
            }

            Ok(ExitCode::Success)
        }
    }
}

/// Stores the outcome of a push or sync pass in the profile's app state.
fn record_outcome<T: Serialize>(
    ctx: &StoreContext,
    result: ScanResult<SyncAttempt<T>>,
    mark_ok: fn(&mut AppState, serde_json::Value),
) -> ScanResult<SyncAttempt<T>> {
    if matches!(result, Ok(SyncAttempt::AlreadyRunning)) {
        return result;
    }

    let mut state = load_app_state(&ctx.storage, &ctx.profile.name).unwrap_or_else(|error| {
        tracing::warn!("starting from empty sync status: {}", error.message);
        AppState::default()
    });

    match &result {
        Ok(SyncAttempt::Completed(report)) => {
            let value = serde_json::to_value(report)
                .map_err(|err| ScanError::io(format!("failed to serialize sync report: {err}")))?;
            mark_ok(&mut state, value);
        }
        Ok(SyncAttempt::AlreadyRunning) => {}
        Err(error) => state.mark_error(&error.message),
    }

    if let Err(error) = save_app_state(&ctx.storage, &ctx.profile.name, &state) {
        tracing::warn!("failed to record sync status: {}", error.message);
    }

    result
}

fn report_already_running(globals: &GlobalOptions) -> ScanResult<ExitCode> {
    if globals.json {
        print_json(&json!({"ok": true, "result": {"status": "already_running"}}))?;
    } else {
        println!("A sync is already running; nothing to do.");
    }

    Ok(ExitCode::Success)
}
