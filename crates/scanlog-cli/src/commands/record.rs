use scanlog_core::{ExitCode, Record, ScanError, ScanResult, SyncState};
use scanlog_sync::{PushOutcome, Transition, machine};
use serde_json::json;

use crate::{
    GlobalOptions, RecordCommand, StoreContext, describe_record, lock_workspace, open_engine,
    open_store, print_json,
};

pub(crate) async fn cmd_record(command: RecordCommand, globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let _lock = match &command {
        RecordCommand::List { .. } | RecordCommand::Get { .. } => None,
        _ => Some(lock_workspace(globals)?),
    };
    let ctx = open_store(globals)?;

    match command {
        RecordCommand::Add {
            payload,
            label,
            push,
        } => {
            if payload.trim().is_empty() {
                return Err(ScanError::usage("payload cannot be empty"));
            }

            let record = Record::capture(payload).with_label(label);
            let id = record.id.clone();
            let evicted = ctx.store.lock().insert(record)?;
            let pushed = if push {
                Some(push_now(&ctx, &id).await?)
            } else {
                None
            };
            let record = ctx
                .store
                .lock()
                .get(&id)
                .ok_or_else(|| ScanError::not_found(&id))?;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "record": record,
                        "evicted": evicted.iter().map(|r| &r.id).collect::<Vec<_>>(),
                        "push": pushed,
                        "warning": persistence_warning(&ctx),
                    }
                }))?;
            } else {
                println!("Captured {}", describe_record(&record));
                if !evicted.is_empty() {
                    println!("Evicted {} synced record(s) to stay within capacity.", evicted.len());
                }
                if let Some(outcome) = &pushed {
                    print_push_outcome(outcome);
                }
                print_persistence_warning(&ctx);
            }

            Ok(exit_for_push(pushed.as_ref()))
        }
        RecordCommand::List { state, limit } => {
            let filter: Option<SyncState> = state.map(Into::into);
            let (records, counts, capacity) = {
                let store = ctx.store.lock();
                (store.all(), store.count_by_state(), store.capacity())
            };
            let listed: Vec<Record> = records
                .into_iter()
                .filter(|record| filter.is_none_or(|wanted| record.sync_state == wanted))
                .take(limit.unwrap_or(usize::MAX))
                .collect();

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "profile": ctx.profile.name,
                        "capacity": capacity,
                        "counts": counts,
                        "records": listed,
                    }
                }))?;
            } else {
                if listed.is_empty() {
                    println!("No records.");
                }
                for record in &listed {
                    println!("{}", describe_record(record));
                }
                println!(
                    "{} pending, {} syncing, {} synced, {} error (capacity {})",
                    counts.pending, counts.syncing, counts.synced, counts.error, capacity
                );
            }

            Ok(ExitCode::Success)
        }
        RecordCommand::Get { id } => {
            let record = ctx
                .store
                .lock()
                .get(&id)
                .ok_or_else(|| ScanError::not_found(&id))?;

            if globals.json {
                print_json(&json!({"ok": true, "result": record}))?;
            } else {
                println!("ID: {}", record.id);
                println!("Label: {}", record.display_label());
                println!("Category: {}", record.category.as_str());
                println!("State: {}", record.sync_state.as_str());
                println!("Created at: {}", record.created_at);
                println!();
                println!("{}", record.payload);
            }

            Ok(ExitCode::Success)
        }
        RecordCommand::Label {
            id,
            label,
            clear,
            push,
        } => {
            let next = if clear {
                None
            } else {
                Some(label.ok_or_else(|| {
                    ScanError::usage("provide a new label or pass --clear")
                })?)
            };

            let transition = machine::relabel(&mut ctx.store.lock(), &id, next)?;
            let pushed = if push {
                Some(push_now(&ctx, &id).await?)
            } else {
                None
            };

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "id": id,
                        "transition": transition,
                        "push": pushed,
                        "warning": persistence_warning(&ctx),
                    }
                }))?;
            } else {
                println!("Label updated for {id} ({}).", describe_transition(transition));
                if let Some(outcome) = &pushed {
                    print_push_outcome(outcome);
                }
                print_persistence_warning(&ctx);
            }

            Ok(exit_for_push(pushed.as_ref()))
        }
        RecordCommand::Retry { id } => {
            let transition = machine::retry(&mut ctx.store.lock(), &id);
            if transition == Transition::Missing {
                return Err(ScanError::not_found(&id));
            }

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {"id": id, "transition": transition}
                }))?;
            } else {
                println!("{id}: {}", describe_transition(transition));
            }

            Ok(ExitCode::Success)
        }
        RecordCommand::Delete { id } => {
            let state = ctx.store.lock().get(&id).map(|record| record.sync_state);
            if let Some(state) = state
                && state.is_pushable()
                && !globals.yes
            {
                return Err(ScanError::usage(format!(
                    "record {id} is {} and has not reached the cloud; pass --yes to delete it anyway",
                    state.as_str()
                )));
            }

            let removed = ctx.store.lock().remove(&id);

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {"id": id, "removed": removed}
                }))?;
            } else if removed {
                println!("Deleted {id}.");
            } else {
                println!("No record with id {id}; nothing deleted.");
            }

            Ok(ExitCode::Success)
        }
    }
}

/// Pushes one record after a local edit. A missing endpoint or token skips
/// the push instead of failing the edit that already happened.
async fn push_now(ctx: &StoreContext, id: &str) -> ScanResult<PushOutcome> {
    let engine = match open_engine(ctx) {
        Ok(engine) => engine,
        Err(error) => {
            tracing::warn!("push skipped: {}", error.message);
            return Ok(PushOutcome::Failed { error });
        }
    };

    engine.push_record(id).await
}

fn exit_for_push(outcome: Option<&PushOutcome>) -> ExitCode {
    match outcome {
        Some(PushOutcome::Failed { error }) => error.exit_code(),
        _ => ExitCode::Success,
    }
}

fn print_push_outcome(outcome: &PushOutcome) {
    match outcome {
        PushOutcome::Pushed { confirmed: true } => println!("Pushed."),
        PushOutcome::Pushed { confirmed: false } => {
            println!("Pushed (the remote's reply could not be read; assumed accepted).")
        }
        PushOutcome::Failed { error } => println!("Push failed: {}", error.message),
        PushOutcome::Skipped { state } => println!("Push skipped: record is {}.", state.as_str()),
        PushOutcome::Deleted => println!("Push skipped: record was deleted."),
    }
}

fn describe_transition(transition: Transition) -> String {
    match transition {
        Transition::Applied { from, to } => format!("{} -> {}", from.as_str(), to.as_str()),
        Transition::Unchanged { state } => format!("still {}", state.as_str()),
        Transition::Missing => "missing".to_string(),
    }
}

fn persistence_warning(ctx: &StoreContext) -> Option<String> {
    ctx.store
        .lock()
        .persistence_error()
        .map(|error| error.message.clone())
}

fn print_persistence_warning(ctx: &StoreContext) {
    if let Some(message) = persistence_warning(ctx) {
        eprintln!("warning: changes are held in memory only: {message}");
    }
}
