use scanlog_core::{ExitCode, ScanResult};
use scanlog_store::{clear_token, resolve_token, save_token};
use serde_json::json;

use super::profile::token_source_label;
use crate::{AuthCommand, GlobalOptions, open_store, print_json};

pub(crate) fn cmd_auth(command: AuthCommand, globals: &GlobalOptions) -> ScanResult<ExitCode> {
    let ctx = open_store(globals)?;
    let profile = ctx.profile.name.as_str();

    match command {
        AuthCommand::SetToken { token } => {
            save_token(&ctx.storage, profile, &token)?;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {"profile": profile, "stored": true}
                }))?;
            } else {
                println!("Token saved for profile '{profile}'.");
            }

            Ok(ExitCode::Success)
        }
        AuthCommand::Status => {
            let resolved = resolve_token(&ctx.storage, profile, &ctx.paths.root)?;

            let Some(resolved) = resolved else {
                if globals.json {
                    print_json(&json!({
                        "ok": false,
                        "result": {
                            "profile": profile,
                            "endpoint": ctx.profile.endpoint,
                            "authenticated": false,
                            "reason": "no token configured",
                        }
                    }))?;
                } else {
                    println!("Profile: {profile}");
                    println!("Token: none");
                    println!("Run `scanlog auth set-token <TOKEN>` or set SCANLOG_TOKEN.");
                }
                return Ok(ExitCode::Auth);
            };

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {
                        "profile": profile,
                        "endpoint": ctx.profile.endpoint,
                        "authenticated": true,
                        "source": resolved.source,
                        "env_file": resolved.env_file.as_ref().map(|path| path.display().to_string()),
                    }
                }))?;
            } else {
                println!("Profile: {profile}");
                println!(
                    "Endpoint: {}",
                    ctx.profile.endpoint.as_deref().unwrap_or("none")
                );
                println!("Token: {}", token_source_label(resolved.source));
                if let Some(path) = &resolved.env_file {
                    println!("Env file: {}", path.display());
                }
            }

            Ok(ExitCode::Success)
        }
        AuthCommand::Clear => {
            clear_token(&ctx.storage, profile)?;

            if globals.json {
                print_json(&json!({
                    "ok": true,
                    "result": {"profile": profile, "cleared": true}
                }))?;
            } else {
                println!("Stored token removed for profile '{profile}'.");
            }

            Ok(ExitCode::Success)
        }
    }
}
