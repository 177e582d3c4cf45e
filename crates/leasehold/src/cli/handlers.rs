//! CLI command handlers that bridge between `clap` and internal logic

use std::path::PathBuf;

use anyhow::Result;
use clap::ArgMatches;
use leasehold_core::CancelToken;
use serde_json::json;

use crate::commands::{
    inspect, lock,
    run::{self, RunOptions},
    CommandEnv, GlobalOptions, LockRequest,
};

/// Format an error for user display (no stack traces)
pub fn format_error(err: &anyhow::Error) -> String {
    let msg = err.to_string();
    if let Some(source) = err.source() {
        let source_msg = source.to_string();
        if !msg.contains(&source_msg) && !source_msg.is_empty() {
            return format!("{msg}\nCause: {source_msg}");
        }
    }
    msg
}

/// Error object printed on stdout under `--json`.
pub fn error_json(err: &anyhow::Error) -> serde_json::Value {
    let (code, exit_code) = err
        .downcast_ref::<leasehold_core::Error>()
        .map_or(("ERROR", 1), |e| (e.code(), e.exit_code()));
    json!({
        "success": false,
        "error": {
            "code": code,
            "message": format_error(err),
            "exit_code": exit_code,
        }
    })
}

/// Exit code for `err`: the core error's code when there is one, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<leasehold_core::Error>()
        .map_or(1, leasehold_core::Error::exit_code)
}

fn global_options(matches: &ArgMatches) -> GlobalOptions {
    GlobalOptions {
        db: matches.get_one::<String>("db").map(PathBuf::from),
        config: matches.get_one::<String>("config").map(PathBuf::from),
        context: matches.get_one::<String>("context").cloned(),
        json: matches.get_flag("json"),
    }
}

fn resource(sub_m: &ArgMatches) -> Result<&str> {
    sub_m
        .get_one::<String>("resource")
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Resource is required"))
}

fn lock_request(sub_m: &ArgMatches) -> LockRequest {
    LockRequest {
        shared: sub_m.get_flag("shared"),
        limit: sub_m.get_one::<u32>("limit").copied(),
        ttl_secs: sub_m.get_one::<u64>("ttl").copied(),
        no_wait: sub_m.get_flag("no-wait"),
    }
}

/// Run the parsed command line. Returns the process exit code on success:
/// always 0 except for `run`, which passes on the child's code.
pub async fn dispatch(matches: &ArgMatches, cancel: CancelToken) -> Result<i32> {
    let (name, sub_m) = matches
        .subcommand()
        .ok_or_else(|| anyhow::anyhow!("No command given"))?;

    let env = CommandEnv::open(&global_options(matches), cancel).await?;
    let resource = resource(sub_m)?;
    let token = sub_m
        .try_get_one::<String>("token")
        .ok()
        .flatten()
        .map(String::as_str);

    match name {
        "acquire" => lock::acquire(&env, resource, &lock_request(sub_m)).await?,
        "release" => lock::release(&env, resource, token).await?,
        "extend" => {
            let ttl_secs = sub_m.get_one::<u64>("ttl").copied();
            lock::extend(&env, resource, token, ttl_secs).await?;
        }
        "count" => inspect::count(&env, resource).await?,
        "wait" => inspect::wait(&env, resource).await?,
        "status" => inspect::status(&env, resource).await?,
        "run" => {
            let options = RunOptions {
                request: lock_request(sub_m),
                renew: sub_m.get_flag("renew"),
                command: sub_m
                    .get_many::<String>("command")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
            };
            return run::run(&env, resource, &options).await;
        }
        other => anyhow::bail!("Unknown command: {other}"),
    }
    Ok(0)
}
