//! `count`, `wait` and `status`

use anyhow::Result;
use serde_json::json;

use super::CommandEnv;

pub async fn count(env: &CommandEnv, resource: &str) -> Result<()> {
    let live = env.lock.live_count(resource).await?;
    env.emit(&json!({ "resource": resource, "live": live }), &live.to_string())
}

/// Block until `resource` is free. Cancelled by SIGINT/SIGTERM.
pub async fn wait(env: &CommandEnv, resource: &str) -> Result<()> {
    env.lock.wait_until_free(resource).await?;
    env.emit(
        &json!({ "resource": resource, "free": true }),
        &format!("'{resource}' is free"),
    )
}

pub async fn status(env: &CommandEnv, resource: &str) -> Result<()> {
    let holders = env.lock.holders(resource).await?;

    if env.json {
        return env.emit(&json!({ "resource": resource, "leases": holders }), "");
    }

    if holders.is_empty() {
        println!("No live leases on '{resource}'");
        return Ok(());
    }

    println!("Live leases on '{resource}' ({}):", holders.len());
    for row in &holders {
        let kind = if row.is_exclusive() { "exclusive" } else { "shared" };
        println!(
            "  {kind:<9} {} held by {} (expires: {})",
            row.holder_token,
            row.owner,
            row.expires_at.to_rfc3339()
        );
    }
    Ok(())
}
