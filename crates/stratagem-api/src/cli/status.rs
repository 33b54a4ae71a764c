//! System status dashboard command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Display system status dashboard.
///
/// Shows session counts, upstream endpoints, rate limit posture, cache
/// TTLs, and version.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let total_sessions = state.sessions.count_sessions().await?;
    let recent = state.sessions.list_recent(1).await?;
    let last_activity = recent.first().map(|s| s.last_active_at.to_rfc3339());

    let rate = &state.config.rate_limit;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "sessions": {
                "total": total_sessions,
                "last_activity": last_activity,
            },
            "upstreams": {
                "authz": state.config.authz.base_url,
                "orchestrator": state.config.orchestrator.base_url,
            },
            "rate_limit": {
                "enabled": rate.enabled,
                "max_requests": rate.max_requests,
                "window_secs": rate.window_secs,
            },
            "cache": {
                "ontology_ttl_secs": state.config.cache.ontology_ttl_secs,
                "loader_ttl_secs": state.config.cache.loader_ttl_secs,
            },
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Stratagem v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Sessions ──").dim());
    println!("  Total:         {}", style(total_sessions).bold());
    match last_activity {
        Some(ts) => println!("  Last activity: {ts}"),
        None => println!("  Last activity: {}", style("never").dim()),
    }
    println!();

    println!("  {}", style("── Upstreams ──").dim());
    println!(
        "  Authorization: {} ({}ms timeout)",
        state.config.authz.base_url, state.config.authz.timeout_ms
    );
    println!(
        "  Orchestrator:  {} ({}ms connect timeout)",
        state.config.orchestrator.base_url, state.config.orchestrator.connect_timeout_ms
    );
    println!();

    println!("  {}", style("── Rate limit ──").dim());
    if rate.enabled {
        println!(
            "  {} ({} requests / {}s window)",
            style("enabled").green(),
            rate.max_requests,
            rate.window_secs
        );
    } else {
        println!("  {}", style("disabled").yellow());
    }
    println!();

    println!("  {}", style("── Cache ──").dim());
    println!("  Ontology TTL: {}s", state.config.cache.ontology_ttl_secs);
    println!("  Loader TTL:   {}s", state.config.cache.loader_ttl_secs);
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
