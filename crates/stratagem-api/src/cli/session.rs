//! Session browsing CLI command.
//!
//! Operator view over recently active agent sessions across all users.
//! Sessions are created and advanced by the stream endpoint; this
//! command only reads.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stratagem_types::session::{AgentSession, SessionStatus};

use crate::state::AppState;

/// List recently active sessions with scope, focus, and activity.
///
/// # Examples
///
/// ```bash
/// sgm sessions
/// sgm sessions --limit 50 --json
/// ```
pub async fn list_recent(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let sessions = state.sessions.list_recent(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No sessions yet. Clients create them through {}.",
            style("i").blue().bold(),
            style("POST /api/v1/agent/stream").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Session").fg(Color::White),
        Cell::new("Scope").fg(Color::White),
        Cell::new("Focus").fg(Color::White),
        Cell::new("Messages").fg(Color::White),
        Cell::new("Last active").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);

    for session in &sessions {
        let status_cell = match session.status {
            SessionStatus::Active => Cell::new("active").fg(Color::Green),
            SessionStatus::Archived => Cell::new("archived").fg(Color::DarkGrey),
        };

        table.add_row(vec![
            Cell::new(short_id(session)).fg(Color::Cyan),
            Cell::new(scope_label(session)).fg(Color::White),
            Cell::new(focus_label(session)).fg(Color::DarkGrey),
            Cell::new(session.message_count.to_string()).fg(Color::White),
            Cell::new(session.last_active_at.format("%Y-%m-%d %H:%M").to_string())
                .fg(Color::White),
            status_cell,
        ]);
    }

    println!();
    println!("  Recent sessions");
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} session{}",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

// --- Formatting helpers ---

/// First UUID group; enough to disambiguate in a short list.
fn short_id(session: &AgentSession) -> String {
    session.id.to_string()[..8].to_string()
}

/// `context_type entity` when the scope has a target.
fn scope_label(session: &AgentSession) -> String {
    match session.entity_id.as_deref() {
        Some(entity) => format!("{} {}", session.context_type, truncate(entity, 20)),
        None => session.context_type.to_string(),
    }
}

/// Focused project (and sub-entity, when narrowed), names preferred
/// over ids.
fn focus_label(session: &AgentSession) -> String {
    match &session.agent_metadata.focus {
        Some(focus) => {
            let project = focus.project_name.as_deref().unwrap_or(&focus.project_id);
            match focus.entity_name.as_deref().or(focus.entity_id.as_deref()) {
                Some(entity) => format!("{} / {}", truncate(project, 16), truncate(entity, 16)),
                None => truncate(project, 20),
            }
        }
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}
