//! Timeout-driven diagnostic capture.
//!
//! When a capture delay is configured, each still-unfinished client gets a
//! screenshot written to `screenshot_<ordinal>.png` plus a structured state
//! snapshot pulled out of the page and logged key-by-key. All of this is
//! best-effort observability; absent or differently-shaped page globals must
//! never fail the run.

use crate::result::HarnessResult;
use crate::session::ClientSession;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Expression evaluated in the page to pull out a game-state snapshot.
///
/// Reads the nodegame client globals; returns null when the page does not
/// expose them.
pub(crate) const STATE_SNAPSHOT_EXPR: &str =
    "(() => { try { return { player: node.player, pl: node.game.pl }; } catch (e) { return null; } })()";

/// Expression evaluated on completion to extract the client's player id.
pub(crate) const PLAYER_ID_EXPR: &str =
    "(() => { try { return node.player.id; } catch (e) { return null; } })()";

/// Capture one client: screenshot to disk, then snapshot the page state.
pub(crate) async fn capture_client<S: ClientSession>(
    session: &Arc<Mutex<S>>,
    ordinal: usize,
    dir: &Path,
) -> HarnessResult<()> {
    info!("Capturing client {ordinal}.");

    let path = dir.join(format!("screenshot_{ordinal}.png"));
    let mut session = session.lock().await;
    let bytes = session.screenshot().await?;
    tokio::fs::write(&path, &bytes).await?;
    info!("Wrote {}", path.display());

    let snapshot = session.evaluate(STATE_SNAPSHOT_EXPR).await?;
    drop(session);

    for line in snapshot_lines(&snapshot) {
        info!("{line}");
    }
    Ok(())
}

/// Best-effort player-id extraction for the completion log line.
pub(crate) async fn extract_player_id<S: ClientSession>(
    session: &Arc<Mutex<S>>,
) -> Option<String> {
    match session.lock().await.evaluate(PLAYER_ID_EXPR).await {
        Ok(Value::String(id)) => Some(id),
        Ok(Value::Null) => None,
        Ok(other) => Some(other.to_string()),
        Err(e) => {
            debug!("player id extraction failed: {e}");
            None
        }
    }
}

/// Render a state snapshot as log lines: the player's own fields, one level
/// into `player.stage`, and one level into `pl.db`.
pub(crate) fn snapshot_lines(snapshot: &Value) -> Vec<String> {
    let player = snapshot.get("player");
    let mut lines = Vec::new();

    lines.push("player:".to_string());
    push_fields(&mut lines, player);

    lines.push("player.stage:".to_string());
    push_fields(&mut lines, player.and_then(|p| p.get("stage")));

    lines.push("pl.db:".to_string());
    push_fields(&mut lines, snapshot.get("pl").and_then(|pl| pl.get("db")));

    lines
}

fn push_fields(lines: &mut Vec<String>, value: Option<&Value>) {
    if let Some(Value::Object(fields)) = value {
        for (key, field) in fields {
            lines.push(format!("* {key}: {field}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_lines_full_shape() {
        let snapshot = json!({
            "player": {
                "id": "p1",
                "stage": { "round": 3, "step": "guess" },
            },
            "pl": {
                "db": { "p1": "connected", "p2": "connected" },
            },
        });

        let lines = snapshot_lines(&snapshot);
        assert!(lines.contains(&"* id: \"p1\"".to_string()));
        assert!(lines.contains(&"* round: 3".to_string()));
        assert!(lines.contains(&"* p2: \"connected\"".to_string()));

        let headers: Vec<&String> = lines.iter().filter(|l| l.ends_with(':')).collect();
        assert_eq!(headers, ["player:", "player.stage:", "pl.db:"]);
    }

    #[test]
    fn test_snapshot_lines_tolerates_null() {
        let lines = snapshot_lines(&Value::Null);
        assert_eq!(lines, ["player:", "player.stage:", "pl.db:"]);
    }

    #[test]
    fn test_snapshot_lines_tolerates_missing_nested_fields() {
        let snapshot = json!({ "player": { "id": "p1" } });
        let lines = snapshot_lines(&snapshot);
        assert_eq!(lines, ["player:", "* id: \"p1\"", "player.stage:", "pl.db:"]);
    }
}
