//! Plain-text rendering of snapshots for terminals.

use std::fmt::Write as _;

use serde_json::Value;
use vizstream_core::SessionSnapshot;

/// Multi-line summary of a snapshot, one populated section per line.
pub fn summary(snapshot: &SessionSnapshot) -> String {
    let state = &snapshot.state;
    let mut out = String::new();

    let _ = writeln!(out, "phase: {}", snapshot.phase);
    let _ = writeln!(out, "events: {}", snapshot.events);
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "error: {error}");
    }
    if let Some(classification) = &state.classification {
        let _ = writeln!(out, "classification: {}", inline(classification));
    }
    if let Some(recursion) = &state.recursion {
        match &recursion.tree {
            Some(tree) => {
                let _ = writeln!(
                    out,
                    "recursion: {} calls, depth {}, root {}",
                    tree.node_count(),
                    tree.depth(),
                    tree.func
                );
            }
            None => {
                let _ = writeln!(out, "recursion: {} events, no tree", recursion.events.len());
            }
        }
    }
    if let Some(dp) = &state.dp {
        match &dp.table {
            Some(table) => {
                let cells: Vec<String> = table
                    .indices()
                    .iter()
                    .zip(table.values())
                    .map(|(index, value)| format!("{index}={}", inline(value)))
                    .collect();
                let _ = writeln!(out, "dp: [{}]", cells.join(", "));
            }
            None => {
                let _ = writeln!(out, "dp: empty");
            }
        }
    }
    if let Some(graph) = &state.graph {
        let _ = writeln!(out, "graph: {} steps", graph.steps.len());
    }
    match &state.issues {
        Some(Value::Array(issues)) => {
            let _ = writeln!(out, "issues: {}", issues.len());
            for issue in issues {
                let _ = writeln!(out, "  - {}", inline(issue));
            }
        }
        Some(other) => {
            let _ = writeln!(out, "issues: {}", inline(other));
        }
        None => {}
    }
    for (stage, payload) in &state.extensions {
        let _ = writeln!(out, "{stage}: {}", inline(payload));
    }
    if let Some(explanation) = &state.explanation {
        let _ = writeln!(out, "explanation: {}", inline(explanation));
    }
    out
}

/// One line per snapshot for `--follow`.
pub(crate) fn progress(snapshot: &SessionSnapshot, json: bool) -> serde_json::Result<String> {
    if json {
        return serde_json::to_string(snapshot);
    }
    Ok(format!("[{}] {} events", snapshot.phase, snapshot.events))
}

/// Strings print bare, everything else as compact JSON.
fn inline(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
