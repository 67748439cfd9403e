//! Plain-text rendering of command results.

use serde_json::{json, Value};
use spmi_core::{BulkReport, ListRow, TaskState, TaskStatus};
use std::fmt::Write;

/// `list` table: id, state, comment.
pub fn list_table(rows: &[ListRow]) -> String {
    let id_width = rows.iter().map(|r| r.id.len()).max().unwrap_or(0).max(2);
    let mut out = String::new();

    let _ = writeln!(out, "{:<id_width$}  {:<8}  COMMENT", "ID", "STATE");
    for row in rows {
        let state = row.state.map_or("unknown", |s| s.as_str());
        let _ = writeln!(out, "{:<id_width$}  {:<8}  {}", row.id, state, row.comment);
    }
    let _ = writeln!(out, "\n{} resource(s)", rows.len());
    out
}

/// systemctl-style status block.
pub fn status_block(status: &TaskStatus) -> String {
    let mut out = String::new();
    let bullet = match status.state {
        TaskState::Active => '●',
        TaskState::Inactive => '○',
    };

    if status.comment.is_empty() {
        let _ = writeln!(out, "{} {}", bullet, status.id);
    } else {
        let _ = writeln!(out, "{} {} - {}", bullet, status.id, status.comment);
    }
    let _ = writeln!(out, "     Type: {} (backend: {})", status.kind, status.backend);
    let _ = writeln!(out, "    State: {}", status.state);
    if let Some(handle) = &status.handle {
        let _ = writeln!(out, "  Session: {}", handle);
    }
    if let Some(pid) = status.pid {
        let _ = writeln!(out, "      PID: {}", pid);
    }
    let _ = writeln!(out, "  Command: {}", status.command);
    if let Some(code) = status.exit_code {
        let _ = writeln!(out, "Exit code: {}", code);
    }
    let _ = writeln!(out, "  Created: {}", status.created_at.to_rfc3339());
    if let Some(at) = status.last_transition {
        let _ = writeln!(out, "  Changed: {}", at.to_rfc3339());
    }

    write_capture(&mut out, "Output", status.output.as_deref());
    write_capture(&mut out, "Errors", status.error_output.as_deref());
    out
}

fn write_capture(out: &mut String, title: &str, text: Option<&str>) {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return;
    };
    let _ = writeln!(out, "\n{}:", title);
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}

/// Per-target lines plus a summary for bulk transitions.
pub fn report<T>(action: &str, report: &BulkReport<T>) -> String {
    let mut out = String::new();

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(_) => {
                let _ = writeln!(out, "{} {}: ok", action, outcome.id);
            }
            Err(e) => {
                let _ = writeln!(out, "{} {}: failed ({}): {}", action, outcome.id, e.kind(), e);
            }
        }
    }
    for pattern in &report.unmatched {
        let _ = writeln!(out, "no resource matches '{}'", pattern);
    }
    let _ = writeln!(
        out,
        "{}: {} succeeded, {} failed",
        action,
        report.succeeded(),
        report.failed()
    );
    out
}

/// `--json` form of [`report`].
pub fn report_json<T>(action: &str, report: &BulkReport<T>) -> Value {
    let results: Vec<Value> = report
        .outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(_) => json!({ "id": outcome.id, "ok": true }),
            Err(e) => json!({
                "id": outcome.id,
                "ok": false,
                "kind": e.kind().as_str(),
                "error": e.to_string(),
            }),
        })
        .collect();

    json!({
        "action": action,
        "results": results,
        "summary": report.summary(),
    })
}

/// `--json` form of `status`: the reports plus per-target failures.
pub fn status_json(report: &BulkReport<TaskStatus>) -> Value {
    let statuses: Vec<&TaskStatus> = report
        .outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();
    let mut value = report_json("status", report);
    value["statuses"] = json!(statuses);
    value
}
