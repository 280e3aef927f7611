//! Output formatting for CLI results.
//!
//! Two modes:
//! - **Human** (default): report text and aligned summary lines
//! - **JSON** (`--json`): `serde_json::to_string_pretty`

use strata_durability::{ComparisonReport, SnapshotFiles, SnapshotReport};

/// Output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

fn to_pretty(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Render verification reports
pub fn format_reports(reports: &[SnapshotReport], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_pretty(serde_json::Value::Array(
            reports
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "path": r.dir.display().to_string(),
                        "nonce": r.nonce,
                        "valid": r.valid,
                        "report": r.text,
                    })
                })
                .collect(),
        )),
        OutputMode::Human => reports
            .iter()
            .map(|r| format!("{} ({}):\n{}", r.nonce, r.dir.display(), r.text))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a scan of snapshot directories
pub fn format_scan(snapshots: &[SnapshotFiles], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_pretty(serde_json::Value::Array(
            snapshots
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "path": s.dir.display().to_string(),
                        "nonce": s.nonce,
                        "txnId": s.txn_id().map(|t| t.raw()),
                        "size": s.total_size(),
                        "tablesRequired": s.tables_required(),
                        "tablesMissing": s.tables_missing(),
                        "tablesIncomplete": s.tables_incomplete(),
                        "complete": s.is_complete(),
                        "terminal": s.is_terminal(),
                    })
                })
                .collect(),
        )),
        OutputMode::Human => {
            if snapshots.is_empty() {
                return "(empty)".to_string();
            }
            snapshots
                .iter()
                .map(|s| {
                    let mut line = format!(
                        "{:<24} {:<8} {:>12} bytes  {}",
                        s.nonce,
                        if s.is_complete() { "COMPLETE" } else { "PARTIAL" },
                        s.total_size(),
                        s.dir.display()
                    );
                    let missing = s.tables_missing();
                    if !missing.is_empty() {
                        line.push_str(&format!("\n    missing: {}", missing.join(", ")));
                    }
                    let incomplete = s.tables_incomplete();
                    if !incomplete.is_empty() {
                        line.push_str(&format!("\n    incomplete: {}", incomplete.join(", ")));
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Render a replica or snapshot comparison
pub fn format_comparison(report: &ComparisonReport, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_pretty(serde_json::json!({
            "compared": report.subject,
            "matches": report.matches(),
            "tables": report.tables_compared,
            "partitionCopies": report.partitions_compared,
            "diffs": report
                .diffs
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "table": d.table,
                        "partition": d.partition_id,
                        "left": d.left,
                        "right": d.right,
                        "leftRows": d.left_rows,
                        "rightRows": d.right_rows,
                        "onlyLeft": d.only_left,
                        "onlyRight": d.only_right,
                    })
                })
                .collect::<Vec<_>>(),
            "problems": report.problems,
        })),
        OutputMode::Human => report.text(),
    }
}
