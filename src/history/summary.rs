use std::fmt::Write as _;

use serde_json::Value;

use super::{HistoryEntry, Outcome, ToolResult};
use crate::docs::types::{render_args, ApiMatch};

const DOCSTRING_LIMIT: usize = 150;
const ARGS_LIMIT: usize = 100;
const METHODS_SHOWN: usize = 5;

/// Render the action history as the text block embedded in decision and response prompts.
///
/// Output is a pure function of the entries: no timestamps, full read contents, full match
/// lists. Only API docstrings and argument lists are shortened.
pub fn format_history_summary(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "No previous actions.".to_string();
    }

    let mut out = String::from("\n");
    for (i, entry) in history.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_entry(&mut out, i + 1, entry);
    }
    out
}

fn render_entry(out: &mut String, number: usize, entry: &HistoryEntry) {
    let _ = writeln!(out, "Action {}:", number);
    let _ = writeln!(out, "- Tool: {}", entry.tool);
    let _ = writeln!(out, "- Reason: {}", entry.reason);

    if !entry.params.is_empty() {
        out.push_str("- Parameters:\n");
        for (key, value) in &entry.params {
            let _ = writeln!(out, "  - {}: {}", key, param_text(value));
        }
    }

    match &entry.outcome {
        Outcome::Pending => {}
        Outcome::Staged { .. } => out.push_str("- Result: (in progress)\n"),
        Outcome::Done(result) => {
            let label = if result.success() { "Success" } else { "Failed" };
            let _ = writeln!(out, "- Result: {}", label);
            render_result(out, result);
        }
    }
}

fn render_result(out: &mut String, result: &ToolResult) {
    match result {
        ToolResult::ReadFile { success, content } => {
            if *success {
                let _ = writeln!(out, "- Content: {}", content);
            } else {
                let _ = writeln!(out, "- Error: {}", content);
            }
        }
        ToolResult::Grep { success: true, matches } => {
            let _ = writeln!(out, "- Matches: {}", matches.len());
            for (j, m) in matches.iter().enumerate() {
                let _ = writeln!(out, "  {}. {}:{}: {}", j + 1, m.file, m.line_number, m.content);
            }
        }
        ToolResult::Grep { .. } => out.push_str("- Matches: 0 (search failed)\n"),
        ToolResult::ListDir {
            success,
            tree_visualization,
        } => {
            out.push_str("- Directory structure:\n");
            let tree = tree_visualization.replace("\r\n", "\n");
            let tree = tree.trim();
            if !*success || tree.is_empty() {
                out.push_str("  (Empty or inaccessible directory)\n");
            } else {
                for line in tree.lines().filter(|l| !l.trim().is_empty()) {
                    let _ = writeln!(out, "  {}", line);
                }
            }
        }
        ToolResult::ApiSearch {
            success: true,
            matches,
            ..
        } => {
            let _ = writeln!(out, "- API Matches: {}", matches.len());
            for (j, m) in matches.iter().enumerate() {
                render_api_match(out, j + 1, m);
            }
        }
        ToolResult::ApiSearch { message, .. } => {
            let _ = writeln!(out, "- API Search Result: {}", message);
        }
        ToolResult::CreateFile { success, error } => {
            if !*success && !error.is_empty() {
                let _ = writeln!(out, "- Error: {}", error);
            }
        }
        ToolResult::Edit(report) => {
            let _ = writeln!(out, "- Operations: {}", report.operations);
            if !report.reasoning.is_empty() {
                let _ = writeln!(out, "- Reasoning: {}", report.reasoning);
            }
            for detail in report.details.iter().filter(|d| !d.success) {
                let _ = writeln!(out, "- Failed operation: {}", detail.message);
            }
        }
        ToolResult::Validation {
            message, repairs, ..
        } => {
            let _ = writeln!(out, "- Validation: {}", message);
            if *repairs > 0 {
                let _ = writeln!(out, "- Repairs: {}", repairs);
            }
        }
        ToolResult::Finish => {}
        ToolResult::Aborted { error } => {
            let _ = writeln!(out, "- Error: {}", error);
        }
    }
}

fn render_api_match(out: &mut String, number: usize, m: &ApiMatch) {
    let _ = writeln!(out, "  {}. {}", number, m.name);
    for record in &m.matches {
        match &record.member {
            Some(member) => {
                let _ = writeln!(out, "     Matched {} ({}): {}", record.location, member, record.text);
            }
            None => {
                let _ = writeln!(out, "     Matched {}: {}", record.location, record.text);
            }
        }
    }

    let entry = &m.entry;
    if let Some(doc) = entry.docstring.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "     Docstring: {}", truncate_chars(doc, DOCSTRING_LIMIT));
    }
    if let Some(args) = entry.args.as_ref().filter(|a| !a.is_empty()) {
        let _ = writeln!(out, "     Args: {}", truncate_chars(&render_args(args), ARGS_LIMIT));
    }
    if let Some(returns) = entry.returns.as_deref().filter(|r| !r.is_empty()) {
        let _ = writeln!(out, "     Returns: {}", returns);
    }
    let methods = entry.method_names();
    if !methods.is_empty() {
        let shown = methods
            .iter()
            .take(METHODS_SHOWN)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        if methods.len() > METHODS_SHOWN {
            let _ = writeln!(
                out,
                "     Methods: {} (and {} more)",
                shown,
                methods.len() - METHODS_SHOWN
            );
        } else {
            let _ = writeln!(out, "     Methods: {}", shown);
        }
    }
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cut to `limit` characters, appending "..." when anything was dropped.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
