// SPDX-License-Identifier: Apache-2.0
//! Rendering of detection results.
//!
//! The text form is the CLI's primary output: one line per detected entry
//! with children indented beneath their core, then the discarded section
//! with coverage ratios. The JSON form carries the same structure plus the
//! reporting tags for downstream consumers.

use serde::Serialize;

use crate::detect::{DetectedApp, Detection, Placement, TreeNode};
use crate::ident::AppVersion;

fn render_group(group: &[AppVersion]) -> String {
    match group {
        [single] => single.to_string(),
        many => {
            let joined: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("[{}]", joined.join(", "))
        }
    }
}

fn render_placement(detected: &[DetectedApp], placement: &Placement, indent: &str) -> String {
    let entry = &detected[placement.entry];
    let mut line = format!("{indent}{}", render_group(&entry.group));
    if entry.implied {
        line.push_str(" (implied)");
    }
    if !placement.root.as_os_str().is_empty() {
        line.push(' ');
        line.push_str(&placement.root.display().to_string());
    }
    line.push('\n');
    line
}

/// Render the textual report for one detection pass.
///
/// `tree` must come from [`crate::detect::nest`] over the same
/// `detection.detected` slice.
pub fn render_text(detection: &Detection, tree: &[TreeNode]) -> String {
    let mut out = String::new();
    for node in tree {
        out.push_str(&render_placement(&detection.detected, &node.placement, ""));
        for child in &node.children {
            out.push_str(&render_placement(&detection.detected, child, "  "));
        }
    }
    if !detection.discarded.is_empty() {
        out.push_str("discarded:\n");
        for entry in &detection.discarded {
            out.push_str(&format!(
                "  {} ({}/{})\n",
                render_group(&entry.group),
                entry.matched,
                entry.total
            ));
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct JsonEntry {
    apps: Vec<AppVersion>,
    tags: Vec<String>,
    root: Option<String>,
    matched: usize,
    total: u8,
    implied: bool,
    children: Vec<JsonEntry>,
}

#[derive(Debug, Serialize)]
struct JsonReport {
    detected: Vec<JsonEntry>,
    discarded: Vec<JsonDiscarded>,
}

#[derive(Debug, Serialize)]
struct JsonDiscarded {
    apps: Vec<AppVersion>,
    matched: usize,
    total: u8,
}

fn json_entry(detected: &[DetectedApp], placement: &Placement) -> JsonEntry {
    let entry = &detected[placement.entry];
    JsonEntry {
        apps: entry.group.clone(),
        tags: entry.group.iter().filter_map(AppVersion::tag).collect(),
        root: if placement.root.as_os_str().is_empty() {
            None
        } else {
            Some(placement.root.display().to_string())
        },
        matched: entry.matched,
        total: entry.total,
        implied: entry.implied,
        children: Vec::new(),
    }
}

/// Render the JSON report for one detection pass.
///
/// # Errors
///
/// Returns the underlying `serde_json` error; with these types it can only
/// fail on formatter-level I/O, which `to_string_pretty` does not perform.
pub fn render_json(detection: &Detection, tree: &[TreeNode]) -> Result<String, serde_json::Error> {
    let report = JsonReport {
        detected: tree
            .iter()
            .map(|node| {
                let mut entry = json_entry(&detection.detected, &node.placement);
                entry.children = node
                    .children
                    .iter()
                    .map(|child| json_entry(&detection.detected, child))
                    .collect();
                entry
            })
            .collect(),
        discarded: detection
            .discarded
            .iter()
            .map(|entry| JsonDiscarded {
                apps: entry.group.clone(),
                matched: entry.matched,
                total: entry.total,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}
