//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Every node leads with
//! its position among its siblings and its title; the file it came from is
//! shown as an indented `Source:` line. Read top to bottom, the scan output
//! is the wiki's table of contents.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Physics Notes
//! 001 Meta (1 document)
//!     Source: Meta/
//!     001 About
//!         Source: Meta/About.md
//! 002 Physics (2 documents)
//!     Source: Physics/
//!     001 Quantum
//!         Source: Physics/Quantum.md
//!     002 Schrödinger Equation
//!         Source: Physics/Schrodinger.md
//!         Tags: quantum, waves
//!
//! 5 nodes: 2 folders, 3 documents
//! ```
//!
//! ## Check
//!
//! ```text
//! Repaired 1 manifest
//!     Meta/_meta.json
//! 1 warning
//!     Physics/Broken.md: invalid front matter: ...
//! ```
//!
//! The `Repaired` block only appears with `check --fix`.
//!
//! ## Mutations
//!
//! ```text
//! OK renamed Physics/Quantum → Physics/Quantum Mechanics
//! FAILED 'Physics/Gone' not found
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use std::path::Path;

use crate::bundle::WriteOutcome;
use crate::config::WikiConfig;
use crate::mutation::OpReport;
use crate::tree::{self, Handle, Tree};
use crate::types::{Index, Node, ScanWarning};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {plural}")
    }
}

/// Positional index + title, with the document count for folders.
///
/// ```text
/// 001 Physics (2 documents)
/// 002 Quantum
/// ```
fn entity_header(index: usize, title: &str, documents: Option<usize>) -> String {
    match documents {
        Some(n) => format!(
            "{} {} ({})",
            format_index(index),
            title,
            plural(n, "document", "documents")
        ),
        None => format!("{} {}", format_index(index), title),
    }
}

fn summary_line(index: &Index) -> String {
    format!(
        "{}: {}, {}",
        plural(index.len(), "node", "nodes"),
        plural(index.folder_count(), "folder", "folders"),
        plural(index.document_count(), "document", "documents")
    )
}

// ============================================================================
// Scan output
// ============================================================================

/// Format the index as an ordered outline under the wiki title.
pub fn format_scan_output(index: &Index, config: &WikiConfig) -> Vec<String> {
    let mut lines = vec![config.title.clone()];
    let tree = tree::build(index);
    format_level(&tree, tree.roots(), 0, &mut lines);
    lines.push(String::new());
    lines.push(summary_line(index));
    lines
}

fn format_level(tree: &Tree<'_>, handles: &[Handle], depth: usize, lines: &mut Vec<String>) {
    let pad = indent(depth);
    for (i, handle) in handles.iter().enumerate() {
        let children = tree.children(*handle);
        match tree.node(*handle) {
            Node::Folder(folder) => {
                let documents = children
                    .iter()
                    .filter(|h| !tree.node(**h).is_folder())
                    .count();
                lines.push(format!(
                    "{pad}{}",
                    entity_header(i + 1, &folder.title, Some(documents))
                ));
                lines.push(format!("{pad}    Source: {}/", folder.id));
                format_level(tree, children, depth + 1, lines);
            }
            Node::Document(doc) => {
                lines.push(format!("{pad}{}", entity_header(i + 1, &doc.title, None)));
                lines.push(format!("{pad}    Source: {}", doc.file_path));
                if !doc.tags.is_empty() {
                    lines.push(format!("{pad}    Tags: {}", doc.tags.join(", ")));
                }
            }
        }
    }
}

/// Print scan output to stdout.
pub fn print_scan_output(index: &Index, config: &WikiConfig) {
    for line in format_scan_output(index, config) {
        println!("{}", line);
    }
}

// ============================================================================
// Check output
// ============================================================================

pub fn format_warnings(warnings: &[ScanWarning]) -> Vec<String> {
    if warnings.is_empty() {
        return vec!["No problems found".to_string()];
    }
    let mut lines = vec![plural(warnings.len(), "warning", "warnings")];
    lines.extend(warnings.iter().map(|w| format!("    {w}")));
    lines
}

pub fn print_warnings(warnings: &[ScanWarning]) {
    for line in format_warnings(warnings) {
        println!("{}", line);
    }
}

/// Manifests rewritten by `check --fix`.
pub fn format_repairs(paths: &[String]) -> Vec<String> {
    if paths.is_empty() {
        return vec!["Manifests complete".to_string()];
    }
    let mut lines = vec![format!(
        "Repaired {}",
        plural(paths.len(), "manifest", "manifests")
    )];
    lines.extend(paths.iter().map(|p| format!("    {p}")));
    lines
}

pub fn print_repairs(paths: &[String]) {
    for line in format_repairs(paths) {
        println!("{}", line);
    }
}

// ============================================================================
// Generate output
// ============================================================================

pub fn format_generate_output(index: &Index, path: &Path, outcome: &WriteOutcome) -> Vec<String> {
    let verb = if outcome.was_written() {
        "Wrote"
    } else {
        "Unchanged"
    };
    vec![
        format!("{} {}", verb, path.display()),
        format!("    {}", summary_line(index)),
        format!("    sha256 {}", outcome.fingerprint()),
    ]
}

pub fn print_generate_output(index: &Index, path: &Path, outcome: &WriteOutcome) {
    for line in format_generate_output(index, path, outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Mutation reports
// ============================================================================

pub fn format_report(report: &OpReport) -> String {
    if report.success {
        format!("OK {}", report.message)
    } else {
        format!("FAILED {}", report.message)
    }
}

// ============================================================================
// Tests
// ============================================================================
