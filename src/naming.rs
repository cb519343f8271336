//! Centralized name handling for documents and folders.
//!
//! Every entry in the content root is addressed three ways, and all three are
//! derived here so the scanner, the manifest store and the mutation engine
//! agree on them:
//!
//! - **File name**: the literal on-disk leaf (`Quantum.md`, `Physics`).
//! - **Base name**: the file name with the `.md` extension stripped. This is
//!   what `_meta.json` manifests list.
//! - **Id**: the `/`-joined base names from the content root
//!   (`Physics/Quantum`). Ids never carry an extension.
//!
//! ## Slugs
//!
//! Two slug rules exist and both are load-bearing:
//!
//! - [`slugify`] is applied when a document is created: lowercase, drop
//!   everything outside ASCII word characters, whitespace and `-`, collapse
//!   whitespace runs to `-`, trim leading/trailing dashes.
//!   `"Hello, World!"` → `"hello-world"`.
//! - [`loose_slug`] is applied when a document is renamed: lowercase and
//!   collapse whitespace runs to `-`, nothing else.
//!   `"Hello, World!"` → `"hello,-world!"`.

/// Extension (without dot) that marks a file as a document.
pub const DOC_EXTENSION: &str = "md";

/// Per-directory order manifest file name.
pub const MANIFEST_FILE: &str = "_meta.json";

/// Root-level wiki settings file name.
pub const CONFIG_FILE: &str = "_config.json";

/// Directory names skipped by the scanner besides dotfiles.
pub const IGNORED_DIRS: &[&str] = &["node_modules"];

/// True if `file_name` ends in `.md` (case-insensitive) and has a non-empty stem.
pub fn is_document_name(file_name: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case(DOC_EXTENSION),
        None => false,
    }
}

/// Dotfiles and dot-directories are invisible to the index and the watcher.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Strip the document extension from a file name. Folder names are returned as-is.
///
/// - `("Quantum.md", false)` → `"Quantum"`
/// - `("notes.v2.MD", false)` → `"notes.v2"`
/// - `("Physics", true)` → `"Physics"`
/// - `("draft.md", true)` → `"draft.md"` (a directory named like a document keeps its name)
pub fn base_name(file_name: &str, is_folder: bool) -> &str {
    if is_folder || !is_document_name(file_name) {
        return file_name;
    }
    match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    }
}

/// File name for a document called `name`, adding `.md` unless already present.
pub fn document_file_name(name: &str) -> String {
    if is_document_name(name) {
        name.to_string()
    } else {
        format!("{name}.{DOC_EXTENSION}")
    }
}

/// Join a parent id and a base name into a child id.
pub fn join_id(parent_id: Option<&str>, base: &str) -> String {
    match parent_id {
        Some(parent) if !parent.is_empty() => format!("{parent}/{base}"),
        _ => base.to_string(),
    }
}

/// The parent portion of an id, or `None` for top-level ids.
pub fn parent_of(id: &str) -> Option<&str> {
    id.rsplit_once('/').map(|(parent, _)| parent)
}

/// The last segment of an id.
pub fn leaf_of(id: &str) -> &str {
    id.rsplit_once('/').map(|(_, leaf)| leaf).unwrap_or(id)
}

/// The first segment of an id (`"Physics/Quantum"` → `"Physics"`).
pub fn top_segment(id: &str) -> &str {
    id.split('/').next().unwrap_or(id)
}

/// True if `id` lies strictly below `ancestor` in the hierarchy.
pub fn is_descendant(id: &str, ancestor: &str) -> bool {
    id.len() > ancestor.len()
        && id.starts_with(ancestor)
        && id.as_bytes()[ancestor.len()] == b'/'
}

/// True if `id` equals `ancestor` or lies below it.
pub fn is_same_or_descendant(id: &str, ancestor: &str) -> bool {
    id == ancestor || is_descendant(id, ancestor)
}

/// Reject names that cannot be a single path segment inside the content root.
pub fn validate_entry_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("'{name}' must not contain path separators"));
    }
    if name == "." || name == ".." {
        return Err(format!("'{name}' is not a valid name"));
    }
    if is_hidden(name) {
        return Err(format!("'{name}' would be hidden (names must not start with '.')"));
    }
    if name == MANIFEST_FILE || name == CONFIG_FILE {
        return Err(format!("'{name}' is reserved"));
    }
    Ok(())
}

/// Slug applied to newly created documents.
///
/// Word characters are ASCII letters, digits and `_`; anything else except
/// whitespace and `-` is dropped, so accented letters disappear entirely
/// (`"Schrödinger"` → `"schrdinger"`).
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let dashed = collapse_whitespace(&kept);
    dashed.trim_matches('-').to_string()
}

/// Slug applied when a document is renamed: lowercase, whitespace runs → `-`.
pub fn loose_slug(name: &str) -> String {
    collapse_whitespace(&name.to_lowercase())
}

/// Replace every run of whitespace with a single dash.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
