// ── Presentation strings ──────────────────────────────────────────────────────
//
// Window title, status line and tab labels.  No drawing happens here.

pub(crate) mod tabs;

use crate::editor::EditingSurface;

const APP_NAME: &str = "Construct";

/// `"Construct - todo.txt"`, or `"Construct - Unnamed"` for an untitled
/// buffer or when no tab is open.
pub(crate) fn window_title(surface: Option<&EditingSurface>) -> String {
    match surface.and_then(|s| s.path.as_deref()).and_then(|p| p.file_name()) {
        Some(name) => format!("{APP_NAME} - {}", name.to_string_lossy()),
        None => format!("{APP_NAME} - Unnamed"),
    }
}

/// `Line: 3 | Column: 7 | Chars: 120 | Encoding: UTF-8 | Newline: CRLF |
/// Language: Rust | Branch: main *`
///
/// Line and column are one-based.  The branch segment is omitted outside a
/// repository; the trailing `*` marks unsaved changes.
pub(crate) fn status_line(surface: &EditingSurface, branch: Option<&str>) -> String {
    let (line, column) = surface.cursor_position();
    let mut parts = vec![
        format!("Line: {}", line + 1),
        format!("Column: {}", column + 1),
        format!("Chars: {}", surface.text().len_chars()),
        format!("Encoding: {}", surface.encoding_name()),
        format!("Newline: {}", surface.newline.as_str()),
        format!("Language: {}", surface.language.display_name()),
    ];
    if let Some(branch) = branch {
        parts.push(format!("Branch: {branch}"));
    }
    let mut line = parts.join(" | ");
    if surface.dirty {
        line.push_str(" *");
    }
    line
}

// ── Tests ─────────────────────────────────────────────────────────────────────
