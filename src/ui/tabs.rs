// ── Tab bar state ─────────────────────────────────────────────────────────────
//
// Pure formatting; the front end decides how to draw it.

use crate::editor::EditingSurface;

/// Compute the display label for a tab from its surface.
///
/// Format:
/// - Untitled, clean  → `"Untitled"`
/// - Untitled, dirty  → `"*Untitled"`
/// - Named, clean     → `"filename.txt"`
/// - Named, dirty     → `"*filename.txt"`
/// - Still loading    → `"filename.txt …"`
pub(crate) fn tab_label(surface: &EditingSurface) -> String {
    let name = surface.display_name();
    let dirty = if surface.dirty { "*" } else { "" };
    let loading = if surface.is_loading() { " \u{2026}" } else { "" };
    format!("{dirty}{name}{loading}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
