// ── File I/O pipeline ─────────────────────────────────────────────────────────
//
// detect → reader (worker thread) → session (control thread) → surface,
// plus the reverse direction in `save`.

pub(crate) mod detect;
pub(crate) mod reader;
pub(crate) mod save;
pub(crate) mod session;

use std::path::{Path, PathBuf};

/// Absolute, symlink-resolved form of `path` used for every path comparison
/// (surface binding, recent files, overrides).
///
/// Paths that do not exist yet (Save As target, vanished file) cannot be
/// canonicalised; they are made absolute against the working directory.
/// `dunce` keeps Windows paths free of the `\\?\` prefix.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    match dunce::canonicalize(path) {
        Ok(p) => p,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
