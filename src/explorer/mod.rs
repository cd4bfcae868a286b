// ── File explorer ─────────────────────────────────────────────────────────────
//
// One directory level at a time; the front end expands folders on demand.

use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use crate::error::{ConstructError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) kind: EntryKind,
    pub(crate) path: PathBuf,
}

impl Entry {
    pub(crate) fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Folders first, then case-insensitive by name.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.kind, other.kind) {
            (EntryKind::Folder, EntryKind::File) => Ordering::Less,
            (EntryKind::File, EntryKind::Folder) => Ordering::Greater,
            _ => self
                .name()
                .to_lowercase()
                .cmp(&other.name().to_lowercase())
                .then_with(|| self.path.cmp(&other.path)),
        }
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorted listing of `dir`.  Entries that vanish mid-scan are skipped.
pub(crate) fn list_dir(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let kind = if entry.file_type().ok()?.is_dir() {
                EntryKind::Folder
            } else {
                EntryKind::File
            };
            Some(Entry {
                kind,
                path: entry.path(),
            })
        })
        .collect();
    entries.sort();
    Ok(entries)
}

/// The directory new items go into when `selected` is highlighted: the
/// folder itself, or the parent of a selected file.
pub(crate) fn target_dir(selected: &Path) -> PathBuf {
    if selected.is_dir() {
        selected.to_path_buf()
    } else {
        selected
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| selected.to_path_buf())
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConstructError::InvalidName(name.to_owned()));
    }
    Ok(name)
}

/// Create an empty file called `name` in `dir`.  Fails if it already exists.
pub(crate) fn create_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(validate_name(name)?);
    fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
    log::info!("created file {}", path.display());
    Ok(path)
}

/// Create directory `name` in `dir`.  Fails if it already exists.
pub(crate) fn create_dir(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(validate_name(name)?);
    fs::create_dir(&path)?;
    log::info!("created directory {}", path.display());
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folders_sort_first_then_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.txt"), "").expect("write");
        fs::write(dir.path().join("A.txt"), "").expect("write");
        fs::create_dir(dir.path().join("zeta")).expect("mkdir");
        fs::create_dir(dir.path().join("alpha")).expect("mkdir");

        let names: Vec<_> = list_dir(dir.path())
            .expect("list")
            .iter()
            .map(Entry::name)
            .collect();
        assert_eq!(names, ["alpha", "zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn create_file_and_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = create_dir(dir.path(), "src").expect("mkdir");
        assert!(sub.is_dir());
        let file = create_file(&sub, " main.py ").expect("create");
        assert_eq!(file, sub.join("main.py"));
        assert!(file.is_file());

        assert!(matches!(
            create_file(&sub, "main.py"),
            Err(ConstructError::Io(_))
        ));
    }

    #[test]
    fn bad_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        for bad in ["", "  ", "..", "a/b", "a\\b"] {
            assert!(
                matches!(create_file(dir.path(), bad), Err(ConstructError::InvalidName(_))),
                "{bad:?} was accepted"
            );
        }
    }

    #[test]
    fn target_dir_of_file_is_its_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("x.txt");
        fs::write(&file, "").expect("write");
        assert_eq!(target_dir(&file), dir.path());
        assert_eq!(target_dir(dir.path()), dir.path());
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(list_dir(&dir.path().join("nope")).is_err());
    }
}
