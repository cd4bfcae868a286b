// ── Editing surface ───────────────────────────────────────────────────────────
//
// Per-tab document state.  Owned by `App` and mutated only on the control
// thread; load workers reach it exclusively through `io::session`.

use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use ropey::Rope;

use crate::{
    io::{
        detect::{DetectionResult, Newline},
        session::LoadHandle,
    },
    languages::Language,
};

slotmap::new_key_type! {
    /// Stable handle to an open tab.  Once the tab is closed the key never
    /// resolves again, so it is safe to hold in worker messages.
    pub(crate) struct SurfaceId;
}

/// Everything a failed reload needs to put back.
#[derive(Debug, Clone)]
struct Stash {
    text: Rope,
    encoding: &'static Encoding,
    newline: Newline,
    bom: bool,
    dirty: bool,
}

/// One open buffer and its metadata.
#[derive(Debug)]
pub(crate) struct EditingSurface {
    /// Normalised absolute path, or `None` for an untitled buffer.
    pub(crate) path: Option<PathBuf>,
    pub(crate) encoding: &'static Encoding,
    pub(crate) newline: Newline,
    /// Whether the file on disk started with a byte-order mark.
    pub(crate) bom: bool,
    /// `true` when the buffer differs from the last successful load or save.
    pub(crate) dirty: bool,
    /// Bumped every time a load starts; results tagged with an older value
    /// are stale.
    pub(crate) generation: u64,
    /// The worker currently streaming into this surface, if any.
    pub(crate) active_load: Option<LoadHandle>,
    pub(crate) language: Language,
    /// Caret as a char index; kept within the buffer.
    cursor: usize,
    text: Rope,
    stash: Option<Stash>,
    /// Non-zero while programmatic edits are being applied; content-change
    /// notifications do not mark the surface dirty during that time.
    suppress_changes: u32,
}

impl EditingSurface {
    /// A fresh, untitled, empty surface.
    pub(crate) fn new_untitled() -> Self {
        Self {
            path: None,
            encoding: UTF_8,
            newline: Newline::Crlf,
            bom: false,
            dirty: false,
            generation: 0,
            active_load: None,
            language: Language::PlainText,
            cursor: 0,
            text: Rope::new(),
            stash: None,
            suppress_changes: 0,
        }
    }

    /// An empty surface already bound to `path` (content arrives by load).
    #[cfg(test)]
    pub(crate) fn with_path(path: PathBuf) -> Self {
        let mut surface = Self::new_untitled();
        surface.language = crate::languages::language_from_path(&path);
        surface.path = Some(path);
        surface
    }

    pub(crate) fn text(&self) -> &Rope {
        &self.text
    }

    pub(crate) fn contents(&self) -> String {
        self.text.to_string()
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.active_load.is_some()
    }

    /// The bare filename component, or `"Untitled"` if no path is set.
    pub(crate) fn display_name(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_owned())
    }

    pub(crate) fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor.min(self.text.len_chars())
    }

    pub(crate) fn set_cursor(&mut self, char_idx: usize) {
        self.cursor = char_idx.min(self.text.len_chars());
    }

    /// Zero-based `(line, column)` of the caret.
    pub(crate) fn cursor_position(&self) -> (usize, usize) {
        let cursor = self.cursor();
        let line = self.text.char_to_line(cursor);
        (line, cursor - self.text.line_to_char(line))
    }

    // ── User edits ────────────────────────────────────────────────────────────

    /// Insert text typed or pasted by the user at `char_idx`.
    pub(crate) fn insert(&mut self, char_idx: usize, text: &str) {
        let idx = char_idx.min(self.text.len_chars());
        self.text.insert(idx, text);
        self.cursor = idx + text.chars().count();
        self.abandon_load();
        self.content_changed();
    }

    /// Remove the user-selected char range `start..end`.
    pub(crate) fn remove(&mut self, start: usize, end: usize) {
        let len = self.text.len_chars();
        let (start, end) = (start.min(len), end.min(len));
        if start < end {
            self.text.remove(start..end);
            self.cursor = start;
            self.abandon_load();
            self.content_changed();
        }
    }

    /// Replace the whole buffer as a user-visible edit (e.g. Replace All,
    /// Import From Web).  Marks the surface dirty.
    pub(crate) fn replace_all_text(&mut self, text: &str) {
        self.text = Rope::from_str(text);
        self.abandon_load();
        self.content_changed();
    }

    /// A user edit while a load is streaming wins: the load is invalidated
    /// (its remaining events fail the generation check) and the buffer keeps
    /// whatever had arrived plus the edit.
    fn abandon_load(&mut self) {
        if let Some(load) = self.active_load.take() {
            self.generation += 1;
            self.stash = None;
            log::debug!(
                "edit during load #{} of {}; load abandoned",
                load.generation(),
                load.path().display()
            );
        }
    }

    fn content_changed(&mut self) {
        if self.suppress_changes == 0 {
            self.dirty = true;
        }
    }

    fn with_changes_suppressed(&mut self, f: impl FnOnce(&mut Self)) {
        self.suppress_changes += 1;
        f(self);
        self.suppress_changes -= 1;
    }

    // ── Streaming load ────────────────────────────────────────────────────────

    /// Apply detection results and clear the buffer for streaming.
    ///
    /// The previous content is stashed so that a failure mid-stream can put
    /// it back (`abort_stream`).  If a superseded load already stashed, that
    /// older snapshot is kept.
    pub(crate) fn begin_stream(&mut self, detection: &DetectionResult) {
        if self.stash.is_none() {
            self.stash = Some(Stash {
                text: self.text.clone(),
                encoding: self.encoding,
                newline: self.newline,
                bom: self.bom,
                dirty: self.dirty,
            });
        }
        self.encoding = detection.encoding;
        self.newline = detection.newline;
        self.bom = detection.bom_len > 0;
        self.with_changes_suppressed(|s| {
            s.text = Rope::new();
            s.content_changed();
        });
    }

    /// Append a decoded chunk without marking the surface dirty.
    pub(crate) fn append_loaded(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.with_changes_suppressed(|s| {
            let end = s.text.len_chars();
            s.text.insert(end, chunk);
            s.content_changed();
        });
    }

    /// The final chunk arrived: the buffer now mirrors the file.
    pub(crate) fn finish_stream(&mut self) {
        self.stash = None;
        self.dirty = false;
    }

    /// The load failed after `begin_stream`; restore what was there before.
    /// A failure before `begin_stream` has nothing stashed and changes nothing.
    pub(crate) fn abort_stream(&mut self) {
        if let Some(stash) = self.stash.take() {
            self.text = stash.text;
            self.encoding = stash.encoding;
            self.newline = stash.newline;
            self.bom = stash.bom;
            self.dirty = stash.dirty;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
