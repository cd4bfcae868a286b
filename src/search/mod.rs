// ── Find / replace ────────────────────────────────────────────────────────────
//
// Pure text operations over a surface's buffer.  Positions are char indices,
// matching `ropey`.

use crate::editor::EditingSurface;

/// Parameters for a single search operation.
///
/// Stored by `App` so that "find next" can repeat the last search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SearchOptions {
    pub(crate) text: String,
    pub(crate) match_case: bool,
    pub(crate) whole_word: bool,
}

/// A match as a half-open char range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Match {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl SearchOptions {
    pub(crate) fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// All non-overlapping matches in `haystack`, in order.
    pub(crate) fn find_all(&self, haystack: &str) -> Vec<Match> {
        let needle: Vec<char> = self.text.chars().collect();
        if needle.is_empty() {
            return Vec::new();
        }
        let hay: Vec<char> = haystack.chars().collect();
        let mut out = Vec::new();
        let mut i = 0;
        while i + needle.len() <= hay.len() {
            if self.matches_at(&hay, i, &needle) {
                out.push(Match {
                    start: i,
                    end: i + needle.len(),
                });
                i += needle.len();
            } else {
                i += 1;
            }
        }
        out
    }

    fn matches_at(&self, hay: &[char], at: usize, needle: &[char]) -> bool {
        let window = &hay[at..at + needle.len()];
        let equal = if self.match_case {
            window == needle
        } else {
            window
                .iter()
                .zip(needle)
                .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()))
        };
        if !equal || !self.whole_word {
            return equal;
        }
        let is_word = |c: &char| c.is_alphanumeric() || *c == '_';
        let before = at.checked_sub(1).and_then(|p| hay.get(p));
        let after = hay.get(at + needle.len());
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    }
}

/// First match at or after `from`, wrapping to the top of the buffer.
pub(crate) fn find_next(surface: &EditingSurface, options: &SearchOptions, from: usize) -> Option<Match> {
    let matches = options.find_all(&surface.contents());
    matches
        .iter()
        .find(|m| m.start >= from)
        .or_else(|| matches.first())
        .copied()
}

/// Replace the first match at or after `from` (wrapping).  Returns the range
/// of the inserted replacement.
pub(crate) fn replace_next(
    surface: &mut EditingSurface,
    options: &SearchOptions,
    replacement: &str,
    from: usize,
) -> Option<Match> {
    let m = find_next(surface, options, from)?;
    surface.remove(m.start, m.end);
    surface.insert(m.start, replacement);
    Some(Match {
        start: m.start,
        end: m.start + replacement.chars().count(),
    })
}

/// Replace every match.  Returns how many were replaced; zero leaves the
/// surface untouched (and clean).
pub(crate) fn replace_all(surface: &mut EditingSurface, options: &SearchOptions, replacement: &str) -> usize {
    let text = surface.contents();
    let matches = options.find_all(&text);
    if matches.is_empty() {
        return 0;
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let chars: Vec<char> = text.chars().collect();
    for m in &matches {
        out.extend(&chars[last..m.start]);
        out.push_str(replacement);
        last = m.end;
    }
    out.extend(&chars[last..]);
    surface.replace_all_text(&out);
    matches.len()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
