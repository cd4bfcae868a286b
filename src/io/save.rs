// ── Save path ─────────────────────────────────────────────────────────────────
//
// Turns the in-memory `\n` text back into on-disk bytes: restores the
// document's newline convention, re-encodes, and re-adds a byte-order mark
// when the file had one.  Refuses rather than writing lossy output.

use std::path::Path;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

use super::detect::Newline;
use crate::error::{ConstructError, Result};

/// Encodings offered when the current one cannot represent the buffer.
///
/// No separate Latin-1 entry: under WHATWG labelling `"ISO-8859-1"` resolves
/// to windows-1252.
pub(crate) const ALTERNATE_ENCODINGS: &[&str] = &["UTF-8", "windows-1252", "UTF-16LE", "UTF-16BE"];

/// Resolve a user-chosen label (`"utf-16"`, `"latin1"`, …) to an encoding.
pub(crate) fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| ConstructError::UnknownEncoding(label.to_owned()))
}

/// Produce the bytes to write for `text`.
///
/// Any `\r\n` or bare `\r` that slipped into the buffer (e.g. via paste) is
/// folded to `\n` first, so every line break comes out as `newline`.
pub(crate) fn encode_for_disk(text: &str, encoding: &'static Encoding, newline: Newline, bom: bool) -> Result<Vec<u8>> {
    let text = restore_newlines(text, newline);

    if encoding == UTF_16LE || encoding == UTF_16BE {
        let le = encoding == UTF_16LE;
        let mut out = Vec::with_capacity(text.len() * 2 + 2);
        if bom {
            out.extend_from_slice(if le { &[0xFF, 0xFE] } else { &[0xFE, 0xFF] });
        }
        for unit in text.encode_utf16() {
            out.extend_from_slice(&if le { unit.to_le_bytes() } else { unit.to_be_bytes() });
        }
        return Ok(out);
    }

    if encoding == UTF_8 {
        let mut out = Vec::with_capacity(text.len() + 3);
        if bom {
            out.extend_from_slice(b"\xEF\xBB\xBF");
        }
        out.extend_from_slice(text.as_bytes());
        return Ok(out);
    }

    let (bytes, used, unmappable) = encoding.encode(&text);
    if unmappable || used != encoding {
        return Err(ConstructError::Unencodable {
            encoding: encoding.name(),
        });
    }
    Ok(bytes.into_owned())
}

/// Encode and write in one step.
pub(crate) fn write_document(
    path: &Path,
    text: &str,
    encoding: &'static Encoding,
    newline: Newline,
    bom: bool,
) -> Result<()> {
    let bytes = encode_for_disk(text, encoding, newline, bom)?;
    std::fs::write(path, bytes)?;
    log::info!("saved {} ({}, {})", path.display(), encoding.name(), newline.as_str());
    Ok(())
}

fn restore_newlines(text: &str, newline: Newline) -> String {
    let eol = newline.sequence();
    let mut out = String::with_capacity(text.len() + text.len() / 32);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str(eol);
            }
            '\n' => out.push_str(eol),
            _ => out.push(ch),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
