// ── Encoding / newline detection ──────────────────────────────────────────────
//
// Inspects a bounded prefix of a file and decides how to decode it.  Runs on
// load worker threads and on the web-import worker; no shared state.

use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};

/// Bytes read from the head of a file for detection.  Detection never sees
/// more than this; the full decode is a separate pass.
pub(crate) const SAMPLE_LIMIT: usize = 64 * 1024;

/// Granularity at which the sample is fed to the charset detector.
const FEED_CHUNK: usize = 1024;

// ── Newline ───────────────────────────────────────────────────────────────────

/// The end-of-line convention recorded for a document and used on save.
///
/// The in-memory text always uses `\n`; this value is what `\n` becomes on
/// disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Newline {
    /// Windows-style `\r\n`.  Also the fallback for ties and newline-free
    /// samples.
    #[default]
    Crlf,
    /// Unix-style `\n`.
    Lf,
    /// Old Mac-style `\r`.
    Cr,
}

impl Newline {
    /// Short display string shown in the status line.
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Crlf => "CRLF",
            Self::Lf => "LF",
            Self::Cr => "CR",
        }
    }

    /// The byte sequence written to disk for each line break.
    pub(crate) fn sequence(self) -> &'static str {
        match self {
            Self::Crlf => "\r\n",
            Self::Lf => "\n",
            Self::Cr => "\r",
        }
    }
}

// ── DetectionResult ───────────────────────────────────────────────────────────

/// Outcome of sniffing one file.  Produced once per load and never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DetectionResult {
    pub(crate) encoding: &'static Encoding,
    /// 1.0 for BOM-marked or pure-ASCII input, lower for statistical guesses.
    pub(crate) confidence: f32,
    pub(crate) newline: Newline,
    /// Length of the byte-order mark at the start of the file, 0 if none.
    pub(crate) bom_len: usize,
}

impl DetectionResult {
    /// Canonical encoding name, e.g. `"UTF-8"` or `"windows-1252"`.
    pub(crate) fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Read at most `sample_limit` bytes from the head of `path` and detect.
///
/// Open and read failures are returned as-is; nothing is guessed for a file
/// that cannot be read.
pub(crate) fn detect_path(path: &Path, sample_limit: usize) -> io::Result<DetectionResult> {
    let file = File::open(path)?;
    let sample = read_sample(file, sample_limit)?;
    Ok(detect(&sample))
}

/// Detect encoding and newline style from an in-memory byte sample.
pub(crate) fn detect(sample: &[u8]) -> DetectionResult {
    let (encoding, confidence, bom_len) = detect_encoding(sample);

    // Count line breaks in decoded text so that UTF-16 `\r\0\n\0` pairs are
    // seen as CRLF rather than as separate CR and LF bytes.  A multi-byte
    // sequence cut at the sample boundary decodes to U+FFFD, which is harmless
    // here.
    let (text, _) = encoding.decode_without_bom_handling(&sample[bom_len..]);
    let newline = detect_newline(text.as_bytes());

    DetectionResult {
        encoding,
        confidence,
        newline,
        bom_len,
    }
}

/// Pick the encoding for a byte sample.
///
/// Returns `(encoding, confidence, bom_len)`.  Order of precedence:
/// 1. byte-order mark (UTF-8, UTF-16 LE/BE)
/// 2. pure ASCII → UTF-8
/// 3. sample is valid UTF-8 (a sequence truncated at the end is allowed)
/// 4. statistical guess from `chardetng`
pub(crate) fn detect_encoding(sample: &[u8]) -> (&'static Encoding, f32, usize) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(sample) {
        return (encoding, 1.0, bom_len);
    }
    if sample.is_empty() {
        return (UTF_8, 1.0, 0);
    }

    let mut detector = EncodingDetector::new();
    let mut non_ascii = false;
    let mut chunks = sample.chunks(FEED_CHUNK).peekable();
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        non_ascii = detector.feed(chunk, last);
    }

    if !non_ascii {
        return (UTF_8, 1.0, 0);
    }
    if is_utf8_prefix(sample) {
        return (UTF_8, 0.99, 0);
    }

    let guess = detector.guess(None, true);
    let confidence = if guess == UTF_8 { 0.5 } else { 0.75 };
    (guess, confidence, 0)
}

/// Determine the dominant line-ending style in ASCII-compatible bytes.
///
/// `\r\n` pairs are counted first; remaining bare `\r` and `\n` are counted
/// separately.  The style with the strictly highest count wins; ties and
/// newline-free input fall back to CRLF.
pub(crate) fn detect_newline(bytes: &[u8]) -> Newline {
    let mut crlf = 0usize;
    let mut lf = 0usize;
    let mut cr = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 2;
            }
            b'\r' => {
                cr += 1;
                i += 1;
            }
            b'\n' => {
                lf += 1;
                i += 1;
            }
            _ => i += 1,
        }
    }

    if lf > crlf && lf > cr {
        Newline::Lf
    } else if cr > crlf && cr > lf {
        Newline::Cr
    } else {
        Newline::Crlf
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_sample(reader: impl Read, limit: usize) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(limit.min(SAMPLE_LIMIT));
    reader.take(limit as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

/// `true` if `bytes` is valid UTF-8, tolerating an incomplete final sequence.
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
