// ── Streaming file reader ─────────────────────────────────────────────────────
//
// Runs on a load worker thread.  Detects the encoding from a small prefix,
// then decodes the file in fixed byte windows and hands each decoded window
// to a caller-supplied sink.  Never touches editor state; the sink is the only
// way out.

use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use super::detect::{self, DetectionResult, SAMPLE_LIMIT};

/// Bytes decoded per `Chunk` event.
pub(crate) const CHUNK_SIZE: usize = 1024 * 1024;

// ── Events ────────────────────────────────────────────────────────────────────

/// One notification from a running read, in emission order:
/// `Started`, then zero or more `Chunk { is_last: false }`, then exactly one
/// `Chunk { is_last: true }`.  `Failed` replaces whatever remained.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReadEvent {
    /// Detection finished; no content has been transferred yet.
    Started(DetectionResult),
    /// Decoded text with line breaks already normalised to `\n`.  The final
    /// chunk is empty and carries `is_last = true`.
    Chunk { text: String, is_last: bool },
    /// Unrecoverable I/O failure.  Terminal.
    Failed(String),
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReaderOptions {
    /// Size of the raw byte window behind each non-final chunk.
    pub(crate) chunk_size: usize,
    /// Prefix length handed to the detector.
    pub(crate) sample_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            sample_size: SAMPLE_LIMIT,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Read `path` to the end, reporting progress through `emit`.
///
/// Undecodable bytes become U+FFFD; only I/O errors end the stream early, and
/// they do so with a single `ReadEvent::Failed`.  A failure before `Started`
/// means nothing was emitted at all.
pub(crate) fn stream_file(path: &Path, options: ReaderOptions, emit: &mut dyn FnMut(ReadEvent)) {
    if let Err(e) = try_stream(path, options, emit) {
        emit(ReadEvent::Failed(format!("Error reading {}: {e}", path.display())));
    }
}

fn try_stream(path: &Path, options: ReaderOptions, emit: &mut dyn FnMut(ReadEvent)) -> io::Result<()> {
    let detection = detect::detect_path(path, options.sample_size)?;
    let mut file = File::open(path)?;
    emit(ReadEvent::Started(detection));

    let mut decoder = detection.encoding.new_decoder_without_bom_handling();
    let mut newlines = NewlineNormalizer::default();
    let mut window = vec![0u8; options.chunk_size.max(1)];
    let mut skip = detection.bom_len;

    loop {
        let n = read_window(&mut file, &mut window)?;
        if n == 0 {
            break;
        }
        let bom = skip.min(n);
        skip -= bom;
        let bytes = &window[bom..n];

        let mut text = String::with_capacity(
            decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3),
        );
        // `String` capacity was sized by the decoder, so this always consumes
        // the whole window.
        let _ = decoder.decode_to_string(bytes, &mut text, false);
        emit(ReadEvent::Chunk {
            text: newlines.normalize(&text),
            is_last: false,
        });
    }

    // Flush an incomplete trailing sequence (it decodes to U+FFFD).
    let mut tail = String::with_capacity(16);
    let _ = decoder.decode_to_string(&[], &mut tail, true);
    if !tail.is_empty() {
        emit(ReadEvent::Chunk {
            text: newlines.normalize(&tail),
            is_last: false,
        });
    }

    emit(ReadEvent::Chunk {
        text: String::new(),
        is_last: true,
    });
    Ok(())
}

/// Fill `buf` completely unless end of file comes first.  Returns the number
/// of bytes read; 0 means end of file.
fn read_window(file: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ── Newline normalisation ─────────────────────────────────────────────────────

/// Rewrites `\r\n` and bare `\r` to `\n` across chunk boundaries.
///
/// A `\r` at the end of one chunk is emitted as `\n` immediately; a `\n`
/// opening the next chunk is then swallowed.
#[derive(Debug, Default)]
pub(crate) struct NewlineNormalizer {
    after_cr: bool,
}

impl NewlineNormalizer {
    pub(crate) fn normalize(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                '\r' => {
                    out.push('\n');
                    self.after_cr = true;
                }
                '\n' => {
                    if !self.after_cr {
                        out.push('\n');
                    }
                    self.after_cr = false;
                }
                _ => {
                    out.push(ch);
                    self.after_cr = false;
                }
            }
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
