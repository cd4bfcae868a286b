// ── Central error type ────────────────────────────────────────────────────────
//
// All fallible control-thread operations in Construct return
// `error::Result<T>`.  Worker threads never return these across the thread
// boundary; they flatten failures into a message payload instead (see
// `io::session` and `fetch`).

use std::path::PathBuf;

use crate::fetch::FetchError;

/// Every error that Construct can surface to the user.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConstructError {
    /// A standard I/O error (file open, read, write, …).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer holds characters the target encoding cannot represent.
    /// The front end should offer `io::save::ALTERNATE_ENCODINGS`.
    #[error("the document contains characters that cannot be saved as {encoding}")]
    Unencodable { encoding: &'static str },

    /// An encoding label that `encoding_rs` does not recognise.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Save was requested for an untitled buffer; the caller must Save As.
    #[error("the document has no file path")]
    NoPath,

    /// The tab is still streaming its file in; saving now would write a
    /// partial buffer over the file being read.
    #[error("the file is still loading; try again when it has finished")]
    LoadInProgress,

    /// A tab id that no longer refers to an open tab.
    #[error("no such tab")]
    NoSuchSurface,

    #[error("path is not a file: {}", .0.display())]
    NotAFile(PathBuf),

    /// The settings file could not be encoded or decoded.
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("import from web failed: {0}")]
    Fetch(#[from] FetchError),

    /// A version-control command ran and failed.
    #[error("git {command} failed: {message}")]
    Vcs { command: String, message: String },

    #[error("no repository is currently open")]
    NoRepository,

    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("plugin {} failed: {message}", .path.display())]
    Plugin { path: PathBuf, message: String },

    /// A language tag that no `Language` answers to.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// A file or directory name entered by the user is empty or contains a
    /// path separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Convenience alias used throughout the crate.
pub(crate) type Result<T> = std::result::Result<T, ConstructError>;

// ── Tests ─────────────────────────────────────────────────────────────────────
