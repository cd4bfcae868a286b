// ── Remote content fetcher ────────────────────────────────────────────────────
//
// "Import from web": one bounded HTTPS GET on a worker thread.
//
// Rules enforced here, in order:
//   • URL must parse and use https (rejected before any network call)
//   • redirects are answered with an error, never followed
//   • Content-Type must be text/* or mention application/json
//   • body size is capped twice: by Content-Length up front, then by a
//     running counter while reading
//
// The result comes back as exactly one `FetchEvent`.

use std::{
    io::Read,
    panic::{self, AssertUnwindSafe},
    thread,
    time::Duration,
};

use crossbeam::channel::{self, Receiver, Sender};
use encoding_rs::Encoding;
use reqwest::{blocking::Client, header::CONTENT_TYPE, redirect};
use url::Url;

use crate::{
    editor::SurfaceId,
    io::{detect, reader::NewlineNormalizer},
};

/// Largest body accepted, in bytes.
pub(crate) const MAX_BYTES: u64 = 1_000_000;

/// Whole-request timeout.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(15);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("only https:// URLs can be imported")]
    InsecureScheme,

    #[error("a download is already in progress")]
    Busy,

    #[error("redirects are not allowed (HTTP {0})")]
    Redirect(u16),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("unsupported content type: {0}")]
    ContentType(String),

    #[error("response is larger than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("network error: {0}")]
    Network(String),
}

fn network(e: impl std::fmt::Display) -> FetchError {
    FetchError::Network(e.to_string())
}

// ── Policy ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchPolicy {
    pub(crate) max_bytes: u64,
    pub(crate) timeout: Duration,
    /// Only ever `false` for loopback test servers.
    pub(crate) require_https: bool,
    /// Honour `HTTPS_PROXY` and friends.
    pub(crate) system_proxy: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_BYTES,
            timeout: TIMEOUT,
            require_https: true,
            system_proxy: true,
        }
    }
}

// ── Synchronous pieces ────────────────────────────────────────────────────────

/// Parse and vet `input` without touching the network.
pub(crate) fn validate_url(input: &str, policy: &FetchPolicy) -> Result<Url, FetchError> {
    let url = Url::parse(input.trim()).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "https" => {}
        "http" if !policy.require_https => {}
        _ => return Err(FetchError::InsecureScheme),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FetchError::InvalidUrl("missing host".to_owned()));
    }
    Ok(url)
}

/// Perform the GET on the calling thread and return normalised text.
pub(crate) fn fetch_blocking(url: &Url, policy: &FetchPolicy) -> Result<String, FetchError> {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(policy.timeout);
    if !policy.system_proxy {
        builder = builder.no_proxy();
    }
    let client = builder.build().map_err(network)?;

    let mut response = client.get(url.clone()).send().map_err(network)?;
    let status = response.status();
    if status.is_redirection() {
        return Err(FetchError::Redirect(status.as_u16()));
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    check_content_type(&content_type)?;

    if let Some(len) = response.content_length() {
        if len > policy.max_bytes {
            return Err(FetchError::TooLarge {
                limit: policy.max_bytes,
            });
        }
    }

    let body = read_limited(&mut response, policy.max_bytes)?;
    Ok(decode_body(&body, charset(&content_type)))
}

pub(crate) fn check_content_type(content_type: &str) -> Result<(), FetchError> {
    let lower = content_type.to_ascii_lowercase();
    let mime = lower.split(';').next().unwrap_or_default().trim();
    if mime.starts_with("text/") || lower.contains("application/json") {
        Ok(())
    } else if mime.is_empty() {
        Err(FetchError::ContentType("(none)".to_owned()))
    } else {
        Err(FetchError::ContentType(mime.to_owned()))
    }
}

/// The `charset=` parameter of a Content-Type value, if `encoding_rs` knows it.
fn charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Encoding::for_label(value.trim().trim_matches('"').as_bytes())
        } else {
            None
        }
    })
}

/// Read everything, failing as soon as more than `limit` bytes arrive.
pub(crate) fn read_limited(reader: &mut impl Read, limit: u64) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(body),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(network(e)),
        };
        if (body.len() + n) as u64 > limit {
            return Err(FetchError::TooLarge { limit });
        }
        body.extend_from_slice(&buf[..n]);
    }
}

/// Decode with the declared charset, else with the detector.  Never fails.
pub(crate) fn decode_body(body: &[u8], declared: Option<&'static Encoding>) -> String {
    let text = match declared {
        Some(encoding) => encoding.decode(body).0,
        None => {
            let (encoding, _, bom_len) = detect::detect_encoding(body);
            encoding.decode_without_bom_handling(&body[bom_len..]).0
        }
    };
    NewlineNormalizer::default().normalize(&text)
}

// ── Per-dialog controller ─────────────────────────────────────────────────────

/// The one message a fetch produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchEvent {
    Completed { target: SurfaceId, url: Url, text: String },
    Failed { target: SurfaceId, message: String },
}

/// State behind one "Import from web" dialog.  Allows one request at a time.
pub(crate) struct WebImport {
    policy: FetchPolicy,
    tx: Sender<FetchEvent>,
    rx: Receiver<FetchEvent>,
    in_flight: bool,
}

impl WebImport {
    pub(crate) fn new(policy: FetchPolicy) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            policy,
            tx,
            rx,
            in_flight: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// For `Select`-style waiting; receive through `try_recv` so the
    /// in-flight flag is cleared.
    pub(crate) fn events(&self) -> &Receiver<FetchEvent> {
        &self.rx
    }

    /// Validate `input` and start the download for `target`.
    ///
    /// Rejected synchronously (no thread, no request) when another fetch is
    /// outstanding or the URL is unacceptable.
    pub(crate) fn start(&mut self, target: SurfaceId, input: &str) -> Result<(), FetchError> {
        if self.in_flight {
            return Err(FetchError::Busy);
        }
        let url = validate_url(input, &self.policy)?;
        let policy = self.policy;
        let tx = self.tx.clone();

        thread::Builder::new()
            .name("web-import".to_owned())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| fetch_blocking(&url, &policy)));
                let event = match result {
                    Ok(Ok(text)) => FetchEvent::Completed { target, url, text },
                    Ok(Err(e)) => FetchEvent::Failed {
                        target,
                        message: e.to_string(),
                    },
                    Err(_) => FetchEvent::Failed {
                        target,
                        message: "Internal error: download worker panicked".to_owned(),
                    },
                };
                let _ = tx.send(event);
            })
            .map_err(network)?;

        self.in_flight = true;
        log::debug!("web import started");
        Ok(())
    }

    /// Non-blocking poll; clears the in-flight flag when the result arrives.
    pub(crate) fn try_recv(&mut self) -> Option<FetchEvent> {
        let event = self.rx.try_recv().ok()?;
        self.in_flight = false;
        Some(event)
    }

    #[cfg(test)]
    pub(crate) fn recv_timeout(&mut self, timeout: Duration) -> Option<FetchEvent> {
        let event = self.rx.recv_timeout(timeout).ok()?;
        self.in_flight = false;
        Some(event)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
