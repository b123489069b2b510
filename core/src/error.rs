//! Error types for the HTTP session.
//!
//! # Design
//! The session raises two failures of its own: `Timeout` when the transport
//! gives up waiting for a response, and `Http` when the server answers with a
//! status of 400 or above. Anything else the transport reports is passed
//! through inside `Transport` untouched, so callers can still match on the
//! underlying `ureq` or I/O error.
//!
//! Transport errors only become `Timeout` through [`is_timeout`], the single
//! place that knows which error shapes mean "the read timed out".

use std::io;

use thiserror::Error;

/// Message carried by every `SessionError::Timeout`.
pub const TIMEOUT_MESSAGE: &str = "Request timed out";

/// Substrings that mark a transport error message as a timeout. TLS layers
/// tend to report read timeouts as plain text rather than a typed error.
pub const TIMEOUT_SUBSTRINGS: &[&str] = &["timed out", "did not complete (read)"];

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors returned by `HttpSession::request` and its verb shortcuts.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The response did not arrive within the session timeout.
    #[error("{0}")]
    Timeout(String),

    /// The server returned a status of 400 or above. `message` holds the
    /// status followed by the response body.
    #[error("{status}: {message}")]
    Http { status: u16, message: String },

    /// A per-call header override asked to delete a header that the merged
    /// set does not contain.
    #[error("cannot delete header {0:?}: not present in session headers")]
    HeaderNotFound(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL parsed but names no host to connect to.
    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error(transparent)]
    Transport(TransportError),
}

impl SessionError {
    /// Wrap a transport failure, turning timeouts into `Timeout`.
    pub fn from_transport(err: TransportError) -> Self {
        if is_timeout(&err) {
            SessionError::Timeout(TIMEOUT_MESSAGE.to_string())
        } else {
            SessionError::Transport(err)
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures reported by a `Connector` or `Connection`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Ureq(#[from] ureq::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Decide whether a transport error means the request timed out.
///
/// Covers explicit timeout variants, the `TimedOut` and `WouldBlock` I/O
/// kinds (EAGAIN / EWOULDBLOCK), I/O errors wrapping a ureq timeout, and
/// messages containing one of [`TIMEOUT_SUBSTRINGS`].
pub fn is_timeout(err: &TransportError) -> bool {
    match err {
        TransportError::Ureq(err) => ureq_is_timeout(err),
        TransportError::Io(err) => io_is_timeout(err),
        TransportError::Other(msg) => mentions_timeout(msg),
    }
}

fn ureq_is_timeout(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Timeout(_) => true,
        ureq::Error::Io(err) => io_is_timeout(err),
        other => mentions_timeout(&other.to_string()),
    }
}

fn io_is_timeout(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    // Body readers surface transport errors as io::Error wrapping the original.
    if let Some(inner) = err.get_ref() {
        if let Some(err) = inner.downcast_ref::<ureq::Error>() {
            return ureq_is_timeout(err);
        }
        if let Some(err) = inner.downcast_ref::<io::Error>() {
            return io_is_timeout(err);
        }
    }
    mentions_timeout(&err.to_string())
}

fn mentions_timeout(msg: &str) -> bool {
    TIMEOUT_SUBSTRINGS.iter().any(|needle| msg.contains(needle))
}
