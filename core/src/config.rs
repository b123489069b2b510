//! Session configuration

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

/// Upper bound on how much of an error response body is read into
/// `SessionError::Http`.
pub const DEFAULT_MAX_ERROR_BODY: usize = 64 * 1024;

/// Settings an `HttpSession` is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Headers sent with every request unless overridden per call
    pub headers: BTreeMap<String, String>,

    /// Applied to each connection when it is opened
    pub timeout: Option<Duration>,

    /// Maximum number of body bytes embedded in an HTTP error message
    pub max_error_body: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            timeout: None,
            max_error_body: DEFAULT_MAX_ERROR_BODY,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add several default headers
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set timeout from seconds. Negative, NaN or out-of-range values are
    /// ignored and leave the current timeout in place.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => self.timeout = Some(timeout),
            Err(err) => warn!(secs, %err, "ignoring invalid session timeout"),
        }
        self
    }

    pub fn max_error_body(mut self, bytes: usize) -> Self {
        self.max_error_body = bytes;
        self
    }
}
