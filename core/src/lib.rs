//! Blocking HTTP session with persistent headers and connection reuse.
//!
//! # Overview
//! `HttpSession` keeps a set of default headers and one open connection per
//! scheme+netloc. Every request goes through `HttpSession::request`, with
//! `get`, `post`, `put` and `delete` as shortcuts. Timeouts and error
//! statuses come back as typed `SessionError` values.
//!
//! # Design
//! - HTTP itself is delegated to a `Connector`; the default is `ureq`.
//! - Per-call `HeaderOverrides` set or delete headers for one request only.
//! - Form data is url-encoded and gets a form `Content-Type` unless one is set.
//! - No retries, redirects, cookies or authentication handling.
//!
//! ```no_run
//! use http_session::{HttpSession, RequestData, SessionConfig};
//!
//! let mut session = HttpSession::with_config(
//!     SessionConfig::new().header("Authorization", "Bearer token").timeout_secs(10.0),
//! );
//! let mut resp = session.get("https://api.example.com/items", None, None)?;
//! println!("{}", resp.text()?);
//!
//! session.post(
//!     "https://api.example.com/items",
//!     Some(RequestData::form([("name", "widget")])),
//!     None,
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::{is_timeout, SessionError, SessionResult, TransportError};
pub use http::{HeaderOverrides, HttpMethod, HttpRequest, HttpResponse, RequestData};
pub use session::HttpSession;
pub use transport::{Connection, ConnectionKey, Connector, UreqConnection, UreqConnector};
