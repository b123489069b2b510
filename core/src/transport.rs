//! Transport seam between `HttpSession` and the network.
//!
//! # Design
//! The session never speaks HTTP itself. It asks a `Connector` to open one
//! `Connection` per `ConnectionKey` and reuses it for every later request to
//! that destination. `UreqConnector` is the production implementation; tests
//! substitute a recording fake.
//!
//! A `UreqConnection` is a dedicated `ureq::Agent` bound to one key. The
//! agent keeps a single idle keep-alive socket, so consecutive requests
//! through the same connection go over the same TCP (or TLS) stream.

use std::fmt;
use std::time::Duration;

use tracing::debug;
use ureq::Agent;
use url::Url;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Pool key: URL scheme plus network location (`host` or `host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub scheme: String,
    pub netloc: String,
}

impl ConnectionKey {
    pub fn new(scheme: impl Into<String>, netloc: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            netloc: netloc.into(),
        }
    }

    /// Key for `url`, or `None` when the URL has no host.
    ///
    /// `url` normalizes the host to lowercase and drops default ports, so
    /// `http://Example.com:80` and `http://example.com` share a key. The port
    /// is part of the netloc only when the URL spells out a non-default one.
    /// Userinfo is never part of the key.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let netloc = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Some(Self::new(url.scheme(), netloc))
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.netloc)
    }
}

/// An open, reusable channel to one scheme+netloc.
pub trait Connection {
    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Opens connections for the session pool.
pub trait Connector {
    type Connection: Connection;

    /// Open a connection for `key`. `timeout` bounds every later exchange on it.
    fn open(
        &self,
        key: &ConnectionKey,
        timeout: Option<Duration>,
    ) -> Result<Self::Connection, TransportError>;
}

/// Default connector backed by `ureq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UreqConnector;

impl Connector for UreqConnector {
    type Connection = UreqConnection;

    fn open(
        &self,
        key: &ConnectionKey,
        timeout: Option<Duration>,
    ) -> Result<UreqConnection, TransportError> {
        // Status handling and redirects belong to the session, not the agent.
        // The timeout bounds each phase up to the response head; body reads
        // are not capped as a whole.
        let agent = Agent::config_builder()
            .https_only(key.is_secure())
            .timeout_connect(timeout)
            .timeout_send_request(timeout)
            .timeout_recv_response(timeout)
            .http_status_as_error(false)
            .max_redirects(0)
            .max_idle_connections_per_host(1)
            .build()
            .new_agent();
        debug!(%key, secure = key.is_secure(), ?timeout, "opened ureq connection");
        Ok(UreqConnection {
            key: key.clone(),
            agent,
        })
    }
}

/// A `ureq::Agent` dedicated to one `ConnectionKey`.
#[derive(Debug)]
pub struct UreqConnection {
    key: ConnectionKey,
    agent: Agent,
}

impl UreqConnection {
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }
}

impl Connection for UreqConnection {
    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match request.body {
            Some(body) => {
                let req = builder
                    .body(body)
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                self.agent.run(req)?
            }
            None => {
                let req = builder
                    .body(())
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                self.agent.run(req)?
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.into_body().into_reader();
        Ok(HttpResponse::new(status, headers, body))
    }
}
