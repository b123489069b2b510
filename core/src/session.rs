//! HTTP session with persistent default headers and per-destination
//! connection reuse.
//!
//! # Design
//! `HttpSession` owns three pieces of state: the default headers, a pool of
//! open connections keyed by `ConnectionKey`, and the timeout handed to each
//! connection when it is opened. Every verb goes through `request`, which
//!
//! 1. encodes the body (form fields become `x-www-form-urlencoded`),
//! 2. finds or lazily opens the connection for the URL's scheme+netloc,
//! 3. merges per-call header overrides over the defaults,
//! 4. sends the request and classifies the outcome.
//!
//! Timeouts surface as `SessionError::Timeout` and statuses of 400 or above
//! as `SessionError::Http`. Other transport errors pass through unchanged.
//!
//! The session takes `&mut self` for every request and does no locking of
//! its own. Share it across threads by wrapping it in a `Mutex`.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult, TransportError};
use crate::http::{
    HeaderOverrides, HttpMethod, HttpRequest, HttpResponse, RequestData, CONTENT_TYPE,
    FORM_CONTENT_TYPE,
};
use crate::transport::{Connection, ConnectionKey, Connector, UreqConnector};

/// Keeps headers persistent across requests and reuses one connection per
/// scheme+netloc.
pub struct HttpSession<C: Connector = UreqConnector> {
    headers: BTreeMap<String, String>,
    connections: HashMap<ConnectionKey, C::Connection>,
    timeout: Option<Duration>,
    max_error_body: usize,
    connector: C,
}

impl HttpSession {
    /// Session with no default headers and no timeout.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::with_connector(config, UreqConnector)
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> HttpSession<C> {
    /// Session that opens its connections through `connector`.
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        Self {
            headers: config.headers,
            connections: HashMap::new(),
            timeout: config.timeout,
            max_error_body: config.max_error_body,
            connector,
        }
    }

    /// Insert or overwrite a default header for all later requests.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of open pooled connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether a pooled connection exists for `url`'s scheme+netloc.
    pub fn has_connection(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|url| ConnectionKey::from_url(&url))
            .is_some_and(|key| self.connections.contains_key(&key))
    }

    /// Send a request and return the response for statuses below 400.
    ///
    /// `headers` overrides the defaults for this call only. An override with
    /// a `None` value deletes that header and fails with `HeaderNotFound` if
    /// the header is absent.
    ///
    /// Header names are matched exactly, so `Content-Type` and `content-type`
    /// are distinct entries and both are sent. Merged headers go out sorted
    /// by name.
    pub fn request(
        &mut self,
        method: impl Into<HttpMethod>,
        url: &str,
        data: Option<RequestData>,
        headers: Option<HeaderOverrides>,
    ) -> SessionResult<HttpResponse> {
        let method = method.into();
        let body = data.map(RequestData::into_bytes);

        let parsed = Url::parse(url)?;
        let key = ConnectionKey::from_url(&parsed)
            .ok_or_else(|| SessionError::MissingHost(url.to_string()))?;

        let connection =
            pooled_connection(&mut self.connections, &self.connector, self.timeout, &key)?;

        let mut merged = merge_headers(&self.headers, headers.as_ref())?;
        if body.as_ref().is_some_and(|b| !b.is_empty())
            && !merged.keys().any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE))
        {
            merged.insert(CONTENT_TYPE.to_string(), FORM_CONTENT_TYPE.to_string());
        }

        debug!(
            %method,
            %url,
            connection = %key,
            body_len = body.as_ref().map_or(0, Vec::len),
            "sending request"
        );
        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers: merged.into_iter().collect(),
            body,
        };

        let mut response = connection
            .send(request)
            .map_err(|err| classify(err, &key))?;

        let status = response.status;
        debug!(status, connection = %key, "received response");
        if status > 399 {
            let body = read_error_body(&mut response, self.max_error_body)
                .map_err(|err| classify(err, &key))?;
            return Err(SessionError::Http {
                status,
                message: format!("{status} {body}"),
            });
        }
        Ok(response)
    }

    pub fn get(
        &mut self,
        url: &str,
        data: Option<RequestData>,
        headers: Option<HeaderOverrides>,
    ) -> SessionResult<HttpResponse> {
        self.request(HttpMethod::Get, url, data, headers)
    }

    pub fn delete(
        &mut self,
        url: &str,
        data: Option<RequestData>,
        headers: Option<HeaderOverrides>,
    ) -> SessionResult<HttpResponse> {
        self.request(HttpMethod::Delete, url, data, headers)
    }

    pub fn post(
        &mut self,
        url: &str,
        data: Option<RequestData>,
        headers: Option<HeaderOverrides>,
    ) -> SessionResult<HttpResponse> {
        self.request(HttpMethod::Post, url, data, Some(headers.unwrap_or_default()))
    }

    pub fn put(
        &mut self,
        url: &str,
        data: Option<RequestData>,
        headers: Option<HeaderOverrides>,
    ) -> SessionResult<HttpResponse> {
        self.request(HttpMethod::Put, url, data, Some(headers.unwrap_or_default()))
    }
}

impl<C: Connector> fmt::Debug for HttpSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values may carry credentials.
        f.debug_struct("HttpSession")
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Return the pooled connection for `key`, opening it on first use.
fn pooled_connection<'a, C: Connector>(
    connections: &'a mut HashMap<ConnectionKey, C::Connection>,
    connector: &C,
    timeout: Option<Duration>,
    key: &ConnectionKey,
) -> SessionResult<&'a mut C::Connection> {
    match connections.entry(key.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            debug!(connection = %key, ?timeout, "opening connection");
            let connection = connector
                .open(key, timeout)
                .map_err(SessionError::from_transport)?;
            Ok(entry.insert(connection))
        }
    }
}

/// Copy the defaults and apply per-call overrides in order.
fn merge_headers(
    defaults: &BTreeMap<String, String>,
    overrides: Option<&HeaderOverrides>,
) -> SessionResult<BTreeMap<String, String>> {
    let mut merged = defaults.clone();
    for (name, value) in overrides.into_iter().flat_map(|o| o.iter()) {
        match value {
            Some(value) => {
                merged.insert(name.to_string(), value.to_string());
            }
            // Deleting an absent header is an error, not a no-op.
            None => {
                merged
                    .remove(name)
                    .ok_or_else(|| SessionError::HeaderNotFound(name.to_string()))?;
            }
        }
    }
    Ok(merged)
}

fn classify(err: TransportError, key: &ConnectionKey) -> SessionError {
    let err = SessionError::from_transport(err);
    if err.is_timeout() {
        warn!(connection = %key, "request timed out");
    }
    err
}

/// Read up to `limit` bytes of an error response as lossy UTF-8.
fn read_error_body(response: &mut HttpResponse, limit: usize) -> Result<String, TransportError> {
    let mut buf = Vec::new();
    response.take(limit as u64).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<(ConnectionKey, HttpRequest)>>>;

    /// Records every opened connection and sent request, and answers each
    /// request with a canned status and body, or a canned failure.
    #[derive(Clone)]
    struct FakeConnector {
        opened: Rc<RefCell<Vec<(ConnectionKey, Option<Duration>)>>>,
        sent: Log,
        status: u16,
        body: &'static str,
        failure: Option<fn() -> TransportError>,
    }

    impl FakeConnector {
        fn replying(status: u16, body: &'static str) -> Self {
            Self {
                opened: Rc::default(),
                sent: Rc::default(),
                status,
                body,
                failure: None,
            }
        }

        fn failing(failure: fn() -> TransportError) -> Self {
            Self {
                failure: Some(failure),
                ..Self::replying(200, "")
            }
        }

        fn last_request(&self) -> HttpRequest {
            self.sent.borrow().last().unwrap().1.clone()
        }
    }

    struct FakeConnection {
        key: ConnectionKey,
        connector: FakeConnector,
    }

    impl Connection for FakeConnection {
        fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.connector
                .sent
                .borrow_mut()
                .push((self.key.clone(), request));
            if let Some(failure) = self.connector.failure {
                return Err(failure());
            }
            Ok(HttpResponse::from_bytes(
                self.connector.status,
                Vec::new(),
                self.connector.body,
            ))
        }
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        fn open(
            &self,
            key: &ConnectionKey,
            timeout: Option<Duration>,
        ) -> Result<FakeConnection, TransportError> {
            self.opened.borrow_mut().push((key.clone(), timeout));
            Ok(FakeConnection {
                key: key.clone(),
                connector: self.clone(),
            })
        }
    }

    fn session(connector: &FakeConnector) -> HttpSession<FakeConnector> {
        HttpSession::with_connector(SessionConfig::default(), connector.clone())
    }

    #[test]
    fn default_header_is_sent_unchanged() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("X-Api-Key", "abc");

        s.get("http://example.com/a", None, None).unwrap();

        assert_eq!(fake.last_request().header("X-Api-Key"), Some("abc"));
    }

    #[test]
    fn add_header_overwrites_previous_value() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("Accept", "text/plain");
        s.add_header("Accept", "application/json");

        s.get("http://example.com/", None, None).unwrap();

        assert_eq!(fake.last_request().header("Accept"), Some("application/json"));
        assert_eq!(s.headers().len(), 1);
    }

    #[test]
    fn per_call_header_wins_for_that_call_only() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("Accept", "text/plain");

        let overrides = HeaderOverrides::new().set("Accept", "application/json");
        s.get("http://example.com/", None, Some(overrides)).unwrap();
        assert_eq!(fake.last_request().header("Accept"), Some("application/json"));
        assert_eq!(s.headers()["Accept"], "text/plain");

        s.get("http://example.com/", None, None).unwrap();
        assert_eq!(fake.last_request().header("Accept"), Some("text/plain"));
    }

    #[test]
    fn none_override_deletes_header_for_one_call() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("X-Trace", "1");

        let overrides = HeaderOverrides::new().remove("X-Trace");
        s.get("http://example.com/", None, Some(overrides)).unwrap();
        assert_eq!(fake.last_request().header("X-Trace"), None);
        assert_eq!(s.headers()["X-Trace"], "1");
    }

    #[test]
    fn deleting_absent_header_fails() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        let overrides = HeaderOverrides::new().remove("X-Missing");
        let err = s
            .get("http://example.com/", None, Some(overrides))
            .unwrap_err();
        assert!(matches!(err, SessionError::HeaderNotFound(ref name) if name == "X-Missing"));
        assert!(fake.sent.borrow().is_empty());
    }

    #[test]
    fn same_destination_reuses_one_connection() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        s.get("https://api.example.com/a", None, None).unwrap();
        s.get("https://api.example.com/b?page=2", None, None).unwrap();
        assert_eq!(fake.opened.borrow().len(), 1);
        assert_eq!(s.connection_count(), 1);

        s.get("https://other.example.com/a", None, None).unwrap();
        assert_eq!(fake.opened.borrow().len(), 2);
        assert!(s.has_connection("https://other.example.com/zzz"));

        let sent = fake.sent.borrow();
        assert_eq!(sent[0].0, sent[1].0);
        assert_ne!(sent[1].0, sent[2].0);
    }

    #[test]
    fn scheme_and_port_are_separate_destinations() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        s.get("http://example.com/", None, None).unwrap();
        s.get("https://example.com/", None, None).unwrap();
        s.get("http://example.com:8080/", None, None).unwrap();

        assert_eq!(s.connection_count(), 3);
        assert!(!s.has_connection("http://example.com:9090/"));
    }

    #[test]
    fn form_data_is_encoded_with_content_type() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        let data = RequestData::form([("a", "1"), ("b", "2")]);
        s.post("http://example.com/form", Some(data), None).unwrap();

        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.as_deref(), Some(&b"a=1&b=2"[..]));
        assert_eq!(req.header("Content-Type"), Some(FORM_CONTENT_TYPE));
    }

    #[test]
    fn caller_content_type_is_kept() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        let overrides = HeaderOverrides::new().set("content-type", "application/json");
        s.put("http://example.com/doc", Some(r#"{"a":1}"#.into()), Some(overrides))
            .unwrap();

        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn default_content_type_is_respected() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("Content-Type", "text/csv");

        s.post("http://example.com/", Some("a,b".into()), None).unwrap();

        assert_eq!(fake.last_request().header("Content-Type"), Some("text/csv"));
    }

    #[test]
    fn empty_body_gets_no_content_type() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        s.post("http://example.com/", Some(RequestData::Text(String::new())), None)
            .unwrap();

        let req = fake.last_request();
        assert_eq!(req.body.as_deref(), Some(&b""[..]));
        assert_eq!(req.header("Content-Type"), None);
    }

    #[test]
    fn error_status_becomes_http_error() {
        let fake = FakeConnector::replying(404, "not found");
        let mut s = session(&fake);

        let err = s.get("http://example.com/missing", None, None).unwrap_err();
        match &err {
            SessionError::Http { status, message } => {
                assert_eq!(*status, 404);
                assert!(message.contains("not found"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        let text = err.to_string();
        assert!(text.contains("404") && text.contains("not found"));
    }

    #[test]
    fn status_399_is_returned() {
        let fake = FakeConnector::replying(399, "");
        let mut s = session(&fake);
        assert_eq!(s.get("http://example.com/", None, None).unwrap().status, 399);
    }

    #[test]
    fn error_body_is_capped() {
        let fake = FakeConnector::replying(500, "0123456789");
        let config = SessionConfig::new().max_error_body(4);
        let mut s = HttpSession::with_connector(config, fake.clone());

        let err = s.delete("http://example.com/x", None, None).unwrap_err();
        assert_eq!(err.to_string(), "500: 500 0123");
    }

    #[test]
    fn success_returns_readable_response() {
        let fake = FakeConnector::replying(200, "hello");
        let mut s = session(&fake);

        let mut resp = s.get("http://example.com/", None, None).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text().unwrap(), "hello");
    }

    #[test]
    fn transport_timeout_becomes_timeout() {
        let fake = FakeConnector::failing(|| {
            TransportError::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
        });
        let mut s = session(&fake);

        let err = s.get("http://example.com/slow", None, None).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn tls_read_message_becomes_timeout() {
        let fake = FakeConnector::failing(|| {
            TransportError::Other("The read operation did not complete (read)".to_string())
        });
        let mut s = session(&fake);

        assert!(s.get("https://example.com/", None, None).unwrap_err().is_timeout());
    }

    #[test]
    fn other_transport_errors_pass_through() {
        let fake = FakeConnector::failing(|| {
            TransportError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))
        });
        let mut s = session(&fake);

        let err = s.get("http://example.com/", None, None).unwrap_err();
        match err {
            SessionError::Transport(TransportError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused)
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_url_is_rejected_before_connecting() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        let err = s.get("not a url", None, None).unwrap_err();
        assert!(matches!(err, SessionError::InvalidUrl(_)));
        assert!(fake.opened.borrow().is_empty());
    }

    #[test]
    fn custom_method_is_sent_verbatim() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        s.request("PURGE", "http://cache.local/item", None, None).unwrap();

        assert_eq!(fake.last_request().method.as_str(), "PURGE");
    }

    #[test]
    fn authorized_get_scenario() {
        let fake = FakeConnector::replying(200, "[]");
        let config = SessionConfig::new()
            .timeout(Duration::from_secs(10))
            .header("Authorization", "X");
        let mut s = HttpSession::with_connector(config, fake.clone());

        s.get("https://api.example.com/items", None, None).unwrap();

        let opened = fake.opened.borrow();
        assert_eq!(
            opened[0],
            (
                ConnectionKey::new("https", "api.example.com"),
                Some(Duration::from_secs(10))
            )
        );
        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://api.example.com/items");
        assert_eq!(req.header("Authorization"), Some("X"));
        assert!(req.body.is_none());
    }

    #[test]
    fn delete_forwards_body() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        s.delete("http://example.com/items", Some("x=1".into()), None)
            .unwrap();

        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.body.as_deref(), Some(&b"x=1"[..]));
        assert_eq!(req.header("Content-Type"), Some(FORM_CONTENT_TYPE));
    }

    #[test]
    fn get_forwards_form_data() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);

        let data = RequestData::form([("q", "rust")]);
        s.get("http://example.com/search", Some(data), None).unwrap();

        let req = fake.last_request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.body.as_deref(), Some(&b"q=rust"[..]));
    }

    #[test]
    fn header_names_differing_in_case_are_both_sent() {
        let fake = FakeConnector::replying(200, "ok");
        let mut s = session(&fake);
        s.add_header("Content-Type", "text/csv");

        let overrides = HeaderOverrides::new().set("content-type", "application/json");
        s.post("http://example.com/", Some("a,b".into()), Some(overrides))
            .unwrap();

        let req = fake.last_request();
        let names: Vec<_> = req.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["Content-Type", "content-type"]);
    }

    #[test]
    fn sessions_do_not_share_headers() {
        let fake = FakeConnector::replying(200, "ok");
        let mut a = session(&fake);
        let b = session(&fake);
        a.add_header("X-Only-A", "1");
        assert!(b.headers().is_empty());
    }
}
