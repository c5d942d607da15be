use super::FilterAction;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::time::Instant;

/// Response a halting filter asks the serving layer to send.
#[derive(Debug, Clone)]
pub struct FilterResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FilterResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Per-request state passed through every filter of a chain.
///
/// `headers` is the request header set that will be forwarded upstream, so
/// filters edit it in place. `response_headers` are added to whatever response
/// reaches the client.
#[derive(Debug)]
pub struct FilterContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: Option<IpAddr>,
    pub response_headers: HeaderMap,
    pub response: Option<FilterResponse>,
    pub annotations: HashMap<String, String>,
    received_at: Instant,
    deadline: Option<Instant>,
}

impl FilterContext {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            client_addr: None,
            response_headers: HeaderMap::new(),
            response: None,
            annotations: HashMap::new(),
            received_at: Instant::now(),
            deadline: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    /// Records the response to send and returns [`FilterAction::Halt`].
    pub fn reject(&mut self, status: StatusCode, message: &str) -> FilterAction {
        self.response = Some(FilterResponse::new(status).with_body(message.to_string()));
        FilterAction::Halt
    }

    /// Like [`reject`](Self::reject) with a caller-built response.
    pub fn respond(&mut self, response: FilterResponse) -> FilterAction {
        self.response = Some(response);
        FilterAction::Halt
    }
}
