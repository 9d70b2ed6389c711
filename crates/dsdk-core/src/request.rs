// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`RequestInfo`]: the framework-agnostic view of an incoming HTTP request
//! that the communication handler (C7) consumes (spec §3, §4.7).

use dsdk_error::DsdkError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The HTTP verbs the server uses against the comm handler (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Introspection.
    Get,
    /// Sync to the server's register endpoint.
    Put,
    /// Call dispatch.
    Post,
    /// Any other verb; rejected by the handler.
    Other,
}

impl HttpMethod {
    /// Parse a verb from its ASCII-uppercase wire name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "PUT" => Self::Put,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

/// A lazily-readable request body, so signature verification can consume
/// the raw bytes while the comm handler separately parses JSON from them.
pub trait RequestBody: Send + Sync {
    /// Read the full raw body bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read (e.g. stream already consumed).
    fn bytes(&self) -> Result<Vec<u8>, DsdkError>;
}

/// A body already fully buffered in memory — the common case for adapters
/// fronted by a framework that already read the request.
#[derive(Debug, Clone)]
pub struct InMemoryBody(pub Vec<u8>);

impl RequestBody for InMemoryBody {
    fn bytes(&self) -> Result<Vec<u8>, DsdkError> {
        Ok(self.0.clone())
    }
}

/// Framework-agnostic incoming request, as exposed to the comm handler by
/// an adapter (spec §4.7 "Adapter interface").
#[derive(Clone)]
pub struct RequestInfo {
    /// Full request URL, including query string.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Request headers, keyed by lowercase header name.
    pub headers: BTreeMap<String, String>,
    /// Lazy body accessor.
    pub body: Arc<dyn RequestBody>,
}

impl RequestInfo {
    /// Construct a request from fully-buffered parts — the common path for
    /// tests and simple adapters.
    #[must_use]
    pub fn buffered(
        url: impl Into<String>,
        method: HttpMethod,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: url.into(),
            method,
            headers,
            body: Arc::new(InMemoryBody(body)),
        }
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers.get(&lower).map(String::as_str)
    }
}
