//! HTTP port for talking to remote trackers.

use serde::{Deserialize, Serialize};

/// Request method. Trackers are only ever read, so two verbs suffice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST` with a urlencoded form body.
    Post,
}

/// A single outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Extra headers, sent in order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Form fields for `POST`; ignored for `GET`.
    #[serde(default)]
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    /// Builds a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    /// Builds a `POST` request carrying a urlencoded form.
    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            form,
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The answer to one request. Redirects are returned as-is, not followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers with lowercased names. Repeated headers such as
    /// `set-cookie` appear once per occurrence.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Response body decoded as text.
    #[serde(default)]
    pub body: String,
}

impl HttpResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A response with the given status and no body.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header; the name is lowercased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// First value of the named header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of the named header, in order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` for the redirect statuses a browser would follow.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Transport-level failure: no HTTP response was obtained at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HttpError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// URL being fetched.
        url: String,
    },
    /// The connection could not be made or broke off.
    #[error("request to {url} failed: {reason}")]
    Connect {
        /// URL being fetched.
        url: String,
        /// Transport error text.
        reason: String,
    },
}

/// Sends single HTTP requests.
///
/// Implementations must not follow redirects or keep cookies: both are
/// session concerns handled above this port, so that every hop is visible
/// to recording and replay.
pub trait HttpClient: Send + Sync {
    /// Sends one request and returns whatever the server answered, including
    /// error and redirect statuses.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] when no response was obtained.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}
