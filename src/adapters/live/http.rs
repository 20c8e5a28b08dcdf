//! Blocking HTTP client backed by `reqwest`.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use crate::ports::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};

/// Sends requests over the network. Redirects are handed back to the caller
/// untouched and no cookies are kept.
pub struct LiveHttpClient {
    client: Client,
}

impl LiveHttpClient {
    /// Builds a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

impl HttpClient for LiveHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                HttpError::Timeout {
                    url: request.url.clone(),
                }
            } else {
                HttpError::Connect {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let response = builder.send().map_err(transport)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                (name.as_str().to_ascii_lowercase(), value)
            })
            .collect();
        let bytes = response.bytes().map_err(transport)?;

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
