//! Replaying adapter for the `HttpClient` port.

use std::sync::Mutex;

use super::{next_output, split_result};
use crate::cassette::replayer::CassetteReplayer;
use crate::ports::{HttpClient, HttpError, HttpRequest, HttpResponse};

/// Serves recorded responses in order, ignoring the request contents.
pub struct ReplayingHttpClient {
    replayer: Mutex<CassetteReplayer>,
}

impl ReplayingHttpClient {
    /// Creates a client over `replayer`.
    #[must_use]
    pub fn new(replayer: CassetteReplayer) -> Self {
        Self {
            replayer: Mutex::new(replayer),
        }
    }

    /// A client that answers each request with the next of `results`.
    #[must_use]
    pub fn scripted(results: Vec<Result<HttpResponse, HttpError>>) -> Self {
        let cassette = crate::cassette::format::Cassette::from_interactions(
            "scripted",
            results.into_iter().map(|result| {
                let output = match result {
                    Ok(response) => serde_json::json!({ "ok": response }),
                    Err(error) => serde_json::json!({ "err": error }),
                };
                (
                    "http".to_string(),
                    "send".to_string(),
                    serde_json::Value::Null,
                    output,
                )
            }),
        );
        Self::new(CassetteReplayer::new(&cassette))
    }
}

impl HttpClient for ReplayingHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let output = next_output(&self.replayer, "http", "send");
        match split_result(output) {
            Ok(value) => Ok(serde_json::from_value(value)
                .expect("http::send: recorded value is not a response")),
            Err(err) => Err(serde_json::from_value(err).unwrap_or_else(|_| HttpError::Connect {
                url: request.url.clone(),
                reason: "unrecognized recorded error".to_string(),
            })),
        }
    }
}
