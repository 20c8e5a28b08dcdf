//! Recording adapter for the `HttpClient` port.

use std::sync::{Arc, Mutex};

use super::record_result;
use crate::cassette::recorder::CassetteRecorder;
use crate::ports::{HttpClient, HttpError, HttpRequest, HttpResponse};

/// Records every request with the response or transport error it produced.
pub struct RecordingHttpClient {
    inner: Box<dyn HttpClient>,
    recorder: Arc<Mutex<CassetteRecorder>>,
}

impl RecordingHttpClient {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn HttpClient>, recorder: Arc<Mutex<CassetteRecorder>>) -> Self {
        Self { inner, recorder }
    }
}

impl HttpClient for RecordingHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let result = self.inner.send(request);
        record_result(&self.recorder, "http", "send", request, &result, |e| {
            serde_json::to_value(e).unwrap_or(serde_json::Value::Null)
        });
        result
    }
}
