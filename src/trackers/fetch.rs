//! Fetch primitives shared by the tracker adapters: an HTTP session that
//! follows redirects and optionally keeps cookies, and the CSV, XML and HTML
//! readers the adapters parse their exports with.

use std::collections::HashMap;

use cookie_store::CookieStore;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::BugWatchError;
use crate::ports::{HttpClient, HttpRequest, HttpResponse};

/// User-Agent sent with every request to a remote tracker.
pub const USER_AGENT: &str =
    concat!(
        "bugwatch/",
        env!("CARGO_PKG_VERSION"),
        " (+external bug tracker sync)"
    );

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Looks at the target of a redirect and may replace the request sent to it.
///
/// Returning `Ok(None)` follows the redirect as usual.
pub type RedirectHook = fn(&Url) -> Result<Option<HttpRequest>, BugWatchError>;

/// A browsing session against one tracker.
pub struct Session<'a> {
    http: &'a dyn HttpClient,
    jar: Option<CookieStore>,
    redirect_hook: Option<RedirectHook>,
}

impl<'a> Session<'a> {
    /// A session without cookies.
    #[must_use]
    pub fn new(http: &'a dyn HttpClient) -> Self {
        Self {
            http,
            jar: None,
            redirect_hook: None,
        }
    }

    /// Keeps cookies set by the server and sends them back to the URLs
    /// their domain and path cover.
    #[must_use]
    pub fn with_cookies(mut self) -> Self {
        self.jar = Some(CookieStore::default());
        self
    }

    /// Routes every redirect target through `hook`.
    #[must_use]
    pub fn with_redirect_hook(mut self, hook: RedirectHook) -> Self {
        self.redirect_hook = Some(hook);
        self
    }

    /// `GET`s `url`, failing on any final non-2xx status.
    ///
    /// # Errors
    ///
    /// Transport failures, redirect loops and error statuses.
    pub fn get(&mut self, url: &str) -> Result<HttpResponse, BugWatchError> {
        let response = self.fetch(HttpRequest::get(url))?;
        ensure_success(url, response)
    }

    /// `POST`s a form to `url`, failing on any final non-2xx status.
    ///
    /// # Errors
    ///
    /// Transport failures, redirect loops and error statuses.
    pub fn post(
        &mut self,
        url: &str,
        form: Vec<(String, String)>,
    ) -> Result<HttpResponse, BugWatchError> {
        let response = self.fetch(HttpRequest::post(url, form))?;
        ensure_success(url, response)
    }

    /// Sends `request`, following up to [`MAX_REDIRECTS`] redirects, and
    /// returns the final response whatever its status.
    ///
    /// # Errors
    ///
    /// Transport failures, a redirect without a usable `Location`, too many
    /// hops, or a failure reported by the redirect hook.
    pub fn fetch(&mut self, request: HttpRequest) -> Result<HttpResponse, BugWatchError> {
        let mut request = request;
        for _ in 0..=MAX_REDIRECTS {
            let response = self.send_once(&request)?;
            if !response.is_redirect() {
                return Ok(response);
            }

            let target = redirect_target(&request.url, &response)?;
            let rewritten = match self.redirect_hook {
                Some(hook) => hook(&target)?,
                None => None,
            };
            request = match rewritten {
                Some(next) => next,
                // 307/308 repeat the request as is; the others switch to GET.
                None if matches!(response.status, 307 | 308) => HttpRequest {
                    url: target.to_string(),
                    ..request
                },
                None => HttpRequest::get(target.as_str()),
            };
        }

        Err(BugWatchError::BugTrackerConnect {
            url: request.url,
            reason: format!("more than {MAX_REDIRECTS} redirects"),
        })
    }

    fn send_once(&mut self, request: &HttpRequest) -> Result<HttpResponse, BugWatchError> {
        let mut outbound = request.clone().with_header("User-Agent", USER_AGENT);
        // Unparsable URLs fail in the client; they never carry cookies.
        let url = Url::parse(&request.url).ok();

        if let (Some(jar), Some(url)) = (&self.jar, &url) {
            let header: Vec<String> = jar
                .get_request_values(url)
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            if !header.is_empty() {
                outbound = outbound.with_header("Cookie", header.join("; "));
            }
        }

        tracing::debug!(method = ?outbound.method, url = %outbound.url, "fetching");
        let response = self.http.send(&outbound)?;

        if let (Some(jar), Some(url)) = (&mut self.jar, &url) {
            for raw in response.header_values("set-cookie") {
                if let Err(e) = jar.parse(raw, url) {
                    tracing::debug!(error = %e, "ignoring rejected cookie");
                }
            }
        }
        Ok(response)
    }
}

fn redirect_target(current: &str, response: &HttpResponse) -> Result<Url, BugWatchError> {
    let connect = |reason: String| BugWatchError::BugTrackerConnect {
        url: current.to_string(),
        reason,
    };
    let location = response
        .header("location")
        .ok_or_else(|| connect(format!("HTTP {} redirect without Location", response.status)))?;
    let base = Url::parse(current).map_err(|e| connect(format!("invalid URL: {e}")))?;
    base.join(location)
        .map_err(|e| connect(format!("invalid redirect {location:?}: {e}")))
}

/// Turns a non-2xx response into a connection failure naming the status.
///
/// # Errors
///
/// Returns [`BugWatchError::BugTrackerConnect`] for any non-2xx status.
pub fn ensure_success(url: &str, response: HttpResponse) -> Result<HttpResponse, BugWatchError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(BugWatchError::BugTrackerConnect {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status),
        })
    }
}

/// Joins `path` onto a tracker base URL, tolerating a missing trailing slash.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// A parsed CSV export. Header names are trimmed and lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    /// Column names in file order.
    pub headers: Vec<String>,
    /// One map per record, keyed by column name. Short records simply lack
    /// the missing columns.
    pub rows: Vec<HashMap<String, String>>,
}

impl CsvTable {
    /// `true` if the export has a column called `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|header| header == name)
    }
}

/// Parses a CSV export with a header row.
///
/// # Errors
///
/// Returns [`BugWatchError::UnparsableBug`] if the CSV is malformed.
pub fn parse_csv(text: &str) -> Result<CsvTable, BugWatchError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| BugWatchError::unparsable(format!("bad CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| BugWatchError::unparsable(format!("bad CSV row: {e}")))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Parses an XML or RDF document. DTDs are allowed since older trackers
/// still declare one.
///
/// # Errors
///
/// Returns the parser error for malformed documents.
pub fn parse_xml(text: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options)
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static TD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td\s*>").expect("valid regex"));

/// Visible text of an HTML fragment: tags dropped, common entities decoded,
/// whitespace collapsed.
#[must_use]
pub fn html_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

/// Text of the first table cell that follows an element whose whole text is
/// `label` (matched case-insensitively, surrounding whitespace ignored).
///
/// This is how both the Mantis bug page and the SourceForge tracker page lay
/// out fields: a label element, then the value in the next `<td>`.
#[must_use]
pub fn cell_after_label(html: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?is)>\s*{}\s*<", regex::escape(label));
    let label_at = Regex::new(&pattern).ok()?.find(html)?;
    let rest = &html[label_at.end()..];
    let cell = TD.captures(rest)?;
    Some(html_text(cell.get(1)?.as_str()))
}
