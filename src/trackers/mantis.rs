//! Mantis.
//!
//! The CSV export prints whatever the session's current filter selects, so a
//! filter is posted first and the export read with the same cookies. Some
//! installations bounce anonymous visitors to a login page; those get logged
//! in as `guest`. Installations without the export are scraped bug by bug.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::fetch::{self, Session};
use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::config::SyncConfig;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, LocalStatus};
use crate::ports::{HttpClient, HttpRequest};

/// Filter that makes `csv_export.php` list every bug.
const FILTER_FORM: &[(&str, &str)] = &[
    ("type", "1"),
    ("page_number", "1"),
    ("view_type", "simple"),
    ("reporter_id[]", "0"),
    ("user_monitor[]", "0"),
    ("handler_id[]", "0"),
    ("show_category[]", "0"),
    ("show_severity[]", "0"),
    ("show_resolution[]", "0"),
    ("show_profile[]", "0"),
    ("show_status[]", "0"),
    ("hide_status[]", "-2"),
    ("show_build[]", "0"),
    ("show_version[]", "0"),
    ("fixed_in_version[]", "0"),
    ("show_priority[]", "0"),
    ("per_page", "-1"),
    ("sort", "last_updated"),
    ("dir", "DESC"),
    ("relationship_type", "-1"),
    ("relationship_bug", ""),
    ("search", ""),
    ("highlight_changed", "6"),
];

/// Mantis's "bug does not exist" application error.
const ERROR_BUG_NOT_FOUND: &str = "1100";

static APPLICATION_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)APPLICATION ERROR #(\d+)\s*(?:</p>)?\s*(?:<p[^>]*>(.*?)</p>)?")
        .expect("valid regex")
});
static RECORD_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+,").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
struct MantisBug {
    status: String,
    resolution: String,
}

/// Adapter for Mantis installations.
pub struct Mantis<'a> {
    base_url: String,
    session: Session<'a>,
    threshold: usize,
    batch_size: Option<usize>,
    csv_supported: Option<bool>,
    bugs: HashMap<u64, Result<MantisBug, BugWatchError>>,
}

impl<'a> Mantis<'a> {
    /// Creates the adapter with a fresh cookie jar.
    #[must_use]
    pub fn new(
        instance: &BugTrackerInstance,
        http: &'a dyn HttpClient,
        config: &SyncConfig,
    ) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            session: Session::new(http)
                .with_cookies()
                .with_redirect_hook(guest_login),
            threshold: config.batch_query_threshold,
            batch_size: config.batch_size,
            csv_supported: None,
            bugs: HashMap::new(),
        }
    }

    /// Sets the filter and reads the export. `None` means this installation
    /// has no CSV export; the answer is remembered for the rest of the run.
    fn fetch_csv(&mut self) -> Result<Option<String>, BugWatchError> {
        if self.csv_supported == Some(false) {
            return Ok(None);
        }

        let filter_url = fetch::join_url(&self.base_url, "view_all_set.php?f=3");
        let form = FILTER_FORM
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let steps = [
            HttpRequest::post(&filter_url, form),
            HttpRequest::get(fetch::join_url(&self.base_url, "csv_export.php")),
        ];

        let mut body = String::new();
        for request in steps {
            let url = request.url.clone();
            let response = self.session.fetch(request)?;
            if matches!(response.status, 404 | 500) {
                tracing::info!(
                    base_url = %self.base_url,
                    status = response.status,
                    "no CSV export, scraping bug pages"
                );
                self.csv_supported = Some(false);
                return Ok(None);
            }
            body = fetch::ensure_success(&url, response)?.body;
        }
        self.csv_supported = Some(true);
        Ok(Some(body))
    }

    /// Scrapes `view.php` for one bug. `Ok(None)` when Mantis says the bug
    /// does not exist.
    fn scrape(
        &mut self,
        id: u64,
    ) -> Result<Option<Result<MantisBug, BugWatchError>>, BugWatchError> {
        let url = fetch::join_url(&self.base_url, &format!("view.php?id={id}"));
        let page = self.session.get(&url)?.body;

        if let Some(caps) = APPLICATION_ERROR.captures(&page) {
            let code = caps[1].to_string();
            if code == ERROR_BUG_NOT_FOUND {
                return Ok(None);
            }
            let message = caps
                .get(2)
                .map(|m| fetch::html_text(m.as_str()))
                .unwrap_or_default();
            return Err(BugWatchError::RemoteApplicationError { code, message });
        }

        let Some(status) = fetch::cell_after_label(&page, "Status") else {
            return Ok(Some(Err(BugWatchError::unparsable(format!("no status on {url}")))));
        };
        let resolution = fetch::cell_after_label(&page, "Resolution").unwrap_or_default();
        Ok(Some(Ok(MantisBug { status, resolution })))
    }
}

/// Sends a redirect to `login_page.php` to `login.php` as the guest user,
/// keeping the redirect's query string.
fn guest_login(target: &Url) -> Result<Option<HttpRequest>, BugWatchError> {
    let Some(page) = target.path_segments().and_then(Iterator::last) else {
        return Ok(None);
    };
    if page != "login_page.php" {
        return Ok(None);
    }
    if !target.query_pairs().any(|(key, _)| key == "return") {
        return Err(BugWatchError::BugTrackerConnect {
            url: target.to_string(),
            reason: "login redirect without a return page".to_string(),
        });
    }

    let mut login = target.clone();
    let path = target.path().trim_end_matches("login_page.php").to_string() + "login.php";
    login.set_path(&path);
    login
        .query_pairs_mut()
        .append_pair("username", "guest")
        .append_pair("password", "guest");
    Ok(Some(HttpRequest::get(login.as_str())))
}

/// Rejoins records whose summary contained a raw newline: a physical line
/// that does not start with `<digits>,` belongs to the record before it.
fn rejoin_records(text: &str) -> String {
    let mut lines = text.lines();
    let mut records: Vec<String> = lines.next().map(ToString::to_string).into_iter().collect();
    for line in lines {
        let continues = records.len() > 1 && !RECORD_START.is_match(line);
        match records.last_mut() {
            Some(last) if continues => {
                last.push(' ');
                last.push_str(line);
            }
            _ => records.push(line.to_string()),
        }
    }
    records.join("\n")
}

fn parse_export(text: &str) -> Result<HashMap<u64, MantisBug>, BugWatchError> {
    let table = fetch::parse_csv(&rejoin_records(text))?;
    for column in ["id", "status", "resolution"] {
        if !table.has_column(column) {
            return Err(BugWatchError::unparsable(format!("CSV export has no {column} column")));
        }
    }

    let mut bugs = HashMap::new();
    for row in table.rows {
        let raw_id = row.get("id").map(String::as_str).unwrap_or_default();
        let Ok(id) = raw_id.trim().parse::<u64>() else {
            tracing::warn!(id = raw_id, "skipping CSV row with a non-numeric id");
            continue;
        };
        let field = |name: &str| {
            row.get(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let bug = MantisBug {
            status: field("status"),
            resolution: field("resolution"),
        };
        bugs.insert(id, bug);
    }
    Ok(bugs)
}

impl ExternalBugTracker for Mantis<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        let ids = numeric_ids(remote_ids);
        self.bugs.clear();

        if ids.len() > self.threshold {
            if let Some(csv) = self.fetch_csv()? {
                let mut all = parse_export(&csv)?;
                self.bugs = ids
                    .iter()
                    .filter_map(|id| all.remove(id).map(|bug| (*id, Ok(bug))))
                    .collect();
                return Ok(());
            }
        }

        for id in ids {
            if let Some(bug) = self.scrape(id)? {
                self.bugs.insert(id, bug);
            }
        }
        Ok(())
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let bug = self
            .bugs
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?
            .as_ref()
            .map_err(Clone::clone)?;
        Ok(format!("{}: {}", bug.status, bug.resolution))
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        let (status, resolution) = remote_status.split_once(':').unwrap_or((remote_status, ""));
        let status = status.trim().to_lowercase();
        let resolution = resolution.trim().to_lowercase();

        match status.as_str() {
            "new" => LocalStatus::New,
            "acknowledged" | "confirmed" => LocalStatus::Confirmed,
            "assigned" => LocalStatus::InProgress,
            "feedback" => LocalStatus::Incomplete,
            "resolved" | "closed" => match resolution.as_str() {
                "fixed" | "open" | "no change required" => LocalStatus::FixReleased,
                "reopened" => LocalStatus::New,
                "unable to reproduce" | "not fixable" | "suspended" | "duplicate" => {
                    LocalStatus::Invalid
                }
                "won't fix" => LocalStatus::WontFix,
                _ => unrecognized("mantis", &self.base_url, remote_status),
            },
            _ => unrecognized("mantis", &self.base_url, remote_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BugTrackerType, ErrorClassification};
    use crate::ports::{HttpMethod, HttpResponse};
    use crate::trackers::test_support::{cookie_header, form_value, ids, instance, ScriptedHttp};

    const EXPORT: &str = "Id,Project,Reporter,Summary,Status,Resolution\n\
abc,main,dave,Junk,new,open\n\
0000003,main,alice,Crash when saving,assigned,open\n\
0000007,main,bob,Line one of summary\n\
continued here,resolved,fixed\n\
0000011,main,carol,Works,closed,won't fix\n";

    fn view_page(status: &str, resolution: &str) -> String {
        format!(
            r##"<table><tr><td class="category">Status</td><td bgcolor="#c2dfff">{status}</td>
            <td class="category">Resolution</td><td>{resolution}</td></tr></table>"##
        )
    }

    fn config(threshold: usize) -> SyncConfig {
        SyncConfig {
            batch_query_threshold: threshold,
            ..SyncConfig::default()
        }
    }

    fn many(n: u64) -> Vec<String> {
        (1..=n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn continuation_lines_join_the_previous_record() {
        let bugs = parse_export(EXPORT).unwrap();
        assert_eq!(bugs.len(), 3);
        assert_eq!(
            bugs[&7],
            MantisBug {
                status: "resolved".into(),
                resolution: "fixed".into(),
            }
        );
        assert_eq!(bugs[&11].resolution, "won't fix");
        assert_eq!(bugs[&3].status, "assigned");
    }

    #[test]
    fn export_without_status_column_is_unparsable() {
        let err = parse_export("Id,Summary\n1,x\n").unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnparsableBug)
        );
    }

    #[test]
    fn batch_reads_the_csv_export_with_session_cookies() {
        let filter_set = HttpResponse::ok("")
            .with_header("Set-Cookie", "MANTIS_VIEW_ALL_COOKIE=9");
        let http = ScriptedHttp::new(vec![Ok(filter_set), Ok(HttpResponse::ok(EXPORT))]);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(2),
        );
        mantis.initialize(&ids(&["3", "7", "11", "12"])).unwrap();

        let seen = http.seen();
        assert_eq!(seen[0].url, "http://m/view_all_set.php?f=3");
        assert_eq!(seen[0].method, HttpMethod::Post);
        assert_eq!(form_value(&seen[0], "hide_status[]"), Some("-2"));
        assert_eq!(form_value(&seen[0], "per_page"), Some("-1"));
        assert_eq!(seen[1].url, "http://m/csv_export.php");
        assert_eq!(cookie_header(&seen[1]), Some("MANTIS_VIEW_ALL_COOKIE=9"));

        assert_eq!(mantis.remote_status("7").unwrap(), "resolved: fixed");
        assert_eq!(
            mantis.remote_status("12"),
            Err(BugWatchError::not_found("12"))
        );
    }

    #[test]
    fn missing_export_falls_back_to_scraping() {
        let mut script = vec![Ok(HttpResponse::status(500))];
        let pages = (1..=3).map(|i| Ok(HttpResponse::ok(view_page("new", &format!("r{i}")))));
        script.extend(pages);
        let http = ScriptedHttp::new(script);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(2),
        );
        mantis.initialize(&many(3)).unwrap();

        let urls = http.urls();
        assert_eq!(urls[1], "http://m/view.php?id=1");
        assert_eq!(urls.len(), 4);
        assert_eq!(mantis.remote_status("3").unwrap(), "new: r3");
    }

    #[test]
    fn small_runs_scrape_without_touching_the_export() {
        let http = ScriptedHttp::ok(&[&view_page("feedback", "open")]);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(10),
        );
        mantis.initialize(&ids(&["5"])).unwrap();
        assert_eq!(http.urls(), ["http://m/view.php?id=5"]);
        assert_eq!(
            mantis.normalize_status(&mantis.remote_status("5").unwrap()),
            LocalStatus::Incomplete
        );
    }

    #[test]
    fn application_errors_on_bug_pages() {
        let missing = r#"<p class="center" style="color:red">APPLICATION ERROR #1100</p>
            <p class="center">Issue 6 not found.</p>"#;
        let http = ScriptedHttp::ok(&[missing, "<p>nothing useful</p>"]);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(10),
        );
        mantis.initialize(&ids(&["6", "8"])).unwrap();
        assert_eq!(
            mantis.remote_status("6"),
            Err(BugWatchError::not_found("6"))
        );
        let err = mantis.remote_status("8").unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnparsableBug)
        );

        let denied = r#"<p>APPLICATION ERROR #1200</p><p>Access denied.</p>"#;
        let http = ScriptedHttp::ok(&[denied]);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(10),
        );
        let err = mantis.initialize(&ids(&["9"])).unwrap_err();
        assert_eq!(
            err,
            BugWatchError::RemoteApplicationError {
                code: "1200".into(),
                message: "Access denied.".into(),
            }
        );
        assert_eq!(err.classification(), None);
    }

    #[test]
    fn login_redirect_becomes_a_guest_login() {
        let target = Url::parse("http://m/login_page.php?return=%2Fview.php%3Fid%3D5").unwrap();
        let request = guest_login(&target).unwrap().expect("login is rewritten");
        let url = Url::parse(&request.url).unwrap();
        assert_eq!(url.path(), "/login.php");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("return".into(), "/view.php?id=5".into())));
        assert!(query.contains(&("username".into(), "guest".into())));
        assert!(query.contains(&("password".into(), "guest".into())));

        let other = Url::parse("http://m/view.php?id=5").unwrap();
        assert_eq!(guest_login(&other).unwrap(), None);
    }

    #[test]
    fn login_redirect_without_return_is_a_connection_failure() {
        let target = Url::parse("http://m/mantis/login_page.php").unwrap();
        let err = guest_login(&target).unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::ConnectionError)
        );
    }

    #[test]
    fn session_follows_the_guest_login() {
        let to_login = HttpResponse::status(302)
            .with_header("Location", "login_page.php?return=view.php%3Fid%3D5");
        let logged_in = HttpResponse::status(302)
            .with_header("Location", "view.php?id=5")
            .with_header("Set-Cookie", "MANTIS_STRING_COOKIE=guest");
        let http = ScriptedHttp::new(vec![
            Ok(to_login),
            Ok(logged_in),
            Ok(HttpResponse::ok(view_page("confirmed", "open"))),
        ]);
        let mut mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m/mantis"),
            &http,
            &config(10),
        );
        mantis.initialize(&ids(&["5"])).unwrap();

        let seen = http.seen();
        assert!(seen[1].url.starts_with("http://m/mantis/login.php?return="));
        assert_eq!(cookie_header(&seen[2]), Some("MANTIS_STRING_COOKIE=guest"));
        assert_eq!(mantis.remote_status("5").unwrap(), "confirmed: open");
    }

    #[test]
    fn normalization_table() {
        let http = ScriptedHttp::ok(&[]);
        let mantis = Mantis::new(
            &instance(BugTrackerType::Mantis, "http://m"),
            &http,
            &config(10),
        );
        let cases = [
            ("new: open", LocalStatus::New),
            ("acknowledged: open", LocalStatus::Confirmed),
            ("assigned: open", LocalStatus::InProgress),
            ("feedback: reopened", LocalStatus::Incomplete),
            ("resolved: fixed", LocalStatus::FixReleased),
            ("closed: no change required", LocalStatus::FixReleased),
            ("resolved: reopened", LocalStatus::New),
            ("closed: duplicate", LocalStatus::Invalid),
            ("Closed: Won't Fix", LocalStatus::WontFix),
            ("closed: mystery", LocalStatus::Unknown),
            ("triaged: open", LocalStatus::Unknown),
            ("UNKNOWN", LocalStatus::Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(mantis.normalize_status(raw), expected, "{raw:?}");
        }
    }
}
