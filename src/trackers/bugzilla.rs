//! Bugzilla, and the Issuezilla fork.
//!
//! The tracker version decides the export format, so unless the instance
//! record already carries one, `xml.cgi?id=1` is fetched first and its root
//! element read. All watched bugs are then fetched in a single POST.

use std::collections::HashMap;

use roxmltree::Node;

use super::fetch::{self, Session};
use super::{is_unknown_sentinel, numeric_id, numeric_ids, unrecognized, ExternalBugTracker};
use crate::config::SyncConfig;
use crate::error::BugWatchError;
use crate::model::{BugTrackerInstance, LocalStatus};
use crate::ports::HttpClient;

/// What the version check learned about the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugzillaDialect {
    /// Dotted version as numbers, vendor suffixes removed.
    pub version: Vec<u32>,
    /// The installation is Issuezilla rather than Bugzilla proper.
    pub issuezilla: bool,
}

/// The export a dialect is fetched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Export {
    Issuezilla,
    /// `xml.cgi`, before 2.16.
    LegacyXml,
    /// `buglist.cgi` RDF; `ctype` selects the 2.17.1+ parameter name.
    Rdf { ctype: bool },
}

/// Element names a given export uses.
struct Tags {
    bug: &'static str,
    id: &'static str,
    status: &'static str,
    alt_status: Option<&'static str>,
}

const COLUMNS: &str =
    "id,product,component,status,resolution,short_desc,priority,severity,assigned_to";

impl Export {
    fn for_dialect(dialect: &BugzillaDialect) -> Self {
        if dialect.issuezilla {
            Self::Issuezilla
        } else if dialect.version.as_slice() < [2, 16].as_slice() {
            Self::LegacyXml
        } else {
            Self::Rdf {
                ctype: dialect.version.as_slice() >= [2, 17, 1].as_slice(),
            }
        }
    }

    fn tags(self) -> Tags {
        match self {
            Self::Issuezilla => Tags {
                bug: "issue",
                id: "issue_id",
                status: "issue_status",
                alt_status: None,
            },
            Self::LegacyXml => Tags {
                bug: "bug",
                id: "bug_id",
                status: "bug_status",
                alt_status: None,
            },
            // RDF elements carry the `bz:` prefix; names are matched locally.
            Self::Rdf { .. } => Tags {
                bug: "bug",
                id: "id",
                status: "bug_status",
                alt_status: Some("status"),
            },
        }
    }

    fn request(self, base_url: &str, ids: &str) -> (String, Vec<(String, String)>) {
        let pairs = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        match self {
            Self::Issuezilla => (
                fetch::join_url(base_url, "xml.cgi"),
                pairs(&[
                    ("download_type", "browser"),
                    ("output_configured", "true"),
                    ("include_attachments", "false"),
                    ("include_dependencies", "false"),
                    ("include_long_desc", "false"),
                    ("id", ids),
                ]),
            ),
            Self::LegacyXml => (fetch::join_url(base_url, "xml.cgi"), pairs(&[("id", ids)])),
            Self::Rdf { ctype } => {
                let mut form = pairs(&[
                    ("form_name", "buglist.cgi"),
                    ("bug_id_type", "include"),
                    ("columnlist", COLUMNS),
                    ("bug_id", ids),
                ]);
                form.push(if ctype {
                    ("ctype".to_string(), "rdf".to_string())
                } else {
                    ("format".to_string(), "rdf".to_string())
                });
                (fetch::join_url(base_url, "buglist.cgi"), form)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RemoteBug {
    status: Option<String>,
    resolution: Option<String>,
}

/// Adapter for Bugzilla installations.
pub struct Bugzilla<'a> {
    base_url: String,
    known_version: Option<String>,
    session: Session<'a>,
    batch_size: Option<usize>,
    bugs: HashMap<u64, RemoteBug>,
}

impl<'a> Bugzilla<'a> {
    /// Creates the adapter; nothing is fetched yet.
    #[must_use]
    pub fn new(
        instance: &BugTrackerInstance,
        http: &'a dyn HttpClient,
        config: &SyncConfig,
    ) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            known_version: instance.version.clone(),
            session: Session::new(http),
            batch_size: config.batch_size,
            bugs: HashMap::new(),
        }
    }

    /// Works out which dialect the installation speaks, fetching the version
    /// document unless the version is already known.
    ///
    /// # Errors
    ///
    /// Connection failures, an unparsable version document, or a version that
    /// cannot be read.
    pub fn detect_dialect(&mut self) -> Result<BugzillaDialect, BugWatchError> {
        if let Some(version) = &self.known_version {
            return Ok(BugzillaDialect {
                version: parse_version(&self.base_url, version)?,
                issuezilla: false,
            });
        }

        let url = fetch::join_url(&self.base_url, "xml.cgi?id=1");
        let body = self.session.get(&url)?.body;
        let doc = fetch::parse_xml(&body).map_err(|e| BugWatchError::BugTrackerConnect {
            url: url.clone(),
            reason: format!("unparsable version document: {e}"),
        })?;

        let root = doc
            .descendants()
            .find(|n| n.is_element() && matches!(n.tag_name().name(), "bugzilla" | "issuezilla"))
            .ok_or_else(|| BugWatchError::UnparsableBugTrackerVersion {
                url: self.base_url.clone(),
                version: String::new(),
            })?;
        let raw = root.attribute("version").unwrap_or_default();

        Ok(BugzillaDialect {
            version: parse_version(&self.base_url, raw)?,
            issuezilla: root.tag_name().name() == "issuezilla",
        })
    }

    fn fetch_bugs(&mut self, dialect: &BugzillaDialect, ids: &[u64]) -> Result<(), BugWatchError> {
        let export = Export::for_dialect(dialect);
        let joined = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let (url, form) = export.request(&self.base_url, &joined);
        tracing::debug!(?export, count = ids.len(), "fetching bugzilla export");

        let body = self.session.post(&url, form)?.body;
        self.bugs = read_bugs(&body, &export.tags())?;
        Ok(())
    }
}

/// Reads a dotted version into numbers, dropping everything from the first
/// `-` and any `+`.
///
/// # Errors
///
/// Returns [`BugWatchError::UnparsableBugTrackerVersion`] if a component is
/// not a number.
pub fn parse_version(url: &str, raw: &str) -> Result<Vec<u32>, BugWatchError> {
    let core = raw.split('-').next().unwrap_or_default().replace('+', "");
    core.trim()
        .split('.')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| BugWatchError::UnparsableBugTrackerVersion {
            url: url.to_string(),
            version: raw.to_string(),
        })
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
        .map(|c| c.text().unwrap_or_default().trim().to_string())
}

fn read_bugs(body: &str, tags: &Tags) -> Result<HashMap<u64, RemoteBug>, BugWatchError> {
    let doc = fetch::parse_xml(body)
        .map_err(|e| BugWatchError::unparsable(format!("bug export: {e}")))?;

    let mut bugs = HashMap::new();
    let bugs_in_doc = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == tags.bug);
    for bug in bugs_in_doc {
        // Ids also appear deeper down (duplicate lists); only direct children count.
        let Some(id) = child_text(bug, tags.id).and_then(|id| id.parse::<u64>().ok()) else {
            continue;
        };
        let status = child_text(bug, tags.status)
            .or_else(|| tags.alt_status.and_then(|alt| child_text(bug, alt)));
        let resolution = child_text(bug, "resolution").filter(|r| !r.is_empty());
        bugs.insert(id, RemoteBug { status, resolution });
    }
    Ok(bugs)
}

impl ExternalBugTracker for Bugzilla<'_> {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    fn initialize(&mut self, remote_ids: &[String]) -> Result<(), BugWatchError> {
        let dialect = self.detect_dialect()?;
        let ids = numeric_ids(remote_ids);
        if ids.is_empty() {
            return Ok(());
        }
        self.fetch_bugs(&dialect, &ids)
    }

    fn remote_status(&self, remote_bug: &str) -> Result<String, BugWatchError> {
        let id = numeric_id(remote_bug)?;
        let bug = self
            .bugs
            .get(&id)
            .ok_or_else(|| BugWatchError::not_found(remote_bug))?;
        let status = bug
            .status
            .as_deref()
            .ok_or_else(|| BugWatchError::unparsable(format!("bug {remote_bug} has no status")))?;
        Ok(match &bug.resolution {
            Some(resolution) => format!("{status} {resolution}"),
            None => status.to_string(),
        })
    }

    fn normalize_status(&self, remote_status: &str) -> LocalStatus {
        if is_unknown_sentinel(remote_status) {
            return LocalStatus::Unknown;
        }
        let mut parts = remote_status
            .split_whitespace()
            .map(str::to_ascii_uppercase);
        let status = parts.next().unwrap_or_default();
        let resolution = parts.next().unwrap_or_default();

        match status.as_str() {
            "ASSIGNED" | "ON_DEV" | "FAILS_QA" | "STARTED" => LocalStatus::InProgress,
            "NEEDINFO" | "NEEDINFO_REPORTER" | "NEEDSINFO" | "WAITING" | "SUSPENDED"
            | "PLEASETEST" => LocalStatus::Incomplete,
            "PENDINGUPLOAD" | "MODIFIED" | "RELEASE_PENDING" | "ON_QA" => {
                LocalStatus::FixCommitted
            }
            "REJECTED" => LocalStatus::Invalid,
            "REOPENED" | "NEW" | "UPSTREAM" | "DEFERRED" => LocalStatus::Confirmed,
            "UNCONFIRMED" => LocalStatus::New,
            "RESOLVED" | "VERIFIED" | "CLOSED" => match resolution.as_str() {
                "CODE_FIX" | "CURRENTRELEASE" | "ERRATA" | "NEXTRELEASE"
                | "PATCH_ALREADY_AVAILABLE" | "FIXED" | "RAWHIDE" | "DOCUMENTED" => {
                    LocalStatus::FixReleased
                }
                "WONTFIX" | "WILL_NOT_FIX" | "NOTOURBUG" => LocalStatus::WontFix,
                "INVALID" | "WORKSFORME" | "NOTABUG" | "CANTFIX" | "UNREPRODUCIBLE"
                | "DUPLICATE" | "OBSOLETE" | "INSUFFICIENT_DATA" | "EXPIRED" => {
                    LocalStatus::Invalid
                }
                _ => unrecognized("bugzilla", &self.base_url, remote_status),
            },
            _ => unrecognized("bugzilla", &self.base_url, remote_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BugTrackerType, ErrorClassification};
    use crate::ports::HttpResponse;
    use crate::trackers::test_support::{form_value, ids, instance, ScriptedHttp};

    const VERSION_3_0: &str = r#"<?xml version="1.0"?>
<!DOCTYPE bugzilla SYSTEM "https://bugzilla.gnome.org/bugzilla.dtd">
<bugzilla version="3.0.4" urlbase="http://b/" maintainer="admin@b">
<bug error="NotPermitted"/>
</bugzilla>"#;

    const RDF: &str = r#"<?xml version="1.0"?>
<RDF xmlns="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
     xmlns:bz="http://www.bugzilla.org/rdf#"
     xmlns:nc="http://home.netscape.com/NC-rdf#">
<bz:result>
  <bz:bugs><Seq>
    <li><bz:bug>
      <bz:id nc:parseType="Integer">1</bz:id>
      <bz:bug_status>RESOLVED</bz:bug_status>
      <bz:resolution>FIXED</bz:resolution>
      <bz:dup><bz:id>99</bz:id></bz:dup>
    </bz:bug></li>
    <li><bz:bug>
      <bz:id nc:parseType="Integer">3</bz:id>
      <bz:status>NEW</bz:status>
      <bz:resolution></bz:resolution>
    </bz:bug></li>
    <li><bz:bug>
      <bz:id nc:parseType="Integer">5</bz:id>
      <bz:priority>P3</bz:priority>
    </bz:bug></li>
  </Seq></bz:bugs>
</bz:result>
</RDF>"#;

    fn adapter<'a>(http: &'a ScriptedHttp, version: Option<&str>) -> Bugzilla<'a> {
        let mut instance = instance(BugTrackerType::Bugzilla, "http://b");
        instance.version = version.map(ToString::to_string);
        Bugzilla::new(&instance, http, &SyncConfig::default())
    }

    #[test]
    fn version_strings_parse_into_numbers() {
        assert_eq!(parse_version("u", "2.18-rh3").unwrap(), [2, 18]);
        assert_eq!(parse_version("u", "3.0+").unwrap(), [3, 0]);
        assert_eq!(parse_version("u", "2.17.1").unwrap(), [2, 17, 1]);
        let err = parse_version("u", "not-a-version").unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnparsableBugTracker)
        );
        assert!(matches!(err, BugWatchError::UnparsableBugTrackerVersion { .. }));
    }

    #[test]
    fn export_follows_version() {
        let dialect = |version: &[u32]| BugzillaDialect {
            version: version.to_vec(),
            issuezilla: false,
        };
        assert_eq!(
            Export::for_dialect(&dialect(&[2, 14, 5])),
            Export::LegacyXml
        );
        assert_eq!(
            Export::for_dialect(&dialect(&[2, 16])),
            Export::Rdf { ctype: false }
        );
        assert_eq!(
            Export::for_dialect(&dialect(&[2, 17])),
            Export::Rdf { ctype: false }
        );
        assert_eq!(
            Export::for_dialect(&dialect(&[2, 17, 1])),
            Export::Rdf { ctype: true }
        );
        assert_eq!(
            Export::for_dialect(&dialect(&[3, 0])),
            Export::Rdf { ctype: true }
        );
        let issuezilla = BugzillaDialect {
            version: vec![2, 11],
            issuezilla: true,
        };
        assert_eq!(Export::for_dialect(&issuezilla), Export::Issuezilla);
    }

    #[test]
    fn version_check_then_rdf_batch() {
        let http = ScriptedHttp::ok(&[VERSION_3_0, RDF]);
        let mut bugzilla = adapter(&http, None);
        bugzilla.initialize(&ids(&["1", "3", "5", "7"])).unwrap();

        let seen = http.seen();
        assert_eq!(seen[0].url, "http://b/xml.cgi?id=1");
        assert_eq!(seen[1].url, "http://b/buglist.cgi");
        assert_eq!(form_value(&seen[1], "bug_id"), Some("1,3,5,7"));
        assert_eq!(form_value(&seen[1], "ctype"), Some("rdf"));
        assert_eq!(form_value(&seen[1], "bug_id_type"), Some("include"));

        assert_eq!(bugzilla.remote_status("1").unwrap(), "RESOLVED FIXED");
        assert_eq!(bugzilla.remote_status("3").unwrap(), "NEW");
        assert!(matches!(
            bugzilla.remote_status("5"),
            Err(BugWatchError::UnparsableBug { .. })
        ));
        assert_eq!(
            bugzilla.remote_status("7"),
            Err(BugWatchError::not_found("7"))
        );
        // Nested under a duplicate list, not a bug of its own.
        assert_eq!(
            bugzilla.remote_status("99"),
            Err(BugWatchError::not_found("99"))
        );
    }

    #[test]
    fn known_version_skips_the_version_check() {
        let old = r#"<bugzilla version="2.14">
            <bug><bug_id>4</bug_id><bug_status>ASSIGNED</bug_status></bug>
        </bugzilla>"#;
        let http = ScriptedHttp::ok(&[old]);
        let mut bugzilla = adapter(&http, Some("2.14.2"));
        bugzilla.initialize(&ids(&["4"])).unwrap();

        let seen = http.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "http://b/xml.cgi");
        assert_eq!(form_value(&seen[0], "id"), Some("4"));
        assert_eq!(bugzilla.remote_status("4").unwrap(), "ASSIGNED");
    }

    #[test]
    fn mid_generation_rdf_uses_format() {
        let http = ScriptedHttp::ok(&[RDF]);
        let mut bugzilla = adapter(&http, Some("2.16.7"));
        bugzilla.initialize(&ids(&["1"])).unwrap();
        assert_eq!(form_value(&http.seen()[0], "format"), Some("rdf"));
        assert_eq!(form_value(&http.seen()[0], "ctype"), None);
    }

    #[test]
    fn issuezilla_uses_its_own_fields() {
        let version = r#"<issuezilla version="2.11"/>"#;
        let export = r#"<issuezilla version="2.11">
            <issue>
                <issue_id>8</issue_id>
                <issue_status>RESOLVED</issue_status>
                <resolution>WONTFIX</resolution>
            </issue>
        </issuezilla>"#;
        let http = ScriptedHttp::ok(&[version, export]);
        let mut bugzilla = adapter(&http, None);
        bugzilla.initialize(&ids(&["8"])).unwrap();

        assert_eq!(
            form_value(&http.seen()[1], "download_type"),
            Some("browser")
        );
        assert_eq!(bugzilla.remote_status("8").unwrap(), "RESOLVED WONTFIX");
        assert_eq!(
            bugzilla.normalize_status("RESOLVED WONTFIX"),
            LocalStatus::WontFix
        );
    }

    #[test]
    fn version_check_failures_are_classified() {
        let http = ScriptedHttp::ok(&["<html>not xml"]);
        let err = adapter(&http, None).initialize(&ids(&["1"])).unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::ConnectionError)
        );

        let http = ScriptedHttp::ok(&["<feed/>"]);
        let err = adapter(&http, None).initialize(&ids(&["1"])).unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnparsableBugTracker)
        );

        let http = ScriptedHttp::new(vec![Ok(HttpResponse::status(500))]);
        let err = adapter(&http, None).initialize(&ids(&["1"])).unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::ConnectionError)
        );
    }

    #[test]
    fn unparsable_export_is_unparsable_bug() {
        let http = ScriptedHttp::ok(&[VERSION_3_0, "<RDF"]);
        let err = adapter(&http, None).initialize(&ids(&["1"])).unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::UnparsableBug)
        );
    }

    #[test]
    fn malformed_ids_are_not_sent() {
        let http = ScriptedHttp::ok(&[VERSION_3_0, RDF]);
        let mut bugzilla = adapter(&http, None);
        bugzilla.initialize(&ids(&["1", "abc"])).unwrap();
        assert_eq!(form_value(&http.seen()[1], "bug_id"), Some("1"));
        let err = bugzilla.remote_status("abc").unwrap_err();
        assert_eq!(
            err.classification(),
            Some(ErrorClassification::InvalidBugId)
        );
    }

    #[test]
    fn normalization_table() {
        let http = ScriptedHttp::ok(&[]);
        let bugzilla = adapter(&http, None);
        let cases = [
            ("ASSIGNED", LocalStatus::InProgress),
            ("NEEDINFO_REPORTER", LocalStatus::Incomplete),
            ("ON_QA", LocalStatus::FixCommitted),
            ("REJECTED", LocalStatus::Invalid),
            ("REOPENED", LocalStatus::Confirmed),
            ("NEW", LocalStatus::Confirmed),
            ("UNCONFIRMED", LocalStatus::New),
            ("RESOLVED FIXED", LocalStatus::FixReleased),
            ("CLOSED CURRENTRELEASE", LocalStatus::FixReleased),
            ("VERIFIED NOTOURBUG", LocalStatus::WontFix),
            ("RESOLVED DUPLICATE", LocalStatus::Invalid),
            ("CLOSED EXPIRED", LocalStatus::Invalid),
            ("resolved fixed", LocalStatus::FixReleased),
            ("RESOLVED MOVED", LocalStatus::Unknown),
            ("RESOLVED", LocalStatus::Unknown),
            ("TRIAGED", LocalStatus::Unknown),
            ("UNKNOWN", LocalStatus::Unknown),
            ("", LocalStatus::Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(bugzilla.normalize_status(raw), expected, "{raw:?}");
        }
    }
}
