//! Watch store: persistence for tracker instances, watches and imported
//! comments.
//!
//! Everything lives in one YAML document, rewritten after every change:
//!
//! ```text
//! <root>/
//!   └── watches.yaml   (trackers, watches, persons, comments)
//! ```
//!
//! All I/O goes through the `FileSystem` port, so the store works with live,
//! recording and replaying adapters alike.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;
use crate::model::{BugTrackerInstance, BugWatch, ImportedComment, Person};
use crate::ports::{BugRepository, FileSystem, IdGenerator};

/// File name of the store document under the store root.
pub const STORE_FILE: &str = "watches.yaml";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    trackers: Vec<BugTrackerInstance>,
    #[serde(default)]
    watches: Vec<BugWatch>,
    #[serde(default)]
    persons: Vec<Person>,
    #[serde(default)]
    comments: Vec<ImportedComment>,
}

/// The local bug database, as far as watch synchronization is concerned.
pub struct WatchStore<'a> {
    fs: &'a dyn FileSystem,
    ids: &'a dyn IdGenerator,
    path: PathBuf,
    doc: Mutex<Document>,
}

impl<'a> WatchStore<'a> {
    /// Loads `<root>/watches.yaml`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(
        fs: &'a dyn FileSystem,
        ids: &'a dyn IdGenerator,
        root: &Path,
    ) -> Result<Self, String> {
        let path = root.join(STORE_FILE);
        let doc: Document = if fs.exists(&path) {
            let contents = fs
                .read_to_string(&path)
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
            serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?
        } else {
            Document::default()
        };
        Ok(Self {
            fs,
            ids,
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Opens the store through a context's filesystem and id generator.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn in_context(ctx: &'a ServiceContext, root: &Path) -> Result<Self, String> {
        Self::open(ctx.fs.as_ref(), ctx.id_gen.as_ref(), root)
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every tracker instance, in file order.
    #[must_use]
    pub fn trackers(&self) -> Vec<BugTrackerInstance> {
        self.lock().trackers.clone()
    }

    /// The tracker instance called `name`.
    #[must_use]
    pub fn tracker(&self, name: &str) -> Option<BugTrackerInstance> {
        self.lock()
            .trackers
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Every watch, in file order.
    #[must_use]
    pub fn watches(&self) -> Vec<BugWatch> {
        self.lock().watches.clone()
    }

    /// Watches on the tracker called `tracker`.
    #[must_use]
    pub fn watches_for(&self, tracker: &str) -> Vec<BugWatch> {
        self.lock()
            .watches
            .iter()
            .filter(|w| w.tracker == tracker)
            .cloned()
            .collect()
    }

    /// Comments linked to `local_bug`, oldest first.
    #[must_use]
    pub fn comments_for(&self, local_bug: u64) -> Vec<ImportedComment> {
        self.lock()
            .comments
            .iter()
            .filter(|c| c.local_bug == local_bug)
            .cloned()
            .collect()
    }

    /// The person registered under `email`, compared case-insensitively.
    #[must_use]
    pub fn person_by_email(&self, email: &str) -> Option<Person> {
        self.lock()
            .persons
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    /// Registers a tracker instance, replacing one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn add_tracker(&self, instance: BugTrackerInstance) -> Result<(), String> {
        let mut doc = self.lock();
        self.commit(&mut doc, |doc| {
            match doc.trackers.iter_mut().find(|t| t.name == instance.name) {
                Some(existing) => *existing = instance,
                None => doc.trackers.push(instance),
            }
        })
        .map_err(|e| format!("Failed to write {}: {e}", self.path.display()))
    }

    /// Creates a never-checked watch on a registered tracker.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker is unknown or the store cannot be
    /// written.
    pub fn add_watch(
        &self,
        tracker: &str,
        remote_bug: &str,
        local_bug: u64,
    ) -> Result<BugWatch, String> {
        let mut doc = self.lock();
        if !doc.trackers.iter().any(|t| t.name == tracker) {
            return Err(format!("Unknown tracker: {tracker}"));
        }
        let id = doc
            .watches
            .iter()
            .map(|w| w.id)
            .max()
            .map_or(1, |max| max + 1);
        let watch = BugWatch::new(id, tracker, remote_bug, local_bug);
        self.commit(&mut doc, |doc| doc.watches.push(watch.clone()))
            .map_err(|e| format!("Failed to write {}: {e}", self.path.display()))?;
        Ok(watch)
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to a copy of the document, writes the copy, and only
    /// then makes it the in-memory state. A failed write changes nothing.
    fn commit<T>(
        &self,
        doc: &mut Document,
        change: impl FnOnce(&mut Document) -> T,
    ) -> Result<T, BoxError> {
        let mut next = doc.clone();
        let value = change(&mut next);
        self.persist(&next)?;
        *doc = next;
        Ok(value)
    }

    fn persist(&self, doc: &Document) -> Result<(), BoxError> {
        let yaml = serde_yaml::to_string(doc)?;
        self.fs.write(&self.path, &yaml)
    }
}

impl BugRepository for WatchStore<'_> {
    fn save_watch(&self, watch: &BugWatch) -> Result<(), BoxError> {
        let mut doc = self.lock();
        self.commit(&mut doc, |doc| match doc.watches.iter_mut().find(|w| w.id == watch.id) {
            Some(existing) => *existing = watch.clone(),
            None => doc.watches.push(watch.clone()),
        })
    }

    fn ensure_person(&self, email: &str, display_name: Option<&str>) -> Result<Person, BoxError> {
        let mut doc = self.lock();
        let known = doc
            .persons
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email));
        if let Some(person) = known {
            return Ok(person.clone());
        }
        let person = Person {
            id: self.ids.generate_id(),
            email: email.to_string(),
            display_name: display_name.map(ToString::to_string),
        };
        self.commit(&mut doc, |doc| doc.persons.push(person.clone()))?;
        Ok(person)
    }

    fn has_comment(&self, local_bug: u64, message_id: &str) -> Result<bool, BoxError> {
        Ok(self
            .lock()
            .comments
            .iter()
            .any(|c| c.local_bug == local_bug && c.message_id == message_id))
    }

    fn link_comment(&self, comment: ImportedComment) -> Result<(), BoxError> {
        let mut doc = self.lock();
        if doc
            .comments
            .iter()
            .any(|c| c.local_bug == comment.local_bug && c.message_id == comment.message_id)
        {
            return Err(format!(
                "comment {} already linked to bug {}",
                comment.message_id, comment.local_bug
            )
            .into());
        }
        self.commit(&mut doc, |doc| doc.comments.push(comment))
    }

    fn new_comment_id(&self) -> String {
        self.ids.generate_id()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{MemFs, SeqIds};
    use super::*;
    use crate::model::{BugTrackerType, LocalStatus};

    fn gnome() -> BugTrackerInstance {
        BugTrackerInstance {
            name: "gnome".to_string(),
            base_url: "https://bugzilla.gnome.org/".to_string(),
            tracker_type: BugTrackerType::Bugzilla,
            version: None,
        }
    }

    fn comment(local_bug: u64, message_id: &str) -> ImportedComment {
        ImportedComment {
            id: "c".to_string(),
            local_bug,
            watch_id: 1,
            message_id: message_id.to_string(),
            author: "p".to_string(),
            subject: None,
            body: "hello".to_string(),
            date: None,
        }
    }

    #[test]
    fn missing_file_is_an_empty_store() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        assert!(store.trackers().is_empty());
        assert!(store.watches().is_empty());
        assert_eq!(store.path(), Path::new("/store/watches.yaml"));
    }

    #[test]
    fn changes_survive_a_reopen() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        {
            let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
            store.add_tracker(gnome()).unwrap();
            let mut watch = store.add_watch("gnome", "42", 7).unwrap();
            watch.record_status("NEW", LocalStatus::New, chrono::Utc::now());
            store.save_watch(&watch).unwrap();
        }

        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        assert_eq!(store.tracker("gnome"), Some(gnome()));
        let watches = store.watches_for("gnome");
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].remote_status.as_deref(), Some("NEW"));
    }

    #[test]
    fn watch_ids_increase() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        store.add_tracker(gnome()).unwrap();
        assert_eq!(store.add_watch("gnome", "1", 1).unwrap().id, 1);
        assert_eq!(store.add_watch("gnome", "2", 1).unwrap().id, 2);
        assert!(store.add_watch("kde", "3", 1).is_err());
    }

    #[test]
    fn hand_written_documents_load() {
        let fs = MemFs::default();
        fs.insert(
            "/store/watches.yaml",
            "trackers:\n  - name: debian\n    base_url: http://bugs.debian.org\n\
             \x20   tracker_type: debbugs\n\
             watches:\n  - id: 3\n    tracker: debian\n\
             \x20   remote_bug: \"1042\"\n    local_bug: 77\n",
        );
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        assert_eq!(
            store.tracker("debian").unwrap().tracker_type,
            BugTrackerType::Debbugs
        );
        assert_eq!(store.watches()[0].remote_bug, "1042");
        assert_eq!(store.watches()[0].last_checked, None);
    }

    #[test]
    fn corrupt_documents_are_reported() {
        let fs = MemFs::default();
        fs.insert("/store/watches.yaml", "watches: [unterminated");
        let ids = SeqIds::default();
        let Err(err) = WatchStore::open(&fs, &ids, Path::new("/store")) else {
            panic!("corrupt store should not open");
        };
        assert!(err.contains("Failed to parse"), "{err}");
    }

    #[test]
    fn persons_are_created_once_per_address() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        let first = store
            .ensure_person("rene@example.org", Some("Rene"))
            .unwrap();
        let again = store.ensure_person("RENE@example.org", None).unwrap();
        assert_eq!(first, again);
        assert_eq!(first.id, "id-1");
        assert_eq!(first.display_name.as_deref(), Some("Rene"));
    }

    #[test]
    fn failed_writes_leave_memory_and_disk_in_step() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        store.add_tracker(gnome()).unwrap();
        let mut watch = store.add_watch("gnome", "42", 7).unwrap();

        fs.set_read_only(true);
        watch.record_status("NEW", LocalStatus::New, chrono::Utc::now());
        assert!(store.save_watch(&watch).is_err());
        assert!(store.ensure_person("rene@example.org", None).is_err());
        assert!(store.link_comment(comment(7, "<a@x>")).is_err());
        assert!(store.add_watch("gnome", "43", 8).is_err());
        assert_eq!(store.watches()[0].remote_status, None);
        assert_eq!(store.person_by_email("rene@example.org"), None);
        assert!(!store.has_comment(7, "<a@x>").unwrap());

        // The next successful write must not carry the failed changes along.
        fs.set_read_only(false);
        let kde = BugTrackerInstance {
            name: "kde".into(),
            ..gnome()
        };
        store.add_tracker(kde).unwrap();
        let reopened = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        assert_eq!(reopened.watches().len(), 1);
        assert_eq!(reopened.watches()[0].remote_status, None);
        assert!(reopened.comments_for(7).is_empty());
    }

    #[test]
    fn comments_are_unique_per_bug() {
        let fs = MemFs::default();
        let ids = SeqIds::default();
        let store = WatchStore::open(&fs, &ids, Path::new("/store")).unwrap();
        store.link_comment(comment(7, "<a@x>")).unwrap();
        store.link_comment(comment(8, "<a@x>")).unwrap();
        assert!(store.link_comment(comment(7, "<a@x>")).is_err());

        assert!(store.has_comment(7, "<a@x>").unwrap());
        assert!(!store.has_comment(7, "<b@x>").unwrap());
        assert_eq!(store.comments_for(7).len(), 1);
        assert!(fs.get("/store/watches.yaml").unwrap().contains("<a@x>"));
    }
}
