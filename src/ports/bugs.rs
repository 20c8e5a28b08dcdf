//! Bug repository port: the slice of the local bug database the engine touches.

use crate::model::{BugWatch, ImportedComment, Person};

/// Read/write surface of the local bug database.
///
/// The engine never reads bugs or tasks; it writes back watch state as soon
/// as each watch is updated and, for trackers that import comments, resolves
/// senders and links messages.
pub trait BugRepository: Send + Sync {
    /// Persists the current state of a watch.
    ///
    /// # Errors
    ///
    /// Returns an error if the watch cannot be written.
    fn save_watch(&self, watch: &BugWatch) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Returns the person registered under `email`, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the person cannot be looked up or created.
    fn ensure_person(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<Person, Box<dyn std::error::Error + Send + Sync>>;

    /// Returns `true` if a comment with `message_id` is already linked to `local_bug`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn has_comment(
        &self,
        local_bug: u64,
        message_id: &str,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;

    /// Links a comment to its local bug.
    ///
    /// # Errors
    ///
    /// Returns an error if the comment cannot be stored.
    fn link_comment(
        &self,
        comment: ImportedComment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Allocates an identifier for a new comment.
    fn new_comment_id(&self) -> String;
}
