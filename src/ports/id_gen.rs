//! ID generator port for producing unique identifiers.

/// Generates unique identifiers for records the engine creates, such as
/// persons and imported comments.
pub trait IdGenerator: Send + Sync {
    /// Generates a new unique identifier string.
    fn generate_id(&self) -> String;
}
