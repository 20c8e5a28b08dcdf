//! Random identifiers for persons and imported comments.

use uuid::Uuid;

use crate::ports::IdGenerator;

/// Hands out v4 UUIDs.
#[derive(Default)]
pub struct LiveIdGenerator;

impl LiveIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for LiveIdGenerator {
    fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
