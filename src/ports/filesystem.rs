//! Filesystem port for file I/O operations.

use std::path::Path;

/// Provides filesystem access for the local debbugs mirror and the watch store.
pub trait FileSystem: Send + Sync {
    /// Reads a file as text. Invalid UTF-8 sequences are replaced rather than
    /// rejected, since mirrored mail logs routinely carry legacy encodings.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    fn read_to_string(
        &self,
        path: &Path,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;

    /// Writes the given contents to a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails (permissions, disk full, etc.).
    fn write(
        &self,
        path: &Path,
        contents: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Returns `true` if the path exists.
    fn exists(&self, path: &Path) -> bool;
}
