//! Backend configuration.

/// Engine tag reported by every backend built from this crate.
pub const ENGINE: &str = "indexeddb";

/// Configuration for a backend.
///
/// Immutable once handed to [`crate::Backend::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Name of the database to open.
    pub name: String,

    /// Minimum version to open the database at.
    ///
    /// `None` opens at the stored version (1 for a new database). A value
    /// above the stored version runs an upgrade cycle on connect.
    pub version: Option<u32>,

    /// Engine tag, always [`ENGINE`].
    pub engine: &'static str,
}

impl BackendConfig {
    /// Creates a configuration for the named database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            engine: ENGINE,
        }
    }

    /// Sets the minimum version to open at.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Version requested on connect when the database is at `current`.
    pub(crate) fn target_version(&self, current: u32) -> u32 {
        current.max(self.version.unwrap_or(1)).max(1)
    }
}
