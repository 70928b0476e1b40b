//! Session descriptor persisted for external inspection.
//!
//! The descriptor is written once when a session is created. The manager never
//! reads it back; it exists so tooling browsing the base directory can tell
//! what a session directory belongs to.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FilesystemError;
use crate::session::SessionId;

/// Platform tag recorded in every descriptor.
pub const PLATFORM_TAG: &str = "linux-bubblewrap";

/// Diagnostic metadata for a session, persisted to disk as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Session identifier.
    pub id: SessionId,

    /// When the session was created.
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,

    /// Isolation backend used for the session.
    pub platform: String,
}

impl SessionDescriptor {
    /// Creates a descriptor for the given session.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            platform: PLATFORM_TAG.to_string(),
        }
    }

    /// Loads a descriptor from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if reading fails, or an `InvalidData` error if
    /// the JSON is malformed.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Saves the descriptor to a JSON file atomically.
    ///
    /// Writes to a temporary file first, then renames to the target path
    /// so readers never observe a half-written descriptor.
    ///
    /// # Errors
    ///
    /// Returns `FilesystemError::Descriptor` if writing fails.
    pub fn save(&self, path: &Path) -> Result<(), FilesystemError> {
        let descriptor_error = |source: std::io::Error| FilesystemError::Descriptor {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_string_pretty(self).map_err(|e| {
            descriptor_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).map_err(descriptor_error)?;
        file.write_all(json.as_bytes()).map_err(descriptor_error)?;
        file.sync_all().map_err(descriptor_error)?;

        fs::rename(&temp_path, path).map_err(descriptor_error)?;

        Ok(())
    }
}
