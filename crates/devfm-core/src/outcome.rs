use serde::ser::{Serialize, SerializeMap, Serializer};

use devfm_platform::executor::CommandResult;

use crate::lister::FileEntry;

/// Result of a successful gateway operation.
///
/// Serializes as `{"success": true, ...}`. When elevation was used it
/// carries both `elevated` and the legacy `sudo_used` key the existing
/// front-end reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub elevated: bool,
    /// Set by rename
    pub new_path: Option<String>,
    /// Set by read
    pub content: Option<String>,
}

impl Outcome {
    pub fn native() -> Self {
        Self::default()
    }

    pub fn elevated() -> Self {
        Self {
            elevated: true,
            ..Default::default()
        }
    }

    pub fn with_elevation(elevated: bool) -> Self {
        if elevated {
            Self::elevated()
        } else {
            Self::native()
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("success", &true)?;
        if let Some(content) = &self.content {
            map.serialize_entry("content", content)?;
        }
        if let Some(path) = &self.new_path {
            map.serialize_entry("new_path", path)?;
        }
        if self.elevated {
            map.serialize_entry("elevated", &true)?;
            map.serialize_entry("sudo_used", &true)?;
        }
        map.end()
    }
}

/// Raw bytes of a file read, before JSON or download rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub name: String,
    pub bytes: Vec<u8>,
    pub elevated: bool,
}

impl FileContent {
    /// JSON form; invalid UTF-8 is replaced, use the raw bytes for downloads.
    pub fn into_outcome(self) -> Outcome {
        Outcome {
            elevated: self.elevated,
            new_path: None,
            content: Some(String::from_utf8_lossy(&self.bytes).into_owned()),
        }
    }
}

/// `details` reply for an existing path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileDetails {
    pub exists: bool,
    #[serde(flatten)]
    pub entry: FileEntry,
    /// Octal value the permission editor starts from, e.g. `"644"`
    pub chmod_value: String,
}

/// Reply of the maintenance actions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MaintenanceReport {
    /// Every command exited with status 0
    pub success: bool,
    pub results: Vec<CommandResult>,
}

impl MaintenanceReport {
    pub fn from_results(results: Vec<CommandResult>) -> Self {
        Self {
            success: results.iter().all(CommandResult::success),
            results,
        }
    }
}
