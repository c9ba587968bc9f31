use serde::{Deserialize, Serialize};

/// Line prefix that carries a profile's human-readable title.
pub const TITLE_MARKER: &str = "profile_title";

/// Name reported for files without a title line.
pub const UNKNOWN_TITLE: &str = "?";

/// A single profile file as it appeared in one catalog revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "sha")]
    pub content_hash: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "profileName")]
    pub display_name: String,
    #[serde(rename = "downloadLink")]
    pub source_locator: String,
}

impl Profile {
    /// A profile whose title has not been resolved yet.
    #[must_use]
    pub fn stub(
        content_hash: impl Into<String>,
        file_name: impl Into<String>,
        source_locator: impl Into<String>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            file_name: file_name.into(),
            display_name: String::new(),
            source_locator: source_locator.into(),
        }
    }

    /// Fills in the display name from the profile's own bytes.
    #[must_use]
    pub fn with_resolved_name(mut self, content: &[u8]) -> Self {
        self.display_name = resolve_display_name(content);
        self
    }
}

/// Scans profile text for the first `profile_title` line and returns the title.
///
/// Everything after the first space is the title, with Tcl braces blanked out.
#[must_use]
pub fn resolve_display_name(content: &[u8]) -> String {
    let text = String::from_utf8_lossy(content);
    text.lines()
        .find(|line| line.starts_with(TITLE_MARKER))
        .map_or_else(
            || UNKNOWN_TITLE.to_string(),
            |line| {
                let rest = line.find(' ').map_or("", |idx| &line[idx..]);
                rest.replace(['{', '}'], " ").trim().to_string()
            },
        )
}
