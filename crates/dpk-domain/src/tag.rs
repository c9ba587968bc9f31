use std::fmt;

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

use crate::profile::Profile;

/// One revision of the upstream profile catalog and the profiles it held.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "sha")]
    pub revision_hash: String,
    pub name: String,
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Tag {
    #[must_use]
    pub fn new(revision_hash: impl Into<String>, name: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            revision_hash: revision_hash.into(),
            name: name.into(),
            timestamp_millis,
            profiles: Vec::new(),
        }
    }

    #[must_use]
    pub fn date(&self) -> Option<OffsetDateTime> {
        millis_to_datetime(self.timestamp_millis)
    }

    /// `"{name} at {yyyy/MM/dd}, {n} profile(s)"`, the form installed versions are matched against.
    #[must_use]
    pub fn label(&self) -> String {
        let date = self
            .date()
            .and_then(|dt| dt.format(format_description!("[year]/[month]/[day]")).ok())
            .unwrap_or_else(|| "?".to_string());
        format!("{} at {date}, {} profile(s)", self.name, self.profiles.len())
    }

    #[must_use]
    pub fn profile(&self, file_name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.file_name == file_name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag{{{}({}), {}, {} profile(s)}}",
            self.name,
            self.revision_hash,
            self.timestamp_millis,
            self.profiles.len()
        )
    }
}

/// Epoch milliseconds as a UTC timestamp.
#[must_use]
pub fn millis_to_datetime(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}
