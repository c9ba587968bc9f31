use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::codec::{decode_document, encode_document, CodecError};
use crate::content_cache::ContentCache;
use crate::profile::Profile;
use crate::tag::Tag;

/// Canonical file name of a persisted library.
pub const PROFILE_LIB_FILE: &str = "profiles.json.gz";

/// Every known catalog revision plus the deduplicated content they reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLibrary {
    version: i64,
    #[serde(default)]
    tags: BTreeMap<String, Tag>,
    #[serde(default)]
    content_cache: ContentCache,
}

impl Default for ProfileLibrary {
    fn default() -> Self {
        Self::new_at(OffsetDateTime::now_utc())
    }
}

impl ProfileLibrary {
    /// An empty library stamped with `now`.
    #[must_use]
    pub fn new_at(now: OffsetDateTime) -> Self {
        Self::from_parts(version_stamp(now), BTreeMap::new(), ContentCache::new())
    }

    #[must_use]
    pub fn from_parts(version: i64, tags: BTreeMap<String, Tag>, content_cache: ContentCache) -> Self {
        Self {
            version,
            tags,
            content_cache,
        }
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, Tag> {
        &self.tags
    }

    #[must_use]
    pub fn contains_tag(&self, revision_hash: &str) -> bool {
        self.tags.contains_key(revision_hash)
    }

    #[must_use]
    pub fn content_cache(&self) -> &ContentCache {
        &self.content_cache
    }

    pub fn content_cache_mut(&mut self) -> &mut ContentCache {
        &mut self.content_cache
    }

    /// Cached bytes of `profile`, if its content has been mirrored.
    #[must_use]
    pub fn content_for(&self, profile: &Profile) -> Option<&[u8]> {
        self.content_cache.get(&profile.content_hash)
    }

    /// Tags ordered newest first.
    #[must_use]
    pub fn tags_as_list(&self) -> Vec<&Tag> {
        let mut tags: Vec<&Tag> = self.tags.values().collect();
        tags.sort_by(|lhs, rhs| {
            rhs.timestamp_millis
                .cmp(&lhs.timestamp_millis)
                .then_with(|| lhs.revision_hash.cmp(&rhs.revision_hash))
        });
        tags
    }

    /// Finds a tag by exact name, or by a unique revision-hash prefix.
    #[must_use]
    pub fn find_tag(&self, query: &str) -> Option<&Tag> {
        if let Some(tag) = self.tags_as_list().into_iter().find(|tag| tag.name == query) {
            return Some(tag);
        }
        if let Some(tag) = self.tags.get(query) {
            return Some(tag);
        }
        let mut matches = self
            .tags
            .values()
            .filter(|tag| query.len() >= 7 && tag.revision_hash.starts_with(query));
        match (matches.next(), matches.next()) {
            (Some(tag), None) => Some(tag),
            _ => None,
        }
    }

    /// Adds tags that are not yet known and bumps the version when anything was added.
    ///
    /// Returns the number of tags merged. Known revisions are left untouched.
    pub fn merge_tags(&mut self, tags: impl IntoIterator<Item = Tag>, now: OffsetDateTime) -> usize {
        let mut merged = 0;
        for tag in tags {
            if self.tags.contains_key(&tag.revision_hash) {
                continue;
            }
            self.tags.insert(tag.revision_hash.clone(), tag);
            merged += 1;
        }
        if merged > 0 {
            let previous = self.version;
            self.version = next_version(previous, now);
            debug!(merged, previous, version = self.version, "library version bumped");
        }
        merged
    }

    /// Whether `self` should replace `other`.
    #[must_use]
    pub fn is_upgrade_over(&self, other: &Self) -> bool {
        self.version > other.version
    }

    /// Reads a gzip-compressed library document.
    ///
    /// # Errors
    /// Returns an error when the stream is not a valid library document.
    pub fn load<R: Read>(reader: R) -> Result<Self, CodecError> {
        decode_document(reader)
    }

    /// Writes the library as a gzip-compressed document.
    ///
    /// # Errors
    /// Returns an error when serialization or the stream fails.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), CodecError> {
        encode_document(self, writer)
    }
}

/// `yyyyMMddHHmm` of `now` as an integer.
#[must_use]
pub fn version_stamp(now: OffsetDateTime) -> i64 {
    i64::from(now.year()) * 100_000_000
        + i64::from(u8::from(now.month())) * 1_000_000
        + i64::from(now.day()) * 10_000
        + i64::from(now.hour()) * 100
        + i64::from(now.minute())
}

/// The version following `previous` at `now`; strictly greater even within one
/// minute, saturating at `i64::MAX`.
#[must_use]
pub fn next_version(previous: i64, now: OffsetDateTime) -> i64 {
    version_stamp(now).max(previous.saturating_add(1))
}
