//! Collaborators the core consumes: a blob directory and a remote profile catalog.

use anyhow::Result;
use serde::Deserialize;

/// A directory of named byte blobs.
pub trait BlobDir: Send + Sync {
    /// Names of the blobs directly under this directory.
    fn list(&self) -> Result<Vec<String>>;
    fn read(&self, name: &str) -> Result<Vec<u8>>;
    /// Creates the blob if absent, otherwise truncates and overwrites it.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
    fn exists(&self, name: &str) -> bool;
    /// Human-readable location, used in logs and error messages.
    fn describe(&self) -> String;
}

/// One revision of the remote catalog, as listed; its date is looked up separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRevision {
    pub revision_hash: String,
    pub name: String,
}

/// A file in a revision's profile directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub content_hash: String,
    pub name: String,
    pub download_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RemoteRelease {
    pub prerelease: bool,
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub browser_download_url: String,
}

/// Read access to the upstream profile catalog.
pub trait CatalogClient: Send + Sync {
    fn list_revisions(&self) -> Result<Vec<RemoteRevision>>;
    /// Commit time of `revision` in epoch milliseconds.
    fn revision_timestamp(&self, revision: &str) -> Result<i64>;
    /// Lists the profile directory as of `revision`; fails for incompatible revisions.
    fn list_directory(&self, revision: &str) -> Result<Vec<RemoteEntry>>;
    /// Downloads raw bytes; anything but HTTP 200 is an error.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
    fn list_releases(&self) -> Result<Vec<RemoteRelease>>;
}
