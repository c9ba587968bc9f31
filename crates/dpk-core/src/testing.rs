//! In-memory collaborators shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::effects::{BlobDir, CatalogClient, RemoteEntry, RemoteRelease, RemoteRevision};

#[derive(Default)]
pub(crate) struct MemoryBlobDir {
    label: String,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    unreadable: BTreeSet<String>,
    unwritable: BTreeSet<String>,
    writes: Mutex<usize>,
}

impl MemoryBlobDir {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn with_files(label: &str, files: &[(&str, &[u8])]) -> Self {
        let dir = Self::new(label);
        {
            let mut blobs = dir.blobs.lock().unwrap();
            for (name, bytes) in files {
                blobs.insert((*name).to_string(), bytes.to_vec());
            }
        }
        dir
    }

    pub(crate) fn failing_reads(mut self, name: &str) -> Self {
        self.unreadable.insert(name.to_string());
        self
    }

    pub(crate) fn failing_writes(mut self, name: &str) -> Self {
        self.unwritable.insert(name.to_string());
        self
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.blobs.lock().unwrap().clone()
    }

    pub(crate) fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl BlobDir for MemoryBlobDir {
    fn list(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.blobs.lock().unwrap().keys().cloned().collect();
        names.extend(self.unreadable.iter().cloned());
        Ok(names.into_iter().collect())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        if self.unreadable.contains(name) {
            bail!("permission denied: {name}");
        }
        self.blobs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no such blob: {name}"))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.unwritable.contains(name) {
            bail!("read-only file system: {name}");
        }
        *self.writes.lock().unwrap() += 1;
        self.blobs
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(name)
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }
}

/// A scripted catalog that counts downloads per URL.
#[derive(Default)]
pub(crate) struct StubCatalog {
    pub(crate) revisions: Vec<RemoteRevision>,
    pub(crate) timestamps: HashMap<String, i64>,
    pub(crate) directories: HashMap<String, Vec<RemoteEntry>>,
    pub(crate) files: HashMap<String, Vec<u8>>,
    pub(crate) releases: Vec<RemoteRelease>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl StubCatalog {
    pub(crate) fn revision(mut self, hash: &str, name: &str, ts: i64) -> Self {
        self.revisions.push(RemoteRevision {
            revision_hash: hash.to_string(),
            name: name.to_string(),
        });
        self.timestamps.insert(hash.to_string(), ts);
        self
    }

    /// Registers a revision directory; each file is `(name, content hash, bytes)`.
    pub(crate) fn directory(mut self, hash: &str, files: &[(&str, &str, &[u8])]) -> Self {
        let mut entries = Vec::new();
        for (name, content_hash, bytes) in files {
            let url = format!("https://raw.example.invalid/{content_hash}/{name}");
            self.files.insert(url.clone(), bytes.to_vec());
            entries.push(RemoteEntry {
                content_hash: (*content_hash).to_string(),
                name: (*name).to_string(),
                download_url: url,
            });
        }
        self.directories.insert(hash.to_string(), entries);
        self
    }

    pub(crate) fn without_file(mut self, content_hash: &str, name: &str) -> Self {
        self.files
            .remove(&format!("https://raw.example.invalid/{content_hash}/{name}"));
        self
    }

    pub(crate) fn fetch_count(&self, url_fragment: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains(url_fragment))
            .map(|(_, count)| *count)
            .sum()
    }

    pub(crate) fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

impl CatalogClient for StubCatalog {
    fn list_revisions(&self) -> Result<Vec<RemoteRevision>> {
        Ok(self.revisions.clone())
    }

    fn revision_timestamp(&self, revision: &str) -> Result<i64> {
        self.timestamps
            .get(revision)
            .copied()
            .ok_or_else(|| anyhow!("HTTP 422 for commit {revision}"))
    }

    fn list_directory(&self, revision: &str) -> Result<Vec<RemoteEntry>> {
        self.directories
            .get(revision)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for contents at {revision}"))
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 Not Found for {url}"))
    }

    fn list_releases(&self) -> Result<Vec<RemoteRelease>> {
        Ok(self.releases.clone())
    }
}
