use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::codec::BlobMap;

/// Permanent content mirror keyed by content hash.
///
/// Each hash is stored once no matter how many profiles reference it, and
/// entries are never evicted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentCache {
    entries: BlobMap,
}

impl ContentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes for `hash`, invoking `fetch` only when they are absent.
    ///
    /// # Errors
    /// Returns the fetch error unchanged; the hash stays absent in that case.
    pub fn ensure<F, E>(&mut self, hash: &str, fetch: F) -> Result<&[u8], E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        match self.entries.0.entry(hash.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_slice()),
            Entry::Vacant(entry) => {
                let bytes = fetch()?;
                trace!(hash, bytes = bytes.len(), "content cached");
                Ok(entry.insert(bytes).as_slice())
            }
        }
    }

    #[must_use]
    pub fn get(&self, hash: &str) -> Option<&[u8]> {
        self.entries.get(hash)
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.0.contains_key(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of cached bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, bytes)| bytes.len() as u64).sum()
    }
}
