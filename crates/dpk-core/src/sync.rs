//! Incremental mirroring of the remote catalog into a [`ProfileLibrary`].

use std::collections::HashSet;

use dpk_domain::{Profile, ProfileLibrary, Tag};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::effects::{CatalogClient, RemoteEntry, RemoteRevision};
use crate::error::DpkError;

/// What a synchronization pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub previous_version: i64,
    pub version: i64,
    /// Names of the tags merged by this pass.
    pub merged: Vec<String>,
    /// Revisions whose profile directory could not be listed.
    pub skipped: Vec<SkippedRevision>,
    /// Number of profile files downloaded (cache misses).
    pub fetched: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedRevision {
    pub name: String,
    pub revision: String,
    pub reason: String,
}

/// Brings a library's tag set up to date with a [`CatalogClient`].
pub struct TagSynchronizer<'a> {
    catalog: &'a dyn CatalogClient,
}

impl<'a> TagSynchronizer<'a> {
    #[must_use]
    pub fn new(catalog: &'a dyn CatalogClient) -> Self {
        Self { catalog }
    }

    /// Merges every remote revision the library does not know yet.
    ///
    /// # Errors
    /// Fails when the revision list cannot be fetched or a profile download
    /// fails; nothing is merged in that case. Revisions whose date or profile
    /// directory cannot be read are skipped and reported instead.
    pub fn update(&self, library: &mut ProfileLibrary) -> Result<SyncReport, DpkError> {
        self.update_at(library, OffsetDateTime::now_utc())
    }

    /// [`Self::update`] with an explicit clock for the version stamp.
    ///
    /// # Errors
    /// See [`Self::update`].
    pub fn update_at(
        &self,
        library: &mut ProfileLibrary,
        now: OffsetDateTime,
    ) -> Result<SyncReport, DpkError> {
        info!(known = library.tags().len(), "fetching catalog revisions");
        let revisions = self
            .catalog
            .list_revisions()
            .map_err(|err| DpkError::TransientFetch {
                url: "catalog revisions".to_string(),
                reason: format!("{err:#}"),
            })?;

        let mut report = SyncReport {
            previous_version: library.version(),
            version: library.version(),
            ..SyncReport::default()
        };
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for revision in revisions {
            if library.contains_tag(&revision.revision_hash)
                || !seen.insert(revision.revision_hash.clone())
            {
                continue;
            }
            let (timestamp_millis, entries) = match self.inspect(&revision) {
                Ok(found) => found,
                Err(err) => {
                    warn!(
                        tag = %revision.name,
                        revision = %revision.revision_hash,
                        "malformed tag: {err}"
                    );
                    report.skipped.push(SkippedRevision {
                        name: revision.name,
                        revision: revision.revision_hash,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let mut tag = Tag::new(revision.revision_hash, revision.name, timestamp_millis);
            info!(%tag, "updating");
            for entry in entries {
                let stub = Profile::stub(entry.content_hash, entry.name, entry.download_url);
                let mut fetched = false;
                let content = library
                    .content_cache_mut()
                    .ensure(&stub.content_hash, || {
                        fetched = true;
                        self.catalog.fetch(&stub.source_locator)
                    })
                    .map_err(|err| {
                        warn!(url = %stub.source_locator, "profile download failed: {err:#}");
                        DpkError::TransientFetch {
                            url: stub.source_locator.clone(),
                            reason: format!("{err:#}"),
                        }
                    })?;
                let profile = stub.with_resolved_name(content);
                if fetched {
                    report.fetched += 1;
                }
                debug!(
                    "{}: {} -> {}",
                    tag.name, profile.file_name, profile.display_name
                );
                tag.profiles.push(profile);
            }
            fresh.push(tag);
        }

        report.merged = fresh.iter().map(|tag| tag.name.clone()).collect();
        let merged = library.merge_tags(fresh, now);
        report.version = library.version();
        info!(
            merged,
            skipped = report.skipped.len(),
            version = report.version,
            "{merged} new tags merged"
        );
        Ok(report)
    }

    /// Commit date and profile directory of a revision not yet in the library.
    fn inspect(&self, revision: &RemoteRevision) -> Result<(i64, Vec<RemoteEntry>), DpkError> {
        let malformed = |err: anyhow::Error| DpkError::MalformedRevision {
            name: revision.name.clone(),
            revision: revision.revision_hash.clone(),
            reason: format!("{err:#}"),
        };
        let timestamp = self
            .catalog
            .revision_timestamp(&revision.revision_hash)
            .map_err(malformed)?;
        let entries = self
            .catalog
            .list_directory(&revision.revision_hash)
            .map_err(malformed)?;
        Ok((timestamp, entries))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::testing::StubCatalog;

    const TITLE_A: &[u8] = b"profile_title {Default}\n";
    const TITLE_B: &[u8] = b"profile_title {Blooming espresso}\n";

    fn three_revision_catalog() -> StubCatalog {
        StubCatalog::default()
            .revision("r1", "v1.0", 1_000)
            .revision("r2", "v1.1", 2_000)
            .revision("r3", "v1.2", 3_000)
            .directory("r1", &[("default.tcl", "c-a", TITLE_A)])
            .directory(
                "r2",
                &[("default.tcl", "c-a", TITLE_A), ("bloom.tcl", "c-b", TITLE_B)],
            )
            .directory("r3", &[("bloom.tcl", "c-b", TITLE_B)])
    }

    fn empty_library() -> ProfileLibrary {
        ProfileLibrary::new_at(datetime!(2019-01-01 00:00 UTC))
    }

    #[test]
    fn merges_new_revisions_with_resolved_names() {
        let catalog = three_revision_catalog();
        let mut library = empty_library();
        let report = TagSynchronizer::new(&catalog)
            .update_at(&mut library, datetime!(2020-02-03 04:05 UTC))
            .expect("sync");

        assert_eq!(report.merged.len(), 3);
        assert_eq!(library.tags().len(), 3);
        let r2 = &library.tags()["r2"];
        let names: Vec<(&str, &str)> = r2
            .profiles
            .iter()
            .map(|p| (p.file_name.as_str(), p.display_name.as_str()))
            .collect();
        assert_eq!(
            names,
            [("default.tcl", "Default"), ("bloom.tcl", "Blooming espresso")],
            "directory order is preserved"
        );
        assert_eq!(library.version(), 202_002_030_405);
    }

    #[test]
    fn shared_content_is_fetched_once() {
        let catalog = three_revision_catalog();
        let mut library = empty_library();
        let report = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("sync");

        assert_eq!(catalog.fetch_count("/c-a/"), 1);
        assert_eq!(catalog.fetch_count("/c-b/"), 1);
        assert_eq!(report.fetched, 2);
        assert_eq!(library.content_cache().len(), 2);
    }

    #[test]
    fn malformed_revision_is_skipped_and_others_merge() {
        let mut catalog = three_revision_catalog();
        catalog.directories.remove("r2");
        let mut library = empty_library();
        let report = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("sync");

        assert!(library.contains_tag("r1"));
        assert!(library.contains_tag("r3"));
        assert!(!library.contains_tag("r2"));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "v1.1");
    }

    #[test]
    fn second_pass_without_new_revisions_keeps_version() {
        let catalog = three_revision_catalog();
        let mut library = empty_library();
        let sync = TagSynchronizer::new(&catalog);
        sync.update_at(&mut library, datetime!(2020-01-01 00:00 UTC))
            .expect("first");
        let before = library.clone();

        let report = sync
            .update_at(&mut library, datetime!(2021-01-01 00:00 UTC))
            .expect("second");
        assert!(report.merged.is_empty());
        assert_eq!(library, before);
        assert_eq!(catalog.total_fetches(), 2, "known tags are never re-fetched");
    }

    #[test]
    fn tag_set_only_grows_and_version_strictly_increases() {
        let catalog = StubCatalog::default()
            .revision("r1", "v1.0", 1_000)
            .directory("r1", &[("default.tcl", "c-a", TITLE_A)]);
        let mut library = empty_library();
        let now = datetime!(2020-01-01 00:00 UTC);
        TagSynchronizer::new(&catalog)
            .update_at(&mut library, now)
            .expect("first");
        let first_version = library.version();

        let catalog = catalog
            .revision("r2", "v1.1", 2_000)
            .directory("r2", &[("bloom.tcl", "c-b", TITLE_B)]);
        TagSynchronizer::new(&catalog)
            .update_at(&mut library, now)
            .expect("second, same minute");

        assert!(library.contains_tag("r1"));
        assert!(library.contains_tag("r2"));
        assert!(library.version() > first_version);
    }

    #[test]
    fn download_failure_aborts_the_pass() {
        let catalog = three_revision_catalog().without_file("c-b", "bloom.tcl");
        let mut library = empty_library();
        let before_version = library.version();

        let err = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect_err("download fails");
        assert!(matches!(err, DpkError::TransientFetch { .. }));
        assert!(library.tags().is_empty(), "nothing is merged");
        assert_eq!(library.version(), before_version);
    }

    #[test]
    fn known_revisions_are_not_dated_again() {
        let mut catalog = three_revision_catalog();
        let mut library = empty_library();
        TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("first");
        let before = library.clone();

        catalog.timestamps.clear();
        let report = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("nothing new, nothing looked up");
        assert!(report.merged.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(library, before);
    }

    #[test]
    fn undatable_revision_is_skipped_and_others_merge() {
        let mut catalog = three_revision_catalog();
        catalog.timestamps.remove("r2");
        let mut library = empty_library();
        let report = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("sync");

        assert!(library.contains_tag("r1"));
        assert!(library.contains_tag("r3"));
        assert!(!library.contains_tag("r2"));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].revision, "r2");
        assert!(report.skipped[0].reason.contains("DPK120"), "{}", report.skipped[0].reason);
    }

    #[test]
    fn duplicate_revisions_are_processed_once() {
        let catalog = StubCatalog::default()
            .revision("r1", "v1.0", 1_000)
            .revision("r1", "stable", 1_000)
            .directory("r1", &[("default.tcl", "c-a", TITLE_A)]);
        let mut library = empty_library();
        let report = TagSynchronizer::new(&catalog)
            .update(&mut library)
            .expect("sync");
        assert_eq!(report.merged, ["v1.0"]);
        assert_eq!(library.tags().len(), 1);
    }
}
