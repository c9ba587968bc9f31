//! Shared state for one open installation.

use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dpk_domain::ProfileLibrary;
use tracing::{info, warn};

use crate::archive::{RestoreReport, SnapshotName, SnapshotStore};
use crate::config::Config;
use crate::effects::CatalogClient;
use crate::error::DpkError;
use crate::github::GithubCatalog;
use crate::installation::{install_profiles, InstallReport, Installation};
use crate::library_store::{self, LibrarySource, SelfUpdate};
use crate::sync::{SyncReport, TagSynchronizer};

/// The installation, its library and snapshots, and the catalog when online.
///
/// Library and snapshot store are each behind their own lock so at most one
/// job mutates either at a time.
pub struct Session {
    installation: Installation,
    library: Mutex<ProfileLibrary>,
    library_source: LibrarySource,
    snapshots: Mutex<SnapshotStore>,
    catalog: Option<Arc<dyn CatalogClient>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Opens the configured installation and prepares its library.
    ///
    /// # Errors
    /// Fails when no installation root is configured, it is not an
    /// installation, or the library cannot be loaded or installed.
    pub fn open(config: &Config) -> Result<Self, DpkError> {
        let root = config
            .installation()
            .root
            .clone()
            .ok_or_else(|| DpkError::InvalidInstallation {
                path: "<unset>".to_string(),
                reason: "no installation root configured".to_string(),
            })?;
        let installation = Installation::open(root)?;

        let catalog: Option<Arc<dyn CatalogClient>> = if config.network().online {
            match GithubCatalog::new(config.catalog(), config.network().timeout) {
                Ok(client) => Some(Arc::new(client)),
                Err(err) => {
                    warn!("catalog client unavailable: {err:#}");
                    None
                }
            }
        } else {
            info!("offline; catalog disabled");
            None
        };

        let stock = match &config.installation().stock_library {
            Some(path) => Some(fs::read(path).map_err(|err| DpkError::Io {
                dir: path
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                reason: err.to_string(),
            })?),
            None => None,
        };
        Self::with_catalog(installation, stock.as_deref(), catalog)
    }

    /// Assembles a session around an already opened installation.
    ///
    /// # Errors
    /// Fails when the library cannot be loaded or installed.
    pub fn with_catalog(
        installation: Installation,
        stock_library: Option<&[u8]>,
        catalog: Option<Arc<dyn CatalogClient>>,
    ) -> Result<Self, DpkError> {
        let (library, library_source) =
            library_store::load_or_install(installation.backup_dir(), stock_library)?;
        let mut snapshots = SnapshotStore::new(Box::new(installation.backup_dir().clone()));
        if let Err(err) = snapshots.ensure_initial(installation.profile_dir()) {
            warn!("initial backup failed: {err}");
        }
        Ok(Self {
            installation,
            library: Mutex::new(library),
            library_source,
            snapshots: Mutex::new(snapshots),
            catalog,
        })
    }

    #[must_use]
    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    #[must_use]
    pub fn library_source(&self) -> LibrarySource {
        self.library_source
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.catalog.is_some()
    }

    /// The catalog client.
    ///
    /// # Errors
    /// Returns [`DpkError::NotInitialized`] when running offline.
    pub fn catalog(&self) -> Result<&dyn CatalogClient, DpkError> {
        self.catalog.as_deref().ok_or(DpkError::NotInitialized)
    }

    /// Runs `f` against the library while holding its lock.
    pub fn with_library<R>(&self, f: impl FnOnce(&ProfileLibrary) -> R) -> R {
        let library = lock(&self.library);
        f(&*library)
    }

    /// Mirrors new catalog revisions into the library and persists it.
    ///
    /// The in-memory library only changes once the merged library is on disk.
    ///
    /// # Errors
    /// Fails when offline, the catalog cannot be reached, or persisting fails.
    pub fn sync(&self) -> Result<SyncReport, DpkError> {
        let catalog = self.catalog()?;
        let mut library = lock(&self.library);
        let mut updated = library.clone();
        let report = TagSynchronizer::new(catalog).update(&mut updated)?;
        if !report.merged.is_empty() {
            library_store::install(self.installation.backup_dir(), &updated)?;
            *library = updated;
        }
        Ok(report)
    }

    /// Replaces the library with the newest published one, if newer.
    ///
    /// # Errors
    /// Fails when offline or the release cannot be fetched, decoded or installed.
    pub fn self_update(&self) -> Result<SelfUpdate, DpkError> {
        let catalog = self.catalog()?;
        let mut library = lock(&self.library);
        library_store::self_update(self.installation.backup_dir(), catalog, &mut library)
    }

    /// Installs profiles of the tag matching `query` into the profile folder.
    ///
    /// # Errors
    /// Returns [`DpkError::UnknownTag`] when no tag matches.
    pub fn install(&self, query: &str, files: &[String]) -> Result<InstallReport, DpkError> {
        let library = lock(&self.library);
        let tag = library
            .find_tag(query)
            .ok_or_else(|| DpkError::UnknownTag(query.to_string()))?;
        Ok(install_profiles(
            &library,
            tag,
            files,
            self.installation.profile_dir(),
        ))
    }

    /// Backs up the profile folder.
    ///
    /// # Errors
    /// Fails when the folder cannot be listed or the snapshot cannot be written.
    pub fn backup(&self) -> Result<SnapshotName, DpkError> {
        let mut store = lock(&self.snapshots);
        let name = store.create(self.installation.profile_dir())?.name();
        Ok(name)
    }

    /// Names of the stored snapshots, oldest first.
    ///
    /// # Errors
    /// Fails when the backup folder cannot be listed.
    pub fn snapshots(&self) -> Result<Vec<SnapshotName>, DpkError> {
        let mut store = lock(&self.snapshots);
        let names = store.list()?.iter().map(|snapshot| snapshot.name()).collect();
        Ok(names)
    }

    /// Restores a snapshot into the profile folder; `latest` picks the newest.
    ///
    /// # Errors
    /// Returns [`DpkError::UnknownSnapshot`] when no snapshot matches.
    pub fn restore(&self, snapshot: &str) -> Result<RestoreReport, DpkError> {
        let mut store = lock(&self.snapshots);
        let file_name = if snapshot == "latest" {
            store
                .latest()?
                .ok_or_else(|| DpkError::UnknownSnapshot(snapshot.to_string()))?
        } else {
            snapshot.to_string()
        };
        store.restore(&file_name, self.installation.profile_dir())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::effects::BlobDir;
    use crate::testing::StubCatalog;
    use crate::worker::BackgroundWorker;

    fn installation(root: &Path) -> Installation {
        fs::write(root.join("version.tcl"), "package provide de1 1.34\n").unwrap();
        fs::create_dir_all(root.join("profiles")).unwrap();
        fs::write(root.join("profiles").join("mine.tcl"), b"profile_title {Mine}\n").unwrap();
        Installation::open(root).unwrap()
    }

    fn catalog() -> Arc<dyn CatalogClient> {
        Arc::new(
            StubCatalog::default()
                .revision("r1", "v1.34", 1_577_836_800_000)
                .directory("r1", &[("default.tcl", "c-a", b"profile_title {Default}\n")]),
        )
    }

    #[test]
    fn opening_takes_an_initial_backup() {
        let temp = tempfile::tempdir().unwrap();
        let session = Session::with_catalog(installation(temp.path()), None, None).unwrap();
        assert_eq!(session.snapshots().unwrap().len(), 1);
        assert_eq!(session.library_source(), LibrarySource::Empty);

        let reopened = Session::with_catalog(Installation::open(temp.path()).unwrap(), None, None)
            .unwrap();
        assert_eq!(reopened.snapshots().unwrap().len(), 1);
    }

    #[test]
    fn offline_session_reports_not_initialized() {
        let temp = tempfile::tempdir().unwrap();
        let session = Session::with_catalog(installation(temp.path()), None, None).unwrap();
        assert_eq!(session.sync().unwrap_err(), DpkError::NotInitialized);
        assert_eq!(session.self_update().unwrap_err(), DpkError::NotInitialized);
    }

    #[test]
    fn sync_persists_and_install_writes_profiles() {
        let temp = tempfile::tempdir().unwrap();
        let session =
            Session::with_catalog(installation(temp.path()), None, Some(catalog())).unwrap();
        let report = session.sync().unwrap();
        assert_eq!(report.merged, ["v1.34"]);

        let reopened = Session::with_catalog(Installation::open(temp.path()).unwrap(), None, None)
            .unwrap();
        assert!(reopened.with_library(|library| library.contains_tag("r1")));

        let installed = reopened.install("v1.34", &[]).unwrap();
        assert_eq!(installed.installed, ["default.tcl"]);
        assert_eq!(
            reopened.installation().profile_dir().read("default.tcl").unwrap(),
            b"profile_title {Default}\n"
        );
        assert_eq!(
            reopened.install("v9", &[]).unwrap_err(),
            DpkError::UnknownTag("v9".into())
        );
    }

    #[test]
    fn failed_persist_leaves_library_untouched_and_retries() {
        let temp = tempfile::tempdir().unwrap();
        let session =
            Session::with_catalog(installation(temp.path()), None, Some(catalog())).unwrap();
        let library_file = temp.path().join("_profile_backup").join("profiles.json.gz");
        fs::remove_file(&library_file).unwrap();
        fs::create_dir(&library_file).unwrap();

        assert_eq!(session.sync().unwrap_err().code(), "DPK200");
        assert!(!session.with_library(|library| library.contains_tag("r1")));

        fs::remove_dir(&library_file).unwrap();
        let report = session.sync().unwrap();
        assert_eq!(report.merged, ["v1.34"]);
        assert!(library_file.is_file());
    }

    #[test]
    fn restore_latest_undoes_changes() {
        let temp = tempfile::tempdir().unwrap();
        let session = Session::with_catalog(installation(temp.path()), None, None).unwrap();
        let profiles = session.installation().profile_dir();
        profiles.write("mine.tcl", b"profile_title {Broken}\n").unwrap();

        let report = session.restore("latest").unwrap();
        assert_eq!(report.written, ["mine.tcl"]);
        assert_eq!(profiles.read("mine.tcl").unwrap(), b"profile_title {Mine}\n");
    }

    #[test]
    fn jobs_share_the_session_through_the_worker() {
        let temp = tempfile::tempdir().unwrap();
        let session = Arc::new(
            Session::with_catalog(installation(temp.path()), None, Some(catalog())).unwrap(),
        );
        let worker = BackgroundWorker::spawn().unwrap();
        let sync = {
            let session = Arc::clone(&session);
            worker.submit("sync", move || session.sync())
        };
        let backup = {
            let session = Arc::clone(&session);
            worker.submit("backup", move || session.backup())
        };
        assert_eq!(sync.wait().unwrap().merged.len(), 1);
        assert_eq!(backup.wait().unwrap().entry_count, 1);
        assert_eq!(session.snapshots().unwrap().len(), 2);
    }
}
