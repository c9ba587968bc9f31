#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! Synchronization, backup and installation services for DE1 profiles.

pub mod archive;
pub mod commands;
pub mod config;
pub mod effects;
pub mod error;
pub mod fs;
pub mod github;
pub mod installation;
pub mod library_store;
pub mod outcome;
pub mod session;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

pub use archive::{
    restore_snapshot, RestoreReport, Snapshot, SnapshotName, SnapshotStore, BACKUP_DIRECTORY_NAME,
    SNAPSHOT_CONTENT_TYPE, SNAPSHOT_EXT,
};
pub use commands::{execute, run, CommandContext, DpkCommand};
pub use config::{CatalogConfig, Config, GlobalOptions, InstallationConfig, NetworkConfig};
pub use effects::{BlobDir, CatalogClient, ReleaseAsset, RemoteEntry, RemoteRelease, RemoteRevision};
pub use error::DpkError;
pub use fs::FsBlobDir;
pub use github::GithubCatalog;
pub use installation::{
    install_profiles, match_tag, InstallReport, InstalledProfile, Installation,
    PROFILE_DIRECTORY_NAME, VERSION_FILE,
};
pub use library_store::{latest_prerelease, load_or_install, LibrarySource, SelfUpdate};
pub use outcome::{CommandStatus, ExecutionOutcome};
pub use session::Session;
pub use sync::{SkippedRevision, SyncReport, TagSynchronizer};
pub use worker::{BackgroundWorker, JobHandle};

pub use dpk_domain::{Profile, ProfileLibrary, Tag};
