//! Point-in-time compressed backups of a profile directory.

use std::fmt;

use dpk_domain::{decode_document, encode_document, millis_to_datetime, BlobMap};
use serde::Serialize;
use time::{macros::format_description, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::effects::BlobDir;
use crate::error::DpkError;

/// Directory, under an installation root, that holds snapshots and the library.
pub const BACKUP_DIRECTORY_NAME: &str = "_profile_backup";
pub const SNAPSHOT_EXT: &str = ".pbackup";
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/de1_backup";

/// Creation time and file count, encoded in the snapshot's file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnapshotName {
    pub created_at_millis: i64,
    pub entry_count: usize,
}

impl SnapshotName {
    #[must_use]
    pub fn new(created_at_millis: i64, entry_count: usize) -> Self {
        Self {
            created_at_millis,
            entry_count,
        }
    }

    /// Parses `"{millis}_{count}.pbackup"`.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(SNAPSHOT_EXT)?;
        let (millis, count) = stem.split_once('_')?;
        Some(Self {
            created_at_millis: millis.parse().ok()?,
            entry_count: count.parse().ok()?,
        })
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}{SNAPSHOT_EXT}",
            self.created_at_millis, self.entry_count
        )
    }

    #[must_use]
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        millis_to_datetime(self.created_at_millis)
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .created_at()
            .and_then(|dt| {
                dt.format(format_description!(
                    "[year]/[month]/[day] [hour]:[minute]:[second]"
                ))
                .ok()
            })
            .unwrap_or_else(|| self.created_at_millis.to_string());
        write!(f, "{time} ({} profiles)", self.entry_count)
    }
}

enum SnapshotState {
    /// Freshly created; entries may still be added.
    Building(BlobMap),
    /// Listed from storage but not read yet.
    Unloaded,
    /// Written or loaded; entries are frozen.
    Sealed(BlobMap),
}

/// One backup of a profile directory.
pub struct Snapshot {
    name: SnapshotName,
    state: SnapshotState,
}

impl Snapshot {
    /// A new, still mutable snapshot.
    #[must_use]
    pub fn building(name: SnapshotName) -> Self {
        Self {
            name,
            state: SnapshotState::Building(BlobMap::new()),
        }
    }

    fn unloaded(name: SnapshotName) -> Self {
        Self {
            name,
            state: SnapshotState::Unloaded,
        }
    }

    #[must_use]
    pub fn name(&self) -> SnapshotName {
        self.name
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        self.name.file_name()
    }

    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self.state, SnapshotState::Building(_))
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !matches!(self.state, SnapshotState::Unloaded)
    }

    /// Entries held in memory; `None` until an unloaded snapshot is loaded.
    #[must_use]
    pub fn entries(&self) -> Option<&BlobMap> {
        match &self.state {
            SnapshotState::Building(entries) | SnapshotState::Sealed(entries) => Some(entries),
            SnapshotState::Unloaded => None,
        }
    }

    /// Adds or replaces one entry.
    ///
    /// # Errors
    /// Returns [`DpkError::IllegalMutation`] unless the snapshot is still being built.
    pub fn add_entry(&mut self, file_name: &str, content: Vec<u8>) -> Result<(), DpkError> {
        match &mut self.state {
            SnapshotState::Building(entries) => {
                debug!(file = file_name, bytes = content.len(), "profile added");
                entries.0.insert(file_name.to_string(), content);
                Ok(())
            }
            SnapshotState::Unloaded | SnapshotState::Sealed(_) => Err(DpkError::IllegalMutation {
                name: self.name.file_name(),
            }),
        }
    }

    /// Persists a snapshot under construction into `dir` and seals it.
    ///
    /// # Errors
    /// Fails when the snapshot is not being built or the blob cannot be written.
    pub fn write(&mut self, dir: &dyn BlobDir) -> Result<(), DpkError> {
        let SnapshotState::Building(entries) = &self.state else {
            return Err(DpkError::IllegalMutation {
                name: self.file_name(),
            });
        };
        let file_name = self.file_name();
        let mut buf = Vec::new();
        encode_document(entries, &mut buf).map_err(|err| DpkError::Io {
            dir: dir.describe(),
            name: file_name.clone(),
            reason: err.to_string(),
        })?;
        dir.write(&file_name, &buf)
            .map_err(|err| DpkError::io(dir.describe(), &file_name, &err))?;

        let state = std::mem::replace(&mut self.state, SnapshotState::Unloaded);
        if let SnapshotState::Building(entries) = state {
            self.state = SnapshotState::Sealed(entries);
        }
        Ok(())
    }

    /// Reads the entries of a listed snapshot from `dir`; a no-op once loaded.
    ///
    /// # Errors
    /// Fails when the blob cannot be read or decoded.
    pub fn load(&mut self, dir: &dyn BlobDir) -> Result<&BlobMap, DpkError> {
        if matches!(self.state, SnapshotState::Unloaded) {
            let file_name = self.file_name();
            let bytes = dir
                .read(&file_name)
                .map_err(|err| DpkError::io(dir.describe(), &file_name, &err))?;
            let entries: BlobMap = decode_document(bytes.as_slice())
                .map_err(|err| DpkError::decode(format!("snapshot {file_name}"), &err))?;
            self.state = SnapshotState::Sealed(entries);
        }
        match &self.state {
            SnapshotState::Building(entries) | SnapshotState::Sealed(entries) => Ok(entries),
            SnapshotState::Unloaded => Err(DpkError::Decode {
                what: format!("snapshot {}", self.file_name()),
                reason: "entries unavailable".to_string(),
            }),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("name", &self.file_name())
            .field("loaded", &self.is_loaded())
            .field("mutable", &self.is_mutable())
            .finish()
    }
}

/// Outcome of writing a snapshot back into a directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub snapshot: String,
    pub written: Vec<String>,
    pub failed: Vec<String>,
}

/// Writes every entry of `snapshot` into `dest`, loading it from `backup_dir` first if needed.
///
/// Individual write failures are logged and skipped.
///
/// # Errors
/// Fails only when the snapshot itself cannot be loaded.
pub fn restore_snapshot(
    snapshot: &mut Snapshot,
    backup_dir: &dyn BlobDir,
    dest: &dyn BlobDir,
) -> Result<RestoreReport, DpkError> {
    let file_name = snapshot.file_name();
    let entries = snapshot.load(backup_dir)?;
    let mut report = RestoreReport {
        snapshot: file_name,
        ..RestoreReport::default()
    };
    for (name, content) in entries.iter() {
        match dest.write(name, content) {
            Ok(()) => report.written.push(name.to_string()),
            Err(err) => {
                warn!(file = name, dest = %dest.describe(), "restore failed: {err:#}");
                report.failed.push(name.to_string());
            }
        }
    }
    info!(
        snapshot = %report.snapshot,
        written = report.written.len(),
        failed = report.failed.len(),
        "snapshot restored"
    );
    Ok(report)
}

/// The snapshots kept in a backup directory, listed lazily and cached.
pub struct SnapshotStore {
    dir: Box<dyn BlobDir>,
    snapshots: Option<Vec<Snapshot>>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(dir: Box<dyn BlobDir>) -> Self {
        Self {
            dir,
            snapshots: None,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &dyn BlobDir {
        self.dir.as_ref()
    }

    /// Snapshots ordered by creation time, oldest first.
    ///
    /// # Errors
    /// Fails when the backup directory cannot be listed.
    pub fn list(&mut self) -> Result<&[Snapshot], DpkError> {
        Ok(self.listing()?.as_slice())
    }

    fn listing(&mut self) -> Result<&mut Vec<Snapshot>, DpkError> {
        if self.snapshots.is_none() {
            let mut names = self
                .dir
                .list()
                .map_err(|err| DpkError::io(self.dir.describe(), "", &err))?;
            names.retain(|name| name.ends_with(SNAPSHOT_EXT));
            let mut snapshots = Vec::with_capacity(names.len());
            for name in names {
                match SnapshotName::parse(&name) {
                    Some(parsed) => snapshots.push(Snapshot::unloaded(parsed)),
                    None => warn!(file = %name, "ignoring unrecognized backup file"),
                }
            }
            snapshots.sort_by_key(Snapshot::name);
            debug!(count = snapshots.len(), dir = %self.dir.describe(), "snapshots listed");
            self.snapshots = Some(snapshots);
        }
        Ok(self.snapshots.get_or_insert_with(Vec::new))
    }

    /// Backs up every blob of `source`, stamped with the current time.
    ///
    /// # Errors
    /// Fails when `source` cannot be listed or the snapshot cannot be written.
    pub fn create(&mut self, source: &dyn BlobDir) -> Result<&Snapshot, DpkError> {
        let now = OffsetDateTime::now_utc();
        let millis = i64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);
        self.create_at(source, millis)
    }

    /// [`Self::create`] with an explicit creation time.
    ///
    /// Unreadable source blobs are logged and left out; the file name still
    /// counts every blob that was observed.
    ///
    /// # Errors
    /// Fails when `source` cannot be listed or the snapshot cannot be written.
    pub fn create_at(
        &mut self,
        source: &dyn BlobDir,
        created_at_millis: i64,
    ) -> Result<&Snapshot, DpkError> {
        let files = source
            .list()
            .map_err(|err| DpkError::io(source.describe(), "", &err))?;

        let taken: Vec<String> = self.listing()?.iter().map(Snapshot::file_name).collect();
        let mut name = SnapshotName::new(created_at_millis, files.len());
        while taken.contains(&name.file_name()) || self.dir.exists(&name.file_name()) {
            name.created_at_millis += 1;
        }

        let mut snapshot = Snapshot::building(name);
        for file in &files {
            match source.read(file) {
                Ok(content) => snapshot.add_entry(file, content)?,
                Err(err) => warn!(file = %file, source = %source.describe(), "backup skipped: {err:#}"),
            }
        }
        snapshot.write(self.dir.as_ref())?;
        info!(
            snapshot = %snapshot.file_name(),
            captured = snapshot.entries().map_or(0, BlobMap::len),
            observed = files.len(),
            "snapshot created"
        );

        let listing = self.listing()?;
        listing.push(snapshot);
        listing.sort_by_key(Snapshot::name);
        let index = listing
            .iter()
            .position(|s| s.name() == name)
            .unwrap_or(listing.len() - 1);
        Ok(&listing[index])
    }

    /// Creates a first snapshot when the store is empty.
    ///
    /// # Errors
    /// See [`Self::create`].
    pub fn ensure_initial(&mut self, source: &dyn BlobDir) -> Result<Option<SnapshotName>, DpkError> {
        if !self.list()?.is_empty() {
            return Ok(None);
        }
        info!("no snapshots yet; creating an initial backup");
        self.create(source).map(|snapshot| Some(snapshot.name()))
    }

    /// The newest snapshot's file name.
    ///
    /// # Errors
    /// Fails when the backup directory cannot be listed.
    pub fn latest(&mut self) -> Result<Option<String>, DpkError> {
        Ok(self.list()?.last().map(Snapshot::file_name))
    }

    /// Restores the snapshot stored as `file_name` into `dest`.
    ///
    /// # Errors
    /// Fails when no such snapshot exists or it cannot be loaded.
    pub fn restore(&mut self, file_name: &str, dest: &dyn BlobDir) -> Result<RestoreReport, DpkError> {
        self.listing()?;
        let snapshot = self
            .snapshots
            .as_mut()
            .and_then(|list| list.iter_mut().find(|s| s.file_name() == file_name))
            .ok_or_else(|| DpkError::UnknownSnapshot(file_name.to_string()))?;
        restore_snapshot(snapshot, self.dir.as_ref(), dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBlobDir;

    fn store_with(files: &[(&str, &[u8])]) -> SnapshotStore {
        SnapshotStore::new(Box::new(MemoryBlobDir::with_files("backups", files)))
    }

    fn encoded(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let map: BlobMap = entries
            .iter()
            .map(|(name, bytes)| ((*name).to_string(), bytes.to_vec()))
            .collect();
        let mut buf = Vec::new();
        encode_document(&map, &mut buf).expect("encode");
        buf
    }

    #[test]
    fn names_round_trip_through_file_names() {
        let name = SnapshotName::parse("1546300800000_12.pbackup").expect("parse");
        assert_eq!(name, SnapshotName::new(1_546_300_800_000, 12));
        assert_eq!(name.file_name(), "1546300800000_12.pbackup");
        assert_eq!(name.to_string(), "2019/01/01 00:00:00 (12 profiles)");
        assert!(SnapshotName::parse("profiles.json.gz").is_none());
        assert!(SnapshotName::parse("abc_1.pbackup").is_none());
    }

    #[test]
    fn list_is_chronological_and_filtered() {
        let mut store = store_with(&[
            ("2000_3.pbackup", b""),
            ("1000_2.pbackup", b""),
            ("999_1.pbackup", b""),
            ("profiles.json.gz", b""),
            ("notes.txt", b""),
        ]);
        let names: Vec<String> = store.list().expect("list").iter().map(Snapshot::file_name).collect();
        assert_eq!(names, ["999_1.pbackup", "1000_2.pbackup", "2000_3.pbackup"]);
        assert!(store.list().expect("cached").iter().all(|s| !s.is_loaded()));
    }

    #[test]
    fn create_then_restore_reproduces_files() {
        let source = MemoryBlobDir::with_files("profiles", &[("a.txt", b"A"), ("b.txt", b"B")]);
        let mut store = store_with(&[]);
        let created = store.create_at(&source, 1_000).expect("create").file_name();
        assert_eq!(created, "1000_2.pbackup");

        let dest = MemoryBlobDir::new("restore");
        let report = store.restore(&created, &dest).expect("restore");
        assert_eq!(report.written.len(), 2);
        assert_eq!(dest.snapshot(), source.snapshot());
    }

    #[test]
    fn created_snapshot_is_durable() {
        let source = MemoryBlobDir::with_files("profiles", &[("a.txt", b"A"), ("b.txt", b"B")]);
        let backups = MemoryBlobDir::new("backups");
        let mut store = SnapshotStore::new(Box::new(backups));
        store.create_at(&source, 5_000).expect("create");
        let persisted = store.dir().read("5000_2.pbackup").expect("written");
        let decoded: BlobMap = decode_document(persisted.as_slice()).expect("decode");
        assert_eq!(decoded.get("a.txt"), Some(&b"A"[..]));
        assert_eq!(decoded.get("b.txt"), Some(&b"B"[..]));
    }

    #[test]
    fn unreadable_source_files_are_skipped() {
        let source = MemoryBlobDir::with_files("profiles", &[("a.txt", b"A")]).failing_reads("locked.txt");
        let mut store = store_with(&[]);
        let snapshot = store.create_at(&source, 7).expect("best effort");
        assert_eq!(snapshot.file_name(), "7_2.pbackup", "count reflects observed files");
        assert_eq!(snapshot.entries().map(BlobMap::len), Some(1));
    }

    #[test]
    fn colliding_names_advance_the_timestamp() {
        let source = MemoryBlobDir::with_files("profiles", &[("a.txt", b"A")]);
        let mut store = store_with(&[]);
        let first = store.create_at(&source, 100).expect("first").file_name();
        let second = store.create_at(&source, 100).expect("second").file_name();
        assert_eq!(first, "100_1.pbackup");
        assert_eq!(second, "101_1.pbackup");
        assert_eq!(store.list().expect("list").len(), 2);
    }

    #[test]
    fn restoring_twice_is_idempotent() {
        let blob = encoded(&[("a.txt", b"A"), ("b.txt", b"B")]);
        let mut store = store_with(&[("1000_2.pbackup", blob.as_slice())]);
        let dest = MemoryBlobDir::with_files("profiles", &[("a.txt", b"stale")]);
        store.restore("1000_2.pbackup", &dest).expect("first");
        let after_first = dest.snapshot();
        store.restore("1000_2.pbackup", &dest).expect("second");
        assert_eq!(dest.snapshot(), after_first);
        assert_eq!(dest.snapshot().len(), 2);
        assert_eq!(dest.snapshot()["a.txt"], b"A");
    }

    #[test]
    fn failed_writes_do_not_stop_the_restore() {
        let blob = encoded(&[("a.txt", b"A"), ("b.txt", b"B")]);
        let mut store = store_with(&[("1000_2.pbackup", blob.as_slice())]);
        let dest = MemoryBlobDir::new("profiles").failing_writes("a.txt");
        let report = store.restore("1000_2.pbackup", &dest).expect("restore");
        assert_eq!(report.failed, ["a.txt"]);
        assert_eq!(report.written, ["b.txt"]);
        assert_eq!(dest.write_count(), 1);
    }

    #[test]
    fn loaded_snapshots_reject_mutation() {
        let blob = encoded(&[("a.txt", b"A")]);
        let mut store = store_with(&[("1000_1.pbackup", blob.as_slice())]);
        let dest = MemoryBlobDir::new("profiles");
        store.restore("1000_1.pbackup", &dest).expect("restore loads it");

        let snapshots = store.snapshots.as_mut().expect("listed");
        let snapshot = &mut snapshots[0];
        let before = snapshot.entries().cloned();
        let err = snapshot
            .add_entry("b.txt", b"B".to_vec())
            .expect_err("read-only");
        assert!(matches!(err, DpkError::IllegalMutation { .. }));
        assert_eq!(snapshot.entries().cloned(), before);
    }

    #[test]
    fn persisted_snapshots_are_sealed() {
        let backups = MemoryBlobDir::new("backups");
        let mut snapshot = Snapshot::building(SnapshotName::new(1, 1));
        snapshot.add_entry("a.txt", b"A".to_vec()).expect("building");
        snapshot.write(&backups).expect("write");
        assert!(!snapshot.is_mutable());
        assert!(snapshot.add_entry("b.txt", b"B".to_vec()).is_err());
        assert!(snapshot.write(&backups).is_err(), "cannot be written twice");
    }

    #[test]
    fn corrupt_snapshots_fail_to_decode() {
        let mut store = store_with(&[("1000_1.pbackup", &b"not gzip"[..])]);
        let err = store
            .restore("1000_1.pbackup", &MemoryBlobDir::new("profiles"))
            .expect_err("corrupt");
        assert!(matches!(err, DpkError::Decode { .. }));
    }

    #[test]
    fn unknown_snapshot_is_reported() {
        let mut store = store_with(&[]);
        let err = store
            .restore("42_1.pbackup", &MemoryBlobDir::new("profiles"))
            .expect_err("missing");
        assert_eq!(err, DpkError::UnknownSnapshot("42_1.pbackup".into()));
    }

    #[test]
    fn initial_snapshot_only_when_empty() {
        let source = MemoryBlobDir::with_files("profiles", &[("a.txt", b"A")]);
        let blob = encoded(&[("a.txt", b"A")]);
        let mut store = store_with(&[("1000_1.pbackup", blob.as_slice())]);
        assert_eq!(store.ensure_initial(&source).expect("ensure"), None);

        let mut empty = store_with(&[]);
        assert!(empty.ensure_initial(&source).expect("ensure").is_some());
        assert_eq!(empty.list().expect("list").len(), 1);
    }
}
