//! A DE1 app installation on disk: its version file and profile folders.

use std::fs;
use std::path::{Path, PathBuf};

use dpk_domain::{resolve_display_name, ProfileLibrary, Tag};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::BACKUP_DIRECTORY_NAME;
use crate::effects::BlobDir;
use crate::error::DpkError;
use crate::fs::FsBlobDir;

pub const VERSION_FILE: &str = "version.tcl";
pub const PROFILE_DIRECTORY_NAME: &str = "profiles";

#[derive(Clone, Debug)]
pub struct Installation {
    root: PathBuf,
    profiles: FsBlobDir,
    backups: FsBlobDir,
}

/// A profile present in the installation's profile folder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstalledProfile {
    pub file_name: String,
    pub title: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub tag: String,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    pub unknown: Vec<String>,
}

impl Installation {
    /// Opens the installation rooted at `root`.
    ///
    /// # Errors
    /// Returns [`DpkError::InvalidInstallation`] when `root` has no version
    /// file or its folders cannot be prepared.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DpkError> {
        let root = root.into();
        let invalid = |reason: String| DpkError::InvalidInstallation {
            path: root.display().to_string(),
            reason,
        };
        if !root.join(VERSION_FILE).is_file() {
            return Err(invalid(format!("{VERSION_FILE} not found")));
        }
        let profiles = FsBlobDir::create(root.join(PROFILE_DIRECTORY_NAME))
            .map_err(|err| invalid(format!("{err:#}")))?;
        let backups = FsBlobDir::create(root.join(BACKUP_DIRECTORY_NAME))
            .map_err(|err| invalid(format!("{err:#}")))?;
        debug!(root = %root.display(), "installation opened");
        Ok(Self {
            root,
            profiles,
            backups,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn profile_dir(&self) -> &FsBlobDir {
        &self.profiles
    }

    #[must_use]
    pub fn backup_dir(&self) -> &FsBlobDir {
        &self.backups
    }

    /// The app version: fourth whitespace-separated token of the version file's first line.
    ///
    /// # Errors
    /// Fails when the version file cannot be read or is too short.
    pub fn installed_version(&self) -> Result<String, DpkError> {
        let path = self.root.join(VERSION_FILE);
        let text = fs::read_to_string(&path).map_err(|err| DpkError::Io {
            dir: self.root.display().to_string(),
            name: VERSION_FILE.to_string(),
            reason: err.to_string(),
        })?;
        parse_version_line(&text).ok_or_else(|| DpkError::InvalidInstallation {
            path: path.display().to_string(),
            reason: "first line carries no version token".to_string(),
        })
    }

    /// Profiles in the profile folder with their titles.
    ///
    /// # Errors
    /// Fails only when the profile folder cannot be listed.
    pub fn installed_profiles(&self) -> Result<Vec<InstalledProfile>, DpkError> {
        let names = self
            .profiles
            .list()
            .map_err(|err| DpkError::io(self.profiles.describe(), "", &err))?;
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            match self.profiles.read(&name) {
                Ok(bytes) => found.push(InstalledProfile {
                    title: resolve_display_name(&bytes),
                    file_name: name,
                }),
                Err(err) => warn!(file = %name, "unreadable profile: {err:#}"),
            }
        }
        Ok(found)
    }
}

fn parse_version_line(text: &str) -> Option<String> {
    text.lines()
        .next()?
        .split_whitespace()
        .nth(3)
        .map(ToString::to_string)
}

/// The newest tag whose label names `version`, with or without a leading `v`.
#[must_use]
pub fn match_tag<'a>(library: &'a ProfileLibrary, version: &str) -> Option<&'a Tag> {
    let plain = format!("{version} at");
    let prefixed = format!("v{version} at");
    library.tags_as_list().into_iter().find(|tag| {
        let label = tag.label();
        label.starts_with(&plain) || label.starts_with(&prefixed)
    })
}

/// Writes the cached content of `tag`'s profiles into `dest`.
///
/// An empty `selection` installs every profile of the tag. Missing content
/// and write failures are logged and skipped.
pub fn install_profiles(
    library: &ProfileLibrary,
    tag: &Tag,
    selection: &[String],
    dest: &dyn BlobDir,
) -> InstallReport {
    let mut report = InstallReport {
        tag: tag.name.clone(),
        ..InstallReport::default()
    };
    for wanted in selection {
        if tag.profile(wanted).is_none() {
            warn!(tag = %tag.name, file = %wanted, "profile not part of tag");
            report.unknown.push(wanted.clone());
        }
    }
    let chosen = tag
        .profiles
        .iter()
        .filter(|profile| selection.is_empty() || selection.contains(&profile.file_name));
    for profile in chosen {
        let Some(content) = library.content_for(profile) else {
            warn!(file = %profile.file_name, hash = %profile.content_hash, "content missing from cache");
            report.failed.push(profile.file_name.clone());
            continue;
        };
        match dest.write(&profile.file_name, content) {
            Ok(()) => {
                debug!(file = %profile.file_name, title = %profile.display_name, "profile installed");
                report.installed.push(profile.file_name.clone());
            }
            Err(err) => {
                warn!(file = %profile.file_name, "install failed: {err:#}");
                report.failed.push(profile.file_name.clone());
            }
        }
    }
    info!(
        tag = %report.tag,
        installed = report.installed.len(),
        failed = report.failed.len(),
        "profiles installed"
    );
    report
}
