//! Installing, loading and upgrading the persisted [`ProfileLibrary`].

use dpk_domain::{ProfileLibrary, PROFILE_LIB_FILE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::effects::{BlobDir, CatalogClient, RemoteRelease};
use crate::error::DpkError;

/// Where the library in use came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibrarySource {
    Installed,
    Stock,
    Empty,
}

/// Reads the installed library, if there is one.
///
/// # Errors
/// Fails when the library blob exists but cannot be read or decoded.
pub fn load_installed(dir: &dyn BlobDir) -> Result<Option<ProfileLibrary>, DpkError> {
    if !dir.exists(PROFILE_LIB_FILE) {
        return Ok(None);
    }
    let bytes = dir
        .read(PROFILE_LIB_FILE)
        .map_err(|err| DpkError::io(dir.describe(), PROFILE_LIB_FILE, &err))?;
    let library = ProfileLibrary::load(bytes.as_slice())
        .map_err(|err| DpkError::decode(PROFILE_LIB_FILE, &err))?;
    debug!(version = library.version(), tags = library.tags().len(), "library loaded");
    Ok(Some(library))
}

/// Persists `library` as the installed library.
///
/// # Errors
/// Fails when the library cannot be encoded or written.
pub fn install(dir: &dyn BlobDir, library: &ProfileLibrary) -> Result<(), DpkError> {
    let mut buf = Vec::new();
    library
        .save(&mut buf)
        .map_err(|err| DpkError::decode(PROFILE_LIB_FILE, &err))?;
    dir.write(PROFILE_LIB_FILE, &buf)
        .map_err(|err| DpkError::io(dir.describe(), PROFILE_LIB_FILE, &err))?;
    info!(version = library.version(), bytes = buf.len(), "library installed");
    Ok(())
}

/// Opens the library of an installation.
///
/// The stock library (when given) is installed when nothing is installed yet
/// or when it is newer than the installed one. Without either an empty
/// library is installed.
///
/// # Errors
/// Fails when the stock or installed library cannot be decoded, or writing fails.
pub fn load_or_install(
    dir: &dyn BlobDir,
    stock: Option<&[u8]>,
) -> Result<(ProfileLibrary, LibrarySource), DpkError> {
    let stock = stock
        .map(|bytes| {
            ProfileLibrary::load(bytes).map_err(|err| DpkError::decode("stock library", &err))
        })
        .transpose()?;
    let installed = load_installed(dir)?;

    match (installed, stock) {
        (Some(installed), Some(stock)) if stock.is_upgrade_over(&installed) => {
            info!(
                installed = installed.version(),
                stock = stock.version(),
                "stock library is newer"
            );
            install(dir, &stock)?;
            Ok((stock, LibrarySource::Stock))
        }
        (Some(installed), _) => Ok((installed, LibrarySource::Installed)),
        (None, Some(stock)) => {
            install(dir, &stock)?;
            Ok((stock, LibrarySource::Stock))
        }
        (None, None) => {
            let library = ProfileLibrary::default();
            install(dir, &library)?;
            Ok((library, LibrarySource::Empty))
        }
    }
}

/// Picks the pre-release with the highest numeric tag that carries an asset.
///
/// Newer pre-releases without an asset are passed over with a warning.
#[must_use]
pub fn latest_prerelease(releases: &[RemoteRelease]) -> Option<&RemoteRelease> {
    let mut numbered: Vec<(u64, &RemoteRelease)> = releases
        .iter()
        .filter(|release| release.prerelease)
        .filter_map(|release| match release.tag_name.trim().parse::<u64>() {
            Ok(number) => Some((number, release)),
            Err(_) => {
                debug!(tag = %release.tag_name, "ignoring non-numeric release");
                None
            }
        })
        .collect();
    numbered.sort_by(|lhs, rhs| rhs.0.cmp(&lhs.0));
    for (_, release) in numbered {
        if !release.assets.is_empty() {
            return Some(release);
        }
        warn!(tag = %release.tag_name, "pre-release has no library asset; trying an older one");
    }
    None
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum SelfUpdate {
    Updated { from: i64, to: i64, release: String },
    AlreadyLatest { version: i64, release: String },
    NoRelease,
}

/// Replaces `current` with the newest published library when that one is newer.
///
/// # Errors
/// Fails when releases cannot be listed, the asset cannot be downloaded or
/// decoded, or the upgrade cannot be installed.
pub fn self_update(
    dir: &dyn BlobDir,
    catalog: &dyn CatalogClient,
    current: &mut ProfileLibrary,
) -> Result<SelfUpdate, DpkError> {
    let releases = catalog
        .list_releases()
        .map_err(|err| DpkError::TransientFetch {
            url: "releases".to_string(),
            reason: format!("{err:#}"),
        })?;
    let Some(release) = latest_prerelease(&releases) else {
        warn!(count = releases.len(), "no usable library release published");
        return Ok(SelfUpdate::NoRelease);
    };
    let Some(asset) = release.assets.first() else {
        return Ok(SelfUpdate::NoRelease);
    };
    info!(release = %release.tag_name, url = %asset.browser_download_url, "downloading library release");
    let bytes = catalog
        .fetch(&asset.browser_download_url)
        .map_err(|err| DpkError::TransientFetch {
            url: asset.browser_download_url.clone(),
            reason: format!("{err:#}"),
        })?;
    let candidate = ProfileLibrary::load(bytes.as_slice())
        .map_err(|err| DpkError::decode(format!("release {}", release.tag_name), &err))?;

    if !candidate.is_upgrade_over(current) {
        info!(version = current.version(), "library is already the latest");
        return Ok(SelfUpdate::AlreadyLatest {
            version: current.version(),
            release: release.tag_name.clone(),
        });
    }
    install(dir, &candidate)?;
    let from = current.version();
    *current = candidate;
    Ok(SelfUpdate::Updated {
        from,
        to: current.version(),
        release: release.tag_name.clone(),
    })
}
