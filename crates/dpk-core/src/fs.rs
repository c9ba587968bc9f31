use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::effects::BlobDir;

/// A [`BlobDir`] backed by a plain filesystem directory.
#[derive(Clone, Debug)]
pub struct FsBlobDir {
    root: PathBuf,
}

impl FsBlobDir {
    /// Wraps an existing directory.
    ///
    /// # Errors
    /// Returns an error when `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        Ok(Self { root })
    }

    /// Wraps `root`, creating it first when it does not exist.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            bail!("invalid blob name '{name}'");
        }
        Ok(self.root.join(name))
    }
}

impl BlobDir for FsBlobDir {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to list {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(name)?;
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(name)?;
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    fn exists(&self, name: &str) -> bool {
        self.blob_path(name).is_ok_and(|path| path.is_file())
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
