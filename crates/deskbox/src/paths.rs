use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};

/// Archive suffixes the fetcher knows how to unpack.
const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// Local layout for downloaded disk-image artifacts.
///
/// Both the compressed archive and the extracted raw image live in one fixed
/// directory, named deterministically from the remote URL: the archive keeps
/// the URL's final path segment, the image drops the archive suffix.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the (possibly partial) downloaded archive for `url`.
    pub fn archive_path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.dir.join(archive_file_name(url)?))
    }

    /// Path of the extracted raw disk image for `url`.
    pub fn image_path(&self, url: &str) -> Result<PathBuf> {
        let archive = archive_file_name(url)?;
        let image = ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| archive.strip_suffix(suffix))
            .ok_or_else(|| {
                ProvisionError::InvalidUrl(format!(
                    "image URL must end in one of {ARCHIVE_SUFFIXES:?}: {url}"
                ))
            })?;
        Ok(self.dir.join(image))
    }
}

/// The final path segment of `url`, validated as a plain file name.
fn archive_file_name(url: &str) -> Result<&str> {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if name.is_empty() || name.contains(['?', '#']) {
        return Err(ProvisionError::InvalidUrl(format!(
            "cannot derive an artifact name from {url}"
        )));
    }
    Ok(name)
}
