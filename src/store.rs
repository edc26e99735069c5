use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;

use crate::domain::{Archive, Instrument, TargetName};
use crate::error::SkyError;

/// Output layout: `<root>/<target>/<ARCHIVE>/<instrument>/<file>`, with the
/// per-archive run manifest next to the instrument folders.
#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: Option<&Utf8Path>) -> Result<Self, SkyError> {
        let output_root = match output_root {
            Some(root) => root.to_path_buf(),
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|err| SkyError::Filesystem(err.to_string()))?;
                Utf8PathBuf::from_path_buf(cwd)
                    .map_err(|_| SkyError::Filesystem("invalid output path".to_string()))?
            }
        };

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("skyfetch")).ok()
            })
            .ok_or_else(|| {
                SkyError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            output_root,
            cache_root,
        })
    }

    pub fn new_with_paths(output_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            output_root,
            cache_root,
        }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn target_dir(&self, target: &TargetName) -> Utf8PathBuf {
        self.output_root.join(target.dir_name())
    }

    pub fn archive_dir(&self, target: &TargetName, archive: Archive) -> Utf8PathBuf {
        self.target_dir(target).join(archive.label())
    }

    pub fn instrument_dir(
        &self,
        target: &TargetName,
        archive: Archive,
        instrument: Instrument,
    ) -> Utf8PathBuf {
        self.archive_dir(target, archive).join(instrument.as_str())
    }

    pub fn artifact_path(
        &self,
        target: &TargetName,
        archive: Archive,
        instrument: Instrument,
        file_name: &str,
    ) -> Utf8PathBuf {
        self.instrument_dir(target, archive, instrument)
            .join(sanitize_file_name(file_name))
    }

    pub fn manifest_path(&self, target: &TargetName, archive: Archive) -> Utf8PathBuf {
        self.archive_dir(target, archive).join("manifest.json")
    }

    pub fn obslog_cache_dir(&self) -> Utf8PathBuf {
        self.cache_root.join("smoka")
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), SkyError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| SkyError::Filesystem(err.to_string()))
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), SkyError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| SkyError::Filesystem(err.to_string()))?;
        Self::write_atomic(path, &content, "json.tmp")
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SkyError> {
        Self::write_atomic(path, content, "tmp")
    }

    fn write_atomic(path: &Utf8Path, content: &[u8], tmp_ext: &str) -> Result<(), SkyError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension(tmp_ext);
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| SkyError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| SkyError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Keeps only the last path component and replaces separators.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = base.replace(':', "_");
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
