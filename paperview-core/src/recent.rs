use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MAX_RECENT_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentFile {
    pub path: PathBuf,
    pub name: String,
    pub timestamp: u64,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Most-recently-opened-first list of files, deduplicated by path and
/// bounded at `MAX_RECENT_FILES`.
#[derive(Debug, Clone, Default)]
pub struct RecentFiles {
    files: Vec<RecentFile>,
}

impl RecentFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &Path, timestamp: u64) {
        self.files.retain(|file| file.path != path);
        self.files.insert(
            0,
            RecentFile {
                path: path.to_path_buf(),
                name: display_name(path),
                timestamp,
            },
        );
        self.files.truncate(MAX_RECENT_FILES);
    }

    pub fn remove(&mut self, path: &Path) {
        self.files.retain(|file| file.path != path);
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecentFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let mut file = File::open(path)
            .with_context(|| format!("failed to open recent files list {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let files = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode recent files list {:?}", path))?;
        Ok(Self { files })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&self.files)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp recent files list {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}
