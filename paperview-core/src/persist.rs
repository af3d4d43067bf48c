use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Upper bound on remembered per-document positions; beyond it the entries
/// with the oldest timestamps are pruned.
pub const MAX_REMEMBERED_DOCUMENTS: usize = 50;

/// Last reading position for one document, keyed by file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub page: u32,
    pub scroll_y: f32,
    pub zoom: f32,
    pub timestamp: u64,
}

pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

pub trait PositionStore: Send + Sync {
    fn get(&self, path: &Path) -> Result<Option<SavedPosition>>;
    fn save(&self, path: &Path, position: SavedPosition) -> Result<()>;
    fn remove(&self, path: &Path) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

fn store_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn prune_oldest(positions: &mut HashMap<String, SavedPosition>) {
    if positions.len() <= MAX_REMEMBERED_DOCUMENTS {
        return;
    }
    let mut entries: Vec<_> = positions.drain().collect();
    entries.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
    entries.truncate(MAX_REMEMBERED_DOCUMENTS);
    positions.extend(entries);
}

/// JSON-file backed store. All writes go through a temp file and an atomic
/// rename so a crash mid-write never corrupts saved positions.
pub struct FilePositionStore {
    path: PathBuf,
}

impl FilePositionStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self {
            path: root.join("positions.json"),
        })
    }

    fn load_all(&self) -> Result<HashMap<String, SavedPosition>> {
        match read_json(&self.path)? {
            Some(positions) => Ok(positions),
            None => Ok(HashMap::new()),
        }
    }

    fn store_all(&self, positions: &HashMap<String, SavedPosition>) -> Result<()> {
        write_json_atomic(&self.path, positions)
    }
}

impl PositionStore for FilePositionStore {
    fn get(&self, path: &Path) -> Result<Option<SavedPosition>> {
        Ok(self.load_all()?.remove(&store_key(path)))
    }

    fn save(&self, path: &Path, position: SavedPosition) -> Result<()> {
        let mut positions = self.load_all()?;
        positions.insert(store_key(path), position);
        prune_oldest(&mut positions);
        self.store_all(&positions)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let mut positions = self.load_all()?;
        if positions.remove(&store_key(path)).is_some() {
            self.store_all(&positions)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove state file {:?}", self.path))?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPositionStore {
    inner: Mutex<HashMap<String, SavedPosition>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn get(&self, path: &Path) -> Result<Option<SavedPosition>> {
        Ok(self.inner.lock().get(&store_key(path)).cloned())
    }

    fn save(&self, path: &Path, position: SavedPosition) -> Result<()> {
        let mut positions = self.inner.lock();
        positions.insert(store_key(path), position);
        prune_oldest(&mut positions);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.inner.lock().remove(&store_key(path));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.inner.lock().clear();
        Ok(())
    }
}

/// Window geometry persisted across runs. The shell decides whether it can
/// honor it; restoring is best-effort and failures only warrant a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub maximized: bool,
}

pub fn load_window_geometry(path: &Path) -> Result<Option<WindowGeometry>> {
    read_json(path)
}

pub fn save_window_geometry(path: &Path, geometry: &WindowGeometry) -> Result<()> {
    write_json_atomic(path, geometry)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open state file {:?}", path))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    let value = serde_json::from_str(&buf)
        .with_context(|| format!("failed to decode state file {:?}", path))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(value)?;
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to open temp state file {:?}", tmp))?;
    file.write_all(payload.as_bytes())?;
    file.flush()?;
    fs::rename(tmp, path)?;
    Ok(())
}
