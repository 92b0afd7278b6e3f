//! Key/value preference storage backed by a JSON object file.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable key/value store for booleans, integers and strings.
///
/// Reads fall back to the supplied default when a key is missing or holds a
/// value of another type. Writes report whether they were committed instead
/// of failing loudly.
pub trait PreferenceStore: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_int(&self, key: &str, default: i32) -> i32;
    fn get_long(&self, key: &str, default: i64) -> i64;
    fn get_string(&self, key: &str, default: &str) -> String;

    fn put_bool(&self, key: &str, value: bool) -> bool;
    fn put_int(&self, key: &str, value: i32) -> bool;
    fn put_long(&self, key: &str, value: i64) -> bool;
    fn put_string(&self, key: &str, value: &str) -> bool;

    fn remove(&self, key: &str) -> bool;
}

/// JSON-file preference store.
///
/// Without a persist path the store lives in memory only.
#[derive(Debug)]
pub struct JsonPrefs {
    values: Mutex<Map<String, Value>>,
    persist_path: Option<PathBuf>,
}

impl JsonPrefs {
    /// Create an in-memory store.
    pub fn in_memory() -> Self {
        Self {
            values: Mutex::new(Map::new()),
            persist_path: None,
        }
    }

    /// Open (or lazily create) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let values = read_map(&path)?;
        Ok(Self {
            values: Mutex::new(values),
            persist_path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Re-read the backing file, picking up edits made by other processes.
    pub fn reload(&self) -> std::io::Result<()> {
        if let Some(ref path) = self.persist_path {
            let fresh = read_map(path)?;
            *self.lock() = fresh;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        // A poisoned map is still structurally valid.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Apply a single-key change; memory is only updated once the file write succeeded.
    ///
    /// The change is applied on top of the file's current content, so keys
    /// written by another process since the last reload are kept.
    fn commit(&self, key: &str, value: Option<Value>) -> bool {
        let mut values = self.lock();
        let mut next = match self.persist_path {
            Some(ref path) => read_map(path).unwrap_or_else(|e| {
                tracing::warn!("Could not re-read {:?}, writing cached values: {}", path, e);
                values.clone()
            }),
            None => values.clone(),
        };
        match value {
            Some(v) => {
                next.insert(key.to_string(), v);
            }
            None => {
                next.remove(key);
            }
        }

        if let Some(ref path) = self.persist_path {
            if let Err(e) = write_map(path, &next) {
                tracing::warn!("Preference '{}' not stored: {}", key, e);
                return false;
            }
        }

        *values = next;
        true
    }
}

impl PreferenceStore for JsonPrefs {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get(key)
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    fn put_bool(&self, key: &str, value: bool) -> bool {
        self.commit(key, Some(Value::Bool(value)))
    }

    fn put_int(&self, key: &str, value: i32) -> bool {
        self.commit(key, Some(Value::from(value)))
    }

    fn put_long(&self, key: &str, value: i64) -> bool {
        self.commit(key, Some(Value::from(value)))
    }

    fn put_string(&self, key: &str, value: &str) -> bool {
        self.commit(key, Some(Value::String(value.to_string())))
    }

    fn remove(&self, key: &str) -> bool {
        self.commit(key, None)
    }
}

fn read_map(path: &Path) -> std::io::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

/// Write to a uniquely named sibling temp file and rename it over the target.
fn write_map(path: &Path, values: &Map<String, Value>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(values).map_err(std::io::Error::other)?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let tmp = path.with_extension(format!("json.{}.tmp", &suffix[..8]));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        e
    })
}
