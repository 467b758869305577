//! Whole-file JSON load/save helpers.
//!
//! Registries keep their state in memory and rewrite the whole file after
//! every mutation; files are small enough that this is cheaper than anything
//! incremental. I/O runs on the blocking pool so callers never stall the
//! runtime.

use std::{fs, path::Path};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Load a JSON value from `path`, returning `T::default()` when the file does
/// not exist yet.
pub async fn load_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default + Send + 'static,
{
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    })
    .await?
}

/// Serialize `value` as pretty JSON and rewrite `path`, creating parent
/// directories as needed.
pub async fn save<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let path = path.to_path_buf();
    let raw = serde_json::to_string_pretty(value)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, raw)?;
        Ok(())
    })
    .await?
}

/// Synchronous variant of [`load_or_default`] for hot-reload callbacks and
/// startup paths that are not yet on the runtime.
pub fn load_or_default_sync<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
