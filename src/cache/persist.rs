//! Best-effort JSON persistence for the render cache.
//!
//! The persisted file holds the most recent entries sorted descending by
//! `stored_at`. A load failure yields an empty cache, a save failure is
//! logged and swallowed; neither is allowed to fail an operation.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use super::store::CacheEntry;

const TARGET: &str = "cache::persist";

pub(crate) fn load_entries(path: &Path) -> Vec<CacheEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(
                target = TARGET,
                op = "cache::load",
                result = "read_error",
                path = %path.display(),
                error = %err,
                "Failed to read persisted render cache; starting empty"
            );
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<CacheEntry>>(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                target = TARGET,
                op = "cache::load",
                result = "parse_error",
                path = %path.display(),
                error = %err,
                "Persisted render cache is corrupt; starting empty"
            );
            Vec::new()
        }
    }
}

pub(crate) fn save_entries(path: &Path, entries: &[CacheEntry]) {
    let payload = match serde_json::to_string(entries) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(
                target = TARGET,
                op = "cache::save",
                result = "serialize_error",
                path = %path.display(),
                error = %err,
                "Failed to serialize render cache"
            );
            return;
        }
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = fs::create_dir_all(parent)
    {
        warn!(
            target = TARGET,
            op = "cache::save",
            result = "mkdir_error",
            path = %parent.display(),
            error = %err,
            "Failed to create render cache directory"
        );
        return;
    }

    if let Err(err) = fs::write(path, payload) {
        warn!(
            target = TARGET,
            op = "cache::save",
            result = "write_error",
            path = %path.display(),
            error = %err,
            "Failed to persist render cache"
        );
    }
}

pub(crate) fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            warn!(
                target = TARGET,
                op = "cache::clear",
                result = "remove_error",
                path = %path.display(),
                error = %err,
                "Failed to remove persisted render cache"
            );
        }
    }
}
