//! Descriptor persistence.
//!
//! `state.json` is rewritten on every status transition via
//! write-to-temp-then-rename inside the sandbox directory, so a reader sees
//! either the prior or the new complete contents, never a partial write.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::sandbox::{SandboxDescriptor, SandboxError};

/// Atomically write the descriptor into `dir/state.json`.
pub fn write_descriptor(dir: &Path, descriptor: &SandboxDescriptor) -> Result<(), SandboxError> {
    let data = serde_json::to_vec_pretty(descriptor)?;
    let tmp = dir.join("state.json.tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, dir.join("state.json"))?;
    Ok(())
}

/// Read the descriptor from `dir/state.json`.
pub fn read_descriptor(dir: &Path) -> Result<SandboxDescriptor, SandboxError> {
    let data = fs::read(dir.join("state.json"))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Scan every subdirectory of `sandboxes_dir` for a parseable descriptor.
///
/// Directories without a readable `state.json` are returned separately so the
/// caller can sweep them.
pub fn scan(sandboxes_dir: &Path) -> (Vec<(PathBuf, SandboxDescriptor)>, Vec<PathBuf>) {
    let mut found = Vec::new();
    let mut unreadable = Vec::new();

    let entries = match fs::read_dir(sandboxes_dir) {
        Ok(entries) => entries,
        Err(_) => return (found, unreadable),
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        match read_descriptor(&dir) {
            Ok(descriptor) => found.push((dir, descriptor)),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "unreadable sandbox state");
                unreadable.push(dir);
            }
        }
    }

    (found, unreadable)
}
