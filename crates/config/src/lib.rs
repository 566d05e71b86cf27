//! Configuration directory helpers for mailguard
//!
//! Locates the per-user mailguard directory (~/.config/mailguard/ unless
//! `MAILGUARD_HOME` points elsewhere), creates directories that only the
//! owning user can enter, and writes files atomically with owner-only
//! permissions.
//!
//! Every write goes through [`stage_private`]: the bytes land in a temporary
//! file next to the target and only replace it on [`StagedWrite::commit`].
//! A staged write that is dropped uncommitted leaves the target untouched.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Environment variable that overrides the config directory
pub const HOME_ENV: &str = "MAILGUARD_HOME";

/// Directory name under the platform config directory
const APP_DIR: &str = "mailguard";

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the mailguard config directory ($MAILGUARD_HOME or ~/.config/mailguard/)
pub fn config_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home));
    }
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the mailguard config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Create `dir` (and any missing parents) owner-only if absent.
///
/// Directories are created with mode 0700 from the start. Existing
/// directories are left as they are.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder
        .create(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Serialize `value` as pretty JSON and write it atomically, owner-only
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_private_atomic(path, &content)
}

/// Write `data` to `path` atomically with owner-only permissions
pub fn write_private_atomic(path: &Path, data: &[u8]) -> Result<()> {
    stage_private(path, data)?.commit()
}

/// A fully written temporary file waiting to be renamed over its target
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Path of the temporary file holding the staged bytes
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically replace the target with the staged bytes
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.target).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                self.temp_path.display(),
                self.target.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Write `data` into a fresh owner-only temporary file beside `path`.
///
/// The parent directory is created owner-only if missing. The data is
/// flushed to disk before this returns.
pub fn stage_private(path: &Path, data: &[u8]) -> Result<StagedWrite> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_private_dir(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file path: {}", path.display()))?;
    let temp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        STAGE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let staged = StagedWrite {
        temp_path,
        target: path.to_path_buf(),
        committed: false,
    };

    let mut file = create_private_file(&staged.temp_path)?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .with_context(|| format!("Failed to write {}", staged.temp_path.display()))?;

    Ok(staged)
}

fn create_private_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))
}
