//! File-based attachment cache
//!
//! Directory structure:
//! ```text
//! attachments/
//!   18c2f0a1b2-3f9a0c1d2e4b-report.pdf   # <message>-<sha256(attachment id)[..12]>-<name>
//!   18c2f0a1b2-77e1d0a9c3f2-photo.jpg
//! ```
//!
//! Remote filenames are untrusted, so only a sanitized final component is
//! ever used. Files are written atomically and owner-only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::MessageId;

const MAX_NAME_LEN: usize = 100;
const FALLBACK_NAME: &str = "attachment";
const ATTACHMENT_HASH_LEN: usize = 12;

/// Where an attachment landed on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedAttachment {
    pub path: PathBuf,
    pub size: u64,
    /// True when the file was already cached and no download happened
    pub cached: bool,
}

pub struct AttachmentCache {
    root: PathBuf,
}

impl AttachmentCache {
    /// Open the cache, creating the directory owner-only if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        config::ensure_private_dir(&root).context("Failed to create attachment directory")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache path for an attachment; always a direct child of the root
    pub fn path_for(&self, message_id: &MessageId, attachment_id: &str, filename: &str) -> PathBuf {
        let digest = Sha256::digest(attachment_id.as_bytes());
        let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        self.root.join(format!(
            "{}-{}-{}",
            sanitize_component(message_id.as_str()),
            &hash[..ATTACHMENT_HASH_LEN],
            sanitize_filename(filename)
        ))
    }

    /// Cached entry for an attachment, if present
    pub fn get(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        filename: &str,
    ) -> Option<SavedAttachment> {
        let path = self.path_for(message_id, attachment_id, filename);
        let metadata = fs::metadata(&path).ok()?;
        metadata.is_file().then(|| SavedAttachment {
            path,
            size: metadata.len(),
            cached: true,
        })
    }

    /// Write attachment bytes (atomic, owner-only)
    pub fn put(
        &self,
        message_id: &MessageId,
        attachment_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<SavedAttachment> {
        let path = self.path_for(message_id, attachment_id, filename);
        config::write_private_atomic(&path, data)
            .with_context(|| format!("Failed to write attachment {}", path.display()))?;
        debug!("Cached attachment at {} ({} bytes)", path.display(), data.len());

        Ok(SavedAttachment {
            path,
            size: data.len() as u64,
            cached: false,
        })
    }
}

/// Reduce an untrusted filename to a safe single path component
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = sanitize_component(last);
    let trimmed = cleaned.trim_start_matches('.');
    let truncated: String = trimmed.chars().take(MAX_NAME_LEN).collect();

    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("/abs/path/.bashrc"), "bashrc");
        assert_eq!(sanitize_filename(".."), FALLBACK_NAME);
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename("dir/"), FALLBACK_NAME);
    }

    #[test]
    fn test_sanitize_maps_unsafe_characters() {
        assert_eq!(sanitize_filename("Q3 report (final).pdf"), "Q3_report__final_.pdf");
        assert_eq!(sanitize_filename("résumé.txt"), "r_sum_.txt");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = format!("{}.txt", "a".repeat(300));
        assert_eq!(sanitize_filename(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_path_stays_inside_root() {
        let dir = tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path().join("attachments")).unwrap();
        let path = cache.path_for(&MessageId::new("../m1"), "att", "../../x");

        assert_eq!(path.parent(), Some(cache.root()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".._m1-"));
        assert!(name.ends_with("-x"));
    }

    #[test]
    fn test_distinct_attachments_get_distinct_paths() {
        let dir = tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path()).unwrap();
        let message = MessageId::new("m1");

        assert_ne!(
            cache.path_for(&message, "att-a", "same.pdf"),
            cache.path_for(&message, "att-b", "same.pdf")
        );
    }

    #[test]
    fn test_put_then_get_hits_cache() {
        let dir = tempdir().unwrap();
        let cache = AttachmentCache::new(dir.path().join("attachments")).unwrap();
        let message = MessageId::new("m1");

        assert!(cache.get(&message, "att", "a.txt").is_none());
        let saved = cache.put(&message, "att", "a.txt", b"hello").unwrap();
        assert!(!saved.cached);
        assert_eq!(fs::read(&saved.path).unwrap(), b"hello");

        let hit = cache.get(&message, "att", "a.txt").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.size, 5);
        assert_eq!(hit.path, saved.path);
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let root = dir.path().join("attachments");
        let cache = AttachmentCache::new(&root).unwrap();
        let saved = cache.put(&MessageId::new("m1"), "att", "a.txt", b"x").unwrap();

        let dir_mode = fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&saved.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
