use chrono::{DateTime, Local};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

pub const DEFAULT_VISION_PROMPT: &str = "Describe this image in detail.";

/// How the conversion cache is consulted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Read existing entries and store new results.
    #[default]
    ReadWrite,
    /// Read existing entries, never store.
    ReadOnly,
    /// Ignore existing entries but store fresh results.
    Refresh,
    /// Neither read nor write.
    Disabled,
}

impl CachePolicy {
    pub fn reads(self) -> bool {
        matches!(self, CachePolicy::ReadWrite | CachePolicy::ReadOnly)
    }

    pub fn writes(self) -> bool {
        matches!(self, CachePolicy::ReadWrite | CachePolicy::Refresh)
    }
}

/// Options fixed at the start of a run.
/// This decouples the pipeline from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub force: bool,
    pub skip_vision: bool,
    pub dry_run: bool,
    pub cache_policy: CachePolicy,
    pub vision_prompt: String,
    pub jobs: usize,
}

impl RunOptions {
    pub fn new(source_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        let dest_dir = dest_dir.into();
        Self {
            source_dir: source_dir.into(),
            cache_dir: dest_dir.join(".cbm").join("cache"),
            dest_dir,
            force: false,
            skip_vision: false,
            dry_run: false,
            cache_policy: CachePolicy::default(),
            vision_prompt: DEFAULT_VISION_PROMPT.to_string(),
            jobs: 1,
        }
    }
}

/// Modification time of `path`, or `None` when it cannot be read.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Write `contents` to `path` through a temp file in the same directory, so a
/// reader never observes a half-written file.
///
/// A replaced file keeps its permissions; a new one gets `0644` on unix rather
/// than the temp file's owner-only mode.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    if let Some(perms) = output_permissions(path) {
        tmp.as_file().set_permissions(perms)?;
    }
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn output_permissions(path: &Path) -> Option<fs::Permissions> {
    if let Ok(meta) = fs::metadata(path) {
        return Some(meta.permissions());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::Permissions::from_mode(0o644))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "unknown size".to_string();
    }
    format!("{:.1}KB", bytes as f64 / 1024.0)
}

pub fn format_modified(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => DateTime::<Local>::from(t).format("%b %d, %Y").to_string(),
        None => "unknown".to_string(),
    }
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/out.md");
        atomic_write(&target, b"first").unwrap();
        atomic_write(&target, b"second").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_uses_regular_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("note.md");
        atomic_write(&target, b"first").unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        fs::set_permissions(&target, fs::Permissions::from_mode(0o640)).unwrap();
        atomic_write(&target, b"second").unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(0), "unknown size");
        assert_eq!(format_size(2048), "2.0KB");
    }

    #[test]
    fn cache_policy_flags() {
        assert!(CachePolicy::ReadWrite.reads() && CachePolicy::ReadWrite.writes());
        assert!(CachePolicy::ReadOnly.reads() && !CachePolicy::ReadOnly.writes());
        assert!(!CachePolicy::Refresh.reads() && CachePolicy::Refresh.writes());
        assert!(!CachePolicy::Disabled.reads() && !CachePolicy::Disabled.writes());
    }
}
