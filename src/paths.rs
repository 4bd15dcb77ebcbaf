use crate::error::ConfigError;
use crate::references::{ReferenceKind, classify};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Where a reference points, once looked up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Local(PathBuf),
    External,
    /// Nothing on disk matched. Carries the decoded path that was tried.
    NotFound(PathBuf),
}

/// Expand `~` and `$VAR` in a configured root and make it absolute.
/// Cloud-sync folders are ordinary directories, so no further mapping happens.
pub fn normalize_root(raw: &Path) -> Result<PathBuf, ConfigError> {
    let raw_str = raw.to_string_lossy();
    let expanded = shellexpand::full(&raw_str).map_err(|e| ConfigError::Expansion {
        path: raw_str.to_string(),
        reason: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.as_ref());
    let absolute = std::path::absolute(&path).map_err(|e| ConfigError::Expansion {
        path: raw_str.to_string(),
        reason: e.to_string(),
    })?;
    Ok(absolute.canonicalize().unwrap_or(absolute))
}

/// Percent-decode a link destination. Invalid UTF-8 sequences are replaced
/// rather than rejected.
pub fn decode_reference(destination: &str) -> Cow<'_, str> {
    match urlencoding::decode(destination) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Owned(
            String::from_utf8_lossy(&urlencoding::decode_binary(destination.as_bytes()))
                .into_owned(),
        ),
    }
}

/// Map a reference destination found in a note to a file on disk.
///
/// The decoded path is tried relative to the note's directory first, then
/// inside the attachment folder, then by bare file name inside the attachment
/// folder. Only regular files resolve.
pub fn resolve_reference(
    note_dir: &Path,
    attachment_dir: Option<&Path>,
    destination: &str,
) -> Resolution {
    if classify(destination) == ReferenceKind::External {
        return Resolution::External;
    }

    let decoded = PathBuf::from(decode_reference(destination).as_ref());

    let mut candidates = vec![note_dir.join(&decoded)];
    if let Some(dir) = attachment_dir {
        candidates.push(dir.join(&decoded));
        if let Some(name) = decoded.file_name() {
            candidates.push(dir.join(name));
        }
    }

    for candidate in candidates {
        if candidate.is_file() {
            tracing::debug!("Resolved {} -> {}", destination, candidate.display());
            return Resolution::Local(candidate);
        }
    }

    tracing::debug!("Could not find attachment: {}", decoded.display());
    Resolution::NotFound(decoded)
}
