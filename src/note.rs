use crate::utils::{is_hidden, modified_time};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Broad attachment category. Each variant has its own conversion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
    Document,
    Spreadsheet,
    Other,
    Unsupported,
}

impl AttachmentKind {
    /// Classify by extension, falling back to content sniffing when the
    /// extension says nothing.
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if let Some(kind) = Self::from_extension(&ext) {
            return kind;
        }
        match infer::get_from_path(path) {
            Ok(Some(t)) => match t.matcher_type() {
                infer::MatcherType::Image => AttachmentKind::Image,
                infer::MatcherType::Doc => AttachmentKind::Document,
                infer::MatcherType::Archive | infer::MatcherType::App => {
                    AttachmentKind::Unsupported
                }
                _ => AttachmentKind::Other,
            },
            _ => AttachmentKind::Other,
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        let kind = match ext {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "svg" | "bmp" | "tif"
            | "tiff" => AttachmentKind::Image,
            "csv" | "tsv" | "xlsx" | "xls" => AttachmentKind::Spreadsheet,
            "pdf" | "doc" | "docx" | "rtf" | "pptx" | "html" | "htm" | "txt" | "md" | "json"
            | "xml" => AttachmentKind::Document,
            "exe" | "dll" | "so" | "dylib" | "zip" | "tar" | "gz" | "7z" | "db" | "sqlite"
            | "sqlite3" | "bin" | "dat" => AttachmentKind::Unsupported,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Document => "document",
            AttachmentKind::Spreadsheet => "spreadsheet",
            AttachmentKind::Other => "other",
            AttachmentKind::Unsupported => "unsupported",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            AttachmentKind::Image => "🖼️",
            AttachmentKind::Spreadsheet => "📊",
            AttachmentKind::Document | AttachmentKind::Other | AttachmentKind::Unsupported => "📄",
        }
    }
}

/// A file on disk referenced from a note.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub size: u64,
    pub kind: AttachmentKind,
}

impl Attachment {
    pub fn load(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            modified: meta.modified().ok(),
            size: meta.len(),
            kind: AttachmentKind::detect(path),
        })
    }

    /// Stand-in for a referenced file that could not be read, so it can still
    /// be reported to observers.
    pub fn unresolved(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            modified: None,
            size: 0,
            kind: AttachmentKind::detect(path),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// One source Markdown document and its optional attachment folder.
#[derive(Debug, Clone)]
pub struct Note {
    pub source_path: PathBuf,
    /// Path relative to the source root, mirrored under the destination root.
    pub relative_path: PathBuf,
    pub modified: Option<SystemTime>,
    /// Sibling folder named after the note's stem, when it exists.
    pub attachment_dir: Option<PathBuf>,
}

impl Note {
    pub fn from_path(source_root: &Path, path: &Path) -> Self {
        let relative_path = path.strip_prefix(source_root).unwrap_or(path).to_path_buf();
        let attachment_dir = path
            .file_stem()
            .map(|stem| path.with_file_name(stem))
            .filter(|dir| dir.is_dir());
        Self {
            source_path: path.to_path_buf(),
            relative_path,
            modified: modified_time(path),
            attachment_dir,
        }
    }

    pub fn note_dir(&self) -> &Path {
        self.source_path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn output_path(&self, dest_root: &Path) -> PathBuf {
        dest_root.join(&self.relative_path)
    }

    pub fn read_text(&self) -> io::Result<String> {
        fs::read_to_string(&self.source_path)
    }

    /// Files inside the attachment folder (hidden entries excluded), sorted.
    pub fn attachment_files(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.attachment_dir else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}

/// Recursively find every `.md` note under `source_root`, skipping hidden entries.
/// Attachment folders are not descended into: Markdown files there belong to
/// the note next to the folder.
pub fn discover_notes(source_root: &Path) -> Result<Vec<Note>, walkdir::Error> {
    let mut notes = Vec::new();
    for entry in WalkDir::new(source_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(is_hidden(&e.file_name().to_string_lossy())
                    || (e.file_type().is_dir() && is_attachment_dir(e.path())))
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_markdown(entry.path()) {
            continue;
        }
        notes.push(Note::from_path(source_root, entry.path()));
    }
    notes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(notes)
}

fn is_attachment_dir(dir: &Path) -> bool {
    dir.file_name().is_some_and(|name| {
        let mut note = name.to_os_string();
        note.push(".md");
        dir.with_file_name(note).is_file()
    })
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("a.PNG", AttachmentKind::Image)]
    #[case("map.svg", AttachmentKind::Image)]
    #[case("photo.heic", AttachmentKind::Image)]
    #[case("sheet.csv", AttachmentKind::Spreadsheet)]
    #[case("report.pdf", AttachmentKind::Document)]
    #[case("archive.zip", AttachmentKind::Unsupported)]
    fn detects_kind_by_extension(#[case] name: &str, #[case] expected: AttachmentKind) {
        assert_eq!(AttachmentKind::detect(Path::new(name)), expected);
    }

    #[test]
    fn sniffs_content_when_extension_is_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.xyz");
        fs::write(&path, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap();
        assert_eq!(AttachmentKind::detect(&path), AttachmentKind::Image);

        let text = dir.path().join("notes.xyz");
        fs::write(&text, "plain words").unwrap();
        assert_eq!(AttachmentKind::detect(&text), AttachmentKind::Other);
    }

    #[test]
    fn discovery_finds_nested_notes_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/trip")).unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("sub/trip.md"), "trip").unwrap();
        fs::write(root.join("sub/trip/map.svg"), "<svg/>").unwrap();
        fs::write(root.join("sub/trip/.DS_Store"), "").unwrap();
        fs::create_dir_all(root.join("sub/trip/days")).unwrap();
        fs::write(root.join("sub/trip/readme.md"), "attached").unwrap();
        fs::write(root.join("sub/trip/days/monday.md"), "attached").unwrap();
        fs::write(root.join(".trash/old.md"), "old").unwrap();

        let notes = discover_notes(root).unwrap();
        let rel: Vec<_> = notes.iter().map(|n| n.relative_path.clone()).collect();
        assert_eq!(rel, vec![PathBuf::from("a.md"), PathBuf::from("sub/trip.md")]);

        assert!(notes[0].attachment_dir.is_none());
        assert!(notes[0].attachment_files().is_empty());
        assert_eq!(notes[1].attachment_dir.as_deref(), Some(root.join("sub/trip").as_path()));
        assert_eq!(
            notes[1].attachment_files(),
            vec![
                root.join("sub/trip/days/monday.md"),
                root.join("sub/trip/map.svg"),
                root.join("sub/trip/readme.md"),
            ]
        );
        assert_eq!(
            notes[1].output_path(Path::new("/out")),
            PathBuf::from("/out/sub/trip.md")
        );
    }
}
