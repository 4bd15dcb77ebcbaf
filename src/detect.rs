use crate::note::Note;
use crate::utils::modified_time;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Why a note does or does not need regenerating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Forced,
    MissingOutput,
    NoteNewer,
    AttachmentNewer(PathBuf),
    /// Some modification time could not be read.
    UnknownTime(PathBuf),
    Fresh,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// Compare the note and the files in its attachment folder against the
/// existing output. Never reads the note text.
pub fn should_process(note: &Note, output: &Path, force: bool) -> Staleness {
    if force {
        return Staleness::Forced;
    }
    if !output.exists() {
        return Staleness::MissingOutput;
    }
    let attachments = note
        .attachment_files()
        .into_iter()
        .map(|p| (modified_time(&p), p));
    compare(note.modified, &note.source_path, attachments, output)
}

fn compare(
    note_modified: Option<SystemTime>,
    note_path: &Path,
    attachments: impl IntoIterator<Item = (Option<SystemTime>, PathBuf)>,
    output: &Path,
) -> Staleness {
    let Some(output_modified) = modified_time(output) else {
        return Staleness::UnknownTime(output.to_path_buf());
    };
    match note_modified {
        None => return Staleness::UnknownTime(note_path.to_path_buf()),
        Some(t) if t > output_modified => return Staleness::NoteNewer,
        Some(_) => {}
    }
    for (modified, path) in attachments {
        match modified {
            None => return Staleness::UnknownTime(path),
            Some(t) if t > output_modified => return Staleness::AttachmentNewer(path),
            Some(_) => {}
        }
    }
    Staleness::Fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    struct Layout {
        dir: TempDir,
        note: PathBuf,
        output: PathBuf,
    }

    fn layout(with_folder: bool) -> Layout {
        let dir = TempDir::new().unwrap();
        let note = dir.path().join("src/trip.md");
        fs::create_dir_all(note.parent().unwrap()).unwrap();
        fs::write(&note, "![m](trip/map.svg)").unwrap();
        if with_folder {
            fs::create_dir_all(dir.path().join("src/trip")).unwrap();
            fs::write(dir.path().join("src/trip/map.svg"), "<svg/>").unwrap();
        }
        let output = dir.path().join("out/trip.md");
        Layout { dir, note, output }
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn load(l: &Layout) -> Note {
        Note::from_path(&l.dir.path().join("src"), &l.note)
    }

    #[test]
    fn force_and_missing_output() {
        let l = layout(false);
        assert_eq!(should_process(&load(&l), &l.output, true), Staleness::Forced);
        assert_eq!(should_process(&load(&l), &l.output, false), Staleness::MissingOutput);
    }

    #[test]
    fn zero_attachments_compare_note_only() {
        let l = layout(false);
        fs::create_dir_all(l.output.parent().unwrap()).unwrap();
        fs::write(&l.output, "out").unwrap();

        set_mtime(&l.note, at(10));
        set_mtime(&l.output, at(20));
        assert_eq!(should_process(&load(&l), &l.output, false), Staleness::Fresh);

        set_mtime(&l.note, at(30));
        assert_eq!(should_process(&load(&l), &l.output, false), Staleness::NoteNewer);
    }

    #[test]
    fn newer_attachment_makes_note_stale() {
        let l = layout(true);
        let map = l.dir.path().join("src/trip/map.svg");
        fs::create_dir_all(l.output.parent().unwrap()).unwrap();
        fs::write(&l.output, "out").unwrap();

        set_mtime(&l.note, at(10));
        set_mtime(&map, at(10));
        set_mtime(&l.output, at(20));
        assert!(!should_process(&load(&l), &l.output, false).is_stale());

        set_mtime(&map, at(30));
        assert_eq!(
            should_process(&load(&l), &l.output, false),
            Staleness::AttachmentNewer(map)
        );
    }

    fn none() -> Vec<(Option<SystemTime>, PathBuf)> {
        Vec::new()
    }

    #[test]
    fn unknown_times_fail_open() {
        let output = Path::new("/definitely/missing/out.md");
        assert!(compare(Some(at(0)), Path::new("n.md"), none(), output).is_stale());

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.md");
        fs::write(&output, "x").unwrap();
        assert_eq!(
            compare(None, Path::new("n.md"), none(), &output),
            Staleness::UnknownTime(PathBuf::from("n.md"))
        );
        set_mtime(&output, at(20));
        assert_eq!(
            compare(Some(at(0)), Path::new("n.md"), [(None, PathBuf::from("a.png"))], &output),
            Staleness::UnknownTime(PathBuf::from("a.png"))
        );
    }
}
