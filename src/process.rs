use crate::converter::{AttachmentConverter, ConversionTag};
use crate::detect::should_process;
use crate::note::{Attachment, Note};
use crate::observer::ProgressObserver;
use crate::paths::{Resolution, resolve_reference};
use crate::references::{AttachmentReference, find_references, splice};
use crate::render::{self, Failure};
use crate::stats::{AttachmentTally, ErrorCategory};
use crate::utils::{RunOptions, atomic_write};
use eyre::{Context, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOutcome {
    Processed,
    /// Stale, but left alone (dry run).
    Skipped,
    Unchanged,
    Errored,
}

/// Everything the orchestrator needs to know about one note.
#[derive(Debug, Clone)]
pub struct NoteReport {
    pub relative_path: PathBuf,
    pub outcome: NoteOutcome,
    pub attachments: AttachmentTally,
    pub error: Option<String>,
}

pub struct NoteProcessor<'a> {
    converter: AttachmentConverter<'a>,
    options: &'a RunOptions,
    observer: &'a dyn ProgressObserver,
}

impl<'a> NoteProcessor<'a> {
    pub fn new(
        converter: AttachmentConverter<'a>,
        options: &'a RunOptions,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            converter,
            options,
            observer,
        }
    }

    /// Bring one note's output up to date. Failures end up in the report,
    /// never in the caller.
    pub fn process(&self, note: &Note) -> NoteReport {
        self.observer.note_started(note);
        let output = note.output_path(&self.options.dest_dir);
        let mut attachments = AttachmentTally::default();

        let staleness = should_process(note, &output, self.options.force);
        let (outcome, error) = if !staleness.is_stale() {
            (NoteOutcome::Unchanged, None)
        } else if self.options.dry_run {
            tracing::info!("Would process {} ({:?})", note.relative_path.display(), staleness);
            (NoteOutcome::Skipped, None)
        } else {
            tracing::debug!("Processing {} ({:?})", note.relative_path.display(), staleness);
            match self.merge(note, &output, &mut attachments) {
                Ok(()) => (NoteOutcome::Processed, None),
                Err(e) => {
                    tracing::error!("{}: {:#}", note.relative_path.display(), e);
                    (NoteOutcome::Errored, Some(format!("{:#}", e)))
                }
            }
        };

        self.observer.note_finished(note, outcome);
        NoteReport {
            relative_path: note.relative_path.clone(),
            outcome,
            attachments,
            error,
        }
    }

    fn merge(&self, note: &Note, output: &Path, tally: &mut AttachmentTally) -> Result<()> {
        let text = note
            .read_text()
            .wrap_err_with(|| format!("Failed to read note: {}", note.source_path.display()))?;

        // Spans are fixed before any conversion runs.
        let mut replacements: Vec<(Range<usize>, String)> = Vec::new();
        for reference in find_references(&text) {
            if reference.is_external() {
                tally.external += 1;
                continue;
            }
            if !reference.embed() {
                tracing::debug!("Embedding disabled for {}", reference.target);
                tally.skipped += 1;
                continue;
            }
            if let Some(snippet) = self.embed(note, &reference, tally) {
                replacements.push((reference.span.clone(), snippet));
            }
        }

        let merged = splice(&text, &replacements);
        atomic_write(output, merged.as_bytes())
            .wrap_err_with(|| format!("Failed to write output: {}", output.display()))?;
        Ok(())
    }

    fn embed(
        &self,
        note: &Note,
        reference: &AttachmentReference,
        tally: &mut AttachmentTally,
    ) -> Option<String> {
        let destination = reference.destination();
        let path = match resolve_reference(note.note_dir(), note.attachment_dir.as_deref(), destination) {
            Resolution::Local(path) => path,
            Resolution::External => {
                tally.external += 1;
                return None;
            }
            Resolution::NotFound(decoded) => {
                let message = format!("File not found: {}", decoded.display());
                tracing::warn!("{}: {}", note.relative_path.display(), message);
                self.report_unconverted(&decoded);
                let snippet = unconverted(&reference.raw, &decoded, "not_found", &message);
                tally.record_unconverted(ErrorCategory::NotFound, format!("{}: {}", name_of(&decoded), message));
                return Some(snippet);
            }
        };

        let attachment = match Attachment::load(&path) {
            Ok(a) => a,
            Err(e) => {
                let message = format!("Failed to read {}: {}", path.display(), e);
                self.report_unconverted(&path);
                let snippet = unconverted(&reference.raw, &path, "io_error", &message);
                tally.record_unconverted(ErrorCategory::Io, message);
                return Some(snippet);
            }
        };

        self.observer.attachment_started(&attachment);
        let converted = self.converter.convert(&attachment, &reference.raw);
        self.observer.attachment_finished(&attachment, converted.tag);
        tally.record(&converted);
        Some(converted.snippet)
    }

    fn report_unconverted(&self, path: &Path) {
        let attachment = Attachment::unresolved(path);
        self.observer.attachment_started(&attachment);
        self.observer.attachment_finished(&attachment, ConversionTag::Error);
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Placeholder for a reference that never reached the converter.
fn unconverted(reference: &str, path: &Path, error_type: &str, message: &str) -> String {
    let name = name_of(path);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    render::placeholder(
        reference,
        &Failure {
            file_name: &name,
            kind: None,
            extension: &ext,
            size: None,
            modified: None,
            error_type,
            primary_error: message,
            fallback_error: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConversionCache;
    use crate::error::ConvertError;
    use crate::observer::NullObserver;
    use crate::services::ConversionEngine;
    use crate::transcode::ToolTranscoder;
    use crate::utils::CachePolicy;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct UpperEngine;

    impl ConversionEngine for UpperEngine {
        fn name(&self) -> &str {
            "upper"
        }
        fn convert(&self, path: &Path) -> Result<String, ConvertError> {
            Ok(fs::read_to_string(path)?.to_uppercase())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ProgressObserver for Recorder {
        fn attachment_started(&self, attachment: &Attachment) {
            self.events.lock().unwrap().push(format!("start {}", attachment.file_name()));
        }
        fn attachment_finished(&self, attachment: &Attachment, tag: ConversionTag) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {}", tag.as_str(), attachment.file_name()));
        }
    }

    fn run(source: &str, files: &[(&str, &str)], options: impl FnOnce(&mut RunOptions)) -> (NoteReport, String) {
        run_observed(source, files, options, &NullObserver)
    }

    fn run_observed(
        source: &str,
        files: &[(&str, &str)],
        options: impl FnOnce(&mut RunOptions),
        observer: &dyn ProgressObserver,
    ) -> (NoteReport, String) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("trip")).unwrap();
        fs::write(src.join("trip.md"), source).unwrap();
        for (name, body) in files {
            fs::write(src.join("trip").join(name), body).unwrap();
        }
        let mut opts = RunOptions::new(&src, dir.path().join("out"));
        options(&mut opts);

        let cache = ConversionCache::open(&opts.cache_dir, CachePolicy::ReadWrite).unwrap();
        let converter = AttachmentConverter::new(&cache, &UpperEngine, None, &ToolTranscoder, &opts);
        let processor = NoteProcessor::new(converter, &opts, observer);
        let note = Note::from_path(&src, &src.join("trip.md"));
        let report = processor.process(&note);
        let output = fs::read_to_string(note.output_path(&opts.dest_dir)).unwrap_or_default();
        (report, output)
    }

    #[test]
    fn splices_in_reference_order() {
        let source = "Intro\n[a](trip/a.txt) mid [b](trip/b.txt)\n[web](https://example.com/x.pdf)\nEnd\n";
        let (report, output) = run(source, &[("a.txt", "first"), ("b.txt", "second")], |_| {});

        assert_eq!(report.outcome, NoteOutcome::Processed);
        assert_eq!(report.attachments.processed, 2);
        assert_eq!(report.attachments.external, 1);
        assert!(output.starts_with("Intro\n[a](trip/a.txt)\n"));
        let first = output.find("FIRST").unwrap();
        let second = output.find("SECOND").unwrap();
        assert!(first < second);
        assert!(output.contains("\n[web](https://example.com/x.pdf)\nEnd\n"));
    }

    #[test]
    fn missing_file_becomes_placeholder() {
        let (report, output) = run("![chart](notes/chart.png \"external\")\n", &[], |_| {});
        assert_eq!(report.outcome, NoteOutcome::Processed);
        assert_eq!(report.attachments.errored, 1);
        assert_eq!(report.attachments.by_category[&ErrorCategory::NotFound], 1);
        assert!(output.contains("chart.png"));
        assert!(output.contains("- **Error Type**: not_found"));
    }

    #[test]
    fn every_attachment_reports_its_outcome() {
        let recorder = Recorder::default();
        let source = "[a](trip/a.txt) ![gone](trip/gone.png)\n";
        let (report, _) = run_observed(source, &[("a.txt", "first")], |_| {}, &recorder);
        assert_eq!(report.attachments.total, 2);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start a.txt", "success a.txt", "start gone.png", "error gone.png"]
        );
    }

    #[test]
    fn embed_false_is_left_alone() {
        let source = "[a](trip/a.txt)<!-- {\"embed\": false} -->\n";
        let (report, output) = run(source, &[("a.txt", "first")], |_| {});
        assert_eq!(report.attachments.skipped, 1);
        assert_eq!(report.attachments.total, 0);
        assert_eq!(output, source);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (report, output) = run("[a](trip/a.txt)\n", &[("a.txt", "first")], |o| o.dry_run = true);
        assert_eq!(report.outcome, NoteOutcome::Skipped);
        assert!(output.is_empty());
    }
}
