use indicatif::{ProgressBar, ProgressStyle};
use notes_consolidate::converter::ConversionTag;
use notes_consolidate::note::{Attachment, Note};
use notes_consolidate::observer::ProgressObserver;
use notes_consolidate::process::NoteOutcome;
use notes_consolidate::stats::ProcessingStats;

/// Progress bar over notes. In verbose mode each finished note and each failed
/// attachment is also printed above the bar.
pub struct BarObserver {
    bar: ProgressBar,
    verbose: bool,
}

impl BarObserver {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar
        };
        Self { bar, verbose }
    }
}

impl ProgressObserver for BarObserver {
    fn run_started(&self, notes: usize) {
        self.bar.set_length(notes as u64);
    }

    fn note_started(&self, note: &Note) {
        self.bar.set_message(note.relative_path.display().to_string());
    }

    fn note_finished(&self, note: &Note, outcome: NoteOutcome) {
        if self.verbose && outcome != NoteOutcome::Unchanged {
            let label = match outcome {
                NoteOutcome::Processed => "Wrote",
                NoteOutcome::Skipped => "Would write",
                NoteOutcome::Errored => "Failed",
                NoteOutcome::Unchanged => "Unchanged",
            };
            self.bar
                .println(format!("{}: {}", label, note.relative_path.display()));
        }
        self.bar.inc(1);
    }

    fn attachment_finished(&self, attachment: &Attachment, tag: ConversionTag) {
        if self.verbose && tag != ConversionTag::Success {
            self.bar.println(format!(
                "  [{}] {}",
                tag.as_str(),
                attachment.file_name()
            ));
        }
    }

    fn run_finished(&self, _stats: &ProcessingStats) {
        self.bar.finish_and_clear();
    }
}
