use crate::converter::ConversionTag;
use crate::note::{Attachment, Note};
use crate::process::NoteOutcome;
use crate::stats::ProcessingStats;

/// Lifecycle hooks the pipeline calls while it runs. Every method defaults to
/// doing nothing; the binary implements this with a progress bar.
///
/// With `jobs > 1` the hooks are called from worker threads.
pub trait ProgressObserver: Sync {
    fn run_started(&self, _notes: usize) {}
    fn note_started(&self, _note: &Note) {}
    fn note_finished(&self, _note: &Note, _outcome: NoteOutcome) {}
    fn attachment_started(&self, _attachment: &Attachment) {}
    fn attachment_finished(&self, _attachment: &Attachment, _tag: ConversionTag) {}
    fn run_finished(&self, _stats: &ProcessingStats) {}
}

pub struct NullObserver;

impl ProgressObserver for NullObserver {}
