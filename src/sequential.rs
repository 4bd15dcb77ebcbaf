use crate::note::Note;
use crate::process::NoteProcessor;
use crate::stats::ProcessingStats;

/// One note after another on the calling thread.
pub fn drive(notes: &[Note], processor: &NoteProcessor<'_>, stats: &mut ProcessingStats) {
    for note in notes {
        let report = processor.process(note);
        stats.record(&report);
    }
}
