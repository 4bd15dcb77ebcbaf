use crate::note::Note;
use crate::process::{NoteProcessor, NoteReport};
use crate::stats::ProcessingStats;
use crossbeam_channel::{bounded, unbounded};

/// Fan notes out to `jobs` workers. Each note has its own output path, so
/// workers never write the same file; reports come back to this thread,
/// which alone touches `stats`.
pub fn drive(
    notes: &[Note],
    processor: &NoteProcessor<'_>,
    jobs: usize,
    stats: &mut ProcessingStats,
) {
    let (tx, rx) = bounded::<&Note>(jobs * 2);
    let (report_tx, report_rx) = unbounded::<NoteReport>();

    std::thread::scope(|s| {
        for _ in 0..jobs {
            let rx = rx.clone();
            let report_tx = report_tx.clone();
            s.spawn(move || {
                while let Ok(note) = rx.recv() {
                    if report_tx.send(processor.process(note)).is_err() {
                        break;
                    }
                }
            });
        }

        drop(rx);
        drop(report_tx);

        for note in notes {
            if tx.send(note).is_err() {
                break;
            }
            for report in report_rx.try_iter() {
                stats.record(&report);
            }
        }
        drop(tx);

        for report in report_rx.iter() {
            stats.record(&report);
        }
    });
}
