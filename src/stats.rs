use crate::converter::{ConversionTag, Converted};
use crate::error::ConvertError;
use crate::process::{NoteOutcome, NoteReport};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Failure messages kept for the verbose summary.
const MAX_FAILURES: usize = 20;

/// Buckets for the per-category error breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conversion,
    Service,
    Unsupported,
    Io,
}

impl ErrorCategory {
    pub fn from_error(e: &ConvertError) -> Self {
        match e {
            ConvertError::UnsupportedFormat(_) => ErrorCategory::Unsupported,
            ConvertError::Conversion(_) | ConvertError::Unavailable(_) => ErrorCategory::Conversion,
            ConvertError::Service(_) => ErrorCategory::Service,
            ConvertError::Io(_) => ErrorCategory::Io,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conversion => "conversion",
            ErrorCategory::Service => "service",
            ErrorCategory::Unsupported => "unsupported",
            ErrorCategory::Io => "io",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NoteCounts {
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub unchanged: usize,
}

/// Attachment-level counters. External references are counted apart and
/// never appear in `total`, `processed` or `errored`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttachmentTally {
    /// Local references, resolved or not.
    pub total: usize,
    pub processed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub external: usize,
    pub from_cache: usize,
    pub fallbacks: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub failures: Vec<String>,
}

impl AttachmentTally {
    pub fn record(&mut self, converted: &Converted) {
        self.total += 1;
        if converted.from_cache {
            self.from_cache += 1;
        }
        match converted.tag {
            ConversionTag::Success => self.processed += 1,
            ConversionTag::Fallback => {
                self.processed += 1;
                self.fallbacks += 1;
            }
            ConversionTag::Skipped => self.skipped += 1,
            ConversionTag::Error => match &converted.failure {
                Some((category, message)) => self.record_failure(*category, message.clone()),
                None => self.record_failure(ErrorCategory::Conversion, String::new()),
            },
        }
    }

    /// A local reference that never reached the converter.
    pub fn record_unconverted(&mut self, category: ErrorCategory, message: String) {
        self.total += 1;
        self.record_failure(category, message);
    }

    fn record_failure(&mut self, category: ErrorCategory, message: String) {
        self.errored += 1;
        *self.by_category.entry(category).or_default() += 1;
        if !message.is_empty() && self.failures.len() < MAX_FAILURES {
            self.failures.push(message);
        }
    }

    pub fn merge(&mut self, other: &AttachmentTally) {
        self.total += other.total;
        self.processed += other.processed;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.external += other.external;
        self.from_cache += other.from_cache;
        self.fallbacks += other.fallbacks;
        for (category, n) in &other.by_category {
            *self.by_category.entry(*category).or_default() += n;
        }
        let room = MAX_FAILURES.saturating_sub(self.failures.len());
        self.failures.extend(other.failures.iter().take(room).cloned());
    }
}

/// Counters for one run. Owned by the orchestrator and updated only as each
/// note's report comes back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub notes: NoteCounts,
    pub attachments: AttachmentTally,
    pub note_failures: Vec<String>,
}

impl ProcessingStats {
    pub fn record(&mut self, report: &NoteReport) {
        match report.outcome {
            NoteOutcome::Processed => self.notes.processed += 1,
            NoteOutcome::Skipped => self.notes.skipped += 1,
            NoteOutcome::Unchanged => self.notes.unchanged += 1,
            NoteOutcome::Errored => {
                self.notes.errored += 1;
                if let Some(e) = &report.error
                    && self.note_failures.len() < MAX_FAILURES
                {
                    self.note_failures
                        .push(format!("{}: {}", report.relative_path.display(), e));
                }
            }
        }
        self.attachments.merge(&report.attachments);
    }

    pub fn total_notes(&self) -> usize {
        let n = &self.notes;
        n.processed + n.skipped + n.errored + n.unchanged
    }

    pub fn has_errors(&self) -> bool {
        self.notes.errored > 0 || self.attachments.errored > 0
    }

    /// Human-readable end-of-run report. `verbose` adds the first failure messages.
    pub fn summary(&self, verbose: bool) -> String {
        let n = &self.notes;
        let a = &self.attachments;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Notes: {} processed, {} unchanged, {} skipped, {} errored ({} total)",
            n.processed,
            n.unchanged,
            n.skipped,
            n.errored,
            self.total_notes()
        );
        let _ = writeln!(
            out,
            "Attachments: {} local ({} converted, {} via fallback, {} from cache, {} skipped, {} errored)",
            a.total, a.processed, a.fallbacks, a.from_cache, a.skipped, a.errored
        );
        let _ = writeln!(out, "External references: {} (left unchanged)", a.external);
        if !a.by_category.is_empty() {
            let parts: Vec<String> = a
                .by_category
                .iter()
                .map(|(c, n)| format!("{}={}", c.as_str(), n))
                .collect();
            let _ = writeln!(out, "Attachment errors by type: {}", parts.join(", "));
        }
        if verbose {
            for failure in self.note_failures.iter().chain(&a.failures) {
                let _ = writeln!(out, "  - {}", failure);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn converted(tag: ConversionTag, failure: Option<(ErrorCategory, &str)>) -> Converted {
        Converted {
            snippet: String::new(),
            tag,
            from_cache: false,
            failure: failure.map(|(c, m)| (c, m.to_string())),
        }
    }

    #[test]
    fn tally_counts_tags() {
        let mut t = AttachmentTally::default();
        t.record(&converted(ConversionTag::Success, None));
        t.record(&converted(ConversionTag::Fallback, None));
        t.record(&converted(ConversionTag::Skipped, None));
        t.record(&converted(
            ConversionTag::Error,
            Some((ErrorCategory::Service, "a.png: quota")),
        ));
        t.record_unconverted(ErrorCategory::NotFound, "chart.png: missing".into());

        assert_eq!(t.total, 5);
        assert_eq!(t.processed, 2);
        assert_eq!(t.fallbacks, 1);
        assert_eq!(t.skipped, 1);
        assert_eq!(t.errored, 2);
        assert_eq!(t.by_category[&ErrorCategory::NotFound], 1);
        assert_eq!(t.failures.len(), 2);
    }

    #[test]
    fn stats_aggregate_reports() {
        let mut attachments = AttachmentTally::default();
        attachments.external = 2;
        attachments.record_unconverted(ErrorCategory::NotFound, "x".into());

        let mut stats = ProcessingStats::default();
        stats.record(&NoteReport {
            relative_path: PathBuf::from("a.md"),
            outcome: NoteOutcome::Processed,
            attachments,
            error: None,
        });
        stats.record(&NoteReport {
            relative_path: PathBuf::from("b.md"),
            outcome: NoteOutcome::Errored,
            attachments: AttachmentTally::default(),
            error: Some("Failed to read note".into()),
        });

        assert_eq!(stats.notes.processed, 1);
        assert_eq!(stats.notes.errored, 1);
        assert_eq!(stats.attachments.external, 2);
        assert_eq!(stats.attachments.errored, 1);
        assert!(stats.has_errors());

        let text = stats.summary(true);
        assert!(text.contains("Notes: 1 processed, 0 unchanged, 0 skipped, 1 errored (2 total)"));
        assert!(text.contains("External references: 2"));
        assert!(text.contains("not_found=1"));
        assert!(text.contains("  - b.md: Failed to read note"));
    }
}
