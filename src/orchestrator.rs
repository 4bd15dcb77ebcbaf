use crate::cache::ConversionCache;
use crate::converter::AttachmentConverter;
use crate::error::ConfigError;
use crate::note::discover_notes;
use crate::observer::ProgressObserver;
use crate::parallel;
use crate::paths::normalize_root;
use crate::process::NoteProcessor;
use crate::sequential;
use crate::services::{ConversionEngine, VisionService};
use crate::stats::ProcessingStats;
use crate::transcode::{ImageTranscoder, ToolTranscoder};
use crate::utils::{CachePolicy, RunOptions};
use eyre::{Context, Result};
use std::fs;

/// Owns the run options and the external services for one run.
pub struct Orchestrator {
    options: RunOptions,
    engine: Box<dyn ConversionEngine>,
    vision: Option<Box<dyn VisionService>>,
    transcoder: Box<dyn ImageTranscoder>,
}

impl Orchestrator {
    pub fn new(options: RunOptions, engine: Box<dyn ConversionEngine>) -> Self {
        Self {
            options,
            engine,
            vision: None,
            transcoder: Box::new(ToolTranscoder),
        }
    }

    pub fn with_vision(mut self, vision: Box<dyn VisionService>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_transcoder(mut self, transcoder: Box<dyn ImageTranscoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Check the roots and credentials, then process every note under the
    /// source root. Only setup problems are returned as errors; per-note
    /// failures are counted in the stats.
    pub fn run(&self, observer: &dyn ProgressObserver) -> Result<ProcessingStats> {
        let options = self.prepare()?;

        let notes = discover_notes(&options.source_dir).wrap_err_with(|| {
            format!("Failed to scan source directory: {}", options.source_dir.display())
        })?;
        tracing::info!(
            "Found {} notes in {}",
            notes.len(),
            options.source_dir.display()
        );

        // A dry run must leave the disk alone, cache included.
        let policy = if options.dry_run {
            CachePolicy::Disabled
        } else {
            options.cache_policy
        };
        let cache = ConversionCache::open(&options.cache_dir, policy)
            .wrap_err("Failed to open conversion cache")?;

        let converter = AttachmentConverter::new(
            &cache,
            self.engine.as_ref(),
            self.vision.as_deref(),
            self.transcoder.as_ref(),
            &options,
        );
        let processor = NoteProcessor::new(converter, &options, observer);

        observer.run_started(notes.len());
        let mut stats = ProcessingStats::default();
        if options.jobs > 1 {
            parallel::drive(&notes, &processor, options.jobs, &mut stats);
        } else {
            sequential::drive(&notes, &processor, &mut stats);
        }
        observer.run_finished(&stats);

        Ok(stats)
    }

    fn prepare(&self) -> Result<RunOptions, ConfigError> {
        let mut options = self.options.clone();
        options.source_dir = normalize_root(&self.options.source_dir)?;
        options.dest_dir = normalize_root(&self.options.dest_dir)?;
        options.cache_dir = normalize_root(&self.options.cache_dir)?;

        if !options.source_dir.exists() {
            return Err(ConfigError::MissingSource(options.source_dir));
        }
        if !options.source_dir.is_dir() {
            return Err(ConfigError::SourceNotDirectory(options.source_dir));
        }
        if options.dest_dir.starts_with(&options.source_dir) {
            return Err(ConfigError::DestinationInsideSource(options.dest_dir));
        }
        if !options.skip_vision && !options.dry_run && self.vision.is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        if !options.dry_run {
            fs::create_dir_all(&options.dest_dir)
                .map_err(|e| ConfigError::Directory(options.dest_dir.clone(), e))?;
        }
        options.jobs = options.jobs.max(1);
        Ok(options)
    }
}
