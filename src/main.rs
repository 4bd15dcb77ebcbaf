mod progress;

use clap::Parser;
use eyre::{Context, Result, eyre};
use notes_consolidate::cache::ConversionCache;
use notes_consolidate::paths::normalize_root;
use notes_consolidate::services::{
    CommandEngine, DEFAULT_API_BASE, DEFAULT_VISION_MODEL, OpenAiVision,
};
use notes_consolidate::utils::DEFAULT_VISION_PROMPT;
use notes_consolidate::{CachePolicy, Orchestrator, RunOptions};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Inline converted attachments into exported Markdown notes.
/// Notes whose source and attachments are older than the existing output are skipped.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder containing the exported notes.
    #[arg(value_name = "SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Folder the merged notes are written to. Must not be inside SOURCE_DIR.
    #[arg(value_name = "DEST_DIR")]
    dest_dir: Option<PathBuf>,

    /// Path to a specific configuration file (TOML, or YAML by extension).
    /// Defaults to $XDG_CONFIG_HOME/notes-consolidate/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Where conversion results are cached between runs.
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Regenerate every note, even when the output is up to date.
    #[arg(short, long)]
    force: bool,

    /// Do not send images to the vision model.
    #[arg(long)]
    skip_vision: bool,

    /// Report which notes would be regenerated without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Prompt sent with every image.
    #[arg(long, value_name = "TEXT")]
    vision_prompt: Option<String>,

    /// Vision model name.
    #[arg(long, value_name = "MODEL")]
    vision_model: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, value_name = "URL")]
    api_base_url: Option<String>,

    /// Document converter command; the attachment path is appended (default: markitdown).
    #[arg(long, value_name = "CMD")]
    converter: Option<String>,

    #[arg(long, value_enum, value_name = "POLICY")]
    cache_policy: Option<CachePolicy>,

    /// Number of notes processed in parallel.
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Delete the whole cache before doing anything else.
    #[arg(long)]
    clear_cache: bool,

    /// Delete cache entries older than this many days.
    #[arg(long, value_name = "DAYS")]
    prune_cache_days: Option<u64>,

    /// Print each note written and each attachment that did not convert cleanly.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the progress bar and summary.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    source_dir: Option<PathBuf>,
    dest_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    force: Option<bool>,
    skip_vision: Option<bool>,
    vision_prompt: Option<String>,
    vision_model: Option<String>,
    api_base_url: Option<String>,
    api_key: Option<String>,
    converter_command: Option<Vec<String>>,
    cache_policy: Option<CachePolicy>,
    jobs: Option<usize>,
    log_level: Option<String>,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("notes-consolidate"))
        .unwrap_or_else(|| PathBuf::from(".cbm/cache"))
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("notes-consolidate/config.toml"))
            .filter(|p| p.exists())
    };

    let Some(p) = path else {
        return Ok(FileConfig::default());
    };
    let content = fs::read_to_string(&p)
        .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
    let is_yaml = p
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml");
    if is_yaml {
        serde_yaml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
    } else {
        toml::from_str(&content).wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
    }
}

fn init_logging(level: Option<&str>, verbose: bool, quiet: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::ERROR
    } else {
        level
            .and_then(|l| l.parse().ok())
            .unwrap_or(LevelFilter::WARN)
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;
    init_logging(file_cfg.log_level.as_deref(), cli.verbose, cli.quiet);

    // 2. Cache maintenance runs before anything else
    let cache_dir = normalize_root(
        &cli.cache_dir
            .or(file_cfg.cache_dir)
            .unwrap_or_else(default_cache_dir),
    )?;
    let maintenance = cli.clear_cache || cli.prune_cache_days.is_some();
    if cli.clear_cache {
        ConversionCache::open(&cache_dir, CachePolicy::Disabled)?.clear()?;
        if !cli.quiet {
            eprintln!("Cleared cache at {}", cache_dir.display());
        }
    }
    if let Some(days) = cli.prune_cache_days {
        let removed = ConversionCache::open(&cache_dir, CachePolicy::ReadWrite)?
            .prune(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))?;
        if !cli.quiet {
            eprintln!("Pruned {} cache entries older than {} days", removed, days);
        }
    }

    // 3. Resolve roots (CLI > Config)
    let source_dir = cli.source_dir.or(file_cfg.source_dir);
    let dest_dir = cli.dest_dir.or(file_cfg.dest_dir);
    let (source_dir, dest_dir) = match (source_dir, dest_dir) {
        (Some(s), Some(d)) => (s, d),
        (None, None) if maintenance => return Ok(()),
        _ => {
            return Err(eyre!(
                "Both SOURCE_DIR and DEST_DIR are required.\nPass them as arguments or set source_dir/dest_dir in config.toml."
            ));
        }
    };

    // 4. Build the run options
    let mut options = RunOptions::new(source_dir, dest_dir);
    options.cache_dir = cache_dir;
    options.force = cli.force || file_cfg.force.unwrap_or(false);
    options.skip_vision = cli.skip_vision || file_cfg.skip_vision.unwrap_or(false);
    options.dry_run = cli.dry_run;
    options.cache_policy = cli
        .cache_policy
        .or(file_cfg.cache_policy)
        .unwrap_or_default();
    options.vision_prompt = cli
        .vision_prompt
        .or(file_cfg.vision_prompt)
        .unwrap_or_else(|| DEFAULT_VISION_PROMPT.to_string());
    options.jobs = cli.jobs.or(file_cfg.jobs).unwrap_or(1);

    // 5. Wire the external services
    let converter_command = match cli.converter {
        Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
        None => file_cfg.converter_command.unwrap_or_default(),
    };
    let mut orchestrator =
        Orchestrator::new(options.clone(), Box::new(CommandEngine::new(&converter_command)));

    let api_key = file_cfg
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    if !options.skip_vision
        && let Some(key) = api_key
    {
        let base_url = cli
            .api_base_url
            .or(file_cfg.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = cli
            .vision_model
            .or(file_cfg.vision_model)
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string());
        let vision = OpenAiVision::new(key, &base_url, &model)
            .wrap_err("Failed to set up the vision client")?;
        orchestrator = orchestrator.with_vision(Box::new(vision));
    }

    // 6. Run
    let observer = progress::BarObserver::new(cli.quiet, cli.verbose);
    let stats = orchestrator.run(&observer)?;

    if !cli.quiet {
        eprint!("{}", stats.summary(cli.verbose));
    }
    Ok(())
}
