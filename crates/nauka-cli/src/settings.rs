//! Configuration resolution: CLI flags > `NAUKA_*` environment > config file > defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Args;
use nauka_core::config_file::{self, ConfigFile};
use nauka_core::{Config, RobotsFallback};

/// Flags shared by every subcommand that needs a resolved configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Additional TOML config file, applied over the default locations
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Catalog host, e.g. https://bibliotekanauki.pl
    #[arg(long)]
    pub base_url: Option<String>,

    /// Comma-separated repositories to crawl, in order
    #[arg(long, value_delimiter = ',')]
    pub repositories: Vec<String>,

    /// OAI-PMH metadata format
    #[arg(long)]
    pub metadata_prefix: Option<String>,

    /// Required record language (ISO 639-2)
    #[arg(long)]
    pub language: Option<String>,

    /// Preferred title language (ISO 639-1)
    #[arg(long)]
    pub title_language: Option<String>,

    /// Minimum milliseconds between catalog requests (0 disables pacing)
    #[arg(long)]
    pub request_interval_ms: Option<u64>,

    /// Check catalog page URLs against robots.txt too
    #[arg(long)]
    pub gate_catalog: bool,

    /// Number of concurrent document workers
    #[arg(short = 'j', long)]
    pub num_workers: Option<usize>,

    /// Catalog entries queued beyond one per worker
    #[arg(long)]
    pub prefetch: Option<usize>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Total per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub user_agent: Option<String>,

    /// What to do when robots.txt cannot be fetched: deny or allow
    #[arg(long)]
    pub robots_fallback: Option<RobotsFallback>,

    /// Minimum extracted text length in characters
    #[arg(long)]
    pub min_text_chars: Option<usize>,

    /// Directory for the published archive and manifest
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Scratch directory for downloads and archive chunks
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Corpus name, used for the published file names
    #[arg(long)]
    pub corpus_name: Option<String>,
}

/// Resolve the effective configuration from every source.
pub fn resolve(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut file = config_file::load_config();
    if let Some(path) = &args.config {
        file = config_file::merge(file, load_explicit(path)?);
    }
    resolve_with(args, &file, |name| std::env::var(name).ok())
}

fn load_explicit(path: &Path) -> anyhow::Result<ConfigFile> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    config_file::load_from_path(path)
        .ok_or_else(|| anyhow::anyhow!("Could not parse config file {}", path.display()))
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", name, raw, e)),
    }
}

/// Resolution with an injectable environment lookup.
pub fn resolve_with(
    args: &ConfigArgs,
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut config = Config::default();
    file.apply(&mut config);

    // Environment
    if let Some(v) = env("NAUKA_BASE_URL") {
        config.base_url = v;
    }
    if let Some(v) = env("NAUKA_REPOSITORIES") {
        config.repositories = split_list(&v);
    }
    if let Some(v) = env("NAUKA_LANGUAGE") {
        config.language = v;
    }
    if let Some(ms) = parse_env::<u64>(&env, "NAUKA_REQUEST_INTERVAL_MS")? {
        config.request_interval = interval(ms);
    }
    if let Some(v) = parse_env::<bool>(&env, "NAUKA_GATE_CATALOG")? {
        config.gate_catalog = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_NUM_WORKERS")? {
        config.num_workers = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_PREFETCH")? {
        config.prefetch = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_CONNECT_TIMEOUT")? {
        config.connect_timeout_secs = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_TIMEOUT")? {
        config.download_timeout_secs = v;
    }
    if let Some(v) = env("NAUKA_USER_AGENT") {
        config.user_agent = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_ROBOTS_FALLBACK")? {
        config.robots_fallback = v;
    }
    if let Some(v) = parse_env(&env, "NAUKA_MIN_TEXT_CHARS")? {
        config.min_text_chars = v;
    }
    if let Some(v) = env("NAUKA_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(v);
    }
    if let Some(v) = env("NAUKA_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }

    // CLI flags
    if let Some(v) = &args.base_url {
        config.base_url = v.clone();
    }
    if !args.repositories.is_empty() {
        config.repositories = args.repositories.clone();
    }
    if let Some(v) = &args.metadata_prefix {
        config.metadata_prefix = v.clone();
    }
    if let Some(v) = &args.language {
        config.language = v.clone();
    }
    if let Some(v) = &args.title_language {
        config.title_language = v.clone();
    }
    if let Some(ms) = args.request_interval_ms {
        config.request_interval = interval(ms);
    }
    if args.gate_catalog {
        config.gate_catalog = true;
    }
    if let Some(v) = args.num_workers {
        config.num_workers = v;
    }
    if let Some(v) = args.prefetch {
        config.prefetch = v;
    }
    if let Some(v) = args.connect_timeout {
        config.connect_timeout_secs = v;
    }
    if let Some(v) = args.timeout {
        config.download_timeout_secs = v;
    }
    if let Some(v) = &args.user_agent {
        config.user_agent = v.clone();
    }
    if let Some(v) = args.robots_fallback {
        config.robots_fallback = v;
    }
    if let Some(v) = args.min_text_chars {
        config.min_text_chars = v;
    }
    if let Some(v) = &args.output_dir {
        config.output_dir = v.clone();
    }
    if let Some(v) = &args.data_dir {
        config.data_dir = v.clone();
    }
    if let Some(v) = &args.corpus_name {
        config.manifest.name = v.clone();
    }

    if config.repositories.is_empty() {
        anyhow::bail!("No repositories to crawl");
    }
    if config.num_workers == 0 {
        anyhow::bail!("num_workers must be at least 1");
    }
    Ok(config)
}

fn interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
