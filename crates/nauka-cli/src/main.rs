use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;
mod settings;

use nauka_archive::JsonlArchive;
use nauka_core::config_file::ConfigFile;
use nauka_core::pipeline::{ExtractorFactory, ScorerFactory};
use nauka_core::{Config, RuleScorer, Scorer, StandardWorkerFactory, TextExtractor};
use nauka_pdf_mupdf::MupdfBackend;
use output::{ColorMode, HarvestProgress};
use settings::ConfigArgs;

/// bibliotekanauki.pl harvester - Build a Polish scientific text corpus over OAI-PMH
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. "debug" or "nauka_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the catalog, download and score every document, publish the corpus
    Harvest {
        #[command(flatten)]
        config: ConfigArgs,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Crawl the catalog only and list qualifying entries (no downloads)
    Catalog {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write entries as JSON Lines to this file instead of printing them
        #[arg(long)]
        output: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    match cli.command {
        Command::Harvest { config, no_color } => {
            let config = settings::resolve(&config)?;
            harvest(config, no_color).await
        }
        Command::Catalog {
            config,
            output,
            no_color,
        } => {
            let config = settings::resolve(&config)?;
            catalog(config, output, no_color).await
        }
        Command::Config { config } => {
            let config = settings::resolve(&config)?;
            print!("{}", ConfigFile::from_config(&config).to_toml()?);
            Ok(())
        }
    }
}

const LOG_TARGETS: &[&str] = &[
    "nauka",
    "nauka_oai",
    "nauka_core",
    "nauka_archive",
    "nauka_pdf_mupdf",
];

/// Install the global subscriber. The returned guard flushes the log file on drop.
fn init_tracing(
    level: Option<&str>,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = match level {
        Some(level) if level.contains('=') => EnvFilter::try_new(level)?,
        Some(level) => EnvFilter::try_new(directives(level))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives("info"))),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            builder.with_writer(writer).with_ansi(false).init();
            Ok(Some(guard))
        }
        None => {
            builder.with_writer(std::io::stderr).init();
            Ok(None)
        }
    }
}

fn directives(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Cancel `cancel` on the first Ctrl+C.
fn spawn_ctrl_c_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight documents");
            cancel.cancel();
        }
    });
}

async fn harvest(config: Config, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let client = config.http_client()?;

    let sink = JsonlArchive::create(&config.data_dir).with_context(|| {
        format!(
            "Cannot create archive in data directory {}",
            config.data_dir.display()
        )
    })?;

    let display = HarvestProgress::new();
    let progress = display.callback();

    let extractor: ExtractorFactory =
        Arc::new(|| Box::new(MupdfBackend::new()) as Box<dyn TextExtractor>);
    let scorer: ScorerFactory = Arc::new(|| Box::new(RuleScorer::new()) as Box<dyn Scorer>);
    let factory = Arc::new(StandardWorkerFactory::new(
        &config,
        client,
        extractor,
        scorer,
        progress.clone(),
    ));

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(&cancel);

    let report = nauka_core::harvest(&config, factory, sink, progress, cancel.clone()).await;
    display.finish();
    let report = report?;

    let mut stdout = std::io::stdout();
    output::print_harvest_summary(&mut stdout, &report, cancel.is_cancelled(), color)?;
    Ok(())
}

async fn catalog(config: Config, output: Option<PathBuf>, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color && output.is_none());
    let crawler = config.catalog_crawler(config.http_client()?).await;

    let mut writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Cannot create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(&cancel);

    let stream = crawler.spawn(config.repositories.clone(), 64, cancel);
    let mut count = 0u64;
    while let Ok(entry) = stream.entries.recv().await {
        count += 1;
        if output.is_some() {
            serde_json::to_writer(&mut writer, &entry)?;
            writeln!(writer)?;
        } else {
            output::print_entry(&mut writer, count, &entry, color)?;
        }
    }
    writer.flush()?;

    let summary = stream.handle.await.context("catalog crawl task failed")?;

    let mut stderr = std::io::stderr();
    output::print_crawl_summary(&mut stderr, &summary, color)?;
    if let Some(path) = output {
        writeln!(stderr, "\n  {} entries written to {}", count, path.display())?;
    }
    Ok(())
}
