use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{HumanBytes, HumanCount, MultiProgress, ProgressBar, ProgressStyle};
use nauka_core::{CatalogEntry, CrawlSummary, HarvestReport, ProgressEvent, ProgressFn};
use nauka_oai::RepositoryOutcome;
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Live progress display for a harvest: one summary spinner plus one line per
/// active worker.
pub struct HarvestProgress {
    multi: MultiProgress,
    main: ProgressBar,
    workers: Mutex<HashMap<usize, ProgressBar>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    bytes: AtomicU64,
    idle_style: ProgressStyle,
    download_style: ProgressStyle,
}

impl HarvestProgress {
    pub fn new() -> Arc<Self> {
        let multi = MultiProgress::new();
        let main = multi.add(ProgressBar::new_spinner());
        main.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}").unwrap());
        main.set_message("Loading robots.txt and catalog...");
        main.enable_steady_tick(Duration::from_millis(120));

        Arc::new(Self {
            multi,
            main,
            workers: Mutex::new(HashMap::new()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            idle_style: ProgressStyle::with_template("  {spinner:.cyan} {prefix} {msg} {bytes}")
                .unwrap(),
            download_style: ProgressStyle::with_template(
                "  {spinner:.cyan} {prefix} {msg} [{bar:30.cyan/dim}] {bytes}/{total_bytes}",
            )
            .unwrap()
            .progress_chars("=> "),
        })
    }

    pub fn callback(self: &Arc<Self>) -> ProgressFn {
        let this = Arc::clone(self);
        Arc::new(move |event| this.handle(event))
    }

    fn worker_bar(&self, worker: usize) -> ProgressBar {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .entry(worker)
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(self.idle_style.clone());
                bar.set_prefix(format!("#{}", worker));
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            })
            .clone()
    }

    fn update_counts(&self) {
        self.main.set_message(format!(
            "{} accepted, {} rejected, {} downloaded",
            HumanCount(self.accepted.load(Ordering::Relaxed)),
            HumanCount(self.rejected.load(Ordering::Relaxed)),
            HumanBytes(self.bytes.load(Ordering::Relaxed)),
        ));
    }

    fn handle(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Processing { worker, title, .. } => {
                let bar = self.worker_bar(worker);
                bar.set_style(self.idle_style.clone());
                bar.set_length(0);
                bar.set_position(0);
                bar.set_message(truncate(&title, 40));
            }
            ProgressEvent::Downloading {
                worker,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.worker_bar(worker);
                if let Some(total) = total_bytes
                    && bar.length() != Some(total)
                {
                    bar.set_length(total);
                    bar.set_style(self.download_style.clone());
                }
                let previous = bar.position();
                bar.set_position(bytes_downloaded);
                self.bytes
                    .fetch_add(bytes_downloaded.saturating_sub(previous), Ordering::Relaxed);
            }
            ProgressEvent::Accepted { .. } => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                self.update_counts();
            }
            ProgressEvent::Rejected { .. } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                self.update_counts();
            }
            ProgressEvent::Finalizing => {
                let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
                for bar in workers.values() {
                    bar.finish_and_clear();
                }
                self.main.set_message("Writing archive and manifest...");
            }
        }
    }

    pub fn finish(&self) {
        self.main.finish_and_clear();
    }
}

/// Print the final harvest summary.
pub fn print_harvest_summary(
    w: &mut dyn Write,
    report: &HarvestReport,
    cancelled: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    let totals = &report.run.totals;

    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "SUMMARY".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{}", sep)?;
    }

    if cancelled {
        let msg = "Interrupted: the corpus below is partial.";
        if color.enabled() {
            writeln!(w, "  {}", msg.yellow())?;
        } else {
            writeln!(w, "  {}", msg)?;
        }
    }

    writeln!(
        w,
        "  Catalog entries: {} from {} pages",
        report.crawl.entries(),
        report.crawl.pages()
    )?;
    if color.enabled() {
        writeln!(w, "  {} {}", "Accepted:".green(), totals.documents)?;
    } else {
        writeln!(w, "  Accepted: {}", totals.documents)?;
    }
    let rejected = report.run.rejected();
    if rejected > 0 {
        if color.enabled() {
            writeln!(w, "  {} {}", "Rejected:".yellow(), rejected)?;
        } else {
            writeln!(w, "  Rejected: {}", rejected)?;
        }
        for (reason, count) in &report.run.rejections {
            let msg = format!("{}: {}", reason.replace('_', " "), count);
            if color.enabled() {
                writeln!(w, "    {}", msg.dimmed())?;
            } else {
                writeln!(w, "    {}", msg)?;
            }
        }
    }
    writeln!(w)?;
    writeln!(
        w,
        "  Characters: {}  Words: {}  Sentences: {}",
        HumanCount(totals.characters),
        HumanCount(totals.words),
        HumanCount(totals.sentences)
    )?;
    writeln!(
        w,
        "  Nouns: {}  Verbs: {}  Punctuation: {}  Symbols: {}",
        HumanCount(totals.nouns),
        HumanCount(totals.verbs),
        HumanCount(totals.punctuations),
        HumanCount(totals.symbols)
    )?;
    writeln!(w)?;
    writeln!(
        w,
        "  Archive:  {} ({})",
        report.run.archive_path.display(),
        HumanBytes(report.run.manifest.file_size)
    )?;
    writeln!(w, "  Manifest: {}", report.run.manifest_path.display())?;

    print_repository_problems(w, &report.crawl, color)?;
    writeln!(w)?;
    Ok(())
}

/// Print one qualifying catalog entry (dry run).
pub fn print_entry(
    w: &mut dyn Write,
    index: u64,
    entry: &CatalogEntry,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "[{}] {}", index, truncate(&entry.title, 70).bold())?;
        writeln!(w, "     {}", entry.download_url.dimmed())?;
    } else {
        writeln!(w, "[{}] {}", index, truncate(&entry.title, 70))?;
        writeln!(w, "     {}", entry.download_url)?;
    }
    Ok(())
}

/// Print per-repository results of a catalog crawl.
pub fn print_crawl_summary(
    w: &mut dyn Write,
    summary: &CrawlSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    for repo in &summary.repositories {
        let line = format!(
            "{}: {} pages, {} records, {} qualifying",
            repo.repository, repo.pages, repo.records, repo.entries
        );
        if color.enabled() {
            writeln!(w, "  {}", line.bold())?;
        } else {
            writeln!(w, "  {}", line)?;
        }
    }
    print_repository_problems(w, summary, color)?;
    Ok(())
}

fn print_repository_problems(
    w: &mut dyn Write,
    summary: &CrawlSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    for repo in &summary.repositories {
        let problem = match &repo.outcome {
            RepositoryOutcome::Exhausted | RepositoryOutcome::ReceiverClosed => continue,
            RepositoryOutcome::Abandoned(reason) => format!("abandoned: {}", reason),
            RepositoryOutcome::Disallowed => "disallowed by robots.txt".to_string(),
            RepositoryOutcome::Cancelled => "cancelled".to_string(),
        };
        let msg = format!("Repository {} {}", repo.repository, problem);
        if color.enabled() {
            writeln!(w, "  {}", msg.red())?;
        } else {
            writeln!(w, "  {}", msg)?;
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
