//! Crawl command: run a batch of jobs through the pipeline.

use std::path::Path;
use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncReadExt;

use crate::cli::icons::{dim_arrow, error, info, success, warn};
use newsacquire::config::Settings;
use newsacquire::crawler::{CancelSignal, CrawlError, Crawler, JobResult};
use newsacquire::fetch::StrategyTable;
use newsacquire::models::CrawlJob;
use newsacquire::resilience::strategy_cache::{load_strategies, save_strategies};
use newsacquire::storage::{ArticleSink, InMemorySink, PersistOutcome, SqliteSink};

async fn read_jobs(path: &Path) -> anyhow::Result<Vec<CrawlJob>> {
    let input = if path.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?
    };

    CrawlJob::parse_lines(&input)
        .map_err(|(line, msg)| anyhow::anyhow!("Invalid job on line {}: {}", line, msg))
}

/// Crawl every job in the file and report per-origin results.
pub async fn cmd_crawl(
    settings: &Settings,
    jobs_path: &Path,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let jobs = read_jobs(jobs_path).await?;
    if jobs.is_empty() {
        eprintln!("{} No jobs to run", warn());
        return Ok(());
    }

    let fetchers = StrategyTable::from_settings(settings)?;
    let sink: Arc<dyn ArticleSink> = if dry_run {
        Arc::new(InMemorySink::new())
    } else {
        Arc::new(SqliteSink::open(&settings.database_path)?)
    };
    let crawler = Crawler::new(settings, fetchers, sink.clone());

    match load_strategies(crawler.registry(), &settings.strategy_cache_path).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Loaded {} learned strategies", n),
        Err(e) => tracing::warn!("Ignoring strategy cache: {}", e),
    }

    eprintln!(
        "{} Crawling {} jobs ({} validation, concurrency {})",
        info(),
        jobs.len(),
        crawler.validation_mode(),
        settings.concurrency
    );

    let (handle, cancel) = CancelSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let progress = ProgressBar::new(jobs.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("█▓░"),
    );

    let verbose = super::is_verbose();
    let on_done = |done: &JobResult| {
        progress.inc(1);
        progress.set_message(done.job.url.clone());
        match &done.result {
            Ok(report) if verbose => progress.println(format!(
                "{} {} ({}, {})",
                success(),
                report.canonical_url,
                report.strategy,
                report.fallback_level.as_str()
            )),
            Ok(_) => {}
            Err(CrawlError::Cancelled) => {}
            Err(e) => progress.println(format!("{} {}", error(), e)),
        }
    };

    let results = crawler.run(jobs, &cancel, on_done).await;
    progress.finish_and_clear();
    let results = results?;

    match save_strategies(crawler.registry(), &settings.strategy_cache_path).await {
        Ok(n) => tracing::info!("Saved {} learned strategies", n),
        Err(e) => tracing::warn!("Could not save strategy cache: {}", e),
    }

    let stats = crawler.stats().await;
    stats.log_summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let cancelled = results
        .iter()
        .filter(|r| matches!(r.result, Err(CrawlError::Cancelled)))
        .count();
    let inserted = results
        .iter()
        .filter(|r| matches!(&r.result, Ok(rep) if rep.outcome == PersistOutcome::Inserted))
        .count();

    println!(
        "{} {} stored, {} duplicates, {} rejected, {} failed",
        success(),
        style(inserted).green(),
        stats.total_duplicates(),
        stats.total_rejected(),
        stats.total_failed()
    );
    if cancelled > 0 {
        println!("{} {} jobs cancelled", warn(), cancelled);
    }
    for (origin, origin_stats) in &stats.origins {
        let circuit = origin_stats
            .circuit_state
            .map(|s| s.as_str())
            .unwrap_or("-");
        let strategy = origin_stats
            .learned_strategy
            .map(|s| s.as_str())
            .unwrap_or("-");
        println!(
            "  {} {:<30} {:>4} stored  circuit {:<9} strategy {}",
            dim_arrow(),
            origin,
            origin_stats.inserted,
            circuit,
            strategy
        );
    }
    if !dry_run {
        println!(
            "  {} Database: {}",
            dim_arrow(),
            settings.database_path.display()
        );
    } else {
        println!("  {} Dry run: {} records kept in memory", dim_arrow(), sink.count().await?);
    }

    Ok(())
}
