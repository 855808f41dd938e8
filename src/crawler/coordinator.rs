//! Crawl coordinator
//!
//! The coordinator assigns every input article to a site, builds one
//! dispatch loop per site and runs all loops concurrently on the calling
//! task. Loops share a global concurrency gate, one escalation list and the
//! session lock of single-session sites; each keeps its own regulator,
//! retry queue and halt signal.

use crate::config::Config;
use crate::crawler::article::{load_articles, Article};
use crate::crawler::ledger::LedgerSink;
use crate::crawler::session::{SessionLock, SiteSession};
use crate::crawler::worker::{CrawlWorker, Download};
use crate::dispatch::{
    iter_source, CapacityRegulator, DispatchSettings, Dispatcher, EscalationList, HaltSignal,
};
use crate::output::{
    generate_markdown_summary, write_escalations, HarvestSummary, JsonlSink, OutcomeSink,
};
use crate::state::{ArticleState, Capacity, SiteState};
use crate::storage::{open_storage, RunStatus, SqliteStorage, Storage};
use crate::url::assign_site;
use crate::HarvestError;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Everything a finished crawl hands back
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub summary: HarvestSummary,

    /// Articles to retry in a later invocation
    pub escalated: Vec<Article>,

    /// Whether the crawl was stopped by an interrupt
    pub interrupted: bool,
}

/// Main crawl coordinator
///
/// Owns the ledger connection and the run record for one crawl.
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    storage: Arc<Mutex<SqliteStorage>>,
    run_id: i64,
    fresh: bool,
}

impl Coordinator {
    /// Creates a new coordinator and opens a run in the ledger
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `fresh` - Re-fetch articles the ledger already has as downloaded
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully initialized coordinator
    /// * `Err(HarvestError)` - Failed to open the ledger
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self, HarvestError> {
        let mut storage = open_storage(Path::new(&config.output.database_path))?;

        if let Some(previous) = storage.latest_run()? {
            if previous.status == RunStatus::Running {
                tracing::warn!(
                    "Run {} never finished; its downloaded articles are still skipped",
                    previous.id
                );
            }
        }

        let run_id = storage.create_run(config_hash)?;
        tracing::info!("Created harvest run {}", run_id);

        Ok(Self {
            config: Arc::new(config),
            config_hash: config_hash.to_string(),
            storage: Arc::new(Mutex::new(storage)),
            run_id,
            fresh,
        })
    }

    /// Id of the run this coordinator records into
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Shared handle to the ledger
    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        Arc::clone(&self.storage)
    }

    /// Runs the crawl over `articles`
    ///
    /// This method:
    /// 1. Assigns articles to sites (unassigned ones are escalated)
    /// 2. Skips articles already downloaded unless running fresh
    /// 3. Runs one dispatch loop per site until all loops drain
    /// 4. Records escalated articles in the ledger and the escalation file
    /// 5. Closes the run and writes the markdown summary
    pub async fn run(&mut self, articles: Vec<Article>) -> Result<CrawlReport, HarvestError> {
        let config = Arc::clone(&self.config);
        let started_at = Utc::now();
        let start_time = std::time::Instant::now();
        let total_articles = articles.len();

        tracing::info!(
            "Starting crawl run {}: {} article(s), {} site(s)",
            self.run_id,
            total_articles,
            config.sites.len()
        );

        let escalations: EscalationList<Article> = EscalationList::new();
        let mut site_states: Vec<SiteState> =
            config.sites.iter().map(|s| SiteState::new(&s.name)).collect();
        let mut buckets: Vec<Vec<Article>> = vec![Vec::new(); config.sites.len()];
        let mut site_of: HashMap<String, usize> = HashMap::new();
        let mut unassigned: HashSet<String> = HashSet::new();

        let downloaded = if self.fresh {
            HashSet::new()
        } else {
            self.storage.lock().downloaded_dois()?
        };
        let unassigned_ledger = LedgerSink::new(self.storage(), self.run_id, None);

        for article in articles {
            match assign_site(&article.doi, &article.url, &config.sites) {
                Some(index) => {
                    site_states[index].assigned += 1;
                    if downloaded.contains(&article.doi) {
                        tracing::debug!("Skipping {}: already downloaded", article);
                        site_states[index].skipped += 1;
                        continue;
                    }
                    site_of.insert(article.doi.clone(), index);
                    buckets[index].push(article);
                }
                None => {
                    tracing::warn!("No site matches {} ({}); escalating", article, article.url);
                    if let Err(e) = unassigned_ledger.record_state(
                        &article,
                        ArticleState::Unassigned,
                        Some("no matching site"),
                    ) {
                        tracing::error!("Failed to record {}: {}", article, e);
                    }
                    unassigned.insert(article.doi.clone());
                    escalations.push(article);
                }
            }
        }

        let skipped: usize = site_states.iter().map(|s| s.skipped).sum();
        if skipped > 0 {
            tracing::info!("Skipping {} article(s) already downloaded", skipped);
        }

        let gate = Arc::new(Semaphore::new(config.dispatch.max_concurrent.max(1)));
        let session_lock: SessionLock = Arc::new(tokio::sync::Mutex::new(()));
        let log = Arc::new(JsonlSink::append(Path::new(&config.output.log_path))?);
        let timeout = Duration::from_secs(config.dispatch.request_timeout_seconds);
        let articles_dir = Path::new(&config.output.articles_dir);

        let mut loops = Vec::new();
        for (index, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let site = &config.sites[index];

            let mut settings = DispatchSettings::from_config(&config.dispatch);
            let session = if site.single_session {
                settings = settings.single_session();
                SiteSession::isolated(&config.user_agent, timeout, Arc::clone(&session_lock))?
            } else {
                SiteSession::shared(&config.user_agent, timeout)?
            };

            let worker = Arc::new(CrawlWorker::new(site.clone(), session, articles_dir));
            let regulator =
                CapacityRegulator::from_per_minute(Capacity::requests(site.requests_per_minute));
            let ledger: Arc<dyn OutcomeSink<Article, Download>> = Arc::new(LedgerSink::new(
                self.storage(),
                self.run_id,
                Some(site.name.clone()),
            ));

            let dispatcher = Dispatcher::builder(site.name.clone(), worker, regulator)
                .settings(settings)
                .gate(Arc::clone(&gate))
                .escalations(escalations.clone())
                .sink(ledger)
                .sink(log.clone())
                .build();

            loops.push((index, dispatcher, bucket));
        }

        let interrupted = Arc::new(AtomicBool::new(false));
        let halts: Vec<HaltSignal> = loops.iter().map(|(_, d, _)| d.halt_signal()).collect();
        let watcher = {
            let interrupted = Arc::clone(&interrupted);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, halting every site");
                    interrupted.store(true, Ordering::SeqCst);
                    for halt in &halts {
                        halt.halt("interrupted");
                    }
                }
            })
        };

        let runs = loops
            .iter_mut()
            .map(|(_, dispatcher, bucket)| dispatcher.run(iter_source(std::mem::take(bucket))));
        let reports = join_all(runs).await;
        watcher.abort();

        for ((index, _, _), report) in loops.iter().zip(reports) {
            let state = &mut site_states[*index];
            if let Some(reason) = &report.halt_reason {
                tracing::warn!("Site {} halted: {}", state.name, reason);
            }
            state.finish(report.stats, report.halt_reason, report.elapsed);
        }

        let escalated = escalations.take();
        self.record_escalations(&escalated, &unassigned, &site_of)?;
        write_escalations(Path::new(&config.output.escalation_path), &escalated)?;

        let interrupted = interrupted.load(Ordering::SeqCst);
        let status = if interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        self.storage.lock().complete_run(self.run_id, status)?;

        let summary = HarvestSummary {
            run_id: Some(self.run_id),
            started_at: started_at.to_rfc3339(),
            finished_at: Some(Utc::now().to_rfc3339()),
            duration_seconds: Some(start_time.elapsed().as_secs()),
            status: status.to_db_string().to_string(),
            config_hash: self.config_hash.clone(),
            total_articles,
            unassigned: unassigned.len(),
            skipped,
            escalated: escalated.len(),
            sites: site_states,
        };
        generate_markdown_summary(&summary, Path::new(&config.output.summary_path))?;

        tracing::info!(
            "Crawl completed: {} downloaded, {} escalated in {:?}",
            summary.totals().succeeded,
            escalated.len(),
            start_time.elapsed()
        );

        Ok(CrawlReport {
            summary,
            escalated,
            interrupted,
        })
    }

    /// Marks escalated articles in the ledger
    ///
    /// Permanent failures keep their `Failed` entry from this run and
    /// unassigned articles were recorded when they were assigned.
    fn record_escalations(
        &self,
        escalated: &[Article],
        unassigned: &HashSet<String>,
        site_of: &HashMap<String, usize>,
    ) -> Result<(), HarvestError> {
        for article in escalated {
            if unassigned.contains(&article.doi) {
                continue;
            }

            let failed_this_run = self
                .storage
                .lock()
                .get_article(&article.doi)?
                .map_or(false, |r| r.run_id == self.run_id && r.state == ArticleState::Failed);
            if failed_this_run {
                continue;
            }

            let site = site_of
                .get(&article.doi)
                .map(|&index| self.config.sites[index].name.clone());
            LedgerSink::new(self.storage(), self.run_id, site).record_state(
                article,
                ArticleState::Escalated,
                Some("site halted before completion"),
            )?;
        }
        Ok(())
    }
}

/// Runs the main crawl operation
///
/// Loads the article list at `input`, opens the ledger and runs every site
/// to completion.
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the configuration file
/// * `input` - Article list, one DOI or URL per line
/// * `fresh` - Re-fetch articles already downloaded
///
/// # Example
///
/// ```no_run
/// use lit_harvest::config::load_config_with_hash;
/// use lit_harvest::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let report = run_crawl(config, &hash, Path::new("articles.txt"), false).await?;
/// println!("{} escalated", report.escalated.len());
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    input: &Path,
    fresh: bool,
) -> Result<CrawlReport, HarvestError> {
    let articles = load_articles(input)?;
    let mut coordinator = Coordinator::new(config, config_hash, fresh)?;
    coordinator.run(articles).await
}
