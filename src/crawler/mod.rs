//! Crawler module for multi-site article harvesting
//!
//! This module contains the crawler built on the dispatcher, including:
//! - Article list loading and site assignment
//! - HTTP fetching with failure classification
//! - Bot-challenge fingerprinting that halts a whole site
//! - Session isolation for single-session sites
//! - Overall crawl coordination and ledger bookkeeping

mod article;
mod coordinator;
mod fetcher;
mod fingerprint;
mod ledger;
mod session;
mod worker;

pub use article::{load_articles, Article};
pub use coordinator::{run_crawl, Coordinator, CrawlReport};
pub use fetcher::{build_http_client, fetch_article, FetchedPage};
pub use fingerprint::{extract_title, ChallengeMatch, Fingerprint, DEFAULT_CHALLENGE_MARKERS};
pub use ledger::LedgerSink;
pub use session::{SessionLock, SiteSession};
pub use worker::{CrawlWorker, Download};
