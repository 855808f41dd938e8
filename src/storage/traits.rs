//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::ArticleState;
use crate::storage::{ArticleRecord, RunRecord, RunStatus};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines the ledger operations used by the crawler and the
/// `stats` command.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new harvest run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as finished with the given status and a finish timestamp
    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Articles =====

    /// Inserts or replaces the ledger entry of an article
    ///
    /// The DOI is the key; the latest recorded state wins.
    fn record_article(&mut self, record: &ArticleRecord) -> StorageResult<()>;

    /// Gets an article by DOI
    fn get_article(&self, doi: &str) -> StorageResult<Option<ArticleRecord>>;

    /// DOIs of every article recorded as downloaded
    fn downloaded_dois(&self) -> StorageResult<HashSet<String>>;

    // ===== Statistics =====

    /// Counts articles by state
    fn count_by_state(&self, state: ArticleState) -> StorageResult<u64>;

    /// Gets total article count
    fn count_total_articles(&self) -> StorageResult<u64>;

    /// Downloaded articles per site, most first
    fn count_downloaded_by_site(&self) -> StorageResult<Vec<(String, u64)>>;
}
