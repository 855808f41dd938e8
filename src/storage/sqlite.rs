//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::ArticleState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ArticleRecord, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the ledger at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
    })
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<ArticleRecord> {
    Ok(ArticleRecord {
        doi: row.get(0)?,
        url: row.get(1)?,
        site: row.get(2)?,
        state: ArticleState::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(ArticleState::Pending),
        error_message: row.get(4)?,
        attempts: row.get(5)?,
        saved_path: row.get(6)?,
        run_id: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Articles =====

    fn record_article(&mut self, record: &ArticleRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO articles (doi, url, site, state, error_message, attempts, saved_path, run_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(doi) DO UPDATE SET
                url = excluded.url,
                site = excluded.site,
                state = excluded.state,
                error_message = excluded.error_message,
                attempts = excluded.attempts,
                saved_path = excluded.saved_path,
                run_id = excluded.run_id,
                updated_at = excluded.updated_at",
            params![
                record.doi,
                record.url,
                record.site,
                record.state.to_db_string(),
                record.error_message,
                record.attempts,
                record.saved_path,
                record.run_id,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_article(&self, doi: &str) -> StorageResult<Option<ArticleRecord>> {
        let article = self
            .conn
            .query_row(
                "SELECT doi, url, site, state, error_message, attempts, saved_path, run_id, updated_at
                 FROM articles WHERE doi = ?1",
                params![doi],
                article_from_row,
            )
            .optional()?;
        Ok(article)
    }

    fn downloaded_dois(&self) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT doi FROM articles WHERE state = ?1")?;
        let dois = stmt
            .query_map(params![ArticleState::Downloaded.to_db_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(dois)
    }

    // ===== Statistics =====

    fn count_by_state(&self, state: ArticleState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_total_articles(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_downloaded_by_site(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT site, COUNT(*) AS n FROM articles
             WHERE state = ?1 AND site IS NOT NULL
             GROUP BY site ORDER BY n DESC, site ASC",
        )?;
        let rows = stmt
            .query_map(params![ArticleState::Downloaded.to_db_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(doi: &str, site: &str, state: ArticleState, run_id: i64) -> ArticleRecord {
        ArticleRecord {
            doi: doi.to_string(),
            url: format!("https://doi.org/{}", doi),
            site: Some(site.to_string()),
            state,
            error_message: None,
            attempts: 1,
            saved_path: None,
            run_id,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.latest_run().unwrap().is_none());

        let first = storage.create_run("hash-a").unwrap();
        let second = storage.create_run("hash-b").unwrap();
        assert!(second > first);

        storage.complete_run(second, RunStatus::Interrupted).unwrap();

        let latest = storage.latest_run().unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.config_hash, "hash-b");
        assert_eq!(latest.status, RunStatus::Interrupted);
        assert!(latest.finished_at.is_some());

        assert_eq!(storage.get_run(first).unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_unknown_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(storage.get_run(99), Err(StorageError::RunNotFound(99))));
        assert!(matches!(
            storage.complete_run(99, RunStatus::Completed),
            Err(StorageError::RunNotFound(99))
        ));
    }

    #[test]
    fn test_record_article_latest_state_wins() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();

        let mut record = article("10.1021/x", "acs", ArticleState::Failed, run_id);
        record.error_message = Some("status 503".to_string());
        storage.record_article(&record).unwrap();

        let mut record = article("10.1021/x", "acs", ArticleState::Downloaded, run_id);
        record.saved_path = Some("articles/acs/10.1021_x.html".to_string());
        storage.record_article(&record).unwrap();

        let loaded = storage.get_article("10.1021/x").unwrap().unwrap();
        assert_eq!(loaded.state, ArticleState::Downloaded);
        assert_eq!(loaded.error_message, None);
        assert_eq!(loaded.saved_path.as_deref(), Some("articles/acs/10.1021_x.html"));
        assert_eq!(storage.count_total_articles().unwrap(), 1);
    }

    #[test]
    fn test_downloaded_dois_and_counts() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();

        storage
            .record_article(&article("10.1/a", "acs", ArticleState::Downloaded, run_id))
            .unwrap();
        storage
            .record_article(&article("10.1/b", "acs", ArticleState::Downloaded, run_id))
            .unwrap();
        storage
            .record_article(&article("10.2/c", "rsc", ArticleState::Downloaded, run_id))
            .unwrap();
        storage
            .record_article(&article("10.2/d", "rsc", ArticleState::Escalated, run_id))
            .unwrap();

        let dois = storage.downloaded_dois().unwrap();
        assert_eq!(dois.len(), 3);
        assert!(dois.contains("10.1/a"));
        assert!(!dois.contains("10.2/d"));

        assert_eq!(storage.count_by_state(ArticleState::Downloaded).unwrap(), 3);
        assert_eq!(storage.count_by_state(ArticleState::Escalated).unwrap(), 1);
        assert_eq!(storage.count_by_state(ArticleState::Failed).unwrap(), 0);

        assert_eq!(
            storage.count_downloaded_by_site().unwrap(),
            vec![("acs".to_string(), 2), ("rsc".to_string(), 1)]
        );
    }

    #[test]
    fn test_file_backed_storage_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db").join("harvest.db");

        {
            let mut storage = SqliteStorage::new(&path).unwrap();
            let run_id = storage.create_run("hash").unwrap();
            storage
                .record_article(&article("10.1/a", "acs", ArticleState::Downloaded, run_id))
                .unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        assert!(storage.downloaded_dois().unwrap().contains("10.1/a"));
    }
}
