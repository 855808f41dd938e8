use crate::crawler::article::Article;
use crate::crawler::worker::Download;
use crate::output::{OutcomeSink, OutputError, OutputResult};
use crate::state::{ArticleState, WorkItem};
use crate::storage::{ArticleRecord, SqliteStorage, Storage};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records terminal article outcomes of one site in the harvest ledger
pub struct LedgerSink {
    storage: Arc<Mutex<SqliteStorage>>,
    run_id: i64,
    site: Option<String>,
}

impl LedgerSink {
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, run_id: i64, site: Option<String>) -> Self {
        Self {
            storage,
            run_id,
            site,
        }
    }

    /// Writes the ledger entry of an article that never reached a worker
    pub fn record_state(
        &self,
        article: &Article,
        state: ArticleState,
        message: Option<&str>,
    ) -> OutputResult<()> {
        self.write(ArticleRecord {
            doi: article.doi.clone(),
            url: article.url.clone(),
            site: self.site.clone(),
            state,
            error_message: message.map(str::to_string),
            attempts: 0,
            saved_path: None,
            run_id: self.run_id,
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    fn write(&self, record: ArticleRecord) -> OutputResult<()> {
        self.storage
            .lock()
            .record_article(&record)
            .map_err(|e| OutputError::Storage(e.to_string()))
    }
}

impl OutcomeSink<Article, Download> for LedgerSink {
    fn record_success(&self, item: &WorkItem<Article>, output: &Download) -> OutputResult<()> {
        self.write(ArticleRecord {
            doi: item.payload.doi.clone(),
            url: item.payload.url.clone(),
            site: self.site.clone(),
            state: ArticleState::Downloaded,
            error_message: None,
            attempts: item.redo_count + 1,
            saved_path: Some(output.path.display().to_string()),
            run_id: self.run_id,
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    fn record_failure(&self, item: &WorkItem<Article>) -> OutputResult<()> {
        self.write(ArticleRecord {
            doi: item.payload.doi.clone(),
            url: item.payload.url.clone(),
            site: self.site.clone(),
            state: ArticleState::Failed,
            error_message: item.errors.last().cloned(),
            attempts: item.redo_count,
            saved_path: None,
            run_id: self.run_id,
            updated_at: Utc::now().to_rfc3339(),
        })
    }
}
