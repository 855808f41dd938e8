//! Per-site HTTP sessions
//!
//! A regular site keeps one cookie-carrying client for the whole run. A
//! single-session site gets a fresh client (and so an empty cookie store)
//! immediately before and after each unit of work, and its units run under
//! a lock shared by every single-session site.

use crate::config::UserAgentConfig;
use crate::crawler::fetcher::build_http_client;
use crate::dispatch::{Attempt, FailureKind};
use parking_lot::Mutex;
use reqwest::Client;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock serializing units of work across single-session sites
pub type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// HTTP session state of one site
pub struct SiteSession {
    user_agent: UserAgentConfig,
    timeout: Duration,
    client: Mutex<Client>,
    lock: Option<SessionLock>,
    resets: AtomicU64,
}

impl SiteSession {
    /// A session reused across every unit of work
    pub fn shared(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::build(user_agent, timeout, None)
    }

    /// A session reset around every unit of work, serialized by `lock`
    pub fn isolated(
        user_agent: &UserAgentConfig,
        timeout: Duration,
        lock: SessionLock,
    ) -> Result<Self, reqwest::Error> {
        Self::build(user_agent, timeout, Some(lock))
    }

    fn build(
        user_agent: &UserAgentConfig,
        timeout: Duration,
        lock: Option<SessionLock>,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(user_agent, timeout)?;
        Ok(Self {
            user_agent: user_agent.clone(),
            timeout,
            client: Mutex::new(client),
            lock,
            resets: AtomicU64::new(0),
        })
    }

    /// Whether session state is cleared around each unit of work
    pub fn is_isolated(&self) -> bool {
        self.lock.is_some()
    }

    /// Number of times the session state has been cleared
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Runs one unit of work with this session's client
    pub async fn run<F, Fut, T>(&self, work: F) -> Attempt<T>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let lock = match &self.lock {
            None => {
                let client = self.client.lock().clone();
                return work(client).await;
            }
            Some(lock) => lock,
        };

        let _guard = lock.lock().await;

        if let Err(e) = self.reset() {
            return Attempt::failure(FailureKind::Fatal, format!("session reset failed: {}", e));
        }
        let client = self.client.lock().clone();

        let attempt = work(client).await;

        if let Err(e) = self.reset() {
            tracing::error!("session reset after unit of work failed: {}", e);
        }
        attempt
    }

    /// Replaces the client, dropping its cookies
    fn reset(&self) -> Result<(), reqwest::Error> {
        let fresh = build_http_client(&self.user_agent, self.timeout)?;
        *self.client.lock() = fresh;
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_agent() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestHarvester".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_shared_session_never_resets() {
        let session = SiteSession::shared(&user_agent(), Duration::from_secs(5)).unwrap();
        assert!(!session.is_isolated());

        let attempt = session.run(|_client| async { Attempt::Success(1) }).await;
        assert_eq!(attempt, Attempt::Success(1));
        assert_eq!(session.resets(), 0);
    }

    #[tokio::test]
    async fn test_isolated_session_resets_before_and_after() {
        let lock: SessionLock = Arc::new(tokio::sync::Mutex::new(()));
        let session =
            SiteSession::isolated(&user_agent(), Duration::from_secs(5), lock.clone()).unwrap();
        assert!(session.is_isolated());

        let attempt: Attempt<()> = session
            .run(|_client| async { Attempt::failure(FailureKind::Status(503), "down") })
            .await;
        assert!(!attempt.is_success());
        assert_eq!(session.resets(), 2);

        // The lock is released once the unit of work is done
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_isolated_sessions_exclude_each_other() {
        let lock: SessionLock = Arc::new(tokio::sync::Mutex::new(()));
        let a = SiteSession::isolated(&user_agent(), Duration::from_secs(5), lock.clone()).unwrap();

        let held = lock.clone().lock_owned().await;
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            a.run(|_client| async { Attempt::Success(()) }),
        )
        .await;
        assert!(pending.is_err());

        drop(held);
        let attempt = a.run(|_client| async { Attempt::Success(()) }).await;
        assert!(attempt.is_success());
    }
}
