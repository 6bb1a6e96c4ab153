//! Per-client session cache
//!
//! The session token is the only mutable state a client shares across
//! calls. Readers take the `RwLock`; a refresh holds the `refresh` mutex for
//! the whole authenticate round trip, so concurrent callers wait for one
//! refresh instead of racing their own.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::error::AttestResult;

/// Margin before expiry at which a session is treated as stale
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// An established backend session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at - skew > now
    }
}

/// Outcome of [`SessionCache::get_or_refresh`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub expires_at: DateTime<Utc>,
    /// Served from cache without a round trip
    pub reused: bool,
}

/// Cached session with single-writer refresh
#[derive(Debug)]
pub struct SessionCache {
    current: RwLock<Option<Session>>,
    refresh: Mutex<()>,
    skew: Duration,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_SKEW)
    }
}

impl SessionCache {
    pub fn new(skew: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh: Mutex::new(()),
            skew,
        }
    }

    /// Fresh cached session, if any
    pub async fn fresh(&self) -> Option<Session> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|s| s.is_fresh(Utc::now(), self.skew))
            .cloned()
    }

    /// Token of the fresh cached session, if any
    pub async fn token(&self) -> Option<String> {
        self.fresh().await.map(|s| s.token)
    }

    /// Return the cached session or establish one with `refresh`.
    ///
    /// Only one refresh runs at a time; callers that queued behind it reuse
    /// its result.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> AttestResult<SessionInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttestResult<Session>>,
    {
        if let Some(session) = self.fresh().await {
            return Ok(SessionInfo {
                expires_at: session.expires_at,
                reused: true,
            });
        }

        let _writer = self.refresh.lock().await;
        if let Some(session) = self.fresh().await {
            return Ok(SessionInfo {
                expires_at: session.expires_at,
                reused: true,
            });
        }

        let session = refresh().await?;
        debug!(expires_at = %session.expires_at, "session established");
        let info = SessionInfo {
            expires_at: session.expires_at,
            reused: false,
        };
        *self.current.write().await = Some(session);
        Ok(info)
    }

    /// Drop and return the cached session
    pub async fn clear(&self) -> Option<Session> {
        self.current.write().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn session(token: &str, ttl_secs: i64) -> Session {
        Session {
            token: token.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn test_reuses_fresh_session() {
        let cache = SessionCache::default();
        let first = cache
            .get_or_refresh(|| async { Ok(session("a", 600)) })
            .await
            .unwrap();
        assert!(!first.reused);

        let second = cache
            .get_or_refresh(|| async { Ok(session("b", 600)) })
            .await
            .unwrap();
        assert!(second.reused);
        assert_eq!(cache.token().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_session_inside_skew_is_refreshed() {
        let cache = SessionCache::new(Duration::from_secs(60));
        cache
            .get_or_refresh(|| async { Ok(session("short", 10)) })
            .await
            .unwrap();
        assert!(cache.token().await.is_none());

        let info = cache
            .get_or_refresh(|| async { Ok(session("long", 600)) })
            .await
            .unwrap();
        assert!(!info.reused);
        assert_eq!(cache.token().await.as_deref(), Some("long"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_refresh_once() {
        let cache = Arc::new(SessionCache::default());
        let refreshes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let refreshes = Arc::clone(&refreshes);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(session("shared", 600))
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = SessionCache::default();
        cache
            .get_or_refresh(|| async { Ok(session("a", 600)) })
            .await
            .unwrap();
        assert!(cache.clear().await.is_some());
        assert!(cache.token().await.is_none());
        assert!(!format!("{:?}", session("secret", 1)).contains("secret"));
    }
}
