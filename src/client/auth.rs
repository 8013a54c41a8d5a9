//! Credential caching for the remote client.
//!
//! The configured secret is handed out as the request credential and cached
//! for the refresh interval (23 hours by default). After that the credential
//! is re-derived; `invalidate` drops it immediately, which shutdown and
//! `auth_revoked` stream events rely on.

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    issued_at: Instant,
}

#[derive(Debug)]
pub struct AuthTokenCache {
    secret: Option<String>,
    lifetime: Duration,
    cached: RwLock<Option<CachedToken>>,
}

impl AuthTokenCache {
    pub fn new(secret: Option<String>, lifetime: Duration) -> Self {
        Self {
            secret,
            lifetime,
            cached: RwLock::new(None),
        }
    }

    /// Current credential, refreshing an expired one; `None` without a secret
    pub fn token(&self) -> Option<String> {
        let secret = self.secret.as_ref()?;

        if let Some(cached) = self.cached.read().as_ref() {
            if cached.issued_at.elapsed() < self.lifetime {
                return Some(cached.token.clone());
            }
        }

        let mut cached = self.cached.write();
        // Another caller may have refreshed while we waited for the lock
        if let Some(existing) = cached.as_ref() {
            if existing.issued_at.elapsed() < self.lifetime {
                return Some(existing.token.clone());
            }
        }
        debug!("🔑 AUTH: Refreshing cached credential");
        *cached = Some(CachedToken {
            token: secret.clone(),
            issued_at: Instant::now(),
        });
        Some(secret.clone())
    }

    /// Drop the cached credential
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            debug!("🔑 AUTH: Cached credential invalidated");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached.read().is_some()
    }
}
