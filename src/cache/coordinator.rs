//! Single-flight admission.
//!
//! For every fingerprint the first request to arrive writes an in-flight
//! marker and computes the response; identical requests arriving while the
//! marker is live wait for that response instead. An episode lasts one TTL:
//! it bounds both the marker's lifetime and how long a follower waits before
//! giving up and computing the response itself.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{CacheError, CacheKey, CacheStore, CachedResponse, Notifier};

/// Value stored under an episode's in-flight marker.
const IN_FLIGHT: &[u8] = b"cached";

/// Outcome of [`Coordinator::admit_or_wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Compute the response live. `leader` is set for the request that opened
    /// the episode; only the leader may publish its result.
    Proceed { leader: bool },
    /// An identical request already produced this response.
    Reuse(CachedResponse),
}

/// Drives admission and publication for one cache instance.
pub struct Coordinator {
    store: Arc<dyn CacheStore>,
    notifier: Notifier,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            notifier: Notifier::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Admits the request as the episode leader, or waits up to `ttl` for the
    /// leader's result.
    ///
    /// # Errors
    ///
    /// Store failures and undecodable cached records are returned as-is; the
    /// caller decides whether to serve live.
    pub async fn admit_or_wait(
        &self,
        key: &CacheKey,
        ttl: Duration,
    ) -> Result<Admission, CacheError> {
        let marker = key.marker_key();
        if self
            .store
            .set_if_absent(&marker, Bytes::from_static(IN_FLIGHT), ttl)
            .await?
        {
            debug!(%key, "opened cache episode");
            return Ok(Admission::Proceed { leader: true });
        }

        match self.wait_for_result(key, ttl).await? {
            Some(cached) => Ok(Admission::Reuse(cached)),
            None => Ok(Admission::Proceed { leader: false }),
        }
    }

    /// Stores the leader's response under `key` and wakes local waiters.
    ///
    /// Waiters are woken even when the write fails so they fall back to live
    /// computation right away; the write error is still returned.
    pub async fn publish(
        &self,
        key: &CacheKey,
        ttl: Duration,
        response: &CachedResponse,
    ) -> Result<(), CacheError> {
        let stored = match response.encode() {
            Ok(encoded) => self
                .store
                .set(key.as_str(), encoded, ttl)
                .await
                .map_err(CacheError::from),
            Err(e) => Err(e),
        };

        let woken = self.notifier.publish(key);
        debug!(%key, woken, stored = stored.is_ok(), "published cached response");
        stored
    }

    async fn wait_for_result(
        &self,
        key: &CacheKey,
        ttl: Duration,
    ) -> Result<Option<CachedResponse>, CacheError> {
        // Subscribe before the first read so a publish landing in between is not lost.
        let mut subscription = self.notifier.subscribe_once(key);

        if let Some(cached) = self.read_result(key).await? {
            trace!(%key, "result already stored");
            return Ok(Some(cached));
        }

        match tokio::time::timeout(ttl, subscription.notified()).await {
            Ok(_) => self.read_result(key).await,
            Err(_) => {
                debug!(%key, ?ttl, "timed out waiting for in-flight response");
                Ok(None)
            }
        }
    }

    async fn read_result(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        self.store
            .get(key.as_str())
            .await?
            .map(|raw| CachedResponse::decode(&raw))
            .transpose()
    }
}
