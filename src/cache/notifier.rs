//! In-process completion notifications keyed by [`CacheKey`].
//!
//! Waiters subscribe before they start waiting; the episode leader publishes
//! once its result is stored. Every subscription fires at most once, and
//! publishing clears the subscriptions it fired.
//!
//! Notifications never leave the process. Waiters in another process only
//! ever see the result through the store.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use super::CacheKey;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

/// Process-local, one-shot pub/sub keyed by fingerprint.
#[derive(Default)]
pub struct Notifier {
    waiters: DashMap<CacheKey, Vec<Waiter>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot subscription for `key`.
    ///
    /// Dropping the returned [`Subscription`] before it fires unsubscribes it.
    pub fn subscribe_once(&self, key: &CacheKey) -> Subscription<'_> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters
            .entry(key.clone())
            .or_default()
            .push(Waiter { id, tx });

        Subscription {
            notifier: self,
            key: key.clone(),
            id,
            rx,
            fired: false,
        }
    }

    /// Wakes every current subscriber of `key` and clears them. Returns how
    /// many subscribers were still listening.
    pub fn publish(&self, key: &CacheKey) -> usize {
        let Some((_, waiters)) = self.waiters.remove(key) else {
            return 0;
        };
        waiters
            .into_iter()
            .filter(|waiter| !waiter.tx.is_closed())
            .map(|waiter| waiter.tx.send(()))
            .filter(Result::is_ok)
            .count()
    }

    /// Removes subscription `id` from `key`, if it is still registered.
    pub fn unsubscribe(&self, key: &CacheKey, id: u64) {
        if let Some(mut waiters) = self.waiters.get_mut(key) {
            waiters.retain(|waiter| waiter.id != id);
        }
        self.waiters.remove_if(key, |_, waiters| waiters.is_empty());
    }

    /// Number of subscriptions currently registered for `key`.
    pub fn subscribers(&self, key: &CacheKey) -> usize {
        self.waiters.get(key).map_or(0, |waiters| waiters.len())
    }
}

/// A pending one-shot subscription returned by [`Notifier::subscribe_once`].
pub struct Subscription<'a> {
    notifier: &'a Notifier,
    key: CacheKey,
    id: u64,
    rx: oneshot::Receiver<()>,
    fired: bool,
}

impl Subscription<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits until the key is published. Returns `false` if the notifier
    /// dropped the subscription without publishing.
    pub async fn notified(&mut self) -> bool {
        let published = (&mut self.rx).await.is_ok();
        self.fired = true;
        published
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if !self.fired {
            self.notifier.unsubscribe(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Method;

    fn key(url: &str) -> CacheKey {
        CacheKey::build(&Method::Get, url, &[], |_| None)
    }

    #[tokio::test]
    async fn publish_wakes_every_subscriber_once() {
        let notifier = Notifier::new();
        let k = key("/a");
        let mut first = notifier.subscribe_once(&k);
        let mut second = notifier.subscribe_once(&k);
        assert_ne!(first.id(), second.id());
        assert_eq!(notifier.subscribers(&k), 2);

        assert_eq!(notifier.publish(&k), 2);
        assert!(first.notified().await);
        assert!(second.notified().await);

        // one-shot: nothing left to wake
        assert_eq!(notifier.subscribers(&k), 0);
        assert_eq!(notifier.publish(&k), 0);
    }

    #[tokio::test]
    async fn publish_only_wakes_its_own_key() {
        let notifier = Notifier::new();
        let (a, b) = (key("/a"), key("/b"));
        let mut on_a = notifier.subscribe_once(&a);
        let mut on_b = notifier.subscribe_once(&b);

        assert_eq!(notifier.publish(&a), 1);
        assert!(on_a.notified().await);

        let waited = tokio::time::timeout(Duration::from_millis(20), on_b.notified()).await;
        assert!(waited.is_err());
        assert_eq!(notifier.subscribers(&b), 1);
    }

    #[tokio::test]
    async fn dropping_an_unfired_subscription_unsubscribes() {
        let notifier = Notifier::new();
        let k = key("/a");
        let kept = notifier.subscribe_once(&k);
        drop(notifier.subscribe_once(&k));

        assert_eq!(notifier.subscribers(&k), 1);
        drop(kept);
        assert_eq!(notifier.subscribers(&k), 0);
        assert_eq!(notifier.publish(&k), 0);
    }

    #[tokio::test]
    async fn explicit_unsubscribe_leaves_others_registered() {
        let notifier = Notifier::new();
        let k = key("/a");
        let first = notifier.subscribe_once(&k);
        let mut second = notifier.subscribe_once(&k);

        notifier.unsubscribe(&k, first.id());
        assert_eq!(notifier.subscribers(&k), 1);
        assert_eq!(notifier.publish(&k), 1);
        assert!(second.notified().await);
    }

    #[tokio::test]
    async fn concurrent_subscribers_are_all_woken() {
        let notifier = std::sync::Arc::new(Notifier::new());
        let k = key("/shared");

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let notifier = notifier.clone();
            let k = k.clone();
            let (ready_tx, ready_rx) = oneshot::channel();
            waiters.push((
                tokio::spawn(async move {
                    let mut subscription = notifier.subscribe_once(&k);
                    let _ = ready_tx.send(());
                    subscription.notified().await
                }),
                ready_rx,
            ));
        }

        let mut handles = Vec::new();
        for (handle, ready) in waiters {
            ready.await.unwrap();
            handles.push(handle);
        }

        assert_eq!(notifier.publish(&k), 8);
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }
}
