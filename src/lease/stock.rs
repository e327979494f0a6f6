//! Idle connection stock.
//!
//! # Responsibilities
//! - Keep idle connections grouped by application name
//! - Hand out a connection together with the lease that returns it
//! - Cap idle connections per application; surplus ones are closed
//!
//! Spawning workers is the caller's business: a fresh connection enters
//! through [`WasStock::lease`] or [`WasStock::put_idle`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::lease::{Lease, Release};

#[derive(Debug)]
struct StockInner<T> {
    idle: DashMap<String, Vec<T>>,
    max_idle: usize,
    busy: AtomicUsize,
    destroyed: AtomicU64,
}

/// A shared pool of idle connections.
#[derive(Debug)]
pub struct WasStock<T> {
    inner: Arc<StockInner<T>>,
}

impl<T> Clone for WasStock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> WasStock<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(StockInner {
                idle: DashMap::new(),
                max_idle,
                busy: AtomicUsize::new(0),
                destroyed: AtomicU64::new(0),
            }),
        }
    }

    /// Take an idle connection for `key`, most recently used first.
    pub fn get(&self, key: &str) -> Option<(T, StockLease<T>)> {
        let socket = self.inner.idle.get_mut(key)?.pop()?;
        tracing::debug!(key, "Reusing idle WAS connection");
        Some((socket, self.lease(key)))
    }

    /// Lease for a connection the caller created itself.
    pub fn lease(&self, key: &str) -> StockLease<T> {
        self.inner.busy.fetch_add(1, Ordering::Relaxed);
        StockLease {
            stock: Arc::clone(&self.inner),
            key: key.to_owned(),
        }
    }

    /// Add a ready connection. Returns false if it was closed because the
    /// idle list is full.
    pub fn put_idle(&self, key: &str, socket: T) -> bool {
        self.inner.put_idle(key, socket)
    }

    pub fn idle_count(&self, key: &str) -> usize {
        self.inner.idle.get(key).map_or(0, |list| list.len())
    }

    pub fn total_idle(&self) -> usize {
        self.inner.idle.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn busy(&self) -> usize {
        self.inner.busy.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.inner.destroyed.load(Ordering::Relaxed)
    }
}

impl<T> StockInner<T> {
    fn put_idle(&self, key: &str, socket: T) -> bool {
        let mut list = self.idle.entry(key.to_owned()).or_default();
        if list.len() >= self.max_idle {
            drop(list);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, max_idle = self.max_idle, "Idle limit reached, closing WAS connection");
            return false;
        }
        list.push(socket);
        true
    }
}

/// Returns a connection to its [`WasStock`].
#[derive(Debug)]
pub struct StockLease<T> {
    stock: Arc<StockInner<T>>,
    key: String,
}

impl<T: Send + Sync> Lease<T> for StockLease<T> {
    fn release(self: Box<Self>, release: Release<T>) {
        self.stock.busy.fetch_sub(1, Ordering::Relaxed);
        match release {
            Release::Reuse(socket) => {
                self.stock.put_idle(&self.key, socket);
            }
            Release::Destroy => {
                self.stock.destroyed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %self.key, "Destroying WAS connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_returns_to_idle() {
        let stock = WasStock::new(4);
        assert!(stock.put_idle("app", 1u32));

        let (socket, lease) = stock.get("app").unwrap();
        assert_eq!(socket, 1);
        assert_eq!(stock.busy(), 1);
        assert_eq!(stock.idle_count("app"), 0);

        Box::new(lease).release(Release::Reuse(socket));
        assert_eq!(stock.busy(), 0);
        assert_eq!(stock.idle_count("app"), 1);
        assert_eq!(stock.destroyed(), 0);
    }

    #[test]
    fn destroy_drops_the_connection() {
        let stock = WasStock::new(4);
        let lease = stock.lease("app");
        Box::new(lease).release(Release::<u32>::Destroy);
        assert_eq!(stock.total_idle(), 0);
        assert_eq!(stock.destroyed(), 1);
    }

    #[test]
    fn idle_limit_per_key() {
        let stock = WasStock::new(1);
        assert!(stock.put_idle("a", 1u32));
        assert!(!stock.put_idle("a", 2));
        assert!(stock.put_idle("b", 3));
        assert_eq!(stock.total_idle(), 2);
        assert_eq!(stock.destroyed(), 1);
    }

    #[test]
    fn empty_key_has_nothing() {
        let stock = WasStock::<u32>::new(1);
        assert!(stock.get("missing").is_none());
        assert_eq!(stock.busy(), 0);
    }
}
