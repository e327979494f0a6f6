//! Leases: borrowed connections returned with a reuse decision.
//!
//! # Data Flow
//! ```text
//! stock.rs (idle connections by application)
//!     → (socket, StockLease)
//!     → LeaseGuard inside the WAS client driver
//!     → release(Reuse(socket)) or release(Destroy)
//!     → back to the idle list, or dropped (descriptors closed)
//! ```
//!
//! # Design Decisions
//! - One method, called exactly once; enforced by `self: Box<Self>`
//! - Destroy carries no socket: dropping it closes all three descriptors
//! - The guard destroys on every exit path it was not told otherwise

pub mod stock;

pub use stock::{StockLease, WasStock};

use crate::observability::metrics;

/// End-of-cycle decision.
#[derive(Debug)]
pub enum Release<T> {
    /// The connection is resynchronised and may serve another request.
    Reuse(T),
    /// Close the descriptors and forget the worker.
    Destroy,
}

impl<T> Release<T> {
    pub fn is_reuse(&self) -> bool {
        matches!(self, Release::Reuse(_))
    }
}

/// Whoever lent out a connection.
pub trait Lease<T>: Send {
    fn release(self: Box<Self>, release: Release<T>);
}

impl<T, F> Lease<T> for F
where
    F: FnOnce(Release<T>) + Send,
{
    fn release(self: Box<Self>, release: Release<T>) {
        (*self)(release)
    }
}

/// Releases its lease exactly once, destroying if dropped unreleased.
pub struct LeaseGuard<T> {
    lease: Option<Box<dyn Lease<T>>>,
}

impl<T> LeaseGuard<T> {
    pub fn new(lease: impl Lease<T> + 'static) -> Self {
        Self::from_boxed(Box::new(lease))
    }

    pub fn from_boxed(lease: Box<dyn Lease<T>>) -> Self {
        Self { lease: Some(lease) }
    }

    pub fn release(mut self, release: Release<T>) {
        self.release_inner(release);
    }

    fn release_inner(&mut self, release: Release<T>) {
        if let Some(lease) = self.lease.take() {
            metrics::record_lease_released(release.is_reuse());
            tracing::debug!(reuse = release.is_reuse(), "Releasing WAS lease");
            lease.release(release);
        }
    }
}

impl<T> Drop for LeaseGuard<T> {
    fn drop(&mut self) {
        self.release_inner(Release::Destroy);
    }
}

impl<T> std::fmt::Debug for LeaseGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("released", &self.lease.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording() -> (Arc<Mutex<Vec<Option<u32>>>>, impl Lease<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let lease = move |release: Release<u32>| {
            let entry = match release {
                Release::Reuse(socket) => Some(socket),
                Release::Destroy => None,
            };
            sink.lock().unwrap().push(entry);
        };
        (log, lease)
    }

    #[test]
    fn explicit_release() {
        let (log, lease) = recording();
        LeaseGuard::new(lease).release(Release::Reuse(7));
        assert_eq!(*log.lock().unwrap(), vec![Some(7)]);
    }

    #[test]
    fn drop_destroys() {
        let (log, lease) = recording();
        drop(LeaseGuard::new(lease));
        assert_eq!(*log.lock().unwrap(), vec![None]);
    }

    #[test]
    fn panic_destroys() {
        let (log, lease) = recording();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = LeaseGuard::new(lease);
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec![None]);
    }
}
