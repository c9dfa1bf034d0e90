//! Nonce to pending-request mapping.
//!
//! The registry is the single source of truth for "is this chunk expected".
//! Lookups from the dispatch path take the read lock; registration and removal
//! take the write lock. The lock is never held across an await point, so a
//! dispatcher blocked on a slow consumer never stalls new registrations.

use crate::{Error, NonceSource, PendingRequest, Result};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

/// Candidates drawn per registration before giving up.
pub const MAX_NONCE_ATTEMPTS: usize = 16;

pub struct Registry {
    requests: RwLock<HashMap<String, Arc<PendingRequest>>>,
    nonces: Box<dyn NonceSource>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(nonces: impl NonceSource + 'static) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            nonces: Box::new(nonces),
        }
    }

    /// Samples nonces until one is not currently registered.
    ///
    /// The result is only guaranteed unused at the moment of the check. Use
    /// [`Self::register_with`] to issue and insert atomically.
    ///
    /// # Errors
    /// - Returns [`Error::NonceExhausted`] if [`MAX_NONCE_ATTEMPTS`]
    ///   candidates in a row are taken.
    pub fn issue(&self) -> Result<String> {
        for _ in 0..MAX_NONCE_ATTEMPTS {
            let nonce = self.nonces.sample();
            if !self.requests.read().contains_key(&nonce) {
                return Ok(nonce);
            }
            #[cfg(feature = "tracing")]
            tracing::trace!("nonce collision, resampling");
        }
        Err(Self::exhausted())
    }

    /// Issues a fresh nonce and registers the request built from it, both
    /// under a single write lock.
    ///
    /// # Errors
    /// - Returns [`Error::NonceExhausted`] if [`MAX_NONCE_ATTEMPTS`]
    ///   candidates in a row are taken. `build` is not called and the lock is
    ///   released.
    pub fn register_with<F>(&self, build: F) -> Result<Arc<PendingRequest>>
    where
        F: FnOnce(String) -> PendingRequest,
    {
        let mut requests = self.requests.write();
        for _ in 0..MAX_NONCE_ATTEMPTS {
            let nonce = self.nonces.sample();
            if let Entry::Vacant(slot) = requests.entry(nonce) {
                let nonce = slot.key().clone();
                let request = Arc::new(build(nonce));
                slot.insert(Arc::clone(&request));
                return Ok(request);
            }
            #[cfg(feature = "tracing")]
            tracing::trace!("nonce collision, resampling");
        }
        drop(requests);
        Err(Self::exhausted())
    }

    fn exhausted() -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(attempts = MAX_NONCE_ATTEMPTS, "no free nonce, giving up");
        Error::NonceExhausted {
            attempts: MAX_NONCE_ATTEMPTS,
        }
    }

    /// Inserts a request under its own nonce. Returns `false`, leaving the
    /// registry untouched, if the nonce is already taken.
    pub fn register(&self, request: Arc<PendingRequest>) -> bool {
        match self.requests.write().entry(request.nonce().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(request);
                true
            }
        }
    }

    pub fn lookup(&self, nonce: &str) -> Option<Arc<PendingRequest>> {
        self.requests.read().get(nonce).cloned()
    }

    /// Removes whatever is registered under `nonce`. Absent nonces are a
    /// no-op.
    pub fn deregister(&self, nonce: &str) -> Option<Arc<PendingRequest>> {
        self.requests.write().remove(nonce)
    }

    /// Removes `request` only if it is still the entry for its nonce.
    ///
    /// A finished request's nonce may be reissued; this keeps a late cleanup
    /// from evicting the newer request.
    pub fn deregister_request(&self, request: &Arc<PendingRequest>) -> bool {
        let mut requests = self.requests.write();
        match requests.get(request.nonce()) {
            Some(current) if Arc::ptr_eq(current, request) => {
                requests.remove(request.nonce());
                true
            }
            _ => false,
        }
    }

    /// Removes and returns every pending request.
    pub fn drain(&self) -> Vec<Arc<PendingRequest>> {
        self.requests.write().drain().map(|(_, r)| r).collect()
    }

    pub fn contains(&self, nonce: &str) -> bool {
        self.requests.read().contains_key(nonce)
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
