//! Admission control for streaming sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tunematch_core::EngineError;

/// Fixed number of session slots; admission never waits
pub struct SessionPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
    next_id: AtomicU64,
}

/// Held for the lifetime of a session; dropping it frees the slot
#[derive(Debug)]
pub struct SessionPermit {
    pub session_id: u64,
    _permit: OwnedSemaphorePermit,
}

impl SessionPool {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            next_id: AtomicU64::new(1),
        }
    }

    /// Claim a slot, or fail with a capacity error when all are in use
    pub fn try_admit(&self) -> Result<SessionPermit, EngineError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(SessionPermit {
                session_id: self.next_id.fetch_add(1, Ordering::Relaxed),
                _permit: permit,
            }),
            Err(_) => Err(EngineError::Capacity {
                active: self.active(),
                limit: self.limit,
            }),
        }
    }

    pub fn active(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_is_bounded() {
        let pool = SessionPool::new(2);
        let a = pool.try_admit().unwrap();
        let b = pool.try_admit().unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(pool.active(), 2);

        let err = pool.try_admit().unwrap_err();
        assert_eq!(err.kind(), "capacity");

        drop(a);
        assert_eq!(pool.active(), 1);
        assert!(pool.try_admit().is_ok());
    }
}
