//! Valuation admission gate.
//!
//! A permit counter sized to 2 x worker-pool-size gates valuation-batch
//! admission. Exhaustion drops the batch and counts it; the next tick for the
//! product refreshes state. This is the sole backpressure mechanism inside
//! the engine.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub struct AdmissionGate {
    /// Padded: contended by every worker on every batch.
    permits: CachePadded<AtomicU64>,
    capacity: u64,
    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
}

impl AdmissionGate {
    pub fn new(capacity: u64) -> Self {
        Self {
            permits: CachePadded::new(AtomicU64::new(capacity)),
            capacity,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Take one permit. Returns false when the gate is exhausted.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::Acquire);
        loop {
            if current == 0 {
                let rejected = self.total_rejected.fetch_add(1, Ordering::Relaxed) + 1;
                if rejected % 100 == 1 {
                    warn!(
                        capacity = self.capacity,
                        rejected, "admission gate exhausted, dropping work"
                    );
                }
                return false;
            }
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Return one permit, saturating at capacity.
    pub fn release(&self) {
        let mut current = self.permits.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return;
            }
            match self.permits.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn available(&self) -> u64 {
        self.permits.load(Ordering::Acquire)
    }

    pub fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::Acquire)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_until_exhausted() {
        let gate = AdmissionGate::new(3);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert_eq!(gate.total_rejected(), 1);
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn release_restores_permits() {
        let gate = AdmissionGate::new(2);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        gate.release();
        assert!(gate.try_acquire());
    }

    #[test]
    fn release_saturates_at_capacity() {
        let gate = AdmissionGate::new(2);
        gate.release();
        gate.release();
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn concurrent_accounting_balances() {
        let gate = Arc::new(AdmissionGate::new(8));
        let mut handles = vec![];
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    if gate.try_acquire() {
                        gate.release();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gate.available(), 8);
    }
}
