//! Shard ownership routing.
//!
//! An account is owned iff `account_id % total == index`. Ownership is stable
//! for the lifetime of a run; changing the topology requires a restart with
//! fresh caches and snapshot.

use crate::config::ShardConfig;
use crate::core::AccountId;

#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    index: u64,
    total: u64,
}

impl ShardRouter {
    pub fn new(config: ShardConfig) -> Self {
        debug_assert!(config.total >= 1 && config.index < config.total);
        Self {
            index: config.index,
            total: config.total,
        }
    }

    /// Single-shard topology: every account is owned.
    pub fn unsharded() -> Self {
        Self { index: 0, total: 1 }
    }

    #[inline]
    pub fn owns(&self, account_id: AccountId) -> bool {
        account_id % self.total == self.index
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsharded_owns_everything() {
        let router = ShardRouter::unsharded();
        for account in [0u64, 1, 7, 1_000_003] {
            assert!(router.owns(account));
        }
    }

    #[test]
    fn modulo_ownership() {
        let router = ShardRouter::new(ShardConfig { index: 1, total: 4 });
        assert!(router.owns(1));
        assert!(router.owns(5));
        assert!(!router.owns(2));
        assert!(!router.owns(4));
    }

    #[test]
    fn shards_partition_accounts() {
        let routers: Vec<ShardRouter> = (0..4)
            .map(|index| ShardRouter::new(ShardConfig { index, total: 4 }))
            .collect();

        for account in 0..100u64 {
            let owners = routers.iter().filter(|r| r.owns(account)).count();
            assert_eq!(owners, 1);
        }
    }
}
