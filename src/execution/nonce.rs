//! Per-chain nonce authority.
//!
//! One manager per partition is the single source of next-nonce
//! allocation. A sender's counter is seeded from the chain on first
//! use and then advances locally — two concurrent submissions can
//! never receive the same nonce.

use alloy::primitives::Address;
use dashmap::DashMap;
use tracing::debug;

use crate::rpc::{ChainRpc, RpcError};

type NonceKey = (String, Address);

pub struct NonceManager {
    next: DashMap<NonceKey, u64>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            next: DashMap::new(),
        }
    }

    /// Allocate the next nonce for `(chain, sender)`, seeding from the
    /// chain's transaction count on first use.
    pub async fn allocate(
        &self,
        chain: &str,
        sender: Address,
        rpc: &dyn ChainRpc,
    ) -> Result<u64, RpcError> {
        let key = (chain.to_string(), sender);
        if !self.next.contains_key(&key) {
            let seed = rpc.transaction_count(sender).await?;
            // First seeder wins; a concurrent seed is identical anyway
            self.next.entry(key.clone()).or_insert(seed);
            debug!(chain, %sender, seed, "nonce counter seeded");
        }
        let mut entry = self
            .next
            .get_mut(&key)
            .expect("nonce entry exists after seeding");
        let nonce = *entry;
        *entry += 1;
        Ok(nonce)
    }

    /// Drop the local counter so the next allocation reseeds (used
    /// after a failed broadcast left a gap).
    pub fn reset(&self, chain: &str, sender: Address) {
        self.next.remove(&(chain.to_string(), sender));
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;

    #[tokio::test]
    async fn test_seeds_then_increments() {
        let rpc = MockRpc::new("arbitrum");
        let sender = Address::repeat_byte(0x05);
        rpc.nonces.insert(sender, 42);

        let manager = NonceManager::new();
        assert_eq!(manager.allocate("arbitrum", sender, &rpc).await.unwrap(), 42);
        assert_eq!(manager.allocate("arbitrum", sender, &rpc).await.unwrap(), 43);
        assert_eq!(manager.allocate("arbitrum", sender, &rpc).await.unwrap(), 44);
    }

    #[tokio::test]
    async fn test_chains_are_independent() {
        let arb = MockRpc::new("arbitrum");
        let base = MockRpc::new("base");
        let sender = Address::repeat_byte(0x05);
        arb.nonces.insert(sender, 10);
        base.nonces.insert(sender, 99);

        let manager = NonceManager::new();
        assert_eq!(manager.allocate("arbitrum", sender, &arb).await.unwrap(), 10);
        assert_eq!(manager.allocate("base", sender, &base).await.unwrap(), 99);
        assert_eq!(manager.allocate("arbitrum", sender, &arb).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_reset_reseeds() {
        let rpc = MockRpc::new("arbitrum");
        let sender = Address::repeat_byte(0x05);
        rpc.nonces.insert(sender, 7);

        let manager = NonceManager::new();
        assert_eq!(manager.allocate("arbitrum", sender, &rpc).await.unwrap(), 7);
        manager.reset("arbitrum", sender);
        rpc.nonces.insert(sender, 8);
        assert_eq!(manager.allocate("arbitrum", sender, &rpc).await.unwrap(), 8);
    }
}
