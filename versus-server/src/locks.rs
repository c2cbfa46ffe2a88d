//! Striped async locks keyed by record id.
//!
//! Read-modify-write cycles on a player or a session go through the store in three steps
//! (get, mutate, update). Holding the stripe of the record's id across the cycle linearizes
//! concurrent writers to the same record while unrelated records mostly land on other stripes.

use tokio::sync::{Mutex, MutexGuard};

/// Default amount of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// DJB2 hash, deterministic over the id bytes.
fn djb2_hash(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

/// A fixed set of mutexes, one is picked per key.
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        StripedLocks {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Waits for the stripe of `key`. Never hold two stripes of the same table at once.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let index = (djb2_hash(key.as_bytes()) % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        StripedLocks::new(DEFAULT_STRIPES)
    }
}
