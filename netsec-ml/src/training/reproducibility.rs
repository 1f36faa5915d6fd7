//! Seed derivation for reproducible candidate fitting.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hands out stable per-component seeds derived from one global seed.
#[derive(Debug, Clone)]
pub struct SeedManager {
    pub global_seed: u64,
    component_seeds: HashMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            component_seeds: HashMap::new(),
        }
    }

    pub fn get_seed(&mut self, component: &str) -> u64 {
        let global = self.global_seed;
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| derive_seed(global, component))
    }
}

/// First eight bytes of `SHA-256(global || component)`.
pub fn derive_seed(global_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global_seed.to_le_bytes());
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
