use brolink_model::DossierId;
use sha2::{Digest, Sha256};

use crate::config::ShardConfig;

impl ShardConfig {
    /// Deterministic owner check: the first eight bytes of SHA-256 over the
    /// dossier id, modulo the shard count.
    pub fn owns(&self, dossier: DossierId) -> bool {
        if self.count <= 1 {
            return true;
        }
        shard_of(dossier, self.count) == self.index
    }
}

pub fn shard_of(dossier: DossierId, count: u32) -> u32 {
    let digest = Sha256::digest(dossier.as_uuid().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(count.max(1))) as u32
}
