//! The singleton shard index for the sharded catalog log.

use serde::{Deserialize, Serialize};

/// Names every shard object and which one currently accepts appends.
///
/// Invariants maintained by the catalog service: exactly one shard is
/// current at a time, shard numbers only ever increase, and a shard that
/// has been rotated away from is never appended to again.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ShardIndex {
    /// Object paths of every shard, in creation order.
    pub shards: Vec<String>,

    /// Number of the writable shard (1-based).
    pub current: u32,
}

impl ShardIndex {
    /// A fresh index naming a single writable shard.
    pub fn bootstrap(first_shard_path: String) -> Self {
        Self {
            shards: vec![first_shard_path],
            current: 1,
        }
    }

    /// Path of the shard that accepts appends.
    pub fn current_path(&self) -> &str {
        // shards is never empty: bootstrap seeds one entry and rotation only
        // pushes.
        self.shards
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }
}
