//! Partition enumeration trait
//!
//! Partitions are fixed for the duration of one run. Enumerators return
//! each key once, in first-seen order.

use crate::error::Result;
use crate::types::PartitionKey;
use async_trait::async_trait;
use std::collections::HashSet;

/// Supplies the partitions of a source
#[async_trait]
pub trait PartitionEnumerator: Send + Sync {
    /// List every partition for this run
    async fn partitions(&self) -> Result<Vec<PartitionKey>>;
}

/// Drop empty and repeated keys, keeping first-seen order
pub fn dedupe<I>(keys: I) -> Vec<PartitionKey>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .map(PartitionKey::new)
        .collect()
}
