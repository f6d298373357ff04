//! Partition enumeration module
//!
//! A partition (an organization, repository, project or calendar) is the
//! unit of independent, resumable synchronization.
//!
//! # Enumerators
//!
//! - `ListEnumerator` - Static list of keys
//! - `EndpointEnumerator` - Keys listed by an HTTP endpoint

mod enumerators;
mod types;

pub use enumerators::{EndpointEnumerator, ListEnumerator};
pub use types::{dedupe, PartitionEnumerator};
