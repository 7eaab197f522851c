//! Fan-out channel layer over Redis pub/sub, sharded across hosts.

mod layer;
mod shard;

pub use layer::PubSubLayer;
pub use shard::ShardLayer;
