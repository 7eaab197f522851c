//! Channel-layer backends for ASGI-style real-time message routing:
//! an in-process layer, a Redis-backed durable queue layer, and a
//! Redis pub/sub layer, all implementing the same [`layer::ChannelLayer`]
//! trait.

pub mod codec;
pub mod config;
pub mod error;
pub mod layer;
pub mod memory;
pub mod naming;
pub mod pubsub;
pub mod queue;
pub mod redis_pool;
pub mod registry;
pub mod sharding;

pub use codec::{Codec, MsgpackCodec};
pub use config::{InMemoryConfig, PubSubConfig, QueueConfig, ReconnectHook, RedisTarget};
pub use error::{ChannelLayerError, Result};
pub use layer::{ChannelLayer, Message, MessageValue};
pub use memory::InMemoryLayer;
pub use pubsub::PubSubLayer;
pub use queue::QueueLayer;
pub use registry::ChannelLayerRegistry;
