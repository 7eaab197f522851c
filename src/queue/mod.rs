//! Durable, sharded channel layer backed by Redis lists and sorted sets.

mod crypto;
mod layer;
mod scripts;

pub use layer::QueueLayer;
