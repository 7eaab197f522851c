//! The channel layer capability every backend implements.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

/// A message is a string-keyed mapping; the codec serializes its values.
pub type Message = BTreeMap<String, MessageValue>;

/// The set of value shapes a message's fields may hold.
///
/// Mirrors the primitive set the default codec can represent schemalessly:
/// null, bool, integer, float, string, bytes, array, and nested maps.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MessageValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    #[serde(with = "serde_bytes")]
    Bytes(Vec<u8>),
    Array(Vec<MessageValue>),
    Map(BTreeMap<String, MessageValue>),
}

/// A point-to-point and group-broadcast message bus.
///
/// All operations are suspension points and must be safely cancellable:
/// dropping the returned future at any `.await` must not corrupt layer
/// state or leak a connection.
#[async_trait]
pub trait ChannelLayer: Send + Sync {
    /// Enqueues `message` on `channel`. Fails with `ChannelFull` if the
    /// channel is at capacity.
    async fn send(&self, channel: &str, message: Message) -> Result<()>;

    /// Waits for and returns the next message on `channel`.
    async fn receive(&self, channel: &str) -> Result<Message>;

    /// Adds `channel` as a member of `group`.
    async fn group_add(&self, group: &str, channel: &str) -> Result<()>;

    /// Removes `channel` from `group`, if present.
    async fn group_discard(&self, group: &str, channel: &str) -> Result<()>;

    /// Best-effort broadcast to every live member of `group`. Per-member
    /// failures (e.g. a full channel) are swallowed, never returned.
    async fn group_send(&self, group: &str, message: Message) -> Result<()>;

    /// Generates a fresh, unique, ephemeral channel name.
    async fn new_channel(&self, prefix: &str) -> Result<String>;

    /// Releases all resources held by this layer. Subsequent calls to any
    /// other method return `LayerClosed`.
    async fn close(&self) -> Result<()>;
}
