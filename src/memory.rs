//! Single-process channel layer: bounded FIFO queues behind a `Notify`
//! per channel, avoiding any polling delay on `receive`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::InMemoryConfig;
use crate::error::{ChannelLayerError, Result};
use crate::layer::{ChannelLayer, Message};
use crate::naming::{ephemeral_name, validate_channel_name, validate_message};

struct ChannelEntry {
    queue: Mutex<VecDeque<(Instant, Message)>>,
    notify: Notify,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

/// In-process channel layer. Cheap to construct; state lives for the
/// lifetime of the `InMemoryLayer` value (typically one per process).
pub struct InMemoryLayer {
    config: InMemoryConfig,
    channels: DashMap<String, Arc<ChannelEntry>>,
    groups: DashMap<String, Mutex<HashMap<String, Instant>>>,
    closed: AtomicBool,
}

impl InMemoryLayer {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            groups: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelLayerError::LayerClosed);
        }
        Ok(())
    }

    fn channel_entry(&self, channel: &str) -> Arc<ChannelEntry> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(ChannelEntry::new()))
            .clone()
    }
}

#[async_trait]
impl ChannelLayer for InMemoryLayer {
    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_channel_name(channel)?;
        validate_message(&message)?;
        let entry = self.channel_entry(channel);
        {
            let mut queue = entry.queue.lock();
            let now = Instant::now();
            while matches!(queue.front(), Some((expires_at, _)) if *expires_at <= now) {
                queue.pop_front();
            }
            if queue.len() >= self.config.capacity {
                return Err(ChannelLayerError::ChannelFull);
            }
            queue.push_back((now + self.config.expiry, message));
        }
        entry.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        self.check_open()?;
        validate_channel_name(channel)?;
        let entry = self.channel_entry(channel);
        loop {
            let notified = entry.notify.notified();
            {
                let mut queue = entry.queue.lock();
                let now = Instant::now();
                while matches!(queue.front(), Some((expires_at, _)) if *expires_at <= now) {
                    queue.pop_front();
                }
                if let Some((_, message)) = queue.pop_front() {
                    return Ok(message);
                }
            }
            notified.await;
            self.check_open()?;
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;
        let members = self.groups.entry(group.to_string()).or_insert_with(|| Mutex::new(HashMap::new()));
        members.lock().insert(channel.to_string(), Instant::now());
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;
        if let Some(members) = self.groups.get(group) {
            members.lock().remove(channel);
        }
        Ok(())
    }

    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_message(&message)?;
        let Some(members) = self.groups.get(group) else {
            return Ok(());
        };
        let now = Instant::now();
        let live: Vec<String> = members
            .lock()
            .iter()
            .filter(|(_, added_at)| now.duration_since(**added_at) < self.config.group_expiry)
            .map(|(channel, _)| channel.clone())
            .collect();
        drop(members);

        for channel in live {
            if let Err(err) = self.send(&channel, message.clone()).await {
                tracing::warn!(group, channel, error = %err, "group_send: member delivery failed, skipping");
            }
        }
        Ok(())
    }

    async fn new_channel(&self, prefix: &str) -> Result<String> {
        self.check_open()?;
        Ok(ephemeral_name(prefix, "local"))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
        self.groups.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::layer::MessageValue;

    fn msg(i: i64) -> Message {
        let mut m = BTreeMap::new();
        m.insert("type".to_string(), MessageValue::Str("t".to_string()));
        m.insert("i".to_string(), MessageValue::Int(i));
        m
    }

    fn layer_with_capacity(capacity: usize) -> InMemoryLayer {
        InMemoryLayer::new(InMemoryConfig {
            capacity,
            expiry: Duration::from_secs(60),
            group_expiry: Duration::from_secs(86_400),
        })
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let layer = layer_with_capacity(3);
        layer.send("a", msg(1)).await.unwrap();
        layer.send("a", msg(2)).await.unwrap();
        layer.send("a", msg(3)).await.unwrap();

        for expected in 1..=3 {
            let received = layer.receive("a").await.unwrap();
            assert_eq!(received.get("i"), Some(&MessageValue::Int(expected)));
        }
    }

    #[tokio::test]
    async fn send_past_capacity_is_rejected() {
        let layer = layer_with_capacity(2);
        layer.send("a", msg(1)).await.unwrap();
        layer.send("a", msg(2)).await.unwrap();
        let err = layer.send("a", msg(3)).await.unwrap_err();
        assert!(matches!(err, ChannelLayerError::ChannelFull));
    }

    #[tokio::test]
    async fn group_fan_out_delivers_to_all_members() {
        let layer = layer_with_capacity(10);
        layer.group_add("g", "a").await.unwrap();
        layer.group_add("g", "b").await.unwrap();
        layer.group_send("g", msg(9)).await.unwrap();

        assert_eq!(layer.receive("a").await.unwrap().get("i"), Some(&MessageValue::Int(9)));
        assert_eq!(layer.receive("b").await.unwrap().get("i"), Some(&MessageValue::Int(9)));
    }

    #[tokio::test]
    async fn group_discard_stops_delivery() {
        let layer = layer_with_capacity(10);
        layer.group_add("g", "a").await.unwrap();
        layer.group_add("g", "b").await.unwrap();
        layer.group_discard("g", "a").await.unwrap();
        layer.group_send("g", msg(1)).await.unwrap();

        assert_eq!(layer.receive("b").await.unwrap().get("i"), Some(&MessageValue::Int(1)));
        let empty = tokio::time::timeout(Duration::from_millis(50), layer.receive("a")).await;
        assert!(empty.is_err(), "expected no message delivered to a discarded member");
    }

    #[tokio::test]
    async fn receive_blocks_until_a_send_wakes_it() {
        let layer = Arc::new(layer_with_capacity(10));
        let reader = layer.clone();
        let handle = tokio::spawn(async move { reader.receive("a").await.unwrap() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        layer.send("a", msg(7)).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("receive did not wake up")
            .unwrap();
        assert_eq!(received.get("i"), Some(&MessageValue::Int(7)));
    }

    #[tokio::test]
    async fn new_channel_names_are_unique() {
        let layer = layer_with_capacity(10);
        let a = layer.new_channel("specific").await.unwrap();
        let b = layer.new_channel("specific").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn send_rejects_a_message_without_a_valid_type() {
        let layer = layer_with_capacity(10);
        let mut bad = BTreeMap::new();
        bad.insert("text".to_string(), MessageValue::Str("no type field".to_string()));
        let err = layer.send("a", bad).await.unwrap_err();
        assert!(matches!(err, ChannelLayerError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let layer = layer_with_capacity(10);
        layer.close().await.unwrap();
        let err = layer.send("a", msg(1)).await.unwrap_err();
        assert!(matches!(err, ChannelLayerError::LayerClosed));
    }
}
