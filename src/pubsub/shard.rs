//! One shard's worth of pub/sub state: a single long-lived subscriber
//! connection demultiplexing broadcasts into locally-registered channel
//! queues, plus a publisher pool for outbound `PUBLISH`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use deadpool_redis::redis::{AsyncCommands, Client};
use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::{Codec, MsgpackCodec};
use crate::config::ReconnectHook;
use crate::error::Result;
use crate::layer::Message;
use crate::redis_pool::{PoolRegistry, RedisEndpoint, sanitize_redis_url};

const GROUP_CHANNEL_PREFIX: &str = "__group__:";
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Exponential backoff with full jitter: `attempt` counts consecutive
/// failures since the last successful connection.
fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exp_ms = (RECONNECT_BASE_DELAY.as_millis() as u64).saturating_mul(factor);
    let cap_ms = exp_ms.min(RECONNECT_MAX_DELAY.as_millis() as u64);
    let jittered_ms = rand::thread_rng().gen_range(0..=cap_ms);
    Duration::from_millis(jittered_ms)
}

struct LocalQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl LocalQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Drop-oldest overflow: the consumer observes a gap, never a stall.
    fn push(&self, payload: Vec<u8>) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(payload);
        drop(items);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Vec<u8> {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.items.lock();
                if let Some(item) = items.pop_front() {
                    return item;
                }
            }
            notified.await;
        }
    }

    /// Count of messages dropped because the local queue was full.
    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

enum BridgeCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// All state one `ShardLayer` needs to demultiplex delivered messages,
/// shared with the bridge task.
struct Dispatch {
    local_channels: DashMap<String, Arc<LocalQueue>>,
    local_groups: DashMap<String, Mutex<HashSet<String>>>,
    capacity: usize,
}

impl Dispatch {
    fn deliver(&self, redis_channel: &str, prefix: &str, payload: Vec<u8>) {
        let group_prefix = format!("{prefix}:{GROUP_CHANNEL_PREFIX}");
        if let Some(group) = redis_channel.strip_prefix(group_prefix.as_str()) {
            if let Some(members) = self.local_groups.get(group) {
                for member in members.lock().iter() {
                    self.queue_for(member).push(payload.clone());
                }
            }
            return;
        }
        let channel_prefix = format!("{prefix}:");
        if let Some(channel) = redis_channel.strip_prefix(channel_prefix.as_str()) {
            self.queue_for(channel).push(payload);
        }
    }

    fn queue_for(&self, channel: &str) -> Arc<LocalQueue> {
        self.local_channels
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(LocalQueue::new(self.capacity)))
            .clone()
    }
}

/// Owns one configured Redis host: a publisher pool plus the single
/// subscriber connection that feeds all locally-registered channels and
/// groups on this shard.
pub struct ShardLayer {
    prefix: String,
    codec: MsgpackCodec,
    publish_pool: PoolRegistry,
    dispatch: Arc<Dispatch>,
    subscribed: Arc<DashSet<String>>,
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    shutdown_tx: watch::Sender<bool>,
    bridge_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ShardLayer {
    pub fn new(
        url: String,
        prefix: String,
        capacity: usize,
        on_disconnect: Option<ReconnectHook>,
        on_reconnect: Option<ReconnectHook>,
    ) -> Self {
        let dispatch = Arc::new(Dispatch {
            local_channels: DashMap::new(),
            local_groups: DashMap::new(),
            capacity,
        });
        let subscribed = Arc::new(DashSet::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_bridge(
            url.clone(),
            prefix.clone(),
            dispatch.clone(),
            subscribed.clone(),
            command_rx,
            shutdown_rx,
            on_disconnect,
            on_reconnect,
        ));

        Self {
            prefix,
            codec: MsgpackCodec,
            publish_pool: PoolRegistry::new(RedisEndpoint::Direct(url)),
            dispatch,
            subscribed,
            command_tx,
            shutdown_tx,
            bridge_handle: Mutex::new(Some(handle)),
        }
    }

    fn redis_channel(&self, channel: &str) -> String {
        format!("{}:{}", self.prefix, channel)
    }

    fn redis_group_channel(&self, group: &str) -> String {
        format!("{}:{GROUP_CHANNEL_PREFIX}{}", self.prefix, group)
    }

    /// Messages dropped from `channel`'s local queue due to overflow.
    pub fn dropped_count(&self, channel: &str) -> u64 {
        self.dispatch
            .local_channels
            .get(channel)
            .map(|queue| queue.dropped())
            .unwrap_or(0)
    }

    /// Fast path: deliver directly if `channel` already has a local
    /// subscriber on this shard, skipping the network round trip.
    pub fn try_local_push(&self, channel: &str, payload: &[u8]) -> bool {
        if let Some(queue) = self.dispatch.local_channels.get(channel) {
            queue.push(payload.to_vec());
            true
        } else {
            false
        }
    }

    pub async fn publish(&self, redis_channel: &str, payload: Vec<u8>) -> Result<()> {
        let pool = self.publish_pool.pool().await?;
        let mut conn = pool.get().await?;
        conn.publish::<_, _, ()>(redis_channel, payload).await?;
        Ok(())
    }

    pub async fn send(&self, channel: &str, message: &Message) -> Result<()> {
        let payload = self.codec.encode(message)?;
        if self.try_local_push(channel, &payload) {
            return Ok(());
        }
        self.publish(&self.redis_channel(channel), payload).await
    }

    /// Ensures a subscriber connection exists for `channel`, then blocks
    /// for the next message delivered to it.
    pub async fn receive(&self, channel: &str) -> Result<Message> {
        self.ensure_subscribed(&self.redis_channel(channel));
        let queue = self.dispatch.queue_for(channel);
        let payload = queue.pop().await;
        self.codec.decode(&payload)
    }

    pub fn group_add(&self, group: &str, channel: &str) {
        self.ensure_subscribed(&self.redis_group_channel(group));
        self.dispatch
            .local_groups
            .entry(group.to_string())
            .or_insert_with(|| Mutex::new(HashSet::new()))
            .lock()
            .insert(channel.to_string());
    }

    pub fn group_discard(&self, group: &str, channel: &str) {
        if let Some(members) = self.dispatch.local_groups.get(group) {
            members.lock().remove(channel);
        }
    }

    pub async fn group_send(&self, group: &str, message: &Message) -> Result<()> {
        let payload = self.codec.encode(message)?;
        self.publish(&self.redis_group_channel(group), payload).await
    }

    fn ensure_subscribed(&self, redis_channel: &str) {
        if self.subscribed.insert(redis_channel.to_string()) {
            let _ = self.command_tx.send(BridgeCommand::Subscribe(redis_channel.to_string()));
        }
    }

    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.bridge_handle.lock().take() {
            let _ = handle.await;
        }
    }
}

async fn run_bridge(
    url: String,
    prefix: String,
    dispatch: Arc<Dispatch>,
    subscribed: Arc<DashSet<String>>,
    mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    on_disconnect: Option<ReconnectHook>,
    on_reconnect: Option<ReconnectHook>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let client = match Client::open(url.as_str()) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(url = %sanitize_redis_url(&url), error = %err, "pubsub bridge: failed to open client");
                let delay = reconnect_delay(attempt);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                tracing::warn!(url = %sanitize_redis_url(&url), error = %err, "pubsub bridge: failed to connect");
                let delay = reconnect_delay(attempt);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        if attempt > 0 {
            if let Some(hook) = &on_reconnect {
                hook.0();
            }
        }
        attempt = 0;

        for channel in subscribed.iter() {
            if let Err(err) = pubsub.subscribe(channel.as_str()).await {
                tracing::warn!(channel = %*channel, error = %err, "pubsub bridge: resubscribe failed");
            }
        }

        let mut disconnected = false;
        while !disconnected {
            let mut stream = pubsub.on_message();
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Subscribe(channel)) => {
                            drop(stream);
                            if let Err(err) = pubsub.subscribe(&channel).await {
                                tracing::warn!(channel, error = %err, "pubsub bridge: subscribe failed");
                                disconnected = true;
                            }
                            continue;
                        }
                        Some(BridgeCommand::Unsubscribe(channel)) => {
                            drop(stream);
                            subscribed.remove(&channel);
                            if let Err(err) = pubsub.unsubscribe(&channel).await {
                                tracing::warn!(channel, error = %err, "pubsub bridge: unsubscribe failed");
                            }
                            continue;
                        }
                        None => return,
                    }
                }

                message = stream.next() => {
                    match message {
                        Some(message) => {
                            let redis_channel: String = message.get_channel_name().to_string();
                            let payload: Vec<u8> = message.get_payload().unwrap_or_default();
                            drop(stream);
                            dispatch.deliver(&redis_channel, &prefix, payload);
                        }
                        None => {
                            drop(stream);
                            disconnected = true;
                        }
                    }
                }
            }
        }

        tracing::warn!(url = %sanitize_redis_url(&url), "pubsub bridge: connection lost, reconnecting");
        if let Some(hook) = &on_disconnect {
            hook.0();
        }
        let delay = reconnect_delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn redis_channel_naming() {
        let shard = ShardLayer::new("redis://localhost:6379".into(), "app".into(), 10, None, None);
        assert_eq!(shard.redis_channel("room.1"), "app:room.1");
        assert_eq!(shard.redis_group_channel("lobby"), "app:__group__:lobby");
    }

    #[tokio::test]
    async fn local_fast_path_skips_publish_when_no_local_subscriber() {
        let shard = ShardLayer::new("redis://localhost:6379".into(), "app".into(), 10, None, None);
        assert!(!shard.try_local_push("room.1", b"hello"));
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        for _ in 0..50 {
            assert!(reconnect_delay(0) <= RECONNECT_BASE_DELAY);
            assert!(reconnect_delay(3) <= RECONNECT_BASE_DELAY * 8);
            assert!(reconnect_delay(100) <= RECONNECT_MAX_DELAY);
        }
    }
}
