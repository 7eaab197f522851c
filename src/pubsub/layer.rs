use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rand::Rng;

use crate::config::{PubSubConfig, RedisTarget};
use crate::error::{ChannelLayerError, Result};
use crate::layer::{ChannelLayer, Message};
use crate::naming::{ephemeral_name, suffix_for_shard, validate_channel_name, validate_message};
use crate::sharding::shard_for;

use super::shard::ShardLayer;

/// Fire-and-forget broadcast layer over Redis pub/sub: no persistence, no
/// capacity errors on the sender side — overflow happens per subscriber.
pub struct PubSubLayer {
    shards: Vec<ShardLayer>,
    closed: AtomicBool,
}

impl PubSubLayer {
    pub fn new(config: PubSubConfig) -> Self {
        let hosts = match config.target {
            RedisTarget::Hosts(hosts) => hosts,
            RedisTarget::Sentinel { sentinels, .. } => sentinels,
        };
        let shards = hosts
            .into_iter()
            .map(|url| {
                ShardLayer::new(
                    url,
                    config.prefix.clone(),
                    config.capacity,
                    config.on_disconnect.clone(),
                    config.on_reconnect.clone(),
                )
            })
            .collect();

        Self {
            shards,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelLayerError::LayerClosed);
        }
        Ok(())
    }

    fn shard_for_name(&self, name: &str) -> &ShardLayer {
        &self.shards[shard_for(name, self.shards.len())]
    }
}

#[async_trait]
impl ChannelLayer for PubSubLayer {
    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_channel_name(channel)?;
        validate_message(&message)?;
        self.shard_for_name(channel).send(channel, &message).await
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        self.check_open()?;
        validate_channel_name(channel)?;
        self.shard_for_name(channel).receive(channel).await
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;
        // Group membership is consumer-instance-local: each shard tracks
        // only the members that live on it.
        self.shard_for_name(channel).group_add(group, channel);
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;
        self.shard_for_name(channel).group_discard(group, channel);
        Ok(())
    }

    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_message(&message)?;
        // Every shard may host a local member of this group, so the
        // reserved group channel is published on all of them.
        for shard in &self.shards {
            if let Err(err) = shard.group_send(group, &message).await {
                tracing::warn!(group, error = %err, "group_send: shard publish failed");
            }
        }
        Ok(())
    }

    async fn new_channel(&self, prefix: &str) -> Result<String> {
        self.check_open()?;
        let n_shards = self.shards.len();
        let target_shard = rand::thread_rng().gen_range(0..n_shards.max(1));
        let suffix = suffix_for_shard(n_shards, target_shard, |s| shard_for(s, n_shards))?;
        Ok(ephemeral_name(prefix, &suffix))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        for shard in &self.shards {
            shard.close().await;
        }
        Ok(())
    }
}
