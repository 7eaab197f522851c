use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use deadpool_redis::redis::{Script, cmd};
use rand::RngCore;

use crate::codec::{Codec, MsgpackCodec};
use crate::config::{QueueConfig, RedisTarget};
use crate::error::{ChannelLayerError, Result};
use crate::layer::{ChannelLayer, Message};
use crate::naming::{ephemeral_name, suffix_for_shard, validate_channel_name, validate_message};
use crate::sharding::shard_for;

use super::crypto;
use super::scripts::{GROUP_FANOUT_SCRIPT, GROUP_MEMBERS_SCRIPT, SEND_SCRIPT};
use crate::redis_pool::{PoolRegistry, RedisEndpoint, sanitize_redis_url};

const MESSAGE_ID_LEN: usize = 12;
const RECEIVE_BLOCK_SECS: usize = 5;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Redis-backed durable channel layer: cross-process delivery with
/// at-most-one-receiver semantics, bounded capacity, TTL expiry, and
/// sharding across multiple Redis instances.
pub struct QueueLayer {
    shards: Vec<PoolRegistry>,
    prefix: String,
    capacity: usize,
    expiry: Duration,
    group_expiry: Duration,
    encryption_keys: Vec<String>,
    codec: MsgpackCodec,
    closed: AtomicBool,
}

impl QueueLayer {
    pub fn new(config: QueueConfig) -> Self {
        let shards = match &config.target {
            RedisTarget::Hosts(hosts) => hosts
                .iter()
                .map(|url| {
                    tracing::debug!(url = %sanitize_redis_url(url), "queue layer: configuring shard");
                    PoolRegistry::new(RedisEndpoint::Direct(url.clone()))
                })
                .collect(),
            RedisTarget::Sentinel {
                sentinels,
                service_name,
            } => vec![PoolRegistry::new(RedisEndpoint::Sentinel {
                sentinels: sentinels.clone(),
                service_name: service_name.clone(),
            })],
        };

        Self {
            shards,
            prefix: config.prefix,
            capacity: config.capacity,
            expiry: config.expiry,
            group_expiry: config.group_expiry,
            encryption_keys: config.symmetric_encryption_keys,
            codec: MsgpackCodec,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelLayerError::LayerClosed);
        }
        Ok(())
    }

    fn channel_key(&self, name: &str) -> String {
        format!("{}:ch:{}", self.prefix, name)
    }

    fn group_key(&self, name: &str) -> String {
        format!("{}:grp:{}", self.prefix, name)
    }

    fn shard_for_name(&self, name: &str) -> usize {
        shard_for(name, self.shards.len())
    }

    fn encode_payload(&self, message: &Message) -> Result<Vec<u8>> {
        let mut id = [0u8; MESSAGE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut id);
        let body = self.codec.encode(message)?;

        let mut payload = Vec::with_capacity(MESSAGE_ID_LEN + body.len());
        payload.extend_from_slice(&id);
        payload.extend_from_slice(&body);

        if self.encryption_keys.is_empty() {
            Ok(payload)
        } else {
            crypto::seal(&self.encryption_keys, &payload)
        }
    }

    fn decode_payload(&self, raw: &[u8]) -> Result<Message> {
        let payload = if self.encryption_keys.is_empty() {
            raw.to_vec()
        } else {
            crypto::open(&self.encryption_keys, raw)?
        };
        if payload.len() < MESSAGE_ID_LEN {
            return Err(ChannelLayerError::Codec("stored payload missing message id".into()));
        }
        self.codec.decode(&payload[MESSAGE_ID_LEN..])
    }
}

#[async_trait]
impl ChannelLayer for QueueLayer {
    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_channel_name(channel)?;
        validate_message(&message)?;

        let shard = self.shard_for_name(channel);
        let payload = self.encode_payload(&message)?;
        let key = self.channel_key(channel);

        let pool = self.shards[shard].pool().await?;
        let mut conn = pool.get().await?;
        let ok: i64 = Script::new(SEND_SCRIPT)
            .key(&key)
            .arg(self.capacity)
            .arg(payload)
            .arg(self.expiry.as_secs())
            .invoke_async(&mut conn)
            .await?;

        if ok == 0 {
            return Err(ChannelLayerError::ChannelFull);
        }
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        self.check_open()?;
        validate_channel_name(channel)?;

        let shard = self.shard_for_name(channel);
        let key = self.channel_key(channel);
        let pool = self.shards[shard].pool().await?;

        loop {
            self.check_open()?;
            let mut conn = pool.get().await?;
            let reply: Option<(String, Vec<u8>)> = cmd("BLPOP")
                .arg(&key)
                .arg(RECEIVE_BLOCK_SECS)
                .query_async(&mut conn)
                .await?;

            if let Some((_, raw)) = reply {
                return self.decode_payload(&raw);
            }
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;

        let shard = self.shard_for_name(group);
        let key = self.group_key(group);
        let pool = self.shards[shard].pool().await?;
        let mut conn = pool.get().await?;

        cmd("ZADD")
            .arg(&key)
            .arg(now_secs())
            .arg(channel)
            .query_async::<()>(&mut conn)
            .await?;
        cmd("EXPIRE")
            .arg(&key)
            .arg(self.group_expiry.as_secs())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_channel_name(channel)?;
        let shard = self.shard_for_name(group);
        let key = self.group_key(group);
        let pool = self.shards[shard].pool().await?;
        let mut conn = pool.get().await?;
        cmd("ZREM").arg(&key).arg(channel).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        self.check_open()?;
        validate_channel_name(group)?;
        validate_message(&message)?;

        let group_shard = self.shard_for_name(group);
        let group_key = self.group_key(group);
        let pool = self.shards[group_shard].pool().await?;
        let mut conn = pool.get().await?;

        let members: Vec<String> = Script::new(GROUP_MEMBERS_SCRIPT)
            .key(&group_key)
            .arg(now_secs())
            .arg(self.group_expiry.as_secs())
            .invoke_async(&mut conn)
            .await?;

        if members.is_empty() {
            return Ok(());
        }

        let mut by_shard: HashMap<usize, Vec<String>> = HashMap::new();
        for member in members {
            let shard = shard_for(&member, self.shards.len());
            by_shard.entry(shard).or_default().push(member);
        }

        let payload = self.encode_payload(&message)?;
        let fanouts = by_shard.into_iter().map(|(shard, members)| {
            let payload = payload.clone();
            let prefix = self.prefix.clone();
            let capacity = self.capacity;
            async move {
                let pool = self.shards[shard].pool().await?;
                let mut conn = pool.get().await?;
                let mut script = Script::new(GROUP_FANOUT_SCRIPT).prepare_invoke();
                script.arg(&prefix).arg(capacity).arg(&payload);
                for member in &members {
                    script.arg(member);
                }
                let (ok, failed): (i64, i64) = script.invoke_async(&mut conn).await?;
                Ok::<(i64, i64), ChannelLayerError>((ok, failed))
            }
        });

        let results = futures::future::join_all(fanouts).await;
        let mut total_failed = 0i64;
        for result in results {
            match result {
                Ok((_, failed)) => total_failed += failed,
                Err(err) => tracing::warn!(group, error = %err, "group_send: shard fan-out failed"),
            }
        }
        if total_failed > 0 {
            tracing::warn!(group, total_failed, "group_send: some members were at capacity");
        }
        Ok(())
    }

    async fn new_channel(&self, prefix: &str) -> Result<String> {
        self.check_open()?;
        let n_shards = self.shards.len();
        let target_shard = (rand::thread_rng().next_u32() as usize) % n_shards.max(1);
        let suffix = suffix_for_shard(n_shards, target_shard, |s| shard_for(s, n_shards))?;
        Ok(ephemeral_name(prefix, &suffix))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        for shard in &self.shards {
            shard.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(prefix: &str, hosts: usize) -> QueueLayer {
        let urls = (0..hosts).map(|i| format!("redis://localhost:{}", 6379 + i)).collect();
        QueueLayer::new(QueueConfig {
            prefix: prefix.to_string(),
            ..QueueConfig::new(RedisTarget::Hosts(urls))
        })
    }

    #[test]
    fn channel_and_group_keys_use_configured_prefix() {
        let layer = layer("myapp", 1);
        assert_eq!(layer.channel_key("a"), "myapp:ch:a");
        assert_eq!(layer.group_key("g"), "myapp:grp:g");
    }

    #[test]
    fn sharding_is_stable_across_calls() {
        let layer = layer("myapp", 4);
        let name = "specific.abc!deadbeef0000";
        assert_eq!(layer.shard_for_name(name), layer.shard_for_name(name));
    }

    #[test]
    fn encode_decode_round_trips_a_message() {
        let layer = layer("myapp", 1);
        let mut message = Message::new();
        message.insert("type".to_string(), crate::layer::MessageValue::Str("t".into()));

        let payload = layer.encode_payload(&message).unwrap();
        let decoded = layer.decode_payload(&payload).unwrap();
        assert_eq!(decoded, message);
    }
}
