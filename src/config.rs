//! Backend configuration structs.
//!
//! Numeric defaults follow the same "const default, optional env override"
//! pattern used elsewhere for topic/cache tuning knobs.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const ENV_CHANNEL_CAPACITY: &str = "CHANNEL_LAYER_CAPACITY";
const ENV_CHANNEL_EXPIRY: &str = "CHANNEL_LAYER_EXPIRY_SECS";
const ENV_GROUP_EXPIRY: &str = "CHANNEL_LAYER_GROUP_EXPIRY_SECS";
const ENV_PREFIX: &str = "CHANNEL_LAYER_PREFIX";

const DEFAULT_CAPACITY: usize = 100;
const DEFAULT_EXPIRY_SECS: u64 = 60;
const DEFAULT_GROUP_EXPIRY_SECS: u64 = 86_400;
const DEFAULT_PREFIX: &str = "asgi";

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Configuration for [`crate::memory::InMemoryLayer`].
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub capacity: usize,
    pub expiry: Duration,
    pub group_expiry: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: env_or(ENV_CHANNEL_CAPACITY, DEFAULT_CAPACITY),
            expiry: Duration::from_secs(env_or(ENV_CHANNEL_EXPIRY, DEFAULT_EXPIRY_SECS)),
            group_expiry: Duration::from_secs(env_or(ENV_GROUP_EXPIRY, DEFAULT_GROUP_EXPIRY_SECS)),
        }
    }
}

/// How to locate the Redis deployment backing a durable or pub/sub layer.
#[derive(Debug, Clone)]
pub enum RedisTarget {
    Hosts(Vec<String>),
    Sentinel {
        sentinels: Vec<String>,
        service_name: String,
    },
}

/// Configuration for [`crate::queue::QueueLayer`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub target: RedisTarget,
    pub prefix: String,
    pub capacity: usize,
    pub expiry: Duration,
    pub group_expiry: Duration,
    /// When non-empty, payloads are sealed with an authenticated cipher
    /// before being stored. First key is used for encryption; all keys
    /// are tried on decryption to support rotation.
    pub symmetric_encryption_keys: Vec<String>,
}

impl QueueConfig {
    pub fn new(target: RedisTarget) -> Self {
        Self {
            target,
            prefix: env::var(ENV_PREFIX).unwrap_or_else(|_| DEFAULT_PREFIX.to_string()),
            capacity: env_or(ENV_CHANNEL_CAPACITY, DEFAULT_CAPACITY),
            expiry: Duration::from_secs(env_or(ENV_CHANNEL_EXPIRY, DEFAULT_EXPIRY_SECS)),
            group_expiry: Duration::from_secs(env_or(ENV_GROUP_EXPIRY, DEFAULT_GROUP_EXPIRY_SECS)),
            symmetric_encryption_keys: Vec::new(),
        }
    }
}

/// A callback invoked on a pub/sub bridge connection lifecycle event.
/// Wrapped so [`PubSubConfig`] can still derive `Clone`; `Debug` is
/// written by hand since closures don't implement it.
#[derive(Clone)]
pub struct ReconnectHook(pub Arc<dyn Fn() + Send + Sync>);

impl ReconnectHook {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for ReconnectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReconnectHook(..)")
    }
}

/// Configuration for [`crate::pubsub::PubSubLayer`].
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub target: RedisTarget,
    pub prefix: String,
    pub capacity: usize,
    /// Invoked each time a shard's subscriber connection is lost.
    pub on_disconnect: Option<ReconnectHook>,
    /// Invoked each time a shard's subscriber connection is re-established
    /// after a loss (not on the initial connect).
    pub on_reconnect: Option<ReconnectHook>,
}

impl PubSubConfig {
    pub fn new(target: RedisTarget) -> Self {
        Self {
            target,
            prefix: env::var(ENV_PREFIX).unwrap_or_else(|_| DEFAULT_PREFIX.to_string()),
            capacity: env_or(ENV_CHANNEL_CAPACITY, DEFAULT_CAPACITY),
            on_disconnect: None,
            on_reconnect: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_defaults() {
        let cfg = InMemoryConfig::default();
        assert_eq!(cfg.capacity, DEFAULT_CAPACITY);
        assert_eq!(cfg.expiry, Duration::from_secs(DEFAULT_EXPIRY_SECS));
    }

    #[test]
    fn queue_config_default_prefix() {
        let cfg = QueueConfig::new(RedisTarget::Hosts(vec!["redis://127.0.0.1".into()]));
        assert_eq!(cfg.prefix, DEFAULT_PREFIX);
        assert!(cfg.symmetric_encryption_keys.is_empty());
    }

    #[test]
    fn pubsub_config_has_no_callbacks_by_default() {
        let cfg = PubSubConfig::new(RedisTarget::Hosts(vec!["redis://127.0.0.1".into()]));
        assert!(cfg.on_disconnect.is_none());
        assert!(cfg.on_reconnect.is_none());
    }

    #[test]
    fn reconnect_hook_runs_the_closure() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let hook = ReconnectHook::new(move || flag.store(true, Ordering::SeqCst));

        hook.0();
        assert!(fired.load(Ordering::SeqCst));
    }
}
