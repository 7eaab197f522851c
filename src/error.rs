//! Error types shared by every channel layer backend.

use thiserror::Error;

/// Errors returned by [`crate::layer::ChannelLayer`] operations.
#[derive(Error, Debug)]
pub enum ChannelLayerError {
    #[error("channel is full")]
    ChannelFull,

    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("channel layer is closed")]
    LayerClosed,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool build error: {0}")]
    PoolBuild(#[from] deadpool_redis::CreatePoolError),
}

impl ChannelLayerError {
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn invalid_channel_name(name: impl Into<String>) -> Self {
        Self::InvalidChannelName(name.into())
    }

    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Whether retrying the same operation again might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Redis(_) | Self::Pool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelLayerError>;
