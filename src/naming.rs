//! Channel/group name validation and ephemeral channel name construction.
//!
//! Ephemeral names have the form `<prefix>.<random>!<shard-suffix>`. The
//! `!` separates the routable part (which must hash to the same shard on
//! every process) from the cosmetic prefix.

use rand::Rng;

use crate::error::{ChannelLayerError, Result};
use crate::layer::{Message, MessageValue};

const MAX_NAME_LEN: usize = 100;

/// `[A-Za-z0-9!._-]{1,100}`
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ChannelLayerError::invalid_channel_name(name));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'!' | b'.' | b'_' | b'-'))
    {
        return Err(ChannelLayerError::invalid_channel_name(name));
    }
    Ok(())
}

/// `[a-z][a-z0-9._-]*`
pub fn validate_message_type(type_: &str) -> Result<()> {
    let mut chars = type_.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if !first_ok || !rest_ok {
        return Err(ChannelLayerError::invalid_message(format!(
            "invalid message type: {type_}"
        )));
    }
    Ok(())
}

/// Validates a message's mandatory `type` key: present, a string, and
/// matching [`validate_message_type`].
pub fn validate_message(message: &Message) -> Result<()> {
    match message.get("type") {
        Some(MessageValue::Str(type_)) => validate_message_type(type_),
        Some(_) => Err(ChannelLayerError::invalid_message("\"type\" field must be a string")),
        None => Err(ChannelLayerError::invalid_message("message is missing the required \"type\" field")),
    }
}

fn random_suffix(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::thread_rng().r#gen()).collect();
    hex::encode(bytes)
}

/// Builds an ephemeral channel name with an explicit routing suffix.
pub fn ephemeral_name(prefix: &str, shard_suffix: &str) -> String {
    format!("{prefix}.{}!{shard_suffix}", random_suffix(12))
}

/// Splits `name` into `(routable_part, shard_suffix)`.
///
/// `routable_part` is the whole name if there is no `!`; otherwise it is
/// the text after `!`, which is what sharding hashes.
pub fn shard_key(name: &str) -> &str {
    match name.rsplit_once('!') {
        Some((_, suffix)) => suffix,
        None => name,
    }
}

/// Generates a shard suffix that hashes to `target_shard` out of `n_shards`.
///
/// Expected O(n_shards) attempts with a uniform hash; bounded to avoid an
/// unbounded loop under a pathological hash function.
pub fn suffix_for_shard(n_shards: usize, target_shard: usize, hash_fn: impl Fn(&str) -> usize) -> Result<String> {
    let max_attempts = n_shards.max(1) * 10;
    for _ in 0..max_attempts {
        let candidate = random_suffix(12);
        if hash_fn(&candidate) == target_shard {
            return Ok(candidate);
        }
    }
    Err(ChannelLayerError::backend_unavailable(
        "failed to generate a shard-routable suffix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_channel_name("specific.abc123!def").is_ok());
        assert!(validate_channel_name("my-group_1").is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name(&"a".repeat(101)).is_err());
        assert!(validate_channel_name("bad channel").is_err());
        assert!(validate_channel_name("bad#channel").is_err());
    }

    #[test]
    fn validates_message_type() {
        assert!(validate_message_type("websocket.send").is_ok());
        assert!(validate_message_type("Http.Send").is_err());
        assert!(validate_message_type("1http").is_err());
        assert!(validate_message_type("").is_err());
    }

    #[test]
    fn validates_message_requires_type_field() {
        let mut message = Message::new();
        assert!(validate_message(&message).is_err());

        message.insert("type".to_string(), MessageValue::Int(1));
        assert!(validate_message(&message).is_err());

        message.insert("type".to_string(), MessageValue::Str("bad type".to_string()));
        assert!(validate_message(&message).is_err());

        message.insert("type".to_string(), MessageValue::Str("chat.message".to_string()));
        assert!(validate_message(&message).is_ok());
    }

    #[test]
    fn ephemeral_names_are_routable() {
        let name = ephemeral_name("specific", "abcd1234ef00");
        assert_eq!(shard_key(&name), "abcd1234ef00");
        assert!(name.starts_with("specific."));
    }

    #[test]
    fn shard_key_without_bang_is_whole_name() {
        assert_eq!(shard_key("plain-channel"), "plain-channel");
    }

    #[test]
    fn ephemeral_names_are_unique() {
        let a = ephemeral_name("specific", "x");
        let b = ephemeral_name("specific", "x");
        assert_ne!(a, b);
    }
}
