//! Server-side Lua scripts backing the queue layer's atomic operations.
//!
//! Mirrors the check-then-mutate `EVAL` pattern used for rate-limit
//! counters elsewhere: a single round trip makes the capacity check and
//! the mutation atomic with respect to concurrent senders on the same key.

/// `KEYS[1]` = channel list key.
/// `ARGV[1]` = capacity, `ARGV[2]` = payload, `ARGV[3]` = expiry seconds.
/// Returns 1 on success, 0 if the channel was full.
pub const SEND_SCRIPT: &str = r#"
local len = redis.call('LLEN', KEYS[1])
if len >= tonumber(ARGV[1]) then
  return 0
end
redis.call('RPUSH', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// `KEYS[1]` = group sorted-set key.
/// `ARGV[1]` = now (epoch seconds), `ARGV[2]` = group expiry seconds.
/// Returns the list of member channel names with score greater than
/// `now - group_expiry`.
pub const GROUP_MEMBERS_SCRIPT: &str = r#"
local cutoff = tonumber(ARGV[1]) - tonumber(ARGV[2])
return redis.call('ZRANGEBYSCORE', KEYS[1], cutoff, '+inf')
"#;

/// `ARGV[1]` = key prefix, `ARGV[2]` = capacity, `ARGV[3]` = payload,
/// `ARGV[4..]` = member channel names destined for this shard.
/// Returns `{ok_count, failed_count}`. No `KEYS` are declared because the
/// member list (and therefore the keys touched) is only known once the
/// script starts running; this backend targets a single Redis instance
/// per shard rather than a cluster, so non-`KEYS` key construction is safe.
pub const GROUP_FANOUT_SCRIPT: &str = r#"
local prefix = ARGV[1]
local capacity = tonumber(ARGV[2])
local payload = ARGV[3]
local ok = 0
local failed = 0
for i = 4, #ARGV do
  local key = prefix .. ':ch:' .. ARGV[i]
  local len = redis.call('LLEN', key)
  if len < capacity then
    redis.call('RPUSH', key, payload)
    ok = ok + 1
  else
    failed = failed + 1
  end
end
return {ok, failed}
"#;
