use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::store::RedisHandle;

use super::entry::{InboundMessage, QueueEntry};
use super::CoalescingQueue;

/// Appends one fragment to the entry under KEYS[1], creating the entry on
/// first use, and refreshes the entry TTL. Runs server-side so concurrent
/// webhook deliveries never interleave a read-modify-write.
///
/// ARGV: subscriber_id, text, now_ms, first_name, last_name, platform, ttl_ms.
/// Empty metadata strings leave the stored value untouched.
const APPEND_SCRIPT: &str = r"
local raw = redis.call('GET', KEYS[1])
local entry
if raw then
  entry = cjson.decode(raw)
else
  entry = {
    subscriber_id = ARGV[1],
    fragments = {},
    first_received_ms = tonumber(ARGV[3]),
  }
end
table.insert(entry.fragments, ARGV[2])
entry.last_received_ms = tonumber(ARGV[3])
if ARGV[4] ~= '' then entry.first_name = ARGV[4] end
if ARGV[5] ~= '' then entry.last_name = ARGV[5] end
if ARGV[6] ~= '' then entry.platform = ARGV[6] end
redis.call('SET', KEYS[1], cjson.encode(entry), 'PX', tonumber(ARGV[7]))
return #entry.fragments
";

/// Deletes and returns the entry under KEYS[1] only when its quiet period has
/// elapsed. The deadline check and the delete are one atomic step, so two
/// racing drains can never both observe the entry.
///
/// ARGV: now_ms, quiet_period_ms.
const TAKE_DUE_SCRIPT: &str = r"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local entry = cjson.decode(raw)
if entry.last_received_ms + tonumber(ARGV[2]) > tonumber(ARGV[1]) then
  return false
end
redis.call('DEL', KEYS[1])
return raw
";

pub(super) struct RedisQueue {
    handle: RedisHandle,
    key_prefix: String,
    quiet_period_ms: u64,
    entry_ttl_ms: u64,
}

impl RedisQueue {
    pub(super) fn new(
        url: &str,
        key_prefix: &str,
        quiet_period_ms: u64,
        entry_ttl_ms: u64,
    ) -> Self {
        Self {
            handle: RedisHandle::new(url),
            key_prefix: key_prefix.to_string(),
            quiet_period_ms,
            entry_ttl_ms,
        }
    }

    fn entry_key(&self, subscriber_id: &str) -> String {
        format!("{}{subscriber_id}", self.key_prefix)
    }
}

#[async_trait]
impl CoalescingQueue for RedisQueue {
    async fn append(&self, message: &InboundMessage, now_ms: u64) -> Result<usize> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(APPEND_SCRIPT)
            .arg(1)
            .arg(self.entry_key(&message.subscriber_id))
            .arg(&message.subscriber_id)
            .arg(&message.text)
            .arg(now_ms)
            .arg(message.first_name.as_deref().unwrap_or(""))
            .arg(message.last_name.as_deref().unwrap_or(""))
            .arg(message.platform.as_deref().unwrap_or(""))
            .arg(self.entry_ttl_ms);
        let fragment_count: usize = self
            .handle
            .run(&cmd)
            .await
            .context("failed to append fragment to queue entry")?;
        Ok(fragment_count)
    }

    async fn take_due(&self, subscriber_id: &str, now_ms: u64) -> Result<Option<QueueEntry>> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(TAKE_DUE_SCRIPT)
            .arg(1)
            .arg(self.entry_key(subscriber_id))
            .arg(now_ms)
            .arg(self.quiet_period_ms);
        let raw: Option<String> = self
            .handle
            .run(&cmd)
            .await
            .context("failed to drain queue entry")?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let entry: QueueEntry = serde_json::from_str(&raw).with_context(|| {
                    format!("queue entry for subscriber `{subscriber_id}` is not valid JSON")
                })?;
                Ok(Some(entry))
            }
        }
    }
}
