use serde::{Deserialize, Serialize};

/// One webhook message on its way into the coalescing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subscriber_id: String,
    /// Raw message text for this fragment.
    pub text: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Source platform tag as reported by the webhook (e.g. `instagram`).
    pub platform: Option<String>,
}

/// Buffered burst state for one conversation.
///
/// Fragments accumulate in arrival order until the quiet period elapses and
/// the entry is drained as a whole. Profile metadata rides along so a drained
/// entry is self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub subscriber_id: String,
    pub fragments: Vec<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// Unix ms of the first fragment in this burst.
    pub first_received_ms: u64,
    /// Unix ms of the newest fragment; the drain deadline is measured from here.
    pub last_received_ms: u64,
}

impl QueueEntry {
    /// Fragments joined into one message, newline-separated, arrival order.
    #[must_use]
    pub fn combined_text(&self) -> String {
        self.fragments.join("\n")
    }

    /// True once the quiet period has fully elapsed since the newest fragment.
    #[must_use]
    pub fn due(&self, quiet_period_ms: u64, now_ms: u64) -> bool {
        self.last_received_ms.saturating_add(quiet_period_ms) <= now_ms
    }
}
