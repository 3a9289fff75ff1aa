//! Outbound reply delivery through the platform flow API.
//!
//! Replies are not sent as raw messages: the reply text is stored in a
//! subscriber custom field and a platform flow is triggered to render it.
//! Flow selection follows the subscriber's platform, with an optional
//! dedicated flow for payment confirmations.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

mod flow_api;

pub use flow_api::FlowApiDispatcher;

/// Default flow API base URL.
pub const DEFAULT_OUTBOUND_BASE_URL: &str = "https://api.manychat.com/fb";

/// Default custom field that carries the reply text.
pub const DEFAULT_RESPONSE_FIELD: &str = "ai_response";

/// Default request timeout for flow API calls, in seconds.
pub const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 10;

/// Flow namespace routing table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowRoutes {
    /// Flow used when nothing more specific matches.
    pub default_flow: String,
    /// Per-platform flows, keyed by lowercase platform tag.
    pub by_platform: HashMap<String, String>,
    /// Flow used when the engine confirms a payment.
    pub payment_confirmed_flow: Option<String>,
}

impl FlowRoutes {
    /// Pick the flow namespace for one delivery.
    #[must_use]
    pub fn select(&self, platform: Option<&str>, payment_confirmed: bool) -> &str {
        if payment_confirmed
            && let Some(flow) = &self.payment_confirmed_flow
        {
            return flow;
        }
        platform
            .map(str::to_ascii_lowercase)
            .and_then(|platform| self.by_platform.get(&platform))
            .unwrap_or(&self.default_flow)
    }
}

/// Runtime config for the flow API dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundConfig {
    /// Flow API base URL.
    pub base_url: String,
    /// Bearer token; required at startup.
    pub api_token: Option<String>,
    /// Custom field that carries the reply text.
    pub response_field: String,
    /// Flow routing table; the default flow is required at startup.
    pub routes: FlowRoutes,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OUTBOUND_BASE_URL.to_string(),
            api_token: None,
            response_field: DEFAULT_RESPONSE_FIELD.to_string(),
            routes: FlowRoutes::default(),
            timeout_secs: DEFAULT_OUTBOUND_TIMEOUT_SECS,
        }
    }
}

/// Collaborator that delivers reply text to the end user.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Deliver one reply. Failure is reported for logging only; durable
    /// state written earlier in the turn is never rolled back.
    async fn deliver_reply(
        &self,
        subscriber_id: &str,
        platform: Option<&str>,
        reply: &str,
        payment_confirmed: bool,
    ) -> Result<()>;
}
