//! Conversation tracking configuration.

use std::time::Duration;

use crate::env::EnvSource;

/// Settings for the conversation context cache.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Idle time after which a context is evicted.
    /// `CONV_TTL_MS`, default 1 800 000 (30 minutes).
    pub ttl: Duration,
    /// Maximum number of live contexts before LRU eviction.
    /// `CONV_MAX_ENTRIES`, default 10 000.
    pub max_entries: u64,
}

impl ConversationConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        Ok(ConversationConfig {
            ttl: env.parse_millis("CONV_TTL_MS", 1_800_000)?,
            max_entries: env.parse("CONV_MAX_ENTRIES", 10_000)?,
        })
    }
}
