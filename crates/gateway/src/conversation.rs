//! Conversation tracking.
//!
//! Threads the upstream's previous-response identifier across turns of the
//! same conversation. The tracker exclusively owns every context; callers
//! interact through the read/record operations, which take the entry-scoped
//! lock for the duration of the read or update and never across an
//! upstream call.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::http::HeaderMap;
use config::ConversationConfig;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::effort::EffortHints;

/// Header carrying an explicit conversation identifier.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

const FALLBACK_PREFIX_LEN: usize = 64;

/// Per-conversation state, owned by the tracker.
#[derive(Debug, Default)]
pub struct ConversationContext {
    /// Most recent upstream response id completed for this conversation.
    pub last_response_id: Option<String>,
    /// Cumulative input tokens across turns.
    pub total_input_tokens: u64,
    /// Cumulative output tokens across turns.
    pub total_output_tokens: u64,
    /// Exponential moving average of response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Errors recorded against this conversation.
    pub error_count: u32,
    /// Whether the last completed turn was truncated.
    pub last_truncated: bool,
    /// Last touch, drives TTL eviction.
    last_seen: Option<Instant>,
}

/// Snapshot taken before dispatch.
#[derive(Debug, Clone, Default)]
pub struct TurnStart {
    /// Previous response id to thread upstream.
    pub previous_response_id: Option<String>,
    /// Hints for the effort analyzer.
    pub hints: EffortHints,
}

/// Tracks conversation contexts with a bounded entry count and idle TTL.
pub struct ConversationTracker {
    contexts: DashMap<String, Arc<Mutex<ConversationContext>>>,
    ttl: Duration,
    max_entries: usize,
}

impl ConversationTracker {
    /// Build a tracker from configuration.
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            contexts: DashMap::new(),
            ttl: config.ttl,
            max_entries: config.max_entries as usize,
        }
    }

    /// Derive the conversation id for a request.
    ///
    /// Order: explicit header, explicit body field, hash of the client
    /// address and the first user message prefix.
    pub fn derive_id(headers: &HeaderMap, body: &Value, client_ip: &str) -> String {
        if let Some(id) = headers
            .get(CONVERSATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
        {
            return id.to_string();
        }

        if let Some(id) = body.get("conversation_id").and_then(Value::as_str)
            && !id.is_empty()
        {
            return id.to_string();
        }

        let prefix: String = first_user_text(body).chars().take(FALLBACK_PREFIX_LEN).collect();

        let mut hasher = Sha256::new();
        hasher.update(client_ip.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(prefix.as_bytes());

        let digest = hasher.finalize();
        let mut id = String::with_capacity(32);
        for byte in &digest[..16] {
            id.push_str(&format!("{byte:02x}"));
        }

        id
    }

    /// First read of a turn: the previous response id and effort hints.
    pub async fn begin_turn(&self, conversation_id: &str) -> TurnStart {
        let entry = self.entry(conversation_id);
        let mut context = entry.lock().await;

        context.last_seen = Some(Instant::now());

        TurnStart {
            previous_response_id: context.last_response_id.clone(),
            hints: EffortHints {
                error_count: context.error_count,
                previous_turn_truncated: context.last_truncated,
            },
        }
    }

    /// Record a completed turn.
    pub async fn record_success(
        &self,
        conversation_id: &str,
        response_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        elapsed: Duration,
        truncated: bool,
    ) {
        let entry = self.entry(conversation_id);
        let mut context = entry.lock().await;

        context.last_response_id = Some(response_id.to_string());
        context.total_input_tokens += input_tokens;
        context.total_output_tokens += output_tokens;
        context.last_truncated = truncated;
        context.last_seen = Some(Instant::now());

        let sample = elapsed.as_secs_f64() * 1000.0;
        context.avg_response_time_ms = if context.avg_response_time_ms == 0.0 {
            sample
        } else {
            0.2 * sample + 0.8 * context.avg_response_time_ms
        };
    }

    /// Record a failed turn.
    pub async fn record_failure(&self, conversation_id: &str) {
        let entry = self.entry(conversation_id);
        let mut context = entry.lock().await;

        context.error_count += 1;
        context.last_seen = Some(Instant::now());
    }

    /// Evict idle contexts and enforce the entry cap.
    ///
    /// Run periodically; eviction picks TTL expiry first, then the oldest
    /// entries beyond capacity.
    pub fn sweep(&self) {
        let now = Instant::now();

        self.contexts.retain(|_, context| {
            context
                .try_lock()
                .map(|ctx| ctx.last_seen.is_none_or(|seen| now.duration_since(seen) < self.ttl))
                .unwrap_or(true)
        });

        let excess = self.contexts.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(String, Instant)> = self
            .contexts
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .try_lock()
                    .ok()
                    .and_then(|ctx| ctx.last_seen.map(|seen| (entry.key().clone(), seen)))
            })
            .collect();

        by_age.sort_by_key(|(_, seen)| *seen);

        for (key, _) in by_age.into_iter().take(excess) {
            self.contexts.remove(&key);
        }

        log::debug!("conversation sweep evicted {excess} contexts over capacity");
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the tracker holds no contexts.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    fn entry(&self, conversation_id: &str) -> Arc<Mutex<ConversationContext>> {
        self.contexts
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationContext::default())))
            .clone()
    }
}

fn first_user_text(body: &Value) -> String {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return String::new();
    };

    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }

        match message.get("content") {
            Some(Value::String(text)) => return text.clone(),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text")
                        && let Some(text) = block.get("text").and_then(Value::as_str)
                    {
                        return text.to_string();
                    }
                }
            }
            _ => {}
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> ConversationTracker {
        ConversationTracker::new(&ConversationConfig {
            ttl: Duration::from_secs(60),
            max_entries: 10_000,
        })
    }

    #[test]
    fn header_wins_over_body_field() {
        let mut headers = HeaderMap::new();
        headers.insert(CONVERSATION_ID_HEADER, "conv-from-header".parse().unwrap());

        let body = json!({"conversation_id": "conv-from-body"});
        let id = ConversationTracker::derive_id(&headers, &body, "10.0.0.1");

        assert_eq!(id, "conv-from-header");
    }

    #[test]
    fn body_field_wins_over_hash() {
        let body = json!({
            "conversation_id": "conv-from-body",
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let id = ConversationTracker::derive_id(&HeaderMap::new(), &body, "10.0.0.1");

        assert_eq!(id, "conv-from-body");
    }

    #[test]
    fn hash_fallback_is_stable_per_client_and_prefix() {
        let body = json!({"messages": [{"role": "user", "content": "Hello world"}]});

        let a = ConversationTracker::derive_id(&HeaderMap::new(), &body, "10.0.0.1");
        let b = ConversationTracker::derive_id(&HeaderMap::new(), &body, "10.0.0.1");
        let other_client = ConversationTracker::derive_id(&HeaderMap::new(), &body, "10.0.0.2");

        assert_eq!(a, b);
        assert_ne!(a, other_client);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn previous_response_id_threads_across_turns() {
        let tracker = tracker();

        let start = tracker.begin_turn("conv-1").await;
        assert_eq!(start.previous_response_id, None);

        tracker
            .record_success("conv-1", "resp_a", 10, 5, Duration::from_millis(80), false)
            .await;

        let start = tracker.begin_turn("conv-1").await;
        assert_eq!(start.previous_response_id.as_deref(), Some("resp_a"));

        tracker
            .record_success("conv-1", "resp_b", 12, 6, Duration::from_millis(40), false)
            .await;

        let start = tracker.begin_turn("conv-1").await;
        assert_eq!(start.previous_response_id.as_deref(), Some("resp_b"));
    }

    #[tokio::test]
    async fn failures_raise_the_error_hint() {
        let tracker = tracker();

        tracker.record_failure("conv-1").await;
        let start = tracker.begin_turn("conv-1").await;

        assert_eq!(start.hints.error_count, 1);
    }

    #[tokio::test]
    async fn truncation_is_visible_to_the_next_turn() {
        let tracker = tracker();

        tracker
            .record_success("conv-1", "resp_a", 10, 5, Duration::from_millis(80), true)
            .await;

        let start = tracker.begin_turn("conv-1").await;
        assert!(start.hints.previous_turn_truncated);
    }

    #[tokio::test]
    async fn ttl_sweep_evicts_idle_contexts() {
        let tracker = ConversationTracker::new(&ConversationConfig {
            ttl: Duration::ZERO,
            max_entries: 10_000,
        });

        tracker.begin_turn("conv-1").await;
        assert_eq!(tracker.len(), 1);

        tracker.sweep();
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn capacity_sweep_evicts_oldest_first() {
        let tracker = ConversationTracker::new(&ConversationConfig {
            ttl: Duration::from_secs(600),
            max_entries: 2,
        });

        tracker.begin_turn("conv-oldest").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.begin_turn("conv-middle").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.begin_turn("conv-newest").await;
        assert_eq!(tracker.len(), 3);

        tracker.sweep();

        assert_eq!(tracker.len(), 2);
        let survivors: Vec<String> = tracker.contexts.iter().map(|e| e.key().clone()).collect();
        assert!(!survivors.contains(&"conv-oldest".to_string()));
    }

    #[tokio::test]
    async fn concurrent_turns_do_not_corrupt_the_map() {
        let tracker = Arc::new(tracker());
        let mut handles = Vec::new();

        for i in 0..32 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("conv-{}", i % 4);
                tracker.begin_turn(&id).await;
                tracker
                    .record_success(&id, "resp", 1, 1, Duration::from_millis(1), false)
                    .await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.len(), 4);
    }
}
