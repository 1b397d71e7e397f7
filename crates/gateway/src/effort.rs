//! Reasoning effort analysis.
//!
//! A deterministic scoring function over the normalized input that picks
//! the reasoning budget for the upstream request. Content complexity,
//! dominant language, size and conversation history all contribute; a
//! client can bypass the whole analysis with the `X-Reasoning-Effort`
//! header.

use std::sync::LazyLock;

use config::ReasoningConfig;
use regex::Regex;

use crate::{
    messages::unified::{InputContent, InputItem, ReasoningEffort},
    tokens,
};

/// Header that bypasses effort analysis.
pub const EFFORT_OVERRIDE_HEADER: &str = "x-reasoning-effort";

/// Task-complexity indicators, matched case-insensitively.
const COMPLEXITY_INDICATORS: &[&str] = &[
    "prove",
    "optimize",
    "debug",
    "explain why",
    "compare",
    "step by step",
    "trade-off",
    "tradeoff",
    "root cause",
];

/// Vocabulary that biases the score by language or domain. Systems and
/// distributed-systems vocabulary push harder than scripting vocabulary.
const LANGUAGE_BIASES: &[(&str, &[&str], u32)] = &[
    ("rust", &["fn ", "impl ", "trait ", "borrow", "lifetime", "unsafe"], 15),
    ("systems", &["kernel", "syscall", "memory barrier", "page table", "interrupt"], 15),
    (
        "distributed",
        &["consensus", "raft", "paxos", "linearizab", "replication", "sharding"],
        15,
    ),
    ("c", &["#include", "malloc", "sizeof", "pointer arithmetic"], 12),
    ("sql", &["select ", "join ", "group by", "index scan"], 8),
    ("python", &["def ", "import ", "lambda ", "asyncio"], 8),
    ("javascript", &["function ", "const ", "=> ", "promise"], 3),
];

static NUMBERED_STEPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s").expect("valid regex"));

static TASK_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-*]\s*\[[ xX]?\]").expect("valid regex"));

/// Hints from the conversation history that bump the chosen effort.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffortHints {
    /// Errors recorded against this conversation.
    pub error_count: u32,
    /// Whether the previous turn was truncated by the token cap.
    pub previous_turn_truncated: bool,
}

/// Parse an explicit client override.
pub fn parse_override(value: &str) -> Option<ReasoningEffort> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        "none" => Some(ReasoningEffort::None),
        _ => None,
    }
}

/// Pick the effort bucket for a normalized request.
pub fn analyze(
    instructions: Option<&str>,
    input: &[InputItem],
    hints: EffortHints,
    config: &ReasoningConfig,
) -> ReasoningEffort {
    let score = complexity_score(instructions, input);

    let mut effort = if score < config.low_threshold {
        ReasoningEffort::Low
    } else if score < config.high_threshold {
        ReasoningEffort::Medium
    } else {
        ReasoningEffort::High
    };

    if hints.error_count > 0 || hints.previous_turn_truncated {
        effort = effort.bumped();
    }

    log::debug!(
        "reasoning effort {effort}: score={score} turns={} errors={}",
        input.len(),
        hints.error_count,
        effort = effort.as_str(),
    );

    effort
}

/// Deterministic complexity score on an integer scale.
fn complexity_score(instructions: Option<&str>, input: &[InputItem]) -> u32 {
    let last_user_text = last_user_text(input);
    let lowered = last_user_text.to_ascii_lowercase();

    let mut score = 0u32;

    for indicator in COMPLEXITY_INDICATORS {
        if lowered.contains(indicator) {
            score += 8;
        }
    }

    if NUMBERED_STEPS.find_iter(&last_user_text).count() >= 2 {
        score += 10;
    }

    if TASK_LIST.is_match(&last_user_text) {
        score += 8;
    }

    // Fenced code blocks come in pairs; nested or multiple blocks weigh more.
    let fence_count = last_user_text.matches("```").count() / 2;
    score += (fence_count as u32 * 6).min(18);

    score += language_bias(&lowered);

    let estimate = tokens::estimate_input(instructions, input);
    score += ((estimate / 200) as u32).min(25);

    score += ((input.len().saturating_sub(1)) as u32 * 2).min(10);

    score
}

fn language_bias(lowered: &str) -> u32 {
    let mut best = 0u32;

    for (_, keywords, bias) in LANGUAGE_BIASES {
        let matches = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if matches >= 2 {
            best = best.max(*bias);
        } else if matches == 1 {
            best = best.max(*bias / 2);
        }
    }

    best
}

/// Concatenated text of the last user message.
fn last_user_text(input: &[InputItem]) -> String {
    input
        .iter()
        .rev()
        .find_map(|item| match item {
            InputItem::Message { role, content } if role == "user" => {
                let text: Vec<&str> = content
                    .iter()
                    .filter_map(|part| match part {
                        InputContent::InputText { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                Some(text.join("\n"))
            }
            _ => None,
        })
        .unwrap_or_default()
}
