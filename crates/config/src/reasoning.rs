//! Reasoning effort analysis configuration.

use anyhow::anyhow;

use crate::env::EnvSource;

/// Thresholds for the reasoning effort analyzer.
///
/// Complexity scores below `low_threshold` map to low effort, scores in
/// `[low_threshold, high_threshold)` to medium, and anything above to high.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Lower complexity threshold. `REASONING_LOW_THRESHOLD`, default 25.
    pub low_threshold: u32,
    /// Upper complexity threshold. `REASONING_HIGH_THRESHOLD`, default 60.
    pub high_threshold: u32,
    /// Whether reasoning tokens are folded into the client-visible output
    /// token totals. `REASONING_TOKENS_IN_OUTPUT`, default false.
    pub tokens_in_output: bool,
}

impl ReasoningConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        Ok(ReasoningConfig {
            low_threshold: env.parse("REASONING_LOW_THRESHOLD", 25)?,
            high_threshold: env.parse("REASONING_HIGH_THRESHOLD", 60)?,
            tokens_in_output: env.parse_bool("REASONING_TOKENS_IN_OUTPUT", false)?,
        })
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.low_threshold >= self.high_threshold {
            return Err(anyhow!(
                "REASONING_LOW_THRESHOLD must be below REASONING_HIGH_THRESHOLD"
            ));
        }

        Ok(())
    }
}
