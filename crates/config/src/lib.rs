//! Switchboard configuration structures, populated from the process environment.

#![deny(missing_docs)]

mod conversation;
mod env;
mod monitor;
mod reasoning;
mod resilience;
mod server;
mod upstream;

pub use conversation::ConversationConfig;
pub use monitor::MonitorConfig;
pub use reasoning::ReasoningConfig;
pub use resilience::{BreakerConfig, ResilienceConfig, RetryConfig};
pub use server::{Environment, ServerConfig};
pub use upstream::{AzureConfig, BedrockConfig, UpstreamConfig};

use env::EnvSource;

/// Main configuration structure for the switchboard gateway.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Upstream backend settings.
    pub upstream: UpstreamConfig,
    /// Retry and circuit breaker settings.
    pub resilience: ResilienceConfig,
    /// Conversation tracking settings.
    pub conversations: ConversationConfig,
    /// Reasoning effort analysis settings.
    pub reasoning: ReasoningConfig,
    /// Monitoring and audit settings.
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Fails when a required variable is missing or any variable fails to
    /// parse. The caller is expected to treat a failure here as an
    /// initialization error (exit code 1).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(&EnvSource::process())
    }

    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        let config = Config {
            server: ServerConfig::load(env)?,
            upstream: UpstreamConfig::load(env)?,
            resilience: ResilienceConfig::load(env)?,
            conversations: ConversationConfig::load(env)?,
            reasoning: ReasoningConfig::load(env)?,
            monitor: MonitorConfig::load(env)?,
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.upstream.validate()?;
        self.resilience.validate()?;
        self.reasoning.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvSource;

    fn minimal_env() -> EnvSource {
        EnvSource::fixed([
            ("PROXY_API_KEY", "kJ8mN2pQ9rS4tU7vW1xY3zA6bC0dE5fG"),
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ"),
            ("AZURE_OPENAI_MODEL", "gpt-5"),
        ])
    }

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let config = Config::load(&minimal_env()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.resilience.retry.max_attempts, 3);
        assert_eq!(config.resilience.breaker.failure_threshold, 5);
        assert_eq!(config.resilience.breaker.cooldown.as_millis(), 30_000);
        assert_eq!(config.resilience.request_deadline.as_millis(), 120_000);
        assert_eq!(config.conversations.ttl.as_millis(), 1_800_000);
        assert_eq!(config.conversations.max_entries, 10_000);
        assert_eq!(config.monitor.report_interval.as_millis(), 60_000);
        assert_eq!(config.reasoning.low_threshold, 25);
        assert_eq!(config.reasoning.high_threshold, 60);
    }

    #[test]
    fn missing_client_key_is_an_error() {
        let env = EnvSource::fixed([
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ"),
            ("AZURE_OPENAI_MODEL", "gpt-5"),
        ]);

        let error = Config::load(&env).unwrap_err();
        assert!(error.to_string().contains("PROXY_API_KEY"));
    }

    #[test]
    fn invalid_endpoint_scheme_is_rejected() {
        let env = EnvSource::fixed([
            ("PROXY_API_KEY", "kJ8mN2pQ9rS4tU7vW1xY3zA6bC0dE5fG"),
            ("AZURE_OPENAI_ENDPOINT", "ftp://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ"),
            ("AZURE_OPENAI_MODEL", "gpt-5"),
        ]);

        let error = Config::load(&env).unwrap_err();
        assert!(error.to_string().contains("AZURE_OPENAI_ENDPOINT"));
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let mut env = minimal_env();
        env.set("PORT", "8080");
        env.set("RETRY_MAX_ATTEMPTS", "5");
        env.set("BREAKER_FAILURE_THRESHOLD", "2");
        env.set("CONV_MAX_ENTRIES", "100");

        let config = Config::load(&env).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.resilience.retry.max_attempts, 5);
        assert_eq!(config.resilience.breaker.failure_threshold, 2);
        assert_eq!(config.conversations.max_entries, 100);
    }

    #[test]
    fn garbage_numeric_value_is_an_error() {
        let mut env = minimal_env();
        env.set("PORT", "not-a-port");

        let error = Config::load(&env).unwrap_err();
        assert!(error.to_string().contains("PORT"));
    }
}
