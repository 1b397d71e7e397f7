//! Upstream backend configuration.

use anyhow::{Context, anyhow};
use secrecy::SecretString;
use url::Url;

use crate::env::EnvSource;

/// Upstream backend settings.
///
/// Azure OpenAI is the primary backend; Bedrock is an optional secondary
/// that is only constructed when `BEDROCK_MODEL` is set.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Azure OpenAI Responses API settings.
    pub azure: AzureConfig,
    /// Optional AWS Bedrock settings.
    pub bedrock: Option<BedrockConfig>,
}

/// Azure OpenAI Responses API settings.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Resource endpoint. `AZURE_OPENAI_ENDPOINT`, required.
    pub endpoint: Url,
    /// API key for the resource. `AZURE_OPENAI_API_KEY`, required.
    pub api_key: SecretString,
    /// Deployment/model identifier. `AZURE_OPENAI_MODEL`, required.
    pub model: String,
    /// API version query parameter. `AZURE_OPENAI_API_VERSION`,
    /// default `preview`.
    pub api_version: String,
}

/// AWS Bedrock settings for the secondary backend.
#[derive(Debug, Clone)]
pub struct BedrockConfig {
    /// Model or inference profile identifier. `BEDROCK_MODEL`.
    pub model: String,
    /// AWS region. `BEDROCK_REGION`, default `us-east-1`.
    pub region: String,
    /// Explicit access key id; falls back to the ambient credential chain.
    pub access_key_id: Option<SecretString>,
    /// Explicit secret access key; paired with `access_key_id`.
    pub secret_access_key: Option<SecretString>,
}

impl UpstreamConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        let endpoint = env.require("AZURE_OPENAI_ENDPOINT")?;
        let endpoint = Url::parse(&endpoint).context("invalid AZURE_OPENAI_ENDPOINT")?;

        let azure = AzureConfig {
            endpoint,
            api_key: SecretString::from(env.require("AZURE_OPENAI_API_KEY")?),
            model: env.require("AZURE_OPENAI_MODEL")?,
            api_version: env
                .get("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| "preview".to_string()),
        };

        let bedrock = env.get("BEDROCK_MODEL").map(|model| BedrockConfig {
            model,
            region: env.get("BEDROCK_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: env.get("AWS_ACCESS_KEY_ID").map(SecretString::from),
            secret_access_key: env.get("AWS_SECRET_ACCESS_KEY").map(SecretString::from),
        });

        Ok(UpstreamConfig { azure, bedrock })
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        let scheme = self.azure.endpoint.scheme();

        if scheme != "https" && scheme != "http" {
            return Err(anyhow!(
                "AZURE_OPENAI_ENDPOINT must use http or https, got '{scheme}'"
            ));
        }

        if self.azure.model.is_empty() {
            return Err(anyhow!("AZURE_OPENAI_MODEL must not be empty"));
        }

        if let Some(bedrock) = &self.bedrock
            && bedrock.access_key_id.is_some() != bedrock.secret_access_key.is_some()
        {
            return Err(anyhow!(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
            ));
        }

        Ok(())
    }
}
