//! HTTP server configuration settings.

use std::str::FromStr;

use anyhow::anyhow;
use secrecy::SecretString;

use crate::env::EnvSource;

/// Deployment environment the gateway runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local development; verbose logging defaults.
    Development,
    /// Production deployment.
    Production,
    /// Test harness runs.
    Test,
}

impl Environment {
    /// Short name as used in health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!(
                "unknown environment '{other}', expected development, production or test"
            )),
        }
    }
}

/// HTTP server configuration settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the server binds to. `PORT`, default 3000.
    pub port: u16,
    /// Deployment environment. `ENVIRONMENT` (or legacy `NODE_ENV`),
    /// default development.
    pub environment: Environment,
    /// Client API keys accepted by the gateway. `PROXY_API_KEY`, required;
    /// multiple keys may be supplied comma-separated.
    pub client_keys: Vec<SecretString>,
}

impl ServerConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        let environment = match env.get("ENVIRONMENT").or_else(|| env.get("NODE_ENV")) {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let client_keys = env
            .require("PROXY_API_KEY")?
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::from(key.to_string()))
            .collect::<Vec<_>>();

        if client_keys.is_empty() {
            return Err(anyhow!("PROXY_API_KEY must contain at least one key"));
        }

        Ok(ServerConfig {
            port: env.parse("PORT", 3000)?,
            environment,
            client_keys,
        })
    }
}
