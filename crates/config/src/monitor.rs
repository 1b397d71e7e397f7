//! Monitoring and audit configuration.

use std::time::Duration;

use crate::env::EnvSource;

/// Settings for request metrics and security auditing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between periodic summary log lines.
    /// `METRICS_REPORT_MS`, default 60 000.
    pub report_interval: Duration,
}

impl MonitorConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        Ok(MonitorConfig {
            report_interval: env.parse_millis("METRICS_REPORT_MS", 60_000)?,
        })
    }
}
