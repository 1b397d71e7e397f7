use std::time::Duration;

use reqwest::Client;

/// Shared upstream HTTP client.
///
/// No global request timeout here; deadlines are enforced per attempt by
/// the resilience kernel. The short pool idle timeout keeps DNS changes
/// visible without a connection TTL.
pub(super) fn http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .unwrap_or_default()
}
