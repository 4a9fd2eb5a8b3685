use crate::config::types::{DomainMap, build_domain_map, parse_sites};
use crate::error::{ProxyError, Result};
use crate::service::{ProxyService, SharedClient};
use hyper::{Uri, header};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fetches the domain mapping from the configuration source and builds a
/// fresh snapshot. Any failure leaves the caller's current snapshot alone.
pub async fn load_domain_map(client: &SharedClient, url: &str) -> Result<DomainMap> {
    debug!("Loading config from {url}");
    let uri: Uri = url
        .parse()
        .map_err(|e| ProxyError::ConfigFetch(format!("invalid config url: {e}")))?;
    let response = client
        .get(uri)
        .await
        .map_err(|e| ProxyError::ConfigFetch(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ProxyError::ConfigStatus(response.status()));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| ProxyError::ConfigFetch(e.to_string()))?;
    let body = String::from_utf8_lossy(&body);

    let sites = parse_sites(&content_type, &body)?;
    build_domain_map(sites)
}

/// Reloads the mapping on a fixed interval until the returned handle is
/// aborted. Failures are logged by the reload itself and never stop the
/// loop.
pub fn spawn_periodic_reload(service: Arc<ProxyService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            interval.tick().await;
            service.reload_config().await;
        }
    })
}
