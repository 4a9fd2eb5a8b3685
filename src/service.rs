use crate::cache::ResponseCache;
use crate::command_line_arguments::MaskpxArguments;
use crate::config::loader::load_domain_map;
use crate::config::types::{DomainMap, Target};
use crate::proxy::agent::AgentPool;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Uri};
use hyper_tls::HttpsConnector;
use log::{error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Plain TLS-verifying client used for config fetches and keep-warm pings.
pub type SharedClient = Client<HttpsConnector<HttpConnector>>;

pub const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const KEEP_WARM_INTERVAL: Duration = Duration::from_secs(14 * 60);
const CACHE_MAX_ENTRIES: usize = 500;
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Process-scoped proxy state: the current routing snapshot, the static
/// cache, and the per-origin agent table. One instance is built at startup
/// and shared (Arc) by every request task and background task.
pub struct ProxyService {
    settings: MaskpxArguments,
    mapping: RwLock<Arc<DomainMap>>,
    config_loaded: AtomicBool,
    pub cache: ResponseCache,
    pub agents: AgentPool,
    http: SharedClient,
}

impl ProxyService {
    pub fn new(settings: MaskpxArguments) -> Self {
        Self {
            settings,
            mapping: RwLock::new(Arc::new(DomainMap::default())),
            config_loaded: AtomicBool::new(false),
            cache: ResponseCache::new(CACHE_MAX_ENTRIES, CACHE_TTL),
            agents: AgentPool::new(),
            http: Client::builder().build::<_, Body>(HttpsConnector::new()),
        }
    }

    pub fn settings(&self) -> &MaskpxArguments {
        &self.settings
    }

    pub fn config_loaded(&self) -> bool {
        self.config_loaded.load(Ordering::Relaxed)
    }

    /// Resolves a normalized inbound hostname against the current snapshot.
    pub fn resolve(&self, hostname: &str) -> Option<Arc<Target>> {
        self.mapping.read().unwrap().resolve(hostname)
    }

    /// All currently configured public domains, sorted.
    pub fn known_domains(&self) -> Vec<String> {
        self.mapping.read().unwrap().domains()
    }

    /// Fetches and applies a new snapshot. On failure the previous snapshot
    /// is retained unchanged and the process carries on.
    pub async fn reload_config(&self) {
        match load_domain_map(&self.http, &self.settings.config_url).await {
            Ok(mapping) => {
                if mapping.is_empty() {
                    warn!("Configuration loaded but contains no domains");
                }
                info!("Loaded {} domains", mapping.len());
                trace!("Domain mapping: {:#?}", mapping);
                self.install_mapping(mapping);
            }
            Err(e) => error!("Config error: {e}"),
        }
    }

    /// Atomically swaps in a new snapshot and marks configuration loaded.
    pub fn install_mapping(&self, mapping: DomainMap) {
        *self.mapping.write().unwrap() = Arc::new(mapping);
        self.config_loaded.store(true, Ordering::Relaxed);
    }

    /// GETs our own health endpoint so the hosting platform keeps the
    /// instance awake. Failures are deliberately ignored.
    pub async fn keep_warm_ping(&self) {
        let Some(base) = self.settings.self_url.as_deref() else {
            return;
        };
        let url = format!("{}/health", base.trim_end_matches('/'));
        match url.parse::<Uri>() {
            Ok(uri) => {
                if let Err(e) = self.http.get(uri).await {
                    trace!("Keep-warm ping failed: {e}");
                }
            }
            Err(e) => warn!("Invalid self url {url}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{build_domain_map, parse_sites};

    fn test_service(config_url: &str) -> ProxyService {
        ProxyService::new(MaskpxArguments {
            config_url: config_url.to_string(),
            port: 3000,
            admin_token: None,
            self_url: None,
            verbose: false,
        })
    }

    fn mapping_of(text: &str) -> DomainMap {
        build_domain_map(parse_sites("text/plain", text).unwrap()).unwrap()
    }

    #[test]
    fn test_starts_unloaded_and_empty() {
        let service = test_service("http://config.example.net/sites.txt");
        assert!(!service.config_loaded());
        assert!(service.known_domains().is_empty());
        assert!(service.resolve("blog.com").is_none());
    }

    #[test]
    fn test_install_mapping_swaps_wholesale() {
        let service = test_service("http://config.example.net/sites.txt");
        service.install_mapping(mapping_of("blog.com|https://wp1.example.net"));
        assert!(service.config_loaded());
        assert!(service.resolve("blog.com").is_some());

        service.install_mapping(mapping_of("shop.com|https://wp2.example.net"));
        assert!(service.resolve("blog.com").is_none());
        assert_eq!(service.known_domains(), vec!["shop.com"]);
    }

    #[tokio::test]
    async fn test_failed_reload_retains_previous_mapping() {
        // Nothing listens on the discard port, so the fetch fails fast.
        let service = test_service("http://127.0.0.1:9/sites.txt");
        service.install_mapping(mapping_of("blog.com|https://wp1.example.net"));

        service.reload_config().await;

        assert!(service.config_loaded());
        assert_eq!(service.known_domains(), vec!["blog.com"]);
        let target = service.resolve("blog.com").unwrap();
        assert_eq!(target.origin, "https://wp1.example.net");
    }
}
