use crate::config::types::Target;
use crate::error::{ProxyError, Result};
use hyper::service::Service;
use hyper::{Body, Client, Uri};
use hyper_tls::MaybeHttpsStream;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;

const KEEP_ALIVE_IDLE: Duration = Duration::from_secs(30);
const MAX_IDLE_CONNECTIONS: usize = 10;

/// Pooled outbound client for a single origin identity.
pub type OriginClient = Client<OriginConnector>;

/// Connector that dials the request URI's authority (the origin) but
/// presents the site's public certificate hostname as SNI. This reaches
/// origins behind a shared IP whose virtual host differs from the
/// connecting hostname; with `insecure_tls` set, certificate and hostname
/// verification are disabled for wildcard/self-signed setups.
#[derive(Clone)]
pub struct OriginConnector {
    sni_host: String,
    tls: TlsConnector,
}

impl OriginConnector {
    pub fn new(target: &Target) -> Result<Self> {
        let mut builder = native_tls::TlsConnector::builder();
        if target.insecure_tls {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        let tls = builder
            .build()
            .map_err(|_| ProxyError::Tls(target.host.clone()))?;
        Ok(Self {
            sni_host: target.host.clone(),
            tls: TlsConnector::from(tls),
        })
    }
}

impl Service<Uri> for OriginConnector {
    type Response = MaybeHttpsStream<TcpStream>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move {
            let host = dst
                .host()
                .ok_or_else(|| format!("origin url {dst} has no host"))?
                .to_string();
            let https = dst.scheme_str() == Some("https");
            let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });

            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;
            if https {
                // SNI is the site hostname, not the dialed origin host
                let tls = connector.tls.connect(&connector.sni_host, stream).await?;
                Ok(MaybeHttpsStream::Https(tls))
            } else {
                Ok(MaybeHttpsStream::Http(stream))
            }
        })
    }
}

/// One pooled client per distinct SNI hostname, created lazily on first
/// use and retained for the lifetime of the process. The table only ever
/// grows; with a config-bounded set of origins that is acceptable and
/// intentional.
pub struct AgentPool {
    agents: Mutex<HashMap<String, OriginClient>>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent_for(&self, target: &Target) -> Result<OriginClient> {
        let mut agents = self.agents.lock().unwrap();
        if let Some(client) = agents.get(&target.host) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .pool_idle_timeout(KEEP_ALIVE_IDLE)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build::<_, Body>(OriginConnector::new(target)?);
        agents.insert(target.host.clone(), client.clone());
        debug!(
            "Created agent for {} -> {} ({} agents total)",
            target.host,
            target.origin,
            agents.len()
        );
        Ok(client)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.agents.lock().unwrap().len()
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::new()
    }
}
