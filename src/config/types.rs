use crate::error::{ProxyError, Result};
use hyper::Uri;
use log::warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One site as it appears in the configuration source.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    pub origin: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    // Opt-in escape hatch for origins behind a shared IP whose certificate
    // does not match the site hostname. Disables certificate and hostname
    // verification for this origin only.
    #[serde(default)]
    pub insecure_tls: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigDocument {
    Wrapped { sites: Vec<SiteEntry> },
    Flat(Vec<SiteEntry>),
}

/// Where requests for one public hostname go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Origin absolute URL, without trailing slash. Outbound URLs are this
    /// plus the original path and query; rewriting replaces this string.
    pub origin: String,
    /// Hostname presented as SNI and Host header towards the origin.
    pub host: String,
    pub insecure_tls: bool,
}

/// Immutable snapshot mapping public hostnames to their targets. Replaced
/// wholesale on reload, never mutated in place.
#[derive(Debug, Default)]
pub struct DomainMap {
    entries: HashMap<String, Arc<Target>>,
}

impl DomainMap {
    pub fn resolve(&self, hostname: &str) -> Option<Arc<Target>> {
        self.entries.get(hostname).cloned()
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.entries.keys().cloned().collect();
        domains.sort();
        domains
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses the raw configuration body. A JSON content type selects the JSON
/// schema (an array of sites, or an object with a `sites` field); anything
/// else is treated as pipe-delimited text.
pub fn parse_sites(content_type: &str, body: &str) -> Result<Vec<SiteEntry>> {
    if content_type.to_ascii_lowercase().contains("json") {
        let document: ConfigDocument =
            serde_json::from_str(body).map_err(|e| ProxyError::config_parse(e.to_string()))?;
        Ok(match document {
            ConfigDocument::Wrapped { sites } => sites,
            ConfigDocument::Flat(sites) => sites,
        })
    } else {
        Ok(parse_text_config(body))
    }
}

/// Parses `domain|origin|host[|insecure]` lines. Blank lines and lines
/// starting with `#` are ignored; `host` defaults to the line's own domain;
/// lines sharing origin and host accumulate into one site.
fn parse_text_config(text: &str) -> Vec<SiteEntry> {
    let mut sites: Vec<SiteEntry> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split('|').map(str::trim);
        let (Some(domain), Some(origin)) = (parts.next(), parts.next()) else {
            continue;
        };
        if domain.is_empty() || origin.is_empty() {
            continue;
        }
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .unwrap_or(domain)
            .to_string();
        let insecure_tls = parts
            .next()
            .is_some_and(|flag| flag == "1" || flag.eq_ignore_ascii_case("true"));

        match sites
            .iter_mut()
            .find(|site| site.origin == origin && site.host.as_deref() == Some(host.as_str()))
        {
            Some(site) => site.domains.push(domain.to_string()),
            None => sites.push(SiteEntry {
                origin: origin.to_string(),
                host: Some(host),
                domains: vec![domain.to_string()],
                insecure_tls,
            }),
        }
    }
    sites
}

/// Builds the routing snapshot from parsed sites. A malformed origin fails
/// the whole load so a bad push never half-applies.
pub fn build_domain_map(sites: Vec<SiteEntry>) -> Result<DomainMap> {
    let mut entries = HashMap::new();
    for site in sites {
        if site.domains.is_empty() {
            warn!("Site with origin {} has no domains, skipping", site.origin);
            continue;
        }
        let origin = site.origin.trim_end_matches('/').to_string();
        validate_origin(&origin)?;
        let host = site
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| site.domains[0].clone());

        let target = Arc::new(Target {
            origin,
            host,
            insecure_tls: site.insecure_tls,
        });
        for domain in &site.domains {
            entries.insert(domain.to_ascii_lowercase(), target.clone());
        }
    }
    Ok(DomainMap { entries })
}

fn validate_origin(origin: &str) -> Result<()> {
    let invalid = |reason: &str| ProxyError::InvalidOrigin {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = origin.parse().map_err(|_| invalid("not a valid url"))?;
    if !matches!(uri.scheme_str(), Some("http") | Some("https")) {
        return Err(invalid("scheme must be http or https"));
    }
    if uri.host().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(map: &DomainMap, domain: &str) -> Arc<Target> {
        map.resolve(domain).expect(domain)
    }

    #[test]
    fn test_parse_json_array() {
        let body = r#"[{"origin": "https://wp1.example.net/", "host": "blog.example.net",
                        "domains": ["blog.com", "www.blog.com"]}]"#;
        let map = build_domain_map(parse_sites("application/json", body).unwrap()).unwrap();

        assert_eq!(map.len(), 2);
        let target = resolve(&map, "blog.com");
        assert_eq!(target.origin, "https://wp1.example.net");
        assert_eq!(target.host, "blog.example.net");
        assert!(!target.insecure_tls);
        // both domains share one target
        assert_eq!(resolve(&map, "www.blog.com"), target);
    }

    #[test]
    fn test_parse_json_sites_object() {
        let body = r#"{"sites": [{"origin": "http://10.0.0.5:8080",
                                  "domains": ["shop.com"], "insecure_tls": true}]}"#;
        let map = build_domain_map(parse_sites("application/json; charset=utf-8", body).unwrap())
            .unwrap();

        let target = resolve(&map, "shop.com");
        // host falls back to the first domain
        assert_eq!(target.host, "shop.com");
        assert_eq!(target.origin, "http://10.0.0.5:8080");
        assert!(target.insecure_tls);
    }

    #[test]
    fn test_parse_text_config_grouping_and_defaults() {
        let body = "\n# comment\nblog.com|https://wp1.example.net|blog.example.net\n\
                    www.blog.com|https://wp1.example.net|blog.example.net\n\
                    shop.com|https://wp2.example.net\n   \n";
        let sites = parse_sites("text/plain", body).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].domains, vec!["blog.com", "www.blog.com"]);
        assert_eq!(sites[1].host.as_deref(), Some("shop.com"));

        let map = build_domain_map(sites).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(resolve(&map, "shop.com").host, "shop.com");
    }

    #[test]
    fn test_parse_text_config_insecure_column() {
        let body = "legacy.com|https://203.0.113.7|legacy.example.net|true";
        let map = build_domain_map(parse_sites("text/plain", body).unwrap()).unwrap();
        assert!(resolve(&map, "legacy.com").insecure_tls);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse_sites("application/json", "{not json").is_err());
    }

    #[test]
    fn test_invalid_origin_fails_the_load() {
        let sites = vec![SiteEntry {
            origin: "ftp://wrong.example.net".to_string(),
            host: None,
            domains: vec!["a.com".to_string()],
            insecure_tls: false,
        }];
        assert!(matches!(
            build_domain_map(sites),
            Err(ProxyError::InvalidOrigin { .. })
        ));
    }

    #[test]
    fn test_domains_are_lowercased_and_listed_sorted() {
        let body = "B.com|https://wp.example.net\na.com|https://wp.example.net";
        let map = build_domain_map(parse_sites("text/plain", body).unwrap()).unwrap();
        assert!(map.resolve("b.com").is_some());
        assert_eq!(map.domains(), vec!["a.com", "b.com"]);
    }
}
