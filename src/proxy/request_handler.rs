use crate::config::types::Target;
use crate::error::{ProxyError, Result};
use crate::proxy::assets::{RequestClass, classify_path};
use crate::proxy::rewrite::{rewrite_origin_refs, rewrite_set_cookie};
use crate::service::ProxyService;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode, header};
use log::{debug, error, info, warn};
use std::net::IpAddr;
use std::sync::Arc;

const DEFAULT_USER_AGENT: &str = "maskpx/1.0";
const STATIC_CACHE_CONTROL: &str = "public, max-age=86400";
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Entry point for every inbound request. Errors become the client-facing
/// responses defined by the error taxonomy.
pub async fn handle_request(
    service: Arc<ProxyService>,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Response<Body> {
    match route_request(service, client_ip, req).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                ProxyError::UnknownHost { host, .. } => {
                    warn!("Received request from {client_ip} for unknown host {host}")
                }
                // already logged with host context at the failure site
                ProxyError::OriginUnavailable(_) => {}
                other => error!("Request failed: {other}"),
            }
            e.into_response()
        }
    }
}

async fn route_request(
    service: Arc<ProxyService>,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Result<Response<Body>> {
    if req.method() == Method::GET {
        match req.uri().path() {
            "/health" => return health_response(&service),
            "/reload" => return reload_response(&service, req.uri().query()).await,
            _ => {}
        }
    }

    let Some(domain) = extract_host(&req) else {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("Missing Host header"))?);
    };
    let Some(target) = service.resolve(&domain) else {
        return Err(ProxyError::UnknownHost {
            host: domain,
            known: service.known_domains(),
        });
    };

    info!(
        "{method} {domain}{path} -> {origin}{path}",
        method = req.method(),
        path = req.uri().path(),
        origin = target.origin
    );

    if req.method() == Method::GET && classify_path(req.uri().path()) == RequestClass::StaticAsset {
        serve_static(&service, &target, &domain, req).await
    } else {
        serve_dynamic(&service, &target, &domain, client_ip, req).await
    }
}

/// Extract the host from the request URI or Host header, normalized to
/// lowercase with any port stripped.
pub fn extract_host(req: &Request<Body>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.host().to_ascii_lowercase());
    }

    #[allow(clippy::collapsible_if)]
    if let Some(hv) = req.headers().get(header::HOST) {
        if let Ok(host) = hv.to_str() {
            let host_only = host.split(':').next().unwrap_or(host);
            return Some(host_only.to_ascii_lowercase());
        }
    }
    req.uri().host().map(|h| h.to_ascii_lowercase())
}

/// Static pipeline: cache first, otherwise fetch through the origin agent
/// and remember the body. Non-success origin responses pass through
/// untouched and are never cached.
async fn serve_static(
    service: &ProxyService,
    target: &Target,
    domain: &str,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let request_target = path_and_query(&req);
    let cache_key = format!("{domain}{request_target}");

    if let Some(asset) = service.cache.get(&cache_key) {
        debug!("Cache hit for {cache_key}");
        return static_response(&asset.content_type, "HIT", Body::from(asset.body));
    }

    let outbound = Request::builder()
        .method(Method::GET)
        .uri(format!("{}{}", target.origin, request_target))
        .header(header::HOST, target.host.as_str())
        .header(header::ACCEPT_ENCODING, "identity")
        .header(
            header::USER_AGENT,
            req.headers()
                .get(header::USER_AGENT)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_USER_AGENT)),
        )
        .body(Body::empty())?;

    let client = service.agents.agent_for(target)?;
    let response = client
        .request(outbound)
        .await
        .map_err(|e| origin_unavailable(domain, e))?;

    if !response.status().is_success() {
        return Ok(response);
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| origin_unavailable(domain, e))?;

    service.cache.put(&cache_key, body.clone(), &content_type);
    debug!("Cached {cache_key} ({} bytes)", body.len());
    static_response(&content_type, "MISS", Body::from(body))
}

/// Dynamic pipeline: forward live with the restricted header subset, then
/// rewrite the response so the origin identity never reaches the client.
async fn serve_dynamic(
    service: &ProxyService,
    target: &Target,
    domain: &str,
    client_ip: IpAddr,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let method = req.method().clone();
    let request_target = path_and_query(&req);
    let headers = forwarded_headers(req.headers(), target, client_ip);

    let body = if method == Method::GET || method == Method::HEAD {
        Body::empty()
    } else {
        // Whole inbound body is buffered before forwarding; very large
        // uploads pay the memory cost.
        let bytes = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|e| ProxyError::OriginUnavailable(e.to_string()))?;
        Body::from(bytes)
    };

    let mut outbound = Request::builder()
        .method(method)
        .uri(format!("{}{}", target.origin, request_target))
        .body(body)?;
    *outbound.headers_mut() = headers;

    let client = service.agents.agent_for(target)?;
    let response = client
        .request(outbound)
        .await
        .map_err(|e| origin_unavailable(domain, e))?;

    rewrite_response(target, domain, response).await
}

/// The restricted subset forwarded to the origin. Everything the client
/// sent beyond this is dropped.
fn forwarded_headers(inbound: &HeaderMap, target: &Target, client_ip: IpAddr) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(host) = HeaderValue::from_str(&target.host) {
        headers.insert(header::HOST, host);
    }
    // uncompressed bodies so rewriting sees raw bytes
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if let Ok(ip) = HeaderValue::from_str(&client_ip.to_string()) {
        headers.insert("x-real-ip", ip.clone());
        headers.insert("x-forwarded-for", ip);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    headers.insert("x-forwarded-port", HeaderValue::from_static("443"));
    if let Some(ua) = inbound.get(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, ua.clone());
    }
    headers.insert(
        header::ACCEPT,
        inbound
            .get(header::ACCEPT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*/*")),
    );
    if let Some(language) = inbound.get(header::ACCEPT_LANGUAGE) {
        headers.insert(header::ACCEPT_LANGUAGE, language.clone());
    }
    if let Some(cookie) = inbound.get(header::COOKIE) {
        headers.insert(header::COOKIE, cookie.clone());
    }
    if let Some(content_type) = inbound.get(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    headers
}

/// Rewrites redirect targets, cookies and HTML bodies; all other bodies
/// stream through unmodified. The client sees status, content type and
/// rewritten cookies only.
async fn rewrite_response(
    target: &Target,
    domain: &str,
    response: Response<Body>,
) -> Result<Response<Body>> {
    let status = response.status();

    if REDIRECT_STATUSES.contains(&status.as_u16()) {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let rewritten = rewrite_origin_refs(location, &target.origin, &target.host, domain);
        debug!("Rewrote redirect {location} -> {rewritten}");
        return Ok(Response::builder()
            .status(status)
            .header(header::LOCATION, rewritten)
            .body(Body::empty())?);
    }

    let (parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.as_str());
    for cookie in parts.headers.get_all(header::SET_COOKIE) {
        builder = match cookie.to_str() {
            Ok(value) => builder.header(header::SET_COOKIE, rewrite_set_cookie(value)),
            // opaque bytes: forward unmodified rather than drop the cookie
            Err(_) => builder.header(header::SET_COOKIE, cookie.clone()),
        };
    }

    if content_type.to_ascii_lowercase().contains("text/html") {
        let bytes = hyper::body::to_bytes(body)
            .await
            .map_err(|e| origin_unavailable(domain, e))?;
        let html = String::from_utf8_lossy(&bytes);
        let rewritten = rewrite_origin_refs(&html, &target.origin, &target.host, domain);
        Ok(builder.body(Body::from(rewritten))?)
    } else {
        Ok(builder.body(body)?)
    }
}

fn health_response(service: &ProxyService) -> Result<Response<Body>> {
    json_response(serde_json::json!({
        "status": "ok",
        "configLoaded": service.config_loaded(),
        "sites": service.known_domains(),
        "cacheSize": service.cache.len(),
    }))
}

async fn reload_response(service: &ProxyService, query: Option<&str>) -> Result<Response<Body>> {
    let token = query.and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("token=")));
    if !reload_authorized(service.settings().admin_token.as_deref(), token) {
        warn!("Rejected /reload with bad or missing token");
        return Ok(Response::builder()
            .status(StatusCode::FORBIDDEN)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("Forbidden"))?);
    }

    service.reload_config().await;
    json_response(serde_json::json!({
        "status": "reloaded",
        "sites": service.known_domains(),
    }))
}

/// A reload is only ever authorized by a configured, matching token.
fn reload_authorized(expected: Option<&str>, given: Option<&str>) -> bool {
    match (expected, given) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    }
}

fn static_response(content_type: &str, cache_status: &str, body: Body) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header("x-cache", cache_status)
        .header(header::CACHE_CONTROL, STATIC_CACHE_CONTROL)
        .body(body)?)
}

fn json_response(value: serde_json::Value) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))?)
}

fn path_and_query(req: &Request<Body>) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string()
}

fn origin_unavailable(domain: &str, e: hyper::Error) -> ProxyError {
    error!("[{domain}] Origin fetch failed: {e}");
    ProxyError::OriginUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_target() -> Target {
        Target {
            origin: "https://wp1.example.net".to_string(),
            host: "blog.example.net".to_string(),
            insecure_tls: false,
        }
    }

    #[test]
    fn test_extract_host_from_uri_authority() {
        let req = Request::builder()
            .uri("http://example.com/path")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_host(&req), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_host_from_header() {
        let req = Request::builder()
            .uri("/path")
            .header("Host", "api.example.com")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_host(&req), Some("api.example.com".to_string()));
    }

    #[test]
    fn test_extract_host_strips_port_and_lowercases() {
        let req = Request::builder()
            .uri("/path")
            .header("Host", "API.Example.com:8080")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_host(&req), Some("api.example.com".to_string()));
    }

    #[test]
    fn test_extract_host_none() {
        let req = Request::builder().uri("/path").body(Body::empty()).unwrap();
        assert_eq!(extract_host(&req), None);
    }

    #[test]
    fn test_forwarded_headers_subset() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::USER_AGENT, HeaderValue::from_static("test-agent"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("session=abc"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        inbound.insert(header::REFERER, HeaderValue::from_static("https://elsewhere"));

        let headers = forwarded_headers(&inbound, &test_target(), "203.0.113.9".parse().unwrap());

        assert_eq!(headers.get(header::HOST).unwrap(), "blog.example.net");
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "identity");
        assert_eq!(headers.get("x-real-ip").unwrap(), "203.0.113.9");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.9");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(headers.get("x-forwarded-port").unwrap(), "443");
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "test-agent");
        assert_eq!(headers.get(header::COOKIE).unwrap(), "session=abc");
        // default when the client sent none
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "*/*");
        // anything outside the subset is dropped
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get(header::REFERER).is_none());
    }

    #[test]
    fn test_forwarded_headers_optional_fields_omitted() {
        let headers =
            forwarded_headers(&HeaderMap::new(), &test_target(), "203.0.113.9".parse().unwrap());
        assert!(headers.get(header::COOKIE).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_none());
        assert!(headers.get(header::ACCEPT_LANGUAGE).is_none());
        assert!(headers.get(header::USER_AGENT).is_none());
    }

    #[tokio::test]
    async fn test_redirect_location_is_rewritten_and_status_kept() {
        let response = Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, "https://wp1.example.net/assets/x")
            .body(Body::empty())
            .unwrap();

        let out = rewrite_response(&test_target(), "blog.com", response)
            .await
            .unwrap();

        assert_eq!(out.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            out.headers().get(header::LOCATION).unwrap(),
            "https://blog.com/assets/x"
        );
    }

    #[tokio::test]
    async fn test_html_body_and_cookies_are_rewritten() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::SET_COOKIE, "id=42; Domain=wp1.example.net; Secure; Path=/")
            .header(header::SET_COOKIE, "theme=dark; Path=/; HttpOnly")
            .body(Body::from(
                r#"<a href="https://wp1.example.net/p">x</a><img src="//blog.example.net/l.png">"#,
            ))
            .unwrap();

        let out = rewrite_response(&test_target(), "blog.com", response)
            .await
            .unwrap();

        let cookies: Vec<_> = out
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, ["id=42; Path=/", "theme=dark; Path=/; HttpOnly"]);

        let body = hyper::body::to_bytes(out.into_body()).await.unwrap();
        assert_eq!(
            &body[..],
            br#"<a href="https://blog.com/p">x</a><img src="//blog.com/l.png">"#
        );
    }

    #[tokio::test]
    async fn test_binary_body_passes_through_untouched() {
        let payload: &[u8] = b"\x89PNG\r\n not text: https://wp1.example.net";
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(payload))
            .unwrap();

        let out = rewrite_response(&test_target(), "blog.com", response)
            .await
            .unwrap();

        assert_eq!(out.status(), StatusCode::OK);
        assert_eq!(out.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        let body = hyper::body::to_bytes(out.into_body()).await.unwrap();
        assert_eq!(&body[..], payload);
    }

    #[test]
    fn test_reload_authorization() {
        assert!(reload_authorized(Some("s3cret"), Some("s3cret")));
        assert!(!reload_authorized(Some("s3cret"), Some("wrong")));
        assert!(!reload_authorized(Some("s3cret"), None));
        // no configured token means no reloads, full stop
        assert!(!reload_authorized(None, None));
        assert!(!reload_authorized(None, Some("s3cret")));
    }
}
