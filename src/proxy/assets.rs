/// How a request path is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Cacheable asset, served through the response cache.
    StaticAsset,
    /// Everything else, always forwarded live.
    Dynamic,
}

const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot", "map",
];

/// Classifies a request path by its trailing extension, case-insensitively.
/// The query string is not part of the path and never affects the class.
pub fn classify_path(path: &str) -> RequestClass {
    match path.rsplit_once('.') {
        Some((_, ext))
            if !ext.contains('/') && STATIC_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)) =>
        {
            RequestClass::StaticAsset
        }
        _ => RequestClass::Dynamic,
    }
}
