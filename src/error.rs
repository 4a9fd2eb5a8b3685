use hyper::{Body, Response, StatusCode, header};
use thiserror::Error;

/// Errors raised while loading configuration or proxying a request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to fetch configuration: {0}")]
    ConfigFetch(String),

    #[error("configuration source returned HTTP {0}")]
    ConfigStatus(StatusCode),

    #[error("malformed configuration: {0}")]
    ConfigParse(String),

    #[error("invalid origin url '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("unknown host: {host}")]
    UnknownHost { host: String, known: Vec<String> },

    #[error("origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("tls setup failed for '{0}'")]
    Tls(String),

    #[error(transparent)]
    Http(#[from] hyper::http::Error),
}

impl ProxyError {
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse(message.into())
    }

    /// Maps an error to the response the client receives for it.
    pub fn into_response(self) -> Response<Body> {
        let (status, body) = match &self {
            Self::UnknownHost { host, known } => (
                StatusCode::NOT_FOUND,
                format!("Unknown host: {host}\nKnown: {}", known.join(", ")),
            ),
            Self::OriginUnavailable(reason) => (
                StatusCode::BAD_GATEWAY,
                format!("Origin unavailable: {reason}"),
            ),
            Self::Tls(_) => (StatusCode::BAD_GATEWAY, "Origin error".to_string()),
            // Config failures never surface per request; anything else here
            // is a bug in response assembly.
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            ),
        };
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body))
            .unwrap_or_default()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
