// Proxy module
//
// - agent: per-origin outbound clients with SNI override
// - assets: static/dynamic request classification
// - request_handler: admin endpoints and both proxy pipelines
// - rewrite: origin-masking response rewriting

pub mod agent;
pub mod assets;
pub mod request_handler;
pub mod rewrite;
