// Configuration module
//
// This module contains all configuration-related functionality split into focused submodules:
// - types: site schema, parsing, and the routing snapshot
// - loader: fetching the mapping over HTTP and the periodic reload task

pub mod loader;
pub mod types;

// Re-export main types for convenient access
pub use types::{DomainMap, SiteEntry, Target};
