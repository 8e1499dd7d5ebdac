//! Shared types, error model, and configuration for PaperScout.
//!
//! This crate is the foundation depended on by all other PaperScout crates.
//! It provides:
//! - [`PaperScoutError`] — the unified error type
//! - Domain types ([`Query`], [`DiscoveredItem`], [`AdapterStats`], request/response shapes)
//! - Configuration ([`AppConfig`], runtime option structs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AcquisitionConfig, AcquisitionOptions, ApiKeys, AppConfig, DefaultsConfig, GatewayOptions,
    HttpConfig, ProviderEndpoints, ProvidersConfig, QualityConfig, QualityThresholds,
    StorageConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_config,
};
pub use error::{PaperScoutError, Result};
pub use types::{
    AdapterStats, DedupKey, DiscoveredItem, DiscoveryRequest, DiscoveryResponse, EnricherId,
    EnricherStats, ItemMetadata, Links, ProviderId, ProviderStats, Query, RunId, Signals,
    looks_like_pdf_url, normalize_doi, normalize_title,
};
