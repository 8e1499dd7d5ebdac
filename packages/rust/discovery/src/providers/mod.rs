//! Provider adapter trait and the four built-in catalog adapters.
//!
//! Each adapter turns a [`Query`] into one provider request and the
//! provider's payload into [`DiscoveredItem`]s. Adapters never fail: every
//! problem ends up in the returned [`ProviderStats`].

mod arxiv;
mod core_ac;
mod europepmc;
mod openalex;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use paperscout_http::HttpGateway;
use paperscout_shared::{
    ApiKeys, DiscoveredItem, ProviderEndpoints, ProviderId, ProviderStats, Query, Result,
};

pub use arxiv::ArxivAdapter;
pub use core_ac::CoreAdapter;
pub use europepmc::EuropePmcAdapter;
pub use openalex::OpenAlexAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A catalog that can be searched for candidate works.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Search the catalog. Always returns stats, even on total failure.
    async fn discover(&self, query: &Query) -> (Vec<DiscoveredItem>, ProviderStats);
}

/// Everything an adapter needs to reach its service.
#[derive(Clone)]
pub struct ProviderContext {
    pub gateway: HttpGateway,
    pub endpoints: ProviderEndpoints,
    pub keys: ApiKeys,
}

/// Build adapters for `ids`, preserving their order (which is merge priority).
pub fn build_providers(ids: &[ProviderId], ctx: &ProviderContext) -> Vec<Arc<dyn ProviderAdapter>> {
    ids.iter()
        .map(|id| -> Arc<dyn ProviderAdapter> {
            match id {
                ProviderId::Core => Arc::new(CoreAdapter::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.core,
                    ctx.keys.core.clone(),
                )),
                ProviderId::OpenAlex => Arc::new(OpenAlexAdapter::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.openalex,
                )),
                ProviderId::EuropePmc => Arc::new(EuropePmcAdapter::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.europepmc,
                )),
                ProviderId::Arxiv => {
                    Arc::new(ArxivAdapter::new(ctx.gateway.clone(), &ctx.endpoints.arxiv))
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Turn a search outcome into the adapter contract: filtered, capped items
/// plus stats, with any error recorded rather than returned.
pub(crate) fn settle(
    id: ProviderId,
    query: &Query,
    outcome: Result<Vec<DiscoveredItem>>,
) -> (Vec<DiscoveredItem>, ProviderStats) {
    let mut stats = ProviderStats::new(id.as_str());
    match outcome {
        Ok(mut items) => {
            items.retain(|item| query.year_in_range(item.year()));
            items.truncate(query.request_size());
            stats.fetched_count = items.len();
            debug!(provider = %id, fetched = items.len(), "provider search complete");
            (items, stats)
        }
        Err(e) => {
            warn!(provider = %id, error = %e, "provider search failed");
            stats.record_error(e.to_string());
            (Vec::new(), stats)
        }
    }
}

/// Trim, drop empties.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Authors joined for display.
pub(crate) fn join_authors<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().trim().to_string())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}


#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_shared::PaperScoutError;

    #[test]
    fn settle_caps_and_filters() {
        let query = Query {
            year_from: Some(2021),
            per_source_limit: 2,
            ..test_support::query("q")
        };
        let items = vec![
            DiscoveredItem::new(ProviderId::Core, "old", Some(2019), ""),
            DiscoveredItem::new(ProviderId::Core, "a", Some(2022), ""),
            DiscoveredItem::new(ProviderId::Core, "b", None, ""),
            DiscoveredItem::new(ProviderId::Core, "c", Some(2023), ""),
        ];
        let (items, stats) = settle(ProviderId::Core, &query, Ok(items));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title(), "a");
        assert_eq!(stats.fetched_count, 2);
        assert_eq!(stats.error_count, 0);
    }

    #[test]
    fn settle_records_errors() {
        let (items, stats) = settle(
            ProviderId::Arxiv,
            &test_support::query("q"),
            Err(PaperScoutError::Network("boom".into())),
        );
        assert!(items.is_empty());
        assert_eq!(stats.name, "arxiv");
        assert_eq!(stats.error_count, 1);
        assert!(stats.error_details[0].contains("boom"));
    }

    #[test]
    fn build_keeps_order() {
        let ctx = ProviderContext {
            gateway: test_support::gateway(),
            endpoints: ProviderEndpoints::default(),
            keys: ApiKeys::default(),
        };
        let adapters = build_providers(&[ProviderId::Arxiv, ProviderId::OpenAlex], &ctx);
        let ids: Vec<_> = adapters.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec![ProviderId::Arxiv, ProviderId::OpenAlex]);
    }
}
