//! Multi-catalog discovery: provider adapters and the orchestrator that
//! fans out to them, merges, and deduplicates.
//!
//! The merge is a single sequential step after every provider task has
//! finished, so the seen-key set needs no locking. Provider order is merge
//! priority: when two catalogs return the same work, the earlier one's
//! record is kept as-is.

mod parser;
pub mod providers;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use paperscout_shared::{DedupKey, DiscoveredItem, ProviderStats, Query};

pub use parser::{AtomEntry, parse_atom_feed, reconstruct_abstract};
pub use providers::{
    ArxivAdapter, CoreAdapter, EuropePmcAdapter, OpenAlexAdapter, ProviderAdapter,
    ProviderContext, build_providers,
};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one orchestrated discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    /// Merged, deduplicated items, at most `total_limit` of them.
    pub items: Vec<DiscoveredItem>,
    /// Unique items seen before the `total_limit` cut.
    pub total_found: usize,
    /// One entry per provider, in invocation order. Covers both passes when
    /// the relaxed retry ran.
    pub stats: Vec<ProviderStats>,
    /// Whether the relaxed-filter retry pass ran.
    pub relaxed_retry: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Run every adapter concurrently, merge their results, and retry once with
/// relaxed filters when nothing came back and `auto_fallback` is set.
#[instrument(skip_all, fields(query = %query.text, providers = adapters.len()))]
pub async fn discover(
    query: &Query,
    adapters: &[Arc<dyn ProviderAdapter>],
    auto_fallback: bool,
) -> DiscoveryOutcome {
    let mut outcome = run_pass(query, adapters).await;

    if outcome.items.is_empty() && auto_fallback && !adapters.is_empty() {
        info!("no results under strict filters, retrying once with relaxed filters");
        let relaxed = run_pass(&query.relaxed(), adapters).await;

        for (stats, retry_stats) in outcome.stats.iter_mut().zip(relaxed.stats) {
            stats.absorb(retry_stats);
        }
        outcome.items = relaxed.items;
        outcome.total_found = relaxed.total_found;
        outcome.relaxed_retry = true;
    }

    info!(
        items = outcome.items.len(),
        total_found = outcome.total_found,
        relaxed_retry = outcome.relaxed_retry,
        "discovery complete"
    );
    outcome
}

/// One fan-out / fan-in pass.
async fn run_pass(query: &Query, adapters: &[Arc<dyn ProviderAdapter>]) -> DiscoveryOutcome {
    let mut handles = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let adapter = Arc::clone(adapter);
        let query = query.clone();
        handles.push(tokio::spawn(async move { adapter.discover(&query).await }));
    }

    let mut batches = Vec::with_capacity(handles.len());
    let mut stats = Vec::with_capacity(handles.len());
    for (adapter, handle) in adapters.iter().zip(handles) {
        match handle.await {
            Ok((items, provider_stats)) => {
                info!(
                    provider = %adapter.id(),
                    fetched = provider_stats.fetched_count,
                    errors = provider_stats.error_count,
                    "provider finished"
                );
                batches.push(items);
                stats.push(provider_stats);
            }
            Err(e) => {
                warn!(provider = %adapter.id(), error = %e, "provider task failed");
                let mut provider_stats = ProviderStats::new(adapter.id().as_str());
                provider_stats.record_error(format!("provider task failed: {e}"));
                batches.push(Vec::new());
                stats.push(provider_stats);
            }
        }
    }

    let (items, total_found) = merge(batches, query.total_limit);
    DiscoveryOutcome {
        items,
        total_found,
        stats,
        relaxed_retry: false,
    }
}

/// Merge batches in order. First occurrence of a dedup key wins; output is
/// capped at `limit`.
///
/// Items with neither DOI nor title share one anonymous key: the first such
/// item is kept and placed after every identified item, later ones are
/// dropped as duplicates of it.
///
/// Returns the merged items and the number of unique keys seen.
pub fn merge(batches: Vec<Vec<DiscoveredItem>>, limit: usize) -> (Vec<DiscoveredItem>, usize) {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut merged = Vec::new();
    let mut anonymous: Option<DiscoveredItem> = None;

    for item in batches.into_iter().flatten() {
        let key = item.dedup_key();
        if !seen.insert(key.clone()) {
            continue;
        }
        if key.is_anonymous() {
            anonymous = Some(item);
        } else if merged.len() < limit {
            merged.push(item);
        }
    }

    if let Some(item) = anonymous {
        if merged.len() < limit {
            merged.push(item);
        }
    }

    (merged, seen.len())
}
