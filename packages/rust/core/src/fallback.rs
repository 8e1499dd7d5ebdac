//! Quality-gated fallback acquisition over what is already stored.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, instrument};

use paperscout_shared::{DiscoveryRequest, DiscoveryResponse, QualityThresholds, Result};
use paperscout_storage::{ChunkStore, StoredChunk};

use crate::pipeline::{PipelineContext, ProgressReporter, run_discovery};
use crate::quality::{Evidence, FallbackReason, QualityGate, QualityMetrics};

/// Chunks fetched per requested paper when sampling the store.
const CHUNKS_PER_PAPER: usize = 4;

/// Outcome of [`assess_and_acquire`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub metrics: QualityMetrics,
    pub fallback: bool,
    pub reasons: Vec<FallbackReason>,
    /// Distinct papers found in the store for the query.
    pub papers: usize,
    /// The acquisition run, when the gate triggered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<DiscoveryResponse>,
}

/// Score what the store already holds for `request.query`; when the gate
/// fails and `acquire` is set, run the full pipeline with storage enabled.
#[instrument(skip_all, fields(query = %request.query, requested = request.max_results))]
pub async fn assess_and_acquire(
    request: &DiscoveryRequest,
    thresholds: QualityThresholds,
    store: &dyn ChunkStore,
    ctx: &PipelineContext,
    acquire: bool,
    progress: &dyn ProgressReporter,
) -> Result<Assessment> {
    request.validate()?;
    let requested = request.max_results;

    progress.phase("Assessing stored results");
    let hits = store
        .similarity_search(&request.query, requested.saturating_mul(CHUNKS_PER_PAPER))
        .await?;
    let evidence = evidence_per_paper(&hits);

    let gate = QualityGate::new(thresholds);
    let metrics = gate.score(&evidence, requested);
    let decision = gate.should_fallback(&metrics);
    info!(
        papers = evidence.len(),
        overall = metrics.overall_score,
        fallback = decision.fallback,
        "quality assessed"
    );

    let run = if decision.fallback && acquire {
        for reason in &decision.reasons {
            info!(%reason, "fallback reason");
        }
        let request = DiscoveryRequest {
            store: true,
            ..request.clone()
        };
        Some(run_discovery(&request, ctx, Some(store), progress).await?)
    } else {
        None
    };

    Ok(Assessment {
        metrics,
        fallback: decision.fallback,
        reasons: decision.reasons,
        papers: evidence.len(),
        run,
    })
}

/// One evidence entry per paper: its best certainty and its year, in
/// first-hit order.
fn evidence_per_paper(hits: &[StoredChunk]) -> Vec<Evidence> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_paper: HashMap<&str, Evidence> = HashMap::new();

    for hit in hits {
        let paper = hit.paper_id().unwrap_or(hit.id.as_str());
        let year = hit
            .metadata
            .get("year")
            .and_then(|y| y.as_i64())
            .and_then(|y| i32::try_from(y).ok());
        let entry = by_paper.entry(paper).or_insert_with(|| {
            order.push(paper);
            Evidence {
                year,
                certainty: None,
            }
        });
        entry.certainty = match (entry.certainty, hit.certainty) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    order
        .into_iter()
        .filter_map(|paper| by_paper.get(paper).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::pipeline::test_support::{cleanup, context, mock_services, temp_db_path};
    use paperscout_storage::{ChunkMetadata, Storage};
    use serde_json::json;

    fn chunk(paper: &str, year: i64, certainty: f64) -> StoredChunk {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("paperId".into(), json!(paper));
        metadata.insert("year".into(), json!(year));
        StoredChunk {
            id: format!("{paper}:0"),
            content: String::new(),
            metadata,
            certainty: Some(certainty),
        }
    }

    #[test]
    fn hits_group_by_paper_keeping_best_certainty() {
        let hits = vec![
            chunk("a", 2025, 0.4),
            chunk("b", 2019, 0.9),
            chunk("a", 2025, 0.8),
        ];
        let evidence = evidence_per_paper(&hits);
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].certainty, Some(0.8));
        assert_eq!(evidence[0].year, Some(2025));
        assert_eq!(evidence[1].year, Some(2019));
    }

    #[tokio::test]
    async fn empty_store_triggers_acquisition() {
        let server = mock_services().await;
        let ctx = context(&server.uri());
        let db = temp_db_path();
        let storage = Storage::open(&db).await.expect("open");

        let request = DiscoveryRequest::new("blockchain governance");
        let assessment = assess_and_acquire(
            &request,
            QualityThresholds::default(),
            &storage,
            &ctx,
            true,
            &SilentProgress,
        )
        .await
        .expect("assess");

        assert!(assessment.fallback);
        assert_eq!(assessment.papers, 0);
        assert_eq!(assessment.metrics.overall_score, 0.0);
        let run = assessment.run.expect("pipeline ran");
        assert!(run.success);
        assert!(run.stored > 0);
        assert!(storage.count_chunks().await.expect("count") > 0);

        cleanup(&db);
    }

    #[tokio::test]
    async fn assessment_only_does_not_acquire() {
        let db = temp_db_path();
        let storage = Storage::open(&db).await.expect("open");
        let ctx = context("http://127.0.0.1:9");

        let assessment = assess_and_acquire(
            &DiscoveryRequest::new("anything"),
            QualityThresholds::default(),
            &storage,
            &ctx,
            false,
            &SilentProgress,
        )
        .await
        .expect("assess");
        assert!(assessment.fallback);
        assert!(assessment.run.is_none());

        cleanup(&db);
    }
}
