//! Quality gate: score a result set and decide whether another, more
//! expensive acquisition pass is justified.

use chrono::{Datelike, Utc};
use serde::Serialize;

use paperscout_shared::QualityThresholds;

/// Weights of the overall score.
const QUANTITY_WEIGHT: f64 = 0.2;
const CERTAINTY_WEIGHT: f64 = 0.5;
const RECENCY_WEIGHT: f64 = 0.3;

/// Certainty assumed for items that were not vector-retrieved.
pub const DEFAULT_CERTAINTY: f64 = 0.5;

/// The signals the gate reads from one result.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evidence {
    pub year: Option<i32>,
    /// Retrieval certainty in `[0,1]`, when the item came from a similarity search.
    pub certainty: Option<f64>,
}

/// Scores in `[0,1]` for one result-set snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub quantity_score: f64,
    pub certainty_score: f64,
    pub recency_score: f64,
    pub overall_score: f64,
    pub item_count: usize,
    pub requested_count: usize,
}

/// One reason the gate asked for a fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FallbackReason {
    InsufficientQuantity { found: usize, required: f64 },
    LowCertainty { score: f64, threshold: f64 },
    StaleResults { score: f64, threshold: f64 },
    LowOverallScore { score: f64, threshold: f64 },
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientQuantity { found, required } => {
                write!(f, "insufficient quantity: {found} results, need at least {required:.1}")
            }
            Self::LowCertainty { score, threshold } => {
                write!(f, "low certainty: {score:.2} < {threshold:.2}")
            }
            Self::StaleResults { score, threshold } => {
                write!(f, "too few recent results: {score:.2} < {threshold:.2}")
            }
            Self::LowOverallScore { score, threshold } => {
                write!(f, "low overall score: {score:.2} < {threshold:.2}")
            }
        }
    }
}

/// The gate's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDecision {
    pub fallback: bool,
    pub reasons: Vec<FallbackReason>,
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    thresholds: QualityThresholds,
    current_year: i32,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            current_year: Utc::now().year(),
        }
    }

    /// Pin "now" for recency scoring.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Score `items` against the number of results that were asked for.
    /// An empty set scores zero on every axis.
    pub fn score(&self, items: &[Evidence], requested: usize) -> QualityMetrics {
        if items.is_empty() {
            return QualityMetrics {
                quantity_score: 0.0,
                certainty_score: 0.0,
                recency_score: 0.0,
                overall_score: 0.0,
                item_count: 0,
                requested_count: requested,
            };
        }

        let n = items.len() as f64;
        let quantity_score = if requested == 0 {
            1.0
        } else {
            (n / requested as f64).clamp(0.0, 1.0)
        };
        let certainty_score = items
            .iter()
            .map(|e| e.certainty.unwrap_or(DEFAULT_CERTAINTY).clamp(0.0, 1.0))
            .sum::<f64>()
            / n;
        let cutoff = self.current_year - self.thresholds.max_years_old;
        let recent = items
            .iter()
            .filter(|e| e.year.is_some_and(|y| y >= cutoff))
            .count();
        let recency_score = recent as f64 / n;

        QualityMetrics {
            quantity_score,
            certainty_score,
            recency_score,
            overall_score: QUANTITY_WEIGHT * quantity_score
                + CERTAINTY_WEIGHT * certainty_score
                + RECENCY_WEIGHT * recency_score,
            item_count: items.len(),
            requested_count: requested,
        }
    }

    /// Collect every threshold the metrics fail.
    pub fn should_fallback(&self, metrics: &QualityMetrics) -> FallbackDecision {
        let t = &self.thresholds;
        let mut reasons = Vec::new();

        let required = metrics.requested_count as f64 * t.min_quantity_ratio;
        if (metrics.item_count as f64) < required {
            reasons.push(FallbackReason::InsufficientQuantity {
                found: metrics.item_count,
                required,
            });
        }
        if metrics.certainty_score < t.min_certainty_threshold {
            reasons.push(FallbackReason::LowCertainty {
                score: metrics.certainty_score,
                threshold: t.min_certainty_threshold,
            });
        }
        if metrics.recency_score < t.min_recent_ratio {
            reasons.push(FallbackReason::StaleResults {
                score: metrics.recency_score,
                threshold: t.min_recent_ratio,
            });
        }
        if metrics.overall_score < t.min_overall_score {
            reasons.push(FallbackReason::LowOverallScore {
                score: metrics.overall_score,
                threshold: t.min_overall_score,
            });
        }

        FallbackDecision {
            fallback: !reasons.is_empty(),
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> QualityGate {
        QualityGate::new(QualityThresholds::default()).with_current_year(2026)
    }

    fn evidence(year: i32, certainty: Option<f64>) -> Evidence {
        Evidence {
            year: Some(year),
            certainty,
        }
    }

    #[test]
    fn empty_set_scores_zero_and_falls_back() {
        let gate = gate();
        let metrics = gate.score(&[], 10);
        assert_eq!(metrics.quantity_score, 0.0);
        assert_eq!(metrics.overall_score, 0.0);

        let decision = gate.should_fallback(&metrics);
        assert!(decision.fallback);
        assert!(matches!(
            decision.reasons[0],
            FallbackReason::InsufficientQuantity { found: 0, .. }
        ));
        assert!(decision.reasons[0].to_string().contains("insufficient quantity"));
    }

    #[test]
    fn weights_combine() {
        let items = vec![evidence(2025, Some(0.9)); 10];
        let metrics = gate().score(&items, 10);
        assert_eq!(metrics.quantity_score, 1.0);
        assert!((metrics.certainty_score - 0.9).abs() < 1e-9);
        assert_eq!(metrics.recency_score, 1.0);
        assert!((metrics.overall_score - (0.2 + 0.45 + 0.3)).abs() < 1e-9);
        assert!(!gate().should_fallback(&metrics).fallback);
    }

    #[test]
    fn missing_certainty_defaults_to_half() {
        let items = [Evidence {
            year: None,
            certainty: None,
        }];
        let metrics = gate().score(&items, 1);
        assert_eq!(metrics.certainty_score, DEFAULT_CERTAINTY);
        assert_eq!(metrics.recency_score, 0.0);
    }

    #[test]
    fn quantity_is_clamped() {
        let items = vec![evidence(2026, Some(1.0)); 30];
        assert_eq!(gate().score(&items, 10).quantity_score, 1.0);
    }

    #[test]
    fn recency_uses_max_years_old() {
        let items = [
            evidence(2024, None),
            evidence(2023, None),
            evidence(2026, None),
            evidence(2010, None),
        ];
        assert_eq!(gate().score(&items, 4).recency_score, 0.5);
    }

    #[test]
    fn all_reasons_are_reported() {
        let items = [evidence(2001, Some(0.1))];
        let gate = gate();
        let decision = gate.should_fallback(&gate.score(&items, 10));
        assert_eq!(decision.reasons.len(), 4);
    }

    #[test]
    fn overall_is_monotonic_in_certainty() {
        let gate = gate();
        let mut previous = f64::MIN;
        for step in 0..=10 {
            let c = step as f64 / 10.0;
            let items = vec![evidence(2020, Some(c)), evidence(2026, Some(c))];
            let overall = gate.score(&items, 5).overall_score;
            assert!(overall >= previous);
            previous = overall;
        }
    }
}
