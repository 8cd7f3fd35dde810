//! Pure composite-score and confidence aggregation (C6).
//!
//! `combine` takes the per-model scores Ensemble collected for one article
//! and the ensemble configuration, and produces a single `{composite,
//! confidence}` pair. No I/O, no clock, no randomness — every behaviour is a
//! function of its inputs, which is what makes this module testable in
//! isolation from Transport/Store.

use crate::config::{ConfidenceMethod, EnsembleConfig, Formula, Perspective};
use crate::error::CalculatorError;
use crate::parser::ParseOutcome;
use std::collections::HashMap;

/// One model's contribution to a combine pass: its raw parse outcome, plus
/// the model name used to resolve its perspective.
#[derive(Debug, Clone)]
pub struct ScoredModel {
    /// The model identifier, looked up in `EnsembleConfig.models`.
    pub model: String,
    /// The parsed outcome for this model (already past `handle_invalid`'s
    /// substitution if applicable — see `ensemble::apply_handle_invalid`).
    pub outcome: ParseOutcome,
}

/// The result of combining per-model scores into one composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedScore {
    /// The composite score, clamped to `[min_score, max_score]`.
    pub composite: f64,
    /// The aggregate confidence in `[0, 1]`.
    pub confidence: f64,
}

struct PerspectiveGroup {
    scores: Vec<f64>,
    confidences: Vec<f64>,
}

struct ModelGroup {
    perspective: Perspective,
    scores: Vec<f64>,
    confidences: Vec<f64>,
}

/// Combine per-model scores into a composite score and confidence,
/// following spec.md §4.4.
///
/// Collapsing is two-level, per SPEC_FULL.md's expansion of §4.4: first by
/// `model` name (defensive — this function must not assume its caller
/// respects Store's `(article_id, model)` uniqueness invariant), then by
/// `perspective` across the resulting per-model canonical values.
pub fn combine(
    scores: &[ScoredModel],
    cfg: &EnsembleConfig,
) -> Result<CombinedScore, CalculatorError> {
    let mut by_model: HashMap<&str, ModelGroup> = HashMap::new();

    for scored in scores {
        let (score, confidence) = match &scored.outcome {
            ParseOutcome::Valid {
                score, confidence, ..
            } => (*score, *confidence),
            ParseOutcome::Invalid { .. } => match cfg.handle_invalid {
                crate::config::HandleInvalid::Default => (cfg.default_missing, 0.0),
                crate::config::HandleInvalid::Ignore => continue,
            },
        };
        let perspective = cfg.perspective_of(&scored.model);
        let entry = by_model.entry(&scored.model).or_insert_with(|| ModelGroup {
            perspective,
            scores: Vec::new(),
            confidences: Vec::new(),
        });
        entry.scores.push(score);
        entry.confidences.push(confidence);
    }

    if by_model.is_empty() {
        return Err(CalculatorError::AllPerspectivesInvalid);
    }

    // Level 1: collapse duplicate entries for the same model by averaging.
    let mut groups: HashMap<Perspective, PerspectiveGroup> = HashMap::new();
    for model_group in by_model.into_values() {
        let n = model_group.scores.len() as f64;
        let score = model_group.scores.iter().sum::<f64>() / n;
        let confidence = model_group.confidences.iter().sum::<f64>() / n;
        let group = groups
            .entry(model_group.perspective)
            .or_insert_with(|| PerspectiveGroup {
                scores: Vec::new(),
                confidences: Vec::new(),
            });
        group.scores.push(score);
        group.confidences.push(confidence);
    }

    // Level 2: collapse duplicate (model, perspective) results — i.e. every
    // model mapped to this perspective — by averaging again.
    let canonical: Vec<(Perspective, f64, f64)> = groups
        .into_iter()
        .map(|(perspective, group)| {
            let n = group.scores.len() as f64;
            let score = group.scores.iter().sum::<f64>() / n;
            let confidence = group.confidences.iter().sum::<f64>() / n;
            (perspective, score, confidence)
        })
        .collect();

    let composite = composite_score(&canonical, cfg);
    let confidence = aggregate_confidence(&canonical, cfg);

    Ok(CombinedScore {
        composite: composite.clamp(cfg.min_score, cfg.max_score),
        confidence: confidence.clamp(0.0, 1.0),
    })
}

fn composite_score(canonical: &[(Perspective, f64, f64)], cfg: &EnsembleConfig) -> f64 {
    match cfg.formula {
        Formula::Average => {
            let n = canonical.len() as f64;
            canonical.iter().map(|(_, s, _)| s).sum::<f64>() / n
        }
        Formula::Weighted => {
            let (weighted_sum, weight_total) = canonical.iter().fold(
                (0.0, 0.0),
                |(sum, total), (perspective, score, _)| {
                    let w = cfg.weights.get(perspective).copied().unwrap_or(0.0);
                    (sum + w * score, total + w)
                },
            );
            if weight_total == 0.0 {
                let n = canonical.len() as f64;
                canonical.iter().map(|(_, s, _)| s).sum::<f64>() / n
            } else {
                weighted_sum / weight_total
            }
        }
    }
}

fn aggregate_confidence(canonical: &[(Perspective, f64, f64)], cfg: &EnsembleConfig) -> f64 {
    let confidences: Vec<f64> = canonical.iter().map(|(_, _, c)| *c).collect();
    let n = confidences.len();

    match cfg.confidence_method {
        ConfidenceMethod::Average => confidences.iter().sum::<f64>() / n as f64,
        ConfidenceMethod::Min => confidences.iter().copied().fold(f64::INFINITY, f64::min),
        ConfidenceMethod::Max => confidences.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ConfidenceMethod::SpreadBased => {
            if n < cfg.confidence_params.min_count {
                confidences.iter().sum::<f64>() / n as f64
            } else {
                let scores: Vec<f64> = canonical.iter().map(|(_, s, _)| *s).collect();
                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
                let spread = (max - min).clamp(0.0, 2.0);
                1.0 - spread / 2.0
            }
        }
    }
}
