//! Extraction of `{score, confidence, explanation}` from an LLM text
//! reply (C5).
//!
//! Four tiers, first success wins: whole-payload JSON, a fenced ```json```
//! block, the first balanced `{ ... }` object, then a regex scrape. Bounds
//! checking and clamping happen after extraction, in `validate`, so that
//! `handle_invalid` is applied exactly once at the calculator boundary
//! (Design Notes, spec.md §9).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// The outcome of parsing one LLM reply, carried through the pipeline as a
/// tagged variant rather than collapsed early.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A usable score (and optional confidence/explanation) was extracted.
    Valid {
        /// The numeric score, already range-checked against the configured bounds.
        score: f64,
        /// Confidence in `[0, 1]`, clamped; defaults to `0` when absent.
        confidence: f64,
        /// Free-form rationale, if the model supplied one.
        explanation: Option<String>,
    },
    /// No usable score could be produced.
    Invalid {
        /// Why this reply was rejected.
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    score: Option<f64>,
    confidence: Option<f64>,
    explanation: Option<String>,
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static SCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)score\s*[:=]\s*(-?\d+(?:\.\d+)?)").unwrap());
static CONFIDENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)confidence\s*[:=]\s*(\d+(?:\.\d+)?)").unwrap());

/// Parse a single LLM reply's text payload and validate the extracted score
/// against `[min_score, max_score]`.
pub fn parse(payload: &str, min_score: f64, max_score: f64) -> ParseOutcome {
    let raw = extract_raw(payload);

    let Some(raw) = raw else {
        return ParseOutcome::Invalid {
            reason: "could not extract a score from the LLM reply".to_string(),
        };
    };

    validate(raw, min_score, max_score)
}

fn validate(raw: RawPayload, min_score: f64, max_score: f64) -> ParseOutcome {
    let Some(score) = raw.score else {
        return ParseOutcome::Invalid {
            reason: "reply carried no score field".to_string(),
        };
    };

    if !score.is_finite() || score < min_score || score > max_score {
        return ParseOutcome::Invalid {
            reason: format!("score {score} outside [{min_score}, {max_score}]"),
        };
    }

    let confidence = raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0);

    ParseOutcome::Valid {
        score,
        confidence,
        explanation: raw.explanation,
    }
}

/// Run the four-tier extraction strategy, returning the first successful hit.
fn extract_raw(payload: &str) -> Option<RawPayload> {
    whole_payload_json(payload)
        .or_else(|| fenced_json_block(payload))
        .or_else(|| balanced_object(payload))
        .or_else(|| regex_fallback(payload))
}

/// Tier 1: the entire payload is a JSON object.
fn whole_payload_json(payload: &str) -> Option<RawPayload> {
    serde_json::from_str(payload.trim()).ok()
}

/// Tier 2: a fenced code block tagged (or untagged) as JSON.
fn fenced_json_block(payload: &str) -> Option<RawPayload> {
    let captures = FENCED_JSON.captures(payload)?;
    serde_json::from_str(&captures[1]).ok()
}

/// Tier 3: the first balanced `{ ... }` object anywhere in the payload.
fn balanced_object(payload: &str) -> Option<RawPayload> {
    let bytes = payload.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth = 0i32;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str(&payload[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Tier 4: scrape `score: <num>` / `confidence: <num>` patterns out of free text.
fn regex_fallback(payload: &str) -> Option<RawPayload> {
    let score = SCORE_RE
        .captures(payload)
        .and_then(|c| c[1].parse::<f64>().ok())?;
    let confidence = CONFIDENCE_RE
        .captures(payload)
        .and_then(|c| c[1].parse::<f64>().ok());

    Some(RawPayload {
        score: Some(score),
        confidence,
        explanation: None,
    })
}
