//! Typed load of the ensemble scoring configuration.
//!
//! This is authored and rotated independently of the service's own
//! `Config` (it names the model roster, the aggregation formula, and the
//! per-perspective weights), so it gets its own TOML file and its own
//! loader rather than living as a section of `Config`.

use super::expand_tilde;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A coarse political-leaning bucket assigned to a model in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// Left-leaning perspective.
    Left,
    /// Center / neutral perspective.
    Center,
    /// Right-leaning perspective.
    Right,
    /// Any perspective not otherwise classified.
    Other,
}

impl Default for Perspective {
    fn default() -> Self {
        Self::Other
    }
}

/// How an invalid (unparseable or out-of-range) score is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleInvalid {
    /// Drop the invalid result; the perspective may end up unrepresented.
    Ignore,
    /// Substitute `EnsembleConfig::default_missing` for the invalid result.
    Default,
}

/// The composite-score aggregation formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// Unweighted mean of the per-perspective canonical scores.
    Average,
    /// Weighted mean using `EnsembleConfig::weights`.
    Weighted,
}

/// The confidence aggregation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    /// Element-wise mean over per-perspective confidences.
    Average,
    /// Element-wise minimum.
    Min,
    /// Element-wise maximum.
    Max,
    /// `1 - clamp(max(s) - min(s), 0, 2) / 2`, requires `min_count` perspectives.
    SpreadBased,
}

/// One entry in the model roster.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// The model identifier passed to the transport (e.g. "gpt-4o-mini").
    pub name: String,

    /// The political-leaning bucket this model represents.
    pub perspective: Perspective,

    /// Override endpoint URL; falls back to `LlmConfig::base_url` when absent.
    #[serde(default)]
    pub url: Option<String>,

    /// Unspecified-effect field carried from upstream configuration; accepted
    /// and ignored unless a future prompt-rendering path consumes it.
    #[serde(default)]
    pub role: Option<String>,
}

/// Extra parameters for confidence aggregation methods.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfidenceParams {
    /// Minimum number of perspectives required for `spread_based`; below
    /// this count the calculator falls back to `average`.
    #[serde(default = "default_min_count")]
    pub min_count: usize,
}

fn default_min_count() -> usize {
    2
}

/// Typed ensemble configuration: model roster, formula, weights.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnsembleConfig {
    /// The configured model roster, in call order.
    pub models: Vec<ModelConfig>,

    /// Lower bound of a valid composite/per-model score.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Upper bound of a valid composite/per-model score.
    #[serde(default = "default_max_score")]
    pub max_score: f64,

    /// Substituted value for an invalid score when `handle_invalid = default`.
    #[serde(default)]
    pub default_missing: f64,

    /// Policy applied to an invalid parsed score.
    #[serde(default = "default_handle_invalid")]
    pub handle_invalid: HandleInvalid,

    /// Composite-score aggregation formula.
    #[serde(default = "default_formula")]
    pub formula: Formula,

    /// Per-perspective weights, used only when `formula = weighted`.
    #[serde(default)]
    pub weights: HashMap<Perspective, f64>,

    /// Confidence aggregation method.
    #[serde(default = "default_confidence_method")]
    pub confidence_method: ConfidenceMethod,

    /// Extra parameters for confidence aggregation.
    #[serde(default)]
    pub confidence_params: ConfidenceParams,

    /// Prompt-variant template file paths, rendered against the article.
    /// At least one entry is required by the Ensemble.
    #[serde(default = "default_prompt_variants")]
    pub prompt_variants: Vec<String>,
}

fn default_min_score() -> f64 {
    -1.0
}
fn default_max_score() -> f64 {
    1.0
}
fn default_handle_invalid() -> HandleInvalid {
    HandleInvalid::Ignore
}
fn default_formula() -> Formula {
    Formula::Average
}
fn default_confidence_method() -> ConfidenceMethod {
    ConfidenceMethod::Average
}
fn default_prompt_variants() -> Vec<String> {
    vec!["default".to_string()]
}

impl EnsembleConfig {
    /// Load the ensemble configuration from a TOML file.
    pub fn load(path: &str) -> Result<EnsembleConfig, ConfigError> {
        let expanded = expand_tilde(path);
        let contents = std::fs::read_to_string(&expanded).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: expanded.display().to_string(),
                }
            } else {
                ConfigError::Io {
                    path: expanded.display().to_string(),
                    source: e,
                }
            }
        })?;
        let config: EnsembleConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate model roster and numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::MissingField {
                field: "ensemble.models".to_string(),
            });
        }
        if self.prompt_variants.is_empty() {
            return Err(ConfigError::MissingField {
                field: "ensemble.prompt_variants".to_string(),
            });
        }
        if self.min_score >= self.max_score {
            return Err(ConfigError::InvalidValue {
                field: "ensemble.min_score".to_string(),
                message: "must be less than max_score".to_string(),
            });
        }
        Ok(())
    }

    /// Look up the perspective of a given model name, defaulting to `Other`
    /// for models not present in the roster.
    pub fn perspective_of(&self, model: &str) -> Perspective {
        self.models
            .iter()
            .find(|m| m.name == model)
            .map(|m| m.perspective)
            .unwrap_or_default()
    }

    /// List models sharing the given perspective, in roster order.
    pub fn models_for_perspective(&self, perspective: Perspective) -> Vec<&ModelConfig> {
        self.models
            .iter()
            .filter(|m| m.perspective == perspective)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
prompt_variants = ["default"]

[[models]]
name = "gpt-left"
perspective = "left"

[[models]]
name = "gpt-center"
perspective = "center"

[[models]]
name = "gpt-right"
perspective = "right"

[weights]
left = 0.33
center = 0.34
right = 0.33
"#
    }

    #[test]
    fn parses_model_roster() {
        let cfg: EnsembleConfig = toml::from_str(sample_toml()).expect("valid TOML");
        assert_eq!(cfg.models.len(), 3);
        assert_eq!(cfg.models[0].perspective, Perspective::Left);
        assert_eq!(cfg.formula, Formula::Average);
        assert_eq!(cfg.min_score, -1.0);
        assert_eq!(cfg.max_score, 1.0);
    }

    #[test]
    fn validate_rejects_empty_roster() {
        let cfg = EnsembleConfig {
            models: Vec::new(),
            min_score: -1.0,
            max_score: 1.0,
            default_missing: 0.0,
            handle_invalid: HandleInvalid::Ignore,
            formula: Formula::Average,
            weights: HashMap::new(),
            confidence_method: ConfidenceMethod::Average,
            confidence_params: ConfidenceParams::default(),
            prompt_variants: vec!["default".to_string()],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn perspective_of_unknown_model_is_other() {
        let cfg: EnsembleConfig = toml::from_str(sample_toml()).expect("valid TOML");
        assert_eq!(cfg.perspective_of("unknown-model"), Perspective::Other);
        assert_eq!(cfg.perspective_of("gpt-left"), Perspective::Left);
    }

    #[test]
    fn models_for_perspective_filters_correctly() {
        let cfg: EnsembleConfig = toml::from_str(sample_toml()).expect("valid TOML");
        let left = cfg.models_for_perspective(Perspective::Left);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "gpt-left");
    }

    #[test]
    fn role_field_accepted_and_ignored() {
        let toml_str = r#"
prompt_variants = ["default"]
[[models]]
name = "gpt-left"
perspective = "left"
role = "primary-analyst"
"#;
        let cfg: EnsembleConfig = toml::from_str(toml_str).expect("valid TOML");
        assert_eq!(cfg.models[0].role.as_deref(), Some("primary-analyst"));
    }
}
