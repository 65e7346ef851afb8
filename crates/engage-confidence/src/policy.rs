use engage_config::{ConfidenceConfig, GateConfig};
use engage_core::ContextKind;
use serde::{Deserialize, Serialize};

/// Engagement thresholds for one context kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub min_confidence: f64,
    pub irrelevant_min_confidence: f64,
    pub probabilistic: bool,
}

impl From<&GateConfig> for Gate {
    fn from(config: &GateConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            irrelevant_min_confidence: config.irrelevant_min_confidence,
            probabilistic: config.probabilistic,
        }
    }
}

/// Increments and gates for every context kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePolicy {
    pub dm_increment: f64,
    pub mention_increment: f64,
    pub space_increment: f64,
    pub relevance_multiplier: f64,
    pub dm: Gate,
    pub mention: Gate,
    pub space: Gate,
}

impl ConfidencePolicy {
    pub fn increment(&self, kind: ContextKind) -> f64 {
        match kind {
            ContextKind::Dm => self.dm_increment,
            ContextKind::Mention => self.mention_increment,
            ContextKind::Space => self.space_increment,
        }
    }

    pub fn gate(&self, kind: ContextKind) -> Gate {
        match kind {
            ContextKind::Dm => self.dm,
            ContextKind::Mention => self.mention,
            ContextKind::Space => self.space,
        }
    }
}

impl From<&ConfidenceConfig> for ConfidencePolicy {
    fn from(config: &ConfidenceConfig) -> Self {
        Self {
            dm_increment: config.dm_increment,
            mention_increment: config.mention_increment,
            space_increment: config.space_increment,
            relevance_multiplier: config.relevance_multiplier,
            dm: Gate::from(&config.dm),
            mention: Gate::from(&config.mention),
            space: Gate::from(&config.space),
        }
    }
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::from(&ConfidenceConfig::default())
    }
}
