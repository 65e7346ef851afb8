use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use engage_core::{ContextKind, Handle};

use crate::policy::ConfidencePolicy;

type Key = (Handle, ContextKind);
type Draw = Arc<dyn Fn() -> f64 + Send + Sync>;

/// One row of the confidence table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceEntry {
    pub handle: Handle,
    pub context: ContextKind,
    pub score: f64,
}

#[derive(Debug, Default)]
struct ConfidenceState {
    scores: HashMap<Key, f64>,
    /// Contexts the attention stage currently considers on-topic.
    relevant: HashSet<Key>,
}

/// Tracks how confident the agent is in each conversation. Scores live for the
/// lifetime of the process and start at 0.0.
#[derive(Clone)]
pub struct ConfidenceEngine {
    state: Arc<RwLock<ConfidenceState>>,
    policy: ConfidencePolicy,
    draw: Draw,
}

impl ConfidenceEngine {
    pub fn new(policy: ConfidencePolicy) -> Self {
        Self::with_draw(policy, || rand::random::<f64>())
    }

    /// Use a custom source of uniform `[0, 1)` draws for the probabilistic gate.
    pub fn with_draw<F>(policy: ConfidencePolicy, draw: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(RwLock::new(ConfidenceState::default())),
            policy,
            draw: Arc::new(draw),
        }
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    pub fn get(&self, handle: &str, kind: ContextKind) -> f64 {
        self.state
            .read()
            .scores
            .get(&(handle.to_string(), kind))
            .copied()
            .unwrap_or(0.0)
    }

    /// Add `delta` and clamp to `[0, 1]`. Returns the new score.
    pub fn update(&self, handle: &str, kind: ContextKind, delta: f64) -> f64 {
        if !delta.is_finite() {
            warn!(handle, context = %kind, delta, "ignoring non-finite confidence delta");
            return self.get(handle, kind);
        }
        let mut state = self.state.write();
        let score = state.scores.entry((handle.to_string(), kind)).or_insert(0.0);
        *score = (*score + delta).clamp(0.0, 1.0);
        debug!(handle, context = %kind, score = *score, "confidence updated");
        *score
    }

    /// Apply the context's increment for one successful interaction.
    pub fn record_interaction(&self, handle: &str, kind: ContextKind) -> f64 {
        self.update(handle, kind, self.policy.increment(kind))
    }

    pub fn reset(&self, handle: &str, kind: ContextKind) {
        let mut state = self.state.write();
        let key = (handle.to_string(), kind);
        state.scores.remove(&key);
        state.relevant.remove(&key);
    }

    /// Drop every score of one kind (e.g. when leaving all live rooms).
    pub fn reset_kind(&self, kind: ContextKind) {
        let mut state = self.state.write();
        state.scores.retain(|(_, k), _| *k != kind);
        state.relevant.retain(|(_, k)| *k != kind);
    }

    pub fn observe_relevance(&self, handle: &str, kind: ContextKind, relevant: bool) {
        let mut state = self.state.write();
        let key = (handle.to_string(), kind);
        if relevant {
            state.relevant.insert(key);
        } else {
            state.relevant.remove(&key);
        }
    }

    pub fn relevance(&self, handle: &str, kind: ContextKind) -> bool {
        self.state
            .read()
            .relevant
            .contains(&(handle.to_string(), kind))
    }

    /// Gate a reply. Below the context's floor (or the higher off-topic floor)
    /// never engage; otherwise engage outright, or for probabilistic contexts
    /// with probability `score`, boosted for relevant topics.
    pub fn should_engage(&self, handle: &str, kind: ContextKind, relevant: bool) -> bool {
        let gate = self.policy.gate(kind);
        let score = self.get(handle, kind);

        if score < gate.min_confidence {
            return false;
        }
        if !relevant && score < gate.irrelevant_min_confidence {
            return false;
        }
        if !gate.probabilistic {
            return true;
        }

        let multiplier = if relevant {
            self.policy.relevance_multiplier
        } else {
            1.0
        };
        let probability = (score * multiplier).min(1.0);
        (self.draw)() < probability
    }

    /// All non-zero scores, sorted by handle then context.
    pub fn snapshot(&self) -> Vec<ConfidenceEntry> {
        let state = self.state.read();
        let mut entries: Vec<ConfidenceEntry> = state
            .scores
            .iter()
            .filter(|(_, score)| **score > 0.0)
            .map(|((handle, context), score)| ConfidenceEntry {
                handle: handle.clone(),
                context: *context,
                score: *score,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.handle
                .cmp(&b.handle)
                .then_with(|| a.context.as_str().cmp(b.context.as_str()))
        });
        entries
    }
}

impl Default for ConfidenceEngine {
    fn default() -> Self {
        Self::new(ConfidencePolicy::default())
    }
}
