//! Response strategy selection.
//!
//! The strategist is pure decision logic: no LLM is involved in choosing
//! among ANSWER, CAVEATED, CONFLICT_PRESENTATION, and REFUSE. Persona
//! parameters feed generation, never this decision (debate mode being the
//! explicit exception: it forces conflict presentation).

use tracing::debug;

use crate::respond::Persona;
use crate::types::{Conflict, ConfidenceBreakdown, ConfidenceLevel, ConflictSeverity};

/// What kind of response to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Answer,
    Caveated,
    ConflictPresentation,
    Refuse,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Answer => "ANSWER",
            Strategy::Caveated => "CAVEATED",
            Strategy::ConflictPresentation => "CONFLICT_PRESENTATION",
            Strategy::Refuse => "REFUSE",
        };
        f.write_str(s)
    }
}

/// A chosen strategy with its human-readable justification.
#[derive(Debug, Clone)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    pub reason: String,
}

pub struct ResponseStrategist;

impl ResponseStrategist {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(
        &self,
        confidence: &ConfidenceBreakdown,
        conflicts: &[Conflict],
        persona: Persona,
        debate_requested: bool,
    ) -> StrategyDecision {
        let has_high_severity = conflicts
            .iter()
            .any(|c| c.severity == ConflictSeverity::High);

        let decision = if confidence.level == ConfidenceLevel::Low && !has_high_severity {
            StrategyDecision {
                strategy: Strategy::Refuse,
                reason: format!(
                    "Confidence {:.2} is too low for a reliable answer",
                    confidence.score
                ),
            }
        } else if !conflicts.is_empty() || persona == Persona::Debate || debate_requested {
            StrategyDecision {
                strategy: Strategy::ConflictPresentation,
                reason: if conflicts.is_empty() {
                    "Debate mode requested".to_string()
                } else {
                    format!("{} conflicting perspective pair(s) detected", conflicts.len())
                },
            }
        } else if confidence.level == ConfidenceLevel::Medium {
            StrategyDecision {
                strategy: Strategy::Caveated,
                reason: "Moderate confidence, answering with explicit caveats".to_string(),
            }
        } else {
            StrategyDecision {
                strategy: Strategy::Answer,
                reason: "High confidence and no conflicting evidence".to_string(),
            }
        };

        debug!(strategy = %decision.strategy, reason = %decision.reason, "Strategy chosen");
        decision
    }
}

impl Default for ResponseStrategist {
    fn default() -> Self {
        Self::new()
    }
}
