//! Reasoning chain: an ordered, timed, auditable record of every stage the
//! query pipeline ran.
//!
//! The chain is a first-class output, not debug logging: it is returned on
//! the response (including on failures), can be exported as markdown for
//! audit, and is what the pipeline property tests assert against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::types::SourceReference;

/// The pipeline stage a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    QueryAnalysis,
    Retrieval,
    ConfidenceAssessment,
    ConflictDetection,
    ResponseStrategy,
    Generation,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::QueryAnalysis => "query_analysis",
            StepType::Retrieval => "retrieval",
            StepType::ConfidenceAssessment => "confidence_assessment",
            StepType::ConflictDetection => "conflict_detection",
            StepType::ResponseStrategy => "response_strategy",
            StepType::Generation => "generation",
        };
        f.write_str(s)
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Warning,
    Error,
}

/// How the pipeline concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Answered,
    Caveated,
    ConflictPresented,
    Refused,
}

impl std::fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinalDecision::Answered => "answered",
            FinalDecision::Caveated => "caveated",
            FinalDecision::ConflictPresented => "conflict_presented",
            FinalDecision::Refused => "refused",
        };
        f.write_str(s)
    }
}

/// A single recorded stage of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based, strictly increasing within a chain.
    pub step_number: usize,
    pub step_type: StepType,
    pub title: String,
    pub description: String,
    /// Structured stage outputs (counts, scores, decisions).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_used: Vec<SourceReference>,
    pub duration_ms: u64,
    pub status: StepStatus,
}

/// The complete record of how one answer was derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub chain_id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub steps: Vec<ReasoningStep>,
    pub total_duration_ms: u64,
    pub final_decision: FinalDecision,
    /// Human-readable bullets summarising notable stage outcomes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_insights: Vec<String>,
}

impl ReasoningChain {
    /// Export the chain as a markdown audit report.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Reasoning Chain Report\n\n");
        md.push_str(&format!("**Query:** {}\n", self.query));
        md.push_str(&format!("**Timestamp:** {}\n", self.timestamp.to_rfc3339()));
        md.push_str(&format!("**Total Duration:** {}ms\n", self.total_duration_ms));
        md.push_str(&format!("**Final Decision:** {}\n\n---\n\n", self.final_decision));
        md.push_str("## Pipeline Steps\n\n");

        for step in &self.steps {
            let marker = match step.status {
                StepStatus::Completed => "ok",
                StepStatus::Warning => "warning",
                StepStatus::Error => "error",
            };
            md.push_str(&format!(
                "### Step {}: {} [{}]\n\n**Type:** {}\n**Duration:** {}ms\n\n{}\n\n",
                step.step_number, step.title, marker, step.step_type, step.duration_ms,
                step.description
            ));
            if !step.details.is_empty() {
                md.push_str("**Details:**\n");
                for (key, value) in &step.details {
                    md.push_str(&format!("- {key}: {value}\n"));
                }
                md.push('\n');
            }
            if !step.sources_used.is_empty() {
                md.push_str("**Sources Referenced:**\n");
                for src in &step.sources_used {
                    md.push_str(&format!(
                        "- [{}] (relevance: {:.2}): \"{}\"\n",
                        src.source_file,
                        src.relevance_score,
                        crate::types::truncate_chars(&src.content_snippet, 100)
                    ));
                }
                md.push('\n');
            }
            md.push_str("---\n\n");
        }

        if !self.key_insights.is_empty() {
            md.push_str("## Key Insights\n\n");
            for insight in &self.key_insights {
                md.push_str(&format!("- {insight}\n"));
            }
        }
        md
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Builds a [`ReasoningChain`] as the pipeline runs. Owns step numbering
/// and timing so stages cannot get them wrong.
pub struct ChainRecorder {
    chain_id: String,
    query: String,
    timestamp: DateTime<Utc>,
    started: Instant,
    steps: Vec<ReasoningStep>,
    insights: Vec<String>,
}

impl ChainRecorder {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            chain_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            timestamp: Utc::now(),
            started: Instant::now(),
            steps: Vec::new(),
            insights: Vec::new(),
        }
    }

    /// Mark the beginning of a stage; pass the returned instant to
    /// [`ChainRecorder::record`] when the stage finishes.
    pub fn stage_start(&self) -> Instant {
        Instant::now()
    }

    /// Record a finished stage. Step numbers are assigned monotonically.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        step_type: StepType,
        title: &str,
        description: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
        sources_used: Vec<SourceReference>,
        status: StepStatus,
        stage_started: Instant,
    ) {
        self.steps.push(ReasoningStep {
            step_number: self.steps.len() + 1,
            step_type,
            title: title.to_string(),
            description: description.into(),
            details,
            sources_used,
            duration_ms: stage_started.elapsed().as_millis() as u64,
            status,
        });
    }

    /// Add a key-insight bullet for the final chain.
    pub fn insight(&mut self, text: impl Into<String>) {
        self.insights.push(text.into());
    }

    /// Number of steps recorded so far.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Milliseconds elapsed since the recorder was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Consume the recorder and produce the chain.
    pub fn finish(self, final_decision: FinalDecision) -> ReasoningChain {
        ReasoningChain {
            chain_id: self.chain_id,
            query: self.query,
            timestamp: self.timestamp,
            total_duration_ms: self.started.elapsed().as_millis() as u64,
            steps: self.steps,
            final_decision,
            key_insights: self.insights,
        }
    }
}

/// Shorthand for building a details map from `(key, value)` pairs.
#[macro_export]
macro_rules! step_details {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::BTreeMap::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_numbered_monotonically() {
        let mut rec = ChainRecorder::new("what is the voltage?");
        for (i, ty) in [StepType::QueryAnalysis, StepType::Retrieval, StepType::Generation]
            .into_iter()
            .enumerate()
        {
            let t = rec.stage_start();
            rec.record(
                ty,
                &format!("stage {i}"),
                "desc",
                BTreeMap::new(),
                Vec::new(),
                StepStatus::Completed,
                t,
            );
        }
        let chain = rec.finish(FinalDecision::Answered);
        let numbers: Vec<usize> = chain.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_finish_preserves_insights_and_decision() {
        let mut rec = ChainRecorder::new("q");
        rec.insight("low relevance");
        rec.insight("conflict detected");
        let chain = rec.finish(FinalDecision::ConflictPresented);
        assert_eq!(chain.key_insights.len(), 2);
        assert_eq!(chain.final_decision, FinalDecision::ConflictPresented);
        assert_eq!(chain.query, "q");
    }

    #[test]
    fn test_step_details_macro() {
        let details = step_details! {
            "sources_retrieved" => 3,
            "average_relevance" => 0.72,
        };
        assert_eq!(details["sources_retrieved"], serde_json::json!(3));
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn test_markdown_export_contains_steps() {
        let mut rec = ChainRecorder::new("reset procedure?");
        let t = rec.stage_start();
        rec.record(
            StepType::Retrieval,
            "Evidence Retrieval",
            "Retrieved 2 chunks.",
            step_details! { "sources_retrieved" => 2 },
            Vec::new(),
            StepStatus::Warning,
            t,
        );
        let chain = rec.finish(FinalDecision::Refused);
        let md = chain.to_markdown();
        assert!(md.contains("# Reasoning Chain Report"));
        assert!(md.contains("Evidence Retrieval"));
        assert!(md.contains("[warning]"));
        assert!(md.contains("**Final Decision:** refused"));
    }

    #[test]
    fn test_serde_snake_case_step_type() {
        let json = serde_json::to_string(&StepType::ConfidenceAssessment).unwrap();
        assert_eq!(json, "\"confidence_assessment\"");
        let json = serde_json::to_string(&FinalDecision::ConflictPresented).unwrap();
        assert_eq!(json, "\"conflict_presented\"");
    }
}
