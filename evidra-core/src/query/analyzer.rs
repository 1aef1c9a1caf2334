//! Query analysis: intent classification, modality selection, keyword
//! expansion.
//!
//! The analyzer is stateless. Its modality rules are fixed: TEXT is always
//! searched, AUDIO is always searched alongside TEXT (audio transcripts
//! are text and must be reachable from text queries), and IMAGE joins when
//! the query mentions anything visual.

use serde::{Deserialize, Serialize};

use crate::respond::Persona;
use crate::types::Modality;

/// What the user seems to want from the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Explanation,
    Procedural,
    Comparison,
    Causal,
    Visual,
    General,
}

/// The analyzed form of a query, consumed by the retriever.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    /// The (possibly translated) query text used for retrieval.
    pub query: String,
    /// Non-empty set of detected intents.
    pub intents: Vec<Intent>,
    /// Modalities to search, in order.
    pub required_modalities: Vec<Modality>,
    /// Lowercased content tokens of at least three characters.
    pub keywords: Vec<String>,
    pub persona: Persona,
}

const IMAGE_KEYWORDS: &[&str] = &[
    "image", "picture", "photo", "diagram", "chart", "graph", "illustration", "figure", "visual",
    "show", "look",
];

const AUDIO_KEYWORDS: &[&str] = &[
    "audio", "recording", "said", "spoken", "transcript", "conversation", "interview", "speech",
    "voice", "meeting", "heard",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "from", "this", "that", "these", "those",
    "you", "your", "can", "could", "will", "would", "has", "have", "had", "but", "all", "any",
    "what", "how", "why", "when", "where", "who", "which", "does", "did", "about", "into", "than",
    "then", "them", "they", "there", "here", "its", "his", "her", "our", "out", "not",
];

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, query: &str, persona: Persona) -> AnalyzedQuery {
        let lowered = query.to_lowercase();
        let tokens: Vec<String> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        let intents = detect_intents(&tokens);
        let required_modalities = required_modalities(&tokens);
        let keywords = tokens
            .iter()
            .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
            .cloned()
            .collect();

        AnalyzedQuery {
            query: query.to_string(),
            intents,
            required_modalities,
            keywords,
            persona,
        }
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_any(tokens: &[String], needles: &[&str]) -> bool {
    tokens.iter().any(|t| needles.contains(&t.as_str()))
}

fn detect_intents(tokens: &[String]) -> Vec<Intent> {
    let mut intents = Vec::new();
    if contains_any(tokens, &["what", "explain", "describe", "define"]) {
        intents.push(Intent::Explanation);
    }
    if contains_any(tokens, &["how", "steps", "step", "process", "procedure"]) {
        intents.push(Intent::Procedural);
    }
    if contains_any(tokens, &["compare", "comparison", "difference", "versus", "vs"]) {
        intents.push(Intent::Comparison);
    }
    if contains_any(tokens, &["why", "reason", "cause", "because"]) {
        intents.push(Intent::Causal);
    }
    if contains_any(tokens, IMAGE_KEYWORDS) {
        intents.push(Intent::Visual);
    }
    if intents.is_empty() {
        intents.push(Intent::General);
    }
    intents
}

fn required_modalities(tokens: &[String]) -> Vec<Modality> {
    // TEXT is always searched, and AUDIO rides along with TEXT because
    // audio transcripts live in the same textual space. A query with no
    // modality cue at all searches everything, so OCR text inside images
    // stays reachable from plain text questions.
    let mentions_image = contains_any(tokens, IMAGE_KEYWORDS);
    let mentions_audio = contains_any(tokens, AUDIO_KEYWORDS);

    let mut modalities = vec![Modality::Text];
    if mentions_image || !mentions_audio {
        modalities.push(Modality::Image);
    }
    modalities.push(Modality::Audio);
    modalities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(query: &str) -> AnalyzedQuery {
        QueryAnalyzer::new().analyze(query, Persona::Standard)
    }

    #[test]
    fn test_text_and_audio_always_included() {
        let analyzed = analyze("operating voltage of the machine");
        assert!(analyzed.required_modalities.contains(&Modality::Text));
        assert!(analyzed.required_modalities.contains(&Modality::Audio));
        // no modality cue at all: images are searched too
        assert!(analyzed.required_modalities.contains(&Modality::Image));
    }

    #[test]
    fn test_audio_only_cue_excludes_images() {
        let analyzed = analyze("What was said in the recording?");
        assert!(analyzed.required_modalities.contains(&Modality::Audio));
        assert!(!analyzed.required_modalities.contains(&Modality::Image));
    }

    #[test]
    fn test_visual_query_adds_image() {
        let analyzed = analyze("Show me the authentication flow diagram.");
        assert!(analyzed.required_modalities.contains(&Modality::Image));
        assert!(analyzed.intents.contains(&Intent::Visual));
    }

    #[test]
    fn test_audio_query_keywords() {
        let analyzed = analyze("What was said in the meeting recording?");
        assert!(analyzed.required_modalities.contains(&Modality::Audio));
    }

    #[test]
    fn test_intents_detected() {
        assert!(analyze("What is photosynthesis?")
            .intents
            .contains(&Intent::Explanation));
        assert!(analyze("How do I reset the machine?")
            .intents
            .contains(&Intent::Procedural));
        assert!(analyze("compare option A versus option B")
            .intents
            .contains(&Intent::Comparison));
        assert!(analyze("why does the fuse blow")
            .intents
            .contains(&Intent::Causal));
    }

    #[test]
    fn test_general_fallback_intent() {
        let analyzed = analyze("machine voltage");
        assert_eq!(analyzed.intents, vec![Intent::General]);
    }

    #[test]
    fn test_keywords_filtered_and_lowercased() {
        let analyzed = analyze("What is the Operating Voltage?");
        assert!(analyzed.keywords.contains(&"operating".to_string()));
        assert!(analyzed.keywords.contains(&"voltage".to_string()));
        // stopwords and short tokens gone
        assert!(!analyzed.keywords.contains(&"what".to_string()));
        assert!(!analyzed.keywords.contains(&"the".to_string()));
        assert!(!analyzed.keywords.contains(&"is".to_string()));
    }

    #[test]
    fn test_intents_never_empty() {
        let analyzed = analyze("xyzzy");
        assert!(!analyzed.intents.is_empty());
    }

    #[test]
    fn test_persona_carried_through() {
        let analyzed = QueryAnalyzer::new().analyze("voltage", Persona::Debate);
        assert_eq!(analyzed.persona, Persona::Debate);
    }
}
