//! Contradiction detection across evidence sources.
//!
//! Claim sentences are extracted from each retrieved chunk, then compared
//! pairwise across different source files. A pair is a conflict when it
//! is on the same topic (claim-vector cosine above [`TOPIC_SIMILARITY_FLOOR`])
//! AND one of: a numeric mismatch of the same unit, an explicit negation
//! on exactly one side, or antonymous polarity markers. Each unordered
//! source pair reports at most its best conflicting claim pair, so a
//! detected `(A,B)` conflict is never re-reported as `(B,A)`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::ingest::text::split_sentences;
use crate::query::RetrievedChunk;
use crate::types::{Conflict, ConflictSeverity, Perspective};

/// Claim pairs must clear this cosine similarity to count as on-topic.
const TOPIC_SIMILARITY_FLOOR: f32 = 0.6;

/// Claims kept per chunk.
const MAX_CLAIMS_PER_CHUNK: usize = 3;

/// Numeric conflicts are high severity only when both chunks carry at
/// least this intrinsic confidence.
const HIGH_SEVERITY_CONFIDENCE: f32 = 0.7;

const NEGATION_PATTERNS: &[&str] = &[
    r"\bnot\b",
    r"\bno\b",
    r"\bnever\b",
    r"\bneither\b",
    r"\bcannot\b",
    r"\bwithout\b",
    r"\bcontradicts?\b",
    r"\bdisproves?\b",
    r"\brefutes?\b",
];

const ABSOLUTE_TERMS: &[&str] = &[
    "always", "never", "all", "none", "every", "only", "must", "guaranteed",
];

const ANTONYM_PAIRS: &[(&str, &str)] = &[
    ("on", "off"),
    ("open", "closed"),
    ("enabled", "disabled"),
    ("safe", "unsafe"),
    ("increase", "decrease"),
    ("increases", "decreases"),
    ("high", "low"),
    ("hot", "cold"),
    ("allowed", "forbidden"),
];

fn negation_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        NEGATION_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
            .collect()
    })
}

fn number_unit_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*([a-zA-Z%°]{0,12})").expect("static pattern")
    })
}

pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect contradictions among the retrieved top-k. Conflict detection
    /// sees exactly this chunk set; there is no re-fetch.
    pub fn detect(&self, retrieved: &[RetrievedChunk]) -> Vec<Conflict> {
        if retrieved.len() < 2 {
            return Vec::new();
        }

        // Claims grouped by source file: one representative chunk
        // confidence per file (the max seen).
        let mut claims_by_file: Vec<(String, f32, Vec<Claim>)> = Vec::new();
        for item in retrieved {
            let claims = extract_claims(&item.chunk.content);
            if claims.is_empty() {
                continue;
            }
            match claims_by_file
                .iter_mut()
                .find(|(file, _, _)| file == &item.chunk.source_file)
            {
                Some((_, confidence, existing)) => {
                    *confidence = confidence.max(item.chunk.confidence);
                    existing.extend(claims);
                }
                None => {
                    claims_by_file.push((
                        item.chunk.source_file.clone(),
                        item.chunk.confidence,
                        claims,
                    ));
                }
            }
        }

        let mut conflicts = Vec::new();
        for i in 0..claims_by_file.len() {
            for j in (i + 1)..claims_by_file.len() {
                let (file_a, conf_a, claims_a) = &claims_by_file[i];
                let (file_b, conf_b, claims_b) = &claims_by_file[j];
                if let Some(conflict) =
                    best_conflict(file_a, *conf_a, claims_a, file_b, *conf_b, claims_b)
                {
                    conflicts.push(conflict);
                }
            }
        }

        if !conflicts.is_empty() {
            debug!(count = conflicts.len(), "Conflicts detected");
        }
        conflicts
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Claim {
    text: String,
    vector: HashMap<String, f32>,
    numbers: Vec<(f64, String)>,
    has_negation: bool,
}

/// Candidate claim sentences: sentences carrying numerals, absolute
/// terms, or negations. Newlines bound sentences too, so OCR blocks and
/// descriptors inside image-chunk content separate cleanly.
fn extract_claims(content: &str) -> Vec<Claim> {
    let mut claims = Vec::new();
    for line in content.lines() {
        for sentence in split_sentences(line) {
            if claims.len() >= MAX_CLAIMS_PER_CHUNK {
                return claims;
            }
            let words = sentence.split_whitespace().count();
            if words < 3 {
                continue;
            }
            let lowered = sentence.to_lowercase();
            let has_digits = sentence.chars().any(|c| c.is_ascii_digit());
            let has_negation = negation_regexes().iter().any(|r| r.is_match(sentence));
            let has_absolute = lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| ABSOLUTE_TERMS.contains(&w));
            if !(has_digits || has_negation || has_absolute) {
                continue;
            }
            claims.push(Claim {
                text: sentence.to_string(),
                vector: claim_vector(sentence),
                numbers: extract_numbers(sentence),
                has_negation,
            });
        }
    }
    claims
}

/// Bag-of-words claim representation. Quantity tokens ("220v") collapse
/// to a unit marker ("#v") carrying double weight, anchoring claims about
/// the same measurement to each other.
fn claim_vector(sentence: &str) -> HashMap<String, f32> {
    const STOP: &[&str] = &["the", "is", "are", "was", "were", "a", "an", "of", "to", "in", "on"];
    let mut vector: HashMap<String, f32> = HashMap::new();
    for token in sentence
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if STOP.contains(&token) {
            continue;
        }
        if token.chars().any(|c| c.is_ascii_digit()) {
            let unit: String = token.chars().filter(|c| !c.is_ascii_digit()).collect();
            let marker = format!("#{unit}");
            *vector.entry(marker).or_insert(0.0) += 2.0;
        } else {
            *vector.entry(token.to_string()).or_insert(0.0) += 1.0;
        }
    }
    vector
}

fn sparse_cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a: f32 = a.values().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `(value, normalized unit)` pairs found in a sentence. Unitless numbers
/// get an empty unit string.
fn extract_numbers(sentence: &str) -> Vec<(f64, String)> {
    number_unit_regex()
        .captures_iter(sentence)
        .filter_map(|cap| {
            let value: f64 = cap[1].parse().ok()?;
            let unit = normalize_unit(&cap[2]);
            Some((value, unit))
        })
        .collect()
}

fn normalize_unit(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = lowered.strip_suffix('s').unwrap_or(&lowered);
    match stripped {
        "volt" => "v".to_string(),
        "amp" | "ampere" => "a".to_string(),
        "watt" => "w".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pairwise comparison
// ---------------------------------------------------------------------------

/// The best-scoring conflicting claim pair between two files, if any.
fn best_conflict(
    file_a: &str,
    conf_a: f32,
    claims_a: &[Claim],
    file_b: &str,
    conf_b: f32,
    claims_b: &[Claim],
) -> Option<Conflict> {
    let mut best: Option<(f32, &Claim, &Claim, ConflictKind)> = None;

    for claim_a in claims_a {
        for claim_b in claims_b {
            let similarity = sparse_cosine(&claim_a.vector, &claim_b.vector);
            if similarity <= TOPIC_SIMILARITY_FLOOR {
                continue;
            }
            let Some(kind) = contradiction_kind(claim_a, claim_b) else {
                continue;
            };
            if best.as_ref().map(|(s, ..)| similarity > *s).unwrap_or(true) {
                best = Some((similarity, claim_a, claim_b, kind));
            }
        }
    }

    let (similarity, claim_a, claim_b, kind) = best?;
    let severity = match kind {
        ConflictKind::Numeric if conf_a >= HIGH_SEVERITY_CONFIDENCE
            && conf_b >= HIGH_SEVERITY_CONFIDENCE =>
        {
            ConflictSeverity::High
        }
        ConflictKind::Negation | ConflictKind::Antonym => ConflictSeverity::Medium,
        _ => ConflictSeverity::Low,
    };

    debug!(
        file_a,
        file_b,
        similarity,
        ?kind,
        "Conflicting claims"
    );
    Some(Conflict {
        description: format!(
            "Contradictory statements between {file_a} and {file_b}"
        ),
        perspectives: vec![
            Perspective {
                source: file_a.to_string(),
                claim: claim_a.text.clone(),
            },
            Perspective {
                source: file_b.to_string(),
                claim: claim_b.text.clone(),
            },
        ],
        severity,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictKind {
    Numeric,
    Negation,
    Antonym,
}

fn contradiction_kind(a: &Claim, b: &Claim) -> Option<ConflictKind> {
    // Numeric mismatch: same unit, different value.
    for (value_a, unit_a) in &a.numbers {
        for (value_b, unit_b) in &b.numbers {
            if unit_a == unit_b
                && !unit_a.is_empty()
                && (value_a - value_b).abs() > f64::EPSILON
            {
                return Some(ConflictKind::Numeric);
            }
        }
    }
    if a.has_negation != b.has_negation {
        return Some(ConflictKind::Negation);
    }
    let lowered_a = a.text.to_lowercase();
    let lowered_b = b.text.to_lowercase();
    let words_a: Vec<&str> = lowered_a
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let words_b: Vec<&str> = lowered_b
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for (left, right) in ANTONYM_PAIRS {
        if (words_a.contains(left) && words_b.contains(right))
            || (words_a.contains(right) && words_b.contains(left))
        {
            return Some(ConflictKind::Antonym);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Modality, SourceType};
    use std::collections::BTreeSet;

    fn retrieved(source: &str, content: &str, confidence: f32) -> RetrievedChunk {
        let mut chunk = Chunk::new(Modality::Text, content, source, SourceType::UploadedText);
        chunk.confidence = confidence;
        RetrievedChunk {
            chunk,
            relevance: 0.8,
            reasons: BTreeSet::new(),
        }
    }

    #[test]
    fn test_numeric_conflict_same_unit() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("manual.txt", "The operating voltage is 220V.", 1.0),
            retrieved("label.png", "MACHINE LABEL Voltage: 110V", 0.9),
        ]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.severity, ConflictSeverity::High);
        assert_eq!(conflict.perspectives.len(), 2);
        assert!(conflict.perspectives[0].claim.contains("220V"));
        assert!(conflict.perspectives[1].claim.contains("110V"));
        assert_eq!(conflict.perspectives[0].source, "manual.txt");
        assert_eq!(conflict.perspectives[1].source, "label.png");
    }

    #[test]
    fn test_no_conflict_on_agreement() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The operating voltage is 220V.", 1.0),
            retrieved("b.txt", "Operating voltage: 220V as specified.", 1.0),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_different_units_do_not_conflict() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The operating voltage is 220V.", 1.0),
            retrieved("b.txt", "The operating frequency is 50Hz.", 1.0),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_negation_conflict_is_medium() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The enclosure is always waterproof for outdoor use.", 1.0),
            retrieved("b.txt", "The enclosure is not waterproof for outdoor use.", 1.0),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
    }

    #[test]
    fn test_numeric_conflict_low_confidence_not_high_severity() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The operating voltage is 220V.", 0.6),
            retrieved("b.txt", "Measured operating voltage: 110V today.", 0.5),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_ne!(conflicts[0].severity, ConflictSeverity::High);
    }

    #[test]
    fn test_same_file_never_conflicts() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The operating voltage is 220V.", 1.0),
            retrieved("a.txt", "The operating voltage is 110V.", 1.0),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_symmetric_pair_reported_once() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The operating voltage is 220V.", 1.0),
            retrieved("b.txt", "The operating voltage is 110V.", 1.0),
        ]);
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn test_off_topic_numbers_do_not_conflict() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "The warranty lasts 2 years from purchase.", 1.0),
            retrieved("b.txt", "MACHINE LABEL Voltage: 110V", 1.0),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_image_chunk_content_claims_from_ocr_line() {
        let detector = ConflictDetector::new();
        let image_content = "Image file: label.png\nExtracted text from image:\nMACHINE LABEL Voltage: 110V\n\nImage properties: 640x480 pixels, landscape orientation, PNG";
        let conflicts = detector.detect(&[
            retrieved("manual.txt", "The operating voltage is 220V.", 1.0),
            retrieved("label.png", image_content, 0.85),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].perspectives[1].claim.contains("110V"));
    }

    #[test]
    fn test_fewer_than_two_sources_no_conflict() {
        let detector = ConflictDetector::new();
        assert!(detector
            .detect(&[retrieved("a.txt", "Voltage is 220V.", 1.0)])
            .is_empty());
    }

    #[test]
    fn test_antonym_polarity_conflict() {
        let detector = ConflictDetector::new();
        let conflicts = detector.detect(&[
            retrieved("a.txt", "Keep the main valve always open during startup.", 1.0),
            retrieved("b.txt", "Keep the main valve closed during startup always.", 1.0),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
    }
}
