//! Deterministic prompt construction.
//!
//! For a given `(persona, strategy, chunks, query)` the prompts are
//! byte-identical: the system prompt is the persona template plus the
//! strategy's instruction, and the user prompt embeds the query with a
//! numbered evidence list. The instructions bind the model to cite by
//! `[n]` and to stay inside the evidence.

use crate::query::RetrievedChunk;
use crate::respond::{Persona, Strategy};
use crate::types::truncate_chars;

/// Per-chunk evidence cap in characters.
const EVIDENCE_CHAR_CAP: usize = 1200;

const BASE_SYSTEM_PROMPT: &str = "You are an evidence-grounded assistant. You answer strictly \
from the numbered evidence provided, citing the supporting entry as [n] after each claim. If the \
evidence does not cover something, say so instead of guessing. Never invent sources.";

/// Build the system prompt for a persona and strategy.
pub fn system_prompt(persona: Persona, strategy: Strategy) -> String {
    let strategy_instruction = match strategy {
        Strategy::Answer => "Give a direct, complete answer supported by the evidence.",
        Strategy::Caveated => {
            "The evidence is only moderately strong. Answer, but state the uncertainty \
             explicitly and qualify claims the evidence only partially supports."
        }
        Strategy::ConflictPresentation => {
            "The evidence contains conflicting accounts. Present each perspective with its \
             source attribution. Do NOT decide which side is correct."
        }
        Strategy::Refuse => {
            "The evidence is insufficient. Explain briefly what is missing and what kind of \
             material would allow an answer. Do not attempt an answer."
        }
    };
    format!(
        "{BASE_SYSTEM_PROMPT}\n\n{}\n\n{strategy_instruction}",
        persona.emphasis()
    )
}

/// Build the user prompt: query plus numbered evidence list.
///
/// `target_language` names the language the final answer must be written
/// in, when the query arrived in (or was forced to) a non-English one.
pub fn user_prompt(
    query: &str,
    retrieved: &[RetrievedChunk],
    target_language: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Evidence:\n");
    for (i, item) in retrieved.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] source={} modality={} content={}\n",
            i + 1,
            item.chunk.source_file,
            item.chunk.modality,
            truncate_chars(&item.chunk.content, EVIDENCE_CHAR_CAP)
        ));
    }
    if retrieved.is_empty() {
        prompt.push_str("(no evidence retrieved)\n");
    }
    prompt.push_str(&format!("\nQuestion: {query}\n"));
    if let Some(language) = target_language {
        prompt.push_str(&format!("\nWrite the answer in {language}.\n"));
    }
    prompt.push_str("\nAnswer citing evidence as [n]:");
    prompt
}
