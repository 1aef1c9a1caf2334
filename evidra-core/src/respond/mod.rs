//! Response side of the pipeline: personas, strategy selection, prompt
//! construction, and the LLM provider chain.

pub mod llm;
pub mod persona;
pub mod prompt;
pub mod strategy;

pub use llm::{
    FailoverLlmClient, GenerationRequest, GeminiProvider, LlmProvider, MockLlmProvider,
    OpenAiCompatProvider,
};
pub use persona::{Persona, PersonaParams};
pub use strategy::{ResponseStrategist, Strategy, StrategyDecision};
