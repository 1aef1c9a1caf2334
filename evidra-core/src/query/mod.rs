//! Query-side components: analysis and cross-modal retrieval.

pub mod analyzer;
pub mod retriever;

pub use analyzer::{AnalyzedQuery, Intent, QueryAnalyzer};
pub use retriever::{BoostReason, CrossModalRetriever, RetrievedChunk};
