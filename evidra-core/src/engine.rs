//! The engine: process-wide wiring and the query state machine.
//!
//! One [`Engine`] owns the models, the vector store, and the pipeline
//! components. Queries run the linear state machine from §language
//! detection through generation, appending one reasoning step per stage;
//! every error is converted into a structured refusal response — nothing
//! escapes to the caller as an unstructured failure.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::assess::{ConfidenceScorer, ConflictDetector};
use crate::chain::{ChainRecorder, FinalDecision, StepStatus, StepType};
use crate::config::EngineConfig;
use crate::embed::{create_encoder, EmbeddingManager, VisualProjection};
use crate::error::{EvidraError, Result};
use crate::ingest::{
    self, audio::UnavailableStt, ocr::UnavailableOcr, AudioProcessor, MockSttEngine,
    MockOcrEngine, OcrEngine, ProcessorSet, SttEngine, TesseractCli, WhisperCli,
};
use crate::language::{HttpTranslator, LanguageService, MockTranslator, Translator};
use crate::query::{CrossModalRetriever, QueryAnalyzer, RetrievedChunk};
use crate::respond::{
    prompt, FailoverLlmClient, GenerationRequest, ResponseStrategist, Strategy,
};
use crate::step_details;
use crate::store::{ChunkFilter, VectorStore};
use crate::types::{
    CorpusStats, IngestReport, LanguageInfo, Modality, QueryRequest, QueryResponse,
    SourceReference, TranslationInfo, MAX_TOP_K,
};

/// Minimum query length (characters, trimmed) accepted by the pipeline.
const MIN_QUERY_CHARS: usize = 3;

/// How many source references a reasoning step snapshots.
const STEP_SOURCE_LIMIT: usize = 5;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Engine`] with injectable model seams. Production code
/// uses [`Engine::bootstrap`]; tests swap in mocks.
pub struct EngineBuilder {
    config: EngineConfig,
    ocr: Option<Arc<dyn OcrEngine>>,
    stt: Option<Arc<dyn SttEngine>>,
    translator: Option<Arc<dyn Translator>>,
    llm: Option<FailoverLlmClient>,
    in_memory_store: bool,
    decode_audio: bool,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ocr: None,
            stt: None,
            translator: None,
            llm: None,
            in_memory_store: false,
            decode_audio: true,
        }
    }

    pub fn ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn stt(mut self, stt: Arc<dyn SttEngine>) -> Self {
        self.stt = Some(stt);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn llm(mut self, llm: FailoverLlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Keep the chunk store in memory (tests).
    pub fn in_memory_store(mut self) -> Self {
        self.in_memory_store = true;
        self
    }

    /// Feed audio files straight to the STT engine without ffmpeg (tests).
    pub fn without_audio_decode(mut self) -> Self {
        self.decode_audio = false;
        self
    }

    /// Mock every external seam: OCR, STT, translator, and LLM. The
    /// returned mocks can be pre-loaded before driving the engine.
    pub fn with_mock_externals(self) -> MockedEngineBuilder {
        let ocr = Arc::new(MockOcrEngine::new());
        let stt = Arc::new(MockSttEngine::new());
        let translator = Arc::new(MockTranslator::new());
        let llm_provider = Arc::new(crate::respond::MockLlmProvider::new());
        let llm = FailoverLlmClient::new(
            vec![llm_provider.clone() as Arc<dyn crate::respond::LlmProvider>],
            Duration::from_secs(30),
        );
        MockedEngineBuilder {
            inner: self
                .ocr(ocr.clone())
                .stt(stt.clone())
                .translator(translator.clone())
                .llm(llm)
                .without_audio_decode(),
            ocr,
            stt,
            translator,
            llm_provider,
        }
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;

        let encoder = create_encoder(&config.embedding)?;
        let projection = if self.in_memory_store {
            VisualProjection::generate(config.embedding.vector_dim)
        } else {
            VisualProjection::load_or_create(&config.storage.index_dir, config.embedding.vector_dim)?
        };
        let embeddings = Arc::new(EmbeddingManager::new(
            encoder,
            projection,
            config.embedding.batch_size,
        )?);

        let store = Arc::new(if self.in_memory_store {
            VectorStore::open_in_memory(config.embedding.vector_dim)?
        } else {
            VectorStore::open(&config.storage.index_dir, config.embedding.vector_dim)?
        });

        let translator = if config.translation.enabled {
            self.translator
        } else {
            None
        };
        let language = Arc::new(LanguageService::new(translator));

        let ocr = self
            .ocr
            .unwrap_or_else(|| Arc::new(UnavailableOcr::new("no OCR engine configured")));
        let stt = self
            .stt
            .unwrap_or_else(|| Arc::new(UnavailableStt::new("no STT engine configured")));

        let mut processors = ProcessorSet::new(&config, ocr, stt, language.clone());
        if !self.decode_audio {
            processors = processors.with_audio_processor(AudioProcessor::without_decode());
        }

        let retriever = CrossModalRetriever::new(
            store.clone(),
            embeddings.clone(),
            config.retrieval.clone(),
        );
        let confidence = ConfidenceScorer::new(config.retrieval.confidence_threshold);
        let llm = match self.llm {
            Some(llm) => llm,
            None => FailoverLlmClient::from_config(&config.llm),
        };

        if !self.in_memory_store {
            std::fs::create_dir_all(&config.storage.uploads_dir)?;
        }

        let ingest_slots = Arc::new(Semaphore::new(config.ingest.max_concurrent.max(1)));

        Ok(Engine {
            config,
            store,
            embeddings,
            processors,
            language,
            analyzer: QueryAnalyzer::new(),
            retriever,
            confidence,
            conflicts: ConflictDetector::new(),
            strategist: ResponseStrategist::new(),
            llm,
            ingest_slots,
        })
    }
}

/// An [`EngineBuilder`] whose external seams are mocks, with handles for
/// pre-loading them in tests.
pub struct MockedEngineBuilder {
    inner: EngineBuilder,
    pub ocr: Arc<MockOcrEngine>,
    pub stt: Arc<MockSttEngine>,
    pub translator: Arc<MockTranslator>,
    pub llm_provider: Arc<crate::respond::MockLlmProvider>,
}

impl MockedEngineBuilder {
    pub fn build(self) -> Result<Engine> {
        self.inner.build()
    }

    pub fn in_memory_store(mut self) -> Self {
        self.inner = self.inner.in_memory_store();
        self
    }

    /// Swap the LLM chain for one that always fails, keeping other mocks.
    pub fn failing_llm(mut self) -> Self {
        let provider: Arc<dyn crate::respond::LlmProvider> =
            Arc::new(crate::respond::MockLlmProvider::failing());
        self.inner = self
            .inner
            .llm(FailoverLlmClient::new(vec![provider], Duration::from_secs(5)));
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingManager>,
    processors: ProcessorSet,
    language: Arc<LanguageService>,
    analyzer: QueryAnalyzer,
    retriever: CrossModalRetriever,
    confidence: ConfidenceScorer,
    conflicts: ConflictDetector,
    strategist: ResponseStrategist,
    llm: FailoverLlmClient,
    ingest_slots: Arc<Semaphore>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Production wiring: probe the external binaries, build the HTTP
    /// translator and the configured LLM chain. A missing binary does not
    /// fail startup; the affected file types are rejected at ingest with
    /// a dependency error.
    pub async fn bootstrap(config: EngineConfig) -> Result<Engine> {
        let ocr: Arc<dyn OcrEngine> = match TesseractCli::detect("eng").await {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                warn!(error = %e, "OCR unavailable, image ingest will be rejected");
                Arc::new(UnavailableOcr::new(e.to_string()))
            }
        };
        let stt: Arc<dyn SttEngine> =
            match WhisperCli::detect(PathBuf::from("models/ggml-base.en.bin"), "en").await {
                Ok(engine) => Arc::new(engine),
                Err(e) => {
                    warn!(error = %e, "STT unavailable, audio ingest will be rejected");
                    Arc::new(UnavailableStt::new(e.to_string()))
                }
            };
        let translator: Arc<dyn Translator> = Arc::new(HttpTranslator::new(
            config.translation.endpoint.clone(),
            config
                .translation
                .api_key_env
                .as_ref()
                .and_then(|env| std::env::var(env).ok()),
        ));

        Self::builder(config)
            .ocr(ocr)
            .stt(stt)
            .translator(translator)
            .build()
    }

    // -- ingestion ----------------------------------------------------------

    /// Ingest one file: write it to the uploads directory, process it to
    /// chunks, embed, and insert. Re-ingesting a file name replaces its
    /// previous chunks.
    pub async fn ingest(&self, file_bytes: &[u8], filename: &str) -> Result<IngestReport> {
        let _permit = self
            .ingest_slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| EvidraError::Busy)?;

        let path = self.upload_path(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, file_bytes)?;

        let outcome = self.ingest_inner(&path, filename).await;
        if outcome.is_err() {
            let _ = std::fs::remove_file(&path);
        }
        outcome
    }

    async fn ingest_inner(&self, path: &std::path::Path, filename: &str) -> Result<IngestReport> {
        let chunks = self.processors.process(path).await?;
        let warnings = ingest::collect_warnings(&chunks);

        let mut storable: Vec<_> = chunks.into_iter().filter(ingest::is_storable).collect();
        self.embeddings.embed_chunks(&mut storable)?;
        // Embedding skips nothing storable, but stay defensive about
        // inserting anything unembedded.
        storable.retain(|c| c.embedding.is_some());

        // Replace semantics for repeated uploads of the same name.
        self.store
            .delete(&ChunkFilter::by_source_file(filename))?;

        let mut inserted = 0usize;
        for batch in storable.chunks(self.config.ingest.insert_batch_size.max(1)) {
            match self.store.add(batch) {
                Ok(count) => inserted += count,
                Err(e) => {
                    // Roll back this file entirely: the ingest is atomic
                    // from the caller's view.
                    let _ = self.store.delete(&ChunkFilter::by_source_file(filename));
                    return Err(e.into());
                }
            }
        }

        let modalities: Vec<Modality> = storable
            .iter()
            .map(|c| c.modality)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(file = filename, chunks = inserted, "Ingest complete");
        Ok(IngestReport {
            source_file: filename.to_string(),
            chunks_created: inserted,
            modalities,
            warnings,
        })
    }

    fn upload_path(&self, filename: &str) -> PathBuf {
        // Strip any path components a caller might smuggle in.
        let safe_name = std::path::Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.config.storage.uploads_dir.join(safe_name)
    }

    // -- maintenance --------------------------------------------------------

    /// Drop the corpus and clear the uploads directory.
    pub fn reset(&self) -> Result<()> {
        self.store.reset()?;
        if self.config.storage.uploads_dir.is_dir() {
            for entry in std::fs::read_dir(&self.config.storage.uploads_dir)? {
                let entry = entry?;
                if entry.path().is_file() {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> CorpusStats {
        self.store.stats()
    }

    /// Look up a stored chunk by id, e.g. to group OCR-text chunks with
    /// their parent image for presentation.
    pub fn chunk(&self, id: &str) -> Option<crate::types::Chunk> {
        self.store.get(id)
    }

    pub fn supported_languages(&self) -> Vec<LanguageInfo> {
        self.language.supported()
    }

    // -- query pipeline -----------------------------------------------------

    /// Answer a query. Always returns a structured response; failures
    /// surface as refusals with the reasoning chain attached.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let mut recorder = ChainRecorder::new(request.query.clone());
        let deadline = request
            .deadline_ms
            .map(|ms| started + Duration::from_millis(ms));

        let trimmed = request.query.trim();
        if trimmed.chars().count() < MIN_QUERY_CHARS {
            let stage = recorder.stage_start();
            recorder.record(
                StepType::QueryAnalysis,
                "Query Analysis",
                "Query rejected: too short to analyze.",
                step_details! { "query_chars" => trimmed.chars().count() },
                Vec::new(),
                StepStatus::Error,
                stage,
            );
            return self.refusal_response(
                &request,
                recorder,
                Vec::new(),
                None,
                "query too short: provide at least a few words to search for",
                started,
            );
        }

        // -- language detection & query translation ------------------------
        let (detected_code, detect_confidence) = self.language.detect(&request.query);
        let mut translation_info: Option<TranslationInfo> = None;
        let mut retrieval_query = request.query.clone();
        let mut translation_warning: Option<String> = None;

        if request.enable_auto_translate {
            let lang_info = self.language.language_info(&detected_code);
            let mut translated_query = None;
            if detected_code != "en" {
                match self
                    .language
                    .translate(&request.query, &detected_code, "en")
                    .await
                {
                    Ok(text) => {
                        recorder.insight(format!(
                            "Query translated from {} to English for retrieval",
                            lang_info.name
                        ));
                        retrieval_query = text.clone();
                        translated_query = Some(text);
                    }
                    Err(e) => {
                        translation_warning =
                            Some(format!("query translation failed ({e}), using original text"));
                    }
                }
            }
            translation_info = Some(TranslationInfo {
                detected_language: detected_code.clone(),
                detected_language_name: lang_info.name,
                detection_confidence: detect_confidence,
                translated_query,
                response_translated: false,
            });
        }

        // The answer language: forced target wins, else the detected
        // non-English query language, else English.
        let answer_language = request
            .target_language
            .clone()
            .or_else(|| (detected_code != "en").then(|| detected_code.clone()))
            .filter(|code| code != "en");

        // -- stage 1: query analysis ---------------------------------------
        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::QueryAnalysis,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let analyzed = self.analyzer.analyze(&retrieval_query, request.persona);
        let analysis_status = if translation_warning.is_some() {
            StepStatus::Warning
        } else {
            StepStatus::Completed
        };
        if let Some(warning) = &translation_warning {
            recorder.insight(warning.clone());
        }
        recorder.record(
            StepType::QueryAnalysis,
            "Query Analysis",
            translation_warning
                .clone()
                .unwrap_or_else(|| "Classified intent and selected modalities.".to_string()),
            step_details! {
                "intents" => &analyzed.intents,
                "required_modalities" => &analyzed.required_modalities,
                "keywords" => &analyzed.keywords,
                "persona" => request.persona.as_str(),
            },
            Vec::new(),
            analysis_status,
            stage,
        );

        // -- stage 2: retrieval --------------------------------------------
        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::Retrieval,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let top_k = request
            .top_k
            .unwrap_or(self.config.retrieval.default_top_k)
            .clamp(1, MAX_TOP_K);
        let retrieved = self.retriever.retrieve(&analyzed, &detected_code, top_k);
        let mean_relevance = if retrieved.is_empty() {
            0.0
        } else {
            retrieved.iter().map(|r| r.relevance).sum::<f32>() / retrieved.len() as f32
        };
        let retrieval_status = if retrieved.is_empty() || mean_relevance < 0.5 {
            if retrieved.is_empty() {
                recorder.insight("No relevant sources found in the corpus");
            } else {
                recorder.insight(format!(
                    "Low average relevance ({mean_relevance:.2}), results may be tangential"
                ));
            }
            StepStatus::Warning
        } else {
            recorder.insight(format!(
                "Retrieved {} sources with mean relevance {mean_relevance:.2}",
                retrieved.len()
            ));
            StepStatus::Completed
        };
        recorder.record(
            StepType::Retrieval,
            "Evidence Retrieval",
            format!(
                "Retrieved {} chunk(s) across {} modality(ies).",
                retrieved.len(),
                retrieved
                    .iter()
                    .map(|r| r.chunk.modality)
                    .collect::<BTreeSet<_>>()
                    .len()
            ),
            step_details! {
                "sources_retrieved" => retrieved.len(),
                "mean_relevance" => mean_relevance,
                "top_k" => top_k,
            },
            step_sources(&retrieved),
            retrieval_status,
            stage,
        );

        // -- stage 3: confidence -------------------------------------------
        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::ConfidenceAssessment,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let breakdown = self.confidence.score(&retrieved);
        recorder.insight(format!(
            "Confidence {}: {:.2}",
            breakdown.level, breakdown.score
        ));
        recorder.record(
            StepType::ConfidenceAssessment,
            "Confidence Assessment",
            format!(
                "Evidence confidence is {} ({:.2}).",
                breakdown.level, breakdown.score
            ),
            step_details! {
                "score" => breakdown.score,
                "level" => breakdown.level.to_string(),
                "factors" => breakdown.factors.iter().map(|f| format!("{}={:.2}", f.name, f.score)).collect::<Vec<_>>(),
            },
            Vec::new(),
            if breakdown.level == crate::types::ConfidenceLevel::Low {
                StepStatus::Warning
            } else {
                StepStatus::Completed
            },
            stage,
        );

        // -- stage 4: conflict detection -----------------------------------
        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::ConflictDetection,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let conflicts = self.conflicts.detect(&retrieved);
        if !conflicts.is_empty() {
            recorder.insight(format!(
                "Detected {} conflicting perspective pair(s)",
                conflicts.len()
            ));
        }
        recorder.record(
            StepType::ConflictDetection,
            "Conflict Detection",
            if conflicts.is_empty() {
                "No contradictions found between sources.".to_string()
            } else {
                format!("{} contradiction(s) detected between sources.", conflicts.len())
            },
            step_details! { "conflicts_found" => conflicts.len() },
            Vec::new(),
            if conflicts.is_empty() {
                StepStatus::Completed
            } else {
                StepStatus::Warning
            },
            stage,
        );

        // -- stage 5: strategy ---------------------------------------------
        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::ResponseStrategy,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let decision = self
            .strategist
            .decide(&breakdown, &conflicts, request.persona, request.debate);
        recorder.record(
            StepType::ResponseStrategy,
            "Response Strategy",
            format!("Selected strategy {}: {}", decision.strategy, decision.reason),
            step_details! {
                "strategy" => decision.strategy.to_string(),
                "reason" => decision.reason,
            },
            Vec::new(),
            StepStatus::Completed,
            stage,
        );

        // -- stage 6: generation -------------------------------------------
        if decision.strategy == Strategy::Refuse {
            // No LLM involvement: the refusal text is templated from what
            // is missing and what would unblock it.
            let reason = refusal_reason(&retrieved, &breakdown);
            let sources = response_sources(&retrieved);
            let chain = request
                .include_reasoning_chain
                .then(|| recorder.finish(FinalDecision::Refused));
            return QueryResponse {
                query: request.query.clone(),
                answer: refusal_answer(&reason, &breakdown),
                confidence: breakdown.level,
                confidence_score: breakdown.score,
                confidence_breakdown: breakdown,
                sources,
                conflicts: (!conflicts.is_empty()).then_some(conflicts),
                refusal_reason: Some(reason),
                translation_info,
                reasoning_chain: chain,
                processing_time_ms: started.elapsed().as_millis() as u64,
            };
        }

        if let Some(response) = self.check_deadline(
            deadline,
            &request,
            &mut recorder,
            StepType::Generation,
            started,
        ) {
            return response;
        }
        let stage = recorder.stage_start();
        let params = request.persona.params();
        let answer_language_name = answer_language
            .as_ref()
            .map(|code| self.language.language_info(code).name);
        let generation_request = GenerationRequest {
            system_prompt: prompt::system_prompt(request.persona, decision.strategy),
            user_prompt: prompt::user_prompt(
                &retrieval_query,
                &retrieved,
                answer_language_name.as_deref(),
            ),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let generation = self.llm.generate(&generation_request).await;
        match generation {
            Ok(mut answer) => {
                recorder.record(
                    StepType::Generation,
                    "Response Generation",
                    format!("Generated {} response.", decision.strategy),
                    step_details! {
                        "strategy" => decision.strategy.to_string(),
                        "answer_chars" => answer.chars().count(),
                        "sources_cited" => retrieved.len(),
                    },
                    step_sources(&retrieved),
                    StepStatus::Completed,
                    stage,
                );

                // -- answer translation ------------------------------------
                let mut response_translated = false;
                if let Some(code) = &answer_language {
                    match self.language.translate(&answer, "en", code).await {
                        Ok(translated) => {
                            answer = translated;
                            response_translated = true;
                            recorder.insight(format!(
                                "Answer translated to {}",
                                self.language.language_info(code).name
                            ));
                        }
                        Err(e) => {
                            recorder.insight(format!(
                                "Answer translation unavailable ({e}), returning English"
                            ));
                        }
                    }
                }
                if let Some(info) = &mut translation_info {
                    info.response_translated = response_translated;
                }

                let final_decision = match decision.strategy {
                    Strategy::Answer => FinalDecision::Answered,
                    Strategy::Caveated => FinalDecision::Caveated,
                    Strategy::ConflictPresentation => FinalDecision::ConflictPresented,
                    Strategy::Refuse => FinalDecision::Refused,
                };
                let sources = response_sources(&retrieved);
                let chain = request
                    .include_reasoning_chain
                    .then(|| recorder.finish(final_decision));
                QueryResponse {
                    query: request.query.clone(),
                    answer,
                    confidence: breakdown.level,
                    confidence_score: breakdown.score,
                    confidence_breakdown: breakdown,
                    sources,
                    conflicts: (!conflicts.is_empty()).then_some(conflicts),
                    refusal_reason: None,
                    translation_info,
                    reasoning_chain: chain,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => {
                recorder.record(
                    StepType::Generation,
                    "Response Generation",
                    format!("All generation providers failed: {e}"),
                    step_details! { "error" => e.to_string() },
                    step_sources(&retrieved),
                    StepStatus::Error,
                    stage,
                );
                recorder.insight("Generation unavailable, refusing with evidence attached");
                let reason = format!(
                    "generation unavailable: {e}. The retrieved evidence is attached; retry \
                     once an LLM provider is reachable"
                );
                let sources = response_sources(&retrieved);
                let chain = request
                    .include_reasoning_chain
                    .then(|| recorder.finish(FinalDecision::Refused));
                QueryResponse {
                    query: request.query.clone(),
                    answer: refusal_answer(&reason, &breakdown),
                    confidence: breakdown.level,
                    confidence_score: breakdown.score,
                    confidence_breakdown: breakdown,
                    sources,
                    conflicts: (!conflicts.is_empty()).then_some(conflicts),
                    refusal_reason: Some(reason),
                    translation_info,
                    reasoning_chain: chain,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    /// Deadline gate at stage entry. Returns the terminal cancelled
    /// response when the budget is spent.
    fn check_deadline(
        &self,
        deadline: Option<Instant>,
        request: &QueryRequest,
        recorder: &mut ChainRecorder,
        stage_type: StepType,
        started: Instant,
    ) -> Option<QueryResponse> {
        let deadline = deadline?;
        if Instant::now() < deadline {
            return None;
        }
        let stage = recorder.stage_start();
        recorder.record(
            stage_type,
            "Cancelled",
            "Deadline exceeded before this stage could run.",
            step_details! { "deadline_ms" => request.deadline_ms },
            Vec::new(),
            StepStatus::Error,
            stage,
        );
        let mut recorder_owned = std::mem::replace(recorder, ChainRecorder::new(""));
        recorder_owned.insight("Query cancelled: deadline exceeded");
        Some(self.refusal_response(
            request,
            recorder_owned,
            Vec::new(),
            None,
            "cancelled: query deadline exceeded",
            started,
        ))
    }

    /// A refusal response assembled outside the normal generation path
    /// (too-short queries, cancellations).
    fn refusal_response(
        &self,
        request: &QueryRequest,
        recorder: ChainRecorder,
        retrieved: Vec<RetrievedChunk>,
        translation_info: Option<TranslationInfo>,
        reason: &str,
        started: Instant,
    ) -> QueryResponse {
        let breakdown = self.confidence.score(&retrieved);
        let sources = response_sources(&retrieved);
        let chain = request
            .include_reasoning_chain
            .then(|| recorder.finish(FinalDecision::Refused));
        QueryResponse {
            query: request.query.clone(),
            answer: refusal_answer(reason, &breakdown),
            confidence: breakdown.level,
            confidence_score: breakdown.score,
            confidence_breakdown: breakdown,
            sources,
            conflicts: None,
            refusal_reason: Some(reason.to_string()),
            translation_info,
            reasoning_chain: chain,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn step_sources(retrieved: &[RetrievedChunk]) -> Vec<SourceReference> {
    retrieved
        .iter()
        .take(STEP_SOURCE_LIMIT)
        .map(|r| SourceReference::from_chunk(&r.chunk, r.relevance))
        .collect()
}

fn response_sources(retrieved: &[RetrievedChunk]) -> Vec<SourceReference> {
    retrieved
        .iter()
        .map(|r| SourceReference::from_chunk(&r.chunk, r.relevance))
        .collect()
}

/// Enumerate what is missing for a refusal.
fn refusal_reason(retrieved: &[RetrievedChunk], breakdown: &crate::types::ConfidenceBreakdown) -> String {
    if retrieved.is_empty() {
        "no evidence retrieved from the corpus for this query".to_string()
    } else {
        format!(
            "retrieved evidence is too weak to answer reliably (confidence {:.2})",
            breakdown.score
        )
    }
}

/// Template the refusal answer text: what is missing, what would unblock.
fn refusal_answer(reason: &str, breakdown: &crate::types::ConfidenceBreakdown) -> String {
    let mut answer = format!("I cannot answer this reliably: {reason}.");
    if !breakdown.actionable_tips.is_empty() {
        answer.push_str("\n\nWhat would unblock an answer:");
        for tip in &breakdown.actionable_tips {
            answer.push_str(&format!("\n- {tip}"));
        }
    }
    answer
}
