//! Audio processor: decode, transcribe, segment.
//!
//! Decoding goes through the external `ffmpeg` binary (16 kHz mono WAV);
//! transcription goes through the [`SttEngine`] trait so the pipeline can
//! run against whisper.cpp's `whisper-cli` in production and a mock in
//! tests. One AUDIO chunk is emitted per transcript segment, carrying its
//! timestamps and a confidence derived from the segment's average
//! log-probability and no-speech probability.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{info, warn};

use crate::error::ProcessingError;
use crate::ingest::text::file_name;
use crate::types::{Chunk, ChunkMetadata, Modality, SourceType};

// ---------------------------------------------------------------------------
// Transcript model
// ---------------------------------------------------------------------------

/// One timestamped segment of a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// Segment start in seconds.
    pub start: f32,
    /// Segment end in seconds.
    pub end: f32,
    pub text: String,
    /// Mean token log-probability reported by the decoder.
    pub avg_logprob: f32,
    /// Probability that the segment contains no speech.
    pub no_speech_prob: f32,
}

impl TranscriptSegment {
    /// Confidence derived from decoder statistics, clamped to [0.1, 1.0].
    pub fn confidence(&self) -> f32 {
        ((self.avg_logprob + 1.0) * (1.0 - self.no_speech_prob)).clamp(0.1, 1.0)
    }
}

/// A complete transcription result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    /// Total audio duration in seconds, when known.
    pub duration: f32,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// STT engine trait & implementations
// ---------------------------------------------------------------------------

/// Speech-to-text over a decoded 16 kHz mono WAV file.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(&self, wav_path: &Path) -> Result<Transcript, ProcessingError>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// STT via whisper.cpp's `whisper-cli` binary with JSON output.
pub struct WhisperCli {
    binary: PathBuf,
    model_path: PathBuf,
    language: String,
}

#[derive(Deserialize)]
struct WhisperJson {
    transcription: Vec<WhisperSegmentJson>,
    #[serde(default)]
    result: Option<WhisperResultJson>,
}

#[derive(Deserialize)]
struct WhisperResultJson {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct WhisperSegmentJson {
    offsets: WhisperOffsets,
    text: String,
    /// Per-token decode info, present with `--output-json-full`.
    #[serde(default)]
    tokens: Vec<WhisperTokenJson>,
}

#[derive(Deserialize)]
struct WhisperTokenJson {
    #[serde(default)]
    text: String,
    /// Decoder probability for this token.
    #[serde(default)]
    p: Option<f32>,
}

impl WhisperTokenJson {
    /// Special markers ("[_BEG_]", timestamp tokens) carry no acoustic
    /// evidence.
    fn is_word(&self) -> bool {
        !self.text.trim_start().starts_with("[_")
    }
}

#[derive(Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

/// Fallback when a segment arrives without token probabilities (older
/// whisper.cpp builds, or plain `-oj` output).
const FALLBACK_AVG_LOGPROB: f32 = -0.3;

/// Tokens per second of ordinary speech; segments far sparser than this
/// decoded mostly from silence.
const SPEECH_TOKEN_DENSITY: f32 = 2.0;

/// Mean ln(p) over the segment's word tokens.
fn segment_avg_logprob(tokens: &[WhisperTokenJson]) -> f32 {
    let probs: Vec<f32> = tokens
        .iter()
        .filter(|t| t.is_word())
        .filter_map(|t| t.p)
        .filter(|p| *p > 0.0)
        .collect();
    if probs.is_empty() {
        return FALLBACK_AVG_LOGPROB;
    }
    probs.iter().map(|p| p.ln()).sum::<f32>() / probs.len() as f32
}

/// The CLI does not surface the decoder's no-speech probability, so
/// estimate it from token density: near-silent stretches decode to very
/// few word tokens per second. An entirely absent token list means the
/// output carried no token info at all, not silence.
fn no_speech_proxy(tokens: &[WhisperTokenJson], duration_secs: f32) -> f32 {
    if tokens.is_empty() || duration_secs <= 0.0 {
        return 0.0;
    }
    let word_tokens = tokens.iter().filter(|t| t.is_word()).count();
    let density = word_tokens as f32 / duration_secs;
    (1.0 - density / SPEECH_TOKEN_DENSITY).clamp(0.0, 0.9)
}

impl WhisperCli {
    /// Probe for the binary and construct the engine.
    pub async fn detect(
        model_path: impl Into<PathBuf>,
        language: impl Into<String>,
    ) -> Result<Self, ProcessingError> {
        let binary = PathBuf::from("whisper-cli");
        let probe = tokio::process::Command::new(&binary)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match probe {
            Ok(_) => Ok(Self {
                binary,
                model_path: model_path.into(),
                language: language.into(),
            }),
            Err(e) => Err(ProcessingError::DependencyMissing {
                binary: "whisper-cli".into(),
                detail: e.to_string(),
            }),
        }
    }

    /// Convert the CLI's full-JSON output into a [`Transcript`], deriving
    /// per-segment decoder statistics from the token probabilities.
    fn parse_transcript(raw: &str) -> Result<Transcript, serde_json::Error> {
        let parsed: WhisperJson = serde_json::from_str(raw)?;

        let segments: Vec<TranscriptSegment> = parsed
            .transcription
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| {
                let start = s.offsets.from as f32 / 1000.0;
                let end = s.offsets.to as f32 / 1000.0;
                TranscriptSegment {
                    start,
                    end,
                    text: s.text.trim().to_string(),
                    avg_logprob: segment_avg_logprob(&s.tokens),
                    no_speech_prob: no_speech_proxy(&s.tokens, end - start),
                }
            })
            .collect();

        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);
        Ok(Transcript {
            text: segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            language: parsed.result.and_then(|r| r.language),
            duration,
            segments,
        })
    }
}

#[async_trait]
impl SttEngine for WhisperCli {
    async fn transcribe(&self, wav_path: &Path) -> Result<Transcript, ProcessingError> {
        let json_base = wav_path.with_extension("whisper");
        let output = tokio::process::Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(wav_path)
            // -ojf: full JSON with per-token probabilities
            .args(["-l", &self.language, "-ojf", "-of"])
            .arg(&json_base)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ProcessingError::DependencyMissing {
                binary: "whisper-cli".into(),
                detail: e.to_string(),
            })?;
        if !output.success() {
            return Err(ProcessingError::Corrupt {
                path: wav_path.to_path_buf(),
                detail: format!("whisper-cli exited with {output}"),
            });
        }

        let json_path = json_base.with_extension("whisper.json");
        let raw = std::fs::read_to_string(&json_path).map_err(|e| ProcessingError::Corrupt {
            path: json_path.clone(),
            detail: format!("missing transcript output: {e}"),
        })?;
        let _ = std::fs::remove_file(&json_path);

        Self::parse_transcript(&raw).map_err(|e| ProcessingError::Corrupt {
            path: json_path,
            detail: format!("bad transcript json: {e}"),
        })
    }

    fn name(&self) -> &str {
        "whisper-cli"
    }
}

/// Placeholder engine used when no STT backend could be detected at
/// startup: every call reports the missing dependency, so only audio
/// ingest is affected.
pub struct UnavailableStt {
    detail: String,
}

impl UnavailableStt {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl SttEngine for UnavailableStt {
    async fn transcribe(&self, _wav_path: &Path) -> Result<Transcript, ProcessingError> {
        Err(ProcessingError::DependencyMissing {
            binary: "whisper-cli".into(),
            detail: self.detail.clone(),
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// A mock STT engine for tests: returns queued transcripts in order and
/// an empty transcript once the queue drains.
pub struct MockSttEngine {
    responses: std::sync::Mutex<Vec<Transcript>>,
}

impl MockSttEngine {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, transcript: Transcript) {
        self.responses.lock().unwrap().push(transcript);
    }

    /// Queue a single-segment transcript, the common test case.
    pub fn queue_text(&self, text: &str, avg_logprob: f32, no_speech_prob: f32) {
        self.queue(Transcript {
            text: text.to_string(),
            language: Some("en".to_string()),
            duration: 4.0,
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 4.0,
                text: text.to_string(),
                avg_logprob,
                no_speech_prob,
            }],
        });
    }
}

impl Default for MockSttEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttEngine for MockSttEngine {
    async fn transcribe(&self, _wav_path: &Path) -> Result<Transcript, ProcessingError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Transcript::default())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct AudioProcessor {
    /// Skip the ffmpeg decode step for inputs that are already WAV.
    decode_with_ffmpeg: bool,
}

impl AudioProcessor {
    pub fn new() -> Self {
        Self {
            decode_with_ffmpeg: true,
        }
    }

    /// A processor that feeds input files straight to the STT engine,
    /// for tests and pre-decoded WAV input.
    pub fn without_decode() -> Self {
        Self {
            decode_with_ffmpeg: false,
        }
    }

    pub async fn process(
        &self,
        path: &Path,
        stt: &dyn SttEngine,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let source_file = file_name(path);

        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let (wav_path, scratch) = if self.decode_with_ffmpeg && !is_wav {
            let decoded = decode_to_wav(path).await?;
            (decoded.clone(), Some(decoded))
        } else {
            (path.to_path_buf(), None)
        };

        let duration = wav_duration_secs(&wav_path);
        let transcript = stt.transcribe(&wav_path).await;
        if let Some(scratch) = scratch {
            let _ = std::fs::remove_file(scratch);
        }
        let transcript = transcript?;

        if transcript.is_empty() {
            warn!(file = %source_file, "No speech detected in audio");
            let mut metadata = ChunkMetadata {
                duration: duration.or(Some(transcript.duration)),
                ..Default::default()
            };
            metadata
                .extra
                .insert("status".to_string(), "failed".to_string());
            metadata
                .extra
                .insert("note".to_string(), "no speech detected".to_string());
            let chunk = Chunk::new(Modality::Audio, "", source_file, SourceType::UploadedAudio)
                .with_confidence(0.1)
                .with_metadata(metadata);
            return Ok(vec![chunk]);
        }

        let file_duration = duration.unwrap_or(transcript.duration);
        let chunks: Vec<Chunk> = transcript
            .segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|segment| {
                Chunk::new(
                    Modality::Audio,
                    segment.text.clone(),
                    source_file.clone(),
                    SourceType::UploadedAudio,
                )
                .with_confidence(segment.confidence())
                .with_metadata(ChunkMetadata {
                    segment_start: Some(segment.start),
                    segment_end: Some(segment.end),
                    duration: Some(file_duration),
                    transcription_confidence: Some(segment.confidence()),
                    language: transcript.language.clone(),
                    ..Default::default()
                })
            })
            .collect();

        info!(
            file = %source_file,
            segments = chunks.len(),
            chars = transcript.text.len(),
            "Transcribed audio"
        );
        Ok(chunks)
    }
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode any audio container to 16 kHz mono WAV via ffmpeg.
async fn decode_to_wav(path: &Path) -> Result<PathBuf, ProcessingError> {
    let out = path.with_extension("evidra.wav");
    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-i"])
        .arg(path)
        .args(["-ar", "16000", "-ac", "1", "-f", "wav"])
        .arg(&out)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| ProcessingError::DependencyMissing {
            binary: "ffmpeg".into(),
            detail: e.to_string(),
        })?;
    if !status.success() {
        return Err(ProcessingError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("ffmpeg decode exited with {status}"),
        });
    }
    Ok(out)
}

/// Probe a WAV file's duration, if it parses.
fn wav_duration_secs(path: &Path) -> Option<f32> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f32 / spec.sample_rate as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(dir: &Path, name: &str, seconds: f32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(16_000.0 * seconds) as usize {
            let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_segment_confidence_formula() {
        let good = TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: "hello".into(),
            avg_logprob: -0.1,
            no_speech_prob: 0.0,
        };
        assert!((good.confidence() - 0.9).abs() < 0.01);

        let poor = TranscriptSegment {
            start: 0.0,
            end: 1.0,
            text: "mumble".into(),
            avg_logprob: -0.9,
            no_speech_prob: 0.5,
        };
        assert!((poor.confidence() - 0.1).abs() < 0.01);
    }

    fn token(text: &str, p: f32) -> WhisperTokenJson {
        WhisperTokenJson {
            text: text.to_string(),
            p: Some(p),
        }
    }

    #[test]
    fn test_segment_avg_logprob_is_mean_ln_p() {
        let tokens = vec![token(" the", 0.9), token(" voltage", 0.9)];
        let avg = segment_avg_logprob(&tokens);
        assert!((avg - 0.9f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_segment_avg_logprob_skips_special_tokens() {
        let tokens = vec![
            token("[_BEG_]", 0.01),
            token(" stable", 0.8),
            token("[_TT_150]", 0.02),
        ];
        let avg = segment_avg_logprob(&tokens);
        assert!((avg - 0.8f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_segment_avg_logprob_fallback_without_probabilities() {
        assert_eq!(segment_avg_logprob(&[]), FALLBACK_AVG_LOGPROB);
        let no_p = vec![WhisperTokenJson {
            text: " word".to_string(),
            p: None,
        }];
        assert_eq!(segment_avg_logprob(&no_p), FALLBACK_AVG_LOGPROB);
    }

    #[test]
    fn test_no_speech_proxy_tracks_token_density() {
        // dense speech: 8 word tokens over 4 seconds
        let dense: Vec<WhisperTokenJson> = (0..8).map(|_| token(" word", 0.9)).collect();
        assert_eq!(no_speech_proxy(&dense, 4.0), 0.0);

        // sparse decode: 1 token over 4 seconds looks mostly silent
        let sparse = vec![token(" word", 0.9)];
        let proxy = no_speech_proxy(&sparse, 4.0);
        assert!(proxy > 0.5 && proxy <= 0.9);

        assert_eq!(no_speech_proxy(&sparse, 0.0), 0.0);
        // missing token info is not evidence of silence
        assert_eq!(no_speech_proxy(&[], 4.0), 0.0);
    }

    #[test]
    fn test_parse_transcript_derives_confidence_from_tokens() {
        let raw = r#"{
            "systeminfo": "AVX = 1",
            "result": {"language": "en"},
            "transcription": [
                {
                    "timestamps": {"from": "00:00:00,000", "to": "00:00:04,000"},
                    "offsets": {"from": 0, "to": 4000},
                    "text": " the voltage is stable",
                    "tokens": [
                        {"text": "[_BEG_]", "id": 50363, "p": 0.99},
                        {"text": " the", "id": 262, "p": 0.97},
                        {"text": " voltage", "id": 1001, "p": 0.95},
                        {"text": " is", "id": 318, "p": 0.96},
                        {"text": " stable", "id": 2002, "p": 0.94},
                        {"text": " and", "id": 290, "p": 0.95},
                        {"text": " steady", "id": 3003, "p": 0.93},
                        {"text": " today", "id": 4004, "p": 0.96},
                        {"text": " here", "id": 5005, "p": 0.95}
                    ]
                },
                {
                    "timestamps": {"from": "00:00:04,000", "to": "00:00:08,000"},
                    "offsets": {"from": 4000, "to": 8000},
                    "text": " hm",
                    "tokens": [
                        {"text": "[_BEG_]", "id": 50363, "p": 0.99},
                        {"text": " hm", "id": 6006, "p": 0.3}
                    ]
                }
            ]
        }"#;

        let transcript = WhisperCli::parse_transcript(raw).unwrap();
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 2);
        assert!((transcript.duration - 8.0).abs() < 1e-5);

        let clear = &transcript.segments[0];
        let mumble = &transcript.segments[1];
        // high token probabilities and dense decode: strong confidence
        assert!(clear.confidence() > 0.85, "got {}", clear.confidence());
        // one low-probability token over four seconds: weak confidence
        assert!(mumble.confidence() < 0.3, "got {}", mumble.confidence());
        assert!(clear.confidence() > mumble.confidence());
    }

    #[test]
    fn test_parse_transcript_without_token_info_uses_fallback() {
        let raw = r#"{
            "transcription": [
                {
                    "offsets": {"from": 0, "to": 2000},
                    "text": " short clip"
                }
            ]
        }"#;
        let transcript = WhisperCli::parse_transcript(raw).unwrap();
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].avg_logprob, FALLBACK_AVG_LOGPROB);
    }

    #[tokio::test]
    async fn test_process_emits_chunk_per_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "meeting.wav", 1.0);

        let stt = MockSttEngine::new();
        stt.queue(Transcript {
            text: "the voltage is stable. we checked twice.".into(),
            language: Some("en".into()),
            duration: 8.0,
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 4.0,
                    text: "the voltage is stable.".into(),
                    avg_logprob: -0.2,
                    no_speech_prob: 0.05,
                },
                TranscriptSegment {
                    start: 4.0,
                    end: 8.0,
                    text: "we checked twice.".into(),
                    avg_logprob: -0.4,
                    no_speech_prob: 0.1,
                },
            ],
        });

        let chunks = AudioProcessor::without_decode()
            .process(&path, &stt)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.modality == Modality::Audio));
        assert_eq!(chunks[0].metadata.segment_start, Some(0.0));
        assert_eq!(chunks[0].metadata.segment_end, Some(4.0));
        assert_eq!(chunks[1].metadata.segment_start, Some(4.0));
        assert!(chunks[0].metadata.transcription_confidence.unwrap() > 0.5);
        // duration read from the WAV header
        assert!((chunks[0].metadata.duration.unwrap() - 1.0).abs() < 0.05);
    }

    #[tokio::test]
    async fn test_empty_transcript_yields_failed_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "silence.wav", 0.5);

        let stt = MockSttEngine::new(); // empty queue -> empty transcript
        let chunks = AudioProcessor::without_decode()
            .process(&path, &stt)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.is_empty());
        assert_eq!(
            chunks[0].metadata.extra.get("status").map(String::as_str),
            Some("failed")
        );
    }

    #[tokio::test]
    async fn test_segment_language_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "talk.wav", 0.5);
        let stt = MockSttEngine::new();
        stt.queue_text("reset by holding the power button", -0.2, 0.0);

        let chunks = AudioProcessor::without_decode()
            .process(&path, &stt)
            .await
            .unwrap();
        assert_eq!(chunks[0].metadata.language.as_deref(), Some("en"));
    }
}
