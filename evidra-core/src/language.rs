//! Language detection and translation.
//!
//! Detection is local (whatlang); translation goes through the
//! [`Translator`] trait so the engine can run against a
//! LibreTranslate-compatible endpoint in production and a mock in tests.
//! Translation failure is never fatal: callers proceed with the original
//! text and record a warning step.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::TranslationError;
use crate::types::LanguageInfo;

/// Detection below this confidence is treated as English.
pub const DETECTION_CONFIDENCE_FLOOR: f32 = 0.5;

/// The finite set of supported languages: `(code, name, flag)`.
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("en", "English", "\u{1F1EC}\u{1F1E7}"),
    ("hi", "Hindi", "\u{1F1EE}\u{1F1F3}"),
    ("es", "Spanish", "\u{1F1EA}\u{1F1F8}"),
    ("fr", "French", "\u{1F1EB}\u{1F1F7}"),
    ("de", "German", "\u{1F1E9}\u{1F1EA}"),
    ("zh", "Chinese", "\u{1F1E8}\u{1F1F3}"),
    ("ja", "Japanese", "\u{1F1EF}\u{1F1F5}"),
    ("ko", "Korean", "\u{1F1F0}\u{1F1F7}"),
    ("ar", "Arabic", "\u{1F1F8}\u{1F1E6}"),
    ("ru", "Russian", "\u{1F1F7}\u{1F1FA}"),
    ("pt", "Portuguese", "\u{1F1F5}\u{1F1F9}"),
    ("it", "Italian", "\u{1F1EE}\u{1F1F9}"),
    ("nl", "Dutch", "\u{1F1F3}\u{1F1F1}"),
    ("pl", "Polish", "\u{1F1F5}\u{1F1F1}"),
    ("tr", "Turkish", "\u{1F1F9}\u{1F1F7}"),
    ("vi", "Vietnamese", "\u{1F1FB}\u{1F1F3}"),
    ("th", "Thai", "\u{1F1F9}\u{1F1ED}"),
    ("id", "Indonesian", "\u{1F1EE}\u{1F1E9}"),
    ("bn", "Bengali", "\u{1F1E7}\u{1F1E9}"),
    ("ta", "Tamil", "\u{1F1EE}\u{1F1F3}"),
    ("te", "Telugu", "\u{1F1EE}\u{1F1F3}"),
    ("mr", "Marathi", "\u{1F1EE}\u{1F1F3}"),
    ("gu", "Gujarati", "\u{1F1EE}\u{1F1F3}"),
    ("kn", "Kannada", "\u{1F1EE}\u{1F1F3}"),
    ("ml", "Malayalam", "\u{1F1EE}\u{1F1F3}"),
    ("pa", "Punjabi", "\u{1F1EE}\u{1F1F3}"),
    ("ur", "Urdu", "\u{1F1F5}\u{1F1F0}"),
];

/// Map a whatlang language to our ISO 639-1 code, when supported.
fn lang_to_code(lang: whatlang::Lang) -> Option<&'static str> {
    use whatlang::Lang;
    let code = match lang {
        Lang::Eng => "en",
        Lang::Hin => "hi",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Ara => "ar",
        Lang::Rus => "ru",
        Lang::Por => "pt",
        Lang::Ita => "it",
        Lang::Nld => "nl",
        Lang::Pol => "pl",
        Lang::Tur => "tr",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        Lang::Ben => "bn",
        Lang::Tam => "ta",
        Lang::Tel => "te",
        Lang::Mar => "mr",
        Lang::Guj => "gu",
        Lang::Kan => "kn",
        Lang::Mal => "ml",
        Lang::Pan => "pa",
        Lang::Urd => "ur",
        _ => return None,
    };
    Some(code)
}

// ---------------------------------------------------------------------------
// Translator trait & implementations
// ---------------------------------------------------------------------------

/// Text translation between two supported language codes.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Translator for a LibreTranslate-compatible HTTP endpoint.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        let mut body = serde_json::json!({
            "q": text,
            "source": source_lang,
            "target": target_lang,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = serde_json::json!(key);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslationError::RequestFailed {
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TranslationError::RequestFailed {
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
                message: format!("endpoint returned {}", response.status()),
            });
        }

        let parsed: TranslateResponse =
            response
                .json()
                .await
                .map_err(|e| TranslationError::RequestFailed {
                    source_lang: source_lang.to_string(),
                    target_lang: target_lang.to_string(),
                    message: format!("bad response body: {e}"),
                })?;
        Ok(parsed.translated_text)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// A mock translator for tests: returns queued translations in order, or
/// echoes the input tagged with the target language when the queue is
/// empty.
pub struct MockTranslator {
    responses: std::sync::Mutex<Vec<String>>,
    fail: bool,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A mock that fails every call, for exercising the warning path.
    pub fn failing() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn queue(&self, translation: impl Into<String>) {
        self.responses.lock().unwrap().push(translation.into());
    }
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if self.fail {
            return Err(TranslationError::Unavailable {
                message: "mock translator configured to fail".into(),
            });
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            let _ = source_lang;
            Ok(format!("[{target_lang}] {text}"))
        } else {
            Ok(responses.remove(0))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Language service
// ---------------------------------------------------------------------------

/// Holds no per-request state; safe to share across queries.
pub struct LanguageService {
    translator: Option<Arc<dyn Translator>>,
}

impl LanguageService {
    pub fn new(translator: Option<Arc<dyn Translator>>) -> Self {
        Self { translator }
    }

    /// Detect the language of `text`, returning `(code, confidence)`.
    ///
    /// Very short text and low-confidence detections fall back to English,
    /// since the corpus is English-dominant.
    pub fn detect(&self, text: &str) -> (String, f32) {
        let trimmed = text.trim();
        if trimmed.chars().count() < 3 {
            return ("en".to_string(), 0.0);
        }

        match whatlang::detect(trimmed) {
            Some(info) => {
                let confidence = info.confidence() as f32;
                // Non-Latin scripts cannot be English; the confidence
                // floor only guards Latin-script ambiguity.
                let non_latin = info.script() != whatlang::Script::Latin;
                match lang_to_code(info.lang()) {
                    Some(code) if confidence >= DETECTION_CONFIDENCE_FLOOR || non_latin => {
                        debug!(lang = code, confidence, "Detected query language");
                        (code.to_string(), confidence)
                    }
                    Some(code) => {
                        debug!(
                            lang = code,
                            confidence, "Low-confidence detection, treating as English"
                        );
                        ("en".to_string(), confidence)
                    }
                    None => ("en".to_string(), 0.0),
                }
            }
            None => ("en".to_string(), 0.0),
        }
    }

    /// Translate text between two codes. Returns an error when no
    /// translator is configured or the provider fails; callers treat both
    /// as a recoverable warning.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if source_lang == target_lang {
            return Ok(text.to_string());
        }
        let Some(translator) = &self.translator else {
            return Err(TranslationError::Unavailable {
                message: "no translator configured".into(),
            });
        };
        match translator.translate(text, source_lang, target_lang).await {
            Ok(translated) => Ok(translated),
            Err(e) => {
                warn!(provider = translator.name(), error = %e, "Translation failed");
                Err(e)
            }
        }
    }

    /// Whether a translator is configured at all.
    pub fn can_translate(&self) -> bool {
        self.translator.is_some()
    }

    /// Display info for a code; unknown codes get a generic globe entry.
    pub fn language_info(&self, code: &str) -> LanguageInfo {
        LANGUAGES
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(c, name, flag)| LanguageInfo {
                code: c.to_string(),
                name: name.to_string(),
                flag: flag.to_string(),
            })
            .unwrap_or(LanguageInfo {
                code: code.to_string(),
                name: code.to_uppercase(),
                flag: "\u{1F310}".to_string(),
            })
    }

    /// The enumerated supported-language table.
    pub fn supported(&self) -> Vec<LanguageInfo> {
        LANGUAGES
            .iter()
            .map(|(code, name, flag)| LanguageInfo {
                code: code.to_string(),
                name: name.to_string(),
                flag: flag.to_string(),
            })
            .collect()
    }
}
