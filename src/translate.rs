// ABOUTME: Translation adapter wrapping a generative-model REST backend
// ABOUTME: Degrades every failure to source-text fallbacks so callers never see an error

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TranslatorConfig;

/// Retries beyond the first attempt before the adapter degrades to fallbacks.
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Human-readable names improve translation accuracy over bare ISO codes.
const LANG_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("hi", "Hindi"),
    ("bn", "Bengali"),
    ("te", "Telugu"),
    ("mr", "Marathi"),
    ("ta", "Tamil"),
    ("ur", "Urdu"),
    ("gu", "Gujarati"),
    ("kn", "Kannada"),
    ("or", "Odia"),
    ("pa", "Punjabi"),
    ("ml", "Malayalam"),
    ("as", "Assamese"),
    ("mai", "Maithili"),
    ("sa", "Sanskrit"),
    ("ne", "Nepali"),
    ("ks", "Kashmiri"),
    ("sd", "Sindhi"),
    ("kok", "Konkani"),
    ("mni", "Manipuri"),
    ("brx", "Bodo"),
    ("doi", "Dogri"),
    ("sat", "Santali"),
];

fn language_name(code: &str) -> String {
    LANG_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_uppercase())
}

/// Raw batch-translation capability. May fail or return a partial map;
/// the `Translator` wrapper is what normalizes that for callers.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate_batch(
        &self,
        text: &str,
        targets: &[String],
    ) -> Result<HashMap<String, String>>;
}

/// Completed translation pass: one entry per requested language, plus a
/// warning for every language that fell back to the source text.
#[derive(Debug, Clone)]
pub struct Translation {
    pub translations: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl Translation {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct Translator {
    backend: Arc<dyn TranslationBackend>,
}

impl Translator {
    pub fn new(backend: Arc<dyn TranslationBackend>) -> Self {
        Self { backend }
    }

    /// Translate `text` into every language in `targets`. Never fails: any
    /// backend error or partial response degrades to the source text for the
    /// missing languages, with one warning per fallback.
    pub async fn translate(&self, text: &str, targets: &[String]) -> Translation {
        let mut backend_result: Option<HashMap<String, String>> = None;

        for attempt in 0..=MAX_RETRIES {
            match self.backend.translate_batch(text, targets).await {
                Ok(map) => {
                    backend_result = Some(map);
                    break;
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let delay = RETRY_BACKOFF * 2u32.pow(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Translation backend failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Translation backend failed, falling back to source text"
                    );
                }
            }
        }

        let partial = backend_result.unwrap_or_default();
        let mut translations = BTreeMap::new();
        let mut warnings = Vec::new();

        for lang in targets {
            match partial.get(lang) {
                Some(translated) if !translated.trim().is_empty() => {
                    translations.insert(lang.clone(), translated.clone());
                }
                _ => {
                    warnings.push(format!("missing translation for {}, using original", lang));
                    translations.insert(lang.clone(), text.to_string());
                }
            }
        }

        if !warnings.is_empty() {
            tracing::warn!(
                fallback_count = warnings.len(),
                total = targets.len(),
                "Translation degraded"
            );
        }

        Translation {
            translations,
            warnings,
        }
    }
}

// =============================================================================
// HTTP backend
// =============================================================================

/// Backend that asks a generative-model endpoint for a single JSON object
/// mapping language codes to translated text.
pub struct HttpTranslationBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslationBackend {
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build translation HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn build_prompt(text: &str, targets: &[String]) -> String {
        let lang_requests = targets
            .iter()
            .map(|code| format!("  \"{}\": \"{}\"", code, language_name(code)))
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "You are a professional translation service. Translate this emergency \
             message into the languages listed below.\n\n\
             Original message:\n{}\n\n\
             Languages (code to name):\n{{\n{}\n}}\n\n\
             Return ONLY a JSON object mapping each language code to the translated \
             text. No markdown code blocks, no explanations. Preserve the urgent tone \
             and use native scripts.",
            text, lang_requests
        )
    }
}

#[async_trait]
impl TranslationBackend for HttpTranslationBackend {
    async fn translate_batch(
        &self,
        text: &str,
        targets: &[String],
    ) -> Result<HashMap<String, String>> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Translation API key not configured")?;

        let prompt = Self::build_prompt(text, targets);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .context("Translation request failed")?
            .error_for_status()
            .context("Translation backend returned an error status")?;

        let payload: serde_json::Value = response
            .json()
            .await
            .context("Translation response was not valid JSON")?;

        let raw_text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .context("Translation response missing text content")?;

        parse_translation_json(raw_text)
    }
}

/// Extract the translation map from model output, tolerating markdown fences
/// and prose around the JSON object.
fn parse_translation_json(raw: &str) -> Result<HashMap<String, String>> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let start = cleaned.find('{').context("No JSON object in response")?;
    let end = cleaned.rfind('}').context("No JSON object in response")?;
    if end < start {
        anyhow::bail!("Malformed JSON object in response");
    }

    let value: serde_json::Value = serde_json::from_str(&cleaned[start..=end])
        .context("Failed to parse translation JSON")?;
    let object = value
        .as_object()
        .context("Translation JSON is not an object")?;

    let mut map = HashMap::new();
    for (lang, translated) in object {
        if let Some(s) = translated.as_str() {
            map.insert(lang.clone(), s.to_string());
        }
    }
    Ok(map)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct PartialBackend;

    #[async_trait]
    impl TranslationBackend for PartialBackend {
        async fn translate_batch(
            &self,
            _text: &str,
            _targets: &[String],
        ) -> Result<HashMap<String, String>> {
            let mut map = HashMap::new();
            map.insert("hi".to_string(), "अभी खाली करें".to_string());
            map.insert("en".to_string(), "Evacuate now".to_string());
            Ok(map)
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl TranslationBackend for FailingBackend {
        async fn translate_batch(
            &self,
            _text: &str,
            _targets: &[String],
        ) -> Result<HashMap<String, String>> {
            anyhow::bail!("backend unreachable")
        }
    }

    /// Fails the first call, then answers every target.
    struct RecoveringBackend {
        calls: std::sync::atomic::AtomicU32,
    }

    impl RecoveringBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: std::sync::atomic::AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TranslationBackend for RecoveringBackend {
        async fn translate_batch(
            &self,
            text: &str,
            targets: &[String],
        ) -> Result<HashMap<String, String>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                anyhow::bail!("connection reset")
            }
            Ok(targets
                .iter()
                .map(|lang| (lang.clone(), format!("[{}] {}", lang, text)))
                .collect())
        }
    }

    fn targets(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_response_falls_back_to_source() {
        let translator = Translator::new(Arc::new(PartialBackend));
        let result = translator
            .translate("Evacuate now", &targets(&["en", "hi", "ta"]))
            .await;

        assert_eq!(result.translations.len(), 3);
        assert_eq!(result.translations["en"], "Evacuate now");
        assert_eq!(result.translations["hi"], "अभी खाली करें");
        assert_eq!(result.translations["ta"], "Evacuate now");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_fills_every_language() {
        let translator = Translator::new(Arc::new(FailingBackend));
        let result = translator
            .translate("Evacuate now", &targets(&["en", "hi", "ta"]))
            .await;

        for lang in ["en", "hi", "ta"] {
            assert_eq!(result.translations[lang], "Evacuate now");
        }
        assert_eq!(result.warnings.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_without_degradation() {
        let backend = RecoveringBackend::new();
        let translator = Translator::new(backend.clone());

        let result = translator
            .translate("Evacuate now", &targets(&["en", "hi"]))
            .await;

        // Second attempt answered in full, so nothing fell back
        assert_eq!(
            backend.calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
        assert!(result.warnings.is_empty());
        assert!(!result.is_degraded());
        assert_eq!(result.translations["hi"], "[hi] Evacuate now");
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_keys_exactly_match_targets() {
        let translator = Translator::new(Arc::new(PartialBackend));
        let wanted = targets(&["ta", "mr"]);
        let result = translator.translate("Help", &wanted).await;

        let keys: Vec<&String> = result.translations.keys().collect();
        let mut expected: Vec<&String> = wanted.iter().collect();
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_parse_translation_json_plain() {
        let map = parse_translation_json(r#"{"en": "hello", "hi": "नमस्ते"}"#).unwrap();
        assert_eq!(map["en"], "hello");
        assert_eq!(map["hi"], "नमस्ते");
    }

    #[test]
    fn test_parse_translation_json_with_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"en\": \"hello\"}\n```\nDone.";
        let map = parse_translation_json(raw).unwrap();
        assert_eq!(map["en"], "hello");
    }

    #[test]
    fn test_parse_translation_json_skips_non_strings() {
        let map = parse_translation_json(r#"{"en": "hello", "count": 3}"#).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_parse_translation_json_rejects_garbage() {
        assert!(parse_translation_json("no json here").is_err());
    }

    #[test]
    fn test_language_name_known_and_unknown() {
        assert_eq!(language_name("hi"), "Hindi");
        assert_eq!(language_name("xx"), "XX");
    }

    #[test]
    fn test_prompt_lists_every_target() {
        let prompt =
            HttpTranslationBackend::build_prompt("Evacuate", &targets(&["en", "ta"]));
        assert!(prompt.contains("\"en\": \"English\""));
        assert!(prompt.contains("\"ta\": \"Tamil\""));
        assert!(prompt.contains("Evacuate"));
    }
}
