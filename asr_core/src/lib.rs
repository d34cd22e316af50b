use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
pub const DEFAULT_MODEL: &str = "whisper-1";

/// Word with timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

/// Transcription of one audio file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: Option<String>,
    pub duration: f64,
    pub text: String,
    pub segments: Vec<Segment>,
    pub words: Vec<Word>,
}

/// Speech recognition over a WAV file on disk.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path, language: Option<&str>) -> Result<Transcript>;
}

/// Structure for the `verbose_json` transcription response
#[derive(Debug, Deserialize)]
struct VerboseResponse {
    language: Option<String>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    words: Vec<RawWord>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    start: f64,
    end: Option<f64>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawWord {
    start: Option<f64>,
    end: Option<f64>,
    #[serde(alias = "text", default)]
    word: String,
}

impl Transcript {
    /// Build a transcript from a `verbose_json` body. Top-level words are
    /// assigned to the segment whose time span contains their start; words
    /// without timestamps are dropped.
    pub fn from_verbose_json(body: &str) -> Result<Self> {
        let raw: VerboseResponse =
            serde_json::from_str(body).context("malformed transcription response")?;

        let words: Vec<Word> = raw
            .words
            .into_iter()
            .filter_map(|w| match (w.start, w.end) {
                (Some(start), Some(end)) => Some(Word {
                    start,
                    end,
                    text: w.word.trim().to_string(),
                }),
                _ => None,
            })
            .collect();

        let seg_count = raw.segments.len();
        let mut segments: Vec<Segment> = Vec::with_capacity(seg_count);
        for (i, seg) in raw.segments.into_iter().enumerate() {
            let end = seg.end.unwrap_or(seg.start);
            let last = i + 1 == seg_count;
            let inside: Vec<Word> = words
                .iter()
                .filter(|w| w.start >= seg.start && (w.start < end || (last && w.start <= end)))
                .cloned()
                .collect();
            segments.push(Segment {
                start: seg.start,
                end,
                text: seg.text.trim().to_string(),
                words: if inside.is_empty() { None } else { Some(inside) },
            });
        }

        let text = if raw.text.trim().is_empty() {
            segments
                .iter()
                .map(|s| s.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            raw.text.trim().to_string()
        };

        Ok(Self {
            language: raw.language,
            duration: raw.duration,
            text,
            segments,
            words,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl AsrConfig {
    /// Reads `ASR_API_URL`, `ASR_API_KEY` (or `OPENAI_API_KEY`),
    /// `WHISPER_MODEL` and `ASR_TIMEOUT_SECS`. Returns `None` when no key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("ASR_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .filter(|k| !k.trim().is_empty())?;

        Some(Self {
            api_url: lookup("ASR_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            model: lookup("WHISPER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(
                lookup("ASR_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        })
    }
}

/// Client for a Whisper-compatible `/audio/transcriptions` endpoint.
pub struct WhisperApiClient {
    config: AsrConfig,
    client: Client,
}

impl WhisperApiClient {
    pub fn new(config: AsrConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        info!("Transcription via {} ({})", config.api_url, config.model);
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl Transcriber for WhisperApiClient {
    async fn transcribe(&self, path: &Path, language: Option<&str>) -> Result<Transcript> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        debug!("transcribing {} ({} bytes)", file_name, bytes.len());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");
        if let Some(lang) = language.filter(|l| !l.is_empty()) {
            form = form.text("language", lang.to_string());
        }

        let body = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()? // convert non-200 into error
            .text()
            .await?;

        Transcript::from_verbose_json(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"{
        "task": "transcribe",
        "language": "english",
        "duration": 4.1,
        "text": " hello there general kenobi ",
        "segments": [
            {"id": 0, "start": 0.0, "end": 2.0, "text": " hello there"},
            {"id": 1, "start": 2.0, "end": 4.1, "text": " general kenobi"}
        ],
        "words": [
            {"word": "hello", "start": 0.1, "end": 0.6},
            {"word": "there", "start": 0.7, "end": 1.9},
            {"word": "general", "start": 2.0, "end": 2.8},
            {"word": "kenobi", "start": 2.9, "end": 4.1},
            {"word": "lost"}
        ]
    }"#;

    #[test]
    fn test_verbose_json_assigns_words_to_segments() {
        let t = Transcript::from_verbose_json(SAMPLE).unwrap();
        assert_eq!(t.language.as_deref(), Some("english"));
        assert_eq!(t.text, "hello there general kenobi");
        assert_eq!(t.words.len(), 4);
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].text, "hello there");

        let first: Vec<&str> = t.segments[0]
            .words
            .as_ref()
            .unwrap()
            .iter()
            .map(|w| w.text.as_str())
            .collect();
        assert_eq!(first, vec!["hello", "there"]);
        assert_eq!(t.segments[1].words.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_text_falls_back_to_segments() {
        let body = r#"{"language": "it", "duration": 1.0, "text": "",
            "segments": [{"start": 0.0, "end": 0.5, "text": " ciao "}, {"start": 0.5, "end": 1.0, "text": ""}]}"#;
        let t = Transcript::from_verbose_json(body).unwrap();
        assert_eq!(t.text, "ciao");
        assert!(t.words.is_empty());
        assert!(t.segments.iter().all(|s| s.words.is_none()));
    }

    #[test]
    fn test_segment_without_words_omits_field() {
        let body = r#"{"duration": 0.5, "text": "x", "segments": [{"start": 0.0, "end": 0.5, "text": "x"}]}"#;
        let t = Transcript::from_verbose_json(body).unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert!(json["segments"][0].get("words").is_none());
        assert!(json["language"].is_null());
    }

    #[test]
    fn test_malformed_body_is_error() {
        assert!(Transcript::from_verbose_json("not json").is_err());
    }

    #[test]
    fn test_config_requires_key() {
        let vars: HashMap<&str, &str> = HashMap::new();
        assert!(AsrConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).is_none());

        let vars: HashMap<&str, &str> =
            [("OPENAI_API_KEY", "sk-test"), ("ASR_TIMEOUT_SECS", "abc")].into();
        let cfg = AsrConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_config_prefers_asr_key() {
        let vars: HashMap<&str, &str> = [
            ("ASR_API_KEY", "local"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ASR_API_URL", "http://localhost:9000/v1/audio/transcriptions"),
            ("WHISPER_MODEL", "small"),
            ("ASR_TIMEOUT_SECS", "30"),
        ]
        .into();
        let cfg = AsrConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.api_key, "local");
        assert_eq!(cfg.model, "small");
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.api_url.starts_with("http://localhost"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_request() {
        let client = WhisperApiClient::new(AsrConfig {
            api_url: "http://127.0.0.1:9/unused".to_string(),
            api_key: "k".to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = client
            .transcribe(&dir.path().join("missing.wav"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
