use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Доступные сервисы синтеза
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    Gemini,
    OpenAI,
}

impl FromStr for TtsProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(TtsProvider::Gemini),
            "openai" => Ok(TtsProvider::OpenAI),
            other => Err(format!("unknown TTS provider '{}', expected gemini or openai", other)),
        }
    }
}

impl fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtsProvider::Gemini => f.write_str("gemini"),
            TtsProvider::OpenAI => f.write_str("openai"),
        }
    }
}

// Настройки Gemini TTS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    // Ключ берется из GEMINI_API_KEY, в файл конфигурации не пишется
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    // Модель для запросов с одним голосом
    pub single_speaker_model: String,
    // Модель для многоголосых запросов
    pub multi_speaker_model: String,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            single_speaker_model: "gemini-2.5-pro-preview-tts".to_string(),
            multi_speaker_model: "gemini-2.5-flash-preview-tts".to_string(),
            timeout_secs: 120,
        }
    }
}

// Настройки OpenAI TTS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    // Скорость речи (0.25 до 4.0)
    pub speed: f32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini-tts".to_string(),
            speed: 1.0,
            timeout_secs: 60,
        }
    }
}

// Конфигурация TTS
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    // Выбранный сервис
    pub provider: TtsProvider,
    pub gemini: GeminiConfig,
    pub openai: OpenAiConfig,
    // Каталог кеша синтезированных запросов, без него кеш выключен
    pub cache_dir: Option<PathBuf>,
}

impl TtsConfig {
    // Ключ API выбранного сервиса
    pub fn api_key(&self) -> Option<&str> {
        let key = match self.provider {
            TtsProvider::Gemini => self.gemini.api_key.as_deref(),
            TtsProvider::OpenAI => self.openai.api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }
}
