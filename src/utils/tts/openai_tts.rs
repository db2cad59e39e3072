//! # OpenAI TTS Integration
//!
//! Модуль для взаимодействия с API OpenAI Text-to-Speech.
//! Сервис озвучивает только один голос за запрос, поэтому при его
//! использовании запросы режутся по смене ведущего.

use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use reqwest::{Client, header};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::tts::OpenAiConfig;
use crate::utils::tts::speech_api::{SpeechBackend, SpeechError, SpeechRequest, SpeechResponse};
use crate::utils::tts::types::{AudioEncoding, Result, SpeechAudio, TtsError};

/// Предел длины `input` у /v1/audio/speech
pub const OPENAI_MAX_INPUT_CHARS: usize = 4096;

/// Параметры запроса к API OpenAI TTS
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

/// Клиент OpenAI TTS
pub struct OpenAiSpeech {
    client: Client,
    config: OpenAiConfig,
    headers: header::HeaderMap,
}

impl OpenAiSpeech {
    /// Создает клиента.
    ///
    /// # Ошибки
    ///
    /// * `TtsError::ConfigError` - не задан или некорректен ключ API
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TtsError::ConfigError("Не задан OPENAI_API_KEY".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Настройка заголовков
        let mut headers = header::HeaderMap::new();
        let auth: header::HeaderValue = format!("Bearer {}", api_key)
            .parse()
            .map_err(|e| TtsError::ConfigError(format!("Некорректный ключ OpenAI: {}", e)))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        Ok(Self { client, config, headers })
    }
}

#[async_trait]
impl SpeechBackend for OpenAiSpeech {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_for(&self, _request: &SpeechRequest) -> String {
        self.config.model.clone()
    }

    fn supports_multi_speaker(&self) -> bool {
        false
    }

    fn max_input_chars(&self) -> Option<usize> {
        Some(OPENAI_MAX_INPUT_CHARS)
    }

    async fn synthesize(&self, request: &SpeechRequest) -> std::result::Result<SpeechResponse, SpeechError> {
        let voice = request
            .speakers
            .first()
            .map(|s| s.voice.to_lowercase())
            .ok_or_else(|| SpeechError::Permanent("в запросе нет голоса".to_string()))?;

        let text = preprocess_text(&request.text);
        let request_body = TtsRequest {
            model: &self.config.model,
            input: &text,
            voice: &voice,
            speed: self.config.speed,
            response_format: "mp3",
            instructions: request.instruction.as_deref(),
        };

        info!("Отправка TTS запроса OpenAI: голос {}, {} символов", voice, text.chars().count());

        let resp = self
            .client
            .post(format!("{}/v1/audio/speech", self.config.base_url.trim_end_matches('/')))
            .headers(self.headers.clone())
            .json(&request_body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let audio_data = resp.bytes().await?;
            info!("Успешно получен аудио-ответ от API OpenAI TTS: {} байт", audio_data.len());
            return Ok(SpeechResponse {
                audio: SpeechAudio {
                    bytes: audio_data,
                    encoding: AudioEncoding::Mp3,
                    sample_rate: 24000,
                },
                raw_response: None,
            });
        }

        // Обработка ошибки
        let error_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "Не удалось получить текст ошибки".to_string());
        let error_json: Value =
            serde_json::from_str(&error_text).unwrap_or_else(|_| json!({"error": {"message": error_text}}));
        let error_message = error_json["error"]["message"]
            .as_str()
            .unwrap_or("Неизвестная ошибка API")
            .to_string();

        error!("Ошибка API OpenAI TTS (статус {}): {}", status, error_message);
        Err(SpeechError::from_status(status.as_u16(), error_message, &[voice]))
    }
}

/// Предобрабатывает текст перед отправкой в API TTS.
///
/// # Аргументы
///
/// * `text` - Исходный текст
///
/// # Возвращает
///
/// Текст с одинарными пробелами и без переводов строк
fn preprocess_text(text: &str) -> String {
    // Обработка многоточий
    let result = text.trim().replace("...", "… ");
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
