//! # Gemini TTS Integration
//!
//! Модуль для взаимодействия с Gemini `generateContent` в режиме аудио-ответа.
//! Поддерживает как одноголосые запросы, так и многоголосые, где каждая
//! строка текста начинается с метки говорящего (`Sarah: ...`).
//!
//! Сервис возвращает аудио в `inlineData` как base64 с типом
//! `audio/L16;codec=pcm;rate=24000`: моно, 16 бит, little-endian.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::{Client, header};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::tts::GeminiConfig;
use crate::utils::tts::speech_api::{SpeechBackend, SpeechError, SpeechRequest, SpeechResponse};
use crate::utils::tts::types::{AudioEncoding, Result, SpeechAudio, TtsError};

/// Частота, которую Gemini использует, если не указала ее в mime-типе
const DEFAULT_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakerVoiceConfig<'a> {
    speaker: &'a str,
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiSpeakerVoiceConfig<'a> {
    speaker_voice_configs: Vec<SpeakerVoiceConfig<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_config: Option<VoiceConfig<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    multi_speaker_voice_config: Option<MultiSpeakerVoiceConfig<'a>>,
}

/// Клиент Gemini TTS
pub struct GeminiSpeech {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiSpeech {
    /// Создает клиента.
    ///
    /// # Ошибки
    ///
    /// * `TtsError::ConfigError` - не задан ключ API
    /// * `TtsError::HttpError` - не удалось собрать HTTP клиента
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TtsError::ConfigError("Не задан GEMINI_API_KEY".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config, api_key })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    fn request_body(request: &SpeechRequest) -> Value {
        let speech_config = if request.is_multi_speaker() {
            SpeechConfig {
                voice_config: None,
                multi_speaker_voice_config: Some(MultiSpeakerVoiceConfig {
                    speaker_voice_configs: request
                        .speakers
                        .iter()
                        .map(|s| SpeakerVoiceConfig {
                            speaker: &s.label,
                            voice_config: VoiceConfig {
                                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: &s.voice },
                            },
                        })
                        .collect(),
                }),
            }
        } else {
            SpeechConfig {
                voice_config: request.speakers.first().map(|s| VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: &s.voice },
                }),
                multi_speaker_voice_config: None,
            }
        };

        json!({
            "contents": [{ "parts": [{ "text": request.prompt() }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": speech_config,
            }
        })
    }
}

#[async_trait]
impl SpeechBackend for GeminiSpeech {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model_for(&self, request: &SpeechRequest) -> String {
        if request.is_multi_speaker() {
            self.config.multi_speaker_model.clone()
        } else {
            self.config.single_speaker_model.clone()
        }
    }

    fn supports_multi_speaker(&self) -> bool {
        true
    }

    async fn synthesize(&self, request: &SpeechRequest) -> std::result::Result<SpeechResponse, SpeechError> {
        let model = self.model_for(request);
        let voices: Vec<String> = request.speakers.iter().map(|s| s.voice.clone()).collect();
        debug!(
            "Запрос к Gemini TTS: модель={}, голоса={:?}, {} символов",
            model,
            voices,
            request.text.chars().count()
        );

        let response = self
            .client
            .post(self.endpoint(&model))
            .header("x-goog-api-key", &self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body);
            warn!("Ошибка Gemini TTS (статус {}): {}", status, message);
            return Err(SpeechError::from_status(status.as_u16(), message, &voices));
        }

        let mut value: Value = serde_json::from_str(&body)
            .map_err(|e| SpeechError::InvalidAudio(format!("ответ не является JSON: {}", e)))?;

        let (mime_type, data) = extract_inline_audio(&value)
            .ok_or_else(|| SpeechError::InvalidAudio("в ответе нет inlineData с аудио".to_string()))?;
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| SpeechError::InvalidAudio(format!("некорректный base64: {}", e)))?;
        let (encoding, sample_rate) = parse_mime_type(&mime_type);

        info!("Получено {} байт аудио {} от Gemini", bytes.len(), mime_type);
        strip_inline_audio(&mut value, bytes.len());

        Ok(SpeechResponse {
            audio: SpeechAudio {
                bytes: Bytes::from(bytes),
                encoding,
                sample_rate,
            },
            raw_response: Some(value),
        })
    }
}

/// Текст ошибки из тела ответа Gemini
fn error_message(body: &str) -> String {
    let parsed: Value = serde_json::from_str(body).unwrap_or_else(|_| json!({"error": {"message": body}}));
    let message = parsed["error"]["message"].as_str().unwrap_or("Неизвестная ошибка API");
    match parsed["error"]["status"].as_str() {
        Some(status) => format!("{} ({})", message, status),
        None => message.to_string(),
    }
}

/// Первый фрагмент ответа с аудио: (mime-тип, base64)
fn extract_inline_audio(value: &Value) -> Option<(String, String)> {
    let parts = value["candidates"][0]["content"]["parts"].as_array()?;
    parts.iter().find_map(|part| {
        let inline = &part["inlineData"];
        let data = inline["data"].as_str()?;
        let mime = inline["mimeType"].as_str().unwrap_or("audio/L16;codec=pcm;rate=24000");
        Some((mime.to_string(), data.to_string()))
    })
}

/// Заменяет аудио-данные в ответе на их размер, чтобы ответ можно было сохранить
fn strip_inline_audio(value: &mut Value, len: usize) {
    if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array_mut() {
        for part in parts {
            if part["inlineData"]["data"].is_string() {
                part["inlineData"]["data"] = Value::String(format!("<{} bytes>", len));
            }
        }
    }
}

/// Разбирает mime-тип аудио.
///
/// # Примеры
///
/// ```rust
/// use podcast_tts::utils::tts::gemini_tts::parse_mime_type;
/// use podcast_tts::utils::tts::types::AudioEncoding;
///
/// let (encoding, rate) = parse_mime_type("audio/L16;codec=pcm;rate=24000");
/// assert_eq!(encoding, AudioEncoding::Pcm16 { channels: 1 });
/// assert_eq!(rate, 24000);
/// ```
pub fn parse_mime_type(mime: &str) -> (AudioEncoding, u32) {
    let mut parts = mime.split(';').map(str::trim);
    let essence = parts.next().unwrap_or_default().to_lowercase();

    let mut rate = DEFAULT_SAMPLE_RATE;
    let mut channels = 1u16;
    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            match key.trim().to_lowercase().as_str() {
                "rate" => rate = value.trim().parse().unwrap_or(DEFAULT_SAMPLE_RATE),
                "channels" => channels = value.trim().parse().unwrap_or(1),
                _ => {}
            }
        }
    }

    let encoding = match essence.as_str() {
        "audio/l16" | "audio/pcm" => AudioEncoding::Pcm16 { channels },
        "audio/wav" | "audio/x-wav" | "audio/wave" => AudioEncoding::Wav,
        "audio/mpeg" | "audio/mp3" => AudioEncoding::Mp3,
        other => AudioEncoding::Other(other.to_string()),
    };
    (encoding, rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tts::speech_api::SpeakerVoice;

    #[test]
    fn test_parse_mime_type() {
        assert_eq!(parse_mime_type("audio/L16;rate=16000"), (AudioEncoding::Pcm16 { channels: 1 }, 16000));
        assert_eq!(parse_mime_type("audio/wav").0, AudioEncoding::Wav);
        assert_eq!(parse_mime_type("audio/mpeg").0, AudioEncoding::Mp3);
    }

    #[test]
    fn test_request_body_multi_speaker() {
        let request = SpeechRequest {
            text: "Sarah: Hi.\nMichael: Hello.".to_string(),
            speakers: vec![
                SpeakerVoice { label: "Sarah".into(), voice: "Zephyr".into() },
                SpeakerVoice { label: "Michael".into(), voice: "Puck".into() },
            ],
            instruction: None,
        };
        let body = GeminiSpeech::request_body(&request);
        let configs = &body["generationConfig"]["speechConfig"]["multiSpeakerVoiceConfig"]["speakerVoiceConfigs"];
        assert_eq!(configs[1]["speaker"], "Michael");
        assert_eq!(configs[1]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"], "Puck");
        assert!(body["generationConfig"]["speechConfig"]["voiceConfig"].is_null());
    }

    #[test]
    fn test_error_message_with_status() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(error_message(body), "Quota exceeded (RESOURCE_EXHAUSTED)");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
