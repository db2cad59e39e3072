//! # Speech API
//!
//! Общий интерфейс внешнего сервиса синтеза речи. Клиент синтеза
//! ([`crate::utils::tts::synthesis::SynthesisClient`]) владеет политикой
//! повторов и подмены голоса, реализации [`SpeechBackend`] отвечают только
//! за протокол конкретного сервиса.

use async_trait::async_trait;

use crate::utils::tts::types::SpeechAudio;

/// Голос для одного говорящего в запросе
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeakerVoice {
    /// Метка говорящего в тексте запроса (`Sarah`)
    pub label: String,
    /// Идентификатор голоса сервиса
    pub voice: String,
}

/// Запрос к сервису синтеза
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechRequest {
    /// Текст для озвучивания. При нескольких голосах - строки вида `Sarah: текст`
    pub text: String,
    /// Один голос или по голосу на каждого говорящего
    pub speakers: Vec<SpeakerVoice>,
    /// Инструкция подачи
    pub instruction: Option<String>,
}

impl SpeechRequest {
    pub fn is_multi_speaker(&self) -> bool {
        self.speakers.len() > 1
    }

    /// Текст вместе с инструкцией: `инструкция: текст`
    pub fn prompt(&self) -> String {
        match &self.instruction {
            Some(instruction) if !instruction.trim().is_empty() => format!("{}: {}", instruction.trim(), self.text),
            _ => self.text.clone(),
        }
    }
}

/// Ответ сервиса вместе с сырым телом для диагностики
#[derive(Clone, Debug)]
pub struct SpeechResponse {
    pub audio: SpeechAudio,
    /// Тело ответа без аудио-данных, если сервис отвечает JSON
    pub raw_response: Option<serde_json::Value>,
}

/// Ошибка одного обращения к сервису синтеза
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Сеть, таймаут, ответ 5xx: стоит повторить
    #[error("Временная ошибка синтеза: {0}")]
    Transient(String),

    /// Исчерпана квота или превышен лимит запросов (429, RESOURCE_EXHAUSTED)
    #[error("Превышена квота синтеза: {0}")]
    Quota(String),

    /// Сервис не знает этот голос
    #[error("Голос {voice} недоступен: {message}")]
    VoiceUnavailable { voice: String, message: String },

    /// Некорректный запрос, повтор без изменений не поможет
    #[error("Постоянная ошибка синтеза: {0}")]
    Permanent(String),

    /// Ответ получен, но аудио в нем нет или оно не читается
    #[error("Некорректное аудио в ответе: {0}")]
    InvalidAudio(String),
}

impl SpeechError {
    /// Маркеры квоты в тексте ошибки сервиса
    pub fn is_quota_message(message: &str) -> bool {
        message.contains("429") || message.contains("RESOURCE_EXHAUSTED") || message.to_lowercase().contains("quota")
    }

    /// Стоит ли повторять запрос с тем же голосом
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpeechError::Transient(_) | SpeechError::Quota(_) | SpeechError::InvalidAudio(_))
    }

    /// Классифицирует HTTP-ответ с ошибкой.
    ///
    /// # Аргументы
    ///
    /// * `status` - HTTP статус
    /// * `message` - Текст ошибки из тела ответа
    /// * `voices` - Голоса, использованные в запросе
    pub fn from_status(status: u16, message: String, voices: &[String]) -> Self {
        if status == 429 || Self::is_quota_message(&message) {
            return SpeechError::Quota(message);
        }
        if status >= 500 || status == 408 {
            return SpeechError::Transient(format!("HTTP {}: {}", status, message));
        }
        let lower = message.to_lowercase();
        if lower.contains("voice") {
            let voice = voices
                .iter()
                .find(|v| lower.contains(&v.to_lowercase()))
                .or_else(|| voices.first())
                .cloned()
                .unwrap_or_default();
            return SpeechError::VoiceUnavailable { voice, message };
        }
        SpeechError::Permanent(format!("HTTP {}: {}", status, message))
    }
}

impl From<reqwest::Error> for SpeechError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return SpeechError::from_status(status.as_u16(), e.to_string(), &[]);
        }
        SpeechError::Transient(e.to_string())
    }
}

/// Внешний сервис синтеза речи
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Имя сервиса для логов и ключа кеша
    fn name(&self) -> &str;

    /// Модель, которой будет выполнен запрос
    fn model_for(&self, request: &SpeechRequest) -> String;

    /// Умеет ли сервис озвучивать несколько голосов одним запросом
    fn supports_multi_speaker(&self) -> bool;

    /// Предел длины текста одного запроса, если сервис его задает
    fn max_input_chars(&self) -> Option<usize> {
        None
    }

    /// Выполняет одно обращение к сервису
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechResponse, SpeechError>;
}
