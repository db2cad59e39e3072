use std::f32::consts::PI;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::AppConfig;
use crate::utils::tts::speech_api::{SpeechBackend, SpeechError, SpeechRequest, SpeechResponse};
use crate::utils::tts::synthesis::SynthesisConfig;
use crate::utils::tts::types::{AudioEncoding, SpeechAudio};

pub const TEST_RATE: u32 = 24000;

/// Создает тестовый синусоидальный сигнал
pub fn sine_wave(freq: f32, duration_sec: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_sec * sample_rate as f32) as usize;
    (0..num_samples)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Кодирует семплы в 16-битный PCM little-endian
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

/// Ответ сервиса: тон, длина которого растет с длиной текста
pub fn speech_audio(text: &str) -> SpeechAudio {
    let secs = (text.chars().count() as f32 * 0.06).max(0.3);
    SpeechAudio {
        bytes: Bytes::from(pcm16_bytes(&sine_wave(220.0, secs, TEST_RATE))),
        encoding: AudioEncoding::Pcm16 { channels: 1 },
        sample_rate: TEST_RATE,
    }
}

/// Настройки синтеза без задержек
pub fn fast_synthesis() -> SynthesisConfig {
    SynthesisConfig {
        request_delay_ms: 0,
        backoff_base_ms: 0,
        max_backoff_ms: 0,
        ..SynthesisConfig::default()
    }
}

/// Настройки приложения для тестов: без задержек и с фиксированным зерном пауз
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.synthesis = fast_synthesis();
    config.pacing.seed = Some(42);
    config
}

/// Сервис синтеза, поведение которого задается заранее
pub struct ScriptedBackend {
    multi_speaker: bool,
    failing_text: Option<String>,
    failure: fn(String) -> SpeechError,
    rejected_voices: Vec<String>,
    fail_first: usize,
    short_audio: bool,
    input_limit: Option<usize>,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            multi_speaker: true,
            failing_text: None,
            failure: SpeechError::Transient,
            rejected_voices: Vec::new(),
            fail_first: 0,
            short_audio: false,
            input_limit: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_speaker(mut self) -> Self {
        self.multi_speaker = false;
        self
    }

    /// Любой запрос, текст которого содержит `text`, завершается ошибкой
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing_text = Some(text.to_string());
        self
    }

    /// Сервис с собственным пределом длины запроса
    pub fn with_input_limit(mut self, limit: usize) -> Self {
        self.input_limit = Some(limit);
        self
    }

    pub fn failing_always(self) -> Self {
        self.failing_on("")
    }

    /// Ошибка для `failing_on`, по умолчанию временная
    pub fn with_failure(mut self, failure: fn(String) -> SpeechError) -> Self {
        self.failure = failure;
        self
    }

    pub fn rejecting_voice(mut self, voice: &str) -> Self {
        self.rejected_voices.push(voice.to_string());
        self
    }

    /// Первые `n` обращений завершаются временной ошибкой
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_short_audio(mut self) -> Self {
        self.short_audio = true;
        self
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_for(&self, request: &SpeechRequest) -> String {
        if request.is_multi_speaker() {
            "multi".to_string()
        } else {
            "single".to_string()
        }
    }

    fn supports_multi_speaker(&self) -> bool {
        self.multi_speaker
    }

    fn max_input_chars(&self) -> Option<usize> {
        self.input_limit
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechResponse, SpeechError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(speaker) = request
            .speakers
            .iter()
            .find(|s| self.rejected_voices.iter().any(|v| v.eq_ignore_ascii_case(&s.voice)))
        {
            return Err(SpeechError::VoiceUnavailable {
                voice: speaker.voice.clone(),
                message: format!("voice {} is not supported", speaker.voice),
            });
        }
        if call <= self.fail_first {
            return Err(SpeechError::Transient(format!("HTTP 503: call {}", call)));
        }
        if let Some(text) = &self.failing_text {
            if request.text.contains(text.as_str()) {
                return Err((self.failure)(format!("scripted failure for '{}'", request.text)));
            }
        }
        if self.short_audio {
            return Ok(SpeechResponse {
                audio: SpeechAudio {
                    bytes: Bytes::from(vec![0u8; 100]),
                    encoding: AudioEncoding::Pcm16 { channels: 1 },
                    sample_rate: TEST_RATE,
                },
                raw_response: None,
            });
        }

        Ok(SpeechResponse {
            audio: speech_audio(&request.text),
            raw_response: Some(serde_json::json!({ "text": request.text })),
        })
    }
}
