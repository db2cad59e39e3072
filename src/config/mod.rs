// Configuration module
// Centralized management of application configuration
//
// Порядок приоритета: встроенные значения < config/default_config.yaml <
// config/config.yaml (или файл из --config) < переменные окружения < флаги CLI

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::utils::tts::assembler::PacingConfig;
use crate::utils::tts::chunker::ChunkingConfig;
use crate::utils::tts::post_process::{FinalizeOptions, Normalization};
use crate::utils::tts::script::ParserConfig;
use crate::utils::tts::synthesis::SynthesisConfig;
use crate::utils::tts::types::{Result, TtsError};
use crate::utils::tts::voices::VoiceTable;

pub mod tts; // TTS configuration

/// Настройки по умолчанию, поставляемые вместе с программой
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../../config/default_config.yaml");

/// Пользовательский файл настроек, который читается, если не задан `--config`
pub const USER_CONFIG_PATH: &str = "config/config.yaml";

// Настройки итогового файла
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub normalization: Normalization,
    // Множитель скорости воспроизведения
    pub speed: f32,
    // Название выпуска, по умолчанию из имени файла
    pub title: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::default(),
            speed: 1.0,
            title: None,
        }
    }
}

impl OutputConfig {
    pub fn finalize_options(&self) -> FinalizeOptions {
        FinalizeOptions {
            normalization: self.normalization,
            speed: self.speed,
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tts: tts::TtsConfig,
    pub script: ParserConfig,
    pub chunking: ChunkingConfig,
    // Если не задано, берется таблица по умолчанию для выбранного сервиса
    pub voices: Option<VoiceTable>,
    pub synthesis: SynthesisConfig,
    pub pacing: PacingConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Загружает настройки из встроенного YAML, файла и окружения.
    ///
    /// # Аргументы
    ///
    /// * `path` - Файл настроек. Если не задан, читается `config/config.yaml`,
    ///   когда он существует.
    ///
    /// # Ошибки
    ///
    /// * `TtsError::IoError` - указанный файл не читается
    /// * `TtsError::YamlError` - некорректный YAML
    /// * `TtsError::ConfigError` - некорректное значение в окружении
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let user_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(USER_CONFIG_PATH)).filter(|p| p.exists()),
        };

        let user_yaml = match &user_path {
            Some(path) => {
                info!("Загрузка настроек из {}", path.display());
                Some(std::fs::read_to_string(path)?)
            }
            None => None,
        };

        let mut config = Self::from_yaml_layers(&[Some(DEFAULT_CONFIG_YAML), user_yaml.as_deref()])?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Собирает настройки из слоев YAML, каждый следующий перекрывает предыдущий
    pub fn from_yaml_layers(layers: &[Option<&str>]) -> Result<Self> {
        let mut merged = serde_yaml::to_value(Self::default())?;
        for layer in layers.iter().flatten() {
            let value: Value = serde_yaml::from_str(layer)?;
            if !value.is_null() {
                merge_yaml(&mut merged, value);
            }
        }
        Ok(serde_yaml::from_value(merged)?)
    }

    /// Применяет переменные окружения.
    ///
    /// `lookup` возвращает значение переменной, в тестах подменяется.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.tts.gemini.api_key = Some(key);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.tts.openai.api_key = Some(key);
        }
        if let Some(provider) = lookup("PODCAST_TTS_PROVIDER") {
            self.tts.provider = provider.parse().map_err(TtsError::ConfigError)?;
            debug!("Сервис синтеза из окружения: {}", self.tts.provider);
        }
        if let Some(delay) = lookup("PODCAST_TTS_API_DELAY") {
            let seconds: f64 = delay
                .trim()
                .parse()
                .map_err(|_| TtsError::ConfigError(format!("PODCAST_TTS_API_DELAY: '{}' не число", delay)))?;
            self.set_api_delay(seconds)?;
        }
        Ok(())
    }

    /// Задержка перед каждым запросом к сервису в секундах
    pub fn set_api_delay(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(TtsError::ConfigError(format!("Некорректная задержка запроса: {}", seconds)));
        }
        self.synthesis.request_delay_ms = (seconds * 1000.0).round() as u64;
        Ok(())
    }

    /// Проверяет настройки перед запуском синтеза
    pub fn validate(&self) -> Result<()> {
        if self.tts.api_key().is_none() {
            let var = match self.tts.provider {
                tts::TtsProvider::Gemini => "GEMINI_API_KEY",
                tts::TtsProvider::OpenAI => "OPENAI_API_KEY",
            };
            return Err(TtsError::ConfigError(format!(
                "Не задан ключ API для {}: установите {}",
                self.tts.provider, var
            )));
        }
        if self.chunking.max_chars == 0 {
            return Err(TtsError::ConfigError("chunking.max_chars должен быть больше 0".to_string()));
        }
        if !(0.5..=2.0).contains(&self.output.speed) {
            return Err(TtsError::ConfigError(format!(
                "output.speed {} вне диапазона 0.5-2.0",
                self.output.speed
            )));
        }
        Ok(())
    }
}

/// Рекурсивно накладывает `overlay` на `base`: словари сливаются, остальное заменяется
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => merge_yaml(existing, value),
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
