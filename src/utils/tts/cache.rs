//! Модуль для кэширования результатов синтеза
//!
//! Успешно синтезированные запросы сохраняются на диск по ключу из MD5
//! сервиса, модели, текста и голосов. Повторный прогон того же сценария
//! не тратит квоту. Ошибки кэша не прерывают синтез.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::utils::tts::speech_api::SpeechRequest;
use crate::utils::tts::types::{AudioEncoding, Result, SpeechAudio};

/// Метаданные кэшированного аудио
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    encoding: AudioEncoding,
    sample_rate: u32,
    created_at: DateTime<Utc>,
}

/// Структура для управления кэшем
#[derive(Debug, Clone)]
pub struct AudioCache {
    /// Директория для кэша
    cache_dir: PathBuf,
}

impl AudioCache {
    /// Создать кэш в заданной директории
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();

        // Создаем директорию для кэша, если она не существует
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        Ok(Self { cache_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Генерировать ключ для кэша
    pub fn key(provider: &str, model: &str, request: &SpeechRequest) -> String {
        let mut hasher = md5::Context::new();
        hasher.consume(provider.as_bytes());
        hasher.consume([0u8]);
        hasher.consume(model.as_bytes());
        hasher.consume([0u8]);
        hasher.consume(request.text.as_bytes());
        hasher.consume([0u8]);
        for speaker in &request.speakers {
            hasher.consume(speaker.label.as_bytes());
            hasher.consume(b"=");
            hasher.consume(speaker.voice.as_bytes());
            hasher.consume([0u8]);
        }
        if let Some(instruction) = &request.instruction {
            hasher.consume(instruction.as_bytes());
        }

        format!("{:x}", hasher.compute())
    }

    /// Получить аудио из кэша
    pub fn get(&self, key: &str) -> Option<SpeechAudio> {
        let meta_path = self.cache_dir.join(format!("{}.json", key));
        let audio_path = self.cache_dir.join(format!("{}.audio", key));
        if !meta_path.exists() || !audio_path.exists() {
            return None;
        }

        let entry: CacheEntry = match fs::read(&meta_path).map(|raw| serde_json::from_slice(&raw)) {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => {
                warn!("Поврежденная запись кэша {}: {}", meta_path.display(), e);
                return None;
            }
            Err(e) => {
                warn!("Не удалось прочитать запись кэша {}: {}", meta_path.display(), e);
                return None;
            }
        };

        match fs::read(&audio_path) {
            Ok(bytes) => {
                debug!("Найдено в кэше {} ({} байт, сохранено {})", key, bytes.len(), entry.created_at);
                Some(SpeechAudio {
                    bytes: Bytes::from(bytes),
                    encoding: entry.encoding,
                    sample_rate: entry.sample_rate,
                })
            }
            Err(e) => {
                warn!("Не удалось прочитать аудио из кэша {}: {}", audio_path.display(), e);
                None
            }
        }
    }

    /// Добавить аудио в кэш
    pub fn put(&self, key: &str, audio: &SpeechAudio) -> Result<()> {
        let entry = CacheEntry {
            encoding: audio.encoding.clone(),
            sample_rate: audio.sample_rate,
            created_at: Utc::now(),
        };
        fs::write(self.cache_dir.join(format!("{}.audio", key)), &audio.bytes)?;
        fs::write(
            self.cache_dir.join(format!("{}.json", key)),
            serde_json::to_vec_pretty(&entry)?,
        )?;
        debug!("Сохранено в кэш {} ({} байт)", key, audio.bytes.len());
        Ok(())
    }

    /// Очистить кэш
    pub fn clear(&self) -> Result<()> {
        for file in fs::read_dir(&self.cache_dir)? {
            let file = file?;
            if file.file_type()?.is_file() {
                fs::remove_file(file.path())?;
            }
        }
        Ok(())
    }
}
