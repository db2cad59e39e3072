//! # Post Processing
//!
//! Последний этап: нормализация громкости, изменение скорости и экспорт.
//! Файл сначала пишется во временный файл рядом с целевым и затем
//! переименовывается, поэтому при ошибке на диске не остается неполного файла.

use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::utils::tts::audio_format::AudioCodec;
use crate::utils::tts::audio_processing::{change_speed, db_to_amplitude, normalize_peak, normalize_rms};
use crate::utils::tts::types::{AudioBuffer, Result, TtsError};

/// Способ нормализации громкости
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Normalization {
    /// Пиковый уровень в dBFS
    Peak { target_dbfs: f32 },
    /// Средний уровень (RMS, линейная амплитуда)
    Rms { target: f32 },
    /// Без нормализации
    Off,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Peak { target_dbfs: -0.1 }
    }
}

/// Параметры финальной обработки
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeOptions {
    pub normalization: Normalization,
    /// Множитель скорости воспроизведения, 1.0 без изменений
    pub speed: f32,
    /// Название выпуска, по умолчанию имя выходного файла без расширения
    pub title: Option<String>,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            normalization: Normalization::default(),
            speed: 1.0,
            title: None,
        }
    }
}

/// Название выпуска из имени файла: `my_episode-01.mp3` -> `my episode 01`
pub fn title_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let title = stem
        .split(['_', '-'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

pub struct PostProcessor {
    codec: Arc<dyn AudioCodec>,
}

impl PostProcessor {
    pub fn new(codec: Arc<dyn AudioCodec>) -> Self {
        Self { codec }
    }

    /// Нормализует, ускоряет и экспортирует выпуск.
    ///
    /// # Аргументы
    ///
    /// * `buffer` - Собранный буфер, потребляется
    /// * `output_path` - Путь итогового файла
    /// * `options` - Параметры обработки
    ///
    /// # Возвращает
    ///
    /// `true`, если файл записан. Пустой буфер дает `false` без записи файла.
    pub fn finalize(&self, buffer: AudioBuffer, output_path: &Path, options: &FinalizeOptions) -> bool {
        if buffer.is_empty() {
            error!("Буфер пуст, файл {} не создан", output_path.display());
            return false;
        }

        match self.process(buffer, output_path, options) {
            Ok(duration) => {
                info!("Выпуск сохранен: {} ({:.1}s)", output_path.display(), duration);
                true
            }
            Err(e) => {
                error!("Не удалось сохранить выпуск {}: {}", output_path.display(), e);
                false
            }
        }
    }

    fn process(&self, buffer: AudioBuffer, output_path: &Path, options: &FinalizeOptions) -> Result<f32> {
        let AudioBuffer {
            mut samples,
            sample_rate,
            ..
        } = buffer;

        match options.normalization {
            Normalization::Peak { target_dbfs } => {
                samples = normalize_peak(&samples, db_to_amplitude(target_dbfs).min(1.0))?;
            }
            Normalization::Rms { target } => {
                normalize_rms(&mut samples, target);
            }
            Normalization::Off => {}
        }

        let samples = change_speed(&samples, options.speed)?;
        let title = options.title.clone().or_else(|| title_from_path(output_path));

        let dir = match output_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&dir)?;

        let extension = output_path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| TtsError::ExportError(format!("У файла {} нет расширения", output_path.display())))?;

        // Временный файл удаляется сам, если до переименования не дошло
        let temp = Builder::new()
            .prefix(".podcast-tts-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(&dir)?;

        self.codec.export(&samples, sample_rate, temp.path(), title.as_deref())?;
        temp.persist(output_path).map_err(|e| TtsError::IoError(e.error))?;

        Ok(samples.len() as f32 / sample_rate.max(1) as f32)
    }
}
