//! # TTS Types
//!
//! Этот модуль содержит общие типы данных и определения ошибок,
//! используемые на всех этапах озвучивания сценария: разбор, разбиение
//! на запросы, синтез, сборка и экспорт.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

/// Собственный тип ошибок для библиотеки
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("Ошибка разбора сценария: {0}")]
    ScriptParsingError(String),

    #[error("Ошибка аудио-обработки: {0}")]
    AudioProcessingError(String),

    #[error("Ошибка декодирования аудио: {0}")]
    DecodeError(String),

    #[error("Ошибка ресемплинга: {0}")]
    ResamplingError(String),

    #[error("Ошибка экспорта: {0}")]
    ExportError(String),

    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка HTTP: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Ошибка WAV-кодирования: {0}")]
    WavEncodingError(#[from] hound::Error),

    #[error("Ошибка JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Ошибка YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Ошибка конфигурации: {0}")]
    ConfigError(String),

    #[error("Другая ошибка: {0}")]
    Other(#[from] anyhow::Error),
}

/// Тип Result для всей TTS библиотеки
pub type Result<T> = std::result::Result<T, TtsError>;

/// Один из двух ведущих подкаста.
///
/// Набор закрыт: сценарий всегда ведут ровно два голоса,
/// `Speaker0` и `Speaker1`. Отображаемые имена задаются в таблице голосов.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Host {
    Speaker0,
    Speaker1,
}

impl Host {
    pub const ALL: [Host; 2] = [Host::Speaker0, Host::Speaker1];

    /// Индекс ведущего в разметке `[Speaker N]`
    pub fn index(self) -> u8 {
        match self {
            Host::Speaker0 => 0,
            Host::Speaker1 => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Host> {
        match index {
            0 => Some(Host::Speaker0),
            1 => Some(Host::Speaker1),
            _ => None,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Speaker {}", self.index())
    }
}

/// Выведенная эмоциональная окраска реплики.
///
/// Никогда не задается автором сценария напрямую, а вычисляется
/// эвристикой из текста (см. [`crate::utils::tts::analysis`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    #[default]
    Neutral,
    Engaged,
    Curious,
    Acknowledging,
    Thoughtful,
    Excited,
    Contrasting,
    Agreeable,
}

impl Emotion {
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Engaged => "engaged",
            Emotion::Curious => "curious",
            Emotion::Acknowledging => "acknowledging",
            Emotion::Thoughtful => "thoughtful",
            Emotion::Excited => "excited",
            Emotion::Contrasting => "contrasting",
            Emotion::Agreeable => "agreeable",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Тип элемента сценария
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Реплика ведущего
    Dialogue,
    /// Явная пауза `[Pause 2s]`
    Pause,
    /// Музыкальная вставка `[Music]`, озвучивается тишиной
    Music,
    /// Разрыв абзаца между репликами
    Blank,
}

/// Один элемент сценария.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub kind: TurnKind,
    /// Ведущий (только для `Dialogue`)
    pub speaker: Option<Host>,
    /// Текст реплики, для `Music` - подпись из разметки
    pub text: String,
    pub emotion: Emotion,
    /// Длительность в миллисекундах (только для `Pause` и `Music`)
    pub duration_ms: Option<u32>,
    /// Позиция в исходном сценарии, задает полный порядок
    pub sequence_index: usize,
}

impl Turn {
    pub fn dialogue(sequence_index: usize, speaker: Host, text: impl Into<String>) -> Self {
        Self {
            kind: TurnKind::Dialogue,
            speaker: Some(speaker),
            text: text.into(),
            emotion: Emotion::Neutral,
            duration_ms: None,
            sequence_index,
        }
    }

    pub fn pause(sequence_index: usize, duration_ms: u32) -> Self {
        Self {
            kind: TurnKind::Pause,
            speaker: None,
            text: String::new(),
            emotion: Emotion::Neutral,
            duration_ms: Some(duration_ms),
            sequence_index,
        }
    }

    pub fn music(sequence_index: usize, label: impl Into<String>, duration_ms: u32) -> Self {
        Self {
            kind: TurnKind::Music,
            speaker: None,
            text: label.into(),
            emotion: Emotion::Neutral,
            duration_ms: Some(duration_ms),
            sequence_index,
        }
    }

    pub fn blank(sequence_index: usize) -> Self {
        Self {
            kind: TurnKind::Blank,
            speaker: None,
            text: String::new(),
            emotion: Emotion::Neutral,
            duration_ms: None,
            sequence_index,
        }
    }

    pub fn is_dialogue(&self) -> bool {
        self.kind == TurnKind::Dialogue
    }
}

/// Реплика целиком или часть слишком длинной реплики внутри запроса.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnFragment {
    /// `sequence_index` исходной реплики
    pub sequence_index: usize,
    /// Номер части (0 для первой или единственной)
    pub part: usize,
    pub speaker: Host,
    pub emotion: Emotion,
    pub text: String,
}

impl TurnFragment {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Голос и инструкция подачи для одного ведущего.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAssignment {
    pub voice: String,
    pub instruction: Option<String>,
}

/// Разрешенное соответствие ведущий -> голос для одного запроса.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoicePlan {
    /// Голос каждого ведущего, присутствующего в запросе
    pub voices: BTreeMap<Host, String>,
    /// Отображаемые имена ведущих для многоголосого синтеза
    pub labels: BTreeMap<Host, String>,
    /// Инструкция подачи для каждого фрагмента, по порядку
    pub instructions: Vec<Option<String>>,
}

impl VoicePlan {
    pub fn voice_for(&self, host: Host) -> Option<&str> {
        self.voices.get(&host).map(String::as_str)
    }
}

/// Единица запроса к синтезу: подряд идущие реплики в пределах лимита символов.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub index: usize,
    pub fragments: Vec<TurnFragment>,
    pub voice_plan: VoicePlan,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl Chunk {
    pub fn new(index: usize, fragments: Vec<TurnFragment>) -> Self {
        Self {
            index,
            fragments,
            voice_plan: VoicePlan::default(),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Длина текста запроса в символах, по одному разделителю между фрагментами
    pub fn char_len(&self) -> usize {
        let text: usize = self.fragments.iter().map(TurnFragment::char_len).sum();
        text + self.fragments.len().saturating_sub(1)
    }

    /// Ведущие в порядке первого появления
    pub fn speakers(&self) -> Vec<Host> {
        let mut speakers = Vec::new();
        for fragment in &self.fragments {
            if !speakers.contains(&fragment.speaker) {
                speakers.push(fragment.speaker);
            }
        }
        speakers
    }

    pub fn word_count(&self) -> usize {
        self.fragments
            .iter()
            .map(|f| f.text.split_whitespace().count())
            .sum()
    }

    /// Текст всех фрагментов через пробел
    pub fn joined_text(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Кодировка аудио, полученного от сервиса синтеза
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Сырые 16-битные PCM little-endian семплы (`audio/L16`)
    Pcm16 { channels: u16 },
    Wav,
    Mp3,
    /// Любой другой контейнер, определяется по содержимому
    Other(String),
}

/// Аудио-ответ сервиса синтеза.
#[derive(Clone, Debug)]
pub struct SpeechAudio {
    pub bytes: Bytes,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
}

/// Итог синтеза одного запроса
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    Success,
    Fallback,
    Failed,
}

/// Результат синтеза одного [`Chunk`].
///
/// `estimated_duration` заполнен всегда, даже при наличии аудио.
#[derive(Clone, Debug)]
pub struct SynthesisResult {
    pub chunk_index: usize,
    pub status: SynthesisStatus,
    pub audio: Option<SpeechAudio>,
    pub estimated_duration: std::time::Duration,
    pub fragments: Vec<TurnFragment>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Тип сегмента в собранном буфере
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Синтезированная речь
    Speech,
    /// Тишина вместо несинтезированной речи
    Fallback,
    /// Вставленная пауза между репликами
    Pause,
    /// Явная пауза или музыкальная вставка из сценария
    Cue,
    /// Тишина в начале или в конце выпуска
    Padding,
}

/// Запись о сегменте в собранном буфере
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SegmentInfo {
    /// `sequence_index` реплики, `None` для вставленных пауз и отступов
    pub sequence_index: Option<usize>,
    pub kind: SegmentKind,
    /// Смещение начала сегмента в семплах
    pub start: usize,
    /// Длина сегмента в семплах
    pub len: usize,
}

/// Собранный моно-буфер выпуска вместе с разметкой сегментов
#[derive(Clone, Debug, Default)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub segments: Vec<SegmentInfo>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            segments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Длительность в секундах
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Добавляет сегмент в конец буфера и записывает его в разметку
    pub fn push_segment(&mut self, samples: &[f32], kind: SegmentKind, sequence_index: Option<usize>) {
        let start = self.samples.len();
        self.samples.extend_from_slice(samples);
        self.segments.push(SegmentInfo {
            sequence_index,
            kind,
            start,
            len: samples.len(),
        });
    }

    /// Добавляет `len` семплов тишины
    pub fn push_silence(&mut self, len: usize, kind: SegmentKind, sequence_index: Option<usize>) {
        let start = self.samples.len();
        self.samples.resize(start + len, 0.0);
        self.segments.push(SegmentInfo {
            sequence_index,
            kind,
            start,
            len,
        });
    }

    pub fn segments_of(&self, kind: SegmentKind) -> impl Iterator<Item = &SegmentInfo> {
        self.segments.iter().filter(move |s| s.kind == kind)
    }
}

/// Обновление прогресса для отправки клиенту
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Началась обработка
    Started,
    /// Разбор сценария
    ParsingScript,
    /// Разбиение реплик на запросы
    Chunking {
        /// Количество запросов
        chunks: usize,
    },
    /// Синтез запроса
    Synthesizing {
        /// Текущий запрос
        current: usize,
        /// Общее количество запросов
        total: usize,
    },
    /// Запрос заменен тишиной
    ChunkFallback {
        index: usize,
        reason: String,
    },
    /// Склейка аудиофрагментов
    Assembling,
    /// Нормализация аудио
    Normalizing,
    /// Кодирование аудио
    Encoding,
    /// Обработка завершена
    Finished,
}

/// Асинхронно отправляет обновление прогресса
pub async fn send_progress(sender: &Option<Sender<ProgressUpdate>>, update: ProgressUpdate) {
    if let Some(sender) = sender {
        let _ = sender.send(update).await;
    }
}
