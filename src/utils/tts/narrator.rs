//! # Podcast Narrator
//!
//! Центральный модуль, который проводит сценарий через весь конвейер:
//! разбор, разбиение на запросы, выбор голосов, синтез, склейку и экспорт.
//!
//! Ошибки отдельных запросов обрабатываются на уровне запроса. Прогон
//! считается неудачным, только если озвучивать нечего: в сценарии нет
//! реплик или ни один запрос не дал ни речи, ни тишины на замену.
//! В этом случае файл не создается.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::mpsc::Sender;

use crate::config::AppConfig;
use crate::config::tts::{TtsConfig, TtsProvider};
use crate::utils::tts::assembler::{AudioAssembler, PacingConfig};
use crate::utils::tts::audio_format::AudioCodec;
use crate::utils::tts::cache::AudioCache;
use crate::utils::tts::chunker::{ChunkingConfig, RequestOverhead, TurnChunker};
use crate::utils::tts::gemini_tts::GeminiSpeech;
use crate::utils::tts::openai_tts::OpenAiSpeech;
use crate::utils::tts::post_process::{FinalizeOptions, PostProcessor};
use crate::utils::tts::script::ScriptParser;
use crate::utils::tts::speech_api::SpeechBackend;
use crate::utils::tts::synthesis::{SynthesisClient, SynthesisConfig, request_overhead};
use crate::utils::tts::types::{
    ProgressUpdate, Result, SegmentKind, SynthesisResult, SynthesisStatus, TtsError, TurnKind, send_progress,
};
use crate::utils::tts::voices::VoiceTable;

/// Минимум места под текст реплики в одном запросе
const MIN_TEXT_ROOM: usize = 20;

/// Создает клиента сервиса синтеза по настройкам.
///
/// # Ошибки
///
/// * `TtsError::ConfigError` - не задан ключ API выбранного сервиса
pub fn build_backend(config: &TtsConfig) -> Result<Arc<dyn SpeechBackend>> {
    Ok(match config.provider {
        TtsProvider::Gemini => Arc::new(GeminiSpeech::new(config.gemini.clone())?),
        TtsProvider::OpenAI => Arc::new(OpenAiSpeech::new(config.openai.clone())?),
    })
}

/// Итог синтеза одного запроса для отчета
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub status: SynthesisStatus,
    pub attempts: u32,
    pub fragments: usize,
    pub error: Option<String>,
}

impl From<&SynthesisResult> for ChunkOutcome {
    fn from(result: &SynthesisResult) -> Self {
        Self {
            index: result.chunk_index,
            status: result.status,
            attempts: result.attempts,
            fragments: result.fragments.len(),
            error: result.error.clone(),
        }
    }
}

/// Отчет о прогоне
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub success: bool,
    /// Путь итогового файла, если он создан
    pub output: Option<PathBuf>,
    pub turns: usize,
    pub chunks: Vec<ChunkOutcome>,
    pub speech_segments: usize,
    pub fallback_segments: usize,
    pub duration_secs: f32,
    /// Каталог с сохраненными ответами сервиса
    pub diagnostics_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RenderReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            success: false,
            output: None,
            turns: 0,
            chunks: Vec::new(),
            speech_segments: 0,
            fallback_segments: 0,
            duration_secs: 0.0,
            diagnostics_dir: None,
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, success: bool) -> Self {
        self.success = success;
        self.finished_at = Utc::now();
        self
    }

    /// Запросы, замененные тишиной
    pub fn fallback_chunks(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.chunks.iter().filter(|c| c.status != SynthesisStatus::Success)
    }
}

/// Рабочий каталог прогона: временный или постоянный для диагностики
enum WorkDir {
    Temp(TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Kept(path) => path,
        }
    }
}

/// Озвучивание сценария целиком
pub struct PodcastNarrator {
    parser: ScriptParser,
    chunking: ChunkingConfig,
    overhead: RequestOverhead,
    voices: VoiceTable,
    backend: Arc<dyn SpeechBackend>,
    codec: Arc<dyn AudioCodec>,
    synthesis: SynthesisConfig,
    pacing: PacingConfig,
    finalize: FinalizeOptions,
    cache: Option<AudioCache>,
    progress: Option<Sender<ProgressUpdate>>,
}

impl PodcastNarrator {
    /// Собирает конвейер из настроек приложения.
    ///
    /// # Аргументы
    ///
    /// * `config` - Настройки приложения
    /// * `backend` - Сервис синтеза
    /// * `codec` - Кодек, выбранный при запуске
    ///
    /// # Ошибки
    ///
    /// * `TtsError::ConfigError` - имена ведущих не подходят для разметки или
    ///   `max_chars` не вмещает инструкцию подачи вместе с текстом
    pub fn new(config: &AppConfig, backend: Arc<dyn SpeechBackend>, codec: Arc<dyn AudioCodec>) -> Result<Self> {
        let voices = config
            .voices
            .clone()
            .unwrap_or_else(|| VoiceTable::for_provider(config.tts.provider));
        let parser = ScriptParser::new(config.script.clone(), voices.host_names())?;

        let mut chunking = config.chunking.clone();
        if !backend.supports_multi_speaker() {
            chunking.split_on_speaker_change = true;
        }
        if let Some(limit) = backend.max_input_chars() {
            if chunking.max_chars > limit {
                info!("Лимит запроса уменьшен до {} символов (предел {})", limit, backend.name());
                chunking.max_chars = limit;
            }
        }

        let overhead = request_overhead(&voices, &config.synthesis, !chunking.split_on_speaker_change);
        if overhead.text_room(chunking.max_chars) < MIN_TEXT_ROOM {
            return Err(TtsError::ConfigError(format!(
                "chunking.max_chars ({}) не вмещает инструкцию и метки ведущих ({} символов) и текст реплики",
                chunking.max_chars,
                overhead.per_request + overhead.per_fragment
            )));
        }

        let cache = match &config.tts.cache_dir {
            Some(dir) => match AudioCache::new(dir) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Кэш {} недоступен: {}", dir.display(), e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            parser,
            chunking,
            overhead,
            voices,
            backend,
            codec,
            synthesis: config.synthesis.clone(),
            pacing: config.pacing.clone(),
            finalize: config.output.finalize_options(),
            cache,
            progress: None,
        })
    }

    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Озвучивает сценарий из файла.
    ///
    /// # Ошибки
    ///
    /// Только нечитаемый файл сценария. Все остальные сбои отражаются в отчете.
    pub async fn render_file(&self, script_path: &Path, output_path: &Path) -> Result<RenderReport> {
        let text = self.parser.read_file(script_path)?;
        Ok(self.render(&text, output_path).await)
    }

    /// Озвучивает текст сценария и записывает выпуск в `output_path`
    pub async fn render(&self, script: &str, output_path: &Path) -> RenderReport {
        let mut report = RenderReport::new();
        send_progress(&self.progress, ProgressUpdate::Started).await;

        // Шаг 1: Разбор сценария
        send_progress(&self.progress, ProgressUpdate::ParsingScript).await;
        let turns = match self.parser.parse(script) {
            Ok(turns) => turns,
            Err(e) => {
                error!("Не удалось разобрать сценарий: {}", e);
                return report.finish(false);
            }
        };
        report.turns = turns.len();

        let dialogue = turns.iter().filter(|t| t.kind == TurnKind::Dialogue).count();
        if dialogue == 0 {
            error!("Сценарий не содержит реплик, озвучивать нечего");
            return report.finish(false);
        }
        info!("Прочитано {} элементов сценария, из них {} реплик", turns.len(), dialogue);

        // Шаг 2: Разбиение на запросы и выбор голосов
        let chunker = TurnChunker::new(self.chunking.clone()).with_overhead(self.overhead);
        let mut chunks = chunker.chunk(&turns);
        for chunk in &mut chunks {
            chunk.voice_plan = self.voices.plan_for(chunk);
        }
        send_progress(&self.progress, ProgressUpdate::Chunking { chunks: chunks.len() }).await;
        info!(
            "Сценарий разбит на {} запросов (сервис {}, стиль голосов {})",
            chunks.len(),
            self.backend.name(),
            self.voices.style
        );

        // Шаг 3: Синтез
        let work_dir = match self.work_dir(output_path) {
            Ok(dir) => dir,
            Err(e) => {
                error!("Не удалось создать рабочий каталог: {}", e);
                return report.finish(false);
            }
        };
        if let WorkDir::Kept(path) = &work_dir {
            report.diagnostics_dir = Some(path.clone());
        }

        let mut client = SynthesisClient::new(
            self.backend.clone(),
            self.voices.clone(),
            self.synthesis.clone(),
            work_dir.path(),
        )
        .with_progress(self.progress.clone());
        if let Some(cache) = &self.cache {
            client = client.with_cache(cache.clone());
        }

        let results = client.synthesize_all(chunks).await;
        report.chunks = results.iter().map(ChunkOutcome::from).collect();
        for outcome in report.fallback_chunks() {
            warn!(
                "Запрос {} заменен тишиной: {}",
                outcome.index,
                outcome.error.as_deref().unwrap_or("неизвестная ошибка")
            );
        }

        // Шаг 4: Склейка
        send_progress(&self.progress, ProgressUpdate::Assembling).await;
        let mut assembler = AudioAssembler::new(self.codec.clone(), self.pacing.clone());
        let buffer = assembler.assemble(results, &turns);
        report.speech_segments = buffer.segments_of(SegmentKind::Speech).count();
        report.fallback_segments = buffer.segments_of(SegmentKind::Fallback).count();
        report.duration_secs = buffer.duration_secs() / self.finalize.speed.max(0.01);
        // Одни паузы и отступы выпуском не считаются
        if report.speech_segments + report.fallback_segments == 0 {
            error!("Ни один запрос не синтезирован и не заменен тишиной, выпуск не создается");
            report.duration_secs = 0.0;
            return report.finish(false);
        }

        // Шаг 5: Нормализация и экспорт
        send_progress(&self.progress, ProgressUpdate::Normalizing).await;
        send_progress(&self.progress, ProgressUpdate::Encoding).await;
        let processor = PostProcessor::new(self.codec.clone());
        let success = processor.finalize(buffer, output_path, &self.finalize);
        if success {
            report.output = Some(output_path.to_path_buf());
        }

        drop(work_dir);
        send_progress(&self.progress, ProgressUpdate::Finished).await;
        report.finish(success)
    }

    fn work_dir(&self, output_path: &Path) -> Result<WorkDir> {
        if self.synthesis.keep_diagnostics {
            let stem = output_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("podcast");
            let dir = output_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{}_diagnostics", stem));
            std::fs::create_dir_all(&dir)?;
            info!("Диагностика сохраняется в {}", dir.display());
            return Ok(WorkDir::Kept(dir));
        }

        Ok(WorkDir::Temp(tempfile::Builder::new().prefix("podcast-tts-").tempdir()?))
    }
}
