//! # Synthesis Client
//!
//! Синтез одного запроса ([`Chunk`]) с повторами и заменой тишиной.
//!
//! ## Политика
//!
//! - Перед каждой попыткой выдерживается пауза `request_delay_ms`
//!   (ограничение частоты запросов к сервису)
//! - До `max_attempts` попыток, между попытками экспоненциальная задержка
//!   `backoff_base_ms * 2^attempt`
//! - Ответ короче `min_audio_bytes` считается неудачной попыткой
//! - Ошибка голоса переключает ведущего на следующий голос из его пула,
//!   когда пул исчерпан, повторы прекращаются
//! - После исчерпания попыток запрос заменяется тишиной длительностью
//!   `max(min_fallback_ms, слова / words_per_minute)`
//!
//! Клиент никогда не возвращает ошибку: каждый запрос дает ровно один
//! [`SynthesisResult`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

use crate::utils::tts::analysis::estimate_speech_duration;
use crate::utils::tts::cache::AudioCache;
use crate::utils::tts::chunker::RequestOverhead;
use crate::utils::tts::speech_api::{SpeakerVoice, SpeechBackend, SpeechError, SpeechRequest};
use crate::utils::tts::types::{
    AudioEncoding, Chunk, Host, ProgressUpdate, SpeechAudio, SynthesisResult, SynthesisStatus, send_progress,
};
use crate::utils::tts::voices::VoiceTable;

/// Настройки клиента синтеза
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Максимальное число попыток на запрос
    pub max_attempts: u32,
    /// Пауза перед каждой попыткой, мс
    pub request_delay_ms: u64,
    /// База экспоненциальной задержки между попытками, мс
    pub backoff_base_ms: u64,
    /// Верхняя граница задержки между попытками, мс
    pub max_backoff_ms: u64,
    /// Минимальный размер аудио в ответе, байт
    pub min_audio_bytes: usize,
    /// Темп речи для оценки длительности тишины
    pub words_per_minute: f32,
    /// Минимальная длительность тишины вместо запроса, мс
    pub min_fallback_ms: u64,
    /// Заменять несинтезированный запрос тишиной
    pub fallback_to_silence: bool,
    /// Сохранять ответы сервиса после завершения запроса
    pub keep_diagnostics: bool,
    /// Инструкция для многоголосого запроса, `{names}` заменяется именами ведущих
    pub multi_speaker_instruction: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_delay_ms: 2000,
            backoff_base_ms: 1000,
            max_backoff_ms: 30_000,
            min_audio_bytes: 1000,
            words_per_minute: 150.0,
            min_fallback_ms: 5000,
            fallback_to_silence: true,
            keep_diagnostics: false,
            multi_speaker_instruction: Some(
                "Read this conversation between {names} at a brisk, energetic pace".to_string(),
            ),
        }
    }
}

impl SynthesisConfig {
    /// Задержка после неудачной попытки с номером `attempt` (с нуля)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }

    pub fn fallback_duration(&self, words: usize) -> Duration {
        estimate_speech_duration(words, self.words_per_minute, Duration::from_millis(self.min_fallback_ms))
    }
}

/// Накладные расходы запроса, которые строит [`SynthesisClient::build_request`].
///
/// # Аргументы
///
/// * `voices` - Таблица голосов
/// * `config` - Настройки синтеза с инструкцией многоголосого запроса
/// * `multi_speaker` - Могут ли в запросе встретиться оба ведущих
pub fn request_overhead(voices: &VoiceTable, config: &SynthesisConfig, multi_speaker: bool) -> RequestOverhead {
    let [name0, name1] = voices.host_names();
    let mut instruction = voices.max_instruction_chars();
    let mut per_fragment = 0;

    if multi_speaker {
        // Строка `Имя: текст`
        per_fragment = name0.chars().count().max(name1.chars().count()) + 2;
        if let Some(template) = &config.multi_speaker_instruction {
            let names = format!("{} and {}", name0, name1);
            instruction = instruction.max(template.replace("{names}", &names).trim().chars().count());
        }
    }

    RequestOverhead {
        // Инструкция отделяется от текста `: `
        per_request: if instruction > 0 { instruction + 2 } else { 0 },
        per_fragment,
    }
}

/// Временные файлы одного запроса.
///
/// Файлы удаляются при уничтожении, если не включено сохранение диагностики.
/// Так при любом выходе из синтеза остаются только файлы текущего запроса.
pub struct ChunkArtifacts {
    dir: PathBuf,
    index: usize,
    paths: Vec<PathBuf>,
    keep: bool,
}

impl ChunkArtifacts {
    pub fn new(dir: &Path, index: usize, keep: bool) -> Self {
        Self {
            dir: dir.to_path_buf(),
            index,
            paths: Vec::new(),
            keep,
        }
    }

    /// Путь файла запроса с заданным суффиксом
    pub fn path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("chunk_{:03}.{}", self.index, suffix))
    }

    /// Сохраняет сырой ответ сервиса. Ошибки записи только логируются.
    pub fn write_response(&mut self, attempt: u32, value: &serde_json::Value) {
        let path = self.path(&format!("attempt{}.response.json", attempt));
        let written = serde_json::to_vec_pretty(value)
            .map_err(std::io::Error::other)
            .and_then(|raw| fs::write(&path, raw));
        self.track(path, written);
    }

    /// Сохраняет сырое аудио ответа. Ошибки записи только логируются.
    pub fn write_audio(&mut self, attempt: u32, audio: &SpeechAudio) {
        let extension = match audio.encoding {
            AudioEncoding::Pcm16 { .. } => "pcm",
            AudioEncoding::Wav => "wav",
            AudioEncoding::Mp3 => "mp3",
            AudioEncoding::Other(_) => "bin",
        };
        let path = self.path(&format!("attempt{}.{}", attempt, extension));
        let written = fs::write(&path, &audio.bytes);
        self.track(path, written);
    }

    fn track(&mut self, path: PathBuf, written: std::io::Result<()>) {
        match written {
            Ok(()) => self.paths.push(path),
            Err(e) => warn!("Не удалось сохранить диагностику {}: {}", path.display(), e),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for ChunkArtifacts {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                debug!("Не удалось удалить {}: {}", path.display(), e);
            }
        }
    }
}

/// Клиент синтеза запросов
pub struct SynthesisClient {
    backend: Arc<dyn SpeechBackend>,
    voices: VoiceTable,
    config: SynthesisConfig,
    work_dir: PathBuf,
    cache: Option<AudioCache>,
    progress: Option<Sender<ProgressUpdate>>,
}

impl SynthesisClient {
    /// Создает клиента.
    ///
    /// # Аргументы
    ///
    /// * `backend` - Сервис синтеза
    /// * `voices` - Таблица голосов
    /// * `config` - Настройки повторов и замены тишиной
    /// * `work_dir` - Рабочий каталог прогона для временных файлов
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        voices: VoiceTable,
        config: SynthesisConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            voices,
            config,
            work_dir: work_dir.into(),
            cache: None,
            progress: None,
        }
    }

    pub fn with_cache(mut self, cache: AudioCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, sender: Option<Sender<ProgressUpdate>>) -> Self {
        self.progress = sender;
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Синтезирует все запросы по очереди.
    ///
    /// Результаты возвращаются в порядке запросов.
    pub async fn synthesize_all(&self, chunks: Vec<Chunk>) -> Vec<SynthesisResult> {
        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        for (i, chunk) in chunks.into_iter().enumerate() {
            send_progress(&self.progress, ProgressUpdate::Synthesizing { current: i + 1, total }).await;
            results.push(self.synthesize(chunk).await);
        }
        results
    }

    /// Синтезирует один запрос.
    ///
    /// Запрос потребляется. Результат всегда один: `Success` с аудио,
    /// `Fallback` с оценкой длительности тишины или `Failed`, если замена
    /// тишиной выключена.
    pub async fn synthesize(&self, mut chunk: Chunk) -> SynthesisResult {
        if chunk.voice_plan.voices.is_empty() {
            chunk.voice_plan = self.voices.plan_for(&chunk);
        }

        let mut artifacts = ChunkArtifacts::new(&self.work_dir, chunk.index, self.config.keep_diagnostics);
        let mut tried: BTreeMap<Host, Vec<String>> = chunk
            .voice_plan
            .voices
            .iter()
            .map(|(host, voice)| (*host, vec![voice.clone()]))
            .collect();

        if let Some(audio) = self.cached(&chunk) {
            info!("Запрос {}: аудио взято из кэша", chunk.index);
            return self.success(chunk, audio);
        }

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 0..max_attempts {
            chunk.attempt_count = attempt + 1;
            let request = self.build_request(&chunk);

            if self.config.request_delay_ms > 0 {
                debug!("Ожидание {} мс перед запросом", self.config.request_delay_ms);
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }

            info!(
                "Запрос {}: попытка {}/{}, голоса {:?}",
                chunk.index,
                attempt + 1,
                max_attempts,
                request.speakers.iter().map(|s| s.voice.as_str()).collect::<Vec<_>>()
            );

            let error = match self.backend.synthesize(&request).await {
                Ok(response) => {
                    if let Some(raw) = &response.raw_response {
                        artifacts.write_response(attempt + 1, raw);
                    }
                    artifacts.write_audio(attempt + 1, &response.audio);

                    if response.audio.bytes.len() >= self.config.min_audio_bytes {
                        self.store_in_cache(&request, &response.audio);
                        return self.success(chunk, response.audio);
                    }
                    SpeechError::InvalidAudio(format!(
                        "{} байт аудио, минимум {}",
                        response.audio.bytes.len(),
                        self.config.min_audio_bytes
                    ))
                }
                Err(e) => e,
            };

            chunk.last_error = Some(error.to_string());
            match &error {
                SpeechError::Quota(message) => {
                    error!("Запрос {}: превышена квота (429/RESOURCE_EXHAUSTED): {}", chunk.index, message);
                }
                _ => warn!("Запрос {}: {}", chunk.index, error),
            }

            // Повтор с тем же голосом бессмысленен, пробуем другой
            if !error.is_retryable() {
                let voice = match &error {
                    SpeechError::VoiceUnavailable { voice, .. } => Some(voice.as_str()),
                    _ => None,
                };
                if !self.substitute_voice(&mut chunk, voice, &mut tried) {
                    warn!("Запрос {}: неопробованных голосов не осталось", chunk.index);
                    break;
                }
                continue;
            }

            if attempt + 1 < max_attempts {
                let wait = self.config.backoff(attempt);
                warn!("Повтор запроса через {} мс...", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }

        self.fallback(chunk).await
    }

    /// Строит запрос к сервису по плану голосов.
    ///
    /// Один ведущий: текст фрагментов через пробел и инструкция первого
    /// фрагмента. Несколько ведущих: строки `Имя: текст` и общая инструкция.
    pub fn build_request(&self, chunk: &Chunk) -> SpeechRequest {
        let plan = &chunk.voice_plan;
        let label = |host: Host| {
            plan.labels
                .get(&host)
                .cloned()
                .unwrap_or_else(|| self.voices.profile(host).name.clone())
        };
        let speakers: Vec<SpeakerVoice> = chunk
            .speakers()
            .into_iter()
            .map(|host| SpeakerVoice {
                label: label(host),
                voice: plan
                    .voice_for(host)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.voices.profile(host).default_voice.clone()),
            })
            .collect();

        if speakers.len() > 1 {
            let text = chunk
                .fragments
                .iter()
                .map(|f| format!("{}: {}", label(f.speaker), f.text))
                .collect::<Vec<_>>()
                .join("\n");
            let names = speakers.iter().map(|s| s.label.as_str()).collect::<Vec<_>>().join(" and ");
            let instruction = self
                .config
                .multi_speaker_instruction
                .as_ref()
                .map(|template| template.replace("{names}", &names));
            SpeechRequest {
                text,
                speakers,
                instruction,
            }
        } else {
            SpeechRequest {
                text: chunk.joined_text(),
                speakers,
                instruction: plan.instructions.first().cloned().flatten(),
            }
        }
    }

    /// Переключает ведущего на следующий неопробованный голос.
    ///
    /// Если `voice` задан, меняется голос того ведущего, который им говорил,
    /// иначе первого ведущего, у которого остались голоса.
    fn substitute_voice(
        &self,
        chunk: &mut Chunk,
        voice: Option<&str>,
        tried: &mut BTreeMap<Host, Vec<String>>,
    ) -> bool {
        let mut hosts: Vec<Host> = chunk.speakers();
        if let Some(voice) = voice {
            if let Some(host) = hosts.iter().copied().find(|host| {
                chunk
                    .voice_plan
                    .voice_for(*host)
                    .is_some_and(|v| v.eq_ignore_ascii_case(voice))
            }) {
                hosts = vec![host];
            }
        }

        for host in hosts {
            let used = tried.entry(host).or_default();
            if let Some(next) = self.voices.next_voice(host, used) {
                info!("Запрос {}: ведущий {} переключен на голос {}", chunk.index, host, next);
                used.push(next.clone());
                chunk.voice_plan.voices.insert(host, next);
                return true;
            }
        }
        false
    }

    fn cached(&self, chunk: &Chunk) -> Option<SpeechAudio> {
        let cache = self.cache.as_ref()?;
        let request = self.build_request(chunk);
        let key = AudioCache::key(self.backend.name(), &self.backend.model_for(&request), &request);
        cache
            .get(&key)
            .filter(|audio| audio.bytes.len() >= self.config.min_audio_bytes)
    }

    fn store_in_cache(&self, request: &SpeechRequest, audio: &SpeechAudio) {
        if let Some(cache) = &self.cache {
            let key = AudioCache::key(self.backend.name(), &self.backend.model_for(request), request);
            if let Err(e) = cache.put(&key, audio) {
                warn!("Не удалось сохранить аудио в кэш: {}", e);
            }
        }
    }

    fn success(&self, chunk: Chunk, audio: SpeechAudio) -> SynthesisResult {
        let estimated_duration = match audio.encoding {
            AudioEncoding::Pcm16 { channels } if audio.sample_rate > 0 => {
                let frames = audio.bytes.len() / 2 / channels.max(1) as usize;
                Duration::from_secs_f64(frames as f64 / audio.sample_rate as f64)
            }
            _ => self.config.fallback_duration(chunk.word_count()),
        };

        info!(
            "Запрос {}: синтезировано {} байт (~{:.1} с)",
            chunk.index,
            audio.bytes.len(),
            estimated_duration.as_secs_f32()
        );

        SynthesisResult {
            chunk_index: chunk.index,
            status: SynthesisStatus::Success,
            audio: Some(audio),
            estimated_duration,
            fragments: chunk.fragments,
            attempts: chunk.attempt_count,
            error: None,
        }
    }

    async fn fallback(&self, chunk: Chunk) -> SynthesisResult {
        let estimated_duration = self.config.fallback_duration(chunk.word_count());
        let reason = chunk
            .last_error
            .clone()
            .unwrap_or_else(|| "синтез не удался".to_string());

        let status = if self.config.fallback_to_silence {
            warn!(
                "Запрос {}: после {} попыток заменяется тишиной {:.1} с: {}",
                chunk.index,
                chunk.attempt_count,
                estimated_duration.as_secs_f32(),
                reason
            );
            send_progress(
                &self.progress,
                ProgressUpdate::ChunkFallback {
                    index: chunk.index,
                    reason: reason.clone(),
                },
            )
            .await;
            SynthesisStatus::Fallback
        } else {
            error!("Запрос {}: синтез не удался: {}", chunk.index, reason);
            SynthesisStatus::Failed
        };

        SynthesisResult {
            chunk_index: chunk.index,
            status,
            audio: None,
            estimated_duration,
            fragments: chunk.fragments,
            attempts: chunk.attempt_count,
            error: Some(reason),
        }
    }
}
