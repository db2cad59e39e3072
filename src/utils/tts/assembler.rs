//! # Audio Assembler
//!
//! Склейка результатов синтеза в один непрерывный буфер.
//!
//! Аудио каждого запроса декодируется и делится обратно на реплики:
//! пропорционально числу символов, с подгонкой каждого разреза к самому тихому
//! месту рядом. Тишина вместо несинтезированного запроса делится по числу слов.
//! Затем реплики выкладываются строго по `sequence_index`, а между соседними
//! репликами вставляются паузы, длина которых зависит от контекста.
//!
//! Длина буфера всегда равна сумме длин сегментов и вставленных пауз.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::utils::tts::audio_format::AudioCodec;
use crate::utils::tts::audio_processing::{apply_fade, fade_in, fade_out, find_quiet_point, ms_to_samples, resample};
use crate::utils::tts::types::{
    AudioBuffer, Emotion, SegmentInfo, SegmentKind, SynthesisResult, SynthesisStatus, Turn, TurnFragment, TurnKind,
};

/// Диапазон длительности паузы в миллисекундах (включительно)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRange {
    pub min_ms: u32,
    pub max_ms: u32,
}

impl PauseRange {
    pub const fn new(min_ms: u32, max_ms: u32) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn contains(&self, ms: u32) -> bool {
        (self.min_ms..=self.max_ms).contains(&ms)
    }
}

/// Тип паузы между репликами
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseKind {
    Acknowledgment,
    Quick,
    Normal,
    Thoughtful,
    Transition,
}

/// Настройки темпа и склейки
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// После короткого подтверждения (`Yeah.`, `Right.`)
    pub acknowledgment: PauseRange,
    /// Быстрый обмен: любопытство и воодушевление
    pub quick: PauseRange,
    pub normal: PauseRange,
    pub thoughtful: PauseRange,
    /// Смена темы: после вопроса, после абзаца, перед переходным словом
    pub transition: PauseRange,
    /// Слова, с которых начинается смена темы
    pub transition_words: Vec<String>,
    /// Зерно генератора пауз, `None` - случайное
    pub seed: Option<u64>,
    /// Плавные переходы на краях речевых сегментов, 0 отключает
    pub fade_ms: u32,
    /// Минимальная длина сегмента для плавных переходов
    pub fade_min_ms: u32,
    /// Тишина в начале выпуска
    pub lead_in_ms: u32,
    pub lead_in_fade_ms: u32,
    /// Тишина в конце выпуска
    pub tail_ms: u32,
    pub tail_fade_ms: u32,
    /// Частота итогового буфера, `None` - частота первого синтезированного запроса
    pub sample_rate: Option<u32>,
    /// Частота, если в выпуске нет ни одного синтезированного запроса
    pub default_sample_rate: u32,
    /// Насколько далеко от пропорциональной точки искать тихое место
    pub split_search_ms: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            acknowledgment: PauseRange::new(30, 60),
            quick: PauseRange::new(50, 100),
            normal: PauseRange::new(80, 150),
            thoughtful: PauseRange::new(150, 250),
            transition: PauseRange::new(300, 600),
            transition_words: [
                "so", "now", "anyway", "however", "but", "okay", "alright", "moving on", "speaking of", "let's",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            seed: None,
            fade_ms: 50,
            fade_min_ms: 100,
            lead_in_ms: 500,
            lead_in_fade_ms: 300,
            tail_ms: 800,
            tail_fade_ms: 500,
            sample_rate: None,
            default_sample_rate: 24000,
            split_search_ms: 200,
        }
    }
}

impl PacingConfig {
    pub fn range(&self, kind: PauseKind) -> PauseRange {
        match kind {
            PauseKind::Acknowledgment => self.acknowledgment,
            PauseKind::Quick => self.quick,
            PauseKind::Normal => self.normal,
            PauseKind::Thoughtful => self.thoughtful,
            PauseKind::Transition => self.transition,
        }
    }

    /// Тип паузы между двумя соседними репликами.
    ///
    /// # Аргументы
    ///
    /// * `prev` - Предыдущая реплика
    /// * `next` - Следующая реплика
    /// * `paragraph_break` - Между репликами была пустая строка
    pub fn pause_kind(&self, prev: &Turn, next: &Turn, paragraph_break: bool) -> PauseKind {
        if paragraph_break || prev.text.trim_end().ends_with('?') || self.starts_with_transition(&next.text) {
            return PauseKind::Transition;
        }
        match (prev.emotion, next.emotion) {
            (Emotion::Acknowledging, _) | (_, Emotion::Acknowledging) => PauseKind::Acknowledgment,
            (_, Emotion::Thoughtful) => PauseKind::Thoughtful,
            (_, Emotion::Curious | Emotion::Excited) => PauseKind::Quick,
            _ => PauseKind::Normal,
        }
    }

    fn starts_with_transition(&self, text: &str) -> bool {
        let lower = text.trim_start().to_lowercase();
        self.transition_words.iter().any(|word| {
            let word = word.to_lowercase();
            lower.starts_with(&word)
                && lower[word.len()..]
                    .chars()
                    .next()
                    .is_none_or(|c| !c.is_alphanumeric())
        })
    }
}

/// Часть реплики, полученная из одного запроса
#[derive(Debug, Clone)]
struct Piece {
    part: usize,
    kind: SegmentKind,
    samples: Vec<f32>,
}

/// Декодированный запрос, ожидающий раскладки по репликам
enum Decoded {
    Speech { samples: Vec<f32>, rate: u32 },
    Silence,
    Skip,
}

/// Сборщик итогового буфера
pub struct AudioAssembler {
    codec: Arc<dyn AudioCodec>,
    pacing: PacingConfig,
    rng: StdRng,
}

impl AudioAssembler {
    pub fn new(codec: Arc<dyn AudioCodec>, pacing: PacingConfig) -> Self {
        let rng = match pacing.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { codec, pacing, rng }
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Собирает результаты синтеза в один буфер.
    ///
    /// # Аргументы
    ///
    /// * `results` - Результаты синтеза, по одному на запрос
    /// * `turns` - Все элементы сценария
    ///
    /// # Возвращает
    ///
    /// Буфер с разметкой сегментов. Пустой буфер означает, что озвучивать нечего.
    pub fn assemble(&mut self, mut results: Vec<SynthesisResult>, turns: &[Turn]) -> AudioBuffer {
        results.sort_by_key(|r| r.chunk_index);

        let decoded: Vec<Decoded> = results.iter().map(|r| self.decode(r)).collect();
        let rate = self.pacing.sample_rate.unwrap_or_else(|| {
            decoded
                .iter()
                .find_map(|d| match d {
                    Decoded::Speech { rate, .. } => Some(*rate),
                    _ => None,
                })
                .unwrap_or(self.pacing.default_sample_rate)
        });

        let mut pieces: BTreeMap<usize, Vec<Piece>> = BTreeMap::new();
        for (result, decoded) in results.iter().zip(decoded) {
            let split = match decoded {
                Decoded::Speech { samples, rate: from } => match resample(&samples, from, rate) {
                    Ok(samples) => self.split_speech(samples, &result.fragments, rate),
                    Err(e) => {
                        warn!("Запрос {}: {}, вместо него тишина", result.chunk_index, e);
                        self.split_silence(result, rate)
                    }
                },
                Decoded::Silence => self.split_silence(result, rate),
                Decoded::Skip => continue,
            };
            for (fragment, piece) in result.fragments.iter().zip(split) {
                pieces.entry(fragment.sequence_index).or_default().push(piece);
            }
        }

        let mut ordered: Vec<&Turn> = turns.iter().collect();
        ordered.sort_by_key(|t| t.sequence_index);

        let mut buffer = AudioBuffer::new(rate);
        let mut prev: Option<&Turn> = None;
        let mut paragraph_break = false;

        for turn in ordered {
            match turn.kind {
                TurnKind::Blank => paragraph_break = true,
                TurnKind::Pause | TurnKind::Music => {
                    let len = ms_to_samples(turn.duration_ms.unwrap_or(0), rate);
                    buffer.push_silence(len, SegmentKind::Cue, Some(turn.sequence_index));
                    prev = None;
                    paragraph_break = false;
                }
                TurnKind::Dialogue => {
                    let Some(mut turn_pieces) = pieces.remove(&turn.sequence_index) else {
                        debug!("У реплики {} нет аудио, пропускаем", turn.sequence_index);
                        continue;
                    };
                    if let Some(prev) = prev {
                        let kind = self.pacing.pause_kind(prev, turn, paragraph_break);
                        let ms = self.draw_pause(kind);
                        buffer.push_silence(ms_to_samples(ms, rate), SegmentKind::Pause, None);
                    }
                    turn_pieces.sort_by_key(|p| p.part);
                    for mut piece in turn_pieces {
                        if piece.kind == SegmentKind::Speech {
                            self.fade_segment(&mut piece.samples, rate);
                        }
                        buffer.push_segment(&piece.samples, piece.kind, Some(turn.sequence_index));
                    }
                    prev = Some(turn);
                    paragraph_break = false;
                }
            }
        }

        if !pieces.is_empty() {
            warn!("{} фрагментов не соответствуют ни одной реплике", pieces.len());
        }

        if buffer.segments.is_empty() {
            warn!("Нечего собирать: нет ни одного сегмента");
            return buffer;
        }

        self.add_padding(&mut buffer);
        info!(
            "Собрано {} сегментов, {:.1} с при {} Гц",
            buffer.segments.len(),
            buffer.duration_secs(),
            rate
        );
        buffer
    }

    /// Длительность паузы заданного типа в миллисекундах
    pub fn draw_pause(&mut self, kind: PauseKind) -> u32 {
        let range = self.pacing.range(kind);
        if range.max_ms <= range.min_ms {
            return range.min_ms;
        }
        self.rng.gen_range(range.min_ms..=range.max_ms)
    }

    fn decode(&self, result: &SynthesisResult) -> Decoded {
        match result.status {
            SynthesisStatus::Failed => {
                error!("Запрос {} не синтезирован и пропущен в выпуске", result.chunk_index);
                Decoded::Skip
            }
            SynthesisStatus::Fallback => Decoded::Silence,
            SynthesisStatus::Success => {
                let Some(audio) = &result.audio else {
                    warn!("Запрос {}: успех без аудио, вместо него тишина", result.chunk_index);
                    return Decoded::Silence;
                };
                match self.codec.decode(audio) {
                    Ok((samples, _)) if samples.is_empty() => {
                        warn!("Запрос {}: декодированное аудио пустое, вместо него тишина", result.chunk_index);
                        Decoded::Silence
                    }
                    Ok((samples, rate)) => Decoded::Speech { samples, rate },
                    Err(e) => {
                        warn!("Запрос {}: {}, вместо него тишина", result.chunk_index, e);
                        Decoded::Silence
                    }
                }
            }
        }
    }

    /// Делит речь запроса между фрагментами по числу символов
    fn split_speech(&self, samples: Vec<f32>, fragments: &[TurnFragment], rate: u32) -> Vec<Piece> {
        if fragments.len() <= 1 {
            return fragments
                .iter()
                .map(|f| Piece {
                    part: f.part,
                    kind: SegmentKind::Speech,
                    samples: samples.clone(),
                })
                .collect();
        }

        let weights: Vec<usize> = fragments.iter().map(|f| f.char_len().max(1)).collect();
        let total: usize = weights.iter().sum();
        let len = samples.len();
        let search = ms_to_samples(self.pacing.split_search_ms, rate).min(len / (2 * fragments.len()));

        let mut cuts = Vec::with_capacity(fragments.len() + 1);
        cuts.push(0);
        let mut cumulative = 0;
        for weight in &weights[..weights.len() - 1] {
            cumulative += weight;
            let ideal = len * cumulative / total;
            let prev = *cuts.last().unwrap_or(&0);
            cuts.push(find_quiet_point(&samples, ideal, search, rate).max(prev));
        }
        cuts.push(len);

        fragments
            .iter()
            .zip(cuts.windows(2))
            .map(|(f, bounds)| Piece {
                part: f.part,
                kind: SegmentKind::Speech,
                samples: samples[bounds[0]..bounds[1]].to_vec(),
            })
            .collect()
    }

    /// Делит тишину вместо запроса между фрагментами по числу слов
    fn split_silence(&self, result: &SynthesisResult, rate: u32) -> Vec<Piece> {
        let total = (result.estimated_duration.as_secs_f64() * rate as f64).round() as usize;
        let weights: Vec<usize> = result
            .fragments
            .iter()
            .map(|f| f.text.split_whitespace().count().max(1))
            .collect();
        let weight_sum: usize = weights.iter().sum::<usize>().max(1);

        let mut pieces = Vec::with_capacity(weights.len());
        let mut cumulative = 0;
        let mut start = 0;
        for (fragment, weight) in result.fragments.iter().zip(&weights) {
            cumulative += weight;
            let end = total * cumulative / weight_sum;
            pieces.push(Piece {
                part: fragment.part,
                kind: SegmentKind::Fallback,
                samples: vec![0.0; end - start],
            });
            start = end;
        }
        pieces
    }

    fn fade_segment(&self, samples: &mut [f32], rate: u32) {
        if self.pacing.fade_ms > 0 && samples.len() > ms_to_samples(self.pacing.fade_min_ms, rate) {
            apply_fade(samples, self.pacing.fade_ms, rate);
        }
    }

    fn add_padding(&self, buffer: &mut AudioBuffer) {
        let rate = buffer.sample_rate;
        let content_len = buffer.samples.len();

        if self.pacing.lead_in_ms > 0 {
            let lead = ms_to_samples(self.pacing.lead_in_ms, rate);
            fade_in(&mut buffer.samples, self.pacing.lead_in_fade_ms, rate);
            buffer.samples.splice(0..0, std::iter::repeat_n(0.0, lead));
            for segment in &mut buffer.segments {
                segment.start += lead;
            }
            buffer.segments.insert(
                0,
                SegmentInfo {
                    sequence_index: None,
                    kind: SegmentKind::Padding,
                    start: 0,
                    len: lead,
                },
            );
        }

        if self.pacing.tail_ms > 0 {
            if content_len > 0 {
                fade_out(&mut buffer.samples, self.pacing.tail_fade_ms, rate);
            }
            buffer.push_silence(ms_to_samples(self.pacing.tail_ms, rate), SegmentKind::Padding, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tts::types::Host;

    fn turn(seq: usize, text: &str, emotion: Emotion) -> Turn {
        let mut turn = Turn::dialogue(seq, Host::Speaker0, text);
        turn.emotion = emotion;
        turn
    }

    #[test]
    fn test_pause_kind_rules() {
        let pacing = PacingConfig::default();
        let question = turn(0, "What do you think?", Emotion::Curious);
        let plain = turn(1, "It works well.", Emotion::Engaged);
        let ack = turn(2, "Yeah.", Emotion::Acknowledging);
        let shift = turn(3, "So, on to the next topic.", Emotion::Engaged);

        assert_eq!(pacing.pause_kind(&question, &plain, false), PauseKind::Transition);
        assert_eq!(pacing.pause_kind(&plain, &ack, false), PauseKind::Acknowledgment);
        assert_eq!(pacing.pause_kind(&plain, &shift, false), PauseKind::Transition);
        assert_eq!(pacing.pause_kind(&plain, &plain, false), PauseKind::Normal);
        assert_eq!(pacing.pause_kind(&plain, &plain, true), PauseKind::Transition);
    }

    #[test]
    fn test_transition_word_needs_word_boundary() {
        let pacing = PacingConfig::default();
        let prev = turn(0, "Fine.", Emotion::Engaged);
        let next = turn(1, "Nowhere else does this happen.", Emotion::Engaged);
        assert_eq!(pacing.pause_kind(&prev, &next, false), PauseKind::Normal);
    }

    #[test]
    fn test_pause_range_contains() {
        let range = PauseRange::new(30, 60);
        assert!(range.contains(30));
        assert!(range.contains(60));
        assert!(!range.contains(61));
    }
}
