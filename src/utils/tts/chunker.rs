//! # Turn Chunker
//!
//! Упаковка реплик в запросы к сервису синтеза с ограничением на длину текста.
//!
//! Реплики упаковываются жадно и по порядку. Паузы и музыкальные вставки
//! всегда закрывают текущий запрос, они не отправляются в синтез.
//! Реплика длиннее лимита режется на части по концу предложения или
//! по пробелу, но никогда внутри слова.
//!
//! Лимит относится к тексту, который уходит в сервис: метки ведущих
//! и инструкция подачи учитываются через [`RequestOverhead`].

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::utils::tts::types::{Chunk, Turn, TurnFragment, TurnKind};

/// Настройки разбиения на запросы
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Максимальная длина текста одного запроса в символах
    pub max_chars: usize,
    /// Начинать новый запрос при смене ведущего.
    /// Нужно для сервисов без многоголосого синтеза.
    pub split_on_speaker_change: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 7500,
            split_on_speaker_change: false,
        }
    }
}

/// Символы запроса сверх текста реплик
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestOverhead {
    /// Инструкция подачи вместе с разделителем
    pub per_request: usize,
    /// Метка ведущего перед каждым фрагментом (`Имя: `)
    pub per_fragment: usize,
}

impl RequestOverhead {
    /// Место под текст одного фрагмента при лимите запроса `max_chars`
    pub fn text_room(&self, max_chars: usize) -> usize {
        max_chars.saturating_sub(self.per_request + self.per_fragment)
    }
}

/// Разбиение реплик на запросы
#[derive(Clone, Debug, Default)]
pub struct TurnChunker {
    config: ChunkingConfig,
    overhead: RequestOverhead,
}

impl TurnChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            overhead: RequestOverhead::default(),
        }
    }

    pub fn with_overhead(mut self, overhead: RequestOverhead) -> Self {
        self.overhead = overhead;
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Разбивает реплики на запросы.
    ///
    /// # Аргументы
    ///
    /// * `turns` - Реплики в порядке сценария
    ///
    /// # Возвращает
    ///
    /// Запросы в порядке сценария. Текст каждого запроса вместе с
    /// накладными расходами не длиннее `max_chars`, кроме случая, когда
    /// одно слово само не помещается.
    pub fn chunk(&self, turns: &[Turn]) -> Vec<Chunk> {
        let max_chars = self.config.max_chars.max(1);
        let budget = max_chars.saturating_sub(self.overhead.per_request);
        let text_room = self.overhead.text_room(max_chars).max(1);
        let mut chunks = Vec::new();
        let mut current: Vec<TurnFragment> = Vec::new();
        let mut current_len = 0usize;

        let flush = |current: &mut Vec<TurnFragment>, current_len: &mut usize, chunks: &mut Vec<Chunk>| {
            if !current.is_empty() {
                let chunk = Chunk::new(chunks.len(), std::mem::take(current));
                debug!(
                    "Запрос {}: {} фрагментов, {} символов",
                    chunk.index,
                    chunk.fragments.len(),
                    chunk.char_len()
                );
                chunks.push(chunk);
            }
            *current_len = 0;
        };

        for turn in turns {
            match turn.kind {
                TurnKind::Pause | TurnKind::Music => flush(&mut current, &mut current_len, &mut chunks),
                TurnKind::Blank => {}
                TurnKind::Dialogue => {
                    let Some(speaker) = turn.speaker else {
                        continue;
                    };

                    for (part, text) in split_text(&turn.text, text_room).into_iter().enumerate() {
                        let fragment = TurnFragment {
                            sequence_index: turn.sequence_index,
                            part,
                            speaker,
                            emotion: turn.emotion,
                            text,
                        };
                        let len = fragment.char_len() + self.overhead.per_fragment;

                        if let Some(last) = current.last() {
                            let over_limit = current_len + 1 + len > budget;
                            let speaker_change = self.config.split_on_speaker_change && last.speaker != speaker;
                            if over_limit || speaker_change {
                                flush(&mut current, &mut current_len, &mut chunks);
                            }
                        }

                        current_len = if current.is_empty() { len } else { current_len + 1 + len };
                        current.push(fragment);
                    }
                }
            }
        }
        flush(&mut current, &mut current_len, &mut chunks);

        info!(
            "{} элементов сценария разбито на {} запросов (не длиннее {} символов)",
            turns.len(),
            chunks.len(),
            max_chars
        );
        chunks
    }
}

/// Разбивает реплики на запросы с настройками по умолчанию и заданным лимитом
pub fn chunk_turns(turns: &[Turn], max_chars: usize) -> Vec<Chunk> {
    TurnChunker::new(ChunkingConfig {
        max_chars,
        ..ChunkingConfig::default()
    })
    .chunk(turns)
}

/// Режет текст на части не длиннее `max_chars` символов.
///
/// Пробелы нормализуются, части при склейке через пробел дают
/// нормализованный исходный текст. Предпочитается разрез после конца
/// предложения во второй половине окна, иначе по последнему пробелу.
/// Слово длиннее лимита остается целым.
///
/// # Примеры
///
/// ```rust
/// use podcast_tts::utils::tts::chunker::split_text;
///
/// let parts = split_text("One two. Three four five.", 12);
/// assert_eq!(parts, vec!["One two.", "Three four", "five."]);
/// ```
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Vec::new();
    }

    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut remaining = normalized.as_str();

    while remaining.chars().count() > max_chars {
        let cut = find_cut(remaining, max_chars);
        let (head, tail) = remaining.split_at(cut);
        parts.push(head.trim_end().to_string());
        remaining = tail.trim_start();
    }
    if !remaining.is_empty() {
        parts.push(remaining.to_string());
    }

    parts
}

/// Байтовая позиция пробела, по которому режется текст
fn find_cut(text: &str, max_chars: usize) -> usize {
    // Окно из max_chars символов плюс следующий символ: пробел сразу за
    // окном тоже подходит для разреза
    let window_end = text
        .char_indices()
        .nth(max_chars + 1)
        .map_or(text.len(), |(i, _)| i);
    let window = &text[..window_end];
    let half = window_end / 2;

    let mut sentence_cut = None;
    let mut space_cut = None;
    let mut prev = None;
    for (i, c) in window.char_indices() {
        if c == ' ' && i > 0 {
            space_cut = Some(i);
            if matches!(prev, Some('.' | '!' | '?')) && i > half {
                sentence_cut = Some(i);
            }
        }
        prev = Some(c);
    }

    if let Some(cut) = sentence_cut.or(space_cut) {
        return cut;
    }

    // Одно слово длиннее лимита
    text.find(' ').unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_text_short_text_is_untouched() {
        assert_eq!(split_text("  Hello   world  ", 50), vec!["Hello world"]);
        assert!(split_text("   ", 50).is_empty());
    }

    #[test]
    fn test_split_text_prefers_sentence_end() {
        let parts = split_text("First sentence here. Second one follows now", 30);
        assert_eq!(parts, vec!["First sentence here.", "Second one follows now"]);
    }

    #[test]
    fn test_overhead_counts_against_limit() {
        use crate::utils::tts::types::Host;

        let turns = vec![
            Turn::dialogue(0, Host::Speaker0, "Hello."),
            Turn::dialogue(1, Host::Speaker1, "Hi there!"),
        ];
        let overhead = RequestOverhead {
            per_request: 10,
            per_fragment: 9,
        };
        let chunker = TurnChunker::new(ChunkingConfig {
            max_chars: 40,
            ..ChunkingConfig::default()
        });

        assert_eq!(chunker.chunk(&turns).len(), 1, "Без накладных расходов обе реплики помещаются");

        let chunks = chunker.clone().with_overhead(overhead).chunk(&turns);
        assert_eq!(chunks.len(), 2, "Метки и инструкция не оставляют места для второй реплики");
        for chunk in &chunks {
            let cost: usize = chunk.fragments.iter().map(|f| f.char_len() + 9 + 1).sum::<usize>() - 1;
            assert!(cost + 10 <= 40);
        }
    }

    #[test]
    fn test_split_text_keeps_long_word_whole() {
        let parts = split_text("a supercalifragilistic b", 5);
        assert_eq!(parts, vec!["a", "supercalifragilistic", "b"]);
    }
}
