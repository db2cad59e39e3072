//! # Анализ реплик
//!
//! Эвристики, которые работают только с текстом реплики:
//! определение эмоциональной окраски и оценка длительности речи.
//! Все пороги и словари настраиваются через [`EmotionRules`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::tts::types::Emotion;

/// Правила определения эмоции реплики.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionRules {
    /// Реплика короче этого числа символов может считаться поддакиванием
    pub acknowledgment_max_chars: usize,
    /// Слова-поддакивания
    pub acknowledgment_words: Vec<String>,
    /// Вопрос короче этого числа символов считается любопытством
    pub question_max_chars: usize,
    /// Начала реплик с восторгом
    pub excited_openers: Vec<String>,
    /// Сколько восклицательных знаков делают реплику восторженной
    pub excited_min_exclamations: usize,
    pub agreement_openers: Vec<String>,
    pub contrast_openers: Vec<String>,
    pub thoughtful_openers: Vec<String>,
}

impl Default for EmotionRules {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| s.to_string()).collect()
        }

        Self {
            acknowledgment_max_chars: 20,
            acknowledgment_words: words(&["yeah", "mm-hmm", "uh-huh", "right", "okay", "ah", "yep", "sure"]),
            question_max_chars: 100,
            excited_openers: words(&["wow", "amazing", "incredible", "no way"]),
            excited_min_exclamations: 2,
            agreement_openers: words(&["absolutely", "exactly", "definitely", "totally", "i agree", "that's true"]),
            contrast_openers: words(&["but", "however", "on the other hand", "although", "still,"]),
            thoughtful_openers: words(&["hmm", "you know, that makes me think", "let me think", "interesting", "i wonder"]),
        }
    }
}

impl EmotionRules {
    /// Определяет эмоцию реплики по ее тексту.
    ///
    /// Правила проверяются по порядку, первое сработавшее побеждает.
    /// Пустой текст дает [`Emotion::Neutral`], все, что не подошло
    /// ни под одно правило, получает [`Emotion::Engaged`].
    ///
    /// # Примеры
    ///
    /// ```rust
    /// use podcast_tts::utils::tts::analysis::EmotionRules;
    /// use podcast_tts::utils::tts::types::Emotion;
    ///
    /// let rules = EmotionRules::default();
    /// assert_eq!(rules.infer("Yeah."), Emotion::Acknowledging);
    /// assert_eq!(rules.infer("Why does that matter?"), Emotion::Curious);
    /// ```
    pub fn infer(&self, text: &str) -> Emotion {
        let text = text.trim();
        if text.is_empty() {
            return Emotion::Neutral;
        }

        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '\''))
            .filter(|t| !t.is_empty())
            .collect();
        let char_len = text.chars().count();

        if char_len < self.acknowledgment_max_chars
            && tokens
                .iter()
                .any(|t| self.acknowledgment_words.iter().any(|w| w.eq_ignore_ascii_case(t)))
        {
            return Emotion::Acknowledging;
        }

        if text.contains('?') && char_len < self.question_max_chars {
            return Emotion::Curious;
        }

        let exclamations = text.matches('!').count();
        if starts_with_any(&lower, &self.excited_openers)
            || (self.excited_min_exclamations > 0 && exclamations >= self.excited_min_exclamations)
        {
            return Emotion::Excited;
        }

        if starts_with_any(&lower, &self.agreement_openers) {
            return Emotion::Agreeable;
        }

        if starts_with_any(&lower, &self.contrast_openers) {
            return Emotion::Contrasting;
        }

        if starts_with_any(&lower, &self.thoughtful_openers) {
            return Emotion::Thoughtful;
        }

        Emotion::Engaged
    }
}

/// Проверяет, начинается ли строка с одного из вариантов на границе слова
fn starts_with_any(lower: &str, openers: &[String]) -> bool {
    openers.iter().any(|opener| {
        let opener = opener.to_lowercase();
        lower.starts_with(opener.as_str())
            && lower[opener.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric())
    })
}

/// Количество слов в тексте
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Оценивает длительность речи по количеству слов.
///
/// # Аргументы
///
/// * `words` - Количество слов
/// * `words_per_minute` - Темп речи
/// * `floor` - Минимальная длительность
///
/// # Возвращает
///
/// `max(floor, words / words_per_minute)`
pub fn estimate_speech_duration(words: usize, words_per_minute: f32, floor: Duration) -> Duration {
    if words_per_minute <= 0.0 {
        return floor;
    }
    let secs = words as f64 / words_per_minute as f64 * 60.0;
    Duration::from_secs_f64(secs).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_speech_duration() {
        let floor = Duration::from_secs(5);
        assert_eq!(estimate_speech_duration(0, 150.0, floor), floor);
        assert_eq!(estimate_speech_duration(10, 150.0, floor), floor);
        assert_eq!(estimate_speech_duration(300, 150.0, floor), Duration::from_secs(120));
        assert_eq!(estimate_speech_duration(300, 0.0, floor), floor);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("  Hi   there!  "), 2);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_starts_with_any_respects_word_boundary() {
        let openers = vec!["but".to_string()];
        assert!(starts_with_any("but that is different", &openers));
        assert!(starts_with_any("but, honestly", &openers));
        assert!(!starts_with_any("butter is great", &openers));
    }
}
