//! # Voice Assignment
//!
//! Таблица голосов: по паре (ведущий, эмоция) выбирает голос синтеза и
//! инструкцию подачи. Это чистая функция без ввода-вывода, стратегия
//! выбора задается через [`VoiceStyle`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::tts::TtsProvider;
use crate::utils::tts::types::{Chunk, Emotion, Host, VoiceAssignment, VoicePlan};

/// Стратегия выбора голоса
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStyle {
    /// Постоянный голос ведущего, инструкция по эмоции
    #[default]
    Default,
    /// Эмоция выбирает голос из пула ведущего
    Varied,
    /// Постоянный голос и ровная подача без учета эмоции
    Consistent,
}

impl FromStr for VoiceStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(VoiceStyle::Default),
            "varied" => Ok(VoiceStyle::Varied),
            "consistent" => Ok(VoiceStyle::Consistent),
            other => Err(format!("unknown voice style '{}', expected default, varied or consistent", other)),
        }
    }
}

impl fmt::Display for VoiceStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceStyle::Default => "default",
            VoiceStyle::Varied => "varied",
            VoiceStyle::Consistent => "consistent",
        };
        f.write_str(name)
    }
}

/// Голосовой профиль одного ведущего
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostProfile {
    /// Отображаемое имя, оно же метка в многоголосом запросе
    pub name: String,
    /// Основной голос
    pub default_voice: String,
    /// Запасные голоса, по порядку
    #[serde(default)]
    pub pool: Vec<String>,
    /// Голоса по эмоциям для стиля `varied`
    #[serde(default)]
    pub emotion_voices: BTreeMap<Emotion, String>,
    /// Описание манеры для стиля `consistent`
    #[serde(default)]
    pub traits: String,
}

impl HostProfile {
    /// Все голоса ведущего без повторов: основной, затем пул
    pub fn voices(&self) -> Vec<String> {
        let mut voices = vec![self.default_voice.clone()];
        for voice in self.emotion_voices.values().chain(self.pool.iter()) {
            if !voices.iter().any(|v| v.eq_ignore_ascii_case(voice)) {
                voices.push(voice.clone());
            }
        }
        voices
    }
}

/// Таблица голосов и инструкций подачи.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceTable {
    pub style: VoiceStyle,
    pub speaker0: HostProfile,
    pub speaker1: HostProfile,
    /// Общее начало инструкции
    pub base_instruction: String,
    /// Продолжение инструкции по эмоции
    pub instructions: BTreeMap<Emotion, String>,
    /// Инструкции, которые заменяют общее начало целиком
    pub standalone_instructions: BTreeMap<Emotion, String>,
    /// Инструкция для представления ведущего (`I'm Sarah`)
    pub intro_instruction: String,
}

impl Default for VoiceTable {
    fn default() -> Self {
        let instructions = [
            (Emotion::Excited, "With mild interest and engagement, not overly excited"),
            (Emotion::Thoughtful, "In a thoughtful manner but keep the pace moving"),
            (Emotion::Curious, "With genuine curiosity, maintain professional tone"),
            (Emotion::Contrasting, "With slight emphasis on the contrast"),
            (Emotion::Agreeable, "With pleasant agreement, keep it quick"),
            (Emotion::Engaged, "With professional engagement and energy"),
        ]
        .into_iter()
        .map(|(e, s)| (e, s.to_string()))
        .collect();

        let standalone_instructions = [(
            Emotion::Acknowledging,
            "Say this very quickly as a natural acknowledgment".to_string(),
        )]
        .into_iter()
        .collect();

        Self {
            style: VoiceStyle::Default,
            speaker0: HostProfile {
                name: "Sarah".to_string(),
                default_voice: "Zephyr".to_string(),
                pool: vec!["Kore".to_string(), "Aoede".to_string(), "Callirrhoe".to_string()],
                emotion_voices: [
                    (Emotion::Thoughtful, "Kore".to_string()),
                    (Emotion::Curious, "Leda".to_string()),
                    (Emotion::Agreeable, "Aoede".to_string()),
                ]
                .into_iter()
                .collect(),
                traits: "professional and engaging".to_string(),
            },
            speaker1: HostProfile {
                name: "Michael".to_string(),
                default_voice: "Puck".to_string(),
                pool: vec!["Orus".to_string(), "Fenrir".to_string(), "Charon".to_string()],
                emotion_voices: [
                    (Emotion::Excited, "Orus".to_string()),
                    (Emotion::Thoughtful, "Charon".to_string()),
                    (Emotion::Acknowledging, "Gacrux".to_string()),
                ]
                .into_iter()
                .collect(),
                traits: "friendly and conversational".to_string(),
            },
            base_instruction: "Read at a brisk, energetic pace.".to_string(),
            instructions,
            standalone_instructions,
            intro_instruction: "Read this introduction clearly and warmly".to_string(),
        }
    }
}

impl VoiceTable {
    /// Таблица по умолчанию для сервиса синтеза.
    ///
    /// У OpenAI свой набор голосов, инструкции подачи общие.
    pub fn for_provider(provider: TtsProvider) -> Self {
        let table = Self::default();
        match provider {
            TtsProvider::Gemini => table,
            TtsProvider::OpenAI => Self {
                speaker0: HostProfile {
                    default_voice: "nova".to_string(),
                    pool: vec!["shimmer".to_string(), "alloy".to_string()],
                    emotion_voices: [(Emotion::Thoughtful, "shimmer".to_string())].into_iter().collect(),
                    ..table.speaker0.clone()
                },
                speaker1: HostProfile {
                    default_voice: "onyx".to_string(),
                    pool: vec!["echo".to_string(), "fable".to_string()],
                    emotion_voices: [(Emotion::Excited, "echo".to_string())].into_iter().collect(),
                    ..table.speaker1.clone()
                },
                ..table
            },
        }
    }

    pub fn with_style(mut self, style: VoiceStyle) -> Self {
        self.style = style;
        self
    }

    pub fn profile(&self, host: Host) -> &HostProfile {
        match host {
            Host::Speaker0 => &self.speaker0,
            Host::Speaker1 => &self.speaker1,
        }
    }

    /// Имена ведущих в порядке индексов
    pub fn host_names(&self) -> [String; 2] {
        [self.speaker0.name.clone(), self.speaker1.name.clone()]
    }

    /// Выбирает голос и инструкцию подачи.
    ///
    /// # Аргументы
    ///
    /// * `speaker` - Ведущий
    /// * `emotion` - Выведенная эмоция реплики
    ///
    /// # Примеры
    ///
    /// ```rust
    /// use podcast_tts::utils::tts::voices::VoiceTable;
    /// use podcast_tts::utils::tts::types::{Emotion, Host};
    ///
    /// let table = VoiceTable::default();
    /// let assignment = table.assign(Host::Speaker1, Emotion::Acknowledging);
    /// assert_eq!(assignment.voice, "Puck");
    /// ```
    pub fn assign(&self, speaker: Host, emotion: Emotion) -> VoiceAssignment {
        let profile = self.profile(speaker);

        let voice = match self.style {
            VoiceStyle::Varied => profile
                .emotion_voices
                .get(&emotion)
                .cloned()
                .unwrap_or_else(|| profile.default_voice.clone()),
            VoiceStyle::Default | VoiceStyle::Consistent => profile.default_voice.clone(),
        };

        let instruction = match self.style {
            VoiceStyle::Consistent => self.join_instruction(&format!("In a {} voice", profile.traits)),
            VoiceStyle::Default | VoiceStyle::Varied => self.emotion_instruction(emotion),
        };

        VoiceAssignment { voice, instruction }
    }

    /// Инструкция для конкретной реплики: представление ведущего важнее эмоции
    pub fn assign_for_text(&self, speaker: Host, emotion: Emotion, text: &str) -> VoiceAssignment {
        let mut assignment = self.assign(speaker, emotion);
        if self.is_introduction(text) && !self.intro_instruction.is_empty() {
            assignment.instruction = Some(self.intro_instruction.clone());
        }
        assignment
    }

    /// Строит план голосов для запроса
    pub fn plan_for(&self, chunk: &Chunk) -> VoicePlan {
        let mut plan = VoicePlan::default();
        for fragment in &chunk.fragments {
            let assignment = self.assign_for_text(fragment.speaker, fragment.emotion, &fragment.text);
            plan.voices.entry(fragment.speaker).or_insert(assignment.voice);
            plan.labels
                .entry(fragment.speaker)
                .or_insert_with(|| self.profile(fragment.speaker).name.clone());
            plan.instructions.push(assignment.instruction);
        }
        plan
    }

    /// Следующий еще не опробованный голос ведущего
    pub fn next_voice(&self, host: Host, tried: &[String]) -> Option<String> {
        self.profile(host)
            .voices()
            .into_iter()
            .find(|voice| !tried.iter().any(|t| t.eq_ignore_ascii_case(voice)))
    }

    /// Длина самой длинной инструкции подачи, которую может выдать таблица
    pub fn max_instruction_chars(&self) -> usize {
        let joined = self
            .instructions
            .values()
            .cloned()
            .chain([&self.speaker0, &self.speaker1].into_iter().map(|p| format!("In a {} voice", p.traits)))
            .filter_map(|suffix| self.join_instruction(&suffix));

        self.standalone_instructions
            .values()
            .cloned()
            .chain([self.base_instruction.clone(), self.intro_instruction.clone()])
            .chain(joined)
            .map(|instruction| instruction.trim().chars().count())
            .max()
            .unwrap_or(0)
    }

    fn emotion_instruction(&self, emotion: Emotion) -> Option<String> {
        if let Some(standalone) = self.standalone_instructions.get(&emotion) {
            return Some(standalone.clone());
        }
        match self.instructions.get(&emotion) {
            Some(suffix) => self.join_instruction(suffix),
            None if self.base_instruction.is_empty() => None,
            None => Some(self.base_instruction.clone()),
        }
    }

    fn join_instruction(&self, suffix: &str) -> Option<String> {
        let joined = format!("{} {}", self.base_instruction.trim(), suffix.trim());
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }

    fn is_introduction(&self, text: &str) -> bool {
        [&self.speaker0.name, &self.speaker1.name]
            .iter()
            .any(|name| text.contains(&format!("I'm {}", name)) || text.contains(&format!("I am {}", name)))
    }
}
