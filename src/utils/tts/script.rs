//! # Script Parser
//!
//! Разбор текстового сценария подкаста в упорядоченный список [`Turn`].
//!
//! Разметка строчная. Каждая строка относится ровно к одному правилу
//! грамматики ([`MarkerKind`]), правила проверяются по порядку:
//!
//! - `[Speaker 0] текст` - индекс ведущего, допускает `**`, `[Speaker-1]`,
//!   `[Speaker_1]`, имя в скобках `(Sarah)` и метку `Sarah:` перед текстом
//! - `[Sarah] текст` - имя ведущего в квадратных скобках
//! - `[Pause]`, `[Pause 2s]`, `(pause 500ms)` - явная пауза
//! - `[Music]`, `[Music: intro 3s]` - музыкальная вставка
//!
//! Все, что не подошло ни под одно правило, считается продолжением текущей
//! реплики. Пустая строка закрывает реплику. Разбор никогда не падает на
//! неизвестной разметке, ошибка возможна только при чтении входа.

use std::path::Path;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::utils::tts::analysis::EmotionRules;
use crate::utils::tts::types::{Host, Result, Turn, TtsError};

static SPEAKER_INDEX_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"^\s*(?:\*\*)?\[\s*speaker[\s_-]*(\d+)\s*\](?:\*\*)?(?:\s*\(([^)]*)\))?(?:\*\*)?\s*:?\s*(.*)$",
    )
    .case_insensitive(true)
    .build()
    .expect("valid speaker index pattern")
});

static PAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^\s*(?:\*\*)?[\[(]\s*pause\b\s*[:\-]?\s*([^\])]*?)\s*[\])](?:\*\*)?\s*$")
        .case_insensitive(true)
        .build()
        .expect("valid pause pattern")
});

static MUSIC_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^\s*(?:\*\*)?[\[(]\s*music\b\s*[:\-]?\s*([^\])]*?)\s*[\])](?:\*\*)?\s*$")
        .case_insensitive(true)
        .build()
        .expect("valid music pattern")
});

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?\b")
        .case_insensitive(true)
        .build()
        .expect("valid duration pattern")
});

static LEADING_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\*\*)?([A-Za-z][A-Za-z .'-]{0,30}?)(?:\*\*)?\s*:\s*(.*)$").expect("valid label pattern")
});

/// Настройки разбора сценария
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Длительность `[Pause]` без явного значения, мс
    pub default_pause_ms: u32,
    /// Длительность `[Music]` без явного значения, мс
    pub default_music_ms: u32,
    /// Правила определения эмоции
    pub emotion: EmotionRules,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_pause_ms: 1000,
            default_music_ms: 3000,
            emotion: EmotionRules::default(),
        }
    }
}

/// Правило грамматики разметки
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerKind {
    SpeakerIndex,
    SpeakerName,
    Pause,
    Music,
}

/// Результат классификации одной строки сценария
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptLine {
    Blank,
    Speaker { host: Host, text: String },
    Pause { duration_ms: u32 },
    Music { label: String, duration_ms: u32 },
    Text(String),
}

/// Разборщик сценария.
///
/// Имена ведущих нужны для правила `[Sarah]` и для снятия метки
/// `Sarah:` перед текстом реплики.
#[derive(Clone, Debug)]
pub struct ScriptParser {
    config: ParserConfig,
    host_names: [String; 2],
    name_marker: Regex,
}

impl ScriptParser {
    /// Создает разборщик для двух ведущих.
    ///
    /// # Ошибки
    ///
    /// `TtsError::ConfigError`, если имя ведущего пустое
    pub fn new(config: ParserConfig, host_names: [String; 2]) -> Result<Self> {
        if host_names.iter().any(|n| n.trim().is_empty()) {
            return Err(TtsError::ConfigError("Имя ведущего не может быть пустым".to_string()));
        }

        let names = host_names
            .iter()
            .map(|n| regex::escape(n.trim()))
            .collect::<Vec<_>>()
            .join("|");
        let name_marker = RegexBuilder::new(&format!(
            r"^\s*(?:\*\*)?\[\s*({names})\s*\](?:\*\*)?\s*:?\s*(.*)$"
        ))
        .case_insensitive(true)
        .build()
        .map_err(|e| TtsError::ConfigError(format!("Некорректное имя ведущего: {}", e)))?;

        Ok(Self {
            config,
            host_names,
            name_marker,
        })
    }

    pub fn host_names(&self) -> &[String; 2] {
        &self.host_names
    }

    /// Читает файл сценария.
    ///
    /// # Ошибки
    ///
    /// * `TtsError::IoError` - файл не читается
    /// * `TtsError::ScriptParsingError` - файл не в UTF-8
    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            TtsError::ScriptParsingError(format!("Сценарий {} не в кодировке UTF-8: {}", path.display(), e))
        })
    }

    /// Читает и разбирает файл сценария.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Turn>> {
        let text = self.read_file(path.as_ref())?;
        let turns = self.parse(&text)?;
        info!("Прочитано {} элементов сценария из {}", turns.len(), path.as_ref().display());
        Ok(turns)
    }

    /// Разбирает текст сценария.
    ///
    /// Результат детерминирован: одинаковый текст всегда дает одинаковую
    /// последовательность реплик.
    pub fn parse(&self, text: &str) -> Result<Vec<Turn>> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut state = ParseState::new(&self.config);

        for (line_no, raw) in text.lines().enumerate() {
            match self.classify(raw) {
                ScriptLine::Blank => state.blank(),
                ScriptLine::Speaker { host, text } => state.speaker(host, text, line_no + 1),
                ScriptLine::Pause { duration_ms } => state.cue(Turn::pause(0, duration_ms)),
                ScriptLine::Music { label, duration_ms } => state.cue(Turn::music(0, label, duration_ms)),
                ScriptLine::Text(text) => state.text(text),
            }
        }

        Ok(state.finish())
    }

    /// Относит строку к одному из правил грамматики
    pub fn classify(&self, line: &str) -> ScriptLine {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ScriptLine::Blank;
        }

        for kind in [
            MarkerKind::SpeakerIndex,
            MarkerKind::SpeakerName,
            MarkerKind::Pause,
            MarkerKind::Music,
        ] {
            if let Some(parsed) = self.match_rule(kind, trimmed) {
                return parsed;
            }
        }

        ScriptLine::Text(trimmed.to_string())
    }

    fn match_rule(&self, kind: MarkerKind, line: &str) -> Option<ScriptLine> {
        match kind {
            MarkerKind::SpeakerIndex => {
                let caps = SPEAKER_INDEX_RE.captures(line)?;
                let index: u8 = caps.get(1)?.as_str().parse().ok()?;
                let host = Host::from_index(index)?;
                let rest = caps.get(3).map_or("", |m| m.as_str());
                Some(ScriptLine::Speaker {
                    host,
                    text: self.strip_label(rest),
                })
            }
            MarkerKind::SpeakerName => {
                let caps = self.name_marker.captures(line)?;
                let name = caps.get(1)?.as_str();
                let host = self.host_by_name(name)?;
                let rest = caps.get(2).map_or("", |m| m.as_str());
                Some(ScriptLine::Speaker {
                    host,
                    text: self.strip_label(rest),
                })
            }
            MarkerKind::Pause => {
                let caps = PAUSE_RE.captures(line)?;
                let spec = caps.get(1).map_or("", |m| m.as_str());
                let duration_ms = parse_duration_ms(spec).unwrap_or(self.config.default_pause_ms);
                Some(ScriptLine::Pause { duration_ms })
            }
            MarkerKind::Music => {
                let caps = MUSIC_RE.captures(line)?;
                let spec = caps.get(1).map_or("", |m| m.as_str());
                let duration_ms = parse_duration_ms(spec).unwrap_or(self.config.default_music_ms);
                let label = DURATION_RE.replace_all(spec, "").trim().to_string();
                Some(ScriptLine::Music { label, duration_ms })
            }
        }
    }

    fn host_by_name(&self, name: &str) -> Option<Host> {
        Host::ALL
            .into_iter()
            .zip(self.host_names.iter())
            .find(|(_, host_name)| host_name.trim().eq_ignore_ascii_case(name.trim()))
            .map(|(host, _)| host)
    }

    /// Снимает метку `Sarah:` перед текстом, если это имя ведущего
    fn strip_label(&self, rest: &str) -> String {
        let rest = rest.trim().trim_start_matches("**").trim_end_matches("**").trim();
        if let Some(caps) = LEADING_LABEL_RE.captures(rest) {
            let label = caps.get(1).map_or("", |m| m.as_str());
            if self.host_by_name(label).is_some() {
                return caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
            }
        }
        rest.to_string()
    }
}

/// Извлекает длительность из записи вида `2s`, `1.5 sec`, `500ms`, `2`.
/// Число без единицы считается секундами.
fn parse_duration_ms(spec: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(spec)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
    let ms = if unit.starts_with("ms") || unit.starts_with("milli") {
        value
    } else {
        value * 1000.0
    };
    Some(ms.round().clamp(0.0, u32::MAX as f64) as u32)
}

/// Открытая реплика, которая еще может получить строки продолжения
struct OpenTurn {
    host: Host,
    lines: Vec<String>,
}

struct ParseState<'a> {
    config: &'a ParserConfig,
    turns: Vec<Turn>,
    open: Option<OpenTurn>,
    /// Маркер ведущего без текста ждет следующую непустую строку
    pending_empty: Option<Host>,
    /// Текст до первого маркера ведущего
    preamble: Vec<String>,
    last_speaker: Option<Host>,
    pending_blank: bool,
}

impl<'a> ParseState<'a> {
    fn new(config: &'a ParserConfig) -> Self {
        Self {
            config,
            turns: Vec::new(),
            open: None,
            pending_empty: None,
            preamble: Vec::new(),
            last_speaker: None,
            pending_blank: false,
        }
    }

    fn blank(&mut self) {
        if self.pending_empty.is_some() {
            return;
        }
        self.close_open();
        if !self.turns.is_empty() {
            self.pending_blank = true;
        }
    }

    fn speaker(&mut self, host: Host, text: String, line_no: usize) {
        self.close_open();
        self.drop_pending_empty();
        self.last_speaker = Some(host);

        if text.is_empty() {
            debug!("Пустой маркер {} в строке {}, текст ждем на следующей строке", host, line_no);
            self.pending_empty = Some(host);
        } else {
            self.open_turn(host, text);
        }
    }

    fn cue(&mut self, turn: Turn) {
        self.close_open();
        self.drop_pending_empty();
        self.flush_preamble();
        self.emit(turn);
    }

    fn text(&mut self, text: String) {
        if let Some(host) = self.pending_empty.take() {
            self.open_turn(host, text);
        } else if let Some(open) = self.open.as_mut() {
            open.lines.push(text);
        } else if let Some(host) = self.last_speaker {
            self.open_turn(host, text);
        } else {
            self.preamble.push(text);
        }
    }

    fn finish(mut self) -> Vec<Turn> {
        self.close_open();
        self.drop_pending_empty();
        self.flush_preamble();
        self.turns
    }

    fn open_turn(&mut self, host: Host, text: String) {
        let mut lines = std::mem::take(&mut self.preamble);
        lines.push(text);
        self.open = Some(OpenTurn { host, lines });
    }

    fn close_open(&mut self) {
        if let Some(open) = self.open.take() {
            let text = open.lines.join(" ");
            let mut turn = Turn::dialogue(0, open.host, text);
            turn.emotion = self.config.emotion.infer(&turn.text);
            self.emit(turn);
        }
    }

    fn drop_pending_empty(&mut self) {
        if let Some(host) = self.pending_empty.take() {
            warn!("У маркера {} нет текста, пропускаем", host);
        }
    }

    /// Текст без единого маркера ведущего озвучивает первый ведущий
    fn flush_preamble(&mut self) {
        if self.preamble.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.preamble).join(" ");
        warn!("Текст до первого маркера ведущего отдан {}", Host::Speaker0);
        let mut turn = Turn::dialogue(0, Host::Speaker0, text);
        turn.emotion = self.config.emotion.infer(&turn.text);
        self.emit(turn);
    }

    fn emit(&mut self, mut turn: Turn) {
        if self.pending_blank && !self.turns.is_empty() {
            let index = self.turns.len();
            self.turns.push(Turn::blank(index));
        }
        self.pending_blank = false;
        turn.sequence_index = self.turns.len();
        self.turns.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("2s"), Some(2000));
        assert_eq!(parse_duration_ms("1.5 sec"), Some(1500));
        assert_eq!(parse_duration_ms("500ms"), Some(500));
        assert_eq!(parse_duration_ms("3"), Some(3000));
        assert_eq!(parse_duration_ms("intro"), None);
        assert_eq!(parse_duration_ms(""), None);
    }
}
