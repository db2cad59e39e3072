use std::io::Write;

use crate::utils::tts::script::{ParserConfig, ScriptLine, ScriptParser};
use crate::utils::tts::types::{Emotion, Host, TtsError, TurnKind};

fn parser() -> ScriptParser {
    ScriptParser::new(ParserConfig::default(), ["Sarah".to_string(), "Michael".to_string()]).unwrap()
}

#[test]
fn test_parse_basic_dialogue() {
    let turns = parser()
        .parse("[Speaker 0] Hello.\n[Speaker 1] Hi there!\n[Speaker 0] Welcome.")
        .unwrap();

    assert_eq!(turns.len(), 3);
    assert!(turns.iter().all(|t| t.kind == TurnKind::Dialogue));
    assert_eq!(turns[0].speaker, Some(Host::Speaker0));
    assert_eq!(turns[1].speaker, Some(Host::Speaker1));
    assert_eq!(turns[1].text, "Hi there!");
    let indices: Vec<usize> = turns.iter().map(|t| t.sequence_index).collect();
    assert_eq!(indices, vec![0, 1, 2], "Индексы должны идти по порядку сценария");
}

#[test]
fn test_marker_variants() {
    let p = parser();
    assert_eq!(
        p.classify("**[Speaker 1]**: Sure thing."),
        ScriptLine::Speaker { host: Host::Speaker1, text: "Sure thing.".to_string() }
    );
    assert_eq!(
        p.classify("[Speaker-1] (Michael): Right."),
        ScriptLine::Speaker { host: Host::Speaker1, text: "Right.".to_string() }
    );
    assert_eq!(
        p.classify("[Speaker_0] Sarah: Hello"),
        ScriptLine::Speaker { host: Host::Speaker0, text: "Hello".to_string() },
        "Метка с именем ведущего должна сниматься"
    );
    assert_eq!(
        p.classify("[michael] Good point."),
        ScriptLine::Speaker { host: Host::Speaker1, text: "Good point.".to_string() }
    );
    assert_eq!(p.classify("   "), ScriptLine::Blank);
}

#[test]
fn test_label_that_is_not_a_host_is_kept() {
    let line = parser().classify("[Speaker 0] Note: this stays.");
    assert_eq!(
        line,
        ScriptLine::Speaker { host: Host::Speaker0, text: "Note: this stays.".to_string() }
    );
}

#[test]
fn test_pause_and_music_markers() {
    let p = parser();
    assert_eq!(p.classify("[Pause 2s]"), ScriptLine::Pause { duration_ms: 2000 });
    assert_eq!(p.classify("(pause 500ms)"), ScriptLine::Pause { duration_ms: 500 });
    assert_eq!(p.classify("[Pause]"), ScriptLine::Pause { duration_ms: 1000 });
    assert_eq!(
        p.classify("[Music: intro 3s]"),
        ScriptLine::Music { label: "intro".to_string(), duration_ms: 3000 }
    );
    assert_eq!(
        p.classify("[Music]"),
        ScriptLine::Music { label: String::new(), duration_ms: 3000 }
    );
}

#[test]
fn test_cues_become_turns_in_order() {
    let turns = parser()
        .parse("[Music: intro 1s]\n[Speaker 0] Hello.\n[Pause 2s]\n[Speaker 1] Hi.")
        .unwrap();

    let kinds: Vec<TurnKind> = turns.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![TurnKind::Music, TurnKind::Dialogue, TurnKind::Pause, TurnKind::Dialogue]
    );
    assert_eq!(turns[0].duration_ms, Some(1000));
    assert_eq!(turns[2].duration_ms, Some(2000));
    assert_eq!(turns[2].speaker, None);
}

#[test]
fn test_continuation_lines_and_paragraphs() {
    let script = "[Speaker 0] First line\nsecond line.\n\n[Speaker 1] Next paragraph.\n\nAnd more.";
    let turns = parser().parse(script).unwrap();

    assert_eq!(turns[0].text, "First line second line.");
    assert_eq!(turns[1].kind, TurnKind::Blank, "Пустая строка между репликами - разрыв абзаца");
    assert_eq!(turns[2].speaker, Some(Host::Speaker1));
    assert_eq!(turns[3].kind, TurnKind::Blank);
    assert_eq!(turns[4].speaker, Some(Host::Speaker1), "Текст после абзаца продолжает последний ведущий");
    assert_eq!(turns[4].text, "And more.");
}

#[test]
fn test_marker_without_text_takes_next_line() {
    let turns = parser().parse("[Speaker 1]\n\nHello from Michael.").unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].speaker, Some(Host::Speaker1));
    assert_eq!(turns[0].text, "Hello from Michael.");
}

#[test]
fn test_text_before_first_marker() {
    let turns = parser().parse("Welcome everyone.\n[Speaker 1] Thanks.").unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].speaker, Some(Host::Speaker1));
    assert_eq!(turns[0].text, "Welcome everyone. Thanks.", "Текст до маркера присоединяется к первой реплике");

    let turns = parser().parse("No markers at all.").unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].speaker, Some(Host::Speaker0));
}

#[test]
fn test_unknown_markup_is_text() {
    let turns = parser().parse("[Speaker 0] A.\n[Speaker 7] B.").unwrap();
    assert_eq!(turns.len(), 1, "Неизвестный индекс ведущего не должен открывать реплику");
    assert_eq!(turns[0].text, "A. [Speaker 7] B.");
}

#[test]
fn test_empty_and_bom_input() {
    let p = parser();
    assert!(p.parse("").unwrap().is_empty());
    assert!(p.parse("\n\n  \n").unwrap().is_empty());

    let turns = p.parse("\u{feff}[Speaker 0] Hello.").unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, "Hello.");
}

#[test]
fn test_emotion_is_inferred() {
    let turns = parser()
        .parse("[Speaker 0] Why does that matter?\n[Speaker 1] Yeah.")
        .unwrap();
    assert_eq!(turns[0].emotion, Emotion::Curious);
    assert_eq!(turns[1].emotion, Emotion::Acknowledging);
}

#[test]
fn test_parse_is_deterministic() {
    let script = "[Speaker 0] Hello.\n\n[Pause]\n[Speaker 1] So, what now?";
    let p = parser();
    assert_eq!(p.parse(script).unwrap(), p.parse(script).unwrap());
}

#[test]
fn test_parse_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[Speaker 0] Hello.\n[Speaker 1] Hi there!").unwrap();
    let turns = parser().parse_file(file.path()).unwrap();
    assert_eq!(turns.len(), 2);

    let mut binary = tempfile::NamedTempFile::new().unwrap();
    binary.write_all(&[0xff, 0xfe, 0x00, 0x80]).unwrap();
    assert!(matches!(
        parser().parse_file(binary.path()),
        Err(TtsError::ScriptParsingError(_))
    ));

    assert!(matches!(
        parser().parse_file("/nonexistent/script.txt"),
        Err(TtsError::IoError(_))
    ));
}

#[test]
fn test_empty_host_name_is_rejected() {
    let result = ScriptParser::new(ParserConfig::default(), ["Sarah".to_string(), " ".to_string()]);
    assert!(matches!(result, Err(TtsError::ConfigError(_))));
}
