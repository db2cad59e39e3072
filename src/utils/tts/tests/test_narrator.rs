use std::sync::Arc;

use tempfile::tempdir;
use tokio::sync::mpsc;

use super::support::{ScriptedBackend, test_config};
use crate::utils::tts::audio_format::{CodecBackend, SilenceBackend, decode_wav_file, read_wav_title};
use crate::utils::tts::narrator::PodcastNarrator;
use crate::utils::tts::types::{ProgressUpdate, SynthesisStatus};

const SCRIPT: &str = "[Speaker 0] Hello.\n[Speaker 1] Hi there!\n[Speaker 0] Welcome.";

#[tokio::test]
async fn test_render_three_turns() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("first_episode.wav");
    let backend = Arc::new(ScriptedBackend::new());
    let narrator = PodcastNarrator::new(&test_config(), backend.clone(), Arc::new(CodecBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    assert!(report.success, "Выпуск должен быть создан");
    assert_eq!(report.output.as_deref(), Some(output.as_path()));
    assert_eq!(report.turns, 3);
    assert_eq!(report.chunks.len(), 1, "Все реплики помещаются в один запрос");
    assert_eq!(report.speech_segments, 3);
    assert_eq!(report.fallback_segments, 0);
    assert_eq!(backend.calls(), 1);
    assert!(backend.requests()[0].is_multi_speaker());

    let (samples, rate) = decode_wav_file(&output).unwrap();
    assert_eq!(rate, 24000);
    assert!((samples.len() as f32 / rate as f32 - report.duration_secs).abs() < 0.01);
    assert!(samples.iter().all(|s| s.abs() <= 1.0));
    assert_eq!(read_wav_title(&output).unwrap().as_deref(), Some("first episode"));
}

#[tokio::test]
async fn test_failed_chunk_becomes_five_seconds_of_silence() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let mut config = test_config();
    config.chunking.split_on_speaker_change = true;
    let backend = Arc::new(ScriptedBackend::new().failing_on("Hi there!"));
    let narrator = PodcastNarrator::new(&config, backend.clone(), Arc::new(CodecBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    assert!(report.success, "Сбой одного запроса не должен ломать выпуск");
    assert_eq!(report.chunks.len(), 3);
    let statuses: Vec<SynthesisStatus> = report.chunks.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![SynthesisStatus::Success, SynthesisStatus::Fallback, SynthesisStatus::Success]
    );
    assert_eq!(report.fallback_chunks().count(), 1);
    assert_eq!(report.chunks[1].attempts, 3);
    assert_eq!(report.speech_segments, 2);
    assert_eq!(report.fallback_segments, 1);
    assert!(report.duration_secs > 5.0, "Тишина вместо реплики длится не меньше 5 секунд");
    assert!(output.exists());
}

#[tokio::test]
async fn test_never_fails_when_service_is_down() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let backend = Arc::new(ScriptedBackend::new().failing_always());
    let narrator = PodcastNarrator::new(&test_config(), backend, Arc::new(CodecBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    assert!(report.success, "Выпуск из одной тишины все равно создается");
    assert_eq!(report.speech_segments, 0);
    assert_eq!(report.fallback_segments, 3);
    assert!(output.exists());
}

#[tokio::test]
async fn test_only_cues_left_is_a_failure() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let mut config = test_config();
    config.synthesis.fallback_to_silence = false;
    let backend = Arc::new(ScriptedBackend::new().failing_always());
    let narrator = PodcastNarrator::new(&config, backend, Arc::new(CodecBackend)).unwrap();

    let report = narrator
        .render("[Speaker 0] Hello.\n[Pause 2s]\n[Speaker 1] Bye.", &output)
        .await;

    assert!(!report.success, "Паузы без речи и без тишины на замену выпуском не считаются");
    assert_eq!(report.speech_segments, 0);
    assert_eq!(report.fallback_segments, 0);
    assert!(report.output.is_none());
    assert!(!output.exists(), "Файл из одних пауз не должен создаваться");
}

#[tokio::test]
async fn test_requests_fit_max_chars_with_labels_and_instruction() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let mut config = test_config();
    config.chunking.max_chars = 120;
    let backend = Arc::new(ScriptedBackend::new());
    let narrator = PodcastNarrator::new(&config, backend.clone(), Arc::new(CodecBackend)).unwrap();

    let script = "[Speaker 0] Hello and welcome to the show, today we talk about rivers.\n\
                  [Speaker 1] Hi there! I brought a long list of questions about rivers and lakes.\n\
                  [Speaker 0] Welcome.";
    let report = narrator.render(script, &output).await;

    assert!(report.success);
    let requests = backend.requests();
    assert!(requests.len() > 1, "Текст не помещается в один запрос");
    for request in &requests {
        let len = request.prompt().chars().count();
        assert!(len <= 120, "Запрос длиной {} превышает лимит: {:?}", len, request.prompt());
    }
    let sent = requests.iter().map(|r| r.text.clone()).collect::<Vec<_>>().join(" ");
    for word in ["rivers.", "lakes.", "Welcome."] {
        assert!(sent.contains(word), "Потерян текст {}", word);
    }
}

#[tokio::test]
async fn test_service_input_limit_caps_max_chars() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let backend = Arc::new(ScriptedBackend::new().single_speaker().with_input_limit(200));
    let narrator = PodcastNarrator::new(&test_config(), backend.clone(), Arc::new(CodecBackend)).unwrap();

    let long_turn = "Rivers carry water to the sea. ".repeat(25);
    let report = narrator.render(&format!("[Speaker 0] {}", long_turn), &output).await;

    assert!(report.success);
    let requests = backend.requests();
    assert!(requests.len() >= 4, "Длинная реплика должна разойтись по нескольким запросам");
    assert!(requests.iter().all(|r| r.prompt().chars().count() <= 200));
}

#[test]
fn test_max_chars_too_small_for_instruction() {
    let mut config = test_config();
    config.chunking.max_chars = 30;
    let result = PodcastNarrator::new(&config, Arc::new(ScriptedBackend::new()), Arc::new(CodecBackend));
    assert!(result.is_err(), "Лимит меньше инструкции подачи должен отвергаться");
}

#[tokio::test]
async fn test_single_voice_service_splits_by_speaker() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let backend = Arc::new(ScriptedBackend::new().single_speaker());
    let narrator = PodcastNarrator::new(&test_config(), backend.clone(), Arc::new(CodecBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    assert!(report.success);
    assert_eq!(report.chunks.len(), 3);
    assert!(backend.requests().iter().all(|r| !r.is_multi_speaker()));
}

#[test]
fn test_empty_script_creates_no_file() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("empty.wav");
    let narrator =
        PodcastNarrator::new(&test_config(), Arc::new(ScriptedBackend::new()), Arc::new(CodecBackend)).unwrap();

    let report = tokio_test::block_on(narrator.render("", &output));
    assert!(!report.success);
    assert!(!output.exists(), "Пустой сценарий не должен создавать файл");

    let report = tokio_test::block_on(narrator.render("[Pause 2s]\n[Music]", &output));
    assert!(!report.success, "Сценарий без реплик озвучивать нечего");
    assert!(!output.exists());
}

#[tokio::test]
async fn test_silent_codec_cannot_write_mp3() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.mp3");
    let narrator =
        PodcastNarrator::new(&test_config(), Arc::new(ScriptedBackend::new()), Arc::new(SilenceBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    assert!(!report.success);
    assert!(!output.exists(), "Неудачный экспорт не должен оставлять файл");
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "Временный файл экспорта должен быть удален");
}

#[tokio::test]
async fn test_keep_diagnostics() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("show.wav");
    let mut config = test_config();
    config.synthesis.keep_diagnostics = true;
    let narrator = PodcastNarrator::new(&config, Arc::new(ScriptedBackend::new()), Arc::new(CodecBackend)).unwrap();

    let report = narrator.render(SCRIPT, &output).await;

    let diagnostics = report.diagnostics_dir.expect("каталог диагностики должен быть в отчете");
    assert_eq!(diagnostics, dir.path().join("show_diagnostics"));
    assert!(diagnostics.join("chunk_000.attempt1.response.json").exists());
}

#[tokio::test]
async fn test_progress_is_reported() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("episode.wav");
    let (tx, mut rx) = mpsc::channel(64);
    let narrator = PodcastNarrator::new(&test_config(), Arc::new(ScriptedBackend::new()), Arc::new(CodecBackend))
        .unwrap()
        .with_progress(tx);

    narrator.render(SCRIPT, &output).await;
    drop(narrator);

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    assert!(matches!(updates.first(), Some(ProgressUpdate::Started)));
    assert!(matches!(updates.last(), Some(ProgressUpdate::Finished)));
    assert!(updates.iter().any(|u| matches!(u, ProgressUpdate::Chunking { chunks: 1 })));
}

#[tokio::test]
async fn test_render_file_reports_unreadable_script() {
    let dir = tempdir().unwrap();
    let narrator =
        PodcastNarrator::new(&test_config(), Arc::new(ScriptedBackend::new()), Arc::new(CodecBackend)).unwrap();

    let result = narrator
        .render_file(&dir.path().join("missing.txt"), &dir.path().join("out.wav"))
        .await;
    assert!(result.is_err());
}
