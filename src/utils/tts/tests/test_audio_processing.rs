use super::support::{TEST_RATE, pcm16_bytes, sine_wave};
use crate::utils::tts::audio_format::{
    AudioCodec, CodecBackend, SilenceBackend, compute_rms, decode_wav_file, encode_wav, read_wav_title,
};
use crate::utils::tts::audio_processing::{
    apply_fade, change_speed, find_quiet_point, normalize_peak, normalize_rms, peak, resample,
};
use crate::utils::tts::types::{AudioEncoding, SpeechAudio};

#[test]
fn test_normalize_peak() {
    let samples = vec![0.1, 0.2, 0.5, -0.3, -0.8];
    let normalized = normalize_peak(&samples, 0.9).unwrap();

    assert!((peak(&normalized) - 0.9).abs() < 1e-6, "Пик должен стать равным целевому");
    assert!(
        (normalized[2] / normalized[1] - 2.5).abs() < 1e-5,
        "Отношения между амплитудами должны сохраняться"
    );
}

#[test]
fn test_normalize_rms_limits_peaks() {
    let mut samples = vec![0.01, 0.9, -0.01, 0.01];
    assert!(normalize_rms(&mut samples, 0.8));
    assert!(peak(&samples) <= 0.98 + 1e-6, "После RMS нормализации пик не должен превышать 0.98");

    let mut silent = vec![0.0; 100];
    assert!(!normalize_rms(&mut silent, 0.2));
}

#[test]
fn test_apply_fade() {
    let mut samples = sine_wave(440.0, 1.0, 44100);
    samples[0] = 0.5;
    let last = samples.len() - 1;
    samples[last] = 0.5;
    let original = samples.clone();

    apply_fade(&mut samples, 100, 44100);

    assert!(samples[0].abs() < original[0].abs(), "Первый семпл должен стать тише");
    assert!(samples[last].abs() < original[last].abs(), "Последний семпл должен стать тише");
    let mid = samples.len() / 2;
    assert!((samples[mid] - original[mid]).abs() < 1e-6, "Середина не должна меняться");
}

#[test]
fn test_resample_length() {
    let samples = sine_wave(220.0, 1.0, 24000);
    let up = resample(&samples, 24000, 48000).unwrap();
    assert_eq!(up.len(), 48000);

    let down = resample(&samples, 24000, 16000).unwrap();
    assert_eq!(down.len(), 16000);

    let same = resample(&samples, 24000, 24000).unwrap();
    assert_eq!(same, samples);

    assert!(resample(&samples, 0, 24000).is_err());
}

#[test]
fn test_resample_keeps_level() {
    let samples = sine_wave(220.0, 1.0, 24000);
    let up = resample(&samples, 24000, 44100).unwrap();
    let ratio = compute_rms(&up) / compute_rms(&samples);
    assert!((ratio - 1.0).abs() < 0.05, "Громкость после ресемплинга изменилась: {}", ratio);
}

#[test]
fn test_change_speed() {
    let samples = sine_wave(220.0, 2.0, 24000);

    let faster = change_speed(&samples, 1.25).unwrap();
    assert_eq!(faster.len(), (samples.len() as f64 / 1.25).round() as usize);

    let unchanged = change_speed(&samples, 1.0).unwrap();
    assert_eq!(unchanged.len(), samples.len());

    assert!(change_speed(&samples, 3.0).is_err());
    assert!(change_speed(&samples, 0.25).is_err());
}

#[test]
fn test_find_quiet_point_prefers_gap() {
    let rate = 24000;
    let mut samples = sine_wave(220.0, 1.0, rate);
    // Тишина 40 мс вокруг 0.55 c
    for s in &mut samples[12720..13680] {
        *s = 0.0;
    }

    let cut = find_quiet_point(&samples, 12000, 4800, rate);
    assert!((12720..=13680).contains(&cut), "Разрез должен попасть в паузу, получено {}", cut);

    assert_eq!(find_quiet_point(&samples, 12000, 0, rate), 12000);
    assert_eq!(find_quiet_point(&[], 10, 100, rate), 0);
}

#[test]
fn test_codec_decodes_pcm_and_wav() {
    let tone = sine_wave(220.0, 0.25, TEST_RATE);
    let pcm = SpeechAudio {
        bytes: pcm16_bytes(&tone).into(),
        encoding: AudioEncoding::Pcm16 { channels: 1 },
        sample_rate: TEST_RATE,
    };
    let (decoded, rate) = CodecBackend.decode(&pcm).unwrap();
    assert_eq!(rate, TEST_RATE);
    assert_eq!(decoded.len(), tone.len());
    assert!((decoded[100] - tone[100]).abs() < 1e-3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    encode_wav(&tone, TEST_RATE, &path).unwrap();
    let wav = SpeechAudio {
        bytes: std::fs::read(&path).unwrap().into(),
        encoding: AudioEncoding::Wav,
        sample_rate: 0,
    };
    let (decoded, rate) = CodecBackend.decode(&wav).unwrap();
    assert_eq!(rate, TEST_RATE);
    assert_eq!(decoded.len(), tone.len());
}

#[test]
fn test_wav_export_with_title() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.wav");
    let tone = sine_wave(220.0, 0.1, TEST_RATE);

    CodecBackend.export(&tone, TEST_RATE, &path, Some("My Episode")).unwrap();

    let (samples, rate) = decode_wav_file(&path).unwrap();
    assert_eq!(rate, TEST_RATE);
    assert_eq!(samples.len(), tone.len(), "Блок названия не должен ломать аудио-данные");
    assert_eq!(read_wav_title(&path).unwrap().as_deref(), Some("My Episode"));
}

#[test]
fn test_silence_backend() {
    let audio = SpeechAudio {
        bytes: vec![0u8; 2000].into(),
        encoding: AudioEncoding::Pcm16 { channels: 1 },
        sample_rate: TEST_RATE,
    };
    assert!(SilenceBackend.decode(&audio).is_err());

    let dir = tempfile::tempdir().unwrap();
    assert!(SilenceBackend.export(&[0.0; 10], TEST_RATE, &dir.path().join("out.mp3"), None).is_err());
    assert!(SilenceBackend.export(&[0.0; 10], TEST_RATE, &dir.path().join("out.wav"), None).is_ok());
}
