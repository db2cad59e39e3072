use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::tts::OpenAiConfig;
use crate::utils::tts::openai_tts::{OPENAI_MAX_INPUT_CHARS, OpenAiSpeech};
use crate::utils::tts::speech_api::{SpeakerVoice, SpeechBackend, SpeechError, SpeechRequest};
use crate::utils::tts::types::AudioEncoding;

fn backend(server: &MockServer) -> OpenAiSpeech {
    OpenAiSpeech::new(OpenAiConfig {
        api_key: Some("test-key".to_string()),
        base_url: server.uri(),
        timeout_secs: 5,
        ..OpenAiConfig::default()
    })
    .unwrap()
}

fn request(text: &str) -> SpeechRequest {
    SpeechRequest {
        text: text.to_string(),
        speakers: vec![SpeakerVoice { label: "Sarah".into(), voice: "Nova".into() }],
        instruction: Some("Speak warmly".to_string()),
    }
}

#[tokio::test]
async fn test_speech_success() {
    let server = MockServer::start().await;
    let fake_mp3 = vec![0x49u8; 4096];

    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini-tts",
            "input": "Hello world",
            "voice": "nova",
            "response_format": "mp3",
            "instructions": "Speak warmly"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fake_mp3.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server).synthesize(&request("Hello\n  world")).await.unwrap();

    assert_eq!(response.audio.bytes.as_ref(), fake_mp3.as_slice());
    assert_eq!(response.audio.encoding, AudioEncoding::Mp3);
    assert!(response.raw_response.is_none());
}

#[tokio::test]
async fn test_rate_limit_is_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Rate limit reached", "type": "requests" }
        })))
        .mount(&server)
        .await;

    let error = backend(&server).synthesize(&request("Hello")).await.unwrap_err();
    assert!(matches!(error, SpeechError::Quota(_)), "Получено {:?}", error);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let error = backend(&server).synthesize(&request("Hello")).await.unwrap_err();
    assert!(matches!(error, SpeechError::Transient(_)));
}

#[tokio::test]
async fn test_invalid_voice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Invalid value for 'voice': 'nova2'", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;

    let error = backend(&server).synthesize(&request("Hello")).await.unwrap_err();
    assert!(matches!(error, SpeechError::VoiceUnavailable { .. }));
}

#[tokio::test]
async fn test_request_without_voice_is_permanent() {
    let server = MockServer::start().await;
    let request = SpeechRequest {
        text: "Hello".to_string(),
        speakers: Vec::new(),
        instruction: None,
    };
    let error = backend(&server).synthesize(&request).await.unwrap_err();
    assert!(matches!(error, SpeechError::Permanent(_)));
}

#[tokio::test]
async fn test_input_ceiling() {
    let server = MockServer::start().await;
    assert_eq!(backend(&server).max_input_chars(), Some(OPENAI_MAX_INPUT_CHARS));
}
