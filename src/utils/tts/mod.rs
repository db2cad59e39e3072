//! # TTS (Text-to-Speech) модуль
//!
//! Модуль для озвучивания сценария подкаста.
//! Включает в себя разбор сценария, разбиение на запросы, выбор голосов,
//! интеграцию с Gemini и OpenAI TTS, обработку аудио и экспорт выпуска.

pub mod types;
pub mod analysis;
pub mod script;
pub mod chunker;
pub mod voices;
pub mod speech_api;
pub mod gemini_tts;
pub mod openai_tts;
pub mod cache;
pub mod synthesis;
pub mod audio_format;
pub mod audio_processing;
pub mod assembler;
pub mod post_process;
pub mod narrator;

// Публично экспортируем основные типы и API для удобства использования
pub use types::{
    AudioBuffer, Chunk, Emotion, Host, ProgressUpdate, Result, SynthesisResult, SynthesisStatus, TtsError, Turn,
    TurnKind,
};
pub use script::ScriptParser;
pub use chunker::TurnChunker;
pub use voices::{VoiceStyle, VoiceTable};
pub use synthesis::SynthesisClient;
pub use assembler::AudioAssembler;
pub use post_process::PostProcessor;
pub use narrator::{PodcastNarrator, RenderReport};

#[cfg(test)]
mod tests {
    mod support;
    mod test_script_parser;
    mod test_chunker;
    mod test_synthesis;
    mod test_gemini_tts;
    mod test_openai_tts;
    mod test_audio_processing;
    mod test_assembler;
    mod test_narrator;
}
