pub mod logger;
pub mod tts;
