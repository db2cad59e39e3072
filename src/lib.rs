//! Озвучивание сценария подкаста для двух ведущих.
//!
//! Сценарий с разметкой `[Speaker 0]` / `[Speaker 1]` разбирается на реплики,
//! реплики группируются в запросы к сервису синтеза речи (Gemini или OpenAI),
//! а полученное аудио склеивается с естественными паузами в один файл.

pub mod config;
pub mod utils;
