use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use podcast_tts::config::AppConfig;
use podcast_tts::config::tts::TtsProvider;
use podcast_tts::utils::logger::init_logger;
use podcast_tts::utils::tts::audio_format::select_codec;
use podcast_tts::utils::tts::narrator::{PodcastNarrator, build_backend};
use podcast_tts::utils::tts::types::ProgressUpdate;
use podcast_tts::utils::tts::voices::{VoiceStyle, VoiceTable};

/// Озвучивает сценарий подкаста для двух ведущих
#[derive(Debug, Parser)]
#[command(name = "podcast-tts", version, about)]
struct Cli {
    /// Файл сценария в UTF-8
    #[arg(short, long)]
    script: PathBuf,

    /// Итоговый аудиофайл (.wav, .mp3, .m4a, .ogg, .flac)
    #[arg(short, long, default_value = "podcast.mp3")]
    output: PathBuf,

    /// Файл настроек YAML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Стиль голосов: default, varied или consistent
    #[arg(long)]
    voice_style: Option<VoiceStyle>,

    /// Пауза перед каждым запросом к сервису, секунды
    #[arg(long)]
    api_delay: Option<f64>,

    /// Максимальная длина одного запроса в символах
    #[arg(long)]
    max_chars: Option<usize>,

    /// Множитель скорости воспроизведения итогового файла
    #[arg(long)]
    speed: Option<f32>,

    /// Зерно генератора пауз для воспроизводимого результата
    #[arg(long)]
    seed: Option<u64>,

    /// Сервис синтеза: gemini или openai
    #[arg(long)]
    provider: Option<TtsProvider>,

    /// Сохранять ответы сервиса рядом с итоговым файлом
    #[arg(long)]
    keep_diagnostics: bool,

    /// Не декодировать аудио: все реплики станут тишиной, экспорт только в WAV
    #[arg(long)]
    silent_codec: bool,

    /// Подробные логи
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(provider) = self.provider {
            config.tts.provider = provider;
        }
        if let Some(delay) = self.api_delay {
            config.set_api_delay(delay)?;
        }
        if let Some(max_chars) = self.max_chars {
            config.chunking.max_chars = max_chars;
        }
        if let Some(speed) = self.speed {
            config.output.speed = speed;
        }
        if let Some(seed) = self.seed {
            config.pacing.seed = Some(seed);
        }
        if self.keep_diagnostics {
            config.synthesis.keep_diagnostics = true;
        }
        if let Some(style) = self.voice_style {
            let table = config
                .voices
                .take()
                .unwrap_or_else(|| VoiceTable::for_provider(config.tts.provider));
            config.voices = Some(table.with_style(style));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("Не удалось загрузить настройки")?;
    cli.apply(&mut config)?;
    config.validate()?;

    let backend = build_backend(&config.tts)?;
    let codec = select_codec(cli.silent_codec);

    let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(32);
    let progress = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                ProgressUpdate::Synthesizing { current, total } => info!("Синтез запроса {}/{}", current, total),
                ProgressUpdate::ChunkFallback { index, reason } => {
                    warn!("Запрос {} заменен тишиной: {}", index, reason)
                }
                ProgressUpdate::Finished => info!("Готово"),
                other => log::debug!("{:?}", other),
            }
        }
    });

    let narrator = PodcastNarrator::new(&config, backend, codec)?.with_progress(tx);
    let report = narrator
        .render_file(&cli.script, &cli.output)
        .await
        .with_context(|| format!("Не удалось прочитать сценарий {}", cli.script.display()))?;
    drop(narrator);
    wait_progress(progress).await;

    let fallbacks = report.fallback_chunks().count();
    if report.success {
        info!(
            "Выпуск {} готов: {:.1} с, запросов {}, заменено тишиной {}",
            cli.output.display(),
            report.duration_secs,
            report.chunks.len(),
            fallbacks
        );
        if let Some(dir) = &report.diagnostics_dir {
            info!("Диагностика: {}", dir.display());
        }
    } else {
        error!("Выпуск не создан");
    }
    Ok(report.success)
}

/// Дожидается задачи вывода прогресса. Паника задачи не прерывает запуск.
async fn wait_progress(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Задача вывода прогресса завершилась с ошибкой: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_progress_survives_panic() {
        let finished = tokio::spawn(async {});
        assert!(wait_progress(finished).await);

        let panicked: JoinHandle<()> = tokio::spawn(async { panic!("обрыв вывода прогресса") });
        assert!(!wait_progress(panicked).await, "Паника задачи прогресса должна быть замечена");
    }
}
