use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Инициализирует логирование.
///
/// `verbose` поднимает уровень логов самой программы до DEBUG.
/// Переменная `RUST_LOG` имеет приоритет над значением по умолчанию.
pub fn init_logger(verbose: bool) {
    // Установка базового фильтра и переопределение через переменные окружения
    let default_filter = if verbose {
        "warn,podcast_tts=debug"
    } else {
        "warn,podcast_tts=info"
    };
    let env = Env::default().filter_or("RUST_LOG", default_filter);

    let mut builder = Builder::from_env(env);

    // Явно подавляем логи от сетевых модулей
    builder
        .filter_module("mio", LevelFilter::Error)
        .filter_module("hyper", LevelFilter::Error)
        .filter_module("hyper_util", LevelFilter::Error)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("rustls", LevelFilter::Error)
        .filter_module("symphonia_core", LevelFilter::Warn)
        .filter_module("symphonia_bundle_mp3", LevelFilter::Warn)
        // Форматирование логов
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}
