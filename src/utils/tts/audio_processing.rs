//! # Audio Processing
//!
//! Обработка моно PCM-семплов (f32): плавные переходы, нормализация,
//! ресемплинг, изменение скорости и поиск тихих точек для разрезания речи.
//!
//! ## Используемые алгоритмы
//!
//! - **Rubato** - ресемплер с Sinc-интерполяцией, через него же меняется
//!   скорость (вместе с высотой тона)
//! - **Нормализация** - пиковая (по максимальной амплитуде) и RMS

use log::{debug, info, warn};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::utils::tts::audio_format::compute_rms;
use crate::utils::tts::types::{Result, TtsError};

/// Размер блока ресемплера
const RESAMPLE_BLOCK: usize = 1024;

/// Уровень, ниже которого сигнал считается тишиной
const SILENCE_LEVEL: f32 = 0.00001;

/// Количество семплов в `ms` миллисекундах
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

/// Тишина длительностью `ms` миллисекунд
pub fn silence(ms: u32, sample_rate: u32) -> Vec<f32> {
    vec![0.0; ms_to_samples(ms, sample_rate)]
}

/// Переводит уровень в dBFS в линейную амплитуду.
///
/// ```rust
/// use podcast_tts::utils::tts::audio_processing::db_to_amplitude;
///
/// assert!((db_to_amplitude(0.0) - 1.0).abs() < 1e-6);
/// assert!((db_to_amplitude(-6.0) - 0.501).abs() < 0.001);
/// ```
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Максимальная абсолютная амплитуда
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
}

/// Применяет fade in/out к аудиофрагменту для устранения щелчков на стыках.
///
/// Если фрагмент слишком короткий для двух переходов, длина перехода
/// уменьшается до четверти фрагмента.
///
/// # Аргументы
///
/// * `samples` - PCM-семплы (изменяются на месте)
/// * `fade_ms` - Длительность каждого перехода в миллисекундах
/// * `sample_rate` - Частота дискретизации в Гц
pub fn apply_fade(samples: &mut [f32], fade_ms: u32, sample_rate: u32) {
    if samples.is_empty() {
        return;
    }

    let mut fade_samples = ms_to_samples(fade_ms, sample_rate);
    if fade_samples * 2 >= samples.len() {
        fade_samples = samples.len() / 4;
    }

    fade_in_samples(samples, fade_samples);
    fade_out_samples(samples, fade_samples);
}

/// Линейное нарастание громкости в начале
pub fn fade_in(samples: &mut [f32], fade_ms: u32, sample_rate: u32) {
    let len = ms_to_samples(fade_ms, sample_rate).min(samples.len());
    fade_in_samples(samples, len);
}

/// Линейное затухание громкости в конце
pub fn fade_out(samples: &mut [f32], fade_ms: u32, sample_rate: u32) {
    let len = ms_to_samples(fade_ms, sample_rate).min(samples.len());
    fade_out_samples(samples, len);
}

fn fade_in_samples(samples: &mut [f32], len: usize) {
    for (i, sample) in samples.iter_mut().take(len).enumerate() {
        *sample *= i as f32 / len as f32;
    }
}

fn fade_out_samples(samples: &mut [f32], len: usize) {
    for (i, sample) in samples.iter_mut().rev().take(len).enumerate() {
        *sample *= i as f32 / len as f32;
    }
}

/// Нормализует пиковый уровень аудио.
///
/// Тишина возвращается без изменений.
///
/// # Аргументы
///
/// * `samples` - PCM-семплы
/// * `target_peak` - Целевая максимальная амплитуда (0.0-1.0)
///
/// # Ошибки
///
/// * `TtsError::AudioProcessingError` - целевой уровень вне диапазона (0, 1]
pub fn normalize_peak(samples: &[f32], target_peak: f32) -> Result<Vec<f32>> {
    if !(target_peak > 0.0 && target_peak <= 1.0) {
        return Err(TtsError::AudioProcessingError(format!(
            "Некорректный целевой пик: {}",
            target_peak
        )));
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let max_amplitude = peak(samples);
    if max_amplitude <= SILENCE_LEVEL {
        warn!("Аудио содержит только тишину, нормализация пропущена");
        return Ok(samples.to_vec());
    }

    let norm_factor = target_peak / max_amplitude;
    info!(
        "Нормализация пика: max_amplitude={:.6}, целевой уровень={:.6}, коэффициент={:.6}",
        max_amplitude, target_peak, norm_factor
    );
    Ok(samples.iter().map(|s| s * norm_factor).collect())
}

/// Выполняет нормализацию RMS уровня аудио до целевого уровня.
///
/// Если после усиления пики выходят за 1.0, сигнал дополнительно
/// ограничивается по пику.
///
/// # Возвращает
///
/// `true`, если нормализация выполнена, `false` для пустого или тихого сигнала
pub fn normalize_rms(samples: &mut [f32], target_rms: f32) -> bool {
    if samples.is_empty() {
        return false;
    }

    let current_rms = compute_rms(samples);
    if current_rms <= SILENCE_LEVEL {
        warn!("Аудио имеет очень низкий уровень RMS: {:.6}", current_rms);
        return false;
    }

    let norm_factor = target_rms / current_rms;
    for sample in samples.iter_mut() {
        *sample *= norm_factor;
    }

    let max_amplitude = peak(samples);
    if max_amplitude > 1.0 {
        let peak_factor = 0.98 / max_amplitude;
        for sample in samples.iter_mut() {
            *sample *= peak_factor;
        }
        info!("После RMS нормализации потребовалось ограничение пиков: {:.6}", peak_factor);
    }

    info!(
        "Нормализация RMS: current_rms={:.6}, целевой RMS={:.6}, коэффициент={:.6}",
        current_rms, target_rms, norm_factor
    );
    true
}

/// Меняет частоту дискретизации.
///
/// Длина результата равна `round(len * to_rate / from_rate)`.
///
/// # Ошибки
///
/// * `TtsError::ResamplingError` - нулевая частота или сбой ресемплера
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(TtsError::ResamplingError(format!(
            "Некорректные частоты: {} -> {}",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    debug!("Ресемплинг {} семплов {} Гц -> {} Гц", samples.len(), from_rate, to_rate);
    resample_with_rubato(samples, to_rate as f64 / from_rate as f64)
}

/// Ускоряет или замедляет воспроизведение.
///
/// Скорость меняется вместе с высотой тона, как при проигрывании записи
/// с другой частотой кадров. Длина результата `len / speed`.
///
/// # Ошибки
///
/// * `TtsError::AudioProcessingError` - скорость вне диапазона [0.5, 2.0]
pub fn change_speed(samples: &[f32], speed: f32) -> Result<Vec<f32>> {
    if !(0.5..=2.0).contains(&speed) {
        return Err(TtsError::AudioProcessingError(format!(
            "Скорость {} вне диапазона 0.5-2.0",
            speed
        )));
    }
    if (speed - 1.0).abs() < f32::EPSILON || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    info!("Изменение скорости воспроизведения: x{:.2}", speed);
    resample_with_rubato(samples, 1.0 / speed as f64)
}

fn resample_with_rubato(input: &[f32], ratio: f64) -> Result<Vec<f32>> {
    // Параметры sinc-интерполяции для высокого качества
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_BLOCK, 1)
        .map_err(|e| TtsError::ResamplingError(format!("Ошибка инициализации Rubato: {}", e)))?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_BLOCK);

    let mut pos = 0;
    while pos < input.len() {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(input.len());
        let block: [&[f32]; 1] = [&input[pos..end]];
        let frames = if end - pos == needed {
            resampler.process(&block[..], None)
        } else {
            resampler.process_partial(Some(&block[..]), None)
        }
        .map_err(|e| TtsError::ResamplingError(format!("Ошибка в процессе ресемплинга: {}", e)))?;
        output.extend_from_slice(&frames[0]);
        pos = end;
    }

    // Выталкиваем задержку фильтра
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| TtsError::ResamplingError(format!("Ошибка в процессе ресемплинга: {}", e)))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    let mut result: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    result.resize(expected, 0.0);
    Ok(result)
}

/// Ищет самую тихую точку рядом с желаемой позицией.
///
/// Сигнал оценивается окнами по 10 мс в пределах `±search` семплов от
/// `ideal`. При равной громкости выбирается точка ближе к `ideal`.
///
/// # Возвращает
///
/// Позицию разреза в диапазоне `[0, len]`
pub fn find_quiet_point(samples: &[f32], ideal: usize, search: usize, sample_rate: u32) -> usize {
    let len = samples.len();
    let ideal = ideal.min(len);
    if len == 0 || search == 0 {
        return ideal;
    }

    let frame = (sample_rate as usize / 100).max(1);
    let step = (frame / 2).max(1);
    let from = ideal.saturating_sub(search);
    let to = (ideal + search).min(len);

    let mut best = ideal;
    let mut best_rms = f32::MAX;
    let mut pos = from;
    while pos <= to {
        let start = pos.saturating_sub(frame / 2);
        let end = (start + frame).min(len);
        let rms = compute_rms(&samples[start..end]);
        let closer = pos.abs_diff(ideal) < best.abs_diff(ideal);
        if rms < best_rms - SILENCE_LEVEL || ((rms - best_rms).abs() <= SILENCE_LEVEL && closer) {
            best = pos;
            best_rms = rms;
        }
        pos += step;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(1000, 24000), 24000);
        assert_eq!(ms_to_samples(50, 24000), 1200);
        assert_eq!(silence(10, 8000).len(), 80);
    }

    #[test]
    fn test_normalize_peak_keeps_silence() {
        let samples = vec![0.0; 16];
        let normalized = normalize_peak(&samples, 0.9).unwrap();
        assert_eq!(normalized, samples, "тишина не должна исчезать при нормализации");
        assert!(normalize_peak(&samples, 1.5).is_err());
    }

    #[test]
    fn test_fade_in_and_out() {
        let mut samples = vec![1.0; 100];
        fade_in(&mut samples, 10, 1000);
        assert_eq!(samples[0], 0.0);
        assert!((samples[5] - 0.5).abs() < 1e-6);
        assert_eq!(samples[50], 1.0);

        fade_out(&mut samples, 10, 1000);
        assert_eq!(samples[99], 0.0);
        assert_eq!(samples[50], 1.0);
    }
}
