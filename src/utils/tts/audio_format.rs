//! # Audio Format Handling
//!
//! Модуль для кодирования и декодирования аудио форматов.
//!
//! ## Основные возможности
//!
//! - Декодирование ответов сервиса синтеза (L16 PCM, WAV, MP3) в моно f32
//! - Кодирование PCM данных в WAV с названием выпуска в `LIST/INFO`
//! - Экспорт в MP3 и другие форматы через ffmpeg
//! - Вычисление аудио-метрик, таких как RMS
//!
//! Кодек выбирается один раз при запуске через [`select_codec`]: полный
//! [`CodecBackend`] или [`SilenceBackend`], который ничего не декодирует и
//! пишет только WAV. Во втором случае все речевые сегменты заменяются тишиной.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;

use crate::utils::tts::types::{AudioEncoding, Result, SpeechAudio, TtsError};

/// Кодек для декодирования ответов и экспорта итогового файла
pub trait AudioCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Декодирует ответ сервиса в моно семплы и частоту дискретизации
    fn decode(&self, audio: &SpeechAudio) -> Result<(Vec<f32>, u32)>;

    /// Записывает моно семплы в файл, формат определяется по расширению
    fn export(&self, samples: &[f32], sample_rate: u32, path: &Path, title: Option<&str>) -> Result<()>;
}

/// Полный кодек: symphonia, hound и ffmpeg для сжатых форматов
#[derive(Debug, Default, Clone)]
pub struct CodecBackend;

impl AudioCodec for CodecBackend {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn decode(&self, audio: &SpeechAudio) -> Result<(Vec<f32>, u32)> {
        match &audio.encoding {
            AudioEncoding::Pcm16 { channels } => Ok((decode_pcm16(&audio.bytes, *channels), audio.sample_rate)),
            AudioEncoding::Wav => decode_wav_bytes(&audio.bytes),
            AudioEncoding::Mp3 => decode_compressed(audio.bytes.clone(), Some("mp3")),
            AudioEncoding::Other(_) => decode_compressed(audio.bytes.clone(), None),
        }
    }

    fn export(&self, samples: &[f32], sample_rate: u32, path: &Path, title: Option<&str>) -> Result<()> {
        let extension = extension_of(path);
        if extension == "wav" {
            encode_wav(samples, sample_rate, path)?;
            if let Some(title) = title {
                append_wav_title(path, title)?;
            }
            return Ok(());
        }

        if !is_ffmpeg_installed() {
            return Err(TtsError::ExportError(format!(
                "Для экспорта в {} нужен ffmpeg, он не найден",
                extension
            )));
        }

        let temp_dir = tempfile::tempdir()?;
        let wav_path = temp_dir.path().join("export.wav");
        encode_wav(samples, sample_rate, &wav_path)?;
        convert_with_ffmpeg(&wav_path, path, title)
    }
}

/// Кодек без декодирования: каждый ответ становится ошибкой декодирования,
/// экспорт только в WAV
#[derive(Debug, Default, Clone)]
pub struct SilenceBackend;

impl AudioCodec for SilenceBackend {
    fn name(&self) -> &str {
        "silence"
    }

    fn decode(&self, audio: &SpeechAudio) -> Result<(Vec<f32>, u32)> {
        Err(TtsError::DecodeError(format!(
            "декодирование недоступно ({} байт {:?})",
            audio.bytes.len(),
            audio.encoding
        )))
    }

    fn export(&self, samples: &[f32], sample_rate: u32, path: &Path, title: Option<&str>) -> Result<()> {
        let extension = extension_of(path);
        if extension != "wav" {
            return Err(TtsError::ExportError(format!(
                "Без кодека поддерживается только WAV, запрошен {}",
                extension
            )));
        }
        encode_wav(samples, sample_rate, path)?;
        if let Some(title) = title {
            append_wav_title(path, title)?;
        }
        Ok(())
    }
}

/// Выбирает кодек при запуске
pub fn select_codec(silent: bool) -> Arc<dyn AudioCodec> {
    if silent {
        warn!("Используется кодек без декодирования: речь будет заменена тишиной");
        Arc::new(SilenceBackend)
    } else {
        Arc::new(CodecBackend)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Вычисляет длительность аудио в секундах.
///
/// ```rust
/// use podcast_tts::utils::tts::audio_format::duration_in_seconds;
///
/// assert_eq!(duration_in_seconds(48000, 24000), 2.0);
/// assert_eq!(duration_in_seconds(100, 0), 0.0);
/// ```
pub fn duration_in_seconds(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f32 / sample_rate as f32
}

/// Декодирует сырые 16-битные PCM little-endian семплы со сведением в моно.
///
/// Нечетный последний байт отбрасывается.
pub fn decode_pcm16(data: &[u8], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    let samples: Vec<f32> = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    if channels == 1 {
        return samples;
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Декодирует сжатое аудио (MP3, AAC) в PCM семплы через Symphonia.
///
/// # Ошибки
///
/// * `TtsError::DecodeError` - формат не распознан или нет аудио-трека
pub fn decode_compressed(data: Bytes, extension: Option<&str>) -> Result<(Vec<f32>, u32)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let format_opts = FormatOptions {
        enable_gapless: false,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &Default::default())
        .map_err(|e| TtsError::DecodeError(format!("Не удалось определить формат аудио: {}", e)))?;

    // Получаем формат и первый аудио-трек
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TtsError::DecodeError("Не найден аудио-трек".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions { verify: false })
        .map_err(|e| TtsError::DecodeError(format!("Не удалось создать декодер: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut pcm_data = Vec::new();

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                }
                let channels = spec.channels.count().max(1);

                let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);

                // Сводим каналы в моно
                if channels > 1 {
                    pcm_data.extend(
                        sample_buf
                            .samples()
                            .chunks_exact(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                    );
                } else {
                    pcm_data.extend_from_slice(sample_buf.samples());
                }
            }
            Err(e) => {
                warn!("Ошибка декодирования пакета: {}", e);
                continue;
            }
        }
    }

    if sample_rate == 0 {
        return Err(TtsError::DecodeError("Неизвестная частота дискретизации".to_string()));
    }

    debug!("Декодировано {} семплов с частотой {}", pcm_data.len(), sample_rate);
    Ok((pcm_data, sample_rate))
}

/// Декодирует WAV из памяти
pub fn decode_wav_bytes(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| TtsError::DecodeError(format!("Некорректный WAV: {}", e)))?;
    read_wav(reader)
}

/// Декодирует WAV-файл в PCM семплы.
///
/// Поддерживаются 16/24/32-битные целочисленные и 32-битные float файлы,
/// многоканальное аудио сводится в моно.
///
/// # Ошибки
///
/// * `TtsError::DecodeError` - файл не открывается или формат не поддерживается
pub fn decode_wav_file<P: AsRef<Path>>(file_path: P) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::open(file_path.as_ref())
        .map_err(|e| TtsError::DecodeError(format!("{}: {}", file_path.as_ref().display(), e)))?;
    read_wav(reader)
}

fn read_wav<R: Read>(mut reader: WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();
    let decode_err = |e: hound::Error| TtsError::DecodeError(e.to_string());

    let pcm_data: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0).map_err(decode_err))
            .collect::<Result<_>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8388608.0).map_err(decode_err))
            .collect::<Result<_>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2147483648.0).map_err(decode_err))
            .collect::<Result<_>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map_err(decode_err))
            .collect::<Result<_>>()?,
        _ => {
            return Err(TtsError::DecodeError(format!(
                "Неподдерживаемый формат WAV: {:?}, {} бит",
                spec.sample_format, spec.bits_per_sample
            )));
        }
    };

    let channels = spec.channels.max(1) as usize;
    if channels > 1 {
        let mono = pcm_data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Ok((mono, spec.sample_rate))
    } else {
        Ok((pcm_data, spec.sample_rate))
    }
}

/// Кодирует PCM семплы в WAV-файл (моно, 32 бит float).
///
/// # Ошибки
///
/// * `TtsError::WavEncodingError` - не удалось создать файл или записать семплы
pub fn encode_wav<P: AsRef<Path>>(pcm_data: &[f32], sample_rate: u32, output_path: P) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(output_path.as_ref(), spec)?;
    for &sample in pcm_data {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    info!(
        "Сохранен WAV-файл: {} ({} семплов, {} Гц)",
        output_path.as_ref().display(),
        pcm_data.len(),
        sample_rate
    );
    Ok(())
}

/// Дописывает в конец WAV-файла чанк `LIST/INFO` с названием (`INAM`)
/// и исправляет размер RIFF в заголовке.
pub fn append_wav_title<P: AsRef<Path>>(path: P, title: &str) -> Result<()> {
    let mut name = title.as_bytes().to_vec();
    name.push(0);
    if name.len() % 2 == 1 {
        name.push(0);
    }

    let mut chunk = Vec::with_capacity(name.len() + 20);
    chunk.extend_from_slice(b"LIST");
    chunk.extend_from_slice(&((name.len() + 12) as u32).to_le_bytes());
    chunk.extend_from_slice(b"INFO");
    chunk.extend_from_slice(b"INAM");
    chunk.extend_from_slice(&(name.len() as u32).to_le_bytes());
    chunk.extend_from_slice(&name);

    let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
    let end = file.seek(SeekFrom::End(0))?;
    file.write_all(&chunk)?;

    let riff_size = u32::try_from(end + chunk.len() as u64 - 8)
        .map_err(|_| TtsError::ExportError("WAV-файл больше 4 ГБ".to_string()))?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.flush()?;
    Ok(())
}

/// Читает название из чанка `LIST/INFO/INAM`, если оно есть
pub fn read_wav_title<P: AsRef<Path>>(path: P) -> Result<Option<String>> {
    let mut data = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut data)?;

    let Some(pos) = data.windows(4).position(|w| w == b"INAM") else {
        return Ok(None);
    };
    let size_at = pos + 4;
    if data.len() < size_at + 4 {
        return Ok(None);
    }
    let size = u32::from_le_bytes([data[size_at], data[size_at + 1], data[size_at + 2], data[size_at + 3]]) as usize;
    let start = size_at + 4;
    let end = (start + size).min(data.len());
    let title = String::from_utf8_lossy(&data[start..end])
        .trim_end_matches('\0')
        .to_string();
    Ok(Some(title))
}

/// Проверяет, установлен ли ffmpeg
pub fn is_ffmpeg_installed() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn convert_with_ffmpeg(input: &Path, output: &Path, title: Option<&str>) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y").arg("-i").arg(input);
    if let Some(title) = title {
        cmd.arg("-metadata").arg(format!("title={}", title));
    }
    if extension_of(output) == "mp3" {
        cmd.args(["-codec:a", "libmp3lame", "-b:a", "192k"]);
    }
    cmd.arg(output);

    debug!("Запуск ffmpeg: {:?}", cmd);
    let result = cmd
        .output()
        .map_err(|e| TtsError::ExportError(format!("Не удалось запустить ffmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(TtsError::ExportError(format!("ffmpeg завершился с ошибкой: {}", stderr.trim())));
    }

    info!("Экспортирован файл {}", output.display());
    Ok(())
}

/// Вычисляет среднеквадратичное значение (RMS) для массива семплов.
///
/// ```rust
/// use podcast_tts::utils::tts::audio_format::compute_rms;
///
/// let rms = compute_rms(&[0.5, -0.5, 0.5, -0.5]);
/// assert!((rms - 0.5).abs() < 1e-6);
/// ```
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
