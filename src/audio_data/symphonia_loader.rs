use crate::{
    audio_data::{load_options::MonoMode, AudioData, LoadOptions},
    error::{ResonarError, Result},
    specs::Channels,
};
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Decodes an audio file into memory.
///
/// Decoding happens up front so the resulting [`AudioData`] can be played
/// from the mixing thread without touching the file system.
pub fn load_audio_file<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<AudioData> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ResonarError::AudioLoading(format!("Failed to probe audio format: {:?}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| ResonarError::AudioLoading("No default audio track found".to_string()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ResonarError::AudioLoading("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| ResonarError::AudioLoading("Channel count not found".to_string()))?
        .count();
    let layout = Channels::from_count(channels)?;

    if let MonoMode::Channel(channel) = options.mono {
        if channel >= channels {
            return Err(ResonarError::AudioFormat(format!(
                "Channel {} out of range (max: {})",
                channel,
                channels - 1
            )));
        }
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ResonarError::AudioLoading(format!("Failed to create decoder: {:?}", e)))?;

    let max_frames = options
        .max_duration
        .map(|d| (d.as_secs_f64() * sample_rate as f64) as usize)
        .unwrap_or(usize::MAX);

    let mut samples: Vec<f32> = Vec::new();
    let mut frames_decoded = 0;

    while frames_decoded < max_frames {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(ResonarError::AudioLoading(format!(
                    "Error reading packet: {:?}",
                    e
                )));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break,
            Err(Error::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => {
                return Err(ResonarError::AudioLoading(format!(
                    "Error decoding packet: {:?}",
                    e
                )));
            }
        };

        let spec = *decoded.spec();
        let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        let take = (tmp.samples().len() / channels).min(max_frames - frames_decoded);
        samples.extend_from_slice(&tmp.samples()[..take * channels]);
        frames_decoded += take;
    }

    let mut audio_data = match options.mono {
        MonoMode::Keep => AudioData::new(samples, sample_rate, layout)?,
        MonoMode::Downmix => AudioData::new(samples, sample_rate, layout)?.to_mono()?,
        MonoMode::Channel(channel) => {
            let picked = samples.chunks(channels).map(|frame| frame[channel]).collect();
            AudioData::new(picked, sample_rate, Channels::Mono)?
        }
    };

    if let Some(target_rate) = options.target_sample_rate {
        if target_rate != sample_rate {
            audio_data = audio_data.resample(target_rate)?;
        }
    }

    log::info!(
        "Loaded {} ({} frames, {} Hz, {} channels)",
        path.display(),
        audio_data.total_frames(),
        audio_data.sample_rate(),
        audio_data.channels().count()
    );

    Ok(audio_data)
}

/// Convenience function to load audio with default options
pub fn load_audio_file_simple<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    load_audio_file(path, &LoadOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_audio_file_simple("does/not/exist.wav");
        assert!(matches!(result, Err(ResonarError::Io(_))));
    }
}
