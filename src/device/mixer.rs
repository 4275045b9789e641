// Mixer - pulls every playing voice once per block and sums the results.
// Runs under the device lock; nothing in here blocks or allocates per block.

use super::handle::{HandleId, Status, StatusCell, StopCallback};
use super::spatial::{Scene, SpatialParams};
use crate::error::Result;
use crate::events::DeviceEvent;
use crate::fx::{ChannelMapper, ResampleReader};
use crate::reader::Reader;
use crate::specs::Specs;
use crossbeam_channel::Sender;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Reader chain of a voice: the played reader converted to the device rate
/// (times pitch and doppler) and then to the device channel layout.
type VoiceReader = ChannelMapper<ResampleReader<Box<dyn Reader>>>;

/// Mixer-side state of one handle.
pub(crate) struct Voice {
    pub id: HandleId,
    reader: VoiceReader,
    status: Arc<StatusCell>,
    pub keep: bool,
    pub volume: f32,
    pub pitch: f32,
    pub loop_count: i32,
    pub stop_callback: Option<StopCallback>,
    pub spatial: Option<SpatialParams>,
    /// Gain applied at the end of the previous block, `None` before the first.
    last_gain: Option<f32>,
    /// Paused at end of stream because of `keep`.
    at_end: bool,
}

impl Voice {
    pub fn new(
        id: HandleId,
        reader: Box<dyn Reader>,
        specs: Specs,
        status: Arc<StatusCell>,
        keep: bool,
        spatial: Option<SpatialParams>,
    ) -> Result<Self> {
        let reader = ChannelMapper::new(ResampleReader::new(reader, specs.rate)?, specs.channels);
        Ok(Self {
            id,
            reader,
            status,
            keep,
            volume: 1.0,
            pitch: 1.0,
            loop_count: 0,
            stop_callback: None,
            spatial,
            last_gain: None,
            at_end: false,
        })
    }

    /// Seeks to `seconds` of the source stream.
    pub fn seek(&mut self, seconds: f64) -> bool {
        let resampler = self.reader.inner_mut();
        let frame = (seconds * resampler.source_rate()).round() as usize;
        if !resampler.seek_source(frame) {
            return false;
        }
        self.at_end = false;
        true
    }

    /// Position in seconds of the source stream.
    pub fn position(&self) -> f64 {
        let resampler = self.reader.inner();
        resampler.source_position() as f64 / resampler.source_rate()
    }

    /// Mixes up to `frames` frames into `output`. Returns `true` once the
    /// reader ended and no loop is left.
    fn render(
        &mut self,
        scene: &Scene,
        master: f32,
        scratch: &mut [f32],
        output: &mut [f32],
        events: &Sender<DeviceEvent>,
    ) -> bool {
        let channels = self.reader.specs().frame_len();
        let frames = output.len() / channels;

        let mut gain = self.volume * master;
        let mut pitch = self.pitch;
        if let Some(params) = &self.spatial {
            let mix = scene.evaluate(params);
            gain *= mix.gain;
            pitch *= mix.pitch;
            self.reader.set_pan(mix.azimuth);
        }
        self.reader.inner_mut().set_pitch(pitch as f64);

        let scratch = &mut scratch[..frames * channels];
        let mut done = 0;
        let mut just_looped = false;
        let mut ended = false;
        while done < frames {
            let result = self
                .reader
                .read(frames - done, &mut scratch[done * channels..]);
            done += result.frames;
            if result.frames > 0 {
                just_looped = false;
            }
            if result.eos {
                // A loop that produced nothing since the last restart is empty.
                if self.loop_count != 0 && !just_looped && self.reader.inner_mut().seek_source(0)
                {
                    if self.loop_count > 0 {
                        self.loop_count -= 1;
                    }
                    just_looped = true;
                    log::debug!(
                        "Mixer: {} looped, {} loops remaining",
                        self.id,
                        self.loop_count
                    );
                    send(
                        events,
                        DeviceEvent::HandleLooped {
                            handle: self.id,
                            remaining: self.loop_count,
                        },
                    );
                    continue;
                }
                ended = true;
                break;
            }
            if result.frames == 0 {
                // Starved: the rest of the block stays silent.
                break;
            }
        }

        let start = self.last_gain.unwrap_or(gain);
        let input = &scratch[..done * channels];
        if start == gain {
            for (out, sample) in output.iter_mut().zip(input) {
                *out += sample * gain;
            }
        } else {
            let step = (gain - start) / frames as f32;
            for (frame, (out, sample)) in output
                .chunks_exact_mut(channels)
                .zip(input.chunks_exact(channels))
                .enumerate()
            {
                let frame_gain = start + step * (frame + 1) as f32;
                for (out, sample) in out.iter_mut().zip(sample) {
                    *out += sample * frame_gain;
                }
            }
        }
        self.last_gain = Some(gain);

        ended
    }
}

fn send(events: &Sender<DeviceEvent>, event: DeviceEvent) {
    // A full queue drops the event rather than stalling the mixer.
    if events.try_send(event).is_err() {
        log::debug!("Mixer: event queue full, dropping event");
    }
}

/// Everything the mixing cycle touches. Lives behind the device lock.
pub(crate) struct MixerState {
    specs: Specs,
    block_size: usize,
    playing: Vec<Voice>,
    paused: Vec<Voice>,
    pub volume: f32,
    pub scene: Scene,
    scratch: Vec<f32>,
    events: Sender<DeviceEvent>,
}

impl MixerState {
    pub fn new(specs: Specs, block_size: usize, events: Sender<DeviceEvent>) -> Self {
        Self {
            specs,
            block_size,
            playing: Vec::new(),
            paused: Vec::new(),
            volume: 1.0,
            scene: Scene::default(),
            scratch: vec![0.0; block_size * specs.frame_len()],
            events,
        }
    }

    pub fn add(&mut self, voice: Voice) {
        log::debug!("Mixer: {} started", voice.id);
        voice.status.store(Status::Playing);
        self.playing.push(voice);
    }

    pub fn emit(&self, event: DeviceEvent) {
        send(&self.events, event);
    }

    /// Overwrites `buffer` with the next mixed samples.
    ///
    /// Returns the stop callbacks of handles that finished; the caller runs
    /// them once the state is no longer borrowed.
    pub fn mix(&mut self, buffer: &mut [f32]) -> Vec<StopCallback> {
        buffer.fill(0.0);
        let channels = self.specs.frame_len();
        let mut callbacks = Vec::new();
        for block in buffer.chunks_mut(self.block_size * channels) {
            // A trailing partial frame stays silent.
            let frames = block.len() / channels;
            if frames > 0 {
                self.mix_block(&mut block[..frames * channels], &mut callbacks);
            }
        }
        callbacks
    }

    fn mix_block(&mut self, block: &mut [f32], callbacks: &mut Vec<StopCallback>) {
        let mut index = 0;
        while index < self.playing.len() {
            let voice = &mut self.playing[index];
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
                voice.render(
                    &self.scene,
                    self.volume,
                    &mut self.scratch,
                    block,
                    &self.events,
                )
            }));
            match rendered {
                Ok(false) => index += 1,
                Ok(true) => {
                    let voice = self.playing.remove(index);
                    self.finish(voice, callbacks);
                }
                Err(_) => {
                    let mut voice = self.playing.remove(index);
                    log::error!("Mixer: reader of {} panicked, stopping it", voice.id);
                    // The reader's state is unknown, so it never pauses for a resume.
                    voice.keep = false;
                    self.finish(voice, callbacks);
                }
            }
        }
    }

    /// Handles end of stream: pause with `keep`, stop otherwise.
    fn finish(&mut self, mut voice: Voice, callbacks: &mut Vec<StopCallback>) {
        if voice.keep {
            log::debug!("Mixer: {} reached its end, pausing", voice.id);
            voice.status.store(Status::Paused);
            voice.at_end = true;
            self.emit(DeviceEvent::HandlePaused { handle: voice.id });
            self.paused.push(voice);
        } else {
            log::debug!("Mixer: {} finished", voice.id);
            voice.status.store(Status::Stopped);
            self.emit(DeviceEvent::HandleFinished { handle: voice.id });
            callbacks.extend(voice.stop_callback.take());
        }
    }

    pub fn pause(&mut self, id: HandleId) -> bool {
        let Some(index) = self.playing.iter().position(|voice| voice.id == id) else {
            return false;
        };
        let mut voice = self.playing.remove(index);
        voice.status.store(Status::Paused);
        log::debug!("Mixer: {} paused", id);
        self.paused.push(voice);
        true
    }

    pub fn resume(&mut self, id: HandleId) -> bool {
        let Some(index) = self.paused.iter().position(|voice| voice.id == id) else {
            return false;
        };
        let mut voice = self.paused.remove(index);
        if voice.at_end {
            // Restarts like a fresh play.
            voice.reader.inner_mut().seek_source(0);
            voice.at_end = false;
            voice.last_gain = None;
        } else {
            // Continues mid-stream, so fade in from silence.
            voice.last_gain = Some(0.0);
        }
        voice.status.store(Status::Playing);
        log::debug!("Mixer: {} resumed", id);
        self.playing.push(voice);
        true
    }

    /// Removes a handle. Returns `None` if it isn't alive, otherwise its
    /// stop callback if one was registered.
    pub fn stop(&mut self, id: HandleId) -> Option<Option<StopCallback>> {
        let mut voice = if let Some(index) = self.playing.iter().position(|v| v.id == id) {
            self.playing.remove(index)
        } else {
            let index = self.paused.iter().position(|v| v.id == id)?;
            self.paused.remove(index)
        };
        voice.status.store(Status::Stopped);
        log::debug!("Mixer: {} stopped", id);
        Some(voice.stop_callback.take())
    }

    /// Stops every handle, returning their stop callbacks.
    pub fn stop_all(&mut self) -> Vec<StopCallback> {
        let count = self.playing.len() + self.paused.len();
        if count > 0 {
            log::debug!("Mixer: stopping {} handles", count);
        }
        self.playing
            .drain(..)
            .chain(self.paused.drain(..))
            .filter_map(|mut voice| {
                voice.status.store(Status::Stopped);
                voice.stop_callback.take()
            })
            .collect()
    }

    pub fn voice_mut(&mut self, id: HandleId) -> Option<&mut Voice> {
        self.playing
            .iter_mut()
            .chain(self.paused.iter_mut())
            .find(|voice| voice.id == id)
    }

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }

    pub fn paused_count(&self) -> usize {
        self.paused.len()
    }
}
