//! The software mixing device.
//!
//! A [`Device`] owns every playing [`Handle`] and mixes them into one output
//! stream, either on its own mixing thread feeding an [`OutputSink`] or on
//! demand through [`Device::read`].
//!
//! # Locking
//!
//! All mixer state sits behind one re-entrant lock. Every handle and device
//! call takes it for the duration of the call, and the mixing thread holds
//! it for one whole block. Use [`Device::lock`] to make a batch of changes
//! appear atomically to the mixing thread:
//!
//! ```no_run
//! # use resonar::{Device, DeviceDesc, Sine};
//! # fn main() -> resonar::Result<()> {
//! let device = Device::new(DeviceDesc::default())?;
//! let sine = Sine::new(440.0, 48000.0)?;
//! let _lock = device.lock();
//! let a = device.play(&sine, false)?;
//! let b = device.play(&sine, false)?;
//! a.set_volume(0.5);
//! b.set_volume(0.25);
//! // Both start in the same block once `_lock` is dropped.
//! # Ok(())
//! # }
//! ```

mod handle;
mod mixer;
mod spatial;

pub use handle::{Handle, HandleId, SpatialHandle, Status, StopCallback};
pub use spatial::{DEFAULT_SPEED_OF_SOUND, DistanceModel};

use crate::config::{DeviceDesc, SourceConfig};
use crate::error::{ResonarError, Result};
use crate::events::DeviceEvent;
use crate::math::{Quat, Vec3};
use crate::reader::{Reader, Sound};
use crate::sink::{CpalSink, OutputSink};
use crate::specs::DeviceSpecs;
use crossbeam_channel::{Receiver, bounded};
use handle::StatusCell;
use mixer::{MixerState, Voice};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use spatial::SpatialParams;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// State shared by the device, its handles and the mixing thread.
pub(crate) struct DeviceShared {
    state: ReentrantMutex<RefCell<MixerState>>,
    specs: DeviceSpecs,
    spatial: bool,
    next_id: AtomicU64,
}

impl DeviceShared {
    fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<MixerState>> {
        self.state.lock()
    }

    /// Runs `f` on the mixer state under the device lock.
    ///
    /// Returns `None` when the state is already borrowed further up the
    /// stack, which only happens if a reader calls back into the device
    /// from inside the mixing cycle.
    fn with_state<R>(&self, f: impl FnOnce(&mut MixerState) -> R) -> Option<R> {
        let guard = self.state.lock();
        let Ok(mut state) = guard.try_borrow_mut() else {
            log::warn!("Device state re-entered while mixing");
            return None;
        };
        let result = f(&mut state);
        Some(result)
    }

    /// Mixes the next `buffer.len()` samples. Stop callbacks of handles that
    /// finished run after the state borrow ends, still under the lock.
    fn mix(&self, buffer: &mut [f32]) {
        let _lock = self.lock();
        match self.with_state(|state| state.mix(buffer)) {
            Some(callbacks) => {
                for callback in callbacks {
                    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        log::error!("A stop callback panicked");
                    }
                }
            }
            None => buffer.fill(0.0),
        }
    }

    fn emit(&self, event: DeviceEvent) {
        self.with_state(|state| state.emit(event));
    }

    fn scene<R>(&self, f: impl FnOnce(&mut spatial::Scene) -> R) -> Option<R> {
        self.with_state(|state| f(&mut state.scene))
    }
}

/// Exclusive access token for the device.
///
/// While held, the mixing thread can't start a block, so every change made
/// through handles or the device takes effect together. Dropping it unlocks.
/// Handle calls made while holding the token don't deadlock.
pub struct DeviceLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<MixerState>>,
}

/// Device-wide 3D settings, available when the device was created with
/// spatialization enabled.
pub trait SpatialDevice {
    fn listener_location(&self) -> Vec3;
    fn set_listener_location(&self, location: Vec3) -> bool;
    fn listener_velocity(&self) -> Vec3;
    fn set_listener_velocity(&self, velocity: Vec3) -> bool;
    fn listener_orientation(&self) -> Quat;
    fn set_listener_orientation(&self, orientation: Quat) -> bool;
    /// Speed of sound in m/s, used for doppler.
    fn speed_of_sound(&self) -> f32;
    fn set_speed_of_sound(&self, speed: f32) -> bool;
    /// Scales the doppler effect; 0 disables it.
    fn doppler_factor(&self) -> f32;
    fn set_doppler_factor(&self, factor: f32) -> bool;
    fn distance_model(&self) -> DistanceModel;
    fn set_distance_model(&self, model: DistanceModel) -> bool;
}

impl SpatialDevice for DeviceShared {
    fn listener_location(&self) -> Vec3 {
        self.scene(|scene| scene.listener.location)
            .unwrap_or(Vec3::ZERO)
    }

    fn set_listener_location(&self, location: Vec3) -> bool {
        location.is_finite()
            && self
                .scene(|scene| scene.listener.location = location)
                .is_some()
    }

    fn listener_velocity(&self) -> Vec3 {
        self.scene(|scene| scene.listener.velocity)
            .unwrap_or(Vec3::ZERO)
    }

    fn set_listener_velocity(&self, velocity: Vec3) -> bool {
        velocity.is_finite()
            && self
                .scene(|scene| scene.listener.velocity = velocity)
                .is_some()
    }

    fn listener_orientation(&self) -> Quat {
        self.scene(|scene| scene.listener.orientation)
            .unwrap_or(Quat::IDENTITY)
    }

    fn set_listener_orientation(&self, orientation: Quat) -> bool {
        if !orientation.is_finite() || orientation.length_squared() <= f32::EPSILON {
            return false;
        }
        let orientation = orientation.normalize();
        self.scene(|scene| scene.listener.orientation = orientation)
            .is_some()
    }

    fn speed_of_sound(&self) -> f32 {
        self.scene(|scene| scene.speed_of_sound)
            .unwrap_or(DEFAULT_SPEED_OF_SOUND)
    }

    fn set_speed_of_sound(&self, speed: f32) -> bool {
        speed.is_finite()
            && speed > 0.0
            && self.scene(|scene| scene.speed_of_sound = speed).is_some()
    }

    fn doppler_factor(&self) -> f32 {
        self.scene(|scene| scene.doppler_factor).unwrap_or(1.0)
    }

    fn set_doppler_factor(&self, factor: f32) -> bool {
        factor.is_finite()
            && factor >= 0.0
            && self.scene(|scene| scene.doppler_factor = factor).is_some()
    }

    fn distance_model(&self) -> DistanceModel {
        self.scene(|scene| scene.distance_model).unwrap_or_default()
    }

    fn set_distance_model(&self, model: DistanceModel) -> bool {
        self.scene(|scene| scene.distance_model = model).is_some()
    }
}

/// Software mixing device.
///
/// Created either in pull mode with [`Device::new`], where the caller drives
/// mixing through [`Device::read`], or with a dedicated mixing thread through
/// [`Device::open`] / [`Device::open_default`].
pub struct Device {
    shared: Arc<DeviceShared>,
    events: Receiver<DeviceEvent>,
    running: Arc<AtomicBool>,
    mixing_thread: Option<JoinHandle<()>>,
}

impl Device {
    /// Creates a device without a mixing thread.
    pub fn new(desc: DeviceDesc) -> Result<Self> {
        desc.validate()?;
        let specs = desc.device_specs();
        let (sender, events) = bounded(desc.event_capacity.max(1));
        let state = MixerState::new(specs.specs, desc.block_size, sender);

        log::info!(
            "Device created: {} Hz, {} channels, {}-frame blocks",
            desc.sample_rate,
            desc.channels.count(),
            desc.block_size
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                state: ReentrantMutex::new(RefCell::new(state)),
                specs,
                spatial: desc.enable_spatialization,
                next_id: AtomicU64::new(1),
            }),
            events,
            running: Arc::new(AtomicBool::new(false)),
            mixing_thread: None,
        })
    }

    /// Creates a device and starts its mixing thread.
    ///
    /// `factory` runs on the mixing thread, so sinks that must stay on the
    /// thread that created them work as is. The call returns once the sink
    /// is open, or with the factory's error.
    pub fn open<S, F>(desc: DeviceDesc, factory: F) -> Result<Self>
    where
        S: OutputSink + 'static,
        F: FnOnce(DeviceSpecs) -> Result<S> + Send + 'static,
    {
        let block_size = desc.block_size;
        let mut device = Self::new(desc)?;
        let shared = Arc::clone(&device.shared);
        let running = Arc::clone(&device.running);
        let specs = shared.specs;
        let (ready_sender, ready) = bounded::<Result<()>>(1);

        running.store(true, Ordering::Release);
        let thread = std::thread::Builder::new()
            .name("resonar-mixer".to_string())
            .spawn(move || {
                let _running = RunningGuard(Arc::clone(&running));
                let mut sink = match factory(specs) {
                    Ok(sink) => {
                        let _ = ready_sender.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_sender.send(Err(e));
                        return;
                    }
                };
                mixing_loop(&shared, &running, &mut sink, block_size);
                sink.close();
                log::info!("Mixing thread stopped");
            })
            .map_err(|e| {
                ResonarError::Engine(format!("Failed to spawn mixing thread: {}", e))
            })?;
        device.mixing_thread = Some(thread);

        match ready.recv() {
            Ok(Ok(())) => {
                log::info!("Mixing thread started");
                Ok(device)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ResonarError::Engine(
                "Mixing thread exited before opening its sink".into(),
            )),
        }
    }

    /// Creates a device playing through the default cpal output device.
    pub fn open_default(desc: DeviceDesc) -> Result<Self> {
        let block_size = desc.block_size;
        let latency = desc.sink_latency_blocks;
        Self::open(desc, move |specs| CpalSink::open(specs, block_size, latency))
    }

    pub fn specs(&self) -> DeviceSpecs {
        self.shared.specs
    }

    /// Mixes the next samples into `buffer`, overwriting it.
    ///
    /// Meant for pull-mode devices; on a device with a mixing thread the
    /// samples read here are missing from the sink's stream.
    pub fn read(&self, buffer: &mut [f32]) {
        self.shared.mix(buffer);
    }

    /// Acquires the device lock until the returned token is dropped.
    pub fn lock(&self) -> DeviceLock<'_> {
        DeviceLock {
            _guard: self.shared.lock(),
        }
    }

    /// Plays a sound. With `keep` the handle pauses at its end instead of
    /// stopping, and can be resumed or seeked later.
    pub fn play(&self, sound: &dyn Sound, keep: bool) -> Result<Handle> {
        self.play_with_config(sound, keep, SourceConfig::NonSpatial)
    }

    pub fn play_with_config(
        &self,
        sound: &dyn Sound,
        keep: bool,
        config: SourceConfig,
    ) -> Result<Handle> {
        let reader = sound.create_reader()?;
        self.play_reader_with_config(reader, keep, config)
    }

    pub fn play_reader(&self, reader: Box<dyn Reader>, keep: bool) -> Result<Handle> {
        self.play_reader_with_config(reader, keep, SourceConfig::NonSpatial)
    }

    /// Plays an already created reader, spatially if `config` asks for it.
    pub fn play_reader_with_config(
        &self,
        reader: Box<dyn Reader>,
        keep: bool,
        config: SourceConfig,
    ) -> Result<Handle> {
        if config.is_spatial() && !self.shared.spatial {
            return Err(ResonarError::Configuration(
                "Spatial playback requires a device with spatialization enabled".into(),
            ));
        }
        let rate = reader.specs().rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ResonarError::AudioFormat(format!(
                "Reader has an invalid sample rate: {}",
                rate
            )));
        }

        let id = HandleId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let status = Arc::new(StatusCell::new(Status::Playing));
        let spatial = config.location().map(SpatialParams::at);
        let voice = Voice::new(
            id,
            reader,
            self.shared.specs.specs,
            Arc::clone(&status),
            keep,
            spatial,
        )?;
        self.shared
            .with_state(|state| state.add(voice))
            .ok_or_else(|| ResonarError::Engine("Device state is busy".into()))?;

        Ok(Handle::new(
            id,
            Arc::downgrade(&self.shared),
            status,
            config.is_spatial(),
        ))
    }

    /// Stops every handle, firing their stop callbacks.
    pub fn stop_all(&self) {
        let _lock = self.shared.lock();
        let callbacks = self
            .shared
            .with_state(|state| state.stop_all())
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    /// Number of playing and paused handles.
    pub fn handle_count(&self) -> usize {
        self.shared
            .with_state(|state| state.playing_count() + state.paused_count())
            .unwrap_or(0)
    }

    /// Master volume applied to the whole mix.
    pub fn volume(&self) -> f32 {
        self.shared.with_state(|state| state.volume).unwrap_or(1.0)
    }

    pub fn set_volume(&self, volume: f32) -> bool {
        volume.is_finite()
            && volume >= 0.0
            && self
                .shared
                .with_state(|state| state.volume = volume)
                .is_some()
    }

    /// The 3D settings, present when spatialization is enabled.
    pub fn spatial(&self) -> Option<&dyn SpatialDevice> {
        self.shared
            .spatial
            .then_some(&*self.shared as &dyn SpatialDevice)
    }

    /// Drains the events queued since the last call.
    pub fn poll_events(&self) -> Vec<DeviceEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Clears the running flag when the mixing thread exits, including by
/// unwinding.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn mixing_loop<S: OutputSink>(
    shared: &DeviceShared,
    running: &AtomicBool,
    sink: &mut S,
    block_size: usize,
) {
    let mut buffer = vec![0.0; block_size * shared.specs.specs.frame_len()];
    while running.load(Ordering::Acquire) {
        shared.mix(&mut buffer);
        // The sink blocks until it has room, which paces the loop.
        if let Err(e) = sink.write(&buffer) {
            log::error!("Output sink failed: {}", e);
            running.store(false, Ordering::Release);
            shared.emit(DeviceEvent::SinkError {
                error: e.to_string(),
            });
            break;
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.mixing_thread.take() {
            if thread.join().is_err() {
                log::error!("Mixing thread panicked");
            }
        }
        self.stop_all();
        log::info!("Device closed");
    }
}
