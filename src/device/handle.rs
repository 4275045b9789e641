use super::DeviceShared;
use super::mixer::Voice;
use super::spatial::SpatialParams;
use crate::math::{Quat, Vec3};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of one playback started on a device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

/// Playback state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The device that owned the handle no longer exists.
    Invalid,
    Playing,
    Paused,
    /// Finished or stopped. A stopped handle never plays again.
    Stopped,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::Stopped,
            _ => Self::Invalid,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Playing => 1,
            Self::Paused => 2,
            Self::Stopped => 3,
        }
    }
}

/// Status shared between a [`Handle`] and the mixer's voice, readable
/// without taking the device lock.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    pub fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, status: Status) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

/// Invoked once when a handle stops, either explicitly or at end of stream.
pub type StopCallback = Box<dyn FnOnce() + Send>;

/// Control object for one playing reader.
///
/// Handles are cheap to clone; every clone controls the same playback.
/// Operations on a stopped handle, or on a handle whose device is gone,
/// fail by returning `false` or `None`.
#[derive(Clone)]
pub struct Handle {
    id: HandleId,
    device: Weak<DeviceShared>,
    status: Arc<StatusCell>,
    spatial: bool,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("spatial", &self.spatial)
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(
        id: HandleId,
        device: Weak<DeviceShared>,
        status: Arc<StatusCell>,
        spatial: bool,
    ) -> Self {
        Self {
            id,
            device,
            status,
            spatial,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn status(&self) -> Status {
        if self.device.strong_count() == 0 {
            return Status::Invalid;
        }
        self.status.load()
    }

    pub fn pause(&self) -> bool {
        self.with_device(|device| device.with_state(|state| state.pause(self.id)))
            .unwrap_or(false)
    }

    /// Resumes a paused handle. A handle that was paused at its end because
    /// of `keep` restarts from the beginning unless it was seeked.
    pub fn resume(&self) -> bool {
        self.with_device(|device| device.with_state(|state| state.resume(self.id)))
            .unwrap_or(false)
    }

    /// Stops the handle for good, firing its stop callback.
    pub fn stop(&self) -> bool {
        let Some(device) = self.device.upgrade() else {
            return false;
        };
        // The callback runs under the device lock but outside the state borrow.
        let _lock = device.lock();
        let callback = device
            .with_state(|state| state.stop(self.id))
            .flatten();
        match callback {
            Some(callback) => {
                if let Some(callback) = callback {
                    callback();
                }
                true
            }
            None => false,
        }
    }

    /// Whether the handle pauses instead of stopping at end of stream.
    pub fn keep(&self) -> Option<bool> {
        self.with_voice(|voice| voice.keep)
    }

    pub fn set_keep(&self, keep: bool) -> bool {
        self.with_voice(|voice| voice.keep = keep).is_some()
    }

    /// Seeks to a position in seconds of the played sound.
    pub fn seek(&self, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds < 0.0 {
            return false;
        }
        self.with_voice(|voice| voice.seek(seconds))
            .unwrap_or(false)
    }

    /// Playback position in seconds of the played sound.
    pub fn position(&self) -> Option<f64> {
        self.with_voice(|voice| voice.position())
    }

    pub fn volume(&self) -> Option<f32> {
        self.with_voice(|voice| voice.volume)
    }

    pub fn set_volume(&self, volume: f32) -> bool {
        if !volume.is_finite() || volume < 0.0 {
            return false;
        }
        self.with_voice(|voice| voice.volume = volume).is_some()
    }

    pub fn pitch(&self) -> Option<f32> {
        self.with_voice(|voice| voice.pitch)
    }

    pub fn set_pitch(&self, pitch: f32) -> bool {
        if !pitch.is_finite() || pitch <= 0.0 {
            return false;
        }
        self.with_voice(|voice| voice.pitch = pitch).is_some()
    }

    /// Remaining loops: 0 plays once, -1 loops forever.
    pub fn loop_count(&self) -> Option<i32> {
        self.with_voice(|voice| voice.loop_count)
    }

    pub fn set_loop_count(&self, count: i32) -> bool {
        if count < -1 {
            return false;
        }
        self.with_voice(|voice| voice.loop_count = count).is_some()
    }

    /// Registers the callback fired when the handle stops, replacing any
    /// earlier one.
    pub fn set_stop_callback<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let callback: StopCallback = Box::new(callback);
        self.with_voice(move |voice| voice.stop_callback = Some(callback))
            .is_some()
    }

    /// The 3D controls, present when the handle was played spatially.
    pub fn spatial(&self) -> Option<SpatialHandle<'_>> {
        self.spatial.then_some(SpatialHandle { handle: self })
    }

    fn with_device<R>(&self, f: impl FnOnce(&DeviceShared) -> Option<R>) -> Option<R> {
        let device = self.device.upgrade()?;
        f(&device)
    }

    fn with_voice<R>(&self, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        self.with_device(|device| {
            device
                .with_state(|state| state.voice_mut(self.id).map(f))
                .flatten()
        })
    }
}

/// 3D parameters of a spatial [`Handle`].
///
/// Getters return `None` and setters `false` once the handle stopped or when
/// the value is out of range.
pub struct SpatialHandle<'a> {
    handle: &'a Handle,
}

macro_rules! spatial_scalar {
    ($(#[$meta:meta])* $get:ident, $set:ident, |$value:ident| $valid:expr) => {
        $(#[$meta])*
        pub fn $get(&self) -> Option<f32> {
            self.with_params(|params| params.$get)
        }

        pub fn $set(&self, $value: f32) -> bool {
            if !$value.is_finite() || !($valid) {
                return false;
            }
            self.with_params(|params| params.$get = $value).is_some()
        }
    };
}

impl SpatialHandle<'_> {
    pub fn location(&self) -> Option<Vec3> {
        self.with_params(|params| params.location)
    }

    pub fn set_location(&self, location: Vec3) -> bool {
        location.is_finite() && self.with_params(|params| params.location = location).is_some()
    }

    pub fn velocity(&self) -> Option<Vec3> {
        self.with_params(|params| params.velocity)
    }

    pub fn set_velocity(&self, velocity: Vec3) -> bool {
        velocity.is_finite() && self.with_params(|params| params.velocity = velocity).is_some()
    }

    pub fn orientation(&self) -> Option<Quat> {
        self.with_params(|params| params.orientation)
    }

    pub fn set_orientation(&self, orientation: Quat) -> bool {
        if !orientation.is_finite() || orientation.length_squared() <= f32::EPSILON {
            return false;
        }
        let orientation = orientation.normalize();
        self.with_params(|params| params.orientation = orientation)
            .is_some()
    }

    /// Whether location and velocity are relative to the listener.
    pub fn relative(&self) -> Option<bool> {
        self.with_params(|params| params.relative)
    }

    pub fn set_relative(&self, relative: bool) -> bool {
        self.with_params(|params| params.relative = relative).is_some()
    }

    spatial_scalar!(volume_maximum, set_volume_maximum, |v| v >= 0.0);
    spatial_scalar!(volume_minimum, set_volume_minimum, |v| v >= 0.0);
    spatial_scalar!(
        /// Distance beyond which clamped models stop attenuating.
        distance_maximum,
        set_distance_maximum,
        |v| v >= 0.0
    );
    spatial_scalar!(
        /// Distance at which the gain is one.
        distance_reference,
        set_distance_reference,
        |v| v >= 0.0
    );
    spatial_scalar!(
        /// Rolloff factor of the distance model.
        attenuation,
        set_attenuation,
        |v| v >= 0.0
    );
    spatial_scalar!(
        /// Full angle of the outer cone in degrees.
        cone_angle_outer,
        set_cone_angle_outer,
        |v| (0.0..=360.0).contains(&v)
    );
    spatial_scalar!(
        cone_angle_inner,
        set_cone_angle_inner,
        |v| (0.0..=360.0).contains(&v)
    );
    spatial_scalar!(cone_volume_outer, set_cone_volume_outer, |v| v >= 0.0);

    fn with_params<R>(&self, f: impl FnOnce(&mut SpatialParams) -> R) -> Option<R> {
        self.handle
            .with_voice(|voice| voice.spatial.as_mut().map(f))
            .flatten()
    }
}
